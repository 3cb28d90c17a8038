use crate::session::SESSION_ID_LENGTH;
use rand::distributions::{Alphanumeric, DistString};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A type with the ability to generate session cookies.
///
/// Generators are shared by all requests of a [`SessionManager`](crate::SessionManager),
/// hence they generate through a shared reference.
pub trait SessionCookieGenerator {
    /// Generate a cookie, i.e. a string of [`SESSION_ID_LENGTH`] alphanumeric characters.
    ///
    /// Values that are empty, longer than [`MAX_SESSION_ID_LENGTH`](crate::MAX_SESSION_ID_LENGTH)
    /// or not printable ASCII make session creation fail with [`Error::InvalidSessionId`](crate::Error::InvalidSessionId).
    fn generate_cookie(&self) -> String;
}

/// The default cookie generator with focus on security.
/// It uses [rand::rngs::ThreadRng] as a random source and the [Alphanumeric] distribution to generate cookie strings.
/// This gives `log_2(26+26+10) ≥ 5.95` bits of entropy per character, so more than 238 bits per cookie.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionCookieGenerator;

impl SessionCookieGenerator for DefaultSessionCookieGenerator {
    fn generate_cookie(&self) -> String {
        // ThreadRng is a CSPRNG that is periodically reseeded from the operating system.
        let mut cookie = String::with_capacity(SESSION_ID_LENGTH);
        Alphanumeric.append_string(&mut rand::thread_rng(), &mut cookie, SESSION_ID_LENGTH);
        cookie
    }
}

/// A debug cookie generator that generates an ascending sequence of integers, formatted as strings padded with zeroes.
///
/// **Never use this outside of tests.**
#[derive(Debug, Default)]
pub struct DebugSessionCookieGenerator {
    next_index: AtomicUsize,
}

impl SessionCookieGenerator for DebugSessionCookieGenerator {
    fn generate_cookie(&self) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        format!("{index:0width$}", width = SESSION_ID_LENGTH)
    }
}
