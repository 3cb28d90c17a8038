use crate::store::StoreCommand;

/// All errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session store could not be reached when the manager was constructed.
    /// This covers dialing, pool construction and selecting the database.
    #[error("could not connect to the session store at {address}: {source}")]
    Connection {
        /// The address that was dialed.
        address: String,
        /// The underlying error of the store client.
        #[source]
        source: anyhow::Error,
    },

    /// No store client could be checked out for handling a request.
    #[error("could not check out a session store client: {source}")]
    Checkout {
        /// The underlying error of the store backend.
        #[source]
        source: anyhow::Error,
    },

    /// A store command failed or timed out.
    ///
    /// The in-memory state of the session is not rolled back, so it may be ahead of what was persisted.
    /// Callers decide whether to fail the request or to continue with the in-memory state.
    #[error("session store command {command} on key {key} failed: {source}")]
    StoreOperation {
        /// The command that failed.
        command: StoreCommand,
        /// The key the command was issued on.
        key: String,
        /// The underlying error of the store client.
        #[source]
        source: anyhow::Error,
    },

    /// The hash stored for a session is not a sequence of field/value pairs.
    /// The stored hash is discarded, and a new session has to be created.
    #[error("the session data under key {key} is corrupt: the store returned {len} elements, which is not a sequence of pairs")]
    CorruptSessionData {
        /// The key of the corrupt hash.
        key: String,
        /// The number of elements that were returned.
        len: usize,
    },

    /// The cookie generator of the manager produced a value that cannot be used as a session id.
    /// Session ids must consist of 1 to [`MAX_SESSION_ID_LENGTH`](crate::MAX_SESSION_ID_LENGTH) printable ASCII characters.
    #[error("the cookie generator produced an invalid session id of length {len}")]
    InvalidSessionId {
        /// The length of the generated value.
        len: usize,
    },

    /// A value could not be converted from or to its JSON representation.
    #[error("the value of session field {field} could not be converted: {source}")]
    InvalidValue {
        /// The field of the value.
        field: String,
        /// The underlying error of serde_json.
        #[source]
        source: serde_json::Error,
    },

    /// The session cookie could not be rendered as an HTTP header value.
    #[error("the session cookie is not a valid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

impl Error {
    /// Returns true if this error was caused by the session store rather than by the session data.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Checkout { .. } | Self::StoreOperation { .. }
        )
    }

    pub(crate) fn store_operation(
        command: StoreCommand,
        key: &str,
    ) -> impl FnOnce(anyhow::Error) -> Self + '_ {
        move |source| Self::StoreOperation {
            command,
            key: key.to_owned(),
            source,
        }
    }
}

mod expect_impl_error {
    trait ExpectImplError: std::error::Error + Send + Sync + 'static {}

    impl ExpectImplError for super::Error {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        let error = Error::StoreOperation {
            command: StoreCommand::Expire,
            key: "sess:abc".to_owned(),
            source: anyhow::anyhow!("timed out"),
        };
        assert!(error.is_store_error());
        assert_eq!(
            error.to_string(),
            "session store command EXPIRE on key sess:abc failed: timed out"
        );

        let error = Error::CorruptSessionData {
            key: "sess:abc".to_owned(),
            len: 3,
        };
        assert!(!error.is_store_error());
    }
}
