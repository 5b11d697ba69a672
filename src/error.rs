//! Unified error type.

/// The error type used throughout tsu-middleware.
///
/// Two kinds of failure travel through this type:
///
/// - **construction-time** failures, returned from builders such as
///   [`Config::from_settings`](crate::middleware::logger::Config::from_settings):
///   a bad skip-path pattern or time format;
/// - **request-scoped** errors, recorded on the
///   [`Context`](crate::Context) by handlers and middleware. These are never
///   returned to a caller. The request logger writes one error record per
///   entry once the handler returns.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure, including a peer that went away mid-response.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid skip-path pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid time format `{0}`")]
    TimeFormat(String),

    /// The inbound body could not be collected from the connection.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// A panic payload that is not itself an error value.
    #[error("panic: {0}")]
    Panic(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    /// A plain-text request error, the equivalent of `Err("...".into())`.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_and_display_with_prefix() {
        let err: Error = std::io::Error::other("disk on fire").into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "io: disk on fire");
    }

    #[test]
    fn pattern_error_names_the_offending_pattern() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = Error::Pattern { pattern: "(".to_owned(), source };
        assert!(err.to_string().starts_with("invalid skip-path pattern `(`"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn message_errors_display_verbatim() {
        assert_eq!(Error::msg("user not found").to_string(), "user not found");
    }
}
