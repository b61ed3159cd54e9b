use thiserror::Error;

/// Error type for grouping, compilation, execution and assembly.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} parameter should be specified to groupby")]
    MissingParameter(String),

    #[error("Requested columns {} not in the DataFrame", quote_list(.0))]
    UnknownColumn(Vec<String>),

    #[error("Currently {function} is not supported for groupby")]
    UnsupportedCapability { function: String },

    #[error("Cannot compute {function} of column '{column}' with type {field_type}")]
    IncompatibleType {
        column: String,
        function: String,
        field_type: String,
    },

    #[error("Backend error{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Backend {
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error")]
    Json(#[source] serde_json::Error),

    #[error("I/O error")]
    Io(#[source] std::io::Error),
}

/// Coarse classification of [`Error`], used by the groupby state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingParameter,
    UnknownColumn,
    Unsupported,
    IncompatibleType,
    Backend,
    Invalid,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingParameter(_) => ErrorKind::MissingParameter,
            Error::UnknownColumn(_) => ErrorKind::UnknownColumn,
            Error::UnsupportedCapability { .. } => ErrorKind::Unsupported,
            Error::IncompatibleType { .. } => ErrorKind::IncompatibleType,
            Error::Backend { .. } => ErrorKind::Backend,
            _ => ErrorKind::Invalid,
        }
    }

    /// Whether a caller may reasonably retry the same call.
    ///
    /// Only backend failures with a throttling or availability status qualify;
    /// this crate never retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Backend {
                status: Some(429) | Some(502) | Some(503) | Some(504),
                ..
            }
        )
    }

    pub(crate) fn unsupported(function: impl Into<String>) -> Self {
        Error::UnsupportedCapability {
            function: function.into(),
        }
    }
}

fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_pandas_wording() {
        let err = Error::MissingParameter("by".into());
        assert_eq!(err.to_string(), "by parameter should be specified to groupby");

        let err = Error::UnknownColumn(vec!["ABC".into()]);
        assert_eq!(err.to_string(), "Requested columns 'ABC' not in the DataFrame");

        let err = Error::UnknownColumn(vec!["ABC".into(), "XYZ".into()]);
        assert_eq!(
            err.to_string(),
            "Requested columns 'ABC', 'XYZ' not in the DataFrame"
        );

        let err = Error::unsupported("mode");
        assert_eq!(err.to_string(), "Currently mode is not supported for groupby");
    }

    #[test]
    fn test_backend_message_and_retry_hint() {
        let err = Error::Backend {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "Backend error (status 503): unavailable");
        assert!(err.is_retriable());
        assert_eq!(err.kind(), ErrorKind::Backend);

        let err = Error::Backend {
            status: None,
            message: "connection reset".into(),
        };
        assert_eq!(err.to_string(), "Backend error: connection reset");
        assert!(!err.is_retriable());
        assert!(!Error::unsupported("mode").is_retriable());
    }
}
