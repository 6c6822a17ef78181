use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_config(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidConfiguration {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn evaluation<E>(context: impl Into<String>, source: E) -> Error
    where
        E: Into<StdErrorBoxed>,
    {
        Error(
            ErrorKind::Evaluation {
                context: context.into(),
                source: source.into(),
            }
            .into(),
        )
    }

    pub fn too_many_buckets(limit: u64, requested: u64) -> Error {
        Error(ErrorKind::TooManyBuckets { limit, requested }.into())
    }

    pub fn canceled(reason: impl Into<String>) -> Error {
        Error(
            ErrorKind::Canceled {
                reason: reason.into(),
            }
            .into(),
        )
    }

    pub fn serialization(element: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Serialization {
                element: element.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    /// Returns `true` when the error is confined to the shard that produced it.
    ///
    /// Only evaluation failures are shard-local: the coordinator reports them next to
    /// the partial result. Every other kind aborts the whole request.
    pub fn is_shard_local(&self) -> bool {
        matches!(self.kind(), ErrorKind::Evaluation { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Canceled { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("evaluation failed in {context}: {source}")]
    Evaluation {
        context: String,
        source: StdErrorBoxed,
    },

    #[error("too many buckets: {requested} requested, the limit is {limit}")]
    TooManyBuckets { limit: u64, requested: u64 },

    #[error("operation canceled: {reason}")]
    Canceled { reason: String },

    #[error("malformed payload for '{element}': {message}")]
    Serialization { element: String, message: String },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization("json", e.to_string())
    }
}
