use thiserror::Error;

pub type Result<T> = std::result::Result<T, BeanckupError>;

#[derive(Debug, Error)]
pub enum BeanckupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive program failed: {0}")]
    Subprocess(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("aborted by user")]
    UserAbort,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl BeanckupError {
    pub fn parse(path: impl Into<String>, source: serde_json::Error) -> Self {
        BeanckupError::Parse {
            path: path.into(),
            source,
        }
    }

    /// Whether the error leaves no sane way to continue the session: a
    /// failing disk, corrupted metadata, or an unresolvable reference graph,
    /// as opposed to an action the user can retry with different input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BeanckupError::Io(_) | BeanckupError::Parse { .. } | BeanckupError::Integrity(_)
        )
    }
}
