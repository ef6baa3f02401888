use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{message}")]
    Http { status: Option<u16>, message: String },

    #[error("downloader exited with code {exit_code}: {message}")]
    Process { exit_code: i32, message: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("all {0} workers are busy")]
    Busy(usize),

    #[error(transparent)]
    Storage(#[from] mediafetch_media::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Map a transport-level reqwest failure.
    #[must_use]
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("{context}: request timed out")
        } else if err.is_connect() {
            format!("{context}: connection error")
        } else {
            format!("{context}: {err}")
        };
        Self::Http {
            status: err.status().map(|s| s.as_u16()),
            message,
        }
    }
}

impl mediafetch_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

mediafetch_common::impl_context!();
