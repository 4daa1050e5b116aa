use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The session could not be opened on any model.
    #[error(transparent)]
    Open(#[from] courier_agents::RunError),

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
}

pub type Result<T> = std::result::Result<T, Error>;
