#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("channel event without a channel id")]
    MissingChannel,

    #[error("no agent resolved for channel '{channel}'")]
    NoAgent { channel: String },
}

pub type Result<T> = std::result::Result<T, Error>;
