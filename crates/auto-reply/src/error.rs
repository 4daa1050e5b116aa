use courier_agents::RunError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Routing(#[from] courier_routing::Error),

    #[error(transparent)]
    Session(#[from] courier_sessions::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Channel(#[from] courier_channels::Error),

    #[error("/{command} failed: {source}")]
    Command {
        command: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// The runner error behind this one, if any.
    #[must_use]
    pub fn run_error(&self) -> Option<&RunError> {
        match self {
            Self::Run(e) | Self::Session(courier_sessions::Error::Open(e)) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.run_error(), Some(RunError::Cancelled))
    }

    /// Short machine-readable tag for dispatch results and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if let Some(e) = self.run_error() {
            return e.kind();
        }
        match self {
            Self::Routing(_) => "routing",
            Self::Session(_) => "session",
            Self::Channel(_) => "channel",
            Self::Command { .. } => "command",
            Self::Run(_) => "unknown",
        }
    }

    /// Human-facing headline for error rendering.
    #[must_use]
    pub fn title(&self) -> &'static str {
        if let Some(e) = self.run_error() {
            return e.title();
        }
        match self {
            Self::Routing(_) => "Routing failed",
            Self::Channel(_) => "Delivery failed",
            Self::Command { .. } => "Command failed",
            Self::Session(_) | Self::Run(_) => "Something went wrong",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
