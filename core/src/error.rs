use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("PTY I/O failed: {source}")]
    PtyIo {
        #[source]
        source: std::io::Error,
    },
    #[error("chat transport failed: {message}")]
    Transport { message: String },
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn spawn(command: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    pub fn pty_io(source: std::io::Error) -> Self {
        Self::PtyIo { source }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl BridgeError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Spawn { .. } | Self::PtyIo { .. } | Self::Transport { .. } => 1,
        }
    }
}
