use relay_core::StageError;
use relay_engine::EngineError;

use crate::client::ChatClientError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Client(#[from] ChatClientError),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("invalid arguments for /{command}: {reason}")]
    InvalidArgs { command: String, reason: String },
    #[error(transparent)]
    Client(#[from] ChatClientError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl From<ChatClientError> for StageError {
    fn from(e: ChatClientError) -> Self {
        Self::Other(Box::new(e))
    }
}

impl From<ChatError> for StageError {
    fn from(e: ChatError) -> Self {
        Self::Other(Box::new(e))
    }
}

impl From<CommandError> for StageError {
    fn from(e: CommandError) -> Self {
        Self::Other(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_readable() {
        let e = CommandError::InvalidArgs {
            command: "mute".into(),
            reason: "minutes must be a number".into(),
        };
        assert_eq!(e.to_string(), "invalid arguments for /mute: minutes must be a number");
        assert_eq!(CommandError::NotFound("foo".into()).to_string(), "command not found: foo");
    }

    #[test]
    fn converts_into_stage_error() {
        let e: StageError = ChatError::Engine(EngineError::Cancelled).into();
        assert_eq!(e.to_string(), "turn cancelled");
    }
}
