use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Transcript is full (capacity {0})")]
    TranscriptFull(usize),

    #[error("Round limit reached (max {0})")]
    RoundLimit(u32),

    #[error("Contribution from round {contribution} is ahead of session round {session}")]
    FutureRound { contribution: u32, session: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
