use thiserror::Error;

/// Errors returned by a [`RulesEngine`](crate::RulesEngine).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RulesError {
    /// The serialized position could not be parsed or is not a legal
    /// board.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("invalid square: {0}")]
    InvalidSquare(String),

    /// The origin square holds no piece.
    #[error("no piece on {0}")]
    EmptySquare(String),

    #[error("illegal move {from}-{to}")]
    IllegalMove { from: String, to: String },

    /// The position is already decided; no further moves exist.
    #[error("game is over")]
    GameOver,

    /// A move row is out of sequence while replaying a log.
    #[error("move log broken: expected move {expected}, found {found}")]
    BrokenSequence { expected: u32, found: u32 },
}
