//! Error taxonomy for the game logic.

use shakmaty::Square;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChessError {
    #[error("Invalid square: {0:?}")]
    InvalidSquare(String),

    #[error("Invalid position '{fen}': {reason}")]
    InvalidPosition { fen: String, reason: String },

    #[error("Invalid piece identity: {0:?}")]
    InvalidIdentity(String),

    #[error("Invalid move '{from}{to}' for FEN '{fen}'")]
    InvalidMove { from: Square, to: Square, fen: String },

    #[error("No piece on square '{0}'")]
    MissingPiece(Square),

    #[error("Cannot create more than {max} piece(s) of type '{role}' for one side")]
    TooManyPieces { role: char, max: u8 },

    #[error("Invalid compact move: {0:?}")]
    InvalidCompactMove(String),

    #[error("Undo is not available: {0}")]
    UndoNotAvailable(&'static str),

    #[error("Invalid solution {0}")]
    InvalidSolution(String),

    #[error("Solution is not available: {0}")]
    SolutionNotAvailable(&'static str),
}
