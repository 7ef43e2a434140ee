//! Game-state derivation for the daily chess challenge: notation, persistent
//! piece identities, move application, the presenter and the challenge session.

pub mod challenge;
pub mod error;
pub mod identity;
pub mod moves;
pub mod notation;
pub mod presenter;
pub mod selection;
pub mod team;

pub use error::ChessError;
pub use notation::{PlayerSide, Position, PositionHistory};
