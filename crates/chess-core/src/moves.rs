//! Move application: legality via the oracle, board deltas, terminal detection.
//!
//! Nothing here mutates its inputs. Every function returns a fresh `Position`
//! (and, for the identity-aware variant, a fresh `PieceStateBySquare`).

use std::collections::BTreeSet;
use std::num::NonZeroU32;

use serde::Serialize;
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, CastlingSide, Chess, Color, File, FromSetup, Move, Position as _, Rank, Role, Square};

use crate::error::ChessError;
use crate::identity::{PieceIdentity, PieceStateBySquare};
use crate::notation::{uci_move_squares, PlayerSide, Position, PositionHistory};

/// One square's change: a piece leaving `from` for `to`, or leaving the board
/// altogether when `to` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquareDelta {
    pub from: Square,
    pub to: Option<Square>,
}

impl Serialize for SquareDelta {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SquareDelta", 2)?;
        state.serialize_field("from", &self.from.to_string())?;
        state.serialize_field("to", &self.to.map(|sq| sq.to_string()))?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoves,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameOver {
    pub winner: Option<PlayerSide>,
    pub reason: GameEndReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub new_position: Position,
    /// Moved piece first, then the capture removal, then the castling rook.
    pub deltas: Vec<SquareDelta>,
    pub is_capture: bool,
    pub captured: Option<Square>,
    pub is_castling: bool,
    pub promotion: Option<Role>,
    pub game_over: Option<GameOver>,
}

/// Result of a move applied to both the position and the identity map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMove {
    pub outcome: MoveOutcome,
    pub piece_state_by_square: PieceStateBySquare,
    pub captured_identity: Option<PieceIdentity>,
}

/// Where a legal move lands, as a player sees it: castling lands on the king's
/// destination square, not on the rook the oracle encodes it with.
pub fn move_target(mv: &Move) -> Square {
    match mv {
        Move::Castle { king, rook } => {
            let file = if rook.file() > king.file() { File::G } else { File::C };
            Square::from_coords(file, king.rank())
        }
        _ => mv.to(),
    }
}

/// Destination squares of every legal move of the piece on `from`.
pub fn legal_targets(position: &Position, from: Square) -> BTreeSet<Square> {
    position
        .chess()
        .legal_moves()
        .iter()
        .filter(|mv| mv.from() == Some(from))
        .map(move_target)
        .collect()
}

/// Distinct origin squares among all currently legal moves.
pub fn squares_with_pieces_that_can_move(position: &Position) -> BTreeSet<Square> {
    position.chess().legal_moves().iter().filter_map(|mv| mv.from()).collect()
}

pub fn apply_move(position: &Position, from: Square, to: Square) -> Result<MoveOutcome, ChessError> {
    apply_move_with_history(position, &PositionHistory::new(), from, to)
}

/// `history` holds every position reached so far in the game, including
/// `position` itself. It only matters for threefold repetition.
pub fn apply_move_with_history(
    position: &Position,
    history: &PositionHistory,
    from: Square,
    to: Square,
) -> Result<MoveOutcome, ChessError> {
    let chess = position.chess();
    let invalid = || ChessError::InvalidMove {
        from,
        to,
        fen: position.as_str().to_string(),
    };

    let moving_piece = chess.board().piece_at(from).ok_or(ChessError::MissingPiece(from))?;

    // Under-promotion is not offered: a pawn reaching the last rank becomes a queen.
    let is_promotion =
        moving_piece.role == Role::Pawn && matches!(to.rank(), Rank::First | Rank::Eighth);
    let uci = UciMove::Normal {
        from,
        to,
        promotion: is_promotion.then_some(Role::Queen),
    };
    let mv = uci.to_move(chess).map_err(|_| invalid())?;
    if move_target(&mv) != to {
        // "King takes own rook" castling notation is not part of our vocabulary.
        return Err(invalid());
    }

    let mut after = chess.clone();
    after.play_unchecked(mv.clone());
    let new_position = Position::from_chess(after);

    let mut deltas = vec![SquareDelta { from, to: Some(to) }];

    let is_capture = mv.is_capture();
    let captured = if is_capture {
        let square = if mv.is_en_passant() {
            Square::from_coords(to.file(), from.rank())
        } else {
            to
        };
        deltas.push(SquareDelta {
            from: square,
            to: None,
        });
        Some(square)
    } else {
        None
    };

    let is_castling = mv.is_castle();
    if let Some(side) = mv.castling_side() {
        let (rook_from, rook_to) = match side {
            CastlingSide::KingSide => (File::H, File::F),
            CastlingSide::QueenSide => (File::A, File::D),
        };
        deltas.push(SquareDelta {
            from: Square::from_coords(rook_from, from.rank()),
            to: Some(Square::from_coords(rook_to, from.rank())),
        });
    }

    let game_over = detect_game_over(&new_position, history);

    Ok(MoveOutcome {
        new_position,
        deltas,
        is_capture,
        captured,
        is_castling,
        promotion: mv.promotion(),
        game_over,
    })
}

/// Terminal state of `position`, if any. Checkmate dominates every draw, and
/// stalemate is decided before the material / repetition / clock draws.
pub fn detect_game_over(position: &Position, history: &PositionHistory) -> Option<GameOver> {
    let chess = position.chess();
    let is_checkmate = chess.is_checkmate();
    let is_stalemate = chess.is_stalemate();
    let is_insufficient_material = chess.is_insufficient_material();
    let is_threefold = history.occurrences(position) + 1 >= 3;
    let is_fifty_moves = chess.halfmoves() >= 100;

    if !(is_checkmate || is_stalemate || is_insufficient_material || is_threefold || is_fifty_moves)
    {
        return None;
    }

    let game_over = if is_checkmate {
        GameOver {
            winner: Some(position.side_to_move().other()),
            reason: GameEndReason::Checkmate,
        }
    } else {
        let reason = if is_stalemate {
            GameEndReason::Stalemate
        } else if is_insufficient_material {
            GameEndReason::InsufficientMaterial
        } else if is_threefold {
            GameEndReason::ThreefoldRepetition
        } else {
            GameEndReason::FiftyMoves
        };
        GameOver { winner: None, reason }
    };
    Some(game_over)
}

/// Apply a move to the position and carry the piece identities along with it.
pub fn apply_move_with_identities(
    position: &Position,
    pieces: &PieceStateBySquare,
    history: &PositionHistory,
    from: Square,
    to: Square,
) -> Result<IdentityMove, ChessError> {
    let mover = *pieces.get(from).ok_or(ChessError::MissingPiece(from))?;
    let outcome = apply_move_with_history(position, history, from, to)?;

    let mut next = pieces.clone();
    if let Some(role) = outcome.promotion {
        next.insert(from, mover.promoted(role));
    }

    // Captures first, so that the capturing piece can then land on its square.
    let mut captured_identity = None;
    for delta in outcome.deltas.iter().filter(|d| d.to.is_none()) {
        captured_identity = next.remove(delta.from);
    }
    for delta in &outcome.deltas {
        if let Some(dest) = delta.to {
            let identity = next.remove(delta.from).ok_or(ChessError::MissingPiece(delta.from))?;
            next.insert(dest, identity);
        }
    }

    if !next.agrees_with(&outcome.new_position) {
        tracing::warn!(
            fen = %outcome.new_position,
            from = %from,
            to = %to,
            "Piece identities and board occupancy disagree after move"
        );
    }

    Ok(IdentityMove {
        outcome,
        piece_state_by_square: next,
        captured_identity,
    })
}

/// Rewind a single non-capturing move: the position the game was in before
/// `moving_side` played `compact_move` to reach `position`.
pub fn position_before_move(
    position: &Position,
    compact_move: &str,
    moving_side: PlayerSide,
) -> Result<Position, ChessError> {
    let (from, to) = uci_move_squares(compact_move)?;
    let invalid = || ChessError::InvalidMove {
        from,
        to,
        fen: position.as_str().to_string(),
    };

    let fen: Fen = position.as_str().parse().map_err(|_| invalid())?;
    let mut setup = fen.into_setup();

    let piece = setup.board.remove_piece_at(to).ok_or(ChessError::MissingPiece(to))?;
    if PlayerSide::from(piece.color) != moving_side {
        return Err(invalid());
    }
    setup.board.set_piece_at(from, piece);
    setup.turn = Color::from(moving_side);
    setup.ep_square = None;
    if moving_side == PlayerSide::Black {
        if let Some(previous) = NonZeroU32::new(setup.fullmoves.get() - 1) {
            setup.fullmoves = previous;
        }
    }

    let before = Chess::from_setup(setup, CastlingMode::Standard).map_err(|_| invalid())?;

    // The rewound move must be playable from the rewound position.
    let uci = UciMove::Normal {
        from,
        to,
        promotion: None,
    };
    uci.to_move(&before).map_err(|_| invalid())?;

    Ok(Position::from_chess(before))
}
