//! Board notation: squares, sides and the immutable `Position` (FEN) value type.
//!
//! Every FEN that leaves this module was produced by the rules oracle, so two
//! `Position`s describing the same game state always compare equal.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, File, FromSetup, Position as _, Rank, Square};

use crate::error::ChessError;

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Side of the board, serialized with the chess conventions "w" / "b".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlayerSide {
    #[serde(rename = "w")]
    White,
    #[serde(rename = "b")]
    Black,
}

impl PlayerSide {
    pub fn other(self) -> Self {
        match self {
            PlayerSide::White => PlayerSide::Black,
            PlayerSide::Black => PlayerSide::White,
        }
    }

    pub fn char(self) -> char {
        match self {
            PlayerSide::White => 'w',
            PlayerSide::Black => 'b',
        }
    }
}

impl From<Color> for PlayerSide {
    fn from(color: Color) -> Self {
        match color {
            Color::White => PlayerSide::White,
            Color::Black => PlayerSide::Black,
        }
    }
}

impl From<PlayerSide> for Color {
    fn from(side: PlayerSide) -> Self {
        match side {
            PlayerSide::White => Color::White,
            PlayerSide::Black => Color::Black,
        }
    }
}

impl fmt::Display for PlayerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SquareColor {
    Light,
    Dark,
}

/// Split a square into its file ('a'..='h') and rank ('1'..='8') characters.
pub fn square_to_file_and_rank(square: Square) -> (char, char) {
    (square.file().char(), square.rank().char())
}

/// Inverse of [`square_to_file_and_rank`].
///
/// Panics on characters outside the 8x8 board: callers only ever feed it the
/// fixed square set or input already checked with [`parse_square`].
pub fn file_and_rank_to_square(file: char, rank: char) -> Square {
    match (File::from_char(file), Rank::from_char(rank)) {
        (Some(file), Some(rank)) => Square::from_coords(file, rank),
        _ => panic!("square out of the board: {file}{rank}"),
    }
}

/// Parse a square coming from an untrusted source (URL path, query string...).
pub fn parse_square(raw: &str) -> Result<Square, ChessError> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(file), Some(rank), None) => match (File::from_char(file), Rank::from_char(rank)) {
            (Some(file), Some(rank)) => Ok(Square::from_coords(file, rank)),
            _ => Err(ChessError::InvalidSquare(raw.to_string())),
        },
        _ => Err(ChessError::InvalidSquare(raw.to_string())),
    }
}

/// Split a 4-character compact move ("e2e4") into its two squares.
pub fn uci_move_squares(compact: &str) -> Result<(Square, Square), ChessError> {
    if compact.len() != 4 || !compact.is_ascii() {
        return Err(ChessError::InvalidCompactMove(compact.to_string()));
    }
    let from = parse_square(&compact[0..2])
        .map_err(|_| ChessError::InvalidCompactMove(compact.to_string()))?;
    let to = parse_square(&compact[2..4])
        .map_err(|_| ChessError::InvalidCompactMove(compact.to_string()))?;
    Ok((from, to))
}

pub fn square_color(square: Square) -> SquareColor {
    if (square.file() as u32 + square.rank() as u32) % 2 == 0 {
        SquareColor::Dark
    } else {
        SquareColor::Light
    }
}

/// A full chess position, replaced wholesale on every move.
#[derive(Clone)]
pub struct Position {
    fen: String,
    chess: Chess,
}

impl Position {
    pub fn parse(fen: &str) -> Result<Self, ChessError> {
        let invalid = |reason: String| ChessError::InvalidPosition {
            fen: fen.to_string(),
            reason,
        };
        let parsed: Fen = fen.trim().parse().map_err(|e| invalid(format!("{e}")))?;
        let chess: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| invalid(format!("{e}")))?;
        Ok(Self::from_chess(chess))
    }

    pub fn starting() -> Self {
        Self::from_chess(Chess::default())
    }

    pub fn from_chess(chess: Chess) -> Self {
        let fen = Fen::from_position(&chess, EnPassantMode::Legal).to_string();
        Self { fen, chess }
    }

    pub fn as_str(&self) -> &str {
        &self.fen
    }

    /// The rules oracle's view of this position. Callers clone it to play moves.
    pub fn chess(&self) -> &Chess {
        &self.chess
    }

    pub fn side_to_move(&self) -> PlayerSide {
        self.chess.turn().into()
    }

    pub fn halfmoves(&self) -> u32 {
        self.chess.halfmoves()
    }

    pub fn fullmoves(&self) -> u32 {
        self.chess.fullmoves().get()
    }

    /// Board, side to move, castling rights and en passant: what must match for
    /// two positions to count as a repetition.
    pub fn repetition_key(&self) -> String {
        self.fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
    }

    /// The same board with `side` to move and no en passant square. Fails when
    /// that would leave the other king in check.
    pub fn with_side_to_move(&self, side: PlayerSide) -> Result<Position, ChessError> {
        if side == self.side_to_move() {
            return Ok(self.clone());
        }
        let mut setup = Fen::from_position(&self.chess, EnPassantMode::Legal).into_setup();
        setup.turn = Color::from(side);
        setup.ep_square = None;
        let chess = Chess::from_setup(setup, CastlingMode::Standard).map_err(|e| {
            ChessError::InvalidPosition {
                fen: self.fen.clone(),
                reason: format!("{e}"),
            }
        })?;
        Ok(Self::from_chess(chess))
    }

    /// The FEN board field alone ("rnbqkbnr/pppppppp/8/...").
    pub fn board_field(&self) -> &str {
        self.fen.split_whitespace().next().unwrap_or_default()
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.fen == other.fen
    }
}

impl Eq for Position {}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Position").field(&self.fen).finish()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen)
    }
}

impl std::str::FromStr for Position {
    type Err = ChessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Position::parse(s)
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.fen)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Position::parse(&raw).map_err(de::Error::custom)
    }
}

/// Repetition keys of every position reached so far in a game, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionHistory {
    keys: Vec<String>,
}

impl PositionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: &Position) {
        self.keys.push(position.repetition_key());
    }

    /// How many times a position with this key was already reached.
    pub fn occurrences(&self, position: &Position) -> usize {
        let key = position.repetition_key();
        self.keys.iter().filter(|k| **k == key).count()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_file_and_rank() {
        assert_eq!(square_to_file_and_rank(Square::E4), ('e', '4'));
        assert_eq!(file_and_rank_to_square('h', '8'), Square::H8);
        assert_eq!(file_and_rank_to_square('a', '1'), Square::A1);
    }

    #[test]
    #[should_panic]
    fn test_file_and_rank_out_of_board_panics() {
        file_and_rank_to_square('i', '9');
    }

    #[test]
    fn test_parse_square_rejects_garbage() {
        assert_eq!(parse_square("e2"), Ok(Square::E2));
        assert!(parse_square("e9").is_err());
        assert!(parse_square("e22").is_err());
        assert!(parse_square("").is_err());
    }

    #[test]
    fn test_uci_move_squares() {
        assert_eq!(uci_move_squares("e2e4"), Ok((Square::E2, Square::E4)));
        assert!(uci_move_squares("e2e").is_err());
        assert!(uci_move_squares("e2x4").is_err());
    }

    #[test]
    fn test_square_color() {
        assert_eq!(square_color(Square::A1), SquareColor::Dark);
        assert_eq!(square_color(Square::H1), SquareColor::Light);
        assert_eq!(square_color(Square::E4), SquareColor::Light);
    }

    #[test]
    fn test_position_parse_and_fields() {
        let pos = Position::parse(STANDARD_START_FEN).unwrap();
        assert_eq!(pos.as_str(), STANDARD_START_FEN);
        assert_eq!(pos.side_to_move(), PlayerSide::White);
        assert_eq!(pos.halfmoves(), 0);
        assert_eq!(pos.fullmoves(), 1);
        assert_eq!(pos.board_field(), "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR");
        assert_eq!(pos, Position::starting());
    }

    #[test]
    fn test_position_parse_rejects_invalid_fen() {
        assert!(matches!(
            Position::parse("not a fen"),
            Err(ChessError::InvalidPosition { .. })
        ));
        // No kings at all: parsable, but not a legal setup.
        assert!(Position::parse("8/8/8/8/8/8/8/8 w - - 0 1").is_err());
    }

    #[test]
    fn test_with_side_to_move() {
        let start = Position::starting();
        let black = start.with_side_to_move(PlayerSide::Black).unwrap();
        assert_eq!(black.side_to_move(), PlayerSide::Black);
        assert_eq!(black.board_field(), start.board_field());
        // Black to move while white is in check is not a legal setup.
        let check = Position::parse("4k3/8/8/8/8/8/8/4r1K1 w - - 0 1").unwrap();
        assert!(check.with_side_to_move(PlayerSide::Black).is_err());
    }

    #[test]
    fn test_position_serde_as_string() {
        let pos = Position::starting();
        let json = serde_json::to_string(&pos).unwrap();
        assert_eq!(json, format!("\"{STANDARD_START_FEN}\""));
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }
}
