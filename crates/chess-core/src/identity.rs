//! Persistent piece identities.
//!
//! The rules oracle only knows "a white knight on f3". The game also needs to know
//! *which* knight it is, so each piece carries a stable token (`N1`, `p3`, `q`...)
//! that follows it from square to square and survives promotion.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use shakmaty::{Position as _, Role, Square};

use crate::error::ChessError;
use crate::notation::{parse_square, PlayerSide, Position};

static IDENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([PNBRQKpnbrqk])([1-9])?([QRBNqrbn])?$").unwrap());

/// A stable per-piece token: side + original role + index + optional promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceIdentity {
    side: PlayerSide,
    role: Role,
    index: Option<u8>,
    promotion: Option<Role>,
}

impl PieceIdentity {
    pub fn new(side: PlayerSide, role: Role, index: Option<u8>) -> Self {
        Self {
            side,
            role,
            index,
            promotion: None,
        }
    }

    /// Side is derived from the letter case of the token.
    pub fn player_side(&self) -> PlayerSide {
        self.side
    }

    /// The role this piece started the game with.
    pub fn original_role(&self) -> Role {
        self.role
    }

    pub fn index(&self) -> Option<u8> {
        self.index
    }

    pub fn promotion(&self) -> Option<Role> {
        self.promotion
    }

    pub fn is_promoted(&self) -> bool {
        self.promotion.is_some()
    }

    /// The role currently on the board: the promotion role for a promoted pawn.
    pub fn current_role(&self) -> Role {
        self.promotion.unwrap_or(self.role)
    }

    /// Board symbol of the original role, e.g. `P` for any white pawn.
    pub fn piece_on_board(&self) -> char {
        side_char(self.side, self.role)
    }

    /// Board symbol of the role currently on the board.
    pub fn current_symbol(&self) -> char {
        side_char(self.side, self.current_role())
    }

    /// The identity without its promotion suffix.
    pub fn base_identity(&self) -> PieceIdentity {
        PieceIdentity {
            promotion: None,
            ..*self
        }
    }

    /// Same piece, now promoted. The base token is kept as is.
    pub fn promoted(self, role: Role) -> PieceIdentity {
        PieceIdentity {
            promotion: Some(role),
            ..self
        }
    }

    /// Lowercase base token, used to look team members up ("p1", "q", "n2").
    pub fn team_member_role(&self) -> String {
        self.base_identity().to_string().to_ascii_lowercase()
    }
}

fn side_char(side: PlayerSide, role: Role) -> char {
    match side {
        PlayerSide::White => role.char().to_ascii_uppercase(),
        PlayerSide::Black => role.char(),
    }
}

impl fmt::Display for PieceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.piece_on_board())?;
        if let Some(index) = self.index {
            write!(f, "{index}")?;
        }
        if let Some(promotion) = self.promotion {
            write!(f, "{}", side_char(self.side, promotion))?;
        }
        Ok(())
    }
}

impl FromStr for PieceIdentity {
    type Err = ChessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChessError::InvalidIdentity(s.to_string());
        let caps = IDENTITY_RE.captures(s).ok_or_else(invalid)?;

        let symbol = caps[1].chars().next().ok_or_else(invalid)?;
        let side = if symbol.is_ascii_uppercase() {
            PlayerSide::White
        } else {
            PlayerSide::Black
        };
        let role = Role::from_char(symbol.to_ascii_lowercase()).ok_or_else(invalid)?;
        let index = caps
            .get(2)
            .map(|m| m.as_str().parse::<u8>().map_err(|_| invalid()))
            .transpose()?;

        let promotion = match caps.get(3) {
            None => None,
            Some(m) => {
                let c = m.as_str().chars().next().ok_or_else(invalid)?;
                // The promotion letter follows the side's case, and only pawns promote.
                if c.is_ascii_uppercase() != symbol.is_ascii_uppercase() || role != Role::Pawn {
                    return Err(invalid());
                }
                Some(Role::from_char(c.to_ascii_lowercase()).ok_or_else(invalid)?)
            }
        };

        Ok(PieceIdentity {
            side,
            role,
            index,
            promotion,
        })
    }
}

impl Serialize for PieceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PieceIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Which identity currently stands on each occupied square.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceStateBySquare(BTreeMap<Square, PieceIdentity>);

impl PieceStateBySquare {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, square: Square) -> Option<&PieceIdentity> {
        self.0.get(&square)
    }

    pub fn insert(&mut self, square: Square, identity: PieceIdentity) -> Option<PieceIdentity> {
        self.0.insert(square, identity)
    }

    pub fn remove(&mut self, square: Square) -> Option<PieceIdentity> {
        self.0.remove(&square)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Square, &PieceIdentity)> {
        self.0.iter().map(|(sq, id)| (*sq, id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn occupied_squares(&self) -> BTreeSet<Square> {
        self.0.keys().copied().collect()
    }

    /// Square currently holding the given identity (promotion suffix ignored).
    pub fn square_of(&self, identity: &PieceIdentity) -> Option<Square> {
        let base = identity.base_identity();
        self.iter()
            .find(|(_, id)| id.base_identity() == base)
            .map(|(sq, _)| sq)
    }

    /// True when both sides of the map agree on which squares hold a piece.
    pub fn agrees_with(&self, position: &Position) -> bool {
        let oracle: BTreeSet<Square> = position.chess().board().occupied().into_iter().collect();
        oracle == self.occupied_squares()
    }
}

impl FromIterator<(Square, PieceIdentity)> for PieceStateBySquare {
    fn from_iter<I: IntoIterator<Item = (Square, PieceIdentity)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for PieceStateBySquare {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (square, identity) in &self.0 {
            map.serialize_entry(&square.to_string(), identity)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PieceStateBySquare {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, PieceIdentity>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(square, identity)| {
                parse_square(&square)
                    .map(|sq| (sq, identity))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

/// (first counter value, maximum counter value) for each role.
/// A counter of 0 means "no index": the first queen is `q`, the next one `q1`.
fn role_counter_bounds(role: Role) -> (u8, u8) {
    match role {
        Role::Pawn => (1, 8),
        Role::Knight | Role::Bishop | Role::Rook => (1, 9),
        Role::Queen => (0, 9),
        Role::King => (0, 0),
    }
}

/// Give every piece of a freshly published position its identity.
pub fn assign_identities(position: &Position) -> Result<PieceStateBySquare, ChessError> {
    let board = position.chess().board();
    let mut counters: BTreeMap<(PlayerSide, char), u8> = BTreeMap::new();
    let mut result = PieceStateBySquare::new();

    for square in board.occupied() {
        let Some(piece) = board.piece_at(square) else {
            continue;
        };
        let side = PlayerSide::from(piece.color);
        let (start, max) = role_counter_bounds(piece.role);
        let counter = counters.entry((side, piece.role.char())).or_insert(start);
        if *counter > max {
            return Err(ChessError::TooManyPieces {
                role: piece.role.char(),
                max,
            });
        }
        let index = (*counter > 0).then_some(*counter);
        result.insert(square, PieceIdentity::new(side, piece.role, index));
        *counter += 1;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse_and_display() {
        for token in ["P1", "p8", "N2", "b1", "q", "K", "k", "p3q", "P1Q", "q1"] {
            let identity: PieceIdentity = token.parse().unwrap();
            assert_eq!(identity.to_string(), token);
        }
    }

    #[test]
    fn test_identity_rejects_invalid_tokens() {
        for token in ["", "X1", "P1q", "N1Q", "p0", "PP", "P12"] {
            assert!(token.parse::<PieceIdentity>().is_err(), "{token} should be rejected");
        }
    }

    #[test]
    fn test_identity_side_and_roles() {
        let identity: PieceIdentity = "p3q".parse().unwrap();
        assert_eq!(identity.player_side(), PlayerSide::Black);
        assert_eq!(identity.original_role(), Role::Pawn);
        assert_eq!(identity.current_role(), Role::Queen);
        assert_eq!(identity.piece_on_board(), 'p');
        assert_eq!(identity.current_symbol(), 'q');
        assert_eq!(identity.base_identity().to_string(), "p3");
        assert_eq!(identity.team_member_role(), "p3");

        let white: PieceIdentity = "N2".parse().unwrap();
        assert_eq!(white.player_side(), PlayerSide::White);
        assert_eq!(white.team_member_role(), "n2");
    }

    #[test]
    fn test_promotion_keeps_base_token() {
        let pawn: PieceIdentity = "P5".parse().unwrap();
        let queen = pawn.promoted(Role::Queen);
        assert_eq!(queen.to_string(), "P5Q");
        assert_eq!(queen.base_identity(), pawn);
    }

    #[test]
    fn test_assign_identities_starting_position() {
        let pieces = assign_identities(&Position::starting()).unwrap();
        assert_eq!(pieces.len(), 32);
        assert_eq!(pieces.get(Square::A2).unwrap().to_string(), "P1");
        assert_eq!(pieces.get(Square::H2).unwrap().to_string(), "P8");
        assert_eq!(pieces.get(Square::A1).unwrap().to_string(), "R1");
        assert_eq!(pieces.get(Square::H1).unwrap().to_string(), "R2");
        assert_eq!(pieces.get(Square::B8).unwrap().to_string(), "n1");
        assert_eq!(pieces.get(Square::D8).unwrap().to_string(), "q");
        assert_eq!(pieces.get(Square::E1).unwrap().to_string(), "K");
        assert!(pieces.get(Square::E4).is_none());
        assert!(pieces.agrees_with(&Position::starting()));
    }

    #[test]
    fn test_assign_identities_second_queen() {
        let pos = Position::parse("3qk3/8/8/8/8/8/8/Q2QK3 w - - 0 1").unwrap();
        let pieces = assign_identities(&pos).unwrap();
        assert_eq!(pieces.get(Square::A1).unwrap().to_string(), "Q");
        assert_eq!(pieces.get(Square::D1).unwrap().to_string(), "Q1");
        assert_eq!(pieces.get(Square::D8).unwrap().to_string(), "q");
    }

    #[test]
    fn test_piece_state_serde_keyed_by_square() {
        let pieces: PieceStateBySquare = [
            (Square::E2, "P5".parse().unwrap()),
            (Square::E8, "k".parse().unwrap()),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&pieces).unwrap();
        assert_eq!(json, r#"{"e2":"P5","e8":"k"}"#);
        let back: PieceStateBySquare = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pieces);
        assert!(serde_json::from_str::<PieceStateBySquare>(r#"{"z9":"P5"}"#).is_err());
    }

    #[test]
    fn test_square_of_ignores_promotion() {
        let pieces: PieceStateBySquare = [(Square::E8, "P5Q".parse().unwrap())].into_iter().collect();
        let pawn: PieceIdentity = "P5".parse().unwrap();
        assert_eq!(pieces.square_of(&pawn), Some(Square::E8));
    }
}
