//! Read-only projection of one game state, handed to the renderer.
//!
//! A presenter is built per request. Every derived field is computed at most once
//! per instance; nothing is cached across presenters.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use shakmaty::{attacks, Bitboard, Color, Position as _, Rank, Role, Square};

use crate::identity::{PieceIdentity, PieceStateBySquare};
use crate::moves::{detect_game_over, legal_targets, squares_with_pieces_that_can_move, GameOver};
use crate::notation::{uci_move_squares, PlayerSide, Position, PositionHistory};
use crate::team::{Faction, GameFactions, GameTeams};

#[derive(Debug, Clone)]
pub struct PresenterInput {
    pub position: Position,
    pub piece_state_by_square: PieceStateBySquare,
    pub teams: GameTeams,
    pub factions: GameFactions,
    /// The square the player clicked, if any.
    pub selection_request: Option<Square>,
    pub target_to_confirm: Option<Square>,
    /// Compact move list of the current attempt ("e2e4e7e5...").
    pub moves: String,
    /// Terminal state recorded by the session, which knows the game's history.
    pub recorded_game_over: Option<GameOver>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMemberDisplay {
    pub name: Option<String>,
    pub faction: Faction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSquare {
    pub square: Square,
    pub identity: PieceIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPiece {
    pub square: Square,
    pub identity: PieceIdentity,
    pub available_targets: BTreeSet<Square>,
    pub potential_captures: BTreeSet<Square>,
    pub is_pinned: bool,
    pub target_to_confirm: Option<Square>,
}

impl SelectedPiece {
    pub fn is_potential_capture(&self, square: Square) -> bool {
        self.potential_captures.contains(&square)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    None,
    SquareOnly(SelectedSquare),
    Piece(SelectedPiece),
}

impl Selection {
    pub fn square(&self) -> Option<Square> {
        match self {
            Selection::None => None,
            Selection::SquareOnly(selected) => Some(selected.square),
            Selection::Piece(selected) => Some(selected.square),
        }
    }

    pub fn piece(&self) -> Option<&SelectedPiece> {
        match self {
            Selection::Piece(selected) => Some(selected),
            _ => None,
        }
    }
}

fn piece_value(role: Role) -> i32 {
    match role {
        Role::Pawn => 1,
        Role::Knight | Role::Bishop => 3,
        Role::Rook => 5,
        Role::Queen => 9,
        Role::King => 0,
    }
}

pub struct GamePresenter {
    input: PresenterInput,
    pieces: OnceCell<Vec<(Square, PieceIdentity)>>,
    is_in_check: OnceCell<bool>,
    squares_with_pieces_that_can_move: OnceCell<BTreeSet<Square>>,
    team_members_by_identity: OnceCell<BTreeMap<PieceIdentity, TeamMemberDisplay>>,
    naive_score: OnceCell<i32>,
    game_over: OnceCell<Option<GameOver>>,
    selection: OnceCell<Selection>,
}

impl GamePresenter {
    pub fn new(input: PresenterInput) -> Self {
        Self {
            input,
            pieces: OnceCell::new(),
            is_in_check: OnceCell::new(),
            squares_with_pieces_that_can_move: OnceCell::new(),
            team_members_by_identity: OnceCell::new(),
            naive_score: OnceCell::new(),
            game_over: OnceCell::new(),
            selection: OnceCell::new(),
        }
    }

    pub fn position(&self) -> &Position {
        &self.input.position
    }

    pub fn pieces(&self) -> &[(Square, PieceIdentity)] {
        self.pieces.get_or_init(|| {
            self.input
                .piece_state_by_square
                .iter()
                .map(|(square, identity)| (square, *identity))
                .collect()
        })
    }

    pub fn active_player_side(&self) -> PlayerSide {
        self.input.position.side_to_move()
    }

    pub fn is_in_check(&self) -> bool {
        *self.is_in_check.get_or_init(|| self.input.position.chess().is_check())
    }

    pub fn squares_with_pieces_that_can_move(&self) -> &BTreeSet<Square> {
        self.squares_with_pieces_that_can_move
            .get_or_init(|| squares_with_pieces_that_can_move(&self.input.position))
    }

    pub fn piece_state_at_square(&self, square: Square) -> Option<&PieceIdentity> {
        self.input.piece_state_by_square.get(square)
    }

    /// Display data for every identity on the board, keyed by base identity.
    pub fn team_members_by_identity(&self) -> &BTreeMap<PieceIdentity, TeamMemberDisplay> {
        self.team_members_by_identity.get_or_init(|| {
            self.pieces()
                .iter()
                .map(|(_, identity)| (identity.base_identity(), self.resolve_team_member(identity)))
                .collect()
        })
    }

    pub fn team_member_display(&self, identity: &PieceIdentity) -> TeamMemberDisplay {
        self.team_members_by_identity()
            .get(&identity.base_identity())
            .cloned()
            .unwrap_or_else(|| self.resolve_team_member(identity))
    }

    fn resolve_team_member(&self, identity: &PieceIdentity) -> TeamMemberDisplay {
        let side = identity.player_side();
        match self.input.teams.member(side, &identity.team_member_role()) {
            Some(member) => TeamMemberDisplay {
                name: member.display_name(),
                faction: member.faction,
            },
            None => TeamMemberDisplay {
                name: None,
                faction: self.input.factions.of(side),
            },
        }
    }

    /// Material balance, positive when white is ahead. Kings are not counted.
    pub fn naive_score(&self) -> i32 {
        *self.naive_score.get_or_init(|| {
            let board = self.input.position.chess().board();
            board
                .occupied()
                .into_iter()
                .filter_map(|square| board.piece_at(square))
                .map(|piece| {
                    let value = piece_value(piece.role);
                    if piece.color == Color::White {
                        value
                    } else {
                        -value
                    }
                })
                .sum()
        })
    }

    pub fn game_over(&self) -> Option<GameOver> {
        *self.game_over.get_or_init(|| {
            self.input
                .recorded_game_over
                .or_else(|| detect_game_over(&self.input.position, &PositionHistory::new()))
        })
    }

    pub fn last_move(&self) -> Option<(Square, Square)> {
        let moves = &self.input.moves;
        if moves.len() < 4 || !moves.is_ascii() {
            return None;
        }
        uci_move_squares(&moves[moves.len() - 4..]).ok()
    }

    pub fn selection(&self) -> &Selection {
        self.selection.get_or_init(|| match self.input.selection_request {
            Some(square) => self.select(square),
            None => Selection::None,
        })
    }

    fn select(&self, square: Square) -> Selection {
        let Some(identity) = self.piece_state_at_square(square).copied() else {
            return Selection::None;
        };

        let side = identity.player_side();
        let position = &self.input.position;
        let available_targets = if side == self.active_player_side() {
            legal_targets(position, square)
        } else {
            // Targets of the other side's pieces are shown as if it were their turn.
            match position.with_side_to_move(side) {
                Ok(flipped) => legal_targets(&flipped, square),
                // The side to move is in check: no legal position has the turn flipped.
                Err(_) => inspected_targets(position, square),
            }
        };
        if available_targets.is_empty() {
            return Selection::SquareOnly(SelectedSquare { square, identity });
        }

        let board = position.chess().board();
        let mut potential_captures: BTreeSet<Square> = available_targets
            .iter()
            .copied()
            .filter(|target| board.piece_at(*target).is_some_and(|p| PlayerSide::from(p.color) != side))
            .collect();
        // The enemy king in check is highlighted too, though it can never be taken.
        if self.is_in_check() && self.active_player_side() != side {
            if let Some(king) = board.king_of(Color::from(self.active_player_side())) {
                potential_captures.insert(king);
            }
        }

        let target_to_confirm = self
            .input
            .target_to_confirm
            .filter(|target| available_targets.contains(target));

        Selection::Piece(SelectedPiece {
            square,
            identity,
            is_pinned: is_pinned(position, square, side),
            available_targets,
            potential_captures,
            target_to_confirm,
        })
    }
}

/// Where the piece on `square` could go if its side were to move, from its
/// attacks and pushes alone. Only used when the flipped position is not a legal
/// setup, so kings are never targets.
fn inspected_targets(position: &Position, square: Square) -> BTreeSet<Square> {
    let board = position.chess().board();
    let Some(piece) = board.piece_at(square) else {
        return BTreeSet::new();
    };
    let occupied = board.occupied();
    let enemies = board.by_color(!piece.color);
    let reachable = if piece.role == Role::Pawn {
        let mut pushes = Bitboard::EMPTY;
        let step = piece.color.fold_wb(8, -8);
        let start_rank = piece.color.fold_wb(Rank::Second, Rank::Seventh);
        if let Some(one) = square.offset(step).filter(|sq| !occupied.contains(*sq)) {
            pushes.add(one);
            if square.rank() == start_rank {
                if let Some(two) = one.offset(step).filter(|sq| !occupied.contains(*sq)) {
                    pushes.add(two);
                }
            }
        }
        (attacks::pawn_attacks(piece.color, square) & enemies) | pushes
    } else {
        attacks::attacks(square, piece, occupied) & !board.by_color(piece.color)
    };
    (reachable & !board.kings()).into_iter().collect()
}

/// Whether taking the piece off `square` would expose its own king.
fn is_pinned(position: &Position, square: Square, side: PlayerSide) -> bool {
    let board = position.chess().board();
    let Some(king) = board.king_of(Color::from(side)) else {
        return false;
    };
    if king == square {
        return false;
    }
    let enemy = Color::from(side.other());
    let occupied = board.occupied();
    let attackers = board.attacks_to(king, enemy, occupied);
    let attackers_without_piece = board.attacks_to(king, enemy, occupied ^ Bitboard::from_square(square));
    attackers_without_piece != attackers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::assign_identities;
    use crate::notation::STANDARD_START_FEN;
    use crate::team::build_teams;

    fn presenter(fen: &str, selection_request: Option<Square>) -> GamePresenter {
        let position = Position::parse(fen).unwrap();
        let piece_state_by_square = assign_identities(&position).unwrap();
        let factions = GameFactions::default();
        let teams = build_teams(&piece_state_by_square, factions, PlayerSide::White, 7);
        GamePresenter::new(PresenterInput {
            position,
            piece_state_by_square,
            teams,
            factions,
            selection_request,
            target_to_confirm: None,
            moves: String::new(),
            recorded_game_over: None,
        })
    }

    #[test]
    fn test_start_position_projection() {
        let p = presenter(STANDARD_START_FEN, None);
        assert_eq!(p.pieces().len(), 32);
        assert_eq!(p.active_player_side(), PlayerSide::White);
        assert!(!p.is_in_check());
        assert_eq!(p.naive_score(), 0);
        assert_eq!(p.game_over(), None);
        assert_eq!(p.selection(), &Selection::None);
        // Eight pawns and two knights.
        assert_eq!(p.squares_with_pieces_that_can_move().len(), 10);
        assert!(p.squares_with_pieces_that_can_move().contains(&Square::G1));
        assert!(!p.squares_with_pieces_that_can_move().contains(&Square::E1));
    }

    #[test]
    fn test_empty_square_has_no_piece() {
        let p = presenter(STANDARD_START_FEN, Some(Square::E4));
        assert_eq!(p.piece_state_at_square(Square::E4), None);
        assert_eq!(p.selection(), &Selection::None);
    }

    #[test]
    fn test_selecting_a_movable_piece() {
        let p = presenter(STANDARD_START_FEN, Some(Square::G1));
        let selected = p.selection().piece().unwrap();
        assert_eq!(selected.identity.to_string(), "N2");
        assert_eq!(
            selected.available_targets,
            BTreeSet::from([Square::F3, Square::H3])
        );
        assert!(selected.potential_captures.is_empty());
        assert!(!selected.is_pinned);
    }

    #[test]
    fn test_selecting_a_blocked_piece_is_square_only() {
        let p = presenter(STANDARD_START_FEN, Some(Square::A1));
        assert!(matches!(p.selection(), Selection::SquareOnly(s) if s.square == Square::A1));
    }

    #[test]
    fn test_opponent_piece_targets_as_if_its_turn() {
        let p = presenter(STANDARD_START_FEN, Some(Square::B8));
        let selected = p.selection().piece().unwrap();
        assert_eq!(selected.identity.player_side(), PlayerSide::Black);
        assert_eq!(
            selected.available_targets,
            BTreeSet::from([Square::A6, Square::C6])
        );
    }

    #[test]
    fn test_checking_piece_marks_the_king_in_check() {
        let p = presenter("4k3/8/8/8/8/8/8/4R1K1 b - - 0 1", Some(Square::E1));
        assert!(p.is_in_check());
        let selected = p.selection().piece().unwrap();
        assert_eq!(selected.identity.player_side(), PlayerSide::White);
        assert!(selected.is_potential_capture(Square::E8));
        assert!(!selected.available_targets.contains(&Square::E8));
        assert!(!selected.available_targets.contains(&Square::G1));
        assert!(selected.available_targets.contains(&Square::E7));
        assert!(selected.available_targets.contains(&Square::A1));
        assert!(selected.available_targets.contains(&Square::F1));
    }

    #[test]
    fn test_any_opponent_piece_marks_the_king_in_check() {
        let p = presenter("4k3/8/8/8/8/8/P7/4R1K1 b - - 0 1", Some(Square::A2));
        let selected = p.selection().piece().unwrap();
        assert_eq!(selected.available_targets, BTreeSet::from([Square::A3, Square::A4]));
        assert!(selected.is_potential_capture(Square::E8));
        assert!(!selected.is_potential_capture(Square::A3));
    }

    #[test]
    fn test_potential_capture_needs_an_occupied_target() {
        let p = presenter(
            "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2",
            Some(Square::E4),
        );
        let selected = p.selection().piece().unwrap();
        assert!(selected.is_potential_capture(Square::D5));
        assert!(!selected.is_potential_capture(Square::E5));
    }

    #[test]
    fn test_pinned_piece_moving_along_the_pin() {
        let p = presenter("4r1k1/8/8/8/8/8/4R3/4K3 w - - 0 1", Some(Square::E2));
        let selected = p.selection().piece().unwrap();
        assert!(selected.is_pinned);
        assert!(selected.available_targets.contains(&Square::E8));
        assert!(!selected.available_targets.contains(&Square::D2));
    }

    #[test]
    fn test_naive_score_and_check() {
        // Two rooks against a bare king.
        let p = presenter("4k3/8/8/8/8/8/8/R3K2R b KQ - 0 1", None);
        assert_eq!(p.naive_score(), 10);
        let p = presenter("4k3/8/8/8/8/8/8/4R1K1 b - - 0 1", None);
        assert!(p.is_in_check());
        assert_eq!(p.naive_score(), 5);
    }

    #[test]
    fn test_team_member_display() {
        let p = presenter(STANDARD_START_FEN, None);
        let white_knight = *p.piece_state_at_square(Square::G1).unwrap();
        let black_knight = *p.piece_state_at_square(Square::G8).unwrap();
        let white = p.team_member_display(&white_knight);
        assert!(white.name.is_some());
        assert_eq!(white.faction, Faction::Humans);
        let black = p.team_member_display(&black_knight);
        assert_eq!(black.name, None);
        assert_eq!(black.faction, Faction::Undeads);
        assert_eq!(p.team_members_by_identity().len(), 32);
    }

    #[test]
    fn test_last_move_from_move_list() {
        let mut p = presenter(STANDARD_START_FEN, None);
        assert_eq!(p.last_move(), None);
        p.input.moves = "e2e4e7e5".to_string();
        assert_eq!(p.last_move(), Some((Square::E7, Square::E5)));
    }
}
