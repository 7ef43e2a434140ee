//! Properties of move application, checked over every legal move of a few
//! busy positions.

use chess_core::identity::{assign_identities, PieceStateBySquare};
use chess_core::moves::{apply_move, apply_move_with_identities, move_target};
use chess_core::presenter::{GamePresenter, PresenterInput};
use chess_core::team::{build_teams, GameFactions};
use chess_core::{PlayerSide, Position, PositionHistory};
use shakmaty::{Position as _, Role, Square};

const POSITIONS: &[&str] = &[
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    // Castling both ways, pins, captures.
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R b KQkq - 0 1",
    // En passant on f6.
    "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
    // Promotions, with and without capture.
    "r3k3/1P6/8/8/8/8/6p1/4K2R b - - 0 1",
    "r3k3/1P6/8/8/8/8/6p1/4K2R w - - 0 1",
];

/// Every legal (from, to) pair as a player would click it.
fn clicks(position: &Position) -> Vec<(Square, Square, shakmaty::Move)> {
    position
        .chess()
        .legal_moves()
        .into_iter()
        .filter_map(|mv| mv.from().map(|from| (from, move_target(&mv), mv.clone())))
        .collect()
}

fn setup(fen: &str) -> (Position, PieceStateBySquare) {
    let position = Position::parse(fen).unwrap();
    let pieces = assign_identities(&position).unwrap();
    (position, pieces)
}

#[test]
fn test_identities_follow_every_legal_move() {
    for fen in POSITIONS {
        let (position, pieces) = setup(fen);
        for (from, to, mv) in clicks(&position) {
            let moved = apply_move_with_identities(&position, &pieces, &PositionHistory::new(), from, to)
                .unwrap_or_else(|e| panic!("{fen} {from}{to}: {e}"));
            let after = &moved.piece_state_by_square;
            assert!(
                after.agrees_with(&moved.outcome.new_position),
                "{fen} {from}{to}: identities disagree with the board"
            );
            assert!(after.get(from).is_none() || mv.is_castle(), "{fen} {from}{to}");

            let original = pieces.get(from).unwrap();
            let landed = after.get(to).unwrap();
            assert_eq!(landed.base_identity(), original.base_identity(), "{fen} {from}{to}");
            if mv.is_promotion() {
                assert_eq!(landed.current_role(), Role::Queen, "{fen} {from}{to}");
            } else {
                assert_eq!(landed, original, "{fen} {from}{to}");
            }
        }
    }
}

#[test]
fn test_delta_counts() {
    for fen in POSITIONS {
        let (position, _) = setup(fen);
        for (from, to, mv) in clicks(&position) {
            let outcome = apply_move(&position, from, to).unwrap();
            let expected = if mv.is_castle() || mv.is_capture() { 2 } else { 1 };
            assert_eq!(outcome.deltas.len(), expected, "{fen} {from}{to}");
            assert_eq!(outcome.deltas[0].from, from);
            assert_eq!(outcome.deltas[0].to, Some(to));
            assert_eq!(outcome.is_castling, mv.is_castle());
            assert_eq!(outcome.is_capture, mv.is_capture());
            if mv.is_castle() {
                assert!(!outcome.is_capture);
            }
        }
    }
}

#[test]
fn test_presenter_reflects_the_moved_piece() {
    for fen in POSITIONS {
        let (position, pieces) = setup(fen);
        let teams = build_teams(&pieces, GameFactions::default(), PlayerSide::White, 1);
        for (from, to, mv) in clicks(&position) {
            if mv.is_capture() || mv.is_castle() || mv.is_promotion() {
                continue;
            }
            let moved = apply_move_with_identities(&position, &pieces, &PositionHistory::new(), from, to).unwrap();
            let presenter = GamePresenter::new(PresenterInput {
                position: moved.outcome.new_position.clone(),
                piece_state_by_square: moved.piece_state_by_square.clone(),
                teams: teams.clone(),
                factions: GameFactions::default(),
                selection_request: None,
                target_to_confirm: None,
                moves: format!("{from}{to}"),
                recorded_game_over: None,
            });
            assert_eq!(presenter.piece_state_at_square(to), pieces.get(from), "{fen} {from}{to}");
            assert_eq!(presenter.piece_state_at_square(from), None, "{fen} {from}{to}");
            assert_eq!(presenter.last_move(), Some((from, to)));
        }
    }
}
