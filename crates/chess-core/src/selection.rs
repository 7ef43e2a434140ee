//! What a click means, given where the player is in their turn.

use std::collections::BTreeSet;

use serde::Serialize;
use shakmaty::Square;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    WaitingForPlayerSelection,
    WaitingForTargetSelection,
    WaitingForMoveConfirmation,
    WaitingForBotTurn,
    /// The solution is being shown one move at a time. Nothing is clickable.
    ReplayingSolution,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionState {
    pub phase: GamePhase,
    pub selected: Option<Square>,
    pub target_to_confirm: Option<Square>,
}

impl SelectionState {
    pub fn idle() -> Self {
        Self {
            phase: GamePhase::WaitingForPlayerSelection,
            selected: None,
            target_to_confirm: None,
        }
    }

    pub fn selected(square: Square) -> Self {
        Self {
            phase: GamePhase::WaitingForTargetSelection,
            selected: Some(square),
            target_to_confirm: None,
        }
    }

    pub fn confirming(square: Square, target: Square) -> Self {
        Self {
            phase: GamePhase::WaitingForMoveConfirmation,
            selected: Some(square),
            target_to_confirm: Some(target),
        }
    }

    pub fn bot_turn() -> Self {
        Self {
            phase: GamePhase::WaitingForBotTurn,
            ..Self::idle()
        }
    }

    pub fn replaying_solution() -> Self {
        Self {
            phase: GamePhase::ReplayingSolution,
            ..Self::idle()
        }
    }

    pub fn game_over() -> Self {
        Self {
            phase: GamePhase::GameOver,
            ..Self::idle()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    SelectPiece(Square),
    SelectTarget(Square),
    ConfirmMove,
    OutsideClick,
    MoveApplied { game_over: bool, bot_to_play: bool },
    BotMoved { game_over: bool },
    Restart,
    /// The attempt is replaced by a replay of the solution.
    SeeSolution,
    SolutionMoved { game_over: bool },
}

/// What the machine needs to know about the board to judge a click.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    pub movable_squares: BTreeSet<Square>,
    /// Legal targets of the currently selected piece.
    pub targets: BTreeSet<Square>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay(SelectionState),
    /// The caller must now apply `from -> to`, then report `MoveApplied`.
    Commit {
        from: Square,
        to: Square,
        next: SelectionState,
    },
    /// The interaction is not allowed here; `0` is the state to show instead.
    Rejected(SelectionState),
}

impl Transition {
    pub fn state(&self) -> SelectionState {
        match self {
            Transition::Stay(state) | Transition::Rejected(state) => *state,
            Transition::Commit { next, .. } => *next,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionMachine {
    pub confirm_before_commit: bool,
}

impl SelectionMachine {
    pub fn new(confirm_before_commit: bool) -> Self {
        Self {
            confirm_before_commit,
        }
    }

    pub fn transition(
        &self,
        state: &SelectionState,
        interaction: Interaction,
        ctx: &TransitionContext,
    ) -> Transition {
        use GamePhase::*;

        match (state.phase, interaction) {
            (_, Interaction::Restart) => Transition::Stay(SelectionState::idle()),
            (_, Interaction::SeeSolution) => Transition::Stay(SelectionState::replaying_solution()),
            (GameOver, _) => Transition::Rejected(*state),

            (ReplayingSolution, Interaction::SolutionMoved { game_over }) => Transition::Stay(if game_over {
                SelectionState::game_over()
            } else {
                SelectionState::replaying_solution()
            }),
            (ReplayingSolution, _) | (_, Interaction::SolutionMoved { .. }) => Transition::Rejected(*state),

            (_, Interaction::MoveApplied { game_over, bot_to_play }) => Transition::Stay(if game_over {
                SelectionState::game_over()
            } else if bot_to_play {
                SelectionState::bot_turn()
            } else {
                SelectionState::idle()
            }),
            (_, Interaction::BotMoved { game_over }) => Transition::Stay(if game_over {
                SelectionState::game_over()
            } else {
                SelectionState::idle()
            }),

            // A refresh racing the bot's move must not reset anything.
            (WaitingForBotTurn, Interaction::OutsideClick) => Transition::Stay(*state),
            (WaitingForBotTurn, _) => Transition::Rejected(*state),

            (_, Interaction::OutsideClick) => Transition::Stay(SelectionState::idle()),

            (_, Interaction::SelectPiece(square)) => {
                if state.selected == Some(square) || !ctx.movable_squares.contains(&square) {
                    Transition::Stay(SelectionState::idle())
                } else {
                    Transition::Stay(SelectionState::selected(square))
                }
            }

            (WaitingForTargetSelection | WaitingForMoveConfirmation, Interaction::SelectTarget(to)) => {
                let Some(from) = state.selected else {
                    return Transition::Rejected(SelectionState::idle());
                };
                if !ctx.targets.contains(&to) {
                    return Transition::Rejected(SelectionState::idle());
                }
                let confirmed = state.target_to_confirm == Some(to);
                if self.confirm_before_commit && !confirmed {
                    Transition::Stay(SelectionState::confirming(from, to))
                } else {
                    Transition::Commit {
                        from,
                        to,
                        next: SelectionState::idle(),
                    }
                }
            }

            (WaitingForMoveConfirmation, Interaction::ConfirmMove) => {
                match (state.selected, state.target_to_confirm) {
                    (Some(from), Some(to)) if ctx.targets.contains(&to) => Transition::Commit {
                        from,
                        to,
                        next: SelectionState::idle(),
                    },
                    _ => Transition::Rejected(SelectionState::idle()),
                }
            }

            (_, Interaction::SelectTarget(_) | Interaction::ConfirmMove) => Transition::Rejected(*state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TransitionContext {
        TransitionContext {
            movable_squares: BTreeSet::from([Square::E2, Square::G1]),
            targets: BTreeSet::from([Square::E3, Square::E4]),
        }
    }

    #[test]
    fn test_select_then_toggle_deselect() {
        let machine = SelectionMachine::default();
        let selected = machine
            .transition(&SelectionState::idle(), Interaction::SelectPiece(Square::E2), &ctx())
            .state();
        assert_eq!(selected, SelectionState::selected(Square::E2));

        let again = machine.transition(&selected, Interaction::SelectPiece(Square::E2), &ctx());
        assert_eq!(again, Transition::Stay(SelectionState::idle()));
    }

    #[test]
    fn test_selecting_another_piece_replaces_selection() {
        let machine = SelectionMachine::default();
        let t = machine.transition(
            &SelectionState::selected(Square::E2),
            Interaction::SelectPiece(Square::G1),
            &ctx(),
        );
        assert_eq!(t, Transition::Stay(SelectionState::selected(Square::G1)));
    }

    #[test]
    fn test_selecting_an_immovable_square_resets() {
        let machine = SelectionMachine::default();
        let t = machine.transition(
            &SelectionState::selected(Square::E2),
            Interaction::SelectPiece(Square::A1),
            &ctx(),
        );
        assert_eq!(t, Transition::Stay(SelectionState::idle()));
    }

    #[test]
    fn test_target_commits_without_confirmation() {
        let machine = SelectionMachine::new(false);
        let t = machine.transition(
            &SelectionState::selected(Square::E2),
            Interaction::SelectTarget(Square::E4),
            &ctx(),
        );
        assert_eq!(
            t,
            Transition::Commit {
                from: Square::E2,
                to: Square::E4,
                next: SelectionState::idle(),
            }
        );
    }

    #[test]
    fn test_target_waits_for_confirmation_when_configured() {
        let machine = SelectionMachine::new(true);
        let t = machine.transition(
            &SelectionState::selected(Square::E2),
            Interaction::SelectTarget(Square::E4),
            &ctx(),
        );
        let confirming = SelectionState::confirming(Square::E2, Square::E4);
        assert_eq!(t, Transition::Stay(confirming));

        let committed = machine.transition(&confirming, Interaction::ConfirmMove, &ctx());
        assert!(matches!(committed, Transition::Commit { from: Square::E2, to: Square::E4, .. }));

        // Clicking the same target again also confirms.
        let clicked = machine.transition(&confirming, Interaction::SelectTarget(Square::E4), &ctx());
        assert!(matches!(clicked, Transition::Commit { .. }));

        // Another target just moves the confirmation marker.
        let moved = machine.transition(&confirming, Interaction::SelectTarget(Square::E3), &ctx());
        assert_eq!(moved, Transition::Stay(SelectionState::confirming(Square::E2, Square::E3)));
    }

    #[test]
    fn test_illegal_target_is_rejected_and_resets() {
        let machine = SelectionMachine::default();
        let t = machine.transition(
            &SelectionState::selected(Square::E2),
            Interaction::SelectTarget(Square::E5),
            &ctx(),
        );
        assert_eq!(t, Transition::Rejected(SelectionState::idle()));
    }

    #[test]
    fn test_outside_click() {
        let machine = SelectionMachine::default();
        let t = machine.transition(&SelectionState::selected(Square::E2), Interaction::OutsideClick, &ctx());
        assert_eq!(t, Transition::Stay(SelectionState::idle()));

        let bot = SelectionState::bot_turn();
        assert_eq!(
            machine.transition(&bot, Interaction::OutsideClick, &ctx()),
            Transition::Stay(bot)
        );
    }

    #[test]
    fn test_bot_turn_blocks_selection() {
        let machine = SelectionMachine::default();
        let bot = SelectionState::bot_turn();
        let t = machine.transition(&bot, Interaction::SelectPiece(Square::E2), &ctx());
        assert_eq!(t, Transition::Rejected(bot));
        let t = machine.transition(&bot, Interaction::BotMoved { game_over: false }, &ctx());
        assert_eq!(t, Transition::Stay(SelectionState::idle()));
    }

    #[test]
    fn test_move_applied_routes_to_next_phase() {
        let machine = SelectionMachine::default();
        let idle = SelectionState::idle();
        let next = |game_over, bot_to_play| {
            machine
                .transition(&idle, Interaction::MoveApplied { game_over, bot_to_play }, &ctx())
                .state()
                .phase
        };
        assert_eq!(next(false, true), GamePhase::WaitingForBotTurn);
        assert_eq!(next(false, false), GamePhase::WaitingForPlayerSelection);
        assert_eq!(next(true, true), GamePhase::GameOver);
    }

    #[test]
    fn test_game_over_only_accepts_restart() {
        let machine = SelectionMachine::default();
        let over = SelectionState::game_over();
        for interaction in [
            Interaction::SelectPiece(Square::E2),
            Interaction::SelectTarget(Square::E4),
            Interaction::ConfirmMove,
            Interaction::OutsideClick,
            Interaction::BotMoved { game_over: false },
            Interaction::SolutionMoved { game_over: true },
        ] {
            assert_eq!(machine.transition(&over, interaction, &ctx()), Transition::Rejected(over));
        }
        assert_eq!(
            machine.transition(&over, Interaction::Restart, &ctx()),
            Transition::Stay(SelectionState::idle())
        );
    }

    #[test]
    fn test_solution_replay() {
        let machine = SelectionMachine::default();
        let replay = SelectionState::replaying_solution();
        for from in [SelectionState::selected(Square::E2), SelectionState::bot_turn(), SelectionState::game_over()] {
            assert_eq!(
                machine.transition(&from, Interaction::SeeSolution, &ctx()),
                Transition::Stay(replay)
            );
        }

        for interaction in [
            Interaction::SelectPiece(Square::E2),
            Interaction::SelectTarget(Square::E4),
            Interaction::OutsideClick,
            Interaction::BotMoved { game_over: false },
            Interaction::MoveApplied { game_over: false, bot_to_play: true },
        ] {
            assert_eq!(machine.transition(&replay, interaction, &ctx()), Transition::Rejected(replay));
        }

        let step = |game_over| machine.transition(&replay, Interaction::SolutionMoved { game_over }, &ctx());
        assert_eq!(step(false), Transition::Stay(replay));
        assert_eq!(step(true), Transition::Stay(SelectionState::game_over()));
        assert_eq!(
            machine.transition(&replay, Interaction::Restart, &ctx()),
            Transition::Stay(SelectionState::idle())
        );

        let idle = SelectionState::idle();
        assert_eq!(
            machine.transition(&idle, Interaction::SolutionMoved { game_over: false }, &ctx()),
            Transition::Rejected(idle)
        );
    }
}
