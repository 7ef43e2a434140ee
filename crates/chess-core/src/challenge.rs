//! The daily challenge: a published puzzle, one player's attempt at it, and
//! their long-running stats.
//!
//! The attempt is stored client-side, so every state here is a plain value that
//! round-trips through serde. Field names are shortened to keep cookies small.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shakmaty::Square;

use crate::error::ChessError;
use crate::identity::{assign_identities, PieceIdentity, PieceStateBySquare};
use crate::moves::{apply_move_with_history, apply_move_with_identities, position_before_move, GameOver, MoveOutcome};
use crate::notation::{uci_move_squares, PlayerSide, Position, PositionHistory};
use crate::team::{build_teams, seed_from_id, GameFactions, GameTeams};

pub const MAXIMUM_TURNS_PER_CHALLENGE: u32 = 30;
pub const WINS_DISTRIBUTION_SLICE_COUNT: u32 = 5;
pub const PLAYER_SIDE: PlayerSide = PlayerSide::White;
pub const BOT_SIDE: PlayerSide = PlayerSide::Black;
pub const SESSION_ENCODING_VERSION: u32 = 1;

// The bot's opening move plus one full turn.
const UNDO_MIN_MOVES_LENGTH: usize = 4 + 8;

/// A published puzzle. The bot always plays first, so the challenge carries the
/// state before that opening move as well as after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyChallenge {
    pub id: String,
    pub position: Position,
    pub piece_state_by_square: PieceStateBySquare,
    pub position_before_bot_first_move: Position,
    pub piece_state_by_square_before_bot_first_move: PieceStateBySquare,
    pub teams: GameTeams,
    pub bot_first_move: (Square, Square),
    /// A winning line from `position`, player and bot moves alternating.
    pub solution: Vec<(Square, Square)>,
}

impl DailyChallenge {
    /// Build a challenge from the position reached after the bot's opening move.
    pub fn publish(id: impl Into<String>, position: Position, bot_first_move: &str) -> Result<Self, ChessError> {
        let id = id.into();
        let piece_state_by_square = assign_identities(&position)?;
        let teams = build_teams(&piece_state_by_square, GameFactions::default(), PLAYER_SIDE, seed_from_id(&id));

        let position_before_bot_first_move = position_before_move(&position, bot_first_move, BOT_SIDE)?;
        let (bot_from, bot_to) = uci_move_squares(bot_first_move)?;
        let mut piece_state_by_square_before_bot_first_move = piece_state_by_square.clone();
        let bot_piece = piece_state_by_square_before_bot_first_move
            .remove(bot_to)
            .ok_or(ChessError::MissingPiece(bot_to))?;
        piece_state_by_square_before_bot_first_move.insert(bot_from, bot_piece);

        Ok(Self {
            id,
            position,
            piece_state_by_square,
            position_before_bot_first_move,
            piece_state_by_square_before_bot_first_move,
            teams,
            bot_first_move: (bot_from, bot_to),
            solution: Vec::new(),
        })
    }

    /// Attach a solution given as comma-separated compact moves ("h5f7" or
    /// "f7f8,a8a7,f8d6"). It must end with the player checkmating the bot.
    pub fn with_solution(mut self, solution: &str) -> Result<Self, ChessError> {
        let invalid = |reason: &str| ChessError::InvalidSolution(format!("{solution:?}: {reason}"));
        let moves = solution
            .split(',')
            .map(|mv| uci_move_squares(mv.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if moves.len() % 2 == 0 {
            return Err(invalid("must end on the player's move"));
        }

        let mut position = self.position.clone();
        let mut history = PositionHistory::new();
        let mut game_over = None;
        for (from, to) in &moves {
            if game_over.is_some() {
                return Err(invalid("goes on after the game is over"));
            }
            history.push(&position);
            let outcome = apply_move_with_history(&position, &history, *from, *to)?;
            position = outcome.new_position;
            game_over = outcome.game_over;
        }
        if game_over.map(|g| g.winner) != Some(Some(PLAYER_SIDE)) {
            return Err(invalid("does not win the game"));
        }

        self.solution = moves;
        Ok(self)
    }

    /// Player turns the solution takes, if there is one.
    pub fn solution_turns_count(&self) -> Option<u32> {
        (!self.solution.is_empty()).then(|| (self.solution.len() as u32 + 1) / 2)
    }

    pub fn my_side(&self) -> PlayerSide {
        PLAYER_SIDE
    }

    pub fn bot_side(&self) -> PlayerSide {
        BOT_SIDE
    }

    pub fn factions(&self) -> GameFactions {
        GameFactions::default()
    }

    /// A fresh attempt, waiting for the bot's opening move.
    pub fn new_game_state(&self) -> PlayerGameState {
        PlayerGameState {
            attempts_counter: 0,
            turns_counter: 0,
            current_attempt_turns_counter: 0,
            position: self.position_before_bot_first_move.clone(),
            piece_state_by_square: self.piece_state_by_square_before_bot_first_move.clone(),
            moves: String::new(),
            game_over: PlayerGameOverState::Playing,
            undo_used: false,
            solution_index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerGameOverState {
    #[default]
    Playing,
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerGameState {
    #[serde(rename = "ac")]
    pub attempts_counter: u32,
    /// Turns across every attempt of the day. Restarting costs one.
    #[serde(rename = "tc")]
    pub turns_counter: u32,
    #[serde(rename = "catc")]
    pub current_attempt_turns_counter: u32,
    #[serde(rename = "f")]
    pub position: Position,
    #[serde(rename = "prbs")]
    pub piece_state_by_square: PieceStateBySquare,
    /// Moves of the current attempt only, 4 characters each.
    #[serde(rename = "m")]
    pub moves: String,
    #[serde(rename = "go", default)]
    pub game_over: PlayerGameOverState,
    #[serde(rename = "uu", default)]
    pub undo_used: bool,
    /// Next solution move to show, while the solution is being replayed.
    #[serde(rename = "si", default, skip_serializing_if = "Option::is_none")]
    pub solution_index: Option<u32>,
}

impl PlayerGameState {
    pub fn is_bot_turn(&self) -> bool {
        self.position.side_to_move() == BOT_SIDE
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over != PlayerGameOverState::Playing
    }

    pub fn is_replaying_solution(&self) -> bool {
        self.solution_index.is_some()
    }
}

/// Everything the session cookie holds for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSessionContent {
    #[serde(rename = "ev", default = "default_encoding_version")]
    pub encoding_version: u32,
    #[serde(rename = "g", default)]
    pub games: BTreeMap<String, PlayerGameState>,
}

fn default_encoding_version() -> u32 {
    SESSION_ENCODING_VERSION
}

impl Default for PlayerSessionContent {
    fn default() -> Self {
        Self {
            encoding_version: SESSION_ENCODING_VERSION,
            games: BTreeMap::new(),
        }
    }
}

impl PlayerSessionContent {
    pub fn game(&self, challenge_id: &str) -> Option<&PlayerGameState> {
        self.games.get(challenge_id)
    }

    /// Content holding only this game. Other days' entries are dropped.
    pub fn with_game(challenge_id: &str, state: PlayerGameState) -> Self {
        Self {
            encoding_version: SESSION_ENCODING_VERSION,
            games: BTreeMap::from([(challenge_id.to_string(), state)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMove {
    pub state: PlayerGameState,
    pub outcome: MoveOutcome,
    pub captured_identity: Option<PieceIdentity>,
}

/// Split a compact move list into square pairs.
pub fn split_moves(moves: &str) -> Result<Vec<(Square, Square)>, ChessError> {
    if moves.len() % 4 != 0 || !moves.is_ascii() {
        return Err(ChessError::InvalidCompactMove(moves.to_string()));
    }
    (0..moves.len())
        .step_by(4)
        .map(|i| uci_move_squares(&moves[i..i + 4]))
        .collect()
}

/// Every position of the current attempt, replayed from the challenge start.
/// The last entry is the attempt's current position.
pub fn replay_history(challenge: &DailyChallenge, moves: &str) -> Result<PositionHistory, ChessError> {
    let mut position = challenge.position_before_bot_first_move.clone();
    let mut history = PositionHistory::new();
    for (from, to) in split_moves(moves)? {
        history.push(&position);
        position = apply_move_with_history(&position, &history, from, to)?.new_position;
    }
    history.push(&position);
    Ok(history)
}

/// Play one move of the attempt. Counters only move for the human side.
pub fn move_challenge_piece(
    state: &PlayerGameState,
    from: Square,
    to: Square,
    is_player_side: bool,
    history: &PositionHistory,
) -> Result<ChallengeMove, ChessError> {
    let moved = apply_move_with_identities(&state.position, &state.piece_state_by_square, history, from, to)?;

    let game_over = match moved.outcome.game_over {
        Some(game_over) if game_over.winner == Some(PLAYER_SIDE) => PlayerGameOverState::Won,
        Some(_) => PlayerGameOverState::Lost,
        None => PlayerGameOverState::Playing,
    };

    let mut next = PlayerGameState {
        position: moved.outcome.new_position.clone(),
        piece_state_by_square: moved.piece_state_by_square,
        moves: format!("{}{from}{to}", state.moves),
        game_over,
        ..state.clone()
    };
    if is_player_side {
        next.turns_counter += 1;
        next.current_attempt_turns_counter += 1;
    }

    Ok(ChallengeMove {
        state: next,
        outcome: moved.outcome,
        captured_identity: moved.captured_identity,
    })
}

/// How a finished attempt ended, recomputed from its moves.
pub fn attempt_game_over(challenge: &DailyChallenge, state: &PlayerGameState) -> Option<GameOver> {
    if !state.is_game_over() {
        return None;
    }
    let mut position = challenge.position_before_bot_first_move.clone();
    let mut history = PositionHistory::new();
    let mut game_over = None;
    for (from, to) in split_moves(&state.moves).ok()? {
        history.push(&position);
        let outcome = apply_move_with_history(&position, &history, from, to).ok()?;
        position = outcome.new_position;
        game_over = outcome.game_over;
    }
    game_over
}

/// Back to the challenge start, waiting for the bot's opening move again.
pub fn restart_challenge(challenge: &DailyChallenge, state: &PlayerGameState) -> PlayerGameState {
    PlayerGameState {
        attempts_counter: state.attempts_counter + 1,
        turns_counter: state.turns_counter + 1,
        current_attempt_turns_counter: 0,
        position: challenge.position_before_bot_first_move.clone(),
        piece_state_by_square: challenge.piece_state_by_square_before_bot_first_move.clone(),
        moves: String::new(),
        game_over: PlayerGameOverState::Playing,
        undo_used: false,
        solution_index: None,
    }
}

/// Take back the player's last turn (their move and the bot's reply).
///
/// Moves are replayed from the start rather than rewound, so captured pieces
/// come back with their identities. Lifetime turns are not refunded.
pub fn undo_last_move(challenge: &DailyChallenge, state: &PlayerGameState) -> Result<PlayerGameState, ChessError> {
    if state.is_game_over() {
        return Err(ChessError::UndoNotAvailable("the game is over"));
    }
    if state.is_replaying_solution() {
        return Err(ChessError::UndoNotAvailable("the solution is being shown"));
    }
    if state.undo_used {
        return Err(ChessError::UndoNotAvailable("already used in this attempt"));
    }
    if state.moves.len() < UNDO_MIN_MOVES_LENGTH {
        return Err(ChessError::UndoNotAvailable("not enough moves to undo"));
    }
    if state.is_bot_turn() {
        return Err(ChessError::UndoNotAvailable("waiting for the bot's move"));
    }

    let moves = split_moves(&state.moves)?;
    let kept = &moves[..moves.len() - 2];

    let mut next = PlayerGameState {
        current_attempt_turns_counter: 0,
        position: challenge.position_before_bot_first_move.clone(),
        piece_state_by_square: challenge.piece_state_by_square_before_bot_first_move.clone(),
        moves: String::new(),
        game_over: PlayerGameOverState::Playing,
        ..state.clone()
    };
    let mut history = PositionHistory::new();
    for (from, to) in kept {
        history.push(&next.position);
        let is_player_side = next.position.side_to_move() == PLAYER_SIDE;
        next = move_challenge_piece(&next, *from, *to, is_player_side, &history)?.state;
    }

    next.turns_counter = state.turns_counter;
    next.undo_used = true;
    Ok(next)
}

/// Give up the attempt and replay the solution instead, starting right after the
/// bot's opening move. Lifetime turns are kept.
pub fn see_challenge_solution(
    challenge: &DailyChallenge,
    state: &PlayerGameState,
) -> Result<PlayerGameState, ChessError> {
    if challenge.solution.is_empty() {
        return Err(ChessError::SolutionNotAvailable("this challenge has none"));
    }
    let (from, to) = challenge.bot_first_move;
    Ok(PlayerGameState {
        current_attempt_turns_counter: 0,
        position: challenge.position.clone(),
        piece_state_by_square: challenge.piece_state_by_square.clone(),
        moves: format!("{from}{to}"),
        game_over: PlayerGameOverState::Playing,
        undo_used: false,
        solution_index: Some(0),
        ..state.clone()
    })
}

/// Play the next move of the solution replay, for whichever side it belongs to.
pub fn play_solution_move(challenge: &DailyChallenge, state: &PlayerGameState) -> Result<ChallengeMove, ChessError> {
    let index = state
        .solution_index
        .ok_or(ChessError::SolutionNotAvailable("the solution is not being shown"))?;
    let (from, to) = *challenge
        .solution
        .get(index as usize)
        .ok_or(ChessError::SolutionNotAvailable("every solution move was played"))?;
    let history = replay_history(challenge, &state.moves)?;
    let mut moved = move_challenge_piece(state, from, to, false, &history)?;
    moved.state.solution_index = Some(index + 1);
    Ok(moved)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChallengeTurnsState {
    pub attempts_counter: u32,
    pub current_attempt_turns: u32,
    pub turns_total: u32,
    pub turns_left: i32,
    pub percentage_left: i32,
    /// No turns left for today.
    pub time_s_up: bool,
}

pub fn turns_state(state: &PlayerGameState) -> ChallengeTurnsState {
    let turns_total = MAXIMUM_TURNS_PER_CHALLENGE as i32;
    let turns_left = turns_total - state.turns_counter as i32;
    let percentage_left = (f64::from(turns_left) / f64::from(turns_total) * 100.0).round() as i32;
    ChallengeTurnsState {
        attempts_counter: state.attempts_counter,
        current_attempt_turns: state.current_attempt_turns_counter,
        turns_total: MAXIMUM_TURNS_PER_CHALLENGE,
        turns_left,
        percentage_left,
        time_s_up: turns_left <= 0,
    }
}

/// Long-running stats, kept in their own cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    #[serde(rename = "gc", default)]
    pub games_count: u32,
    #[serde(rename = "wc", default)]
    pub win_count: u32,
    #[serde(rename = "cs", default)]
    pub current_streak: u32,
    #[serde(rename = "ms", default)]
    pub max_streak: u32,
    #[serde(rename = "lp", default)]
    pub last_played: Option<NaiveDate>,
    #[serde(rename = "lw", default)]
    pub last_won: Option<NaiveDate>,
    /// Wins per performance slice, best first.
    #[serde(rename = "wd", default)]
    pub wins_distribution: [u32; WINS_DISTRIBUTION_SLICE_COUNT as usize],
}

impl PlayerStats {
    pub fn has_won_today(&self, today: NaiveDate) -> bool {
        self.last_won == Some(today)
    }

    pub fn has_won_yesterday(&self, today: NaiveDate) -> bool {
        self.last_won.is_some() && self.last_won == today.pred_opt()
    }
}

/// A player opens a challenge they had not played yet.
pub fn manage_new_challenge_stats(stats: &mut PlayerStats, today: NaiveDate) {
    if !stats.has_won_today(today) && !stats.has_won_yesterday(today) {
        stats.current_streak = 0;
    }
}

/// A game only counts as played once the player moved a piece.
pub fn manage_moved_piece_stats(stats: &mut PlayerStats, state: &PlayerGameState, today: NaiveDate) {
    if state.attempts_counter == 0 && state.current_attempt_turns_counter == 1 {
        stats.games_count += 1;
        stats.last_played = Some(today);
    }
}

/// 1 is the best performance, 5 the worst.
pub fn wins_distribution_slice(turns_counter: u32) -> u32 {
    let slice = (turns_counter * WINS_DISTRIBUTION_SLICE_COUNT).div_ceil(MAXIMUM_TURNS_PER_CHALLENGE);
    slice.clamp(1, WINS_DISTRIBUTION_SLICE_COUNT)
}

/// Record today's win. A second call on the same day changes nothing.
pub fn manage_victory(stats: &mut PlayerStats, state: &PlayerGameState, today: NaiveDate) {
    if state.game_over != PlayerGameOverState::Won || stats.has_won_today(today) {
        return;
    }
    stats.win_count += 1;
    stats.current_streak += 1;
    stats.max_streak = stats.max_streak.max(stats.current_streak);
    stats.last_won = Some(today);
    let slice = wins_distribution_slice(state.turns_counter);
    stats.wins_distribution[(slice - 1) as usize] += 1;
}
