//! The daily challenge board. Every endpoint answers with a `BoardFragment`:
//! the board as it now stands plus what changed.

use std::sync::{Arc, LazyLock};

use axum::{
    extract::{FromRequestParts, Path, Query},
    http::{header, request::Parts, HeaderName, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Json,
};
use chess_core::challenge::{
    attempt_game_over, manage_moved_piece_stats, manage_new_challenge_stats, manage_victory, move_challenge_piece,
    play_solution_move, replay_history, restart_challenge, see_challenge_solution, turns_state, undo_last_move,
    ChallengeMove, ChallengeTurnsState,
    DailyChallenge, PlayerGameOverState, PlayerGameState, PlayerStats,
};
use chess_core::identity::PieceIdentity;
use chess_core::moves::{legal_targets, squares_with_pieces_that_can_move, GameOver, SquareDelta};
use chess_core::notation::{parse_square, uci_move_squares};
use chess_core::presenter::{GamePresenter, PresenterInput, Selection};
use chess_core::selection::{GamePhase, Interaction, SelectionMachine, SelectionState, Transition, TransitionContext};
use chess_core::team::Faction;
use chess_core::PlayerSide;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shakmaty::Square;

use crate::catalog::ChallengeCatalog;
use crate::clients::uci_engine::{EngineError, SharedEngine};
use crate::config::Config;
use crate::error::AppError;
use crate::session::{build_cookie, read_cookie, ChallengeSession, SessionStore, SignedCookieStore, SESSION_COOKIE, STATS_COOKIE};

pub const PAGE_PATH: &str = "/daily-challenge";
const DEFAULT_BOARD_ID: &str = "main";

static BOARD_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").unwrap());

#[derive(Debug, Serialize)]
pub struct PieceView {
    pub square: String,
    pub identity: String,
    pub name: Option<String>,
    pub faction: Faction,
}

#[derive(Debug, Serialize)]
pub struct SelectedView {
    pub square: String,
    pub identity: String,
    pub available_targets: Vec<String>,
    pub potential_captures: Vec<String>,
    pub target_to_confirm: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Serialize)]
pub struct BoardFragment {
    pub board_id: String,
    pub challenge_id: String,
    pub phase: GamePhase,
    pub fen: String,
    pub active_player_side: PlayerSide,
    pub is_check: bool,
    pub pieces: Vec<PieceView>,
    pub squares_with_pieces_that_can_move: Vec<String>,
    pub selected: Option<SelectedView>,
    pub deltas: Vec<SquareDelta>,
    pub last_move: Option<String>,
    pub game_over: Option<GameOver>,
    pub result: PlayerGameOverState,
    pub turns: ChallengeTurnsState,
    pub naive_score: i32,
    /// The bot's opening move, for the client to trigger.
    pub forced_bot_move: Option<String>,
    pub captured_identity: Option<String>,
    /// Restart was asked for and now waits for `restart/do`.
    pub restart_confirmation: bool,
    pub solution_index: Option<u32>,
    pub solution_turns_count: Option<u32>,
    pub stats: PlayerStats,
}

#[derive(Deserialize)]
struct BoardQuery {
    board_id: Option<String>,
}

/// Everything one request needs about the player and today's challenge.
pub struct GameContext {
    pub config: Config,
    pub challenge: Arc<DailyChallenge>,
    pub store: Arc<SignedCookieStore>,
    pub engine: Option<Arc<SharedEngine>>,
    pub session: ChallengeSession,
    pub stats: PlayerStats,
    pub board_id: String,
    pub today: NaiveDate,
    pub is_htmx: bool,
}

impl<S> FromRequestParts<S> for GameContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<Config>()
            .ok_or(AppError::Internal("Missing config".into()))?
            .clone();
        let catalog = parts
            .extensions
            .get::<Arc<ChallengeCatalog>>()
            .ok_or(AppError::Internal("Missing challenge catalog".into()))?
            .clone();
        let store = parts
            .extensions
            .get::<Arc<SignedCookieStore>>()
            .ok_or(AppError::Internal("Missing session store".into()))?
            .clone();
        let engine = parts
            .extensions
            .get::<Option<Arc<SharedEngine>>>()
            .cloned()
            .flatten();

        let board_id = Query::<BoardQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.board_id)
            .unwrap_or_else(|| DEFAULT_BOARD_ID.to_string());
        if !BOARD_ID_RE.is_match(&board_id) {
            return Err(AppError::BadRequest(format!("Invalid board_id: {board_id}")));
        }

        let today = Utc::now().date_naive();
        let challenge = catalog
            .for_date(today)
            .ok_or(AppError::NotFound("No challenge published".into()))?;

        let session_store: Arc<dyn SessionStore> = store.clone();
        let raw_session = read_cookie(&parts.headers, SESSION_COOKIE);
        let session = ChallengeSession::load(session_store, raw_session.as_deref(), today.to_string());
        let stats = store.load_stats(read_cookie(&parts.headers, STATS_COOKIE).as_deref());

        let is_htmx = parts
            .headers
            .get("hx-request")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "true");

        Ok(Self {
            config,
            challenge,
            store,
            engine,
            session,
            stats,
            board_id,
            today,
            is_htmx,
        })
    }
}

/// What a fragment shows on top of the stored state.
#[derive(Default)]
struct View {
    selection: Option<SelectionState>,
    /// Square to show as selected. Can be an opponent piece being inspected.
    selection_request: Option<Square>,
    deltas: Vec<SquareDelta>,
    game_over: Option<GameOver>,
    captured_identity: Option<PieceIdentity>,
    restart_confirmation: bool,
}

impl View {
    fn of(selection: SelectionState) -> Self {
        Self {
            selection: Some(selection),
            selection_request: selection.selected,
            ..Self::default()
        }
    }

    fn after_move(selection: SelectionState, moved: &ChallengeMove) -> Self {
        Self {
            deltas: moved.outcome.deltas.clone(),
            game_over: moved.outcome.game_over,
            captured_identity: moved.captured_identity,
            ..Self::of(selection)
        }
    }
}

/// The selection state implied by the stored game alone.
fn resting_state(state: &PlayerGameState) -> SelectionState {
    if state.is_game_over() {
        SelectionState::game_over()
    } else if state.is_replaying_solution() {
        SelectionState::replaying_solution()
    } else if turns_state(state).time_s_up {
        SelectionState::game_over()
    } else if state.is_bot_turn() {
        SelectionState::bot_turn()
    } else {
        SelectionState::idle()
    }
}

fn squares(set: impl IntoIterator<Item = Square>) -> Vec<String> {
    set.into_iter().map(|sq| sq.to_string()).collect()
}

impl GameContext {
    fn machine(&self) -> SelectionMachine {
        SelectionMachine::new(self.config.confirm_moves)
    }

    fn load_or_create(&mut self) -> (PlayerGameState, bool) {
        let challenge = self.challenge.clone();
        self.session.load_or_create(|| challenge.new_game_state())
    }

    /// Send a player whose session vanished back to the page, which starts a fresh attempt.
    fn redirect_to_page(&self) -> Response {
        let location = format!("{PAGE_PATH}?board_id={}", self.board_id);
        tracing::info!(board_id = %self.board_id, "Session desync, redirecting to a fresh game");
        if self.is_htmx {
            (StatusCode::OK, [(HeaderName::from_static("hx-redirect"), location)]).into_response()
        } else {
            Redirect::to(&location).into_response()
        }
    }

    /// Persist the attempt and the stats, as `Set-Cookie` headers.
    fn save(&mut self, state: PlayerGameState) -> Result<Vec<(HeaderName, String)>, AppError> {
        let max_age = self.store.max_age_days();
        let session = self.session.persist(state)?;
        let stats = self.store.persist_stats(&self.stats)?;
        Ok(vec![
            (header::SET_COOKIE, build_cookie(SESSION_COOKIE, session, max_age).to_string()),
            (header::SET_COOKIE, build_cookie(STATS_COOKIE, stats, max_age).to_string()),
        ])
    }

    fn transition_context(&self, state: &PlayerGameState, selected: Option<Square>) -> TransitionContext {
        TransitionContext {
            movable_squares: squares_with_pieces_that_can_move(&state.position),
            targets: selected
                .map(|square| legal_targets(&state.position, square))
                .unwrap_or_default(),
        }
    }

    fn render(&self, state: &PlayerGameState, view: View) -> BoardFragment {
        let resting = resting_state(state);
        let interactive = resting.phase == GamePhase::WaitingForPlayerSelection;
        let selection = view.selection.filter(|_| interactive).unwrap_or(resting);

        let presenter = GamePresenter::new(PresenterInput {
            position: state.position.clone(),
            piece_state_by_square: state.piece_state_by_square.clone(),
            teams: self.challenge.teams.clone(),
            factions: self.challenge.factions(),
            selection_request: view.selection_request.filter(|_| interactive),
            target_to_confirm: selection.target_to_confirm,
            moves: state.moves.clone(),
            recorded_game_over: view.game_over.or_else(|| attempt_game_over(&self.challenge, state)),
        });

        let pieces = presenter
            .pieces()
            .iter()
            .map(|(square, identity)| {
                let member = presenter.team_member_display(identity);
                PieceView {
                    square: square.to_string(),
                    identity: identity.to_string(),
                    name: member.name,
                    faction: member.faction,
                }
            })
            .collect();

        let selected = match presenter.selection() {
            Selection::None => None,
            Selection::SquareOnly(selected) => Some(SelectedView {
                square: selected.square.to_string(),
                identity: selected.identity.to_string(),
                available_targets: Vec::new(),
                potential_captures: Vec::new(),
                target_to_confirm: None,
                is_pinned: false,
            }),
            Selection::Piece(selected) => Some(SelectedView {
                square: selected.square.to_string(),
                identity: selected.identity.to_string(),
                available_targets: squares(selected.available_targets.iter().copied()),
                potential_captures: squares(selected.potential_captures.iter().copied()),
                target_to_confirm: selected.target_to_confirm.map(|sq| sq.to_string()),
                is_pinned: selected.is_pinned,
            }),
        };

        let forced_bot_move = (state.moves.is_empty() && resting.phase == GamePhase::WaitingForBotTurn).then(|| {
            let (from, to) = self.challenge.bot_first_move;
            format!("{from}{to}")
        });

        BoardFragment {
            board_id: self.board_id.clone(),
            challenge_id: self.challenge.id.clone(),
            phase: selection.phase,
            fen: state.position.to_string(),
            active_player_side: presenter.active_player_side(),
            is_check: presenter.is_in_check(),
            pieces,
            squares_with_pieces_that_can_move: if interactive {
                squares(presenter.squares_with_pieces_that_can_move().iter().copied())
            } else {
                Vec::new()
            },
            selected,
            deltas: view.deltas,
            last_move: presenter.last_move().map(|(from, to)| format!("{from}{to}")),
            game_over: presenter.game_over(),
            result: state.game_over,
            turns: turns_state(state),
            naive_score: presenter.naive_score(),
            forced_bot_move,
            captured_identity: view.captured_identity.map(|identity| identity.to_string()),
            restart_confirmation: view.restart_confirmation,
            solution_index: state.solution_index,
            solution_turns_count: self.challenge.solution_turns_count(),
            stats: self.stats.clone(),
        }
    }

    fn respond(&self, state: &PlayerGameState, view: View, cookies: Vec<(HeaderName, String)>) -> Response {
        (AppendHeaders(cookies), Json(self.render(state, view))).into_response()
    }
}

/// GET /daily-challenge
pub async fn page(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    let mut cookies = Vec::new();
    if created {
        tracing::info!(challenge_id = %ctx.challenge.id, board_id = %ctx.board_id, "Starting a new attempt");
        manage_new_challenge_stats(&mut ctx.stats, ctx.today);
        cookies = ctx.save(state.clone())?;
    }
    Ok(ctx.respond(&state, View::of(resting_state(&state)), cookies))
}

/// GET /daily-challenge/htmx/no-selection
pub async fn no_selection(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }
    let resting = resting_state(&state);
    let next = ctx
        .machine()
        .transition(&resting, Interaction::OutsideClick, &TransitionContext::default())
        .state();
    Ok(ctx.respond(&state, View::of(next), Vec::new()))
}

#[derive(Deserialize)]
pub struct SelectQuery {
    pub square: String,
    /// The square selected before this click, if any.
    pub current: Option<String>,
}

/// GET /daily-challenge/htmx/pieces/select
pub async fn select_piece(mut ctx: GameContext, Query(q): Query<SelectQuery>) -> Result<Response, AppError> {
    let square = parse_square(&q.square)?;
    let current = q
        .current
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(parse_square)
        .transpose()?;

    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let resting = resting_state(&state);
    let before = match current {
        Some(current) if resting.phase == GamePhase::WaitingForPlayerSelection => SelectionState::selected(current),
        _ => resting,
    };
    let transition = ctx.machine().transition(
        &before,
        Interaction::SelectPiece(square),
        &ctx.transition_context(&state, None),
    );
    let next = transition.state();

    let mut view = View::of(next);
    // Pieces that cannot move right now can still be inspected.
    if next.selected.is_none()
        && current != Some(square)
        && state.piece_state_by_square.get(square).is_some()
        && !matches!(transition, Transition::Rejected(_))
    {
        view.selection_request = Some(square);
    }
    Ok(ctx.respond(&state, view, Vec::new()))
}

#[derive(Deserialize)]
pub struct MoveQuery {
    pub confirmed: Option<bool>,
}

/// POST /daily-challenge/htmx/pieces/{from}/move/{to}
pub async fn move_piece(
    mut ctx: GameContext,
    Path((from, to)): Path<(String, String)>,
    Query(q): Query<MoveQuery>,
) -> Result<Response, AppError> {
    let from = parse_square(&from)?;
    let to = parse_square(&to)?;

    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let resting = resting_state(&state);
    if resting.phase != GamePhase::WaitingForPlayerSelection {
        tracing::debug!(from = %from, to = %to, phase = ?resting.phase, "Move outside the player's turn ignored");
        return Ok(ctx.respond(&state, View::of(resting), Vec::new()));
    }

    let confirmed = q.confirmed.unwrap_or(false);
    let (before, interaction) = if confirmed {
        (SelectionState::confirming(from, to), Interaction::ConfirmMove)
    } else {
        (SelectionState::selected(from), Interaction::SelectTarget(to))
    };
    let transition = ctx
        .machine()
        .transition(&before, interaction, &ctx.transition_context(&state, Some(from)));

    let (from, to) = match transition {
        Transition::Commit { from, to, .. } => (from, to),
        Transition::Stay(next) => return Ok(ctx.respond(&state, View::of(next), Vec::new())),
        Transition::Rejected(next) => {
            tracing::info!(
                challenge_id = %ctx.challenge.id,
                from = %from,
                to = %to,
                fen = %state.position,
                "Illegal move rejected"
            );
            return Ok(ctx.respond(&state, View::of(next), Vec::new()));
        }
    };

    let history = replay_history(&ctx.challenge, &state.moves)?;
    let moved = match move_challenge_piece(&state, from, to, true, &history) {
        Ok(moved) => moved,
        Err(e) => {
            tracing::warn!(
                challenge_id = %ctx.challenge.id,
                from = %from,
                to = %to,
                fen = %state.position,
                error = %e,
                "Move could not be applied"
            );
            return Ok(ctx.respond(&state, View::of(SelectionState::idle()), Vec::new()));
        }
    };
    tracing::info!(challenge_id = %ctx.challenge.id, board_id = %ctx.board_id, from = %from, to = %to, "Player moved");

    manage_moved_piece_stats(&mut ctx.stats, &moved.state, ctx.today);
    manage_victory(&mut ctx.stats, &moved.state, ctx.today);

    let next = ctx
        .machine()
        .transition(
            &SelectionState::idle(),
            Interaction::MoveApplied {
                game_over: moved.state.is_game_over(),
                bot_to_play: moved.state.is_bot_turn(),
            },
            &TransitionContext::default(),
        )
        .state();
    let cookies = ctx.save(moved.state.clone())?;
    Ok(ctx.respond(&moved.state, View::after_move(next, &moved), cookies))
}

#[derive(Deserialize)]
pub struct BotMoveQuery {
    /// Compact move chosen by the client. The engine is asked when absent.
    #[serde(rename = "move")]
    pub mv: Option<String>,
}

/// POST /daily-challenge/htmx/bot/move
pub async fn bot_move(mut ctx: GameContext, Query(q): Query<BotMoveQuery>) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let resting = resting_state(&state);
    if resting.phase != GamePhase::WaitingForBotTurn {
        return Ok(ctx.respond(&state, View::of(resting), Vec::new()));
    }

    let history = replay_history(&ctx.challenge, &state.moves)?;
    let (from, to, from_engine) = if state.moves.is_empty() {
        let (from, to) = ctx.challenge.bot_first_move;
        (from, to, false)
    } else if let Some(mv) = q.mv.as_deref() {
        let (from, to) = uci_move_squares(mv)?;
        (from, to, false)
    } else if let Some(engine) = ctx.engine.clone() {
        let best = match engine.best_move(state.position.as_str()).await {
            Ok(best) => best,
            Err(e) => {
                tracing::warn!(
                    challenge_id = %ctx.challenge.id,
                    fen = %state.position,
                    error = %e,
                    "Engine search failed"
                );
                return Err(e.into());
            }
        };
        (best.from, best.to, true)
    } else {
        return Err(AppError::BadRequest(
            "No engine configured: the bot's move must be supplied".into(),
        ));
    };

    let moved = match move_challenge_piece(&state, from, to, false, &history) {
        Ok(moved) => moved,
        Err(e) if from_engine => {
            tracing::warn!(
                challenge_id = %ctx.challenge.id,
                from = %from,
                to = %to,
                fen = %state.position,
                error = %e,
                "Engine suggested an illegal move"
            );
            if let Some(engine) = ctx.engine.as_ref() {
                engine.reset().await;
            }
            return Err(EngineError::Protocol(format!("illegal move {from}{to}: {e}")).into());
        }
        Err(e) => {
            tracing::warn!(
                challenge_id = %ctx.challenge.id,
                from = %from,
                to = %to,
                fen = %state.position,
                error = %e,
                "Bot move could not be applied"
            );
            return Ok(ctx.respond(&state, View::of(resting), Vec::new()));
        }
    };
    tracing::info!(
        challenge_id = %ctx.challenge.id,
        board_id = %ctx.board_id,
        moves = %moved.state.moves,
        "Bot moved"
    );

    let next = ctx
        .machine()
        .transition(
            &resting,
            Interaction::BotMoved {
                game_over: moved.state.is_game_over(),
            },
            &TransitionContext::default(),
        )
        .state();
    let cookies = ctx.save(moved.state.clone())?;
    Ok(ctx.respond(&moved.state, View::after_move(next, &moved), cookies))
}

/// POST /daily-challenge/htmx/restart/ask-confirmation
pub async fn restart_ask_confirmation(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }
    let view = View {
        restart_confirmation: true,
        ..View::of(resting_state(&state))
    };
    Ok(ctx.respond(&state, view, Vec::new()))
}

/// POST /daily-challenge/htmx/restart/do
pub async fn restart(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let restarted = restart_challenge(&ctx.challenge, &state);
    tracing::info!(
        challenge_id = %ctx.challenge.id,
        attempts = restarted.attempts_counter,
        "Attempt restarted"
    );
    let next = ctx
        .machine()
        .transition(&resting_state(&state), Interaction::Restart, &TransitionContext::default())
        .state();
    let cookies = ctx.save(restarted.clone())?;
    Ok(ctx.respond(&restarted, View::of(next), cookies))
}

/// POST /daily-challenge/htmx/undo
pub async fn undo(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let undone = undo_last_move(&ctx.challenge, &state)?;
    tracing::info!(challenge_id = %ctx.challenge.id, moves = %undone.moves, "Last turn undone");
    let cookies = ctx.save(undone.clone())?;
    Ok(ctx.respond(&undone, View::of(resting_state(&undone)), cookies))
}

/// POST /daily-challenge/htmx/solution/see
pub async fn see_solution(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let replay = see_challenge_solution(&ctx.challenge, &state)?;
    tracing::info!(challenge_id = %ctx.challenge.id, board_id = %ctx.board_id, "Showing the solution");
    let next = ctx
        .machine()
        .transition(&resting_state(&state), Interaction::SeeSolution, &TransitionContext::default())
        .state();
    let cookies = ctx.save(replay.clone())?;
    Ok(ctx.respond(&replay, View::of(next), cookies))
}

/// POST /daily-challenge/htmx/solution/play
pub async fn play_solution(mut ctx: GameContext) -> Result<Response, AppError> {
    let (state, created) = ctx.load_or_create();
    if created {
        return Ok(ctx.redirect_to_page());
    }

    let resting = resting_state(&state);
    if resting.phase != GamePhase::ReplayingSolution {
        return Ok(ctx.respond(&state, View::of(resting), Vec::new()));
    }

    let moved = play_solution_move(&ctx.challenge, &state)?;
    tracing::debug!(challenge_id = %ctx.challenge.id, moves = %moved.state.moves, "Solution move played");
    let next = ctx
        .machine()
        .transition(
            &resting,
            Interaction::SolutionMoved {
                game_over: moved.state.is_game_over(),
            },
            &TransitionContext::default(),
        )
        .state();
    let cookies = ctx.save(moved.state.clone())?;
    Ok(ctx.respond(&moved.state, View::after_move(next, &moved), cookies))
}
