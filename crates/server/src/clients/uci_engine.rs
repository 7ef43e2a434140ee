//! Async UCI client for the bot's moves.
//!
//! The engine is any line-based reader/writer pair. In production that is a
//! spawned Stockfish-compatible process; tests script one over a duplex pipe.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use chess_core::notation::parse_square;
use regex::Regex;
use shakmaty::{Role, Square};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

static BESTMOVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bestmove ([a-h][1-8])([a-h][1-8])([qrbn])?(\s|$)").unwrap());
static UCIOK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^uciok$").unwrap());
static READYOK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^readyok$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start the engine: {0}")]
    Spawn(String),

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected engine output: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineScore {
    /// Centipawns, from the side to move.
    Cp(i32),
    /// Mate in N, negative when the side to move gets mated.
    Mate(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
    pub score: Option<EngineScore>,
}

pub struct UciEngine<R, W> {
    reader: R,
    writer: W,
    process: Option<Child>,
}

pub type StockfishEngine = UciEngine<BufReader<ChildStdout>, ChildStdin>;

impl StockfishEngine {
    /// Spawn the engine process and complete the UCI handshake.
    pub async fn spawn(path: &str, timeout: Duration) -> Result<Self, EngineError> {
        let mut process = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{path}: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("no stdin pipe".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("no stdout pipe".into()))?;

        let mut engine = UciEngine::new(BufReader::new(stdout), stdin);
        engine.process = Some(process);
        engine.handshake(timeout).await?;
        Ok(engine)
    }
}

impl<R, W> UciEngine<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            process: None,
        }
    }

    pub async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "UCI <");
        self.writer.write_all(format!("{cmd}\n").as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(EngineError::Protocol("engine closed its output".into()));
        }
        let trimmed = line.trim().to_string();
        debug!(line = trimmed.as_str(), "UCI >");
        Ok(trimmed)
    }

    /// Read lines until `done` accepts one, and return it.
    async fn read_until<F>(&mut self, timeout: Duration, mut done: F) -> Result<String, EngineError>
    where
        F: FnMut(&str) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                let line = self.next_line().await?;
                if done(&line) {
                    return Ok::<_, EngineError>(line);
                }
            }
        })
        .await
        .map_err(|_| EngineError::Timeout(timeout))?
    }

    /// Read lines until one matches `pattern`, and return it.
    pub async fn await_match(&mut self, pattern: &Regex, timeout: Duration) -> Result<String, EngineError> {
        self.read_until(timeout, |line| pattern.is_match(line)).await
    }

    pub async fn handshake(&mut self, timeout: Duration) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.await_match(&UCIOK_RE, timeout).await?;
        self.send("isready").await?;
        self.await_match(&READYOK_RE, timeout).await?;
        Ok(())
    }

    pub async fn best_move(&mut self, fen: &str, depth: u8, timeout: Duration) -> Result<BotMove, EngineError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go depth {depth}")).await?;

        let mut score = None;
        let line = self
            .read_until(timeout, |line| {
                if line.starts_with("info") {
                    score = parse_score(line).or(score);
                }
                line.starts_with("bestmove")
            })
            .await?;

        let captures = BESTMOVE_RE
            .captures(&line)
            .ok_or_else(|| EngineError::Protocol(line.clone()))?;
        let square = |i: usize| {
            parse_square(&captures[i]).map_err(|_| EngineError::Protocol(line.clone()))
        };
        Ok(BotMove {
            from: square(1)?,
            to: square(2)?,
            promotion: captures
                .get(3)
                .and_then(|m| m.as_str().chars().next())
                .and_then(Role::from_char),
            score,
        })
    }
}

impl<R, W> Drop for UciEngine<R, W> {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            let _ = process.start_kill();
        }
    }
}

/// The process-wide engine. Spawned on first use; a failed engine is dropped
/// and replaced on the next call.
pub struct SharedEngine {
    path: String,
    depth: u8,
    timeout: Duration,
    engine: Mutex<Option<StockfishEngine>>,
}

impl SharedEngine {
    pub fn new(path: impl Into<String>, depth: u8, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            depth,
            timeout,
            engine: Mutex::new(None),
        }
    }

    pub async fn best_move(&self, fen: &str) -> Result<BotMove, EngineError> {
        let mut guard = self.engine.lock().await;
        if guard.is_none() {
            *guard = Some(StockfishEngine::spawn(&self.path, self.timeout).await?);
        }
        let Some(engine) = guard.as_mut() else {
            return Err(EngineError::Spawn(self.path.clone()));
        };

        let result = engine.best_move(fen, self.depth, self.timeout).await;
        if let Err(e) = &result {
            tracing::warn!(fen, error = %e, "Dropping engine after a failed search");
            *guard = None;
        }
        result
    }

    /// Drop the running engine, e.g. after it suggested an illegal move.
    pub async fn reset(&self) {
        *self.engine.lock().await = None;
    }
}

/// The score of an `info` line, e.g. `score cp 35` or `score mate -3`.
fn parse_score(line: &str) -> Option<EngineScore> {
    let mut tokens = line.split_whitespace().skip_while(|t| *t != "score").skip(1);
    let kind = tokens.next()?;
    let value = tokens.next()?.parse().ok()?;
    match kind {
        "cp" => Some(EngineScore::Cp(value)),
        "mate" => Some(EngineScore::Mate(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type ScriptedEngine = UciEngine<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>;

    /// An engine that answers the handshake and replies to `go` with `reply`.
    fn scripted_engine(reply: &'static str) -> ScriptedEngine {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        tokio::spawn(async move {
            let (server_read, mut server_write) = tokio::io::split(server);
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let answer = match line.as_str() {
                    "uci" => "id name Scripted\nuciok\n",
                    "isready" => "readyok\n",
                    l if l.starts_with("go") => reply,
                    _ => continue,
                };
                if server_write.write_all(answer.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        UciEngine::new(BufReader::new(client_read), client_write)
    }

    const TIMEOUT: Duration = Duration::from_millis(500);
    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[tokio::test]
    async fn test_handshake_and_best_move() {
        let mut engine = scripted_engine(
            "info depth 1 score cp 20 pv e2e4\ninfo depth 2 score cp 35 pv e2e4 e7e5\nbestmove e2e4 ponder e7e5\n",
        );
        engine.handshake(TIMEOUT).await.unwrap();
        let mv = engine.best_move(START, 2, TIMEOUT).await.unwrap();
        assert_eq!(mv.from, Square::E2);
        assert_eq!(mv.to, Square::E4);
        assert_eq!(mv.promotion, None);
        assert_eq!(mv.score, Some(EngineScore::Cp(35)));
    }

    #[tokio::test]
    async fn test_best_move_with_promotion_and_mate_score() {
        let mut engine = scripted_engine("info depth 3 score mate 2 pv a7a8q\nbestmove a7a8q\n");
        let mv = engine.best_move("8/P7/8/8/8/8/8/k6K w - - 0 1", 3, TIMEOUT).await.unwrap();
        assert_eq!((mv.from, mv.to), (Square::A7, Square::A8));
        assert_eq!(mv.promotion, Some(Role::Queen));
        assert_eq!(mv.score, Some(EngineScore::Mate(2)));
    }

    #[tokio::test]
    async fn test_unparseable_bestmove_is_a_protocol_error() {
        let mut engine = scripted_engine("bestmove (none)\n");
        let err = engine.best_move(START, 1, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_silent_engine_times_out() {
        let mut engine = scripted_engine("info depth 1\n");
        let err = engine
            .best_move(START, 1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_closed_engine_is_a_protocol_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let (read, write) = tokio::io::split(client);
        let mut engine = UciEngine::new(BufReader::new(read), write);
        let err = engine.await_match(&UCIOK_RE, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let shared = SharedEngine::new("/nonexistent/stockfish", 1, TIMEOUT);
        let err = shared.best_move(START).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn(_)));
    }

    #[test]
    fn test_parse_score() {
        let cp = "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 pv e2e4";
        assert_eq!(parse_score(cp), Some(EngineScore::Cp(35)));
        let mate = "info depth 20 score mate -3 nodes 100000 pv e2e4";
        assert_eq!(parse_score(mate), Some(EngineScore::Mate(-3)));
        assert_eq!(parse_score("info depth 1 nodes 20"), None);
        assert_eq!(parse_score("info depth 1 score lowerbound"), None);
    }

    #[tokio::test]
    async fn test_info_without_score_keeps_the_last_one() {
        let mut engine = scripted_engine("info depth 1 score cp -12\ninfo nodes 400\nbestmove e2e4\n");
        let mv = engine.best_move(START, 1, TIMEOUT).await.unwrap();
        assert_eq!(mv.score, Some(EngineScore::Cp(-12)));
    }
}
