//! Which puzzle is today's.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chess_core::challenge::DailyChallenge;
use chess_core::{ChessError, Position};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

const BUILTIN_ID: &str = "scholars-mate";
const BUILTIN_FEN: &str = "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4";
const BUILTIN_BOT_FIRST_MOVE: &str = "g8f6";
const BUILTIN_SOLUTION: &str = "h5f7";

/// One catalog record. `fen` is the position after the bot's opening move.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeEntry {
    pub id: String,
    pub fen: String,
    pub bot_first_move: String,
    /// Comma-separated compact moves, see [`DailyChallenge::with_solution`].
    #[serde(default)]
    pub solution: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChallengeCatalog {
    challenges: Vec<Arc<DailyChallenge>>,
}

impl ChallengeCatalog {
    pub fn builtin() -> Result<Self, ChessError> {
        let challenge = DailyChallenge::publish(BUILTIN_ID, Position::parse(BUILTIN_FEN)?, BUILTIN_BOT_FIRST_MOVE)?
            .with_solution(BUILTIN_SOLUTION)?;
        Ok(Self {
            challenges: vec![Arc::new(challenge)],
        })
    }

    pub fn from_entries(entries: Vec<ChallengeEntry>) -> anyhow::Result<Self> {
        if entries.is_empty() {
            bail!("challenge catalog is empty");
        }
        let challenges = entries
            .into_iter()
            .map(|entry| {
                let position = Position::parse(&entry.fen)
                    .with_context(|| format!("challenge {}: bad position", entry.id))?;
                let challenge = DailyChallenge::publish(entry.id.clone(), position, &entry.bot_first_move)
                    .with_context(|| format!("challenge {}: bad bot opening move", entry.id))?;
                let challenge = match entry.solution.as_deref() {
                    Some(solution) => challenge
                        .with_solution(solution)
                        .with_context(|| format!("challenge {}: bad solution", entry.id))?,
                    None => challenge,
                };
                Ok(Arc::new(challenge))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { challenges })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read challenge catalog {}", path.display()))?;
        let entries: Vec<ChallengeEntry> =
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<DailyChallenge>> {
        self.challenges.iter().find(|c| c.id == id).cloned()
    }

    /// The newest challenge whose id is a date no later than `today`. Without
    /// one, undated challenges take turns day by day.
    pub fn for_date(&self, today: NaiveDate) -> Option<Arc<DailyChallenge>> {
        let dated = self
            .challenges
            .iter()
            .filter_map(|c| c.id.parse::<NaiveDate>().ok().map(|date| (date, c)))
            .filter(|(date, _)| *date <= today)
            .max_by_key(|(date, _)| *date)
            .map(|(_, c)| c.clone());
        if dated.is_some() {
            return dated;
        }

        let undated: Vec<_> = self
            .challenges
            .iter()
            .filter(|c| c.id.parse::<NaiveDate>().is_err())
            .collect();
        if undated.is_empty() {
            return self.challenges.first().cloned();
        }
        let day = today.num_days_from_ce().unsigned_abs() as usize;
        Some(undated[day % undated.len()].clone())
    }
}
