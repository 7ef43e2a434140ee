//! Player sessions, stored client-side in signed cookies.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chess_core::challenge::{PlayerGameState, PlayerSessionContent, PlayerStats, SESSION_ENCODING_VERSION};
use chrono::{Duration, Utc};
use cookie::{Cookie, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "pc";
pub const STATS_COOKIE: &str = "ps";

#[derive(Debug, thiserror::Error)]
pub enum SessionIntegrityError {
    #[error("invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("unsupported session encoding version {0}")]
    EncodingVersion(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims<T> {
    data: T,
    exp: i64,
}

/// Where session content lives between requests.
pub trait SessionStore: Send + Sync {
    /// `None` when there is no usable session. Never fails the request.
    fn load(&self, raw: &str) -> Option<PlayerSessionContent>;

    /// The value to hand back to the client.
    fn persist(&self, content: &PlayerSessionContent) -> Result<String, AppError>;
}

/// HS256 tokens with an expiry, one per cookie.
#[derive(Clone)]
pub struct SignedCookieStore {
    secret: String,
    max_age_days: i64,
}

impl SignedCookieStore {
    pub fn new(secret: impl Into<String>, max_age_days: i64) -> Self {
        Self {
            secret: secret.into(),
            max_age_days,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.secret_key.clone(), config.session_max_age_days)
    }

    pub fn max_age_days(&self) -> i64 {
        self.max_age_days
    }

    pub fn sign<T: Serialize>(&self, data: &T) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = Utc::now() + Duration::days(self.max_age_days);
        let claims = Claims {
            data,
            exp: expiration.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    pub fn verify<T: DeserializeOwned>(&self, raw: &str) -> Result<T, SessionIntegrityError> {
        let data = decode::<Claims<T>>(
            raw,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims.data)
    }

    /// Stats from their own cookie. A bad cookie means starting over from zero.
    pub fn load_stats(&self, raw: Option<&str>) -> PlayerStats {
        let Some(raw) = raw else {
            return PlayerStats::default();
        };
        match self.verify(raw) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding player stats cookie");
                PlayerStats::default()
            }
        }
    }

    pub fn persist_stats(&self, stats: &PlayerStats) -> Result<String, AppError> {
        self.sign(stats)
            .map_err(|e| AppError::Internal(format!("Could not sign player stats: {e}")))
    }
}

impl SessionStore for SignedCookieStore {
    fn load(&self, raw: &str) -> Option<PlayerSessionContent> {
        let verified = self.verify::<PlayerSessionContent>(raw).and_then(|content| {
            if content.encoding_version == SESSION_ENCODING_VERSION {
                Ok(content)
            } else {
                Err(SessionIntegrityError::EncodingVersion(content.encoding_version))
            }
        });
        match verified {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding session cookie");
                None
            }
        }
    }

    fn persist(&self, content: &PlayerSessionContent) -> Result<String, AppError> {
        self.sign(content)
            .map_err(|e| AppError::Internal(format!("Could not sign session: {e}")))
    }
}

/// One request's view of a player's session for a single challenge.
pub struct ChallengeSession {
    store: Arc<dyn SessionStore>,
    challenge_id: String,
    content: PlayerSessionContent,
}

impl ChallengeSession {
    pub fn load(store: Arc<dyn SessionStore>, raw: Option<&str>, challenge_id: impl Into<String>) -> Self {
        let content = raw.and_then(|raw| store.load(raw)).unwrap_or_default();
        Self {
            store,
            challenge_id: challenge_id.into(),
            content,
        }
    }

    pub fn challenge_id(&self) -> &str {
        &self.challenge_id
    }

    /// The attempt for this challenge, and whether it had to be created.
    ///
    /// A created state is kept for the rest of the request, so asking again
    /// returns it with `false`.
    pub fn load_or_create(&mut self, seed: impl FnOnce() -> PlayerGameState) -> (PlayerGameState, bool) {
        if let Some(state) = self.content.game(&self.challenge_id) {
            return (state.clone(), false);
        }
        let state = seed();
        self.content.games.insert(self.challenge_id.clone(), state.clone());
        (state, true)
    }

    /// Replace the whole stored content with `state` and sign it.
    pub fn persist(&mut self, state: PlayerGameState) -> Result<String, AppError> {
        self.content = PlayerSessionContent::with_game(&self.challenge_id, state);
        self.store.persist(&self.content)
    }
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

pub fn build_cookie(name: &'static str, value: String, max_age_days: i64) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::days(max_age_days))
        .build()
}
