pub mod daily_challenge;
pub mod health;
