// Rating, cooldown and achievement engine for club and tournament play.

pub mod achievements;
pub mod api;
pub mod calendar;
pub mod competition;
pub mod config;
pub mod cooldown;
pub mod elo;
pub mod engine;
pub mod error;
pub mod history;
pub mod k_factor;
pub mod matches;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod season;
pub mod stats;
pub mod store;
pub mod tier;
pub mod trophies;

pub use engine::Engine;
pub use error::{EngineError, Result};
