//! Polymarket auto-trading bot library
//!
//! Two pillars:
//!
//! 1. **Credential fallback auth**: API credentials are derived by
//!    walking a fixed ladder of (signature type, L1 auth address)
//!    combinations, with error-driven branching, verification before
//!    persistence, and a structured auth story for diagnostics.
//!
//! 2. **Single-flight orchestration**: one trading cycle at a time over
//!    a shared read-only position snapshot, with five strategies run in
//!    a fixed order, each carrying its own cooldown state.

pub mod auth;
pub mod config;
pub mod orchestrator;
pub mod services;
pub mod strategies;
pub mod types;

pub use auth::{derive_credentials_with_fallback, ApiKeyCreds, AuthStoryBuilder, CredCache};
pub use config::Config;
pub use orchestrator::{CycleCounters, Orchestrator};
pub use services::{ClobClient, PositionTracker, ReauthGateway};
pub use strategies::Strategy;
pub use types::{OrderSide, Position, PositionKey, Side};
