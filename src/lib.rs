//! Companion Voice - voice interaction core for a small companion robot
//!
//! This library provides the conversation loop of the robot:
//! - Audio device arbitration, wake word listening and utterance capture
//! - Speech recognition and synthesis with provider fallback
//! - Dialogue, emotion analysis and emotion-driven movement
//! - Connectivity checks and persisted dialogue history
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Orchestrator                       │
//! │  AwakeWaiting → Capturing → Processing → Speaking    │
//! └───────┬──────────────┬──────────────┬───────────────┘
//!         │              │              │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────────┐
//! │    Voice     │ │  Dialogue  │ │ Emotion / Movement │
//! │ Arbiter  STT │ │   Memory   │ │      Safety        │
//! │ Wake     TTS │ │            │ │                    │
//! └──────────────┘ └────────────┘ └────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod dialogue;
pub mod emotion;
pub mod error;
pub mod memory;
pub mod movement;
pub mod orchestrator;
pub mod safety;
pub mod voice;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use orchestrator::{ConversationState, Orchestrator, OrchestratorHandle};
