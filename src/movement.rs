//! Movement executor interface

use async_trait::async_trait;

use crate::Result;
use crate::emotion::EmotionalState;

/// Movement pattern that is always allowed
pub const STOP_PATTERN: &str = "stop";

/// Movement pattern request for the body
#[derive(Debug, Clone, PartialEq)]
pub struct MovementCommand {
    /// Pattern tag, e.g. `bouncy_intense`
    pub pattern: String,
    /// Speed scalar, executor units
    pub speed: f32,
}

impl MovementCommand {
    #[must_use]
    pub fn new(pattern: impl Into<String>, speed: f32) -> Self {
        Self {
            pattern: pattern.into(),
            speed,
        }
    }

    /// Command expressing an emotional state
    ///
    /// Speed starts from the emotion's speed and scales with intensity
    /// between half and full.
    #[must_use]
    pub fn for_state(state: &EmotionalState, default_speed: f32) -> Self {
        let base = state.primary.movement_speed(default_speed);
        Self::new(
            state.movement_pattern.clone(),
            base * state.intensity.mul_add(0.5, 0.5),
        )
    }

    #[must_use]
    pub fn stop() -> Self {
        Self::new(STOP_PATTERN, 0.0)
    }

    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.pattern == STOP_PATTERN
    }
}

/// Something that physically realizes movement patterns
#[async_trait]
pub trait MovementExecutor: Send + Sync {
    /// Perform `command`
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot perform the command
    async fn execute(&self, command: &MovementCommand) -> Result<()>;
}

/// Executor that only logs, for hosts without a body
#[derive(Debug, Default)]
pub struct LoggingMovement;

#[async_trait]
impl MovementExecutor for LoggingMovement {
    async fn execute(&self, command: &MovementCommand) -> Result<()> {
        tracing::info!(pattern = %command.pattern, speed = command.speed, "movement");
        Ok(())
    }
}
