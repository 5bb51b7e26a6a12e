//! Conversation state machine

use std::time::Instant;

/// Where the orchestrator is in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationState {
    /// Not running
    #[default]
    Idle,
    /// Listening for the wake word
    AwakeWaiting,
    /// Recording the user's utterance
    Capturing,
    /// Recognizing and producing a reply
    Processing,
    /// Reply is being synthesized and played
    Speaking,
}

impl ConversationState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwakeWaiting => "awake_waiting",
            Self::Capturing => "capturing",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        }
    }

    /// Whether moving from `self` to `next` is part of the state machine
    ///
    /// Any state may stop to `Idle`. Active states may fall back to
    /// `AwakeWaiting` on timeout, session end, or failure, and may return to
    /// `Capturing` for the next turn.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Idle)
                | (Self::Idle, Self::AwakeWaiting)
                | (Self::AwakeWaiting, Self::Capturing)
                | (Self::Capturing, Self::Processing)
                | (Self::Processing, Self::Speaking)
                | (
                    Self::Processing | Self::Speaking,
                    Self::Capturing
                )
                | (
                    Self::Capturing | Self::Processing | Self::Speaking,
                    Self::AwakeWaiting
                )
        )
    }

    /// Whether a conversation session is in progress
    #[must_use]
    pub const fn in_session(self) -> bool {
        matches!(self, Self::Capturing | Self::Processing | Self::Speaking)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change, published to subscribers in order
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConversationState,
    pub to: ConversationState,
    /// Short cause, e.g. `wake_word` or `idle_timeout`
    pub reason: &'static str,
    pub at: Instant,
}
