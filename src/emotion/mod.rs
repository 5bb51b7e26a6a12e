//! Emotion engine
//!
//! Scores assistant replies against a [`Lexicon`] to pick a primary emotion
//! and intensity, keeps the current [`EmotionalState`], decays it over time
//! and maps it to a movement pattern tag.

mod lexicon;

pub use lexicon::{EmotionRule, Lexicon, repeated_runs};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Minimum score for a non-neutral emotion to become primary
const PRIMARY_THRESHOLD: f32 = 0.3;

/// Minimum score for an emotion to be listed as secondary
const SECONDARY_THRESHOLD: f32 = 0.2;

/// Intensity below which a decaying emotion settles to neutral
const NEUTRAL_FLOOR: f32 = 0.1;

/// Intensity given to neutral analysis results
const NEUTRAL_INTENSITY: f32 = 0.5;

/// Emotions kept for trend detection
const TREND_WINDOW: usize = 10;

/// Trigger tokens kept per state
const MAX_TRIGGERS: usize = 5;

/// Decay rate per second without a dominant trend
pub const DEFAULT_DECAY_RATE: f32 = 0.1;

const POSITIVE_DECAY_RATE: f32 = 0.05;
const NEGATIVE_DECAY_RATE: f32 = 0.15;

/// Emotion categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Excited,
    Sad,
    Confused,
    Thinking,
    Neutral,
    Angry,
    Surprised,
}

impl Emotion {
    /// Every emotion, in declaration order
    pub const ALL: [Self; 8] = [
        Self::Happy,
        Self::Excited,
        Self::Sad,
        Self::Confused,
        Self::Thinking,
        Self::Neutral,
        Self::Angry,
        Self::Surprised,
    ];

    /// Lowercase label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Excited => "excited",
            Self::Sad => "sad",
            Self::Confused => "confused",
            Self::Thinking => "thinking",
            Self::Neutral => "neutral",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
        }
    }

    /// Parse a label (case-insensitive)
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|e| e.as_str() == label)
    }

    /// Movement pattern family for this emotion
    #[must_use]
    pub const fn base_pattern(self) -> &'static str {
        match self {
            Self::Happy => "bouncy",
            Self::Excited => "energetic",
            Self::Sad => "slow",
            Self::Confused => "hesitant",
            Self::Thinking => "gentle_sway",
            Self::Neutral => "default",
            Self::Angry => "sharp",
            Self::Surprised => "sudden",
        }
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::Happy | Self::Excited)
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        matches!(self, Self::Sad | Self::Angry)
    }

    /// Movement speed for this emotion, `default` for the rest
    #[must_use]
    pub const fn movement_speed(self, default: f32) -> f32 {
        match self {
            Self::Happy => 30.0,
            Self::Excited => 40.0,
            Self::Sad => 20.0,
            Self::Confused => 25.0,
            Self::Thinking => 15.0,
            Self::Neutral | Self::Angry | Self::Surprised => default,
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an emotion and intensity to a movement pattern tag
///
/// Neutral and anything at or below 0.3 map to `"default"`.
#[must_use]
pub fn movement_tag(emotion: Emotion, intensity: f32) -> String {
    if emotion == Emotion::Neutral {
        return "default".to_string();
    }
    let suffix = if intensity > 0.8 {
        "intense"
    } else if intensity > 0.6 {
        "moderate"
    } else if intensity > 0.3 {
        "gentle"
    } else {
        return "default".to_string();
    };
    format!("{}_{suffix}", emotion.base_pattern())
}

/// Current emotional state of the companion
#[derive(Debug, Clone)]
pub struct EmotionalState {
    pub primary: Emotion,
    /// Always within [0, 1]
    pub intensity: f32,
    /// Intensity lost per second
    pub decay_rate: f32,
    /// Last explicit update
    pub updated_at: Instant,
    pub movement_pattern: String,
    /// Lexicon tokens that produced this state
    pub triggers: Vec<String>,
    /// Other emotions present with their normalized strength
    pub secondary: Vec<(Emotion, f32)>,
}

impl EmotionalState {
    /// A state with no triggers or secondary emotions
    #[must_use]
    pub fn new(primary: Emotion, intensity: f32) -> Self {
        let intensity = intensity.clamp(0.0, 1.0);
        Self {
            primary,
            intensity,
            decay_rate: DEFAULT_DECAY_RATE,
            updated_at: Instant::now(),
            movement_pattern: movement_tag(primary, intensity),
            triggers: Vec::new(),
            secondary: Vec::new(),
        }
    }

    #[must_use]
    pub fn neutral() -> Self {
        Self::new(Emotion::Neutral, NEUTRAL_INTENSITY)
    }

    /// Apply `elapsed` worth of decay
    ///
    /// Intensity never increases. Neutral states do not decay.
    pub fn decay(&mut self, elapsed: Duration) {
        if self.primary == Emotion::Neutral {
            return;
        }

        self.intensity = (self.intensity - self.decay_rate * elapsed.as_secs_f32()).max(0.0);
        if self.intensity < NEUTRAL_FLOOR {
            self.primary = Emotion::Neutral;
            self.triggers.clear();
            self.secondary.clear();
        }
        self.movement_pattern = movement_tag(self.primary, self.intensity);
    }
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self::neutral()
    }
}

struct EngineState {
    current: EmotionalState,
    last_decay: Instant,
    history: VecDeque<Emotion>,
}

/// Emotion analysis and the shared current state
pub struct EmotionEngine {
    lexicon: Lexicon,
    state: Mutex<EngineState>,
}

impl EmotionEngine {
    #[must_use]
    pub fn new(lexicon: Lexicon) -> Self {
        Self {
            lexicon,
            state: Mutex::new(EngineState {
                current: EmotionalState::neutral(),
                last_decay: Instant::now(),
                history: VecDeque::with_capacity(TREND_WINDOW),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Analyze reply text without touching the current state
    #[must_use]
    pub fn analyze(&self, text: &str) -> EmotionalState {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return EmotionalState::neutral();
        }

        let mut scores: Vec<(Emotion, f32)> = Vec::new();
        for rule in self.lexicon.rules() {
            let score = rule.score(&text);
            match scores.iter_mut().find(|(e, _)| *e == rule.emotion) {
                Some((_, total)) => *total += score,
                None => scores.push((rule.emotion, score)),
            }
        }

        let (primary, score) = scores
            .iter()
            .copied()
            .fold(None, |best: Option<(Emotion, f32)>, (e, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((e, s)),
            })
            .filter(|(_, s)| *s >= PRIMARY_THRESHOLD)
            .unwrap_or((Emotion::Neutral, NEUTRAL_INTENSITY));

        let mut state = EmotionalState::new(primary, self.intensity(&text, score));
        state.secondary = scores
            .iter()
            .filter(|(e, s)| *e != primary && *s > SECONDARY_THRESHOLD)
            .map(|(e, s)| (*e, (s / 3.0).min(0.8)))
            .collect();
        state.triggers = self
            .lexicon
            .rules()
            .iter()
            .filter(|r| r.emotion == primary)
            .flat_map(|r| r.triggers(&text))
            .take(MAX_TRIGGERS)
            .collect();

        tracing::debug!(
            emotion = %state.primary,
            intensity = state.intensity,
            triggers = ?state.triggers,
            "reply emotion analyzed"
        );
        state
    }

    #[allow(clippy::cast_precision_loss)]
    fn intensity(&self, text: &str, score: f32) -> f32 {
        let mut intensity = (score / 2.0).min(1.0);
        intensity *= self.lexicon.modifier_product(text);

        let runs = repeated_runs(text);
        if runs > 0 {
            intensity *= 1.0 + runs as f32 * 0.2;
        }

        let exclamations = text.chars().filter(|c| matches!(c, '!' | '！')).count();
        if exclamations > 0 {
            intensity *= 1.0 + exclamations as f32 * 0.1;
        }

        intensity.clamp(NEUTRAL_FLOOR, 1.0)
    }

    /// Replace the current state
    ///
    /// The state's decay rate is set from the recent emotional trend and its
    /// timestamp is refreshed.
    pub fn update(&self, mut state: EmotionalState) {
        let mut inner = self.lock();

        if inner.history.len() == TREND_WINDOW {
            inner.history.pop_front();
        }
        inner.history.push_back(state.primary);

        state.decay_rate = trend_decay_rate(&inner.history);
        state.intensity = state.intensity.clamp(0.0, 1.0);
        state.movement_pattern = movement_tag(state.primary, state.intensity);
        state.updated_at = Instant::now();

        tracing::info!(
            emotion = %state.primary,
            intensity = state.intensity,
            decay_rate = state.decay_rate,
            "emotional state updated"
        );

        inner.current = state;
        inner.last_decay = Instant::now();
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn current(&self) -> EmotionalState {
        self.lock().current.clone()
    }

    /// Decay the current state by `elapsed`, returning the result
    pub fn decay_by(&self, elapsed: Duration) -> EmotionalState {
        let mut inner = self.lock();
        inner.current.decay(elapsed);
        inner.last_decay = Instant::now();
        inner.current.clone()
    }

    /// Decay by the time since the previous decay or update
    pub fn decay_tick(&self) -> EmotionalState {
        let mut inner = self.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_decay);
        inner.current.decay(elapsed);
        inner.last_decay = now;
        inner.current.clone()
    }

    /// Movement pattern tag for the current state
    #[must_use]
    pub fn movement_pattern(&self) -> String {
        self.lock().current.movement_pattern.clone()
    }

    /// Emotions recorded by recent updates, oldest first
    #[must_use]
    pub fn recent_emotions(&self) -> Vec<Emotion> {
        self.lock().history.iter().copied().collect()
    }

    /// Run [`Self::decay_tick`] every `period` until the task is aborted
    pub fn spawn_decay_ticker(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = period.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let state = engine.decay_tick();
                tracing::trace!(
                    emotion = %state.primary,
                    intensity = state.intensity,
                    "emotion decayed"
                );
            }
        })
    }
}

impl Default for EmotionEngine {
    fn default() -> Self {
        Self::new(Lexicon::builtin())
    }
}

/// Decay rate for the dominant emotion in `history`
///
/// Ties go to the emotion seen first.
fn trend_decay_rate(history: &VecDeque<Emotion>) -> f32 {
    let mut counts: Vec<(Emotion, usize)> = Vec::new();
    for emotion in history {
        match counts.iter_mut().find(|(e, _)| e == emotion) {
            Some((_, n)) => *n += 1,
            None => counts.push((*emotion, 1)),
        }
    }

    let dominant = counts
        .iter()
        .fold(None, |best: Option<(Emotion, usize)>, &(e, n)| match best {
            Some((_, b)) if b >= n => best,
            _ => Some((e, n)),
        });

    match dominant {
        Some((e, _)) if e.is_positive() => POSITIVE_DECAY_RATE,
        Some((e, _)) if e.is_negative() => NEGATIVE_DECAY_RATE,
        _ => DEFAULT_DECAY_RATE,
    }
}
