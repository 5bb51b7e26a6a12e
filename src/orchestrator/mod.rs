//! Conversation orchestrator
//!
//! A single control task owns the [`ConversationState`]. Wake word
//! detections, forced wakes and stop requests arrive as messages on one
//! channel; the listener thread never touches state directly.
//!
//! A session runs turns of capture, recognize, reply and speak until the
//! user says goodbye, the idle timeout passes, or the turn limit is hit.
//! Every audio device hand-off goes through the [`AudioArbiter`].

mod state;

pub use state::{ConversationState, StateTransition};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::dialogue::{DialogueEngine, DialogueReply};
use crate::emotion::{Emotion, EmotionEngine};
use crate::memory::{DialogueContext, MemoryStore};
use crate::movement::{MovementCommand, MovementExecutor};
use crate::safety::SafetyMonitor;
use crate::voice::{
    AudioArbiter, AudioOwner, ListenerOptions, OwnershipEvent, OwnershipGuard, PlaybackOutcome,
    RecognizerChain, SourceFactory, SpeechQueue, UtteranceSource, WakeWordEngine,
    WakeWordListener,
};
use crate::{Error, Result};

/// Capacity of the transition broadcast channel
const TRANSITION_CAPACITY: usize = 64;

/// Extra time allowed on top of listen + phrase limits for one capture
const CAPTURE_GRACE: Duration = Duration::from_secs(2);

/// Wake events retried this many times while the device is busy
const MAX_WAKE_RETRIES: u32 = 10;

/// Timing and wording for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wait for speech onset per turn
    pub listen_timeout: Duration,
    /// Silence that ends the whole session
    pub idle_timeout: Duration,
    /// Replies per session
    pub max_turns: u32,
    /// Wake listener heartbeat check interval
    pub watchdog_interval: Duration,
    /// Maximum utterance length
    pub phrase_time_limit: Duration,
    /// Bounded wait for the wake listener to confirm a pause
    pub pause_timeout: Duration,
    /// Attempts to take the device before giving up on a transition
    pub claim_attempts: u32,
    /// Wait between device attempts
    pub claim_backoff: Duration,
    /// Delay before a wake event refused for a busy device is retried
    pub busy_retry_delay: Duration,
    /// Emotion decay tick
    pub decay_tick: Duration,
    /// Base speed for movement commands
    pub movement_speed: f32,
    /// Spoken after the wake word, before the first capture
    pub wake_reply: Option<String>,
    /// Spoken when the user says goodbye
    pub farewell_reply: String,
    /// Spoken when the session ends on timeout or turn limit
    pub rest_reply: String,
    /// Lowercased phrases that end the session
    pub goodbye_phrases: Vec<String>,
}

impl OrchestratorSettings {
    /// Settings from the loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let conv = &config.conversation;
        Self {
            listen_timeout: conv.listen_timeout(),
            idle_timeout: conv.idle_timeout(),
            max_turns: conv.max_turns_per_session,
            watchdog_interval: conv.watchdog_interval(),
            phrase_time_limit: conv.phrase_time_limit(),
            wake_reply: Some(conv.wake_reply.clone()).filter(|r| !r.trim().is_empty()),
            farewell_reply: conv.farewell_reply.clone(),
            rest_reply: conv.rest_reply.clone(),
            goodbye_phrases: conv.goodbye_phrases.iter().map(|p| p.to_lowercase()).collect(),
            decay_tick: Duration::from_millis(config.emotion.decay_tick_ms),
            movement_speed: config.emotion.movement_speed,
            ..Self::default()
        }
    }

    /// Reject values the control task cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("listen_timeout", self.listen_timeout),
            ("idle_timeout", self.idle_timeout),
            ("watchdog_interval", self.watchdog_interval),
            ("phrase_time_limit", self.phrase_time_limit),
            ("decay_tick", self.decay_tick),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("{name} must be positive")));
        }
        if self.max_turns == 0 {
            return Err(Error::Config("max_turns must be positive".to_string()));
        }
        Ok(())
    }

    fn is_goodbye(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.goodbye_phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_secs(8),
            idle_timeout: Duration::from_secs(30),
            max_turns: 5,
            watchdog_interval: Duration::from_secs(60),
            phrase_time_limit: Duration::from_secs(10),
            pause_timeout: Duration::from_secs(2),
            claim_attempts: 50,
            claim_backoff: Duration::from_millis(100),
            busy_retry_delay: Duration::from_millis(500),
            decay_tick: Duration::from_secs(1),
            movement_speed: 30.0,
            wake_reply: None,
            farewell_reply: String::new(),
            rest_reply: String::new(),
            goodbye_phrases: Vec::new(),
        }
    }
}

/// Wake word engine and audio input for the listener thread
pub struct WakeSetup {
    pub engine: Box<dyn WakeWordEngine>,
    pub source: SourceFactory,
    pub options: ListenerOptions,
}

/// Everything the orchestrator drives
pub struct Components {
    pub arbiter: Arc<AudioArbiter>,
    /// Wake word listening; without it only [`OrchestratorHandle::force_wake`] starts sessions
    pub wake: Option<WakeSetup>,
    pub capture: Arc<dyn UtteranceSource>,
    pub recognizer: Arc<RecognizerChain>,
    pub dialogue: Arc<dyn DialogueEngine>,
    pub emotion: Arc<EmotionEngine>,
    pub speech: Arc<SpeechQueue>,
    pub safety: Arc<dyn SafetyMonitor>,
    pub movement: Arc<dyn MovementExecutor>,
    pub memory: Arc<dyn MemoryStore>,
}

#[derive(Debug)]
enum ControlEvent {
    WakeWordDetected { keyword_index: i32, attempt: u32 },
    ForceWake { attempt: u32 },
    Stop,
}

impl ControlEvent {
    const fn retry(&self) -> Option<Self> {
        match *self {
            Self::WakeWordDetected {
                keyword_index,
                attempt,
            } => Some(Self::WakeWordDetected {
                keyword_index,
                attempt: attempt + 1,
            }),
            Self::ForceWake { attempt } => Some(Self::ForceWake {
                attempt: attempt + 1,
            }),
            Self::Stop => None,
        }
    }
}

/// Why a session ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Goodbye,
    IdleTimeout,
    MaxTurns,
}

/// Conversation orchestrator entry point
pub struct Orchestrator;

impl Orchestrator {
    /// Start the control task, moving from `Idle` to `AwakeWaiting`
    ///
    /// # Errors
    ///
    /// Returns error if `settings` are invalid or the wake word listener
    /// cannot be started
    pub fn start(components: Components, settings: OrchestratorSettings) -> Result<OrchestratorHandle> {
        settings.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConversationState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        let Components {
            arbiter,
            wake,
            capture,
            recognizer,
            dialogue,
            emotion,
            speech,
            safety,
            movement,
            memory,
        } = components;

        let listener = match wake {
            Some(setup) => {
                let tx = events_tx.clone();
                let listener = WakeWordListener::spawn(
                    setup.engine,
                    setup.source,
                    setup.options,
                    move |keyword_index| {
                        let _ = tx.send(ControlEvent::WakeWordDetected {
                            keyword_index,
                            attempt: 0,
                        });
                    },
                )?;
                Some(Arc::new(listener))
            }
            None => None,
        };

        let decay_ticker = emotion.spawn_decay_ticker(settings.decay_tick);

        let core = Arc::new(Core {
            arbiter: Arc::clone(&arbiter),
            listener,
            capture,
            recognizer,
            dialogue,
            emotion,
            speech,
            safety,
            movement,
            memory,
            settings,
            state: state_tx,
            transitions: transitions.clone(),
            events: events_tx.clone(),
            wake_guard: Mutex::new(None),
        });

        let task = tokio::spawn(async move {
            run_control_loop(core, events_rx).await;
            decay_ticker.abort();
        });

        Ok(OrchestratorHandle {
            events: events_tx,
            state: state_rx,
            transitions,
            arbiter,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Control surface of a running orchestrator
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
    state: watch::Receiver<ConversationState>,
    transitions: broadcast::Sender<StateTransition>,
    arbiter: Arc<AudioArbiter>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestratorHandle {
    /// Start a session as if the wake word had been heard
    pub fn force_wake(&self) {
        if self.events.send(ControlEvent::ForceWake { attempt: 0 }).is_err() {
            tracing::warn!("orchestrator is not running");
        }
    }

    /// Current conversation state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Watch the conversation state
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Receive every state transition
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Receive audio ownership changes
    #[must_use]
    pub fn subscribe_audio(&self) -> broadcast::Receiver<OwnershipEvent> {
        self.arbiter.subscribe()
    }

    /// Wait until the state equals `target`; `false` on timeout
    pub async fn wait_for_state(&self, target: ConversationState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        )
    }

    /// Stop from any state and wait for the control task to finish
    pub async fn stop(&self) {
        let _ = self.events.send(ControlEvent::Stop);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "orchestrator task panicked");
        }
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        let _ = self.events.send(ControlEvent::Stop);
    }
}

struct Core {
    arbiter: Arc<AudioArbiter>,
    listener: Option<Arc<WakeWordListener>>,
    capture: Arc<dyn UtteranceSource>,
    recognizer: Arc<RecognizerChain>,
    dialogue: Arc<dyn DialogueEngine>,
    emotion: Arc<EmotionEngine>,
    speech: Arc<SpeechQueue>,
    safety: Arc<dyn SafetyMonitor>,
    movement: Arc<dyn MovementExecutor>,
    memory: Arc<dyn MemoryStore>,
    settings: OrchestratorSettings,
    state: watch::Sender<ConversationState>,
    transitions: broadcast::Sender<StateTransition>,
    events: mpsc::UnboundedSender<ControlEvent>,
    /// Held while the wake detector owns the device
    wake_guard: Mutex<Option<OwnershipGuard>>,
}

async fn run_control_loop(core: Arc<Core>, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
    core.transition(ConversationState::AwakeWaiting, "start");
    core.arm_wake_detector().await;

    let mut watchdog = tokio::time::interval(core.settings.watchdog_interval);
    watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    watchdog.tick().await;
    let mut last_heartbeat = core.listener.as_ref().map_or(0, |l| l.heartbeat());

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = watchdog.tick() => {
                last_heartbeat = core.check_listener(last_heartbeat);
                continue;
            }
        };

        let event = match event {
            None | Some(ControlEvent::Stop) => break,
            Some(event) => event,
        };
        let keyword_index = match event {
            ControlEvent::WakeWordDetected { keyword_index, .. } => Some(keyword_index),
            _ => None,
        };

        if core.current_state() != ConversationState::AwakeWaiting {
            tracing::debug!(state = %core.current_state(), "wake ignored outside awake_waiting");
            continue;
        }

        if core.device_busy() {
            core.retry_later(&event);
            continue;
        }

        // Stop must interrupt a session at any await point
        let session = core.run_session(keyword_index);
        tokio::pin!(session);
        let stopped = loop {
            tokio::select! {
                () = &mut session => break false,
                event = events.recv() => match event {
                    None | Some(ControlEvent::Stop) => break true,
                    Some(other) => tracing::debug!(event = ?other, "event ignored during session"),
                },
            }
        };

        if stopped {
            break;
        }
        // The listener was paused for the session; give it a full interval
        watchdog.reset();
        last_heartbeat = core.listener.as_ref().map_or(0, |l| l.heartbeat());
    }

    core.shutdown().await;
}

impl Core {
    fn current_state(&self) -> ConversationState {
        *self.state.borrow()
    }

    fn transition(&self, to: ConversationState, reason: &'static str) {
        let from = self.current_state();
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::warn!(%from, %to, reason, "unexpected state transition");
        }

        self.state.send_replace(to);
        let _ = self.transitions.send(StateTransition {
            from,
            to,
            reason,
            at: Instant::now(),
        });
        tracing::info!(%from, %to, reason, "conversation state changed");
    }

    /// Whether someone other than the wake detector holds the device
    fn device_busy(&self) -> bool {
        !matches!(
            self.arbiter.current(),
            AudioOwner::None | AudioOwner::WakeDetector
        )
    }

    fn retry_later(&self, event: &ControlEvent) {
        let Some(retry) = event.retry() else { return };
        let attempt = match retry {
            ControlEvent::WakeWordDetected { attempt, .. } | ControlEvent::ForceWake { attempt } => {
                attempt
            }
            ControlEvent::Stop => return,
        };
        if attempt > MAX_WAKE_RETRIES {
            tracing::warn!(owner = %self.arbiter.current(), "audio device stayed busy, wake dropped");
            return;
        }

        tracing::debug!(owner = %self.arbiter.current(), attempt, "audio device busy, wake queued");
        let events = self.events.clone();
        let delay = self.settings.busy_retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(retry);
        });
    }

    /// Take the device for the wake detector and resume listening
    async fn arm_wake_detector(&self) {
        match self
            .arbiter
            .claim(
                AudioOwner::WakeDetector,
                self.settings.claim_attempts,
                self.settings.claim_backoff,
            )
            .await
        {
            Ok(guard) => {
                *self.wake_guard.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
            }
            Err(e) => {
                tracing::error!(error = %e, "wake detector could not take the audio device");
                return;
            }
        }

        if let Some(listener) = &self.listener {
            listener.resume();
        }
        tracing::info!("listening for wake word");
    }

    /// Pause the listener and give the device back
    async fn disarm_wake_detector(&self) {
        if let Some(listener) = &self.listener
            && let Err(e) = listener.pause(self.settings.pause_timeout).await
        {
            tracing::warn!(error = %e, "wake word listener did not confirm pause");
        }
        let guard = self
            .wake_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(guard);
    }

    fn check_listener(&self, last_heartbeat: u64) -> u64 {
        let Some(listener) = &self.listener else {
            return last_heartbeat;
        };
        if !listener.is_alive() {
            tracing::error!("wake word listener thread is gone");
            return last_heartbeat;
        }

        let heartbeat = listener.heartbeat();
        if self.current_state() == ConversationState::AwakeWaiting
            && !listener.is_paused()
            && heartbeat == last_heartbeat
        {
            tracing::warn!(heartbeat, "wake word listener stalled, restarting stream");
            listener.restart();
        }
        heartbeat
    }

    async fn run_session(&self, keyword_index: Option<i32>) {
        let session_id = Uuid::new_v4();
        tracing::info!(session = %session_id, ?keyword_index, "conversation session started");

        let end = self.converse(session_id).await;

        match end {
            Ok(end) => {
                tracing::info!(session = %session_id, ?end, "conversation session ended");
                self.finish_session(end).await;
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "conversation session failed");
                self.arbiter.force_release();
                self.transition(ConversationState::AwakeWaiting, "error");
            }
        }

        self.arm_wake_detector().await;
    }

    async fn converse(&self, session_id: Uuid) -> Result<SessionEnd> {
        self.disarm_wake_detector().await;

        if let Some(reply) = &self.settings.wake_reply {
            let outcome = self.speech.enqueue_priority(reply.clone()).wait().await;
            tracing::debug!(?outcome, "wake acknowledgement finished");
        }

        let mut turns: u32 = 0;
        let mut last_activity = Instant::now();

        loop {
            if turns >= self.settings.max_turns {
                return Ok(SessionEnd::MaxTurns);
            }
            let idle = last_activity.elapsed();
            if idle >= self.settings.idle_timeout {
                return Ok(SessionEnd::IdleTimeout);
            }

            let capture_guard = self
                .arbiter
                .claim(
                    AudioOwner::Capture,
                    self.settings.claim_attempts,
                    self.settings.claim_backoff,
                )
                .await?;
            self.transition(ConversationState::Capturing, "listen");

            let listen = self
                .settings
                .listen_timeout
                .min(self.settings.idle_timeout.saturating_sub(idle));
            let bound = listen + self.settings.phrase_time_limit + CAPTURE_GRACE;
            let captured = tokio::time::timeout(
                bound,
                self.capture.capture(listen, self.settings.phrase_time_limit),
            )
            .await;
            capture_guard.release();

            let utterance = match captured {
                Ok(Ok(Some(utterance))) => utterance,
                Ok(Ok(None)) => {
                    tracing::debug!(session = %session_id, turn = turns, "no speech");
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(session = %session_id, turn = turns, ?bound, "capture timed out");
                    continue;
                }
            };

            self.transition(ConversationState::Processing, "utterance");
            let recognized = self.recognizer.recognize(&utterance).await;
            if !recognized.success {
                tracing::debug!(session = %session_id, turn = turns, "nothing recognized");
                continue;
            }
            last_activity = Instant::now();

            let text = recognized.text;
            if self.settings.is_goodbye(&text) {
                return Ok(SessionEnd::Goodbye);
            }

            let reply = self.reply_for(&text).await;
            let emotion = self.express(&reply).await;

            if let Err(e) = self
                .memory
                .append(DialogueContext::new(
                    session_id,
                    text.as_str(),
                    reply.reply_text.as_str(),
                    emotion,
                ))
                .await
            {
                tracing::warn!(session = %session_id, error = %e, "failed to record turn");
            }

            self.transition(ConversationState::Speaking, "reply");
            let outcome = self.speech.enqueue(reply.reply_text).wait().await;
            if outcome != PlaybackOutcome::Played {
                tracing::warn!(session = %session_id, turn = turns, ?outcome, "reply was not played");
            }

            turns += 1;
            last_activity = Instant::now();
            tracing::debug!(session = %session_id, turn = turns, "turn complete");
        }
    }

    /// Ask the dialogue engine, falling back to a canned reply
    async fn reply_for(&self, text: &str) -> DialogueReply {
        if !self.safety.is_network_available().await {
            tracing::info!("network unavailable, using offline reply");
            return DialogueReply::text(self.safety.offline_response(text));
        }

        match self.dialogue.process(text).await {
            Ok(reply) if !reply.reply_text.trim().is_empty() => reply,
            Ok(_) => {
                tracing::warn!("dialogue engine returned an empty reply");
                DialogueReply::text(self.safety.offline_response(text))
            }
            Err(e) => {
                tracing::warn!(error = %e, "dialogue engine failed, using offline reply");
                if matches!(e, Error::Dialogue(_) | Error::Http(_) | Error::Timeout(_)) {
                    self.safety.report_network_failure();
                }
                DialogueReply::text(self.safety.offline_response(text))
            }
        }
    }

    /// Update the emotional state for `reply` and move accordingly
    async fn express(&self, reply: &DialogueReply) -> Emotion {
        let mut state = self.emotion.analyze(&reply.reply_text);
        if let Some(label) = reply.emotion_label.as_deref().and_then(Emotion::parse) {
            state.primary = label;
        }
        let emotion = state.primary;
        self.emotion.update(state);

        let command = MovementCommand::for_state(&self.emotion.current(), self.settings.movement_speed);
        if self.safety.is_movement_safe(&command) {
            if let Err(e) = self.movement.execute(&command).await {
                tracing::warn!(pattern = %command.pattern, error = %e, "movement failed");
            }
        } else {
            tracing::info!(pattern = %command.pattern, "movement skipped by safety monitor");
        }

        emotion
    }

    async fn finish_session(&self, end: SessionEnd) {
        let line = match end {
            SessionEnd::Goodbye => {
                self.transition(ConversationState::Speaking, "goodbye");
                &self.settings.farewell_reply
            }
            SessionEnd::MaxTurns => &self.settings.rest_reply,
            SessionEnd::IdleTimeout => {
                self.transition(ConversationState::AwakeWaiting, "idle_timeout");
                &self.settings.rest_reply
            }
        };

        if !line.trim().is_empty() {
            let outcome = self.speech.enqueue(line.clone()).wait().await;
            tracing::debug!(?outcome, "session closing line finished");
        }

        let reason = match end {
            SessionEnd::Goodbye => "goodbye",
            SessionEnd::MaxTurns => "max_turns",
            SessionEnd::IdleTimeout => "idle_timeout",
        };
        self.transition(ConversationState::AwakeWaiting, reason);
    }

    async fn shutdown(&self) {
        let drained = self.speech.drain();
        let guard = self
            .wake_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(guard);
        let previous = self.arbiter.force_release();
        self.transition(ConversationState::Idle, "stop");
        tracing::info!(drained, released = %previous, "orchestrator stopped");

        if let Some(listener) = &self.listener {
            let listener = Arc::clone(listener);
            if let Err(e) = tokio::task::spawn_blocking(move || listener.shutdown()).await {
                tracing::error!(error = %e, "wake word listener shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = Config::from_toml_str(
            r"
            [conversation]
            listen_timeout_s = 3
            max_turns_per_session = 2
            ",
        )
        .unwrap();
        let settings = OrchestratorSettings::from_config(&config);

        assert_eq!(settings.listen_timeout, Duration::from_secs(3));
        assert_eq!(settings.max_turns, 2);
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
        assert!(settings.wake_reply.is_some());
    }

    #[test]
    fn test_settings_validation() {
        assert!(OrchestratorSettings::default().validate().is_ok());

        let zero_watchdog = OrchestratorSettings {
            watchdog_interval: Duration::ZERO,
            ..OrchestratorSettings::default()
        };
        let err = zero_watchdog.validate().unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("watchdog_interval")));

        let zero_turns = OrchestratorSettings {
            max_turns: 0,
            ..OrchestratorSettings::default()
        };
        assert!(zero_turns.validate().is_err());

        let zero_tick = OrchestratorSettings {
            decay_tick: Duration::ZERO,
            ..OrchestratorSettings::default()
        };
        assert!(zero_tick.validate().is_err());
    }

    #[test]
    fn test_goodbye_detection() {
        let settings = OrchestratorSettings {
            goodbye_phrases: vec!["再见".to_string(), "bye".to_string()],
            ..OrchestratorSettings::default()
        };

        assert!(settings.is_goodbye("好的再见"));
        assert!(settings.is_goodbye("OK BYE"));
        assert!(!settings.is_goodbye("你好"));
    }

    #[test]
    fn test_wake_retry_increments_attempt() {
        let event = ControlEvent::WakeWordDetected {
            keyword_index: 0,
            attempt: 2,
        };
        assert!(matches!(
            event.retry(),
            Some(ControlEvent::WakeWordDetected { attempt: 3, .. })
        ));
        assert!(ControlEvent::Stop.retry().is_none());
    }
}
