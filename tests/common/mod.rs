//! Shared test utilities
//!
//! Fakes for every orchestrator collaborator so sessions run without audio
//! hardware or network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use companion_voice::dialogue::{DialogueEngine, DialogueReply};
use companion_voice::emotion::EmotionEngine;
use companion_voice::memory::InMemoryHistory;
use companion_voice::movement::{MovementCommand, MovementExecutor};
use companion_voice::orchestrator::{
    Components, ConversationState, Orchestrator, OrchestratorHandle, OrchestratorSettings,
    StateTransition, WakeSetup,
};
use companion_voice::safety::SafetyMonitor;
use companion_voice::voice::{
    AudioArbiter, AudioOwner, AudioSink, AudioSource, ListenerOptions, RecognizerChain,
    SourceFactory, SpeechBackend, SpeechQueue, SynthesisProvider, Utterance, UtteranceSource,
    WakeWordEngine,
};
use companion_voice::{Error, Result};

/// Half a second of quiet "speech" at 16kHz
#[must_use]
pub fn test_utterance() -> Utterance {
    Utterance::new(vec![0.1; 8000], 16000)
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Wait for a transition into `to` with the given reason
pub async fn wait_for_transition(
    rx: &mut broadcast::Receiver<StateTransition>,
    to: ConversationState,
    reason: &str,
    timeout: Duration,
) -> bool {
    let found = async {
        loop {
            match rx.recv().await {
                Ok(t) if t.to == to && t.reason == reason => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(timeout, found).await.unwrap_or(false)
}

/// Capture that replays a script, then waits out the listen timeout in silence
pub struct ScriptedCapture {
    script: Mutex<VecDeque<Option<Utterance>>>,
    always_speak: bool,
    failures: AtomicUsize,
    arbiter: Arc<AudioArbiter>,
    owners: Mutex<Vec<AudioOwner>>,
    calls: AtomicUsize,
}

impl ScriptedCapture {
    pub fn new(arbiter: Arc<AudioArbiter>, script: Vec<Option<Utterance>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            always_speak: false,
            failures: AtomicUsize::new(0),
            arbiter,
            owners: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every capture returns an utterance
    pub fn always_speaking(arbiter: Arc<AudioArbiter>) -> Self {
        Self {
            always_speak: true,
            ..Self::new(arbiter, Vec::new())
        }
    }

    /// The first `count` captures fail like an unplugged microphone
    pub fn failing(arbiter: Arc<AudioArbiter>, count: usize) -> Self {
        let capture = Self::new(arbiter, Vec::new());
        capture.failures.store(count, Ordering::SeqCst);
        capture
    }

    /// Device owner observed at each capture
    pub fn owners(&self) -> Vec<AudioOwner> {
        self.owners.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UtteranceSource for ScriptedCapture {
    async fn capture(
        &self,
        listen_timeout: Duration,
        _phrase_limit: Duration,
    ) -> Result<Option<Utterance>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.owners.lock().unwrap().push(self.arbiter.current());

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Audio("input device disappeared".to_string()));
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(entry) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(entry)
            }
            None if self.always_speak => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Some(test_utterance()))
            }
            None => {
                tokio::time::sleep(listen_timeout).await;
                Ok(None)
            }
        }
    }
}

/// Recognition backend returning scripted text, then a fixed default
pub struct FakeBackend {
    script: Mutex<VecDeque<String>>,
    default: String,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(default: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: default.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scripted(texts: &[&str], default: &str) -> Self {
        let backend = Self::new(default);
        backend
            .script
            .lock()
            .unwrap()
            .extend(texts.iter().map(ToString::to_string));
        backend
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(&self, _utterance: &Utterance) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.default.clone()))
    }
}

/// Backend that always fails
pub struct FailingBackend;

#[async_trait]
impl SpeechBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn transcribe(&self, _utterance: &Utterance) -> Result<String> {
        Err(Error::Stt("backend down".to_string()))
    }
}

/// Dialogue engine with a fixed reply or failure
pub struct FakeDialogue {
    reply: Option<DialogueReply>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl FakeDialogue {
    pub fn replying(text: &str) -> Self {
        Self::with_reply(DialogueReply::text(text))
    }

    pub fn with_reply(reply: DialogueReply) -> Self {
        Self {
            reply: Some(reply),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl DialogueEngine for FakeDialogue {
    async fn process(&self, text: &str) -> Result<DialogueReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(text.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::Dialogue("upstream unavailable".to_string()))
    }
}

/// Synthesizer recording each text with the conversation state at the time
#[derive(Default)]
pub struct RecordingSynth {
    spoken: Mutex<Vec<(String, ConversationState)>>,
    state: Mutex<Option<watch::Receiver<ConversationState>>>,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl RecordingSynth {
    /// Record states from `rx` from now on
    pub fn attach(&self, rx: watch::Receiver<ConversationState>) {
        *self.state.lock().unwrap() = Some(rx);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Never finish synthesizing, like a provider on a dead connection
    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<(String, ConversationState)> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.spoken().into_iter().map(|(text, _)| text).collect()
    }

    pub fn has_spoken(&self, text: &str) -> bool {
        self.spoken().iter().any(|(t, _)| t == text)
    }
}

#[async_trait]
impl SynthesisProvider for RecordingSynth {
    fn name(&self) -> &str {
        "recording"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Tts("synthesis down".to_string()));
        }
        if self.hang.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let state = self
            .state
            .lock()
            .unwrap()
            .as_ref()
            .map_or(ConversationState::Idle, |rx| *rx.borrow());
        self.spoken.lock().unwrap().push((text.to_string(), state));
        Ok(text.as_bytes().to_vec())
    }
}

/// Sink that records playback and detects overlapping calls
pub struct RecordingSink {
    arbiter: Arc<AudioArbiter>,
    delay: Duration,
    active: AtomicUsize,
    overlapped: AtomicBool,
    played: Mutex<Vec<String>>,
    owners: Mutex<Vec<AudioOwner>>,
    recording_paused: Mutex<Vec<bool>>,
}

impl RecordingSink {
    pub fn new(arbiter: Arc<AudioArbiter>, delay: Duration) -> Self {
        Self {
            arbiter,
            delay,
            active: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            played: Mutex::new(Vec::new()),
            owners: Mutex::new(Vec::new()),
            recording_paused: Mutex::new(Vec::new()),
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// Device owner observed during each playback
    pub fn owners(&self) -> Vec<AudioOwner> {
        self.owners.lock().unwrap().clone()
    }

    /// Recording-paused flag observed during each playback
    pub fn recording_paused(&self) -> Vec<bool> {
        self.recording_paused.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, audio: &[u8]) -> Result<()> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.owners.lock().unwrap().push(self.arbiter.current());
        self.recording_paused
            .lock()
            .unwrap()
            .push(self.arbiter.is_recording_paused());

        std::thread::sleep(self.delay);

        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(audio).into_owned());
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Safety monitor with a switchable network and a fixed offline reply
pub struct FakeSafety {
    online: AtomicBool,
    reply: String,
    offline_calls: Mutex<Vec<String>>,
    failures: AtomicUsize,
}

impl FakeSafety {
    pub fn new(online: bool, reply: &str) -> Self {
        Self {
            online: AtomicBool::new(online),
            reply: reply.to_string(),
            offline_calls: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn offline_calls(&self) -> Vec<String> {
        self.offline_calls.lock().unwrap().clone()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SafetyMonitor for FakeSafety {
    async fn is_network_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_movement_safe(&self, _command: &MovementCommand) -> bool {
        true
    }

    fn offline_response(&self, text: &str) -> String {
        self.offline_calls.lock().unwrap().push(text.to_string());
        self.reply.clone()
    }

    fn report_network_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Movement executor that records commands
#[derive(Default)]
pub struct RecordingMovement {
    commands: Mutex<Vec<MovementCommand>>,
}

impl RecordingMovement {
    pub fn commands(&self) -> Vec<MovementCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl MovementExecutor for RecordingMovement {
    async fn execute(&self, command: &MovementCommand) -> Result<()> {
        self.commands.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// Silent 16kHz source for the listener thread
pub struct SilentSource;

impl AudioSource for SilentSource {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn read(&mut self) -> Result<Vec<f32>> {
        std::thread::sleep(Duration::from_millis(10));
        Ok(vec![0.0; 160])
    }
}

/// Factory producing [`SilentSource`]s
#[must_use]
pub fn silent_factory() -> SourceFactory {
    Box::new(|| Ok(Box::new(SilentSource) as Box<dyn AudioSource>))
}

/// 16kHz source that stays open but never delivers audio
pub struct StalledSource;

impl AudioSource for StalledSource {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn read(&mut self) -> Result<Vec<f32>> {
        std::thread::sleep(Duration::from_millis(10));
        Ok(Vec::new())
    }
}

/// Factory counting stream opens in `opens`
#[must_use]
pub fn counting_factory(opens: Arc<AtomicUsize>, stalled: bool) -> SourceFactory {
    Box::new(move || {
        opens.fetch_add(1, Ordering::SeqCst);
        let source: Box<dyn AudioSource> = if stalled {
            Box::new(StalledSource)
        } else {
            Box::new(SilentSource)
        };
        Ok(source)
    })
}

/// Engine that fires once each time its trigger is set
pub struct TriggerEngine {
    trigger: Arc<AtomicBool>,
}

impl TriggerEngine {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let trigger = Arc::new(AtomicBool::new(false));
        (
            Self {
                trigger: Arc::clone(&trigger),
            },
            trigger,
        )
    }
}

impl WakeWordEngine for TriggerEngine {
    fn frame_length(&self) -> usize {
        512
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn process(&mut self, _frame: &[i16]) -> Result<i32> {
        if self.trigger.swap(false, Ordering::SeqCst) {
            Ok(0)
        } else {
            Ok(-1)
        }
    }
}

/// Short timings so sessions finish within a test
#[must_use]
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        listen_timeout: Duration::from_millis(100),
        idle_timeout: Duration::from_secs(30),
        max_turns: 5,
        watchdog_interval: Duration::from_secs(60),
        phrase_time_limit: Duration::from_millis(200),
        pause_timeout: Duration::from_secs(1),
        claim_attempts: 50,
        claim_backoff: Duration::from_millis(20),
        busy_retry_delay: Duration::from_millis(50),
        decay_tick: Duration::from_millis(100),
        movement_speed: 30.0,
        wake_reply: None,
        farewell_reply: "拜拜，下次再聊".to_string(),
        rest_reply: "我先休息一下".to_string(),
        goodbye_phrases: vec!["再见".to_string(), "拜拜".to_string()],
    }
}

/// Collaborators for one orchestrator under test
pub struct Fakes {
    pub arbiter: Arc<AudioArbiter>,
    pub capture: Arc<ScriptedCapture>,
    pub backend: Arc<FakeBackend>,
    pub dialogue: Arc<FakeDialogue>,
    pub synth: Arc<RecordingSynth>,
    pub sink: Arc<RecordingSink>,
    pub safety: Arc<FakeSafety>,
    pub movement: Arc<RecordingMovement>,
    pub memory: Arc<InMemoryHistory>,
    pub wake: Option<WakeSetup>,
    pub synthesis_timeout: Duration,
}

impl Fakes {
    /// Default fakes: silent capture, online network, friendly dialogue
    pub fn new() -> Self {
        let arbiter = Arc::new(AudioArbiter::new());
        Self {
            capture: Arc::new(ScriptedCapture::new(Arc::clone(&arbiter), Vec::new())),
            backend: Arc::new(FakeBackend::new("你好")),
            dialogue: Arc::new(FakeDialogue::replying("你好呀")),
            synth: Arc::new(RecordingSynth::default()),
            sink: Arc::new(RecordingSink::new(Arc::clone(&arbiter), Duration::from_millis(20))),
            safety: Arc::new(FakeSafety::new(true, "网络不太好呢")),
            movement: Arc::new(RecordingMovement::default()),
            memory: Arc::new(InMemoryHistory::new(50)),
            wake: None,
            synthesis_timeout: Duration::from_secs(2),
            arbiter,
        }
    }

    /// Add a wake word listener driven by the returned trigger
    pub fn with_trigger(self) -> (Self, Arc<AtomicBool>) {
        self.with_listener(silent_factory())
    }

    /// Add a wake word listener reading from `source`
    pub fn with_listener(mut self, source: SourceFactory) -> (Self, Arc<AtomicBool>) {
        let (engine, trigger) = TriggerEngine::new();
        self.wake = Some(WakeSetup {
            engine: Box::new(engine),
            source,
            options: ListenerOptions::default(),
        });
        (self, trigger)
    }
}

/// A running orchestrator and the fakes it drives
pub struct Harness {
    pub handle: OrchestratorHandle,
    pub speech: Arc<SpeechQueue>,
    pub arbiter: Arc<AudioArbiter>,
    pub capture: Arc<ScriptedCapture>,
    pub backend: Arc<FakeBackend>,
    pub dialogue: Arc<FakeDialogue>,
    pub synth: Arc<RecordingSynth>,
    pub sink: Arc<RecordingSink>,
    pub safety: Arc<FakeSafety>,
    pub movement: Arc<RecordingMovement>,
    pub memory: Arc<InMemoryHistory>,
}

impl Harness {
    /// Start an orchestrator over `fakes` and wait for it to listen
    pub async fn start(fakes: Fakes, settings: OrchestratorSettings) -> Self {
        Self::try_start(fakes, settings)
            .await
            .expect("orchestrator starts")
    }

    /// Like [`Harness::start`], returning the orchestrator's start error
    pub async fn try_start(fakes: Fakes, settings: OrchestratorSettings) -> Result<Self> {
        let Fakes {
            arbiter,
            capture,
            backend,
            dialogue,
            synth,
            sink,
            safety,
            movement,
            memory,
            wake,
            synthesis_timeout,
        } = fakes;

        let speech = Arc::new(SpeechQueue::start_with_timeout(
            Arc::clone(&synth) as Arc<dyn SynthesisProvider>,
            Arc::clone(&sink) as Arc<dyn AudioSink>,
            Arc::clone(&arbiter),
            synthesis_timeout,
        ));
        let recognizer = Arc::new(RecognizerChain::new(
            vec![Arc::clone(&backend) as Arc<dyn SpeechBackend>],
            Arc::clone(&arbiter),
        ));

        let components = Components {
            arbiter: Arc::clone(&arbiter),
            wake,
            capture: Arc::clone(&capture) as Arc<dyn UtteranceSource>,
            recognizer,
            dialogue: Arc::clone(&dialogue) as Arc<dyn DialogueEngine>,
            emotion: Arc::new(EmotionEngine::default()),
            speech: Arc::clone(&speech),
            safety: Arc::clone(&safety) as Arc<dyn SafetyMonitor>,
            movement: Arc::clone(&movement) as Arc<dyn MovementExecutor>,
            memory: Arc::clone(&memory) as Arc<dyn companion_voice::memory::MemoryStore>,
        };

        let handle = Orchestrator::start(components, settings)?;
        synth.attach(handle.subscribe_state());
        assert!(
            handle
                .wait_for_state(ConversationState::AwakeWaiting, Duration::from_secs(2))
                .await,
            "orchestrator never reached awake_waiting"
        );
        assert!(
            wait_until(Duration::from_secs(2), || arbiter.current() == AudioOwner::WakeDetector).await,
            "wake detector never took the device"
        );

        Ok(Self {
            handle,
            speech,
            arbiter,
            capture,
            backend,
            dialogue,
            synth,
            sink,
            safety,
            movement,
            memory,
        })
    }

    /// Stop the orchestrator and the speech worker
    pub async fn shutdown(self) {
        self.handle.stop().await;
        self.speech.shutdown().await;
    }
}
