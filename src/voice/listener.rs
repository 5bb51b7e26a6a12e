//! Wake word capture loop
//!
//! Runs on a dedicated thread: pulls native-rate audio from an [`AudioSource`],
//! assembles engine-sized frames and reports detections through a callback.
//! The stream is closed while paused, reopened on a fixed interval, and
//! reopened with backoff after device errors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use super::capture::AudioCapture;
use super::resample::FrameAssembler;
use super::wake_word::WakeWordEngine;
use crate::{Error, Result};

/// Poll interval while paused
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Interval between microphone buffer drains
const READ_INTERVAL: Duration = Duration::from_millis(20);

/// A blocking source of mono audio chunks
pub trait AudioSource {
    /// Native sample rate of the chunks
    fn sample_rate(&self) -> u32;

    /// Next chunk of samples (may be empty if nothing arrived yet)
    ///
    /// # Errors
    ///
    /// Returns error if the device failed
    fn read(&mut self) -> Result<Vec<f32>>;
}

/// Opens a fresh [`AudioSource`]; called on the listener thread
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn AudioSource>> + Send>;

/// Default microphone as an [`AudioSource`]
pub struct MicrophoneSource {
    capture: AudioCapture,
}

impl MicrophoneSource {
    /// Open and start the default input device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open() -> Result<Self> {
        let mut capture = AudioCapture::new()?;
        capture.start()?;
        Ok(Self { capture })
    }

    /// Factory suitable for [`WakeWordListener::spawn`]
    #[must_use]
    pub fn factory() -> SourceFactory {
        Box::new(|| Ok(Box::new(Self::open()?) as Box<dyn AudioSource>))
    }
}

impl AudioSource for MicrophoneSource {
    fn sample_rate(&self) -> u32 {
        self.capture.sample_rate()
    }

    fn read(&mut self) -> Result<Vec<f32>> {
        std::thread::sleep(READ_INTERVAL);
        if !self.capture.is_capturing() {
            return Err(Error::Audio("input stream closed".to_string()));
        }
        Ok(self.capture.take_buffer())
    }
}

/// Timing knobs for the listener thread
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    /// Reopen the stream this often even without errors
    pub restart_interval: Duration,
    /// First backoff after a device error
    pub min_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            restart_interval: Duration::from_secs(60),
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

enum Command {
    Pause(oneshot::Sender<()>),
    Resume,
    Restart,
    Shutdown,
}

/// Counters shared with the listener thread
#[derive(Debug, Default)]
struct Shared {
    heartbeat: AtomicU64,
    restarts: AtomicU64,
    detections: AtomicU64,
    paused: AtomicBool,
}

/// Handle to the wake word listener thread
///
/// Starts paused; call [`resume`](Self::resume) once the wake detector owns
/// the audio device.
pub struct WakeWordListener {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WakeWordListener {
    /// Spawn the listener thread
    ///
    /// `on_detect` runs on the listener thread with the keyword index; it
    /// should only post a message.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn<F>(
        engine: Box<dyn WakeWordEngine>,
        source: SourceFactory,
        options: ListenerOptions,
        on_detect: F,
    ) -> Result<Self>
    where
        F: Fn(i32) + Send + 'static,
    {
        let (commands, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            paused: AtomicBool::new(true),
            ..Shared::default()
        });

        let worker_shared = Arc::clone(&shared);
        // Streams are not `Send`; the loop is built on the thread that opens them
        let thread = std::thread::Builder::new()
            .name("wake-word".to_string())
            .spawn(move || {
                ListenerLoop {
                    engine,
                    factory: source,
                    options,
                    on_detect: Box::new(on_detect),
                    shared: worker_shared,
                    commands: rx,
                    stream: None,
                    backoff: options.min_backoff,
                }
                .run();
            })?;

        Ok(Self {
            commands,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop reading and close the stream, waiting up to `timeout` for the
    /// thread to confirm
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the thread did not confirm in time, or
    /// [`Error::WakeWord`] if it is gone
    pub async fn pause(&self, timeout: Duration) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Pause(ack_tx))
            .map_err(|_| Error::WakeWord("listener thread stopped".to_string()))?;

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::WakeWord("listener thread stopped".to_string())),
            Err(_) => Err(Error::Timeout("wake word listener pause".to_string())),
        }
    }

    /// Resume reading (reopens the stream)
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Close and reopen the stream
    pub fn restart(&self) {
        self.send(Command::Restart);
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("wake word thread panicked");
        }
    }

    /// Non-empty audio chunks read so far; stalls when the device does
    #[must_use]
    pub fn heartbeat(&self) -> u64 {
        self.shared.heartbeat.load(Ordering::Relaxed)
    }

    /// Number of stream reopens (periodic, error, or requested)
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::Relaxed)
    }

    /// Detections reported so far
    #[must_use]
    pub fn detections(&self) -> u64 {
        self.shared.detections.load(Ordering::Relaxed)
    }

    /// Whether the listener is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Whether the thread is still running
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("wake word listener thread is not running");
        }
    }
}

impl Drop for WakeWordListener {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct OpenStream {
    source: Box<dyn AudioSource>,
    assembler: FrameAssembler,
    opened_at: Instant,
}

struct ListenerLoop {
    engine: Box<dyn WakeWordEngine>,
    factory: SourceFactory,
    options: ListenerOptions,
    on_detect: Box<dyn Fn(i32) + Send>,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    stream: Option<OpenStream>,
    backoff: Duration,
}

/// What the loop should do after handling commands
enum Flow {
    Continue,
    Exit,
}

impl ListenerLoop {
    fn run(mut self) {
        tracing::debug!("wake word thread started");

        loop {
            let paused = self.shared.paused.load(Ordering::SeqCst);
            let received = if paused {
                self.commands.recv_timeout(IDLE_POLL)
            } else {
                self.commands.try_recv().map_err(|e| match e {
                    mpsc::TryRecvError::Empty => RecvTimeoutError::Timeout,
                    mpsc::TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
                })
            };

            match received {
                Ok(command) => {
                    if matches!(self.handle(command), Flow::Exit) {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.shared.paused.load(Ordering::SeqCst) {
                continue;
            }

            if matches!(self.step(), Flow::Exit) {
                break;
            }
        }

        self.close("shutdown");
        tracing::debug!("wake word thread stopped");
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Pause(ack) => {
                self.shared.paused.store(true, Ordering::SeqCst);
                self.close("paused");
                let _ = ack.send(());
            }
            Command::Resume => {
                self.shared.paused.store(false, Ordering::SeqCst);
                tracing::debug!("wake word listening resumed");
            }
            Command::Restart => {
                if self.stream.is_some() {
                    self.close("restart requested");
                    self.shared.restarts.fetch_add(1, Ordering::Relaxed);
                }
            }
            Command::Shutdown => return Flow::Exit,
        }
        Flow::Continue
    }

    /// One read/process iteration
    fn step(&mut self) -> Flow {
        let Some(stream) = self.stream.as_mut() else {
            return self.open();
        };

        if stream.opened_at.elapsed() >= self.options.restart_interval {
            tracing::info!("periodic wake word stream restart");
            self.close("periodic restart");
            self.shared.restarts.fetch_add(1, Ordering::Relaxed);
            return Flow::Continue;
        }

        let chunk = match stream.source.read() {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "wake word read failed, backing off");
                self.close("read error");
                self.shared.restarts.fetch_add(1, Ordering::Relaxed);
                return self.back_off();
            }
        };
        if chunk.is_empty() {
            return Flow::Continue;
        }
        self.shared.heartbeat.fetch_add(1, Ordering::Relaxed);

        let frames = match stream.assembler.push(&chunk) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "frame assembly failed, dropping chunk");
                stream.assembler.reset();
                return Flow::Continue;
            }
        };

        for frame in frames {
            match self.engine.process(&frame) {
                Ok(index) if index >= 0 => {
                    self.shared.detections.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(keyword_index = index, "wake word detected");
                    (self.on_detect)(index);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "wake word engine rejected frame"),
            }
        }

        Flow::Continue
    }

    fn open(&mut self) -> Flow {
        let source = match (self.factory)() {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open wake word stream");
                return self.back_off();
            }
        };

        let assembler = match FrameAssembler::new(
            source.sample_rate(),
            self.engine.sample_rate(),
            self.engine.frame_length(),
        ) {
            Ok(assembler) => assembler,
            Err(e) => {
                tracing::error!(error = %e, "cannot adapt stream to wake word engine");
                return self.back_off();
            }
        };

        self.engine.reset();
        self.backoff = self.options.min_backoff;
        tracing::debug!(sample_rate = source.sample_rate(), "wake word stream opened");
        self.stream = Some(OpenStream {
            source,
            assembler,
            opened_at: Instant::now(),
        });
        Flow::Continue
    }

    fn close(&mut self, reason: &str) {
        if self.stream.take().is_some() {
            tracing::debug!(reason, "wake word stream closed");
        }
    }

    /// Sleep for the current backoff while still answering commands
    fn back_off(&mut self) -> Flow {
        let wait = self.backoff;
        self.backoff = (self.backoff * 2).min(self.options.max_backoff);

        match self.commands.recv_timeout(wait) {
            Ok(command) => self.handle(command),
            Err(RecvTimeoutError::Timeout) => Flow::Continue,
            Err(RecvTimeoutError::Disconnected) => Flow::Exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::wake_word::NO_DETECTION;
    use std::sync::atomic::AtomicUsize;

    /// Engine firing on any frame whose first sample is non-zero
    struct MarkerEngine;

    impl WakeWordEngine for MarkerEngine {
        fn frame_length(&self) -> usize {
            160
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn process(&mut self, frame: &[i16]) -> Result<i32> {
            Ok(if frame[0] == 0 { NO_DETECTION } else { 2 })
        }
    }

    /// Source yielding silence, or one marked chunk when `trigger` is set
    struct ScriptedSource {
        trigger: Arc<AtomicBool>,
    }

    impl AudioSource for ScriptedSource {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn read(&mut self) -> Result<Vec<f32>> {
            std::thread::sleep(Duration::from_millis(5));
            let level = if self.trigger.swap(false, Ordering::SeqCst) { 0.5 } else { 0.0 };
            Ok(vec![level; 160])
        }
    }

    fn scripted_factory(trigger: Arc<AtomicBool>, opens: Arc<AtomicUsize>) -> SourceFactory {
        Box::new(move || {
            opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource {
                trigger: Arc::clone(&trigger),
            }) as Box<dyn AudioSource>)
        })
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_detection_reaches_callback() {
        let trigger = Arc::new(AtomicBool::new(false));
        let opens = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let listener = WakeWordListener::spawn(
            Box::new(MarkerEngine),
            scripted_factory(Arc::clone(&trigger), Arc::clone(&opens)),
            ListenerOptions::default(),
            move |index| {
                let _ = tx.send(index);
            },
        )
        .unwrap();

        assert!(listener.is_paused());
        listener.resume();
        assert!(wait_until(|| listener.heartbeat() > 0).await);

        trigger.store(true, Ordering::SeqCst);
        let index = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index, 2);
        assert_eq!(listener.detections(), 1);

        listener.shutdown();
        assert!(!listener.is_alive());
    }

    #[tokio::test]
    async fn test_pause_acknowledged_and_stops_reading() {
        let opens = Arc::new(AtomicUsize::new(0));
        let listener = WakeWordListener::spawn(
            Box::new(MarkerEngine),
            scripted_factory(Arc::new(AtomicBool::new(false)), Arc::clone(&opens)),
            ListenerOptions::default(),
            |_| {},
        )
        .unwrap();

        listener.resume();
        assert!(wait_until(|| listener.heartbeat() > 0).await);

        listener.pause(Duration::from_secs(1)).await.unwrap();
        assert!(listener.is_paused());
        let beat = listener.heartbeat();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(listener.heartbeat(), beat);

        listener.shutdown();
    }

    #[tokio::test]
    async fn test_periodic_restart_reopens_stream() {
        let opens = Arc::new(AtomicUsize::new(0));
        let listener = WakeWordListener::spawn(
            Box::new(MarkerEngine),
            scripted_factory(Arc::new(AtomicBool::new(false)), Arc::clone(&opens)),
            ListenerOptions {
                restart_interval: Duration::from_millis(30),
                ..ListenerOptions::default()
            },
            |_| {},
        )
        .unwrap();

        listener.resume();
        assert!(wait_until(|| opens.load(Ordering::SeqCst) >= 3).await);
        assert!(listener.restarts() >= 2);

        listener.shutdown();
    }

    #[tokio::test]
    async fn test_open_failure_backs_off() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let listener = WakeWordListener::spawn(
            Box::new(MarkerEngine),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Audio("no device".to_string()))
            }),
            ListenerOptions {
                min_backoff: Duration::from_millis(40),
                max_backoff: Duration::from_millis(40),
                ..ListenerOptions::default()
            },
            |_| {},
        )
        .unwrap();

        listener.resume();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let tried = attempts.load(Ordering::SeqCst);
        // Backoff keeps the retry rate bounded instead of spinning
        assert!((2..=8).contains(&tried), "tried {tried} times");

        // Still answers commands while backing off
        listener.pause(Duration::from_secs(1)).await.unwrap();
        listener.shutdown();
    }
}
