//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use companion_voice::voice::{
    AudioArbiter, AudioOwner, AudioSink, EndpointStatus, Endpointer, EnergyWakeEngine,
    FrameAssembler, NO_DETECTION, PlaybackOutcome, RecognizerChain, SPEECH_SAMPLE_RATE,
    SpeechBackend, SpeechQueue, SynthesisProvider, WakeWordEngine, samples_to_wav,
};

mod common;

use common::{FailingBackend, FakeBackend, RecordingSink, RecordingSynth, test_utterance};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SPEECH_SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SPEECH_SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SPEECH_SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

struct Queue {
    queue: SpeechQueue,
    synth: Arc<RecordingSynth>,
    sink: Arc<RecordingSink>,
    arbiter: Arc<AudioArbiter>,
}

fn start_queue(delay: Duration) -> Queue {
    let arbiter = Arc::new(AudioArbiter::new());
    let synth = Arc::new(RecordingSynth::default());
    let sink = Arc::new(RecordingSink::new(Arc::clone(&arbiter), delay));
    let queue = SpeechQueue::start(
        Arc::clone(&synth) as Arc<dyn SynthesisProvider>,
        Arc::clone(&sink) as Arc<dyn AudioSink>,
        Arc::clone(&arbiter),
    );
    Queue {
        queue,
        synth,
        sink,
        arbiter,
    }
}

fn start_queue_with_timeout(delay: Duration, synthesis_timeout: Duration) -> Queue {
    let arbiter = Arc::new(AudioArbiter::new());
    let synth = Arc::new(RecordingSynth::default());
    let sink = Arc::new(RecordingSink::new(Arc::clone(&arbiter), delay));
    let queue = SpeechQueue::start_with_timeout(
        Arc::clone(&synth) as Arc<dyn SynthesisProvider>,
        Arc::clone(&sink) as Arc<dyn AudioSink>,
        Arc::clone(&arbiter),
        synthesis_timeout,
    );
    Queue {
        queue,
        synth,
        sink,
        arbiter,
    }
}

#[tokio::test]
async fn test_speech_queue_plays_in_order_without_overlap() {
    let q = start_queue(Duration::from_millis(30));

    let tickets: Vec<_> = ["一", "二", "三"].iter().map(|t| q.queue.enqueue(*t)).collect();
    for ticket in tickets {
        assert_eq!(ticket.wait().await, PlaybackOutcome::Played);
    }

    assert_eq!(q.sink.played(), vec!["一", "二", "三"]);
    assert!(!q.sink.overlapped());
    assert_eq!(q.arbiter.current(), AudioOwner::None);

    q.queue.shutdown().await;
}

#[tokio::test]
async fn test_priority_item_jumps_the_queue() {
    let q = start_queue(Duration::from_millis(100));

    let first = q.queue.enqueue("first");
    // Let the worker pick up the first item
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = q.queue.enqueue("second");
    let urgent = q.queue.enqueue_priority("urgent");

    assert_eq!(first.wait().await, PlaybackOutcome::Played);
    assert_eq!(urgent.wait().await, PlaybackOutcome::Played);
    assert_eq!(second.wait().await, PlaybackOutcome::Played);

    assert_eq!(q.sink.played(), vec!["first", "urgent", "second"]);

    q.queue.shutdown().await;
}

#[tokio::test]
async fn test_drain_cancels_waiting_items() {
    let q = start_queue(Duration::from_millis(100));

    let playing = q.queue.enqueue("playing");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let waiting = q.queue.enqueue("waiting");
    let also_waiting = q.queue.enqueue("also waiting");

    assert_eq!(q.queue.drain(), 2);
    assert_eq!(q.queue.pending(), 0);

    assert_eq!(waiting.wait().await, PlaybackOutcome::Cancelled);
    assert_eq!(also_waiting.wait().await, PlaybackOutcome::Cancelled);
    assert_eq!(playing.wait().await, PlaybackOutcome::Played);
    assert_eq!(q.sink.played(), vec!["playing"]);

    q.queue.shutdown().await;
}

#[tokio::test]
async fn test_playback_pauses_recording() {
    let q = start_queue(Duration::from_millis(20));

    assert_eq!(q.queue.enqueue("你好").wait().await, PlaybackOutcome::Played);

    assert_eq!(q.sink.owners(), vec![AudioOwner::Playback]);
    assert_eq!(q.sink.recording_paused(), vec![true]);
    assert!(!q.arbiter.is_recording_paused());

    q.queue.shutdown().await;
}

#[tokio::test]
async fn test_stage_directions_are_not_spoken() {
    let q = start_queue(Duration::from_millis(5));

    assert_eq!(
        q.queue.enqueue("(挥手)你好呀【开心】").wait().await,
        PlaybackOutcome::Played
    );
    assert_eq!(q.queue.enqueue("（点头）").wait().await, PlaybackOutcome::Skipped);

    assert_eq!(q.synth.texts(), vec!["你好呀"]);

    q.queue.shutdown().await;
}

#[tokio::test]
async fn test_synthesis_failure_releases_device() {
    let q = start_queue(Duration::from_millis(5));
    q.synth.set_failing(true);

    assert_eq!(q.queue.enqueue("你好").wait().await, PlaybackOutcome::Failed);
    assert_eq!(q.arbiter.current(), AudioOwner::None);
    assert!(!q.arbiter.is_recording_paused());

    q.synth.set_failing(false);
    assert_eq!(q.queue.enqueue("再试").wait().await, PlaybackOutcome::Played);

    q.queue.shutdown().await;
}

#[tokio::test]
async fn test_stalled_synthesis_fails_and_frees_device() {
    let q = start_queue_with_timeout(Duration::from_millis(5), Duration::from_millis(100));
    q.synth.set_hanging(true);

    let outcome = tokio::time::timeout(Duration::from_secs(2), q.queue.enqueue("你好").wait())
        .await
        .expect("ticket resolves");
    assert_eq!(outcome, PlaybackOutcome::Failed);
    assert_eq!(q.arbiter.current(), AudioOwner::None);
    assert!(!q.arbiter.is_recording_paused());
    assert!(q.sink.played().is_empty());

    q.synth.set_hanging(false);
    assert_eq!(q.queue.enqueue("再试").wait().await, PlaybackOutcome::Played);

    // Shutdown waits out at most one bounded synthesis
    q.synth.set_hanging(true);
    let _stalled = q.queue.enqueue("卡住");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(
        tokio::time::timeout(Duration::from_secs(2), q.queue.shutdown())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_shutdown_cancels_new_items() {
    let q = start_queue(Duration::from_millis(5));
    q.queue.shutdown().await;

    assert_eq!(q.queue.enqueue("too late").wait().await, PlaybackOutcome::Cancelled);
    assert!(q.synth.texts().is_empty());
}

#[tokio::test]
async fn test_recognizer_falls_back_to_next_backend() {
    let arbiter = Arc::new(AudioArbiter::new());
    let chain = RecognizerChain::new(
        vec![
            Arc::new(FailingBackend) as Arc<dyn SpeechBackend>,
            Arc::new(FakeBackend::new("")) as Arc<dyn SpeechBackend>,
            Arc::new(FakeBackend::new("  今天天气怎么样  ")) as Arc<dyn SpeechBackend>,
        ],
        arbiter,
    );

    let result = chain.recognize(&test_utterance()).await;

    assert!(result.success);
    assert_eq!(result.text, "今天天气怎么样");
    assert_eq!(result.backend.as_deref(), Some("fake"));
}

#[tokio::test]
async fn test_recognizer_all_backends_fail() {
    let arbiter = Arc::new(AudioArbiter::new());
    let chain = RecognizerChain::new(vec![Arc::new(FailingBackend) as Arc<dyn SpeechBackend>], arbiter);

    let result = chain.recognize(&test_utterance()).await;

    assert!(!result.success);
    assert!(result.text.is_empty());
    assert_eq!(result.backend, None);
}

#[tokio::test]
async fn test_recognizer_ignores_audio_during_playback() {
    let arbiter = Arc::new(AudioArbiter::new());
    let backend = Arc::new(FakeBackend::new("回声"));
    let chain = RecognizerChain::new(
        vec![Arc::clone(&backend) as Arc<dyn SpeechBackend>],
        Arc::clone(&arbiter),
    );

    let guard = arbiter.try_claim(AudioOwner::Playback).unwrap();
    let result = chain.recognize(&test_utterance()).await;
    assert!(!result.success);
    assert_eq!(backend.calls(), 0);

    guard.release();
    let result = chain.recognize(&test_utterance()).await;
    assert!(result.success);
    assert_eq!(backend.calls(), 1);
}

#[test]
fn test_endpointer_detects_utterance() {
    let mut endpointer = Endpointer::new(
        SPEECH_SAMPLE_RATE,
        Duration::from_secs(5),
        Duration::from_secs(10),
    );

    assert_eq!(endpointer.push(&generate_silence(0.2)), EndpointStatus::Waiting);

    for chunk in generate_sine_samples(440.0, 0.6, 0.3).chunks(480) {
        endpointer.push(chunk);
    }
    assert_eq!(endpointer.status(), EndpointStatus::Speaking);

    for chunk in generate_silence(0.6).chunks(480) {
        endpointer.push(chunk);
    }
    assert_eq!(endpointer.status(), EndpointStatus::Complete);

    let utterance = endpointer.finish().unwrap();
    assert_eq!(utterance.sample_rate, SPEECH_SAMPLE_RATE);
    assert!(utterance.samples.len() >= generate_sine_samples(440.0, 0.6, 0.3).len());
}

#[test]
fn test_endpointer_times_out_on_silence() {
    let mut endpointer = Endpointer::new(
        SPEECH_SAMPLE_RATE,
        Duration::from_millis(500),
        Duration::from_secs(10),
    );

    for chunk in generate_silence(0.6).chunks(480) {
        endpointer.push(chunk);
    }

    assert_eq!(endpointer.status(), EndpointStatus::NoSpeech);
    assert!(endpointer.finish().is_none());
}

#[test]
fn test_energy_engine_fires_on_sustained_sound() {
    let mut engine = EnergyWakeEngine::new(0.5);
    let mut assembler =
        FrameAssembler::new(SPEECH_SAMPLE_RATE, engine.sample_rate(), engine.frame_length()).unwrap();

    let silent_frames = assembler.push(&generate_silence(0.5)).unwrap();
    for frame in &silent_frames {
        assert_eq!(engine.process(frame).unwrap(), NO_DETECTION);
    }

    let loud_frames = assembler.push(&generate_sine_samples(440.0, 0.5, 0.5)).unwrap();
    let detections = loud_frames
        .iter()
        .filter(|frame| engine.process(frame).unwrap() != NO_DETECTION)
        .count();

    // One trigger per burst
    assert_eq!(detections, 1);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SPEECH_SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SPEECH_SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), samples.len());
}
