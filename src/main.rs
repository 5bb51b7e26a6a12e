use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use companion_voice::config::{SttBackendKind, TtsProviderKind};
use companion_voice::db::{self, ConversationRepo};
use companion_voice::dialogue::ChatDialogue;
use companion_voice::emotion::{EmotionEngine, Lexicon};
use companion_voice::movement::LoggingMovement;
use companion_voice::orchestrator::{Components, OrchestratorSettings, WakeSetup};
use companion_voice::safety::DefaultSafety;
use companion_voice::voice::{
    AudioArbiter, AudioCapture, AudioPlayback, AudioSink, DeepgramBackend, ElevenLabsTts,
    EnergyWakeEngine, FallbackSynthesizer, ListenerOptions, MicrophoneCapture, MicrophoneSource,
    OpenAiTts, PLAYBACK_SAMPLE_RATE, RecognizerChain, SpeechBackend, SpeechQueue,
    SynthesisProvider, WhisperBackend, rms_energy,
};
use companion_voice::{Config, Orchestrator};

/// Companion - voice interaction for a small desktop robot
#[derive(Parser)]
#[command(name = "companion", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the conversation loop (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "你好！这是语音合成测试。")]
        text: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,companion_voice=info",
        1 => "info,companion_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        None | Some(Command::Run) => run_companion().await,
        Some(Command::TestMic { duration }) => test_mic(duration).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::TestTts { text }) => test_tts(&text).await,
        Some(Command::Config) => {
            let config = Config::load()?;
            println!("{config:#?}");
            Ok(())
        }
    }
}

/// Wire every component and run until interrupted
async fn run_companion() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::info!(data_dir = %config.data_dir.display(), "starting companion");

    let arbiter = Arc::new(AudioArbiter::new());

    let recognizer = Arc::new(build_recognizer(&config, Arc::clone(&arbiter))?);
    let synthesizer = build_synthesizer(&config)?;
    let sink: Arc<dyn AudioSink> = Arc::new(AudioPlayback::new()?);
    let speech = Arc::new(SpeechQueue::start(synthesizer, sink, Arc::clone(&arbiter)));

    let api_key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for dialogue"))?;
    let dialogue = Arc::new(ChatDialogue::new(api_key, config.dialogue.clone())?);

    let lexicon = match &config.emotion.lexicon_path {
        Some(path) => Lexicon::load(path)?,
        None => Lexicon::builtin(),
    };
    let emotion = Arc::new(EmotionEngine::new(lexicon));

    let pool = db::init(config.database_path())?;
    let memory = Arc::new(ConversationRepo::new(pool, config.conversation.history_cap));

    let wake = WakeSetup {
        engine: Box::new(EnergyWakeEngine::new(config.conversation.wake_sensitivity)),
        source: MicrophoneSource::factory(),
        options: ListenerOptions {
            restart_interval: config.conversation.watchdog_interval(),
            ..ListenerOptions::default()
        },
    };

    let components = Components {
        arbiter: Arc::clone(&arbiter),
        wake: Some(wake),
        capture: Arc::new(MicrophoneCapture::new(Arc::clone(&arbiter))),
        recognizer,
        dialogue,
        emotion,
        speech: Arc::clone(&speech),
        safety: Arc::new(DefaultSafety::new(&config.safety)),
        movement: Arc::new(LoggingMovement),
        memory,
    };

    let handle = Orchestrator::start(components, OrchestratorSettings::from_config(&config))?;
    tracing::info!("companion running, say the wake word (ctrl-c to quit)");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    handle.stop().await;
    speech.shutdown().await;

    Ok(())
}

/// Build the recognizer chain in configured priority order
///
/// Backends missing their credentials are skipped with a warning.
fn build_recognizer(config: &Config, arbiter: Arc<AudioArbiter>) -> anyhow::Result<RecognizerChain> {
    let voice = &config.voice;
    let mut backends: Vec<Arc<dyn SpeechBackend>> = Vec::new();

    for kind in &voice.stt_backends {
        let backend: companion_voice::Result<Arc<dyn SpeechBackend>> = match kind {
            SttBackendKind::LocalWhisper => Ok(Arc::new(WhisperBackend::local(
                voice.local_whisper_url.clone(),
                voice.whisper_model.clone(),
                voice.language.clone(),
            ))),
            SttBackendKind::Whisper => WhisperBackend::openai(
                config.api_keys.openai.clone().unwrap_or_default(),
                voice.whisper_model.clone(),
                voice.language.clone(),
            )
            .map(|b| Arc::new(b) as Arc<dyn SpeechBackend>),
            SttBackendKind::Deepgram => DeepgramBackend::new(
                config.api_keys.deepgram.clone().unwrap_or_default(),
                voice.deepgram_model.clone(),
                voice.language.clone(),
            )
            .map(|b| Arc::new(b) as Arc<dyn SpeechBackend>),
        };

        match backend {
            Ok(backend) => backends.push(backend),
            Err(e) => tracing::warn!(backend = ?kind, error = %e, "skipping STT backend"),
        }
    }

    if backends.is_empty() {
        anyhow::bail!("no usable STT backend configured");
    }

    let chain = RecognizerChain::new(backends, arbiter);
    tracing::info!(backends = ?chain.backend_names(), "speech recognition ready");
    Ok(chain)
}

fn build_provider(config: &Config, kind: TtsProviderKind) -> companion_voice::Result<Arc<dyn SynthesisProvider>> {
    let voice = &config.voice;
    Ok(match kind {
        TtsProviderKind::OpenAi => Arc::new(OpenAiTts::new(
            config.api_keys.openai.clone().unwrap_or_default(),
            voice.tts_model.clone(),
            voice.tts_voice.clone(),
            voice.tts_speed,
        )?),
        TtsProviderKind::ElevenLabs => Arc::new(ElevenLabsTts::new(
            config.api_keys.elevenlabs.clone().unwrap_or_default(),
            voice.elevenlabs_voice_id.clone(),
        )?),
    })
}

/// Primary TTS provider with the secondary as fallback when it can be built
fn build_synthesizer(config: &Config) -> anyhow::Result<Arc<dyn SynthesisProvider>> {
    let primary = build_provider(config, config.voice.tts_primary)?;

    let secondary = config.voice.tts_secondary.and_then(|kind| {
        build_provider(config, kind)
            .inspect_err(|e| tracing::warn!(provider = ?kind, error = %e, "fallback TTS unavailable"))
            .ok()
    });

    Ok(Arc::new(FallbackSynthesizer::new(primary, secondary)))
}

/// Test microphone input by showing audio levels
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone to see audio levels.\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let start = std::time::Instant::now();
    let mut max_level: f32 = 0.0;

    while start.elapsed() < Duration::from_secs(duration) {
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let buffer = capture.peek_buffer();
        let rms = rms_energy(&buffer);
        let peak = buffer.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        max_level = max_level.max(peak);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bar_len = (rms * 200.0).min(50.0) as usize;
        let bar = "█".repeat(bar_len);
        println!(
            "[{:>5.1}s] RMS: {rms:.4} Peak: {peak:.4} |{bar:<50}|",
            start.elapsed().as_secs_f32()
        );

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("Max peak level: {max_level:.4}");

    if max_level < 0.01 {
        println!("\n⚠️  Very low audio levels detected!");
        println!("Troubleshooting:");
        println!("  1. Check microphone is connected and not muted");
        println!("  2. Check input volume in system settings");
        println!("  3. Try: arecord -d 3 test.wav && aplay test.wav");
    } else if max_level < 0.1 {
        println!("\n⚠️  Low audio levels - wake word may not trigger reliably");
        println!("Try speaking louder or moving closer to the microphone.");
    } else {
        println!("\n✓ Audio levels look good!");
    }

    Ok(())
}

/// Test speaker output with a tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds.\n");

    let duration_secs = 2.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (f64::from(PLAYBACK_SAMPLE_RATE) * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.3
        })
        .collect();

    let playback = AudioPlayback::new()?;
    tokio::task::spawn_blocking(move || playback.play_samples(samples)).await??;

    println!("---");
    println!("If you heard the tone, speaker is working!");
    println!("If not, check:");
    println!("  1. Speaker/headphones are connected");
    println!("  2. Volume is turned up");
    println!("  3. Try: speaker-test -t sine -f 440 -l 1");

    Ok(())
}

/// Test TTS by synthesizing and playing speech
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let synthesizer = build_synthesizer(&config)?;

    println!("Synthesizing speech with {}...", synthesizer.name());
    let audio = synthesizer
        .synthesize(text)
        .await
        .map_err(|e| anyhow::anyhow!("TTS synthesis failed: {e}"))?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    tokio::task::spawn_blocking(move || playback.play(&audio)).await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
