//! TOML configuration file loading
//!
//! Supports `~/.config/companion/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CompanionConfigFile {
    /// Conversation flow options (flat orchestrator keys)
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Recognition and synthesis configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Dialogue engine configuration
    #[serde(default)]
    pub dialogue: DialogueFileConfig,

    /// Emotion engine configuration
    #[serde(default)]
    pub emotion: EmotionFileConfig,

    /// Connectivity and movement safety configuration
    #[serde(default)]
    pub safety: SafetyFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Data directory override
    pub data_dir: Option<String>,
}

/// Conversation flow options
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Wake word sensitivity, 0.0 to 1.0
    pub wake_sensitivity: Option<f32>,

    /// Seconds to wait for the user to start speaking
    pub listen_timeout_s: Option<u64>,

    /// Seconds without user speech before the session ends
    pub conversation_idle_timeout_s: Option<u64>,

    /// Replies per session before returning to wake word listening
    pub max_turns_per_session: Option<u32>,

    /// Seconds between forced wake word stream restarts
    pub watchdog_restart_s: Option<u64>,

    /// Maximum length of one utterance in seconds
    pub phrase_time_limit_s: Option<u64>,

    /// Dialogue history records kept
    pub history_cap: Option<usize>,

    /// Spoken right after the wake word (empty to disable)
    pub wake_reply: Option<String>,

    /// Spoken when the user says goodbye
    pub farewell_reply: Option<String>,

    /// Spoken when a session ends on timeout or turn limit
    pub rest_reply: Option<String>,

    /// Phrases that end the session
    pub goodbye_phrases: Option<Vec<String>>,
}

/// Recognition and synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Recognition language hint (e.g. "zh")
    pub language: Option<String>,

    /// Recognition backends in priority order
    pub stt_backends: Option<Vec<String>>,

    /// Model for the Whisper API
    pub whisper_model: Option<String>,

    /// Base URL of a local Whisper-compatible server
    pub local_whisper_url: Option<String>,

    /// Deepgram model
    pub deepgram_model: Option<String>,

    /// Primary TTS provider ("openai" or "elevenlabs")
    pub tts_primary: Option<String>,

    /// Fallback TTS provider
    pub tts_secondary: Option<String>,

    /// `OpenAI` TTS model
    pub tts_model: Option<String>,

    /// `OpenAI` TTS voice
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// `ElevenLabs` voice identifier
    pub elevenlabs_voice_id: Option<String>,
}

/// Dialogue engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// Chat completions base URL
    pub base_url: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Personality system prompt
    pub system_prompt: Option<String>,

    /// Max tokens per reply
    pub max_tokens: Option<u32>,

    /// Request timeout in seconds
    pub timeout_s: Option<u64>,
}

/// Emotion engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct EmotionFileConfig {
    /// Path to a TOML lexicon replacing the built-in one
    pub lexicon_path: Option<String>,

    /// Milliseconds between decay ticks
    pub decay_tick_ms: Option<u64>,

    /// Base movement speed
    pub movement_speed: Option<f32>,
}

/// Connectivity and movement safety configuration
#[derive(Debug, Default, Deserialize)]
pub struct SafetyFileConfig {
    /// `host:port` probed to decide network availability
    pub probe_addr: Option<String>,

    /// Seconds a probe result is reused
    pub probe_cache_s: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CompanionConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CompanionConfigFile {
    config_file_path().map_or_else(CompanionConfigFile::default, |path| load_from_path(&path))
}

/// Load a TOML config file from an explicit path, falling back to defaults
pub fn load_from_path(path: &Path) -> CompanionConfigFile {
    if !path.exists() {
        return CompanionConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CompanionConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CompanionConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/companion/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("companion").join("config.toml"))
}
