//! Configuration management for the companion voice core

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

use file::CompanionConfigFile;

/// Default personality prompt for the dialogue engine
const DEFAULT_SYSTEM_PROMPT: &str = "你是一个可爱的桌面宠物机器人，名字叫快快。\
性格活泼友好，说话简短自然，偶尔用一些语气词。\
你有实体，可以移动和做表情。请用简短的中文回复。";

/// Companion configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Conversation flow options
    pub conversation: ConversationConfig,

    /// Recognition and synthesis configuration
    pub voice: VoiceConfig,

    /// Dialogue engine configuration
    pub dialogue: DialogueConfig,

    /// Emotion engine configuration
    pub emotion: EmotionConfig,

    /// Connectivity and movement safety configuration
    pub safety: SafetyConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Path to data directory (conversation database)
    pub data_dir: PathBuf,
}

/// Conversation flow options consumed by the orchestrator
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Wake word sensitivity in [0, 1]; higher fires more readily
    pub wake_sensitivity: f32,

    /// Seconds to wait for speech onset in one turn
    pub listen_timeout_s: u64,

    /// Seconds without user speech before the session ends
    pub conversation_idle_timeout_s: u64,

    /// Replies per session before returning to wake word listening
    pub max_turns_per_session: u32,

    /// Seconds between forced wake word stream restarts
    pub watchdog_restart_s: u64,

    /// Maximum length of one utterance in seconds
    pub phrase_time_limit_s: u64,

    /// Dialogue history records kept by the memory store
    pub history_cap: usize,

    /// Spoken right after the wake word; empty disables it
    pub wake_reply: String,

    /// Spoken when the user says goodbye
    pub farewell_reply: String,

    /// Spoken when a session ends on timeout or turn limit
    pub rest_reply: String,

    /// Phrases that end the session
    pub goodbye_phrases: Vec<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            wake_sensitivity: 0.9,
            listen_timeout_s: 8,
            conversation_idle_timeout_s: 30,
            max_turns_per_session: 5,
            watchdog_restart_s: 60,
            phrase_time_limit_s: 10,
            history_cap: 20,
            wake_reply: "我在听，请说~".to_string(),
            farewell_reply: "好的，有需要再叫我~".to_string(),
            rest_reply: "好的，我先休息一下，需要时再叫我哦！".to_string(),
            goodbye_phrases: ["再见", "结束对话", "退出", "睡觉", "goodbye", "bye"]
                .into_iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ConversationConfig {
    /// Listen timeout as a duration
    #[must_use]
    pub const fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_s)
    }

    /// Conversation idle timeout as a duration
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation_idle_timeout_s)
    }

    /// Watchdog restart interval as a duration
    #[must_use]
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_restart_s)
    }

    /// Phrase time limit as a duration
    #[must_use]
    pub const fn phrase_time_limit(&self) -> Duration {
        Duration::from_secs(self.phrase_time_limit_s)
    }
}

/// Speech recognition backend kinds, in the order they should be tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttBackendKind {
    /// Whisper-compatible server on the local network
    LocalWhisper,
    /// `OpenAI` hosted Whisper
    Whisper,
    /// Deepgram hosted recognition
    Deepgram,
}

impl SttBackendKind {
    /// Parse a backend name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local_whisper" | "local-whisper" | "local" => Some(Self::LocalWhisper),
            "whisper" | "openai" => Some(Self::Whisper),
            "deepgram" => Some(Self::Deepgram),
            _ => None,
        }
    }
}

/// Speech synthesis provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProviderKind {
    /// `OpenAI` speech endpoint
    OpenAi,
    /// `ElevenLabs` text-to-speech
    ElevenLabs,
}

impl TtsProviderKind {
    /// Parse a provider name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "elevenlabs" => Some(Self::ElevenLabs),
            _ => None,
        }
    }
}

/// Recognition and synthesis configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Recognition language hint
    pub language: String,

    /// Recognition backends in priority order
    pub stt_backends: Vec<SttBackendKind>,

    /// Model for the Whisper API
    pub whisper_model: String,

    /// Base URL of a local Whisper-compatible server
    pub local_whisper_url: String,

    /// Deepgram model
    pub deepgram_model: String,

    /// Primary TTS provider
    pub tts_primary: TtsProviderKind,

    /// Fallback TTS provider
    pub tts_secondary: Option<TtsProviderKind>,

    /// `OpenAI` TTS model
    pub tts_model: String,

    /// `OpenAI` TTS voice
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// `ElevenLabs` voice identifier
    pub elevenlabs_voice_id: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "zh".to_string(),
            stt_backends: vec![SttBackendKind::LocalWhisper, SttBackendKind::Whisper],
            whisper_model: "whisper-1".to_string(),
            local_whisper_url: "http://localhost:8080".to_string(),
            deepgram_model: "nova-2".to_string(),
            tts_primary: TtsProviderKind::OpenAi,
            tts_secondary: Some(TtsProviderKind::ElevenLabs),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            elevenlabs_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
        }
    }
}

/// Dialogue engine configuration
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Chat completions base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Personality system prompt
    pub system_prompt: String,

    /// Max tokens per reply
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_s: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 200,
            timeout_s: 10,
        }
    }
}

/// Emotion engine configuration
#[derive(Debug, Clone)]
pub struct EmotionConfig {
    /// TOML lexicon replacing the built-in one
    pub lexicon_path: Option<PathBuf>,

    /// Milliseconds between decay ticks
    pub decay_tick_ms: u64,

    /// Base movement speed passed to the movement executor
    pub movement_speed: f32,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            lexicon_path: None,
            decay_tick_ms: 1000,
            movement_speed: 30.0,
        }
    }
}

/// Connectivity and movement safety configuration
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// `host:port` probed to decide network availability
    pub probe_addr: String,

    /// Seconds a probe result is reused
    pub probe_cache_s: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            probe_addr: "api.openai.com:443".to_string(),
            probe_cache_s: 10,
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, chat)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "<set>");
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("deepgram", &mask(&self.deepgram))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .finish()
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of defaults, ignoring the environment
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or the result is invalid
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let fc: CompanionConfigFile = toml::from_str(content)?;
        let config = Self::resolve(fc, |_| None);
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed config file with environment lookups and defaults
    #[allow(clippy::too_many_lines)]
    pub fn resolve(fc: CompanionConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        macro_rules! parsed {
            ($key:expr) => {
                env($key).and_then(|s| s.parse().ok())
            };
        }

        // Conversation options (env > toml > default)
        let conv_default = ConversationConfig::default();
        let conv = fc.conversation;
        let conversation = ConversationConfig {
            wake_sensitivity: parsed!("COMPANION_WAKE_SENSITIVITY")
                .or(conv.wake_sensitivity)
                .unwrap_or(conv_default.wake_sensitivity),
            listen_timeout_s: parsed!("COMPANION_LISTEN_TIMEOUT_S")
                .or(conv.listen_timeout_s)
                .unwrap_or(conv_default.listen_timeout_s),
            conversation_idle_timeout_s: parsed!("COMPANION_IDLE_TIMEOUT_S")
                .or(conv.conversation_idle_timeout_s)
                .unwrap_or(conv_default.conversation_idle_timeout_s),
            max_turns_per_session: parsed!("COMPANION_MAX_TURNS")
                .or(conv.max_turns_per_session)
                .unwrap_or(conv_default.max_turns_per_session),
            watchdog_restart_s: parsed!("COMPANION_WATCHDOG_S")
                .or(conv.watchdog_restart_s)
                .unwrap_or(conv_default.watchdog_restart_s),
            phrase_time_limit_s: conv
                .phrase_time_limit_s
                .unwrap_or(conv_default.phrase_time_limit_s),
            history_cap: parsed!("COMPANION_HISTORY_CAP")
                .or(conv.history_cap)
                .unwrap_or(conv_default.history_cap),
            wake_reply: conv.wake_reply.unwrap_or(conv_default.wake_reply),
            farewell_reply: conv.farewell_reply.unwrap_or(conv_default.farewell_reply),
            rest_reply: conv.rest_reply.unwrap_or(conv_default.rest_reply),
            goodbye_phrases: conv.goodbye_phrases.unwrap_or(conv_default.goodbye_phrases),
        };

        // Voice options (env > toml > default)
        let voice_default = VoiceConfig::default();
        let v = fc.voice;
        let stt_backends = env("COMPANION_STT_BACKENDS")
            .map(|s| s.split(',').map(str::to_string).collect::<Vec<_>>())
            .or(v.stt_backends)
            .map_or(voice_default.stt_backends, |names| {
                names
                    .iter()
                    .filter_map(|name| {
                        let kind = SttBackendKind::parse(name);
                        if kind.is_none() {
                            tracing::warn!(backend = %name, "unknown STT backend ignored");
                        }
                        kind
                    })
                    .collect()
            });
        let tts_primary = env("COMPANION_TTS_PRIMARY")
            .or(v.tts_primary)
            .and_then(|s| TtsProviderKind::parse(&s))
            .unwrap_or(voice_default.tts_primary);
        let tts_secondary = match env("COMPANION_TTS_SECONDARY").or(v.tts_secondary) {
            Some(s) if s.eq_ignore_ascii_case("none") => None,
            Some(s) => TtsProviderKind::parse(&s),
            None => voice_default.tts_secondary,
        }
        .filter(|secondary| *secondary != tts_primary);
        let voice = VoiceConfig {
            language: env("COMPANION_LANGUAGE")
                .or(v.language)
                .unwrap_or(voice_default.language),
            stt_backends,
            whisper_model: v.whisper_model.unwrap_or(voice_default.whisper_model),
            local_whisper_url: env("COMPANION_LOCAL_WHISPER_URL")
                .or(v.local_whisper_url)
                .unwrap_or(voice_default.local_whisper_url),
            deepgram_model: v.deepgram_model.unwrap_or(voice_default.deepgram_model),
            tts_primary,
            tts_secondary,
            tts_model: v.tts_model.unwrap_or(voice_default.tts_model),
            tts_voice: v.tts_voice.unwrap_or(voice_default.tts_voice),
            tts_speed: v.tts_speed.unwrap_or(voice_default.tts_speed),
            elevenlabs_voice_id: v
                .elevenlabs_voice_id
                .unwrap_or(voice_default.elevenlabs_voice_id),
        };

        let dialogue_default = DialogueConfig::default();
        let d = fc.dialogue;
        let dialogue = DialogueConfig {
            base_url: env("COMPANION_LLM_BASE_URL")
                .or(d.base_url)
                .unwrap_or(dialogue_default.base_url),
            model: env("COMPANION_LLM_MODEL")
                .or(d.model)
                .unwrap_or(dialogue_default.model),
            system_prompt: d.system_prompt.unwrap_or(dialogue_default.system_prompt),
            max_tokens: d.max_tokens.unwrap_or(dialogue_default.max_tokens),
            timeout_s: d.timeout_s.unwrap_or(dialogue_default.timeout_s),
        };

        let emotion_default = EmotionConfig::default();
        let emotion = EmotionConfig {
            lexicon_path: fc.emotion.lexicon_path.map(PathBuf::from),
            decay_tick_ms: fc
                .emotion
                .decay_tick_ms
                .unwrap_or(emotion_default.decay_tick_ms),
            movement_speed: fc
                .emotion
                .movement_speed
                .unwrap_or(emotion_default.movement_speed),
        };

        let safety_default = SafetyConfig::default();
        let safety = SafetyConfig {
            probe_addr: env("COMPANION_PROBE_ADDR")
                .or(fc.safety.probe_addr)
                .unwrap_or(safety_default.probe_addr),
            probe_cache_s: fc
                .safety
                .probe_cache_s
                .unwrap_or(safety_default.probe_cache_s),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        // Data directory (~/.local/share/companion on Linux)
        let data_dir = env("COMPANION_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Self {
            conversation,
            voice,
            dialogue,
            emotion,
            safety,
            api_keys,
            data_dir,
        }
    }

    /// Check option ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid option
    pub fn validate(&self) -> Result<()> {
        let c = &self.conversation;
        if !(0.0..=1.0).contains(&c.wake_sensitivity) {
            return Err(Error::Config(format!(
                "wake_sensitivity must be within 0..=1, got {}",
                c.wake_sensitivity
            )));
        }
        if c.listen_timeout_s == 0 {
            return Err(Error::Config("listen_timeout_s must be positive".to_string()));
        }
        if c.conversation_idle_timeout_s == 0 {
            return Err(Error::Config(
                "conversation_idle_timeout_s must be positive".to_string(),
            ));
        }
        if c.max_turns_per_session == 0 {
            return Err(Error::Config(
                "max_turns_per_session must be positive".to_string(),
            ));
        }
        if c.watchdog_restart_s == 0 {
            return Err(Error::Config("watchdog_restart_s must be positive".to_string()));
        }
        if c.phrase_time_limit_s == 0 {
            return Err(Error::Config("phrase_time_limit_s must be positive".to_string()));
        }
        if self.voice.stt_backends.is_empty() {
            return Err(Error::Config("at least one STT backend is required".to_string()));
        }
        if !(0.25..=4.0).contains(&self.voice.tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be within 0.25..=4.0, got {}",
                self.voice.tts_speed
            )));
        }
        Ok(())
    }

    /// Path of the conversation database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("companion.db")
    }
}

/// Default data directory: `~/.local/share/companion`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/companion"),
        |d| d.data_dir().join("companion"),
    )
}
