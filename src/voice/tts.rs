//! Text-to-speech (TTS) providers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// HTTP request limit for the hosted providers
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Time one provider gets inside [`FallbackSynthesizer`]
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Something that turns text into playable audio bytes
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> &str;

    /// Synthesize `text`, returning encoded audio (MP3 for the HTTP providers)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// `OpenAI` speech endpoint
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAiTts {
    /// Create an `OpenAI` TTS provider
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, model: String, voice: String, speed: f32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            voice,
            speed,
        })
    }
}

#[async_trait]
impl SynthesisProvider for OpenAiTts {
    fn name(&self) -> &str {
        "openai"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// `ElevenLabs` text-to-speech
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
}

impl ElevenLabsTts {
    /// Create an `ElevenLabs` provider using the multilingual model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, voice_id: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("ElevenLabs API key required for TTS".to_string()));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            voice_id,
            model: "eleven_multilingual_v2".to_string(),
        })
    }
}

#[async_trait]
impl SynthesisProvider for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice_id);

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// Primary provider with an optional fallback
///
/// Each provider call is bounded, so a stalled primary falls through to the
/// secondary instead of blocking the speech worker.
pub struct FallbackSynthesizer {
    primary: Arc<dyn SynthesisProvider>,
    secondary: Option<Arc<dyn SynthesisProvider>>,
    provider_timeout: Duration,
}

impl FallbackSynthesizer {
    /// Create a synthesizer trying `primary` then `secondary`
    #[must_use]
    pub fn new(
        primary: Arc<dyn SynthesisProvider>,
        secondary: Option<Arc<dyn SynthesisProvider>>,
    ) -> Self {
        Self {
            primary,
            secondary,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Override the per-provider time limit
    #[must_use]
    pub fn with_timeout(mut self, provider_timeout: Duration) -> Self {
        self.provider_timeout = provider_timeout;
        self
    }

    async fn attempt(&self, provider: &dyn SynthesisProvider, text: &str) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.provider_timeout, provider.synthesize(text)).await {
            Ok(Ok(audio)) if !audio.is_empty() => Ok(audio),
            Ok(Ok(_)) => Err(Error::Tts(format!("{} returned no audio", provider.name()))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!(
                "{} synthesis after {:?}",
                provider.name(),
                self.provider_timeout
            ))),
        }
    }
}

#[async_trait]
impl SynthesisProvider for FallbackSynthesizer {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let primary_err = match self.attempt(self.primary.as_ref(), text).await {
            Ok(audio) => return Ok(audio),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };

        tracing::warn!(
            primary = self.primary.name(),
            secondary = secondary.name(),
            error = %primary_err,
            "primary TTS failed, trying fallback"
        );

        self.attempt(secondary.as_ref(), text)
            .await
            .map_err(|e| Error::Tts(format!("all providers failed: {primary_err}; {e}")))
    }
}
