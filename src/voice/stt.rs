//! Speech-to-text (STT) backends and the recognizer fallback chain

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::arbiter::AudioArbiter;
use super::endpoint::Utterance;
use crate::{Error, Result};

/// Default per-backend time limit
const BACKEND_TIMEOUT: Duration = Duration::from_secs(15);

/// A single speech recognition backend
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Identifier used in logs and results
    fn name(&self) -> &str;

    /// Transcribe an utterance; an empty string means nothing was recognized
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn transcribe(&self, utterance: &Utterance) -> Result<String>;
}

/// Outcome of running the recognizer chain over one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Recognized text (empty on failure)
    pub text: String,
    /// Backend that produced `text`, if any
    pub backend: Option<String>,
    /// Whether any backend produced non-empty text
    pub success: bool,
}

impl RecognitionResult {
    /// The "no utterance" result
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            text: String::new(),
            backend: None,
            success: false,
        }
    }
}

/// Tries recognition backends in priority order
pub struct RecognizerChain {
    backends: Vec<Arc<dyn SpeechBackend>>,
    arbiter: Arc<AudioArbiter>,
    backend_timeout: Duration,
}

impl RecognizerChain {
    /// Create a chain over `backends`, highest priority first
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn SpeechBackend>>, arbiter: Arc<AudioArbiter>) -> Self {
        Self {
            backends,
            arbiter,
            backend_timeout: BACKEND_TIMEOUT,
        }
    }

    /// Override the per-backend time limit
    #[must_use]
    pub const fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Names of the configured backends, in order
    #[must_use]
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Recognize `utterance`, returning the first non-empty transcript
    ///
    /// Never fails: backend errors are logged and the next backend is tried.
    /// While playback owns the device the result is always empty.
    pub async fn recognize(&self, utterance: &Utterance) -> RecognitionResult {
        for backend in &self.backends {
            if self.arbiter.is_playing_audio() {
                tracing::debug!("playback active, skipping recognition");
                return RecognitionResult::empty();
            }

            let name = backend.name();
            let attempt = tokio::time::timeout(self.backend_timeout, backend.transcribe(utterance));
            match attempt.await {
                Ok(Ok(text)) => {
                    let text = text.trim();
                    if text.is_empty() {
                        tracing::debug!(backend = name, "backend returned no text");
                        continue;
                    }
                    tracing::info!(backend = name, transcript = %text, "recognized");
                    return RecognitionResult {
                        text: text.to_string(),
                        backend: Some(name.to_string()),
                        success: true,
                    };
                }
                Ok(Err(e)) => {
                    tracing::warn!(backend = name, error = %e, "recognition backend failed");
                }
                Err(_) => {
                    tracing::warn!(backend = name, timeout = ?self.backend_timeout, "recognition backend timed out");
                }
            }
        }

        tracing::debug!("no backend recognized the utterance");
        RecognitionResult::empty()
    }
}

/// Response from Whisper-compatible transcription APIs
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Whisper transcription over an `OpenAI`-compatible endpoint
///
/// Pointing `base_url` at a local server makes this an offline backend.
pub struct WhisperBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    language: String,
}

impl WhisperBackend {
    /// Hosted `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn openai(api_key: String, model: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for Whisper".to_string()));
        }

        Ok(Self {
            name: "whisper".to_string(),
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: Some(api_key),
            model,
            language,
        })
    }

    /// Whisper-compatible server on the local network (no key)
    #[must_use]
    pub fn local(base_url: String, model: String, language: String) -> Self {
        Self {
            name: "local_whisper".to_string(),
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model,
            language,
        }
    }
}

#[async_trait]
impl SpeechBackend for WhisperBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        let audio = utterance.to_wav()?;
        tracing::debug!(backend = %self.name, audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

/// Deepgram hosted recognition
pub struct DeepgramBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
}

impl DeepgramBackend {
    /// Create a Deepgram backend
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, model: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
        })
    }
}

#[async_trait]
impl SpeechBackend for DeepgramBackend {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        let audio = utterance.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&language={}&punctuate=true",
            self.model, self.language
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        Ok(result.into_transcript())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::arbiter::AudioOwner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Text(&'static str),
        Fail,
    }

    struct FakeBackend {
        name: &'static str,
        script: Script,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SpeechBackend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn transcribe(&self, _utterance: &Utterance) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Text(t) => Ok(t.to_string()),
                Script::Fail => Err(Error::Stt("boom".to_string())),
            }
        }
    }

    fn utterance() -> Utterance {
        Utterance::new(vec![0.1; 1600], 16000)
    }

    #[tokio::test]
    async fn test_first_success_stops_chain() {
        let first = FakeBackend::new("a", Script::Text("你好"));
        let second = FakeBackend::new("b", Script::Text("hello"));
        let chain = RecognizerChain::new(
            vec![first.clone(), second.clone()],
            Arc::new(AudioArbiter::new()),
        );

        let result = chain.recognize(&utterance()).await;
        assert!(result.success);
        assert_eq!(result.text, "你好");
        assert_eq!(result.backend.as_deref(), Some("a"));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_falls_through() {
        let first = FakeBackend::new("a", Script::Fail);
        let second = FakeBackend::new("b", Script::Text("  "));
        let third = FakeBackend::new("c", Script::Text(" 在吗 "));
        let chain = RecognizerChain::new(
            vec![first.clone(), second.clone(), third],
            Arc::new(AudioArbiter::new()),
        );

        let result = chain.recognize(&utterance()).await;
        assert_eq!(result.text, "在吗");
        assert_eq!(result.backend.as_deref(), Some("c"));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_fail_is_empty() {
        let chain = RecognizerChain::new(
            vec![FakeBackend::new("a", Script::Fail), FakeBackend::new("b", Script::Text(""))],
            Arc::new(AudioArbiter::new()),
        );

        assert_eq!(chain.recognize(&utterance()).await, RecognitionResult::empty());
    }

    #[tokio::test]
    async fn test_playback_suppresses_recognition() {
        let arbiter = Arc::new(AudioArbiter::new());
        let backend = FakeBackend::new("a", Script::Text("echo"));
        let chain = RecognizerChain::new(vec![backend.clone()], Arc::clone(&arbiter));

        assert!(arbiter.acquire(AudioOwner::Playback));
        let result = chain.recognize(&utterance()).await;
        assert!(!result.success);
        assert!(result.text.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deepgram_response_parse() {
        let json = r#"{"results":{"channels":[{"alternatives":[{"transcript":"hi there"}]}]}}"#;
        let response: DeepgramResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_transcript(), "hi there");

        let empty: DeepgramResponse = serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(empty.into_transcript(), "");
    }
}
