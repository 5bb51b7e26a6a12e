//! Voice processing module
//!
//! Audio device arbitration, wake word listening, utterance capture,
//! recognition, synthesis and the serialized speech output queue.

pub mod arbiter;
mod capture;
mod endpoint;
mod listener;
mod playback;
mod resample;
mod speech_queue;
mod stt;
mod tts;
mod wake_word;

pub use arbiter::{AudioArbiter, AudioOwner, OwnershipEvent, OwnershipGuard};
pub use capture::{AudioCapture, SPEECH_SAMPLE_RATE, rms_energy, samples_to_wav};
pub use endpoint::{EndpointStatus, Endpointer, MicrophoneCapture, Utterance, UtteranceSource};
pub use listener::{AudioSource, ListenerOptions, MicrophoneSource, SourceFactory, WakeWordListener};
pub use playback::{AudioPlayback, AudioSink, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use resample::{FrameAssembler, resample};
pub use speech_queue::{PlaybackOutcome, SpeechQueue, SpeechTicket, strip_stage_directions};
pub use stt::{DeepgramBackend, RecognitionResult, RecognizerChain, SpeechBackend, WhisperBackend};
pub use tts::{ElevenLabsTts, FallbackSynthesizer, OpenAiTts, SynthesisProvider};
pub use wake_word::{EnergyWakeEngine, NO_DETECTION, WakeWordEngine};
