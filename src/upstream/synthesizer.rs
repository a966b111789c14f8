//! Speech synthesis

use async_trait::async_trait;

use super::Synthesizer;
use crate::{Error, Result};

const DEFAULT_ELEVENLABS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_ELEVENLABS_MODEL: &str = "eleven_monolingual_v1";
const DEFAULT_OPENAI_VOICE: &str = "alloy";
const DEFAULT_OPENAI_MODEL: &str = "tts-1";

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

/// Synthesizes speech from reply text
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    provider: TtsProvider,
}

impl SpeechSynthesizer {
    /// Create a synthesizer backed by the OpenAI speech API.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing.
    pub fn new_openai(api_key: String, voice: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for speech synthesis".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice.unwrap_or_else(|| DEFAULT_OPENAI_VOICE.to_string()),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a synthesizer backed by ElevenLabs.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing.
    pub fn new_elevenlabs(api_key: String, voice_id: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for speech synthesis".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id.unwrap_or_else(|| DEFAULT_ELEVENLABS_VOICE.to_string()),
            model: DEFAULT_ELEVENLABS_MODEL.to_string(),
            provider: TtsProvider::ElevenLabs,
        })
    }

    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&SpeechRequest {
                model: &self.model,
                input: text,
                voice: &self.voice,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for SpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), provider = ?self.provider, "synthesizing reply");
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_keys() {
        assert!(SpeechSynthesizer::new_openai(String::new(), None).is_err());
        assert!(SpeechSynthesizer::new_elevenlabs(String::new(), None).is_err());
    }

    #[test]
    fn voice_defaults_per_provider() {
        let openai = SpeechSynthesizer::new_openai("key".to_string(), None).unwrap();
        assert_eq!(openai.voice, DEFAULT_OPENAI_VOICE);

        let eleven =
            SpeechSynthesizer::new_elevenlabs("key".to_string(), Some("v1".to_string())).unwrap();
        assert_eq!(eleven.voice, "v1");
    }
}
