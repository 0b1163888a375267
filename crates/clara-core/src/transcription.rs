//! Speech-to-text capability: `transcribe(audio) -> Option<text>`.

use crate::config::TranscriptionConfig;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("Transcription request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transcription API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// `Ok(None)` for silence or empty audio; no transcript line is created for it.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, TranscribeError>;
}

/// OpenAI-compatible `/audio/transcriptions` client (Whisper).
pub struct WhisperApiTranscriber {
    api_base: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl WhisperApiTranscriber {
    /// Returns `None` when no API key is configured.
    pub fn from_config(cfg: &TranscriptionConfig) -> Result<Option<Self>, TranscribeError> {
        let Some(key) = cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Some(Self {
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: key.to_string(),
            model: cfg.model.clone(),
            client,
        }))
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, TranscribeError> {
        if audio.is_empty() {
            return Ok(None);
        }
        let url = format!("{}/audio/transcriptions", self.api_base);
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("chunk.webm")
            .mime_str("audio/webm")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(TranscribeError::Api { status, body });
        }
        let json: serde_json::Value = res.json().await?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_means_no_transcriber() {
        assert!(WhisperApiTranscriber::from_config(&TranscriptionConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn empty_audio_short_circuits() {
        let cfg = TranscriptionConfig {
            api_key: Some("k".into()),
            api_base: "http://127.0.0.1:9".into(),
            ..TranscriptionConfig::default()
        };
        let t = WhisperApiTranscriber::from_config(&cfg).unwrap().unwrap();
        assert_eq!(t.transcribe(&[]).await.unwrap(), None);
    }
}
