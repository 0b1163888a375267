//! Patient background from the practice system (age, allergies, medications...).

use crate::config::PatientContextConfig;
use crate::models::PatientContext;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Patient context request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Patient context API error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid patient context base URL {0:?}")]
    InvalidBaseUrl(String),
}

/// Source of patient context. `Ok(None)` means the patient is unknown or has no
/// recorded background. Errors are turned into a missing section by the aggregator.
#[async_trait]
pub trait PatientContextSource: Send + Sync {
    async fn fetch_patient_context(&self, patient_id: &str) -> Result<Option<PatientContext>, ContextError>;
}

/// `GET {base_url}/patients/{id}/context`, bearer token optional.
pub struct HttpPatientContextClient {
    base_url: Url,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpPatientContextClient {
    /// Returns `None` when no base URL is configured.
    pub fn from_config(cfg: &PatientContextConfig) -> Result<Option<Self>, ContextError> {
        let Some(base) = cfg
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
        else {
            return Ok(None);
        };
        let base_url = Url::parse(base)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| ContextError::InvalidBaseUrl(base.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Some(Self {
            base_url,
            api_token: cfg.api_token.clone().filter(|t| !t.trim().is_empty()),
            client,
        }))
    }

    /// The id is pushed as a single percent-encoded path segment, so it can never
    /// leave `/patients/{id}/context`.
    fn context_url(&self, patient_id: &str) -> Result<Url, ContextError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| ContextError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("patients")
            .push(patient_id)
            .push("context");
        Ok(url)
    }
}

/// Ids that would be read as relative path steps.
fn is_path_step(patient_id: &str) -> bool {
    matches!(patient_id.trim(), "" | "." | "..")
}

#[async_trait]
impl PatientContextSource for HttpPatientContextClient {
    async fn fetch_patient_context(&self, patient_id: &str) -> Result<Option<PatientContext>, ContextError> {
        if is_path_step(patient_id) {
            debug!("Ignoring unusable patient id {:?}", patient_id);
            return Ok(None);
        }
        let url = self.context_url(patient_id)?;
        let mut req = self.client.get(url);
        if let Some(ref token) = self.api_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;

        if res.status() == StatusCode::NOT_FOUND {
            debug!("No patient context for {}", patient_id);
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ContextError::Upstream { status, body });
        }

        let ctx: PatientContext = res.json().await?;
        Ok((!ctx.is_empty()).then_some(ctx))
    }
}
