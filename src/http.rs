//! HTTP implementations of the collaborator ports.
//!
//! `HttpReasoningClient` talks to the remote reasoning service and
//! `HttpBrowserBridge` to a browser-side bridge that owns the real tabs.

use std::time::Duration;

use action_flow::VerificationChecker;
use agent_core::{
    AutomationHook, DomAction, DomActionExecutor, DomActionOutcome, GenericActionExecutor,
    InteractRequest, InteractResponse, PageExtractor, PageRepresentation, ReasoningService,
    RemoteServiceError, TabInfo,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tabflow_core_types::{StructuredAction, TabId, VerificationCheck, VerificationReport};
use tracing::{debug, warn};
use url::Url;

use crate::config::{BridgeConfig, ReasoningConfig};

pub struct HttpReasoningClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpReasoningClient {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        let endpoint = base_url(&config.base_url)?
            .join("interact")
            .context("invalid reasoning endpoint")?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningClient {
    async fn interact(
        &self,
        request: &InteractRequest,
    ) -> Result<InteractResponse, RemoteServiceError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| RemoteServiceError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            warn!(
                target: "reasoning",
                retry_after_secs = ?retry_after_secs,
                "reasoning service rate limited the request"
            );
            return Err(RemoteServiceError::RateLimited {
                retry_after_secs,
                message,
            });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(RemoteServiceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<InteractResponse>()
            .await
            .map_err(|err| RemoteServiceError::InvalidResponse(err.to_string()))
    }
}

/// `Retry-After` in its delta-seconds form; HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Client for the browser bridge: `POST {base}/tabs/{id}/{operation}`.
pub struct HttpBrowserBridge {
    client: Client,
    base: Url,
}

impl HttpBrowserBridge {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base: base_url(&config.base_url)?,
        })
    }

    pub fn endpoint(&self, tab_id: TabId, operation: &str) -> Result<Url> {
        self.base
            .join(&format!("tabs/{tab_id}/{operation}"))
            .with_context(|| format!("invalid bridge endpoint for {operation}"))
    }

    async fn call<B, T>(&self, tab_id: TabId, operation: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(tab_id, operation)?;
        debug!(%tab_id, operation, "bridge call");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("bridge {operation} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(anyhow!("bridge {operation} returned {status}: {text}"));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("bridge {operation} response invalid"))
    }

    async fn call_unit<B>(&self, tab_id: TabId, operation: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        let _: JsonValue = self.call(tab_id, operation, body).await?;
        Ok(())
    }
}

#[async_trait]
impl PageExtractor for HttpBrowserBridge {
    async fn extract(&self, tab_id: TabId) -> Result<PageRepresentation> {
        self.call(tab_id, "extract", &json!({})).await
    }

    async fn tab_info(&self, tab_id: TabId) -> Result<TabInfo> {
        self.call(tab_id, "info", &json!({})).await
    }
}

#[async_trait]
impl DomActionExecutor for HttpBrowserBridge {
    async fn execute(&self, tab_id: TabId, action: &DomAction) -> Result<DomActionOutcome> {
        self.call(tab_id, "dom-action", action).await
    }
}

#[async_trait]
impl GenericActionExecutor for HttpBrowserBridge {
    async fn execute(&self, tab_id: TabId, action: &StructuredAction) -> Result<()> {
        self.call_unit(tab_id, "action", action).await
    }
}

#[async_trait]
impl AutomationHook for HttpBrowserBridge {
    async fn attach(&self, tab_id: TabId) -> Result<()> {
        self.call_unit(tab_id, "attach", &json!({})).await
    }

    async fn detach(&self, tab_id: TabId) -> Result<()> {
        self.call_unit(tab_id, "detach", &json!({})).await
    }
}

#[async_trait]
impl VerificationChecker for HttpBrowserBridge {
    async fn check(&self, tab_id: TabId, checks: &[VerificationCheck]) -> Result<VerificationReport> {
        self.call(tab_id, "verify", &json!({ "checks": checks })).await
    }
}

/// Parses a base URL and makes sure relative joins append to its path.
fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid base URL `{raw}`"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
