//! Claude on Google Vertex AI
//!
//! Authenticates with a self-signed service account JWT used directly as the
//! bearer token. The token is minted at construction and re-minted shortly
//! before it expires.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conflux_config::{StreamConfig, VertexAnthropicConfig};
use jwt_compact::alg::Rsa;
use jwt_compact::{AlgorithmExt, Claims, Header, TimeOptions};
use reqwest::{Client, RequestBuilder};
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use serde::{Deserialize, Serialize};
use url::Url;

use super::anthropic::{MODELS, beta_header, bridge_stream, parse_error, read_response, with_betas};
use super::{ModelAllowList, Provider, send};
use crate::error::LlmError;
use crate::protocol::anthropic::AnthropicRequest;
use crate::stream::ChatCompletionStream;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

/// Body field replacing the `anthropic-version` header on Vertex
const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

const SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/cloud-platform.read-only";

/// Lifetime of a minted token
const TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Tokens this close to expiry are replaced before use
const REFRESH_MARGIN: Duration = Duration::minutes(5);

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key_id: String,
    private_key: String,
}

#[derive(Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: &'a str,
}

/// Service account identity able to sign access tokens
struct ServiceAccount {
    email: String,
    key_id: String,
    signing_key: RsaPrivateKey,
}

impl ServiceAccount {
    fn from_file(path: &Path) -> Result<Self, LlmError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LlmError::Config(format!("failed to read credentials file {}: {e}", path.display()))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| LlmError::Config(format!("invalid service account JSON in {}: {e}", path.display())))?;
        let signing_key = RsaPrivateKey::from_pkcs8_pem(&key.private_key)
            .map_err(|e| LlmError::Config(format!("invalid service account private key: {e}")))?;

        Ok(Self {
            email: key.client_email,
            key_id: key.private_key_id,
            signing_key,
        })
    }

    fn mint(&self) -> Result<AccessToken, LlmError> {
        let claims = Claims::new(ServiceAccountClaims {
            iss: &self.email,
            sub: &self.email,
            scope: SCOPES,
        })
        .set_duration_and_issuance(&TimeOptions::default(), TOKEN_LIFETIME);

        let expires_at = claims.expiration.unwrap_or_else(|| Utc::now() + TOKEN_LIFETIME);
        let header = Header::empty().with_key_id(&self.key_id);

        let value = Rsa::rs256()
            .token(&header, &claims, &self.signing_key)
            .map_err(|e| LlmError::Config(format!("failed to sign vertex access token: {e}")))?;

        Ok(AccessToken { value, expires_at })
    }
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < REFRESH_MARGIN
    }
}

/// Claude models served through Vertex AI `rawPredict`
pub struct VertexAnthropicProvider {
    name: String,
    client: Client,
    base_url: Url,
    project_id: String,
    location: String,
    account: ServiceAccount,
    token: Mutex<AccessToken>,
    betas: Option<String>,
    models: ModelAllowList,
    queue_capacity: usize,
}

impl VertexAnthropicProvider {
    /// Create from provider configuration, minting the first access token
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Config` if the credentials file cannot be read or
    /// signed with, or the location yields an invalid endpoint.
    pub fn new(name: String, config: &VertexAnthropicConfig, stream: &StreamConfig) -> Result<Self, LlmError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(&format!("https://{}-aiplatform.googleapis.com/v1", config.location))
                .map_err(|e| LlmError::Config(format!("invalid vertex location '{}': {e}", config.location)))?,
        };

        let account = ServiceAccount::from_file(&config.credentials_file)?;
        let token = account.mint()?;
        tracing::info!(
            provider = %name,
            token_prefix = %token.value.get(..10).unwrap_or_default(),
            "using vertex ai access token"
        );

        Ok(Self {
            name,
            client: Client::new(),
            base_url,
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            account,
            token: Mutex::new(token),
            betas: beta_header(&config.betas)?,
            models: ModelAllowList::new(MODELS, &config.extra_models),
            queue_capacity: stream.queue_capacity,
        })
    }

    /// Build the `rawPredict` or `streamRawPredict` URL for a model
    fn predict_url(&self, model: &str, stream: bool) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let method = if stream { "streamRawPredict" } else { "rawPredict" };
        format!(
            "{base}/projects/{}/locations/{}/publishers/anthropic/models/{model}:{method}",
            self.project_id, self.location
        )
    }

    /// Current bearer token, re-minted when close to expiry
    fn bearer(&self) -> Result<String, LlmError> {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);

        if token.is_stale(Utc::now()) {
            *token = self.account.mint()?;
            tracing::debug!(provider = %self.name, "refreshed vertex ai access token");
        }

        Ok(token.value.clone())
    }

    fn request(&self, request: &ChatCompletionRequest, stream: bool) -> Result<RequestBuilder, LlmError> {
        let mut body = AnthropicRequest::try_from(request)?;
        body.model = None;
        body.anthropic_version = Some(VERTEX_ANTHROPIC_VERSION.to_owned());
        body.stream = stream.then_some(true);

        let builder = self
            .client
            .post(self.predict_url(&request.model, stream))
            .bearer_auth(self.bearer()?)
            .json(&body);

        Ok(with_betas(builder, self.betas.as_deref()))
    }
}

#[async_trait]
impl Provider for VertexAnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let builder = self.request(request, false)?;
        let response = send(&self.name, builder, parse_error).await?;

        read_response(&self.name, response).await
    }

    async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let builder = self.request(request, true)?;
        let response = send(&self.name, builder, parse_error).await?;
        tracing::debug!(provider = %self.name, model = %request.model, "stream opened");

        Ok(bridge_stream(response, self.queue_capacity))
    }
}
