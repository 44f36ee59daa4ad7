//! Firebase Cloud Messaging (FCM) HTTP v1 push provider.
//!
//! Uses service account credentials for OAuth2 authentication. HTTP v1 has no
//! multicast endpoint, so batches fan out into concurrent single-token
//! requests.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::config::{FcmConfig, PayloadConfig};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::push::payload::{NotificationPayload, PayloadBuilder, Target, WireRequest};
use crate::push::provider::{BatchResponse, PushProvider, SendOutcome, TRANSPORT_ERROR_CODE};
use crate::push::retry::{Attempt, RetryConfig, parse_retry_after, with_retry};
use crate::push::token;

/// Token endpoint used when the service account omits `token_uri`.
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of the signed assertion. Google caps it at one hour.
const ASSERTION_TTL_SECS: u64 = 3600;

/// How long a minted access token is reused. Shorter than the hour Google
/// grants, so a cached token never expires mid-request.
const ACCESS_TOKEN_REUSE: Duration = Duration::from_secs(50 * 60);

/// Tokens per batch call.
pub const FCM_BATCH_LIMIT: usize = 500;

/// The fields of a Google service account key file this provider reads.
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    project_id: String,
    private_key: String,
    client_email: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Serialize)]
struct TokenExchange<'a> {
    grant_type: &'a str,
    assertion: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
}

/// A service account with its parsed signing key.
struct Credentials {
    account: ServiceAccountKey,
    signing_key: EncodingKey,
    algorithm: Algorithm,
}

impl Credentials {
    /// Read and parse a key file. Any problem here is a startup error.
    async fn load(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Fcm(format!("Cannot read service account file '{path}': {e}")))?;
        let account: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| Error::Fcm(format!("Service account file '{path}' is not valid: {e}")))?;
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| Error::Fcm(format!("Service account private key is not valid: {e}")))?;

        Ok(Self {
            account,
            signing_key,
            algorithm: Algorithm::RS256,
        })
    }

    fn token_endpoint(&self) -> &str {
        self.account
            .token_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(GOOGLE_TOKEN_ENDPOINT)
    }

    /// Signed JWT (RS256 for real keys) asserting this account for the messaging scope.
    fn signed_assertion(&self) -> Result<String> {
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Fcm(format!("Clock is before the Unix epoch: {e}")))?
            .as_secs();

        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: MESSAGING_SCOPE,
            aud: self.token_endpoint(),
            iat: issued_at,
            exp: issued_at + ASSERTION_TTL_SECS,
        };
        Ok(encode(
            &Header::new(self.algorithm),
            &claims,
            &self.signing_key,
        )?)
    }
}

struct AccessToken {
    value: String,
    reuse_until: Instant,
}

/// Access token shared by every concurrent send.
#[derive(Default)]
struct TokenCache {
    slot: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    async fn current(&self) -> Option<String> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|token| token.reuse_until > Instant::now())
            .map(|token| token.value.clone())
    }

    /// Return the cached token or mint one with `mint`. Concurrent callers
    /// that miss together wait on the write lock and reuse the first result.
    async fn get_or_mint<F, Fut>(&self, mint: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        if let Some(value) = self.current().await {
            return Ok(value);
        }

        let mut slot = self.slot.write().await;
        if let Some(token) = slot.as_ref()
            && token.reuse_until > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let value = mint().await?;
        *slot = Some(AccessToken {
            value: value.clone(),
            reuse_until: Instant::now() + ACCESS_TOKEN_REUSE,
        });
        Ok(value)
    }

    /// Drop the cached token if it is still `used`. A token minted after
    /// `used` was handed out is kept.
    async fn invalidate(&self, used: &str) {
        let mut slot = self.slot.write().await;
        if slot.as_ref().is_some_and(|token| token.value == used) {
            slot.take();
        }
    }

    #[cfg(test)]
    fn preloaded(value: &str) -> Self {
        Self {
            slot: RwLock::new(Some(AccessToken {
                value: value.to_string(),
                reuse_until: Instant::now() + ACCESS_TOKEN_REUSE,
            })),
        }
    }
}

/// `messages:send` success body.
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    name: String,
}

/// FCM error response.
#[derive(Debug, Deserialize)]
struct FcmErrorResponse {
    error: FcmError,
}

#[derive(Debug, Deserialize)]
struct FcmError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// Pull the most specific error code out of an FCM error body.
///
/// `details[].errorCode` wins over `error.status`; an unparseable body falls
/// back to `HTTP_<status>`.
fn rejection_from_body(status: StatusCode, body: &str) -> SendOutcome {
    let fallback_code = format!("HTTP_{}", status.as_u16());
    let fallback_message = status
        .canonical_reason()
        .unwrap_or("unexpected response")
        .to_string();

    match serde_json::from_str::<FcmErrorResponse>(body) {
        Ok(FcmErrorResponse { error }) => {
            let code = error
                .details
                .iter()
                .find_map(|d| d.error_code.clone())
                .or_else(|| (!error.status.is_empty()).then(|| error.status.clone()))
                .unwrap_or(fallback_code);
            let message = if error.message.is_empty() {
                fallback_message
            } else {
                error.message
            };
            SendOutcome::rejected(code, message)
        }
        Err(_) => SendOutcome::rejected(fallback_code, fallback_message),
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// FCM push provider.
pub struct FcmProvider {
    http_client: Client,
    config: FcmConfig,
    builder: PayloadBuilder,
    retry: RetryConfig,
    max_concurrency: usize,
    /// `None` when no key file is configured; sends then fail as a whole.
    credentials: Option<Credentials>,
    tokens: TokenCache,
    metrics: Option<Arc<Metrics>>,
}

impl FcmProvider {
    /// Create a provider. The service account is read and its key parsed
    /// here, once; a bad key file fails startup instead of the first send.
    pub async fn new(
        config: FcmConfig,
        payload: PayloadConfig,
        max_concurrency: usize,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let credentials = match config.service_account_path.as_str() {
            "" => None,
            path => Some(Credentials::load(path).await?),
        };

        let retry = RetryConfig {
            max_retries: config.max_retries,
            ..RetryConfig::default()
        };

        Ok(Self {
            http_client,
            config,
            builder: PayloadBuilder::new(payload),
            retry,
            max_concurrency: max_concurrency.max(1),
            credentials,
            tokens: TokenCache::default(),
            metrics,
        })
    }

    async fn access_token(&self) -> Result<String> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Fcm("No service account configured".to_string()))?;

        self.tokens
            .get_or_mint(|| self.exchange_assertion(credentials))
            .await
    }

    /// Trade a signed assertion for an access token.
    async fn exchange_assertion(&self, credentials: &Credentials) -> Result<String> {
        let assertion = credentials.signed_assertion()?;
        let response = self
            .http_client
            .post(credentials.token_endpoint())
            .form(&TokenExchange {
                grant_type: JWT_BEARER_GRANT,
                assertion: &assertion,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fcm(format!(
                "Access token exchange rejected ({status}): {body}"
            )));
        }

        let grant: TokenGrant = response.json().await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_auth_token_refresh("fcm_oauth");
        }
        trace!("Minted FCM access token");
        Ok(grant.access_token)
    }

    /// Explicit project id, else the service account's.
    fn project_id(&self) -> Result<&str> {
        match (&self.config.project_id, &self.credentials) {
            (id, _) if !id.is_empty() => Ok(id.as_str()),
            (_, Some(credentials)) => Ok(credentials.account.project_id.as_str()),
            _ => Err(Error::Fcm("No project ID configured".to_string())),
        }
    }

    fn send_url(&self) -> Result<String> {
        let base = self.config.api_base_url.trim_end_matches('/');
        Ok(format!(
            "{base}/v1/projects/{}/messages:send",
            self.project_id()?
        ))
    }

    /// One HTTP attempt. Never fails: network errors become rejections.
    async fn attempt(
        &self,
        url: &str,
        access_token: &str,
        request: &WireRequest,
        recipient: &str,
    ) -> Attempt<SendOutcome> {
        let response = match self
            .http_client
            .post(url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(recipient = %recipient, error = %e, "FCM request failed");
                return Attempt::Done(SendOutcome::rejected(TRANSPORT_ERROR_CODE, e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            let message_id = response
                .json::<SendResponse>()
                .await
                .map(|r| r.name)
                .unwrap_or_default();
            trace!(recipient = %recipient, "FCM notification accepted");
            return Attempt::Done(SendOutcome::Accepted { message_id });
        }

        let retry_after = parse_retry_after(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();
        let outcome = rejection_from_body(status, &body);

        if let SendOutcome::Rejected { error_code, .. } = &outcome {
            if status == StatusCode::UNAUTHORIZED {
                debug!(recipient = %recipient, code = %error_code, "FCM rejected access token");
                self.tokens.invalidate(access_token).await;
            } else {
                debug!(
                    recipient = %recipient,
                    status = %status,
                    code = %error_code,
                    "FCM rejected message"
                );
            }
        }

        if is_transient(status) {
            Attempt::Retriable {
                status_code: status.as_u16(),
                retry_after,
                outcome,
            }
        } else {
            Attempt::Done(outcome)
        }
    }

    /// Build, send and retry one message.
    async fn send_message(&self, target: Target, content: &NotificationPayload) -> Result<SendOutcome> {
        let url = self.send_url()?;
        let access_token = self.access_token().await?;

        let recipient = match &target {
            Target::Token(t) => token::redact(t),
            Target::Topic(t) => format!("topic:{t}"),
        };
        let request = WireRequest {
            message: self.builder.build(content, &target),
        };

        let retried = with_retry(&self.retry, self.name(), || {
            self.attempt(&url, &access_token, &request, &recipient)
        })
        .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_transport_retries(self.name(), retried.retries);
        }
        Ok(retried.value)
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    fn name(&self) -> &'static str {
        "fcm"
    }

    fn is_configured(&self) -> bool {
        self.config.enabled && self.credentials.is_some()
    }

    fn batch_limit(&self) -> usize {
        FCM_BATCH_LIMIT
    }

    async fn send_one(&self, token: &str, content: &NotificationPayload) -> Result<SendOutcome> {
        self.send_message(Target::Token(token.to_string()), content)
            .await
    }

    async fn send_batch(
        &self,
        tokens: &[String],
        content: &NotificationPayload,
    ) -> Result<BatchResponse> {
        if tokens.len() > FCM_BATCH_LIMIT {
            return Err(Error::InvalidInput(format!(
                "batch of {} exceeds the FCM limit of {FCM_BATCH_LIMIT}",
                tokens.len()
            )));
        }

        // Mint credentials up front so a credential failure fails the whole
        // call instead of every item.
        self.access_token().await?;

        let started = Instant::now();
        let results: Vec<SendOutcome> = stream::iter(tokens.iter().cloned())
            .map(|t| async move {
                // A later item can still fail to get a token after an earlier
                // 401; that only fails this item.
                self.send_message(Target::Token(t), content)
                    .await
                    .unwrap_or_else(|e| SendOutcome::rejected(TRANSPORT_ERROR_CODE, e.to_string()))
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let response = BatchResponse::from_results(results);
        debug!(
            tokens = tokens.len(),
            success = response.success_count,
            failure = response.failure_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "FCM batch complete"
        );
        if response.failure_count > 0 && response.success_count == 0 {
            warn!(tokens = tokens.len(), "Every message in FCM batch was rejected");
        }
        Ok(response)
    }

    async fn send_topic(&self, topic: &str, content: &NotificationPayload) -> Result<SendOutcome> {
        if topic.trim().is_empty() {
            return Err(Error::InvalidInput("topic must not be empty".to_string()));
        }
        self.send_message(Target::Topic(topic.to_string()), content)
            .await
    }
}

#[cfg(test)]
impl FcmProvider {
    /// Provider for tests. With `with_credentials`, an access token is
    /// already cached so sends never reach the token endpoint.
    pub(crate) fn mock(config: FcmConfig, with_credentials: bool) -> Self {
        let (credentials, tokens) = if with_credentials {
            let account = ServiceAccountKey {
                project_id: config.project_id.clone(),
                private_key: String::new(),
                client_email: "push@test-project.iam.gserviceaccount.com".to_string(),
                token_uri: None,
            };
            let credentials = Credentials {
                account,
                signing_key: EncodingKey::from_secret(b"unused"),
                algorithm: Algorithm::HS256,
            };
            (
                Some(credentials),
                TokenCache::preloaded("test-access-token"),
            )
        } else {
            (None, TokenCache::default())
        };

        Self {
            http_client: Client::new(),
            retry: RetryConfig {
                max_retries: config.max_retries,
                initial_backoff: Duration::from_millis(1),
            },
            config,
            builder: PayloadBuilder::new(PayloadConfig::default()),
            max_concurrency: 4,
            credentials,
            tokens,
            metrics: None,
        }
    }

    /// Mint access tokens from `token_uri`, starting with `cached` in the
    /// cache.
    pub(crate) fn with_token_endpoint(mut self, token_uri: &str, cached: &str) -> Self {
        if let Some(credentials) = self.credentials.as_mut() {
            credentials.account.token_uri = Some(token_uri.to_string());
        }
        self.tokens = TokenCache::preloaded(cached);
        self
    }
}
