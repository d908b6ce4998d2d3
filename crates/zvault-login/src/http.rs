//! HTTP implementation of [`AuthApi`].

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::{AuthApi, AuthResponse, SamlPoll, SsoServiceUrl, TokenFields};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("zvault-login/", env!("CARGO_PKG_VERSION"));

/// Header carrying the client token.
pub const TOKEN_HEADER: &str = "X-Vault-Token";
/// Header scoping a request to a namespace.
pub const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Settings for [`HttpAuthApi`].
#[derive(Debug, Clone)]
pub struct HttpAuthApiConfig {
    /// Server address, e.g. `https://vault.example.com:8200`.
    pub base_url: String,
    /// Per-request timeout. Default: 30 seconds.
    pub timeout: Duration,
}

impl HttpAuthApiConfig {
    /// Settings for `base_url` with the default timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// reqwest-backed client for the auth endpoints.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct AuthEnvelope {
    auth: Option<AuthResponse>,
}

#[derive(Deserialize)]
struct AuthUrlData {
    #[serde(default)]
    auth_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

impl HttpAuthApi {
    /// Client for `base_url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Config`] if the URL is empty or the HTTP
    /// client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExchangeError> {
        Self::with_config(HttpAuthApiConfig::new(base_url))
    }

    /// Client from explicit settings.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_config(config: HttpAuthApiConfig) -> Result<Self, ExchangeError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            return Err(ExchangeError::Config("server address is empty".to_owned()));
        }
        let timeout = if config.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            config.timeout
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExchangeError::Config(e.to_string()))?;
        Ok(Self { base_url, client })
    }

    /// The server address requests go to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn scoped(req: RequestBuilder, token: Option<&str>, namespace: Option<&str>) -> RequestBuilder {
        let req = match token {
            Some(t) => req.header(TOKEN_HEADER, t),
            None => req,
        };
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => req.header(NAMESPACE_HEADER, ns),
            None => req,
        }
    }

    /// Send and return the status with the raw body. Non-success statuses
    /// are returned, not converted, so callers can special-case them.
    async fn send(req: RequestBuilder) -> Result<(StatusCode, String), ExchangeError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout
            } else {
                ExchangeError::Network(e)
            }
        })?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(status = status.as_u16(), "auth api response");
        Ok((status, body))
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ExchangeError> {
        let (status, body) = Self::send(req).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn api_error(status: StatusCode, body: &str) -> ExchangeError {
    let messages = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.errors)
        .unwrap_or_default();
    let messages = if messages.is_empty() {
        vec![format!("HTTP {}", status.as_u16())]
    } else {
        messages
    };
    ExchangeError::Api {
        status: status.as_u16(),
        messages,
    }
}

fn require_auth(envelope: AuthEnvelope) -> Result<AuthResponse, ExchangeError> {
    envelope.auth.ok_or_else(|| {
        ExchangeError::InvalidResponse("login response did not include an auth block".to_owned())
    })
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthApi {
    async fn oidc_auth_url(
        &self,
        mount: &str,
        role: &str,
        redirect_uri: &str,
        namespace: Option<&str>,
    ) -> Result<String, ExchangeError> {
        let req = self
            .client
            .post(self.url(&format!("auth/{mount}/oidc/auth_url")))
            .json(&serde_json::json!({ "role": role, "redirect_uri": redirect_uri }));
        let resp: DataEnvelope<AuthUrlData> =
            Self::send_json(Self::scoped(req, None, namespace)).await?;
        if resp.data.auth_url.is_empty() {
            return Err(ExchangeError::InvalidResponse(
                "OIDC login is not configured for this mount".to_owned(),
            ));
        }
        Ok(resp.data.auth_url)
    }

    async fn oidc_callback(
        &self,
        mount: &str,
        namespace: Option<&str>,
        state: &str,
        code: &str,
    ) -> Result<AuthResponse, ExchangeError> {
        let req = self
            .client
            .get(self.url(&format!("auth/{mount}/oidc/callback")))
            .query(&[("state", state), ("code", code)]);
        require_auth(Self::send_json(Self::scoped(req, None, namespace)).await?)
    }

    async fn lookup_self(
        &self,
        token: &str,
        namespace: Option<&str>,
    ) -> Result<TokenFields, ExchangeError> {
        let req = self.client.get(self.url("auth/token/lookup-self"));
        let resp: DataEnvelope<TokenFields> =
            Self::send_json(Self::scoped(req, Some(token), namespace)).await?;
        Ok(resp.data)
    }

    async fn saml_sso_service_url(
        &self,
        mount: &str,
        role: Option<&str>,
        acs_url: &str,
        client_challenge: &str,
        namespace: Option<&str>,
    ) -> Result<SsoServiceUrl, ExchangeError> {
        let mut body = serde_json::json!({
            "acs_url": acs_url,
            "client_challenge": client_challenge,
            "client_type": "browser",
        });
        if let Some(role) = role.filter(|r| !r.is_empty()) {
            body["role"] = serde_json::Value::from(role);
        }
        let req = self
            .client
            .post(self.url(&format!("auth/{mount}/sso_service_url")))
            .json(&body);
        let resp: DataEnvelope<SsoServiceUrl> =
            Self::send_json(Self::scoped(req, None, namespace)).await?;
        if resp.data.sso_service_url.is_empty() || resp.data.token_poll_id.is_empty() {
            return Err(ExchangeError::InvalidResponse(
                "SAML login is not configured for this mount".to_owned(),
            ));
        }
        Ok(resp.data)
    }

    async fn saml_token(
        &self,
        mount: &str,
        token_poll_id: &str,
        client_verifier: &str,
        namespace: Option<&str>,
    ) -> Result<SamlPoll, ExchangeError> {
        let req = self
            .client
            .post(self.url(&format!("auth/{mount}/token")))
            .json(&serde_json::json!({
                "token_poll_id": token_poll_id,
                "client_verifier": client_verifier,
                "client_type": "browser",
            }));
        let (status, body) = Self::send(Self::scoped(req, None, namespace)).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Ok(SamlPoll::Pending);
        }
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let envelope: AuthEnvelope = serde_json::from_str(&body)?;
        Ok(SamlPoll::Ready(require_auth(envelope)?))
    }

    async fn renew_self(
        &self,
        token: &str,
        namespace: Option<&str>,
    ) -> Result<AuthResponse, ExchangeError> {
        let req = self
            .client
            .post(self.url("auth/token/renew-self"))
            .json(&serde_json::json!({}));
        require_auth(Self::send_json(Self::scoped(req, Some(token), namespace)).await?)
    }

    async fn revoke_self(&self, token: &str, namespace: Option<&str>) -> Result<(), ExchangeError> {
        let req = self.client.post(self.url("auth/token/revoke-self"));
        let (status, body) = Self::send(Self::scoped(req, Some(token), namespace)).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(api_error(status, &body))
        }
    }

    fn saml_acs_url(&self, mount: &str) -> String {
        self.url(&format!("auth/{}/callback", mount.trim_matches('/')))
    }
}
