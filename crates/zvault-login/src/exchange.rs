//! Token exchange against the auth backend.
//!
//! [`AuthApi`] is the seam between the login state machine and the HTTP
//! API; [`HttpAuthApi`](crate::HttpAuthApi) implements it with reqwest and
//! the unit tests substitute a stub.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ExchangeError, LoginError};

/// The `auth` block returned by login endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub entity_id: String,
    /// Present when the login must be completed with an MFA step.
    #[serde(default)]
    pub mfa_requirement: Option<serde_json::Value>,
}

/// Session fields resolved through `lookup-self`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenFields {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub ttl: u64,
    /// Not returned by `lookup-self`; filled from the login response.
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    /// Namespace the token belongs to, with a trailing slash.
    #[serde(default)]
    pub namespace_path: Option<String>,
}

/// Answer of the SAML `sso_service_url` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SsoServiceUrl {
    pub sso_service_url: String,
    pub token_poll_id: String,
}

/// One round of SAML token polling.
#[derive(Debug, Clone, PartialEq)]
pub enum SamlPoll {
    /// The provider has not posted the assertion yet.
    Pending,
    /// The assertion was accepted and a token issued.
    Ready(AuthResponse),
}

/// Successful OIDC exchange: the login response and the looked-up fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenResult {
    pub auth: AuthResponse,
    pub fields: TokenFields,
}

/// Requests the login flows make against the auth backend.
///
/// `namespace` is sent as `X-Vault-Namespace` when present.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /v1/auth/{mount}/oidc/auth_url` → provider authorization URL.
    async fn oidc_auth_url(
        &self,
        mount: &str,
        role: &str,
        redirect_uri: &str,
        namespace: Option<&str>,
    ) -> Result<String, ExchangeError>;

    /// `GET /v1/auth/{mount}/oidc/callback` → client token.
    async fn oidc_callback(
        &self,
        mount: &str,
        namespace: Option<&str>,
        state: &str,
        code: &str,
    ) -> Result<AuthResponse, ExchangeError>;

    /// `GET /v1/auth/token/lookup-self` with `X-Vault-Token`.
    async fn lookup_self(
        &self,
        token: &str,
        namespace: Option<&str>,
    ) -> Result<TokenFields, ExchangeError>;

    /// `POST /v1/auth/{mount}/sso_service_url` → IdP URL and poll id.
    async fn saml_sso_service_url(
        &self,
        mount: &str,
        role: Option<&str>,
        acs_url: &str,
        client_challenge: &str,
        namespace: Option<&str>,
    ) -> Result<SsoServiceUrl, ExchangeError>;

    /// `POST /v1/auth/{mount}/token` → pending or a client token.
    async fn saml_token(
        &self,
        mount: &str,
        token_poll_id: &str,
        client_verifier: &str,
        namespace: Option<&str>,
    ) -> Result<SamlPoll, ExchangeError>;

    /// `POST /v1/auth/token/renew-self`.
    async fn renew_self(
        &self,
        token: &str,
        namespace: Option<&str>,
    ) -> Result<AuthResponse, ExchangeError>;

    /// `POST /v1/auth/token/revoke-self`.
    async fn revoke_self(&self, token: &str, namespace: Option<&str>) -> Result<(), ExchangeError>;

    /// Assertion consumer URL the SAML provider posts back to.
    fn saml_acs_url(&self, mount: &str) -> String;
}

/// Redirect URI registered for the console's OIDC callback page.
#[must_use]
pub fn oidc_redirect_uri(origin: &str, mount: &str) -> String {
    format!(
        "{}/ui/vault/auth/{}/oidc/callback",
        origin.trim_end_matches('/'),
        mount.trim_matches('/')
    )
}

/// Exchange an authorization code and resolve the session fields.
///
/// # Errors
///
/// - [`LoginError::Exchange`] if the callback or `lookup-self` fails.
/// - [`LoginError::MfaRequired`] if the backend asks for an MFA step.
pub async fn exchange_oidc_code(
    api: &dyn AuthApi,
    mount: &str,
    namespace: Option<&str>,
    state: &str,
    code: &str,
) -> Result<TokenResult, LoginError> {
    let auth = api.oidc_callback(mount, namespace, state, code).await?;
    resolve_token(api, auth, namespace).await
}

/// Look up the token of a login response, merging what `lookup-self` omits.
///
/// # Errors
///
/// Same as [`exchange_oidc_code`].
pub async fn resolve_token(
    api: &dyn AuthApi,
    auth: AuthResponse,
    namespace: Option<&str>,
) -> Result<TokenResult, LoginError> {
    if auth.mfa_requirement.is_some() {
        return Err(LoginError::MfaRequired);
    }
    if auth.client_token.is_empty() {
        return Err(ExchangeError::InvalidResponse(
            "login response did not include a client token".to_owned(),
        )
        .into());
    }
    let mut fields = api.lookup_self(&auth.client_token, namespace).await?;
    if fields.lease_duration == 0 {
        fields.lease_duration = auth.lease_duration;
    }
    if fields.entity_id.is_empty() {
        fields.entity_id.clone_from(&auth.entity_id);
    }
    debug!(policies = ?fields.policies, ttl = fields.ttl, "token resolved");
    Ok(TokenResult { auth, fields })
}

/// Verifier/challenge pair binding a SAML poll to the browser that started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVerifier {
    pub verifier: String,
    /// `base64(SHA-256(verifier))`.
    pub challenge: String,
}

impl ClientVerifier {
    /// Generate a fresh verifier (64 hex chars from two UUIDs).
    #[must_use]
    pub fn generate() -> Self {
        let verifier = uuid::Uuid::new_v4().simple().to_string()
            + &uuid::Uuid::new_v4().simple().to_string();
        Self::from_verifier(verifier)
    }

    /// Derive the challenge for a known verifier.
    #[must_use]
    pub fn from_verifier(verifier: String) -> Self {
        let challenge =
            base64::engine::general_purpose::STANDARD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Value of query parameter `name` in `url`, percent-decoded.
#[must_use]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| {
            let value = value.replace('+', " ");
            urlencoding::decode(&value).map_or(value.clone(), |v| v.into_owned())
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::StubAuthApi;

    #[test]
    fn redirect_uri_points_at_console_callback() {
        assert_eq!(
            oidc_redirect_uri("https://vault.example.com/", "/my-oidc/"),
            "https://vault.example.com/ui/vault/auth/my-oidc/oidc/callback"
        );
    }

    #[test]
    fn query_param_decodes_values() {
        let url = "https://idp/authorize?client_id=vault&state=st%2Cns%3Dteam&redirect_uri=x#frag";
        assert_eq!(query_param(url, "state").as_deref(), Some("st,ns=team"));
        assert_eq!(query_param(url, "client_id").as_deref(), Some("vault"));
        assert_eq!(query_param(url, "nonce"), None);
        assert_eq!(query_param("https://idp/authorize", "state"), None);
    }

    #[test]
    fn verifier_challenge_is_sha256_base64() {
        let v = ClientVerifier::from_verifier("abc".to_owned());
        assert_eq!(v.challenge, "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");

        let generated = ClientVerifier::generate();
        assert_eq!(generated.verifier.len(), 64);
        assert_ne!(generated.verifier, ClientVerifier::generate().verifier);
    }

    #[tokio::test]
    async fn exchange_merges_login_response_into_fields() {
        let api = StubAuthApi::default();
        *api.lookup.lock().unwrap() = Ok(TokenFields {
            display_name: "oidc-alice".to_owned(),
            ttl: 0,
            ..TokenFields::default()
        });

        let result = exchange_oidc_code(&api, "oidc", Some("team"), "st", "cd")
            .await
            .unwrap();
        assert_eq!(result.auth.client_token, "s.client-token");
        assert_eq!(result.fields.lease_duration, 3600);
        assert_eq!(
            api.calls(),
            vec![
                "callback oidc state=st code=cd ns=team",
                "lookup-self s.client-token ns=team"
            ]
        );
    }

    #[tokio::test]
    async fn failed_callback_skips_lookup() {
        let api = StubAuthApi::default();
        *api.callback.lock().unwrap() = Err((400, vec!["invalid code".to_owned()]));

        let err = exchange_oidc_code(&api, "oidc", None, "st", "cd")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed: invalid code");
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn mfa_requirement_is_reported() {
        let api = StubAuthApi::default();
        api.callback.lock().unwrap().as_mut().unwrap().mfa_requirement =
            Some(serde_json::json!({ "mfa_request_id": "x" }));

        let err = exchange_oidc_code(&api, "oidc", None, "st", "cd")
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::MfaRequired));
    }
}
