//! OAuth 2.1 authorization code flow with PKCE
//!
//! This module drives the full browser-based authorization code flow for
//! one MCP endpoint, as demanded by the transport when a server answers
//! `401 Unauthorized`:
//!
//! 1. Validate configuration and derive the RFC 8707 resource identifier.
//! 2. Discover protected resource metadata (RFC 9728) and select an
//!    authorization server.
//! 3. Discover authorization server metadata (RFC 8414 / OIDC) and check
//!    PKCE S256 advertisement.
//! 4. Register dynamically (RFC 7591) when no `client_id` is configured.
//! 5. Select scopes, generate PKCE verifier/challenge, `state`, and the
//!    OIDC `nonce` when enabled.
//! 6. Bind the loopback callback server, open the authorization URL in
//!    the browser, and wait for the redirect, the configured timeout, or
//!    cancellation.
//! 7. Validate `state`, surface server errors, and exchange the code at
//!    the token endpoint.
//!
//! All of the flow's own HTTP traffic (registration, token exchange) runs
//! through the resource and registration chain links, so resource
//! indicators and registration tokens are attached by the same code paths
//! the transport uses.
//!
//! # References
//!
//! - OAuth 2.1 draft <https://datatracker.ietf.org/doc/draft-ietf-oauth-v2-1/>
//! - RFC 7636 PKCE <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 7591 Dynamic Registration <https://www.rfc-editor.org/rfc/rfc7591>
//! - RFC 8707 Resource Indicators <https://www.rfc-editor.org/rfc/rfc8707>
//! - RFC 9728 Protected Resource Metadata <https://www.rfc-editor.org/rfc/rfc9728>

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{McprobeError, Result};
use crate::mcp::auth::callback::{CallbackOutcome, CallbackServer};
use crate::mcp::auth::chain::registration::RegistrationLink;
use crate::mcp::auth::chain::resource::ResourceLink;
use crate::mcp::auth::chain::step_up::{
    RetryLedger, StepUpAuthorizer, StepUpLink, StepUpPrompt,
};
use crate::mcp::auth::chain::{HttpExecutor, RequestChain};
use crate::mcp::auth::challenge::BearerChallenge;
use crate::mcp::auth::config::{parse_loopback_redirect, AuthConfig};
use crate::mcp::auth::discovery::{
    self, AuthorizationServerMetadata, ProtectedResourceMetadata,
};
use crate::mcp::auth::gate::{self, MetadataGate};
use crate::mcp::auth::pkce;
use crate::mcp::auth::resource::canonical_resource;
use crate::mcp::auth::scopes::select_scopes;
use crate::mcp::auth::token_store::{OAuthToken, TokenStore};

// ---------------------------------------------------------------------------
// Flow phases
// ---------------------------------------------------------------------------

/// Progress of one authorization attempt, for logging and diagnostics.
///
/// Each `authorize` invocation starts from `Validating` and either reaches
/// `Done` or stops at the phase where it failed; the next invocation
/// starts fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowPhase {
    Validating,
    Discovering,
    Registering,
    Authorizing,
    Exchanging,
    Done,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Raw JSON response from an OAuth token endpoint.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenEndpointResponse {
    /// Converts the raw response into an [`OAuthToken`], turning
    /// `expires_in` seconds into an absolute UTC timestamp.
    fn into_oauth_token(self) -> OAuthToken {
        let expires_at = self.expires_in.map(|secs| {
            chrono::Utc::now()
                + chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        });

        OAuthToken {
            access_token: self.access_token,
            token_type: self.token_type,
            expires_at,
            refresh_token: self.refresh_token,
            scope: self.scope,
        }
    }
}

/// OAuth error document returned by token and registration endpoints.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Dynamic Client Registration request body (RFC 7591).
#[derive(Debug, Serialize)]
struct RegistrationRequest {
    client_name: String,
    redirect_uris: Vec<String>,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    software_id: String,
    software_version: String,
}

/// Dynamic Client Registration response (RFC 7591).
#[derive(Debug, Clone, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Authorization URL opener
// ---------------------------------------------------------------------------

/// Hands the authorization URL to the user.
///
/// The default implementation prints the URL and spawns the system
/// browser. Tests substitute an opener that performs the redirect
/// programmatically.
#[async_trait]
pub trait AuthUrlOpener: Send + Sync {
    /// Presents `url` to the user. Called after the URL passes the
    /// browser-launch gate.
    async fn open(&self, url: &Url) -> Result<()>;
}

/// Default opener: prints the URL for copy/paste and tries the system
/// browser. Browser failures are not errors; the printed URL remains.
struct SystemBrowser;

#[async_trait]
impl AuthUrlOpener for SystemBrowser {
    async fn open(&self, url: &Url) -> Result<()> {
        eprintln!("Open the following URL in your browser to authorize mcprobe:\n{url}");
        gate::try_open_browser(url);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AuthFlow
// ---------------------------------------------------------------------------

/// Drives the OAuth 2.1 authorization code flow for one MCP endpoint.
///
/// Constructed once per session and shared (via [`Arc`]) between the
/// transport's step-up link and the connect path. Tokens land in the
/// shared [`TokenStore`]; a re-authorization replaces the stored token.
pub struct AuthFlow {
    config: AuthConfig,
    /// Canonical resource identifier; `None` with `skip_resource_param`.
    resource: Option<Url>,
    /// Flow-side chain: resource -> registration -> executor. The step-up
    /// link lives only in the transport chain, wrapping this flow.
    chain: Arc<dyn RequestChain>,
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    cancel: CancellationToken,
    opener: Arc<dyn AuthUrlOpener>,
}

impl AuthFlow {
    /// Creates the flow for `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client (also used by the transport).
    /// * `config` - Validated authorization configuration.
    /// * `endpoint` - The MCP endpoint URL; used to derive the resource
    ///   identifier when `resource_uri` is not configured.
    /// * `tokens` - Shared in-memory token store.
    /// * `cancel` - Cancellation token of the enclosing session.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Config`] when the resource identifier
    /// cannot be derived.
    pub fn new(
        http: reqwest::Client,
        config: AuthConfig,
        endpoint: &Url,
        tokens: Arc<TokenStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let resource = if config.skip_resource_param {
            None
        } else if config.resource_uri.is_empty() {
            Some(canonical_resource(endpoint.as_str())?)
        } else {
            Some(canonical_resource(&config.resource_uri)?)
        };

        let executor: Arc<dyn RequestChain> = Arc::new(HttpExecutor::new(http.clone()));
        let registration = Arc::new(RegistrationLink::new(
            Some(config.registration_token.clone()),
            executor,
        ));
        let chain: Arc<dyn RequestChain> =
            Arc::new(ResourceLink::new(resource.clone(), registration));

        Ok(Self {
            config,
            resource,
            chain,
            http,
            tokens,
            cancel,
            opener: Arc::new(SystemBrowser),
        })
    }

    /// Replaces the authorization URL opener. Used by tests to drive the
    /// redirect without a browser.
    pub fn with_url_opener(mut self, opener: Arc<dyn AuthUrlOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// The canonical resource identifier this flow binds tokens to.
    pub fn resource(&self) -> Option<&Url> {
        self.resource.as_ref()
    }

    /// The flow-side request chain (resource and registration links over
    /// the shared client); token exchange and registration run through it.
    pub fn chain(&self) -> Arc<dyn RequestChain> {
        Arc::clone(&self.chain)
    }

    /// Builds the transport-side chain in its fixed outbound order:
    /// resource injection, then registration-token injection, then
    /// step-up handling, then the base executor.
    ///
    /// The step-up link owns the retry ledger (which spans the process
    /// lifetime) and re-enters this flow for re-authorization.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Interactive step-up confirmation hook, when one is
    ///   available. With `step_up_user_prompt` configured and no prompt
    ///   wired in, step-up fails closed.
    pub fn transport_chain(
        self: &Arc<Self>,
        prompt: Option<Arc<dyn StepUpPrompt>>,
    ) -> Arc<dyn RequestChain> {
        let executor: Arc<dyn RequestChain> = Arc::new(HttpExecutor::new(self.http.clone()));
        let step_up = Arc::new(StepUpLink::new(
            self.config.enable_step_up_auth,
            self.config.step_up_user_prompt,
            prompt,
            Arc::clone(self) as Arc<dyn StepUpAuthorizer>,
            Arc::new(RetryLedger::new(self.config.step_up_max_retries)),
            executor,
        ));
        let registration = Arc::new(RegistrationLink::new(
            Some(self.config.registration_token.clone()),
            step_up,
        ));
        Arc::new(ResourceLink::new(self.resource.clone(), registration))
    }

    /// Runs one complete authorization attempt.
    ///
    /// # Arguments
    ///
    /// * `challenge` - The parsed `WWW-Authenticate` challenge that
    ///   triggered this attempt, when one exists.
    /// * `scope_override` - Scopes that replace normal selection; used by
    ///   step-up re-authorization.
    ///
    /// # Returns
    ///
    /// The token obtained from the exchange. The same token is stored in
    /// the shared token store before returning.
    ///
    /// # Errors
    ///
    /// Any of the authorization error kinds: configuration, discovery,
    /// registration, callback validation, timeout, or cancellation
    /// failures.
    pub async fn authorize(
        &self,
        challenge: Option<&BearerChallenge>,
        scope_override: Option<Vec<String>>,
    ) -> Result<OAuthToken> {
        let mut phase = FlowPhase::Validating;
        let result = self
            .authorize_inner(challenge, scope_override, &mut phase)
            .await;
        match &result {
            Ok(_) => tracing::debug!(phase = ?FlowPhase::Done, "authorization complete"),
            Err(e) => tracing::debug!(phase = ?phase, error = %e, "authorization failed"),
        }
        result
    }

    async fn authorize_inner(
        &self,
        challenge: Option<&BearerChallenge>,
        scope_override: Option<Vec<String>>,
        phase: &mut FlowPhase,
    ) -> Result<OAuthToken> {
        // Phase: validating.
        if !self.config.enabled {
            return Err(
                McprobeError::Config("authorization is disabled by configuration".to_string())
                    .into(),
            );
        }
        self.config.validate()?;
        let redirect = parse_loopback_redirect(&self.config.redirect_url)?;

        // Phase: discovering.
        *phase = FlowPhase::Discovering;
        let (prm, issuer) = self.discover_resource(challenge).await?;
        let asm = self.discover_auth_server(&issuer).await?;

        // The callback listener is bound before registration so both the
        // DCR request and the authorization URL carry the effective
        // redirect (relevant when the configured port is 0).
        let mut server = CallbackServer::bind(&redirect).await?;
        let result = self
            .authorize_with_server(challenge, scope_override, prm.as_ref(), &asm, &mut server, phase)
            .await;
        // Unconditional shutdown on success, failure, timeout, and
        // cancellation, with its own grace period.
        server.shutdown().await;
        result
    }

    async fn authorize_with_server(
        &self,
        challenge: Option<&BearerChallenge>,
        scope_override: Option<Vec<String>>,
        prm: Option<&ProtectedResourceMetadata>,
        asm: &AuthorizationServerMetadata,
        server: &mut CallbackServer,
        phase: &mut FlowPhase,
    ) -> Result<OAuthToken> {
        let redirect_uri = server.redirect_url().clone();

        // Phase: registering (only without a configured client_id).
        let (client_id, client_secret) = if self.config.client_id.is_empty() {
            *phase = FlowPhase::Registering;
            let registration = self.register_client(asm, &redirect_uri).await?;
            (registration.client_id, registration.client_secret)
        } else {
            let secret = if self.config.client_secret.is_empty() {
                None
            } else {
                Some(self.config.client_secret.clone())
            };
            (self.config.client_id.clone(), secret)
        };

        // Phase: authorizing.
        *phase = FlowPhase::Authorizing;
        let scopes = scope_override.or_else(|| select_scopes(&self.config, challenge, prm));
        let pkce_challenge = pkce::generate();
        let state = pkce::generate_state();
        let nonce = self.config.use_oidc.then(pkce::generate_nonce);

        let auth_url = self.build_authorization_url(
            asm,
            &client_id,
            &redirect_uri,
            scopes.as_deref(),
            &state,
            &pkce_challenge.challenge,
            nonce.as_deref(),
        )?;

        gate::check_browser_url(&auth_url)?;
        self.opener.open(&auth_url).await?;

        let timeout = self.config.authorization_timeout();
        let outcome = tokio::select! {
            outcome = server.recv() => outcome.ok_or_else(|| {
                McprobeError::Internal("callback channel closed".to_string())
            })?,
            _ = tokio::time::sleep(timeout) => {
                return Err(McprobeError::AuthorizationTimeout {
                    waited_secs: timeout.as_secs(),
                }
                .into());
            }
            _ = self.cancel.cancelled() => {
                return Err(McprobeError::AuthorizationCancelled.into());
            }
        };

        let code = validate_callback(&outcome, &state)?;

        // Phase: exchanging.
        *phase = FlowPhase::Exchanging;
        let token = self
            .exchange_code(
                asm,
                &client_id,
                client_secret.as_deref(),
                &code,
                &redirect_uri,
                &pkce_challenge.verifier,
            )
            .await?;

        self.tokens.save(token.clone()).await;
        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Discovery steps
    // -----------------------------------------------------------------------

    /// Runs protected resource metadata discovery, or falls back to the
    /// configured authorization server when `skip_resource_metadata` is
    /// set.
    async fn discover_resource(
        &self,
        challenge: Option<&BearerChallenge>,
    ) -> Result<(Option<ProtectedResourceMetadata>, Url)> {
        if self.config.skip_resource_metadata {
            if self.config.preferred_auth_server.is_empty() {
                return Err(McprobeError::Config(
                    "skip_resource_metadata requires preferred_auth_server to name the \
                     authorization server"
                        .to_string(),
                )
                .into());
            }
            let issuer = Url::parse(&self.config.preferred_auth_server).map_err(|e| {
                McprobeError::Config(format!("preferred_auth_server is not a valid URL: {e}"))
            })?;
            return Ok((None, issuer));
        }

        let endpoint = self.discovery_endpoint()?;
        let prm = discovery::fetch_protected_resource_metadata(
            &self.http,
            &endpoint,
            challenge,
            &MetadataGate::strict(),
            &self.cancel,
        )
        .await?;
        let issuer =
            discovery::select_authorization_server(&prm, &self.config.preferred_auth_server)?;
        Ok((Some(prm), issuer))
    }

    /// Runs authorization server metadata discovery with the PKCE check,
    /// or derives conventional endpoints when discovery is skipped.
    async fn discover_auth_server(&self, issuer: &Url) -> Result<AuthorizationServerMetadata> {
        if self.config.skip_auth_server_discovery {
            let base = issuer.as_str().trim_end_matches('/');
            return Ok(AuthorizationServerMetadata {
                issuer: issuer.to_string(),
                authorization_endpoint: format!("{base}/authorize"),
                token_endpoint: format!("{base}/token"),
                registration_endpoint: Some(format!("{base}/register")),
                scopes_supported: None,
                code_challenge_methods_supported: None,
                client_id_metadata_document_supported: None,
                extra: Default::default(),
            });
        }

        let asm = discovery::fetch_authorization_server_metadata(
            &self.http,
            issuer,
            &MetadataGate::strict(),
            &self.cancel,
        )
        .await?;
        pkce::ensure_s256_advertised(&asm, self.config.skip_pkce_validation)?;
        Ok(asm)
    }

    /// The endpoint whose well-known URIs anchor resource metadata
    /// discovery: the canonical resource when available, otherwise the
    /// configured resource URI is required.
    fn discovery_endpoint(&self) -> Result<Url> {
        self.resource.clone().ok_or_else(|| {
            McprobeError::Config(
                "resource metadata discovery requires a resource URI \
                 (skip_resource_param without skip_resource_metadata)"
                    .to_string(),
            )
            .into()
        })
    }

    // -----------------------------------------------------------------------
    // Registration, URL construction, exchange
    // -----------------------------------------------------------------------

    /// Performs Dynamic Client Registration (RFC 7591) through the chain,
    /// which attaches the registration token and enforces its security
    /// preconditions.
    async fn register_client(
        &self,
        asm: &AuthorizationServerMetadata,
        redirect_uri: &Url,
    ) -> Result<RegistrationResponse> {
        let endpoint = asm.registration_endpoint.as_deref().ok_or_else(|| {
            McprobeError::RegistrationRefused(
                "authorization server does not offer a registration endpoint".to_string(),
            )
        })?;

        let body = RegistrationRequest {
            client_name: "mcprobe".to_string(),
            redirect_uris: vec![redirect_uri.to_string()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: if self.config.scopes.is_empty() {
                None
            } else {
                Some(self.config.scopes.join(" "))
            },
            software_id: "mcprobe".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let request = self
            .http
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, discovery::USER_AGENT)
            .json(&body)
            .build()?;

        let response = match self.chain.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                // Security preconditions surface as RegistrationRefused
                // already; transport failures get wrapped so the caller
                // sees which step failed.
                let already_refusal = matches!(
                    crate::error::as_mcprobe_error(&e),
                    Some(McprobeError::RegistrationRefused(_))
                );
                return Err(if already_refusal {
                    e
                } else {
                    McprobeError::RegistrationRefused(format!("registration request failed: {e}"))
                        .into()
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McprobeError::RegistrationRefused(format!(
                "registration endpoint returned {status}: {text}"
            ))
            .into());
        }

        let registration: RegistrationResponse = response.json().await.map_err(|e| {
            McprobeError::RegistrationRefused(format!("invalid registration response: {e}"))
        })?;
        Ok(registration)
    }

    /// Builds the authorization URL with the OAuth 2.1 + PKCE + RFC 8707
    /// request parameters.
    ///
    /// The `resource` parameter is appended here, once; the resource chain
    /// link skips requests that already carry it.
    #[allow(clippy::too_many_arguments)]
    fn build_authorization_url(
        &self,
        asm: &AuthorizationServerMetadata,
        client_id: &str,
        redirect_uri: &Url,
        scopes: Option<&[String]>,
        state: &str,
        code_challenge: &str,
        nonce: Option<&str>,
    ) -> Result<Url> {
        let mut url = Url::parse(&asm.authorization_endpoint).map_err(|e| {
            McprobeError::InvalidMetadata {
                url: asm.authorization_endpoint.clone(),
                detail: format!("authorization_endpoint is not a valid URL: {e}"),
            }
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", client_id);
            query.append_pair("redirect_uri", redirect_uri.as_str());
            query.append_pair("code_challenge", code_challenge);
            query.append_pair("code_challenge_method", "S256");
            if let Some(scopes) = scopes {
                if !scopes.is_empty() {
                    query.append_pair("scope", &scopes.join(" "));
                }
            }
            query.append_pair("state", state);
            if let Some(nonce) = nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(resource) = &self.resource {
                query.append_pair("resource", resource.as_str());
            }
        }

        Ok(url)
    }

    /// Exchanges an authorization code for tokens at the token endpoint.
    ///
    /// The request runs through the chain; the resource link appends the
    /// `resource` form parameter.
    async fn exchange_code(
        &self,
        asm: &AuthorizationServerMetadata,
        client_id: &str,
        client_secret: Option<&str>,
        code: &str,
        redirect_uri: &Url,
        code_verifier: &str,
    ) -> Result<OAuthToken> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", client_id),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = client_secret {
            params.push(("client_secret", secret));
        }

        let request = self
            .http
            .post(&asm.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, discovery::USER_AGENT)
            .form(&params)
            .build()?;

        let response = self.chain.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<OAuthErrorBody>(&text) {
                return Err(McprobeError::AuthorizationServerError {
                    error: body.error,
                    description: body.error_description,
                }
                .into());
            }
            return Err(
                McprobeError::Mcp(format!("token endpoint returned {status}: {text}")).into(),
            );
        }

        let raw: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| McprobeError::Mcp(format!("invalid token response: {e}")))?;
        Ok(raw.into_oauth_token())
    }
}

// ---------------------------------------------------------------------------
// Callback validation
// ---------------------------------------------------------------------------

/// Validates the authorization response parameters.
///
/// Order matters: the `state` check runs first (a mismatched callback is
/// attacker-controlled and nothing else in it can be trusted), then the
/// `error` parameter, then `code` presence.
fn validate_callback(outcome: &CallbackOutcome, expected_state: &str) -> Result<String> {
    let params = outcome.params();

    match params.get("state") {
        Some(state) if state == expected_state => {}
        _ => return Err(McprobeError::StateMismatch.into()),
    }

    if let Some(error) = params.get("error") {
        return Err(McprobeError::AuthorizationServerError {
            error: error.clone(),
            description: params.get("error_description").cloned(),
        }
        .into());
    }

    params.get("code").cloned().ok_or_else(|| {
        McprobeError::Mcp("authorization callback carries neither code nor error".to_string())
            .into()
    })
}

// ---------------------------------------------------------------------------
// Step-up re-authorization hook
// ---------------------------------------------------------------------------

#[async_trait]
impl StepUpAuthorizer for AuthFlow {
    /// Re-runs the flow with the challenge's scope list replacing normal
    /// scope selection. The fresh token replaces the stored one and its
    /// access token is returned for the replay.
    async fn reauthorize(&self, scopes: &[String]) -> Result<String> {
        let token = self.authorize(None, Some(scopes.to_vec())).await?;
        Ok(token.access_token)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn asm() -> AuthorizationServerMetadata {
        AuthorizationServerMetadata {
            issuer: "https://auth.example.com".to_string(),
            authorization_endpoint: "https://auth.example.com/authorize".to_string(),
            token_endpoint: "https://auth.example.com/token".to_string(),
            registration_endpoint: None,
            scopes_supported: None,
            code_challenge_methods_supported: Some(vec!["S256".to_string()]),
            client_id_metadata_document_supported: None,
            extra: Default::default(),
        }
    }

    fn flow() -> AuthFlow {
        AuthFlow::new(
            reqwest::Client::new(),
            AuthConfig::default(),
            &Url::parse("https://mcp.example.com/mcp").unwrap(),
            Arc::new(TokenStore::new()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_flow_derives_canonical_resource_from_endpoint() {
        let flow = AuthFlow::new(
            reqwest::Client::new(),
            AuthConfig::default(),
            &Url::parse("HTTPS://MCP.Example.Com:443/mcp/").unwrap(),
            Arc::new(TokenStore::new()),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(
            flow.resource().map(|u| u.as_str()),
            Some("https://mcp.example.com/mcp")
        );
    }

    #[test]
    fn test_flow_prefers_configured_resource_uri() {
        let config = AuthConfig {
            resource_uri: "https://other.example.com/api/".to_string(),
            ..Default::default()
        };
        let flow = AuthFlow::new(
            reqwest::Client::new(),
            config,
            &Url::parse("https://mcp.example.com/mcp").unwrap(),
            Arc::new(TokenStore::new()),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(
            flow.resource().map(|u| u.as_str()),
            Some("https://other.example.com/api")
        );
    }

    #[test]
    fn test_flow_skip_resource_param_clears_resource() {
        let config = AuthConfig {
            skip_resource_param: true,
            ..Default::default()
        };
        let flow = AuthFlow::new(
            reqwest::Client::new(),
            config,
            &Url::parse("https://mcp.example.com/mcp").unwrap(),
            Arc::new(TokenStore::new()),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(flow.resource().is_none());
    }

    // -----------------------------------------------------------------------
    // Authorization URL construction
    // -----------------------------------------------------------------------

    fn query_map(url: &Url) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in url.query_pairs() {
            map.entry(k.into_owned()).or_default().push(v.into_owned());
        }
        map
    }

    #[test]
    fn test_authorization_url_contains_required_params() {
        let flow = flow();
        let url = flow
            .build_authorization_url(
                &asm(),
                "client-1",
                &Url::parse("http://127.0.0.1:8765/callback").unwrap(),
                Some(&["files:read".to_string()]),
                "state-1",
                "challenge-1",
                None,
            )
            .unwrap();

        let params = query_map(&url);
        assert_eq!(params["response_type"], vec!["code"]);
        assert_eq!(params["client_id"], vec!["client-1"]);
        assert_eq!(params["redirect_uri"], vec!["http://127.0.0.1:8765/callback"]);
        assert_eq!(params["code_challenge"], vec!["challenge-1"]);
        assert_eq!(params["code_challenge_method"], vec!["S256"]);
        assert_eq!(params["scope"], vec!["files:read"]);
        assert_eq!(params["state"], vec!["state-1"]);
        assert_eq!(params["resource"], vec!["https://mcp.example.com/mcp"]);
        assert!(!params.contains_key("nonce"));
    }

    #[test]
    fn test_authorization_url_resource_appears_exactly_once() {
        let flow = flow();
        let url = flow
            .build_authorization_url(
                &asm(),
                "client-1",
                &Url::parse("http://127.0.0.1:8765/callback").unwrap(),
                None,
                "state-1",
                "challenge-1",
                None,
            )
            .unwrap();
        let params = query_map(&url);
        assert_eq!(params["resource"].len(), 1);
    }

    #[test]
    fn test_authorization_url_omits_scope_when_none() {
        let flow = flow();
        let url = flow
            .build_authorization_url(
                &asm(),
                "client-1",
                &Url::parse("http://127.0.0.1:8765/callback").unwrap(),
                None,
                "state-1",
                "challenge-1",
                None,
            )
            .unwrap();
        assert!(!query_map(&url).contains_key("scope"));
    }

    #[test]
    fn test_authorization_url_includes_nonce_when_given() {
        let flow = flow();
        let url = flow
            .build_authorization_url(
                &asm(),
                "client-1",
                &Url::parse("http://127.0.0.1:8765/callback").unwrap(),
                None,
                "state-1",
                "challenge-1",
                Some("nonce-1"),
            )
            .unwrap();
        assert_eq!(query_map(&url)["nonce"], vec!["nonce-1"]);
    }

    #[test]
    fn test_authorization_url_joins_scopes_with_spaces() {
        let flow = flow();
        let url = flow
            .build_authorization_url(
                &asm(),
                "client-1",
                &Url::parse("http://127.0.0.1:8765/callback").unwrap(),
                Some(&["a".to_string(), "b".to_string()]),
                "state-1",
                "challenge-1",
                None,
            )
            .unwrap();
        assert_eq!(query_map(&url)["scope"], vec!["a b"]);
    }

    // -----------------------------------------------------------------------
    // validate_callback
    // -----------------------------------------------------------------------

    fn outcome(pairs: &[(&str, &str)]) -> CallbackOutcome {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if map.contains_key("error") {
            CallbackOutcome::Error(map)
        } else {
            CallbackOutcome::Success(map)
        }
    }

    #[test]
    fn test_callback_valid_code() {
        let code =
            validate_callback(&outcome(&[("code", "abc"), ("state", "s1")]), "s1").unwrap();
        assert_eq!(code, "abc");
    }

    #[test]
    fn test_callback_state_mismatch() {
        let err =
            validate_callback(&outcome(&[("code", "abc"), ("state", "wrong")]), "s1")
                .unwrap_err();
        assert!(err.to_string().contains("State parameter mismatch"));
    }

    #[test]
    fn test_callback_missing_state_is_mismatch() {
        assert!(validate_callback(&outcome(&[("code", "abc")]), "s1").is_err());
    }

    #[test]
    fn test_callback_state_checked_before_error_param() {
        // A mismatched state wins even when the server reported an error.
        let err = validate_callback(
            &outcome(&[("error", "access_denied"), ("state", "wrong")]),
            "s1",
        )
        .unwrap_err();
        assert!(err.to_string().contains("State parameter mismatch"));
    }

    #[test]
    fn test_callback_error_param_surfaces_server_error() {
        let err = validate_callback(
            &outcome(&[
                ("error", "access_denied"),
                ("error_description", "user declined"),
                ("state", "s1"),
            ]),
            "s1",
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("access_denied"));
        assert!(msg.contains("user declined"));
    }

    #[test]
    fn test_callback_without_code_or_error_fails() {
        assert!(validate_callback(&outcome(&[("state", "s1")]), "s1").is_err());
    }

    // -----------------------------------------------------------------------
    // TokenEndpointResponse conversion
    // -----------------------------------------------------------------------

    #[test]
    fn test_token_response_sets_expiry_from_expires_in() {
        let raw = TokenEndpointResponse {
            access_token: "tok".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: None,
        };
        let token = raw.into_oauth_token();
        assert!(token.expires_at.is_some());
        assert!(!token.is_expired());
    }

    #[test]
    fn test_token_response_without_expiry() {
        let raw = TokenEndpointResponse {
            access_token: "tok".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: None,
            refresh_token: Some("refresh".to_string()),
            scope: Some("files:read".to_string()),
        };
        let token = raw.into_oauth_token();
        assert!(token.expires_at.is_none());
        assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
    }

    // End-to-end flow behavior (discovery through exchange against mock
    // servers) is covered by tests/auth_flow_test.rs.
}
