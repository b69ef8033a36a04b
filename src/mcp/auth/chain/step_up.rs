//! Step-up authorization on `403 insufficient_scope`
//!
//! A resource server may answer an authorized request with `403 Forbidden`
//! and a `WWW-Authenticate: Bearer error="insufficient_scope",
//! scope="..."` challenge naming the scopes the operation requires. This
//! chain link reacts by re-running the authorization flow for exactly
//! those scopes and replaying the original request with the fresh token.
//!
//! Unbounded reaction to server-controlled challenges is an authorization
//! loop waiting to happen, so every replay is accounted for in a
//! [`RetryLedger`] keyed by `(host, path, method)`. Once an endpoint's
//! entry reaches the configured cap the link fails with a terminal error
//! instead of authorizing again; any 2xx response for the endpoint resets
//! its entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{McprobeError, Result};
use crate::mcp::auth::chain::{describe_request, RequestChain};
use crate::mcp::auth::challenge::BearerChallenge;

/// Upper bound on the number of scopes accepted from a step-up challenge.
const MAX_CHALLENGE_SCOPES: usize = 20;

/// Upper bound on the length of a single scope value.
const MAX_SCOPE_LENGTH: usize = 256;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Re-runs the authorization flow for a step-up scope set.
///
/// Implemented by the authorization flow; returns the fresh access token
/// to use on the replayed request. The new token also replaces the old
/// one in the shared token store.
#[async_trait]
pub trait StepUpAuthorizer: Send + Sync {
    /// Obtains a token carrying `scopes`.
    async fn reauthorize(&self, scopes: &[String]) -> Result<String>;
}

/// Interactive confirmation hook consulted before a step-up when
/// `step_up_user_prompt` is configured.
#[async_trait]
pub trait StepUpPrompt: Send + Sync {
    /// Asks the user whether to proceed with a step-up for `scopes`.
    async fn confirm(&self, scopes: &[String]) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// RetryLedger
// ---------------------------------------------------------------------------

/// Ledger key: one guarded endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    /// Request host.
    pub host: String,
    /// Request path.
    pub path: String,
    /// Request method.
    pub method: String,
}

impl RetryKey {
    /// Derives the key for a request.
    pub fn for_request(request: &reqwest::Request) -> Self {
        Self {
            host: request.url().host_str().unwrap_or("").to_string(),
            path: request.url().path().to_string(),
            method: request.method().to_string(),
        }
    }
}

/// Per-endpoint step-up attempt accounting, shared by every request task.
///
/// The ledger spans the process lifetime. Mutation is guarded by a mutex
/// so two concurrent requests to the same endpoint cannot both slip past
/// the cap: whichever loses the compare-and-increment observes the updated
/// count on its next attempt.
#[derive(Debug)]
pub struct RetryLedger {
    max_retries: u32,
    attempts: Mutex<HashMap<RetryKey, u32>>,
}

impl RetryLedger {
    /// Creates a ledger with the given per-endpoint cap.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Records one step-up attempt for `key`.
    ///
    /// Returns the attempt number (1-based) when the entry is below the
    /// cap. The entry is incremented only in that case.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::MaxRetriesExceeded`] when the entry has
    /// already reached the cap.
    pub fn register_attempt(&self, key: &RetryKey, endpoint: &str) -> Result<u32> {
        let mut attempts = self.lock_attempts();
        let entry = attempts.entry(key.clone()).or_insert(0);
        if *entry >= self.max_retries {
            return Err(McprobeError::MaxRetriesExceeded {
                attempts: *entry,
                endpoint: endpoint.to_string(),
            }
            .into());
        }
        *entry += 1;
        Ok(*entry)
    }

    /// Clears the entry for `key`. Called on any 2xx response for the
    /// endpoint.
    pub fn reset(&self, key: &RetryKey) {
        self.lock_attempts().remove(key);
    }

    /// Current attempt count for `key`.
    pub fn attempts(&self, key: &RetryKey) -> u32 {
        self.lock_attempts().get(key).copied().unwrap_or(0)
    }

    fn lock_attempts(&self) -> std::sync::MutexGuard<'_, HashMap<RetryKey, u32>> {
        // A poisoned ledger only means another task panicked mid-update;
        // the counts themselves stay usable.
        self.attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// StepUpLink
// ---------------------------------------------------------------------------

/// Chain link implementing step-up authorization with bounded retries.
pub struct StepUpLink {
    enabled: bool,
    prompt_required: bool,
    prompt: Option<Arc<dyn StepUpPrompt>>,
    authorizer: Arc<dyn StepUpAuthorizer>,
    ledger: Arc<RetryLedger>,
    next: Arc<dyn RequestChain>,
}

impl StepUpLink {
    /// Creates the link.
    ///
    /// # Arguments
    ///
    /// * `enabled` - The `enable_step_up_auth` configuration gate.
    /// * `prompt_required` - The `step_up_user_prompt` option. When set
    ///   and `prompt` is `None`, step-up fails closed.
    /// * `prompt` - Optional interactive confirmation hook.
    /// * `authorizer` - Re-authorization hook (the authorization flow).
    /// * `ledger` - Shared retry ledger.
    /// * `next` - The next chain stage.
    pub fn new(
        enabled: bool,
        prompt_required: bool,
        prompt: Option<Arc<dyn StepUpPrompt>>,
        authorizer: Arc<dyn StepUpAuthorizer>,
        ledger: Arc<RetryLedger>,
        next: Arc<dyn RequestChain>,
    ) -> Self {
        Self {
            enabled,
            prompt_required,
            prompt,
            authorizer,
            ledger,
            next,
        }
    }
}

#[async_trait]
impl RequestChain for StepUpLink {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        if !self.enabled {
            return self.next.execute(request).await;
        }

        let key = RetryKey::for_request(&request);
        let endpoint = describe_request(&request);

        // A clone is taken up front because executing the request consumes
        // it. Requests with streaming bodies cannot be cloned; that only
        // matters when a replay is actually demanded.
        let had_body = request.body().is_some();
        let replay = request.try_clone();

        let response = self.next.execute(request).await?;

        if response.status().is_success() {
            self.ledger.reset(&key);
            return Ok(response);
        }

        if response.status() != reqwest::StatusCode::FORBIDDEN {
            return Ok(response);
        }

        let challenge = match parse_insufficient_scope(&response) {
            Some(challenge) => challenge,
            None => return Ok(response),
        };

        // 1. The challenge must name the scopes to step up to.
        if challenge.scopes.is_empty() {
            return Err(McprobeError::InsufficientScopeWithoutScopeList { endpoint }.into());
        }

        // 2. Bound what a hostile server can make us request.
        validate_challenge_scopes(&challenge.scopes, &endpoint)?;

        // 3 + 4. Consult and advance the ledger before authorizing.
        let attempt = match self.ledger.register_attempt(&key, &endpoint) {
            Ok(attempt) => attempt,
            Err(e) => {
                drop(response);
                return Err(e);
            }
        };
        tracing::info!(
            endpoint = %endpoint,
            attempt,
            scopes = ?challenge.scopes,
            "step-up authorization triggered"
        );

        // 5. Fail closed when a prompt is required but none is wired in.
        if self.prompt_required {
            match &self.prompt {
                None => {
                    return Err(McprobeError::UserDeclined(
                        "step-up confirmation required but no interactive prompt is available"
                            .to_string(),
                    )
                    .into());
                }
                Some(prompt) => {
                    if !prompt.confirm(&challenge.scopes).await? {
                        return Err(McprobeError::UserDeclined(
                            "user declined step-up authorization".to_string(),
                        )
                        .into());
                    }
                }
            }
        }

        // 6. The original response is finished with; re-authorize.
        drop(response);
        let access_token = self.authorizer.reauthorize(&challenge.scopes).await?;

        // 7. Replay the original request with the fresh token.
        let mut replay = match replay {
            Some(replay) => replay,
            None => {
                debug_assert!(had_body, "bodyless requests always clone");
                return Err(McprobeError::CannotReplayBody { endpoint }.into());
            }
        };
        let bearer = reqwest::header::HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| McprobeError::Internal("access token is not header-safe".to_string()))?;
        replay
            .headers_mut()
            .insert(reqwest::header::AUTHORIZATION, bearer);

        // 8. Forward the replay; a 2xx outcome resets the ledger entry.
        let replayed = self.next.execute(replay).await?;
        if replayed.status().is_success() {
            self.ledger.reset(&key);
        }
        Ok(replayed)
    }
}

// ---------------------------------------------------------------------------
// Challenge handling
// ---------------------------------------------------------------------------

/// Parses the response's `WWW-Authenticate` header, returning the
/// challenge only when it is an `insufficient_scope` bearer challenge.
fn parse_insufficient_scope(response: &reqwest::Response) -> Option<BearerChallenge> {
    let header = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)?
        .to_str()
        .ok()?;
    let challenge = BearerChallenge::parse(header).ok()?;
    challenge.is_insufficient_scope().then_some(challenge)
}

/// Bounds the challenge scope list: at most [`MAX_CHALLENGE_SCOPES`]
/// entries, each at most [`MAX_SCOPE_LENGTH`] characters, no control
/// characters.
fn validate_challenge_scopes(scopes: &[String], endpoint: &str) -> Result<()> {
    if scopes.len() > MAX_CHALLENGE_SCOPES {
        return Err(McprobeError::MalformedChallenge(format!(
            "step-up challenge from {endpoint} lists {} scopes (limit {MAX_CHALLENGE_SCOPES})",
            scopes.len()
        ))
        .into());
    }
    for scope in scopes {
        if scope.len() > MAX_SCOPE_LENGTH {
            return Err(McprobeError::MalformedChallenge(format!(
                "step-up challenge from {endpoint} contains a scope of {} bytes (limit {MAX_SCOPE_LENGTH})",
                scope.len()
            ))
            .into());
        }
        if scope.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return Err(McprobeError::MalformedChallenge(format!(
                "step-up challenge from {endpoint} contains control characters in a scope"
            ))
            .into());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
