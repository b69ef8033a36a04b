//! PKCE S256 challenges and flow nonces
//!
//! This module implements the Proof Key for Code Exchange extension to
//! OAuth 2.0 as defined in RFC 7636, specifically the `S256` challenge
//! method mandated by OAuth 2.1, plus generation of the `state` CSRF token
//! and the OIDC `nonce`.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string, the
//!    `code_verifier`.
//! 2. The client computes a SHA-256 hash of the verifier and
//!    base64url-encodes it to produce the `code_challenge`.
//! 3. The authorization request includes `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token exchange request includes the original `code_verifier`.
//! 5. The authorization server recomputes the challenge and compares,
//!    proving possession of the verifier.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>
//! - OAuth 2.1 draft <https://datatracker.ietf.org/doc/draft-ietf-oauth-v2-1/>

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::{McprobeError, Result};
use crate::mcp::auth::discovery::AuthorizationServerMetadata;

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE S256 challenge pair consisting of a verifier and its derived
/// challenge value.
///
/// # Examples
///
/// ```
/// use mcprobe::mcp::auth::pkce::generate;
///
/// let pkce = generate();
/// assert_eq!(pkce.method, "S256");
/// assert!(pkce.verifier.len() >= 43 && pkce.verifier.len() <= 128);
/// assert_ne!(pkce.verifier, pkce.challenge);
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier: a base64url-encoded (no padding) random string of
    /// 43 characters derived from 32 random bytes. Every character falls
    /// in the RFC 3986 unreserved set.
    pub verifier: String,

    /// The code challenge: the base64url-encoded (no padding) SHA-256
    /// digest of the UTF-8 representation of [`Self::verifier`].
    pub challenge: String,

    /// The challenge method. Always `"S256"`.
    pub method: String,
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Generates a fresh PKCE S256 challenge.
///
/// The verifier is 32 cryptographically random bytes encoded as a
/// base64url string without padding (43 characters, within the 43..=128
/// range RFC 7636 requires). The challenge is the base64url-encoded
/// SHA-256 digest of the verifier string's UTF-8 bytes (RFC 7636 section
/// 4.2).
pub fn generate() -> PkceChallenge {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);

    // RFC 7636 section 4.2: ASCII(BASE64URL(SHA256(ASCII(code_verifier))))
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());

    PkceChallenge {
        verifier,
        challenge,
        method: "S256".to_string(),
    }
}

/// Generates an unguessable `state` value for CSRF protection.
///
/// 32 random bytes (256 bits of entropy) encoded as base64url without
/// padding.
pub fn generate_state() -> String {
    random_urlsafe_token()
}

/// Generates an OIDC `nonce` value.
///
/// Same shape as [`generate_state`]: 32 random bytes, base64url, no
/// padding.
pub fn generate_nonce() -> String {
    random_urlsafe_token()
}

fn random_urlsafe_token() -> String {
    use rand::RngCore as _;

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Enforces that the authorization server advertises the PKCE `S256`
/// method.
///
/// OAuth 2.1 mandates PKCE for public clients. A server whose metadata
/// omits `code_challenge_methods_supported`, lists it empty, or lists only
/// `plain` is a configuration error -- unless `skip_validation` is set, in
/// which case the flow proceeds and still uses `S256`.
///
/// # Arguments
///
/// * `metadata` - The authorization server metadata retrieved during
///   discovery.
/// * `skip_validation` - The `skip_pkce_validation` testing override.
///
/// # Errors
///
/// Returns [`McprobeError::PkceNotAdvertised`] naming the issuer when
/// `S256` is absent and validation is not skipped.
pub fn ensure_s256_advertised(
    metadata: &AuthorizationServerMetadata,
    skip_validation: bool,
) -> Result<()> {
    if skip_validation {
        return Ok(());
    }

    let supported = metadata
        .code_challenge_methods_supported
        .as_deref()
        .unwrap_or(&[]);

    if supported.iter().any(|m| m == "S256") {
        Ok(())
    } else {
        Err(McprobeError::PkceNotAdvertised {
            issuer: metadata.issuer.clone(),
        }
        .into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
