//! `WWW-Authenticate` challenge parsing
//!
//! This module decodes the `WWW-Authenticate` response header into a
//! [`BearerChallenge`] record. The header grammar (RFC 9110 section 11.6.1)
//! is a scheme token followed by comma-separated `key=value` auth
//! parameters; values may be bare tokens or double-quoted strings in which
//! `\"` and `\\` are escape sequences and commas do not split parameters.
//!
//! Recognized parameters:
//!
//! - `resource_metadata` -- URL of the RFC 9728 protected resource metadata
//!   document
//! - `scope` -- space-separated list of scopes the server demands
//! - `error` -- OAuth error code (e.g. `invalid_token`,
//!   `insufficient_scope`)
//! - `error_description` -- human-readable error text
//!
//! Unknown parameters are ignored.

use crate::error::{McprobeError, Result};

// ---------------------------------------------------------------------------
// BearerChallenge
// ---------------------------------------------------------------------------

/// A parsed `WWW-Authenticate` challenge.
///
/// # Examples
///
/// ```
/// use mcprobe::mcp::auth::challenge::BearerChallenge;
///
/// let header = r#"Bearer resource_metadata="https://api.example.com/.well-known/oauth-protected-resource", scope="files:read files:write""#;
/// let challenge = BearerChallenge::parse(header).unwrap();
///
/// assert_eq!(challenge.scheme, "Bearer");
/// assert_eq!(challenge.scopes, vec!["files:read", "files:write"]);
/// assert!(challenge.error.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    /// The authentication scheme, i.e. the first whitespace-delimited token
    /// of the header value (typically `"Bearer"`).
    pub scheme: String,

    /// URL of the protected resource metadata document, when the server
    /// advertises one (RFC 9728 section 5.1).
    pub resource_metadata: Option<String>,

    /// Scopes named by the challenge, split on spaces, in header order.
    pub scopes: Vec<String>,

    /// OAuth error code carried by the challenge.
    pub error: Option<String>,

    /// Human-readable error description carried by the challenge.
    pub error_description: Option<String>,
}

impl BearerChallenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// The first whitespace-delimited token becomes [`Self::scheme`]; the
    /// remainder is parsed as comma-separated `key=value` parameters.
    /// Quoted values may contain commas and the escape sequences `\"` and
    /// `\\`, which are unescaped exactly once. A backslash outside quotes
    /// is literal. Unknown parameter names are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::MalformedChallenge`] when the header is
    /// empty or consists only of whitespace.
    pub fn parse(header_value: &str) -> Result<Self> {
        let trimmed = header_value.trim();
        if trimmed.is_empty() {
            return Err(
                McprobeError::MalformedChallenge("empty WWW-Authenticate header".to_string())
                    .into(),
            );
        }

        let (scheme, params_text) = match trimmed.find(char::is_whitespace) {
            Some(pos) => (&trimmed[..pos], trimmed[pos..].trim_start()),
            None => (trimmed, ""),
        };

        let mut challenge = BearerChallenge {
            scheme: scheme.to_string(),
            ..Default::default()
        };

        for (key, value) in split_auth_params(params_text) {
            match key.as_str() {
                "resource_metadata" => challenge.resource_metadata = Some(value),
                "scope" => {
                    challenge.scopes = value
                        .split(' ')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                        .collect();
                }
                "error" => challenge.error = Some(value),
                "error_description" => challenge.error_description = Some(value),
                _ => {}
            }
        }

        Ok(challenge)
    }

    /// Serializes the challenge back into a `WWW-Authenticate` header
    /// value.
    ///
    /// All parameter values are emitted as quoted strings with `"` and `\`
    /// escaped, so `parse(format(c))` reproduces the same logical record.
    pub fn format(&self) -> String {
        let mut params: Vec<String> = Vec::new();

        if let Some(ref url) = self.resource_metadata {
            params.push(format!(r#"resource_metadata="{}""#, escape_quoted(url)));
        }
        if !self.scopes.is_empty() {
            params.push(format!(
                r#"scope="{}""#,
                escape_quoted(&self.scopes.join(" "))
            ));
        }
        if let Some(ref error) = self.error {
            params.push(format!(r#"error="{}""#, escape_quoted(error)));
        }
        if let Some(ref desc) = self.error_description {
            params.push(format!(r#"error_description="{}""#, escape_quoted(desc)));
        }

        if params.is_empty() {
            self.scheme.clone()
        } else {
            format!("{} {}", self.scheme, params.join(", "))
        }
    }

    /// Returns true when the challenge carries `error="insufficient_scope"`.
    pub fn is_insufficient_scope(&self) -> bool {
        self.error.as_deref() == Some("insufficient_scope")
    }
}

// ---------------------------------------------------------------------------
// Parameter tokenizer
// ---------------------------------------------------------------------------

/// Splits an auth-param list into `(key, value)` pairs.
///
/// Commas split parameters only outside quoted strings. Inside quotes,
/// `\"` and `\\` are unescaped once; any other backslash sequence keeps the
/// backslash. Parameters without an `=` and parameters with empty keys are
/// skipped.
fn split_auth_params(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        // Skip leading whitespace and separators before the next key.
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        // Key: everything up to '=' or a separator.
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        let key = key.trim().to_ascii_lowercase();

        if chars.peek() != Some(&'=') {
            // No value; skip this parameter.
            continue;
        }
        chars.next(); // consume '='

        // Value: quoted string or bare token.
        let mut value = String::new();
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        if chars.peek() == Some(&'"') {
            chars.next(); // opening quote
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => match chars.next() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => value.push('\\'),
                    },
                    other => value.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        if !key.is_empty() {
            pairs.push((key, value));
        }
    }

    pairs
}

/// Escapes `\` and `"` for emission inside a quoted string.
fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // parse() -- basic shapes
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_scheme_only() {
        let challenge = BearerChallenge::parse("Bearer").unwrap();
        assert_eq!(challenge.scheme, "Bearer");
        assert!(challenge.resource_metadata.is_none());
        assert!(challenge.scopes.is_empty());
    }

    #[test]
    fn test_parse_empty_header_fails() {
        let result = BearerChallenge::parse("");
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("empty"), "unexpected message: {msg}");
    }

    #[test]
    fn test_parse_whitespace_only_header_fails() {
        assert!(BearerChallenge::parse("   ").is_err());
    }

    #[test]
    fn test_parse_quoted_resource_metadata() {
        let header = r#"Bearer resource_metadata="https://api.example.com/.well-known/oauth-protected-resource""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(
            challenge.resource_metadata.as_deref(),
            Some("https://api.example.com/.well-known/oauth-protected-resource")
        );
    }

    #[test]
    fn test_parse_unquoted_value() {
        let header = "Bearer error=invalid_token";
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error.as_deref(), Some("invalid_token"));
    }

    #[test]
    fn test_parse_multiple_params() {
        let header = r#"Bearer realm="mcp", error="insufficient_scope", scope="files:write admin", error_description="need more""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error.as_deref(), Some("insufficient_scope"));
        assert_eq!(challenge.scopes, vec!["files:write", "admin"]);
        assert_eq!(challenge.error_description.as_deref(), Some("need more"));
    }

    #[test]
    fn test_parse_unknown_params_ignored() {
        let header = r#"Bearer realm="mcp", nonce="abc", error="invalid_token""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error.as_deref(), Some("invalid_token"));
    }

    #[test]
    fn test_parse_scope_order_preserved() {
        let header = r#"Bearer scope="c b a""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.scopes, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_parse_collapses_repeated_spaces_in_scope() {
        let header = r#"Bearer scope="a  b""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.scopes, vec!["a", "b"]);
    }

    // -----------------------------------------------------------------------
    // parse() -- quoting and escapes
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_comma_inside_quotes_does_not_split() {
        let header = r#"Bearer error_description="first, second", error="invalid_token""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(
            challenge.error_description.as_deref(),
            Some("first, second")
        );
        assert_eq!(challenge.error.as_deref(), Some("invalid_token"));
    }

    #[test]
    fn test_parse_escaped_quote_inside_quotes() {
        let header = r#"Bearer error_description="say \"hi\"""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error_description.as_deref(), Some(r#"say "hi""#));
    }

    #[test]
    fn test_parse_escaped_backslash_inside_quotes() {
        let header = r#"Bearer error_description="a\\b""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error_description.as_deref(), Some(r"a\b"));
    }

    #[test]
    fn test_parse_unrecognized_escape_keeps_backslash() {
        let header = r#"Bearer error_description="a\nb""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error_description.as_deref(), Some(r"a\nb"));
    }

    #[test]
    fn test_parse_backslash_outside_quotes_is_literal() {
        let header = r"Bearer error=a\b";
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error.as_deref(), Some(r"a\b"));
    }

    #[test]
    fn test_parse_key_case_insensitive() {
        let header = r#"Bearer Error="invalid_token", SCOPE="x""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.error.as_deref(), Some("invalid_token"));
        assert_eq!(challenge.scopes, vec!["x"]);
    }

    // -----------------------------------------------------------------------
    // format() round-trip
    // -----------------------------------------------------------------------

    #[test]
    fn test_format_round_trips_logical_map() {
        let original = BearerChallenge {
            scheme: "Bearer".to_string(),
            resource_metadata: Some("https://api.example.com/.well-known/prm".to_string()),
            scopes: vec!["files:read".to_string(), "files:write".to_string()],
            error: Some("insufficient_scope".to_string()),
            error_description: Some(r#"need "write", sorry"#.to_string()),
        };

        let reparsed = BearerChallenge::parse(&original.format()).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_format_scheme_only() {
        let challenge = BearerChallenge {
            scheme: "Bearer".to_string(),
            ..Default::default()
        };
        assert_eq!(challenge.format(), "Bearer");
    }

    // -----------------------------------------------------------------------
    // is_insufficient_scope()
    // -----------------------------------------------------------------------

    #[test]
    fn test_is_insufficient_scope_true() {
        let challenge =
            BearerChallenge::parse(r#"Bearer error="insufficient_scope", scope="x""#).unwrap();
        assert!(challenge.is_insufficient_scope());
    }

    #[test]
    fn test_is_insufficient_scope_false_for_other_errors() {
        let challenge = BearerChallenge::parse(r#"Bearer error="invalid_token""#).unwrap();
        assert!(!challenge.is_insufficient_scope());
    }

    #[test]
    fn test_is_insufficient_scope_false_without_error() {
        let challenge = BearerChallenge::parse("Bearer realm=x").unwrap();
        assert!(!challenge.is_insufficient_scope());
    }
}
