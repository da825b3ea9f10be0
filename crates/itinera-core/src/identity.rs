//! Caller identity extracted from an already-issued bearer token.
//!
//! The engine reads the claimed identity without verifying the token
//! signature; verification belongs to the surrounding authentication
//! collaborator. There is deliberately no anonymous fallback identity:
//! absence of a decodable email claim yields `None`, and the service layer
//! rejects requests without one.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

/// An email-shaped caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap a raw identity string. Empty strings are rejected.
    pub fn new(email: impl Into<String>) -> Option<Self> {
        let email = email.into();
        if email.trim().is_empty() {
            None
        } else {
            Some(Self(email))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the claimed identity from an `Authorization` header value.
///
/// Accepts `Bearer <jwt>`; decodes the payload segment without signature
/// verification and reads the `email` claim. Returns `None` for anything
/// that does not yield a non-empty email.
pub fn identity_from_bearer(header: &str) -> Option<Identity> {
    let token = header.strip_prefix("Bearer ")?.trim();
    let claims = decode_claims(token)?;
    let email = claims.get("email")?.as_str()?;
    Identity::new(email)
}

/// Decode the claims segment of a JWT without verifying the signature.
///
/// Returns `None` if the token is not three dot-separated segments or the
/// payload is not base64url-encoded JSON.
pub fn decode_claims(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.sig-not-checked")
    }

    #[test]
    fn extracts_email_claim() {
        let token = make_token(&serde_json::json!({ "email": "traveler@example.com" }));
        let id = identity_from_bearer(&format!("Bearer {token}")).expect("should decode");
        assert_eq!(id.as_str(), "traveler@example.com");
    }

    #[test]
    fn rejects_missing_bearer_prefix() {
        let token = make_token(&serde_json::json!({ "email": "traveler@example.com" }));
        assert!(identity_from_bearer(&token).is_none());
    }

    #[test]
    fn rejects_token_without_email() {
        let token = make_token(&serde_json::json!({ "sub": "abc123" }));
        assert!(identity_from_bearer(&format!("Bearer {token}")).is_none());
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(identity_from_bearer("Bearer not-a-jwt").is_none());
        assert!(identity_from_bearer("Bearer a.b").is_none());
        assert!(identity_from_bearer("Bearer a.%%%.c").is_none());
    }

    #[test]
    fn no_placeholder_identity_for_empty_email() {
        let token = make_token(&serde_json::json!({ "email": "" }));
        assert!(identity_from_bearer(&format!("Bearer {token}")).is_none());
    }
}
