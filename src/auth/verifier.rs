use super::{AuthError, Identity, MAX_ISSUED_AT_SKEW_SECS};
use chrono::Utc;
use http::HeaderValue;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BearerClaims {
    sub: Option<String>,
    email: Option<String>,
    name: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
}

/// Verifies bearer tokens against the shared gateway secret. Expiry and
/// issued-at are checked manually so the caller gets distinct, stable error
/// strings for each failure mode.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp/iat handled below; jsonwebtoken would otherwise require exp
        // and collapse every failure into one opaque error.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate the raw `Authorization` header. Bearer tokens are the only
    /// accepted credential; session cookies are deliberately unsupported.
    pub fn verify(&self, header: Option<&HeaderValue>) -> Result<Identity, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;
        let value = header.to_str().map_err(|_| AuthError::MissingToken)?;

        // Auth scheme names are case-insensitive.
        let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::MissingToken);
        }

        self.verify_token(token.trim_start())
    }

    pub fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<BearerClaims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        let now = Utc::now().timestamp();

        if let Some(exp) = claims.exp {
            if exp <= now {
                return Err(AuthError::Expired);
            }
        }

        if let Some(iat) = claims.iat {
            if iat > now + MAX_ISSUED_AT_SKEW_SECS {
                return Err(AuthError::IssuedInFuture);
            }
        }

        let subject = match claims.sub {
            Some(sub) if !sub.trim().is_empty() => sub,
            _ => return Err(AuthError::MissingSubject),
        };

        debug!(subject = %subject, "bearer token verified");

        Ok(Identity::from_timestamps(
            subject,
            claims.email,
            claims.name,
            claims.iat,
            claims.exp,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn sign(claims: &BearerClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("token should encode")
    }

    fn claims(sub: &str) -> BearerClaims {
        let now = Utc::now().timestamp();
        BearerClaims {
            sub: Some(sub.to_string()),
            email: Some("alice@example.com".to_string()),
            name: Some("Alice".to_string()),
            iat: Some(now),
            exp: Some(now + 3600),
        }
    }

    #[test]
    fn valid_token_yields_identity() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(&claims("user_123"), SECRET);

        let identity = verifier.verify_token(&token).expect("token should verify");
        assert_eq!(identity.subject, "user_123");
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
        assert!(identity.expires_at.is_some());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(&claims("user_123"), "some-other-secret");

        assert!(matches!(
            verifier.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify_token("not.a.token"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let mut c = claims("user_123");
        c.iat = Some(Utc::now().timestamp() - 7200);
        c.exp = Some(Utc::now().timestamp() - 3600);
        let token = sign(&c, SECRET);

        assert!(matches!(
            verifier.verify_token(&token),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn future_issued_at_is_rejected_beyond_skew() {
        let verifier = TokenVerifier::new(SECRET);
        let mut c = claims("user_123");
        c.iat = Some(Utc::now().timestamp() + 300);
        let token = sign(&c, SECRET);

        assert!(matches!(
            verifier.verify_token(&token),
            Err(AuthError::IssuedInFuture)
        ));
    }

    #[test]
    fn small_issued_at_skew_is_tolerated() {
        let verifier = TokenVerifier::new(SECRET);
        let mut c = claims("user_123");
        c.iat = Some(Utc::now().timestamp() + 30);
        let token = sign(&c, SECRET);

        assert!(verifier.verify_token(&token).is_ok());
    }

    #[test]
    fn missing_subject_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let mut c = claims("ignored");
        c.sub = None;
        let token = sign(&c, SECRET);
        assert!(matches!(
            verifier.verify_token(&token),
            Err(AuthError::MissingSubject)
        ));

        let mut c = claims("ignored");
        c.sub = Some("  ".to_string());
        let token = sign(&c, SECRET);
        assert!(matches!(
            verifier.verify_token(&token),
            Err(AuthError::MissingSubject)
        ));
    }

    #[test]
    fn token_without_exp_is_accepted() {
        let verifier = TokenVerifier::new(SECRET);
        let mut c = claims("user_123");
        c.exp = None;
        let token = sign(&c, SECRET);

        assert!(verifier.verify_token(&token).is_ok());
    }

    #[test]
    fn header_scheme_is_required() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(&claims("user_123"), SECRET);

        let bare = HeaderValue::from_str(&token).unwrap();
        assert!(matches!(
            verifier.verify(Some(&bare)),
            Err(AuthError::MissingToken)
        ));

        let basic = HeaderValue::from_static("Basic dXNlcjpwYXNz");
        assert!(matches!(
            verifier.verify(Some(&basic)),
            Err(AuthError::MissingToken)
        ));

        assert!(matches!(
            verifier.verify(None),
            Err(AuthError::MissingToken)
        ));

        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).unwrap();
        assert!(verifier.verify(Some(&bearer)).is_ok());
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(&claims("user_123"), SECRET);

        let lowercase = HeaderValue::from_str(&format!("bearer {}", token)).unwrap();
        assert!(verifier.verify(Some(&lowercase)).is_ok());

        let shouty = HeaderValue::from_str(&format!("BEARER {}", token)).unwrap();
        assert!(verifier.verify(Some(&shouty)).is_ok());
    }
}
