//! Signed bearer credentials.
//!
//! Credentials are HS256 JWTs carrying the identity reference and display
//! name. They are never persisted; verification is stateless and pinned to
//! HS256 regardless of what the token header claims.

use crate::error::{CredentialFault, DormError, DormResult};
use chrono::{DateTime, Duration, Utc};
use dorm_storage::IdentityId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Payload carried by a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub identity_id: i64,
    pub display_name: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> IdentityId {
        IdentityId(self.identity_id)
    }
}

/// Issues and verifies credentials with a shared HMAC secret.
#[derive(Clone)]
pub struct CredentialCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CredentialCodec {
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`] or
    /// the lifetime is not positive.
    pub fn new(secret: &str, ttl: Duration) -> DormResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(DormError::Credential(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if ttl <= Duration::zero() {
            return Err(DormError::Credential(
                "credential lifetime must be positive".to_string(),
            ));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    pub fn issue(
        &self,
        identity: IdentityId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> DormResult<String> {
        let claims = Claims {
            identity_id: identity.0,
            display_name: display_name.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DormError::Credential(format!("failed to sign credential: {e}")))
    }

    /// Verify signature, algorithm and expiry against `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> DormResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            let fault = match err.kind() {
                ErrorKind::InvalidSignature => CredentialFault::BadSignature,
                ErrorKind::InvalidAlgorithm => CredentialFault::WrongAlgorithm,
                ErrorKind::ExpiredSignature => CredentialFault::Expired,
                _ => CredentialFault::Malformed,
            };
            DormError::CredentialInvalid(fault)
        })?;

        if now.timestamp() > data.claims.exp {
            return Err(DormError::CredentialInvalid(CredentialFault::Expired));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn codec() -> CredentialCodec {
        CredentialCodec::new(SECRET, Duration::days(7)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn issued_credential_verifies_until_expiry() {
        let codec = codec();
        let token = codec.issue(IdentityId(42), "user_abc", t0()).unwrap();

        let claims = codec.verify(&token, t0() + Duration::days(7)).unwrap();
        assert_eq!(claims.identity(), IdentityId(42));
        assert_eq!(claims.display_name, "user_abc");
        assert_eq!(claims.exp - claims.iat, Duration::days(7).num_seconds());

        let err = codec
            .verify(&token, t0() + Duration::days(7) + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(
            err,
            DormError::CredentialInvalid(CredentialFault::Expired)
        ));
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(matches!(
            CredentialCodec::new("too-short", Duration::days(7)),
            Err(DormError::Credential(_))
        ));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let codec = codec();
        let token = codec.issue(IdentityId(1), "user_a", t0()).unwrap();
        let other = codec.issue(IdentityId(2), "user_b", t0()).unwrap();

        // Splice the second token's payload under the first token's signature.
        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

        let err = codec.verify(&forged, t0()).unwrap_err();
        assert!(matches!(
            err,
            DormError::CredentialInvalid(CredentialFault::BadSignature)
        ));
    }

    #[test]
    fn foreign_secret_fails_signature() {
        let foreign = CredentialCodec::new("ffffffffffffffffffffffffffffffff", Duration::days(7))
            .unwrap();
        let token = foreign.issue(IdentityId(1), "user_a", t0()).unwrap();

        assert!(matches!(
            codec().verify(&token, t0()),
            Err(DormError::CredentialInvalid(CredentialFault::BadSignature))
        ));
    }

    #[test]
    fn other_algorithms_are_refused() {
        let claims = Claims {
            identity_id: 1,
            display_name: "user_a".to_string(),
            iat: t0().timestamp(),
            exp: (t0() + Duration::days(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            codec().verify(&token, t0()),
            Err(DormError::CredentialInvalid(CredentialFault::WrongAlgorithm))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            codec().verify("not-a-token", t0()),
            Err(DormError::CredentialInvalid(CredentialFault::Malformed))
        ));
    }
}
