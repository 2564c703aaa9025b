//! Signed, expiring verification tokens (HS256 JWT).

use chrono::Utc;
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use poise::serenity_prelude::{GuildId, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TokenError;

/// How long an issued token stays valid
pub const TOKEN_LIFETIME_SECS: i64 = 30 * 60;

/// Claims carried by a verification token.
///
/// IDs are kept as strings; third parties that re-sign the token may send
/// them as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaims {
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(deserialize_with = "id_string")]
    pub guild_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_id_string"
    )]
    pub member_id: Option<String>,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

impl From<IdRepr> for String {
    fn from(repr: IdRepr) -> Self {
        match repr {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    IdRepr::deserialize(deserializer).map(String::from)
}

fn optional_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdRepr>::deserialize(deserializer)?
        .map(String::from)
        .filter(|s| !s.is_empty()))
}

#[derive(Debug)]
pub struct TokenCodec {
    secret: SecretString,
}

impl TokenCodec {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Codec for a configured secret, `MissingSecret` if there is none
    pub fn from_secret(secret: Option<&str>) -> Result<Self, TokenError> {
        match secret {
            Some(s) if !s.is_empty() => Ok(Self::new(SecretString::from(s.to_string()))),
            _ => Err(TokenError::MissingSecret),
        }
    }

    pub fn issue(
        &self,
        user_id: UserId,
        username: &str,
        guild_id: GuildId,
        member_id: Option<&str>,
    ) -> Result<String, TokenError> {
        self.issue_at(user_id, username, guild_id, member_id, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        user_id: UserId,
        username: &str,
        guild_id: GuildId,
        member_id: Option<&str>,
        now: i64,
    ) -> Result<String, TokenError> {
        let claims = VerificationClaims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            guild_id: guild_id.to_string(),
            member_id: member_id.map(str::to_string),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            jti: Some(uuid::Uuid::new_v4().to_string()),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with this codec's secret
    pub fn sign(&self, claims: &VerificationClaims) -> Result<String, TokenError> {
        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &key).map_err(|e| {
            TokenError::Invalid {
                reason: e.to_string(),
            }
        })
    }

    pub fn verify(&self, token: &str) -> Result<VerificationClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Check signature and shape first, then expiry. A token is expired from
    /// the second `exp` is reached.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<VerificationClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let data = jsonwebtoken::decode::<VerificationClaims>(token, &key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid {
                    reason: e.to_string(),
                },
            },
        )?;

        if data.claims.user_id.is_empty() || data.claims.guild_id.is_empty() {
            return Err(TokenError::Invalid {
                reason: "missing user_id or guild_id".to_string(),
            });
        }
        if now >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn codec() -> TokenCodec {
        TokenCodec::from_secret(Some(SECRET)).unwrap()
    }

    #[test]
    fn test_issue_then_verify_before_expiry() {
        let now = 1_700_000_000;
        let token = codec()
            .issue_at(UserId::new(42), "alice", GuildId::new(7), None, now)
            .unwrap();

        let claims = codec().verify_at(&token, now + TOKEN_LIFETIME_SECS - 1).unwrap();
        assert_eq!(claims.user_id, "42");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.guild_id, "7");
        assert_eq!(claims.iat, now);
        assert_eq!(claims.exp, now + TOKEN_LIFETIME_SECS);
        assert_eq!(claims.member_id, None);
        assert!(claims.jti.is_some());
    }

    #[test]
    fn test_expired_at_and_after_exp() {
        let now = 1_700_000_000;
        let token = codec()
            .issue_at(UserId::new(42), "alice", GuildId::new(7), None, now)
            .unwrap();

        let exp = now + TOKEN_LIFETIME_SECS;
        assert_eq!(codec().verify_at(&token, exp), Err(TokenError::Expired));
        assert_eq!(codec().verify_at(&token, exp + 3600), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = codec()
            .issue(UserId::new(42), "alice", GuildId::new(7), None)
            .unwrap();
        let other = TokenCodec::from_secret(Some("ffffffffffffffffffffffffffffffff")).unwrap();

        assert!(matches!(other.verify(&token), Err(TokenError::Invalid { .. })));
    }

    #[test]
    fn test_tampered_payload_is_invalid() {
        let token = codec()
            .issue(UserId::new(42), "alice", GuildId::new(7), None)
            .unwrap();
        let forged = codec()
            .issue(UserId::new(99), "mallory", GuildId::new(7), None)
            .unwrap();
        let forged_payload = forged.split('.').nth(1).unwrap().to_string();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;

        assert!(matches!(
            codec().verify(&parts.join(".")),
            Err(TokenError::Invalid { .. })
        ));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(
            codec().verify("not-a-token"),
            Err(TokenError::Invalid { .. })
        ));
    }

    #[test]
    fn test_missing_guild_claim_is_invalid() {
        #[derive(Serialize)]
        struct Partial {
            user_id: String,
            exp: i64,
        }
        let key = EncodingKey::from_secret(SECRET.as_bytes());
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &Partial {
                user_id: "42".to_string(),
                exp: Utc::now().timestamp() + 60,
            },
            &key,
        )
        .unwrap();

        assert!(matches!(codec().verify(&token), Err(TokenError::Invalid { .. })));
    }

    #[test]
    fn test_numeric_ids_from_third_party() {
        let key = EncodingKey::from_secret(SECRET.as_bytes());
        let payload = serde_json::json!({
            "user_id": 42u64,
            "username": "alice",
            "guild_id": 7u64,
            "member_id": 1234u64,
            "exp": Utc::now().timestamp() + 60,
        });
        let token =
            jsonwebtoken::encode(&Header::new(Algorithm::HS256), &payload, &key).unwrap();

        let claims = codec().verify(&token).unwrap();
        assert_eq!(claims.user_id, "42");
        assert_eq!(claims.member_id.as_deref(), Some("1234"));
        assert_eq!(claims.jti, None);
    }

    #[test]
    fn test_missing_secret() {
        assert_eq!(TokenCodec::from_secret(None).err(), Some(TokenError::MissingSecret));
        assert_eq!(TokenCodec::from_secret(Some("")).err(), Some(TokenError::MissingSecret));
    }
}
