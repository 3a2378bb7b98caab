use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use lectern_common::types::{Principal, Role};

pub const SESSION_TOKEN_TTL_SECONDS: i64 = 12 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionTokenClaims {
    sub: String,
    name: String,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    email: Option<String>,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct JwtSessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_session_token(&self, principal: &Principal) -> anyhow::Result<String> {
        self.issue_session_token_at(principal, current_unix_timestamp()?)
    }

    fn issue_session_token_at(
        &self,
        principal: &Principal,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = SessionTokenClaims {
            sub: principal.id.to_string(),
            name: principal.name.clone(),
            role: principal.role,
            email: principal.email.clone(),
            iat: issued_at,
            exp: issued_at + SESSION_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode session token")
    }

    pub fn validate_session_token(&self, token: &str) -> anyhow::Result<Principal> {
        let claims = decode::<SessionTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode session token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("session token subject '{}' is not a UUID", claims.sub))?;

        Ok(Principal { id: user_id, name: claims.name, role: claims.role, email: claims.email })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
