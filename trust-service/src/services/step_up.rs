//! Signed, storage-free step-up assertions.
//!
//! A token is `base64url(payload) "." base64url(mac)` where the payload is the
//! JSON form of [`StepUpAssertion`] and the MAC is HMAC-SHA256 over
//! `purpose "." payload` under the server secret. The purpose label keeps
//! tokens minted for one use (step-up) from being accepted for another
//! (impersonation), even though both share a secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use service_core::utils::mac::{hmac_sha256, verify_hmac_sha256};
use thiserror::Error;
use uuid::Uuid;

pub const PURPOSE_STEP_UP: &str = "step_up";
pub const PURPOSE_IMPERSONATION: &str = "impersonation";

/// Cookie carrying the account-wide step-up token.
pub const GLOBAL_STEP_UP_COOKIE: &str = "trust_step_up_global";
const TENANT_STEP_UP_COOKIE_PREFIX: &str = "trust_step_up_";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing secret is not configured")]
    MissingSecret,
    #[error("token ttl must be positive")]
    InvalidTtl,
    #[error("failed to encode token payload: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// What a step-up assertion vouches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// Account-wide and control-plane actions, regardless of tenant.
    Global,
    Tenant(Uuid),
}

impl Scope {
    pub fn cookie_name(&self) -> String {
        match self {
            Scope::Global => GLOBAL_STEP_UP_COOKIE.to_string(),
            Scope::Tenant(id) => format!("{}{}", TENANT_STEP_UP_COOKIE_PREFIX, id.simple()),
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            Scope::Global => None,
            Scope::Tenant(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Tenant(id) => write!(f, "tenant:{}", id),
        }
    }
}

/// Decoded token payload. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpAssertion {
    #[serde(rename = "sub")]
    pub subject_id: Uuid,
    pub scope: Scope,
    #[serde(rename = "iat")]
    pub issued_at_ms: i64,
    #[serde(rename = "exp")]
    pub expires_at_ms: i64,
}

impl StepUpAssertion {
    /// Recency is independent of expiry: a token may be valid but stale.
    pub fn is_recent_at(&self, max_age: Duration, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.issued_at_ms) <= max_age.num_milliseconds()
    }

    pub fn is_recent(&self, max_age: Duration) -> bool {
        self.is_recent_at(max_age, Utc::now().timestamp_millis())
    }

    /// Whether this assertion covers `subject_id` acting in `scope`.
    ///
    /// A tenant check accepts the same tenant, or a global assertion only when
    /// `accept_global` is set. A global check accepts only global assertions.
    pub fn authorizes(&self, subject_id: Uuid, scope: Scope, accept_global: bool) -> bool {
        if self.subject_id != subject_id {
            return false;
        }
        match (self.scope, scope) {
            (Scope::Global, Scope::Global) => true,
            (Scope::Tenant(held), Scope::Tenant(wanted)) => held == wanted,
            (Scope::Global, Scope::Tenant(_)) => accept_global,
            (Scope::Tenant(_), Scope::Global) => false,
        }
    }
}

/// Signs and verifies compact assertions without server-side storage.
#[derive(Clone, Debug)]
pub struct StepUpCodec {
    secret: SecretString,
    purpose: &'static str,
}

impl StepUpCodec {
    /// Fails when the secret is empty: a missing secret is fatal at startup.
    pub fn new(secret: SecretString, purpose: &'static str) -> Result<Self, TokenError> {
        if secret.expose_secret().trim().is_empty() {
            return Err(TokenError::MissingSecret);
        }
        Ok(Self { secret, purpose })
    }

    pub fn sign(&self, subject_id: Uuid, scope: Scope, ttl: Duration) -> Result<String, TokenError> {
        self.sign_at(subject_id, scope, ttl, Utc::now().timestamp_millis())
    }

    pub fn sign_at(
        &self,
        subject_id: Uuid,
        scope: Scope,
        ttl: Duration,
        now_ms: i64,
    ) -> Result<String, TokenError> {
        let ttl_ms = ttl.num_milliseconds();
        if ttl_ms <= 0 {
            return Err(TokenError::InvalidTtl);
        }
        let expires_at_ms = now_ms.checked_add(ttl_ms).ok_or(TokenError::InvalidTtl)?;

        let assertion = StepUpAssertion {
            subject_id,
            scope,
            issued_at_ms: now_ms,
            expires_at_ms,
        };
        let payload = serde_json::to_vec(&assertion)?;
        let mac = hmac_sha256(
            self.secret.expose_secret().as_bytes(),
            &[self.purpose.as_bytes(), b".", &payload],
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(mac)
        ))
    }

    /// Returns the assertion only if the token is authentic and unexpired.
    /// Every failure is `None`; callers treat that as unauthenticated.
    pub fn verify(&self, token: &str) -> Option<StepUpAssertion> {
        self.verify_at(token, Utc::now().timestamp_millis())
    }

    pub fn verify_at(&self, token: &str, now_ms: i64) -> Option<StepUpAssertion> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        if signature_b64.contains('.') {
            return None;
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;

        let authentic = verify_hmac_sha256(
            self.secret.expose_secret().as_bytes(),
            &[self.purpose.as_bytes(), b".", &payload],
            &signature,
        )
        .unwrap_or(false);
        if !authentic {
            tracing::debug!(purpose = self.purpose, "Rejected token with bad signature");
            return None;
        }

        let assertion: StepUpAssertion = serde_json::from_slice(&payload).ok()?;
        if assertion.expires_at_ms <= assertion.issued_at_ms {
            return None;
        }
        if now_ms > assertion.expires_at_ms {
            tracing::debug!(purpose = self.purpose, "Rejected expired token");
            return None;
        }

        Some(assertion)
    }

    /// Verify and check the assertion covers `subject_id` in `scope`.
    pub fn verify_for_at(
        &self,
        token: &str,
        subject_id: Uuid,
        scope: Scope,
        accept_global: bool,
        now_ms: i64,
    ) -> Option<StepUpAssertion> {
        self.verify_at(token, now_ms)
            .filter(|assertion| assertion.authorizes(subject_id, scope, accept_global))
    }

    pub fn verify_for(
        &self,
        token: &str,
        subject_id: Uuid,
        scope: Scope,
        accept_global: bool,
    ) -> Option<StepUpAssertion> {
        self.verify_for_at(
            token,
            subject_id,
            scope,
            accept_global,
            Utc::now().timestamp_millis(),
        )
    }
}
