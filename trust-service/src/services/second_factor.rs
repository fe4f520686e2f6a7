//! Time-based one-time codes behind a small trait, so tests can swap in a
//! deterministic verifier.

use anyhow::{anyhow, Result};
use chrono::Utc;
use service_core::utils::mac::constant_time_eq;
use totp_rs::{Algorithm, Secret, TOTP};

/// A freshly provisioned secret awaiting confirmation.
#[derive(Debug, Clone)]
pub struct Provisioned {
    /// Base32 secret as stored on the user record.
    pub secret: String,
    pub otpauth_url: String,
}

pub trait SecondFactorVerifier: Send + Sync {
    fn provision(&self, account: &str) -> Result<Provisioned>;

    /// The time step `code` was generated for, if it is currently valid for
    /// `secret`. Malformed input is simply invalid.
    fn verify(&self, secret: &str, code: &str) -> Option<i64>;
}

pub struct TotpVerifier {
    issuer: String,
}

impl TotpVerifier {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

impl SecondFactorVerifier for TotpVerifier {
    fn provision(&self, account: &str) -> Result<Provisioned> {
        let secret = Secret::generate_secret();
        let bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("TOTP secret error: {e:?}"))?;
        let totp = self.totp(bytes, account)?;

        Ok(Provisioned {
            secret: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        })
    }

    fn verify(&self, secret: &str, code: &str) -> Option<i64> {
        let bytes = Secret::Encoded(secret.to_string()).to_bytes().ok()?;
        let totp = match self.totp(bytes, "user") {
            Ok(totp) => totp,
            Err(e) => {
                tracing::warn!(error = %e, "Stored TOTP secret is unusable");
                return None;
            }
        };

        let now = u64::try_from(Utc::now().timestamp()).ok()?;
        let current = now / totp.step;
        let skew = u64::from(totp.skew);
        let code = code.trim();

        (current.saturating_sub(skew)..=current + skew)
            .find(|step| {
                constant_time_eq(totp.generate(step * totp.step).as_bytes(), code.as_bytes())
            })
            .and_then(|step| i64::try_from(step).ok())
    }
}
