//! One-time recovery codes for second-factor loss.
//!
//! Plaintext codes leave this module exactly once, at generation time. What
//! persists is a keyed hash bound to the owning subject, so a leaked hash list
//! cannot be replayed against another account.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use service_core::utils::mac::{constant_time_eq, hmac_sha256_hex};
use uuid::Uuid;

use crate::models::StoredRecoveryCode;

const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
// 32 symbols: no 0/O or 1/I. 256 is a multiple of 32 so byte-modulo is unbiased.
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Result of presenting a code against a stored snapshot.
#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub ok: bool,
    /// The list to persist. Identical to the input when `ok` is false.
    pub updated: Vec<StoredRecoveryCode>,
}

#[derive(Clone, Debug)]
pub struct RecoveryVault {
    pepper: SecretString,
}

impl RecoveryVault {
    pub fn new(pepper: SecretString) -> Result<Self> {
        if pepper.expose_secret().trim().is_empty() {
            anyhow::bail!("recovery code pepper is not configured");
        }
        Ok(Self { pepper })
    }

    /// Generate `count` distinct codes in `XXXX-XXXX-XXXX` form.
    pub fn generate(count: usize) -> Vec<String> {
        Self::generate_with_rng(&mut OsRng, count)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R, count: usize) -> Vec<String> {
        let mut seen = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);

        while codes.len() < count {
            let code = generate_code(rng);
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        codes
    }

    /// Case-fold and drop whitespace and separators.
    pub fn normalize(code: &str) -> String {
        code.chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|ch| ch.to_ascii_uppercase())
            .collect()
    }

    fn hash(&self, subject_id: Uuid, normalized: &str) -> Result<String> {
        let subject = subject_id.to_string();
        hmac_sha256_hex(
            self.pepper.expose_secret().as_bytes(),
            &[subject.as_bytes(), b":", normalized.as_bytes()],
        )
        .context("failed to hash recovery code")
    }

    /// Hash a fresh batch for storage.
    pub fn prepare(&self, codes: &[String], subject_id: Uuid) -> Result<Vec<StoredRecoveryCode>> {
        codes
            .iter()
            .map(|code| {
                self.hash(subject_id, &Self::normalize(code))
                    .map(StoredRecoveryCode::new)
            })
            .collect()
    }

    pub fn consume(
        &self,
        stored: &[StoredRecoveryCode],
        subject_id: Uuid,
        presented: &str,
    ) -> Result<ConsumeOutcome> {
        self.consume_at(stored, subject_id, presented, Utc::now())
    }

    /// Mark the first unused entry matching `presented` as used.
    ///
    /// Pure over the snapshot: persisting `updated` atomically against the
    /// same snapshot is the caller's job.
    pub fn consume_at(
        &self,
        stored: &[StoredRecoveryCode],
        subject_id: Uuid,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let normalized = Self::normalize(presented);
        let mut updated = stored.to_vec();

        if normalized.len() != RECOVERY_CODE_LEN {
            return Ok(ConsumeOutcome { ok: false, updated });
        }

        let candidate = self.hash(subject_id, &normalized)?;
        let position = updated.iter().position(|entry| {
            !entry.is_used() && constant_time_eq(entry.hash.as_bytes(), candidate.as_bytes())
        });

        match position {
            Some(index) => {
                updated[index].used_at = Some(now);
                Ok(ConsumeOutcome { ok: true, updated })
            }
            None => Ok(ConsumeOutcome { ok: false, updated }),
        }
    }
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);

    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % RECOVERY_CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        let symbol = RECOVERY_CODE_ALPHABET[usize::from(*byte) % RECOVERY_CODE_ALPHABET.len()];
        out.push(char::from(symbol));
    }
    out
}
