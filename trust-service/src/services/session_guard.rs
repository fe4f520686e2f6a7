//! The single authority for "may this request proceed as this session".

use std::sync::Arc;

use super::error::ServiceError;
use super::store::{SessionStore, UserStore};
use crate::models::{SessionClaim, SessionRecord, UserSecurityState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    LiveOk,
    /// Session intact, but a fresh second factor is needed first.
    LiveStepUpRequired,
    Revoked,
    /// The user's session version moved past the claim.
    VersionStale,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::LiveOk)
    }
}

#[derive(Clone)]
pub struct SessionGuard {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
}

impl SessionGuard {
    pub fn new(users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { users, sessions }
    }

    /// Render a verdict from already-loaded records.
    ///
    /// The version check runs first and wins over any per-session state.
    pub fn check(
        claim: &SessionClaim,
        user: &UserSecurityState,
        session: Option<&SessionRecord>,
        enforce_step_up: bool,
    ) -> Verdict {
        if claim.session_version != user.session_version {
            return Verdict::VersionStale;
        }

        let session = match session {
            Some(session)
                if session.session_id == claim.session_id
                    && session.user_id == user.user_id
                    && session.is_live() =>
            {
                session
            }
            _ => return Verdict::Revoked,
        };

        if enforce_step_up && session.requires_step_up {
            return Verdict::LiveStepUpRequired;
        }

        Verdict::LiveOk
    }

    /// Re-read the user and session and check the claim. Never cached: a
    /// revocation takes effect on the next request.
    #[tracing::instrument(
        skip(self, claim),
        fields(user_id = %claim.user_id, session_id = %claim.session_id)
    )]
    pub async fn evaluate(
        &self,
        claim: &SessionClaim,
        enforce_step_up: bool,
    ) -> Result<Verdict, ServiceError> {
        let Some(user) = self.users.find_user(claim.user_id).await? else {
            tracing::debug!("Claim refers to unknown user");
            return Ok(Verdict::Revoked);
        };
        self.evaluate_for(claim, &user, enforce_step_up).await
    }

    /// Same as [`evaluate`](Self::evaluate) when the caller already holds a
    /// fresh copy of the user.
    pub async fn evaluate_for(
        &self,
        claim: &SessionClaim,
        user: &UserSecurityState,
        enforce_step_up: bool,
    ) -> Result<Verdict, ServiceError> {
        if claim.user_id != user.user_id {
            return Ok(Verdict::Revoked);
        }

        let session = self.sessions.find_session(claim.session_id).await?;
        let verdict = Self::check(claim, user, session.as_ref(), enforce_step_up);

        if !verdict.is_allowed() {
            tracing::debug!(?verdict, "Session check rejected claim");
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn fixture(requires_step_up: bool) -> (UserSecurityState, SessionRecord, SessionClaim) {
        let user = UserSecurityState::new(Uuid::new_v4());
        let session = SessionRecord::new(user.user_id, None, requires_step_up);
        let claim = SessionClaim::for_session(&session, user.session_version);
        (user, session, claim)
    }

    #[test]
    fn test_live_session_passes() {
        let (user, session, claim) = fixture(false);
        assert_eq!(
            SessionGuard::check(&claim, &user, Some(&session), true),
            Verdict::LiveOk
        );
    }

    #[test]
    fn test_stale_version_wins_over_session_state() {
        let (mut user, mut session, claim) = fixture(true);
        user.session_version += 1;

        assert_eq!(
            SessionGuard::check(&claim, &user, Some(&session), true),
            Verdict::VersionStale
        );

        session.revoked_at = Some(Utc::now());
        assert_eq!(
            SessionGuard::check(&claim, &user, Some(&session), true),
            Verdict::VersionStale
        );
        assert_eq!(
            SessionGuard::check(&claim, &user, None, false),
            Verdict::VersionStale
        );
    }

    #[test]
    fn test_missing_foreign_or_revoked_session_is_revoked() {
        let (user, mut session, claim) = fixture(false);

        assert_eq!(
            SessionGuard::check(&claim, &user, None, false),
            Verdict::Revoked
        );

        let foreign = SessionRecord::new(Uuid::new_v4(), None, false);
        let foreign_claim = SessionClaim {
            session_id: foreign.session_id,
            ..claim
        };
        assert_eq!(
            SessionGuard::check(&foreign_claim, &user, Some(&foreign), false),
            Verdict::Revoked
        );

        session.revoked_at = Some(Utc::now());
        assert_eq!(
            SessionGuard::check(&claim, &user, Some(&session), false),
            Verdict::Revoked
        );
    }

    #[test]
    fn test_step_up_only_when_enforced() {
        let (user, session, claim) = fixture(true);

        assert_eq!(
            SessionGuard::check(&claim, &user, Some(&session), true),
            Verdict::LiveStepUpRequired
        );
        assert_eq!(
            SessionGuard::check(&claim, &user, Some(&session), false),
            Verdict::LiveOk
        );
        assert!(!Verdict::LiveStepUpRequired.is_allowed());
    }

    #[tokio::test]
    async fn test_clearing_step_up_is_seen_on_next_evaluation() {
        let store = Arc::new(MemoryStore::new());
        let (user, session, claim) = fixture(true);
        store.insert_user(user);
        store.insert_session(session.clone());
        let guard = SessionGuard::new(store.clone(), store.clone());

        assert_eq!(
            guard.evaluate(&claim, true).await.unwrap(),
            Verdict::LiveStepUpRequired
        );

        store.clear_step_up(session.session_id).await.unwrap();
        assert_eq!(guard.evaluate(&claim, true).await.unwrap(), Verdict::LiveOk);
    }

    #[tokio::test]
    async fn test_unknown_user_is_revoked_and_store_failure_errors() {
        let store = Arc::new(MemoryStore::new());
        let guard = SessionGuard::new(store.clone(), store.clone());
        let (_, _, claim) = fixture(false);

        assert_eq!(guard.evaluate(&claim, false).await.unwrap(), Verdict::Revoked);

        store.set_unavailable(true);
        assert!(guard.evaluate(&claim, false).await.is_err());
    }
}
