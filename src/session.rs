//! Typed session state for authentication and in-flight OAuth workflows.
//!
//! The session store is an opaque keyed blob store with TTL equal to the
//! cookie lifetime; everything stored here carries that assumption. The
//! OAuth workflow is a tagged union with one variant per in-flight step and
//! an explicit expiry so a stale variant is never acted on.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::models::identity::NormalizedIdentity;

pub const USER_KEY: &str = "user";
pub const WORKFLOW_KEY: &str = "oauth.workflow";

/// Authenticated user snapshot bound to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: i32,
    pub username: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthMode {
    Login,
    Link,
}

/// One in-flight OAuth step per session, at most.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum OAuthWorkflow {
    /// State token issued, waiting for the provider to call back.
    AwaitingCallback {
        provider: String,
        state: String,
        mode: OAuthMode,
        initiating_user_id: Option<i32>,
        return_to: Option<String>,
        expires_at: String,
    },
    /// Signup deferred on a username collision; holds everything needed to
    /// finish account creation once the client supplies another name.
    PendingSignup {
        identity: NormalizedIdentity,
        base_username: String,
        return_to: Option<String>,
        expires_at: String,
    },
}

impl OAuthWorkflow {
    fn expires_at(&self) -> &str {
        match self {
            Self::AwaitingCallback { expires_at, .. } | Self::PendingSignup { expires_at, .. } => {
                expires_at
            }
        }
    }

    /// An unparseable expiry counts as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        DateTime::parse_from_rfc3339(self.expires_at())
            .map_or(true, |expiry| expiry < Utc::now())
    }
}

/// Anti-forgery state token: 32 random bytes, hex-encoded.
#[must_use]
pub fn generate_state_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn workflow_expiry(ttl_minutes: i64) -> String {
    (Utc::now() + Duration::minutes(ttl_minutes)).to_rfc3339()
}

/// Issue a state token and store the `AwaitingCallback` step, persisted
/// before the caller redirects to the provider.
pub async fn begin_callback_wait(
    session: &Session,
    provider: &str,
    mode: OAuthMode,
    initiating_user_id: Option<i32>,
    return_to: Option<String>,
    ttl_minutes: i64,
) -> Result<String> {
    let state = generate_state_token();
    let workflow = OAuthWorkflow::AwaitingCallback {
        provider: provider.to_string(),
        state: state.clone(),
        mode,
        initiating_user_id,
        return_to,
        expires_at: workflow_expiry(ttl_minutes),
    };

    session
        .insert(WORKFLOW_KEY, &workflow)
        .await
        .context("Failed to store OAuth workflow state")?;
    session
        .save()
        .await
        .context("Failed to persist OAuth workflow state")?;

    Ok(state)
}

/// Remove and return the stored workflow. The removal happens before any
/// inspection, so the first verification attempt consumes the state whether
/// or not it verifies; a racing second callback observes absence.
pub async fn take_workflow(session: &Session) -> Result<Option<OAuthWorkflow>> {
    let workflow: Option<OAuthWorkflow> = session
        .remove(WORKFLOW_KEY)
        .await
        .context("Failed to consume OAuth workflow state")?;

    Ok(workflow.filter(|w| !w.is_expired()))
}

/// Store the deferred-signup step. Replaces whatever step was current.
pub async fn stash_pending_signup(
    session: &Session,
    identity: &NormalizedIdentity,
    base_username: &str,
    return_to: Option<String>,
    ttl_minutes: i64,
) -> Result<()> {
    let workflow = OAuthWorkflow::PendingSignup {
        identity: identity.clone(),
        base_username: base_username.to_string(),
        return_to,
        expires_at: workflow_expiry(ttl_minutes),
    };

    session
        .insert(WORKFLOW_KEY, &workflow)
        .await
        .context("Failed to store pending signup")?;
    session
        .save()
        .await
        .context("Failed to persist pending signup")?;

    Ok(())
}

/// Read the deferred signup without consuming it, so a failed username
/// validation leaves the client free to retry. Expired entries read as
/// absent.
pub async fn peek_pending_signup(
    session: &Session,
) -> Result<Option<(NormalizedIdentity, String, Option<String>)>> {
    let workflow: Option<OAuthWorkflow> = session
        .get(WORKFLOW_KEY)
        .await
        .context("Failed to read pending signup")?;

    let Some(workflow) = workflow else {
        return Ok(None);
    };
    if workflow.is_expired() {
        return Ok(None);
    }

    match workflow {
        OAuthWorkflow::PendingSignup {
            identity,
            base_username,
            return_to,
            ..
        } => Ok(Some((identity, base_username, return_to))),
        OAuthWorkflow::AwaitingCallback { .. } => Ok(None),
    }
}

pub async fn clear_workflow(session: &Session) -> Result<()> {
    session
        .remove::<OAuthWorkflow>(WORKFLOW_KEY)
        .await
        .context("Failed to clear OAuth workflow state")?;
    Ok(())
}

pub async fn current_user(session: &Session) -> Result<Option<SessionUser>> {
    session
        .get::<SessionUser>(USER_KEY)
        .await
        .context("Failed to read session user")
}

/// Bind the authenticated user to the session and await durable persistence.
/// The client follows the redirect with an immediate "who am I" request, so
/// the write must have reached the store before the redirect is issued.
pub async fn bind_user(session: &Session, user: &SessionUser) -> Result<()> {
    session
        .insert(USER_KEY, user)
        .await
        .context("Failed to bind session user")?;
    session
        .save()
        .await
        .context("Failed to persist session user")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> NormalizedIdentity {
        NormalizedIdentity {
            provider: "github".to_string(),
            provider_account_id: "42".to_string(),
            username: "octocat".to_string(),
            display_name: Some("The Octocat".to_string()),
            avatar_url: None,
            profile_url: None,
            email: Some("octocat@example.com".to_string()),
            email_verified: true,
            access_token: "gho_token".to_string(),
            scope: Some("read:user".to_string()),
        }
    }

    #[test]
    fn test_state_tokens_are_hex_and_unique() {
        let a = generate_state_token();
        let b = generate_state_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_workflow_serde_round_trip() {
        let workflow = OAuthWorkflow::AwaitingCallback {
            provider: "github".to_string(),
            state: "abc".to_string(),
            mode: OAuthMode::Link,
            initiating_user_id: Some(7),
            return_to: Some("/settings".to_string()),
            expires_at: workflow_expiry(60),
        };

        let json = serde_json::to_value(&workflow).unwrap();
        assert_eq!(json["step"], "awaiting_callback");
        assert_eq!(json["mode"], "link");

        let back: OAuthWorkflow = serde_json::from_value(json).unwrap();
        assert!(!back.is_expired());
    }

    #[test]
    fn test_expired_workflow_detected() {
        let workflow = OAuthWorkflow::PendingSignup {
            identity: identity(),
            base_username: "octocat".to_string(),
            return_to: None,
            expires_at: (Utc::now() - Duration::minutes(1)).to_rfc3339(),
        };
        assert!(workflow.is_expired());

        let garbled = OAuthWorkflow::PendingSignup {
            identity: identity(),
            base_username: "octocat".to_string(),
            return_to: None,
            expires_at: "not a timestamp".to_string(),
        };
        assert!(garbled.is_expired());
    }
}
