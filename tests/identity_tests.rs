//! Decision-tree coverage for identity resolution, linking and unlinking,
//! exercised directly at the service layer over an in-memory database.

use murmur::clients::placeholder_email;
use murmur::config::SecurityConfig;
use murmur::db::Store;
use murmur::models::identity::NormalizedIdentity;
use murmur::services::{
    AuthError, AuthService, IdentityService, LoginResolution, SeaOrmAuthService,
    SeaOrmIdentityService,
};

async fn spawn_store() -> Store {
    Store::new("sqlite::memory:").await.expect("store")
}

fn services(store: &Store) -> (SeaOrmAuthService, SeaOrmIdentityService) {
    (
        SeaOrmAuthService::new(store.clone(), SecurityConfig::default()),
        SeaOrmIdentityService::new(store.clone()),
    )
}

fn github_identity(account_id: &str, login: &str, email: Option<&str>) -> NormalizedIdentity {
    NormalizedIdentity {
        provider: "github".to_string(),
        provider_account_id: account_id.to_string(),
        username: login.to_string(),
        display_name: Some(login.to_string()),
        avatar_url: Some(format!("https://avatars.example/{login}")),
        profile_url: Some(format!("https://github.com/{login}")),
        email: Some(
            email.map_or_else(|| placeholder_email("github", account_id), str::to_string),
        ),
        email_verified: email.is_some(),
        access_token: format!("gho_{account_id}"),
        scope: Some("read:user,user:email".to_string()),
    }
}

fn google_identity(account_id: &str, login: &str, email: &str) -> NormalizedIdentity {
    NormalizedIdentity {
        provider: "google".to_string(),
        provider_account_id: account_id.to_string(),
        username: login.to_string(),
        display_name: Some(login.to_string()),
        avatar_url: None,
        profile_url: None,
        email: Some(email.to_string()),
        email_verified: true,
        access_token: format!("ya29_{account_id}"),
        scope: Some("openid email profile".to_string()),
    }
}

#[tokio::test]
async fn test_new_identity_creates_user_and_account() {
    let store = spawn_store().await;
    let (_, identity) = services(&store);

    let resolution = identity
        .resolve_login(&github_identity("100", "octocat", Some("octocat@example.com")))
        .await
        .unwrap();

    let LoginResolution::SignedIn(user) = resolution else {
        panic!("expected SignedIn");
    };
    assert_eq!(user.username, "octocat");

    let stored = store.get_user_by_username("octocat").await.unwrap().unwrap();
    assert!(!stored.has_set_password);
    assert_eq!(stored.email.as_deref(), Some("octocat@example.com"));

    let linked = identity.linked_providers(user.user_id).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].provider, "github");
}

#[tokio::test]
async fn test_repeat_login_reuses_account_and_refreshes_profile() {
    let store = spawn_store().await;
    let (_, identity) = services(&store);

    let first = github_identity("100", "octocat", Some("octocat@example.com"));
    let LoginResolution::SignedIn(user_a) = identity.resolve_login(&first).await.unwrap() else {
        panic!("expected SignedIn");
    };

    let mut second = first.clone();
    second.display_name = Some("The Octocat".to_string());
    second.access_token = "gho_rotated".to_string();

    let LoginResolution::SignedIn(user_b) = identity.resolve_login(&second).await.unwrap() else {
        panic!("expected SignedIn");
    };

    assert_eq!(user_a.user_id, user_b.user_id);

    let accounts = store.list_oauth_accounts(user_a.user_id).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].display_name.as_deref(), Some("The Octocat"));
    assert_eq!(accounts[0].access_token, "gho_rotated");
}

#[tokio::test]
async fn test_login_links_implicitly_by_email() {
    let store = spawn_store().await;
    let (auth, identity) = services(&store);

    let local = auth
        .register("dana", "dana@example.com", "hunter2hunter2")
        .await
        .unwrap();

    // Same email, completely different provider handle.
    let resolution = identity
        .resolve_login(&google_identity("g-1", "dana_g", "dana@example.com"))
        .await
        .unwrap();

    let LoginResolution::SignedIn(user) = resolution else {
        panic!("expected SignedIn");
    };
    assert_eq!(user.user_id, local.user_id);

    let linked = identity.linked_providers(local.user_id).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].provider, "google");
}

#[tokio::test]
async fn test_username_conflict_defers_without_writes() {
    let store = spawn_store().await;
    let (auth, identity) = services(&store);

    auth.register("octocat", "taken@example.com", "hunter2hunter2")
        .await
        .unwrap();

    let incoming = github_identity("200", "OctoCat", Some("new@example.com"));
    let resolution = identity.resolve_login(&incoming).await.unwrap();

    // Case-insensitive collision with the existing "octocat".
    let LoginResolution::UsernameConflict { base_username } = resolution else {
        panic!("expected UsernameConflict");
    };
    assert_eq!(base_username, "octocat");

    // No user row, no linked account.
    assert!(store.get_user_by_email("new@example.com").await.unwrap().is_none());
    assert!(store.get_oauth_account("github", "200").await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_signup_after_conflict() {
    let store = spawn_store().await;
    let (auth, identity) = services(&store);

    auth.register("octocat", "taken@example.com", "hunter2hunter2")
        .await
        .unwrap();

    let incoming = github_identity("200", "octocat", Some("new@example.com"));
    assert!(matches!(
        identity.resolve_login(&incoming).await.unwrap(),
        LoginResolution::UsernameConflict { .. }
    ));

    // Taken name rejected; nothing is created.
    let err = identity
        .complete_signup(&incoming, "OCTOCAT")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    // Bad charset rejected too.
    let err = identity
        .complete_signup(&incoming, "octo cat")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    // An acceptable alternative finishes the signup atomically.
    let user = identity
        .complete_signup(&incoming, "octocat2")
        .await
        .unwrap();
    assert_eq!(user.username, "octocat2");

    let accounts = store.list_oauth_accounts(user.user_id).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].provider_account_id, "200");
}

#[tokio::test]
async fn test_link_rejects_identity_owned_by_other_user() {
    let store = spawn_store().await;
    let (auth, identity) = services(&store);

    let u1 = auth
        .register("alice", "alice@example.com", "hunter2hunter2")
        .await
        .unwrap();
    let u2 = auth
        .register("bob", "bob@example.com", "hunter2hunter2")
        .await
        .unwrap();

    let google = google_identity("g-9", "shared", "third@example.com");
    identity.link_account(u2.user_id, &google).await.unwrap();

    let err = identity.link_account(u1.user_id, &google).await.unwrap_err();
    assert!(matches!(err, AuthError::AlreadyLinkedElsewhere));

    // No writes for the loser: U2 still owns it, U1 has nothing.
    let account = store.get_oauth_account("google", "g-9").await.unwrap().unwrap();
    assert_eq!(account.user_id, u2.user_id);
    assert!(identity.linked_providers(u1.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_relinking_same_provider_replaces_prior_identity() {
    let store = spawn_store().await;
    let (auth, identity) = services(&store);

    let user = auth
        .register("carol", "carol@example.com", "hunter2hunter2")
        .await
        .unwrap();

    identity
        .link_account(user.user_id, &github_identity("300", "carol_old", None))
        .await
        .unwrap();
    identity
        .link_account(user.user_id, &github_identity("301", "carol_new", None))
        .await
        .unwrap();

    // At most one account per provider per user; the newer identity wins.
    let accounts = store.list_oauth_accounts(user.user_id).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].provider_account_id, "301");
    assert!(store.get_oauth_account("github", "300").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unlink_guard_protects_last_method() {
    let store = spawn_store().await;
    let (auth, identity) = services(&store);

    // Federated account: no password, one linked provider.
    let LoginResolution::SignedIn(user) = identity
        .resolve_login(&github_identity("400", "dave", Some("dave@example.com")))
        .await
        .unwrap()
    else {
        panic!("expected SignedIn");
    };

    let err = identity.unlink(user.user_id, "github").await.unwrap_err();
    assert!(matches!(err, AuthError::CannotUnlinkOnlyMethod));
    assert_eq!(identity.linked_providers(user.user_id).await.unwrap().len(), 1);

    // Unknown provider is a different failure.
    let err = identity.unlink(user.user_id, "google").await.unwrap_err();
    assert!(matches!(err, AuthError::NotLinked));

    // Once a password exists the same unlink goes through.
    auth.set_password(user.user_id, "hunter2hunter2").await.unwrap();
    identity.unlink(user.user_id, "github").await.unwrap();
    assert!(identity.linked_providers(user.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unlink_allowed_with_second_provider() {
    let store = spawn_store().await;
    let (_, identity) = services(&store);

    let LoginResolution::SignedIn(user) = identity
        .resolve_login(&github_identity("500", "erin", Some("erin@example.com")))
        .await
        .unwrap()
    else {
        panic!("expected SignedIn");
    };

    identity
        .link_account(user.user_id, &google_identity("g-500", "erin", "erin@example.com"))
        .await
        .unwrap();

    identity.unlink(user.user_id, "github").await.unwrap();

    let remaining = identity.linked_providers(user.user_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].provider, "google");
}

#[tokio::test]
async fn test_placeholder_emails_keep_identities_distinct() {
    let store = spawn_store().await;
    let (_, identity) = services(&store);

    // Two email-less identities on the same provider must not collide on the
    // synthesized addresses.
    let LoginResolution::SignedIn(a) = identity
        .resolve_login(&github_identity("600", "frank", None))
        .await
        .unwrap()
    else {
        panic!("expected SignedIn");
    };
    let LoginResolution::SignedIn(b) = identity
        .resolve_login(&github_identity("601", "grace", None))
        .await
        .unwrap()
    else {
        panic!("expected SignedIn");
    };

    assert_ne!(a.user_id, b.user_id);
    assert_ne!(a.email, b.email);
}

#[tokio::test]
async fn test_set_password_rejected_when_already_set() {
    let store = spawn_store().await;
    let (auth, _) = services(&store);

    let user = auth
        .register("henry", "henry@example.com", "hunter2hunter2")
        .await
        .unwrap();

    // Local account already has a password.
    let err = auth
        .set_password(user.user_id, "another-password")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}
