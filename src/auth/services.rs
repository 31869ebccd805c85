use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::auth::error::AuthError;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo_types::{Account, NewAccount};
use crate::auth::store::{AccountStore, StoreError};
use crate::auth::token::generate_token;
use crate::mailer::{password_reset_email, verification_email, Mailer};

/// Reset tokens are accepted for one hour from issuance. Verification
/// tokens never expire by time, only by consumption.
const RESET_TOKEN_TTL: TimeDuration = TimeDuration::hours(1);

/// Create an unverified account and request the verification email. The
/// caller is not logged in by this; the account becomes usable only after
/// `verify_email`.
pub async fn register(
    store: &dyn AccountStore,
    mailer: &dyn Mailer,
    base_url: &str,
    username: &str,
    email: &str,
    password: &str,
) -> Result<Account, AuthError> {
    if store.find_by_email(email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::DuplicateAccount);
    }

    let password_hash = hash_password(password)?;
    let verification_token = generate_token();

    let account = match store
        .create(NewAccount {
            username,
            email,
            password_hash: &password_hash,
            verification_token: &verification_token,
        })
        .await
    {
        Ok(account) => account,
        // A concurrent insert or a taken username trips the unique index.
        Err(StoreError::ConstraintViolation) => {
            warn!(email = %email, username = %username, "account uniqueness violated on insert");
            return Err(AuthError::DuplicateAccount);
        }
        Err(e) => return Err(e.into()),
    };

    let (subject, body) = verification_email(base_url, &verification_token);
    if let Err(e) = mailer.send(&account.email, &subject, &body).await {
        // Delivery is best-effort; the registration itself stands.
        error!(error = %e, email = %account.email, "failed to send verification email");
    }

    info!(account_id = %account.id, email = %account.email, "account registered");
    Ok(account)
}

/// Consume a verification token and activate its account. Unknown and
/// already-consumed tokens fail identically.
pub async fn verify_email(store: &dyn AccountStore, token: &str) -> Result<Account, AuthError> {
    match store.consume_verification_token(token).await? {
        Some(account) => {
            info!(account_id = %account.id, "email verified");
            Ok(account)
        }
        None => Err(AuthError::InvalidOrExpiredToken),
    }
}

/// Authenticate an email/password pair and issue a session token. Unknown
/// emails and wrong passwords produce the same failure kind; an unverified
/// account is reported distinctly, before the password is even compared.
pub async fn login(
    store: &dyn AccountStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
) -> Result<(String, Account), AuthError> {
    let account = match store.find_by_email(email).await? {
        Some(account) => account,
        None => {
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    if !account.verified {
        warn!(account_id = %account.id, "login attempt on unverified account");
        return Err(AuthError::NotVerified);
    }

    if !verify_password(password, &account.password_hash) {
        warn!(account_id = %account.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    let token = keys
        .sign(account.id, &account.username)
        .map_err(AuthError::Signing)?;

    info!(account_id = %account.id, email = %account.email, "login succeeded");
    Ok((token, account))
}

/// Issue a reset token for the account behind this email and request the
/// reset email. Reports a missing account outright (`AccountNotFound`).
pub async fn request_password_reset(
    store: &dyn AccountStore,
    mailer: &dyn Mailer,
    base_url: &str,
    email: &str,
) -> Result<(), AuthError> {
    let account = store
        .find_by_email(email)
        .await?
        .ok_or(AuthError::AccountNotFound)?;

    let reset_token = generate_token();
    let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    store
        .store_reset_token(account.id, &reset_token, expires_at)
        .await?;

    let (subject, body) = password_reset_email(base_url, &reset_token);
    if let Err(e) = mailer.send(&account.email, &subject, &body).await {
        error!(error = %e, email = %account.email, "failed to send password reset email");
    }

    info!(account_id = %account.id, "password reset requested");
    Ok(())
}

/// Consume a reset token and set the new password. Expired, consumed and
/// unknown tokens are rejected identically; verification status is left
/// untouched.
pub async fn reset_password(
    store: &dyn AccountStore,
    token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let password_hash = hash_password(new_password)?;
    match store
        .consume_reset_token(token, OffsetDateTime::now_utc(), &password_hash)
        .await?
    {
        Some(account) => {
            info!(account_id = %account.id, "password reset");
            Ok(())
        }
        None => Err(AuthError::InvalidOrExpiredToken),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use axum::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MemoryAccountStore {
        accounts: Mutex<Vec<Account>>,
    }

    impl MemoryAccountStore {
        fn new() -> Self {
            Self {
                accounts: Mutex::new(Vec::new()),
            }
        }

        fn get(&self, email: &str) -> Account {
            self.accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.email == email)
                .cloned()
                .expect("account should exist")
        }

        fn expire_reset_token(&self, email: &str) {
            let mut accounts = self.accounts.lock().unwrap();
            let account = accounts.iter_mut().find(|a| a.email == email).unwrap();
            account.reset_token_expires_at =
                Some(OffsetDateTime::now_utc() - TimeDuration::seconds(1));
        }
    }

    #[async_trait]
    impl AccountStore for MemoryAccountStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.email == email)
                .cloned())
        }

        async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.username == username)
                .cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned())
        }

        async fn create(&self, new: NewAccount<'_>) -> Result<Account, StoreError> {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts
                .iter()
                .any(|a| a.email == new.email || a.username == new.username)
            {
                return Err(StoreError::ConstraintViolation);
            }
            let account = Account {
                id: Uuid::new_v4(),
                username: new.username.to_string(),
                email: new.email.to_string(),
                password_hash: new.password_hash.to_string(),
                verified: false,
                verification_token: Some(new.verification_token.to_string()),
                reset_token: None,
                reset_token_expires_at: None,
                created_at: OffsetDateTime::now_utc(),
            };
            accounts.push(account.clone());
            Ok(account)
        }

        async fn consume_verification_token(
            &self,
            token: &str,
        ) -> Result<Option<Account>, StoreError> {
            let mut accounts = self.accounts.lock().unwrap();
            match accounts
                .iter_mut()
                .find(|a| a.verification_token.as_deref() == Some(token))
            {
                Some(account) => {
                    account.verified = true;
                    account.verification_token = None;
                    Ok(Some(account.clone()))
                }
                None => Ok(None),
            }
        }

        async fn store_reset_token(
            &self,
            id: Uuid,
            token: &str,
            expires_at: OffsetDateTime,
        ) -> Result<(), StoreError> {
            let mut accounts = self.accounts.lock().unwrap();
            if let Some(account) = accounts.iter_mut().find(|a| a.id == id) {
                account.reset_token = Some(token.to_string());
                account.reset_token_expires_at = Some(expires_at);
            }
            Ok(())
        }

        async fn consume_reset_token(
            &self,
            token: &str,
            now: OffsetDateTime,
            new_password_hash: &str,
        ) -> Result<Option<Account>, StoreError> {
            let mut accounts = self.accounts.lock().unwrap();
            match accounts.iter_mut().find(|a| {
                a.reset_token.as_deref() == Some(token)
                    && a.reset_token_expires_at.map_or(false, |exp| exp > now)
            }) {
                Some(account) => {
                    account.password_hash = new_password_hash.to_string();
                    account.reset_token = None;
                    account.reset_token_expires_at = None;
                    Ok(Some(account.clone()))
                }
                None => Ok(None),
            }
        }
    }

    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), html_body.to_string()));
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> anyhow::Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    fn make_keys() -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 60,
        })
    }

    const BASE_URL: &str = "https://signet.example";

    #[tokio::test]
    async fn register_hashes_password_and_requests_verification_email() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        let account = register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");

        assert!(!account.verified);
        assert_ne!(account.password_hash, "secret1");
        assert!(verify_password("secret1", &account.password_hash));

        let token = account.verification_token.expect("verification token set");
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, _, body) = &sent[0];
        assert_eq!(to, "a@x.com");
        assert!(body.contains(&token));
        assert!(body.contains(BASE_URL));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("first register");

        let err = register(&store, &mailer, BASE_URL, "alice2", "a@x.com", "secret2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateAccount));

        // Same username, different email: caught at the write.
        let err = register(&store, &mailer, BASE_URL, "alice", "b@x.com", "secret2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateAccount));

        assert_eq!(store.accounts.lock().unwrap().len(), 1);
        assert!(store.find_by_username("alice").await.unwrap().is_some());
        assert!(store.find_by_username("alice2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_email_consumes_the_token() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        let token = store.get("a@x.com").verification_token.unwrap();

        let account = verify_email(&store, &token).await.expect("verify");
        assert!(account.verified);
        assert!(account.verification_token.is_none());

        // The consumed token is gone even though no new one was issued.
        let err = verify_email(&store, &token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn unknown_verification_token_is_rejected() {
        let store = MemoryAccountStore::new();
        let err = verify_email(&store, "deadbeef").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn login_requires_verification_first() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();
        let keys = make_keys();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");

        // Correct credentials, but the email was never verified.
        let err = login(&store, &keys, "a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::NotVerified));
    }

    #[tokio::test]
    async fn login_folds_unknown_email_and_wrong_password_together() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();
        let keys = make_keys();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        let token = store.get("a@x.com").verification_token.unwrap();
        verify_email(&store, &token).await.expect("verify");

        let wrong_password = login(&store, &keys, "a@x.com", "wrong").await.unwrap_err();
        let unknown_email = login(&store, &keys, "nobody@x.com", "secret1")
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn login_returns_signed_session_token() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();
        let keys = make_keys();

        let account = register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        let token = store.get("a@x.com").verification_token.unwrap();
        verify_email(&store, &token).await.expect("verify");

        let (session_token, _) = login(&store, &keys, "a@x.com", "secret1")
            .await
            .expect("login");
        let claims = keys.verify(&session_token).expect("session token verifies");
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn password_reset_roundtrip() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();
        let keys = make_keys();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        let token = store.get("a@x.com").verification_token.unwrap();
        verify_email(&store, &token).await.expect("verify");

        request_password_reset(&store, &mailer, BASE_URL, "a@x.com")
            .await
            .expect("request reset");

        let account = store.get("a@x.com");
        let reset_token = account.reset_token.expect("reset token set");
        let expires_at = account.reset_token_expires_at.expect("expiry set");
        let now = OffsetDateTime::now_utc();
        assert!(expires_at > now + TimeDuration::minutes(59));
        assert!(expires_at <= now + TimeDuration::minutes(61));

        let sent = mailer.sent.lock().unwrap();
        assert!(sent.last().unwrap().2.contains(&reset_token));
        drop(sent);

        reset_password(&store, &reset_token, "secret2")
            .await
            .expect("reset password");

        let account = store.get("a@x.com");
        assert!(account.reset_token.is_none());
        assert!(account.reset_token_expires_at.is_none());

        let err = login(&store, &keys, "a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        login(&store, &keys, "a@x.com", "secret2")
            .await
            .expect("login with new password");
    }

    #[tokio::test]
    async fn reset_token_expiry_is_a_hard_cutoff() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        request_password_reset(&store, &mailer, BASE_URL, "a@x.com")
            .await
            .expect("request reset");

        let reset_token = store.get("a@x.com").reset_token.unwrap();
        store.expire_reset_token("a@x.com");

        // Exact value match, elapsed expiry: indistinguishable from unknown.
        let err = reset_password(&store, &reset_token, "secret2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn consumed_reset_token_cannot_be_replayed() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        request_password_reset(&store, &mailer, BASE_URL, "a@x.com")
            .await
            .expect("request reset");
        let reset_token = store.get("a@x.com").reset_token.unwrap();

        reset_password(&store, &reset_token, "secret2")
            .await
            .expect("first reset");
        let err = reset_password(&store, &reset_token, "secret3")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn reset_leaves_verification_status_untouched() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        register(&store, &mailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register");
        request_password_reset(&store, &mailer, BASE_URL, "a@x.com")
            .await
            .expect("request reset");
        let reset_token = store.get("a@x.com").reset_token.unwrap();
        reset_password(&store, &reset_token, "secret2")
            .await
            .expect("reset");

        assert!(!store.get("a@x.com").verified);
    }

    #[tokio::test]
    async fn forgot_password_reports_missing_accounts() {
        let store = MemoryAccountStore::new();
        let mailer = RecordingMailer::new();

        let err = request_password_reset(&store, &mailer, BASE_URL, "nobody@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountNotFound));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mail_failure_does_not_fail_the_operation() {
        let store = MemoryAccountStore::new();

        register(&store, &FailingMailer, BASE_URL, "alice", "a@x.com", "secret1")
            .await
            .expect("register survives mail failure");
        request_password_reset(&store, &FailingMailer, BASE_URL, "a@x.com")
            .await
            .expect("reset request survives mail failure");

        // The state transitions still happened.
        let account = store.get("a@x.com");
        assert!(account.verification_token.is_some());
        assert!(account.reset_token.is_some());
    }
}
