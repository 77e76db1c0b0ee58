use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use common::now_secs;
use rand::Rng;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::info;

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const USERS_BY_EMAIL_TABLE: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: u64,
    pub last_login_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: u64,
}

#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    RegistrationClosed,
    UserExists,
    InvalidEmail,
    PasswordMismatch,
    WeakPassword(Vec<String>),
    Hash(String),
    DbError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid login attempt."),
            AuthError::RegistrationClosed => write!(f, "Registration is closed."),
            AuthError::UserExists => write!(f, "Email is already taken."),
            AuthError::InvalidEmail => write!(f, "Email is invalid."),
            AuthError::PasswordMismatch => {
                write!(f, "The password and confirmation password do not match.")
            }
            AuthError::WeakPassword(problems) => write!(f, "{}", problems.join(" ")),
            AuthError::Hash(err) => write!(f, "password hash error: {}", err),
            AuthError::DbError(err) => write!(f, "db error: {}", err),
        }
    }
}

impl std::error::Error for AuthError {}

fn db_err(err: impl std::fmt::Display) -> AuthError {
    AuthError::DbError(err.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_digit: bool,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_non_alphanumeric: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_digit: true,
            require_lowercase: true,
            require_uppercase: true,
            require_non_alphanumeric: false,
        }
    }
}

impl PasswordPolicy {
    /// Every rule the password breaks; empty when it passes.
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut out = Vec::new();
        if password.chars().count() < self.min_length {
            out.push(format!(
                "Passwords must be at least {} characters.",
                self.min_length
            ));
        }
        if self.require_non_alphanumeric && password.chars().all(|c| c.is_ascii_alphanumeric()) {
            out.push("Passwords must have at least one non alphanumeric character.".to_string());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            out.push("Passwords must have at least one digit ('0'-'9').".to_string());
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            out.push("Passwords must have at least one lowercase ('a'-'z').".to_string());
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            out.push("Passwords must have at least one uppercase ('A'-'Z').".to_string());
        }
        out
    }
}

pub fn is_valid_email(email: &str) -> bool {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '@' | '+');
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && email.chars().all(allowed)
        }
        None => false,
    }
}

#[derive(Clone)]
pub struct AuthStore {
    db: Arc<Database>,
    session_ttl: Duration,
    policy: PasswordPolicy,
}

impl AuthStore {
    pub fn new(db: Arc<Database>, session_ttl: Duration) -> Self {
        Self {
            db,
            session_ttl,
            policy: PasswordPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn init_tables(&self) -> Result<(), AuthError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            write_txn.open_table(USERS_TABLE).map_err(db_err)?;
            write_txn.open_table(USERS_BY_EMAIL_TABLE).map_err(db_err)?;
            write_txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn has_any_user(&self) -> Result<bool, AuthError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(USERS_TABLE).map_err(db_err)?;
        Ok(table.len().map_err(db_err)? > 0)
    }

    /// Self-service sign up, open only until the first account exists.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<AuthUser, AuthError> {
        if self.has_any_user()? {
            return Err(AuthError::RegistrationClosed);
        }
        if password != confirm {
            return Err(AuthError::PasswordMismatch);
        }
        self.create_user(email, password)
    }

    pub fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        let problems = self.policy.violations(password);
        if !problems.is_empty() {
            return Err(AuthError::WeakPassword(problems));
        }
        let password_hash = hash_password(password)?;
        let email_key = email.to_lowercase();

        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash,
            created_at: now_secs(),
            last_login_at: None,
        };

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut by_email = txn.open_table(USERS_BY_EMAIL_TABLE).map_err(db_err)?;
            if by_email.get(email_key.as_str()).map_err(db_err)?.is_some() {
                return Err(AuthError::UserExists);
            }
            by_email
                .insert(email_key.as_str(), user.id.as_str())
                .map_err(db_err)?;
            let mut users = txn.open_table(USERS_TABLE).map_err(db_err)?;
            let bytes = bincode::serialize(&user).map_err(db_err)?;
            users
                .insert(user.id.as_str(), bytes.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(user)
    }

    /// Verifies the password and stamps `last_login_at` on success.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<AuthUser>, AuthError> {
        let mut user = match self.get_user_by_email(email)? {
            Some(user) => user,
            None => return Ok(None),
        };
        if !verify_password(password, &user.password_hash) {
            return Ok(None);
        }

        user.last_login_at = Some(now_secs());
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut users = txn.open_table(USERS_TABLE).map_err(db_err)?;
            let bytes = bincode::serialize(&user).map_err(db_err)?;
            users
                .insert(user.id.as_str(), bytes.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(Some(user))
    }

    pub fn create_session(&self, user_id: &str) -> Result<SessionToken, AuthError> {
        let session = SessionToken {
            token: generate_token(),
            user_id: user_id.to_string(),
            expires_at: now_secs() + self.session_ttl.as_secs(),
        };

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
            let bytes = bincode::serialize(&session).map_err(db_err)?;
            table
                .insert(session.token.as_str(), bytes.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(session)
    }

    pub fn revoke_session(&self, token: &str) -> Result<(), AuthError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
            table.remove(token).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    /// Drops sessions past their expiry. Returns how many were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize, AuthError> {
        let now = now_secs();
        let txn = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
            let mut expired = Vec::new();
            for item in table.iter().map_err(db_err)? {
                let item = item.map_err(db_err)?;
                let session: SessionToken = bincode::deserialize(item.1.value()).map_err(db_err)?;
                if session.expires_at <= now {
                    expired.push(session.token);
                }
            }
            for token in &expired {
                table.remove(token.as_str()).map_err(db_err)?;
            }
            expired.len()
        };
        txn.commit().map_err(db_err)?;
        Ok(removed)
    }

    pub fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let sessions = read_txn.open_table(SESSIONS_TABLE).map_err(db_err)?;
        let session: SessionToken = match sessions.get(token).map_err(db_err)? {
            Some(value) => bincode::deserialize(value.value()).map_err(db_err)?,
            None => return Ok(None),
        };
        if session.expires_at <= now_secs() {
            return Ok(None);
        }

        let users = read_txn.open_table(USERS_TABLE).map_err(db_err)?;
        let user = match users.get(session.user_id.as_str()).map_err(db_err)? {
            Some(value) => Some(bincode::deserialize(value.value()).map_err(db_err)?),
            None => None,
        };
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<AuthUser>, AuthError> {
        let key = email.trim().to_lowercase();
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let by_email = read_txn.open_table(USERS_BY_EMAIL_TABLE).map_err(db_err)?;
        let id = match by_email.get(key.as_str()).map_err(db_err)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let users = read_txn.open_table(USERS_TABLE).map_err(db_err)?;
        let user = match users.get(id.as_str()).map_err(db_err)? {
            Some(value) => Some(bincode::deserialize(value.value()).map_err(db_err)?),
            None => None,
        };
        Ok(user)
    }

    /// Seeds an account from the environment. Skipped when users exist unless `force`,
    /// and always skipped when the email is already registered.
    pub fn ensure_default_admin(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        force: bool,
    ) -> Result<Option<AuthUser>, AuthError> {
        let (email, password) = match (email, password) {
            (Some(email), Some(password))
                if !email.trim().is_empty() && !password.trim().is_empty() =>
            {
                (email, password)
            }
            _ => return Ok(None),
        };
        if !force && self.has_any_user()? {
            return Ok(None);
        }
        if self.get_user_by_email(email)?.is_some() {
            return Ok(None);
        }
        let user = self.create_user(email, password)?;
        info!("Created admin user {}", user.email);
        Ok(Some(user))
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hash(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn generate_token() -> String {
    const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..32)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration) -> (tempfile::TempDir, AuthStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("auth.redb")).unwrap());
        let store = AuthStore::new(db, ttl);
        store.init_tables().unwrap();
        (dir, store)
    }

    const GOOD: &str = "Secret123";

    #[test]
    fn password_policy_lists_each_problem() {
        let policy = PasswordPolicy::default();
        assert!(policy.violations(GOOD).is_empty());
        assert!(policy.violations("abcdEFG1").is_empty());
        assert_eq!(policy.violations("short1A").len(), 1);
        assert_eq!(policy.violations("alllowercase").len(), 2);
        assert_eq!(policy.violations("").len(), 4);
    }

    #[test]
    fn configured_policy_applies_to_new_users() {
        let (_dir, store) = store(Duration::from_secs(60));
        let store = store.with_policy(PasswordPolicy {
            min_length: 12,
            require_uppercase: false,
            require_non_alphanumeric: true,
            ..Default::default()
        });
        match store.create_user("a@x.io", GOOD) {
            Err(AuthError::WeakPassword(problems)) => assert_eq!(
                problems,
                vec![
                    "Passwords must be at least 12 characters.".to_string(),
                    "Passwords must have at least one non alphanumeric character.".to_string(),
                ]
            ),
            other => panic!("unexpected result: {:?}", other.map(|user| user.email)),
        }
        store.create_user("a@x.io", "long-secret-99").unwrap();
    }

    #[test]
    fn email_character_rules() {
        assert!(is_valid_email("ana.vale+music@example.com"));
        assert!(is_valid_email("a_b-c@x"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ana vale@example.com"));
        assert!(!is_valid_email("ana@exa!mple.com"));
    }

    #[test]
    fn registration_closes_after_first_user() {
        let (_dir, store) = store(Duration::from_secs(60));
        assert!(matches!(
            store.register("a@x.io", GOOD, "Other123"),
            Err(AuthError::PasswordMismatch)
        ));
        store.register("a@x.io", GOOD, GOOD).unwrap();
        assert!(matches!(
            store.register("b@x.io", GOOD, GOOD),
            Err(AuthError::RegistrationClosed)
        ));
        assert!(matches!(
            store.create_user("A@X.IO", GOOD),
            Err(AuthError::UserExists)
        ));
    }

    #[test]
    fn login_records_last_login_and_issues_session() {
        let (_dir, store) = store(Duration::from_secs(60));
        let user = store.create_user("Ana@Example.com", GOOD).unwrap();
        assert!(user.last_login_at.is_none());

        assert!(store.authenticate("ana@example.com", "Wrong123").unwrap().is_none());
        let logged_in = store.authenticate("ANA@example.com", GOOD).unwrap().unwrap();
        assert!(logged_in.last_login_at.is_some());
        let stored = store.get_user_by_email("ana@example.com").unwrap().unwrap();
        assert_eq!(stored.last_login_at, logged_in.last_login_at);

        let session = store.create_session(&user.id).unwrap();
        assert_eq!(session.token.len(), 32);
        let me = store.user_from_token(&session.token).unwrap().unwrap();
        assert_eq!(me.id, user.id);

        store.revoke_session(&session.token).unwrap();
        assert!(store.user_from_token(&session.token).unwrap().is_none());
    }

    #[test]
    fn expired_sessions_are_rejected_and_purged() {
        let (_dir, store) = store(Duration::from_secs(0));
        let user = store.create_user("a@x.io", GOOD).unwrap();
        let session = store.create_session(&user.id).unwrap();
        assert!(store.user_from_token(&session.token).unwrap().is_none());
        assert_eq!(store.purge_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn default_admin_respects_existing_users() {
        let (_dir, store) = store(Duration::from_secs(60));
        assert!(store.ensure_default_admin(None, Some(GOOD), false).unwrap().is_none());
        assert!(store
            .ensure_default_admin(Some("admin@x.io"), Some(GOOD), false)
            .unwrap()
            .is_some());
        assert!(store
            .ensure_default_admin(Some("other@x.io"), Some(GOOD), false)
            .unwrap()
            .is_none());
        assert!(store
            .ensure_default_admin(Some("other@x.io"), Some(GOOD), true)
            .unwrap()
            .is_some());
        assert!(store
            .ensure_default_admin(Some("ADMIN@x.io"), Some(GOOD), true)
            .unwrap()
            .is_none());
    }
}
