use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::{NewUser, StoreError};
use parley_types::User;

use crate::error::SessionError;
use crate::menu;
use crate::session::Session;

/// Lowercase and trim an email as typed.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Shape check only: one `@`, a non-empty local part, and a dotted domain
/// whose last label is at least two letters.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return false;
    }
    labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordProblem {
    TooShort(usize),
    Mismatch,
}

impl PasswordProblem {
    pub fn message(self) -> String {
        match self {
            Self::TooShort(min) => menu::password_too_short(min),
            Self::Mismatch => menu::PASSWORD_MISMATCH.to_string(),
        }
    }
}

pub fn check_new_password(
    password: &str,
    confirm: &str,
    min_len: usize,
) -> Result<(), PasswordProblem> {
    if password.chars().count() < min_len {
        return Err(PasswordProblem::TooShort(min_len));
    }
    if password != confirm {
        return Err(PasswordProblem::Mismatch);
    }
    Ok(())
}

/// Hash with Argon2id on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, SessionError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| SessionError::Hashing(e.to_string()))
    })
    .await?
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, SessionError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| SessionError::Hashing(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Email prompt, then login for known emails or registration for new
    /// ones. `None` means registration was refused and the caller should
    /// start over.
    pub(crate) async fn authenticate(&mut self) -> Result<Option<User>, SessionError> {
        let email = self.read_email().await?;

        let lookup = email.clone();
        match self.store.call(move |db| db.get_user_by_email(&lookup)).await {
            Ok(user) => self.login(user).await.map(Some),
            Err(StoreError::NotFound) => self.register(email).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn read_email(&mut self) -> Result<String, SessionError> {
        for attempt in 1..=self.settings.max_attempts {
            let email = normalize_email(&self.channel.prompt(menu::EMAIL_PROMPT).await?);
            if is_valid_email(&email) {
                return Ok(email);
            }
            debug!("Rejected email input (attempt {}/{})", attempt, self.settings.max_attempts);
            self.channel.send(menu::INVALID_EMAIL).await?;
        }

        self.channel.send(menu::TOO_MANY_ATTEMPTS).await?;
        Err(SessionError::AttemptsExhausted("reading email failed"))
    }

    async fn login(&mut self, user: User) -> Result<User, SessionError> {
        for attempt in 1..=self.settings.max_attempts {
            let password = self.channel.prompt(menu::PASSWORD_PROMPT).await?;
            if password.is_empty() {
                self.channel.send(menu::EMPTY_INPUT).await?;
                continue;
            }
            if verify_password(password, user.password_hash.clone()).await? {
                return self.complete_login(user.id).await;
            }
            let max = self.settings.max_attempts;
            warn!("Wrong password for {} (attempt {}/{})", user.email, attempt, max);
            self.channel.send(menu::WRONG_PASSWORD).await?;
        }

        self.channel.send(menu::READING_PASSWORD_FAILED).await?;
        Err(SessionError::AttemptsExhausted("reading password failed"))
    }

    async fn register(&mut self, email: String) -> Result<Option<User>, SessionError> {
        self.channel.send(&menu::new_account(&email)).await?;

        let first_name = self.channel.prompt_required(menu::FIRST_NAME_PROMPT).await?;
        let last_name = self.channel.prompt_required(menu::LAST_NAME_PROMPT).await?;
        let password = self.channel.prompt_required(menu::PASSWORD_PROMPT).await?;
        let confirm = self.channel.prompt_required(menu::CONFIRM_PASSWORD_PROMPT).await?;

        let min_len = self.settings.min_password_len;
        if let Err(problem) = check_new_password(&password, &confirm, min_len) {
            debug!("Registration for {} refused: {:?}", email, problem);
            self.channel.send(&problem.message()).await?;
            return Ok(None);
        }

        let new_user = NewUser {
            first_name,
            last_name,
            email,
            password_hash: hash_password(password).await?,
        };

        match self.store.call(move |db| db.create_user(&new_user)).await {
            Ok(user) => self.complete_login(user.id).await.map(Some),
            Err(StoreError::DuplicateEmail(email)) => {
                info!("Registration for {} refused: user exists", email);
                self.channel.send(menu::USER_EXISTS).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_login(&mut self, id: Uuid) -> Result<User, SessionError> {
        let now = Utc::now();
        let user = self.store.call(move |db| db.record_login(id, now)).await?;
        info!("{} ({}) logged in", user.email, user.id);
        self.channel.send(&menu::welcome(&user)).await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        for email in ["a@x.com", "first.last@mail.example.org", "x+tag@y.io"] {
            assert!(is_valid_email(email), "{email}");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        let bad = [
            "", "ax.com", "a@x", "@x.com", "a@x.", "a@.com", "a b@x.com", "a@@x.com", "a@x.c0m",
            "a@x.c",
        ];
        for email in bad {
            assert!(!is_valid_email(email), "{email}");
        }
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn new_password_rules() {
        assert_eq!(check_new_password("secret1", "secret1", 6), Ok(()));
        assert_eq!(
            check_new_password("abc", "abc", 6),
            Err(PasswordProblem::TooShort(6))
        );
        assert_eq!(
            check_new_password("secret1", "secret2", 6),
            Err(PasswordProblem::Mismatch)
        );
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hash = hash_password("secret1".into()).await.unwrap();
        assert!(verify_password("secret1".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("secret2".into(), hash).await.unwrap());
    }
}
