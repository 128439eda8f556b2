//! Account manager implementation.

use super::{
    errors::{AccountError, AccountResult},
    models::{AccessTokenClaims, Account, LoginRequest, NewAccount, RegisterRequest, Role, UserId},
};
use crate::db::AccountRepository;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::sync::Arc;

/// Account manager
#[derive(Clone)]
pub struct AccountManager {
    repo: Arc<dyn AccountRepository>,
    pepper: String,
    jwt_secret: String,
    access_token_duration: Duration,
}

impl AccountManager {
    /// Create a new account manager
    ///
    /// # Arguments
    ///
    /// * `repo` - Account repository
    /// * `pepper` - Server-side pepper for password hashing
    /// * `jwt_secret` - Secret key for JWT signing
    pub fn new(repo: Arc<dyn AccountRepository>, pepper: String, jwt_secret: String) -> Self {
        Self {
            repo,
            pepper,
            jwt_secret,
            access_token_duration: Duration::hours(12),
        }
    }

    /// Register a new account
    ///
    /// The account and its empty wallet are created in one commit.
    ///
    /// # Errors
    ///
    /// * `AccountError::EmailTaken` - Email already registered
    /// * `AccountError::Validation` - Email or display name malformed, unknown referrer
    /// * `AccountError::WeakPassword` - Password too weak
    /// * `AccountError::PermissionDenied` - Admin role requested
    pub async fn register(&self, request: RegisterRequest) -> AccountResult<Account> {
        if request.role == Role::Admin {
            return Err(AccountError::PermissionDenied(
                "admin accounts cannot self-register".to_string(),
            ));
        }
        self.create(request).await
    }

    /// Create an admin account (bootstrap and operator tooling only)
    pub async fn create_admin(
        &self,
        email: String,
        password: String,
        display_name: String,
    ) -> AccountResult<Account> {
        self.create(RegisterRequest {
            email,
            password,
            display_name,
            role: Role::Admin,
            referral_code: None,
        })
        .await
    }

    async fn create(&self, request: RegisterRequest) -> AccountResult<Account> {
        let email = request.email.trim().to_lowercase();
        validate_email(&email)?;
        validate_display_name(&request.display_name)?;
        validate_password(&request.password)?;

        if let Some(referrer) = request.referral_code
            && self.repo.find_by_id(referrer).await?.is_none()
        {
            return Err(AccountError::Validation(format!(
                "unknown referral code {referrer}"
            )));
        }

        let password_hash = self.hash_password(&request.password)?;
        let account = self
            .repo
            .insert_account(&NewAccount {
                email,
                display_name: request.display_name.trim().to_string(),
                role: request.role,
                password_hash,
                referred_by: request.referral_code,
            })
            .await?;

        tracing::info!(user_id = account.id, role = %account.role, "Account registered");
        Ok(account)
    }

    /// Log in with email and password, returning the account and an access token
    pub async fn login(&self, request: LoginRequest) -> AccountResult<(Account, String)> {
        let email = request.email.trim().to_lowercase();
        let (account, password_hash) = self
            .repo
            .find_credentials(&email)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        self.verify_password(&request.password, &password_hash)?;
        let token = self.generate_access_token(&account)?;
        Ok((account, token))
    }

    /// Verify an access token
    pub fn verify_access_token(&self, token: &str) -> AccountResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }

    /// Find an account
    pub async fn find(&self, user_id: UserId) -> AccountResult<Option<Account>> {
        self.repo.find_by_id(user_id).await
    }

    /// Fetch an account that must exist
    pub async fn get(&self, user_id: UserId) -> AccountResult<Account> {
        self.repo
            .find_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound(user_id))
    }

    /// Link a student account to a parent, who then pays for its classes
    pub async fn link_child(
        &self,
        parent_id: UserId,
        student_id: UserId,
    ) -> AccountResult<Account> {
        let parent = self.get(parent_id).await?;
        if parent.role != Role::Parent {
            return Err(AccountError::PermissionDenied(
                "only parents can link children".to_string(),
            ));
        }

        let student = self.get(student_id).await?;
        if student.role != Role::Student {
            return Err(AccountError::Validation(format!(
                "account {student_id} is not a student"
            )));
        }
        if student.parent_id.is_some_and(|p| p != parent_id) {
            return Err(AccountError::PermissionDenied(
                "student is already linked to another parent".to_string(),
            ));
        }

        self.repo.set_parent(student_id, parent_id).await?;
        tracing::info!(parent_id, student_id, "Student linked to parent");
        self.get(student_id).await
    }

    /// Record the connect account a tutor is paid out to
    pub async fn set_connect_account(
        &self,
        tutor_id: UserId,
        connect_account_id: String,
    ) -> AccountResult<Account> {
        let tutor = self.get(tutor_id).await?;
        if tutor.role != Role::Tutor {
            return Err(AccountError::PermissionDenied(
                "only tutors have payout accounts".to_string(),
            ));
        }
        let connect_account_id = connect_account_id.trim().to_string();
        if connect_account_id.is_empty() {
            return Err(AccountError::Validation(
                "connect account id must not be empty".to_string(),
            ));
        }

        self.repo
            .set_connect_account(tutor_id, &connect_account_id)
            .await?;
        self.get(tutor_id).await
    }

    /// Delete an account; classroom history keeps the row with a null reference
    pub async fn delete_account(&self, user_id: UserId) -> AccountResult<()> {
        self.get(user_id).await?;
        self.repo.delete_account(user_id).await?;
        tracing::info!(user_id, "Account deleted");
        Ok(())
    }

    /// Hash password with Argon2id + pepper
    fn hash_password(&self, password: &str) -> AccountResult<String> {
        let peppered = format!("{}{}", password, self.pepper);
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        Ok(argon2
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|_| AccountError::HashingFailed)?
            .to_string())
    }

    /// Verify password against hash
    fn verify_password(&self, password: &str, hash: &str) -> AccountResult<()> {
        let peppered = format!("{}{}", password, self.pepper);
        let parsed_hash =
            PasswordHash::new(hash).map_err(|_| AccountError::InvalidCredentials)?;

        Argon2::default()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .map_err(|_| AccountError::InvalidCredentials)
    }

    /// Generate JWT access token
    fn generate_access_token(&self, account: &Account) -> AccountResult<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: account.id,
            role: account.role,
            exp: (now + self.access_token_duration).timestamp(),
            iat: now.timestamp(),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?)
    }
}

fn validate_email(email: &str) -> AccountResult<()> {
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            })
        && !email.contains(char::is_whitespace);

    if !valid {
        return Err(AccountError::Validation(format!("invalid email: {email}")));
    }
    Ok(())
}

fn validate_display_name(name: &str) -> AccountResult<()> {
    let len = name.trim().chars().count();
    if !(2..=60).contains(&len) {
        return Err(AccountError::Validation(
            "display name must be 2-60 characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate password strength
fn validate_password(password: &str) -> AccountResult<()> {
    if password.len() < 8 {
        return Err(AccountError::WeakPassword(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());

    if !has_digit || !has_uppercase || !has_lowercase {
        return Err(AccountError::WeakPassword(
            "Password must contain at least one number, one uppercase and one lowercase letter"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("ada.example.com").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ada@localhost").is_err());
        assert!(validate_email("a da@example.com").is_err());
    }

    #[test]
    fn test_validate_password_strength() {
        assert!(validate_password("Secure123").is_ok());
        assert!(matches!(
            validate_password("short1A"),
            Err(AccountError::WeakPassword(_))
        ));
        assert!(matches!(
            validate_password("alllowercase1"),
            Err(AccountError::WeakPassword(_))
        ));
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Ada").is_ok());
        assert!(validate_display_name(" A ").is_err());
    }
}
