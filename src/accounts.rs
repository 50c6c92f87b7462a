//! User accounts: registration, login with lockout, sessions and API keys.

use crate::auth::{self, API_KEY_PREFIX, SESSION_TOKEN_PREFIX};
use crate::config::{AuthConfig, RiskDefaults};
use crate::db::{RiskSettings, User, UserRole};
use crate::error::{ApiError, FieldError};
use crate::models::{ApiKeyResponse, RegisterRequest, UpdateProfileRequest};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Consecutive failures that lock an account.
pub const MAX_FAILED_ATTEMPTS: i32 = 5;

/// How long a locked account stays locked.
pub const LOCKOUT_MINUTES: i64 = 30;

/// Validates a username: 3-32 ASCII letters, digits or underscores.
pub fn validate_username(username: &str) -> Result<(), FieldError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(FieldError::new("username", "must be 3-32 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(FieldError::new(
            "username",
            "may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}

/// Validates an email: one `@`, non-empty local part, dotted domain.
pub fn validate_email(email: &str) -> Result<(), FieldError> {
    let invalid = || FieldError::new("email", "must be a valid email address");
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') || email.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let Some((name, tld)) = domain.rsplit_once('.') else {
        return Err(invalid());
    };
    if name.is_empty() || tld.is_empty() {
        return Err(invalid());
    }
    Ok(())
}

/// Validates a password: at least 8 characters.
pub fn validate_password(password: &str) -> Result<(), FieldError> {
    if password.chars().count() < 8 {
        return Err(FieldError::new("password", "must be at least 8 characters"));
    }
    Ok(())
}

/// Normalizes a phone number: strips a leading `+`, spaces and dashes and
/// requires 10-15 digits.
pub fn normalize_phone(phone: &str) -> Result<String, FieldError> {
    let trimmed = phone.trim();
    let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = without_plus
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(FieldError::new("phone", "must contain only digits"));
    }
    if !(10..=15).contains(&digits.len()) {
        return Err(FieldError::new("phone", "must have 10-15 digits"));
    }
    Ok(if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    })
}

fn validate_registration(request: &RegisterRequest) -> Result<Option<String>, ApiError> {
    let mut errors = Vec::new();
    if let Err(e) = validate_username(&request.username) {
        errors.push(e);
    }
    if let Err(e) = validate_email(&request.email) {
        errors.push(e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.push(e);
    }
    let phone = match request.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(raw) => match normalize_phone(raw) {
            Ok(phone) => Some(phone),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        None => None,
    };

    if errors.is_empty() {
        Ok(phone)
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Returns true when the account is locked at `now`.
#[must_use]
pub fn is_locked(user: &User, now: DateTime<Utc>) -> bool {
    user.locked_until.is_some_and(|until| until > now)
}

/// Records a failed login. Returns the lock expiry when this failure locks the account.
pub fn register_failure(user: &mut User, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    user.failed_login_attempts += 1;
    user.updated_at = now;
    if user.failed_login_attempts >= MAX_FAILED_ATTEMPTS {
        let until = now + Duration::minutes(LOCKOUT_MINUTES);
        user.locked_until = Some(until);
        user.failed_login_attempts = 0;
        Some(until)
    } else {
        None
    }
}

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    /// Authenticated user.
    pub user: User,
    /// Raw session token.
    pub token: String,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
}

/// Account service.
pub struct AccountService {
    store: Arc<Store>,
    auth: AuthConfig,
    risk_defaults: RiskDefaults,
}

impl AccountService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<Store>, auth: AuthConfig, risk_defaults: RiskDefaults) -> Self {
        Self {
            store,
            auth,
            risk_defaults,
        }
    }

    /// Gets a user.
    ///
    /// # Errors
    /// Returns `UserNotFound` when the id is unknown.
    pub fn get(&self, user_id: Uuid) -> Result<User, ApiError> {
        self.store
            .user(user_id)
            .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))
    }

    /// Registers a user together with default risk settings.
    ///
    /// # Errors
    /// Returns `Validation` for malformed fields and `Conflict` when the
    /// username or email is taken.
    pub async fn register(&self, request: RegisterRequest) -> Result<User, ApiError> {
        let phone = validate_registration(&request)?;

        let email = request.email.trim().to_lowercase();
        if self
            .store
            .find_user(|u| u.username == request.username)
            .is_some()
        {
            return Err(ApiError::Conflict(format!(
                "username '{}' is already taken",
                request.username
            )));
        }
        if self.store.find_user(|u| u.email == email).is_some() {
            return Err(ApiError::Conflict(format!(
                "email '{email}' is already registered"
            )));
        }

        let now = Utc::now();
        let defaults = &self.risk_defaults;
        let user = User {
            id: Uuid::new_v4(),
            username: request.username,
            email,
            hashed_password: auth::hash_password(&request.password),
            phone,
            role: request.role.unwrap_or(UserRole::Trader),
            is_active: true,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            session_token_hash: None,
            session_expires_at: None,
            api_key_hash: None,
            api_key_expires_at: None,
            max_daily_loss: decimal(defaults.max_daily_loss),
            max_position_size: decimal(defaults.max_position_size),
            created_at: now,
            updated_at: now,
        };
        self.store.save_user(user.clone()).await?;

        let settings = RiskSettings {
            user_id: user.id,
            max_position_size: decimal(defaults.max_position_size),
            max_order_value: decimal(defaults.max_order_value),
            max_daily_loss: decimal(defaults.max_daily_loss),
            max_open_positions: defaults.max_open_positions,
            max_drawdown_pct: decimal(defaults.max_drawdown_pct),
            stop_loss_pct: decimal(defaults.stop_loss_pct),
            trading_enabled: true,
            updated_at: now,
        };
        self.store.save_risk_settings(settings).await?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Logs a user in and issues a session token.
    ///
    /// # Errors
    /// Returns `AccountLocked` while locked (including on the failure that
    /// triggers the lock) and `Unauthorized` for bad credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        self.login_at(username, password, Utc::now()).await
    }

    async fn login_at(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, ApiError> {
        let Some(mut user) = self.store.find_user(|u| u.username == username) else {
            return Err(ApiError::Unauthorized("invalid username or password".to_string()));
        };

        if let Some(until) = user.locked_until.filter(|until| *until > now) {
            return Err(ApiError::AccountLocked(until));
        }
        if !user.is_active {
            return Err(ApiError::Forbidden("account is disabled".to_string()));
        }

        if !auth::verify_password(password, &user.hashed_password) {
            let locked = register_failure(&mut user, now);
            let attempts = user.failed_login_attempts;
            self.store.save_user(user).await?;
            return match locked {
                Some(until) => {
                    warn!(username, "Account locked after repeated login failures");
                    Err(ApiError::AccountLocked(until))
                }
                None => {
                    warn!(username, attempts, "Failed login attempt");
                    Err(ApiError::Unauthorized("invalid username or password".to_string()))
                }
            };
        }

        let token = auth::generate_token(SESSION_TOKEN_PREFIX);
        let expires_at = now + Duration::seconds(self.auth.session_ttl_secs);
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.session_token_hash = Some(auth::hash_secret(&token));
        user.session_expires_at = Some(expires_at);
        user.updated_at = now;
        self.store.save_user(user.clone()).await?;

        info!(user_id = %user.id, "User logged in");
        Ok(Session {
            user,
            token,
            expires_at,
        })
    }

    /// Clears the user's session.
    ///
    /// # Errors
    /// Returns `UserNotFound` when the id is unknown.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), ApiError> {
        let mut user = self.get(user_id)?;
        user.session_token_hash = None;
        user.session_expires_at = None;
        user.updated_at = Utc::now();
        self.store.save_user(user).await
    }

    /// Issues a new API key, replacing any previous one.
    ///
    /// # Errors
    /// Returns `UserNotFound` when the id is unknown.
    pub async fn generate_api_key(&self, user_id: Uuid) -> Result<ApiKeyResponse, ApiError> {
        let mut user = self.get(user_id)?;
        let api_key = auth::generate_token(API_KEY_PREFIX);
        let now = Utc::now();
        let expires_at = now + Duration::days(self.auth.api_key_ttl_days);
        user.api_key_hash = Some(auth::hash_secret(&api_key));
        user.api_key_expires_at = Some(expires_at);
        user.updated_at = now;
        self.store.save_user(user).await?;

        info!(user_id = %user_id, "API key generated");
        Ok(ApiKeyResponse {
            api_key,
            expires_at,
        })
    }

    /// Resolves a user from a session token.
    ///
    /// # Errors
    /// Returns `Unauthorized` for unknown or expired tokens.
    pub fn authenticate_session(&self, token: &str) -> Result<User, ApiError> {
        let hash = auth::hash_secret(token);
        let now = Utc::now();
        self.store
            .user_by_session_hash(&hash)
            .filter(|u| u.is_active && u.session_expires_at.is_some_and(|exp| exp > now))
            .ok_or_else(|| ApiError::Unauthorized("invalid or expired session".to_string()))
    }

    /// Resolves a user from an API key.
    ///
    /// # Errors
    /// Returns `Unauthorized` for unknown or expired keys.
    pub fn authenticate_api_key(&self, key: &str) -> Result<User, ApiError> {
        let hash = auth::hash_secret(key);
        let now = Utc::now();
        self.store
            .user_by_api_key_hash(&hash)
            .filter(|u| u.is_active && u.api_key_expires_at.is_some_and(|exp| exp > now))
            .ok_or_else(|| ApiError::Unauthorized("invalid or expired API key".to_string()))
    }

    /// Updates profile fields.
    ///
    /// # Errors
    /// Returns `Validation` for malformed fields and `Conflict` for a taken email.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        request: UpdateProfileRequest,
    ) -> Result<User, ApiError> {
        let mut user = self.get(user_id)?;
        let mut errors = Vec::new();

        if let Some(email) = request.email {
            let email = email.trim().to_lowercase();
            match validate_email(&email) {
                Ok(()) => {
                    if self
                        .store
                        .find_user(|u| u.email == email && u.id != user_id)
                        .is_some()
                    {
                        return Err(ApiError::Conflict(format!(
                            "email '{email}' is already registered"
                        )));
                    }
                    user.email = email;
                }
                Err(e) => errors.push(e),
            }
        }
        if let Some(phone) = request.phone {
            if phone.trim().is_empty() {
                user.phone = None;
            } else {
                match normalize_phone(&phone) {
                    Ok(phone) => user.phone = Some(phone),
                    Err(e) => errors.push(e),
                }
            }
        }
        if let Some(loss) = request.max_daily_loss {
            if loss.is_sign_negative() {
                errors.push(FieldError::new("max_daily_loss", "must not be negative"));
            }
            user.max_daily_loss = loss;
        }
        if let Some(size) = request.max_position_size {
            if size.is_sign_negative() {
                errors.push(FieldError::new("max_position_size", "must not be negative"));
            }
            user.max_position_size = size;
        }

        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        user.updated_at = Utc::now();
        self.store.save_user(user.clone()).await?;
        Ok(user)
    }

    /// Clears a lock and the failure counter.
    ///
    /// # Errors
    /// Returns `UserNotFound` when the id is unknown.
    pub async fn unlock(&self, user_id: Uuid) -> Result<User, ApiError> {
        let mut user = self.get(user_id)?;
        user.locked_until = None;
        user.failed_login_attempts = 0;
        user.updated_at = Utc::now();
        self.store.save_user(user.clone()).await?;
        info!(user_id = %user_id, "Account unlocked");
        Ok(user)
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}
