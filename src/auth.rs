//! Identity errors and the registration form rules.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

static EMAIL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S+@\S+\.\S+").expect("valid email pattern"));

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_DISPLAY_NAME_LEN: usize = 2;

/// Machine-readable identity error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum AuthErrorCode {
    #[strum(serialize = "auth/invalid-email")]
    InvalidEmail,
    #[strum(serialize = "auth/weak-password")]
    WeakPassword,
    #[strum(serialize = "auth/invalid-display-name")]
    InvalidDisplayName,
    #[strum(serialize = "auth/email-already-in-use")]
    EmailAlreadyInUse,
    #[strum(serialize = "auth/invalid-credential")]
    InvalidCredential,
    #[strum(serialize = "auth/internal-error")]
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Text shown to the user; known codes get a hint, anything else its raw message.
    pub fn friendly_message(&self) -> String {
        match self.code {
            AuthErrorCode::EmailAlreadyInUse => {
                "This email is already in use. Try signing in or reset your password.".into()
            }
            AuthErrorCode::InvalidCredential => "Incorrect email or password.".into(),
            AuthErrorCode::InvalidEmail => "Please enter a valid email address.".into(),
            AuthErrorCode::WeakPassword => {
                format!("Password must be at least {MIN_PASSWORD_LEN} characters.")
            }
            AuthErrorCode::InvalidDisplayName | AuthErrorCode::Internal => self.message.clone(),
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

/// Checks an email/password pair the way an identity backend would before
/// creating an account.
pub fn check_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if !is_valid_email(email) {
        return Err(AuthError::new(
            AuthErrorCode::InvalidEmail,
            format!("'{email}' is not a valid email address"),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::new(
            AuthErrorCode::WeakPassword,
            "password is too short",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationField {
    DisplayName,
    Email,
    Password,
    ConfirmPassword,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub display_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    /// Per-field messages in form order; empty when the form can be submitted.
    pub fn validate(&self) -> IndexMap<RegistrationField, &'static str> {
        let mut errors = IndexMap::new();

        let name = self.display_name.trim();
        if name.is_empty() {
            errors.insert(RegistrationField::DisplayName, "Display name is required");
        } else if name.chars().count() < MIN_DISPLAY_NAME_LEN {
            errors.insert(
                RegistrationField::DisplayName,
                "Display name must be at least 2 characters",
            );
        }

        if self.email.is_empty() {
            errors.insert(RegistrationField::Email, "Email is required");
        } else if !is_valid_email(&self.email) {
            errors.insert(RegistrationField::Email, "Email is invalid");
        }

        if self.password.is_empty() {
            errors.insert(RegistrationField::Password, "Password is required");
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.insert(
                RegistrationField::Password,
                "Password must be at least 6 characters",
            );
        }

        if self.confirm_password.is_empty() {
            errors.insert(
                RegistrationField::ConfirmPassword,
                "Please confirm your password",
            );
        } else if self.password != self.confirm_password {
            errors.insert(RegistrationField::ConfirmPassword, "Passwords do not match");
        }

        errors
    }
}
