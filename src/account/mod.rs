/// Account management system
///
/// Tenants, their users, and the confirmation / invitation / password-reset
/// workflows built on top of the OAuth subsystem.

mod manager;
pub mod roles;
mod store;

pub use manager::AccountManager;
pub use store::AccountStore;

use crate::error::IdentityError;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// Self-registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UserRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Profile update request
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
}

/// Invitation request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvitationRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Password reset request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

/// Sets a password: invitation acceptance and password reset confirmation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PasswordRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Run `validator` checks, mapping failures to `ValidationFailed`
pub fn validate_request<T: Validate>(request: &T) -> Result<(), IdentityError> {
    request
        .validate()
        .map_err(|e: ValidationErrors| IdentityError::ValidationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_request_validation() {
        let request = UserRequest {
            email: "test@newuser".to_string(),
            password: "test_password".to_string(),
            role: None,
            first_name: None,
            last_name: None,
        };
        assert!(validate_request(&request).is_ok());

        let bad = UserRequest {
            email: "not an email".to_string(),
            ..request
        };
        assert!(matches!(
            validate_request(&bad),
            Err(IdentityError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_password_request_requires_password() {
        let request = PasswordRequest {
            password: String::new(),
        };
        assert!(validate_request(&request).is_err());
    }
}
