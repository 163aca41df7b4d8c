use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "Organization name is required"))]
    pub organization_name: String,

    #[validate(length(min = 2, message = "Subdomain must be at least 2 characters"))]
    pub subdomain: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Login and registration never return tokens; they return the step-up
/// challenge to complete.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub otp_required: bool,
    pub challenge_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    /// Either the challenge id from the login response or the account email.
    pub challenge_id: Option<Uuid>,
    pub email: Option<String>,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}
