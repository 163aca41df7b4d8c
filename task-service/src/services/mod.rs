//! Services layer for task-service.
//!
//! Business logic for credential checks, OTP step-up, token lifecycle,
//! tenant resolution, and the export hand-off.

mod credentials;
pub mod error;
mod export;
mod jwt;
mod notifier;
mod otp;
mod tenant;
mod token;

pub use credentials::CredentialService;
pub use error::ServiceError;
pub use export::ExportService;
pub use jwt::{AccessTokenClaims, JwtService, TokenResponse};
pub use notifier::{LogNotifier, MockNotifier, Notifier, SmtpNotifier};
pub use otp::OtpService;
pub use tenant::{OrgContext, TenantService, subdomain_from_host};
pub use token::{LoginGrant, TokenService};
