pub mod auth;
pub mod tenant;

pub use auth::{AuthUser, auth_middleware};
pub use tenant::tenant_context_middleware;
