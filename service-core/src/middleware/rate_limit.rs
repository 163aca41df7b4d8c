use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed, keyed::DashMapStateStore},
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

/// Rate limiter for global/unkeyed use
pub type UnkeyedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Rate limiter keyed by IP address
pub type IpRateLimiter = Arc<RateLimiter<SocketAddr, DashMapStateStore<SocketAddr>, DefaultClock>>;

/// Rate limiter keyed by an arbitrary string (e.g. `email|source`), used for
/// sliding-window credential attempt counting.
pub type AttemptRateLimiter = Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>;

fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let attempts = attempts.max(1);
    let period = Duration::from_millis((window_seconds * 1000) / u64::from(attempts));
    Quota::with_period(period)
        .expect("Failed to create quota with valid period")
        .allow_burst(NonZeroU32::new(attempts).expect("attempts is guaranteed to be non-zero"))
}

/// Create an unkeyed rate limiter
pub fn create_unkeyed_rate_limiter(attempts: u32, window_seconds: u64) -> UnkeyedRateLimiter {
    Arc::new(RateLimiter::direct(quota(attempts, window_seconds)))
}

/// Create a keyed rate limiter (by IP)
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Create a string-keyed attempt limiter
pub fn create_attempt_rate_limiter(attempts: u32, window_seconds: u64) -> AttemptRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Check a keyed attempt limiter, returning the suggested wait in seconds on denial.
pub fn check_attempt(limiter: &AttemptRateLimiter, key: &str) -> Result<(), u64> {
    limiter.check_key(&key.to_string()).map_err(|negative| {
        negative
            .wait_time_from(DefaultClock::default().now())
            .as_secs()
    })
}

/// Middleware for unkeyed rate limiting
pub async fn rate_limit_middleware(
    State(limiter): State<UnkeyedRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(negative) => {
            let wait_time = negative.wait_time_from(DefaultClock::default().now());
            Err(AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(wait_time.as_secs()),
            ))
        }
    }
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let forwarded_ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok());

    let addr = if let Some(ip) = forwarded_ip {
        Some(SocketAddr::new(ip, 0))
    } else {
        request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|axum::extract::ConnectInfo(addr)| *addr)
    };

    match addr {
        Some(addr) => match limiter.check_key(&addr) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs()),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unkeyed_limiter_allows_within_limit() {
        let limiter = create_unkeyed_rate_limiter(3, 60);

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());

        // 4th request should be rate limited
        assert!(limiter.check().is_err());
    }

    #[test]
    fn attempt_limiter_isolates_keys() {
        let limiter = create_attempt_rate_limiter(2, 300);

        assert!(check_attempt(&limiter, "a@example.com|1.2.3.4").is_ok());
        assert!(check_attempt(&limiter, "a@example.com|1.2.3.4").is_ok());
        assert!(check_attempt(&limiter, "a@example.com|1.2.3.4").is_err());

        // Different key keeps its own window
        assert!(check_attempt(&limiter, "b@example.com|1.2.3.4").is_ok());
    }
}
