use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{hash::Hash, net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

/// Rate limiter keyed by an arbitrary identity (IP, user id, ...)
pub type KeyedRateLimiter<K> = Arc<RateLimiter<K, DashMapStateStore<K>, DefaultClock>>;

/// Rate limiter keyed by IP address
pub type IpRateLimiter = KeyedRateLimiter<SocketAddr>;

fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let attempts = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds.max(1) * 1000) / attempts.get() as u64);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(attempts))
        .allow_burst(attempts)
}

/// Create a keyed rate limiter allowing `attempts` per `window_seconds`.
pub fn create_keyed_rate_limiter<K>(attempts: u32, window_seconds: u64) -> KeyedRateLimiter<K>
where
    K: Hash + Eq + Clone,
{
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Create a keyed rate limiter (by IP)
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    create_keyed_rate_limiter(attempts, window_seconds)
}

/// Check `key` against `limiter`, mapping exhaustion to `429` with a
/// `Retry-After` hint.
pub fn check_key<K>(limiter: &KeyedRateLimiter<K>, key: &K, message: &str) -> Result<(), AppError>
where
    K: Hash + Eq + Clone,
{
    limiter.check_key(key).map_err(|negative| {
        let wait_time = negative.wait_time_from(DefaultClock::default().now());
        AppError::TooManyRequests(message.to_string(), Some(wait_time.as_secs().max(1)))
    })
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
            .map(|axum::extract::ConnectInfo(addr)| SocketAddr::new(addr.ip(), 0))
    };

    match addr {
        Some(addr) => {
            check_key(
                &limiter,
                &addr,
                "Too many requests from this IP. Please try again later.",
            )?;
            Ok(next.run(request).await)
        }
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
    fn test_keyed_limiter_isolates_keys() {
        let limiter = create_keyed_rate_limiter::<u32>(2, 60);

        assert!(check_key(&limiter, &1, "limited").is_ok());
        assert!(check_key(&limiter, &1, "limited").is_ok());
        assert!(matches!(
            check_key(&limiter, &1, "limited"),
            Err(AppError::TooManyRequests(_, Some(_)))
        ));

        assert!(check_key(&limiter, &2, "limited").is_ok());
    }

    #[test]
    fn test_zero_attempts_still_allows_one() {
        let limiter = create_keyed_rate_limiter::<&'static str>(0, 60);
        assert!(check_key(&limiter, &"k", "limited").is_ok());
        assert!(check_key(&limiter, &"k", "limited").is_err());
    }
}
