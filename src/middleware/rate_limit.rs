use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use log::warn;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Past this many tracked callers, idle entries are swept on the next hit.
const SWEEP_THRESHOLD: usize = 10_000;

/// Sliding-window request counter keyed by caller. A limit of 0 disables it.
#[derive(Clone)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Arc::new(DashMap::new()),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Records a hit for `key`. Returns false, without recording, when the
    /// window is already full.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        if self.hits.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }

        let mut hits = self.hits.entry(key.to_owned()).or_default();
        while let Some(&oldest) = hits.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            hits.pop_front();
        }
        if hits.len() >= self.limit {
            return false;
        }
        hits.push_back(now);
        true
    }

    fn sweep(&self, now: Instant) {
        let window = self.window;
        self.hits
            .retain(|_, hits| hits.back().is_some_and(|last| now.duration_since(*last) < window));
    }
}

/// Global per-client limit. Clients are told apart by peer address when the
/// server was started with connect info.
pub async fn limit_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned());

    if !state.request_limiter.check(&client) {
        warn!("Request rate limit hit for client: {client}");
        return AppError::RateLimited.into_response();
    }
    next.run(request).await
}

/// Per-user limit on reply streams. Runs after `require_auth`.
pub async fn limit_streams(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(AuthUser(user_id)) = request.extensions().get::<AuthUser>().copied() else {
        return AppError::Unauthorized.into_response();
    };

    if !state.stream_limiter.check(&user_id.to_string()) {
        warn!("Stream rate limit hit for user: {user_id}");
        return AppError::RateLimited.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_fills_then_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("a", start));
        assert!(limiter.check_at("a", start + Duration::from_secs(1)));
        assert!(!limiter.check_at("a", start + Duration::from_secs(2)));
        // other callers have their own window
        assert!(limiter.check_at("b", start + Duration::from_secs(2)));

        assert!(limiter.check_at("a", start + Duration::from_secs(60)));
        assert!(!limiter.check_at("a", start + Duration::from_secs(60)));
    }

    #[test]
    fn zero_limit_disables() {
        let limiter = RateLimiter::per_minute(0);
        let now = Instant::now();
        assert!((0..1000).all(|_| limiter.check_at("a", now)));
    }

    #[test]
    fn sweep_drops_idle_callers() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();
        limiter.check_at("idle", start);
        limiter.check_at("busy", start + Duration::from_secs(8));

        limiter.sweep(start + Duration::from_secs(12));

        assert!(!limiter.hits.contains_key("idle"));
        assert!(limiter.hits.contains_key("busy"));
    }
}
