//! Fixed-window request limiter for the tenant API, driven by
//! RATE_LIMIT_PER_MIN. Windows are per source address (X-Forwarded-For when
//! present) and reset each minute.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::state::AppState;

#[derive(Clone)]
pub struct RateLimiter {
    max_per_min: u32,
    windows: Arc<Mutex<HashMap<String, (i64, u32)>>>,
}

impl RateLimiter {
    pub fn new(max_per_min: u32) -> Self {
        Self {
            max_per_min,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a hit for `key` in the minute `now_min`; false when over budget.
    pub fn allow(&self, key: &str, now_min: i64) -> bool {
        if self.max_per_min == 0 {
            return true;
        }
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        // Opportunistic cleanup so the map does not grow with dead clients.
        if windows.len() > 10_000 {
            windows.retain(|_, (minute, _)| *minute == now_min);
        }

        let entry = windows.entry(key.to_string()).or_insert((now_min, 0));
        if entry.0 != now_min {
            *entry = (now_min, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_per_min
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string();

    let now_min = Utc::now().timestamp() / 60;
    if !state.rate_limiter.allow(&key, now_min) {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(request).await
}
