//! Per-client rate control for the completion route.
//!
//! Two cooperating disciplines over one fixed window, both keyed by the
//! caller's network identity: a hard request cap and a progressive slow-down
//! for callers approaching it. Counter updates happen in a single write-lock
//! critical section so concurrent requests from one key can never lose an
//! increment and sneak past the cap.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::state::AppState;

pub const WINDOW_SECS: i64 = 15 * 60;
pub const LIMIT: u32 = 20;
pub const DELAY_AFTER: u32 = 10;
pub const DELAY_STEP: Duration = Duration::from_millis(100);

/// Rate-limit sharding key. IPv6 callers are collapsed to their /56 so
/// rotating through a delegated block does not mint fresh keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    V4(Ipv4Addr),
    V6Subnet([u8; 7]),
}

impl ClientKey {
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(v4) => ClientKey::V4(v4),
            IpAddr::V6(v6) => {
                let octets = v6.octets();
                let mut prefix = [0u8; 7];
                prefix.copy_from_slice(&octets[..7]);
                ClientKey::V6Subnet(prefix)
            }
        }
    }
}

/// Mutable per-key window counters. `count` feeds the hard cap, `hits` the
/// slow-down; both reset when the window rolls.
#[derive(Debug, Clone, Copy)]
struct RateWindowState {
    count: u32,
    hits: u32,
    window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Proceed after this much deliberate delay.
    Delay(Duration),
    /// Hard stop until the window rolls.
    Reject { retry_after_secs: u64 },
}

pub struct SlidingControl {
    window: chrono::Duration,
    limit: u32,
    delay_after: u32,
    delay_step: Duration,
    states: RwLock<HashMap<ClientKey, RateWindowState>>,
}

impl Default for SlidingControl {
    fn default() -> Self {
        Self::new(
            chrono::Duration::seconds(WINDOW_SECS),
            LIMIT,
            DELAY_AFTER,
            DELAY_STEP,
        )
    }
}

impl SlidingControl {
    pub fn new(
        window: chrono::Duration,
        limit: u32,
        delay_after: u32,
        delay_step: Duration,
    ) -> Self {
        Self {
            window,
            limit,
            delay_after,
            delay_step,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Record one request for `key` at clock `now` and decide its fate.
    ///
    /// Roll, increment, and decide happen under one write lock. Rejected
    /// requests do not advance the slow-down counter; only admitted traffic
    /// accumulates delay.
    pub async fn check(&self, key: ClientKey, now: DateTime<Utc>) -> Decision {
        let mut states = self.states.write().await;
        let state = states.entry(key).or_insert(RateWindowState {
            count: 0,
            hits: 0,
            window_start: now,
        });

        if now >= state.window_start + self.window {
            state.count = 0;
            state.hits = 0;
            state.window_start = now;
        }

        state.count += 1;
        if state.count > self.limit {
            let remaining_ms = (state.window_start + self.window - now).num_milliseconds();
            return Decision::Reject {
                retry_after_secs: ((remaining_ms + 999) / 1000).max(1) as u64,
            };
        }

        state.hits += 1;
        if state.hits > self.delay_after {
            Decision::Delay(self.delay_step * (state.hits - self.delay_after))
        } else {
            Decision::Allow
        }
    }

    /// Drop every key whose window has fully elapsed. Run periodically so
    /// one-off callers do not accumulate in memory forever.
    pub async fn prune(&self, now: DateTime<Utc>) {
        self.states
            .write()
            .await
            .retain(|_, state| now < state.window_start + self.window);
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.states.read().await.len()
    }
}

/// Middleware stage: resolve the caller's identity, consult the control, and
/// either forward (possibly after a deliberate sleep) or reject with 429.
pub async fn throttle(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let Some(ip) = client_ip(req.headers(), peer, state.config.trust_proxy) else {
        tracing::error!("unable to determine client identity for rate limiting");
        return AppError::Misconfigured("client address").into_response();
    };

    match state.throttle.check(ClientKey::from_ip(ip), Utc::now()).await {
        Decision::Allow => next.run(req).await,
        Decision::Delay(wait) => {
            tracing::debug!(client = %ip, wait_ms = wait.as_millis() as u64, "slowing down busy client");
            tokio::time::sleep(wait).await;
            next.run(req).await
        }
        Decision::Reject { retry_after_secs } => {
            tracing::warn!(client = %ip, retry_after_secs, "request cap exceeded");
            AppError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

/// The client identity is the first `X-Forwarded-For` entry when the deploy
/// trusts its proxy, otherwise the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer
}
