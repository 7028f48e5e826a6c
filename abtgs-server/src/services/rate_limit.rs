//! Per-client submission limit
//!
//! Keyed `governor` limiter over client IP addresses. A disabled limiter
//! (quota 0) admits everything.

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Too many submissions from {client}; limit is {per_minute} per minute")]
pub struct RateLimited {
    pub client: IpAddr,
    pub per_minute: u32,
}

#[derive(Clone)]
pub struct SubmissionLimiter {
    limiter: Option<Arc<KeyedLimiter>>,
    per_minute: u32,
}

impl SubmissionLimiter {
    pub fn per_minute(per_minute: u32) -> Self {
        let limiter = NonZeroU32::new(per_minute).map(|n| Arc::new(RateLimiter::keyed(Quota::per_minute(n))));
        Self { limiter, per_minute }
    }

    pub fn disabled() -> Self {
        Self::per_minute(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Take one submission from `client`'s allowance
    pub fn check(&self, client: IpAddr) -> Result<(), RateLimited> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        limiter.check_key(&client).map_err(|_| {
            tracing::warn!(client = %client, per_minute = self.per_minute, "Submission rate limit hit");
            RateLimited {
                client,
                per_minute: self.per_minute,
            }
        })
    }

    /// Forget clients whose allowance has fully recovered
    pub fn shrink(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
        }
    }
}
