//! Per-client request limiting at the edge.
//!
//! Every client IP gets a bucket of `max_requests` that refills evenly over
//! the configured window. A request that finds its bucket empty is answered
//! with 429 and a `Retry-After` header and never reaches a route.

use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::{debug, warn};

use crate::error::AppError;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Requests a single client may make per window by default.
pub fn default_max_requests() -> NonZeroU32 {
    NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiting middleware. Clones share the same buckets, so one instance
/// built outside the `HttpServer` factory limits across all workers.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    clock: DefaultClock,
}

impl RateLimit {
    pub fn new(max_requests: NonZeroU32, window: Duration) -> Self {
        let quota = Quota::with_period(window / max_requests.get())
            .unwrap_or_else(|| Quota::per_second(max_requests))
            .allow_burst(max_requests);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// Takes one request from `client`'s bucket, or reports how long until
    /// the next one is allowed.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        self.limiter
            .check_key(&client)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Drops buckets that have refilled completely.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service,
            limit: self.clone(),
        }))
    }
}

pub struct RateLimitService<S> {
    service: S,
    limit: RateLimit,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client = match req.peer_addr() {
            Some(addr) => addr.ip(),
            None => {
                debug!("No peer address for {}, using the shared bucket", req.path());
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        };

        match self.limit.check(client) {
            Ok(()) => Box::pin(self.service.call(req)),
            Err(retry_after) => {
                warn!("Rate limit exceeded by {} on {}", client, req.path());
                Box::pin(async move { Err(AppError::TooManyRequests { retry_after }.into()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_per_client() {
        let limit = RateLimit::new(NonZeroU32::new(2).unwrap(), Duration::from_secs(60));
        let alice: IpAddr = "10.0.0.1".parse().unwrap();
        let bob: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limit.check(alice).is_ok());
        assert!(limit.check(alice).is_ok());
        let retry_after = limit.check(alice).unwrap_err();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(30));

        assert!(limit.check(bob).is_ok());
        assert_eq!(limit.tracked_clients(), 2);
    }

    #[test]
    fn test_default_quota() {
        assert_eq!(default_max_requests().get(), 100);
        let limit = RateLimit::new(default_max_requests(), DEFAULT_WINDOW);
        let client: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..100 {
            assert!(limit.check(client).is_ok());
        }
        assert!(limit.check(client).is_err());
    }
}
