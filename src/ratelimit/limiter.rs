//! Core rate limiter implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::client::{identify, ClientKey, RequestInfo};
use super::counter::SlidingWindowCounter;
use super::counter::{Decision, WindowLimit};
use super::registry::LimiterRegistry;
use super::sweeper::EvictionSweeper;

/// Paths exempt from admission control by default.
pub const DEFAULT_BYPASS_PATHS: [&str; 3] = ["/healthz", "/livez", "/readyz"];

/// Per-client sliding window admission control.
///
/// This struct is thread-safe and can be shared across request handlers.
/// Eviction of idle clients is driven separately by an [`EvictionSweeper`],
/// see [`spawn_sweeper`](Self::spawn_sweeper).
pub struct RateLimiter {
    registry: Arc<LimiterRegistry>,
    bypass_paths: HashSet<String>,
}

impl RateLimiter {
    /// Create a rate limiter with the default health-check bypass paths.
    pub fn new(limit: WindowLimit) -> Self {
        Self::with_bypass_paths(limit, DEFAULT_BYPASS_PATHS)
    }

    /// Create a rate limiter exempting exactly the given paths.
    pub fn with_bypass_paths<I, S>(limit: WindowLimit, bypass_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry: Arc::new(LimiterRegistry::new(limit)),
            bypass_paths: bypass_paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Start the background sweep, waking once per window.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(&self) -> EvictionSweeper {
        EvictionSweeper::spawn(Arc::clone(&self.registry), self.limit().window())
    }

    /// Get the limit applied to every client.
    pub fn limit(&self) -> WindowLimit {
        self.registry.limit()
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Whether requests to `path` skip admission control.
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths.contains(path)
    }

    /// Run admission control for an inbound request at the current instant.
    ///
    /// The clock is read under the client's lock, so concurrent requests from
    /// one client are recorded in the order they are decided.
    pub fn admit<R: RequestInfo + ?Sized>(&self, request: &R) -> Decision {
        match self.client_of(request) {
            Some(client) => self.check_now(&client),
            None => Decision::Allowed,
        }
    }

    /// Run admission control for an inbound request arriving at `now`.
    pub fn admit_at<R: RequestInfo + ?Sized>(&self, request: &R, now: Instant) -> Decision {
        match self.client_of(request) {
            Some(client) => self.check(&client, now),
            None => Decision::Allowed,
        }
    }

    /// Check and record a request for an already identified client.
    pub fn check(&self, client: &str, now: Instant) -> Decision {
        self.check_with(client, |counter| counter.try_admit_live(now))
    }

    /// Check and record a request for an identified client at the current instant.
    pub fn check_now(&self, client: &str) -> Decision {
        self.check_with(client, SlidingWindowCounter::try_admit_live_now)
    }

    /// Client key for `request`, or `None` if its path is exempt.
    fn client_of<R: RequestInfo + ?Sized>(&self, request: &R) -> Option<ClientKey> {
        let path = request.path();
        if self.is_bypassed(path) {
            trace!(path = %path, "Bypassing admission control");
            return None;
        }
        Some(identify(request))
    }

    fn check_with<F>(&self, client: &str, admit: F) -> Decision
    where
        F: Fn(&SlidingWindowCounter) -> Option<Decision>,
    {
        trace!(client = %client, "Checking rate limit");

        let decision = loop {
            let counter = self.registry.get_or_create(client);
            // A retired counter was evicted between lookup and lock; a fresh
            // one replaces it on the next lookup.
            if let Some(decision) = admit(counter.as_ref()) {
                break decision;
            }
        };

        if let Decision::Denied { retry_after_secs } = decision {
            debug!(
                client = %client,
                retry_after_secs,
                "Rate limit exceeded"
            );
        }

        decision
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("registry", &self.registry)
            .field("bypass_paths", &self.bypass_paths)
            .finish()
    }
}
