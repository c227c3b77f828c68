//! Per-key rate limiting, one keyed governor limiter per route class.
//!
//! Classes with a zero quota carry no limiter and always admit. Keys are
//! the resolved API key id; unkeyed principals (bootstrap, dev mode)
//! share the `anonymous` bucket.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;

use crate::config::LimitsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Send,
    Status,
    InboundList,
    InboundGet,
    Admin,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Send => "send",
            RouteClass::Status => "status",
            RouteClass::InboundList => "inbound-list",
            RouteClass::InboundGet => "inbound-get",
            RouteClass::Admin => "admin",
        }
    }
}

pub struct RateLimits {
    limiters: HashMap<RouteClass, DefaultKeyedRateLimiter<String>>,
    clock: DefaultClock,
}

impl RateLimits {
    pub fn from_config(config: &LimitsConfig) -> Self {
        let mut limiters = HashMap::new();

        let classes = [
            (RouteClass::Send, config.requests_per_minute),
            (RouteClass::Status, config.requests_per_minute),
            (RouteClass::InboundList, config.inbound_list_rpm),
            (RouteClass::InboundGet, config.inbound_get_rpm),
            (RouteClass::Admin, config.admin_rpm),
        ];

        for (class, rpm) in classes {
            if let Some(rpm) = NonZeroU32::new(rpm) {
                limiters.insert(class, RateLimiter::keyed(Quota::per_minute(rpm)));
            }
        }

        Self {
            limiters,
            clock: DefaultClock::default(),
        }
    }

    /// Admit or reject one request. Rejection carries the suggested
    /// `Retry-After` in whole seconds (at least 1).
    pub fn check(&self, class: RouteClass, key: &str) -> Result<(), u64> {
        let Some(limiter) = self.limiters.get(&class) else {
            return Ok(());
        };

        match limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(send_rpm: u32) -> RateLimits {
        RateLimits::from_config(&LimitsConfig {
            requests_per_minute: send_rpm,
            ..LimitsConfig::default()
        })
    }

    #[test]
    fn test_zero_quota_disables_class() {
        let limits = limits(0);
        for _ in 0..100 {
            assert!(limits.check(RouteClass::Send, "k1").is_ok());
        }
    }

    #[test]
    fn test_quota_boundary() {
        let limits = limits(3);

        for _ in 0..3 {
            assert!(limits.check(RouteClass::Send, "k1").is_ok());
        }
        let retry = limits.check(RouteClass::Send, "k1").unwrap_err();
        assert!(retry >= 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let limits = limits(1);

        assert!(limits.check(RouteClass::Send, "k1").is_ok());
        assert!(limits.check(RouteClass::Send, "k1").is_err());
        assert!(limits.check(RouteClass::Send, "k2").is_ok());
    }

    #[test]
    fn test_classes_are_independent() {
        let limits = RateLimits::from_config(&LimitsConfig {
            requests_per_minute: 1,
            inbound_list_rpm: 1,
            ..LimitsConfig::default()
        });

        assert!(limits.check(RouteClass::Send, "k1").is_ok());
        assert!(limits.check(RouteClass::InboundList, "k1").is_ok());
        assert!(limits.check(RouteClass::Send, "k1").is_err());
    }
}
