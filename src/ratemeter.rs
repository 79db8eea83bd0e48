//! Token-bucket admission control keyed by (referrer, rule).
//!
//! Buckets are created lazily on the first admission check and replenish
//! linearly up to capacity. A background reaper drops buckets that have been
//! idle for a full rate period. DashMap entry access linearizes concurrent
//! updates to one bucket; different buckets proceed in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ProxyError;
use crate::rules::ServiceRule;

const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    referrer: String,
    rule_index: usize,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
    /// One full replenish period; buckets idle this long are reaped.
    period: Duration,
    last_replenish: Instant,
    last_used: Instant,
    rule_url: String,
}

impl Bucket {
    fn accrue(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_replenish).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_replenish = now;
    }
}

/// One row of the status-page dump.
#[derive(Debug, Clone)]
pub struct BucketSnapshot {
    pub referrer: String,
    pub rule_url: String,
    pub tokens: f64,
    pub capacity: f64,
    pub idle: Duration,
}

pub struct RateMeter {
    buckets: DashMap<BucketKey, Bucket>,
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Admission check for one request. Rules without a configured limit are
    /// admitted unconditionally; an `Err` means the meter state is corrupt,
    /// not that the request was denied.
    pub fn is_under_rate(
        &self,
        referrer: &str,
        rule_index: usize,
        rule: &ServiceRule,
    ) -> Result<bool, ProxyError> {
        self.admit_at(Instant::now(), referrer, rule_index, rule)
    }

    fn admit_at(
        &self,
        now: Instant,
        referrer: &str,
        rule_index: usize,
        rule: &ServiceRule,
    ) -> Result<bool, ProxyError> {
        if !rule.use_rate_meter {
            return Ok(true);
        }

        let capacity = rule.rate_limit as f64;
        if capacity < 1.0 || !rule.rate.is_finite() || rule.rate <= 0.0 {
            return Err(ProxyError::RateMeter(format!(
                "invalid bucket constants for rule {}",
                rule.url
            )));
        }

        let key = BucketKey {
            referrer: referrer.to_string(),
            rule_index,
        };
        match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                if !bucket.tokens.is_finite() {
                    return Err(ProxyError::RateMeter(format!(
                        "bucket for rule {} lost its token count",
                        rule.url
                    )));
                }
                bucket.accrue(now);
                bucket.last_used = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    Ok(true)
                } else {
                    // The denied request does not consume anything.
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Bucket {
                    tokens: capacity - 1.0,
                    capacity,
                    refill_rate: rule.rate,
                    period: Duration::from_secs((rule.rate_limit_period * 60) as u64),
                    last_replenish: now,
                    last_used: now,
                    rule_url: rule.url.clone(),
                });
                Ok(true)
            }
        }
    }

    /// Snapshot every bucket for the status page, tokens accrued to now.
    pub fn database_dump(&self) -> Vec<BucketSnapshot> {
        let now = Instant::now();
        let mut rows: Vec<BucketSnapshot> = self
            .buckets
            .iter()
            .map(|entry| {
                let bucket = entry.value();
                let elapsed = now
                    .saturating_duration_since(bucket.last_replenish)
                    .as_secs_f64();
                BucketSnapshot {
                    referrer: entry.key().referrer.clone(),
                    rule_url: bucket.rule_url.clone(),
                    tokens: (bucket.tokens + elapsed * bucket.refill_rate).min(bucket.capacity),
                    capacity: bucket.capacity,
                    idle: now.saturating_duration_since(bucket.last_used),
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            a.referrer
                .cmp(&b.referrer)
                .then_with(|| a.rule_url.cmp(&b.rule_url))
        });
        rows
    }

    /// Drop buckets idle for at least one full replenish period.
    pub fn reap(&self) {
        self.reap_at(Instant::now());
    }

    fn reap_at(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_used) < bucket.period);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!("reaped {} idle rate-meter buckets", removed);
        }
    }

    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let meter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                interval.tick().await;
                meter.reap();
            }
        })
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerUrlConfig;
    use crate::rules::ServiceRule;

    fn limited_rule(rate_limit: i64, period_minutes: i64) -> ServiceRule {
        ServiceRule::compile(&ServerUrlConfig {
            url: "https://geo.example.com/rest".to_string(),
            match_all: true,
            rate_limit,
            rate_limit_period: period_minutes,
            ..ServerUrlConfig::default()
        })
    }

    #[test]
    fn unmetered_rule_is_always_admitted() {
        let meter = RateMeter::new();
        let rule = limited_rule(0, 0);
        for _ in 0..1000 {
            assert!(meter.is_under_rate("*", 0, &rule).unwrap());
        }
        assert!(meter.database_dump().is_empty());
    }

    #[test]
    fn burst_then_replenish() {
        // 60 requests per minute: capacity 60, refill 1/s.
        let meter = RateMeter::new();
        let rule = limited_rule(60, 1);
        let start = Instant::now();

        for _ in 0..60 {
            assert!(meter.admit_at(start, "*", 0, &rule).unwrap());
        }
        assert!(!meter.admit_at(start, "*", 0, &rule).unwrap());

        // Two seconds later exactly two more fit.
        let later = start + Duration::from_secs(2);
        assert!(meter.admit_at(later, "*", 0, &rule).unwrap());
        assert!(meter.admit_at(later, "*", 0, &rule).unwrap());
        assert!(!meter.admit_at(later, "*", 0, &rule).unwrap());
    }

    #[test]
    fn accrual_caps_at_capacity() {
        let meter = RateMeter::new();
        let rule = limited_rule(10, 1);
        let start = Instant::now();

        // Drain the bucket completely.
        for _ in 0..10 {
            assert!(meter.admit_at(start, "*", 0, &rule).unwrap());
        }

        // Far more idle time than a full refill still yields only capacity.
        let much_later = start + Duration::from_secs(3600);
        for _ in 0..10 {
            assert!(meter.admit_at(much_later, "*", 0, &rule).unwrap());
        }
        assert!(!meter.admit_at(much_later, "*", 0, &rule).unwrap());
    }

    #[test]
    fn buckets_are_isolated_by_referrer_and_rule() {
        let meter = RateMeter::new();
        let rule = limited_rule(1, 1);
        let start = Instant::now();

        assert!(meter.admit_at(start, "https://a.example.com", 0, &rule).unwrap());
        assert!(!meter.admit_at(start, "https://a.example.com", 0, &rule).unwrap());
        // Another referrer and another rule index have their own budgets.
        assert!(meter.admit_at(start, "https://b.example.com", 0, &rule).unwrap());
        assert!(meter.admit_at(start, "https://a.example.com", 1, &rule).unwrap());
    }

    #[test]
    fn denial_does_not_consume() {
        let meter = RateMeter::new();
        let rule = limited_rule(60, 1);
        let start = Instant::now();

        for _ in 0..60 {
            assert!(meter.admit_at(start, "*", 0, &rule).unwrap());
        }
        // Hammering a dry bucket must not push the count negative.
        for _ in 0..50 {
            assert!(!meter.admit_at(start, "*", 0, &rule).unwrap());
        }
        let later = start + Duration::from_secs(2);
        assert!(meter.admit_at(later, "*", 0, &rule).unwrap());
        assert!(meter.admit_at(later, "*", 0, &rule).unwrap());
        assert!(!meter.admit_at(later, "*", 0, &rule).unwrap());
    }

    #[test]
    fn dump_reports_accrued_tokens() {
        let meter = RateMeter::new();
        let rule = limited_rule(60, 1);
        let start = Instant::now();
        meter.admit_at(start, "https://a.example.com", 0, &rule).unwrap();

        let rows = meter.database_dump();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].referrer, "https://a.example.com");
        assert_eq!(rows[0].rule_url, "https://geo.example.com/rest");
        assert_eq!(rows[0].capacity, 60.0);
        assert!(rows[0].tokens >= 59.0);
    }

    #[test]
    fn reaper_drops_idle_buckets_only() {
        let meter = RateMeter::new();
        let rule = limited_rule(60, 1);
        let start = Instant::now();

        meter.admit_at(start, "idle", 0, &rule).unwrap();
        meter.admit_at(start, "busy", 0, &rule).unwrap();

        // "busy" is touched again just before the reap horizon.
        let almost = start + Duration::from_secs(59);
        meter.admit_at(almost, "busy", 0, &rule).unwrap();

        meter.reap_at(start + Duration::from_secs(61));
        let rows = meter.database_dump();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].referrer, "busy");
    }
}
