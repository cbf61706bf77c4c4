//! Cost-based admission limiter.
//!
//! Every admitted task holds a [`RatePermit`] carrying its cost until it is
//! dropped. A task is admitted only if both the total in-flight cost and the
//! calling package's in-flight cost stay within their capacities.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SchedulerError;
use crate::metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    pub total_capacity: u32,
    pub per_package_capacity: u32,
}

#[derive(Debug, Default)]
struct InFlight {
    total: u32,
    per_package: HashMap<String, u32>,
}

#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    in_flight: Arc<Mutex<InFlight>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits are passed per call so a refreshed configuration applies to the
    /// next admission without touching tasks already running.
    pub fn try_acquire(
        &self,
        package: &str,
        cost: u32,
        limits: RateLimits,
    ) -> Result<RatePermit, SchedulerError> {
        let mut in_flight = self.in_flight.lock();
        let package_cost = in_flight.per_package.get(package).copied().unwrap_or(0);
        let total_after = in_flight.total.saturating_add(cost);
        let package_after = package_cost.saturating_add(cost);
        if total_after > limits.total_capacity || package_after > limits.per_package_capacity {
            metrics::record_rate_limited();
            debug!(
                package,
                cost,
                in_flight = in_flight.total,
                package_in_flight = package_cost,
                "rate limit rejected task"
            );
            return Err(SchedulerError::RateLimited {
                package: package.to_string(),
            });
        }
        in_flight.total = total_after;
        in_flight
            .per_package
            .insert(package.to_string(), package_after);
        Ok(RatePermit {
            in_flight: Arc::clone(&self.in_flight),
            package: package.to_string(),
            cost,
        })
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.lock().total
    }

    pub fn in_flight_for(&self, package: &str) -> u32 {
        self.in_flight
            .lock()
            .per_package
            .get(package)
            .copied()
            .unwrap_or(0)
    }
}

/// Releases its cost when dropped.
#[derive(Debug)]
pub struct RatePermit {
    in_flight: Arc<Mutex<InFlight>>,
    package: String,
    cost: u32,
}

impl RatePermit {
    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        in_flight.total = in_flight.total.saturating_sub(self.cost);
        let remaining = match in_flight.per_package.get_mut(&self.package) {
            Some(cost) => {
                *cost = cost.saturating_sub(self.cost);
                *cost
            }
            None => return,
        };
        if remaining == 0 {
            in_flight.per_package.remove(&self.package);
        }
    }
}
