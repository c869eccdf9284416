//! Resource tracking: wall-clock deadline, allocation, and recursion limits.
//!
//! The heap is generic over a [`ResourceTracker`] so that production builds
//! with [`NoLimitTracker`] compile the checks away. `check_time` is polled at
//! every statement boundary, which is also how cooperative cancellation works:
//! exceeding the deadline surfaces as a fatal `PP0023` diagnostic.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Error returned when a resource limit is exceeded during interpretation.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// Maximum number of heap allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Wall-clock deadline exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum call depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Recursion { .. } => {
                write!(f, "maximum call depth exceeded")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Whether this error maps to the dedicated timeout diagnostic code.
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::Time { .. })
    }
}

/// Trait for tracking resource usage during interpretation.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    fn on_allocate(&mut self) -> Result<(), ResourceError>;

    /// Called at every statement boundary to check the deadline.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a new call frame.
    ///
    /// `current_depth` is the depth before the new frame is pushed.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;
}

/// Recommended maximum call depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Configuration for resource limits.
///
/// All limits are optional; `ResourceLimits::default()` disables everything
/// except the default recursion depth applied by the trackers.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum wall-clock interpretation time.
    pub max_duration: Option<Duration>,
    /// Maximum call depth.
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = Some(limit);
        self
    }
}

/// A tracker with no limits beyond the default recursion depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_RECURSION_DEPTH {
            return Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }
}

/// A tracker that enforces configurable limits.
///
/// The start time is recorded at construction, so create the tracker
/// immediately before starting interpretation.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    allocation_count: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
        }
    }

    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        self.allocation_count += 1;
        Ok(())
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let max = self.limits.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH);
        if current_depth >= max {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_tracker_enforces_allocations() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        assert!(tracker.on_allocate().is_ok());
        assert!(tracker.on_allocate().is_ok());
        assert!(matches!(tracker.on_allocate(), Err(ResourceError::Allocation { limit: 2, .. })));
    }

    #[test]
    fn deadline_is_checked() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_duration(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(1));
        assert!(matches!(tracker.check_time(), Err(ResourceError::Time { .. })));
    }
}
