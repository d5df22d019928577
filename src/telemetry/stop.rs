//! # Stop Conditions
//!
//! Run-level predicates that end a recording: a state-of-charge floor for
//! discharge runs, a ceiling for charge runs, and an optional wall-clock
//! limit.

use std::fmt;
use std::time::Duration;

/// State-of-charge predicate of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopCondition {
    /// Stop once the charge level is at or below `floor`
    Discharge { floor: f64 },
    /// Stop once the charge level is at or above `ceiling`
    Charge { ceiling: f64 },
    /// Never stop on charge level
    None,
}

impl StopCondition {
    /// Whether `level` satisfies the predicate
    ///
    /// # Examples
    ///
    /// ```
    /// use hoverlog::telemetry::StopCondition;
    ///
    /// let discharge = StopCondition::Discharge { floor: 30.0 };
    /// assert!(!discharge.is_met(30.5));
    /// assert!(discharge.is_met(30.0));
    /// ```
    pub fn is_met(&self, level: f64) -> bool {
        match *self {
            Self::Discharge { floor } => level <= floor,
            Self::Charge { ceiling } => level >= ceiling,
            Self::None => false,
        }
    }
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discharge { floor } => write!(f, "discharge to {}%", floor),
            Self::Charge { ceiling } => write!(f, "charge to {}%", ceiling),
            Self::None => write!(f, "none"),
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopReason {
    /// Discharge floor reached at this level
    Discharged { level: f64 },
    /// Charge ceiling reached at this level
    Charged { level: f64 },
    /// The wall-clock limit elapsed
    DurationElapsed,
    /// Stop was raised from outside the scheduler
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discharged { level } => write!(f, "discharged to {}%", level),
            Self::Charged { level } => write!(f, "charged to {}%", level),
            Self::DurationElapsed => write!(f, "duration elapsed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything that can end a run from inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopPolicy {
    pub condition: StopCondition,
    pub max_duration: Option<Duration>,
}

impl StopPolicy {
    pub fn new(condition: StopCondition) -> Self {
        Self {
            condition,
            max_duration: None,
        }
    }

    /// Add a wall-clock limit
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Check the wall-clock limit
    pub fn check_elapsed(&self, elapsed: Duration) -> Option<StopReason> {
        match self.max_duration {
            Some(limit) if elapsed >= limit => Some(StopReason::DurationElapsed),
            _ => None,
        }
    }

    /// Check the charge level
    pub fn check_level(&self, level: f64) -> Option<StopReason> {
        if !self.condition.is_met(level) {
            return None;
        }
        match self.condition {
            StopCondition::Discharge { .. } => Some(StopReason::Discharged { level }),
            StopCondition::Charge { .. } => Some(StopReason::Charged { level }),
            StopCondition::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discharge_floor_is_inclusive() {
        let policy = StopPolicy::new(StopCondition::Discharge { floor: 30.0 });
        assert_eq!(policy.check_level(30.1), None);
        assert_eq!(policy.check_level(30.0), Some(StopReason::Discharged { level: 30.0 }));
        assert_eq!(policy.check_level(12.0), Some(StopReason::Discharged { level: 12.0 }));
    }

    #[test]
    fn test_charge_ceiling_is_inclusive() {
        let policy = StopPolicy::new(StopCondition::Charge { ceiling: 95.0 });
        assert_eq!(policy.check_level(94.9), None);
        assert_eq!(policy.check_level(95.0), Some(StopReason::Charged { level: 95.0 }));
    }

    #[test]
    fn test_none_never_stops() {
        let policy = StopPolicy::new(StopCondition::None);
        assert_eq!(policy.check_level(0.0), None);
        assert_eq!(policy.check_level(100.0), None);
        assert_eq!(policy.check_elapsed(Duration::from_secs(86_400)), None);
    }

    #[test]
    fn test_duration_limit() {
        let policy = StopPolicy::new(StopCondition::None).with_max_duration(Duration::from_secs(10));
        assert_eq!(policy.check_elapsed(Duration::from_millis(9_999)), None);
        assert_eq!(
            policy.check_elapsed(Duration::from_secs(10)),
            Some(StopReason::DurationElapsed)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(StopCondition::Discharge { floor: 30.0 }.to_string(), "discharge to 30%");
        assert_eq!(StopCondition::Charge { ceiling: 95.5 }.to_string(), "charge to 95.5%");
        assert_eq!(StopReason::Cancelled.to_string(), "cancelled");
    }
}
