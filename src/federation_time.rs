/**
 * @file
 * @brief Logical time and lookahead value types for the coordination protocol.
 * Logical times are totally ordered floating-point values with a distinguished
 * positive infinity used as the lower bound of an empty regulator registry.
 */
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

use crate::constants::ZERO_LOOKAHEAD_EPSILON;

////////////////  Type definitions

/**
 * A point on the federation-wide logical clock. Construction normalizes
 * negative zero so that the total order derived from `f64::total_cmp`
 * coincides with numeric equality. NaN is not a logical time.
 */
#[derive(Clone, Copy, Debug)]
pub struct LogicalTime {
    value: f64,
}

/**
 * The minimum logical delay between a regulator's current time and any
 * message it may still send. Always non-negative once validated.
 */
#[derive(Clone, Copy, Debug)]
pub struct Lookahead {
    value: f64,
}

////////////////  Functions

impl LogicalTime {
    pub fn new(value: f64) -> LogicalTime {
        debug_assert!(!value.is_nan(), "NaN is not a logical time");
        // Normalize -0.0 so ordering and equality agree with arithmetic.
        LogicalTime {
            value: value + 0.0,
        }
    }

    pub fn zero() -> LogicalTime {
        LogicalTime { value: 0.0 }
    }

    pub fn positive_infinity() -> LogicalTime {
        LogicalTime {
            value: f64::INFINITY,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_positive_infinity(&self) -> bool {
        self.value == f64::INFINITY
    }
}

impl PartialEq for LogicalTime {
    fn eq(&self, other: &Self) -> bool {
        self.value.total_cmp(&other.value) == Ordering::Equal
    }
}

impl Eq for LogicalTime {}

impl PartialOrd for LogicalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogicalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl Add<Lookahead> for LogicalTime {
    type Output = LogicalTime;

    fn add(self, rhs: Lookahead) -> LogicalTime {
        LogicalTime::new(self.value + rhs.value)
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_positive_infinity() {
            write!(f, "+inf")
        } else {
            write!(f, "{}", self.value)
        }
    }
}

impl Lookahead {
    pub fn new(value: f64) -> Lookahead {
        debug_assert!(!value.is_nan(), "NaN is not a lookahead");
        Lookahead {
            value: value + 0.0,
        }
    }

    pub fn zero() -> Lookahead {
        Lookahead { value: 0.0 }
    }

    /**
     * The internal stand-in for a zero lookahead while an advance is in
     * flight. Callers outside the advance machinery never observe it.
     */
    pub fn epsilon() -> Lookahead {
        Lookahead {
            value: ZERO_LOOKAHEAD_EPSILON,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0.0
    }

    pub fn is_epsilon(&self) -> bool {
        self.value == ZERO_LOOKAHEAD_EPSILON
    }
}

impl PartialEq for Lookahead {
    fn eq(&self, other: &Self) -> bool {
        self.value.total_cmp(&other.value) == Ordering::Equal
    }
}

impl Eq for Lookahead {}

impl PartialOrd for Lookahead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lookahead {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl fmt::Display for Lookahead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
