//! Unit conversions between degrees, microseconds and the controller's native
//! quarter-microseconds, plus the calibrated soft limits of a channel.
//!
//! Degrees `d` in `[0, span]` map linearly onto `[min_us, max_us]`:
//!
//! ```text
//! us  = min_us + (max_us - min_us) * d / span
//! qus = round(us * 4)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quarter-microseconds per microsecond.
pub const QUS_PER_US: f64 = 4.0;

/// What to do with a value that falls outside its allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum RangePolicy {
    /// Replace it with the nearest bound
    #[default]
    Clamp,
    /// Refuse it
    Reject,
}

impl RangePolicy {
    /// Applies the policy to `value` over the inclusive range `[lo, hi]`.
    /// Returns `None` only when the policy is [`RangePolicy::Reject`] and the
    /// value is out of range.
    pub fn apply<T: PartialOrd + Copy>(self, value: T, lo: T, hi: T) -> Option<T> {
        match self {
            RangePolicy::Clamp => Some(clamp(value, lo, hi)),
            RangePolicy::Reject => (lo <= value && value <= hi).then_some(value),
        }
    }
}

// `Ord::clamp` does not cover f64
fn clamp<T: PartialOrd + Copy>(value: T, lo: T, hi: T) -> T {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Raised when a channel's limits make no sense.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitsError {
    /// `min_us` must be strictly below `max_us`
    Inverted {
        /// The offending lower bound
        min_us: u16,
        /// The offending upper bound
        max_us: u16,
    },
    /// The mechanical span has to be a positive, finite number of degrees
    Span(f64),
}

impl fmt::Display for LimitsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LimitsError::Inverted { min_us, max_us } => {
                write!(f, "min_us ({min_us}) must be < max_us ({max_us})")
            }
            LimitsError::Span(span) => write!(f, "span of {span} degrees is not positive"),
        }
    }
}

impl std::error::Error for LimitsError {}

/// Per-channel soft limits, in microseconds. `neutral_us` is expected to lie
/// between the other two but that is up to whoever writes the calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Limits {
    /// Pulse width at 0 degrees
    pub min_us: u16,
    /// Pulse width at the end of the span
    pub max_us: u16,
    /// Pulse width used by "center"
    pub neutral_us: u16,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            min_us: 500,
            max_us: 2500,
            neutral_us: 1500,
        }
    }
}

impl Limits {
    /// Builds a set of limits, failing eagerly if `min_us >= max_us`.
    pub fn new(min_us: u16, max_us: u16, neutral_us: u16) -> Result<Self, LimitsError> {
        let limits = Limits {
            min_us,
            max_us,
            neutral_us,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Checks the `min_us < max_us` invariant.
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.min_us >= self.max_us {
            return Err(LimitsError::Inverted {
                min_us: self.min_us,
                max_us: self.max_us,
            });
        }
        Ok(())
    }

    /// Limits the microsecond value `us` according to `policy`.
    pub fn restrict_us(&self, us: u32, policy: RangePolicy) -> Option<u16> {
        policy
            .apply(us, self.min_us as u32, self.max_us as u32)
            .map(|us| us as u16)
    }

    /// The lower limit in quarter-microseconds.
    pub fn min_qus(&self) -> f64 {
        self.min_us as f64 * QUS_PER_US
    }

    /// The upper limit in quarter-microseconds.
    pub fn max_qus(&self) -> f64 {
        self.max_us as f64 * QUS_PER_US
    }
}

/// Converts whole microseconds to quarter-microseconds.
pub fn us_to_qus(us: u16) -> u16 {
    us.saturating_mul(4)
}

/// Limits `deg` to `[0, span]` according to `policy`. NaN is rejected by both
/// policies.
pub fn restrict_degrees(deg: f64, span: f64, policy: RangePolicy) -> Option<f64> {
    if deg.is_nan() {
        return None;
    }
    policy.apply(deg, 0.0, span)
}

/// Clamps `deg` to `[0, span]`, NaN goes to 0.
pub fn clamp_degrees(deg: f64, span: f64) -> f64 {
    restrict_degrees(deg, span, RangePolicy::Clamp).unwrap_or(0.0)
}

/// Maps an angle onto the channel's quarter-microsecond range. The angle is
/// clamped to `[0, span]` first, so the result always lies within the limits.
/// The computation stays in quarter-microseconds to round only once.
pub fn degrees_to_quarter_microseconds(deg: f64, limits: &Limits, span: f64) -> u16 {
    let deg = clamp_degrees(deg, span);
    let lo = limits.min_qus();
    let hi = limits.max_qus();
    (lo + (hi - lo) * deg / span).round() as u16
}

/// The inverse of [`degrees_to_quarter_microseconds`], clamped to `[0, span]`.
pub fn quarter_microseconds_to_degrees(qus: u16, limits: &Limits, span: f64) -> f64 {
    let us = qus as f64 / QUS_PER_US;
    let lo = limits.min_us as f64;
    let hi = limits.max_us as f64;
    clamp_degrees((us - lo) * span / (hi - lo), span)
}
