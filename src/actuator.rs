//! One servo channel with calibrated soft limits.
//!
//! An [`Actuator`] remembers the target it last commanded and treats that as
//! the truth about where the servo should be. It never reads the position
//! back to find out; [`Actuator::read_position`] exists for diagnostics only.

use crate::transport::{Maestro, TransportError};
use crate::units::{
    degrees_to_quarter_microseconds, quarter_microseconds_to_degrees, restrict_degrees,
    us_to_qus, Limits, LimitsError, RangePolicy,
};

use log::debug;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::protocol::{MAX_CHANNEL, MAX_TARGET};

/// Static configuration of a servo channel.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Soft limits in microseconds
    pub limits: Limits,
    /// Speed limit, 0 is unlimited
    pub speed: u16,
    /// Acceleration limit, 0 is unlimited
    pub accel: u16,
    /// Degrees of mechanical travel between `min_us` and `max_us`
    pub span_degrees: f64,
    /// Where the servo is assumed to start. `None` means neutral.
    pub initial_degrees: Option<f64>,
}

impl Default for ServoConfig {
    fn default() -> Self {
        ServoConfig {
            limits: Limits::default(),
            speed: 75,
            accel: 0,
            span_degrees: 270.0,
            initial_degrees: None,
        }
    }
}

impl ServoConfig {
    /// The default configuration with another span.
    pub fn with_span(span_degrees: f64) -> Self {
        ServoConfig {
            span_degrees,
            ..Self::default()
        }
    }

    /// Sets the assumed starting angle.
    pub fn initial_degrees(self, degrees: f64) -> Self {
        ServoConfig {
            initial_degrees: Some(degrees),
            ..self
        }
    }
}

/// Things that can go wrong while setting up an actuator.
#[derive(Debug)]
pub enum ActuatorError {
    /// The calibration is unusable
    Limits(LimitsError),
    /// The board refused or the link failed
    Transport(TransportError),
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ActuatorError::Limits(error) => write!(f, "bad limits: {}", error),
            ActuatorError::Transport(error) => write!(f, "transport error: {}", error),
        }
    }
}

impl std::error::Error for ActuatorError {}

impl From<LimitsError> for ActuatorError {
    fn from(value: LimitsError) -> Self {
        Self::Limits(value)
    }
}

impl From<TransportError> for ActuatorError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// A single calibrated servo channel.
#[derive(Debug)]
pub struct Actuator {
    transport: Arc<Maestro>,
    channel: u8,
    limits: Limits,
    span_degrees: f64,
    target: u16,
    speed_limit: u16,
    accel_limit: u16,
    policy: RangePolicy,
}

impl Actuator {
    /// Validates `config`, computes the starting target without moving the
    /// servo, and sends the configured speed and acceleration limits.
    pub fn new(
        transport: Arc<Maestro>,
        channel: u8,
        config: ServoConfig,
    ) -> Result<Self, ActuatorError> {
        if channel > MAX_CHANNEL {
            return Err(TransportError::ChannelOutOfRange(channel).into());
        }
        config.limits.validate()?;
        if !(config.span_degrees.is_finite() && config.span_degrees > 0.0) {
            return Err(LimitsError::Span(config.span_degrees).into());
        }

        let target = match config.initial_degrees {
            Some(deg) => degrees_to_quarter_microseconds(deg, &config.limits, config.span_degrees),
            None => us_to_qus(config.limits.neutral_us),
        };

        let actuator = Actuator {
            transport,
            channel,
            limits: config.limits,
            span_degrees: config.span_degrees,
            target,
            speed_limit: config.speed,
            accel_limit: config.accel,
            policy: RangePolicy::Clamp,
        };
        actuator
            .transport
            .set_motion_limits(channel, config.speed, config.accel)?;
        Ok(actuator)
    }

    /// Switches between clamping and refusing out-of-range requests.
    /// Actuators clamp unless told otherwise.
    pub fn with_policy(self, policy: RangePolicy) -> Self {
        Actuator { policy, ..self }
    }

    /// Board channel
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Soft limits
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Mechanical span
    pub fn span_degrees(&self) -> f64 {
        self.span_degrees
    }

    /// The last commanded target, in quarter-microseconds.
    pub fn target(&self) -> u16 {
        self.target
    }

    /// Current speed limit
    pub fn speed_limit(&self) -> u16 {
        self.speed_limit
    }

    /// Current acceleration limit
    pub fn accel_limit(&self) -> u16 {
        self.accel_limit
    }

    /// The target expressed in degrees, clamped to `[0, span]`.
    pub fn current_degrees(&self) -> f64 {
        quarter_microseconds_to_degrees(self.target, &self.limits, self.span_degrees)
    }

    /// What `deg` maps to on this channel.
    pub fn degrees_to_qus(&self, deg: f64) -> u16 {
        degrees_to_quarter_microseconds(deg, &self.limits, self.span_degrees)
    }

    fn command(&mut self, target: u16) -> Result<(), TransportError> {
        self.transport.set_target(self.channel, target)?;
        self.target = target;
        Ok(())
    }

    /// Moves to `us` microseconds, limited to `[min_us, max_us]` by the
    /// actuator's range policy.
    pub fn set_microseconds(&mut self, us: u32) -> Result<(), TransportError> {
        debug!("Actuator {} set_microseconds({})", self.channel, us);
        let us = self
            .limits
            .restrict_us(us, self.policy)
            .ok_or(TransportError::TargetOutOfRange(us.min(u16::MAX as u32) as u16))?;
        self.command(us_to_qus(us))
    }

    /// Moves to `deg`, limited to `[0, span]` by the actuator's range policy.
    pub fn set_degrees(&mut self, deg: f64) -> Result<(), TransportError> {
        debug!("Actuator {} set_degrees({})", self.channel, deg);
        let deg = restrict_degrees(deg, self.span_degrees, self.policy)
            .ok_or_else(|| TransportError::TargetOutOfRange(self.degrees_to_qus(deg)))?;
        let qus = self.degrees_to_qus(deg);
        self.command(qus)
    }

    /// Moves to a raw target, bypassing the soft limits. Calibration values
    /// are captured and replayed in this unit.
    pub fn set_quarter_microseconds(&mut self, qus: u16) -> Result<(), TransportError> {
        debug!("Actuator {} set_quarter_microseconds({})", self.channel, qus);
        self.command(qus)
    }

    /// Moves the raw target by `delta`, staying inside the protocol's range.
    pub fn nudge(&mut self, delta: i32) -> Result<(), TransportError> {
        let qus = (self.target as i32 + delta).clamp(0, MAX_TARGET as i32) as u16;
        self.set_quarter_microseconds(qus)
    }

    /// Moves to `neutral_us`.
    pub fn center(&mut self) -> Result<(), TransportError> {
        self.set_microseconds(self.limits.neutral_us as u32)
    }

    /// Changes and sends the speed limit.
    pub fn set_speed(&mut self, speed: u16) -> Result<(), TransportError> {
        self.speed_limit = speed;
        self.transport.set_speed(self.channel, speed)
    }

    /// Changes and sends the acceleration limit.
    pub fn set_accel(&mut self, accel: u16) -> Result<(), TransportError> {
        self.accel_limit = accel;
        self.transport.set_accel(self.channel, accel)
    }

    /// Blocks until the *whole board* is idle, not just this channel.
    pub fn wait(&self) -> Result<(), TransportError> {
        self.transport.wait_all()
    }

    /// Board-wide, see [`Maestro::is_moving`].
    pub fn is_moving(&self) -> Result<bool, TransportError> {
        self.transport.is_moving()
    }

    /// Diagnostic position readback.
    pub fn read_position(&self) -> Result<Option<u16>, TransportError> {
        self.transport.query_position(self.channel)
    }
}
