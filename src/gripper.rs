//! A [`GripperArm`] is a two-degree-of-freedom end effector built from two
//! actuators: a linear one that opens and closes the gripper, and a
//! rotational one with 270 degrees of travel.
//!
//! The interesting part is [`GripperArm::rotate`]. A face may need to turn
//! further than the rotational servo can travel, so the turn is broken into
//! legs by [`plan_rotation`]: travel to the limit while holding the face,
//! release, go back to the opposite boundary, grip again, and carry on.

use crate::actuator::Actuator;
use crate::protocol::MAX_TARGET;
use crate::transport::TransportError;
use crate::units::{clamp_degrees, RangePolicy};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Mechanical travel of the rotational servo.
pub const ROTATION_TRAVEL: f64 = 270.0;

/// Default span of the open/close servo.
pub const GRIPPER_SPAN: f64 = 180.0;

/// Angle an arm is assumed to hold before anything has been commanded.
pub const START_ANGLE: f64 = 90.0;

/// Fastest speed an arm is ever driven at.
pub const MAX_ARM_SPEED: u16 = 75;

/// Used when the gripper has never been calibrated.
pub const DEFAULT_OPEN_QUS: u16 = 6888;
/// Used when the gripper has never been calibrated.
pub const DEFAULT_CLOSED_QUS: u16 = 10000;

/// Settle amplitudes, in quarter-microseconds, largest first.
pub const WIGGLE_AMPLITUDES: [u16; 3] = [350, 250, 150];

/// Largest relative rotation, in degrees, that [`plan_rotation`] will plan.
pub const MAX_ROTATION_DELTA: f64 = 3600.0;

/// Which fixed arm we are talking about, named after the cube face it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum ArmKey {
    /// Up
    U,
    /// Down
    D,
    /// Left
    L,
    /// Right
    R,
}

impl ArmKey {
    /// Every arm a full build can have.
    pub const ALL: [ArmKey; 4] = [ArmKey::U, ArmKey::D, ArmKey::L, ArmKey::R];
}

impl fmt::Display for ArmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArmKey::U => "u",
            ArmKey::D => "d",
            ArmKey::L => "l",
            ArmKey::R => "r",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ArmKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u" | "up" => Ok(ArmKey::U),
            "d" | "down" => Ok(ArmKey::D),
            "l" | "left" => Ok(ArmKey::L),
            "r" | "right" => Ok(ArmKey::R),
            other => Err(format!("unknown arm '{other}'")),
        }
    }
}

/// A named, calibratable position of an arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Position {
    /// Gripper open
    #[serde(alias = "Extended")]
    Open,
    /// Gripper closed
    #[serde(alias = "Retracted")]
    Closed,
    /// Rotation at 0 degrees
    Deg0,
    /// Rotation at 90 degrees
    Deg90,
    /// Rotation at 180 degrees
    Deg180,
    /// Rotation at 270 degrees
    Deg270,
}

impl Position {
    /// The calibration bucket for `degrees`, if it is exactly one of them.
    pub fn for_angle(degrees: f64) -> Option<Self> {
        match degrees {
            d if d == 0.0 => Some(Position::Deg0),
            d if d == 90.0 => Some(Position::Deg90),
            d if d == 180.0 => Some(Position::Deg180),
            d if d == 270.0 => Some(Position::Deg270),
            _ => None,
        }
    }

    /// The rotation angle of this position, `None` for gripper positions.
    pub fn angle(self) -> Option<f64> {
        match self {
            Position::Open | Position::Closed => None,
            Position::Deg0 => Some(0.0),
            Position::Deg90 => Some(90.0),
            Position::Deg180 => Some(180.0),
            Position::Deg270 => Some(270.0),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.angle() {
            Some(angle) => write!(f, "{angle}"),
            None if *self == Position::Open => write!(f, "open"),
            None => write!(f, "closed"),
        }
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "extended" => Ok(Position::Open),
            "closed" | "close" | "retracted" => Ok(Position::Closed),
            "0" => Ok(Position::Deg0),
            "90" => Ok(Position::Deg90),
            "180" => Ok(Position::Deg180),
            "270" => Ok(Position::Deg270),
            other => Err(format!("unknown position '{other}'")),
        }
    }
}

/// Last known state of the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum GripState {
    /// Open
    #[serde(alias = "Extended")]
    Open,
    /// Closed
    #[serde(alias = "Retracted")]
    Closed,
}

/// The calibrated quarter-microsecond value of every named position that has
/// been visited or captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calibration {
    qus: BTreeMap<Position, u16>,
    state: Option<GripState>,
}

impl Calibration {
    /// Builds a calibration from persisted values.
    pub fn new(qus: BTreeMap<Position, u16>, state: Option<GripState>) -> Self {
        Calibration { qus, state }
    }

    /// The calibrated value of `position`, if any.
    pub fn get(&self, position: Position) -> Option<u16> {
        self.qus.get(&position).copied()
    }

    /// Remembers `qus` as the value of `position`.
    pub fn record(&mut self, position: Position, qus: u16) {
        self.qus.insert(position, qus);
    }

    /// All recorded values
    pub fn values(&self) -> &BTreeMap<Position, u16> {
        &self.qus
    }

    /// Last recorded gripper state
    pub fn state(&self) -> Option<GripState> {
        self.state
    }

    /// Records the gripper state
    pub fn set_state(&mut self, state: GripState) {
        self.state = Some(state);
    }
}

/// One leg of a rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotationStep {
    /// Drive, still gripping, to a travel limit. Always followed by a regrip.
    Carry(f64),
    /// Release, return to this boundary, grip again
    Regrip(f64),
    /// The final leg, to this angle
    Apply(f64),
}

/// Breaks a relative rotation by `delta` degrees, starting at `start`, into
/// legs that never leave `[0, 270]`. Positive deltas are clockwise and
/// increase the angle.
///
/// A regrip is needed only when the remaining rotation does not fit into the
/// travel left in the requested direction, so starting from the boundary any
/// delta of up to 270 degrees is a single [`RotationStep::Apply`].
///
/// Deltas that are not finite or exceed [`MAX_ROTATION_DELTA`] give an empty
/// plan.
pub fn plan_rotation(start: f64, delta: f64) -> Vec<RotationStep> {
    if !delta.is_finite() || delta.abs() > MAX_ROTATION_DELTA {
        return Vec::new();
    }

    let mut position = clamp_degrees(start, ROTATION_TRAVEL);
    let mut remaining = delta.abs();
    let mut plan = Vec::new();

    if delta >= 0.0 {
        while position + remaining > ROTATION_TRAVEL {
            if position < ROTATION_TRAVEL {
                plan.push(RotationStep::Carry(ROTATION_TRAVEL));
                remaining -= ROTATION_TRAVEL - position;
            }
            plan.push(RotationStep::Regrip(0.0));
            position = 0.0;
        }
        plan.push(RotationStep::Apply(position + remaining));
    } else {
        while position - remaining < 0.0 {
            if position > 0.0 {
                plan.push(RotationStep::Carry(0.0));
                remaining -= position;
            }
            plan.push(RotationStep::Regrip(ROTATION_TRAVEL));
            position = ROTATION_TRAVEL;
        }
        plan.push(RotationStep::Apply(position - remaining));
    }

    plan
}

/// A read-only snapshot of an arm for displays and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmStatus {
    /// Which arm
    pub key: ArmKey,
    /// Whether the gripper was last opened
    pub is_open: bool,
    /// Logical rotation since the last regrip
    pub rotation_degrees: f64,
    /// Open/close actuator position in degrees
    pub open_degrees: f64,
    /// Rotational actuator position in degrees
    pub rotate_degrees: f64,
    /// Raw open/close target
    pub open_qus: u16,
    /// Raw rotational target
    pub rotate_qus: u16,
}

impl fmt::Display for ArmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {:.1} deg (gripper {:.1} deg / {} qus, rotate {:.1} deg / {} qus)",
            self.key,
            if self.is_open { "open" } else { "closed" },
            self.rotation_degrees,
            self.open_degrees,
            self.open_qus,
            self.rotate_degrees,
            self.rotate_qus,
        )
    }
}

/// A gripper on a rotating wrist.
#[derive(Debug)]
pub struct GripperArm {
    key: ArmKey,
    is_open: bool,
    rotation_degrees: f64,
    open_actuator: Actuator,
    rotate_actuator: Actuator,
    calibration: Calibration,
}

impl GripperArm {
    /// Assembles an arm. Nothing is sent to the board.
    pub fn new(
        key: ArmKey,
        open_actuator: Actuator,
        rotate_actuator: Actuator,
        calibration: Calibration,
    ) -> Self {
        let is_open = calibration.state() != Some(GripState::Closed);
        GripperArm {
            key,
            is_open,
            rotation_degrees: START_ANGLE,
            open_actuator,
            rotate_actuator,
            calibration,
        }
    }

    /// Which arm this is
    pub fn key(&self) -> ArmKey {
        self.key
    }

    /// Whether the gripper was last opened
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Logical wrist angle since the last reset or regrip
    pub fn rotation_degrees(&self) -> f64 {
        self.rotation_degrees
    }

    /// The open/close actuator
    pub fn open_actuator(&self) -> &Actuator {
        &self.open_actuator
    }

    /// The rotational actuator
    pub fn rotate_actuator(&self) -> &Actuator {
        &self.rotate_actuator
    }

    /// Calibrated positions
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Snapshot for displays
    pub fn status(&self) -> ArmStatus {
        ArmStatus {
            key: self.key,
            is_open: self.is_open,
            rotation_degrees: self.rotation_degrees,
            open_degrees: self.open_actuator.current_degrees(),
            rotate_degrees: self.rotate_actuator.current_degrees(),
            open_qus: self.open_actuator.target(),
            rotate_qus: self.rotate_actuator.target(),
        }
    }

    fn grip(&mut self, state: GripState, wait: bool) -> Result<(), TransportError> {
        let (position, fallback) = match state {
            GripState::Open => (Position::Open, DEFAULT_OPEN_QUS),
            GripState::Closed => (Position::Closed, DEFAULT_CLOSED_QUS),
        };
        let target = self.calibration.get(position).unwrap_or(fallback);
        self.open_actuator.set_quarter_microseconds(target)?;
        self.calibration.record(position, self.open_actuator.target());
        self.calibration.set_state(state);
        self.is_open = state == GripState::Open;
        if wait {
            self.wait()?;
        }
        Ok(())
    }

    /// Opens the gripper.
    pub fn open(&mut self, wait: bool) -> Result<(), TransportError> {
        debug!("Arm {} open(wait={})", self.key, wait);
        self.grip(GripState::Open, wait)
    }

    /// Closes the gripper.
    pub fn close(&mut self, wait: bool) -> Result<(), TransportError> {
        debug!("Arm {} close(wait={})", self.key, wait);
        self.grip(GripState::Closed, wait)
    }

    /// Turns the wrist to an absolute angle. The four quarter-turn angles use
    /// their calibrated value when there is one; anything else goes through
    /// the actuator's degree mapping.
    pub fn set_angle(&mut self, degrees: f64, wait: bool) -> Result<(), TransportError> {
        debug!("Arm {} set_angle({}, wait={})", self.key, degrees, wait);
        let bucket = Position::for_angle(degrees);
        match bucket.and_then(|b| self.calibration.get(b)) {
            Some(qus) => self.rotate_actuator.set_quarter_microseconds(qus)?,
            None => self.rotate_actuator.set_degrees(degrees)?,
        }
        if let Some(bucket) = bucket {
            self.calibration.record(bucket, self.rotate_actuator.target());
        }
        self.rotation_degrees = clamp_degrees(degrees, ROTATION_TRAVEL);
        if wait {
            self.wait()?;
        }
        Ok(())
    }

    /// One regrip cycle: release the face, turn the wrist back to `boundary`,
    /// take hold again.
    pub fn reset(&mut self, boundary: f64, wait: bool) -> Result<(), TransportError> {
        debug!("Arm {} reset({}, wait={})", self.key, boundary, wait);
        self.open(wait)?;
        self.set_angle(boundary, wait)?;
        self.close(wait)
    }

    /// Rotates the wrist by `delta_degrees` relative to where it is, positive
    /// being clockwise. Turns that do not fit into the remaining travel are
    /// delivered with regrip cycles, see [`plan_rotation`].
    ///
    /// A clockwise turn grips first if the gripper was open, and either
    /// re-opens at the end (if it was open) or settles with a
    /// [`GripperArm::wiggle`]. The speed limit is lifted again afterwards.
    pub fn rotate(&mut self, delta_degrees: f64, wait: bool) -> Result<(), TransportError> {
        let plan = plan_rotation(self.rotation_degrees, delta_degrees);
        if plan.is_empty() {
            warn!("Arm {} ignoring rotation by {}", self.key, delta_degrees);
            return Ok(());
        }
        debug!("Arm {} rotate({}) plan: {:?}", self.key, delta_degrees, plan);

        let clockwise = delta_degrees >= 0.0;
        let was_open = self.is_open;
        self.set_speed(MAX_ARM_SPEED)?;
        if clockwise && was_open {
            self.close(wait)?;
        }

        for step in plan {
            match step {
                RotationStep::Carry(angle) | RotationStep::Apply(angle) => {
                    self.set_angle(angle, wait)?
                }
                RotationStep::Regrip(boundary) => self.reset(boundary, wait)?,
            }
        }

        if clockwise {
            if was_open {
                self.open(wait)?;
            } else {
                self.wiggle()?;
            }
        }
        self.set_speed(0)
    }

    /// Shakes the wrist around its current target with shrinking amplitude to
    /// take up backlash. Every leg waits for the board to settle. The logical
    /// angle is not touched.
    pub fn wiggle(&mut self) -> Result<(), TransportError> {
        let base = self.rotate_actuator.target();
        debug!("Arm {} wiggle around {}", self.key, base);
        for amplitude in WIGGLE_AMPLITUDES {
            let legs = [
                base.saturating_add(amplitude).min(MAX_TARGET),
                base.saturating_sub(amplitude),
                base,
            ];
            for qus in legs {
                self.rotate_actuator.set_quarter_microseconds(qus)?;
                self.wait()?;
            }
        }
        Ok(())
    }

    /// Brings the arm into its home posture for face turns: at 180 degrees
    /// and open. The wrist is only turned with the gripper closed.
    pub fn restore_posture(&mut self) -> Result<(), TransportError> {
        if self.rotation_degrees != 180.0 {
            info!("Resetting arm {}", self.key);
            self.close(true)?;
            self.set_angle(180.0, true)?;
        }
        if !self.is_open {
            self.open(true)?;
        }
        Ok(())
    }

    /// Applies the same speed limit, clamped to `[0, 75]`, to both actuators.
    pub fn set_speed(&mut self, speed: u16) -> Result<(), TransportError> {
        let speed = RangePolicy::Clamp
            .apply(speed, 0, MAX_ARM_SPEED)
            .unwrap_or(MAX_ARM_SPEED);
        debug!("Arm {} set_speed({})", self.key, speed);
        self.open_actuator.set_speed(speed)?;
        self.rotate_actuator.set_speed(speed)
    }

    /// Moves to a named position.
    pub fn move_to(&mut self, position: Position, wait: bool) -> Result<(), TransportError> {
        match (position, position.angle()) {
            (Position::Open, _) => self.open(wait),
            (Position::Closed, _) => self.close(wait),
            (_, Some(angle)) => self.set_angle(angle, wait),
            (_, None) => Ok(()),
        }
    }

    /// Moves the actuator behind `position` by `delta` raw units.
    pub fn nudge(&mut self, position: Position, delta: i32, wait: bool) -> Result<(), TransportError> {
        match position.angle() {
            None => self.open_actuator.nudge(delta)?,
            Some(_) => self.rotate_actuator.nudge(delta)?,
        }
        if wait {
            self.wait()?;
        }
        Ok(())
    }

    /// Records whatever the relevant actuator is currently commanded to as the
    /// calibrated value of `position`, and returns it.
    pub fn capture(&mut self, position: Position) -> u16 {
        let qus = match position {
            Position::Open => {
                self.calibration.set_state(GripState::Open);
                self.open_actuator.target()
            }
            Position::Closed => {
                self.calibration.set_state(GripState::Closed);
                self.open_actuator.target()
            }
            _ => self.rotate_actuator.target(),
        };
        info!("Arm {} captured {} = {} qus", self.key, position, qus);
        self.calibration.record(position, qus);
        qus
    }

    /// Board-wide barrier.
    pub fn wait(&self) -> Result<(), TransportError> {
        self.rotate_actuator.wait()
    }
}
