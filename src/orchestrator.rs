//! [`CubeBot`] drives up to four [`GripperArm`]s, named after the cube faces
//! they hold (`u`, `d`, `l`, `r`), to execute cube moves.
//!
//! Only four faces are reachable by a fixed arm. The front and back faces are
//! turned by first spinning the whole cube about its vertical axis, so the bot
//! keeps track of the cube's yaw in a four-state ring, see
//! [`CubeOrientation`].
//!
//! Several choreographies command two arms at once: the first motion is sent
//! without waiting and the second one waits. Since waiting is a board-wide
//! barrier, both have arrived once the wait returns.

use crate::actuator::{Actuator, ActuatorError};
use crate::config::{BotConfig, ConfigError};
use crate::gripper::{ArmKey, ArmStatus, GripperArm, Position, MAX_ARM_SPEED, START_ANGLE};
use crate::notation::{parse_sequence, Axis, Face, Move, MoveKind, Slice};
use crate::transport::{Maestro, TransportError};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

const ALL_ARMS: [ArmKey; 4] = ArmKey::ALL;
const SIDE_ARMS: [ArmKey; 2] = [ArmKey::L, ArmKey::R];
const POLE_ARMS: [ArmKey; 2] = [ArmKey::U, ArmKey::D];

/// A direction of rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum Spin {
    /// Clockwise
    #[default]
    Clockwise,
    /// Counterclockwise
    Counterclockwise,
}

impl Spin {
    /// `Clockwise` for `true`
    pub fn from_clockwise(clockwise: bool) -> Self {
        if clockwise {
            Spin::Clockwise
        } else {
            Spin::Counterclockwise
        }
    }

    /// Whether this is [`Spin::Clockwise`]
    pub fn is_clockwise(self) -> bool {
        self == Spin::Clockwise
    }

    /// The other direction
    pub fn reversed(self) -> Self {
        match self {
            Spin::Clockwise => Spin::Counterclockwise,
            Spin::Counterclockwise => Spin::Clockwise,
        }
    }
}

/// Which of four yaw presentations the cube is in. Turning the cube
/// clockwise about the vertical axis steps forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CubeOrientation(u8);

impl CubeOrientation {
    /// Wraps `index` into the ring.
    pub fn new(index: u8) -> Self {
        CubeOrientation(index % 4)
    }

    /// Position in the ring, `0..4`
    pub fn index(self) -> u8 {
        self.0
    }

    /// The orientation after one quarter turn.
    pub fn step(self, spin: Spin) -> Self {
        match spin {
            Spin::Clockwise => CubeOrientation::new(self.0 + 1),
            Spin::Counterclockwise => CubeOrientation::new(self.0 + 3),
        }
    }
}

impl fmt::Display for CubeOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The quarter turns that take the cube from `from` to `to`. A target one
/// step away is reached in that single step; for the opposite orientation
/// both directions cost two steps and `tie_break` picks one.
pub fn reorient_plan(from: CubeOrientation, to: CubeOrientation, tie_break: Spin) -> Vec<Spin> {
    let mut plan = Vec::new();
    let mut at = from;
    while at != to {
        let spin = if at.step(Spin::Counterclockwise) == to {
            Spin::Counterclockwise
        } else if at.step(Spin::Clockwise) == to {
            Spin::Clockwise
        } else {
            tie_break
        };
        plan.push(spin);
        at = at.step(spin);
    }
    plan
}

/// Things that stop a choreography.
#[derive(Debug)]
pub enum BotError {
    /// An arm could not be set up
    Actuator(ActuatorError),
    /// The board refused a command or the link failed
    Transport(TransportError),
    /// The configuration is invalid or could not be written
    Config(ConfigError),
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BotError::Actuator(error) => write!(f, "actuator error: {}", error),
            BotError::Transport(error) => write!(f, "transport error: {}", error),
            BotError::Config(error) => write!(f, "config error: {}", error),
        }
    }
}

impl std::error::Error for BotError {}

impl From<ActuatorError> for BotError {
    fn from(value: ActuatorError) -> Self {
        Self::Actuator(value)
    }
}

impl From<TransportError> for BotError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<ConfigError> for BotError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// What [`CubeBot::run_sequence`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceReport {
    /// Moves that were executed
    pub executed: Vec<Move>,
    /// Tokens that were skipped
    pub unknown: Vec<String>,
}

/// A snapshot of the whole bot.
#[derive(Debug, Clone, PartialEq)]
pub struct BotStatus {
    /// Current yaw of the cube
    pub orientation: CubeOrientation,
    /// Every fitted arm
    pub arms: Vec<ArmStatus>,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "orientation: {}", self.orientation)?;
        for arm in &self.arms {
            writeln!(f, "{}", arm)?;
        }
        Ok(())
    }
}

/// The cube-solving robot.
#[derive(Debug)]
pub struct CubeBot {
    transport: Arc<Maestro>,
    config: BotConfig,
    config_path: Option<PathBuf>,
    arms: BTreeMap<ArmKey, GripperArm>,
    orientation: CubeOrientation,
}

impl CubeBot {
    /// Builds every arm listed in `config` on top of `transport`. Calibration
    /// changes are written back to `config_path`, if there is one. No arm is
    /// moved, see [`CubeBot::initialize`].
    pub fn from_config(
        transport: Arc<Maestro>,
        mut config: BotConfig,
        config_path: Option<PathBuf>,
    ) -> Result<Self, BotError> {
        config.normalize();
        config.validate()?;
        let mut arms = BTreeMap::new();
        for (key, arm_config) in &config.arms {
            debug!("Setting up arm {}: {:?}", key, arm_config);
            let open = Actuator::new(
                transport.clone(),
                arm_config.open_channel,
                arm_config.open_servo,
            )?;
            let rotate = Actuator::new(
                transport.clone(),
                arm_config.rotate_channel,
                arm_config.rotate_servo,
            )?;
            arms.insert(
                *key,
                GripperArm::new(*key, open, rotate, arm_config.calibration()),
            );
        }
        Ok(CubeBot {
            transport,
            config,
            config_path,
            arms,
            orientation: CubeOrientation::default(),
        })
    }

    /// Brings every arm into its start posture: released, turned to 90
    /// degrees and gripping again.
    pub fn initialize(&mut self) -> Result<(), BotError> {
        info!("Initializing arms");
        self.each(&ALL_ARMS, |arm| {
            arm.reset(START_ANGLE, false)?;
            arm.close(true)
        })
    }

    /// Current yaw of the cube
    pub fn orientation(&self) -> CubeOrientation {
        self.orientation
    }

    /// The arm facing `key`, if fitted
    pub fn arm(&self, key: ArmKey) -> Option<&GripperArm> {
        self.arms.get(&key)
    }

    /// The configuration, with calibration as of the last save
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// The shared transport
    pub fn transport(&self) -> &Arc<Maestro> {
        &self.transport
    }

    /// A snapshot for displays.
    pub fn status(&self) -> BotStatus {
        BotStatus {
            orientation: self.orientation,
            arms: self.arms.values().map(GripperArm::status).collect(),
        }
    }

    fn require(&self, keys: &[ArmKey]) -> bool {
        let missing: Vec<String> = keys
            .iter()
            .filter(|k| !self.arms.contains_key(*k))
            .map(ArmKey::to_string)
            .collect();
        if !missing.is_empty() {
            warn!("Missing arms for operation: {}", missing.join(", "));
            return false;
        }
        true
    }

    /// Applies `f` to every fitted arm in `keys`, in order.
    fn each(
        &mut self,
        keys: &[ArmKey],
        mut f: impl FnMut(&mut GripperArm) -> Result<(), TransportError>,
    ) -> Result<(), BotError> {
        for key in keys {
            if let Some(arm) = self.arms.get_mut(key) {
                f(arm)?;
            }
        }
        Ok(())
    }

    fn drive(&mut self, key: ArmKey, degrees: f64, wait: bool) -> Result<(), BotError> {
        self.each(&[key], |arm| arm.set_angle(degrees, wait))
    }

    /// Spins the cube until it is in orientation `target`. Returns `false`,
    /// without moving, if that needs arms that are not fitted.
    pub fn reorient(&mut self, target: CubeOrientation) -> Result<bool, BotError> {
        if self.orientation == target {
            return Ok(true);
        }
        if !self.require(&ALL_ARMS) {
            return Ok(false);
        }
        let plan = reorient_plan(self.orientation, target, self.config.reorient_tie_break);
        debug!("Reorienting {} -> {}: {:?}", self.orientation, target, plan);
        for spin in plan {
            self.rotate_y(spin)?;
        }
        Ok(true)
    }

    /// Turns the whole cube about `axis`.
    pub fn whole_cube_rotate(&mut self, axis: Axis, spin: Spin) -> Result<(), BotError> {
        match axis {
            Axis::X => self.rotate_x(spin),
            Axis::Y => self.rotate_y(spin),
            Axis::Z => {
                if !self.require(&ALL_ARMS) {
                    return Ok(());
                }
                info!("Rotating cube about z {:?}", spin);
                for (axis, spin) in z_rotation(spin) {
                    self.whole_cube_rotate(axis, spin)?;
                }
                Ok(())
            }
        }
    }

    /// U and D turn the cube while L and R step back.
    fn rotate_y(&mut self, spin: Spin) -> Result<(), BotError> {
        if !self.require(&ALL_ARMS) {
            return Ok(());
        }
        info!("Rotating cube about y {:?}", spin);
        self.each(&POLE_ARMS, GripperArm::restore_posture)?;
        self.each(&SIDE_ARMS, |arm| arm.close(true))?;
        let turns = match spin {
            Spin::Clockwise => [270.0, 90.0],
            Spin::Counterclockwise => [90.0, 270.0],
        };
        self.drive(ArmKey::U, turns[0], false)?;
        self.drive(ArmKey::D, turns[1], true)?;
        self.each(&SIDE_ARMS, |arm| arm.open(true))?;
        self.each(&POLE_ARMS, GripperArm::restore_posture)?;
        self.orientation = self.orientation.step(spin);
        Ok(())
    }

    /// L and R turn the cube while U and D step back. The yaw ring is not
    /// affected.
    fn rotate_x(&mut self, spin: Spin) -> Result<(), BotError> {
        if !self.require(&ALL_ARMS) {
            return Ok(());
        }
        info!("Rotating cube about x {:?}", spin);
        self.each(&SIDE_ARMS, GripperArm::restore_posture)?;
        self.each(&POLE_ARMS, |arm| arm.close(true))?;
        let turns = match spin {
            Spin::Clockwise => [90.0, 270.0],
            Spin::Counterclockwise => [270.0, 90.0],
        };
        self.drive(ArmKey::L, turns[0], false)?;
        self.drive(ArmKey::R, turns[1], true)?;
        self.each(&POLE_ARMS, |arm| arm.open(true))?;
        self.each(&SIDE_ARMS, GripperArm::restore_posture)
    }

    /// Quarter turn of one outer face. Front and back are turned by the side
    /// arms after spinning the cube by a quarter; the turn is skipped if the
    /// cube cannot be spun.
    pub fn turn_face(&mut self, face: Face, spin: Spin) -> Result<(), BotError> {
        let (key, orientation) = match face {
            Face::U => (ArmKey::U, None),
            Face::D => (ArmKey::D, None),
            Face::L => (ArmKey::L, Some(0)),
            Face::R => (ArmKey::R, Some(0)),
            Face::F => (ArmKey::L, Some(1)),
            Face::B => (ArmKey::R, Some(1)),
        };
        if let Some(target) = orientation {
            if !self.reorient(CubeOrientation::new(target))? {
                warn!("Skipping {:?} turn, cannot reorient cube", face);
                return Ok(());
            }
        }
        if !self.arms.contains_key(&key) {
            warn!("Arm {} not configured for turn", key);
            return Ok(());
        }
        info!("Turning face {:?} {:?} with arm {}", face, spin, key);
        let (first, second) = match spin {
            Spin::Clockwise => (90.0, 180.0),
            Spin::Counterclockwise => (180.0, 90.0),
        };
        self.each(&[key], |arm| {
            arm.close(true)?;
            arm.set_angle(first, true)?;
            arm.open(true)?;
            arm.set_angle(second, true)?;
            arm.wiggle()?;
            arm.restore_posture()
        })
    }

    /// Turns a middle layer: two opposite arms turn their faces in opposite
    /// directions, and a whole-cube rotation turns the outer layers back.
    pub fn slice(&mut self, slice: Slice, spin: Spin) -> Result<(), BotError> {
        match slice {
            Slice::Middle => {
                if !self.require(&ALL_ARMS) || !self.slice_orientation(0)? {
                    return Ok(());
                }
                info!("Turning middle slice {:?}", spin);
                self.drive_middle(spin)
            }
            Slice::Equator => {
                if !self.require(&ALL_ARMS) || !self.slice_orientation(0)? {
                    return Ok(());
                }
                info!("Turning equator slice {:?}", spin);
                let turns = slice_turns(spin);
                self.drive(ArmKey::U, turns[0], false)?;
                self.drive(ArmKey::D, turns[1], true)?;
                self.settle(&POLE_ARMS)?;
                self.rotate_y(spin)
            }
            Slice::Standing => {
                if !self.require(&ALL_ARMS) || !self.slice_orientation(3)? {
                    return Ok(());
                }
                info!("Turning standing slice {:?}", spin);
                self.drive_middle(spin)?;
                self.each(&ALL_ARMS, GripperArm::wiggle)
            }
        }
    }

    fn slice_orientation(&mut self, target: u8) -> Result<bool, BotError> {
        let reached = self.reorient(CubeOrientation::new(target))?;
        if !reached {
            warn!("Skipping slice, cannot reorient cube to {}", target);
        }
        Ok(reached)
    }

    fn drive_middle(&mut self, spin: Spin) -> Result<(), BotError> {
        let turns = slice_turns(spin);
        self.drive(ArmKey::L, turns[1], false)?;
        self.drive(ArmKey::R, turns[0], true)?;
        self.settle(&SIDE_ARMS)?;
        self.rotate_x(spin)
    }

    fn settle(&mut self, keys: &[ArmKey]) -> Result<(), BotError> {
        self.each(keys, GripperArm::wiggle)?;
        Ok(self.transport.wait_all()?)
    }

    /// A face turn together with the neighbouring slice.
    fn turn_wide(&mut self, face: Face, spin: Spin) -> Result<(), BotError> {
        if !self.require(&ALL_ARMS) {
            return Ok(());
        }
        let (slice, slice_spin) = match face {
            Face::R => (Slice::Middle, spin.reversed()),
            Face::L => (Slice::Middle, spin),
            Face::U => (Slice::Equator, spin.reversed()),
            Face::D => (Slice::Equator, spin),
            Face::F => (Slice::Standing, spin),
            Face::B => (Slice::Standing, spin.reversed()),
        };
        self.turn_face(face, spin)?;
        self.slice(slice, slice_spin)
    }

    /// Executes one parsed move, twice for doubles.
    pub fn run_move(&mut self, mv: Move) -> Result<(), BotError> {
        let spin = Spin::from_clockwise(mv.clockwise);
        for _ in 0..mv.repetitions() {
            match mv.kind {
                MoveKind::Face(face) => self.turn_face(face, spin)?,
                MoveKind::Wide(face) => self.turn_wide(face, spin)?,
                MoveKind::Slice(slice) => self.slice(slice, spin)?,
                MoveKind::Rotate(axis) => self.whole_cube_rotate(axis, spin)?,
            }
        }
        Ok(())
    }

    /// Parses and executes a single token. Returns `false` for tokens that
    /// are not moves.
    pub fn run(&mut self, token: &str) -> Result<bool, BotError> {
        match token.parse::<Move>() {
            Ok(mv) => {
                info!("Running move {}", mv);
                self.run_move(mv)?;
                Ok(true)
            }
            Err(_) => {
                warn!("Unknown move: {}", token.trim());
                Ok(false)
            }
        }
    }

    /// Parses and executes a whole sequence, skipping unknown tokens.
    pub fn run_sequence(&mut self, text: &str) -> Result<SequenceReport, BotError> {
        let parsed = parse_sequence(text);
        for token in &parsed.unknown {
            warn!("Unknown move: {}", token);
        }
        for mv in &parsed.moves {
            info!("Running move {}", mv);
            self.run_move(*mv)?;
        }
        Ok(SequenceReport {
            executed: parsed.moves,
            unknown: parsed.unknown,
        })
    }

    /// Lets go of the cube so it can be taken out or put in.
    pub fn engage(&mut self) -> Result<(), BotError> {
        info!("Engaging arms");
        self.disengage(false)?;
        self.each(&ALL_ARMS, |arm| arm.open(true))
    }

    /// Closes every arm, then turns every arm to 180 degrees.
    pub fn disengage(&mut self, wait: bool) -> Result<(), BotError> {
        info!("Disengaging arms, wait: {}", wait);
        self.each(&ALL_ARMS, |arm| arm.close(wait))?;
        self.each(&ALL_ARMS, |arm| arm.set_angle(180.0, wait))
    }

    /// Moves the grippers out of a camera's view of the front face.
    pub fn frame_shot(&mut self) -> Result<(), BotError> {
        if !self.require(&SIDE_ARMS) {
            return Ok(());
        }
        self.each(&SIDE_ARMS, |arm| {
            arm.reset(START_ANGLE, true)?;
            arm.open(true)
        })?;
        self.each(&POLE_ARMS, |arm| arm.reset(START_ANGLE, true))?;
        self.each(&SIDE_ARMS, |arm| arm.close(true))
    }

    /// Speed limit for every arm, clamped to `[0, 75]`.
    pub fn set_speed(&mut self, speed: u16) -> Result<(), BotError> {
        let speed = speed.min(MAX_ARM_SPEED);
        self.each(&ALL_ARMS, |arm| arm.set_speed(speed))
    }

    /// Parks every channel at its firmware home position.
    pub fn go_home(&self) -> Result<(), BotError> {
        Ok(self.transport.go_home()?)
    }

    /// Rotates one arm's wrist by `delta` degrees, regripping as needed.
    pub fn rotate_arm(&mut self, key: ArmKey, delta: f64) -> Result<(), BotError> {
        if !self.require(&[key]) {
            return Ok(());
        }
        self.each(&[key], |arm| arm.rotate(delta, true))
    }

    /// Moves an arm to a named position, adjusts it by `nudge` raw units, and
    /// stores the result as that position's calibration. Returns the stored
    /// value, or `None` if the arm is not fitted.
    pub fn calibrate(
        &mut self,
        key: ArmKey,
        position: Position,
        nudge: i32,
    ) -> Result<Option<u16>, BotError> {
        let Some(arm) = self.arms.get_mut(&key) else {
            warn!("Arm {} not configured for calibration", key);
            return Ok(None);
        };
        arm.move_to(position, true)?;
        if nudge != 0 {
            arm.nudge(position, nudge, true)?;
        }
        let qus = arm.capture(position);
        self.save_config()?;
        Ok(Some(qus))
    }

    /// Copies every arm's calibration into the configuration and writes it to
    /// the configuration path, if there is one.
    pub fn save_config(&mut self) -> Result<(), BotError> {
        for (key, arm) in &self.arms {
            if let Some(arm_config) = self.config.arms.get_mut(key) {
                arm_config.set_calibration(arm.calibration());
            }
        }
        if let Some(path) = &self.config_path {
            debug!("Saving config to {}", path.display());
            self.config.save(path)?;
        }
        Ok(())
    }
}

/// The whole-cube rotations a z turn is made of, in order. The arms only
/// turn the cube about x and y, so z is x, then y clockwise, then x undone.
/// Both directions step the yaw ring forward.
pub fn z_rotation(spin: Spin) -> [(Axis, Spin); 3] {
    [
        (Axis::X, spin),
        (Axis::Y, Spin::Clockwise),
        (Axis::X, spin.reversed()),
    ]
}

fn slice_turns(spin: Spin) -> [f64; 2] {
    match spin {
        Spin::Clockwise => [90.0, 270.0],
        Spin::Counterclockwise => [270.0, 90.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArmConfig;
    use crate::gripper::{DEFAULT_CLOSED_QUS, DEFAULT_OPEN_QUS, WIGGLE_AMPLITUDES};
    use crate::protocol::Command;
    use crate::sim_board::SimBoard;
    use std::time::Duration;

    fn full_config() -> BotConfig {
        let mut config = BotConfig::default();
        config.arms.insert(ArmKey::U, ArmConfig::new(6, 2));
        config.arms.insert(ArmKey::D, ArmConfig::new(7, 3));
        config
    }

    fn bot_with(config: BotConfig) -> (SimBoard, CubeBot) {
        let board = SimBoard::new();
        let maestro = Arc::new(Maestro::new(board.clone(), Duration::ZERO));
        let bot = CubeBot::from_config(maestro, config, None).unwrap();
        board.clear_commands();
        (board, bot)
    }

    fn qus(bot: &CubeBot, key: ArmKey, degrees: f64) -> u16 {
        bot.arm(key).unwrap().rotate_actuator().degrees_to_qus(degrees)
    }

    fn rotate_channel(bot: &CubeBot, key: ArmKey) -> u8 {
        bot.arm(key).unwrap().rotate_actuator().channel()
    }

    fn has_target(board: &SimBoard, channel: u8, target: u16) -> bool {
        board.targets_for(channel).contains(&target)
    }

    #[test]
    fn reorient_plan_is_shortest() {
        for from in 0..4 {
            for to in 0..4 {
                let (from, to) = (CubeOrientation::new(from), CubeOrientation::new(to));
                for tie_break in [Spin::Clockwise, Spin::Counterclockwise] {
                    let plan = reorient_plan(from, to, tie_break);
                    assert!(plan.len() <= 2, "{from} -> {to}: {plan:?}");
                    let end = plan.iter().fold(from, |at, spin| at.step(*spin));
                    assert_eq!(end, to);

                    if from.step(Spin::Clockwise) == to {
                        assert_eq!(plan, vec![Spin::Clockwise]);
                    }
                    if from.step(Spin::Counterclockwise) == to {
                        assert_eq!(plan, vec![Spin::Counterclockwise]);
                    }
                }
            }
        }
    }

    #[test]
    fn opposite_orientation_uses_tie_break() {
        let (a, b) = (CubeOrientation::new(0), CubeOrientation::new(2));
        assert_eq!(
            reorient_plan(a, b, Spin::Clockwise),
            vec![Spin::Clockwise, Spin::Clockwise]
        );
        assert_eq!(
            reorient_plan(a, b, Spin::Counterclockwise),
            vec![Spin::Counterclockwise, Spin::Counterclockwise]
        );
        assert!(reorient_plan(b, b, Spin::Clockwise).is_empty());
    }

    #[test]
    fn y_rotation_drives_poles_and_steps_ring() {
        let (board, mut bot) = bot_with(full_config());
        bot.whole_cube_rotate(Axis::Y, Spin::Clockwise).unwrap();

        assert_eq!(bot.orientation(), CubeOrientation::new(1));
        let u = rotate_channel(&bot, ArmKey::U);
        let d = rotate_channel(&bot, ArmKey::D);
        assert!(has_target(&board, u, qus(&bot, ArmKey::U, 270.0)));
        assert!(has_target(&board, d, qus(&bot, ArmKey::D, 90.0)));
        // Both poles end up back in their turning posture
        for key in POLE_ARMS {
            let arm = bot.arm(key).unwrap();
            assert_eq!(arm.rotation_degrees(), 180.0);
            assert!(arm.is_open());
        }
        // The side arms let go again
        assert!(bot.arm(ArmKey::L).unwrap().is_open());

        bot.whole_cube_rotate(Axis::Y, Spin::Counterclockwise).unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(0));
    }

    #[test]
    fn x_rotation_leaves_ring_alone() {
        let (board, mut bot) = bot_with(full_config());
        bot.whole_cube_rotate(Axis::X, Spin::Clockwise).unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(0));

        let l = rotate_channel(&bot, ArmKey::L);
        let r = rotate_channel(&bot, ArmKey::R);
        assert!(has_target(&board, l, qus(&bot, ArmKey::L, 90.0)));
        assert!(has_target(&board, r, qus(&bot, ArmKey::R, 270.0)));
    }

    type Matrix = [[i32; 3]; 3];

    const IDENTITY: Matrix = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];

    fn quarter_turn(axis: Axis, spin: Spin) -> Matrix {
        let clockwise = match axis {
            Axis::X => [[1, 0, 0], [0, 0, -1], [0, 1, 0]],
            Axis::Y => [[0, 0, 1], [0, 1, 0], [-1, 0, 0]],
            Axis::Z => [[0, -1, 0], [1, 0, 0], [0, 0, 1]],
        };
        match spin {
            Spin::Clockwise => clockwise,
            Spin::Counterclockwise => {
                let mut inverse = clockwise;
                for (i, row) in inverse.iter_mut().enumerate() {
                    for (j, cell) in row.iter_mut().enumerate() {
                        *cell = clockwise[j][i];
                    }
                }
                inverse
            }
        }
    }

    fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
        let mut product = [[0; 3]; 3];
        for (i, row) in product.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        product
    }

    /// The arms are fixed in the world, so later turns multiply from the left.
    fn compose(turns: &[(Axis, Spin)]) -> Matrix {
        turns.iter().fold(IDENTITY, |acc, (axis, spin)| {
            multiply(&quarter_turn(*axis, *spin), &acc)
        })
    }

    #[test]
    fn z_turns_undo_each_other() {
        let cw = compose(&z_rotation(Spin::Clockwise));
        let ccw = compose(&z_rotation(Spin::Counterclockwise));
        assert_ne!(cw, IDENTITY);
        assert_ne!(cw, ccw);
        assert_eq!(multiply(&ccw, &cw), IDENTITY);
        assert_eq!(multiply(&cw, &ccw), IDENTITY);
        // A quarter turn about a single axis, and its inverse
        assert_eq!(multiply(&cw, &cw), multiply(&ccw, &ccw));
        assert_ne!(multiply(&cw, &cw), IDENTITY);
        assert!(
            cw == quarter_turn(Axis::Z, Spin::Clockwise)
                || cw == quarter_turn(Axis::Z, Spin::Counterclockwise)
        );
    }

    #[test]
    fn z_rotation_is_composed() {
        let (board, mut bot) = bot_with(full_config());
        let l = rotate_channel(&bot, ArmKey::L);
        let (at_90, at_270) = (qus(&bot, ArmKey::L, 90.0), qus(&bot, ArmKey::L, 270.0));
        let order = |board: &SimBoard| {
            let targets = board.targets_for(l);
            let find = |t: u16| targets.iter().position(|&x| x == t);
            (find(at_90), find(at_270))
        };

        bot.whole_cube_rotate(Axis::Z, Spin::Clockwise).unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(1));
        let (first_90, first_270) = order(&board);
        assert!(first_90 < first_270, "{first_90:?} {first_270:?}");

        board.clear_commands();
        bot.whole_cube_rotate(Axis::Z, Spin::Counterclockwise).unwrap();
        // The middle y turn is clockwise both ways
        assert_eq!(bot.orientation(), CubeOrientation::new(2));
        let (first_90, first_270) = order(&board);
        assert!(first_270 < first_90, "{first_90:?} {first_270:?}");
        let u = rotate_channel(&bot, ArmKey::U);
        assert!(has_target(&board, u, qus(&bot, ArmKey::U, 270.0)));
        assert!(!has_target(&board, u, qus(&bot, ArmKey::U, 90.0)));
    }

    #[test]
    fn face_turn_sequence() {
        let (board, mut bot) = bot_with(full_config());
        bot.turn_face(Face::U, Spin::Clockwise).unwrap();

        let at_180 = qus(&bot, ArmKey::U, 180.0);
        let mut expected = vec![qus(&bot, ArmKey::U, 90.0), at_180];
        for amplitude in WIGGLE_AMPLITUDES {
            expected.extend([at_180 + amplitude, at_180 - amplitude, at_180]);
        }
        assert_eq!(board.targets_for(rotate_channel(&bot, ArmKey::U)), expected);

        let open_channel = bot.arm(ArmKey::U).unwrap().open_actuator().channel();
        assert_eq!(
            board.targets_for(open_channel),
            vec![DEFAULT_CLOSED_QUS, DEFAULT_OPEN_QUS]
        );
        // No other arm moved and the cube was not spun
        assert_eq!(bot.orientation(), CubeOrientation::new(0));
        for key in [ArmKey::D, ArmKey::L, ArmKey::R] {
            assert!(board.targets_for(rotate_channel(&bot, key)).is_empty());
        }
    }

    #[test]
    fn counterclockwise_face_turn_mirrors() {
        let (board, mut bot) = bot_with(full_config());
        bot.turn_face(Face::D, Spin::Counterclockwise).unwrap();
        let targets = board.targets_for(rotate_channel(&bot, ArmKey::D));
        assert_eq!(targets[0], qus(&bot, ArmKey::D, 180.0));
        assert_eq!(targets[1], qus(&bot, ArmKey::D, 90.0));
        // Restored to 180 at the end
        assert_eq!(bot.arm(ArmKey::D).unwrap().rotation_degrees(), 180.0);
        assert_eq!(targets.last(), Some(&qus(&bot, ArmKey::D, 180.0)));
    }

    #[test]
    fn front_turn_spins_cube_first() {
        let (board, mut bot) = bot_with(full_config());
        bot.run("F").unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(1));

        // Back turns need the same orientation, so no further spin
        board.clear_commands();
        bot.run("B'").unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(1));
        assert!(board.targets_for(rotate_channel(&bot, ArmKey::U)).is_empty());

        // Side turns spin back
        bot.run("L").unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(0));
    }

    #[test]
    fn two_arm_build_degrades_gracefully() {
        let (board, mut bot) = bot_with(BotConfig::default());
        bot.run("R").unwrap();
        assert!(!board.targets_for(rotate_channel(&bot, ArmKey::R)).is_empty());

        board.clear_commands();
        bot.run_sequence("F U E y S").unwrap();
        assert!(board.commands().is_empty());
        assert_eq!(bot.orientation(), CubeOrientation::new(0));

        // Slices and wide moves are refused before any arm moves
        for token in ["M", "M'", "r", "l'"] {
            bot.run(token).unwrap();
            assert!(board.commands().is_empty(), "{token} moved an arm");
        }
        assert_eq!(bot.arm(ArmKey::L).unwrap().rotation_degrees(), START_ANGLE);
    }

    #[test]
    fn middle_slice_drives_sides_apart() {
        let (board, mut bot) = bot_with(full_config());
        bot.slice(Slice::Middle, Spin::Clockwise).unwrap();

        let l = board.targets_for(rotate_channel(&bot, ArmKey::L));
        let r = board.targets_for(rotate_channel(&bot, ArmKey::R));
        assert_eq!(l[0], qus(&bot, ArmKey::L, 270.0));
        assert_eq!(r[0], qus(&bot, ArmKey::R, 90.0));
        assert_eq!(bot.orientation(), CubeOrientation::new(0));
    }

    #[test]
    fn equator_slice_finishes_with_y() {
        let (board, mut bot) = bot_with(full_config());
        bot.slice(Slice::Equator, Spin::Counterclockwise).unwrap();

        let u = board.targets_for(rotate_channel(&bot, ArmKey::U));
        assert_eq!(u[0], qus(&bot, ArmKey::U, 270.0));
        assert_eq!(bot.orientation(), CubeOrientation::new(3));
    }

    #[test]
    fn standing_slice_reorients_to_three() {
        let (_, mut bot) = bot_with(full_config());
        bot.slice(Slice::Standing, Spin::Clockwise).unwrap();
        assert_eq!(bot.orientation(), CubeOrientation::new(3));
    }

    #[test]
    fn wide_move_is_face_plus_slice() {
        let (wide_board, mut wide) = bot_with(full_config());
        wide.run("r").unwrap();

        let (split_board, mut split) = bot_with(full_config());
        split.run_sequence("R M'").unwrap();

        assert_eq!(wide_board.commands(), split_board.commands());
        assert_eq!(wide.orientation(), split.orientation());
    }

    #[test]
    fn doubles_run_twice() {
        let (board, mut bot) = bot_with(full_config());
        bot.run("U2").unwrap();
        let open_channel = bot.arm(ArmKey::U).unwrap().open_actuator().channel();
        assert_eq!(board.targets_for(open_channel).len(), 4);
    }

    #[test]
    fn sequence_reports_unknown_tokens() {
        let (_, mut bot) = bot_with(full_config());
        let report = bot.run_sequence("R, U2 Q x'").unwrap();
        assert_eq!(report.executed.len(), 3);
        assert_eq!(report.unknown, vec!["Q".to_owned()]);
        assert!(!bot.run("Q").unwrap());
    }

    #[test]
    fn engage_and_disengage() {
        let (_, mut bot) = bot_with(full_config());
        bot.disengage(true).unwrap();
        for arm in bot.status().arms {
            assert!(!arm.is_open);
            assert_eq!(arm.rotation_degrees, 180.0);
        }
        bot.engage().unwrap();
        assert!(bot.status().arms.iter().all(|a| a.is_open));
    }

    #[test]
    fn initialize_grips_at_start_angle() {
        let (board, mut bot) = bot_with(BotConfig::default());
        bot.initialize().unwrap();
        for arm in bot.status().arms {
            assert!(!arm.is_open);
            assert_eq!(arm.rotation_degrees, START_ANGLE);
        }
        assert!(board.commands().contains(&Command::GetMovingState));
    }

    #[test]
    fn frame_shot_tucks_side_arms() {
        let (_, mut bot) = bot_with(full_config());
        bot.frame_shot().unwrap();
        assert!(!bot.arm(ArmKey::L).unwrap().is_open());
        assert!(!bot.arm(ArmKey::R).unwrap().is_open());
        assert_eq!(bot.arm(ArmKey::U).unwrap().rotation_degrees(), START_ANGLE);
    }

    #[test]
    fn speed_applies_to_every_arm() {
        let (board, mut bot) = bot_with(full_config());
        bot.set_speed(500).unwrap();
        for key in ALL_ARMS {
            assert_eq!(board.speed(rotate_channel(&bot, key)), Some(MAX_ARM_SPEED));
        }
        bot.go_home().unwrap();
        assert_eq!(board.commands().last(), Some(&Command::GoHome));
    }

    #[test]
    fn calibration_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.ron");
        let board = SimBoard::new();
        let maestro = Arc::new(Maestro::new(board.clone(), Duration::ZERO));
        let mut bot = CubeBot::from_config(maestro, full_config(), Some(path.clone())).unwrap();

        let expected = qus(&bot, ArmKey::L, 90.0) - 50;
        let stored = bot.calibrate(ArmKey::L, Position::Deg90, -50).unwrap();
        assert_eq!(stored, Some(expected));

        let saved = BotConfig::load(&path).unwrap();
        assert_eq!(
            saved.arms[&ArmKey::L].qus.get(&Position::Deg90),
            Some(&expected)
        );

        // The captured value is replayed next time
        board.clear_commands();
        bot.run("L").unwrap();
        assert_eq!(
            board.targets_for(rotate_channel(&bot, ArmKey::L))[0],
            expected
        );
    }

    #[test]
    fn status_lists_every_arm() {
        let (_, bot) = bot_with(full_config());
        let status = bot.status();
        assert_eq!(status.arms.len(), 4);
        let text = status.to_string();
        assert!(text.starts_with("orientation: 0"));
        assert_eq!(text.lines().count(), 5);
    }
}
