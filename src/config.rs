//! The bot's configuration file, stored as [ron]:
//!
//! ```text
//! (
//!     port: Some("/dev/ttyACM0"),
//!     baud: 9600,
//!     poll_interval_ms: 150,
//!     reorient_tie_break: Clockwise,
//!     arms: {
//!         L: (open_channel: 4, rotate_channel: 0, qus: {Open: 6888, Closed: 10000}, state: Some(Open)),
//!         R: (open_channel: 5, rotate_channel: 1),
//!     },
//! )
//! ```
//!
//! Besides the wiring, the file holds every arm's calibration map, which is
//! the only state that has to survive a restart.

use crate::actuator::ServoConfig;
use crate::gripper::{ArmKey, Calibration, GripState, Position, GRIPPER_SPAN, ROTATION_TRAVEL, START_ANGLE};
use crate::orchestrator::Spin;
use crate::protocol::MAX_TARGET;

use log::{info, warn};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt, fs,
    io::{self, ErrorKind},
    path::Path,
    time::Duration,
};

/// Where the binary looks for its configuration unless told otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "cubebot.ron";

/// Things that go wrong while loading or saving the configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Returned when reading or writing the file fails.
    IoError(io::Error),

    /// Returned when serialization fails.
    RonError(ron::Error),

    /// Returned when the file is not valid.
    RonSpannedError(ron::de::SpannedError),

    /// Returned when a calibrated value is beyond what the board accepts.
    CalibrationOutOfRange {
        /// Arm the value belongs to
        arm: ArmKey,
        /// Position it was recorded for
        position: Position,
        /// The offending value
        qus: u16,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::RonError(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::RonSpannedError(error) => {
                Cow::from(format!("invalid config: {}", error))
            }
            ConfigError::CalibrationOutOfRange { arm, position, qus } => Cow::from(format!(
                "calibration {} of arm {} is {} qus, above {}",
                position, arm, qus, MAX_TARGET
            )),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

fn default_open_servo() -> ServoConfig {
    ServoConfig::with_span(GRIPPER_SPAN)
}

fn default_rotate_servo() -> ServoConfig {
    ServoConfig::with_span(ROTATION_TRAVEL).initial_degrees(START_ANGLE)
}

/// Wiring and calibration of one arm.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArmConfig {
    /// Channel of the open/close servo
    #[serde(alias = "extend_channel")]
    pub open_channel: u8,
    /// Channel of the rotational servo
    pub rotate_channel: u8,
    /// Open/close servo setup
    #[serde(default = "default_open_servo")]
    pub open_servo: ServoConfig,
    /// Rotational servo setup
    #[serde(default = "default_rotate_servo")]
    pub rotate_servo: ServoConfig,
    /// Calibrated named positions
    #[serde(default)]
    pub qus: BTreeMap<Position, u16>,
    /// Gripper state when the file was written
    #[serde(default)]
    pub state: Option<GripState>,
}

impl ArmConfig {
    /// An uncalibrated arm on the given channels.
    pub fn new(open_channel: u8, rotate_channel: u8) -> Self {
        ArmConfig {
            open_channel,
            rotate_channel,
            open_servo: default_open_servo(),
            rotate_servo: default_rotate_servo(),
            qus: BTreeMap::new(),
            state: None,
        }
    }

    /// The calibration stored for this arm.
    pub fn calibration(&self) -> Calibration {
        Calibration::new(self.qus.clone(), self.state)
    }

    /// Replaces the stored calibration.
    pub fn set_calibration(&mut self, calibration: &Calibration) {
        self.qus = calibration.values().clone();
        self.state = calibration.state();
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    /// Serial device of the servo controller
    pub port: Option<String>,
    /// Baud rate, ignored by the USB command port
    pub baud: u32,
    /// Interval between two is-moving polls
    pub poll_interval_ms: u64,
    /// Direction used when the target orientation is two steps away
    pub reorient_tie_break: Spin,
    /// Every arm that is fitted
    pub arms: BTreeMap<ArmKey, ArmConfig>,
}

impl Default for BotConfig {
    fn default() -> Self {
        let mut arms = BTreeMap::new();
        arms.insert(ArmKey::L, ArmConfig::new(4, 0));
        arms.insert(ArmKey::R, ArmConfig::new(5, 1));
        BotConfig {
            port: None,
            baud: 9600,
            poll_interval_ms: 150,
            reorient_tie_break: Spin::default(),
            arms,
        }
    }
}

impl BotConfig {
    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fills in the left and right arms, which every build has. A missing
    /// `L` is copied from `U` and a missing `R` from `D` if those exist,
    /// otherwise the default wiring is used.
    pub fn normalize(&mut self) {
        let defaults = BotConfig::default().arms;
        for (key, fallback) in [(ArmKey::L, ArmKey::U), (ArmKey::R, ArmKey::D)] {
            if self.arms.contains_key(&key) {
                continue;
            }
            let arm = match self.arms.get(&fallback) {
                Some(arm) => {
                    warn!("No config for arm {}, copying arm {}", key, fallback);
                    arm.clone()
                }
                None => defaults[&key].clone(),
            };
            self.arms.insert(key, arm);
        }
    }

    /// Checks every calibrated value against the board's target range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (&arm, config) in &self.arms {
            if let Some((&position, &qus)) = config.qus.iter().find(|(_, qus)| **qus > MAX_TARGET) {
                return Err(ConfigError::CalibrationOutOfRange { arm, position, qus });
            }
        }
        Ok(())
    }

    /// Reads, normalizes and validates the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: BotConfig =
            ron::from_str(&text).map_err(ConfigError::RonSpannedError)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(ConfigError::RonError)?;
        fs::write(path, text).map_err(ConfigError::IoError)
    }

    /// Loads `path`, or writes and returns the default configuration if there
    /// is no such file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => {
                info!("Config loaded from {}", path.display());
                Ok(config)
            }
            Err(ConfigError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                let config = BotConfig::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }
}
