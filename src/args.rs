//! Command line argument parser using clap for cubebot

use crate::config::DEFAULT_CONFIG_PATH;
use crate::gripper::{ArmKey, Position};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Drive a four-armed cube-solving robot through a servo controller board.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct BotArgs {
    #[command(subcommand)]
    /// What to do
    pub command: BotCommand,

    /// Serial device of the servo controller. Overrides the config file; if
    /// neither names one, a device selector is shown
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate of the serial device. Overrides the config file
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Configuration and calibration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Run against a simulated board instead of real hardware
    #[arg(long, global = true)]
    pub simulate: bool,
}

/// The subcommands
#[derive(Debug, Subcommand, Clone)]
pub enum BotCommand {
    /// Execute a move sequence, e.g. "R U R' U'"
    #[command(about)]
    Run(RunCommand),

    /// Print a random scramble, optionally executing it
    #[command(about)]
    Scramble(ScrambleCommand),

    /// Send every channel to its firmware home position
    Home,

    /// Open every arm so a cube can be inserted or removed
    Engage,

    /// Close every arm and turn it to 180 degrees
    Disengage,

    /// Print the state of every arm
    Status,

    /// Move an arm to a named position, adjust it, and store the result
    #[command(about)]
    Calibrate(CalibrateCommand),

    /// Rotate one arm's wrist by any angle, regripping as needed
    #[command(about)]
    Rotate(RotateCommand),

    /// List the available serial devices
    Ports,
}

/// Arguments of `run`
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Moves, as one or more arguments
    #[clap(num_args = 1.., required = true, allow_hyphen_values = true)]
    pub moves: Vec<String>,
}

/// Arguments of `scramble`
#[derive(Debug, Args, Clone)]
pub struct ScrambleCommand {
    /// Number of moves
    #[arg(short = 'n', long = "length", default_value_t = 20)]
    pub length: usize,

    /// Execute the scramble after printing it
    #[arg(short, long)]
    pub execute: bool,

    /// Seed for a reproducible scramble
    #[arg(short, long)]
    pub seed: Option<u64>,
}

/// Arguments of `calibrate`
#[derive(Debug, Args, Clone)]
pub struct CalibrateCommand {
    /// Arm: u, d, l or r
    pub arm: ArmKey,

    /// Position: open, closed, 0, 90, 180 or 270
    pub position: Position,

    /// Raw adjustment in quarter-microseconds
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    pub nudge: i32,
}

/// Arguments of `rotate`
#[derive(Debug, Args, Clone)]
pub struct RotateCommand {
    /// Arm: u, d, l or r
    pub arm: ArmKey,

    /// Degrees, positive is clockwise
    #[arg(allow_hyphen_values = true)]
    pub degrees: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_takes_many_moves() {
        let args = BotArgs::parse_from(["cubebot", "--simulate", "run", "R", "U'", "F2"]);
        assert!(args.simulate);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match args.command {
            BotCommand::Run(cmd) => assert_eq!(cmd.moves, vec!["R", "U'", "F2"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn calibrate_parses_arm_and_position() {
        let args = BotArgs::parse_from([
            "cubebot", "calibrate", "l", "90", "--nudge", "-40", "--port", "/dev/ttyACM1",
        ]);
        assert_eq!(args.port.as_deref(), Some("/dev/ttyACM1"));
        match args.command {
            BotCommand::Calibrate(cmd) => {
                assert_eq!(cmd.arm, ArmKey::L);
                assert_eq!(cmd.position, Position::Deg90);
                assert_eq!(cmd.nudge, -40);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_rotation() {
        let args = BotArgs::parse_from(["cubebot", "rotate", "u", "-300"]);
        match args.command {
            BotCommand::Rotate(cmd) => assert_eq!(cmd.degrees, -300.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_arm_is_refused() {
        assert!(BotArgs::try_parse_from(["cubebot", "calibrate", "q", "open"]).is_err());
    }
}
