//! cubebot drives a cube-solving robot: four two-axis grippers, one per
//! reachable face, each made of an open/close servo and a rotational servo
//! with 270 degrees of travel, all hanging off a single Pololu Maestro style
//! servo controller on a serial port.
//!
//! The layers, bottom up:
//!
//! - [protocol] and [transport]: the controller's compact serial protocol
//!   and the [transport::Maestro] that owns the port.
//! - [units] and [actuator]: calibrated soft limits and single servo channels.
//! - [gripper]: a [gripper::GripperArm] built from two actuators, including
//!   rotation beyond the servo's travel by regripping.
//! - [orchestrator]: [orchestrator::CubeBot], which turns cube moves written
//!   in standard [notation] into arm choreography.
//!
//! [sim_board] stands in for the hardware, both in tests and for
//! `cubebot --simulate`.

#![warn(missing_docs)]
pub mod actuator;
pub mod args;
pub mod config;
pub mod gripper;
pub mod gui;
pub mod notation;
pub mod orchestrator;
pub mod protocol;
pub mod sim_board;
pub mod transport;
pub mod units;
