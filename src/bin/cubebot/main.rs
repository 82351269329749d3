//! Command line front end for the cube-solving robot.

use clap::Parser;
use cubebot::{
    args::{BotArgs, BotCommand},
    config::BotConfig,
    gripper::ArmKey,
    gui::device_selector,
    notation::{format_sequence, scramble},
    orchestrator::CubeBot,
    sim_board::SimBoard,
    transport::Maestro,
};

use log::{error, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serial2::SerialPort;
use std::{error::Error, path::PathBuf, process::ExitCode, sync::Arc};

// Example:
// cargo run --bin cubebot -- --port /dev/ttyACM0 run "R U R' U'"
// cargo run --bin cubebot -- --simulate scramble -n 25 --seed 7 --execute

fn main() -> ExitCode {
    env_logger::init();
    let args = BotArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("cubebot: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: BotArgs) -> Result<(), Box<dyn Error>> {
    // Commands that never touch the board
    match &args.command {
        BotCommand::Ports => {
            for port in SerialPort::available_ports()? {
                println!("{}", port.to_string_lossy());
            }
            return Ok(());
        }
        BotCommand::Scramble(cmd) if !cmd.execute => {
            let mut rng = scramble_rng(cmd.seed);
            println!("{}", format_sequence(&scramble(&mut rng, cmd.length)));
            return Ok(());
        }
        _ => {}
    }

    let mut config = BotConfig::load_or_default(&args.config)?;
    if let Some(baud) = args.baud {
        config.baud = baud;
    }

    let maestro = if args.simulate {
        info!("Using a simulated board");
        Maestro::new(SimBoard::new(), config.poll_interval())
    } else {
        let port = match args.port.clone().or_else(|| config.port.clone()) {
            Some(port) => PathBuf::from(port),
            None => select_port()?,
        };
        info!("Opening {}", port.display());
        Maestro::open(&port, config.baud, config.poll_interval())?
    };

    let mut bot = CubeBot::from_config(Arc::new(maestro), config, Some(args.config.clone()))?;

    match args.command {
        BotCommand::Run(cmd) => {
            bot.initialize()?;
            let report = bot.run_sequence(&cmd.moves.join(" "))?;
            println!("Executed: {}", format_sequence(&report.executed));
            if !report.unknown.is_empty() {
                println!("Skipped: {}", report.unknown.join(" "));
            }
        }
        BotCommand::Scramble(cmd) => {
            let mut rng = scramble_rng(cmd.seed);
            let text = format_sequence(&scramble(&mut rng, cmd.length));
            println!("{}", text);
            bot.initialize()?;
            bot.run_sequence(&text)?;
        }
        BotCommand::Home => bot.go_home()?,
        BotCommand::Engage => bot.engage()?,
        BotCommand::Disengage => bot.disengage(true)?,
        BotCommand::Status => {
            print!("{}", bot.status());
            for key in ArmKey::ALL {
                let Some(arm) = bot.arm(key) else { continue };
                let open = arm.open_actuator().read_position()?;
                let rotate = arm.rotate_actuator().read_position()?;
                println!("{}: board reports gripper {:?} rotate {:?}", key, open, rotate);
            }
        }
        BotCommand::Calibrate(cmd) => match bot.calibrate(cmd.arm, cmd.position, cmd.nudge)? {
            Some(qus) => println!("{} {} = {} qus", cmd.arm, cmd.position, qus),
            None => warn!("Arm {} is not configured", cmd.arm),
        },
        BotCommand::Rotate(cmd) => {
            bot.initialize()?;
            bot.rotate_arm(cmd.arm, cmd.degrees)?;
            print!("{}", bot.status());
        }
        BotCommand::Ports => {}
    }

    // Keep calibration captured along the way
    bot.save_config()?;
    Ok(())
}

fn scramble_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn select_port() -> Result<PathBuf, Box<dyn Error>> {
    let available_ports = SerialPort::available_ports()?;
    if available_ports.is_empty() {
        return Err("no serial devices found, pass --port or --simulate".into());
    }
    Ok(device_selector(available_ports)?.ok_or("no device selected")?)
}
