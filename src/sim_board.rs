//! A stand-in for the servo controller board. [`SimBoard`] implements
//! [`Read`] and [`Write`], so it plugs into a [`crate::transport::Maestro`]
//! exactly like a serial port does. Everything written to it is decoded with
//! the same parser the protocol module exposes and kept in a log that tests
//! (and `--simulate` runs) can inspect afterwards.

use crate::protocol::{parse_command, Command, MAX_CHANNEL};

use log::{debug, warn};
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
};

const CHANNELS: usize = MAX_CHANNEL as usize + 1;

/// Where the simulated firmware sends channels on "go home".
pub const HOME_QUS: u16 = 6000;

/// A cloneable handle to one simulated board. All clones share state, so one
/// clone can be handed to the transport while another is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<BoardState>>,
}

#[derive(Debug, Default)]
struct BoardState {
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    targets: [Option<u16>; CHANNELS],
    speeds: [Option<u16>; CHANNELS],
    accels: [Option<u16>; CHANNELS],
    log: Vec<Command>,
    // How many moving-state polls answer "busy" after a new target
    moving_polls: u32,
    busy_for: u32,
    mute: bool,
}

impl BoardState {
    fn execute(&mut self, command: Command) {
        debug!("SimBoard received {:?}", command);
        match command {
            Command::SetTarget { channel, target } => {
                if let Some(slot) = self.targets.get_mut(channel as usize) {
                    *slot = Some(target);
                }
                self.busy_for = self.moving_polls;
            }
            Command::SetSpeed { channel, speed } => {
                if let Some(slot) = self.speeds.get_mut(channel as usize) {
                    *slot = Some(speed);
                }
            }
            Command::SetAccel { channel, accel } => {
                if let Some(slot) = self.accels.get_mut(channel as usize) {
                    *slot = Some(accel);
                }
            }
            Command::GetPosition { channel } => {
                let position = self
                    .targets
                    .get(channel as usize)
                    .copied()
                    .flatten()
                    .unwrap_or(0);
                self.reply(&position.to_le_bytes());
            }
            Command::GetMovingState => {
                let moving = self.busy_for > 0;
                self.busy_for = self.busy_for.saturating_sub(1);
                self.reply(&[moving as u8]);
            }
            Command::GoHome => {
                for slot in self.targets.iter_mut().filter(|t| t.is_some()) {
                    *slot = Some(HOME_QUS);
                }
                self.busy_for = self.moving_polls;
            }
        }
        self.log.push(command);
    }

    fn reply(&mut self, bytes: &[u8]) {
        if !self.mute {
            self.outbox.extend(bytes);
        }
    }

    /// Decodes as many whole frames as the inbox holds.
    fn drain_inbox(&mut self) {
        loop {
            let inbox = std::mem::take(&mut self.inbox);
            match parse_command(&inbox) {
                Ok((rest, command)) => {
                    self.inbox = rest.to_vec();
                    self.execute(command);
                }
                Err(nom::Err::Incomplete(_)) => {
                    self.inbox = inbox;
                    break;
                }
                Err(_) => {
                    warn!("SimBoard dropping stray byte {:#04x}", inbox[0]);
                    self.inbox = inbox[1..].to_vec();
                }
            }
        }
    }
}

impl SimBoard {
    /// A board on which motion finishes instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A board that reports "moving" for `polls` moving-state queries after
    /// every new target.
    pub fn with_moving_polls(polls: u32) -> Self {
        let board = Self::new();
        board.lock().moving_polls = polls;
        board
    }

    // A panic while holding the lock leaves the state as consistent as it
    // ever is, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop answering queries, as if the board had gone quiet.
    pub fn set_mute(&self, mute: bool) {
        self.lock().mute = mute;
    }

    /// Every command decoded so far, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    /// Forget the command log.
    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    /// Every target written to `channel`, in order.
    pub fn targets_for(&self, channel: u8) -> Vec<u16> {
        self.lock()
            .log
            .iter()
            .filter_map(|c| match *c {
                Command::SetTarget { channel: ch, target } if ch == channel => Some(target),
                _ => None,
            })
            .collect()
    }

    /// The last target written to `channel`.
    pub fn target(&self, channel: u8) -> Option<u16> {
        self.lock().targets.get(channel as usize).copied().flatten()
    }

    /// The last speed limit written to `channel`.
    pub fn speed(&self, channel: u8) -> Option<u16> {
        self.lock().speeds.get(channel as usize).copied().flatten()
    }

    /// The last acceleration limit written to `channel`.
    pub fn accel(&self, channel: u8) -> Option<u16> {
        self.lock().accels.get(channel as usize).copied().flatten()
    }
}

impl Write for SimBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.inbox.extend_from_slice(buf);
        state.drain_inbox();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SimBoard {
    /// Behaves like a serial port with a read timeout: an empty outbox is a
    /// timeout, not end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.outbox.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
        }
        let n = buf.len().min(state.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_writes() {
        let mut board = SimBoard::new();
        let frame = Command::SetTarget {
            channel: 7,
            target: 8000,
        }
        .to_bytes();

        board.write_all(&frame[..1]).unwrap();
        assert!(board.commands().is_empty());
        board.write_all(&frame[1..]).unwrap();
        assert_eq!(board.target(7), Some(8000));
        assert_eq!(board.targets_for(7), vec![8000]);
    }

    #[test]
    fn garbage_is_skipped() {
        let mut board = SimBoard::new();
        let mut bytes = vec![0x01, 0x02];
        bytes.extend(Command::GoHome.to_bytes());
        board.write_all(&bytes).unwrap();
        assert_eq!(board.commands(), vec![Command::GoHome]);
    }

    #[test]
    fn position_reply_is_little_endian() {
        let mut board = SimBoard::new();
        board
            .write_all(&Command::SetTarget { channel: 0, target: 0x1234 }.to_bytes())
            .unwrap();
        board
            .write_all(&Command::GetPosition { channel: 0 }.to_bytes())
            .unwrap();

        let mut reply = [0; 2];
        assert_eq!(board.read(&mut reply).unwrap(), 2);
        assert_eq!(reply, [0x34, 0x12]);
        assert_eq!(
            board.read(&mut reply).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
    }

    #[test]
    fn home_moves_known_channels() {
        let mut board = SimBoard::new();
        board
            .write_all(&Command::SetTarget { channel: 2, target: 9000 }.to_bytes())
            .unwrap();
        board.write_all(&Command::GoHome.to_bytes()).unwrap();
        assert_eq!(board.target(2), Some(HOME_QUS));
        assert_eq!(board.target(3), None);
    }
}
