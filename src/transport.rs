//! The [`Maestro`] transport. It owns the byte link to one servo controller
//! board exclusively and turns the calls below into compact-protocol frames.
//!
//! Writes are fire-and-forget, the board never acknowledges them. The only
//! replies are to position and moving-state queries, and a reply that does
//! not arrive in time is reported as "unknown" rather than as an error.

use crate::protocol::{Command, MAX_CHANNEL, MAX_TARGET};
use crate::units::RangePolicy;

use log::debug;
use serial2::SerialPort;
use std::{
    fmt,
    io::{self, ErrorKind, Read, Write},
    path::Path,
    sync::Mutex,
    time::Duration,
};

/// How long a single read may block before the reply counts as missing.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default interval between two is-moving polls in [`Maestro::wait_all`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Anything we can talk the compact protocol over.
pub trait Link: Read + Write + Send {}

impl<T: Read + Write + Send> Link for T {}

/// Everything that can go wrong while talking to the board.
#[derive(Debug)]
pub enum TransportError {
    /// Channel outside `0..=23`
    ChannelOutOfRange(u8),
    /// Target outside `0..=16383`
    TargetOutOfRange(u16),
    /// Speed or acceleration value does not fit into fourteen bits
    ValueOutOfRange(u16),
    /// The serial link failed. There is no recovery, restart the process.
    Io(io::Error),
    /// A previous user of the link panicked mid-command
    Poisoned,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::ChannelOutOfRange(channel) => {
                write!(f, "channel {channel} must be 0-{MAX_CHANNEL}")
            }
            TransportError::TargetOutOfRange(target) => {
                write!(f, "target {target} must be 0-{MAX_TARGET} (14-bit)")
            }
            TransportError::ValueOutOfRange(value) => {
                write!(f, "value {value} must be 0-{MAX_TARGET} (14-bit)")
            }
            TransportError::Io(error) => write!(f, "io error: {}", error),
            TransportError::Poisoned => write!(f, "serial link poisoned"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A connection to one servo controller board.
///
/// Motion commands only need `&self`; the link sits behind a mutex so that
/// every frame goes out whole, but the board itself has a single command
/// stream and choreography is expected to come from one thread.
pub struct Maestro {
    link: Mutex<Box<dyn Link>>,
    poll_interval: Duration,
}

impl fmt::Debug for Maestro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Maestro")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Maestro {
    /// Wraps an already opened link.
    pub fn new(link: impl Link + 'static, poll_interval: Duration) -> Self {
        Maestro {
            link: Mutex::new(Box::new(link)),
            poll_interval,
        }
    }

    /// Opens the board's command port. The USB command port ignores the baud
    /// rate, but it still has to be a valid one.
    pub fn open(
        path: impl AsRef<Path>,
        baud: u32,
        poll_interval: Duration,
    ) -> Result<Self, TransportError> {
        debug!("Opening {} at {} baud", path.as_ref().display(), baud);
        let mut port = SerialPort::open(path, baud)?;
        port.set_read_timeout(READ_TIMEOUT)?;
        Ok(Self::new(port, poll_interval))
    }

    /// The interval [`Maestro::wait_all`] sleeps between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn send(&self, command: Command) -> Result<(), TransportError> {
        let mut link = self.link.lock().map_err(|_| TransportError::Poisoned)?;
        link.write_all(&command.to_bytes())?;
        link.flush()?;
        Ok(())
    }

    /// Sends a query and reads as much of the reply as arrives before the
    /// read times out. Returns the number of bytes read.
    fn query(&self, command: Command, reply: &mut [u8]) -> Result<usize, TransportError> {
        let mut link = self.link.lock().map_err(|_| TransportError::Poisoned)?;
        link.write_all(&command.to_bytes())?;
        link.flush()?;
        Ok(read_reply(&mut **link, reply)?)
    }

    /// Moves `channel` towards `target` quarter-microseconds (1500 µs is 6000).
    pub fn set_target(&self, channel: u8, target: u16) -> Result<(), TransportError> {
        debug!("set_target(channel={}, target={})", channel, target);
        check_channel(channel)?;
        let target = RangePolicy::Reject
            .apply(target, 0, MAX_TARGET)
            .ok_or(TransportError::TargetOutOfRange(target))?;
        self.send(Command::SetTarget { channel, target })
    }

    /// Limits speed, in quarter-microseconds per 10 ms. 0 is unlimited.
    pub fn set_speed(&self, channel: u8, speed: u16) -> Result<(), TransportError> {
        debug!("set_speed(channel={}, speed={})", channel, speed);
        check_channel(channel)?;
        check_value(speed)?;
        self.send(Command::SetSpeed { channel, speed })
    }

    /// Limits acceleration, in quarter-microseconds per (10 ms)^2. 0 is unlimited.
    pub fn set_accel(&self, channel: u8, accel: u16) -> Result<(), TransportError> {
        debug!("set_accel(channel={}, accel={})", channel, accel);
        check_channel(channel)?;
        check_value(accel)?;
        self.send(Command::SetAccel { channel, accel })
    }

    /// Sets both motion limits of a channel at once.
    pub fn set_motion_limits(
        &self,
        channel: u8,
        speed: u16,
        accel: u16,
    ) -> Result<(), TransportError> {
        self.set_speed(channel, speed)?;
        self.set_accel(channel, accel)
    }

    /// Reads back the position of `channel`. `None` means the board did not
    /// answer in time, which callers should treat as "still at the last
    /// commanded target" and never as zero.
    pub fn query_position(&self, channel: u8) -> Result<Option<u16>, TransportError> {
        debug!("query_position(channel={})", channel);
        check_channel(channel)?;
        let mut reply = [0; 2];
        let n = self.query(Command::GetPosition { channel }, &mut reply)?;
        if n != reply.len() {
            return Ok(None);
        }
        Ok(Some(u16::from_le_bytes(reply)))
    }

    /// True while any channel on the board is still moving towards its
    /// target. There is no way to ask about a single channel. A missing
    /// reply reads as "not moving".
    pub fn is_moving(&self) -> Result<bool, TransportError> {
        let mut reply = [0; 1];
        let n = self.query(Command::GetMovingState, &mut reply)?;
        Ok(n == 1 && reply[0] != 0)
    }

    /// Blocks until the whole board is idle, polling every
    /// [`Maestro::poll_interval`]. This is a board-wide barrier: it returns
    /// only once every channel has arrived.
    pub fn wait_all(&self) -> Result<(), TransportError> {
        debug!("wait_all()");
        while self.is_moving()? {
            spin_sleep::sleep(self.poll_interval);
        }
        Ok(())
    }

    /// Drives every channel to its firmware home position. Only meant for
    /// parking, the software targets are left untouched.
    pub fn go_home(&self) -> Result<(), TransportError> {
        debug!("go_home()");
        self.send(Command::GoHome)
    }
}

// Refused before anything is written
fn check_channel(channel: u8) -> Result<(), TransportError> {
    RangePolicy::Reject
        .apply(channel, 0, MAX_CHANNEL)
        .map(|_| ())
        .ok_or(TransportError::ChannelOutOfRange(channel))
}

fn check_value(value: u16) -> Result<(), TransportError> {
    RangePolicy::Reject
        .apply(value, 0, MAX_TARGET)
        .map(|_| ())
        .ok_or(TransportError::ValueOutOfRange(value))
}

/// Fills `buf` until it is full, the link reports end of stream, or a read
/// times out.
fn read_reply(link: &mut dyn Link, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match link.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
