//! The servo controller's compact protocol. Every command starts with a
//! command byte that has its high bit set, followed by zero or more data
//! bytes that never do. Fourteen-bit values travel as two seven-bit halves,
//! low half first:
//!
//! ```text
//! 0x84, channel, target & 0x7F, (target >> 7) & 0x7F
//! ```
//!
//! The encoder lives on [`Command`], and the decoder ([`parse_command`]) is a
//! streaming [nom] parser so that partially received frames can be told apart
//! from garbage.

use nom::{
    branch::alt,
    combinator::{map, verify},
    number::streaming::u8 as byte,
    sequence::{pair, preceded},
    IResult,
};

/// Set the target of one channel, in quarter-microseconds.
pub const SET_TARGET: u8 = 0x84;
/// Set the speed limit of one channel. 0 means unlimited.
pub const SET_SPEED: u8 = 0x87;
/// Set the acceleration limit of one channel. 0 means unlimited.
pub const SET_ACCEL: u8 = 0x89;
/// Ask for the position of one channel; the board answers with two bytes.
pub const GET_POSITION: u8 = 0x90;
/// Ask whether any channel is still moving; the board answers with one byte.
pub const GET_MOVING_STATE: u8 = 0x93;
/// Drive every channel to its firmware-configured home position.
pub const GO_HOME: u8 = 0xA2;

/// Highest channel number on the largest board.
pub const MAX_CHANNEL: u8 = 23;
/// Largest value that fits into a seven-bit pair.
pub const MAX_TARGET: u16 = 0x3FFF;

/// One request to the controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move `channel` towards `target` quarter-microseconds
    SetTarget {
        /// Channel number
        channel: u8,
        /// Pulse width in quarter-microseconds
        target: u16,
    },
    /// Limit how fast `channel` may change its pulse width
    SetSpeed {
        /// Channel number
        channel: u8,
        /// Quarter-microseconds per 10 ms
        speed: u16,
    },
    /// Limit how fast the speed of `channel` may change
    SetAccel {
        /// Channel number
        channel: u8,
        /// Quarter-microseconds per (10 ms)^2
        accel: u16,
    },
    /// Read back the current pulse width of `channel`
    GetPosition {
        /// Channel number
        channel: u8,
    },
    /// Board-wide moving query, there is no per-channel variant
    GetMovingState,
    /// Send everything home, bypassing software targets
    GoHome,
}

impl Command {
    /// The command byte that opens this frame.
    pub fn opcode(&self) -> u8 {
        match self {
            Command::SetTarget { .. } => SET_TARGET,
            Command::SetSpeed { .. } => SET_SPEED,
            Command::SetAccel { .. } => SET_ACCEL,
            Command::GetPosition { .. } => GET_POSITION,
            Command::GetMovingState => GET_MOVING_STATE,
            Command::GoHome => GO_HOME,
        }
    }

    /// Encodes the frame. Values are masked to fourteen bits and channels to
    /// seven; range checking is the transport's job.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::SetTarget { channel, target: value }
            | Command::SetSpeed { channel, speed: value }
            | Command::SetAccel { channel, accel: value } => {
                let (lo, hi) = split_seven_bits(value);
                vec![self.opcode(), channel & 0x7F, lo, hi]
            }
            Command::GetPosition { channel } => vec![self.opcode(), channel & 0x7F],
            Command::GetMovingState | Command::GoHome => vec![self.opcode()],
        }
    }

    /// How many bytes the board sends back for this command.
    pub fn reply_len(&self) -> usize {
        match self {
            Command::GetPosition { .. } => 2,
            Command::GetMovingState => 1,
            _ => 0,
        }
    }
}

/// Splits a value into its low and high seven-bit halves.
pub fn split_seven_bits(value: u16) -> (u8, u8) {
    ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
}

/// Joins a low and a high seven-bit half back together.
pub fn join_seven_bits(lo: u8, hi: u8) -> u16 {
    (lo as u16 & 0x7F) | ((hi as u16 & 0x7F) << 7)
}

fn opcode(code: u8) -> impl Fn(&[u8]) -> IResult<&[u8], u8> {
    move |input| verify(byte, |b: &u8| *b == code)(input)
}

fn data_byte(input: &[u8]) -> IResult<&[u8], u8> {
    verify(byte, |b: &u8| b & 0x80 == 0)(input)
}

fn seven_bit_pair(input: &[u8]) -> IResult<&[u8], u16> {
    map(pair(data_byte, data_byte), |(lo, hi)| join_seven_bits(lo, hi))(input)
}

fn channel_and_value(code: u8) -> impl Fn(&[u8]) -> IResult<&[u8], (u8, u16)> {
    move |input| preceded(opcode(code), pair(data_byte, seven_bit_pair))(input)
}

/// Decodes one command from the front of `input`.
///
/// Returns `nom::Err::Incomplete` when `input` holds the beginning of a valid
/// frame, and `nom::Err::Error` when the first byte cannot start one.
pub fn parse_command(input: &[u8]) -> IResult<&[u8], Command> {
    alt((
        map(channel_and_value(SET_TARGET), |(channel, target)| {
            Command::SetTarget { channel, target }
        }),
        map(channel_and_value(SET_SPEED), |(channel, speed)| {
            Command::SetSpeed { channel, speed }
        }),
        map(channel_and_value(SET_ACCEL), |(channel, accel)| {
            Command::SetAccel { channel, accel }
        }),
        map(preceded(opcode(GET_POSITION), data_byte), |channel| {
            Command::GetPosition { channel }
        }),
        map(opcode(GET_MOVING_STATE), |_| Command::GetMovingState),
        map(opcode(GO_HOME), |_| Command::GoHome),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_target_frame_layout() {
        let frame = Command::SetTarget {
            channel: 2,
            target: 6000,
        }
        .to_bytes();

        // 6000 = 46 * 128 + 112
        assert_eq!(frame, vec![0x84, 0x02, 0x70, 0x2E]);
    }

    #[test]
    fn frame_shapes() {
        assert_eq!(Command::SetSpeed { channel: 1, speed: 75 }.to_bytes(), vec![0x87, 1, 75, 0]);
        assert_eq!(Command::SetAccel { channel: 1, accel: 0 }.to_bytes(), vec![0x89, 1, 0, 0]);
        assert_eq!(Command::GetPosition { channel: 5 }.to_bytes(), vec![0x90, 5]);
        assert_eq!(Command::GetMovingState.to_bytes(), vec![0x93]);
        assert_eq!(Command::GoHome.to_bytes(), vec![0xA2]);
    }

    #[test]
    fn fourteen_bit_extremes() {
        assert_eq!(split_seven_bits(MAX_TARGET), (0x7F, 0x7F));
        assert_eq!(join_seven_bits(0x7F, 0x7F), MAX_TARGET);
        assert_eq!(split_seven_bits(128), (0, 1));
    }

    #[test]
    fn decode_back_to_back_frames() {
        let mut bytes = Command::SetTarget { channel: 0, target: 9000 }.to_bytes();
        bytes.extend(Command::GetMovingState.to_bytes());

        let (rest, first) = parse_command(&bytes).unwrap();
        assert_eq!(first, Command::SetTarget { channel: 0, target: 9000 });
        let (rest, second) = parse_command(rest).unwrap();
        assert_eq!(second, Command::GetMovingState);
        assert!(rest.is_empty());
    }

    #[test]
    fn partial_frame_is_incomplete() {
        let res = parse_command(&[SET_TARGET, 3, 0x10]);
        assert!(matches!(res, Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn data_byte_with_high_bit_is_rejected() {
        let res = parse_command(&[SET_TARGET, 0x85, 0, 0]);
        assert!(matches!(res, Err(nom::Err::Error(_))));

        let res = parse_command(&[0x42]);
        assert!(matches!(res, Err(nom::Err::Error(_))));
    }
}
