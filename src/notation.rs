//! Move notation.
//!
//! A sequence is a run of tokens such as `R U R' U'`, `[F2, x]` or `RUR'U'`.
//! Each token is a letter with an optional `'` (counterclockwise) and an
//! optional `2` (twice), in either order. Uppercase face letters turn a single
//! face. Lowercase face letters, or a face letter followed by `w`, turn the
//! face together with the adjacent slice. `M`, `E` and `S` are slices and
//! `x`, `y`, `z` whole-cube rotations, in either case.

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{anychar, char, one_of},
    combinator::{all_consuming, map, map_opt, opt, recognize},
    error::Error,
    sequence::pair,
    Finish, IResult,
};
use rand::Rng;

use std::{fmt, str::FromStr};

/// An outer layer of the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Face {
    /// Up
    U,
    /// Down
    D,
    /// Left
    L,
    /// Right
    R,
    /// Front
    F,
    /// Back
    B,
}

impl Face {
    /// All six faces
    pub const ALL: [Face; 6] = [Face::U, Face::D, Face::L, Face::R, Face::F, Face::B];

    fn from_upper(c: char) -> Option<Self> {
        match c {
            'U' => Some(Face::U),
            'D' => Some(Face::D),
            'L' => Some(Face::L),
            'R' => Some(Face::R),
            'F' => Some(Face::F),
            'B' => Some(Face::B),
            _ => None,
        }
    }

    fn letter(self) -> char {
        match self {
            Face::U => 'U',
            Face::D => 'D',
            Face::L => 'L',
            Face::R => 'R',
            Face::F => 'F',
            Face::B => 'B',
        }
    }
}

/// A middle layer of the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    /// Between L and R, turns like L
    Middle,
    /// Between U and D, turns like D
    Equator,
    /// Between F and B, turns like F
    Standing,
}

/// A whole-cube rotation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Turns like R
    X,
    /// Turns like U
    Y,
    /// Turns like F
    Z,
}

/// What a move turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    /// A single outer layer
    Face(Face),
    /// An outer layer together with its neighbouring slice
    Wide(Face),
    /// A middle layer only
    Slice(Slice),
    /// The whole cube
    Rotate(Axis),
}

impl MoveKind {
    fn from_letter(c: char) -> Option<Self> {
        if let Some(face) = Face::from_upper(c) {
            return Some(MoveKind::Face(face));
        }
        if let Some(face) = Face::from_upper(c.to_ascii_uppercase()) {
            return Some(MoveKind::Wide(face));
        }
        match c.to_ascii_uppercase() {
            'M' => Some(MoveKind::Slice(Slice::Middle)),
            'E' => Some(MoveKind::Slice(Slice::Equator)),
            'S' => Some(MoveKind::Slice(Slice::Standing)),
            'X' => Some(MoveKind::Rotate(Axis::X)),
            'Y' => Some(MoveKind::Rotate(Axis::Y)),
            'Z' => Some(MoveKind::Rotate(Axis::Z)),
            _ => None,
        }
    }
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            MoveKind::Face(face) => face.letter(),
            MoveKind::Wide(face) => face.letter().to_ascii_lowercase(),
            MoveKind::Slice(Slice::Middle) => 'M',
            MoveKind::Slice(Slice::Equator) => 'E',
            MoveKind::Slice(Slice::Standing) => 'S',
            MoveKind::Rotate(Axis::X) => 'x',
            MoveKind::Rotate(Axis::Y) => 'y',
            MoveKind::Rotate(Axis::Z) => 'z',
        };
        write!(f, "{letter}")
    }
}

/// One token of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    /// What turns
    pub kind: MoveKind,
    /// Direction, as seen looking at the face
    pub clockwise: bool,
    /// Whether the quarter turn is applied twice
    pub double: bool,
}

impl Move {
    /// A single clockwise quarter turn.
    pub fn new(kind: MoveKind) -> Self {
        Move {
            kind,
            clockwise: true,
            double: false,
        }
    }

    /// This move turning counterclockwise.
    pub fn prime(self) -> Self {
        Move {
            clockwise: false,
            ..self
        }
    }

    /// This move applied twice.
    pub fn twice(self) -> Self {
        Move {
            double: true,
            ..self
        }
    }

    /// The move that undoes this one.
    pub fn inverse(self) -> Self {
        Move {
            clockwise: !self.clockwise,
            ..self
        }
    }

    /// How many quarter turns to execute.
    pub fn repetitions(&self) -> usize {
        if self.double {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.double {
            write!(f, "2")?;
        }
        if !self.clockwise {
            write!(f, "'")?;
        }
        Ok(())
    }
}

impl FromStr for Move {
    type Err = Error<String>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(parse_move)(s.trim()).finish() {
            Ok((_remaining, mv)) => Ok(mv),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || ",[]()".contains(c)
}

fn is_suffix(c: char) -> bool {
    "'’2w".contains(c)
}

fn parse_separators(s: &str) -> IResult<&str, &str> {
    take_while1(is_separator)(s)
}

fn parse_kind(s: &str) -> IResult<&str, MoveKind> {
    let (rest, kind) = map_opt(anychar, MoveKind::from_letter)(s)?;
    match kind {
        MoveKind::Face(face) | MoveKind::Wide(face) => map(opt(char('w')), |w| {
            if w.is_some() {
                MoveKind::Wide(face)
            } else {
                kind
            }
        })(rest),
        _ => Ok((rest, kind)),
    }
}

/// `'` and `2`, each at most once, in any order.
fn parse_suffix(s: &str) -> IResult<&str, (bool, bool)> {
    let (rest, first) = opt(one_of("'’2"))(s)?;
    let (rest, second) = match first {
        Some('2') => opt(one_of("'’"))(rest)?,
        Some(_) => opt(char('2'))(rest)?,
        None => (rest, None),
    };
    let prime = [first, second]
        .iter()
        .any(|c| matches!(c, Some('\'') | Some('’')));
    let double = first == Some('2') || second == Some('2');
    Ok((rest, (prime, double)))
}

fn parse_move(s: &str) -> IResult<&str, Move> {
    map(pair(parse_kind, parse_suffix), |(kind, (prime, double))| {
        Move {
            kind,
            clockwise: !prime,
            double,
        }
    })(s)
}

/// A character we cannot make sense of, plus whatever suffix it carries.
fn parse_junk(s: &str) -> IResult<&str, &str> {
    recognize(pair(anychar, take_while(is_suffix)))(s)
}

/// The result of [`parse_sequence`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    /// Recognised moves, in order
    pub moves: Vec<Move>,
    /// Tokens that were skipped
    pub unknown: Vec<String>,
}

/// Parses a whole sequence. Unrecognised tokens are collected, not fatal.
pub fn parse_sequence(text: &str) -> Parsed {
    let mut parsed = Parsed::default();
    let mut input = text;
    loop {
        if let Ok((rest, _)) = parse_separators(input) {
            input = rest;
        }
        if input.is_empty() {
            break;
        }
        if let Ok((rest, mv)) = parse_move(input) {
            parsed.moves.push(mv);
            input = rest;
            continue;
        }
        match parse_junk(input) {
            Ok((rest, junk)) => {
                parsed.unknown.push(junk.to_owned());
                input = rest;
            }
            Err(_) => break,
        }
    }
    parsed
}

/// Formats moves the way [`parse_sequence`] reads them back.
pub fn format_sequence(moves: &[Move]) -> String {
    moves
        .iter()
        .map(Move::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `len` random face turns. A face is never turned twice in a row, since
/// that would collapse into a single move.
pub fn scramble(rng: &mut impl Rng, len: usize) -> Vec<Move> {
    let mut moves: Vec<Move> = Vec::with_capacity(len);
    for _ in 0..len {
        let previous = moves.last().map(|m| m.kind);
        let candidates: Vec<Face> = Face::ALL
            .into_iter()
            .filter(|f| Some(MoveKind::Face(*f)) != previous)
            .collect();
        let face = candidates[rng.gen_range(0..candidates.len())];
        let mv = Move::new(MoveKind::Face(face));
        moves.push(match rng.gen_range(0..3) {
            0 => mv,
            1 => mv.prime(),
            _ => mv.twice(),
        });
    }
    moves
}
