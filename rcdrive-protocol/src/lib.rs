//! Drive command protocol for the RC car serial link
//!
//! The vehicle understands one byte per command: `W`/`S`/`A`/`D` move,
//! `X` stops, and the digits `0`-`9` select a speed step. This library maps
//! operator input onto that alphabet and back onto the wire.

use serde::{Deserialize, Serialize};

/// Direction of travel reported to clients (`"FORWARD"`, `"STOP"`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    #[default]
    Stop,
}

impl Direction {
    /// All directions, in keypad order
    pub const ALL: [Self; 5] = [
        Self::Forward,
        Self::Backward,
        Self::Left,
        Self::Right,
        Self::Stop,
    ];

    /// Upper-case name as shown to clients
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Stop => "STOP",
        }
    }

    /// Byte the vehicle expects for this direction
    pub const fn wire_byte(self) -> u8 {
        match self {
            Self::Forward => b'W',
            Self::Backward => b'S',
            Self::Left => b'A',
            Self::Right => b'D',
            Self::Stop => b'X',
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speed step, always within `0..=9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Speed(u8);

impl Speed {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(9);

    /// Create a speed step, or `None` if `value` is above 9
    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Create a speed step, clamping `value` to the valid range
    pub const fn saturating(value: u8) -> Self {
        if value > Self::MAX.0 {
            Self::MAX
        } else {
            Self(value)
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// ASCII digit sent on the wire
    pub const fn wire_byte(self) -> u8 {
        b'0' + self.0
    }
}

impl Default for Speed {
    /// The vehicle boots at speed step 7
    fn default() -> Self {
        Self(7)
    }
}

impl std::fmt::Display for Speed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected speed value (above 9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSpeed(pub u8);

impl std::fmt::Display for InvalidSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "speed {} is outside 0-{}", self.0, Speed::MAX.0)
    }
}

impl std::error::Error for InvalidSpeed {}

impl TryFrom<u8> for Speed {
    type Error = InvalidSpeed;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidSpeed(value))
    }
}

impl From<Speed> for u8 {
    fn from(speed: Speed) -> Self {
        speed.0
    }
}

/// A normalized drive command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Change direction (or stop)
    Drive(Direction),
    /// Change speed step
    Speed(Speed),
}

impl Command {
    pub const FORWARD: Self = Self::Drive(Direction::Forward);
    pub const BACKWARD: Self = Self::Drive(Direction::Backward);
    pub const LEFT: Self = Self::Drive(Direction::Left);
    pub const RIGHT: Self = Self::Drive(Direction::Right);
    pub const STOP: Self = Self::Drive(Direction::Stop);

    /// Parse a raw query value such as the `c` parameter of `/cmd`
    ///
    /// Only a value of exactly one character can carry a command; anything
    /// else (empty, multi-character, unknown character) yields `None`.
    pub fn from_query(value: &str) -> Option<Self> {
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => normalize(ch),
            _ => None,
        }
    }

    /// Single byte transmitted to the vehicle
    ///
    /// Directions always go out in upper case regardless of how they were typed.
    pub const fn wire_byte(self) -> u8 {
        match self {
            Self::Drive(direction) => direction.wire_byte(),
            Self::Speed(speed) => speed.wire_byte(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drive(direction) => write!(f, "{direction}"),
            Self::Speed(speed) => write!(f, "SPEED({speed})"),
        }
    }
}

/// Map one input character to a command
///
/// Direction letters are case-insensitive; digits select a speed step.
/// Every other character yields `None` and must be treated as a no-op.
pub fn normalize(ch: char) -> Option<Command> {
    match ch {
        'W' | 'w' => Some(Command::FORWARD),
        'S' | 's' => Some(Command::BACKWARD),
        'A' | 'a' => Some(Command::LEFT),
        'D' | 'd' => Some(Command::RIGHT),
        'X' | 'x' => Some(Command::STOP),
        '0'..='9' => {
            // ASCII digit, so the subtraction cannot underflow
            let value = ch as u8 - b'0';
            Speed::new(value).map(Command::Speed)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_directions() {
        let cases = [
            ('W', Command::FORWARD),
            ('w', Command::FORWARD),
            ('S', Command::BACKWARD),
            ('s', Command::BACKWARD),
            ('A', Command::LEFT),
            ('a', Command::LEFT),
            ('D', Command::RIGHT),
            ('d', Command::RIGHT),
            ('X', Command::STOP),
            ('x', Command::STOP),
        ];
        for (ch, expected) in cases {
            assert_eq!(normalize(ch), Some(expected), "input {ch:?}");
        }
    }

    #[test]
    fn test_normalize_digits() {
        for (n, ch) in ('0'..='9').enumerate() {
            let n = u8::try_from(n).unwrap();
            assert_eq!(normalize(ch), Some(Command::Speed(Speed::new(n).unwrap())));
        }
    }

    #[test]
    fn test_normalize_rejects_everything_else() {
        let accepted = "WwSsAaDdXx0123456789";
        for code in 0u32..0x250 {
            let Some(ch) = char::from_u32(code) else {
                continue;
            };
            if accepted.contains(ch) {
                continue;
            }
            assert_eq!(normalize(ch), None, "input {ch:?}");
        }
        // Full-width digits and letters are not ASCII
        assert_eq!(normalize('５'), None);
        assert_eq!(normalize('Ｗ'), None);
    }

    #[test]
    fn test_from_query() {
        assert_eq!(Command::from_query("w"), Some(Command::FORWARD));
        assert_eq!(Command::from_query("5"), Some(Command::Speed(Speed::new(5).unwrap())));
        assert_eq!(Command::from_query(""), None);
        assert_eq!(Command::from_query("ww"), None);
        assert_eq!(Command::from_query("5abc"), None);
        assert_eq!(Command::from_query("q"), None);
        assert_eq!(Command::from_query(" "), None);
    }

    #[test]
    fn test_wire_bytes() {
        assert_eq!(normalize('w').unwrap().wire_byte(), b'W');
        assert_eq!(normalize('S').unwrap().wire_byte(), b'S');
        assert_eq!(normalize('a').unwrap().wire_byte(), b'A');
        assert_eq!(normalize('d').unwrap().wire_byte(), b'D');
        assert_eq!(normalize('x').unwrap().wire_byte(), b'X');
        assert_eq!(normalize('0').unwrap().wire_byte(), b'0');
        assert_eq!(normalize('9').unwrap().wire_byte(), b'9');
    }

    #[test]
    fn test_speed_bounds() {
        assert_eq!(Speed::new(9), Some(Speed::MAX));
        assert_eq!(Speed::new(10), None);
        assert_eq!(Speed::saturating(200), Speed::MAX);
        assert_eq!(Speed::default().get(), 7);
        assert_eq!(Speed::try_from(12), Err(InvalidSpeed(12)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Command::LEFT.to_string(), "LEFT");
        assert_eq!(Command::Speed(Speed::MIN).to_string(), "SPEED(0)");
        assert_eq!(Direction::Backward.to_string(), "BACKWARD");
    }
}
