//! Axis naming and image addressing for microscopy datasets.
//!
//! Every dataset array is laid out as position, time, channel, z, y, x.
//! The first four axes address a single y,x frame.
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named dimension of a dataset array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Position,
    Time,
    Channel,
    Z,
    Y,
    X,
}

/// Axis order of every array produced by this crate.
pub const AXIS_ORDER: [Axis; 6] = [
    Axis::Position,
    Axis::Time,
    Axis::Channel,
    Axis::Z,
    Axis::Y,
    Axis::X,
];

impl Axis {
    pub fn name(&self) -> &'static str {
        match self {
            Axis::Position => "position",
            Axis::Time => "time",
            Axis::Channel => "channel",
            Axis::Z => "z",
            Axis::Y => "y",
            Axis::X => "x",
        }
    }

    /// Single upper-case letter used in compact axis strings.
    pub fn letter(&self) -> char {
        match self {
            Axis::Position => 'P',
            Axis::Time => 'T',
            Axis::Channel => 'C',
            Axis::Z => 'Z',
            Axis::Y => 'Y',
            Axis::X => 'X',
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AXIS_ORDER.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compact axis code, e.g. `"PTCZYX"`.
pub fn axis_string(axes: &[Axis]) -> String {
    axes.iter().map(Axis::letter).collect()
}

/// Coordinates of one y,x frame.
///
/// Unset axes are zero, so `ImageCoordinates::default().time(3)` addresses
/// position 0, time 3, channel 0, z 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageCoordinates {
    pub position: u64,
    pub time: u64,
    pub channel: u64,
    pub z: u64,
}

impl ImageCoordinates {
    pub fn new(position: u64, time: u64, channel: u64, z: u64) -> Self {
        Self {
            position,
            time,
            channel,
            z,
        }
    }

    pub fn position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    pub fn time(mut self, time: u64) -> Self {
        self.time = time;
        self
    }

    pub fn channel(mut self, channel: u64) -> Self {
        self.channel = channel;
        self
    }

    pub fn z(mut self, z: u64) -> Self {
        self.z = z;
        self
    }

    /// Value along one of the frame-addressing axes; `None` for y and x.
    pub fn get(&self, axis: Axis) -> Option<u64> {
        match axis {
            Axis::Position => Some(self.position),
            Axis::Time => Some(self.time),
            Axis::Channel => Some(self.channel),
            Axis::Z => Some(self.z),
            Axis::Y | Axis::X => None,
        }
    }

    pub(crate) fn set(&mut self, axis: Axis, value: u64) {
        match axis {
            Axis::Position => self.position = value,
            Axis::Time => self.time = value,
            Axis::Channel => self.channel = value,
            Axis::Z => self.z = value,
            Axis::Y | Axis::X => {}
        }
    }

    /// Chunk grid indices of this frame in a PTCZYX array.
    pub fn chunk_indices(&self) -> [u64; 6] {
        [self.position, self.time, self.channel, self.z, 0, 0]
    }

    /// Key used for per-image entries in the `_Metadata.json` sidecar.
    pub fn metadata_key(&self) -> String {
        format!("{},{},{},{}", self.position, self.time, self.channel, self.z)
    }
}

impl fmt::Display for ImageCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "position {} time {} channel {} z {}",
            self.position, self.time, self.channel, self.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_string_is_ptczyx() {
        assert_eq!(axis_string(&AXIS_ORDER), "PTCZYX");
    }

    #[test]
    fn builder_defaults_to_zero() {
        let c = ImageCoordinates::default().channel(2).z(5);
        assert_eq!(c, ImageCoordinates::new(0, 0, 2, 5));
        assert_eq!(c.chunk_indices(), [0, 0, 2, 5, 0, 0]);
        assert_eq!(c.metadata_key(), "0,0,2,5");
    }

    #[test]
    fn axis_names_round_trip() {
        for axis in AXIS_ORDER {
            assert_eq!(Axis::from_name(axis.name()), Some(axis));
        }
        assert_eq!(Axis::from_name("row"), None);
    }
}
