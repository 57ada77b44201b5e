//! Packed RGB colours.
//!
//! Colours are written as `[r, g, b]` arrays and accepted either in that form
//! or as a single packed integer (`0xRRGGBB`, optionally with alpha in the high
//! byte, as some writers emit signed ARGB values).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use tracing::error;

/// An opaque RGB colour packed as `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(u32);

impl Color {
    /// Packs three channels into a colour.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Builds a colour from a packed integer, discarding any alpha byte.
    #[must_use]
    pub const fn from_packed(packed: i64) -> Self {
        Self((packed as u32) & 0x00FF_FFFF)
    }

    /// Returns the packed `0xRRGGBB` value.
    #[must_use]
    pub const fn packed(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn r(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[must_use]
    pub const fn g(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[must_use]
    pub const fn b(&self) -> u8 {
        self.0 as u8
    }

    /// Decodes a colour from either representation.
    ///
    /// Returns `None` (and logs) for anything else.
    pub fn from_json(value: &Value) -> Option<Self> {
        match Self::decode(value) {
            Ok(color) => Some(color),
            Err(reason) => {
                error!("Unexpected colour value {}: {}", value, reason);
                None
            }
        }
    }

    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::from_packed)
                .ok_or_else(|| "packed colour is not an integer".to_string()),
            Value::Array(channels) => {
                if channels.len() != 3 {
                    return Err(format!("expected 3 channels, got {}", channels.len()));
                }
                let mut rgb = [0u8; 3];
                for (slot, channel) in rgb.iter_mut().zip(channels) {
                    *slot = channel
                        .as_u64()
                        .and_then(|c| u8::try_from(c).ok())
                        .ok_or_else(|| format!("channel {channel} is not in 0..=255"))?;
                }
                Ok(Self::rgb(rgb[0], rgb[1], rgb[2]))
            }
            _ => Err("expected an array or a number".to_string()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.r(), self.g(), self.b()].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(&value).map_err(D::Error::custom)
    }
}
