//! SMPTE timecode arithmetic (25 fps, non-drop frame)
//!
//! A [`Timecode`] is a frame count. Provider offsets arrive in milliseconds and
//! are converted with truncation:
//!
//! ```text
//! total_frames = floor(offset_ms * 25 / 1000)
//! ```
//!
//! Truncation is a policy choice: a printed timecode must never land on a frame
//! later than the segment's nominal start, so rounding up is not allowed.
//!
//! Text form is `HH:MM:SS:FF`, every field zero-padded to two digits,
//! `FF` in `00..=24`. Hours are not wrapped at 24.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Fixed frame rate (frames per second)
pub const FRAMES_PER_SECOND: u64 = 25;

const FRAMES_PER_MINUTE: u64 = FRAMES_PER_SECOND * 60;
const FRAMES_PER_HOUR: u64 = FRAMES_PER_MINUTE * 60;

/// Frame-accurate position at 25 fps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timecode {
    frames: u64,
}

impl Timecode {
    /// `00:00:00:00`
    pub const ZERO: Timecode = Timecode { frames: 0 };

    /// Build from an absolute frame count
    pub fn from_frames(frames: u64) -> Self {
        Self { frames }
    }

    /// Convert a millisecond offset, truncating partial frames
    pub fn from_offset_ms(offset_ms: u64) -> Self {
        Self {
            frames: offset_ms * FRAMES_PER_SECOND / 1000,
        }
    }

    /// Total frame count
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Shift by another timecode (e.g. a start timecode taken from the source file)
    pub fn offset_by(self, base: Timecode) -> Self {
        Self {
            frames: self.frames + base.frames,
        }
    }

    /// Split into `(hours, minutes, seconds, frames)`
    pub fn components(&self) -> (u64, u64, u64, u64) {
        let hours = self.frames / FRAMES_PER_HOUR;
        let rem = self.frames % FRAMES_PER_HOUR;
        let minutes = rem / FRAMES_PER_MINUTE;
        let rem = rem % FRAMES_PER_MINUTE;
        (hours, minutes, rem / FRAMES_PER_SECOND, rem % FRAMES_PER_SECOND)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s, ff) = self.components();
        write!(f, "{:02}:{:02}:{:02}:{:02}", h, m, s, ff)
    }
}

impl FromStr for Timecode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        if fields.len() != 4 {
            return Err(Error::Timecode(format!("expected HH:MM:SS:FF, got '{}'", s)));
        }

        let mut values = [0u64; 4];
        for (slot, field) in values.iter_mut().zip(&fields) {
            if field.is_empty() || !field.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::Timecode(format!("non-numeric field in '{}'", s)));
            }
            *slot = field
                .parse()
                .map_err(|_| Error::Timecode(format!("field out of range in '{}'", s)))?;
        }

        let [h, m, sec, ff] = values;
        if m >= 60 || sec >= 60 || ff >= FRAMES_PER_SECOND {
            return Err(Error::Timecode(format!("field out of range in '{}'", s)));
        }

        Ok(Self {
            frames: h * FRAMES_PER_HOUR + m * FRAMES_PER_MINUTE + sec * FRAMES_PER_SECOND + ff,
        })
    }
}

impl Serialize for Timecode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timecode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_offset() {
        assert_eq!(Timecode::from_offset_ms(0).to_string(), "00:00:00:00");
    }

    #[test]
    fn test_one_second() {
        assert_eq!(Timecode::from_offset_ms(1000).to_string(), "00:00:01:00");
    }

    #[test]
    fn test_single_frame_is_40ms() {
        assert_eq!(Timecode::from_offset_ms(1040).to_string(), "00:00:01:01");
    }

    #[test]
    fn test_truncates_partial_frames() {
        // 1079ms is 26.975 frames; must not round up to frame 27
        assert_eq!(Timecode::from_offset_ms(1079).to_string(), "00:00:01:01");
        assert_eq!(Timecode::from_offset_ms(39).to_string(), "00:00:00:00");
    }

    #[test]
    fn test_last_frame_of_second() {
        assert_eq!(Timecode::from_offset_ms(999).to_string(), "00:00:00:24");
    }

    #[test]
    fn test_hours_minutes() {
        let ms = (2 * 3600 + 3 * 60 + 4) * 1000 + 5 * 40;
        assert_eq!(Timecode::from_offset_ms(ms).to_string(), "02:03:04:05");
    }

    #[test]
    fn test_hours_not_wrapped() {
        let tc = Timecode::from_frames(25 * 3600 * 25);
        assert_eq!(tc.to_string(), "25:00:00:00");
    }

    #[test]
    fn test_frame_field_always_below_25() {
        for ms in (0..5000).step_by(7) {
            let (_, _, _, ff) = Timecode::from_offset_ms(ms).components();
            assert!(ff < 25, "frame field {} for {}ms", ff, ms);
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let tc: Timecode = "10:00:00:12".parse().unwrap();
        assert_eq!(tc.frames(), 10 * 3600 * 25 + 12);
        assert_eq!(tc.to_string(), "10:00:00:12");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("10:00:00".parse::<Timecode>().is_err());
        assert!("10:00:00:25".parse::<Timecode>().is_err());
        assert!("10:61:00:00".parse::<Timecode>().is_err());
        assert!("aa:00:00:00".parse::<Timecode>().is_err());
        assert!("10:00:-1:00".parse::<Timecode>().is_err());
    }

    #[test]
    fn test_offset_by_start_timecode() {
        let start: Timecode = "10:00:00:00".parse().unwrap();
        let tc = Timecode::from_offset_ms(1040).offset_by(start);
        assert_eq!(tc.to_string(), "10:00:01:01");
    }

    #[test]
    fn test_serde_uses_text_form() {
        let tc = Timecode::from_offset_ms(1040);
        let json = serde_json::to_string(&tc).unwrap();
        assert_eq!(json, "\"00:00:01:01\"");
        let back: Timecode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tc);
    }
}
