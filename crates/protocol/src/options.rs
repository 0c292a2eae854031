//! Mirroring session options and their command-line rendering.
//!
//! Every optional field that is unset is simply left off the argument
//! vector, so the mirroring server falls back to its own default.

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::error::{ProtocolError, Result};

/// Device selector flag, followed by the device identifier.
pub const FLAG_SERIAL: &str = "-s";
/// Maximum dimension flag, followed by the size in pixels.
pub const FLAG_MAX_SIZE: &str = "-m";
/// Video bit rate flag, followed by `<N>M`.
pub const FLAG_BIT_RATE: &str = "-b";
/// Crop flag, followed by `width:height:x:y`.
pub const FLAG_CROP: &str = "--crop";
/// Turns the device screen off while mirroring.
pub const FLAG_TURN_SCREEN_OFF: &str = "--turn-screen-off";
/// Keeps the device awake while mirroring.
pub const FLAG_STAY_AWAKE: &str = "--stay-awake";

/// Immutable configuration snapshot for one mirroring session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Limit on the larger video dimension, in pixels.
    pub max_size: Option<u32>,

    /// Video bit rate in Mbps.
    pub bit_rate_mbps: Option<u32>,

    /// Crop region as `width:height:x:y`.
    pub crop: Option<String>,

    /// Turn the device screen off once mirroring starts.
    pub turn_screen_off: bool,

    /// Prevent the device from sleeping while mirroring.
    pub stay_awake: bool,
}

impl SessionOptions {
    /// Checks that every set field holds a value the server accepts.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == Some(0) {
            return Err(ProtocolError::ZeroResolution);
        }
        if self.bit_rate_mbps == Some(0) {
            return Err(ProtocolError::ZeroBitRate);
        }
        if let Some(crop) = &self.crop {
            if !is_crop_region(crop) {
                return Err(ProtocolError::InvalidCrop(crop.clone()));
            }
        }
        Ok(())
    }

    /// Renders the server argument vector for `device_id`.
    ///
    /// The output only depends on `self` and `device_id`: the device
    /// selector always comes first, then one flag per set field in a
    /// fixed order.
    pub fn to_args(&self, device_id: &DeviceId) -> Vec<String> {
        let mut args = vec![FLAG_SERIAL.to_string(), device_id.to_string()];

        if let Some(size) = self.max_size {
            args.push(FLAG_MAX_SIZE.to_string());
            args.push(size.to_string());
        }
        if let Some(rate) = self.bit_rate_mbps {
            args.push(FLAG_BIT_RATE.to_string());
            args.push(format_bit_rate(rate));
        }
        if let Some(crop) = &self.crop {
            args.push(FLAG_CROP.to_string());
            args.push(crop.clone());
        }
        if self.turn_screen_off {
            args.push(FLAG_TURN_SCREEN_OFF.to_string());
        }
        if self.stay_awake {
            args.push(FLAG_STAY_AWAKE.to_string());
        }

        args
    }

    /// Returns a copy where fields unset in `self` are taken from `fallback`.
    ///
    /// Boolean flags are combined with a logical or.
    pub fn or(&self, fallback: &SessionOptions) -> SessionOptions {
        SessionOptions {
            max_size: self.max_size.or(fallback.max_size),
            bit_rate_mbps: self.bit_rate_mbps.or(fallback.bit_rate_mbps),
            crop: self.crop.clone().or_else(|| fallback.crop.clone()),
            turn_screen_off: self.turn_screen_off || fallback.turn_screen_off,
            stay_awake: self.stay_awake || fallback.stay_awake,
        }
    }
}

/// Formats a bit rate the way the server expects it (`16` -> `16M`).
pub fn format_bit_rate(mbps: u32) -> String {
    format!("{mbps}M")
}

fn is_crop_region(crop: &str) -> bool {
    let parts: Vec<&str> = crop.split(':').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}
