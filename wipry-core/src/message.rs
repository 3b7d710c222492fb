//! Accessory control messages and the value types they carry.
//!
//! Uses proper enums with `TryFrom`, no panics on unknown values.

use std::fmt;

use crate::error::WipryError;
use crate::flags::DataTypeSupport;

// ── DataType ─────────────────────────────────────────────────────

/// The kinds of RSSI sweep the accessory can stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// RSSI data in the 2.4 GHz band.
    Rssi2_4Ghz = 0,
    /// RSSI data in the 5 GHz band.
    Rssi5Ghz = 1,
    /// RSSI data in the 6E band.
    Rssi6E = 2,
    /// Interleaved 2.4 GHz and 5 GHz sweep. Reserved: the framing of
    /// the non-contiguous spectrum is not defined, so it cannot be
    /// streamed.
    RssiDual25 = 3,
}

impl DataType {
    /// All data types, in discriminant order.
    pub const ALL: [DataType; 4] = [
        DataType::Rssi2_4Ghz,
        DataType::Rssi5Ghz,
        DataType::Rssi6E,
        DataType::RssiDual25,
    ];

    /// Number of samples in every frame of this type, or `None` for
    /// reserved types.
    pub fn resolution(self) -> Option<usize> {
        match self {
            DataType::Rssi2_4Ghz => Some(1000),
            DataType::Rssi5Ghz => Some(2000),
            DataType::Rssi6E => Some(2400),
            DataType::RssiDual25 => None,
        }
    }

    /// The band whose boundary maps sample indices to frequencies.
    pub fn band(self) -> Option<Band> {
        match self {
            DataType::Rssi2_4Ghz => Some(Band::Ghz2_4),
            DataType::Rssi5Ghz => Some(Band::Ghz5),
            DataType::Rssi6E => Some(Band::Ghz6E),
            DataType::RssiDual25 => None,
        }
    }

    /// The capability bit advertised for this type.
    pub fn support_flag(self) -> DataTypeSupport {
        match self {
            DataType::Rssi2_4Ghz => DataTypeSupport::RSSI_2_4GHZ,
            DataType::Rssi5Ghz => DataTypeSupport::RSSI_5GHZ,
            DataType::Rssi6E => DataTypeSupport::RSSI_6E,
            DataType::RssiDual25 => DataTypeSupport::RSSI_DUAL25,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = WipryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataType::Rssi2_4Ghz),
            1 => Ok(DataType::Rssi5Ghz),
            2 => Ok(DataType::Rssi6E),
            3 => Ok(DataType::RssiDual25),
            _ => Err(WipryError::UnknownVariant {
                type_name: "DataType",
                value: value as i64,
            }),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Rssi2_4Ghz => write!(f, "RSSI 2.4GHz"),
            DataType::Rssi5Ghz => write!(f, "RSSI 5GHz"),
            DataType::Rssi6E => write!(f, "RSSI 6E"),
            DataType::RssiDual25 => write!(f, "RSSI dual 2.4/5GHz"),
        }
    }
}

// ── Band / SampleClass ───────────────────────────────────────────

/// Frequency bands with a queryable boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Ghz2_4,
    Ghz5,
    Ghz6E,
}

/// Calibration applies separately to odd and even sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleClass {
    Odd,
    Even,
}

impl SampleClass {
    pub fn of_index(index: usize) -> Self {
        if index % 2 == 0 {
            SampleClass::Even
        } else {
            SampleClass::Odd
        }
    }
}

// ── Calibration values ───────────────────────────────────────────

/// RSSI limits for one sample class, in dBm.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationLimits {
    pub min: f32,
    pub max: f32,
    pub noise_floor: f32,
}

/// Frequency span of a band, in MHz.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrequencyBoundary {
    pub min_mhz: f32,
    pub max_mhz: f32,
}

impl FrequencyBoundary {
    /// Width of the band in MHz.
    pub fn span_mhz(&self) -> f32 {
        self.max_mhz - self.min_mhz
    }
}

// ── Control requests ─────────────────────────────────────────────

/// Length of the authentication challenge and its digest.
pub const CHALLENGE_LEN: usize = 32;

/// A synchronous request on the accessory's control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    /// Ask for product id and firmware version.
    Identify,
    /// Authentication challenge; the accessory answers with a keyed digest.
    Challenge([u8; CHALLENGE_LEN]),
    ReadSerialNumber,
    ReadCapabilities,
    ReadLimits(SampleClass),
    ReadBoundary(Band),
    /// Start an RSSI sweep stream. `zoom` is `(start_index, width)`.
    StartRssi {
        data_type: DataType,
        zoom: Option<(u32, u8)>,
    },
    StartBeaconCapture,
    StopStream,
}

impl ControlRequest {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::Identify => "Identify",
            ControlRequest::Challenge(_) => "Challenge",
            ControlRequest::ReadSerialNumber => "ReadSerialNumber",
            ControlRequest::ReadCapabilities => "ReadCapabilities",
            ControlRequest::ReadLimits(_) => "ReadLimits",
            ControlRequest::ReadBoundary(_) => "ReadBoundary",
            ControlRequest::StartRssi { .. } => "StartRssi",
            ControlRequest::StartBeaconCapture => "StartBeaconCapture",
            ControlRequest::StopStream => "StopStream",
        }
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The accessory's answer to a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    Identity { product_id: u16, firmware: String },
    ChallengeResponse([u8; CHALLENGE_LEN]),
    SerialNumber(String),
    Capabilities(DataTypeSupport),
    Limits(CalibrationLimits),
    Boundary(FrequencyBoundary),
    Ack,
}

impl ControlResponse {
    pub fn name(&self) -> &'static str {
        match self {
            ControlResponse::Identity { .. } => "Identity",
            ControlResponse::ChallengeResponse(_) => "ChallengeResponse",
            ControlResponse::SerialNumber(_) => "SerialNumber",
            ControlResponse::Capabilities(_) => "Capabilities",
            ControlResponse::Limits(_) => "Limits",
            ControlResponse::Boundary(_) => "Boundary",
            ControlResponse::Ack => "Ack",
        }
    }

    /// Error for a response that does not answer `request`.
    pub fn unexpected(&self, request: &ControlRequest) -> WipryError {
        WipryError::UnexpectedResponse {
            request: request.name(),
            response: self.name(),
        }
    }
}
