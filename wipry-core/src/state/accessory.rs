//! What the handshake learns about the attached accessory.

use tracing::{debug, info};

use crate::auth;
use crate::config::AuthConfig;
use crate::error::WipryError;
use crate::flags::DataTypeSupport;
use crate::message::{
    Band, CalibrationLimits, ControlRequest, ControlResponse, DataType, FrequencyBoundary,
    SampleClass,
};
use crate::transport::Transport;

// ── AccessoryInfo ────────────────────────────────────────────────

/// Identity, capabilities and calibration of a connected accessory.
///
/// Fetched once during the handshake; immutable for the lifetime of the
/// connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessoryInfo {
    pub product_id: u16,
    pub firmware: String,
    pub serial_number: String,
    pub capabilities: DataTypeSupport,
    pub odd_limits: CalibrationLimits,
    pub even_limits: CalibrationLimits,
    pub boundary_2_4ghz: FrequencyBoundary,
    pub boundary_5ghz: FrequencyBoundary,
    pub boundary_6e: FrequencyBoundary,
}

impl AccessoryInfo {
    pub fn limits(&self, class: SampleClass) -> CalibrationLimits {
        match class {
            SampleClass::Odd => self.odd_limits,
            SampleClass::Even => self.even_limits,
        }
    }

    pub fn boundary(&self, band: Band) -> FrequencyBoundary {
        match band {
            Band::Ghz2_4 => self.boundary_2_4ghz,
            Band::Ghz5 => self.boundary_5ghz,
            Band::Ghz6E => self.boundary_6e,
        }
    }

    /// `true` if `data_type` is streamable and advertised by the accessory.
    pub fn supports(&self, data_type: DataType) -> bool {
        data_type.resolution().is_some() && self.capabilities.supports(data_type)
    }

    pub fn supports_beacon_capture(&self) -> bool {
        self.capabilities.contains(DataTypeSupport::BEACON_CAPTURE)
    }
}

// ── Handshake ────────────────────────────────────────────────────

/// Identify and authenticate the accessory, then read its calibration.
pub fn handshake(transport: &dyn Transport, config: &AuthConfig) -> Result<AccessoryInfo, WipryError> {
    let request = ControlRequest::Identify;
    let (product_id, firmware) = match transport.control(&request)? {
        ControlResponse::Identity {
            product_id,
            firmware,
        } => (product_id, firmware),
        other => return Err(other.unexpected(&request)),
    };
    if !config.supported_product_ids.contains(&product_id) {
        return Err(WipryError::UnsupportedAccessory(product_id));
    }
    debug!("accessory {product_id:#06x} firmware {firmware}");

    let challenge = auth::new_challenge();
    let request = ControlRequest::Challenge(challenge);
    match transport.control(&request)? {
        ControlResponse::ChallengeResponse(answer) => {
            if !auth::verify(&config.shared_secret, &challenge, &answer) {
                return Err(WipryError::AuthenticationFailed);
            }
        }
        other => return Err(other.unexpected(&request)),
    }
    debug!("accessory authenticated");

    let request = ControlRequest::ReadSerialNumber;
    let serial_number = match transport.control(&request)? {
        ControlResponse::SerialNumber(serial) => serial,
        other => return Err(other.unexpected(&request)),
    };
    let request = ControlRequest::ReadCapabilities;
    let capabilities = match transport.control(&request)? {
        ControlResponse::Capabilities(caps) => caps,
        other => return Err(other.unexpected(&request)),
    };

    let info = AccessoryInfo {
        product_id,
        firmware,
        serial_number,
        capabilities,
        odd_limits: read_limits(transport, SampleClass::Odd)?,
        even_limits: read_limits(transport, SampleClass::Even)?,
        boundary_2_4ghz: read_boundary(transport, Band::Ghz2_4)?,
        boundary_5ghz: read_boundary(transport, Band::Ghz5)?,
        boundary_6e: read_boundary(transport, Band::Ghz6E)?,
    };
    info!(
        "connected to accessory {} (capabilities {:?})",
        info.serial_number, info.capabilities
    );
    Ok(info)
}

fn read_limits(transport: &dyn Transport, class: SampleClass) -> Result<CalibrationLimits, WipryError> {
    let request = ControlRequest::ReadLimits(class);
    match transport.control(&request)? {
        ControlResponse::Limits(limits) => Ok(limits),
        other => Err(other.unexpected(&request)),
    }
}

fn read_boundary(transport: &dyn Transport, band: Band) -> Result<FrequencyBoundary, WipryError> {
    let request = ControlRequest::ReadBoundary(band);
    match transport.control(&request)? {
        ControlResponse::Boundary(boundary) => Ok(boundary),
        other => Err(other.unexpected(&request)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::transport::{AccessoryProfile, ReplayTransport};

    #[test]
    fn handshake_reads_everything_once() {
        let replay = ReplayTransport::new(AccessoryProfile::default());
        let info = handshake(&replay, &AuthConfig::default()).unwrap();

        let profile = replay.profile();
        assert_eq!(info.serial_number, profile.serial_number);
        assert_eq!(info.limits(SampleClass::Even), profile.even_limits);
        assert_eq!(info.boundary(Band::Ghz6E), profile.boundary_6e);
        assert!(info.supports(DataType::Rssi5Ghz));
        assert!(!info.supports(DataType::RssiDual25));
        assert!(info.supports_beacon_capture());
        assert_eq!(replay.requests().len(), 9);
    }

    #[test]
    fn unknown_product_is_unsupported() {
        let replay = ReplayTransport::new(AccessoryProfile {
            product_id: 0x9999,
            ..Default::default()
        });
        let err = handshake(&replay, &AuthConfig::default()).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnsupportedAccessory);
        assert_eq!(replay.requests(), vec![ControlRequest::Identify]);
    }

    #[test]
    fn wrong_secret_fails_authentication() {
        let replay = ReplayTransport::new(AccessoryProfile {
            shared_secret: "counterfeit".into(),
            ..Default::default()
        });
        let err = handshake(&replay, &AuthConfig::default()).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnableToAuthenticateWithAccessory);
    }

    #[test]
    fn dead_link_is_a_communication_failure() {
        let replay = ReplayTransport::new(AccessoryProfile::default());
        replay.unplug();
        let err = handshake(&replay, &AuthConfig::default()).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnableToCommunicateWithAccessory);
    }
}
