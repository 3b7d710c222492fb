use bitflags::bitflags;

use crate::message::DataType;

bitflags! {
    /// Stream types an accessory advertises in its capability word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DataTypeSupport: u32 {
        const RSSI_2_4GHZ    = 1 << 0;
        const RSSI_5GHZ      = 1 << 1;
        const RSSI_6E        = 1 << 2;
        const RSSI_DUAL25    = 1 << 3;
        const BEACON_CAPTURE = 1 << 8;
    }
}

impl DataTypeSupport {
    pub fn supports(&self, data_type: DataType) -> bool {
        self.contains(data_type.support_flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_checks_the_matching_bit() {
        let caps = DataTypeSupport::RSSI_2_4GHZ | DataTypeSupport::RSSI_5GHZ;
        assert!(caps.supports(DataType::Rssi2_4Ghz));
        assert!(caps.supports(DataType::Rssi5Ghz));
        assert!(!caps.supports(DataType::Rssi6E));
        assert!(!caps.supports(DataType::RssiDual25));
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let caps = DataTypeSupport::from_bits_truncate(0xFFFF_0001);
        assert_eq!(caps, DataTypeSupport::RSSI_2_4GHZ);
    }
}
