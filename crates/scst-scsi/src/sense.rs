//! Sense data interpretation.
//!
//! Both the fixed (response codes 0x70/0x71) and the descriptor
//! (0x72/0x73) formats are understood.

/// Size of the sense buffer handed to a transport.
pub const SCSI_SENSE_BUFFERSIZE: usize = 96;

/// Sense key, the coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    NoSense,
    RecoveredError,
    NotReady,
    MediumError,
    HardwareError,
    IllegalRequest,
    UnitAttention,
    DataProtect,
    BlankCheck,
    VendorSpecific,
    CopyAborted,
    AbortedCommand,
    VolumeOverflow,
    Miscompare,
    Completed,
    Reserved(u8),
}

impl From<u8> for SenseKey {
    fn from(value: u8) -> Self {
        match value & 0x0f {
            0x0 => SenseKey::NoSense,
            0x1 => SenseKey::RecoveredError,
            0x2 => SenseKey::NotReady,
            0x3 => SenseKey::MediumError,
            0x4 => SenseKey::HardwareError,
            0x5 => SenseKey::IllegalRequest,
            0x6 => SenseKey::UnitAttention,
            0x7 => SenseKey::DataProtect,
            0x8 => SenseKey::BlankCheck,
            0x9 => SenseKey::VendorSpecific,
            0xa => SenseKey::CopyAborted,
            0xb => SenseKey::AbortedCommand,
            0xd => SenseKey::VolumeOverflow,
            0xe => SenseKey::Miscompare,
            0xf => SenseKey::Completed,
            other => SenseKey::Reserved(other),
        }
    }
}

impl From<SenseKey> for u8 {
    fn from(value: SenseKey) -> Self {
        match value {
            SenseKey::NoSense => 0x0,
            SenseKey::RecoveredError => 0x1,
            SenseKey::NotReady => 0x2,
            SenseKey::MediumError => 0x3,
            SenseKey::HardwareError => 0x4,
            SenseKey::IllegalRequest => 0x5,
            SenseKey::UnitAttention => 0x6,
            SenseKey::DataProtect => 0x7,
            SenseKey::BlankCheck => 0x8,
            SenseKey::VendorSpecific => 0x9,
            SenseKey::CopyAborted => 0xa,
            SenseKey::AbortedCommand => 0xb,
            SenseKey::VolumeOverflow => 0xd,
            SenseKey::Miscompare => 0xe,
            SenseKey::Completed => 0xf,
            SenseKey::Reserved(other) => other,
        }
    }
}

/// Key, additional sense code and qualifier extracted from a sense buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    pub key: SenseKey,
    pub asc: u8,
    pub ascq: u8,
    /// Whether the buffer was in descriptor format.
    pub descriptor: bool,
}

impl SenseData {
    /// Decode a sense buffer.
    ///
    /// Returns `None` for an empty buffer, an unknown response code, or a
    /// buffer too short to carry a sense key.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let response_code = *buf.first()? & 0x7f;
        match response_code {
            0x70 | 0x71 => {
                let key = SenseKey::from(*buf.get(2)?);
                Some(Self {
                    key,
                    asc: buf.get(12).copied().unwrap_or(0),
                    ascq: buf.get(13).copied().unwrap_or(0),
                    descriptor: false,
                })
            }
            0x72 | 0x73 => {
                let key = SenseKey::from(*buf.get(1)?);
                Some(Self {
                    key,
                    asc: buf.get(2).copied().unwrap_or(0),
                    ascq: buf.get(3).copied().unwrap_or(0),
                    descriptor: true,
                })
            }
            _ => None,
        }
    }

    /// Encode as fixed-format sense data.
    pub fn to_fixed(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 18];
        buf[0] = 0x70;
        buf[2] = u8::from(self.key);
        buf[7] = 10; // additional sense length
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }
}

/// How much of the sense data must match in [`analyze_sense`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseMatch {
    Key(SenseKey),
    KeyAsc(SenseKey, u8),
    KeyAscAscq(SenseKey, u8, u8),
}

/// Check whether a sense buffer describes the given condition.
pub fn analyze_sense(buf: &[u8], wanted: SenseMatch) -> bool {
    let Some(sense) = SenseData::parse(buf) else {
        return false;
    };

    match wanted {
        SenseMatch::Key(key) => sense.key == key,
        SenseMatch::KeyAsc(key, asc) => sense.key == key && sense.asc == asc,
        SenseMatch::KeyAscAscq(key, asc, ascq) => {
            sense.key == key && sense.asc == asc && sense.ascq == ascq
        }
    }
}

pub fn is_unit_attention(buf: &[u8]) -> bool {
    analyze_sense(buf, SenseMatch::Key(SenseKey::UnitAttention))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_format() {
        let mut buf = [0u8; SCSI_SENSE_BUFFERSIZE];
        buf[0] = 0xf0; // valid bit set
        buf[2] = 0x06;
        buf[12] = 0x28;
        let sense = SenseData::parse(&buf).unwrap();
        assert_eq!(sense.key, SenseKey::UnitAttention);
        assert_eq!(sense.asc, 0x28);
        assert!(!sense.descriptor);
        assert!(is_unit_attention(&buf));
        assert!(analyze_sense(
            &buf,
            SenseMatch::KeyAscAscq(SenseKey::UnitAttention, 0x28, 0)
        ));
        assert!(!analyze_sense(
            &buf,
            SenseMatch::KeyAsc(SenseKey::UnitAttention, 0x29)
        ));
    }

    #[test]
    fn descriptor_format() {
        let buf = [0x72, 0x02, 0x04, 0x01, 0, 0, 0, 0];
        let sense = SenseData::parse(&buf).unwrap();
        assert_eq!(sense.key, SenseKey::NotReady);
        assert_eq!((sense.asc, sense.ascq), (0x04, 0x01));
        assert!(sense.descriptor);
        assert!(!is_unit_attention(&buf));
    }

    #[test]
    fn zeroed_buffer_is_not_sense() {
        assert!(SenseData::parse(&[0u8; SCSI_SENSE_BUFFERSIZE]).is_none());
        assert!(SenseData::parse(&[]).is_none());
        assert!(!is_unit_attention(&[0u8; 4]));
    }

    #[test]
    fn fixed_encoding_parses_back() {
        let sense = SenseData {
            key: SenseKey::IllegalRequest,
            asc: 0x20,
            ascq: 0,
            descriptor: false,
        };
        assert_eq!(SenseData::parse(&sense.to_fixed()), Some(sense));
    }
}
