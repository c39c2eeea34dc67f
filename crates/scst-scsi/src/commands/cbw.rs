use zerocopy::byteorder::little_endian::U32;
use static_assertions::assert_eq_size;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::commands::Direction;

pub const CBW_SIGNATURE: u32 = 0x43425355;
pub const CSW_SIGNATURE: u32 = 0x53425355;

pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

/// Bulk-only transport Command Block Wrapper.
#[derive(Debug, Clone, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Cbw {
    pub signature: U32,
    pub tag: U32,
    pub data_transfer_length: U32,
    pub flags: u8,
    pub lun: u8,
    pub cb_length: u8,
    pub cb: [u8; 16],
}

impl Cbw {
    pub fn new(tag: u32, lun: u8, data_len: u32, direction: Direction, cdb: &[u8]) -> Self {
        debug_assert!(cdb.len() <= 16, "Command block too long");

        let len = cdb.len().min(16);
        let mut cb = [0u8; 16];
        cb[..len].copy_from_slice(&cdb[..len]);

        Self {
            signature: U32::new(CBW_SIGNATURE),
            tag: U32::new(tag),
            data_transfer_length: U32::new(data_len),
            flags: match direction {
                Direction::In => 0x80,
                Direction::Out | Direction::None => 0x00,
            },
            lun: lun & 0x0f,
            cb_length: len as u8,
            cb,
        }
    }
}

/// Status reported in byte 12 of a CSW.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CswStatus {
    Passed,
    Failed,
    PhaseError,
    Reserved(u8),
}

impl From<u8> for CswStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => CswStatus::Passed,
            0x01 => CswStatus::Failed,
            0x02 => CswStatus::PhaseError,
            other => CswStatus::Reserved(other),
        }
    }
}

/// Bulk-only transport Command Status Wrapper.
#[derive(Debug, Clone, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Csw {
    pub signature: U32,
    pub tag: U32,
    pub data_residue: U32,
    pub status: u8,
}

impl Csw {
    /// Parse a CSW, returning `None` if the buffer is short or the signature is wrong.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let (csw, _) = Csw::read_from_prefix(buf).ok()?;
        if csw.signature.get() != CSW_SIGNATURE {
            return None;
        }
        Some(csw)
    }

    pub fn status(&self) -> CswStatus {
        CswStatus::from(self.status)
    }
}

assert_eq_size!(Cbw, [u8; CBW_LEN]);
assert_eq_size!(Csw, [u8; CSW_LEN]);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandBlock, read_capacity::ReadCapacity10Command};

    #[test]
    fn cbw_layout() {
        let cdb = ReadCapacity10Command::new(0).cdb();
        let cbw = Cbw::new(0x1234, 2, 8, Direction::In, &cdb);
        let bytes = cbw.as_bytes();

        assert_eq!(bytes.len(), CBW_LEN);
        assert_eq!(&bytes[0..4], b"USBC");
        assert_eq!(&bytes[4..8], &[0x34, 0x12, 0, 0]);
        assert_eq!(&bytes[8..12], &[8, 0, 0, 0]);
        assert_eq!(bytes[12], 0x80);
        assert_eq!(bytes[13], 2);
        assert_eq!(bytes[14], 10);
        assert_eq!(bytes[15], 0x25);
    }

    #[test]
    fn csw_status() {
        let mut raw = [0u8; CSW_LEN];
        raw[0..4].copy_from_slice(b"USBS");
        raw[4] = 7;
        raw[12] = 1;
        let csw = Csw::parse(&raw).unwrap();
        assert_eq!(csw.tag.get(), 7);
        assert_eq!(csw.status(), CswStatus::Failed);

        raw[0] = b'X';
        assert!(Csw::parse(&raw).is_none());
        assert!(Csw::parse(&raw[..12]).is_none());
    }
}
