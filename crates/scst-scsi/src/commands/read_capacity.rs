use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::commands::{CommandBlock, inquiry::ScsiLevel, opcode};

/// READ CAPACITY (10) command, returns 8 bytes of capacity data
#[derive(Debug, Clone, Copy)]
pub struct ReadCapacity10Command {
    pub logical_unit_number: u8,
}

impl ReadCapacity10Command {
    pub fn new(logical_unit_number: u8) -> Self {
        Self {
            logical_unit_number,
        }
    }

    /// Build the command for a device at the given command-set level.
    ///
    /// Devices at SCSI-2 and below expect the LUN in byte 1; newer ones
    /// treat those bits as reserved.
    pub fn for_level(scsi_level: ScsiLevel, logical_unit_number: u8) -> Self {
        if scsi_level <= ScsiLevel::SCSI_2 {
            Self::new(logical_unit_number)
        } else {
            Self::new(0)
        }
    }
}

impl CommandBlock for ReadCapacity10Command {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::READ_CAPACITY;

        // Byte 1: LUN in the upper 3 bits (bits 7-5)
        cdb[1] = (self.logical_unit_number << 5) & 0xe0;

        cdb
    }

    fn len(&self) -> u8 {
        10
    }
}

#[derive(FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawCapacity10 {
    last_logical_block_address: U32,
    block_length_bytes: U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCapacity10Data {
    pub last_logical_block_address: u32,
    pub block_length_bytes: u32,
}

impl ReadCapacity10Data {
    pub const LEN: usize = 8;

    pub fn parse(buf: &[u8]) -> Option<Self> {
        let (raw, _) = RawCapacity10::read_from_prefix(buf).ok()?;

        Some(Self {
            last_logical_block_address: raw.last_logical_block_address.get(),
            block_length_bytes: raw.block_length_bytes.get(),
        })
    }

    pub fn total_capacity_bytes(&self) -> u64 {
        (self.last_logical_block_address as u64 + 1) * self.block_length_bytes as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lun_only_for_legacy_levels() {
        let legacy = ReadCapacity10Command::for_level(ScsiLevel::SCSI_2, 3).to_bytes();
        assert_eq!(legacy[0], 0x25);
        assert_eq!(legacy[1], 0x60);

        let modern = ReadCapacity10Command::for_level(ScsiLevel::SCSI_3, 3).to_bytes();
        assert_eq!(modern[1], 0);
        assert!(modern[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn parses_big_endian_fields() {
        let buf = [0x00, 0x04, 0x5f, 0xff, 0x00, 0x00, 0x08, 0x00, 0xaa];
        let data = ReadCapacity10Data::parse(&buf).unwrap();
        assert_eq!(data.last_logical_block_address, 0x45fff);
        assert_eq!(data.block_length_bytes, 2048);
        assert_eq!(data.total_capacity_bytes(), 0x46000 * 2048);

        assert!(ReadCapacity10Data::parse(&buf[..7]).is_none());
    }
}
