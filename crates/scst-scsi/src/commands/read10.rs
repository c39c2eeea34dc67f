use crate::commands::{CommandBlock, opcode};

/// READ(10) command: read contiguous blocks starting from an LBA.
#[derive(Debug, Clone, Copy)]
pub struct Read10Command {
    pub logical_block_address: u32,
    pub transfer_length: u16,
}

impl Read10Command {
    pub fn new(logical_block_address: u32, transfer_length: u16) -> Self {
        Self {
            logical_block_address,
            transfer_length,
        }
    }
}

impl CommandBlock for Read10Command {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::READ_10;

        // Logical Block Address (big-endian: MSB first)
        cdb[2..6].copy_from_slice(&self.logical_block_address.to_be_bytes());

        // Transfer Length (number of blocks, big-endian)
        cdb[7..9].copy_from_slice(&self.transfer_length.to_be_bytes());

        cdb
    }

    fn len(&self) -> u8 {
        10
    }
}
