use crate::commands::{CommandBlock, opcode};

/// REQUEST SENSE (6), used by transports that do not deliver sense data
/// alongside a failed status.
#[derive(Debug, Clone, Copy)]
pub struct RequestSenseCommand {
    pub alloc_len: u8,
}

impl RequestSenseCommand {
    pub fn new(alloc_len: u8) -> Self {
        Self { alloc_len }
    }
}

impl CommandBlock for RequestSenseCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::REQUEST_SENSE;
        cdb[4] = self.alloc_len;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}
