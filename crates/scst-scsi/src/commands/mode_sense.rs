use crate::commands::{CommandBlock, opcode};

/// Page code of the Control mode page.
pub const CONTROL_MODE_PAGE: u8 = 0x0a;

/// Length of the MODE SENSE(6) parameter header.
pub const MODE_PARAMETER_HEADER_6_LEN: usize = 4;

/// PC field of MODE SENSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Current,
    Changeable,
    Default,
    Saved,
}

/// MODE SENSE(6) command.
#[derive(Debug, Clone, Copy)]
pub struct ModeSense6Command {
    /// Disable block descriptors.
    pub dbd: bool,
    pub page_control: PageControl,
    pub page_code: u8,
    pub alloc_len: u8,
}

impl ModeSense6Command {
    pub fn new(page_code: u8, alloc_len: u8) -> Self {
        Self {
            dbd: true,
            page_control: PageControl::Current,
            page_code,
            alloc_len,
        }
    }
}

impl CommandBlock for ModeSense6Command {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::MODE_SENSE_6;
        cdb[1] = if self.dbd { 0x08 } else { 0x00 };
        let pc = match self.page_control {
            PageControl::Current => 0,
            PageControl::Changeable => 1,
            PageControl::Default => 2,
            PageControl::Saved => 3,
        };
        cdb[2] = (pc << 6) | (self.page_code & 0x3f);
        cdb[4] = self.alloc_len;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}
