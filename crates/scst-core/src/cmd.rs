use std::time::Duration;

use scst_scsi::{
    commands::Direction,
    sense::{SenseData, SenseKey},
    transport::status,
};

/// What the middleware does with a command after a handler hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    /// Continue with the default state machine.
    Default,
    /// Stop processing and send the response as it stands.
    Stop,
}

/// A command received from an initiator.
#[derive(Debug, Clone)]
pub struct ScstCmd {
    pub cdb: Vec<u8>,
    pub lun: u64,
    /// Name of the operation, filled in by parsing.
    pub op_name: &'static str,
    pub data_direction: Direction,
    /// Data transfer length in bytes, filled in by parsing.
    pub bufflen: u32,
    pub timeout: Duration,
    /// Transport-level retries for pass-through execution.
    pub retries: u32,
    pub status: u8,
    pub sense: Vec<u8>,
    /// Data buffer: outgoing payload for writes, response for reads.
    pub data: Vec<u8>,
    /// Bytes actually transferred into `data`.
    pub resp_data_len: u32,
}

impl ScstCmd {
    pub fn new(cdb: impl Into<Vec<u8>>) -> Self {
        Self {
            cdb: cdb.into(),
            lun: 0,
            op_name: "",
            data_direction: Direction::None,
            bufflen: 0,
            timeout: Duration::ZERO,
            retries: 0,
            status: status::GOOD,
            sense: Vec::new(),
            data: Vec::new(),
            resp_data_len: 0,
        }
    }

    pub fn opcode(&self) -> u8 {
        self.cdb.first().copied().unwrap_or(0)
    }

    /// Finish the command with CHECK CONDITION and fixed-format sense.
    pub fn set_check_condition(&mut self, key: SenseKey, asc: u8, ascq: u8) {
        self.status = status::CHECK_CONDITION;
        self.sense = SenseData {
            key,
            asc,
            ascq,
            descriptor: false,
        }
        .to_fixed();
    }

    pub fn is_good(&self) -> bool {
        self.status == status::GOOD || self.status == status::CONDITION_MET
    }

    /// Response bytes the device returned.
    pub fn response(&self) -> &[u8] {
        let len = (self.resp_data_len as usize).min(self.data.len());
        &self.data[..len]
    }
}
