use std::time::Duration;

use thiserror::Error;

use crate::commands::{Direction, inquiry::PeripheralDeviceType, inquiry::ScsiLevel};

/// SAM status codes seen by the handlers.
pub mod status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const CONDITION_MET: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
    pub const TASK_SET_FULL: u8 = 0x28;
}

/// What a backing device reported about itself when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiDeviceInfo {
    pub device_type: PeripheralDeviceType,
    pub scsi_level: ScsiLevel,
    pub lun: u8,
}

/// One synchronous command execution.
#[derive(Debug)]
pub struct ExecRequest<'a> {
    pub cdb: &'a [u8],
    pub direction: Direction,
    /// Data buffer; its length is the expected transfer length.
    pub buffer: &'a mut [u8],
    /// Filled with sense data when the command ends in CHECK CONDITION.
    pub sense: &'a mut [u8],
    pub timeout: Duration,
    /// How many times a transport-level failure is retried.
    pub retries: u32,
}

#[derive(Error, Debug)]
pub enum ExecError {
    /// The device returned CHECK CONDITION; the sense buffer holds the reason.
    #[error("check condition")]
    CheckCondition,
    /// The device returned another non-GOOD status.
    #[error("command completed with status {0:#04x}")]
    Status(u8),
    #[error("command timed out")]
    Timeout,
    #[error("transport failure")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExecError {
    /// A single code summarizing the failure, for log lines.
    pub fn status(&self) -> u32 {
        match self {
            ExecError::CheckCondition => status::CHECK_CONDITION as u32,
            ExecError::Status(status) => *status as u32,
            // host byte DID_TIME_OUT / DID_ERROR
            ExecError::Timeout => 0x03 << 16,
            ExecError::Transport(_) => 0x07 << 16,
        }
    }
}

/// A backing SCSI device commands can be executed against.
pub trait ScsiTransport: Send + Sync {
    fn info(&self) -> ScsiDeviceInfo;

    /// Execute a command and wait for it to complete.
    ///
    /// Returns how many bytes of `buffer` the device actually transferred,
    /// which is less than its length when the device reports a residue.
    fn execute(&self, request: ExecRequest<'_>) -> Result<usize, ExecError>;
}
