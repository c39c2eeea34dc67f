pub mod cbw;
pub mod inquiry;
pub mod mode_sense;
pub mod read10;
pub mod read_capacity;
pub mod request_sense;

/// Operation codes of the commands the device handlers know about.
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const READ_6: u8 = 0x08;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_6: u8 = 0x1a;
    pub const START_STOP: u8 = 0x1b;
    pub const SEND_DIAGNOSTIC: u8 = 0x1d;
    pub const ALLOW_MEDIUM_REMOVAL: u8 = 0x1e;
    pub const READ_CAPACITY: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2a;
    pub const SEEK_10: u8 = 0x2b;
    pub const VERIFY: u8 = 0x2f;
    pub const SYNCHRONIZE_CACHE: u8 = 0x35;
    pub const READ_SUBCHANNEL: u8 = 0x42;
    pub const READ_TOC: u8 = 0x43;
    pub const READ_HEADER: u8 = 0x44;
    pub const PLAY_AUDIO_10: u8 = 0x45;
    pub const GET_CONFIGURATION: u8 = 0x46;
    pub const PLAY_AUDIO_MSF: u8 = 0x47;
    pub const GET_EVENT_STATUS_NOTIFICATION: u8 = 0x4a;
    pub const PAUSE_RESUME: u8 = 0x4b;
    pub const READ_DISC_INFO: u8 = 0x51;
    pub const READ_TRACK_INFO: u8 = 0x52;
    pub const CLOSE_TRACK: u8 = 0x5b;
    pub const MODE_SELECT_10: u8 = 0x55;
    pub const MODE_SENSE_10: u8 = 0x5a;
    pub const REPORT_LUNS: u8 = 0xa0;
    pub const BLANK: u8 = 0xa1;
    pub const SEND_KEY: u8 = 0xa3;
    pub const REPORT_KEY: u8 = 0xa4;
    pub const PLAY_AUDIO_12: u8 = 0xa5;
    pub const READ_12: u8 = 0xa8;
    pub const WRITE_12: u8 = 0xaa;
    pub const READ_DVD_STRUCTURE: u8 = 0xad;
    pub const SET_CD_SPEED: u8 = 0xbb;
    pub const MECHANISM_STATUS: u8 = 0xbd;
    pub const READ_CD: u8 = 0xbe;
}

/// Direction of the data phase of a command, seen from the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// No data phase.
    None,
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

pub trait CommandBlock {
    /// Return the command bytes (CDB).
    fn to_bytes(&self) -> [u8; 16];

    /// Return the effective length of the command.
    fn len(&self) -> u8;

    /// The CDB truncated to its effective length.
    fn cdb(&self) -> Vec<u8> {
        self.to_bytes()[..self.len() as usize].to_vec()
    }
}
