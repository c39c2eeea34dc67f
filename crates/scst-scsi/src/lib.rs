//! SCSI plumbing shared by the scst device handlers.
//!
//! [`commands`] builds command descriptor blocks and parses their responses,
//! [`sense`] interprets sense data returned by a failed command and
//! [`transport`] is the seam a backing device is reached through. With the
//! `usb` feature, [`storage`] provides a transport for USB mass-storage
//! devices speaking the bulk-only protocol.

pub mod commands;
pub mod sense;
#[cfg(feature = "usb")]
pub mod storage;
pub mod transport;

pub use transport::{ExecError, ExecRequest, ScsiDeviceInfo, ScsiTransport};
