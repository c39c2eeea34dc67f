//! Per device-type trace categories.
//!
//! Log levels come from the `log` facade; trace flags decide which optional
//! diagnostic categories a device handler emits at all. They can be changed
//! at runtime through the administrative entry built for the type.

use std::{
    fmt::Write,
    sync::atomic::{AtomicU32, Ordering},
};

pub const TRACE_OUT_OF_MEM: u32 = 0x0000_0001;
pub const TRACE_MINOR: u32 = 0x0000_0002;
pub const TRACE_SG_OP: u32 = 0x0000_0004;
pub const TRACE_MEMORY: u32 = 0x0000_0008;
pub const TRACE_BUFF: u32 = 0x0000_0010;
pub const TRACE_ENTRYEXIT: u32 = 0x0000_0020;
pub const TRACE_PID: u32 = 0x0000_0040;
pub const TRACE_LINE: u32 = 0x0000_0080;
pub const TRACE_FUNCTION: u32 = 0x0000_0100;
pub const TRACE_DEBUG: u32 = 0x0000_0200;
pub const TRACE_SPECIAL: u32 = 0x0000_0400;
pub const TRACE_SCSI: u32 = 0x0000_0800;
pub const TRACE_MGMT: u32 = 0x0000_1000;
pub const TRACE_MGMT_MINOR: u32 = 0x0000_2000;
pub const TRACE_MGMT_DEBUG: u32 = 0x0000_4000;

pub const TRACE_ALL: u32 = 0xffff_ffff;

/// Default flags for a device handler's type.
pub const DEFAULT_DEV_LOG_FLAGS: u32 =
    TRACE_OUT_OF_MEM | TRACE_PID | TRACE_LINE | TRACE_FUNCTION | TRACE_SPECIAL | TRACE_MGMT
        | TRACE_MINOR | TRACE_MGMT_MINOR;

/// Flag names as accepted by `add`/`del` on the administrative entry.
pub const TRACE_TOKENS: &[(&str, u32)] = &[
    ("out_of_mem", TRACE_OUT_OF_MEM),
    ("minor", TRACE_MINOR),
    ("sg", TRACE_SG_OP),
    ("mem", TRACE_MEMORY),
    ("buff", TRACE_BUFF),
    ("entryexit", TRACE_ENTRYEXIT),
    ("pid", TRACE_PID),
    ("line", TRACE_LINE),
    ("function", TRACE_FUNCTION),
    ("debug", TRACE_DEBUG),
    ("special", TRACE_SPECIAL),
    ("scsi", TRACE_SCSI),
    ("mgmt", TRACE_MGMT),
    ("mgmt_minor", TRACE_MGMT_MINOR),
    ("mgmt_dbg", TRACE_MGMT_DEBUG),
];

/// Atomic trace flag set shared by a device type and its administrative entry.
#[derive(Debug)]
pub struct TraceFlags {
    flags: AtomicU32,
    default: u32,
}

impl TraceFlags {
    pub fn new(default: u32) -> Self {
        Self {
            flags: AtomicU32::new(default),
            default,
        }
    }

    pub fn get(&self) -> u32 {
        self.flags.load(Ordering::Relaxed)
    }

    pub fn set(&self, flags: u32) {
        self.flags.store(flags, Ordering::Relaxed);
    }

    pub fn add(&self, flags: u32) {
        self.flags.fetch_or(flags, Ordering::Relaxed);
    }

    pub fn remove(&self, flags: u32) {
        self.flags.fetch_and(!flags, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(self.default);
    }

    pub fn default_flags(&self) -> u32 {
        self.default
    }

    pub fn enabled(&self, flag: u32) -> bool {
        self.get() & flag != 0
    }

    /// Names of the active flags, in table order.
    pub fn names(&self) -> Vec<&'static str> {
        let flags = self.get();
        TRACE_TOKENS
            .iter()
            .filter(|(_, bit)| flags & bit != 0)
            .map(|(name, _)| *name)
            .collect()
    }
}

pub fn token_flag(name: &str) -> Option<u32> {
    TRACE_TOKENS
        .iter()
        .find(|(token, _)| *token == name)
        .map(|(_, bit)| *bit)
}

/// Render a buffer the way it is dumped into the log: 16 bytes per line,
/// prefixed with the offset.
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::new();
    for (i, byte) in buf.iter().enumerate() {
        if i % 16 == 0 {
            if i != 0 {
                out.push('\n');
            }
            let _ = write!(out, "{:04x}: ", i);
        }
        let _ = write!(out, "{:02x} ", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_reset() {
        let flags = TraceFlags::new(TRACE_MINOR);
        flags.add(TRACE_SCSI);
        assert!(flags.enabled(TRACE_SCSI));
        assert_eq!(flags.names(), vec!["minor", "scsi"]);

        flags.remove(TRACE_MINOR);
        assert!(!flags.enabled(TRACE_MINOR));

        flags.reset();
        assert_eq!(flags.get(), TRACE_MINOR);
    }

    #[test]
    fn dump_lines() {
        let dump = hex_dump(&[0xab; 17]);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: ab ab"));
        assert_eq!(lines[1].trim_end(), "0010: ab");
    }
}
