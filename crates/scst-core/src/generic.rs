//! Generic command processing shared by the pass-through device handlers.
//!
//! Handlers plug their per-device block size in through the
//! `get_block_shift` / `set_block_shift` callbacks, so these routines never
//! see a handler's private data.

use std::time::Duration;

use scst_scsi::commands::Direction::{In, None as NoData, Out};
use scst_scsi::{
    commands::{Direction, opcode, read_capacity::ReadCapacity10Data},
    sense::SenseKey,
};
use thiserror::Error;

use self::TimeoutClass::{Long, Regular, Small};
use crate::{
    SCST_GENERIC_CDROM_LONG_TIMEOUT, SCST_GENERIC_CDROM_REG_TIMEOUT,
    SCST_GENERIC_CDROM_SMALL_TIMEOUT,
    cmd::{CmdState, ScstCmd},
};

/// Smallest logical block size a device may report.
pub const MIN_BLOCK_SIZE: u32 = 512;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("CDB of {len} bytes too short for opcode {opcode:#04x}")]
    CdbTooShort { opcode: u8, len: usize },
    #[error("transfer length of opcode {0:#04x} overflows")]
    TransferTooLarge(u8),
}

/// Convert a logical block size into a shift.
///
/// Returns `None`, after logging, when the size is not a power of two or is
/// smaller than [`MIN_BLOCK_SIZE`].
pub fn calc_block_shift(sector_size: u32) -> Option<u32> {
    if !sector_size.is_power_of_two() || sector_size < MIN_BLOCK_SIZE {
        log::error!("Wrong sector size {sector_size}");
        return None;
    }
    Some(sector_size.trailing_zeros())
}

#[derive(Debug, Clone, Copy)]
enum TransferLen {
    None,
    Fixed(u32),
    /// Big-endian byte count at `off`, `width` bytes wide.
    Bytes { off: usize, width: usize },
    /// Big-endian block count at `off`, `width` bytes wide.
    Blocks { off: usize, width: usize },
    /// READ(6): one byte of blocks, zero meaning 256.
    Read6Blocks,
}

#[derive(Debug, Clone, Copy)]
enum TimeoutClass {
    Small,
    Regular,
    Long,
}

impl TimeoutClass {
    fn duration(self) -> Duration {
        match self {
            TimeoutClass::Small => SCST_GENERIC_CDROM_SMALL_TIMEOUT,
            TimeoutClass::Regular => SCST_GENERIC_CDROM_REG_TIMEOUT,
            TimeoutClass::Long => SCST_GENERIC_CDROM_LONG_TIMEOUT,
        }
    }
}

struct CdbInfo {
    opcode: u8,
    name: &'static str,
    cdb_len: usize,
    direction: Direction,
    transfer: TransferLen,
    timeout: TimeoutClass,
}

const fn op(
    opcode: u8,
    name: &'static str,
    cdb_len: usize,
    direction: Direction,
    transfer: TransferLen,
    timeout: TimeoutClass,
) -> CdbInfo {
    CdbInfo {
        opcode,
        name,
        cdb_len,
        direction,
        transfer,
        timeout,
    }
}

const fn bytes(off: usize, width: usize) -> TransferLen {
    TransferLen::Bytes { off, width }
}

const fn blocks(off: usize, width: usize) -> TransferLen {
    TransferLen::Blocks { off, width }
}

const CDROM_OPS: &[CdbInfo] = &[
    op(opcode::TEST_UNIT_READY, "TEST UNIT READY", 6, NoData, TransferLen::None, Small),
    op(opcode::REQUEST_SENSE, "REQUEST SENSE", 6, In, bytes(4, 1), Small),
    op(opcode::READ_6, "READ(6)", 6, In, TransferLen::Read6Blocks, Regular),
    op(opcode::INQUIRY, "INQUIRY", 6, In, bytes(3, 2), Small),
    op(opcode::MODE_SELECT_6, "MODE SELECT(6)", 6, Out, bytes(4, 1), Small),
    op(opcode::MODE_SENSE_6, "MODE SENSE(6)", 6, In, bytes(4, 1), Small),
    op(opcode::START_STOP, "START STOP UNIT", 6, NoData, TransferLen::None, Long),
    op(opcode::SEND_DIAGNOSTIC, "SEND DIAGNOSTIC", 6, Out, bytes(3, 2), Long),
    op(opcode::ALLOW_MEDIUM_REMOVAL, "PREVENT ALLOW MEDIUM REMOVAL", 6, NoData, TransferLen::None, Small),
    op(opcode::READ_CAPACITY, "READ CAPACITY", 10, In, TransferLen::Fixed(8), Small),
    op(opcode::READ_10, "READ(10)", 10, In, blocks(7, 2), Regular),
    op(opcode::WRITE_10, "WRITE(10)", 10, Out, blocks(7, 2), Regular),
    op(opcode::SEEK_10, "SEEK(10)", 10, NoData, TransferLen::None, Regular),
    op(opcode::VERIFY, "VERIFY(10)", 10, NoData, TransferLen::None, Long),
    op(opcode::SYNCHRONIZE_CACHE, "SYNCHRONIZE CACHE", 10, NoData, TransferLen::None, Long),
    op(opcode::READ_SUBCHANNEL, "READ SUB-CHANNEL", 10, In, bytes(7, 2), Small),
    op(opcode::READ_TOC, "READ TOC/PMA/ATIP", 10, In, bytes(7, 2), Small),
    op(opcode::READ_HEADER, "READ HEADER", 10, In, bytes(7, 2), Small),
    op(opcode::PLAY_AUDIO_10, "PLAY AUDIO(10)", 10, NoData, TransferLen::None, Regular),
    op(opcode::GET_CONFIGURATION, "GET CONFIGURATION", 10, In, bytes(7, 2), Small),
    op(opcode::PLAY_AUDIO_MSF, "PLAY AUDIO MSF", 10, NoData, TransferLen::None, Regular),
    op(opcode::GET_EVENT_STATUS_NOTIFICATION, "GET EVENT STATUS NOTIFICATION", 10, In, bytes(7, 2), Small),
    op(opcode::PAUSE_RESUME, "PAUSE/RESUME", 10, NoData, TransferLen::None, Small),
    op(opcode::READ_DISC_INFO, "READ DISC INFORMATION", 10, In, bytes(7, 2), Small),
    op(opcode::READ_TRACK_INFO, "READ TRACK INFORMATION", 10, In, bytes(7, 2), Small),
    op(opcode::MODE_SELECT_10, "MODE SELECT(10)", 10, Out, bytes(7, 2), Small),
    op(opcode::CLOSE_TRACK, "CLOSE TRACK/SESSION", 10, NoData, TransferLen::None, Long),
    op(opcode::MODE_SENSE_10, "MODE SENSE(10)", 10, In, bytes(7, 2), Small),
    op(opcode::REPORT_LUNS, "REPORT LUNS", 12, In, bytes(6, 4), Small),
    op(opcode::BLANK, "BLANK", 12, NoData, TransferLen::None, Long),
    op(opcode::SEND_KEY, "SEND KEY", 12, Out, bytes(8, 2), Small),
    op(opcode::REPORT_KEY, "REPORT KEY", 12, In, bytes(8, 2), Small),
    op(opcode::PLAY_AUDIO_12, "PLAY AUDIO(12)", 12, NoData, TransferLen::None, Regular),
    op(opcode::READ_12, "READ(12)", 12, In, blocks(6, 4), Regular),
    op(opcode::WRITE_12, "WRITE(12)", 12, Out, blocks(6, 4), Regular),
    op(opcode::READ_DVD_STRUCTURE, "READ DVD STRUCTURE", 12, In, bytes(8, 2), Small),
    op(opcode::SET_CD_SPEED, "SET CD SPEED", 12, NoData, TransferLen::None, Small),
    op(opcode::MECHANISM_STATUS, "MECHANISM STATUS", 12, In, bytes(8, 2), Small),
    op(opcode::READ_CD, "READ CD", 12, In, blocks(6, 3), Regular),
];

fn lookup(opcode: u8) -> Option<&'static CdbInfo> {
    CDROM_OPS.iter().find(|info| info.opcode == opcode)
}

fn be_field(cdb: &[u8], off: usize, width: usize) -> u64 {
    cdb[off..off + width]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | *byte as u64)
}

/// Classify a command addressed to a CD-ROM device.
///
/// Fills in the operation name, data direction, transfer length and timeout.
/// Block counts are scaled by the shift `get_block_shift` reports for the
/// command's device. Commands that cannot be classified are finished with
/// CHECK CONDITION and the reason is returned.
pub fn cdrom_generic_parse(
    cmd: &mut ScstCmd,
    get_block_shift: impl Fn(&ScstCmd) -> u32,
) -> Result<(), ParseError> {
    let opcode = cmd.opcode();
    let Some(info) = lookup(opcode) else {
        log::debug!("Unknown opcode {opcode:#04x} for a CD-ROM");
        cmd.set_check_condition(SenseKey::IllegalRequest, 0x20, 0x00);
        return Err(ParseError::UnknownOpcode(opcode));
    };

    if cmd.cdb.len() < info.cdb_len {
        cmd.set_check_condition(SenseKey::IllegalRequest, 0x24, 0x00);
        return Err(ParseError::CdbTooShort {
            opcode,
            len: cmd.cdb.len(),
        });
    }

    cmd.op_name = info.name;
    cmd.timeout = info.timeout.duration();

    let bufflen = match info.transfer {
        TransferLen::None => 0,
        TransferLen::Fixed(len) => len as u64,
        TransferLen::Bytes { off, width } => be_field(&cmd.cdb, off, width),
        TransferLen::Blocks { off, width } => {
            be_field(&cmd.cdb, off, width) << get_block_shift(&*cmd)
        }
        TransferLen::Read6Blocks => {
            let blocks = match cmd.cdb[4] {
                0 => 256,
                n => n as u64,
            };
            blocks << get_block_shift(&*cmd)
        }
    };

    let Ok(bufflen) = u32::try_from(bufflen) else {
        cmd.set_check_condition(SenseKey::IllegalRequest, 0x24, 0x00);
        return Err(ParseError::TransferTooLarge(opcode));
    };

    cmd.bufflen = bufflen;
    cmd.data_direction = if bufflen == 0 {
        Direction::None
    } else {
        info.direction
    };

    log::trace!(
        "{} ({opcode:#04x}): direction {:?}, bufflen {}, timeout {:?}",
        cmd.op_name,
        cmd.data_direction,
        cmd.bufflen,
        cmd.timeout
    );

    Ok(())
}

/// Completion processing for block devices.
///
/// A successful READ CAPACITY reports the device's current block size; it is
/// converted into a shift and handed to `set_block_shift`. A zero or unusable
/// block size is reported as shift 0.
pub fn block_generic_dev_done(
    cmd: &mut ScstCmd,
    mut set_block_shift: impl FnMut(&ScstCmd, u32),
) -> CmdState {
    if !cmd.is_good() || cmd.opcode() != opcode::READ_CAPACITY {
        return CmdState::Default;
    }

    match ReadCapacity10Data::parse(cmd.response()) {
        Some(capacity) => {
            let shift = match capacity.block_length_bytes {
                0 => 0,
                size => calc_block_shift(size).unwrap_or(0),
            };
            log::debug!("block_shift {shift}");
            set_block_shift(&*cmd, shift);
        }
        None => log::error!(
            "READ CAPACITY returned {} bytes, block size left unchanged",
            cmd.response().len()
        ),
    }

    CmdState::Default
}

#[cfg(test)]
mod tests {
    use super::*;
    use scst_scsi::{
        commands::{CommandBlock, read10::Read10Command},
        sense::SenseData,
        transport::status,
    };

    #[test]
    fn block_shift_of_powers_of_two() {
        for shift in 9..=16 {
            assert_eq!(calc_block_shift(1 << shift), Some(shift));
        }
        assert_eq!(calc_block_shift(2048), Some(11));
    }

    #[test]
    fn block_shift_rejects_odd_sizes() {
        assert_eq!(calc_block_shift(0), None);
        assert_eq!(calc_block_shift(2352), None);
        assert_eq!(calc_block_shift(256), None);
    }

    #[test]
    fn read10_scaled_by_shift() {
        let mut cmd = ScstCmd::new(Read10Command::new(16, 4).cdb());
        cdrom_generic_parse(&mut cmd, |_| 11).unwrap();
        assert_eq!(cmd.op_name, "READ(10)");
        assert_eq!(cmd.bufflen, 4 * 2048);
        assert_eq!(cmd.data_direction, Direction::In);
        assert_eq!(cmd.timeout, SCST_GENERIC_CDROM_REG_TIMEOUT);
    }

    #[test]
    fn read6_zero_means_256_blocks() {
        let mut cmd = ScstCmd::new(vec![opcode::READ_6, 0, 0, 0, 0, 0]);
        cdrom_generic_parse(&mut cmd, |_| 9).unwrap();
        assert_eq!(cmd.bufflen, 256 * 512);
    }

    #[test]
    fn zero_length_read_has_no_data_phase() {
        let mut cmd = ScstCmd::new(Read10Command::new(0, 0).cdb());
        cdrom_generic_parse(&mut cmd, |_| 11).unwrap();
        assert_eq!(cmd.bufflen, 0);
        assert_eq!(cmd.data_direction, Direction::None);
    }

    #[test]
    fn byte_counts_are_not_scaled() {
        let mut cmd = ScstCmd::new(vec![opcode::INQUIRY, 0, 0, 0x01, 0x00, 0]);
        cdrom_generic_parse(&mut cmd, |_| 11).unwrap();
        assert_eq!(cmd.bufflen, 256);
        assert_eq!(cmd.timeout, SCST_GENERIC_CDROM_SMALL_TIMEOUT);

        let mut cmd = ScstCmd::new(vec![opcode::READ_CAPACITY, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        cdrom_generic_parse(&mut cmd, |_| 11).unwrap();
        assert_eq!(cmd.bufflen, 8);
    }

    #[test]
    fn unknown_opcode_sets_check_condition() {
        let mut cmd = ScstCmd::new(vec![0xc7, 0, 0, 0, 0, 0]);
        assert_eq!(
            cdrom_generic_parse(&mut cmd, |_| 11),
            Err(ParseError::UnknownOpcode(0xc7))
        );
        assert_eq!(cmd.status, status::CHECK_CONDITION);
        let sense = SenseData::parse(&cmd.sense).unwrap();
        assert_eq!(sense.key, SenseKey::IllegalRequest);
        assert_eq!(sense.asc, 0x20);
    }

    #[test]
    fn truncated_cdb_is_rejected() {
        let mut cmd = ScstCmd::new(vec![opcode::READ_10, 0, 0]);
        assert_eq!(
            cdrom_generic_parse(&mut cmd, |_| 11),
            Err(ParseError::CdbTooShort {
                opcode: opcode::READ_10,
                len: 3
            })
        );
    }

    #[test]
    fn oversized_read12_is_rejected() {
        let mut cmd = ScstCmd::new(vec![
            opcode::READ_12,
            0,
            0,
            0,
            0,
            0,
            0xff,
            0xff,
            0xff,
            0xff,
            0,
            0,
        ]);
        assert_eq!(
            cdrom_generic_parse(&mut cmd, |_| 11),
            Err(ParseError::TransferTooLarge(opcode::READ_12))
        );
    }

    fn completed_read_capacity(block_len: u32) -> ScstCmd {
        let mut cmd = ScstCmd::new(vec![opcode::READ_CAPACITY, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        cmd.data = [0x0001_0000u32.to_be_bytes(), block_len.to_be_bytes()].concat();
        cmd.resp_data_len = 8;
        cmd
    }

    #[test]
    fn read_capacity_updates_shift() {
        let mut seen = Vec::new();
        let mut cmd = completed_read_capacity(4096);
        block_generic_dev_done(&mut cmd, |_, shift| seen.push(shift));
        let mut cmd = completed_read_capacity(0);
        block_generic_dev_done(&mut cmd, |_, shift| seen.push(shift));
        let mut cmd = completed_read_capacity(2352);
        block_generic_dev_done(&mut cmd, |_, shift| seen.push(shift));
        assert_eq!(seen, vec![12, 0, 0]);
    }

    #[test]
    fn failed_or_other_commands_leave_shift_alone() {
        let mut calls = 0;

        let mut cmd = completed_read_capacity(4096);
        cmd.status = status::CHECK_CONDITION;
        block_generic_dev_done(&mut cmd, |_, _| calls += 1);

        let mut cmd = completed_read_capacity(4096);
        cmd.resp_data_len = 4;
        block_generic_dev_done(&mut cmd, |_, _| calls += 1);

        let mut cmd = ScstCmd::new(Read10Command::new(0, 1).cdb());
        block_generic_dev_done(&mut cmd, |_, _| calls += 1);

        assert_eq!(calls, 0);
    }
}
