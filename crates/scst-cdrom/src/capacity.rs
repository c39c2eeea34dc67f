//! Block size discovery at attach time.

use scst_core::{
    AttachError, SCST_DEV_UA_RETRIES, SCST_GENERIC_CDROM_REG_TIMEOUT, SCST_INTERNAL_EXEC_RETRIES,
    calc_block_shift,
    trace::{TRACE_MINOR, TraceFlags, hex_dump},
};
use scst_scsi::{
    ExecRequest, ScsiTransport,
    commands::{
        CommandBlock, Direction,
        read_capacity::{ReadCapacity10Command, ReadCapacity10Data},
    },
    sense::{self, SCSI_SENSE_BUFFERSIZE},
};

use crate::CDROM_DEF_BLOCK_SHIFT;

const CAPACITY_BUFFER_SIZE: usize = 512;

/// Issue READ CAPACITY to clear pending unit attentions and learn the
/// device's block size.
///
/// Any failure other than a persistent unit attention falls back to
/// [`CDROM_DEF_BLOCK_SHIFT`].
pub(crate) fn discover_block_shift(
    scsi_dev: &dyn ScsiTransport,
    trace: &TraceFlags,
) -> Result<u32, AttachError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(CAPACITY_BUFFER_SIZE)
        .map_err(|_| {
            log::error!("Buffer memory allocation (size {CAPACITY_BUFFER_SIZE}) failure");
            AttachError::OutOfResources {
                what: "capacity buffer",
                size: CAPACITY_BUFFER_SIZE,
            }
        })?;
    buffer.resize(CAPACITY_BUFFER_SIZE, 0);
    let mut sense_buffer = [0u8; SCSI_SENSE_BUFFERSIZE];

    let info = scsi_dev.info();
    let cdb = ReadCapacity10Command::for_level(info.scsi_level, info.lun).cdb();

    let mut retries = SCST_DEV_UA_RETRIES;
    let rc = loop {
        buffer.fill(0);
        sense_buffer.fill(0);

        log::debug!("Doing READ_CAPACITY");
        let rc = scsi_dev.execute(ExecRequest {
            cdb: &cdb,
            direction: Direction::In,
            buffer: &mut buffer,
            sense: &mut sense_buffer,
            timeout: SCST_GENERIC_CDROM_REG_TIMEOUT,
            retries: SCST_INTERNAL_EXEC_RETRIES,
        });
        log::debug!(
            "READ_CAPACITY done: {:#x}",
            rc.as_ref().map_or_else(|err| err.status(), |_| 0)
        );

        if rc.is_ok() || !sense::is_unit_attention(&sense_buffer) {
            break rc;
        }

        retries -= 1;
        if retries == 0 {
            log::error!("UA not cleared after {SCST_DEV_UA_RETRIES} retries");
            return Err(AttachError::UnitAttentionNotCleared {
                retries: SCST_DEV_UA_RETRIES,
            });
        }
    };

    let block_shift = match rc {
        Ok(_) => {
            let sector_size = ReadCapacity10Data::parse(&buffer)
                .map(|data| data.block_length_bytes)
                .unwrap_or(0);
            log::debug!(
                "Sector size is {sector_size} scsi_level {}",
                info.scsi_level.0
            );
            match sector_size {
                0 => CDROM_DEF_BLOCK_SHIFT,
                size => calc_block_shift(size).unwrap_or(CDROM_DEF_BLOCK_SHIFT),
            }
        }
        Err(err) => {
            if trace.enabled(TRACE_MINOR) {
                log::info!(
                    "Read capacity failed: {:#x}, using default sector size {}",
                    err.status(),
                    1u32 << CDROM_DEF_BLOCK_SHIFT
                );
                log::info!("Returned sense:\n{}", hex_dump(&sense_buffer));
            }
            CDROM_DEF_BLOCK_SHIFT
        }
    };

    Ok(block_shift)
}

#[cfg(test)]
mod tests {
    use scst_core::{
        testing::{Reply, ScriptedTransport},
        trace::DEFAULT_DEV_LOG_FLAGS,
    };
    use scst_scsi::{
        ScsiDeviceInfo,
        commands::{
            inquiry::{PeripheralDeviceType, ScsiLevel},
            opcode,
        },
        sense::SenseKey,
    };

    use super::*;

    fn capacity(block_len: u32) -> Reply {
        Reply::Data([0x0004_ffffu32.to_be_bytes(), block_len.to_be_bytes()].concat())
    }

    fn discover(transport: &ScriptedTransport) -> Result<u32, AttachError> {
        discover_block_shift(transport, &TraceFlags::new(DEFAULT_DEV_LOG_FLAGS))
    }

    #[test]
    fn power_of_two_sizes() {
        for shift in 9..=16 {
            let transport = ScriptedTransport::cdrom();
            transport.push(opcode::READ_CAPACITY, capacity(1 << shift));
            assert_eq!(discover(&transport).unwrap(), shift);
        }
    }

    #[test]
    fn zero_or_odd_size_uses_default() {
        for size in [0, 2352, 256] {
            let transport = ScriptedTransport::cdrom();
            transport.push(opcode::READ_CAPACITY, capacity(size));
            assert_eq!(discover(&transport).unwrap(), CDROM_DEF_BLOCK_SHIFT);
        }
    }

    #[test]
    fn soft_failures_use_default() {
        let replies = [
            Reply::Sense(SenseKey::NotReady, 0x3a, 0x00),
            Reply::Sense(SenseKey::MediumError, 0x11, 0x00),
            Reply::Status(0x08),
            Reply::Timeout,
        ];
        for reply in replies {
            let transport = ScriptedTransport::cdrom();
            transport.push(opcode::READ_CAPACITY, reply);
            assert_eq!(discover(&transport).unwrap(), CDROM_DEF_BLOCK_SHIFT);
            assert_eq!(transport.executed(opcode::READ_CAPACITY), 1);
        }
    }

    #[test]
    fn unit_attention_retried_until_cleared() {
        let transport = ScriptedTransport::cdrom();
        transport.push(opcode::READ_CAPACITY, Reply::Sense(SenseKey::UnitAttention, 0x29, 0));
        transport.push(opcode::READ_CAPACITY, Reply::Sense(SenseKey::UnitAttention, 0x28, 0));
        transport.push(opcode::READ_CAPACITY, capacity(4096));

        assert_eq!(discover(&transport).unwrap(), 12);
        assert_eq!(transport.executed(opcode::READ_CAPACITY), 3);
    }

    #[test]
    fn persistent_unit_attention_fails() {
        let transport = ScriptedTransport::cdrom();
        transport.always(opcode::READ_CAPACITY, Reply::Sense(SenseKey::UnitAttention, 0x29, 0));

        let err = discover(&transport).unwrap_err();
        assert!(matches!(
            err,
            AttachError::UnitAttentionNotCleared { retries: 5 }
        ));
        assert!(err.is_no_device());
        assert_eq!(transport.executed(opcode::READ_CAPACITY), 5);
    }

    #[test]
    fn request_shape() {
        let transport = ScriptedTransport::cdrom();
        transport.push(opcode::READ_CAPACITY, capacity(2048));
        discover(&transport).unwrap();

        let log = transport.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].cdb.len(), 10);
        assert_eq!(log[0].cdb[0], opcode::READ_CAPACITY);
        assert_eq!(log[0].direction, Direction::In);
        assert_eq!(log[0].buffer_len, CAPACITY_BUFFER_SIZE);
        assert_eq!(log[0].timeout, SCST_GENERIC_CDROM_REG_TIMEOUT);
        assert_eq!(log[0].retries, 3);
    }

    #[test]
    fn lun_encoded_for_old_devices() {
        let info = |scsi_level| ScsiDeviceInfo {
            device_type: PeripheralDeviceType::CdRomDevice,
            scsi_level,
            lun: 3,
        };

        let transport = ScriptedTransport::new(info(ScsiLevel::SCSI_2));
        transport.push(opcode::READ_CAPACITY, capacity(2048));
        discover(&transport).unwrap();
        assert_eq!(transport.log()[0].cdb[1], 0x60);

        let transport = ScriptedTransport::new(info(ScsiLevel::SCSI_3));
        transport.push(opcode::READ_CAPACITY, capacity(2048));
        discover(&transport).unwrap();
        assert_eq!(transport.log()[0].cdb[1], 0x00);
    }
}
