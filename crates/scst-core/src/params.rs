use scst_scsi::{
    ExecError, ExecRequest,
    commands::{
        CommandBlock, Direction,
        mode_sense::{CONTROL_MODE_PAGE, MODE_PARAMETER_HEADER_6_LEN, ModeSense6Command},
    },
    sense::{self, SCSI_SENSE_BUFFERSIZE, SenseKey, SenseMatch},
};
use thiserror::Error;

use crate::{
    SCST_DEV_UA_RETRIES, SCST_GENERIC_CDROM_SMALL_TIMEOUT,
    device::{ControlParams, QueueAlgorithm, ScstDevice, TaskSetType},
    trace::hex_dump,
};

const CONTROL_PAGE_LEN: usize = 12;
const BUFFER_LEN: usize = MODE_PARAMETER_HEADER_6_LEN + CONTROL_PAGE_LEN;

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("device {0} has no backing SCSI device")]
    NoDevice(String),
    #[error("unit attention not cleared after {0} retries")]
    UnitAttention(u32),
    #[error("MODE SENSE of the control mode page failed")]
    ModeSense(#[source] ExecError),
}

/// Read the backing device's Control mode page into `dev.params`.
///
/// A device that rejects the page (ILLEGAL REQUEST) or is not ready keeps the
/// default parameters. Unit attentions are retried like during capacity
/// discovery.
pub fn obtain_device_parameters(dev: &mut ScstDevice) -> Result<(), ParamsError> {
    let scsi_dev = dev
        .scsi_dev
        .clone()
        .ok_or_else(|| ParamsError::NoDevice(dev.virt_name.clone()))?;

    let cmd = ModeSense6Command::new(CONTROL_MODE_PAGE, BUFFER_LEN as u8);
    let cdb = cmd.cdb();
    let mut buffer = [0u8; BUFFER_LEN];
    let mut sense_buffer = [0u8; SCSI_SENSE_BUFFERSIZE];

    let mut retries = SCST_DEV_UA_RETRIES;
    loop {
        buffer.fill(0);
        sense_buffer.fill(0);

        log::debug!("Doing internal MODE SENSE");
        let rc = scsi_dev.execute(ExecRequest {
            cdb: &cdb,
            direction: Direction::In,
            buffer: &mut buffer,
            sense: &mut sense_buffer,
            timeout: SCST_GENERIC_CDROM_SMALL_TIMEOUT,
            retries: 0,
        });

        let err = match rc {
            Ok(_) => {
                dev.params = parse_control_page(&buffer);
                log::debug!("Device {}: {:?}", dev.virt_name, dev.params);
                return Ok(());
            }
            Err(err) => err,
        };

        if matches!(err, ExecError::CheckCondition) {
            if sense::analyze_sense(&sense_buffer, SenseMatch::Key(SenseKey::IllegalRequest)) {
                log::info!(
                    "Device {} doesn't support control mode page, using defaults",
                    dev.virt_name
                );
                dev.params = ControlParams::default();
                return Ok(());
            }
            if sense::analyze_sense(&sense_buffer, SenseMatch::Key(SenseKey::NotReady)) {
                log::info!("Device {} not ready, using defaults", dev.virt_name);
                dev.params = ControlParams::default();
                return Ok(());
            }
            if sense::is_unit_attention(&sense_buffer) {
                retries -= 1;
                if retries == 0 {
                    log::error!("UA not cleared after {SCST_DEV_UA_RETRIES} retries");
                    return Err(ParamsError::UnitAttention(SCST_DEV_UA_RETRIES));
                }
                continue;
            }
        }

        log::error!(
            "Internal MODE SENSE to device {} failed: {:#x}\n{}",
            dev.virt_name,
            err.status(),
            hex_dump(&sense_buffer)
        );
        return Err(ParamsError::ModeSense(err));
    }
}

fn parse_control_page(buffer: &[u8]) -> ControlParams {
    let page = &buffer[MODE_PARAMETER_HEADER_6_LEN..];
    let queue_alg = QueueAlgorithm::from(page[3] >> 4);

    ControlParams {
        tst: if (page[2] >> 5) & 0x07 == 1 {
            TaskSetType::SeparateTaskSets
        } else {
            TaskSetType::SharedTaskSet
        },
        queue_alg,
        swp: page[4] & 0x08 != 0,
        tas: page[5] & 0x40 != 0,
        d_sense: page[2] & 0x04 != 0,
        has_own_order_mgmt: queue_alg == QueueAlgorithm::RestrictedReorder,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scst_scsi::{
        commands::{inquiry::PeripheralDeviceType, opcode},
        sense::SenseKey,
    };

    use super::*;
    use crate::testing::{Reply, ScriptedTransport};

    fn control_page(byte2: u8, byte3: u8, byte4: u8, byte5: u8) -> Vec<u8> {
        let mut data = vec![0u8; BUFFER_LEN];
        data[0] = (BUFFER_LEN - 1) as u8;
        data[4] = CONTROL_MODE_PAGE;
        data[5] = 0x0a;
        data[6] = byte2;
        data[7] = byte3;
        data[8] = byte4;
        data[9] = byte5;
        data
    }

    fn device(transport: &Arc<ScriptedTransport>) -> ScstDevice {
        ScstDevice::new(
            "cd0",
            PeripheralDeviceType::CdRomDevice,
            Some(transport.clone() as Arc<dyn scst_scsi::ScsiTransport>),
        )
    }

    #[test]
    fn parses_control_page() {
        let transport = Arc::new(ScriptedTransport::cdrom());
        transport.push(
            opcode::MODE_SENSE_6,
            Reply::Data(control_page(0x24, 0x10, 0x08, 0x40)),
        );
        let mut dev = device(&transport);

        obtain_device_parameters(&mut dev).unwrap();
        assert_eq!(dev.params.tst, TaskSetType::SeparateTaskSets);
        assert_eq!(dev.params.queue_alg, QueueAlgorithm::UnrestrictedReorder);
        assert!(dev.params.swp);
        assert!(dev.params.tas);
        assert!(dev.params.d_sense);
        assert!(!dev.params.has_own_order_mgmt);
    }

    #[test]
    fn unsupported_page_keeps_defaults() {
        let transport = Arc::new(ScriptedTransport::cdrom());
        transport.push(
            opcode::MODE_SENSE_6,
            Reply::Sense(SenseKey::IllegalRequest, 0x24, 0),
        );
        let mut dev = device(&transport);

        obtain_device_parameters(&mut dev).unwrap();
        assert_eq!(dev.params, ControlParams::default());
    }

    #[test]
    fn unit_attention_is_retried() {
        let transport = Arc::new(ScriptedTransport::cdrom());
        transport.push(opcode::MODE_SENSE_6, Reply::Sense(SenseKey::UnitAttention, 0x29, 0));
        transport.push(
            opcode::MODE_SENSE_6,
            Reply::Data(control_page(0x00, 0x00, 0x00, 0x00)),
        );
        let mut dev = device(&transport);

        obtain_device_parameters(&mut dev).unwrap();
        assert_eq!(transport.executed(opcode::MODE_SENSE_6), 2);
        assert_eq!(dev.params.tst, TaskSetType::SharedTaskSet);
    }

    #[test]
    fn hardware_error_fails() {
        let transport = Arc::new(ScriptedTransport::cdrom());
        transport.push(
            opcode::MODE_SENSE_6,
            Reply::Sense(SenseKey::HardwareError, 0x44, 0),
        );
        let mut dev = device(&transport);

        assert!(matches!(
            obtain_device_parameters(&mut dev),
            Err(ParamsError::ModeSense(ExecError::CheckCondition))
        ));
    }

    #[test]
    fn missing_backing_device() {
        let mut dev = ScstDevice::new("cd0", PeripheralDeviceType::CdRomDevice, None);
        assert!(matches!(
            obtain_device_parameters(&mut dev),
            Err(ParamsError::NoDevice(_))
        ));
    }
}
