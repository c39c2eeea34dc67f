use std::{
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use crate::{
    commands::{
        CommandBlock, Direction,
        cbw::CswStatus,
        inquiry::{InquiryCommand, InquiryData},
        request_sense::RequestSenseCommand,
    },
    sense::SCSI_SENSE_BUFFERSIZE,
    storage::{Opened, UsbMassStorage, UsbMassStorageReadWriteError},
    transport::{ExecError, ExecRequest, ScsiDeviceInfo, ScsiTransport},
};

const INQUIRY_LEN: usize = 36;
const INQUIRY_TIMEOUT: Duration = Duration::from_secs(3);

/// One logical unit of an opened USB mass-storage device, usable as a
/// [`ScsiTransport`].
///
/// Transactions are serialized: the bulk-only protocol cannot interleave
/// commands on one interface.
pub struct UsbScsiDevice {
    storage: Mutex<UsbMassStorage<Opened>>,
    next_tag: AtomicU32,
    lun: u8,
    inquiry: InquiryData,
}

impl UsbScsiDevice {
    /// Issue INQUIRY to `lun` and keep the answer for [`ScsiTransport::info`].
    pub fn probe(storage: UsbMassStorage<Opened>, lun: u8) -> Result<Self, ExecError> {
        let next_tag = AtomicU32::new(1);
        let mut buf = [0u8; INQUIRY_LEN];
        let mut sense = [0u8; SCSI_SENSE_BUFFERSIZE];
        let cmd = InquiryCommand::new(INQUIRY_LEN as u8);

        let len = run(
            &storage,
            &next_tag,
            lun,
            ExecRequest {
                cdb: &cmd.cdb(),
                direction: Direction::In,
                buffer: &mut buf,
                sense: &mut sense,
                timeout: INQUIRY_TIMEOUT,
                retries: 3,
            },
        )?;

        let inquiry = InquiryData::parse(&buf[..len]).ok_or_else(|| {
            ExecError::Transport("short INQUIRY response".into())
        })?;
        log::debug!("lun {lun}: {inquiry:?}");

        Ok(Self {
            storage: Mutex::new(storage),
            next_tag,
            lun,
            inquiry,
        })
    }

    pub fn inquiry(&self) -> &InquiryData {
        &self.inquiry
    }
}

impl ScsiTransport for UsbScsiDevice {
    fn info(&self) -> ScsiDeviceInfo {
        ScsiDeviceInfo {
            device_type: self.inquiry.peripheral_device_type,
            scsi_level: self.inquiry.scsi_level(),
            lun: self.lun,
        }
    }

    fn execute(&self, request: ExecRequest<'_>) -> Result<usize, ExecError> {
        let storage = self
            .storage
            .lock()
            .map_err(|_| ExecError::Transport(Box::new(UsbMassStorageReadWriteError::Poisoned)))?;
        run(&storage, &self.next_tag, self.lun, request)
    }
}

fn run(
    storage: &UsbMassStorage<Opened>,
    next_tag: &AtomicU32,
    lun: u8,
    request: ExecRequest<'_>,
) -> Result<usize, ExecError> {
    let ExecRequest {
        cdb,
        direction,
        buffer,
        sense,
        timeout,
        retries,
    } = request;

    let expected = buffer.len();
    let mut attempt = 0;
    let csw = loop {
        let tag = next_tag.fetch_add(1, Ordering::Relaxed);
        match storage.transaction(tag, lun, cdb, direction, buffer, timeout) {
            Ok(csw) => break csw,
            Err(err) if attempt < retries => {
                log::debug!("bulk-only transaction failed ({err}), retry {}", attempt + 1);
                storage.reset_recovery(timeout).ok();
                attempt += 1;
            }
            Err(UsbMassStorageReadWriteError::UsbDeviceBulkTransferFailed(rusb::Error::Timeout)) => {
                return Err(ExecError::Timeout);
            }
            Err(err) => return Err(ExecError::Transport(Box::new(err))),
        }
    };

    match csw.status() {
        CswStatus::Passed => {
            let residue = csw.data_residue.get() as usize;
            if residue > 0 {
                log::debug!("short transfer: {residue} of {expected} bytes not sent");
            }
            Ok(expected.saturating_sub(residue))
        }
        CswStatus::Failed => {
            request_sense(storage, next_tag, lun, sense, timeout);
            Err(ExecError::CheckCondition)
        }
        CswStatus::PhaseError | CswStatus::Reserved(_) => {
            storage.reset_recovery(timeout).ok();
            Err(ExecError::Transport(Box::new(
                UsbMassStorageReadWriteError::PhaseError,
            )))
        }
    }
}

fn request_sense(
    storage: &UsbMassStorage<Opened>,
    next_tag: &AtomicU32,
    lun: u8,
    sense: &mut [u8],
    timeout: Duration,
) {
    sense.fill(0);
    let alloc_len = sense.len().min(252);
    let cmd = RequestSenseCommand::new(alloc_len as u8);
    let tag = next_tag.fetch_add(1, Ordering::Relaxed);

    match storage.transaction(tag, lun, &cmd.cdb(), Direction::In, &mut sense[..alloc_len], timeout) {
        Ok(csw) if csw.status() == CswStatus::Passed => {}
        Ok(csw) => log::warn!("REQUEST SENSE failed with {:?}", csw.status()),
        Err(err) => log::warn!("REQUEST SENSE failed: {err}"),
    }
}
