//! SCSI CD-ROM (type 5) device handler.
//!
//! At attach the handler issues READ CAPACITY to the backing device to learn
//! its logical block size, clearing any pending unit attentions on the way.
//! Incoming commands are then classified with that block size, and every
//! successful READ CAPACITY passing through updates it, so a medium change
//! with a different sector size is picked up without reattaching.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use scst_core::{
    AttachError, CmdState, DevHandler, DevType, RegisterError, Registry, SCST_PASSTHROUGH_RETRIES,
    ScstCmd, ScstDevice, block_generic_dev_done, cdrom_generic_parse, obtain_device_parameters,
    registry::ProcError, trace::DEFAULT_DEV_LOG_FLAGS,
};
use scst_scsi::commands::inquiry::PeripheralDeviceType;
use thiserror::Error;

mod capacity;

pub const CDROM_NAME: &str = "dev_cdrom";

/// 2048-byte sectors.
pub const CDROM_DEF_BLOCK_SHIFT: u32 = 11;

/// Per-device state.
#[derive(Debug)]
pub struct CdromParams {
    block_shift: AtomicU32,
}

impl CdromParams {
    fn new(block_shift: u32) -> Self {
        Self {
            block_shift: AtomicU32::new(block_shift),
        }
    }

    pub fn block_shift(&self) -> u32 {
        self.block_shift.load(Ordering::Relaxed)
    }

    /// Record a newly observed block shift; 0 restores the default.
    pub fn set_block_shift(&self, block_shift: u32) {
        let block_shift = match block_shift {
            0 => CDROM_DEF_BLOCK_SHIFT,
            shift => shift,
        };
        self.block_shift.store(block_shift, Ordering::Relaxed);
    }
}

pub fn cdrom_devtype() -> DevType {
    DevType {
        parse_atomic: true,
        dev_done_atomic: true,
        ..DevType::new(
            CDROM_NAME,
            PeripheralDeviceType::CdRomDevice,
            DEFAULT_DEV_LOG_FLAGS,
        )
    }
}

#[derive(Debug)]
pub struct CdromHandler {
    dev_type: DevType,
}

impl CdromHandler {
    pub fn new() -> Self {
        Self {
            dev_type: cdrom_devtype(),
        }
    }
}

impl Default for CdromHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DevHandler for CdromHandler {
    type Priv = CdromParams;

    fn dev_type(&self) -> &DevType {
        &self.dev_type
    }

    fn attach(&self, dev: &mut ScstDevice) -> Result<CdromParams, AttachError> {
        if dev.dev_type != self.dev_type.peripheral_type {
            log::error!(
                "Device {} has type {:?}, not {:?}",
                dev.virt_name,
                dev.dev_type,
                self.dev_type.peripheral_type
            );
            return Err(AttachError::NoDevice("device type not handled by dev_cdrom"));
        }

        let scsi_dev = match &dev.scsi_dev {
            Some(scsi_dev) if scsi_dev.info().device_type == dev.dev_type => scsi_dev.clone(),
            _ => {
                log::error!("SCSI device not define or illegal type");
                return Err(AttachError::NoDevice("SCSI device not define or illegal type"));
            }
        };

        let block_shift = capacity::discover_block_shift(&*scsi_dev, &self.dev_type.trace_flags)?;

        obtain_device_parameters(dev).map_err(|err| {
            log::error!(
                "Failed to obtain control parameters for device {}",
                dev.virt_name
            );
            AttachError::from(err)
        })?;

        log::debug!(
            "Device {} attached, block_shift {block_shift}",
            dev.virt_name
        );
        Ok(CdromParams::new(block_shift))
    }

    fn detach(&self, dev: &mut ScstDevice, params: Option<CdromParams>) {
        if let Some(params) = params {
            log::debug!(
                "Device {} detached, block_shift {}",
                dev.virt_name,
                params.block_shift()
            );
        }
    }

    fn parse(&self, cmd: &mut ScstCmd, params: &CdromParams) -> CmdState {
        // Rejected commands already carry CHECK CONDITION.
        if let Err(err) = cdrom_generic_parse(cmd, |_| params.block_shift()) {
            log::debug!("Command rejected during parse: {err}");
        }
        cmd.retries = SCST_PASSTHROUGH_RETRIES;
        CmdState::Default
    }

    fn dev_done(&self, cmd: &mut ScstCmd, params: &CdromParams) -> CmdState {
        block_generic_dev_done(cmd, |_, block_shift| params.set_block_shift(block_shift))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InitError {
    #[error("failed to register device handler {CDROM_NAME}")]
    Register(#[from] RegisterError),
    #[error("failed to build the administrative entry for {CDROM_NAME}")]
    Proc(#[from] ProcError),
}

/// The handler while registered with a [`Registry`]. Dropping it
/// unregisters the handler.
pub struct CdromModule {
    registry: Arc<Registry>,
    handler: Arc<CdromHandler>,
    registered: bool,
}

/// Register the CD-ROM handler type, with its administrative entry when the
/// `proc` feature is enabled.
pub fn init(registry: Arc<Registry>) -> Result<CdromModule, InitError> {
    let handler = Arc::new(CdromHandler::new());
    let dev_type = handler.dev_type();

    registry.register_dev_driver(dev_type)?;

    #[cfg(feature = "proc")]
    if let Err(err) = registry.build_std_proc(dev_type) {
        registry.unregister_dev_driver(dev_type);
        return Err(err.into());
    }

    Ok(CdromModule {
        registry,
        handler,
        registered: true,
    })
}

impl CdromModule {
    /// The handler to bind devices to.
    pub fn handler(&self) -> Arc<CdromHandler> {
        self.handler.clone()
    }

    pub fn exit(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if !std::mem::take(&mut self.registered) {
            return;
        }
        let dev_type = self.handler.dev_type();
        #[cfg(feature = "proc")]
        self.registry.destroy_std_proc(dev_type);
        self.registry.unregister_dev_driver(dev_type);
    }
}

impl Drop for CdromModule {
    fn drop(&mut self) {
        self.unregister();
    }
}
