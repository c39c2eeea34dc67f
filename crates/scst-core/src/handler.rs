use std::sync::Arc;

use scst_scsi::{
    ExecError, ExecRequest,
    commands::Direction,
    sense::{SCSI_SENSE_BUFFERSIZE, SenseKey},
    transport::status,
};
use thiserror::Error;

use crate::{
    cmd::{CmdState, ScstCmd},
    dev_type::DevType,
    device::ScstDevice,
    params::ParamsError,
};

#[derive(Error, Debug)]
pub enum AttachError {
    /// The device cannot be driven by this handler.
    #[error("no usable device: {0}")]
    NoDevice(&'static str),
    #[error("failed to allocate {size} bytes for {what}")]
    OutOfResources { what: &'static str, size: usize },
    #[error("unit attention not cleared after {retries} retries")]
    UnitAttentionNotCleared { retries: u32 },
    #[error("failed to obtain device parameters")]
    Parameters(#[from] ParamsError),
}

impl AttachError {
    /// Whether the failure means "no such device" to the middleware, as
    /// opposed to a resource or parameter failure.
    pub fn is_no_device(&self) -> bool {
        matches!(
            self,
            AttachError::NoDevice(_) | AttachError::UnitAttentionNotCleared { .. }
        )
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no handler state is attached to the device")]
pub struct NotAttached;

/// A device handler: the per-peripheral-type plugin the middleware calls
/// around command execution.
///
/// `attach` and `detach` are never called concurrently with each other or
/// with the command hooks for the same device. The command hooks may run
/// concurrently with each other, so `Priv` must tolerate shared access.
pub trait DevHandler: Send + Sync {
    /// Per-device private state created by `attach`.
    type Priv: Send + Sync;

    fn dev_type(&self) -> &DevType;

    fn attach(&self, dev: &mut ScstDevice) -> Result<Self::Priv, AttachError>;

    /// Release the state created by `attach`. `None` when nothing was attached.
    fn detach(&self, dev: &mut ScstDevice, priv_data: Option<Self::Priv>);

    fn parse(&self, cmd: &mut ScstCmd, priv_data: &Self::Priv) -> CmdState;

    fn dev_done(&self, cmd: &mut ScstCmd, priv_data: &Self::Priv) -> CmdState;
}

/// A device together with the handler driving it and the handler's private
/// state, if attached.
///
/// Attach and detach take `&mut self`, command processing takes `&self`;
/// the borrow rules give the serialization the handlers rely on.
pub struct BoundDevice<H: DevHandler> {
    handler: Arc<H>,
    dev: ScstDevice,
    priv_data: Option<H::Priv>,
}

impl<H: DevHandler> BoundDevice<H> {
    pub fn new(handler: Arc<H>, dev: ScstDevice) -> Self {
        Self {
            handler,
            dev,
            priv_data: None,
        }
    }

    pub fn attach(&mut self) -> Result<(), AttachError> {
        if self.priv_data.is_some() {
            log::warn!("Device {} is already attached", self.dev.virt_name);
            return Ok(());
        }
        let priv_data = self.handler.attach(&mut self.dev)?;
        self.priv_data = Some(priv_data);
        Ok(())
    }

    pub fn detach(&mut self) {
        let priv_data = self.priv_data.take();
        self.handler.detach(&mut self.dev, priv_data);
    }

    pub fn is_attached(&self) -> bool {
        self.priv_data.is_some()
    }

    pub fn device(&self) -> &ScstDevice {
        &self.dev
    }

    pub fn priv_data(&self) -> Option<&H::Priv> {
        self.priv_data.as_ref()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn parse(&self, cmd: &mut ScstCmd) -> Result<CmdState, NotAttached> {
        let priv_data = self.priv_data.as_ref().ok_or(NotAttached)?;
        Ok(self.handler.parse(cmd, priv_data))
    }

    pub fn dev_done(&self, cmd: &mut ScstCmd) -> Result<CmdState, NotAttached> {
        let priv_data = self.priv_data.as_ref().ok_or(NotAttached)?;
        Ok(self.handler.dev_done(cmd, priv_data))
    }

    /// Run a command through parse, the backing device and dev_done.
    ///
    /// A command finished during parsing is not sent to the device but still
    /// goes through dev_done.
    pub fn execute(&self, cmd: &mut ScstCmd) -> Result<CmdState, NotAttached> {
        if self.parse(cmd)? == CmdState::Default && cmd.status == status::GOOD {
            self.pass_through(cmd);
        }
        self.dev_done(cmd)
    }

    fn pass_through(&self, cmd: &mut ScstCmd) {
        let Some(scsi_dev) = self.dev.scsi_dev.as_ref() else {
            // LOGICAL UNIT NOT SUPPORTED
            cmd.set_check_condition(SenseKey::IllegalRequest, 0x25, 0x00);
            return;
        };

        let bufflen = cmd.bufflen as usize;
        cmd.data.resize(bufflen, 0);
        let mut sense = [0u8; SCSI_SENSE_BUFFERSIZE];

        let rc = scsi_dev.execute(ExecRequest {
            cdb: &cmd.cdb,
            direction: cmd.data_direction,
            buffer: &mut cmd.data,
            sense: &mut sense,
            timeout: cmd.timeout,
            retries: cmd.retries,
        });

        match rc {
            Ok(transferred) => {
                cmd.status = status::GOOD;
                cmd.resp_data_len = match cmd.data_direction {
                    Direction::In => transferred.min(bufflen) as u32,
                    Direction::Out | Direction::None => 0,
                };
            }
            Err(ExecError::CheckCondition) => {
                cmd.status = status::CHECK_CONDITION;
                let len = (8 + sense[7] as usize).min(sense.len());
                cmd.sense = sense[..len].to_vec();
            }
            Err(ExecError::Status(device_status)) => cmd.status = device_status,
            Err(err) => {
                log::error!(
                    "{} to device {} failed: {err}",
                    cmd.op_name,
                    self.dev.virt_name
                );
                cmd.set_check_condition(SenseKey::AbortedCommand, 0x00, 0x00);
            }
        }
    }
}

impl<H: DevHandler> Drop for BoundDevice<H> {
    fn drop(&mut self) {
        if self.priv_data.is_some() {
            self.detach();
        }
    }
}
