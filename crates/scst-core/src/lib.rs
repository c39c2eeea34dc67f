//! Core of a SCSI target middleware: exported devices, commands, the device
//! handler interface, handler registration and the generic command
//! processing shared by pass-through handlers.

use std::time::Duration;

pub mod cmd;
pub mod dev_type;
pub mod device;
pub mod generic;
pub mod handler;
pub mod params;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trace;

pub use cmd::{CmdState, ScstCmd};
pub use dev_type::DevType;
pub use device::{ControlParams, ScstDevice};
pub use generic::{block_generic_dev_done, calc_block_shift, cdrom_generic_parse};
pub use handler::{AttachError, BoundDevice, DevHandler, NotAttached};
pub use params::{ParamsError, obtain_device_parameters};
pub use registry::{ProcError, RegisterError, Registry};
pub use trace::TraceFlags;

/// How many times an internal command is reissued while the device keeps
/// reporting UNIT ATTENTION.
pub const SCST_DEV_UA_RETRIES: u32 = 5;

/// Transport retries for commands passed through from initiators. Initiators
/// retry themselves.
pub const SCST_PASSTHROUGH_RETRIES: u32 = 0;

/// Transport retries for internal commands issued by handlers.
pub const SCST_INTERNAL_EXEC_RETRIES: u32 = 3;

pub const SCST_GENERIC_CDROM_SMALL_TIMEOUT: Duration = Duration::from_secs(3);
pub const SCST_GENERIC_CDROM_REG_TIMEOUT: Duration = Duration::from_secs(900);
pub const SCST_GENERIC_CDROM_LONG_TIMEOUT: Duration = Duration::from_secs(14000);
