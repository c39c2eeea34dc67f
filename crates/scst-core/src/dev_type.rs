use std::sync::Arc;

use scst_scsi::commands::inquiry::PeripheralDeviceType;

use crate::trace::TraceFlags;

/// Descriptor of a device handler's type, handed to
/// [`Registry::register_dev_driver`](crate::registry::Registry::register_dev_driver).
///
/// One descriptor is shared by every device the handler drives; per-device
/// state lives in the handler's private data instead.
#[derive(Debug, Clone)]
pub struct DevType {
    pub name: &'static str,
    pub peripheral_type: PeripheralDeviceType,
    /// Worker threads the middleware dedicates to the type.
    pub threads_num: u32,
    /// `parse` never blocks and may run in atomic context.
    pub parse_atomic: bool,
    /// `dev_done` never blocks and may run in atomic context.
    pub dev_done_atomic: bool,
    pub trace_flags: Arc<TraceFlags>,
}

impl DevType {
    pub fn new(name: &'static str, peripheral_type: PeripheralDeviceType, default_trace_flags: u32) -> Self {
        Self {
            name,
            peripheral_type,
            threads_num: 1,
            parse_atomic: false,
            dev_done_atomic: false,
            trace_flags: Arc::new(TraceFlags::new(default_trace_flags)),
        }
    }
}
