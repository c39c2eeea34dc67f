use std::sync::Arc;

use scst_scsi::{ScsiTransport, commands::inquiry::PeripheralDeviceType};

/// Task set type (TST field of the Control mode page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSetType {
    SharedTaskSet,
    SeparateTaskSets,
}

/// QUEUE ALGORITHM MODIFIER field of the Control mode page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAlgorithm {
    RestrictedReorder,
    UnrestrictedReorder,
    Reserved(u8),
}

impl From<u8> for QueueAlgorithm {
    fn from(value: u8) -> Self {
        match value & 0x0f {
            0 => QueueAlgorithm::RestrictedReorder,
            1 => QueueAlgorithm::UnrestrictedReorder,
            other => QueueAlgorithm::Reserved(other),
        }
    }
}

/// Control parameters of the backing device, from its Control mode page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlParams {
    pub tst: TaskSetType,
    pub queue_alg: QueueAlgorithm,
    /// Software write protect.
    pub swp: bool,
    /// Task aborted status.
    pub tas: bool,
    /// Descriptor format sense data.
    pub d_sense: bool,
    /// The device orders commands itself.
    pub has_own_order_mgmt: bool,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            tst: TaskSetType::SeparateTaskSets,
            queue_alg: QueueAlgorithm::RestrictedReorder,
            swp: false,
            tas: false,
            d_sense: false,
            has_own_order_mgmt: false,
        }
    }
}

/// A device exported by the target, optionally backed by a real SCSI device.
pub struct ScstDevice {
    pub virt_name: String,
    /// Type the device is exported as; must match the backing device's type.
    pub dev_type: PeripheralDeviceType,
    pub scsi_dev: Option<Arc<dyn ScsiTransport>>,
    pub params: ControlParams,
}

impl ScstDevice {
    pub fn new(
        virt_name: impl Into<String>,
        dev_type: PeripheralDeviceType,
        scsi_dev: Option<Arc<dyn ScsiTransport>>,
    ) -> Self {
        Self {
            virt_name: virt_name.into(),
            dev_type,
            scsi_dev,
            params: ControlParams::default(),
        }
    }
}

impl std::fmt::Debug for ScstDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScstDevice")
            .field("virt_name", &self.virt_name)
            .field("dev_type", &self.dev_type)
            .field("scsi_dev", &self.scsi_dev.as_ref().map(|dev| dev.info()))
            .field("params", &self.params)
            .finish()
    }
}
