use anyhow::{Context, Result};
use scst_scsi::storage::{Closed, UsbMassStorage};

pub mod list;
pub mod probe;

/// Mass-storage devices with their vendor and product ids.
pub fn mass_storage_devices() -> Result<Vec<(u16, u16, UsbMassStorage<Closed>)>> {
    let mut devices = Vec::new();

    for storage in UsbMassStorage::list().context("Failed to list usb devices")? {
        let desc = match storage.device.device_descriptor() {
            Ok(desc) => desc,
            Err(err) => {
                log::debug!("Skipping device without descriptor: {err}");
                continue;
            }
        };
        devices.push((desc.vendor_id(), desc.product_id(), storage));
    }

    Ok(devices)
}
