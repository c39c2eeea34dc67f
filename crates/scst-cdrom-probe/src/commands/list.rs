use anyhow::Result;

use crate::commands::mass_storage_devices;

pub fn list() -> Result<()> {
    let devices = mass_storage_devices()?;

    if devices.is_empty() {
        log::warn!("No usb mass-storage devices found.");
        return Ok(());
    }

    for (vendor_id, product_id, storage) in devices {
        println!(
            "{vendor_id:04x}:{product_id:04x}  bus {:03} address {:03}  configuration {}",
            storage.device.bus_number(),
            storage.device.address(),
            storage.device_config_number
        );
    }

    Ok(())
}
