use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use scst_cdrom::CdromParams;
use scst_core::{BoundDevice, Registry, ScstCmd, ScstDevice, registry::entry_path};
use scst_scsi::{
    ScsiTransport,
    commands::{
        CommandBlock,
        inquiry::PeripheralDeviceType,
        read_capacity::{ReadCapacity10Command, ReadCapacity10Data},
    },
    storage::UsbScsiDevice,
};

use crate::commands::mass_storage_devices;

pub fn probe(device: Option<(u16, u16)>, lun: u8, trace_level: Option<String>) -> Result<()> {
    let (vendor_id, product_id, storage) = mass_storage_devices()?
        .into_iter()
        .find(|(vendor_id, product_id, _)| match device {
            Some(wanted) => wanted == (*vendor_id, *product_id),
            None => true,
        })
        .ok_or_else(|| anyhow!("No matching usb mass-storage device found"))?;

    log::info!("Opening {vendor_id:04x}:{product_id:04x}");
    let storage = storage.open()?;
    let scsi_dev = UsbScsiDevice::probe(storage, lun).context("INQUIRY failed")?;

    let inquiry = scsi_dev.inquiry();
    println!(
        "{} {} {} ({:?}, SCSI level {})",
        inquiry.vendor(),
        inquiry.product(),
        inquiry.revision(),
        inquiry.peripheral_device_type,
        inquiry.scsi_level().0
    );
    if inquiry.peripheral_device_type != PeripheralDeviceType::CdRomDevice {
        bail!("Lun {lun} is not a CD-ROM device");
    }

    let registry = Arc::new(Registry::new());
    let module = scst_cdrom::init(registry.clone())?;

    if let Some(command) = trace_level {
        let path = entry_path(scst_cdrom::CDROM_NAME);
        registry
            .proc_write(&path, &command)
            .with_context(|| format!("Failed to write {path:?}"))?;
        print!("{}", registry.proc_read(&path)?);
    }

    let scsi_dev: Arc<dyn ScsiTransport> = Arc::new(scsi_dev);
    let dev = ScstDevice::new(
        format!("cdrom{lun}"),
        PeripheralDeviceType::CdRomDevice,
        Some(scsi_dev),
    );
    let mut bound = BoundDevice::new(module.handler(), dev);
    bound.attach().context("Failed to attach the CD-ROM handler")?;

    let block_shift = bound
        .priv_data()
        .map(CdromParams::block_shift)
        .ok_or_else(|| anyhow!("Handler state missing after attach"))?;
    println!("Block size: {} bytes (shift {block_shift})", 1u32 << block_shift);
    println!("Control parameters: {:?}", bound.device().params);

    // Goes through the handler's hooks like any initiator command.
    let mut cmd = ScstCmd::new(ReadCapacity10Command::new(0).cdb());
    bound.execute(&mut cmd)?;
    match ReadCapacity10Data::parse(cmd.response()) {
        Some(capacity) if cmd.is_good() => println!(
            "Capacity: {} blocks, {} bytes",
            capacity.last_logical_block_address as u64 + 1,
            capacity.total_capacity_bytes()
        ),
        _ => log::warn!("No medium capacity reported (status {:#04x})", cmd.status),
    }

    bound.detach();
    module.exit();
    Ok(())
}
