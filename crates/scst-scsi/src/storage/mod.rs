use std::time::Duration;

use rusb::{ConfigDescriptor, Device, DeviceHandle, Direction, GlobalContext, TransferType};
use thiserror::Error;
use zerocopy::IntoBytes;

use crate::commands::{
    Direction as DataDirection,
    cbw::{CSW_LEN, Cbw, Csw},
};

mod scsi_device;

pub use scsi_device::UsbScsiDevice;

/// Bulk-Only Mass Storage Reset class request.
const BULK_ONLY_RESET: u8 = 0xff;

#[derive(Error, Debug)]
pub enum UsbMassStorageError {
    #[error("failed to get usb devices from rusb")]
    FailedToGetUsbDevices,
    #[error("failed to open usb devices from rusb")]
    FailedToOpenUsbDevice,
    #[error("usb configuration {0} not found")]
    ConfigurationNotFound(u8),
    #[error("failed to read the usb configuration descriptor")]
    ConfigDescriptor(#[source] rusb::Error),
    #[error("no bulk-only SCSI interface on the usb device")]
    NoBulkOnlyInterface,
    #[error("failed to claim usb interface {0}")]
    ClaimInterface(u8, #[source] rusb::Error),
}

#[derive(Debug, Clone)]
pub struct UsbMassStorage<S = Closed> {
    pub device: Device<GlobalContext>,
    pub device_config_number: u8,
    pub extra: S,
}

#[derive(Debug)]
pub struct Opened {
    pub handle: DeviceHandle<GlobalContext>,
    pub bulk_only_transport: BulkOnlyTransport,
}

#[derive(Debug, Clone)]
pub struct Closed;

#[derive(Debug)]
pub struct BulkOnlyTransport {
    pub in_address: u8,
    pub in_max_size: u16,
    pub out_address: u8,
    pub out_max_size: u16,
    pub interface_number: u8,
}

impl UsbMassStorage<Closed> {
    pub fn open(self) -> Result<UsbMassStorage<Opened>, UsbMassStorageError> {
        let handle = self
            .device
            .open()
            .map_err(|_| UsbMassStorageError::FailedToOpenUsbDevice)?;

        handle.set_auto_detach_kernel_driver(true).ok();

        handle
            .set_active_configuration(self.device_config_number)
            .ok();

        let config = self
            .device
            .config_descriptor_by_number(self.device_config_number)
            .map_err(UsbMassStorageError::ConfigDescriptor)?
            .ok_or(UsbMassStorageError::ConfigurationNotFound(
                self.device_config_number,
            ))?;

        let bulk_only_transport =
            find_bulk_only_transport(&config).ok_or(UsbMassStorageError::NoBulkOnlyInterface)?;

        handle
            .claim_interface(bulk_only_transport.interface_number)
            .map_err(|err| {
                UsbMassStorageError::ClaimInterface(bulk_only_transport.interface_number, err)
            })?;
        handle
            .set_alternate_setting(bulk_only_transport.interface_number, 0)
            .ok();

        handle.clear_halt(bulk_only_transport.in_address).ok();
        handle.clear_halt(bulk_only_transport.out_address).ok();

        Ok(UsbMassStorage::<Opened> {
            device: self.device,
            device_config_number: self.device_config_number,
            extra: Opened {
                handle,
                bulk_only_transport,
            },
        })
    }
}

fn find_bulk_only_transport(config: &ConfigDescriptor) -> Option<BulkOnlyTransport> {
    for interface in config.interfaces() {
        for interface_descriptor in interface.descriptors() {
            // Mass storage class, SCSI transparent command set
            if interface_descriptor.class_code() != 0x08
                || interface_descriptor.sub_class_code() != 0x06
            {
                continue;
            }

            // Bulk-Only (BBB) transport
            if interface_descriptor.protocol_code() != 0x50 {
                continue;
            }

            let mut transfer_out_info = None;
            let mut transfer_in_info = None;

            for endpoint in interface_descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }

                match endpoint.direction() {
                    Direction::In => {
                        transfer_in_info = Some((endpoint.address(), endpoint.max_packet_size()))
                    }
                    Direction::Out => {
                        transfer_out_info = Some((endpoint.address(), endpoint.max_packet_size()))
                    }
                }
            }

            if let Some(in_info) = transfer_in_info
                && let Some(out_info) = transfer_out_info
            {
                return Some(BulkOnlyTransport {
                    in_address: in_info.0,
                    in_max_size: in_info.1,
                    out_address: out_info.0,
                    out_max_size: out_info.1,
                    interface_number: interface_descriptor.interface_number(),
                });
            }
        }
    }

    None
}

impl UsbMassStorage<Opened> {
    /// Close the channel
    pub fn close(self) -> UsbMassStorage<Closed> {
        UsbMassStorage::<Closed> {
            device: self.device,
            device_config_number: self.device_config_number,
            extra: Closed,
        }
    }

    /// Run one bulk-only transaction: CBW, optional data phase, CSW.
    ///
    /// A stalled data phase is cleared and the CSW is still collected, since
    /// the device reports the actual outcome there.
    pub fn transaction(
        &self,
        tag: u32,
        lun: u8,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<Csw, UsbMassStorageReadWriteError> {
        if cdb.len() > 16 {
            return Err(UsbMassStorageReadWriteError::CommandTooLong(cdb.len()));
        }

        let bot = &self.extra.bulk_only_transport;
        let handle = &self.extra.handle;

        let transfer_len = match direction {
            DataDirection::None => 0,
            DataDirection::In | DataDirection::Out => data.len() as u32,
        };
        let cbw = Cbw::new(tag, lun, transfer_len, direction, cdb);
        handle.write_bulk(bot.out_address, cbw.as_bytes(), timeout)?;

        if transfer_len != 0 {
            let (endpoint, moved) = match direction {
                DataDirection::In => (bot.in_address, handle.read_bulk(bot.in_address, data, timeout)),
                _ => (bot.out_address, handle.write_bulk(bot.out_address, data, timeout)),
            };
            match moved {
                Ok(n) => log::trace!("data phase moved {n} of {transfer_len} bytes"),
                Err(rusb::Error::Pipe) => {
                    log::debug!("data phase stalled on endpoint {endpoint:#04x}");
                    handle.clear_halt(endpoint).ok();
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mut raw = [0u8; CSW_LEN];
        let n = match handle.read_bulk(bot.in_address, &mut raw, timeout) {
            Err(rusb::Error::Pipe) => {
                handle.clear_halt(bot.in_address).ok();
                handle.read_bulk(bot.in_address, &mut raw, timeout)?
            }
            other => other?,
        };
        if n != CSW_LEN {
            return Err(UsbMassStorageReadWriteError::InvalidCsw);
        }

        let csw = Csw::parse(&raw).ok_or(UsbMassStorageReadWriteError::InvalidCsw)?;
        if csw.tag.get() != tag {
            return Err(UsbMassStorageReadWriteError::TagMismatch {
                expected: tag,
                got: csw.tag.get(),
            });
        }

        Ok(csw)
    }

    /// Bulk-only reset recovery: class reset, then clear both bulk halts.
    pub fn reset_recovery(&self, timeout: Duration) -> Result<(), UsbMassStorageReadWriteError> {
        let bot = &self.extra.bulk_only_transport;
        let request_type = rusb::request_type(
            Direction::Out,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        self.extra.handle.write_control(
            request_type,
            BULK_ONLY_RESET,
            0,
            bot.interface_number as u16,
            &[],
            timeout,
        )?;
        self.extra.handle.clear_halt(bot.in_address)?;
        self.extra.handle.clear_halt(bot.out_address)?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum UsbMassStorageReadWriteError {
    #[error("command block of {0} bytes does not fit a CBW")]
    CommandTooLong(usize),
    #[error("malformed command status wrapper")]
    InvalidCsw,
    #[error("command status wrapper tag {got:#x} does not match {expected:#x}")]
    TagMismatch { expected: u32, got: u32 },
    #[error("phase error reported by the device")]
    PhaseError,
    #[error("usb device lock poisoned")]
    Poisoned,
    #[error("bulk transfer error")]
    UsbDeviceBulkTransferFailed(#[from] rusb::Error),
}

impl Drop for Opened {
    fn drop(&mut self) {
        let _ = self.handle.reset();
        let _ = self
            .handle
            .release_interface(self.bulk_only_transport.interface_number);
    }
}

impl UsbMassStorage {
    pub fn list() -> Result<Vec<UsbMassStorage<Closed>>, UsbMassStorageError> {
        let mut devices = Vec::new();
        let rusb_devices =
            rusb::devices().map_err(|_| UsbMassStorageError::FailedToGetUsbDevices)?;

        for device in rusb_devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };

            'configs: for i in 0..desc.num_configurations() {
                let config_desc = match device.config_descriptor(i) {
                    Ok(config) => config,
                    Err(_) => continue,
                };

                for interface in config_desc.interfaces() {
                    for interface_desc in interface.descriptors() {
                        if interface_desc.class_code() != 0x08 {
                            continue;
                        }
                        devices.push(UsbMassStorage {
                            device: device.clone(),
                            device_config_number: config_desc.number(),
                            extra: Closed,
                        });
                        break 'configs;
                    }
                }
            }
        }

        Ok(devices)
    }
}

pub trait ConfigDescriptorExt {
    fn config_descriptor_by_number(&self, number: u8) -> rusb::Result<Option<ConfigDescriptor>>;
}

impl ConfigDescriptorExt for Device<GlobalContext> {
    fn config_descriptor_by_number(&self, number: u8) -> rusb::Result<Option<ConfigDescriptor>> {
        let desc = self.device_descriptor()?;
        for idx in 0..desc.num_configurations() {
            let config = self.config_descriptor(idx)?;
            if config.number() == number {
                return Ok(Some(config));
            }
        }
        Ok(None)
    }
}
