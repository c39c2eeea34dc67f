use crate::commands::{CommandBlock, opcode};

/// SCSI INQUIRY command (CDB).
///
/// Requests basic device identification (vendor, product, revision,
/// and type). Issued once when a transport is opened so the handlers
/// can validate the peripheral type and the command-set level.
pub struct InquiryCommand {
    /// Allocation length: how many bytes the host expects back
    /// in the standard INQUIRY response.
    pub alloc_len: u8,
}

impl InquiryCommand {
    /// Construct a new `INQUIRY` command with the given expected response size.
    pub fn new(alloc_len: u8) -> Self {
        Self { alloc_len }
    }
}

impl CommandBlock for InquiryCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::INQUIRY;
        cdb[4] = self.alloc_len; // allocation length
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}

/// SCSI Peripheral Device Type field (from byte 0 of INQUIRY data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralDeviceType {
    /// Direct-access block device (e.g., disk).
    SbcDirectAccessDevice, // 0x00
    /// Sequential-access device (e.g., tape).
    SequentialAccessDevice, // 0x01
    /// CD/DVD device.
    CdRomDevice, // 0x05
    /// Optical memory (e.g., MO disk).
    OpticalMemoryDevice, // 0x07
    /// Medium changer.
    MediumChangerDevice, // 0x08
    /// RBC direct-access device.
    RbcDirectAccessDevice, // 0x0E
    /// Other or unrecognized value.
    OutOfScope(u8),
}

impl From<u8> for PeripheralDeviceType {
    fn from(value: u8) -> Self {
        match value & 0x1f {
            0x00 => PeripheralDeviceType::SbcDirectAccessDevice,
            0x01 => PeripheralDeviceType::SequentialAccessDevice,
            0x05 => PeripheralDeviceType::CdRomDevice,
            0x07 => PeripheralDeviceType::OpticalMemoryDevice,
            0x08 => PeripheralDeviceType::MediumChangerDevice,
            0x0E => PeripheralDeviceType::RbcDirectAccessDevice,
            other => PeripheralDeviceType::OutOfScope(other),
        }
    }
}

impl From<PeripheralDeviceType> for u8 {
    fn from(value: PeripheralDeviceType) -> Self {
        match value {
            PeripheralDeviceType::SbcDirectAccessDevice => 0x00,
            PeripheralDeviceType::SequentialAccessDevice => 0x01,
            PeripheralDeviceType::CdRomDevice => 0x05,
            PeripheralDeviceType::OpticalMemoryDevice => 0x07,
            PeripheralDeviceType::MediumChangerDevice => 0x08,
            PeripheralDeviceType::RbcDirectAccessDevice => 0x0E,
            PeripheralDeviceType::OutOfScope(other) => other,
        }
    }
}

/// Command-set level of a device, numbered like the Linux SCSI midlayer
/// (`SCSI_2` is 3, `SCSI_3` is 4, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScsiLevel(pub u8);

impl ScsiLevel {
    pub const UNKNOWN: ScsiLevel = ScsiLevel(0);
    pub const SCSI_1: ScsiLevel = ScsiLevel(1);
    pub const SCSI_1_CCS: ScsiLevel = ScsiLevel(2);
    pub const SCSI_2: ScsiLevel = ScsiLevel(3);
    pub const SCSI_3: ScsiLevel = ScsiLevel(4);
    pub const SCSI_SPC_2: ScsiLevel = ScsiLevel(5);
    pub const SCSI_SPC_3: ScsiLevel = ScsiLevel(6);

    /// Derive the level from the VERSION and RESPONSE DATA FORMAT fields.
    ///
    /// Versions 2 and up are shifted by one so that they line up with the
    /// constants above, as is a SCSI-1 device reporting the CCS format.
    pub fn from_inquiry(version: u8, response_data_format: u8) -> Self {
        let level = version & 0x07;
        if level >= 2 || (level == 1 && response_data_format & 0x0f == 1) {
            ScsiLevel(level + 1)
        } else {
            ScsiLevel(level)
        }
    }
}

/// Parsed standard INQUIRY response data (first 36 bytes).
///
/// Provides device type, removability flag, version, and
/// vendor/product/revision identification fields.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InquiryData {
    pub peripheral_device_type: PeripheralDeviceType,
    /// Whether the medium is removable.
    pub is_removable: bool,
    /// VERSION field (byte 2).
    pub version: u8,
    /// RESPONSE DATA FORMAT field (low nibble of byte 3).
    pub response_data_format: u8,
    /// Additional Length field (byte 4).
    /// Indicates the number of bytes following byte 4 in the standard INQUIRY data.
    pub additional_length: u8,
    /// Optional ASCII vendor ID (8 bytes, space padded).
    pub vendor_identification: [u8; 8],
    /// Optional ASCII product ID (16 bytes, space padded).
    pub product_identification: [u8; 16],
    /// Optional ASCII product revision (4 bytes, space padded).
    pub product_revision_level: [u8; 4],
}

impl std::fmt::Debug for InquiryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InquiryData")
            .field("peripheral_device_type", &self.peripheral_device_type)
            .field("is_removable", &self.is_removable)
            .field("scsi_level", &self.scsi_level())
            .field("vendor", &self.vendor())
            .field("product", &self.product())
            .field("revision", &self.revision())
            .finish()
    }
}

impl InquiryData {
    /// Parse a standard 36-byte INQUIRY response.
    ///
    /// Returns `None` if the buffer is shorter than 36 bytes.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 36 {
            return None;
        }

        let mut vendor_identification = [0u8; 8];
        vendor_identification.copy_from_slice(&buf[8..16]);

        let mut product_identification = [0u8; 16];
        product_identification.copy_from_slice(&buf[16..32]);

        let mut product_revision_level = [0u8; 4];
        product_revision_level.copy_from_slice(&buf[32..36]);

        Some(Self {
            peripheral_device_type: PeripheralDeviceType::from(buf[0]),
            is_removable: buf[1] & 0x80 != 0,
            version: buf[2],
            response_data_format: buf[3] & 0x0f,
            additional_length: buf[4],
            vendor_identification,
            product_identification,
            product_revision_level,
        })
    }

    pub fn scsi_level(&self) -> ScsiLevel {
        ScsiLevel::from_inquiry(self.version, self.response_data_format)
    }

    /// Vendor ID string (trimmed ASCII).
    pub fn vendor(&self) -> String {
        String::from_utf8_lossy(&self.vendor_identification)
            .trim()
            .to_string()
    }

    /// Product ID string (trimmed ASCII).
    pub fn product(&self) -> String {
        String::from_utf8_lossy(&self.product_identification)
            .trim()
            .to_string()
    }

    /// Revision string (trimmed ASCII).
    pub fn revision(&self) -> String {
        String::from_utf8_lossy(&self.product_revision_level)
            .trim()
            .to_string()
    }
}
