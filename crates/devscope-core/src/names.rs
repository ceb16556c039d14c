//! Well-known name tables for GUIDs, protocols and Bluetooth assigned numbers
//!
//! The tables are immutable once built. They are shared behind an `Arc` and
//! handed to whoever needs them, so tests can substitute their own fixtures.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::value::PropertyValue;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to read name table: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse name table: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Well-known identifiers used by the resolvers
pub mod guids {
    use uuid::Uuid;

    pub const DEVCLASS_BLUETOOTH: Uuid = Uuid::from_u128(0xe0cbf06c_cd8b_4647_bb8a_263b43f0f974);
    pub const DEVCLASS_HIDCLASS: Uuid = Uuid::from_u128(0x745a17a0_74d3_11d0_b6fe_00a0c90f57da);
    pub const DEVCLASS_KEYBOARD: Uuid = Uuid::from_u128(0x4d36e96b_e325_11ce_bfc1_08002be10318);
    pub const DEVCLASS_MOUSE: Uuid = Uuid::from_u128(0x4d36e96f_e325_11ce_bfc1_08002be10318);
    pub const DEVCLASS_NET: Uuid = Uuid::from_u128(0x4d36e972_e325_11ce_bfc1_08002be10318);
    pub const DEVCLASS_USB: Uuid = Uuid::from_u128(0x36fc9e60_c465_11cf_8056_444553540000);
    pub const DEVCLASS_UNKNOWN: Uuid = Uuid::from_u128(0x4d36e97e_e325_11ce_bfc1_08002be10318);

    pub const PROTOCOL_UPNP: Uuid = Uuid::from_u128(0x0e261de4_12f0_46e6_91ba_428607ccef64);
    pub const PROTOCOL_WSD: Uuid = Uuid::from_u128(0x782232aa_a2f9_4993_971b_aedc551346b0);
    pub const PROTOCOL_WIFI_DIRECT: Uuid = Uuid::from_u128(0x0407d24e_53de_4c9a_9ba1_9ced54641188);
    pub const PROTOCOL_DNS_SD: Uuid = Uuid::from_u128(0x4526e8c1_8aac_4153_9b16_55e86ada0e54);
    pub const PROTOCOL_POS: Uuid = Uuid::from_u128(0xd4bf61b3_442e_4ada_882d_fa7b70c832d9);
    pub const PROTOCOL_NETWORK_PRINTERS: Uuid = Uuid::from_u128(0x37aba761_2124_454c_8d82_c42962c2de2b);
    pub const PROTOCOL_WCN: Uuid = Uuid::from_u128(0x4c1b1ef8_2f62_4b9f_9bc5_b21ab636138f);
    pub const PROTOCOL_WIGIG_DOCKS: Uuid = Uuid::from_u128(0xa277f3a5_8764_4f88_8045_4c5e962640b1);
    pub const PROTOCOL_HP_PRINTER_PROVISIONING: Uuid =
        Uuid::from_u128(0xc85ef710_f344_4792_bb6d_85a4346f1e69);
    pub const PROTOCOL_BLUETOOTH: Uuid = DEVCLASS_BLUETOOTH;
    pub const PROTOCOL_BLUETOOTH_LE: Uuid = Uuid::from_u128(0xbb7bb05e_5972_42b5_94fc_76eaa7084d49);
    pub const PROTOCOL_NETWORK_CAMERA: Uuid = Uuid::from_u128(0xb8238652_b500_41eb_b4f3_4234f7f5ae99);

    /// Bluetooth base UUID; 16-bit service ids occupy bits 96..112
    pub const BLUETOOTH_BASE: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);
}

const CLASSES: &[(Uuid, &str, &str)] = &[
    (Uuid::from_u128(0x6bdd1fc1_810f_11d0_bec7_08002be2092f), "GUID_DEVCLASS_1394", "IEEE 1394 host bus controllers"),
    (Uuid::from_u128(0x4d36e964_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_ADAPTER", "Adapters"),
    (Uuid::from_u128(0x72631e54_78a4_11d0_bcf7_00aa00b7b32a), "GUID_DEVCLASS_BATTERY", "Batteries"),
    (Uuid::from_u128(0x53d29ef7_377c_4d14_864b_eb3a85769359), "GUID_DEVCLASS_BIOMETRIC", "Biometric devices"),
    (guids::DEVCLASS_BLUETOOTH, "GUID_DEVCLASS_BLUETOOTH", "Bluetooth"),
    (Uuid::from_u128(0xca3e7ab9_b4c3_4ae6_8251_579ef933890f), "GUID_DEVCLASS_CAMERA", "Cameras"),
    (Uuid::from_u128(0x4d36e965_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_CDROM", "DVD/CD-ROM drives"),
    (Uuid::from_u128(0x4d36e966_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_COMPUTER", "Computer"),
    (Uuid::from_u128(0x4d36e967_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_DISKDRIVE", "Disk drives"),
    (Uuid::from_u128(0x4d36e968_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_DISPLAY", "Display adapters"),
    (Uuid::from_u128(0xe2f84ce7_8efa_411c_aa69_97454ca4cb57), "GUID_DEVCLASS_EXTENSION", "Extensions"),
    (Uuid::from_u128(0xf2e7dd72_6468_4e36_b6f1_6488f42c1b52), "GUID_DEVCLASS_FIRMWARE", "Firmware"),
    (guids::DEVCLASS_HIDCLASS, "GUID_DEVCLASS_HIDCLASS", "Human Interface Devices"),
    (Uuid::from_u128(0x6bdd1fc6_810f_11d0_bec7_08002be2092f), "GUID_DEVCLASS_IMAGE", "Imaging devices"),
    (guids::DEVCLASS_KEYBOARD, "GUID_DEVCLASS_KEYBOARD", "Keyboards"),
    (Uuid::from_u128(0x4d36e96c_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_MEDIA", "Sound, video and game controllers"),
    (Uuid::from_u128(0x5099944a_f6b9_4057_a056_8c550228544c), "GUID_DEVCLASS_MEMORY", "Memory devices"),
    (Uuid::from_u128(0x4d36e96d_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_MODEM", "Modems"),
    (Uuid::from_u128(0x4d36e96e_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_MONITOR", "Monitors"),
    (guids::DEVCLASS_MOUSE, "GUID_DEVCLASS_MOUSE", "Mice and other pointing devices"),
    (guids::DEVCLASS_NET, "GUID_DEVCLASS_NET", "Network adapters"),
    (Uuid::from_u128(0x4d36e978_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_PORTS", "Ports (COM & LPT)"),
    (Uuid::from_u128(0x4d36e979_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_PRINTER", "Printers"),
    (Uuid::from_u128(0x1ed2bbf9_11f0_4084_b21f_ad83a8e6dcdc), "GUID_DEVCLASS_PRINTQUEUE", "Print queues"),
    (Uuid::from_u128(0x50127dc3_0f36_415e_a6cc_4cb3be910b65), "GUID_DEVCLASS_PROCESSOR", "Processors"),
    (Uuid::from_u128(0x5175d334_c371_4806_b3ba_71fd53c9258d), "GUID_DEVCLASS_SENSOR", "Sensors"),
    (Uuid::from_u128(0x5c4c3332_344d_483c_8739_259e934c9cc8), "GUID_DEVCLASS_SOFTWARECOMPONENT", "Software components"),
    (Uuid::from_u128(0x4d36e97c_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_SOUND", "Sound devices"),
    (Uuid::from_u128(0x4d36e97d_e325_11ce_bfc1_08002be10318), "GUID_DEVCLASS_SYSTEM", "System devices"),
    (guids::DEVCLASS_UNKNOWN, "GUID_DEVCLASS_UNKNOWN", "Other devices"),
    (guids::DEVCLASS_USB, "GUID_DEVCLASS_USB", "Universal Serial Bus controllers"),
    (Uuid::from_u128(0x71a27cdd_812a_11d0_bec7_08002be2092f), "GUID_DEVCLASS_VOLUME", "Storage volumes"),
    (Uuid::from_u128(0xeec5ad98_8080_425f_922a_dabf3de3f69a), "GUID_DEVCLASS_WPD", "Portable Devices"),
];

const INTERFACES: &[(Uuid, &str)] = &[
    (Uuid::from_u128(0x86e0d1e0_8089_11d0_9ce4_08003e301f73), "GUID_DEVINTERFACE_COMPORT"),
    (Uuid::from_u128(0x53f56307_b6bf_11d0_94f2_00a0c91efb8b), "GUID_DEVINTERFACE_DISK"),
    (Uuid::from_u128(0x5b45201d_f2f2_4f3b_85bb_30ff1f953599), "GUID_DEVINTERFACE_DISPLAY_ADAPTER"),
    (Uuid::from_u128(0x4d1e55b2_f16f_11cf_88cb_001111000030), "GUID_DEVINTERFACE_HID"),
    (Uuid::from_u128(0x884b96c3_56ef_11d1_bc8c_00a0c91405dd), "GUID_DEVINTERFACE_KEYBOARD"),
    (Uuid::from_u128(0xe6f07b5f_ee97_4a90_b076_33f57bf4eaa7), "GUID_DEVINTERFACE_MONITOR"),
    (Uuid::from_u128(0x378de44c_56ef_11d1_bc8c_00a0c91405dd), "GUID_DEVINTERFACE_MOUSE"),
    (Uuid::from_u128(0xcac88484_7515_4c03_82e6_71a87abac361), "GUID_DEVINTERFACE_NET"),
    (Uuid::from_u128(0x53f5630a_b6bf_11d0_94f2_00a0c91efb8b), "GUID_DEVINTERFACE_PARTITION"),
    (Uuid::from_u128(0xa5dcbf10_6530_11d2_901f_00c04fb951ed), "GUID_DEVINTERFACE_USB_DEVICE"),
    (Uuid::from_u128(0x3abf6f2d_71c4_462a_8a92_1e6861e6af27), "GUID_DEVINTERFACE_USB_HOST_CONTROLLER"),
    (Uuid::from_u128(0xf18a0e88_c30c_11d0_8815_00a0c906bed8), "GUID_DEVINTERFACE_USB_HUB"),
    (Uuid::from_u128(0x53f5630d_b6bf_11d0_94f2_00a0c91efb8b), "GUID_DEVINTERFACE_VOLUME"),
    (Uuid::from_u128(0x6ac27878_a6fa_4155_ba85_f98f491d4f33), "GUID_DEVINTERFACE_WPD"),
];

const PROTOCOLS: &[(Uuid, &str)] = &[
    (guids::PROTOCOL_UPNP, "UPnP (including DIAL and DLNA)"),
    (guids::PROTOCOL_WSD, "Web services on devices (WSD)"),
    (guids::PROTOCOL_WIFI_DIRECT, "Wi-Fi Direct"),
    (guids::PROTOCOL_DNS_SD, "DNS service discovery (DNS-SD)"),
    (guids::PROTOCOL_POS, "Point of service"),
    (guids::PROTOCOL_NETWORK_PRINTERS, "Network printers (active directory printers)"),
    (guids::PROTOCOL_WCN, "Windows connect now (WNC)"),
    (guids::PROTOCOL_WIGIG_DOCKS, "WiGig docks"),
    (guids::PROTOCOL_HP_PRINTER_PROVISIONING, "Wi-Fi provisioning for HP printers"),
    (guids::PROTOCOL_BLUETOOTH, "Bluetooth"),
    (guids::PROTOCOL_BLUETOOTH_LE, "Bluetooth LE"),
    (guids::PROTOCOL_NETWORK_CAMERA, "Network Camera"),
];

const COMPANIES: &[(u16, &str)] = &[
    (0x0006, "Microsoft"),
    (0x000F, "Broadcom Corporation"),
    (0x004C, "Apple, Inc."),
    (0x0059, "Nordic Semiconductor ASA"),
    (0x0075, "Samsung Electronics Co. Ltd."),
    (0x0087, "Garmin International, Inc."),
    (0x00E0, "Google"),
    (0x0131, "Cypress Semiconductor"),
];

const DATA_TYPES: &[(u16, &str)] = &[
    (0x01, "Flags"),
    (0x02, "Incomplete List of 16-bit Service or Service Class UUIDs"),
    (0x03, "Complete List of 16-bit Service or Service Class UUIDs"),
    (0x06, "Incomplete List of 128-bit Service or Service Class UUIDs"),
    (0x07, "Complete List of 128-bit Service or Service Class UUIDs"),
    (0x08, "Shortened Local Name"),
    (0x09, "Complete Local Name"),
    (0x0A, "Tx Power Level"),
    (0x16, "Service Data - 16-bit UUID"),
    (0x19, "Appearance"),
    (0xFF, "Manufacturer Specific Data"),
];

const SERVICES: &[(u16, &str)] = &[
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x180A, "Device Information"),
    (0x180D, "Heart Rate"),
    (0x180F, "Battery"),
    (0x1812, "Human Interface Device"),
    (0xFD6F, "Exposure Notification"),
    (0xFE2C, "Google Fast Pair"),
];

/// Optional JSON overlay merged over the built-in tables
#[derive(Debug, Default, Deserialize)]
struct TableOverlay {
    #[serde(default)]
    classes: HashMap<Uuid, String>,
    #[serde(default)]
    protocols: HashMap<Uuid, String>,
    #[serde(default)]
    guids: HashMap<Uuid, String>,
    #[serde(default)]
    companies: HashMap<u16, String>,
    #[serde(default)]
    data_types: HashMap<u16, String>,
    #[serde(default)]
    services: HashMap<u16, String>,
}

/// Read-only name lookup tables
#[derive(Debug, Clone, Default)]
pub struct NameTables {
    class_names: HashMap<Uuid, String>,
    protocol_names: HashMap<Uuid, String>,
    guid_names: HashMap<Uuid, String>,
    company_names: HashMap<u16, String>,
    data_type_names: HashMap<u16, String>,
    service_names: HashMap<u16, String>,
}

impl NameTables {
    /// Empty tables; every lookup falls back to the raw identifier
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tables populated with the built-in well-known names
    pub fn builtin() -> Self {
        let mut tables = Self::empty();
        for (guid, symbol, description) in CLASSES {
            tables.class_names.insert(*guid, description.to_string());
            tables.guid_names.insert(*guid, symbol.to_string());
        }
        for (guid, symbol) in INTERFACES {
            tables.guid_names.insert(*guid, symbol.to_string());
        }
        for (guid, name) in PROTOCOLS {
            tables.protocol_names.insert(*guid, name.to_string());
        }
        tables.company_names = COMPANIES.iter().map(|(k, v)| (*k, v.to_string())).collect();
        tables.data_type_names = DATA_TYPES.iter().map(|(k, v)| (*k, v.to_string())).collect();
        tables.service_names = SERVICES.iter().map(|(k, v)| (*k, v.to_string())).collect();
        tables
    }

    /// Built-in tables extended with the names in a JSON overlay file
    pub fn load_json(path: &Path) -> Result<Self, TableError> {
        let content = std::fs::read_to_string(path)?;
        Self::builtin().with_overlay(&content)
    }

    fn with_overlay(mut self, json: &str) -> Result<Self, TableError> {
        let overlay: TableOverlay = serde_json::from_str(json)?;
        self.class_names.extend(overlay.classes);
        self.protocol_names.extend(overlay.protocols);
        self.guid_names.extend(overlay.guids);
        self.company_names.extend(overlay.companies);
        self.data_type_names.extend(overlay.data_types);
        self.service_names.extend(overlay.services);
        Ok(self)
    }

    pub fn class_name(&self, class: &Uuid) -> Option<&str> {
        self.class_names.get(class).map(String::as_str)
    }

    pub fn protocol_name(&self, protocol: &Uuid) -> Option<&str> {
        self.protocol_names.get(protocol).map(String::as_str)
    }

    /// Symbolic name of a GUID (class, interface class or protocol)
    pub fn guid_name(&self, guid: &Uuid) -> Option<&str> {
        self.guid_names
            .get(guid)
            .or_else(|| self.protocol_names.get(guid))
            .map(String::as_str)
    }

    /// `'Apple, Inc.' (76/0x004C)` when known, `76 (0x004C)` otherwise
    pub fn company_name(&self, id: u16) -> String {
        assigned_number(self.company_names.get(&id), id)
    }

    pub fn data_type_name(&self, id: u16) -> String {
        assigned_number(self.data_type_names.get(&id), id)
    }

    /// Display name of a service UUID, short-form names for Bluetooth base UUIDs
    pub fn service_name(&self, uuid: &Uuid) -> String {
        match short_service_id(uuid) {
            Some(short) => match self.service_names.get(&short) {
                Some(name) => name.clone(),
                None => format!("{} (0x{:04X})", short, short),
            },
            None => uuid.to_string(),
        }
    }

    /// Human-readable alias for a property value, if one is known
    pub fn hint(&self, value: &PropertyValue) -> Option<String> {
        match value {
            PropertyValue::Guid(_) | PropertyValue::String(_) => {
                let guid = value.as_guid()?;
                self.guid_name(&guid).map(str::to_string)
            }
            _ => None,
        }
    }
}

fn assigned_number(name: Option<&String>, id: u16) -> String {
    match name {
        Some(name) => format!("'{}' ({}/0x{:04X})", name, id, id),
        None => format!("{} (0x{:04X})", id, id),
    }
}

fn short_service_id(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let mask: u128 = 0x0000ffff_0000_0000_0000_000000000000;
    if value & !mask == guids::BLUETOOTH_BASE.as_u128() {
        Some(((value & mask) >> 96) as u16)
    } else {
        None
    }
}

/// Build the 128-bit form of a 16-bit Bluetooth service id
pub fn service_uuid(short: u16) -> Uuid {
    Uuid::from_u128(guids::BLUETOOTH_BASE.as_u128() | ((short as u128) << 96))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_lookups() {
        let tables = NameTables::builtin();
        assert_eq!(tables.class_name(&guids::DEVCLASS_MOUSE), Some("Mice and other pointing devices"));
        assert_eq!(tables.protocol_name(&guids::PROTOCOL_BLUETOOTH_LE), Some("Bluetooth LE"));
        assert_eq!(tables.guid_name(&guids::DEVCLASS_MOUSE), Some("GUID_DEVCLASS_MOUSE"));
    }

    #[test]
    fn test_company_rendering() {
        let tables = NameTables::builtin();
        assert_eq!(tables.company_name(0x004C), "'Apple, Inc.' (76/0x004C)");
        assert_eq!(tables.company_name(0x7777), "30583 (0x7777)");
    }

    #[test]
    fn test_service_names() {
        let tables = NameTables::builtin();
        assert_eq!(tables.service_name(&service_uuid(0x180F)), "Battery");
        assert_eq!(tables.service_name(&service_uuid(0x1234)), "4660 (0x1234)");
        let custom = Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc);
        assert_eq!(tables.service_name(&custom), custom.to_string());
    }

    #[test]
    fn test_hint_from_string_guid() {
        let tables = NameTables::builtin();
        let value = PropertyValue::from("{4d36e972-e325-11ce-bfc1-08002be10318}");
        assert_eq!(tables.hint(&value).as_deref(), Some("GUID_DEVCLASS_NET"));
        assert_eq!(tables.hint(&PropertyValue::from("hello")), None);
        assert_eq!(tables.hint(&PropertyValue::Int(3)), None);
    }

    #[test]
    fn test_json_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "protocols": {{"11111111-2222-3333-4444-555555555555": "Test protocol"}},
                "companies": {{"30583": "Test Corp"}}
            }}"#
        )
        .unwrap();

        let tables = NameTables::load_json(file.path()).unwrap();
        let protocol = Uuid::from_u128(0x11111111_2222_3333_4444_555555555555);
        assert_eq!(tables.protocol_name(&protocol), Some("Test protocol"));
        assert_eq!(tables.company_name(0x7777), "'Test Corp' (30583/0x7777)");
        // built-in names survive the overlay
        assert_eq!(tables.protocol_name(&guids::PROTOCOL_WSD), Some("Web services on devices (WSD)"));
    }
}
