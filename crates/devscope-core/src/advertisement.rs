//! Radio advertisement payloads and content fingerprints
//!
//! An advertising device repeats the same packet many times per second.
//! The fingerprint keeps only the fields that describe the *shape* of an
//! advertisement so repeats collapse onto one index node, while payload
//! variants from the same device stay separate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::names::NameTables;
use crate::value::PropertyBag;

/// Kind of advertising PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertisementType {
    ConnectableUndirected,
    ConnectableDirected,
    ScannableUndirected,
    NonConnectableUndirected,
    ScanResponse,
    Extended,
}

impl fmt::Display for AdvertisementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    #[default]
    Public,
    Random,
    Unspecified,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One manufacturer-specific data block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerData {
    pub company_id: u16,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// One raw advertisement data section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSection {
    pub data_type: u8,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A single received advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub is_connectable: bool,
    #[serde(default)]
    pub is_directed: bool,
    #[serde(default)]
    pub is_scannable: bool,
    #[serde(default)]
    pub is_scan_response: bool,
    pub advertisement_type: AdvertisementType,
    /// 48-bit device address; scripts may give it as `AA:BB:CC:DD:EE:FF`
    #[serde(serialize_with = "serialize_address", deserialize_with = "deserialize_address")]
    pub address: u64,
    #[serde(default)]
    pub address_type: AddressType,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub flags: Option<u8>,
    #[serde(default)]
    pub service_uuids: Vec<Uuid>,
    #[serde(default)]
    pub manufacturer_data: Vec<ManufacturerData>,
    #[serde(default)]
    pub data_sections: Vec<DataSection>,

    // Volatile fields, never part of the fingerprint
    #[serde(default)]
    pub rssi: i16,
    #[serde(default)]
    pub tx_power: Option<i16>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Advertisement {
    /// Minimal advertisement from an address, mostly useful for feeds and tests
    pub fn new(address: u64, advertisement_type: AdvertisementType) -> Self {
        Self {
            is_anonymous: false,
            is_connectable: false,
            is_directed: false,
            is_scannable: false,
            is_scan_response: false,
            advertisement_type,
            address,
            address_type: AddressType::Public,
            local_name: String::new(),
            flags: None,
            service_uuids: Vec::new(),
            manufacturer_data: Vec::new(),
            data_sections: Vec::new(),
            rssi: 0,
            tx_power: None,
            timestamp: Utc::now(),
        }
    }

    /// Device address as `AA:BB:CC:DD:EE:FF`
    pub fn mac_address(&self) -> String {
        format_mac(self.address)
    }

    /// Content fingerprint over the stable fields, `code:value` pairs joined by `|`
    pub fn fingerprint(&self) -> String {
        let mut fields: Vec<(String, String)> = vec![
            ("a".into(), self.is_anonymous.to_string()),
            ("c".into(), self.is_connectable.to_string()),
            ("d".into(), self.is_directed.to_string()),
            ("s".into(), self.is_scannable.to_string()),
            ("r".into(), self.is_scan_response.to_string()),
            ("t".into(), self.advertisement_type.to_string()),
            ("b".into(), self.address.to_string()),
            ("z".into(), self.address_type.to_string()),
            ("n".into(), escape(&self.local_name)),
            ("f".into(), self.flags.unwrap_or(0).to_string()),
            (
                "u".into(),
                self.service_uuids
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join("|"),
            ),
        ];

        for (i, block) in self.manufacturer_data.iter().enumerate() {
            fields.push((format!("o{},CompanyId", i), block.company_id.to_string()));
            fields.push((format!("o{},Data", i), hex::encode_upper(&block.data)));
        }

        for (i, section) in self.data_sections.iter().enumerate() {
            fields.push((format!("x{},DataType", i), section.data_type.to_string()));
            fields.push((format!("x{},Data", i), hex::encode_upper(&section.data)));
        }

        fields
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(code, value)| format!("{}:{}", code, value))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Type followed by the companies of the manufacturer blocks
    pub fn display_name(&self, tables: &NameTables) -> String {
        let companies: Vec<String> = self
            .manufacturer_data
            .iter()
            .map(|m| tables.company_name(m.company_id))
            .collect();
        if companies.is_empty() {
            self.advertisement_type.to_string()
        } else {
            format!("{} {}", self.advertisement_type, companies.join("| "))
        }
    }

    /// Full property bag for the advertisement node, volatile fields included
    pub fn properties(
        &self,
        tables: &NameTables,
        received_count: u64,
        last_received: DateTime<Utc>,
    ) -> PropertyBag {
        let mut bag = PropertyBag::new()
            .with("IsAnonymous", self.is_anonymous)
            .with("IsConnectable", self.is_connectable)
            .with("IsDirected", self.is_directed)
            .with("IsScannable", self.is_scannable)
            .with("IsScanResponse", self.is_scan_response)
            .with("AdvertisementType", self.advertisement_type.to_string())
            .with("BluetoothAddress", self.mac_address())
            .with("BluetoothAddressType", self.address_type.to_string())
            .with("RawSignalStrengthInDBm", self.rssi as i64);

        if let Some(tx_power) = self.tx_power {
            bag.insert("TransmitPowerLevelInDBm", tx_power as i64);
        }
        if !self.local_name.is_empty() {
            bag.insert("LocalName", self.local_name.clone());
        }
        if let Some(flags) = self.flags {
            bag.insert("Flags", flags as u64);
        }
        if !self.service_uuids.is_empty() {
            let services: Vec<String> = self
                .service_uuids
                .iter()
                .map(|u| tables.service_name(u))
                .collect();
            bag.insert("ServiceUuids", crate::value::PropertyValue::StringList(services));
        }

        for (i, block) in self.manufacturer_data.iter().enumerate() {
            let name = format!("Data {} {}", i, tables.company_name(block.company_id));
            bag.insert(name, block.data.clone());
        }

        for (i, section) in self.data_sections.iter().enumerate() {
            let name = format!(
                "DataSection {} {}",
                i,
                tables.data_type_name(section.data_type as u16)
            );
            bag.insert(name, section.data.clone());
        }

        bag.insert("LastReceived", last_received);
        bag.insert("ReceivedCount", received_count);
        bag
    }
}

/// Format the low 48 bits of an address, most significant byte first
pub fn format_mac(address: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02X}", (address >> (i * 8)) & 0xff))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse `AA:BB:CC:DD:EE:FF` (or `-` separated) into a 48-bit address
pub fn parse_mac(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.trim().split(|c: char| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return None;
    }
    parts.iter().try_fold(0u64, |acc, part| {
        u8::from_str_radix(part, 16).ok().map(|b| (acc << 8) | b as u64)
    })
}

// Keeps free-form text from forging field boundaries
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('|', "\\|")
}

fn serialize_address<S: Serializer>(address: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_mac(*address))
}

fn deserialize_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAddress {
        Number(u64),
        Text(String),
    }

    match RawAddress::deserialize(deserializer)? {
        RawAddress::Number(n) => Ok(n),
        RawAddress::Text(s) => parse_mac(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid device address: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Advertisement {
        let mut ad = Advertisement::new(0x0011_2233_4455, AdvertisementType::ConnectableUndirected);
        ad.is_connectable = true;
        ad.local_name = "Thermo".to_string();
        ad.flags = Some(0x06);
        ad.manufacturer_data.push(ManufacturerData {
            company_id: 0x004C,
            data: vec![0x01, 0x02],
        });
        ad
    }

    #[test]
    fn test_mac_format() {
        assert_eq!(format_mac(0x0011_2233_4455), "00:11:22:33:44:55");
        assert_eq!(parse_mac("00:11:22:33:44:55"), Some(0x0011_2233_4455));
        assert_eq!(parse_mac("aa-bb-cc-dd-ee-ff"), Some(0xaabb_ccdd_eeff));
        assert_eq!(parse_mac("00:11:22"), None);
        assert_eq!(parse_mac("zz:11:22:33:44:55"), None);
    }

    #[test]
    fn test_fingerprint_layout() {
        let fp = sample().fingerprint();
        assert_eq!(
            fp,
            "a:false|c:true|d:false|s:false|r:false|t:ConnectableUndirected|b:73588229205|z:Public|n:Thermo|f:6|o0,CompanyId:76|o0,Data:0102"
        );
    }

    #[test]
    fn test_fingerprint_ignores_volatile_fields() {
        let first = sample();
        let mut second = sample();
        second.rssi = -90;
        second.tx_power = Some(4);
        second.timestamp = first.timestamp + Duration::seconds(30);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_payload() {
        let first = sample();
        let mut second = sample();
        second.manufacturer_data[0].data = vec![0x01, 0x03];
        assert_ne!(first.fingerprint(), second.fingerprint());

        let mut third = sample();
        third.data_sections.push(DataSection {
            data_type: 0x16,
            data: vec![0xAA],
        });
        assert_ne!(first.fingerprint(), third.fingerprint());
    }

    #[test]
    fn test_fingerprint_escapes_name() {
        let mut forged = sample();
        forged.local_name = "Thermo|f:6".to_string();
        forged.flags = None;
        let plain = sample();
        assert_ne!(forged.fingerprint(), plain.fingerprint());
        assert!(forged.fingerprint().contains("n:Thermo\\|f:6"));
    }

    #[test]
    fn test_display_name_and_properties() {
        let tables = NameTables::builtin();
        let ad = sample();
        assert_eq!(ad.display_name(&tables), "ConnectableUndirected 'Apple, Inc.' (76/0x004C)");

        let now = Utc::now();
        let bag = ad.properties(&tables, 3, now);
        assert_eq!(bag.get_str("BluetoothAddress"), Some("00:11:22:33:44:55"));
        assert!(bag.get("Data 0 'Apple, Inc.' (76/0x004C)").is_some());
        assert_eq!(
            bag.get("ReceivedCount"),
            Some(&crate::value::PropertyValue::UInt(3))
        );
    }

    #[test]
    fn test_json_address_forms() {
        let json = r#"{"advertisement_type": "scan_response", "address": "00:11:22:33:44:55"}"#;
        let ad: Advertisement = serde_json::from_str(json).unwrap();
        assert_eq!(ad.address, 0x0011_2233_4455);

        let json = r#"{"advertisement_type": "scan_response", "address": 73588229205}"#;
        let ad: Advertisement = serde_json::from_str(json).unwrap();
        assert_eq!(ad.mac_address(), "00:11:22:33:44:55");
    }
}
