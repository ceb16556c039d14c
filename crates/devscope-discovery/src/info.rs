//! Auxiliary per-device info source used to learn a device's class

use async_trait::async_trait;
use devscope_core::PropertyBag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Device {0} reports no class")]
    NoClass(String),
    #[error("Lookup failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// What the info source knows about one device instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub class: Uuid,
    #[serde(default)]
    pub properties: PropertyBag,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, class: Uuid) -> Self {
        Self {
            id: id.into(),
            name: None,
            class,
            properties: PropertyBag::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Asynchronous lookup keyed by device instance id
#[async_trait]
pub trait DeviceInfoSource: Send + Sync {
    async fn lookup(&self, instance_id: &str) -> Result<DeviceInfo, LookupError>;
}

/// Info source backed by a fixed table, optionally answering slowly
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceInfo {
    devices: HashMap<String, DeviceInfo>,
    failures: HashMap<String, String>,
    delay: Option<Duration>,
}

impl StaticDeviceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of device records
    pub fn load_json(path: &Path) -> Result<Self, LookupError> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<DeviceInfo> = serde_json::from_str(&content)?;
        Ok(records.into_iter().fold(Self::new(), Self::with_device))
    }

    pub fn with_device(mut self, info: DeviceInfo) -> Self {
        self.devices.insert(info.id.clone(), info);
        self
    }

    /// Make lookups for `instance_id` fail with `message`
    pub fn with_failure(mut self, instance_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(instance_id.into(), message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceInfoSource for StaticDeviceInfo {
    async fn lookup(&self, instance_id: &str) -> Result<DeviceInfo, LookupError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.get(instance_id) {
            return Err(LookupError::Failed(message.clone()));
        }
        let info = self
            .devices
            .get(instance_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(instance_id.to_string()))?;
        if info.class.is_nil() {
            return Err(LookupError::NoClass(info.id));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscope_core::guids;
    use std::io::Write;

    #[tokio::test]
    async fn test_static_lookup() {
        let source = StaticDeviceInfo::new()
            .with_device(DeviceInfo::new("USB\\VID_1", guids::DEVCLASS_MOUSE).with_name("Mouse"))
            .with_device(DeviceInfo::new("USB\\VID_2", Uuid::nil()))
            .with_failure("USB\\VID_3", "access denied");

        let info = source.lookup("USB\\VID_1").await.unwrap();
        assert_eq!(info.class, guids::DEVCLASS_MOUSE);
        assert_eq!(info.name.as_deref(), Some("Mouse"));

        assert!(matches!(source.lookup("USB\\VID_2").await, Err(LookupError::NoClass(_))));
        assert!(matches!(source.lookup("USB\\VID_3").await, Err(LookupError::Failed(_))));
        assert!(matches!(source.lookup("missing").await, Err(LookupError::NotFound(_))));
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "HID\\1", "name": "Keyboard", "class": "4d36e96b-e325-11ce-bfc1-08002be10318"}}]"#
        )
        .unwrap();

        let source = StaticDeviceInfo::load_json(file.path()).unwrap();
        assert_eq!(source.len(), 1);
    }
}
