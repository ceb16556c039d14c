//! Grouping resolvers
//!
//! Maps feed notifications onto tree mutations: devices under their class
//! group, interfaces under their device, endpoints under their protocol group
//! and advertisements under the endpoint owning their address.
//!
//! Interfaces whose device class is still unknown are parked here until the
//! asynchronous lookup reports back through the mutation queue.

use devscope_core::{
    guids, Advertisement, IndexTree, Level, NameTables, Node, NodeId, NodeKind, NodeSpec,
    PropertyBag, TreeError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::feed::{keys, FeedDomain, Notification};
use crate::indexer::IndexConfig;
use crate::info::{DeviceInfo, LookupError};

pub const DEVICES_GROUP: &str = "devices";
pub const ENDPOINTS_GROUP: &str = "endpoints";

#[derive(Debug)]
struct ParkedInterface {
    id: String,
    properties: PropertyBag,
}

pub(crate) struct Resolver {
    config: IndexConfig,
    tables: Arc<NameTables>,
    devices: NodeId,
    endpoints: NodeId,
    parked: HashMap<String, Vec<ParkedInterface>>,
    in_flight: HashSet<String>,
}

impl Resolver {
    /// Create the namespace groups and a resolver feeding them
    pub fn new(config: IndexConfig, tables: Arc<NameTables>, tree: &mut IndexTree) -> Result<Self, TreeError> {
        let root = tree.root();
        let devices = tree
            .upsert(root, DEVICES_GROUP, NodeSpec::new(NodeKind::Group, "Device Manager"))?
            .id;
        let endpoints = tree
            .upsert(root, ENDPOINTS_GROUP, NodeSpec::new(NodeKind::Group, "Association Endpoints"))?
            .id;
        Ok(Self {
            config,
            tables,
            devices,
            endpoints,
            parked: HashMap::new(),
            in_flight: HashSet::new(),
        })
    }

    pub fn lookups_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Apply one notification. Returns a device instance id whose class must be looked up.
    pub fn apply(&mut self, tree: &mut IndexTree, domain: FeedDomain, notification: Notification) -> Option<String> {
        let result = match (domain, notification) {
            (FeedDomain::Advertisements, Notification::Advertisement(ad)) => {
                self.advertisement(tree, &ad).map(|_| None)
            }
            (_, Notification::Advertisement(_)) | (FeedDomain::Advertisements, _) => {
                debug!(domain = %domain, "Notification does not belong to this domain, dropped");
                Ok(None)
            }
            (FeedDomain::Devices, notification) => self.device(tree, notification).map(|_| None),
            (FeedDomain::DeviceInterfaces, notification) => self.interface(tree, notification),
            (FeedDomain::AssociationEndpoints, notification) => {
                self.endpoint(tree, notification).map(|_| None)
            }
        };

        result.unwrap_or_else(|e| {
            warn!(domain = %domain, error = %e, "Notification could not be applied");
            None
        })
    }

    /// Complete a class lookup started by `apply`
    pub fn class_learned(
        &mut self,
        tree: &mut IndexTree,
        instance: &str,
        result: Result<DeviceInfo, LookupError>,
    ) -> Result<(), TreeError> {
        self.in_flight.remove(instance);
        let parked = self.parked.remove(instance).unwrap_or_default();
        if parked.is_empty() {
            debug!(instance = %instance, "No interfaces left for device, not indexed");
            return Ok(());
        }

        let result = result.and_then(|info| {
            if info.class.is_nil() {
                Err(LookupError::NoClass(info.id))
            } else {
                Ok(info)
            }
        });

        // First resolution wins: a device indexed meanwhile keeps its group
        let device = match tree.find(Level::Device, instance) {
            Some(existing) => {
                debug!(instance = %instance, "Device already indexed, keeping its class");
                existing
            }
            None => match result {
                Ok(info) => {
                    debug!(instance = %instance, class = %info.class, "Device class learned");
                    let name = info
                        .name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| display_name(instance, &info.properties));
                    let spec = NodeSpec::new(NodeKind::Device, name)
                        .with_properties(with_id(instance, &info.properties));
                    self.place_device(tree, instance, info.class, spec)?
                }
                Err(e) if self.config.unknown_class_fallback => {
                    warn!(instance = %instance, error = %e, "Device class lookup failed, using unknown class");
                    let spec = NodeSpec::new(NodeKind::Device, instance)
                        .with_properties(PropertyBag::new().with("Id", instance));
                    let device = self.place_device(tree, instance, guids::DEVCLASS_UNKNOWN, spec)?;
                    tree.set_error_text(device, Some(e.to_string()))?;
                    device
                }
                Err(e) => {
                    warn!(
                        instance = %instance,
                        error = %e,
                        interfaces = parked.len(),
                        "Device class lookup failed, interfaces dropped"
                    );
                    return Ok(());
                }
            },
        };

        for interface in parked {
            tree.upsert(device, &interface.id, interface_spec(&interface.id, &interface.properties))?;
        }
        Ok(())
    }

    fn device(&mut self, tree: &mut IndexTree, notification: Notification) -> Result<(), TreeError> {
        match notification {
            Notification::Appeared { id, properties } => {
                let Some(class) = properties.get_guid(keys::CLASS_GUID).filter(|c| !c.is_nil()) else {
                    debug!(id = %id, "Device without class, dropped");
                    return Ok(());
                };
                let spec = NodeSpec::new(NodeKind::Device, display_name(&id, &properties))
                    .with_properties(with_id(&id, &properties));
                self.place_device(tree, &id, class, spec)?;
            }
            Notification::Changed { id, properties } => {
                let Some((parent, mut merged)) = existing(tree, Level::Device, &id) else {
                    trace!(id = %id, "Change for unknown device ignored");
                    return Ok(());
                };
                merged.merge(&properties);
                let spec = NodeSpec::new(NodeKind::Device, display_name(&id, &merged)).with_properties(merged);
                tree.upsert(parent, &id, spec)?;
            }
            Notification::Vanished { id } => {
                debug!(id = %id, "Device vanished, kept for the session");
            }
            Notification::Advertisement(_) => {}
        }
        Ok(())
    }

    fn interface(&mut self, tree: &mut IndexTree, notification: Notification) -> Result<Option<String>, TreeError> {
        match notification {
            Notification::Appeared { id, properties } => {
                if let Some((parent, _)) = existing(tree, Level::Interface, &id) {
                    tree.upsert(parent, &id, interface_spec(&id, &properties))?;
                    return Ok(None);
                }
                let Some(instance) = properties
                    .get_str(keys::DEVICE_INSTANCE_ID)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                else {
                    debug!(id = %id, "Interface without device instance id, dropped");
                    return Ok(None);
                };
                if let Some(device) = tree.find(Level::Device, &instance) {
                    tree.upsert(device, &id, interface_spec(&id, &properties))?;
                    return Ok(None);
                }
                Ok(self.park(instance, id, properties))
            }
            Notification::Changed { id, properties } => {
                if let Some((parent, mut merged)) = existing(tree, Level::Interface, &id) {
                    merged.merge(&properties);
                    tree.upsert(parent, &id, interface_spec(&id, &merged))?;
                } else if let Some(parked) = self.parked_mut(&id) {
                    parked.properties.merge(&properties);
                } else {
                    trace!(id = %id, "Change for unknown interface ignored");
                }
                Ok(None)
            }
            Notification::Vanished { id } => {
                if tree.remove(Level::Interface, &id) {
                    debug!(id = %id, "Interface removed");
                } else if self.unpark(&id) {
                    debug!(id = %id, "Interface vanished before its class was known");
                } else {
                    trace!(id = %id, "Vanished interface was never indexed");
                }
                Ok(None)
            }
            Notification::Advertisement(_) => Ok(None),
        }
    }

    fn endpoint(&mut self, tree: &mut IndexTree, notification: Notification) -> Result<(), TreeError> {
        match notification {
            Notification::Appeared { id, properties } => {
                let parent = match existing(tree, Level::Endpoint, &id) {
                    Some((parent, _)) => parent,
                    None => {
                        let Some(protocol) = properties.get_guid(keys::PROTOCOL_ID).filter(|p| !p.is_nil())
                        else {
                            debug!(id = %id, "Endpoint without protocol, dropped");
                            return Ok(());
                        };
                        self.protocol_group(tree, protocol)?
                    }
                };
                tree.upsert(parent, &id, endpoint_spec(&id, &properties))?;
            }
            Notification::Changed { id, properties } => {
                let Some((parent, mut merged)) = existing(tree, Level::Endpoint, &id) else {
                    trace!(id = %id, "Change for unknown endpoint ignored");
                    return Ok(());
                };
                merged.merge(&properties);
                tree.upsert(parent, &id, endpoint_spec(&id, &merged))?;
            }
            Notification::Vanished { id } => {
                if tree.remove(Level::Endpoint, &id) {
                    debug!(id = %id, "Endpoint removed");
                } else {
                    trace!(id = %id, "Vanished endpoint was never indexed");
                }
            }
            Notification::Advertisement(_) => {}
        }
        Ok(())
    }

    fn advertisement(&mut self, tree: &mut IndexTree, ad: &Advertisement) -> Result<(), TreeError> {
        let address = ad.mac_address();
        let Some(group) = tree.find(Level::ProtocolGroup, &self.config.advertisement_protocol.to_string()) else {
            trace!(address = %address, "No endpoints for the advertisement protocol yet, dropped");
            return Ok(());
        };
        let endpoint = tree
            .children(group)
            .find(|e| e.address().is_some_and(|a| a.eq_ignore_ascii_case(&address)))
            .map(|e| (e.id(), e.key().to_string()));
        let Some((endpoint, endpoint_key)) = endpoint else {
            trace!(address = %address, "Advertisement without a matching endpoint, dropped");
            return Ok(());
        };

        let group_key = format!("{}/advertisements", endpoint_key);
        let ads = match tree.get(endpoint).and_then(|e| e.child_key(&group_key)) {
            Some(ads) => ads,
            None => {
                tree.upsert(
                    endpoint,
                    &group_key,
                    NodeSpec::new(NodeKind::AdvertisementGroup, "Advertisements"),
                )?
                .id
            }
        };

        let key = ad.fingerprint();
        let previous = tree
            .get(ads)
            .and_then(|g| g.child_key(&key))
            .and_then(|id| tree.get(id))
            .map(Node::kind);
        let (received_count, last_received) = match previous {
            Some(NodeKind::Advertisement {
                received_count,
                last_received,
            }) => (*received_count + 1, (*last_received).max(ad.timestamp)),
            _ => (1, ad.timestamp),
        };

        let spec = NodeSpec::new(
            NodeKind::Advertisement {
                received_count,
                last_received,
            },
            ad.display_name(&self.tables),
        )
        .with_properties(ad.properties(&self.tables, received_count, last_received));
        tree.upsert(ads, &key, spec)?;
        trace!(address = %address, count = received_count, "Advertisement recorded");
        Ok(())
    }

    /// Index a device under its class group, or update it in place if already indexed
    fn place_device(&self, tree: &mut IndexTree, id: &str, class: Uuid, spec: NodeSpec) -> Result<NodeId, TreeError> {
        let parent = match existing_parent(tree, Level::Device, id) {
            Some(parent) => {
                if tree.get(parent).map(Node::key) != Some(class.to_string().as_str()) {
                    debug!(id = %id, class = %class, "Device already grouped under another class, keeping first");
                }
                parent
            }
            None => self.class_group(tree, class)?,
        };
        Ok(tree.upsert(parent, id, spec)?.id)
    }

    fn class_group(&self, tree: &mut IndexTree, class: Uuid) -> Result<NodeId, TreeError> {
        let key = class.to_string();
        if let Some(group) = tree.find(Level::ClassGroup, &key) {
            return Ok(group);
        }
        let name = self
            .tables
            .class_name(&class)
            .map(str::to_string)
            .unwrap_or_else(|| class.braced().to_string());
        debug!(class = %class, name = %name, "Class group created");
        Ok(tree
            .upsert(self.devices, &key, NodeSpec::new(NodeKind::ClassGroup { class }, name))?
            .id)
    }

    fn protocol_group(&self, tree: &mut IndexTree, protocol: Uuid) -> Result<NodeId, TreeError> {
        let key = protocol.to_string();
        if let Some(group) = tree.find(Level::ProtocolGroup, &key) {
            return Ok(group);
        }
        let name = self
            .tables
            .protocol_name(&protocol)
            .map(str::to_string)
            .unwrap_or_else(|| protocol.braced().to_string());
        debug!(protocol = %protocol, name = %name, "Protocol group created");
        Ok(tree
            .upsert(
                self.endpoints,
                &key,
                NodeSpec::new(NodeKind::ProtocolGroup { protocol }, name),
            )?
            .id)
    }

    /// Park an interface; returns the instance id if a lookup must be issued
    fn park(&mut self, instance: String, id: String, properties: PropertyBag) -> Option<String> {
        let entries = self.parked.entry(instance.clone()).or_default();
        match entries.iter_mut().find(|p| p.id == id) {
            Some(parked) => parked.properties = properties,
            None => entries.push(ParkedInterface { id, properties }),
        }

        if self.in_flight.insert(instance.clone()) {
            debug!(instance = %instance, "Looking up device class");
            Some(instance)
        } else {
            None
        }
    }

    fn parked_mut(&mut self, id: &str) -> Option<&mut ParkedInterface> {
        self.parked.values_mut().flatten().find(|p| p.id == id)
    }

    fn unpark(&mut self, id: &str) -> bool {
        let mut removed = false;
        for entries in self.parked.values_mut() {
            let before = entries.len();
            entries.retain(|p| p.id != id);
            removed |= entries.len() != before;
        }
        removed
    }
}

fn existing_parent(tree: &IndexTree, level: Level, key: &str) -> Option<NodeId> {
    tree.find(level, key).and_then(|id| tree.get(id)).and_then(Node::parent)
}

/// Parent and current properties of an indexed node
fn existing(tree: &IndexTree, level: Level, key: &str) -> Option<(NodeId, PropertyBag)> {
    let node = tree.find(level, key).and_then(|id| tree.get(id))?;
    Some((node.parent()?, node.properties().clone()))
}

fn display_name(id: &str, properties: &PropertyBag) -> String {
    properties
        .get_str(keys::ITEM_NAME_DISPLAY)
        .filter(|n| !n.is_empty())
        .unwrap_or(id)
        .to_string()
}

/// `Id` first, then the reported properties in order
fn with_id(id: &str, properties: &PropertyBag) -> PropertyBag {
    let mut bag = PropertyBag::new().with("Id", id);
    for (name, value) in properties.iter().filter(|(name, _)| *name != "Id") {
        bag.insert(name, value.clone());
    }
    bag
}

fn interface_spec(id: &str, properties: &PropertyBag) -> NodeSpec {
    let hidden = properties.get_bool(keys::INTERFACE_ENABLED) == Some(false);
    NodeSpec::new(NodeKind::Interface, display_name(id, properties))
        .with_properties(with_id(id, properties))
        .hidden(hidden)
}

fn endpoint_spec(id: &str, properties: &PropertyBag) -> NodeSpec {
    let address = properties
        .get_str(keys::DEVICE_ADDRESS)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    NodeSpec::new(NodeKind::Endpoint { address }, display_name(id, properties))
        .with_properties(with_id(id, properties))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscope_core::{AdvertisementType, ManufacturerData};

    fn setup() -> (IndexTree, Resolver) {
        let mut tree = IndexTree::new("root");
        let resolver = Resolver::new(IndexConfig::default(), Arc::new(NameTables::builtin()), &mut tree).unwrap();
        (tree, resolver)
    }

    fn interface(instance: &str, name: &str) -> PropertyBag {
        PropertyBag::new()
            .with(keys::DEVICE_INSTANCE_ID, instance)
            .with(keys::ITEM_NAME_DISPLAY, name)
    }

    fn appeared(id: &str, properties: PropertyBag) -> Notification {
        Notification::Appeared {
            id: id.into(),
            properties,
        }
    }

    fn ble_endpoint(id: &str, address: &str) -> Notification {
        appeared(
            id,
            PropertyBag::new()
                .with(keys::PROTOCOL_ID, guids::PROTOCOL_BLUETOOTH_LE)
                .with(keys::DEVICE_ADDRESS, address),
        )
    }

    fn ad_with_payload(payload: Vec<u8>) -> Advertisement {
        let mut ad = Advertisement::new(0x001122334455, AdvertisementType::ConnectableUndirected);
        ad.manufacturer_data.push(ManufacturerData {
            company_id: 0x004C,
            data: payload,
        });
        ad
    }

    #[test]
    fn test_interface_parked_until_class_learned() {
        let (mut tree, mut resolver) = setup();
        let lookup = resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, appeared("if1", interface("USB\\1", "HID")));
        assert_eq!(lookup.as_deref(), Some("USB\\1"));

        // Second interface for the same device does not start another lookup
        let again = resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, appeared("if2", interface("USB\\1", "Mouse")));
        assert!(again.is_none());
        assert_eq!(tree.count(Level::Interface), 0);

        let info = DeviceInfo::new("USB\\1", guids::DEVCLASS_MOUSE).with_name("USB Mouse");
        resolver.class_learned(&mut tree, "USB\\1", Ok(info)).unwrap();

        let device = tree.find(Level::Device, "USB\\1").unwrap();
        assert_eq!(tree.get(device).unwrap().name(), "USB Mouse");
        let names: Vec<&str> = tree.children(device).map(|n| n.name()).collect();
        assert_eq!(names, vec!["HID", "Mouse"]);
        assert_eq!(resolver.lookups_in_flight(), 0);

        let group = tree.get(device).unwrap().parent().unwrap();
        assert_eq!(tree.get(group).unwrap().name(), "Mice and other pointing devices");
    }

    #[test]
    fn test_interface_properties_and_hidden() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, appeared("if1", interface("USB\\1", "HID")));
        resolver
            .class_learned(&mut tree, "USB\\1", Ok(DeviceInfo::new("USB\\1", guids::DEVCLASS_HIDCLASS)))
            .unwrap();

        let delta = PropertyBag::new().with(keys::INTERFACE_ENABLED, false);
        resolver.apply(
            &mut tree,
            FeedDomain::DeviceInterfaces,
            Notification::Changed {
                id: "if1".into(),
                properties: delta,
            },
        );

        let node = tree.get(tree.find(Level::Interface, "if1").unwrap()).unwrap();
        assert!(node.hidden());
        let names: Vec<&str> = node.properties().iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "Id");
        assert_eq!(node.properties().get_str(keys::ITEM_NAME_DISPLAY), Some("HID"));
    }

    #[test]
    fn test_vanished_while_parked_skips_device() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, appeared("if1", interface("USB\\1", "HID")));
        resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, Notification::Vanished { id: "if1".into() });

        resolver
            .class_learned(&mut tree, "USB\\1", Ok(DeviceInfo::new("USB\\1", guids::DEVCLASS_MOUSE)))
            .unwrap();
        assert_eq!(tree.count(Level::Device), 0);
        assert_eq!(tree.count(Level::ClassGroup), 0);
    }

    #[test]
    fn test_lookup_failure_falls_back_to_unknown_class() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, appeared("if1", interface("USB\\1", "HID")));
        resolver
            .class_learned(&mut tree, "USB\\1", Err(LookupError::Failed("access denied".into())))
            .unwrap();

        let device = tree.get(tree.find(Level::Device, "USB\\1").unwrap()).unwrap();
        assert_eq!(device.error_text(), Some("Lookup failed: access denied"));
        assert_eq!(device.child_count(), 1);
        let group = tree.get(device.parent().unwrap()).unwrap();
        assert_eq!(group.key(), guids::DEVCLASS_UNKNOWN.to_string());
    }

    #[test]
    fn test_lookup_failure_without_fallback_drops() {
        let mut tree = IndexTree::new("root");
        let config = IndexConfig {
            unknown_class_fallback: false,
            ..IndexConfig::default()
        };
        let mut resolver = Resolver::new(config, Arc::new(NameTables::empty()), &mut tree).unwrap();
        resolver.apply(&mut tree, FeedDomain::DeviceInterfaces, appeared("if1", interface("USB\\1", "HID")));
        resolver
            .class_learned(&mut tree, "USB\\1", Err(LookupError::NotFound("USB\\1".into())))
            .unwrap();
        assert_eq!(tree.count(Level::Device), 0);
        assert_eq!(tree.count(Level::Interface), 0);
    }

    #[test]
    fn test_first_class_resolution_wins() {
        let (mut tree, mut resolver) = setup();
        let first = PropertyBag::new().with(keys::CLASS_GUID, guids::DEVCLASS_MOUSE);
        let second = PropertyBag::new().with(keys::CLASS_GUID, guids::DEVCLASS_KEYBOARD);
        resolver.apply(&mut tree, FeedDomain::Devices, appeared("dev1", first));
        resolver.apply(&mut tree, FeedDomain::Devices, appeared("dev1", second));

        assert_eq!(tree.count(Level::Device), 1);
        let device = tree.get(tree.find(Level::Device, "dev1").unwrap()).unwrap();
        let group = tree.get(device.parent().unwrap()).unwrap();
        assert_eq!(group.key(), guids::DEVCLASS_MOUSE.to_string());
        assert!(tree.find(Level::ClassGroup, &guids::DEVCLASS_KEYBOARD.to_string()).is_none());
    }

    #[test]
    fn test_missing_or_malformed_group_key_dropped() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::Devices, appeared("dev1", PropertyBag::new()));
        let nil = PropertyBag::new().with(keys::CLASS_GUID, Uuid::nil());
        resolver.apply(&mut tree, FeedDomain::Devices, appeared("dev2", nil));
        let garbage = PropertyBag::new().with(keys::PROTOCOL_ID, "not-a-guid");
        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, appeared("ep1", garbage));

        assert_eq!(tree.count(Level::Device), 0);
        assert_eq!(tree.count(Level::Endpoint), 0);
        assert_eq!(tree.count(Level::ClassGroup), 0);
    }

    #[test]
    fn test_devices_are_additive() {
        let (mut tree, mut resolver) = setup();
        let props = PropertyBag::new().with(keys::CLASS_GUID, guids::DEVCLASS_USB);
        resolver.apply(&mut tree, FeedDomain::Devices, appeared("dev1", props));
        resolver.apply(&mut tree, FeedDomain::Devices, Notification::Vanished { id: "dev1".into() });
        assert_eq!(tree.count(Level::Device), 1);
    }

    #[test]
    fn test_advertisements_deduplicated_by_shape() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, ble_endpoint("ep1", "00:11:22:33:44:55"));

        let mut first = ad_with_payload(vec![0x01, 0x02]);
        first.rssi = -40;
        let mut repeat = ad_with_payload(vec![0x01, 0x02]);
        repeat.rssi = -70;
        let other = ad_with_payload(vec![0x01, 0x03]);
        for ad in [first, repeat, other] {
            resolver.apply(&mut tree, FeedDomain::Advertisements, Notification::Advertisement(ad));
        }

        assert_eq!(tree.count(Level::AdvertisementGroup), 1);
        let group = tree.find(Level::AdvertisementGroup, "ep1/advertisements").unwrap();
        let mut counts: Vec<u64> = tree.children(group).filter_map(Node::received_count).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
    }

    #[test]
    fn test_advertisement_address_case_insensitive() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, ble_endpoint("ep1", "aa:bb:cc:dd:ee:ff"));
        let ad = Advertisement::new(0xAABBCCDDEEFF, AdvertisementType::ScanResponse);
        resolver.apply(&mut tree, FeedDomain::Advertisements, Notification::Advertisement(ad));
        assert_eq!(tree.count(Level::Advertisement), 1);
    }

    #[test]
    fn test_advertisement_needs_endpoint() {
        let (mut tree, mut resolver) = setup();
        let ad = ad_with_payload(vec![0x01]);
        resolver.apply(&mut tree, FeedDomain::Advertisements, Notification::Advertisement(ad.clone()));
        assert_eq!(tree.count(Level::Advertisement), 0);

        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, ble_endpoint("ep1", "00:11:22:33:44:55"));
        resolver.apply(&mut tree, FeedDomain::Advertisements, Notification::Advertisement(ad));
        assert_eq!(tree.count(Level::Advertisement), 1);
    }

    #[test]
    fn test_endpoint_vanished_removes_advertisements() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, ble_endpoint("ep1", "00:11:22:33:44:55"));
        resolver.apply(
            &mut tree,
            FeedDomain::Advertisements,
            Notification::Advertisement(ad_with_payload(vec![0x01])),
        );
        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, Notification::Vanished { id: "ep1".into() });

        assert_eq!(tree.count(Level::Endpoint), 0);
        assert_eq!(tree.count(Level::AdvertisementGroup), 0);
        assert_eq!(tree.count(Level::Advertisement), 0);
        // The protocol group stays
        assert_eq!(tree.count(Level::ProtocolGroup), 1);
    }

    #[test]
    fn test_endpoint_changed_updates_address() {
        let (mut tree, mut resolver) = setup();
        resolver.apply(&mut tree, FeedDomain::AssociationEndpoints, ble_endpoint("ep1", "00:00:00:00:00:01"));
        let delta = PropertyBag::new()
            .with(keys::DEVICE_ADDRESS, "00:11:22:33:44:55")
            .with(keys::ITEM_NAME_DISPLAY, "Thermometer");
        resolver.apply(
            &mut tree,
            FeedDomain::AssociationEndpoints,
            Notification::Changed {
                id: "ep1".into(),
                properties: delta,
            },
        );

        let endpoint = tree.get(tree.find(Level::Endpoint, "ep1").unwrap()).unwrap();
        assert_eq!(endpoint.address(), Some("00:11:22:33:44:55"));
        assert_eq!(endpoint.name(), "Thermometer");
        let group = tree.get(endpoint.parent().unwrap()).unwrap();
        assert_eq!(group.name(), "Bluetooth LE");
    }
}
