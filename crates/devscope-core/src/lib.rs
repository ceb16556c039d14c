//! devscope core - the data model behind the live discovery index
//!
//! This crate provides the foundational types for devscope:
//! - Typed property values and ordered property bags
//! - Node variants for every hierarchy level
//! - The arena-backed index tree with name-ordered children
//! - Advertisement payloads and their content fingerprints
//! - Well-known name tables for GUIDs and Bluetooth assigned numbers

pub mod advertisement;
pub mod names;
pub mod node;
pub mod tree;
pub mod value;

pub use advertisement::{
    format_mac, parse_mac, AddressType, Advertisement, AdvertisementType, DataSection,
    ManufacturerData,
};
pub use names::{guids, NameTables, TableError};
pub use node::{Level, Node, NodeId, NodeKind, NodeSpec, NodeView, PropertyView};
pub use tree::{IndexEvent, IndexTree, Outcome, TreeError, TreeSnapshot, Upsert};
pub use value::{PropertyBag, PropertyValue};
