//! devscope discovery - feeds, grouping resolvers and the live indexer
//!
//! Feeds deliver appeared/changed/vanished notifications from any thread.
//! The [`Indexer`] funnels them through one writer task that applies the
//! grouping rules to the index tree and broadcasts the resulting changes.

pub mod feed;
pub mod indexer;
pub mod info;
pub mod replay;
mod resolver;

pub use feed::{
    keys, ChannelFeed, DiscoveryFeed, FeedDomain, FeedError, FeedHandle, FeedSink, FeedStatus,
    Notification,
};
pub use indexer::{FeedInfo, IndexConfig, Indexer, IndexerError};
pub use info::{DeviceInfo, DeviceInfoSource, LookupError, StaticDeviceInfo};
pub use replay::{parse_script, ReplayFeed, ScriptStep};
pub use resolver::{DEVICES_GROUP, ENDPOINTS_GROUP};
