//! Aggregates SSDP discovery events into a pool of known devices, de-duplicating
//! in-flight description downloads and expiring stale entries.

mod directory;
mod pool;

pub use directory::{DiscoveryDirectory, NullSearcher, SsdpSearch, Visitor};
pub use pool::{DeviceDescriptor, DevicePool};
