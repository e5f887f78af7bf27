//! Protocol primitives shared by the discovery, playlist and proxy crates: the
//! narrow SSDP event shape, device/service description parsing, and SOAP
//! envelope/fault handling.

pub mod description;
pub mod soap;
pub mod ssdp;

pub use description::{fetch_blocking, DescriptionError, DeviceDesc, ServiceDesc};
pub use ssdp::SsdpEvent;
