//! The narrow slice of SSDP this crate actually consumes.
//!
//! The multicast transport (socket binding, NOTIFY/M-SEARCH framing, join/leave of
//! 239.255.255.250:1900) lives outside this crate; discovery only needs the shape of
//! the events that transport produces and a couple of protocol constants used when
//! computing expiry and re-search timing.

use std::net::SocketAddr;

/// Multicast address UPnP devices and control points rendezvous on.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Well-known SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// Default advertisement lifetime, in seconds, when a NOTIFY/search response omits
/// `CACHE-CONTROL: max-age`.
pub const MAX_AGE: u32 = 1800;

/// Events a control-point SSDP listener hands up to [`crate::discovery`]-level code.
///
/// This is a trait boundary, not an implementation: whatever drives the actual UDP
/// socket is expected to produce exactly these three shapes.
#[derive(Debug, Clone)]
pub enum SsdpEvent {
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
}

impl SsdpEvent {
    /// USN (unique service name) carried by any event variant.
    pub fn usn(&self) -> &str {
        match self {
            SsdpEvent::Alive { usn, .. } => usn,
            SsdpEvent::ByeBye { usn, .. } => usn,
            SsdpEvent::SearchResponse { usn, .. } => usn,
        }
    }

    /// Device description URL, when the event carries one (absent for byebye).
    pub fn location(&self) -> Option<&str> {
        match self {
            SsdpEvent::Alive { location, .. } => Some(location),
            SsdpEvent::ByeBye { .. } => None,
            SsdpEvent::SearchResponse { location, .. } => Some(location),
        }
    }

    pub fn max_age(&self) -> u32 {
        match self {
            SsdpEvent::Alive { max_age, .. } => *max_age,
            SsdpEvent::ByeBye { .. } => 0,
            SsdpEvent::SearchResponse { max_age, .. } => *max_age,
        }
    }
}
