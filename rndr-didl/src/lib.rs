//! DIDL-Lite: the XML metadata format used by UPnP/AV content directories.
//!
//! This crate parses the metadata a remote content directory (or a control point's
//! `Insert`) hands us, preserving each item's byte-exact source fragment. See
//! [`sax`] for the streaming parser itself.

pub mod sax;
