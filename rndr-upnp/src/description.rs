//! Device and service description: fetching and parsing the XML document a UPnP
//! device publishes at its SSDP-advertised `LOCATION` URL.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("fetching description from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("xml error at byte {offset}: {source}")]
    Xml {
        offset: usize,
        #[source]
        source: quick_xml::Error,
    },
    #[error("description document has no root device")]
    MissingDevice,
    #[error("fetching description from {url} timed out after {elapsed_ms} ms")]
    Timeout { url: String, elapsed_ms: u128 },
}

/// One `<service>` entry under a device's `<serviceList>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDesc {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
}

/// A parsed device description document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDesc {
    pub ok: bool,
    pub device_type: String,
    pub friendly_name: String,
    pub udn: String,
    pub url_base: String,
    pub manufacturer: String,
    pub model_name: String,
    pub services: Vec<ServiceDesc>,
}

impl DeviceDesc {
    /// Parses a device description document fetched from `location`. `url_base`
    /// defaults to the scheme+host of `location` when the document carries no
    /// explicit `<URLBase>`, matching how relative control/event URLs are resolved.
    pub fn parse(location: &str, xml: &str) -> Result<Self, DescriptionError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut desc = DeviceDesc {
            ok: false,
            url_base: default_url_base(location),
            ..Default::default()
        };

        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut current_service = ServiceDesc::default();
        let mut in_service = false;
        let mut seen_device = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e.name());
                    if name == "device" {
                        seen_device = true;
                    }
                    if name == "service" {
                        in_service = true;
                        current_service = ServiceDesc::default();
                    }
                    stack.push(name);
                    text.clear();
                }
                Ok(Event::Text(t)) => {
                    text.push_str(&t.unescape().unwrap_or_default());
                }
                Ok(Event::End(e)) => {
                    let name = local_name(&e.name());
                    stack.pop();
                    let parent = stack.last().map(String::as_str).unwrap_or("");

                    match (parent, name.as_str()) {
                        ("device", "deviceType") => desc.device_type = text.trim().to_string(),
                        ("device", "friendlyName") => desc.friendly_name = text.trim().to_string(),
                        ("device", "UDN") => desc.udn = text.trim().to_string(),
                        ("device", "manufacturer") => desc.manufacturer = text.trim().to_string(),
                        ("device", "modelName") => desc.model_name = text.trim().to_string(),
                        ("root", "URLBase") => desc.url_base = text.trim().to_string(),
                        ("service", "serviceType") => {
                            current_service.service_type = text.trim().to_string()
                        }
                        ("service", "serviceId") => {
                            current_service.service_id = text.trim().to_string()
                        }
                        ("service", "SCPDURL") => current_service.scpd_url = text.trim().to_string(),
                        ("service", "controlURL") => {
                            current_service.control_url = text.trim().to_string()
                        }
                        ("service", "eventSubURL") => {
                            current_service.event_sub_url = text.trim().to_string()
                        }
                        _ if name == "service" && in_service => {
                            desc.services.push(current_service.clone());
                            in_service = false;
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(source) => {
                    return Err(DescriptionError::Xml {
                        offset: reader.buffer_position() as usize,
                        source,
                    })
                }
            }
            buf.clear();
        }

        if !seen_device || desc.udn.is_empty() {
            return Err(DescriptionError::MissingDevice);
        }

        desc.ok = true;
        Ok(desc)
    }

    /// Resolves a URL that may be relative to `url_base` (control/event/SCPD URLs
    /// are frequently given as paths, to be joined against the device's base URL).
    pub fn resolve(&self, maybe_relative: &str) -> String {
        if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
            return maybe_relative.to_string();
        }
        let base = self.url_base.trim_end_matches('/');
        if maybe_relative.starts_with('/') {
            format!("{}{}", base, maybe_relative)
        } else {
            format!("{}/{}", base, maybe_relative)
        }
    }
}

fn local_name(name: &quick_xml::name::QName) -> String {
    let raw = String::from_utf8_lossy(name.as_ref());
    raw.rsplit(':').next().unwrap_or(&raw).to_string()
}

fn default_url_base(location: &str) -> String {
    if let Some(scheme_end) = location.find("://") {
        let after = &location[scheme_end + 3..];
        if let Some(path_start) = after.find('/') {
            return location[..scheme_end + 3 + path_start].to_string();
        }
    }
    location.to_string()
}

/// Blocking bridge for callers that run on an ordinary OS thread (the SSDP
/// callback thread) rather than inside a tokio task. Drives [`fetch`] to
/// completion on a small dedicated runtime so the rest of the HTTP stack can
/// stay async.
pub fn fetch_blocking(location: &str, timeout: std::time::Duration) -> Result<DeviceDesc, DescriptionError> {
    use std::sync::OnceLock;
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    let rt = RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("building blocking-bridge runtime")
    });

    rt.block_on(async {
        match tokio::time::timeout(timeout, fetch(location)).await {
            Ok(result) => result,
            Err(_) => Err(DescriptionError::Timeout {
                url: location.to_string(),
                elapsed_ms: timeout.as_millis(),
            }),
        }
    })
}

/// Fetches and parses the device description document at `location`.
pub async fn fetch(location: &str) -> Result<DeviceDesc, DescriptionError> {
    let body = reqwest::get(location)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| DescriptionError::Fetch {
            url: location.to_string(),
            source,
        })?
        .text()
        .await
        .map_err(|source| DescriptionError::Fetch {
            url: location.to_string(),
            source,
        })?;

    DeviceDesc::parse(location, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>Bridge</modelName>
    <UDN>uuid:abc-123</UDN>
    <serviceList>
      <service>
        <serviceType>urn:av-openhome-org:service:Playlist:1</serviceType>
        <serviceId>urn:av-openhome-org:serviceId:Playlist</serviceId>
        <SCPDURL>/Playlist/scpd.xml</SCPDURL>
        <controlURL>/Playlist/control</controlURL>
        <eventSubURL>/Playlist/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn parses_device_fields() {
        let desc = DeviceDesc::parse("http://192.168.1.5:49494/desc.xml", SAMPLE).unwrap();
        assert!(desc.ok);
        assert_eq!(desc.friendly_name, "Living Room");
        assert_eq!(desc.udn, "uuid:abc-123");
        assert_eq!(desc.services.len(), 1);
        assert_eq!(desc.services[0].service_id, "urn:av-openhome-org:serviceId:Playlist");
    }

    #[test]
    fn default_url_base_is_scheme_and_host() {
        let desc = DeviceDesc::parse("http://192.168.1.5:49494/desc.xml", SAMPLE).unwrap();
        assert_eq!(desc.url_base, "http://192.168.1.5:49494");
    }

    #[test]
    fn resolve_joins_relative_paths_against_url_base() {
        let desc = DeviceDesc::parse("http://192.168.1.5:49494/desc.xml", SAMPLE).unwrap();
        assert_eq!(
            desc.resolve("/Playlist/control"),
            "http://192.168.1.5:49494/Playlist/control"
        );
        assert_eq!(
            desc.resolve("http://other/control"),
            "http://other/control"
        );
    }

    #[test]
    fn missing_device_is_an_error() {
        let err = DeviceDesc::parse("http://h/desc.xml", "<root></root>");
        assert!(err.is_err());
    }
}
