//! Streaming (SAX-style) parser for DIDL-Lite content-directory listings.
//!
//! Parses a directory listing received from a remote content directory and keeps,
//! for every `<item>`, the exact byte range of its source XML so that fragment can
//! be forwarded verbatim to control points without a re-serialization round trip.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirParseError {
    #[error("xml error at byte {offset}: {source}")]
    Xml {
        offset: usize,
        #[source]
        source: quick_xml::Error,
    },
}

/// Whether a parsed object is a container or a leaf item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Container,
    Item,
}

/// A single `<res>` child of an item, with its URI and arbitrary attributes
/// (`protocolInfo`, `duration`, `bitrate`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirResource {
    pub uri: String,
    pub properties: HashMap<String, String>,
}

/// A parsed `<container>` or `<item>` from a DIDL-Lite directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirObject {
    pub kind: ObjectKind,
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub properties: HashMap<String, String>,
    pub resources: Vec<DirResource>,
    /// For items only: the verbatim, balanced `<item ...>...</item>` fragment —
    /// self-contained on its own, with the DIDL-Lite envelope wrapped around it
    /// only on demand (see [`DirObject::to_didl`]). Empty for containers.
    pub didl_fragment: String,
}

impl DirObject {
    fn new(kind: ObjectKind, id: String, parent_id: String) -> Self {
        DirObject {
            kind,
            id,
            parent_id,
            title: String::new(),
            properties: HashMap::new(),
            resources: Vec::new(),
            didl_fragment: String::new(),
        }
    }

    /// Wraps the stored fragment in a minimal DIDL-Lite envelope, suitable for
    /// sending a single item's metadata to a control point.
    pub fn to_didl(&self) -> String {
        format!("{}{}</DIDL-Lite>", DIDL_HEADER, self.didl_fragment)
    }
}

const DIDL_HEADER: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
    "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\"",
    " xmlns:dc=\"http://purl.org/dc/elements/1.1/\"",
    " xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\"",
    " xmlns:dlna=\"urn:schemas-dlna-org:metadata-1-0/\">",
);

/// Result of parsing a directory-content document: the containers and items found,
/// in document order.
#[derive(Debug, Clone, Default)]
pub struct DirContent {
    pub containers: Vec<DirObject>,
    pub items: Vec<DirObject>,
}

struct Frame {
    name: String,
    start_byte: usize,
    attributes: HashMap<String, String>,
    text: String,
}

/// Parses a DIDL-Lite directory listing, recording a verbatim byte-exact fragment
/// for every item.
///
/// Objects are accepted unconditionally; filtering by `upnp:class` (or any other
/// criterion) is left entirely to the caller.
pub fn parse(input: &str) -> Result<DirContent, DirParseError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut dir = DirContent::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut current = DirObject::new(ObjectKind::Item, String::new(), String::new());
    let mut buf = Vec::new();

    loop {
        let start_byte = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attributes = HashMap::new();
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .unwrap_or_default()
                        .into_owned();
                    attributes.insert(key, value);
                }

                match name.as_str() {
                    "container" => {
                        current = DirObject::new(
                            ObjectKind::Container,
                            attributes.get("id").cloned().unwrap_or_default(),
                            attributes.get("parentID").cloned().unwrap_or_default(),
                        );
                    }
                    "item" => {
                        current = DirObject::new(
                            ObjectKind::Item,
                            attributes.get("id").cloned().unwrap_or_default(),
                            attributes.get("parentID").cloned().unwrap_or_default(),
                        );
                    }
                    _ => {}
                }

                stack.push(Frame {
                    name,
                    start_byte,
                    attributes,
                    text: String::new(),
                });
            }
            Ok(Event::Empty(e)) => {
                // Self-closing elements (e.g. `<res/>`) never carry text; treat as
                // start immediately followed by end at the same position.
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attributes = HashMap::new();
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .unwrap_or_default()
                        .into_owned();
                    attributes.insert(key, value);
                }
                apply_end(&stack, &name, &attributes, String::new(), &mut current);
            }
            Ok(Event::Text(t)) => {
                if let Some(frame) = stack.last_mut() {
                    let text = t.unescape().unwrap_or_default();
                    frame.text.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let end_byte = reader.buffer_position() as usize;

                if let Some(frame) = stack.pop() {
                    match name.as_str() {
                        "container" => {
                            dir.containers.push(current.clone());
                        }
                        "item" => {
                            // `end_byte` is the position immediately after the closing
                            // `</item>` tag (quick-xml's buffer position after an End
                            // event), so the slice alone is already a balanced,
                            // self-contained `<item>...</item>` — no need to append a
                            // second closing tag (see the open question on fragment
                            // boundaries: a different XML library reporting a
                            // different offset here would need to append one).
                            current.didl_fragment = input[frame.start_byte..end_byte].to_string();
                            dir.items.push(current.clone());
                        }
                        _ => {
                            apply_end(&stack, &name, &frame.attributes, frame.text.clone(), &mut current);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(source) => {
                return Err(DirParseError::Xml {
                    offset: reader.buffer_position() as usize,
                    source,
                })
            }
        }
        buf.clear();
    }

    Ok(dir)
}

fn apply_end(
    stack: &[Frame],
    name: &str,
    attributes: &HashMap<String, String>,
    text: String,
    current: &mut DirObject,
) {
    let parent_is_object = stack
        .last()
        .map(|f| f.name == "item" || f.name == "container")
        .unwrap_or(false);
    if !parent_is_object {
        return;
    }

    match name {
        "dc:title" => current.title = text,
        "res" => {
            current.resources.push(DirResource {
                uri: text,
                properties: attributes.clone(),
            });
        }
        other => {
            current.properties.insert(other.to_string(), text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">
<container id="1" parentID="0"><dc:title>Music</dc:title><upnp:class>object.container</upnp:class></container>
<item id="2" parentID="1"><dc:title>Track One</dc:title><upnp:class>object.item.audioItem.musicTrack</upnp:class><res protocolInfo="http-get:*:audio/mpeg:*" duration="0:03:20">http://host/track.mp3</res></item>
</DIDL-Lite>"#;

    #[test]
    fn parses_one_container_and_one_item() {
        let dir = parse(SAMPLE).unwrap();
        assert_eq!(dir.containers.len(), 1);
        assert_eq!(dir.items.len(), 1);
        assert_eq!(dir.containers[0].title, "Music");
        assert_eq!(dir.items[0].title, "Track One");
    }

    #[test]
    fn item_resource_has_uri_and_properties() {
        let dir = parse(SAMPLE).unwrap();
        let item = &dir.items[0];
        assert_eq!(item.resources.len(), 1);
        assert_eq!(item.resources[0].uri, "http://host/track.mp3");
        assert_eq!(
            item.resources[0].properties.get("protocolInfo").unwrap(),
            "http-get:*:audio/mpeg:*"
        );
    }

    #[test]
    fn item_fragment_is_balanced_and_wraps_into_didl() {
        let dir = parse(SAMPLE).unwrap();
        let frag = &dir.items[0].didl_fragment;
        assert!(frag.starts_with("<item"));
        assert!(frag.ends_with("</item>"));
        assert_eq!(frag.matches("<item").count(), 1);
        assert_eq!(frag.matches("</item>").count(), 1);

        let wrapped = dir.items[0].to_didl();
        assert!(wrapped.starts_with("<?xml"));
        assert!(wrapped.contains("<item"));
        assert!(wrapped.ends_with("</item></DIDL-Lite>"));
    }

    #[test]
    fn unknown_class_is_not_filtered() {
        let input = r#"<DIDL-Lite><item id="9" parentID="0"><dc:title>X</dc:title><upnp:class>object.item.unknownThing</upnp:class></item></DIDL-Lite>"#;
        let dir = parse(input).unwrap();
        assert_eq!(dir.items.len(), 1);
    }
}
