//! OpenHome Playlist renderer bridge.
//!
//! The local player daemon owns ephemeral, process-lifetime track ids; this
//! crate is the layer that makes those ids look stable to an OpenHome
//! control point. [`playlist_service::PlaylistService`] is the state
//! machine; [`soap_server`] exposes it over SOAP; [`player::Player`] is the
//! seam a real daemon adapter implements.
//!
//! SSDP advertisement and device-description serving are out of scope here
//! (see `rndr_discovery` for the *client* side of that); this crate only
//! assembles the Playlist control surface and wires it to `rndr_stream`'s
//! proxy for anything the player can't fetch on its own.

pub mod events;
pub mod id_array;
pub mod metadata_cache;
pub mod player;
pub mod playlist_service;
pub mod soap_server;
pub mod wiring;

pub use events::{EventBus, PlayerEventKind, PlaylistStateChanged};
pub use metadata_cache::MetadataCache;
pub use player::{InMemoryPlayer, Player, PlayerError, PlayerStatus, TransportState, UpSong};
pub use playlist_service::{ErrorOutcome, PlaylistError, PlaylistService, PlaylistState};
