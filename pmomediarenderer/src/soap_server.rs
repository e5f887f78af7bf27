//! HTTP server for the OpenHome Playlist SOAP control endpoint. Parses each
//! POST body with `rndr_upnp::soap`, dispatches to [`PlaylistService`], and
//! maps the result back to a SOAP response or fault.
//!
//! The service itself is a plain `Mutex`-guarded state machine (see
//! [`crate::playlist_service`]); this module is the thin async/sync bridge,
//! the same `spawn_blocking` shape `rndr-stream`'s proxy uses to cross from
//! axum into blocking code.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use rndr_upnp::soap::{build_soap_fault, build_soap_response, error_codes, parse_soap_action, SoapAction};

use crate::player::TransportState;
use crate::playlist_service::{ErrorOutcome, PlaylistError, PlaylistService};

pub const SERVICE_URN: &str = "urn:av-openhome-org:service:Playlist:1";

#[derive(Clone)]
struct AppState {
    service: Arc<PlaylistService>,
}

pub fn router(service: Arc<PlaylistService>) -> Router {
    Router::new()
        .route("/ctl/Playlist", post(handle))
        .with_state(AppState { service })
}

async fn handle(State(state): State<AppState>, body: Bytes) -> Response {
    let action = match parse_soap_action(&body) {
        Ok(action) => action,
        Err(e) => return fault(error_codes::INVALID_ACTION, &e.to_string()),
    };

    let service = state.service.clone();
    let name = action.name.clone();
    let result = tokio::task::spawn_blocking(move || dispatch(&service, &action))
        .await
        .unwrap_or_else(|e| Err(PlaylistError::Internal(format!("action task panicked: {e}"))));

    match result {
        Ok(values) => match build_soap_response(SERVICE_URN, &name, values) {
            Ok(xml) => xml_response(StatusCode::OK, xml),
            Err(e) => fault(error_codes::ACTION_FAILED, &e.to_string()),
        },
        Err(err) => match err.outcome() {
            ErrorOutcome::InvalidParam => fault(error_codes::INVALID_ARGS, &err.to_string()),
            ErrorOutcome::InternalError => fault(error_codes::ACTION_FAILED, &err.to_string()),
            ErrorOutcome::NotActiveHttp409 => {
                (StatusCode::CONFLICT, "playlist service is not active").into_response()
            }
        },
    }
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    (
        status,
        [("Content-Type", "text/xml; charset=\"utf-8\"")],
        xml,
    )
        .into_response()
}

fn fault(upnp_code: &str, description: &str) -> Response {
    let xml = build_soap_fault(
        "s:Client",
        "UPnPError",
        Some(upnp_code),
        Some(description),
    )
    .unwrap_or_else(|_| format!("<fault>{description}</fault>"));
    xml_response(StatusCode::INTERNAL_SERVER_ERROR, xml)
}

fn arg<'a>(action: &'a SoapAction, name: &str) -> Result<&'a str, PlaylistError> {
    action
        .args
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| PlaylistError::InvalidParam(format!("missing argument {name}")))
}

fn arg_i32(action: &SoapAction, name: &str) -> Result<i32, PlaylistError> {
    arg(action, name)?
        .parse()
        .map_err(|_| PlaylistError::InvalidParam(format!("argument {name} is not an integer")))
}

fn arg_u32(action: &SoapAction, name: &str) -> Result<u32, PlaylistError> {
    arg(action, name)?
        .parse()
        .map_err(|_| PlaylistError::InvalidParam(format!("argument {name} is not an integer")))
}

fn arg_bool(action: &SoapAction, name: &str) -> Result<bool, PlaylistError> {
    match arg(action, name)? {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(PlaylistError::InvalidParam(format!(
            "argument {name} ({other}) is not a boolean"
        ))),
    }
}

/// OpenHome's `TransportState` action reports one of these four string values.
fn transport_state_name(state: TransportState) -> &'static str {
    match state {
        TransportState::Playing => "Playing",
        TransportState::Paused => "Paused",
        TransportState::Stopped => "Stopped",
        TransportState::Buffering => "Buffering",
    }
}

fn bool_arg(value: bool) -> u8 {
    value as u8
}

fn ok(pairs: impl IntoIterator<Item = (&'static str, String)>) -> Result<HashMap<String, String>, PlaylistError> {
    Ok(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// The `TrackList` argument is itself an escaped XML string embedding further
/// XML fragments; their text content needs its own layer of escaping.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn dispatch(service: &PlaylistService, action: &SoapAction) -> Result<HashMap<String, String>, PlaylistError> {
    match action.name.as_str() {
        "Insert" => {
            let after_id = arg_i32(action, "AfterId")?;
            let uri = arg(action, "Uri")?;
            let metadata = arg(action, "Metadata")?;
            let new_id = service.insert(after_id, uri, metadata)?;
            ok([("NewId", new_id.to_string())])
        }
        "DeleteId" => {
            service.delete_id(arg_i32(action, "Value")?)?;
            ok([])
        }
        "DeleteAll" => {
            service.delete_all()?;
            ok([])
        }
        "Read" => {
            let (uri, metadata) = service.read(arg_i32(action, "Id")?)?;
            let _ = uri;
            ok([("Metadata", metadata)])
        }
        "ReadList" => {
            let ids = arg(action, "IdList")?
                .split_whitespace()
                .map(|s| s.parse::<i32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| PlaylistError::InvalidParam("IdList contains a non-integer id".into()))?;
            let tracks = service.read_list(&ids)?;
            let body = tracks
                .into_iter()
                .map(|(id, uri, metadata)| {
                    format!(
                        "<Entry><Id>{id}</Id><Uri>{}</Uri><Metadata>{}</Metadata></Entry>",
                        escape_xml(&uri),
                        escape_xml(&metadata)
                    )
                })
                .collect::<String>();
            ok([("TrackList", format!("<TrackList>{body}</TrackList>"))])
        }
        "TracksMax" => ok([("Value", service.tracks_max().to_string())]),
        "ProtocolInfo" => ok([("Value", service.protocol_info().to_string())]),
        "TransportState" => ok([("Value", transport_state_name(service.transport_state()?).to_string())]),
        "Id" => ok([("Value", service.current_id()?.to_string())]),
        "Repeat" => ok([("Value", bool_arg(service.repeat()?).to_string())]),
        "Shuffle" => ok([("Value", bool_arg(service.shuffle()?).to_string())]),
        "IdArray" => {
            let array = service.id_array()?;
            ok([("Token", "0".to_string()), ("Array", array)])
        }
        "IdArrayChanged" => {
            let token = arg(action, "Token")?
                .parse::<u64>()
                .map_err(|_| PlaylistError::InvalidParam("Token is not an integer".into()))?;
            let unchanged = service.id_array_changed(token)?;
            ok([("Value", if unchanged { "1" } else { "0" }.to_string())])
        }
        "Play" => {
            service.play()?;
            ok([])
        }
        "Pause" => {
            service.pause()?;
            ok([])
        }
        "Stop" => {
            service.stop()?;
            ok([])
        }
        "Next" => {
            service.next()?;
            ok([])
        }
        "Previous" => {
            service.previous()?;
            ok([])
        }
        "SetRepeat" => {
            service.set_repeat(arg_bool(action, "Value")?)?;
            ok([])
        }
        "SetShuffle" => {
            service.set_shuffle(arg_bool(action, "Value")?)?;
            ok([])
        }
        "SeekSecondAbsolute" => {
            service.seek_second_absolute(arg_u32(action, "Value")?)?;
            ok([])
        }
        "SeekSecondRelative" => {
            service.seek_second_relative(arg_i32(action, "Value")?)?;
            ok([])
        }
        "SeekId" => {
            service.seek_id(arg_i32(action, "Value")?)?;
            ok([])
        }
        "SeekIndex" => {
            service.seek_index(arg_u32(action, "Value")?)?;
            ok([])
        }
        other => Err(PlaylistError::InvalidParam(format!("unknown action {other}"))),
    }
}
