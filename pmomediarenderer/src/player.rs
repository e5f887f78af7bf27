//! `Player`: the narrow trait surface the OpenHome Playlist service needs from
//! the local player daemon. The daemon itself (its control protocol, its
//! process lifecycle) is out of scope; this is the seam the service is built
//! against, plus an in-memory reference implementation used by tests.
//!
//! The player's ids are ephemeral: they are only valid for the lifetime of
//! its current queue and are reassigned whenever the queue is rebuilt (e.g.
//! after a source switch). [`crate::playlist_service::PlaylistService`] is
//! the layer that hides this from OpenHome control points.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use thiserror::Error;

/// One track as the player sees it: its ephemeral id, the uri it resolved,
/// and the DIDL-Lite metadata it was given (or synthesized) at insert time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpSong {
    pub mpd_id: i32,
    pub uri: String,
    pub didl_metadata: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Buffering,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStatus {
    pub tracks: Vec<UpSong>,
    pub current_id: Option<i32>,
    /// Bumped on every queue mutation; lets callers cheaply detect "nothing
    /// changed" without diffing the full track list.
    pub queue_version: u64,
    pub transport_state: TransportState,
    pub repeat: bool,
    pub shuffle: bool,
    pub position_seconds: u32,
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player id {0} not found in current queue")]
    UnknownId(i32),
    #[error("player command failed: {0}")]
    CommandFailed(String),
    #[error("player is unreachable: {0}")]
    Unreachable(String),
}

/// The seam between the OpenHome Playlist service and the local player
/// daemon. Implementations own their own transport (pipe, socket, library
/// call) and must be safe to call from multiple threads concurrently.
pub trait Player: Send + Sync {
    fn status(&self) -> Result<PlayerStatus, PlayerError>;

    /// Inserts `uri` (already run through `morph_special_url`) after
    /// `after_id` (0 meaning "at the head"), storing `didl_metadata`
    /// alongside it. Returns the freshly assigned id.
    fn insert_after_id(
        &self,
        after_id: i32,
        uri: &str,
        didl_metadata: &str,
    ) -> Result<i32, PlayerError>;

    fn delete_id(&self, id: i32) -> Result<(), PlayerError>;
    fn delete_all(&self) -> Result<(), PlayerError>;

    fn play(&self) -> Result<(), PlayerError>;
    fn pause(&self) -> Result<(), PlayerError>;
    fn stop(&self) -> Result<(), PlayerError>;
    fn next(&self) -> Result<(), PlayerError>;
    fn previous(&self) -> Result<(), PlayerError>;

    fn set_repeat(&self, repeat: bool) -> Result<(), PlayerError>;
    fn set_shuffle(&self, shuffle: bool) -> Result<(), PlayerError>;

    fn seek_second_absolute(&self, seconds: u32) -> Result<(), PlayerError>;
    fn seek_second_relative(&self, delta_seconds: i32) -> Result<(), PlayerError>;
    fn seek_id(&self, id: i32) -> Result<(), PlayerError>;
    fn seek_index(&self, index: u32) -> Result<(), PlayerError>;

    fn tracks_max(&self) -> u32;
}

struct InMemoryInner {
    tracks: VecDeque<UpSong>,
    current_id: Option<i32>,
    queue_version: u64,
    transport_state: TransportState,
    repeat: bool,
    shuffle: bool,
    position_seconds: u32,
}

/// A reference `Player` with no real playback, used by tests and as the
/// grounding template for a real daemon adapter. Mirrors the push/flush
/// shape of a local playlist manager: an ordered queue guarded by one mutex,
/// with every mutation bumping a version counter.
pub struct InMemoryPlayer {
    next_id: AtomicI32,
    inner: Mutex<InMemoryInner>,
    tracks_max: u32,
}

impl InMemoryPlayer {
    pub fn new(tracks_max: u32) -> Self {
        InMemoryPlayer {
            next_id: AtomicI32::new(1),
            inner: Mutex::new(InMemoryInner {
                tracks: VecDeque::new(),
                current_id: None,
                queue_version: 0,
                transport_state: TransportState::Stopped,
                repeat: false,
                shuffle: false,
                position_seconds: 0,
            }),
            tracks_max,
        }
    }

    fn bump(inner: &mut InMemoryInner) {
        inner.queue_version += 1;
    }
}

impl Player for InMemoryPlayer {
    fn status(&self) -> Result<PlayerStatus, PlayerError> {
        let inner = self.inner.lock().unwrap();
        Ok(PlayerStatus {
            tracks: inner.tracks.iter().cloned().collect(),
            current_id: inner.current_id,
            queue_version: inner.queue_version,
            transport_state: inner.transport_state,
            repeat: inner.repeat,
            shuffle: inner.shuffle,
            position_seconds: inner.position_seconds,
        })
    }

    fn insert_after_id(
        &self,
        after_id: i32,
        uri: &str,
        didl_metadata: &str,
    ) -> Result<i32, PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.tracks.len() as u32 >= self.tracks_max {
            return Err(PlayerError::CommandFailed("queue is full".into()));
        }
        let new_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let song = UpSong {
            mpd_id: new_id,
            uri: uri.to_string(),
            didl_metadata: didl_metadata.to_string(),
        };
        if after_id == 0 {
            inner.tracks.push_front(song);
        } else {
            let pos = inner
                .tracks
                .iter()
                .position(|t| t.mpd_id == after_id)
                .ok_or(PlayerError::UnknownId(after_id))?;
            inner.tracks.insert(pos + 1, song);
        }
        if inner.current_id.is_none() {
            inner.current_id = Some(new_id);
        }
        Self::bump(&mut inner);
        Ok(new_id)
    }

    fn delete_id(&self, id: i32) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner
            .tracks
            .iter()
            .position(|t| t.mpd_id == id)
            .ok_or(PlayerError::UnknownId(id))?;
        inner.tracks.remove(pos);
        if inner.current_id == Some(id) {
            inner.current_id = inner.tracks.front().map(|t| t.mpd_id);
        }
        Self::bump(&mut inner);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tracks.clear();
        inner.current_id = None;
        inner.transport_state = TransportState::Stopped;
        Self::bump(&mut inner);
        Ok(())
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().transport_state = TransportState::Playing;
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().transport_state = TransportState::Paused;
        Ok(())
    }

    fn stop(&self) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().transport_state = TransportState::Stopped;
        Ok(())
    }

    fn next(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(current) = inner.current_id else {
            return Ok(());
        };
        if let Some(pos) = inner.tracks.iter().position(|t| t.mpd_id == current) {
            inner.current_id = inner.tracks.get(pos + 1).map(|t| t.mpd_id);
        }
        inner.position_seconds = 0;
        Ok(())
    }

    fn previous(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(current) = inner.current_id else {
            return Ok(());
        };
        if let Some(pos) = inner.tracks.iter().position(|t| t.mpd_id == current) {
            if pos > 0 {
                inner.current_id = inner.tracks.get(pos - 1).map(|t| t.mpd_id);
            }
        }
        inner.position_seconds = 0;
        Ok(())
    }

    fn set_repeat(&self, repeat: bool) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().repeat = repeat;
        Ok(())
    }

    fn set_shuffle(&self, shuffle: bool) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().shuffle = shuffle;
        Ok(())
    }

    fn seek_second_absolute(&self, seconds: u32) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().position_seconds = seconds;
        Ok(())
    }

    fn seek_second_relative(&self, delta_seconds: i32) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.position_seconds = (inner.position_seconds as i64 + delta_seconds as i64).max(0) as u32;
        Ok(())
    }

    fn seek_id(&self, id: i32) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tracks.iter().any(|t| t.mpd_id == id) {
            return Err(PlayerError::UnknownId(id));
        }
        inner.current_id = Some(id);
        inner.position_seconds = 0;
        Ok(())
    }

    fn seek_index(&self, index: u32) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner
            .tracks
            .get(index as usize)
            .map(|t| t.mpd_id)
            .ok_or(PlayerError::CommandFailed(format!("no track at index {index}")))?;
        inner.current_id = Some(id);
        inner.position_seconds = 0;
        Ok(())
    }

    fn tracks_max(&self) -> u32 {
        self.tracks_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_after_zero_goes_to_head() {
        let player = InMemoryPlayer::new(100);
        let a = player.insert_after_id(0, "http://a", "<DIDL-a>").unwrap();
        let b = player.insert_after_id(0, "http://b", "<DIDL-b>").unwrap();
        let status = player.status().unwrap();
        assert_eq!(status.tracks[0].mpd_id, b);
        assert_eq!(status.tracks[1].mpd_id, a);
    }

    #[test]
    fn insert_after_existing_id_lands_immediately_after_it() {
        let player = InMemoryPlayer::new(100);
        let a = player.insert_after_id(0, "http://a", "").unwrap();
        let b = player.insert_after_id(a, "http://b", "").unwrap();
        let c = player.insert_after_id(a, "http://c", "").unwrap();
        let ids: Vec<i32> = player.status().unwrap().tracks.iter().map(|t| t.mpd_id).collect();
        assert_eq!(ids, vec![a, c, b]);
    }

    #[test]
    fn delete_id_removes_and_advances_current() {
        let player = InMemoryPlayer::new(100);
        let a = player.insert_after_id(0, "http://a", "").unwrap();
        let b = player.insert_after_id(a, "http://b", "").unwrap();
        assert_eq!(player.status().unwrap().current_id, Some(a));
        player.delete_id(a).unwrap();
        assert_eq!(player.status().unwrap().current_id, Some(b));
    }

    #[test]
    fn delete_unknown_id_fails() {
        let player = InMemoryPlayer::new(100);
        assert!(matches!(player.delete_id(99), Err(PlayerError::UnknownId(99))));
    }

    #[test]
    fn queue_version_bumps_on_every_mutation() {
        let player = InMemoryPlayer::new(100);
        let before = player.status().unwrap().queue_version;
        player.insert_after_id(0, "http://a", "").unwrap();
        let after = player.status().unwrap().queue_version;
        assert!(after > before);
    }

    #[test]
    fn tracks_max_is_enforced() {
        let player = InMemoryPlayer::new(1);
        player.insert_after_id(0, "http://a", "").unwrap();
        assert!(player.insert_after_id(0, "http://b", "").is_err());
    }
}
