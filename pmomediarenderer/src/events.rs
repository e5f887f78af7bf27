//! Event emission for the PlaylistService: player events are classified,
//! state is rebuilt, and a UPnP event fires if anything observable changed.
//!
//! Subscribers register through a token-returning registry backed by bounded
//! channels, rather than an unbounded visitor list: a subscriber that falls
//! behind has its events dropped instead of stalling the publisher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::playlist_service::PlaylistState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEventKind {
    Queue,
    Player,
    Opts,
}

#[derive(Debug, Clone)]
pub struct PlaylistStateChanged {
    pub kind: PlayerEventKind,
    pub state: PlaylistState,
}

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 32;

struct Subscriber {
    token: u64,
    tx: Sender<PlaylistStateChanged>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_token: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Registers a new subscriber and returns its receiver plus an
    /// unsubscribe token.
    pub fn subscribe(&self) -> (u64, Receiver<PlaylistStateChanged>) {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CHANNEL_CAPACITY);
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push(Subscriber { token, tx });
        (token, rx)
    }

    pub fn unsubscribe(&self, token: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.token != token);
    }

    /// Broadcasts to every subscriber. A full channel (a slow subscriber)
    /// drops that event rather than blocking the publisher.
    pub fn publish(&self, event: PlaylistStateChanged) {
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(token = subscriber.token, "dropping event for slow subscriber");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::TransportState;

    fn sample_state() -> PlaylistState {
        PlaylistState {
            transport_state: TransportState::Stopped,
            repeat: false,
            shuffle: false,
            id_array_base64: String::new(),
            current_id: None,
            tracks_max: 100,
            protocol_info: String::new(),
        }
    }

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (_token, rx) = bus.subscribe();
        bus.publish(PlaylistStateChanged {
            kind: PlayerEventKind::Queue,
            state: sample_state(),
        });
        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, PlayerEventKind::Queue);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (token, rx) = bus.subscribe();
        bus.unsubscribe(token);
        bus.publish(PlaylistStateChanged {
            kind: PlayerEventKind::Opts,
            state: sample_state(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn slow_subscriber_is_dropped_not_blocked() {
        let bus = EventBus::new();
        let (_token, _rx) = bus.subscribe();
        for _ in 0..(SUBSCRIBER_CHANNEL_CAPACITY + 10) {
            bus.publish(PlaylistStateChanged {
                kind: PlayerEventKind::Player,
                state: sample_state(),
            });
        }
        // Publishing never blocks or panics even once the channel is full.
    }
}
