//! Client registry
//!
//! Tracks live push-channel clients and their entity rooms. The registry
//! is owned by the supervisor and shared by reference; it is not global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use dashmap::DashMap;
use smallvec::SmallVec;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Identifier assigned to each connected client
pub type ClientId = u64;

/// Outcome of delivering one frame to a set of clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub dropped: usize,
}

impl std::ops::AddAssign for Delivery {
    fn add_assign(&mut self, other: Self) {
        self.sent += other.sent;
        self.dropped += other.dropped;
    }
}

struct ClientEntry {
    tx: mpsc::Sender<Arc<str>>,
    rooms: AHashSet<String>,
}

/// Live clients and room membership
pub struct ClientRegistry {
    next_id: AtomicU64,
    buffer: usize,
    clients: DashMap<ClientId, ClientEntry>,
    rooms: DashMap<String, AHashSet<ClientId>>,
}

impl ClientRegistry {
    /// Create a registry whose clients each get a queue of `buffer` frames
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            clients: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a client; frames for it arrive on the returned receiver
    pub fn register(&self) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.clients.insert(
            id,
            ClientEntry {
                tx,
                rooms: AHashSet::new(),
            },
        );
        (id, rx)
    }

    /// Remove a client and its room memberships
    pub fn remove(&self, id: ClientId) -> bool {
        let entry = match self.clients.remove(&id) {
            Some((_, entry)) => entry,
            None => return false,
        };
        for room in entry.rooms {
            self.leave_room(&room, id);
        }
        true
    }

    /// Add a client to an entity room. Returns false for unknown clients.
    pub fn join(&self, id: ClientId, room: &str) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut entry) => {
                entry.rooms.insert(room.to_string());
            }
            None => return false,
        }
        self.rooms.entry(room.to_string()).or_default().insert(id);
        true
    }

    /// Remove a client from an entity room. Returns false if it was not a member.
    pub fn leave(&self, id: ClientId, room: &str) -> bool {
        let was_member = match self.clients.get_mut(&id) {
            Some(mut entry) => entry.rooms.remove(room),
            None => false,
        };
        if was_member {
            self.leave_room(room, id);
        }
        was_member
    }

    fn leave_room(&self, room: &str, id: ClientId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Queue a frame for one client
    pub fn send_to(&self, id: ClientId, frame: Arc<str>) -> Delivery {
        match self.clients.get(&id) {
            Some(entry) => deliver(&entry.tx, frame),
            None => Delivery::default(),
        }
    }

    /// Queue a frame for every client
    pub fn broadcast(&self, frame: &Arc<str>) -> Delivery {
        let mut delivery = Delivery::default();
        for entry in self.clients.iter() {
            delivery += deliver(&entry.tx, frame.clone());
        }
        delivery
    }

    /// Queue a frame for every member of a room
    pub fn send_room(&self, room: &str, frame: &Arc<str>) -> Delivery {
        let members: SmallVec<[ClientId; 8]> = match self.rooms.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return Delivery::default(),
        };

        let mut delivery = Delivery::default();
        for id in members {
            delivery += self.send_to(id, frame.clone());
        }
        delivery
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_member(&self, id: ClientId, room: &str) -> bool {
        self.clients
            .get(&id)
            .map(|entry| entry.rooms.contains(room))
            .unwrap_or(false)
    }
}

/// Never waits: a full queue drops the frame for this client only
fn deliver(tx: &mpsc::Sender<Arc<str>>, frame: Arc<str>) -> Delivery {
    match tx.try_send(frame) {
        Ok(()) => Delivery { sent: 1, dropped: 0 },
        Err(TrySendError::Full(_)) => Delivery { sent: 0, dropped: 1 },
        // Receiver gone; the connection task removes the client
        Err(TrySendError::Closed(_)) => Delivery::default(),
    }
}
