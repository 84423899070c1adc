//! Local room multiplexer.
//!
//! One subscriber loop per instance consumes the global event channel and
//! fans each event out to the room for its auction. Delivery to a client is
//! a non-blocking send into a bounded mailbox: a full mailbox drops the
//! newest message for that client only, and a client that stays saturated
//! past the lag threshold is disconnected. Two events observed in order by
//! the subscriber loop reach every surviving local client in that order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::domain::{AuctionEvent, AuctionId};

/// Per-client outbound mailbox capacity.
pub const CLIENT_MAILBOX: usize = 256;

/// A client saturated longer than this is disconnected.
const LAG_DISCONNECT: Duration = Duration::from_secs(5);

pub type ClientId = u64;

struct ClientHandle {
    tx: mpsc::Sender<String>,
    lagging_since: Option<Instant>,
}

/// The set of duplex clients attached to one auction on this instance.
pub struct Room {
    auction_id: AuctionId,
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
}

impl Room {
    fn new(auction_id: AuctionId) -> Self {
        Room {
            auction_id,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("room lock poisoned").len()
    }

    /// Non-blocking fan-out. Drop-newest per saturated client; drop the
    /// client itself once it has lagged past the threshold.
    fn deliver(&self, payload: &str) {
        let mut clients = self.clients.lock().expect("room lock poisoned");
        let now = Instant::now();
        let mut dead: Vec<ClientId> = Vec::new();

        for (id, handle) in clients.iter_mut() {
            match handle.tx.try_send(payload.to_string()) {
                Ok(()) => handle.lagging_since = None,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let since = *handle.lagging_since.get_or_insert(now);
                    if now.duration_since(since) > LAG_DISCONNECT {
                        warn!(
                            auction_id = %self.auction_id,
                            client_id = id,
                            "disconnecting lagging client"
                        );
                        dead.push(*id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
            }
        }

        for id in dead {
            // Dropping the sender closes the client's write pump.
            clients.remove(&id);
        }
    }
}

pub struct Hub {
    rooms: RwLock<HashMap<AuctionId, Arc<Room>>>,
    next_client_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Hub {
            rooms: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Attach a client to an auction's room, creating the room on first
    /// join. Returns the mailbox to drain and a sender for direct replies
    /// (pongs) to this client.
    pub fn join(
        &self,
        auction_id: AuctionId,
    ) -> (ClientId, mpsc::Receiver<String>, mpsc::Sender<String>) {
        let room = self.get_or_create_room(auction_id);
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_MAILBOX);

        room.clients.lock().expect("room lock poisoned").insert(
            client_id,
            ClientHandle {
                tx: tx.clone(),
                lagging_since: None,
            },
        );
        debug!(auction_id = %auction_id, client_id, "client joined room");
        (client_id, rx, tx)
    }

    /// Detach a client; the room is destroyed when its last client leaves.
    pub fn leave(&self, auction_id: AuctionId, client_id: ClientId) {
        let mut rooms = self.rooms.write().expect("hub lock poisoned");
        let Some(room) = rooms.get(&auction_id) else {
            return;
        };

        let empty = {
            let mut clients = room.clients.lock().expect("room lock poisoned");
            clients.remove(&client_id);
            clients.is_empty()
        };
        if empty {
            rooms.remove(&auction_id);
        }
        debug!(auction_id = %auction_id, client_id, "client left room");
    }

    pub fn room_size(&self, auction_id: AuctionId) -> usize {
        self.rooms
            .read()
            .expect("hub lock poisoned")
            .get(&auction_id)
            .map(|room| room.client_count())
            .unwrap_or(0)
    }

    /// Deliver an event to the local room only, bypassing the bus. Used for
    /// room-scoped updates like viewer counts.
    pub fn send_to_room(&self, auction_id: AuctionId, event: &AuctionEvent) {
        let room = {
            self.rooms
                .read()
                .expect("hub lock poisoned")
                .get(&auction_id)
                .cloned()
        };
        let Some(room) = room else { return };
        match serde_json::to_string(event) {
            Ok(payload) => room.deliver(&payload),
            Err(err) => warn!(error = %err, "failed to serialize room event"),
        }
    }

    /// The subscriber loop: consume the global channel until shutdown and
    /// fan each event out to its auction's local room.
    pub fn spawn(
        self: &Arc<Self>,
        bus: &Arc<dyn EventBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.next() => {
                        let Some(event) = event else { break };
                        hub.send_to_room(event.auction_id, &event);
                    }
                }
            }
            debug!("hub subscriber loop stopped");
        })
    }

    fn get_or_create_room(&self, auction_id: AuctionId) -> Arc<Room> {
        if let Some(room) = self
            .rooms
            .read()
            .expect("hub lock poisoned")
            .get(&auction_id)
        {
            return room.clone();
        }

        let mut rooms = self.rooms.write().expect("hub lock poisoned");
        rooms
            .entry(auction_id)
            .or_insert_with(|| Arc::new(Room::new(auction_id)))
            .clone()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
