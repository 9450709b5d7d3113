//! Presentation helpers layered on the raw event feed: a live sales
//! tally, a presence counter, a connection status badge, scoped room
//! membership and an application-level heartbeat.

use crate::client::{ClientEvent, ConnectionState, RealtimeClient};
use crate::subscription::{EventKind, Subscription};
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Running tally of sales seen this session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub today_revenue: f64,
    pub transaction_count: u64,
    pub average_order_value: f64,
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
}

/// Accumulates sale totals from the live feed. Attach it with
/// [`LiveMetrics::attach`] or feed it envelopes directly via `record`.
#[derive(Clone, Default)]
pub struct LiveMetrics {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to sale updates; the tally grows until the returned
    /// handle is dropped.
    pub fn attach(&self, client: &RealtimeClient) -> Subscription {
        let metrics = self.clone();
        client.on(EventKind::SaleUpdate, move |event| metrics.record(event))
    }

    pub fn record(&self, event: &ClientEvent) {
        let Some(envelope) = event.envelope() else {
            return;
        };
        let amount = match &envelope.payload {
            events::protocol::EventPayload::SaleCompleted(sale) => {
                sale.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0)
            }
            _ => return,
        };

        // All four fields move together under one lock, so a reader never
        // observes a count without its revenue.
        let mut snapshot = crate::lock(&self.inner);
        snapshot.transaction_count += 1;
        snapshot.today_revenue += amount;
        snapshot.average_order_value =
            snapshot.today_revenue / snapshot.transaction_count as f64;
        snapshot.last_update = Some(envelope.timestamp);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        crate::lock(&self.inner).clone()
    }

    pub fn reset(&self) {
        *crate::lock(&self.inner) = MetricsSnapshot::default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBadge {
    pub label: &'static str,
    pub color: &'static str,
}

/// Maps connection state to the badge shown next to the feed.
pub fn status_badge(state: ConnectionState) -> StatusBadge {
    match state {
        ConnectionState::Connected => StatusBadge {
            label: "Connected",
            color: "green",
        },
        ConnectionState::Reconnecting => StatusBadge {
            label: "Reconnecting...",
            color: "yellow",
        },
        ConnectionState::Connecting | ConnectionState::Disconnected => StatusBadge {
            label: "Disconnected",
            color: "gray",
        },
    }
}

/// Tracks the server's presence counter.
pub struct ActiveUsers {
    count: Arc<AtomicU64>,
    _subscription: Subscription,
}

impl ActiveUsers {
    pub fn attach(client: &RealtimeClient) -> Self {
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let subscription = client.on(EventKind::ActiveUsersUpdate, move |event| {
            if let ClientEvent::ActiveUsers { count } = event {
                seen.store(*count, Ordering::SeqCst);
            }
        });
        Self {
            count,
            _subscription: subscription,
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Scoped room membership: joins on construction, leaves on drop.
pub struct RoomMembership {
    client: RealtimeClient,
    room: String,
}

impl RoomMembership {
    pub fn join(client: &RealtimeClient, room: impl Into<String>) -> Option<Self> {
        let room = room.into();
        if room.trim().is_empty() {
            return None;
        }
        client.join_room(room.clone());
        Some(Self {
            client: client.clone(),
            room,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        debug!("Leaving room {}", self.room);
        self.client.leave_room(self.room.clone());
    }
}

/// Periodic application-level ping. The task stops when the handle is
/// dropped.
pub struct Heartbeat {
    task: tokio::task::JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(client: &RealtimeClient, interval: Duration) -> Self {
        let client = client.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                client.ping();
            }
        });
        Self { task }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}
