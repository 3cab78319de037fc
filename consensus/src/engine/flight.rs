//! Per-key sharing of one evaluation among identical concurrent callers.
//!
//! The first caller for a key becomes the leader and fans out. Callers that
//! arrive while it runs follow: they wait, bounded by their own deadline, for
//! the leader's outcome (success or error) instead of fanning out again. A
//! leader that goes away without an outcome leaves followers to compute on
//! their own with whatever time they have left.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

type Slot<V> = watch::Receiver<Option<V>>;

pub(crate) struct FlightGate<K: Hash + Eq + Clone, V: Clone> {
    flights: Mutex<HashMap<K, Slot<V>>>,
}

pub(crate) enum Flight<'a, K: Hash + Eq + Clone, V: Clone> {
    Leader(FlightLeader<'a, K, V>),
    Follower(FlightFollower<V>),
}

pub(crate) struct FlightLeader<'a, K: Hash + Eq + Clone, V: Clone> {
    owner: &'a FlightGate<K, V>,
    key: K,
    tx: watch::Sender<Option<V>>,
}

pub(crate) struct FlightFollower<V> {
    rx: Slot<V>,
}

impl<K: Hash + Eq + Clone, V: Clone> FlightGate<K, V> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Lead a new flight for `key`, or follow the one already running.
    pub fn join(&self, key: K) -> Flight<'_, K, V> {
        let mut flights = self.lock();
        if let Some(rx) = flights.get(&key) {
            return Flight::Follower(FlightFollower { rx: rx.clone() });
        }
        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx);
        Flight::Leader(FlightLeader {
            owner: self,
            key,
            tx,
        })
    }

    /// Keys with a running leader.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: Hash + Eq + Clone, V: Clone> FlightLeader<'_, K, V> {
    /// Publish the outcome to every follower and close the flight.
    pub fn complete(self, outcome: V) {
        self.tx.send_replace(Some(outcome));
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Drop for FlightLeader<'_, K, V> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.key);
    }
}

impl<V: Clone> FlightFollower<V> {
    /// The leader's outcome, or `None` when the leader went away without one
    /// or `deadline` passed first.
    pub async fn outcome(mut self, deadline: Instant) -> Option<V> {
        match timeout_at(deadline, self.rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => outcome.clone(),
            _ => None,
        }
    }
}
