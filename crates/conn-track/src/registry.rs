use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::events::{ConnCloseEvent, ConnId, ConnOpenEvent, SocketDataEvent};
use crate::tracker::{ConnectionTracker, TrackerConfig};

/// Owns every live [`ConnectionTracker`], keyed by `(pid, fd)` and then by
/// generation, and dispatches incoming probe events to them.
///
/// Keeping generations nested under the `(pid, fd)` pair means a connection
/// counts as "active" while *any* of its generations survives, and the whole
/// entry disappears once the last one is destroyed.
pub struct TrackerRegistry {
    conns:  HashMap<(u32, u32), BTreeMap<u32, ConnectionTracker>>,
    config: TrackerConfig,
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl TrackerRegistry {
    /// Create an empty registry with the given tracker knobs.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            conns: HashMap::new(),
            config,
        }
    }

    /// The registry's current tracker knobs.
    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Test override: replace the inactivity duration, propagating to live
    /// trackers.
    pub fn set_inactivity_duration(&mut self, duration: Duration) {
        self.config.inactivity_duration = duration;
        self.propagate_config();
    }

    /// Test override: replace the death-countdown length, propagating to
    /// live trackers.
    pub fn set_death_countdown_iters(&mut self, iters: i32) {
        self.config.death_countdown_iters = iters;
        self.propagate_config();
    }

    fn propagate_config(&mut self) {
        let config = self.config;
        for tracker in self.trackers_mut() {
            tracker.set_config(config);
        }
    }

    /// Dispatch a connection-open event.
    pub fn accept_open_event(&mut self, event: ConnOpenEvent) {
        self.get_or_create(event.conn_id).add_open_event(event);
    }

    /// Dispatch a connection-close event.
    pub fn accept_close_event(&mut self, event: ConnCloseEvent) {
        self.get_or_create(event.conn_id).add_close_event(event);
    }

    /// Dispatch a data event.
    pub fn accept_data_event(&mut self, event: SocketDataEvent) {
        self.get_or_create(event.conn_id).add_data_event(event);
    }

    /// Fetch or create the tracker for `conn_id`.
    ///
    /// A generation observed for a `(pid, fd)` pair supersedes every lower
    /// generation: superseded trackers are scheduled for death immediately
    /// (keeping their countdown window to drain trailing events), including
    /// the fetched tracker itself when a higher generation already exists.
    pub fn get_or_create(&mut self, conn_id: ConnId) -> &mut ConnectionTracker {
        let config = self.config;
        let countdown = config.death_countdown_iters;

        let generations = self.conns.entry((conn_id.pid, conn_id.fd)).or_default();
        let newest = generations.last_key_value().map(|(&generation, _)| generation);
        for (_, stale) in generations.range_mut(..conn_id.generation) {
            stale.mark_for_death(countdown);
        }

        let tracker = generations
            .entry(conn_id.generation)
            .or_insert_with(|| ConnectionTracker::new(config));
        if newest.is_some_and(|newest| newest > conn_id.generation) {
            tracker.mark_for_death(countdown);
        }
        tracker
    }

    /// Look up a tracker without creating one.
    pub fn get(&self, conn_id: ConnId) -> Option<&ConnectionTracker> {
        self.conns
            .get(&(conn_id.pid, conn_id.fd))?
            .get(&conn_id.generation)
    }

    /// Number of `(pid, fd)` pairs with at least one surviving generation.
    pub fn active_connections(&self) -> usize {
        self.conns.len()
    }

    /// Total trackers across all generations.
    pub fn tracker_count(&self) -> usize {
        self.conns.values().map(BTreeMap::len).sum()
    }

    /// Iterate over all live trackers.
    pub fn trackers(&self) -> impl Iterator<Item = &ConnectionTracker> {
        self.conns.values().flat_map(BTreeMap::values)
    }

    /// Iterate mutably over all live trackers.
    pub fn trackers_mut(&mut self) -> impl Iterator<Item = &mut ConnectionTracker> {
        self.conns.values_mut().flat_map(BTreeMap::values_mut)
    }

    /// Advance one pipeline iteration across every tracker.
    ///
    /// Runs in three phases: death countdowns decrement, expired trackers
    /// are pruned, and only then do inactivity probes run. A tracker the
    /// probe marks dead (`death_countdown = 0`) therefore remains visible
    /// until the next tick's prune.
    pub fn tick(&mut self) {
        self.conns.retain(|_, generations| {
            generations.retain(|_, tracker| {
                tracker.decrement_death_countdown();
                !tracker.ready_for_destruction()
            });
            !generations.is_empty()
        });

        let now = Instant::now();
        for tracker in self.trackers_mut() {
            tracker.check_inactivity(now);
        }
    }
}
