use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::events::{
    ConnCloseEvent,
    ConnId,
    ConnOpenEvent,
    Direction,
    EndpointRole,
    SocketDataEvent,
    TrafficClass,
    TrafficProtocol,
};
use crate::stream::DataStream;
use crate::{trace_error, trace_warn};

/// Process-wide tracker knobs, fixed at registry construction.
///
/// Test code may override either knob through the registry setters; the new
/// values propagate to live trackers.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// How long a tracker may go without an event before the inactivity
    /// probe runs (default: 300 s).
    pub inactivity_duration:   Duration,
    /// Ticks granted after close (or supersession) to drain trailing events
    /// before destruction (default: 6).
    pub death_countdown_iters: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            inactivity_duration:   Duration::from_secs(300),
            death_countdown_iters: 6,
        }
    }
}

/// Facts recorded from the connection-open event.
#[derive(Debug, Clone)]
pub struct OpenInfo {
    /// BPF timestamp of the open.
    pub timestamp_ns: u64,
    /// Remote peer address, when the probe's sockaddr decoded.
    pub remote_addr:  Option<IpAddr>,
    /// Remote peer port (0 when the address did not decode).
    pub remote_port:  u16,
}

/// Facts recorded from the connection-close event.
#[derive(Debug, Clone, Copy)]
pub struct CloseInfo {
    /// BPF timestamp of the close.
    pub timestamp_ns: u64,
    /// Total send-direction events the kernel claims it emitted.
    pub send_seq_num: u64,
    /// Total recv-direction events the kernel claims it emitted.
    pub recv_seq_num: u64,
}

/// Upstream-anomaly and invariant-violation counters for one tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerStats {
    /// Open events that overwrote an earlier open.
    pub clobbered_open:          u64,
    /// Close events that overwrote an earlier close.
    pub clobbered_close:         u64,
    /// Events whose identity fields conflicted with established ones.
    pub identity_conflicts:      u64,
    /// Events that tried to change an established traffic class.
    pub traffic_class_conflicts: u64,
    /// Data events whose syscall kind mapped to no direction.
    pub unknown_event_kinds:     u64,
    /// Open/data events observed inside the death-countdown window.
    pub events_after_close:      u64,
}

/// Per-connection state machine.
///
/// Created by the registry on the first event for a connection id, mutated
/// by subsequent events and ticks, destroyed when its death countdown
/// reaches zero at a tick boundary. Owns one [`DataStream`] per direction.
pub struct ConnectionTracker {
    conn_id:               ConnId,
    traffic_class:         TrafficClass,
    open_info:             Option<OpenInfo>,
    close_info:            Option<CloseInfo>,
    send_data:             DataStream,
    recv_data:             DataStream,
    num_send_events:       u64,
    num_recv_events:       u64,
    /// Max over all observed event timestamps.
    last_bpf_timestamp_ns: u64,
    /// Steady-clock reading at the last mutation.
    last_update:           Instant,
    /// Negative = alive; `0..=N` = destruction scheduled in that many ticks.
    death_countdown:       i32,
    config:                TrackerConfig,
    stats:                 TrackerStats,
}

impl ConnectionTracker {
    /// Create a tracker that has seen no events yet.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            conn_id: ConnId::default(),
            traffic_class: TrafficClass::default(),
            open_info: None,
            close_info: None,
            send_data: DataStream::new(),
            recv_data: DataStream::new(),
            num_send_events: 0,
            num_recv_events: 0,
            last_bpf_timestamp_ns: 0,
            last_update: Instant::now(),
            death_countdown: -1,
            config,
            stats: TrackerStats::default(),
        }
    }

    /// Record a connection-open event.
    ///
    /// A second open is an upstream anomaly: logged, counted, and the new
    /// open wins. An open inside the death-countdown window is logged but
    /// permitted.
    pub fn add_open_event(&mut self, event: ConnOpenEvent) {
        if self.open_info.is_some() {
            trace_error!("clobbering existing open event {}", event.conn_id);
            self.stats.clobbered_open += 1;
        }
        if self.is_zombie() {
            trace_warn!("open event during death countdown {}", event.conn_id);
            self.stats.events_after_close += 1;
        }

        self.update_timestamps(event.timestamp_ns);
        self.set_traffic_class(event.traffic_class);
        self.update_identity(event.conn_id);

        let (remote_addr, remote_port) = match event.addr.to_endpoint() {
            Some((ip, port)) => (Some(ip), port),
            None => {
                trace_warn!("could not decode remote address {}", event.conn_id);
                (None, 0)
            },
        };
        self.open_info = Some(OpenInfo {
            timestamp_ns: event.timestamp_ns,
            remote_addr,
            remote_port,
        });
    }

    /// Record a connection-close event and start the death countdown.
    ///
    /// A second close is an upstream anomaly: logged, counted, last wins.
    pub fn add_close_event(&mut self, event: ConnCloseEvent) {
        if self.close_info.is_some() {
            trace_error!("clobbering existing close event {}", event.conn_id);
            self.stats.clobbered_close += 1;
        }

        self.update_timestamps(event.timestamp_ns);
        self.update_identity(event.conn_id);

        self.close_info = Some(CloseInfo {
            timestamp_ns: event.timestamp_ns,
            send_seq_num: event.wr_seq_num,
            recv_seq_num: event.rd_seq_num,
        });

        self.mark_for_death(self.config.death_countdown_iters);
    }

    /// Route a data event to the matching direction's stream.
    pub fn add_data_event(&mut self, event: SocketDataEvent) {
        if self.is_zombie() {
            trace_warn!("data event during death countdown {}", event.conn_id);
            self.stats.events_after_close += 1;
        }

        self.update_timestamps(event.timestamp_ns);
        self.update_identity(event.conn_id);
        self.set_traffic_class(event.traffic_class);

        match event.kind.direction() {
            Some(Direction::Send) => {
                self.send_data.add_event(event);
                self.num_send_events += 1;
            },
            Some(Direction::Recv) => {
                self.recv_data.add_event(event);
                self.num_recv_events += 1;
            },
            None => {
                trace_error!("unexpected data event kind {:?} {}", event.kind, event.conn_id);
                self.stats.unknown_event_kinds += 1;
            },
        }
    }

    /// Clean-shutdown predicate: close has arrived and the per-direction
    /// event counts match the totals the kernel reported at close.
    pub fn all_events_received(&self) -> bool {
        self.close_info.as_ref().is_some_and(|close| {
            self.num_send_events == close.send_seq_num
                && self.num_recv_events == close.recv_seq_num
        })
    }

    /// The request and response streams in that order, per the endpoint's
    /// role, or `None` while the role is unknown. This is the single site of
    /// the role/direction mapping.
    pub fn req_resp_data(&mut self) -> Option<(&mut DataStream, &mut DataStream)> {
        match self.traffic_class.role {
            EndpointRole::Requestor => Some((&mut self.send_data, &mut self.recv_data)),
            EndpointRole::Responder => Some((&mut self.recv_data, &mut self.send_data)),
            EndpointRole::Unknown => None,
        }
    }

    /// The stream carrying protocol requests, per the endpoint's role.
    pub fn req_data(&mut self) -> Option<&mut DataStream> {
        self.req_resp_data().map(|(req, _)| req)
    }

    /// The stream carrying protocol responses, per the endpoint's role.
    pub fn resp_data(&mut self) -> Option<&mut DataStream> {
        self.req_resp_data().map(|(_, resp)| resp)
    }

    /// Schedule destruction in `countdown` ticks. If destruction is already
    /// scheduled, the earlier of the two deadlines stands; rescheduling can
    /// never prolong a tracker's life.
    pub fn mark_for_death(&mut self, countdown: i32) {
        if self.death_countdown >= 0 {
            self.death_countdown = self.death_countdown.min(countdown);
        } else {
            self.death_countdown = countdown;
        }
    }

    /// True once destruction has been scheduled.
    pub fn is_zombie(&self) -> bool {
        self.death_countdown >= 0
    }

    /// True when the countdown has expired and the registry may drop this
    /// tracker.
    pub fn ready_for_destruction(&self) -> bool {
        self.death_countdown == 0
    }

    /// One pipeline iteration: advance the death countdown and, when the
    /// tracker has been quiet past the inactivity duration, probe liveness.
    pub fn iteration_tick(&mut self) {
        self.decrement_death_countdown();
        self.check_inactivity(Instant::now());
    }

    pub(crate) fn decrement_death_countdown(&mut self) {
        if self.death_countdown > 0 {
            self.death_countdown -= 1;
        }
    }

    pub(crate) fn check_inactivity(&mut self, now: Instant) {
        if now.duration_since(self.last_update) > self.config.inactivity_duration {
            self.handle_inactivity();
        }
    }

    /// Decide what to do with a tracker that has been idle too long.
    ///
    /// If the kernel no longer holds the fd the connection is dead: schedule
    /// immediate destruction. Otherwise the connection is idle but alive, and
    /// whatever sits in the buffers will not parse as a continuation of
    /// anything meaningful, so both streams are flushed.
    pub fn handle_inactivity(&mut self) {
        if conn_fd_exists(self.conn_id.pid, self.conn_id.fd) {
            self.send_data.reset();
            self.recv_data.reset();
        } else {
            self.mark_for_death(0);
        }
    }

    /// Track the max BPF timestamp and refresh the steady-clock activity
    /// marker.
    pub fn update_timestamps(&mut self, bpf_timestamp_ns: u64) {
        self.last_bpf_timestamp_ns = self.last_bpf_timestamp_ns.max(bpf_timestamp_ns);
        self.last_update = Instant::now();
    }

    fn update_identity(&mut self, conn_id: ConnId) {
        let cur = &mut self.conn_id;
        let ok = merge_id_field(&mut cur.pid, conn_id.pid)
            & merge_id_field(&mut cur.pid_start_time_ns, conn_id.pid_start_time_ns)
            & merge_id_field(&mut cur.fd, conn_id.fd)
            & merge_id_field(&mut cur.generation, conn_id.generation);
        if !ok {
            trace_error!(
                "identity conflict: tracker {} got event for {}",
                self.conn_id,
                conn_id
            );
            self.stats.identity_conflicts += 1;
        }
    }

    fn set_traffic_class(&mut self, traffic_class: TrafficClass) {
        debug_assert!(self.traffic_class.is_consistent());

        if self.traffic_class.protocol == TrafficProtocol::Unknown {
            self.traffic_class = traffic_class;
        } else if traffic_class.protocol != TrafficProtocol::Unknown
            && traffic_class != self.traffic_class
        {
            trace_error!(
                "not allowed to change the traffic class of an active tracker {}",
                self.conn_id
            );
            self.stats.traffic_class_conflicts += 1;
        }
    }

    /// Connection identity accumulated so far (zero fields = unobserved).
    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Protocol/role pair, once known.
    pub fn traffic_class(&self) -> TrafficClass {
        self.traffic_class
    }

    /// Open-event facts, if an open was seen.
    pub fn open_info(&self) -> Option<&OpenInfo> {
        self.open_info.as_ref()
    }

    /// Close-event facts, if a close was seen.
    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    /// The raw send-direction stream.
    pub fn send_data(&self) -> &DataStream {
        &self.send_data
    }

    /// The raw recv-direction stream.
    pub fn recv_data(&self) -> &DataStream {
        &self.recv_data
    }

    /// Data events routed to the send direction so far.
    pub fn num_send_events(&self) -> u64 {
        self.num_send_events
    }

    /// Data events routed to the recv direction so far.
    pub fn num_recv_events(&self) -> u64 {
        self.num_recv_events
    }

    /// Max BPF timestamp over all observed events.
    pub fn last_bpf_timestamp_ns(&self) -> u64 {
        self.last_bpf_timestamp_ns
    }

    /// Remaining ticks until destruction; negative while alive.
    pub fn death_countdown(&self) -> i32 {
        self.death_countdown
    }

    /// Anomaly counters.
    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub(crate) fn set_config(&mut self, config: TrackerConfig) {
        self.config = config;
    }
}

/// Set a zero ("unobserved") identity field, or verify an established one.
/// Returns false on a conflicting non-zero value, leaving the field as-is.
fn merge_id_field<T: Copy + PartialEq + Default>(cur: &mut T, new: T) -> bool {
    if *cur == T::default() {
        *cur = new;
        true
    } else {
        *cur == new
    }
}

/// Whether `/proc/<pid>/fd/<fd>` still exists. Platforms without procfs
/// cannot tell, and report the connection as alive so only the flush side of
/// inactivity handling acts.
#[cfg(target_os = "linux")]
fn conn_fd_exists(pid: u32, fd: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}/fd/{fd}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn conn_fd_exists(_pid: u32, _fd: u32) -> bool {
    true
}
