//! Wiring between the kernel probe's callbacks and record emission

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use conn_track::{
    ConnCloseEvent,
    ConnId,
    ConnOpenEvent,
    ConnectionTracker,
    MessageKind,
    SocketDataEvent,
    TrackerConfig,
    TrackerRegistry,
    TrafficProtocol,
};

use crate::filter::HttpHeaderFilter;
use crate::frame::Http2FrameParser;
use crate::parse::HttpParser;
use crate::records::{HttpRecord, HttpRecordBatch};

/// Consumes probe events and, on each pipeline tick, turns parsed HTTP
/// traffic into record-batch rows.
///
/// BPF timestamps are nanoseconds since boot; when
/// [`init_clock_realtime_offset`](Self::init_clock_realtime_offset) has run,
/// every accepted event's timestamp is shifted to wall-clock nanoseconds on
/// ingest, so everything downstream (tracker info, messages, records) shares
/// one time base.
pub struct SocketTraceCollector {
    registry:                 TrackerRegistry,
    response_header_filter:   HttpHeaderFilter,
    clock_realtime_offset_ns: u64,
    http2_frames_seen:        u64,
}

impl Default for SocketTraceCollector {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl SocketTraceCollector {
    /// Create a collector with the given tracker knobs and the stock
    /// response filter.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            registry:                 TrackerRegistry::new(config),
            response_header_filter:   HttpHeaderFilter::default(),
            clock_realtime_offset_ns: 0,
            http2_frames_seen:        0,
        }
    }

    /// Compute the boot-to-wall-clock offset applied to event timestamps.
    pub fn init_clock_realtime_offset(&mut self) {
        self.clock_realtime_offset_ns = clock_realtime_offset_ns();
    }

    /// The offset currently applied to event timestamps.
    pub fn clock_realtime_offset(&self) -> u64 {
        self.clock_realtime_offset_ns
    }

    /// Upstream callback: connection opened.
    pub fn accept_open_conn_event(&mut self, mut event: ConnOpenEvent) {
        event.timestamp_ns += self.clock_realtime_offset_ns;
        self.registry.accept_open_event(event);
    }

    /// Upstream callback: connection closed.
    pub fn accept_close_conn_event(&mut self, mut event: ConnCloseEvent) {
        event.timestamp_ns += self.clock_realtime_offset_ns;
        self.registry.accept_close_event(event);
    }

    /// Upstream callback: data captured.
    pub fn accept_data_event(&mut self, mut event: SocketDataEvent) {
        event.timestamp_ns += self.clock_realtime_offset_ns;
        self.registry.accept_data_event(event);
    }

    /// Replace the response header filter.
    pub fn set_response_header_filter(&mut self, filter: HttpHeaderFilter) {
        self.response_header_filter = filter;
    }

    /// Test override: replace the inactivity duration.
    pub fn set_inactivity_duration(&mut self, duration: Duration) {
        self.registry.set_inactivity_duration(duration);
    }

    /// Test override: replace the death-countdown length.
    pub fn set_death_countdown_iters(&mut self, iters: i32) {
        self.registry.set_death_countdown_iters(iters);
    }

    /// Current tracker knobs.
    pub fn config(&self) -> TrackerConfig {
        self.registry.config()
    }

    /// Connections with at least one surviving tracker generation.
    pub fn active_connections(&self) -> usize {
        self.registry.active_connections()
    }

    /// Look up a live tracker.
    pub fn tracker(&self, conn_id: ConnId) -> Option<&ConnectionTracker> {
        self.registry.get(conn_id)
    }

    /// HTTP/2 frames observed and drained so far (no record schema exists
    /// for them yet).
    pub fn http2_frames_seen(&self) -> u64 {
        self.http2_frames_seen
    }

    /// One pipeline tick: drain every known-protocol tracker into `batch`,
    /// then advance tracker lifecycles.
    pub fn transfer_data(&mut self, batch: &mut HttpRecordBatch) {
        let Self {
            registry,
            response_header_filter,
            http2_frames_seen,
            ..
        } = self;

        for tracker in registry.trackers_mut() {
            match tracker.traffic_class().protocol {
                TrafficProtocol::Http => {
                    transfer_http_streams(tracker, response_header_filter, batch);
                },
                TrafficProtocol::Http2 => {
                    let Some((req_stream, resp_stream)) = tracker.req_resp_data() else {
                        continue;
                    };
                    let frames = req_stream.extract_messages::<Http2FrameParser>(MessageKind::Request);
                    *http2_frames_seen += frames.len() as u64;
                    frames.clear();
                    let frames =
                        resp_stream.extract_messages::<Http2FrameParser>(MessageKind::Response);
                    *http2_frames_seen += frames.len() as u64;
                    frames.clear();
                },
                TrafficProtocol::Unknown => {},
            }
        }

        registry.tick();
    }
}

/// Extract requests and responses from one HTTP tracker, pair them FIFO, and
/// append the rows surviving the response filter.
///
/// A response whose request was lost still yields a row with empty request
/// columns; unmatched requests stay queued for a later pass.
fn transfer_http_streams(
    tracker: &mut ConnectionTracker,
    filter: &HttpHeaderFilter,
    batch: &mut HttpRecordBatch,
) {
    let conn_id = tracker.conn_id();
    let (remote_addr, remote_port) = tracker
        .open_info()
        .map(|open| {
            (
                open.remote_addr.map(|ip| ip.to_string()).unwrap_or_default(),
                open.remote_port,
            )
        })
        .unwrap_or_default();

    let Some((req_stream, resp_stream)) = tracker.req_resp_data() else {
        return;
    };
    let requests = req_stream.extract_messages::<HttpParser>(MessageKind::Request);
    let responses = resp_stream.extract_messages::<HttpParser>(MessageKind::Response);

    while let Some(response) = responses.pop_front() {
        let request = requests.pop_front();
        if !filter.matches(&response.headers) {
            continue;
        }
        batch.push(HttpRecord {
            time_ns: response.timestamp_ns,
            conn_id,
            remote_addr: remote_addr.clone(),
            remote_port,
            request,
            response,
        });
    }
}

/// Unix-epoch nanoseconds of the machine's boot instant, so that
/// `boot_offset + bpf_timestamp` is wall-clock time. Falls back to "now" when
/// uptime is unavailable, which keeps the offset nonzero and monotonic
/// within a run.
fn clock_realtime_offset_ns() -> u64 {
    let unix_now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    unix_now_ns.saturating_sub(uptime_ns())
}

#[cfg(target_os = "linux")]
fn uptime_ns() -> u64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|contents| contents.split_whitespace().next()?.parse::<f64>().ok())
        .map(|secs| (secs * 1e9) as u64)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn uptime_ns() -> u64 {
    0
}
