#![warn(missing_docs)]
//! Connection tracking and byte-stream reassembly for a kernel-assisted
//! socket-tracing pipeline.
//!
//! A kernel probe intercepts per-process socket syscalls and emits
//! fixed-layout events (open, close, data) over a ring buffer. This crate is
//! the user-space half: it keys trackers by `(pid, fd, generation)`, buffers
//! out-of-order data events by sequence number, reassembles contiguous byte
//! ranges per direction, and drives an incremental protocol parser over
//! them, tolerating dropped events, dead processes, and fd reuse.
//!
//! # Key types
//!
//! - [`TrackerRegistry`]: owns all trackers; dispatches probe events and
//!   advances the per-iteration lifecycle ([`tick`](TrackerRegistry::tick)).
//! - [`ConnectionTracker`]: one connection's state machine: identity,
//!   traffic class, two [`DataStream`]s, liveness, death countdown.
//! - [`DataStream`]: per-direction reassembly buffer with parser carry-over.
//! - [`MessageParser`]: the seam where protocol grammars plug in; this
//!   crate ships none.
//!
//! # Example
//!
//! ```no_run
//! use conn_track::{SocketDataEvent, TrackerConfig, TrackerRegistry};
//!
//! # fn next_event() -> SocketDataEvent { unimplemented!() }
//! let mut registry = TrackerRegistry::new(TrackerConfig::default());
//! // per ring-buffer poll:
//! registry.accept_data_event(next_event());
//! for tracker in registry.trackers_mut() {
//!     // extract messages from tracker.req_data() / tracker.resp_data()
//! }
//! registry.tick();
//! ```
//!
//! # Feature flags
//!
//! - **`tracing`** (default): emit `tracing` events for upstream anomalies
//!   (duplicate events, identity conflicts, parser progress checks).

mod events;
mod parser;
mod registry;
mod stream;
mod tracker;


#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! trace_error {
    ($($arg:tt)*) => { ::tracing::error!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_error {
    ($($arg:tt)*) => {};
}

pub(crate) use {trace_error, trace_warn};

pub use events::{
    ConnCloseEvent,
    ConnId,
    ConnOpenEvent,
    DataEventKind,
    Direction,
    EndpointRole,
    SockAddr,
    SocketDataEvent,
    TrafficClass,
    TrafficProtocol,
};
pub use parser::{BufferPosition, ByteSegments, MessageKind, MessageParser, ParseResult};
pub use registry::TrackerRegistry;
pub use stream::{DataStream, StreamStats};
pub use tracker::{CloseInfo, ConnectionTracker, OpenInfo, TrackerConfig, TrackerStats};
