//! HTTP stitching over reassembled socket streams
//!
//! Plugs concrete protocol grammars into the [`conn_track`] parser seam and
//! adds the record-emission layer: HTTP/1.x messages are parsed
//! incrementally out of each connection's per-direction streams, paired
//! request-to-response, filtered by header predicates, and appended to a
//! columnar [`HttpRecordBatch`]. HTTP/2 traffic is handled at frame
//! granularity as a second message-type variant.
//!
//! # Usage
//!
//! Feed the kernel probe's events to a [`SocketTraceCollector`] and call
//! [`transfer_data`](SocketTraceCollector::transfer_data) once per
//! ring-buffer poll:
//!
//! ```ignore
//! let mut collector = SocketTraceCollector::default();
//! collector.init_clock_realtime_offset();
//!
//! collector.accept_open_conn_event(open);
//! collector.accept_data_event(data);
//!
//! let mut batch = HttpRecordBatch::default();
//! collector.transfer_data(&mut batch);
//! ```

mod collector;
mod filter;
pub mod frame;
mod message;
mod parse;
mod records;

pub use collector::SocketTraceCollector;
pub use filter::{HeaderMatch, HttpHeaderFilter};
pub use frame::{Http2Frame, Http2FrameParser, StreamId};
pub use message::HttpMessage;
pub use parse::HttpParser;
pub use records::{HttpRecord, HttpRecordBatch};
