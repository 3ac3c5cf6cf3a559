use std::any::Any;
use std::collections::{BTreeMap, VecDeque, btree_map::Entry};

use crate::events::SocketDataEvent;
use crate::parser::{MessageKind, MessageParser};
use crate::trace_error;

/// Anomaly counters for one direction of a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Data events dropped because their sequence number was already
    /// buffered.
    pub duplicate_events: u64,
    /// Extraction passes where the parser claimed byte progress without
    /// producing a message or consuming an event.
    pub parse_anomalies:  u64,
}

/// One direction's worth of buffered socket data for a single connection.
///
/// Events arrive in ring-buffer pop order, which is not sequence-number
/// order; the map reorders them. Extraction walks the longest contiguous
/// run of sequence numbers from the lowest buffered one, feeds it to an
/// incremental parser, and erases whatever the parser fully consumed.
/// `offset` remembers how far into the (new) first event a previous pass
/// stopped, so partially parsed messages resume without re-parsing.
///
/// The parsed-message queue is materialized on first extraction and is
/// permanently typed by that call: a connection's protocol does not change
/// mid-life, so requesting a different message type later is a hard error.
pub struct DataStream {
    events:   BTreeMap<u64, SocketDataEvent>,
    /// Either nothing, or a `VecDeque<T>` for the one `T` this stream serves.
    messages: Option<Box<dyn Any + Send>>,
    /// Bytes of the first buffered event already consumed by the parser.
    offset:   usize,
    stats:    StreamStats,
}

impl Default for DataStream {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self {
            events:   BTreeMap::new(),
            messages: None,
            offset:   0,
            stats:    StreamStats::default(),
        }
    }

    /// Buffer one data event under its sequence number.
    ///
    /// A duplicate sequence number is an upstream anomaly: the event is
    /// dropped (first-seen wins), logged, and counted.
    pub fn add_event(&mut self, event: SocketDataEvent) {
        match self.events.entry(event.seq_num) {
            Entry::Occupied(_) => {
                trace_error!(
                    "dropping data event clobbering seq_num {} {}",
                    event.seq_num,
                    event.conn_id
                );
                self.stats.duplicate_events += 1;
            },
            Entry::Vacant(slot) => {
                slot.insert(event);
            },
        }
    }

    /// Run the incremental parser for `P` over the contiguous prefix of
    /// buffered events and return the stream's cumulative message queue.
    ///
    /// The queue accumulates across calls; callers drain what they consume.
    /// Calling this twice without an intervening [`add_event`](Self::add_event)
    /// leaves the stream unchanged and returns the same cumulative output.
    ///
    /// # Panics
    ///
    /// Panics if a previous extraction on this stream used a parser with a
    /// different message type.
    pub fn extract_messages<P: MessageParser>(
        &mut self,
        kind: MessageKind,
    ) -> &mut VecDeque<P::Message> {
        let orig_offset = self.offset;
        let mut parser = P::default();

        // Submit the longest gap-free run of sequence numbers, sub-slicing
        // the first event past whatever a previous pass already consumed.
        let mut submitted = 0usize;
        let mut expected = self.events.keys().next().copied().unwrap_or(0);
        for (&seq_num, event) in &self.events {
            if seq_num != expected {
                break;
            }
            let mut msg: &[u8] = &event.msg;
            if submitted == 0 && orig_offset != 0 {
                debug_assert!(
                    orig_offset < msg.len(),
                    "offset {orig_offset} beyond first event ({} bytes)",
                    msg.len()
                );
                msg = &msg[orig_offset.min(msg.len())..];
            }
            parser.append(msg, event.timestamp_ns);
            submitted += 1;
            expected += 1;
        }

        let queue = self
            .messages
            .get_or_insert_with(|| Box::new(VecDeque::<P::Message>::new()))
            .downcast_mut::<VecDeque<P::Message>>()
            .expect("a DataStream cannot change its message type mid-connection");

        let parsed_before = queue.len();
        let result = parser.parse_messages(kind, queue);
        let produced = queue.len() - parsed_before;
        let end = result.end_position;
        debug_assert!(end.seq_num <= submitted);

        // A parser that produced nothing and finished no event must not have
        // moved within the first event either; anything else is a progress
        // anomaly and the pass is discarded.
        if end.seq_num == 0 && produced == 0 && end.offset != 0 {
            trace_error!(
                "parser advanced {} bytes into the first event without yielding a message",
                end.offset
            );
            self.stats.parse_anomalies += 1;
            return queue;
        }

        // The parser saw the first event minus `orig_offset`, so a position
        // inside it is shifted back into event coordinates.
        let new_offset = if end.seq_num == 0 {
            orig_offset + end.offset
        } else {
            end.offset
        };
        for _ in 0..end.seq_num.min(submitted) {
            self.events.pop_first();
        }
        self.offset = new_offset;

        queue
    }

    /// Drop all buffered events and parsed messages, returning the stream to
    /// its untyped initial state. Used when a still-open connection has been
    /// idle long enough that buffered bytes are stale.
    pub fn reset(&mut self) {
        self.events.clear();
        self.messages = None;
        self.offset = 0;
    }

    /// True when no events are buffered and no parsed `T` awaits consumption.
    ///
    /// # Panics
    ///
    /// Panics if the stream's queue was materialized with a different message
    /// type.
    pub fn is_empty<T: Send + 'static>(&self) -> bool {
        self.events.is_empty()
            && match &self.messages {
                None => true,
                Some(queue) => queue
                    .downcast_ref::<VecDeque<T>>()
                    .expect("a DataStream cannot change its message type mid-connection")
                    .is_empty(),
            }
    }

    /// Number of buffered (not yet fully consumed) events.
    pub fn buffered_events(&self) -> usize {
        self.events.len()
    }

    /// Bytes of the first buffered event already consumed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Anomaly counters.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}
