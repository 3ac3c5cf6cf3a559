//! Fuzz target: HTTP/2 frame parsing
//!
//! Feeds random bytes to the frame-level parser. The goal is to ensure the
//! parser never panics and never consumes past the submitted data.

#![no_main]

use std::collections::VecDeque;

use conn_track::{MessageKind, MessageParser};
use http_stitch::Http2FrameParser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = Http2FrameParser::default();
    parser.append(data, 0);
    let mut out = VecDeque::new();
    let result = parser.parse_messages(MessageKind::Request, &mut out);
    assert!(result.end_position.seq_num <= 1);

    // Chunked feed.
    if data.len() > 10 {
        let (head, tail) = data.split_at(data.len() / 2);
        let mut parser = Http2FrameParser::default();
        parser.append(head, 1);
        parser.append(tail, 2);
        let mut out = VecDeque::new();
        let _ = parser.parse_messages(MessageKind::Request, &mut out);
    }
});
