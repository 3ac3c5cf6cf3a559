//! Fuzz target: HTTP/1.x parsing
//!
//! Feeds random bytes to the HTTP/1 parser in both grammar directions.
//! The goal is to ensure the parser never panics on arbitrary input.

#![no_main]

use std::collections::VecDeque;

use conn_track::{MessageKind, MessageParser};
use http_stitch::HttpParser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for kind in [MessageKind::Request, MessageKind::Response] {
        // Whole buffer in one segment.
        let mut parser = HttpParser::default();
        parser.append(data, 0);
        let mut out = VecDeque::new();
        let _ = parser.parse_messages(kind, &mut out);

        // Split across two segments to exercise boundary positions.
        if data.len() > 10 {
            let (head, tail) = data.split_at(data.len() / 2);
            let mut parser = HttpParser::default();
            parser.append(head, 1);
            parser.append(tail, 2);
            let mut out = VecDeque::new();
            let _ = parser.parse_messages(kind, &mut out);
        }
    }
});
