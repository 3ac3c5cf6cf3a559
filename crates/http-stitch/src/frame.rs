//! Frame-level HTTP/2 parsing
//!
//! HTTP/2 traffic is carried as a second message-type variant: whole frames,
//! not assembled messages. No HPACK decoding or stream reassembly happens at
//! this layer.

use std::collections::VecDeque;

use conn_track::{ByteSegments, MessageKind, MessageParser, ParseResult};

/// HTTP/2 client connection preface: `PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n`.
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame header size (9 bytes).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Frame types (RFC 7540 §6)
pub const FRAME_TYPE_DATA: u8 = 0x00;
pub const FRAME_TYPE_HEADERS: u8 = 0x01;
pub const FRAME_TYPE_PRIORITY: u8 = 0x02;
pub const FRAME_TYPE_RST_STREAM: u8 = 0x03;
pub const FRAME_TYPE_SETTINGS: u8 = 0x04;
pub const FRAME_TYPE_PUSH_PROMISE: u8 = 0x05;
pub const FRAME_TYPE_PING: u8 = 0x06;
pub const FRAME_TYPE_GOAWAY: u8 = 0x07;
pub const FRAME_TYPE_WINDOW_UPDATE: u8 = 0x08;
pub const FRAME_TYPE_CONTINUATION: u8 = 0x09;

/// Frame flags
pub const FLAG_END_STREAM: u8 = 0x01;
pub const FLAG_END_HEADERS: u8 = 0x04;
pub const FLAG_PADDED: u8 = 0x08;
pub const FLAG_PRIORITY: u8 = 0x20;

/// Newtype for HTTP/2 stream identifiers (31-bit unsigned integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw HTTP/2 frame as captured off the wire.
#[derive(Debug, Clone)]
pub struct Http2Frame {
    /// Frame type octet (see the `FRAME_TYPE_*` constants).
    pub frame_type:   u8,
    /// Flag octet (see the `FLAG_*` constants).
    pub flags:        u8,
    /// Stream the frame belongs to (0 = connection-level).
    pub stream_id:    StreamId,
    /// Frame payload, padding included.
    pub payload:      Vec<u8>,
    /// BPF timestamp of the event holding the frame header.
    pub timestamp_ns: u64,
}

impl Http2Frame {
    /// True when `flag` is set on this frame.
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Check if a buffer starts with the HTTP/2 connection preface.
pub fn is_http2_preface(buffer: &[u8]) -> bool {
    buffer.starts_with(CONNECTION_PREFACE)
}

/// Frame-level implementation of the stream parser seam.
///
/// Emits every whole frame in submission order, skipping the client preface
/// when it leads. A frame split across the buffered data's end stays
/// unconsumed until its tail arrives.
#[derive(Default)]
pub struct Http2FrameParser {
    segments: ByteSegments,
}

impl MessageParser for Http2FrameParser {
    type Message = Http2Frame;

    fn append(&mut self, data: &[u8], timestamp_ns: u64) {
        self.segments.push(data, timestamp_ns);
    }

    fn parse_messages(&mut self, _kind: MessageKind, out: &mut VecDeque<Http2Frame>) -> ParseResult {
        let data = self.segments.bytes();
        let mut pos = 0;

        if is_http2_preface(data) {
            pos += CONNECTION_PREFACE.len();
        }

        while pos + FRAME_HEADER_SIZE <= data.len() {
            let header = &data[pos..pos + FRAME_HEADER_SIZE];
            let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
            let total = FRAME_HEADER_SIZE + length;
            if pos + total > data.len() {
                break; // Incomplete frame
            }

            out.push_back(Http2Frame {
                frame_type:   header[3],
                flags:        header[4],
                stream_id:    StreamId(u32::from_be_bytes([
                    header[5] & 0x7F,
                    header[6],
                    header[7],
                    header[8],
                ])),
                payload:      data[pos + FRAME_HEADER_SIZE..pos + total].to_vec(),
                timestamp_ns: self.segments.timestamp_at(pos),
            });
            pos += total;
        }

        ParseResult {
            end_position: self.segments.position_of(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let len = payload.len();
        let mut frame = vec![
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
            frame_type,
            flags,
            (stream_id >> 24) as u8 & 0x7F,
            (stream_id >> 16) as u8,
            (stream_id >> 8) as u8,
            stream_id as u8,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    fn parse(data: &[u8], ts: u64) -> (Vec<Http2Frame>, ParseResult) {
        let mut parser = Http2FrameParser::default();
        parser.append(data, ts);
        let mut out = VecDeque::new();
        let result = parser.parse_messages(MessageKind::Request, &mut out);
        (out.into_iter().collect(), result)
    }

    #[test]
    fn whole_frames_are_emitted() {
        let mut data = build_frame(FRAME_TYPE_HEADERS, FLAG_END_HEADERS, 1, b"head");
        data.extend(build_frame(FRAME_TYPE_DATA, FLAG_END_STREAM, 1, b"body"));

        let (frames, result) = parse(&data, 5);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame_type, FRAME_TYPE_HEADERS);
        assert_eq!(frames[0].payload, b"head");
        assert_eq!(frames[1].stream_id, StreamId(1));
        assert!(frames[1].has_flag(FLAG_END_STREAM));
        assert_eq!(frames[1].timestamp_ns, 5);
        assert_eq!(result.end_position.seq_num, 1, "one segment, all consumed");
    }

    #[test]
    fn preface_is_skipped() {
        let mut data = CONNECTION_PREFACE.to_vec();
        data.extend(build_frame(FRAME_TYPE_SETTINGS, 0, 0, &[]));

        let (frames, result) = parse(&data, 0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FRAME_TYPE_SETTINGS);
        assert_eq!(frames[0].stream_id, StreamId(0));
        assert_eq!(result.end_position.seq_num, 1);
    }

    #[test]
    fn split_frame_waits_for_its_tail() {
        let data = build_frame(FRAME_TYPE_DATA, 0, 3, b"payload");
        let (head, tail) = data.split_at(12);

        let (frames, result) = parse(head, 0);
        assert!(frames.is_empty());
        assert_eq!(result.end_position.seq_num, 0);
        assert_eq!(result.end_position.offset, 0);

        let mut parser = Http2FrameParser::default();
        parser.append(head, 10);
        parser.append(tail, 20);
        let mut out = VecDeque::new();
        let result = parser.parse_messages(MessageKind::Request, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, b"payload");
        assert_eq!(out[0].timestamp_ns, 10);
        assert_eq!(result.end_position.seq_num, 2);
    }

    #[test]
    fn reserved_stream_id_bit_is_masked() {
        let mut data = build_frame(FRAME_TYPE_DATA, 0, 7, b"");
        data[5] |= 0x80;
        let (frames, _) = parse(&data, 0);
        assert_eq!(frames[0].stream_id, StreamId(7));
    }
}
