//! Incremental HTTP/1.x parsing over reassembled stream segments

use std::collections::VecDeque;

use conn_track::{ByteSegments, MessageKind, MessageParser, ParseResult};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

use crate::message::HttpMessage;

/// HTTP/1.x implementation of the stream parser seam.
///
/// Greedily peels complete messages off the front of the submitted segments;
/// stops at the first message whose head or body is not fully buffered yet,
/// leaving those bytes for the next extraction pass.
#[derive(Default)]
pub struct HttpParser {
    segments: ByteSegments,
}

impl MessageParser for HttpParser {
    type Message = HttpMessage;

    fn append(&mut self, data: &[u8], timestamp_ns: u64) {
        self.segments.push(data, timestamp_ns);
    }

    fn parse_messages(&mut self, kind: MessageKind, out: &mut VecDeque<HttpMessage>) -> ParseResult {
        let data = self.segments.bytes();
        let mut pos = 0;
        while pos < data.len() {
            let parsed = match kind {
                MessageKind::Request => try_parse_request(&data[pos..]),
                MessageKind::Response => try_parse_response(&data[pos..]),
            };
            match parsed {
                Some((consumed, mut message)) => {
                    message.timestamp_ns = self.segments.timestamp_at(pos);
                    out.push_back(message);
                    pos += consumed;
                },
                None => break,
            }
        }
        ParseResult {
            end_position: self.segments.position_of(pos),
        }
    }
}

/// Parse one complete request from the front of `data`, returning the byte
/// count consumed. `None` while the head or body is incomplete (or the head
/// is not parseable as HTTP at all, in which case the bytes simply stay
/// buffered).
fn try_parse_request(data: &[u8]) -> Option<(usize, HttpMessage)> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);

    let body_offset = match req.parse(data) {
        Ok(httparse::Status::Complete(len)) => len,
        _ => return None,
    };

    let (body, body_len) = match determine_body(req.headers, &data[body_offset..], None) {
        BodyFraming::Complete { body, consumed } => (body, consumed),
        BodyFraming::Incomplete => return None,
    };

    let method = Method::from_bytes(req.method?.as_bytes()).ok()?;
    let path: Uri = req.path?.parse().ok()?;

    Some((
        body_offset + body_len,
        HttpMessage {
            kind: MessageKind::Request,
            minor_version: req.version? as u8,
            headers: header_map(req.headers),
            method: Some(method),
            path: Some(path),
            status: None,
            body,
            timestamp_ns: 0,
        },
    ))
}

/// Parse one complete response from the front of `data`; see
/// [`try_parse_request`].
fn try_parse_response(data: &[u8]) -> Option<(usize, HttpMessage)> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut res = httparse::Response::new(&mut headers);

    let body_offset = match res.parse(data) {
        Ok(httparse::Status::Complete(len)) => len,
        _ => return None,
    };

    let (body, body_len) = match determine_body(res.headers, &data[body_offset..], res.code) {
        BodyFraming::Complete { body, consumed } => (body, consumed),
        BodyFraming::Incomplete => return None,
    };

    let status = StatusCode::from_u16(res.code?).ok()?;

    Some((
        body_offset + body_len,
        HttpMessage {
            kind: MessageKind::Response,
            minor_version: res.version? as u8,
            headers: header_map(res.headers),
            method: None,
            path: None,
            status: Some(status),
            body,
            timestamp_ns: 0,
        },
    ))
}

fn header_map(headers: &[httparse::Header<'_>]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for h in headers {
        let parsed = (
            HeaderName::from_bytes(h.name.as_bytes()),
            HeaderValue::from_bytes(h.value),
        );
        if let (Ok(name), Ok(value)) = parsed {
            map.append(name, value);
        }
    }
    map
}

/// Result of body framing for an HTTP/1.x message.
enum BodyFraming {
    /// Body is complete; `consumed` is its raw on-wire length (which differs
    /// from `body.len()` for chunked bodies).
    Complete { body: Vec<u8>, consumed: usize },
    /// Not enough data yet.
    Incomplete,
}

/// Determine the body following the head, per RFC 7230 §3.3.3.
///
/// - Content-Length: exactly that many bytes.
/// - Transfer-Encoding: chunked: walk chunk boundaries, de-chunking.
/// - Neither, request: no body.
/// - Neither, response: 1xx/204/304 have no body; anything else reads until
///   connection close and is reported incomplete here.
///
/// `response_status` is `None` for requests.
fn determine_body(
    headers: &[httparse::Header<'_>],
    body_data: &[u8],
    response_status: Option<u16>,
) -> BodyFraming {
    for h in headers {
        if h.name.eq_ignore_ascii_case("Content-Length") {
            let length = std::str::from_utf8(h.value)
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok());
            let Some(length) = length else {
                return BodyFraming::Incomplete; // Invalid Content-Length
            };
            if body_data.len() < length {
                return BodyFraming::Incomplete;
            }
            return BodyFraming::Complete {
                body:     body_data[..length].to_vec(),
                consumed: length,
            };
        }
    }

    for h in headers {
        if h.name.eq_ignore_ascii_case("Transfer-Encoding")
            && let Ok(value) = std::str::from_utf8(h.value)
            && value.to_ascii_lowercase().contains("chunked")
        {
            return decode_chunked_body(body_data);
        }
    }

    match response_status {
        None => BodyFraming::Complete {
            body:     Vec::new(),
            consumed: 0,
        },
        Some(code) if (100..200).contains(&code) || code == 204 || code == 304 => {
            BodyFraming::Complete {
                body:     Vec::new(),
                consumed: 0,
            }
        },
        Some(_) => BodyFraming::Incomplete,
    }
}

/// Walk chunk boundaries of a chunked transfer-coded body.
///
/// Chunk format: `[hex-size][;ext=val]\r\n[data]\r\n`, terminated by
/// `0\r\n\r\n` (possibly with trailers before the final CRLF pair).
fn decode_chunked_body(data: &[u8]) -> BodyFraming {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let Some(line_end) = find_crlf(data, pos) else {
            return BodyFraming::Incomplete;
        };

        // Hex chunk size, ignoring any extension after ';'.
        let size_bytes = &data[pos..line_end];
        let size_part = match size_bytes.iter().position(|&b| b == b';') {
            Some(semi) => &size_bytes[..semi],
            None => size_bytes,
        };
        let Ok(size_str) = std::str::from_utf8(size_part) else {
            return BodyFraming::Incomplete;
        };
        let Ok(chunk_size) = usize::from_str_radix(size_str.trim(), 16) else {
            return BodyFraming::Incomplete;
        };

        pos = line_end + 2;

        if chunk_size == 0 {
            if pos + 2 > data.len() {
                return BodyFraming::Incomplete;
            }
            if data[pos..pos + 2] == *b"\r\n" {
                return BodyFraming::Complete {
                    body,
                    consumed: pos + 2,
                };
            }
            // Trailers: consume through the final blank line.
            return match find_crlf_crlf(data, pos) {
                Some(end) => BodyFraming::Complete {
                    body,
                    consumed: end + 4,
                },
                None => BodyFraming::Incomplete,
            };
        }

        if pos + chunk_size + 2 > data.len() {
            return BodyFraming::Incomplete;
        }
        body.extend_from_slice(&data[pos..pos + chunk_size]);
        pos += chunk_size;
        if data[pos..pos + 2] != *b"\r\n" {
            return BodyFraming::Incomplete; // Malformed
        }
        pos += 2;
    }
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn find_crlf_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| from + p)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse_one(kind: MessageKind, data: &[u8], ts: u64) -> (Option<HttpMessage>, ParseResult) {
        let mut parser = HttpParser::default();
        parser.append(data, ts);
        let mut out = VecDeque::new();
        let result = parser.parse_messages(kind, &mut out);
        (out.pop_front(), result)
    }

    #[test]
    fn request_incomplete_headers() {
        let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
        let (msg, result) = parse_one(MessageKind::Request, data, 0);
        assert!(msg.is_none());
        assert_eq!(result.end_position.seq_num, 0);
        assert_eq!(result.end_position.offset, 0);
    }

    #[test]
    fn request_without_body_is_complete_after_headers() {
        let data = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (msg, result) = parse_one(MessageKind::Request, data, 42);
        let msg = msg.unwrap();
        assert_eq!(msg.method, Some(Method::GET));
        assert_eq!(msg.path.as_ref().unwrap().path(), "/index.html");
        assert_eq!(msg.minor_version, 1);
        assert!(msg.body.is_empty());
        assert_eq!(msg.timestamp_ns, 42);
        assert_eq!(result.end_position.seq_num, 1, "fully consumed");
    }

    #[test]
    fn request_content_length_body() {
        let data = b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (msg, _) = parse_one(MessageKind::Request, data, 0);
        let msg = msg.unwrap();
        assert_eq!(msg.method, Some(Method::POST));
        assert_eq!(msg.body, b"hello");
    }

    #[test]
    fn request_short_body_is_incomplete() {
        let data = b"POST /api HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
        let (msg, _) = parse_one(MessageKind::Request, data, 0);
        assert!(msg.is_none());
    }

    #[test]
    fn request_body_excludes_trailing_data() {
        // CL=5 but 10 bytes follow: the extra bytes belong to the next
        // message and stay unconsumed.
        let data = b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloEXTRA";
        let (msg, result) = parse_one(MessageKind::Request, data, 0);
        assert_eq!(msg.unwrap().body, b"hello");
        assert_eq!(result.end_position.offset, data.len() - 5);
    }

    #[test]
    fn response_with_body() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Type: json\r\nContent-Length: 3\r\n\r\nfoo";
        let (msg, _) = parse_one(MessageKind::Response, data, 7);
        let msg = msg.unwrap();
        assert_eq!(msg.status, Some(StatusCode::OK));
        assert_eq!(msg.body, b"foo");
        assert_eq!(msg.timestamp_ns, 7);
        assert_eq!(msg.headers.get("content-type").unwrap(), "json");
    }

    #[test]
    fn response_without_framing_reads_until_close() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\npartial";
        let (msg, _) = parse_one(MessageKind::Response, data, 0);
        assert!(msg.is_none(), "read-until-close body never completes here");
    }

    #[rstest]
    #[case::no_content(b"HTTP/1.1 204 No Content\r\n\r\n")]
    #[case::not_modified(b"HTTP/1.1 304 Not Modified\r\n\r\n")]
    #[case::continue_(b"HTTP/1.1 100 Continue\r\n\r\n")]
    fn statuses_without_bodies_complete_at_headers(#[case] data: &[u8]) {
        let (msg, _) = parse_one(MessageKind::Response, data, 0);
        assert!(msg.unwrap().body.is_empty());
    }

    #[test]
    fn chunked_body_is_decoded() {
        let data = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nhel\r\n2\r\nlo\r\n0\r\n\r\n";
        let (msg, result) = parse_one(MessageKind::Request, data, 0);
        assert_eq!(msg.unwrap().body, b"hello");
        assert_eq!(result.end_position.seq_num, 1, "raw chunked bytes consumed");
    }

    #[test]
    fn chunked_embedded_terminator_lookalike() {
        // A chunk whose data contains "0\r\n\r\n" must not terminate early.
        let data =
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nc\r\n0\r\n\r\nhello\r\n\r\n0\r\n\r\n";
        let (msg, _) = parse_one(MessageKind::Request, data, 0);
        assert_eq!(msg.unwrap().body, b"0\r\n\r\nhello\r\n");
    }

    #[test]
    fn chunked_with_extension() {
        let data = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=val\r\nhello\r\n0\r\n\r\n";
        let (msg, _) = parse_one(MessageKind::Request, data, 0);
        assert_eq!(msg.unwrap().body, b"hello");
    }

    #[test]
    fn chunked_missing_terminator_is_incomplete() {
        let data = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n";
        let (msg, _) = parse_one(MessageKind::Request, data, 0);
        assert!(msg.is_none());
    }

    #[test]
    fn multi_valued_headers_preserved() {
        let data = b"GET / HTTP/1.1\r\nCookie: a=1\r\nCookie: b=2\r\n\r\n";
        let (msg, _) = parse_one(MessageKind::Request, data, 0);
        let msg = msg.unwrap();
        assert_eq!(msg.headers.get_all("cookie").iter().count(), 2);
    }

    #[test]
    fn several_messages_in_one_pass_get_their_own_timestamps() {
        let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nfoo";
        let mut parser = HttpParser::default();
        parser.append(resp, 100);
        parser.append(resp, 200);
        let mut out = VecDeque::new();
        let result = parser.parse_messages(MessageKind::Response, &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp_ns, 100);
        assert_eq!(out[1].timestamp_ns, 200);
        assert_eq!(result.end_position.seq_num, 2);
    }

    #[test]
    fn message_spanning_segments_consumes_into_second() {
        let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nfoo";
        let (first, second) = resp.split_at(resp.len() / 2);
        let mut parser = HttpParser::default();
        parser.append(first, 100);
        parser.append(second, 200);
        let mut out = VecDeque::new();
        let result = parser.parse_messages(MessageKind::Response, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp_ns, 100, "stamped by its first byte");
        assert_eq!(result.end_position.seq_num, 2);
        assert_eq!(result.end_position.offset, 0);
    }

    #[test]
    fn garbage_is_left_unconsumed() {
        let (msg, result) = parse_one(MessageKind::Request, b"\x00\x01\x02 not http", 0);
        assert!(msg.is_none());
        assert_eq!(result.end_position.seq_num, 0);
        assert_eq!(result.end_position.offset, 0);
    }
}
