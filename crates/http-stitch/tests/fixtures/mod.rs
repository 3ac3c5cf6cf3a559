#![allow(dead_code)]
//! Canned HTTP payloads and probe-event builders for collector tests

use bytes::Bytes;
use conn_track::{
    ConnCloseEvent,
    ConnId,
    ConnOpenEvent,
    DataEventKind,
    EndpointRole,
    SockAddr,
    SocketDataEvent,
    TrafficClass,
    TrafficProtocol,
};

pub const PID: u32 = 12345;
pub const FD: u32 = 3;

pub const REQ0: &[u8] = b"GET /index.html HTTP/1.1\r\n\
Host: www.example.org\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64)\r\n\
\r\n";

pub const REQ1: &[u8] = b"GET /data.html HTTP/1.1\r\n\
Host: www.example.org\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64)\r\n\
\r\n";

pub const REQ2: &[u8] = b"GET /logs.html HTTP/1.1\r\n\
Host: www.example.org\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64)\r\n\
\r\n";

pub const JSON_RESP: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/json; charset=utf-8\r\n\
Content-Length: 3\r\n\
\r\n\
foo";

pub const TEXT_RESP: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Length: 3\r\n\
\r\n\
bar";

pub const RESP0: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: json\r\n\
Content-Length: 3\r\n\
\r\n\
foo";

pub const RESP1: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: json\r\n\
Content-Length: 3\r\n\
\r\n\
bar";

pub const RESP2: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: json\r\n\
Content-Length: 3\r\n\
\r\n\
doe";

/// Builds probe events the way the kernel emits them: one generation per
/// open, per-direction sequence counters that keep counting across
/// generations, and close events reporting the counters' current values.
pub struct EventGen {
    pub pid:        u32,
    pub fd:         u32,
    pub generation: u32,
    send_seq_num:   u64,
    recv_seq_num:   u64,
}

impl Default for EventGen {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGen {
    pub fn new() -> Self {
        Self {
            pid:          PID,
            fd:           FD,
            generation:   0,
            send_seq_num: 0,
            recv_seq_num: 0,
        }
    }

    pub fn with_pid_fd(pid: u32, fd: u32) -> Self {
        Self {
            pid,
            fd,
            ..Self::new()
        }
    }

    pub fn conn_id(&self) -> ConnId {
        ConnId {
            pid: self.pid,
            pid_start_time_ns: 0,
            fd: self.fd,
            generation: self.generation,
        }
    }

    fn traffic_class(&self) -> TrafficClass {
        TrafficClass {
            protocol: TrafficProtocol::Http,
            role:     EndpointRole::Requestor,
        }
    }

    /// Start a new connection generation.
    pub fn open(&mut self, ts_ns: u64) -> ConnOpenEvent {
        self.generation += 1;
        ConnOpenEvent {
            conn_id:       self.conn_id(),
            timestamp_ns:  ts_ns,
            traffic_class: self.traffic_class(),
            addr:          SockAddr::V4 {
                addr: [127, 0, 0, 1],
                port: 80,
            },
        }
    }

    pub fn send(&mut self, msg: &[u8], ts_ns: u64) -> SocketDataEvent {
        let event = self.data_event(DataEventKind::Send, self.send_seq_num, msg, ts_ns);
        self.send_seq_num += 1;
        event
    }

    pub fn recv(&mut self, msg: &[u8], ts_ns: u64) -> SocketDataEvent {
        let event = self.data_event(DataEventKind::Recv, self.recv_seq_num, msg, ts_ns);
        self.recv_seq_num += 1;
        event
    }

    pub fn close(&mut self) -> ConnCloseEvent {
        ConnCloseEvent {
            conn_id:      self.conn_id(),
            timestamp_ns: 1,
            wr_seq_num:   self.send_seq_num,
            rd_seq_num:   self.recv_seq_num,
        }
    }

    fn data_event(
        &self,
        kind: DataEventKind,
        seq_num: u64,
        msg: &[u8],
        ts_ns: u64,
    ) -> SocketDataEvent {
        SocketDataEvent {
            conn_id: self.conn_id(),
            traffic_class: self.traffic_class(),
            kind,
            timestamp_ns: ts_ns,
            seq_num,
            msg: Bytes::copy_from_slice(msg),
        }
    }
}
