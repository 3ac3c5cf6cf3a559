use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

/// Identity of one logical connection as observed by the kernel probe.
///
/// The probe increments `generation` every time a `(pid, fd)` pair is reused
/// after close, so the full tuple is unique across fd reuse. A zero field
/// means "not yet observed"; events carrying a *different* non-zero value for
/// an already-observed field are flagged as identity conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnId {
    /// Process id of the traced process.
    pub pid:               u32,
    /// Start time of the process, to disambiguate pid reuse.
    pub pid_start_time_ns: u64,
    /// File descriptor of the socket within the process.
    pub fd:                u32,
    /// Reuse counter for this `(pid, fd)` pair.
    pub generation:        u32,
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[pid={} fd={} generation={}]",
            self.pid, self.fd, self.generation
        )
    }
}

/// Application-layer protocol spoken on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrafficProtocol {
    /// Not yet inferred by the probe.
    #[default]
    Unknown,
    /// HTTP/1.x.
    Http,
    /// HTTP/2.
    Http2,
}

/// Which side of the protocol this endpoint plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndpointRole {
    /// Not yet inferred by the probe.
    #[default]
    Unknown,
    /// This endpoint initiates requests.
    Requestor,
    /// This endpoint answers requests.
    Responder,
}

/// Protocol/role pair inferred by the probe.
///
/// Invariant: `protocol == Unknown` exactly when `role == Unknown`. Once a
/// tracker adopts a non-Unknown class it is immutable for the tracker's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficClass {
    /// The wire format.
    pub protocol: TrafficProtocol,
    /// Requestor or responder.
    pub role:     EndpointRole,
}

impl TrafficClass {
    /// True when neither half of the invariant is violated.
    pub fn is_consistent(&self) -> bool {
        (self.protocol == TrafficProtocol::Unknown) == (self.role == EndpointRole::Unknown)
    }
}

/// Direction of a data event relative to the traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Outbound (`write`/`send` syscall family).
    Send,
    /// Inbound (`read`/`recv` syscall family).
    Recv,
}

/// Syscall family that produced a data event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEventKind {
    /// `write(2)` and friends.
    Write,
    /// `send(2)`/`sendto(2)`/`sendmsg(2)`.
    Send,
    /// `read(2)` and friends.
    Read,
    /// `recv(2)`/`recvfrom(2)`/`recvmsg(2)`.
    Recv,
    /// A kind this build does not classify; carries the raw probe value.
    Other(u32),
}

impl DataEventKind {
    /// Map the syscall family to a traffic direction, or `None` for
    /// unclassified kinds.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Write | Self::Send => Some(Direction::Send),
            Self::Read | Self::Recv => Some(Direction::Recv),
            Self::Other(_) => None,
        }
    }
}

/// Raw socket address as copied out of the kernel by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockAddr {
    /// AF_INET, address bytes in network order.
    V4 {
        /// IPv4 address octets.
        addr: [u8; 4],
        /// Port in host order.
        port: u16,
    },
    /// AF_INET6, address bytes in network order.
    V6 {
        /// IPv6 address octets.
        addr: [u8; 16],
        /// Port in host order.
        port: u16,
    },
    /// An address family the probe captured but this build cannot decode.
    Unsupported(u16),
}

impl SockAddr {
    /// Decode into a typed address/port pair. `None` for unsupported
    /// families.
    pub fn to_endpoint(&self) -> Option<(IpAddr, u16)> {
        match *self {
            Self::V4 { addr, port } => Some((IpAddr::V4(Ipv4Addr::from(addr)), port)),
            Self::V6 { addr, port } => Some((IpAddr::V6(Ipv6Addr::from(addr)), port)),
            Self::Unsupported(_) => None,
        }
    }
}

/// Connection-open event emitted when the probe sees a socket established.
#[derive(Debug, Clone)]
pub struct ConnOpenEvent {
    /// Connection identity.
    pub conn_id:       ConnId,
    /// BPF timestamp of the open, in nanoseconds since boot.
    pub timestamp_ns:  u64,
    /// Protocol/role inferred at open time (may be Unknown).
    pub traffic_class: TrafficClass,
    /// Remote peer address.
    pub addr:          SockAddr,
}

/// Connection-close event. The sequence numbers are the totals the kernel
/// claims were emitted on each direction, used for loss accounting.
#[derive(Debug, Clone, Copy)]
pub struct ConnCloseEvent {
    /// Connection identity.
    pub conn_id:      ConnId,
    /// BPF timestamp of the close, in nanoseconds since boot.
    pub timestamp_ns: u64,
    /// Count of data events emitted on the send direction.
    pub wr_seq_num:   u64,
    /// Count of data events emitted on the recv direction.
    pub rd_seq_num:   u64,
}

/// One captured syscall payload.
///
/// `seq_num` is per-direction and dense (0, 1, 2, …) when the upstream loses
/// nothing; gaps appear when the ring buffer drops events.
#[derive(Debug, Clone)]
pub struct SocketDataEvent {
    /// Connection identity.
    pub conn_id:       ConnId,
    /// Protocol/role inferred by the probe.
    pub traffic_class: TrafficClass,
    /// Which syscall family produced the payload.
    pub kind:          DataEventKind,
    /// BPF timestamp, in nanoseconds since boot.
    pub timestamp_ns:  u64,
    /// Per-direction sequence number assigned by the probe.
    pub seq_num:       u64,
    /// Raw payload, truncated to the probe's capture cap.
    pub msg:           Bytes,
}
