//! Columnar record batches for parsed request/response pairs

use conn_track::ConnId;

use crate::message::HttpMessage;

/// One emitted row before column placement.
#[derive(Debug)]
pub struct HttpRecord {
    /// Wall-clock-adjusted response timestamp.
    pub time_ns:     u64,
    /// Connection identity the pair was observed on.
    pub conn_id:     ConnId,
    /// Remote peer, textual ("" when unknown).
    pub remote_addr: String,
    /// Remote port (0 when unknown).
    pub remote_port: u16,
    /// The paired request, when one was captured.
    pub request:     Option<HttpMessage>,
    /// The response that produced the row.
    pub response:    HttpMessage,
}

/// Column-oriented batch of emitted records. All columns always hold the
/// same number of rows; rows are appended and never removed.
#[derive(Debug, Default)]
pub struct HttpRecordBatch {
    /// Wall-clock-adjusted response timestamps.
    pub time_ns:            Vec<u64>,
    /// Traced process ids.
    pub pid:                Vec<u32>,
    /// Socket fds.
    pub fd:                 Vec<u32>,
    /// Connection generations.
    pub generation:         Vec<u32>,
    /// Remote addresses ("" when unknown).
    pub remote_addr:        Vec<String>,
    /// Remote ports (0 when unknown).
    pub remote_port:        Vec<u16>,
    /// Request methods ("" when the request was not captured).
    pub http_req_method:    Vec<String>,
    /// Request paths ("" when the request was not captured).
    pub http_req_path:      Vec<String>,
    /// Response status codes.
    pub http_resp_status:   Vec<u16>,
    /// Response bodies, lossily decoded.
    pub http_resp_body:     Vec<String>,
    /// Response-minus-request timestamps (0 without a request).
    pub http_latency_ns:    Vec<u64>,
}

impl HttpRecordBatch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.time_ns.len()
    }

    /// True when no rows have been emitted.
    pub fn is_empty(&self) -> bool {
        self.time_ns.is_empty()
    }

    /// Append one row across all columns.
    pub fn push(&mut self, record: HttpRecord) {
        let HttpRecord {
            time_ns,
            conn_id,
            remote_addr,
            remote_port,
            request,
            response,
        } = record;

        self.time_ns.push(time_ns);
        self.pid.push(conn_id.pid);
        self.fd.push(conn_id.fd);
        self.generation.push(conn_id.generation);
        self.remote_addr.push(remote_addr);
        self.remote_port.push(remote_port);

        self.http_req_method.push(
            request
                .as_ref()
                .and_then(|r| r.method.as_ref())
                .map(|m| m.to_string())
                .unwrap_or_default(),
        );
        self.http_req_path.push(
            request
                .as_ref()
                .and_then(|r| r.path.as_ref())
                .map(|p| p.to_string())
                .unwrap_or_default(),
        );
        self.http_latency_ns.push(
            request
                .as_ref()
                .map(|r| response.timestamp_ns.saturating_sub(r.timestamp_ns))
                .unwrap_or(0),
        );

        self.http_resp_status
            .push(response.status.map(|s| s.as_u16()).unwrap_or(0));
        self.http_resp_body.push(response.body_str());
    }
}
