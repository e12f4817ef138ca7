//! Sluice - FastCGI
//!
//! FastCGI record framing and the client/server endpoints built on it.
//! A single connection multiplexes requests by `request_id`; empty `PARAMS`
//! and `STDIN` records mark end-of-stream for their substream.
//!
//! The [`Demux`] filter is the server side: each request becomes one
//! sub-pipeline invocation. The [`mux`] constructor builds the client-side
//! mux filter, whose sessions speak FastCGI with id-based correlation
//! instead of queue order.

mod endpoint;
mod record;

pub use endpoint::{Client, Demux, Server};
pub use record::{
    decode_params, encode_params, encode_record, protocol_status, roles, BeginRequestBody,
    EndRequestBody, FcgiError, RecordHeader, RecordType, FCGI_VERSION, FLAG_KEEP_CONN,
    RECORD_HEADER_SIZE,
};

use sluice_mux::{Mux, MuxOptions};

/// Client-side FastCGI mux filter (`muxFCGI`): streams are correlated by
/// request id over a pooled session.
pub fn mux(options: MuxOptions) -> Mux {
    Mux::custom("mux-fcgi", options, || Box::new(Client::new()))
}
