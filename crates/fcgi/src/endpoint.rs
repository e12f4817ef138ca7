//! FastCGI endpoints
//!
//! `Client` speaks the application side: it opens requests (ids allocated
//! client-side, starting at 1 with linear probing over the request table)
//! and reassembles `STDOUT`/`STDERR`/`END_REQUEST` into reply messages. It
//! plugs into the mux subsystem as a [`Multiplexer`], correlating streams by
//! request id instead of queue order.
//!
//! `Server` speaks the web-server side: it collects `BEGIN_REQUEST`,
//! `PARAMS`, and `STDIN` substreams (empty records mark end-of-stream) into
//! one request message per id, and encodes responses back into records. The
//! [`Demux`] filter runs one sub-pipeline per request on top of it.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use sluice_event::{Buffer, EndError, Event, MessageHead, MessageTail};
use sluice_mux::{MuxStream, Multiplexer};
use sluice_pipeline::{Filter, FilterCx, Input, Pipeline};

use crate::record::{
    decode_params, encode_params, encode_record, protocol_status, roles, BeginRequestBody,
    EndRequestBody, FcgiError, RecordHeader, RecordType, FLAG_KEEP_CONN, RECORD_HEADER_SIZE,
};

/// Largest body per record; leaves room under the u16 length for padding.
const MAX_RECORD_BODY: usize = 0xfff8;

enum DeframeState {
    Header,
    Content,
    Padding,
}

/// Incremental record parser over `Data` events.
pub(crate) struct Deframer {
    state: DeframeState,
    header: [u8; RECORD_HEADER_SIZE],
    header_filled: usize,
    current: Option<RecordHeader>,
    body: Vec<u8>,
    content_remaining: usize,
    padding_remaining: usize,
}

impl Deframer {
    pub(crate) fn new() -> Self {
        Self {
            state: DeframeState::Header,
            header: [0; RECORD_HEADER_SIZE],
            header_filled: 0,
            current: None,
            body: Vec::new(),
            content_remaining: 0,
            padding_remaining: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = DeframeState::Header;
        self.header_filled = 0;
        self.current = None;
        self.body.clear();
        self.content_remaining = 0;
        self.padding_remaining = 0;
    }

    /// Consume one `Data` payload, invoking `on_record` per complete record.
    pub(crate) fn push(
        &mut self,
        data: &Buffer,
        on_record: &mut dyn FnMut(RecordHeader, &[u8]),
    ) -> Result<(), FcgiError> {
        for chunk in data.chunks() {
            let mut slice = &chunk[..];
            while !slice.is_empty() {
                match self.state {
                    DeframeState::Header => {
                        let take = (RECORD_HEADER_SIZE - self.header_filled).min(slice.len());
                        self.header[self.header_filled..self.header_filled + take]
                            .copy_from_slice(&slice[..take]);
                        self.header_filled += take;
                        slice = &slice[take..];

                        if self.header_filled == RECORD_HEADER_SIZE {
                            let header = RecordHeader::parse(&self.header)?;
                            self.header_filled = 0;
                            self.content_remaining = header.content_length as usize;
                            self.padding_remaining = header.padding_length as usize;
                            self.current = Some(header);
                            self.body.clear();
                            if self.content_remaining == 0 {
                                on_record(header, &[]);
                                self.state = if self.padding_remaining > 0 {
                                    DeframeState::Padding
                                } else {
                                    self.current = None;
                                    DeframeState::Header
                                };
                            } else {
                                self.state = DeframeState::Content;
                            }
                        }
                    }
                    DeframeState::Content => {
                        let take = self.content_remaining.min(slice.len());
                        self.body.extend_from_slice(&slice[..take]);
                        self.content_remaining -= take;
                        slice = &slice[take..];

                        if self.content_remaining == 0 {
                            let header = self.current.take().unwrap_or(RecordHeader {
                                record_type: RecordType::Data,
                                request_id: 0,
                                content_length: 0,
                                padding_length: 0,
                            });
                            on_record(header, &self.body);
                            self.body.clear();
                            self.state = if self.padding_remaining > 0 {
                                DeframeState::Padding
                            } else {
                                DeframeState::Header
                            };
                        }
                    }
                    DeframeState::Padding => {
                        let take = self.padding_remaining.min(slice.len());
                        self.padding_remaining -= take;
                        slice = &slice[take..];
                        if self.padding_remaining == 0 {
                            self.current = None;
                            self.state = DeframeState::Header;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Chunk a byte stream into records of one type, ending with an empty
/// record of the same type.
fn encode_stream(record_type: RecordType, request_id: u16, body: &Buffer, out: &mut Vec<u8>) {
    let bytes = body.to_bytes();
    for piece in bytes.chunks(MAX_RECORD_BODY) {
        encode_record(record_type, request_id, piece, out);
    }
    encode_record(record_type, request_id, &[], out);
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Application-side endpoint: one per shared connection (mux session).
pub struct Client {
    inner: Rc<ClientInner>,
}

struct ClientInner {
    requests: RefCell<HashMap<u16, Rc<ClientRequest>>>,
    next_id: Cell<u16>,
    transport: RefCell<Option<Input>>,
    deframer: RefCell<Deframer>,
}

struct ClientRequest {
    id: u16,
    client: Weak<ClientInner>,
    output: RefCell<Input>,
    started: Cell<bool>,
    stderr: RefCell<Vec<u8>>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ClientInner {
                requests: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                transport: RefCell::new(None),
                deframer: RefCell::new(Deframer::new()),
            }),
        }
    }

    /// Requests currently awaiting `END_REQUEST`.
    pub fn open_requests(&self) -> usize {
        self.inner.requests.borrow().len()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientInner {
    /// Allocate the next free id, starting at 1 with linear probing.
    fn allocate_id(&self) -> u16 {
        let requests = self.requests.borrow();
        let mut id = self.next_id.get();
        loop {
            if id == 0 {
                id = 1;
            }
            if !requests.contains_key(&id) {
                break;
            }
            id = id.wrapping_add(1);
        }
        self.next_id.set(id.wrapping_add(1));
        id
    }

    fn send(&self, bytes: Vec<u8>) {
        if let Some(transport) = self.transport.borrow().as_ref() {
            transport.input(Event::Data(Buffer::from(bytes)));
        }
    }

    fn on_record(&self, header: RecordHeader, body: &[u8]) {
        let request = self.requests.borrow().get(&header.request_id).cloned();
        let Some(request) = request else {
            tracing::debug!(
                target: "fcgi",
                request_id = header.request_id,
                record_type = ?header.record_type,
                "record for unknown request"
            );
            return;
        };

        match header.record_type {
            RecordType::Stdout => {
                if !body.is_empty() {
                    if !request.started.replace(true) {
                        request
                            .output
                            .borrow()
                            .input(Event::MessageStart(Rc::new(MessageHead::new())));
                    }
                    request
                        .output
                        .borrow()
                        .input(Event::Data(Buffer::from(body.to_vec())));
                }
            }
            RecordType::Stderr => {
                request.stderr.borrow_mut().extend_from_slice(body);
            }
            RecordType::EndRequest => {
                let end = EndRequestBody::parse(body).unwrap_or(EndRequestBody {
                    app_status: 0,
                    protocol_status: protocol_status::REQUEST_COMPLETE,
                });
                if !request.started.replace(true) {
                    request
                        .output
                        .borrow()
                        .input(Event::MessageStart(Rc::new(MessageHead::new())));
                }
                let mut tail = MessageTail::new()
                    .with("appStatus", end.app_status as i64)
                    .with("protocolStatus", end.protocol_status as i64);
                let stderr = request.stderr.borrow();
                if !stderr.is_empty() {
                    tail.set("stderr", String::from_utf8_lossy(&stderr).into_owned());
                }
                request
                    .output
                    .borrow()
                    .input(Event::MessageEnd(Rc::new(tail)));
                self.requests.borrow_mut().remove(&header.request_id);
            }
            _ => {}
        }
    }
}

impl Multiplexer for Client {
    fn open(&self, session_input: Input) {
        *self.inner.transport.borrow_mut() = Some(session_input);
    }

    fn on_reply(&self, evt: Event) {
        match evt {
            Event::Data(data) => {
                let result = {
                    let inner = Rc::clone(&self.inner);
                    self.inner
                        .deframer
                        .borrow_mut()
                        .push(&data, &mut |header, body| inner.on_record(header, body))
                };
                if let Err(e) = result {
                    tracing::warn!(target: "fcgi", error = %e, "client deframe error");
                    self.fail_all(EndError::ProtocolError);
                }
            }
            Event::StreamEnd(err) => self.fail_all(err),
            _ => {}
        }
    }

    fn open_stream(&self, output: Input) -> Rc<dyn MuxStream> {
        let id = self.inner.allocate_id();
        let request = Rc::new(ClientRequest {
            id,
            client: Rc::downgrade(&self.inner),
            output: RefCell::new(output),
            started: Cell::new(false),
            stderr: RefCell::new(Vec::new()),
        });
        self.inner
            .requests
            .borrow_mut()
            .insert(id, Rc::clone(&request));
        request
    }

    fn close_stream(&self, stream: &Rc<dyn MuxStream>) {
        if let Some(request) = stream.as_any().downcast_ref::<ClientRequest>() {
            // Late records for a closed caller are dropped; the table entry
            // drains when END_REQUEST arrives.
            *request.output.borrow_mut() = Input::null();
        }
    }

    fn close(&self) {
        self.inner.requests.borrow_mut().clear();
        *self.inner.transport.borrow_mut() = None;
        self.inner.deframer.borrow_mut().reset();
    }
}

impl Client {
    fn fail_all(&self, err: EndError) {
        let requests = std::mem::take(&mut *self.inner.requests.borrow_mut());
        for (_, request) in requests {
            if !request.started.get() {
                request
                    .output
                    .borrow()
                    .input(Event::MessageStart(Rc::new(MessageHead::new())));
            }
            request.output.borrow().input(Event::StreamEnd(err));
        }
    }
}

impl MuxStream for ClientRequest {
    fn write(&self, evt: Event) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        match evt {
            Event::MessageStart(head) => {
                let role = head.get_i64("role").unwrap_or(roles::RESPONDER as i64) as u16;
                let mut out = Vec::new();
                encode_record(
                    RecordType::BeginRequest,
                    self.id,
                    &BeginRequestBody {
                        role,
                        flags: FLAG_KEEP_CONN,
                    }
                    .encode(),
                    &mut out,
                );

                let params: Vec<(String, String)> = head
                    .get("params")
                    .and_then(|v| v.as_object())
                    .map(|map| {
                        map.iter()
                            .map(|(k, v)| {
                                let value = match v.as_str() {
                                    Some(s) => s.to_string(),
                                    None => v.to_string(),
                                };
                                (k.clone(), value)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let pairs: Vec<(&str, &str)> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let body = encode_params(pairs);
                if !body.is_empty() {
                    encode_record(RecordType::Params, self.id, &body, &mut out);
                }
                encode_record(RecordType::Params, self.id, &[], &mut out);
                client.send(out);
            }
            Event::Data(data) => {
                if !data.is_empty() {
                    let mut out = Vec::new();
                    let bytes = data.to_bytes();
                    for piece in bytes.chunks(MAX_RECORD_BODY) {
                        encode_record(RecordType::Stdin, self.id, piece, &mut out);
                    }
                    client.send(out);
                }
            }
            Event::MessageEnd(_) | Event::StreamEnd(_) => {
                let mut out = Vec::new();
                encode_record(RecordType::Stdin, self.id, &[], &mut out);
                client.send(out);
            }
            Event::StreamStart => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// One request being collected on the server side.
struct ServerRequest {
    role: u16,
    flags: u8,
    params: Vec<u8>,
    params_done: bool,
    stdin: Buffer,
}

/// A complete request ready for dispatch.
pub(crate) struct ServerDispatch {
    pub(crate) id: u16,
    pub(crate) head: MessageHead,
    pub(crate) body: Buffer,
}

/// Web-server-side endpoint: collects requests, encodes responses.
pub struct Server {
    requests: RefCell<HashMap<u16, ServerRequest>>,
    deframer: RefCell<Deframer>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            requests: RefCell::new(HashMap::new()),
            deframer: RefCell::new(Deframer::new()),
        }
    }

    pub fn open_requests(&self) -> usize {
        self.requests.borrow().len()
    }

    pub(crate) fn reset(&self) {
        self.requests.borrow_mut().clear();
        self.deframer.borrow_mut().reset();
    }

    /// Feed raw connection bytes; returns completed requests and aborted
    /// request ids.
    pub(crate) fn read(&self, data: &Buffer) -> Result<(Vec<ServerDispatch>, Vec<u16>), FcgiError> {
        let mut completed = Vec::new();
        let mut aborted = Vec::new();
        self.deframer.borrow_mut().push(data, &mut |header, body| {
            self.on_record(header, body, &mut completed, &mut aborted);
        })?;
        Ok((completed, aborted))
    }

    fn on_record(
        &self,
        header: RecordHeader,
        body: &[u8],
        completed: &mut Vec<ServerDispatch>,
        aborted: &mut Vec<u16>,
    ) {
        let id = header.request_id;
        match header.record_type {
            RecordType::BeginRequest => {
                if let Ok(begin) = BeginRequestBody::parse(body) {
                    self.requests.borrow_mut().insert(
                        id,
                        ServerRequest {
                            role: begin.role,
                            flags: begin.flags,
                            params: Vec::new(),
                            params_done: false,
                            stdin: Buffer::new(),
                        },
                    );
                }
            }
            RecordType::AbortRequest => {
                if self.requests.borrow_mut().remove(&id).is_some() {
                    aborted.push(id);
                }
            }
            RecordType::Params => {
                let mut requests = self.requests.borrow_mut();
                if let Some(request) = requests.get_mut(&id) {
                    if body.is_empty() {
                        request.params_done = true;
                    } else {
                        request.params.extend_from_slice(body);
                    }
                }
            }
            RecordType::Stdin => {
                let complete = {
                    let mut requests = self.requests.borrow_mut();
                    match requests.get_mut(&id) {
                        Some(request) => {
                            if body.is_empty() {
                                true
                            } else {
                                request.stdin.push(body.to_vec());
                                false
                            }
                        }
                        None => false,
                    }
                };
                if complete {
                    if let Some(request) = self.requests.borrow_mut().remove(&id) {
                        completed.push(self.dispatch(id, request));
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch(&self, id: u16, request: ServerRequest) -> ServerDispatch {
        let mut head = MessageHead::new()
            .with("id", id as i64)
            .with("role", request.role as i64)
            .with("keepAlive", request.flags & FLAG_KEEP_CONN != 0);
        if let Ok(params) = decode_params(&request.params) {
            let map: serde_json::Map<String, serde_json::Value> = params
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            head.set("params", serde_json::Value::Object(map));
        }
        ServerDispatch {
            id,
            head,
            body: request.stdin,
        }
    }

    /// Encode a complete response for `id`.
    pub(crate) fn encode_response(
        &self,
        id: u16,
        body: &Buffer,
        tail: Option<&MessageTail>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        encode_stream(RecordType::Stdout, id, body, &mut out);
        let end = EndRequestBody {
            app_status: tail.and_then(|t| t.get_i64("appStatus")).unwrap_or(0) as u32,
            protocol_status: tail
                .and_then(|t| t.get_i64("protocolStatus"))
                .unwrap_or(protocol_status::REQUEST_COMPLETE as i64)
                as u8,
        };
        encode_record(RecordType::EndRequest, id, &end.encode(), &mut out);
        out
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Demux filter
// ---------------------------------------------------------------------------

/// Server-side joint filter: one sub-pipeline per FastCGI request; replies
/// are encoded back onto the shared connection as they complete.
pub struct Demux {
    server: Rc<Server>,
    shared: Rc<DemuxShared>,
}

struct DemuxShared {
    output: RefCell<Option<Input>>,
    /// Live sub-pipelines by request id.
    pending: RefCell<HashMap<u16, Pipeline>>,
    server: Rc<Server>,
}

struct ReplyCollector {
    id: u16,
    shared: Rc<DemuxShared>,
    body: RefCell<Buffer>,
}

impl ReplyCollector {
    fn on_event(&self, evt: Event) {
        match evt {
            Event::Data(data) => self.body.borrow_mut().push_buffer(&data),
            Event::MessageEnd(tail) => {
                let bytes =
                    self.shared
                        .server
                        .encode_response(self.id, &self.body.borrow(), Some(&tail));
                if let Some(output) = self.shared.output.borrow().as_ref() {
                    output.input(Event::Data(Buffer::from(bytes)));
                }
                self.shared.pending.borrow_mut().remove(&self.id);
            }
            Event::StreamEnd(_) => {
                // Sub-pipeline died: finish the request with a failure status
                let tail = MessageTail::new().with("appStatus", 1);
                let bytes = self.shared.server.encode_response(
                    self.id,
                    &self.body.borrow(),
                    Some(&tail),
                );
                if let Some(output) = self.shared.output.borrow().as_ref() {
                    output.input(Event::Data(Buffer::from(bytes)));
                }
                self.shared.pending.borrow_mut().remove(&self.id);
            }
            _ => {}
        }
    }
}

impl Demux {
    pub fn new() -> Self {
        let server = Rc::new(Server::new());
        Self {
            shared: Rc::new(DemuxShared {
                output: RefCell::new(None),
                pending: RefCell::new(HashMap::new()),
                server: Rc::clone(&server),
            }),
            server,
        }
    }
}

impl Default for Demux {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Demux {
    fn describe(&self) -> &'static str {
        "demux-fcgi"
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn sub_slots(&self) -> usize {
        1
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        if self.shared.output.borrow().is_none() {
            *self.shared.output.borrow_mut() = Some(cx.output_handle());
        }

        match evt {
            Event::Data(data) => {
                let (completed, aborted) = match self.server.read(&data) {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(target: "fcgi", error = %e, "server deframe error");
                        cx.output(Event::StreamEnd(EndError::ProtocolError));
                        return;
                    }
                };

                for id in aborted {
                    self.shared.pending.borrow_mut().remove(&id);
                }

                for dispatch in completed {
                    let collector = Rc::new(ReplyCollector {
                        id: dispatch.id,
                        shared: Rc::clone(&self.shared),
                        body: RefCell::new(Buffer::new()),
                    });
                    let reply = {
                        let collector = Rc::clone(&collector);
                        Input::from_fn(move |evt| collector.on_event(evt))
                    };

                    let pipeline = cx.sub_pipeline(0, reply);
                    pipeline.input(Event::MessageStart(Rc::new(dispatch.head)));
                    if !dispatch.body.is_empty() {
                        pipeline.input(Event::Data(dispatch.body));
                    }
                    pipeline.input(Event::message_end());

                    self.shared
                        .pending
                        .borrow_mut()
                        .insert(dispatch.id, pipeline);
                }
            }
            Event::StreamEnd(_) => {
                self.shared.pending.borrow_mut().clear();
                self.server.reset();
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.shared.pending.borrow_mut().clear();
        self.server.reset();
        *self.shared.output.borrow_mut() = None;
    }
}

#[cfg(test)]
#[path = "endpoint_test.rs"]
mod endpoint_test;
