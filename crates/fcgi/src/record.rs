//! FastCGI record layer
//!
//! Every record is an 8-byte header followed by `content_length` bytes of
//! payload and `padding_length` bytes of padding:
//!
//! ```text
//! +---------+------+-------------+----------------+----------------+----------+
//! | version | type | request_id  | content_length | padding_length | reserved |
//! |    1    |  1   |      2      |       2        |       1        |    1     |
//! +---------+------+-------------+----------------+----------------+----------+
//! ```
//!
//! `PARAMS` bodies carry name-value pairs with 1- or 4-byte length prefixes
//! (the high bit selects the wide form).

/// Protocol version implemented here.
pub const FCGI_VERSION: u8 = 1;

/// Header size on the wire.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Application roles from the spec.
pub mod roles {
    pub const RESPONDER: u16 = 1;
    pub const AUTHORIZER: u16 = 2;
    pub const FILTER: u16 = 3;
}

/// `protocol_status` values carried by `END_REQUEST`.
pub mod protocol_status {
    pub const REQUEST_COMPLETE: u8 = 0;
    pub const CANT_MPX_CONN: u8 = 1;
    pub const OVERLOADED: u8 = 2;
    pub const UNKNOWN_ROLE: u8 = 3;
}

/// `BEGIN_REQUEST` flag: keep the connection open after the request.
pub const FLAG_KEEP_CONN: u8 = 1;

/// Record framing errors. All are protocol errors for the stream they
/// occur on.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FcgiError {
    #[error("unsupported FastCGI version {0}")]
    BadVersion(u8),

    #[error("unknown record type {0}")]
    UnknownType(u8),

    #[error("record body shorter than its fixed layout")]
    ShortBody,

    #[error("name-value pair overruns the record body")]
    BadNameValue,
}

/// Record types used by the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::BeginRequest),
            2 => Some(Self::AbortRequest),
            3 => Some(Self::EndRequest),
            4 => Some(Self::Params),
            5 => Some(Self::Stdin),
            6 => Some(Self::Stdout),
            7 => Some(Self::Stderr),
            8 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Parse the 8 fixed header bytes.
    pub fn parse(bytes: &[u8; RECORD_HEADER_SIZE]) -> Result<Self, FcgiError> {
        if bytes[0] != FCGI_VERSION {
            return Err(FcgiError::BadVersion(bytes[0]));
        }
        let record_type = RecordType::from_u8(bytes[1]).ok_or(FcgiError::UnknownType(bytes[1]))?;
        Ok(Self {
            record_type,
            request_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            content_length: u16::from_be_bytes([bytes[4], bytes[5]]),
            padding_length: bytes[6],
        })
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [
            FCGI_VERSION,
            self.record_type as u8,
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_length,
            0,
        ]
    }
}

/// Append one complete record (header + body + padding) to `out`.
///
/// Bodies are padded to an 8-byte boundary, as the spec recommends.
pub fn encode_record(record_type: RecordType, request_id: u16, body: &[u8], out: &mut Vec<u8>) {
    let padding = (8 - body.len() % 8) % 8;
    let header = RecordHeader {
        record_type,
        request_id,
        content_length: body.len() as u16,
        padding_length: padding as u8,
    };
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out.extend(std::iter::repeat(0u8).take(padding));
}

/// `BEGIN_REQUEST` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequestBody {
    pub fn parse(body: &[u8]) -> Result<Self, FcgiError> {
        if body.len() < 3 {
            return Err(FcgiError::ShortBody);
        }
        Ok(Self {
            role: u16::from_be_bytes([body[0], body[1]]),
            flags: body[2],
        })
    }

    pub fn encode(&self) -> [u8; 8] {
        let role = self.role.to_be_bytes();
        [role[0], role[1], self.flags, 0, 0, 0, 0, 0]
    }
}

/// `END_REQUEST` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequestBody {
    pub fn parse(body: &[u8]) -> Result<Self, FcgiError> {
        if body.len() < 5 {
            return Err(FcgiError::ShortBody);
        }
        Ok(Self {
            app_status: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            protocol_status: body[4],
        })
    }

    pub fn encode(&self) -> [u8; 8] {
        let status = self.app_status.to_be_bytes();
        [
            status[0],
            status[1],
            status[2],
            status[3],
            self.protocol_status,
            0,
            0,
            0,
        ]
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        out.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    }
}

fn decode_length(body: &[u8], pos: &mut usize) -> Result<usize, FcgiError> {
    let first = *body.get(*pos).ok_or(FcgiError::BadNameValue)?;
    if first < 128 {
        *pos += 1;
        return Ok(first as usize);
    }
    if body.len() < *pos + 4 {
        return Err(FcgiError::BadNameValue);
    }
    let len = u32::from_be_bytes([body[*pos], body[*pos + 1], body[*pos + 2], body[*pos + 3]])
        & 0x7fff_ffff;
    *pos += 4;
    Ok(len as usize)
}

/// Encode name-value pairs for a `PARAMS` body.
pub fn encode_params<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in params {
        encode_length(name.len(), &mut out);
        encode_length(value.len(), &mut out);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

/// Decode a `PARAMS` body into name-value pairs.
pub fn decode_params(body: &[u8]) -> Result<Vec<(String, String)>, FcgiError> {
    let mut params = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let name_len = decode_length(body, &mut pos)?;
        let value_len = decode_length(body, &mut pos)?;
        if body.len() < pos + name_len + value_len {
            return Err(FcgiError::BadNameValue);
        }
        let name = String::from_utf8_lossy(&body[pos..pos + name_len]).into_owned();
        pos += name_len;
        let value = String::from_utf8_lossy(&body[pos..pos + value_len]).into_owned();
        pos += value_len;
        params.push((name, value));
    }
    Ok(params)
}

#[cfg(test)]
#[path = "record_test.rs"]
mod record_test;
