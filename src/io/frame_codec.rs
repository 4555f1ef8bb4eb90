//! Frame codec for the netbank wire protocol
//!
//! Every message is one frame: a 4-byte big-endian length followed by that
//! many bytes of UTF-8 text. The text is a `|`-joined field list:
//!
//! ```text
//! request:  kind|subject_id|amount|name|payload
//! response: ok|balance|payload|message          (ok is 1 or 0)
//! ```
//!
//! # Delimiter collisions
//!
//! Fields are not escaped. The last field of each payload is split off with
//! `splitn`, so `Request::payload` and `Response::message` may contain `|`
//! safely. A `|` inside `Request::name` or `Response::payload` shifts the
//! remaining fields and corrupts the message; this is a property of the wire
//! format and is kept for compatibility. The file service refuses file
//! contents containing `|` for this reason.
//!
//! # Malformed requests
//!
//! [`decode_request`] never fails. Anything that does not parse into a
//! well-formed request (too few fields, non-numeric fields, a kind outside
//! 0..=8, invalid UTF-8) decodes to [`Request::quit`]. Services treat that as
//! a disconnect, so one garbled frame ends its connection instead of the
//! service.

use crate::types::{Request, RequestKind, Response, ServiceError};
use bytes::{BufMut, BytesMut};
use std::io::{ErrorKind, Read, Write};

/// Field separator inside a frame payload
pub const DELIMITER: char = '|';

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload accepted by [`read_frame`]
///
/// Guards against a corrupt length prefix forcing a huge allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const REQUEST_FIELDS: usize = 5;
const RESPONSE_FIELDS: usize = 4;

/// Serialize a request into its payload text
pub fn encode_request(request: &Request) -> String {
    format!(
        "{}{d}{}{d}{}{d}{}{d}{}",
        request.kind.code(),
        request.subject_id,
        request.amount,
        request.name,
        request.payload,
        d = DELIMITER
    )
}

/// Parse a request payload, falling back to [`Request::quit`]
pub fn decode_request(payload: &[u8]) -> Request {
    match std::str::from_utf8(payload) {
        Ok(text) => parse_request(text).unwrap_or_else(Request::quit),
        Err(_) => Request::quit(),
    }
}

fn parse_request(text: &str) -> Option<Request> {
    let parts: Vec<&str> = text.splitn(REQUEST_FIELDS, DELIMITER).collect();
    if parts.len() < REQUEST_FIELDS {
        return None;
    }

    let kind = RequestKind::from_code(parts[0].trim().parse().ok()?)?;
    let subject_id = parts[1].trim().parse().ok()?;
    let amount = parts[2].trim().parse().ok()?;

    Some(Request {
        kind,
        subject_id,
        amount,
        name: parts[3].to_string(),
        payload: parts[4].to_string(),
    })
}

/// Serialize a response into its payload text
pub fn encode_response(response: &Response) -> String {
    format!(
        "{}{d}{}{d}{}{d}{}",
        if response.ok { "1" } else { "0" },
        response.balance,
        response.payload,
        response.message,
        d = DELIMITER
    )
}

/// Parse a response payload
///
/// # Errors
///
/// Returns [`ServiceError::Protocol`] if the payload is not UTF-8, has fewer
/// than two fields, or if the `ok`/`balance` fields do not parse. Missing
/// trailing fields decode as empty strings.
pub fn decode_response(payload: &[u8]) -> Result<Response, ServiceError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ServiceError::protocol(format!("response is not UTF-8: {}", e)))?;

    let mut parts = text.splitn(RESPONSE_FIELDS, DELIMITER);

    let ok = match parts.next() {
        Some("1") => true,
        Some("0") => false,
        other => {
            return Err(ServiceError::protocol(format!(
                "invalid ok field {:?}",
                other.unwrap_or_default()
            )))
        }
    };

    let balance_field = parts
        .next()
        .ok_or_else(|| ServiceError::protocol("response is missing the balance field"))?;
    let balance = balance_field
        .trim()
        .parse()
        .map_err(|_| ServiceError::protocol(format!("invalid balance {:?}", balance_field)))?;

    Ok(Response {
        ok,
        balance,
        payload: parts.next().unwrap_or_default().to_string(),
        message: parts.next().unwrap_or_default().to_string(),
    })
}

/// Build a complete frame (length prefix plus payload)
///
/// # Errors
///
/// Returns [`ServiceError::Protocol`] if the payload exceeds [`MAX_FRAME_LEN`].
pub fn encode_frame(payload: &str) -> Result<BytesMut, ServiceError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ServiceError::protocol(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload.as_bytes());
    Ok(frame)
}

/// Write one frame to `writer`
///
/// The frame is assembled in memory and written with a single `write_all`,
/// so a short write surfaces as a transport error rather than a partial frame
/// followed by silence.
///
/// # Errors
///
/// Returns [`ServiceError::Protocol`] for oversized payloads and
/// [`ServiceError::Transport`] if the write fails or is short.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &str) -> Result<(), ServiceError> {
    let frame = encode_frame(payload)?;
    writer
        .write_all(&frame)
        .and_then(|_| writer.flush())
        .map_err(|e| ServiceError::transport("send", e))
}

/// Read exactly one frame from `reader` and return its payload bytes
///
/// # Errors
///
/// Returns [`ServiceError::Transport`] if the peer closes the connection
/// before a full frame arrives, if the read fails, or if the length prefix
/// exceeds [`MAX_FRAME_LEN`].
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, ServiceError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    reader
        .read_exact(&mut prefix)
        .map_err(|e| recv_error("frame length", e))?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ServiceError::transport(
            "recv",
            format!(
                "frame length {} exceeds the {} byte limit",
                len, MAX_FRAME_LEN
            ),
        ));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| recv_error("frame body", e))?;
    Ok(payload)
}

fn recv_error(part: &str, error: std::io::Error) -> ServiceError {
    if error.kind() == ErrorKind::UnexpectedEof {
        ServiceError::transport("recv", format!("connection closed while reading {}", part))
    } else {
        ServiceError::transport("recv", format!("{} ({})", error, part))
    }
}
