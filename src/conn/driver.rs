//! The per-connection linear exchange state machine: `CONNECTING -> SENDING_HEADERS ->
//! SENDING_BODY -> RECEIVING_HEADERS -> RECEIVING_BODY -> RESPONSE_CLOSED -> {IDLE | CLOSED}`.
//!
//! Grounded on the *shape* of `cmap/conn/wire/message.rs`'s phase-by-phase async read/write and
//! `establish.rs`'s phase sequencing, reimplemented for the minimal HTTP/1.1 request/response
//! cycle this crate needs: a status line and header block, with the body transferred separately
//! once the caller asks for it. Full HTTP/1.1 semantics (trailers, `100-continue`, pipelining)
//! are out of scope — see PURPOSE & SCOPE.

use std::{net::IpAddr, time::Duration};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Connection;
use crate::{
    event::{self, phase, TraceFields, TraceHook},
    net::NetworkBackend,
    origin::{Origin, Scheme},
};
pub(crate) use crate::error::{Error, Result};

const MAX_HEADER_BLOCK: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

fn fields() -> TraceFields {
    event::fields()
}

/// Opens TCP (and, for `https`, TLS) to `origin`, emitting the `connection.*` trace events.
/// Used only when the dispatcher decides to create a brand-new connection; reused connections
/// skip straight to [`run_exchange`].
pub(crate) async fn establish(
    origin: &Origin,
    backend: &dyn NetworkBackend,
    connect_timeout: Option<Duration>,
    local_address: Option<IpAddr>,
    trace: Option<&TraceHook>,
) -> Result<crate::net::BoxedStream> {
    event::emit(trace, phase::CONNECT_TCP_STARTED, fields);
    let stream = match backend
        .connect_tcp(&origin.host, origin.port, connect_timeout, local_address)
        .await
    {
        Ok(stream) => {
            event::emit(trace, phase::CONNECT_TCP_COMPLETE, fields);
            stream
        }
        Err(e) => {
            event::emit(trace, phase::CONNECT_TCP_FAILED, fields);
            return Err(e);
        }
    };

    if origin.scheme != Scheme::Https {
        return Ok(stream);
    }

    event::emit(trace, phase::START_TLS_STARTED, fields);
    match backend.start_tls(stream, &origin.host, connect_timeout).await {
        Ok(stream) => {
            event::emit(trace, phase::START_TLS_COMPLETE, fields);
            Ok(stream)
        }
        Err(e) => {
            event::emit(trace, phase::START_TLS_FAILED, fields);
            Err(e)
        }
    }
}

/// A fully-parsed HTTP/1.1 status line and header block. The body is not read here; the caller
/// reads it on demand through [`read_body`], which is what `ResponseHandle::aread` calls.
pub(crate) struct ExchangeResult {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body_length: BodyLength,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum BodyLength {
    Fixed(usize),
    Chunked,
}

/// Sends `method target` plus `headers`/`body`, then reads the response status line and header
/// block. Emits the `http11.*` trace events in order; on header-parse failure the sequence is
/// truncated to `receive_response_headers.failed -> response_closed.started -> .complete`, per
/// the bit-exact vocabulary in the external interfaces.
pub(crate) async fn run_exchange(
    conn: &mut Connection,
    http2: bool,
    method: &str,
    target: &str,
    headers: &[(String, String)],
    body: &Bytes,
    trace: Option<&TraceHook>,
) -> Result<ExchangeResult> {
    if http2 {
        return Err(Error::runtime(
            "pool is configured for http2; this driver only speaks HTTP/1.1",
        ));
    }

    send_request_headers(conn, method, target, headers, trace).await?;
    send_request_body(conn, body, trace).await?;

    match receive_response_headers(conn, trace).await {
        Ok((status, resp_headers)) => {
            event::emit(trace, phase::RECEIVE_RESPONSE_BODY_STARTED, fields);
            let body_length = body_length_of(&resp_headers, method, status);
            conn.request_count += 1;
            Ok(ExchangeResult {
                status,
                headers: resp_headers,
                body_length,
            })
        }
        Err(e) => {
            event::emit(trace, phase::RESPONSE_CLOSED_STARTED, fields);
            event::emit(trace, phase::RESPONSE_CLOSED_COMPLETE, fields);
            Err(e)
        }
    }
}

async fn send_request_headers(
    conn: &mut Connection,
    method: &str,
    target: &str,
    headers: &[(String, String)],
    trace: Option<&TraceHook>,
) -> Result<()> {
    event::emit(trace, phase::SEND_REQUEST_HEADERS_STARTED, fields);

    let mut buf = format!("{method} {target} HTTP/1.1\r\n");
    for (name, value) in headers {
        buf.push_str(name);
        buf.push_str(": ");
        buf.push_str(value);
        buf.push_str("\r\n");
    }
    buf.push_str("\r\n");

    match conn.stream.write_all(buf.as_bytes()).await {
        Ok(()) => {
            event::emit(trace, phase::SEND_REQUEST_HEADERS_COMPLETE, fields);
            Ok(())
        }
        Err(e) => {
            event::emit(trace, phase::SEND_REQUEST_HEADERS_FAILED, fields);
            Err(Error::io(e, Some(conn.conn_id)))
        }
    }
}

async fn send_request_body(conn: &mut Connection, body: &Bytes, trace: Option<&TraceHook>) -> Result<()> {
    event::emit(trace, phase::SEND_REQUEST_BODY_STARTED, fields);
    match conn.stream.write_all(body).await {
        Ok(()) => {
            event::emit(trace, phase::SEND_REQUEST_BODY_COMPLETE, fields);
            Ok(())
        }
        Err(e) => {
            event::emit(trace, phase::SEND_REQUEST_BODY_FAILED, fields);
            Err(Error::io(e, Some(conn.conn_id)))
        }
    }
}

async fn receive_response_headers(
    conn: &mut Connection,
    trace: Option<&TraceHook>,
) -> Result<(u16, Vec<(String, String)>)> {
    event::emit(trace, phase::RECEIVE_RESPONSE_HEADERS_STARTED, fields);

    let conn_id = conn.conn_id;
    let result = read_header_block(conn).await;
    match result {
        Ok(block) => match parse_status_and_headers(&block, conn_id) {
            Ok(parsed) => {
                event::emit(trace, phase::RECEIVE_RESPONSE_HEADERS_COMPLETE, fields);
                Ok(parsed)
            }
            Err(e) => {
                event::emit(trace, phase::RECEIVE_RESPONSE_HEADERS_FAILED, fields);
                Err(e)
            }
        },
        Err(e) => {
            event::emit(trace, phase::RECEIVE_RESPONSE_HEADERS_FAILED, fields);
            Err(e)
        }
    }
}

/// Reads from `conn.stream` (consuming any previously-buffered leftover first) until a blank
/// line terminates the header block, returning the header bytes and stashing anything read past
/// them back onto `conn.read_buffer` for the body phase.
async fn read_header_block(conn: &mut Connection) -> Result<Vec<u8>> {
    loop {
        if let Some(pos) = find_double_crlf(&conn.read_buffer) {
            let rest = conn.read_buffer.split_off(pos + 4);
            let block = std::mem::replace(&mut conn.read_buffer, rest);
            return Ok(block);
        }
        if conn.read_buffer.len() > MAX_HEADER_BLOCK {
            return Err(Error::remote_protocol_error(
                "response header block exceeded maximum size",
                conn.conn_id,
            ));
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = conn
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::io(e, Some(conn.conn_id)))?;
        if n == 0 {
            return Err(Error::remote_protocol_error(
                "connection closed before a complete response header block was received",
                conn.conn_id,
            ));
        }
        conn.read_buffer.extend_from_slice(&chunk[..n]);
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_and_headers(block: &[u8], conn_id: super::ConnId) -> Result<(u16, Vec<(String, String)>)> {
    let text = std::str::from_utf8(block)
        .map_err(|_| Error::remote_protocol_error("response header block was not valid UTF-8", conn_id))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| Error::remote_protocol_error("empty response", conn_id))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| Error::remote_protocol_error("malformed status line", conn_id))?;
    if version.starts_with("HTTP/2") {
        return Err(Error::runtime(
            "peer attempted an HTTP/2 upgrade, which this pool rejects at runtime",
        ));
    }
    if !version.starts_with("HTTP/1.") {
        return Err(Error::remote_protocol_error(
            format!("unrecognized HTTP version {version:?}"),
            conn_id,
        ));
    }
    let status: u16 = parts
        .next()
        .ok_or_else(|| Error::remote_protocol_error("missing status code", conn_id))?
        .parse()
        .map_err(|_| Error::remote_protocol_error("status code was not a valid integer", conn_id))?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::remote_protocol_error(format!("malformed header line {line:?}"), conn_id)
        })?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok((status, headers))
}

fn body_length_of(headers: &[(String, String)], method: &str, status: u16) -> BodyLength {
    if method.eq_ignore_ascii_case("HEAD") || matches!(status, 204 | 304) {
        return BodyLength::Fixed(0);
    }
    if header_value(headers, "transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        return BodyLength::Chunked;
    }
    let len = header_value(headers, "content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    BodyLength::Fixed(len)
}

/// True if either side's `Connection` header includes the `close` token (case-insensitively),
/// per the connection-close negotiation rule in the connection driver's component design.
pub(crate) fn negotiates_close(request_headers: &[(String, String)], response_headers: &[(String, String)]) -> bool {
    has_close_token(request_headers) || has_close_token(response_headers)
}

fn has_close_token(headers: &[(String, String)]) -> bool {
    header_value(headers, "connection")
        .is_some_and(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("close")))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Drains the response body, emitting `http11.receive_response_body.*`. Called lazily from
/// `ResponseHandle::aread` so the trace reflects when the caller actually asked for the bytes,
/// not when the headers happened to arrive.
pub(crate) async fn read_body(
    conn: &mut Connection,
    body_length: BodyLength,
    trace: Option<&TraceHook>,
) -> Result<Bytes> {
    let result = match body_length {
        BodyLength::Fixed(len) => read_fixed_body(conn, len).await,
        BodyLength::Chunked => read_chunked_body(conn).await,
    };
    match result {
        Ok(bytes) => {
            event::emit(trace, phase::RECEIVE_RESPONSE_BODY_COMPLETE, fields);
            Ok(bytes)
        }
        Err(e) => {
            event::emit(trace, phase::RECEIVE_RESPONSE_BODY_FAILED, fields);
            Err(e)
        }
    }
}

async fn read_fixed_body(conn: &mut Connection, len: usize) -> Result<Bytes> {
    while conn.read_buffer.len() < len {
        let mut chunk = [0u8; READ_CHUNK];
        let n = conn
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::io(e, Some(conn.conn_id)))?;
        if n == 0 {
            return Err(Error::remote_protocol_error(
                "connection closed before the full response body was received",
                conn.conn_id,
            ));
        }
        conn.read_buffer.extend_from_slice(&chunk[..n]);
    }
    let rest = conn.read_buffer.split_off(len);
    let body = std::mem::replace(&mut conn.read_buffer, rest);
    Ok(Bytes::from(body))
}

async fn read_chunked_body(conn: &mut Connection) -> Result<Bytes> {
    let mut out = Vec::new();
    loop {
        let line = read_line(conn).await?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::remote_protocol_error(format!("malformed chunk size {line:?}"), conn.conn_id))?;
        if size == 0 {
            // Trailing headers (if any) followed by the terminating blank line; neither is
            // exposed to the caller since trailers are out of scope.
            loop {
                let trailer = read_line(conn).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(Bytes::from(out));
        }

        while conn.read_buffer.len() < size + 2 {
            let mut chunk = [0u8; READ_CHUNK];
            let n = conn
                .stream
                .read(&mut chunk)
                .await
                .map_err(|e| Error::io(e, Some(conn.conn_id)))?;
            if n == 0 {
                return Err(Error::remote_protocol_error(
                    "connection closed mid-chunk",
                    conn.conn_id,
                ));
            }
            conn.read_buffer.extend_from_slice(&chunk[..n]);
        }
        let rest = conn.read_buffer.split_off(size + 2);
        let chunk_data = std::mem::replace(&mut conn.read_buffer, rest);
        out.extend_from_slice(&chunk_data[..size]);
    }
}

async fn read_line(conn: &mut Connection) -> Result<String> {
    loop {
        if let Some(pos) = conn.read_buffer.windows(2).position(|w| w == b"\r\n") {
            let rest = conn.read_buffer.split_off(pos + 2);
            let line = std::mem::replace(&mut conn.read_buffer, rest);
            let text = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
            return Ok(text);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = conn
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::io(e, Some(conn.conn_id)))?;
        if n == 0 {
            return Err(Error::remote_protocol_error(
                "connection closed mid-chunked-transfer",
                conn.conn_id,
            ));
        }
        conn.read_buffer.extend_from_slice(&chunk[..n]);
    }
}
