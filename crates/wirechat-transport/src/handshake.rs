//! The one-time HTTP upgrade that switches a raw TCP stream into frame mode.
//!
//! A failed negotiation is fatal to that connection: the caller drops the
//! stream without writing any response.

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::HandshakeError;

/// RFC 6455 GUID appended to the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of the upgrade request, headers included.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// A parsed upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Looks up a header value; names compare case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The client's `Sec-WebSocket-Key`.
    pub fn key(&self) -> Result<&str, HandshakeError> {
        match self.header("sec-websocket-key") {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(HandshakeError::MissingKey),
        }
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a client key:
/// base64(sha1(key + GUID)).
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// The fixed `101 Switching Protocols` response.
pub fn response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

/// Parses the request line and CRLF-separated headers.
pub fn parse_request(raw: &str) -> Result<UpgradeRequest, HandshakeError> {
    let mut lines = raw.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| HandshakeError::MalformedRequest("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version)) => (method, path, version),
        _ => {
            return Err(HandshakeError::MalformedRequest(format!(
                "bad request line {request_line:?}"
            )));
        }
    };
    if method != "GET" || version != "HTTP/1.1" {
        return Err(HandshakeError::MalformedRequest(format!(
            "expected GET over HTTP/1.1, got {method} {version}"
        )));
    }

    let mut headers = Vec::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            HandshakeError::MalformedRequest(format!("bad header line {line:?}"))
        })?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(UpgradeRequest {
        path: path.to_string(),
        headers,
    })
}

/// Reads the request head, at most [`MAX_REQUEST_BYTES`], up to the blank line.
pub async fn read_request<R>(reader: &mut R) -> Result<String, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::with_capacity(256);
    loop {
        let remaining = MAX_REQUEST_BYTES - raw.len();
        if remaining == 0 {
            return Err(HandshakeError::TooLarge(MAX_REQUEST_BYTES));
        }

        let start = raw.len();
        let read = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut raw)
            .await
            .map_err(HandshakeError::Io)?;
        if read == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
        if !raw.ends_with(b"\n") {
            // `take` ran out before the line finished.
            if raw.len() >= MAX_REQUEST_BYTES {
                return Err(HandshakeError::TooLarge(MAX_REQUEST_BYTES));
            }
            return Err(HandshakeError::ConnectionClosed);
        }
        if &raw[start..] == b"\r\n" {
            break;
        }
    }

    String::from_utf8(raw)
        .map_err(|_| HandshakeError::MalformedRequest("request is not UTF-8".into()))
}

/// Runs the server side of the upgrade on an accepted stream.
pub async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
) -> Result<UpgradeRequest, HandshakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let raw = read_request(reader).await?;
    let request = parse_request(&raw)?;
    let accept = compute_accept_key(request.key()?);

    writer
        .write_all(response(&accept).as_bytes())
        .await
        .map_err(HandshakeError::Io)?;
    writer.flush().await.map_err(HandshakeError::Io)?;
    Ok(request)
}
