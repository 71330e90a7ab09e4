//! HTTP response encoding, and decoding for the client side.

use crate::error::NetError;
use bytes::{BufMut, Bytes, BytesMut};

/// Response sent for every request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    body: Bytes,
}

impl HttpResponse {
    pub const STATUS_LINE: &'static str = "HTTP/1.1 200 OK\r\n";
    pub const HEADERS: &'static str = "Connection: close\r\nContent-Type: text/html\r\n";

    /// `200 OK` carrying `body`.
    pub fn ok(body: Bytes) -> Self {
        Self { body }
    }

    /// Status line, header block, blank line, body.
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(
            Self::STATUS_LINE.len() + Self::HEADERS.len() + 2 + self.body.len(),
        );
        out.put_slice(Self::STATUS_LINE.as_bytes());
        out.put_slice(Self::HEADERS.as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(&self.body);
        out
    }
}

/// A response as received by the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpReply {
    /// Parse a complete response (everything read up to EOF).
    pub fn parse(data: &[u8]) -> Result<Self, NetError> {
        let head_end = find_head_end(data)
            .ok_or_else(|| NetError::MalformedResponse("missing blank line".to_string()))?;
        let head = std::str::from_utf8(&data[..head_end])
            .map_err(|_| NetError::MalformedResponse("head is not UTF-8".to_string()))?;

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');

        let version = parts
            .next()
            .and_then(|v| v.strip_prefix("HTTP/"))
            .ok_or_else(|| NetError::MalformedResponse(format!("bad status line: {status_line}")))?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| NetError::MalformedResponse(format!("bad status code: {status_line}")))?;
        let reason = parts.next().unwrap_or_default();

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| NetError::MalformedResponse(format!("bad header: {line}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(HttpReply {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
            headers,
            body: Bytes::copy_from_slice(&data[head_end + 4..]),
        })
    }

    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Position of the `\r\n\r\n` ending the head.
fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exact_bytes() {
        let response = HttpResponse::ok(Bytes::from_static(b"<p>hi</p>"));
        assert_eq!(
            &response.encode()[..],
            &b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: text/html\r\n\r\n<p>hi</p>"[..]
        );
    }

    #[test]
    fn test_encode_empty_body() {
        let response = HttpResponse::ok(Bytes::new());
        assert!(response.encode().ends_with(b"text/html\r\n\r\n"));
    }

    #[test]
    fn test_parse_reply() {
        let encoded = HttpResponse::ok(Bytes::from_static(b"<h1>x</h1>")).encode();
        let reply = HttpReply::parse(&encoded).unwrap();

        assert_eq!(reply.version, "1.1");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.reason, "OK");
        assert_eq!(reply.header("connection"), Some("close"));
        assert_eq!(reply.header("Content-Type"), Some("text/html"));
        assert_eq!(&reply.body[..], b"<h1>x</h1>");
    }

    #[test]
    fn test_parse_multi_word_reason() {
        let reply = HttpReply::parse(b"HTTP/1.0 404 Not Found\r\n\r\n").unwrap();
        assert_eq!(reply.status, 404);
        assert_eq!(reply.reason, "Not Found");
        assert!(reply.headers.is_empty());
        assert!(reply.body.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            HttpReply::parse(b"hello"),
            Err(NetError::MalformedResponse(_))
        ));
        assert!(matches!(
            HttpReply::parse(b"SPDY 200 OK\r\n\r\n"),
            Err(NetError::MalformedResponse(_))
        ));
        assert!(matches!(
            HttpReply::parse(b"HTTP/1.1 abc OK\r\n\r\n"),
            Err(NetError::MalformedResponse(_))
        ));
        assert!(matches!(
            HttpReply::parse(b"HTTP/1.1 200 OK\r\nno-colon\r\n\r\n"),
            Err(NetError::MalformedResponse(_))
        ));
    }
}
