//! Minimal HTTP/1.1 plumbing for the control server.
//!
//! Only what the control page needs: a request line, a query string and a
//! JSON body going back. One request per connection.

use derive_more::{Display, Error, From};
use std::collections::HashMap;
use std::io::{self, Read, Write};

/// Largest request head accepted (request line plus headers)
pub const MAX_REQUEST_LEN: usize = 4096;

#[derive(Debug, Display, Error, From)]
pub enum HttpError {
    #[display("connection closed before a request arrived")]
    Empty,
    #[display("malformed request line")]
    Malformed,
    #[display("request exceeds {} bytes", MAX_REQUEST_LEN)]
    TooLarge,
    #[display("I/O error: {_0}")]
    #[from]
    Io(io::Error),
}

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

impl Request {
    /// Parse `GET /cmd?c=w HTTP/1.1` style request heads
    pub fn parse(head: &str) -> Result<Self, HttpError> {
        let line = head.lines().next().ok_or(HttpError::Malformed)?;
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::Malformed);
        };
        if !version.starts_with("HTTP/") {
            return Err(HttpError::Malformed);
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };

        Ok(Self {
            method: method.to_string(),
            path: percent_decode(path),
            query,
        })
    }

    /// Read and parse one request from `stream`
    pub fn read_from(stream: &mut impl Read) -> Result<Self, HttpError> {
        let mut buf = Vec::with_capacity(512);
        let mut chunk = [0u8; 512];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                if buf.is_empty() {
                    return Err(HttpError::Empty);
                }
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
            if buf.len() > MAX_REQUEST_LEN {
                return Err(HttpError::TooLarge);
            }
        }
        Self::parse(&String::from_utf8_lossy(&buf))
    }

    /// Query parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Split `a=1&b=2` into decoded pairs; the first occurrence of a key wins
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(percent_decode(key))
            .or_insert_with(|| percent_decode(value));
    }
    params
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes are kept literally.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 3 <= bytes.len() => {
                let mut decoded = [0u8; 1];
                if hex::decode_to_slice(&bytes[i + 1..i + 3], &mut decoded).is_ok() {
                    out.push(decoded[0]);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Response with a JSON (or plain) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    /// Serialize `value` as a 200 JSON response
    pub fn ok_json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::json(200, body),
            Err(e) => Self::error(500, &format!("serialization failed: {e}")),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }).to_string())
    }

    pub const fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            503 => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        write!(
            out,
            concat!(
                "HTTP/1.1 {} {}\r\n",
                "Content-Type: {}\r\n",
                "Content-Length: {}\r\n",
                "Cache-Control: no-cache\r\n",
                "Access-Control-Allow-Origin: *\r\n",
                "Connection: close\r\n",
                "\r\n",
            ),
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
        )?;
        out.write_all(self.body.as_bytes())?;
        out.flush()
    }
}
