//! Minimal HTTP/1.x message codec for the ingest server.
//!
//! Only what the ingest server needs is supported: a request line, headers,
//! and a body sized by `Content-Length`. There is no chunked transfer
//! encoding and no pipelining.

use crate::error::{Error, Result};
use crate::shared::http_constants::{
    ACCEPT, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, APPLICATION_JSON, CONTENT_LENGTH, CONTENT_TYPE,
    CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS, CORS_ALLOW_ORIGIN, HTTP_VERSION, TEXT_EVENT_STREAM,
};
use std::fmt;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const LINE_SEPARATOR: &str = "\r\n";

/// Ordered header list with case-insensitive lookup.
///
/// Names keep the case they were received or set with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header value, ignoring name case.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::shared::http_message::Headers;
    ///
    /// let mut headers = Headers::new();
    /// headers.set("Content-Type", "text/plain");
    /// assert_eq!(headers.get("content-type"), Some("text/plain"));
    /// assert!(headers.contains("CONTENT-TYPE"));
    /// ```
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether a header is present, ignoring name case.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Remove a header, ignoring name case.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (key, value) in iter {
            headers.set(key, value);
        }
        headers
    }
}

/// A parsed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `POST`
    pub method: String,
    /// Request target, `/` when missing
    pub path: String,
    /// Request headers
    pub headers: Headers,
    /// Body text, verbatim after the header section
    pub body: String,
}

/// Outcome of parsing a possibly partial request buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// The whole request has been buffered.
    Complete(HttpRequest),
    /// More bytes are needed; keep reading and parse again.
    Incomplete,
}

impl HttpRequest {
    /// Parse a request from the bytes buffered so far.
    ///
    /// The request is complete once the header section has been terminated
    /// and, when `Content-Length` is present, at least that many body bytes
    /// have arrived.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::shared::http_message::{HttpRequest, Parsed};
    ///
    /// let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
    /// assert_eq!(HttpRequest::parse(raw).unwrap(), Parsed::Incomplete);
    ///
    /// let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
    /// let Parsed::Complete(request) = HttpRequest::parse(raw).unwrap() else {
    ///     panic!("expected a complete request");
    /// };
    /// assert_eq!(request.method, "POST");
    /// assert_eq!(request.body, "hello");
    /// ```
    pub fn parse(buffer: &[u8]) -> Result<Parsed> {
        let Some(split) = find_subslice(buffer, HEADER_TERMINATOR) else {
            return Ok(Parsed::Incomplete);
        };

        let head = std::str::from_utf8(&buffer[..split])
            .map_err(|e| Error::parse(format!("header section is not UTF-8: {e}")))?;
        let body = &buffer[split + HEADER_TERMINATOR.len()..];

        let mut lines = head.split(LINE_SEPARATOR);
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Error::parse("missing request line"))?
            .to_string();
        let path = parts.next().unwrap_or("/").to_string();

        let headers: Headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();

        let expected = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.parse::<usize>().ok());
        if let Some(expected) = expected {
            if body.len() < expected {
                return Ok(Parsed::Incomplete);
            }
        }

        Ok(Parsed::Complete(Self {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(body).into_owned(),
        }))
    }

    /// Whether the client asked for an event stream.
    ///
    /// The `Accept` header may list several media types.
    pub fn accepts_event_stream(&self) -> bool {
        self.headers.get(ACCEPT).is_some_and(|accept| {
            accept.split(',').any(|media| {
                media
                    .split(';')
                    .next()
                    .is_some_and(|m| m.trim() == TEXT_EVENT_STREAM)
            })
        })
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// An HTTP response to be written to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers, excluding `Content-Length`
    pub headers: Headers,
    /// Response body
    pub body: Option<String>,
}

impl HttpResponse {
    /// Create a response with the given status and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    /// 200 with an optional body.
    pub fn ok(body: Option<String>) -> Self {
        Self {
            body,
            ..Self::new(200)
        }
    }

    /// 200 with a JSON body.
    pub fn json(body: impl Into<String>) -> Self {
        Self::ok(Some(body.into())).with_header(CONTENT_TYPE, APPLICATION_JSON)
    }

    /// 404 with a plain message.
    pub fn not_found() -> Self {
        Self {
            body: Some(status_text(404).to_string()),
            ..Self::new(404)
        }
    }

    /// 400 with a plain message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            body: Some(message.into()),
            ..Self::new(400)
        }
    }

    /// 500 with a plain message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            body: Some(message.into()),
            ..Self::new(500)
        }
    }

    /// 204 without body.
    pub fn no_content() -> Self {
        Self::new(204)
    }

    /// Add or replace a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Add the CORS headers browsers need to POST to the ingest port.
    pub fn with_cors(self) -> Self {
        self.with_header(ACCESS_CONTROL_ALLOW_ORIGIN, CORS_ALLOW_ORIGIN)
            .with_header(ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOW_METHODS)
            .with_header(ACCESS_CONTROL_ALLOW_HEADERS, CORS_ALLOW_HEADERS)
    }

    /// Render the response onto the wire.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::shared::http_message::HttpResponse;
    ///
    /// let bytes = HttpResponse::not_found().to_bytes();
    /// assert_eq!(
    ///     String::from_utf8(bytes).unwrap(),
    ///     "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nNot Found"
    /// );
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body.as_deref().unwrap_or_default();
        write!(
            f,
            "{} {} {}{}",
            HTTP_VERSION,
            self.status,
            status_text(self.status),
            LINE_SEPARATOR
        )?;
        write!(f, "{}: {}{}", CONTENT_LENGTH, body.len(), LINE_SEPARATOR)?;
        for (name, value) in self.headers.iter() {
            write!(f, "{}: {}{}", name, value, LINE_SEPARATOR)?;
        }
        write!(f, "{}{}", LINE_SEPARATOR, body)
    }
}

/// Reason phrase for a status code.
///
/// Unknown codes fall back to `OK`.
pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}
