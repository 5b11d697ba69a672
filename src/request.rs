//! Incoming HTTP request type.

use std::fmt::Write as _;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};

/// Header values replaced with `*` when a request is dumped into a log.
const MASKED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie"];

/// An incoming HTTP request with its body already collected.
///
/// The body is a [`Bytes`] handle: [`take_body`](Request::take_body) moves it
/// out, [`set_body`](Request::set_body) puts a (possibly different) body back.
/// Middleware that inspects the body must put it back, or the handler reads
/// an empty one.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    pub fn path(&self) -> &str { self.uri.path() }

    /// Raw query string without the leading `?`; empty when absent.
    pub fn query(&self) -> &str { self.uri.query().unwrap_or("") }

    /// Rewrites the target URI. Middleware that rewrites paths uses this.
    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    /// Moves the body out, leaving an empty one behind.
    pub fn take_body(&mut self) -> Bytes {
        std::mem::take(&mut self.body)
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Case-insensitive header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// Best guess at the originating client address.
    ///
    /// Behind nginx the socket peer is the proxy, so the forwarding headers
    /// win: the first `x-forwarded-for` hop, then `x-real-ip`, then the
    /// socket address. Empty when none is known.
    pub fn client_ip(&self) -> String {
        let forwarded = self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
        if let Some(ip) = self.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()) {
            return ip.to_owned();
        }
        self.remote_addr.map(|a| a.ip().to_string()).unwrap_or_default()
    }

    /// Renders the request line and headers in wire format, without the body.
    ///
    /// Credentials are masked. Used for crash logs, where the body may be
    /// large or sensitive.
    pub fn dump_head(&self) -> String {
        let target = self.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let mut out = format!("{} {} {:?}\r\n", self.method, target, self.version);

        if !self.headers.contains_key(http::header::HOST) {
            if let Some(authority) = self.uri.authority() {
                let _ = write!(out, "host: {authority}\r\n");
            }
        }
        for (name, value) in &self.headers {
            let value = if MASKED_HEADERS.contains(&name.as_str()) {
                "*".into()
            } else {
                String::from_utf8_lossy(value.as_bytes())
            };
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(builder: http::request::Builder) -> Request {
        Request::from(builder.body(Bytes::from_static(b"{\"secret\":1}")).unwrap())
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let req = request(
            http::Request::builder()
                .uri("/")
                .header("x-forwarded-for", " 203.0.113.7 , 10.0.0.1")
                .header("x-real-ip", "198.51.100.2"),
        )
        .with_remote_addr("10.0.0.9:4000".parse().unwrap());
        assert_eq!(req.client_ip(), "203.0.113.7");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_socket() {
        let req = request(http::Request::builder().uri("/").header("x-real-ip", "198.51.100.2"));
        assert_eq!(req.client_ip(), "198.51.100.2");

        let req = request(http::Request::builder().uri("/"))
            .with_remote_addr("10.0.0.9:4000".parse().unwrap());
        assert_eq!(req.client_ip(), "10.0.0.9");

        assert_eq!(request(http::Request::builder().uri("/")).client_ip(), "");
    }

    #[test]
    fn dump_head_has_request_line_and_headers_but_no_body() {
        let req = request(
            http::Request::builder()
                .method("POST")
                .uri("/users?page=2")
                .header("host", "api.local")
                .header("authorization", "Bearer abc")
                .header("user-agent", "curl/8"),
        );
        let dump = req.dump_head();

        assert!(dump.starts_with("POST /users?page=2 HTTP/1.1\r\n"));
        assert!(dump.contains("host: api.local\r\n"));
        assert!(dump.contains("user-agent: curl/8\r\n"));
        assert!(dump.contains("authorization: *\r\n"));
        assert!(!dump.contains("Bearer"));
        assert!(!dump.contains("secret"));
        assert!(dump.ends_with("\r\n\r\n"));
    }

    #[test]
    fn take_body_leaves_empty_body_until_restored() {
        let mut req = request(http::Request::builder().uri("/"));
        let body = req.take_body();
        assert!(req.body().is_empty());
        req.set_body(body.clone());
        assert_eq!(req.body(), &body[..]);
    }
}
