use crate::error::Error;
use crate::extensions::DeflateOptions;
use crate::stream::WsStream;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, ReadHalf};
use tokio::time::timeout;
use url::Url;

const HTTP_REQUEST_DELIMITER: &str = "\r\n\r\n";
const MAX_HEAD_SIZE: usize = 16 * 1024;

// Headers the upgrade owns, user-supplied headers never override these.
const PROTECTED_HEADERS: [&str; 6] = [
    "host",
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// Builds the client upgrade request from a ws/wss URL. Returns the
/// serialised request head, the `host:port` string for the TCP connection,
/// the bare host for TLS SNI, and whether the scheme demands TLS.
pub(crate) fn construct_http_request(
    ws_url: &str,
    key: &str,
    extensions: Option<&DeflateOptions>,
    extra_headers: &[(String, String)],
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;
    let mut use_tls = false;

    // Validates the scheme and picks the default port for when the URL
    // carries none.
    let default_port: u16 = match parsed_url.scheme() {
        "ws" => 80,
        "wss" => {
            use_tls = true;
            443
        }
        other => return Err(Error::InvalidURL(format!("unsupported scheme `{}`", other))),
    };

    let host = parsed_url
        .host_str()
        .ok_or_else(|| Error::InvalidURL("URL has no host".to_string()))?;
    let port = parsed_url.port().unwrap_or(default_port);

    // The Host header omits the port when the URL did, matching what the
    // peer expects to validate.
    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    // The TCP connection always needs an explicit port.
    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        request_path, request_host_field, key,
    );

    if let Some(options) = extensions {
        request.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", options.offer()));
    }

    for (name, value) in extra_headers {
        if PROTECTED_HEADERS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        request.push_str(&format!("{}: {}\r\n", name, value));
    }

    request.push_str("\r\n");

    Ok((request, host_with_port, String::from(host), use_tls))
}

/// Reads one HTTP head off the buffered reader, bounded in size and time.
/// Whatever the peer sent past the blank line stays buffered for the
/// caller to deal with.
async fn read_head(
    reader: &mut BufReader<ReadHalf<WsStream>>,
    limit: Duration,
) -> Result<String, Error> {
    let mut head = String::new();

    timeout(limit, async {
        // Read lines until the blank one that ends the head. The size cap
        // keeps a hostile peer from feeding us headers forever.
        loop {
            let bytes_read = reader.read_line(&mut head).await?;
            if bytes_read == 0 || head.ends_with(HTTP_REQUEST_DELIMITER) {
                return Ok::<(), Error>(());
            }
            if head.len() > MAX_HEAD_SIZE {
                return Err(Error::IncompleteHTTPRequest);
            }
        }
    })
    .await??;

    if !head.ends_with(HTTP_REQUEST_DELIMITER) {
        return Err(Error::IncompleteHTTPRequest);
    }

    Ok(head)
}

/// The upgrade request as the server sees it. Header names are lowercased,
/// repeated headers keep every value.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub(crate) async fn parse(
        reader: &mut BufReader<ReadHalf<WsStream>>,
        limit: Duration,
    ) -> Result<HttpRequest, Error> {
        let head = read_head(reader, limit).await?;

        let mut lines = head.lines();
        let request_line = lines.next().ok_or(Error::IncompleteHTTPRequest)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(Error::InvalidHTTPHandshake)?.to_string();
        let uri = parts.next().ok_or(Error::InvalidHTTPHandshake)?.to_string();
        let version = parts.next().ok_or(Error::InvalidHTTPHandshake)?.to_string();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_lowercase(), value.trim().to_string()));
            }
        }

        Ok(HttpRequest {
            method,
            uri,
            version,
            headers,
        })
    }

    /// First value of a header, name matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(header, _)| *header == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value of a repeated header, in order of appearance.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .filter(|(header, _)| *header == name)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

/// The upgrade response as the client sees it, parsed with httparse.
#[derive(Debug)]
pub(crate) struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub(crate) async fn parse(
        reader: &mut BufReader<ReadHalf<WsStream>>,
        limit: Duration,
    ) -> Result<HttpResponse, Error> {
        let head = read_head(reader, limit).await?;

        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut header_storage);
        match response.parse(head.as_bytes())? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
        }

        let status = response.code.ok_or(Error::InvalidHTTPHandshake)?;
        let headers = response
            .headers
            .iter()
            .map(|header| {
                let value = std::str::from_utf8(header.value)
                    .map_err(|_| Error::InvalidHTTPHandshake)?;
                Ok((header.name.to_lowercase(), value.trim().to_string()))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(HttpResponse { status, headers })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(header, _)| *header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<String> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .filter(|(header, _)| *header == name)
            .map(|(_, value)| value.clone())
            .collect()
    }
}
