//! The opening handshake (C3): parsing/validating the HTTP upgrade on the server side,
//! building the request and validating the response on the client side, and the
//! top-level `accept_async`/`connect_async` entry points that hand back a running
//! [`Connection`]. Header parsing itself uses `httparse`, the same crate the teacher's
//! `Cargo.toml` already pulled in; accept-key derivation keeps the teacher's
//! `utils::generate_websocket_accept_value`/`generate_websocket_key` almost unchanged,
//! since that logic was already correct.

use base64::prelude::*;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use url::Url;

use crate::config::{ClientConfig, ServerConfig, WebSocketConfig};
use crate::connection::{Connection, Handler, Role};
use crate::error::Error;
use crate::stream::SocketFlowStream;

const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// One MiB, the same `MAX_BUFFER` ceiling the receive/fragment buffers use once the
/// connection is open (§4.3.1: the pre-terminator wait is bounded by `MAX_BUFFER` too, so
/// a peer that never sends a header terminator can't grow this buffer without limit).
const MAX_BUFFER: usize = 1 << 20;

fn accept_value_for(client_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key.as_bytes());
    sha1.update(HANDSHAKE_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

fn generate_client_key() -> String {
    let random_bytes: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(random_bytes)
}

fn header_value<'a>(req_headers: &'a [httparse::Header], name: &str) -> Option<&'a str> {
    req_headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn header_contains_token(value: &str, token: &str) -> bool {
    value
        .split(|c| c == ',' || c == ' ')
        .any(|part| part.eq_ignore_ascii_case(token))
}

/// Reads from `stream` until a full HTTP request is buffered, validates the upgrade
/// headers (§4.3.1), and writes back either `101 Switching Protocols` or
/// `400 Bad Request`. Returns the bytes read past the header terminator so they aren't
/// lost (a pipelining client could, in principle, have sent the first WebSocket frame in
/// the same packet as the handshake, though this engine doesn't require that).
async fn server_upgrade<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf)? {
            httparse::Status::Complete(_) => {
                let key = header_value(req.headers, "Sec-WebSocket-Key");
                let upgrade = header_value(req.headers, "Upgrade");
                let connection = header_value(req.headers, "Connection");
                let version = header_value(req.headers, "Sec-WebSocket-Version");

                let validated = (|| -> Result<String, Error> {
                    let key = key.ok_or(Error::NoSecWebsocketKey)?;
                    let upgrade = upgrade.ok_or(Error::NoUpgradeHeaderPresent)?;
                    if !header_contains_token(upgrade, "websocket") {
                        return Err(Error::NoUpgradeHeaderPresent);
                    }
                    let connection = connection.ok_or(Error::NoConnectionHeaderPresent)?;
                    if !header_contains_token(connection, "Upgrade") {
                        return Err(Error::NoConnectionHeaderPresent);
                    }
                    if version != Some("13") {
                        return Err(Error::UnsupportedVersion);
                    }
                    Ok(accept_value_for(key))
                })();

                return match validated {
                    Ok(accept_key) => {
                        let response = format!(
                            "HTTP/1.1 101 Switching Protocols\r\n\
                             Connection: Upgrade\r\n\
                             Upgrade: websocket\r\n\
                             Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
                        );
                        stream.write_all(response.as_bytes()).await?;
                        Ok(())
                    }
                    Err(e) => {
                        stream
                            .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                            .await
                            .ok();
                        Err(e)
                    }
                };
            }
            httparse::Status::Partial => {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(Error::IncompleteHTTPRequest);
                }
                if buf.len() + n > MAX_BUFFER {
                    stream
                        .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                        .await
                        .ok();
                    return Err(Error::BufferExceeded);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Completes the server side of the handshake on an already-accepted transport and
/// returns a running [`Connection`] once the upgrade succeeds.
pub async fn accept_async<S, H>(stream: S, handler: H) -> Result<Connection<S, H>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    accept_async_with_config(stream, handler, WebSocketConfig::default()).await
}

/// Same as [`accept_async`] but with an explicit frame-size/message-size configuration.
pub async fn accept_async_with_config<S, H>(
    mut stream: S,
    handler: H,
    config: WebSocketConfig,
) -> Result<Connection<S, H>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    server_upgrade(&mut stream).await?;
    Ok(Connection::new(stream, Role::Server, config, handler))
}

/// Accepts a plain TCP connection, wraps it in TLS first when `server_config` carries a
/// `rustls::ServerConfig`, completes the handshake, and hands back a running
/// [`Connection`] over the resulting [`SocketFlowStream`].
pub async fn accept_async_tcp<H>(
    stream: TcpStream,
    server_config: &ServerConfig,
    handler: H,
) -> Result<Connection<SocketFlowStream, H>, Error>
where
    H: Handler,
{
    stream.set_nodelay(true).ok();
    let web_socket_config = server_config.web_socket_config.clone().unwrap_or_default();

    let mut socket = match &server_config.tls_config {
        Some(tls_config) => {
            let acceptor = TlsAcceptor::from(Arc::clone(tls_config));
            let tls_stream = acceptor.accept(stream).await?;
            SocketFlowStream::SecureServer(Box::new(tls_stream))
        }
        None => SocketFlowStream::Plain(stream),
    };

    server_upgrade(&mut socket).await?;
    Ok(Connection::new(socket, Role::Server, web_socket_config, handler))
}

struct ParsedWsUrl {
    host: String,
    host_with_port: String,
    path: String,
    use_tls: bool,
}

fn parse_ws_url(ws_url: &str) -> Result<ParsedWsUrl, Error> {
    let parsed = Url::parse(ws_url)?;
    let (default_port, use_tls) = match parsed.scheme() {
        "ws" => (80, false),
        "wss" => (443, true),
        _ => return Err(Error::InvalidSchemeURL),
    };
    let host = parsed.host_str().ok_or(Error::URLNoHost)?.to_string();
    let port = parsed.port().unwrap_or(default_port);
    let path = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };
    Ok(ParsedWsUrl {
        host_with_port: format!("{host}:{port}"),
        host,
        path,
        use_tls,
    })
}

fn build_client_request(parsed: &ParsedWsUrl, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        path = parsed.path,
        host = parsed.host_with_port,
    )
}

async fn client_upgrade<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    parsed: &ParsedWsUrl,
) -> Result<(), Error> {
    let key = generate_client_key();
    let expected_accept = accept_value_for(&key);
    let request = build_client_request(parsed, &key);
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut resp = httparse::Response::new(&mut headers);
        match resp.parse(&buf)? {
            httparse::Status::Complete(_) => {
                if resp.code != Some(101) {
                    return Err(Error::NoUpgrade);
                }
                let accept = header_value(resp.headers, "Sec-WebSocket-Accept")
                    .ok_or(Error::InvalidAcceptKey)?;
                if accept != expected_accept {
                    return Err(Error::InvalidAcceptKey);
                }
                return Ok(());
            }
            httparse::Status::Partial => {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(Error::IncompleteHTTPRequest);
                }
                if buf.len() + n > MAX_BUFFER {
                    return Err(Error::BufferExceeded);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Dials `ws_url`, completes the client side of the handshake (building the request,
/// dialing TLS for `wss://`, and fully validating `Sec-WebSocket-Accept`), and returns a
/// running [`Connection`].
pub async fn connect_async<H>(
    ws_url: &str,
    config: ClientConfig,
    handler: H,
) -> Result<Connection<SocketFlowStream, H>, Error>
where
    H: Handler,
{
    let parsed = parse_ws_url(ws_url)?;
    let tcp = TcpStream::connect(&parsed.host_with_port).await?;
    tcp.set_nodelay(true).ok();

    let mut socket = if parsed.use_tls {
        let tls_config = client_tls_config();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = pki_types::ServerName::try_from(parsed.host.clone())?.to_owned();
        let tls_stream = connector.connect(server_name, tcp).await?;
        SocketFlowStream::SecureClient(Box::new(tls_stream))
    } else {
        SocketFlowStream::Plain(tcp)
    };

    client_upgrade(&mut socket, &parsed).await?;
    Ok(Connection::new(
        socket,
        Role::Client,
        config.web_socket_config,
        handler,
    ))
}

fn client_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_value_matches_the_rfc_6455_worked_example() {
        // The example key/accept pair straight out of RFC 6455 §1.3.
        assert_eq!(
            accept_value_for("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn client_request_uses_the_path_and_host_from_the_url() {
        let parsed = parse_ws_url("wss://example.com:9000/chat?x=1").unwrap();
        let request = build_client_request(&parsed, "abc");
        assert!(request.starts_with("GET /chat?x=1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com:9000\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: abc\r\n"));
        assert_eq!(parsed.host_with_port, "example.com:9000");
        assert!(parsed.use_tls);
    }

    #[test]
    fn non_websocket_scheme_is_rejected() {
        assert!(matches!(
            parse_ws_url("http://example.com/"),
            Err(Error::InvalidSchemeURL)
        ));
    }

    #[tokio::test]
    async fn server_handshake_never_terminated_is_bounded_by_max_buffer() {
        use tokio::io::duplex;

        let (mut test_side, mut conn_side) = duplex(64 * 1024);
        let writer = tokio::spawn(async move {
            // Never send a blank-line terminator; keep streaming bytes past MAX_BUFFER.
            let chunk = vec![b'a'; 4096];
            for _ in 0..300 {
                if test_side.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let result = server_upgrade(&mut conn_side).await;
        assert!(matches!(result, Err(Error::BufferExceeded)));
        writer.abort();
    }

    #[tokio::test]
    async fn client_handshake_never_terminated_is_bounded_by_max_buffer() {
        use tokio::io::duplex;

        let (mut test_side, mut conn_side) = duplex(64 * 1024);
        let writer = tokio::spawn(async move {
            let chunk = vec![b'a'; 4096];
            for _ in 0..300 {
                if test_side.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let parsed = parse_ws_url("ws://example.com/").unwrap();
        let result = client_upgrade(&mut conn_side, &parsed).await;
        assert!(matches!(result, Err(Error::BufferExceeded)));
        writer.abort();
    }

    #[test]
    fn header_token_matching_is_case_insensitive_and_comma_aware() {
        assert!(header_contains_token("Upgrade, keep-alive", "upgrade"));
        assert!(header_contains_token("WEBSOCKET", "websocket"));
        assert!(!header_contains_token("keep-alive", "upgrade"));
    }
}
