//! HTTP surface used by the browser control page.
//!
//! - `GET /cmd?c=<char>`: dispatch one command, reply with the vehicle state
//! - `GET /status`: vehicle state, polled by the page for liveness
//! - `GET /ports`: ranked serial ports
//! - `GET /connect?port=<id>`: open a specific port
//! - `GET /disconnect`: close the link

use log::{debug, error, info, warn};
use rcdrive_protocol::Command;
use serde::Serialize;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::PortCandidate;
use crate::http::{HttpError, Request, Response};
use crate::link::LinkClient;
use crate::state::{VehicleState, VehicleStateStore};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
/// Connections served at once; further clients get a 503
pub const MAX_CLIENTS: usize = 16;

/// Everything a request handler needs
pub struct AppContext {
    pub state: Arc<VehicleStateStore>,
    pub link: LinkClient,
}

/// `/cmd` reply: the vehicle state, plus the reason if the command failed
#[derive(Serialize)]
struct CommandResponse {
    #[serde(flatten)]
    state: VehicleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `/connect` and `/disconnect` reply
#[derive(Serialize)]
struct ConnectResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Route one parsed request
pub fn route(ctx: &AppContext, req: &Request) -> Response {
    if req.method != "GET" {
        debug!("HTTP: {} {} -> 405", req.method, req.path);
        return Response::error(405, "method not allowed");
    }

    match req.path.as_str() {
        "/cmd" => handle_cmd(ctx, req),
        "/status" => {
            debug!("HTTP: GET /status");
            Response::ok_json(&ctx.state.snapshot())
        }
        "/ports" => {
            info!("HTTP: GET /ports");
            let ports: Vec<PortCandidate> = ctx.link.discover();
            Response::ok_json(&ports)
        }
        "/connect" => handle_connect(ctx, req),
        "/disconnect" => {
            info!("HTTP: GET /disconnect");
            let response = match ctx.link.disconnect() {
                Ok(()) => ConnectResponse {
                    success: true,
                    port: None,
                    error: None,
                },
                Err(e) => ConnectResponse {
                    success: false,
                    port: None,
                    error: Some(e.to_string()),
                },
            };
            Response::ok_json(&response)
        }
        _ => {
            info!("HTTP: GET {} -> 404", req.path);
            Response::error(404, "not found")
        }
    }
}

fn handle_cmd(ctx: &AppContext, req: &Request) -> Response {
    let raw = req.param("c").unwrap_or("");
    debug!("HTTP: GET /cmd c={raw:?}");

    let error = match Command::from_query(raw) {
        Some(command) => ctx.link.dispatch(command).err().map(|e| {
            warn!("HTTP: command {command} failed: {e}");
            e.to_string()
        }),
        None => {
            if !raw.is_empty() {
                debug!("HTTP: ignoring unrecognized command {raw:?}");
            }
            None
        }
    };

    Response::ok_json(&CommandResponse {
        state: ctx.state.snapshot(),
        error,
    })
}

fn handle_connect(ctx: &AppContext, req: &Request) -> Response {
    let port = req.param("port").map(str::trim).unwrap_or("");
    info!("HTTP: GET /connect port={port:?}");

    let response = match ctx.link.connect(port) {
        Ok(()) => ConnectResponse {
            success: true,
            port: Some(port.to_string()),
            error: None,
        },
        Err(e) => ConnectResponse {
            success: false,
            port: None,
            error: Some(e.to_string()),
        },
    };
    Response::ok_json(&response)
}

/// Serve one connection: read a request, answer it, close
fn handle_connection(mut stream: TcpStream, ctx: &AppContext) {
    if let Err(e) = stream
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .and_then(|()| stream.set_write_timeout(Some(CLIENT_TIMEOUT)))
    {
        warn!("HTTP: failed to set socket timeouts: {e}");
        return;
    }

    let response = match Request::read_from(&mut stream) {
        Ok(req) => route(ctx, &req),
        Err(HttpError::Empty) => {
            debug!("HTTP: client closed without a request");
            return;
        }
        Err(HttpError::Io(e)) => {
            debug!("HTTP: read failed: {e}");
            return;
        }
        Err(e @ HttpError::Malformed) => Response::error(400, &e.to_string()),
        Err(e @ HttpError::TooLarge) => Response::error(413, &e.to_string()),
    };

    if let Err(e) = response.write_to(&mut stream) {
        debug!("HTTP: failed to write response: {e}");
    }
}

/// Held by a client thread for as long as it serves its connection
struct ClientSlot(Arc<AtomicUsize>);

impl ClientSlot {
    fn acquire(active: &Arc<AtomicUsize>, max_clients: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_clients).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(active.clone()))
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn reject_busy(mut stream: TcpStream) {
    warn!("HTTP: too many clients, rejecting connection");
    let _ = stream.set_write_timeout(Some(CLIENT_TIMEOUT));
    if let Err(e) = Response::error(503, "server busy").write_to(&mut stream) {
        debug!("HTTP: failed to write busy response: {e}");
    }
}

/// Accept connections forever, one thread per connection up to [`MAX_CLIENTS`]
pub fn serve(listener: &TcpListener, ctx: &Arc<AppContext>) {
    serve_with_limit(listener, ctx, MAX_CLIENTS);
}

fn serve_with_limit(listener: &TcpListener, ctx: &Arc<AppContext>, max_clients: usize) {
    let active = Arc::new(AtomicUsize::new(0));

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("HTTP: accept error: {e}");
                continue;
            }
        };

        let Some(slot) = ClientSlot::acquire(&active, max_clients) else {
            reject_busy(stream);
            continue;
        };

        let ctx = ctx.clone();
        let spawned = std::thread::Builder::new()
            .name("http-client".into())
            .spawn(move || {
                let _slot = slot;
                handle_connection(stream, &ctx);
            });
        if let Err(e) = spawned {
            error!("HTTP: failed to spawn client thread: {e}");
        }
    }
}

/// Bind `addr` and serve until the process exits
pub fn start_server(ctx: &Arc<AppContext>, addr: SocketAddr) -> io::Result<()> {
    info!("Web server starting on {addr}...");
    let listener = TcpListener::bind(addr)?;
    info!("Web server started on http://{}", listener.local_addr()?);
    serve(&listener, ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{start_link_task, LinkManager, DEFAULT_REQUEST_TIMEOUT};
    use crate::test_utils::MockTransport;
    use crate::transport::PortInfo;
    use serde_json::Value;
    use std::io::{Read, Write};

    fn context(transport: &MockTransport) -> AppContext {
        let state = Arc::new(VehicleStateStore::default());
        let manager = LinkManager::new(transport.clone(), 115_200, state.clone());
        let (link, _handle) = start_link_task(manager, None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        AppContext { state, link }
    }

    fn get(ctx: &AppContext, target: &str) -> (u16, Value) {
        let req = Request::parse(&format!("GET {target} HTTP/1.1\r\n\r\n")).unwrap();
        let response = route(ctx, &req);
        let body = serde_json::from_str(&response.body).unwrap();
        (response.status, body)
    }

    #[test]
    fn test_status_without_ports() {
        let transport = MockTransport::new();
        let ctx = context(&transport);

        let (status, body) = get(&ctx, "/status");
        assert_eq!(status, 200);
        assert_eq!(body["connected"], false);
        assert_eq!(body["port"], "");
        assert_eq!(body["direction"], "STOP");
        assert_eq!(body["speed"], 7);

        let (_, ports) = get(&ctx, "/ports");
        assert_eq!(ports, serde_json::json!([]));
    }

    #[test]
    fn test_connect_and_drive() {
        let transport = MockTransport::new();
        let ctx = context(&transport);

        let (_, body) = get(&ctx, "/connect?port=%2Fdev%2FttyUSB0");
        assert_eq!(body["success"], true);
        assert_eq!(body["port"], "/dev/ttyUSB0");

        get(&ctx, "/cmd?c=x");
        get(&ctx, "/cmd?c=9");
        let (status, body) = get(&ctx, "/cmd?c=s");
        assert_eq!(status, 200);
        assert_eq!(body["direction"], "BACKWARD");
        assert_eq!(body["speed"], 9);
        assert_eq!(body["connected"], true);
        assert!(body.get("error").is_none());
        assert_eq!(transport.written(), b"X9S");
    }

    #[test]
    fn test_garbage_commands_are_noops() {
        let transport = MockTransport::new();
        let ctx = context(&transport);
        get(&ctx, "/connect?port=COM3");

        for target in ["/cmd", "/cmd?c=", "/cmd?c=q", "/cmd?c=ww", "/cmd?c=%FF", "/cmd?x=w"] {
            let (status, body) = get(&ctx, target);
            assert_eq!(status, 200, "{target}");
            assert_eq!(body["direction"], "STOP", "{target}");
            assert!(body.get("error").is_none(), "{target}");
        }
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_cmd_reports_dead_link() {
        let transport = MockTransport::new();
        let ctx = context(&transport);

        let (status, body) = get(&ctx, "/cmd?c=w");
        assert_eq!(status, 200);
        assert_eq!(body["connected"], false);
        assert_eq!(body["direction"], "STOP");
        assert_eq!(body["error"], "serial link is not open");
    }

    #[test]
    fn test_connect_without_port() {
        let transport = MockTransport::new();
        let ctx = context(&transport);

        for target in ["/connect", "/connect?port=", "/connect?port=+"] {
            let (_, body) = get(&ctx, target);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "No port specified");
        }
        assert!(transport.opened().is_empty());
    }

    #[test]
    fn test_connect_failure_reported() {
        let transport = MockTransport::new();
        transport.set_open_error("Permission denied");
        let ctx = context(&transport);

        let (_, body) = get(&ctx, "/connect?port=COM9");
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "failed to open COM9: Permission denied");
        assert!(!ctx.state.is_connected());
    }

    #[test]
    fn test_ports_ranked() {
        let transport = MockTransport::new();
        transport.set_ports(vec![
            PortInfo::new("A", "Bluetooth"),
            PortInfo::new("B", "CH340 serial"),
        ]);
        let ctx = context(&transport);

        let (_, ports) = get(&ctx, "/ports");
        assert_eq!(ports[0]["path"], "B");
        assert_eq!(ports[0]["preferred"], true);
        assert_eq!(ports[1]["path"], "A");
        assert_eq!(ports[1]["preferred"], false);
    }

    #[test]
    fn test_disconnect() {
        let transport = MockTransport::new();
        let ctx = context(&transport);
        get(&ctx, "/connect?port=COM3");
        get(&ctx, "/cmd?c=w");

        let (_, body) = get(&ctx, "/disconnect");
        assert_eq!(body["success"], true);

        let (_, state) = get(&ctx, "/status");
        assert_eq!(state["connected"], false);
        assert_eq!(state["direction"], "FORWARD");
    }

    #[test]
    fn test_unknown_route_and_method() {
        let transport = MockTransport::new();
        let ctx = context(&transport);

        let (status, _) = get(&ctx, "/favicon.ico");
        assert_eq!(status, 404);

        let req = Request::parse("POST /cmd?c=w HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(route(&ctx, &req).status, 405);
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_client_limit() {
        let transport = MockTransport::new();
        let ctx = Arc::new(context(&transport));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || serve_with_limit(&listener, &ctx, 1));

        // Holds the only slot until it sends a request
        let mut idle = TcpStream::connect(addr).unwrap();

        let mut busy = TcpStream::connect(addr).unwrap();
        let mut response = String::new();
        busy.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.ends_with(r#"{"error":"server busy"}"#));

        idle.write_all(b"GET /status HTTP/1.1\r\n\r\n").unwrap();
        let mut response = String::new();
        idle.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

        // Slot is released once the first client is done
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let mut next = TcpStream::connect(addr).unwrap();
            let mut response = String::new();
            // A busy reply may reset the socket before the request is read
            let _ = next
                .write_all(b"GET /status HTTP/1.1\r\n\r\n")
                .and_then(|()| next.read_to_string(&mut response));
            if response.starts_with("HTTP/1.1 200 OK\r\n") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "slot never released");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_serves_over_tcp() {
        let transport = MockTransport::new();
        let ctx = Arc::new(context(&transport));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || serve(&listener, &ctx));

        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json\r\n"));
        assert!(response.ends_with(r#"{"direction":"STOP","speed":7,"connected":false,"port":""}"#));

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"BOGUS\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
