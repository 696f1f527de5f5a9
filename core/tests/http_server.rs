/*
 * http_server.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the HTTP server core over loopback sockets:
 * reactor dispatch, HTTP/1.1 parsing and response ordering, upgrade
 * paths, and the WebSocket echo cycle.
 */

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use gumdrop_core::config::{ListenerConfig, ServerConfig};
use gumdrop_core::protocol::http::handler::{
    NotFoundFactory, RequestHandler, RequestHandlerFactory,
};
use gumdrop_core::protocol::http::{Request, Response, ResponseState};
use gumdrop_core::protocol::websocket::{WebSocketHandler, WsSender};
use gumdrop_core::server::Server;

/// Responds 200 with the request target as body; echoes any request body
/// after it.
#[derive(Default)]
struct EchoHandler {
    target: String,
    body: Vec<u8>,
}

impl RequestHandler for EchoHandler {
    fn headers(&mut self, _state: &ResponseState, request: &Request) {
        self.target = request.target.clone();
    }

    fn request_body_content(&mut self, _state: &ResponseState, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn request_complete(&mut self, state: &ResponseState) {
        let mut payload = self.target.clone().into_bytes();
        if !self.body.is_empty() {
            payload.push(b':');
            payload.extend_from_slice(&self.body);
        }
        state.headers(Response::new(200).header("Content-Type", "text/plain"));
        state.start_response_body();
        state.response_body_content(&payload);
        state.end_response_body();
        state.complete();
    }
}

/// Responds with a large patterned body, to push the write path into
/// partial writes.
struct BigResponseHandler;

impl RequestHandler for BigResponseHandler {
    fn headers(&mut self, _state: &ResponseState, _request: &Request) {}

    fn request_complete(&mut self, state: &ResponseState) {
        let mut body = Vec::with_capacity(2 * 1024 * 1024);
        for i in 0..(2 * 1024 * 1024 / 16) {
            body.extend_from_slice(format!("{:015x}\n", i).as_bytes());
        }
        state.headers(Response::new(200).header("Content-Type", "application/octet-stream"));
        state.start_response_body();
        state.response_body_content(&body);
        state.end_response_body();
        state.complete();
    }
}

struct EchoWs {
    sender: Option<WsSender>,
}

impl WebSocketHandler for EchoWs {
    fn connected(&mut self, sender: &WsSender) {
        self.sender = Some(sender.clone());
    }

    fn text_message(&mut self, data: &str) {
        if let Some(sender) = &self.sender {
            sender.send_text(data);
        }
    }

    fn binary_message(&mut self, data: &[u8]) {
        if let Some(sender) = &self.sender {
            sender.send_binary(data);
        }
    }

    fn closed(&mut self, _code: Option<u16>, _reason: &str) {}
}

fn localhost_listener() -> ListenerConfig {
    let mut listener = ListenerConfig::new(0);
    listener.address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    listener
}

fn start(factory: Arc<dyn RequestHandlerFactory>) -> (Server, SocketAddr) {
    let config = ServerConfig::new().listener(localhost_listener());
    let server = Server::start(config, factory, None).expect("server start");
    let addr = server.local_addrs()[0];
    (server, addr)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

/// Read one HTTP/1.1 response: status line, headers, Content-Length body.
fn read_response(stream: &mut TcpStream) -> (String, HashMap<String, String>, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).expect("read headers");
        assert!(n > 0, "connection closed mid-headers");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap().to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let body_len: usize = headers
        .get("content-length")
        .map(|v| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).expect("read body");
    (status_line, headers, body)
}

#[test]
fn get_unknown_resource_is_404_with_server_and_date() {
    let (server, addr) = start(Arc::new(NotFoundFactory));
    let mut stream = connect(addr);
    stream
        .write_all(b"GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, headers, _body) = read_response(&mut stream);
    assert!(status.starts_with("HTTP/1.1 404"), "got {}", status);
    assert!(headers.contains_key("server"), "Server header missing");
    assert!(headers.contains_key("date"), "Date header missing");
    assert_eq!(headers.get("connection").map(String::as_str), Some("close"));

    // Connection closes after the response.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    server.shutdown();
}

#[test]
fn missing_host_is_400_and_connection_closes() {
    let (server, addr) = start(Arc::new(NotFoundFactory));
    let mut stream = connect(addr);
    stream
        .write_all(b"GET / HTTP/1.1\r\n\r\n")
        .unwrap();
    let (status, _headers, _body) = read_response(&mut stream);
    assert!(status.starts_with("HTTP/1.1 400"), "got {}", status);
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    server.shutdown();
}

#[test]
fn pipelined_requests_answered_in_order() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    stream
        .write_all(
            b"GET /first HTTP/1.1\r\nHost: h\r\n\r\n\
              GET /second HTTP/1.1\r\nHost: h\r\n\r\n\
              GET /third HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
    let bodies: Vec<Vec<u8>> = (0..3).map(|_| read_response(&mut stream).2).collect();
    assert_eq!(bodies[0], b"/first");
    assert_eq!(bodies[1], b"/second");
    assert_eq!(bodies[2], b"/third");
    server.shutdown();
}

#[test]
fn request_split_into_tiny_writes_still_parses() {
    let (server, addr) = start(Arc::new(NotFoundFactory));
    let mut stream = connect(addr);
    let wire = b"GET /slow HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    for chunk in wire.chunks(3) {
        stream.write_all(chunk).unwrap();
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }
    let (status, _, _) = read_response(&mut stream);
    assert!(status.starts_with("HTTP/1.1 404"));
    server.shutdown();
}

#[test]
fn large_response_survives_partial_writes() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(BigResponseHandler) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    stream
        .write_all(b"GET /big HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _headers, body) = read_response(&mut stream);
    assert!(status.starts_with("HTTP/1.1 200"));
    assert_eq!(body.len(), 2 * 1024 * 1024);
    // Verify the pattern arrived intact.
    for (i, line) in body.chunks(16).enumerate() {
        assert_eq!(line, format!("{:015x}\n", i).as_bytes(), "corrupt at line {}", i);
    }
    server.shutdown();
}

#[test]
fn keep_alive_serves_sequential_requests() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    for i in 0..5 {
        let request = format!("GET /req{} HTTP/1.1\r\nHost: h\r\n\r\n", i);
        stream.write_all(request.as_bytes()).unwrap();
        let (status, _, body) = read_response(&mut stream);
        assert!(status.starts_with("HTTP/1.1 200"));
        assert_eq!(body, format!("/req{}", i).into_bytes());
    }
    server.shutdown();
}

#[test]
fn concurrent_connections_each_get_ordered_responses() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);

    let mut joins = Vec::new();
    for client in 0..16 {
        joins.push(std::thread::spawn(move || {
            let mut stream = connect(addr);
            for round in 0..8 {
                let target = format!("/client{}/round{}", client, round);
                let request = format!("GET {} HTTP/1.1\r\nHost: h\r\n\r\n", target);
                stream.write_all(request.as_bytes()).unwrap();
                let (status, _, body) = read_response(&mut stream);
                assert!(status.starts_with("HTTP/1.1 200"));
                assert_eq!(body, target.into_bytes());
            }
        }));
    }
    for join in joins {
        join.join().expect("client thread");
    }
    server.shutdown();
}

#[test]
fn expect_continue_gets_interim_then_final_response() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    stream
        .write_all(
            b"POST /upload HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n",
        )
        .unwrap();
    let (interim, _, interim_body) = read_response(&mut stream);
    assert!(interim.starts_with("HTTP/1.1 100"), "got {}", interim);
    assert!(interim_body.is_empty());

    stream.write_all(b"hello").unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert!(status.starts_with("HTTP/1.1 200"));
    assert_eq!(body, b"/upload:hello");
    server.shutdown();
}

#[test]
fn chunked_request_body_is_delivered() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    stream
        .write_all(
            b"POST /chunked HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
        )
        .unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert!(status.starts_with("HTTP/1.1 200"));
    assert_eq!(body, b"/chunked:Wikipedia");
    server.shutdown();
}

#[test]
fn head_request_gets_headers_but_no_body() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    stream
        .write_all(b"HEAD /thing HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0);
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(head.to_ascii_lowercase().contains("content-length: 6"));

    // No body follows; connection just closes.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty(), "HEAD response carried a body: {:?}", rest);
    server.shutdown();
}

/// Read one HTTP/2 frame header + payload.
fn read_frame(stream: &mut TcpStream) -> (u8, u8, u32, Vec<u8>) {
    let mut header = [0u8; 9];
    stream.read_exact(&mut header).expect("frame header");
    let len = ((header[0] as usize) << 16) | ((header[1] as usize) << 8) | header[2] as usize;
    let frame_type = header[3];
    let flags = header[4];
    let stream_id =
        u32::from_be_bytes([header[5] & 0x7f, header[6], header[7], header[8]]);
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("frame payload");
    (frame_type, flags, stream_id, payload)
}

#[test]
fn h2c_upgrade_switches_protocols_and_answers_on_stream_one() {
    let factory: Arc<dyn RequestHandlerFactory> =
        Arc::new(|| Box::new(EchoHandler::default()) as Box<dyn RequestHandler>);
    let (server, addr) = start(factory);
    let mut stream = connect(addr);
    stream
        .write_all(
            b"GET /upgraded HTTP/1.1\r\nHost: h\r\nConnection: Upgrade, HTTP2-Settings\r\n\
              Upgrade: h2c\r\nHTTP2-Settings: \r\n\r\n",
        )
        .unwrap();

    // 101 first.
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0);
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "got {}", head);
    assert!(head.to_ascii_lowercase().contains("upgrade: h2c"));

    // Client connection preface.
    stream
        .write_all(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n")
        .unwrap();
    stream.write_all(&[0, 0, 0, 4, 0, 0, 0, 0, 0]).unwrap(); // empty SETTINGS

    // Server preface: SETTINGS before anything else.
    let (frame_type, flags, stream_id, _payload) = read_frame(&mut stream);
    assert_eq!(frame_type, 4, "server must speak SETTINGS first");
    assert_eq!(flags & 0x1, 0);
    assert_eq!(stream_id, 0);

    // Then, in some order: SETTINGS ACK, HEADERS + DATA for stream 1.
    let mut got_ack = false;
    let mut got_headers = false;
    let mut body = Vec::new();
    let mut end_of_stream = false;
    while !(end_of_stream && got_ack) {
        let (frame_type, flags, stream_id, payload) = read_frame(&mut stream);
        match frame_type {
            4 => {
                assert_eq!(flags & 0x1, 0x1);
                got_ack = true;
            }
            1 => {
                assert_eq!(stream_id, 1, "response must arrive on stream 1");
                got_headers = true;
            }
            0 => {
                assert_eq!(stream_id, 1);
                body.extend_from_slice(&payload);
                if flags & 0x1 != 0 {
                    end_of_stream = true;
                }
            }
            other => panic!("unexpected frame type {}", other),
        }
    }
    assert!(got_ack);
    assert!(got_headers);
    assert_eq!(body, b"/upgraded");
    server.shutdown();
}

#[test]
fn websocket_upgrade_and_echo() {
    let request_factory: Arc<dyn RequestHandlerFactory> = Arc::new(NotFoundFactory);
    let ws_factory: Arc<dyn gumdrop_core::protocol::websocket::WebSocketHandlerFactory> =
        Arc::new(|| Box::new(EchoWs { sender: None }) as Box<dyn WebSocketHandler>);
    let config = ServerConfig::new().listener(localhost_listener());
    let server = Server::start(config, request_factory, Some(ws_factory)).expect("server start");
    let addr = server.local_addrs()[0];

    let mut stream = connect(addr);
    stream
        .write_all(
            b"GET /chat HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0);
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "got {}", head);
    assert!(
        head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="),
        "bad accept in {}",
        head
    );

    // Masked text frame "Hello" (RFC 6455 §5.7 sample).
    stream
        .write_all(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58])
        .unwrap();

    // Echo comes back unmasked.
    let mut reply = [0u8; 7];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);

    // Close handshake: client close echoed by the server.
    stream
        .write_all(&[0x88, 0x82, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8])
        .unwrap();
    let mut close_reply = [0u8; 2];
    stream.read_exact(&mut close_reply).unwrap();
    assert_eq!(close_reply[0], 0x88);
    server.shutdown();
}
