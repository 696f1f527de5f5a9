/*
 * server.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gumdrop, a multi-protocol internet server.
 *
 * Gumdrop is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gumdrop is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gumdrop.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Server assembly: bind the configured listeners, accept on a dedicated
//! thread per listener, hand each connection to a worker picked
//! round-robin. The connection stays with that worker for its whole life.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::config::ServerConfig;
use crate::protocol::http::h1::H1Connection;
use crate::protocol::http::handler::RequestHandlerFactory;
use crate::protocol::websocket::WebSocketHandlerFactory;
use crate::protocol::{ProtocolHandler, ServiceContext};
use crate::reactor::connection::Connection;
use crate::reactor::tls::TlsPump;
use crate::reactor::{Endpoint, Reactor, TimerService};

const LISTEN_TOKEN: Token = Token(0);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct ListenerRuntime {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

/// A running server. Dropping it does not stop it; call `shutdown`.
pub struct Server {
    reactor: Arc<Reactor>,
    timer: Arc<TimerService>,
    listeners: Vec<ListenerRuntime>,
}

impl Server {
    /// Bind all listeners and start accepting. The request handler
    /// factory serves every listener; the WebSocket factory is optional.
    pub fn start(
        config: ServerConfig,
        request_handlers: Arc<dyn RequestHandlerFactory>,
        websocket_handlers: Option<Arc<dyn WebSocketHandlerFactory>>,
    ) -> io::Result<Server> {
        if config.listeners.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no listeners configured",
            ));
        }
        let reactor = Arc::new(Reactor::new(config.workers)?);
        let timer = TimerService::start()?;
        let mut listeners = Vec::with_capacity(config.listeners.len());

        for listener_config in &config.listeners {
            if listener_config.secure && listener_config.tls.is_none() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "secure listener without TLS material",
                ));
            }
            let addr = SocketAddr::new(listener_config.address, listener_config.port);
            let mut socket = TcpListener::bind(addr)?;
            let local_addr = socket.local_addr()?;
            info!(
                "listening on {}{}",
                local_addr,
                if listener_config.secure { " (tls)" } else { "" }
            );

            let ctx = Arc::new(ServiceContext {
                config: listener_config.clone(),
                request_handlers: request_handlers.clone(),
                websocket_handlers: websocket_handlers.clone(),
            });
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let thread_reactor = reactor.clone();
            let thread_timer = timer.clone();

            let poll = Poll::new()?;
            poll.registry()
                .register(&mut socket, LISTEN_TOKEN, Interest::READABLE)?;

            let join = thread::Builder::new()
                .name(format!("gumdrop-listener-{}", local_addr.port()))
                .spawn(move || {
                    accept_loop(poll, socket, ctx, thread_reactor, thread_timer, thread_stop)
                })?;
            listeners.push(ListenerRuntime {
                local_addr,
                stop,
                join: Some(join),
            });
        }

        Ok(Server {
            reactor,
            timer,
            listeners,
        })
    }

    /// Bound addresses, one per listener (useful with port 0).
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr).collect()
    }

    /// Stop accepting, drop live connections, stop workers and timers.
    pub fn shutdown(mut self) {
        for listener in &mut self.listeners {
            listener.stop.store(true, Ordering::Relaxed);
        }
        for listener in &mut self.listeners {
            if let Some(join) = listener.join.take() {
                let _ = join.join();
            }
        }
        self.reactor.shutdown();
        self.timer.shutdown();
    }
}

fn accept_loop(
    mut poll: Poll,
    socket: TcpListener,
    ctx: Arc<ServiceContext>,
    reactor: Arc<Reactor>,
    timer: Arc<TimerService>,
    stop: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(64);
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = poll.poll(&mut events, Some(ACCEPT_POLL_INTERVAL)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("listener poll failed: {}", e);
            return;
        }
        loop {
            match socket.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = dispatch(&ctx, &reactor, &timer, stream, peer) {
                        warn!("failed to set up connection from {}: {}", peer, e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Resource errors (fd exhaustion): log, keep accepting.
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

/// Pick a worker round-robin and hand it the new connection.
fn dispatch(
    ctx: &Arc<ServiceContext>,
    reactor: &Arc<Reactor>,
    timer: &Arc<TimerService>,
    stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    debug!("accepted {}", peer);
    let worker = reactor.assign();
    let endpoint = Endpoint::new(worker.clone(), timer.clone(), peer, ctx.config.secure);

    let tls = match &ctx.config.tls {
        Some(tls_config) if ctx.config.secure => Some(TlsPump::new(tls_config.clone())?),
        _ => None,
    };
    let handshaking = tls.is_some();

    let handler: Box<dyn ProtocolHandler> = Box::new(H1Connection::new(ctx.clone()));
    let conn = Connection::new(stream, peer, tls, handler, endpoint.clone());

    if handshaking {
        // Connections that never finish their TLS handshake are dropped.
        let deadline_endpoint = endpoint.clone();
        timer.schedule(
            ctx.config.handshake_timeout,
            worker.clone(),
            Box::new(move |state| {
                if deadline_endpoint.is_closed() {
                    return;
                }
                let token = deadline_endpoint.token();
                if let Some(conn) = state.connections.get(token) {
                    if conn.is_handshaking() {
                        debug!("TLS handshake timeout");
                        state.drop_connection(token);
                    }
                }
            }),
        );
    }

    worker.submit(Box::new(move |state| state.attach(conn)));
    Ok(())
}
