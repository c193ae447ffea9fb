// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The event loop: accept, receive-decode-dispatch, send-drain, retry
//! sweep. Single-threaded; the only blocking point is the multiplexer
//! wait.

use std::io::{self, Write};
use std::net::SocketAddr;

use mio::net::TcpListener;

use crate::config::Config;
use crate::connection::TransportResult;
use crate::context::Context;
use crate::delivery;
use crate::dispatcher::{self, PacketStatus};
use crate::error::{Error, ErrorKind};
use crate::mux::Multiplexer;
use crate::timeutil::Clock;

const LISTENER_TOKEN: usize = 0;

/// Client tokens are the connection slot index shifted past the listener
/// token.
const TOKEN_BASE: usize = 1;

/// Sent on the raw socket when every connection slot is taken:
/// CONNACK with SERVER_UNAVAILABLE.
const CONNACK_SERVER_UNAVAILABLE: [u8; 5] = [0x20, 0x03, 0x00, 0x88, 0x00];

/// Bind the configured endpoint and run the broker until the process is
/// killed.
///
/// # Errors
///
/// Returns error on bind failure and on fatal conditions (arena
/// exhaustion on the publish path, lookup-table overflow).
pub fn run(config: &Config) -> Result<(), Error> {
    let addr: SocketAddr = config.address().parse().map_err(|err| {
        Error::from_string(
            ErrorKind::ConfigError,
            format!("server: invalid listen address {}, {err}", config.address()),
        )
    })?;
    let mut listener = TcpListener::bind(addr).map_err(|err| {
        Error::from_string(
            ErrorKind::IoError,
            format!("server: failed to bind {addr}, {err}"),
        )
    })?;

    let mut mux = Multiplexer::new()?;
    mux.register(&mut listener, LISTENER_TOKEN, true, false)?;

    let mut ctx = Context::new();
    let clock = Clock::new();
    let mut last_sweep = 0;

    log::info!("server: listening on {addr}");

    loop {
        let now = clock.now_ms();
        mux.wait(wait_timeout(&ctx, now))?;

        let now = clock.now_ms();
        for readiness in mux.readiness() {
            if !readiness.readable {
                continue;
            }
            if readiness.token == LISTENER_TOKEN {
                accept_clients(&mux, &mut ctx, &mut listener, now)?;
            } else {
                let conn_id = (readiness.token - TOKEN_BASE) as u16;
                handle_client(&mux, &mut ctx, conn_id, now)?;
            }
        }

        drain_all(&mux, &mut ctx);

        let now = clock.now_ms();
        if now.saturating_sub(last_sweep) >= ctx.retry.check_interval_ms {
            delivery::sweep(&mut ctx, now)?;
            last_sweep = now;
            drain_all(&mux, &mut ctx);
        }
    }
}

/// Next wake-up: the earliest retry deadline, capped at the sweep
/// period.
fn wait_timeout(ctx: &Context, now: u64) -> i64 {
    let cap = ctx.retry.check_interval_ms;
    let ms = delivery::next_retry_deadline(ctx)
        .map_or(cap, |deadline| deadline.saturating_sub(now).min(cap));
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Accept until the listener would block.
fn accept_clients(
    mux: &Multiplexer,
    ctx: &mut Context,
    listener: &mut TcpListener,
    now: u64,
) -> Result<(), Error> {
    loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                let Some(conn_id) = ctx.connection_open() else {
                    log::warn!("server: connection slots exhausted, refusing {addr}");
                    let _ = stream.write(&CONNACK_SERVER_UNAVAILABLE);
                    continue;
                };
                let token = TOKEN_BASE + usize::from(conn_id);
                if let Err(err) = mux.register(&mut stream, token, true, false) {
                    log::error!("server: failed to register client socket, {err}");
                    ctx.connection_close(conn_id);
                    continue;
                }
                ctx.connections[usize::from(conn_id)].attach(stream);
                log::info!("server: new client connected from {addr}");

                // A first decode pass; the CONNECT may already be queued.
                handle_client(mux, ctx, conn_id, now)?;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                log::error!("server: accept() error: {err}");
                return Ok(());
            }
        }
    }
}

/// Read everything the client socket has, then decode and dispatch every
/// complete packet.
fn handle_client(
    mux: &Multiplexer,
    ctx: &mut Context,
    conn_id: u16,
    now: u64,
) -> Result<(), Error> {
    if usize::from(conn_id) >= ctx.connections.len()
        || !ctx.connections[usize::from(conn_id)].open
    {
        return Ok(());
    }

    loop {
        let transport = ctx.connections[usize::from(conn_id)].fill_recv_buffer();
        let status = dispatcher::process_incoming(ctx, conn_id, now)?;

        if status == PacketStatus::Disconnect {
            close_connection(mux, ctx, conn_id);
            return Ok(());
        }
        match transport {
            TransportResult::Disconnect => {
                close_connection(mux, ctx, conn_id);
                return Ok(());
            }
            TransportResult::WouldBlock => return Ok(()),
            // Some packets were decoded, go read the rest.
            TransportResult::BufferFull => {}
        }
    }
}

/// Write out every non-empty send buffer before blocking again.
fn drain_all(mux: &Multiplexer, ctx: &mut Context) {
    for index in 0..ctx.connections.len() {
        let result = {
            let conn = &mut ctx.connections[index];
            if !conn.open || !conn.has_stream() || conn.send_buffer.is_empty() {
                continue;
            }
            conn.drain_send_buffer()
        };
        if result == TransportResult::Disconnect {
            close_connection(mux, ctx, index as u16);
        }
    }
}

fn close_connection(mux: &Multiplexer, ctx: &mut Context, conn_id: u16) {
    // Flush any final reply, e.g. a CONNACK carrying an error code.
    let _ = ctx.connections[usize::from(conn_id)].drain_send_buffer();
    if let Some(mut stream) = ctx.connection_close(conn_id) {
        if let Err(err) = mux.unregister(&mut stream) {
            log::warn!("server: failed to unregister socket, {err}");
        }
    }
    log::info!("server: client disconnected");
}
