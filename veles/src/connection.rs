// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::{self, Read, Write};

use mio::net::TcpStream;

use codec::{Buffer, EncodePacket};

use crate::constants::{MAX_PACKET_SIZE, NIL};

/// Outcome of moving bytes between a socket and a connection buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportResult {
    /// The socket has no more bytes to give or take right now.
    WouldBlock,

    /// The receive buffer filled up before the socket ran dry; decode and
    /// come back.
    BufferFull,

    /// Peer closed or the socket failed; shut the connection down.
    Disconnect,
}

/// One accepted socket and its buffers.
///
/// Slots are preallocated for every possible client at startup; `open`
/// tracks whether the slot is in use and `connected` whether a CONNECT
/// completed on it. The send buffer is only appended to from the event
/// loop turn and drained before the loop blocks again.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    pub open: bool,
    pub connected: bool,
    pub recv_buffer: Buffer,
    pub send_buffer: Buffer,
    pub(crate) next_free: u16,
}

impl Connection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: None,
            open: false,
            connected: false,
            recv_buffer: Buffer::new(MAX_PACKET_SIZE),
            send_buffer: Buffer::new(MAX_PACKET_SIZE),
            next_free: NIL,
        }
    }

    /// Attach the accepted socket to an open slot.
    pub fn attach(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
    }

    /// Detach the socket, leaving the slot to be recycled.
    pub fn detach(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }

    #[must_use]
    pub const fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Read everything the socket currently has into the receive buffer.
    ///
    /// Readiness is edge-notified, so this keeps reading until the socket
    /// would block or the buffer fills up.
    pub fn fill_recv_buffer(&mut self) -> TransportResult {
        let Some(stream) = self.stream.as_mut() else {
            return TransportResult::WouldBlock;
        };

        self.recv_buffer.compact();
        loop {
            let spare = self.recv_buffer.spare_mut();
            if spare.is_empty() {
                return TransportResult::BufferFull;
            }
            match stream.read(spare) {
                Ok(0) => return TransportResult::Disconnect,
                Ok(n) => self.recv_buffer.advance_write(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return TransportResult::WouldBlock;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    log::warn!("connection: read failed, {err}");
                    return TransportResult::Disconnect;
                }
            }
        }
    }

    /// Write as much of the send buffer as the socket accepts. Remaining
    /// bytes stay queued for the next tick.
    pub fn drain_send_buffer(&mut self) -> TransportResult {
        let Some(stream) = self.stream.as_mut() else {
            return TransportResult::WouldBlock;
        };

        while !self.send_buffer.is_empty() {
            match stream.write(self.send_buffer.readable()) {
                Ok(0) => return TransportResult::Disconnect,
                Ok(n) => self.send_buffer.advance_read(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return TransportResult::WouldBlock;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    log::warn!("connection: write failed, {err}");
                    return TransportResult::Disconnect;
                }
            }
        }
        TransportResult::WouldBlock
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize `packet` into `scratch` and append it to the connection's
/// send buffer if it fits whole.
///
/// Packets are never split: a send buffer without room for the full packet
/// drops this copy, which is the back-pressure policy for slow
/// subscribers.
pub fn queue_packet<P: EncodePacket>(
    scratch: &mut Buffer,
    conn: &mut Connection,
    packet: &P,
) -> bool {
    scratch.reset();
    if let Err(err) = packet.encode(scratch) {
        log::warn!("connection: encode failed, {err}");
        return false;
    }
    if conn.send_buffer.append(scratch.readable()).is_err() {
        log::warn!(
            "connection: send buffer full, dropping {} bytes",
            scratch.available()
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::PingResponsePacket;

    #[test]
    fn test_queue_packet() {
        let mut scratch = Buffer::new(MAX_PACKET_SIZE);
        let mut conn = Connection::new();
        conn.open = true;
        assert!(queue_packet(&mut scratch, &mut conn, &PingResponsePacket));
        assert_eq!(conn.send_buffer.readable(), &[0xd0, 0x00]);
    }

    #[test]
    fn test_queue_packet_drops_when_full() {
        let mut scratch = Buffer::new(MAX_PACKET_SIZE);
        let mut conn = Connection::new();
        conn.open = true;
        let filler = vec![0u8; MAX_PACKET_SIZE - 1];
        conn.send_buffer.append(&filler).unwrap();
        assert!(!queue_packet(&mut scratch, &mut conn, &PingResponsePacket));
        // The queued bytes are untouched.
        assert_eq!(conn.send_buffer.available(), MAX_PACKET_SIZE - 1);
    }
}
