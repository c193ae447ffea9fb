// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ConnectAckPacket, ConnectPacket, ConnectReasonCode, DisconnectPacket, ProtocolLevel};

use crate::arena::Arena;
use crate::auth;
use crate::constants::NIL_OFFSET;
use crate::context::Context;
use crate::dispatcher::PacketStatus;
use crate::error::{Error, ErrorKind};

/// Per-connection session state decoded from CONNECT.
///
/// Identity strings live in the client arena; the record holds offsets.
/// Will topic and message are parsed and stored but never dispatched:
/// will delivery on abrupt disconnect is outside this broker's scope.
#[derive(Debug, Clone, Copy)]
pub struct ClientRecord {
    pub connect_flags: u8,
    pub keepalive: u16,
    pub protocol_level: u8,

    pub client_id_offset: u32,
    pub client_id_len: u16,
    pub username_offset: u32,
    pub username_len: u16,
    pub password_offset: u32,
    pub password_len: u16,
    pub will_topic_offset: u32,
    pub will_topic_len: u16,
    pub will_message_offset: u32,
    pub will_message_len: u16,
}

impl ClientRecord {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            connect_flags: 0,
            keepalive: 0,
            protocol_level: 0,
            client_id_offset: NIL_OFFSET,
            client_id_len: 0,
            username_offset: NIL_OFFSET,
            username_len: 0,
            password_offset: NIL_OFFSET,
            password_len: 0,
            will_topic_offset: NIL_OFFSET,
            will_topic_len: 0,
            will_message_offset: NIL_OFFSET,
            will_message_len: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::empty();
    }

    /// Client identifier bytes, borrowed from the client arena.
    #[must_use]
    pub fn client_id<'a>(&self, arena: &'a Arena) -> &'a [u8] {
        if self.client_id_offset == NIL_OFFSET {
            return &[];
        }
        arena.at(self.client_id_offset, usize::from(self.client_id_len))
    }
}

fn store_field(arena: &mut Arena, data: Option<&[u8]>) -> Result<(u32, u16), Error> {
    match data {
        None => Ok((NIL_OFFSET, 0)),
        Some(bytes) => Ok((arena.alloc_from(bytes)?, bytes.len() as u16)),
    }
}

/// Apply a decoded CONNECT to the connection's session.
///
/// A second CONNECT on a connected session is a protocol violation and
/// closes the connection without a reply [MQTT-3.1.0-2].
///
/// # Errors
///
/// Only fatal errors propagate; protocol violations are reported through
/// the returned [`PacketStatus`].
pub fn on_connect(
    ctx: &mut Context,
    conn_id: u16,
    packet: &ConnectPacket<'_>,
) -> Result<PacketStatus, Error> {
    if ctx.connections[usize::from(conn_id)].connected {
        log::info!("session: received double CONNECT, disconnecting client");
        return Ok(PacketStatus::Disconnect);
    }

    if !auth::authenticate(packet.username(), packet.password()) {
        ctx.reply(
            conn_id,
            &ConnectAckPacket::new(false, ConnectReasonCode::NotAuthorized),
        );
        return Ok(PacketStatus::Disconnect);
    }

    let fields = (|| -> Result<[(u32, u16); 5], Error> {
        let arena = &mut ctx.client_arena;
        Ok([
            store_field(arena, Some(packet.client_id()))?,
            store_field(arena, packet.username())?,
            store_field(arena, packet.password())?,
            store_field(arena, packet.will_topic())?,
            store_field(arena, packet.will_message())?,
        ])
    })();
    let fields = match fields {
        Ok(fields) => fields,
        Err(err) if err.kind() == ErrorKind::OutOfMemory => {
            log::warn!("session: client arena exhausted, refusing connection");
            ctx.reply(
                conn_id,
                &ConnectAckPacket::new(false, ConnectReasonCode::ServerUnavailable),
            );
            return Ok(PacketStatus::Disconnect);
        }
        Err(err) => return Err(err),
    };

    let [client_id, username, password, will_topic, will_message] = fields;
    let record = &mut ctx.clients[usize::from(conn_id)];
    record.connect_flags = packet.connect_flags().bits();
    record.keepalive = packet.keepalive();
    record.protocol_level = ProtocolLevel::V5 as u8;
    (record.client_id_offset, record.client_id_len) = client_id;
    (record.username_offset, record.username_len) = username;
    (record.password_offset, record.password_len) = password;
    (record.will_topic_offset, record.will_topic_len) = will_topic;
    (record.will_message_offset, record.will_message_len) = will_message;

    ctx.connections[usize::from(conn_id)].connected = true;

    log::info!(
        "recv: CONNECT (c{} k{})",
        packet.connect_flags().bits(),
        packet.keepalive()
    );

    ctx.reply(
        conn_id,
        &ConnectAckPacket::new(false, ConnectReasonCode::Success),
    );
    log::info!("sent: CONNACK sp: 0 rc: 0x00");
    Ok(PacketStatus::Continue)
}

/// Handle a DISCONNECT packet. The connection is always shut down; the
/// caller clears subscriptions as part of teardown.
#[must_use]
pub fn on_disconnect(packet: &DisconnectPacket) -> PacketStatus {
    log::info!("recv: DISCONNECT rc: {:#04x}", packet.reason_code());
    PacketStatus::Disconnect
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_record_reset() {
        let mut arena = Arena::new(64);
        let mut record = ClientRecord::empty();
        let (offset, len) = store_field(&mut arena, Some(&b"c1"[..])).unwrap();
        record.client_id_offset = offset;
        record.client_id_len = len;
        assert_eq!(record.client_id(&arena), b"c1");

        record.reset();
        assert_eq!(record.client_id(&arena), b"");
    }
}
