// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Receive-buffer framing and per-type packet dispatch.
//!
//! Decoding works on the bytes of exactly one complete packet, copied out
//! of the receive buffer into a stack scratch region. The receive cursor
//! only advances once a complete packet is present, so a partial packet
//! leaves the buffer untouched for the next readability event.

use codec::{
    ByteArray, ConnectAckPacket, ConnectPacket, ConnectReasonCode, DecodeError, DecodePacket,
    DisconnectPacket, FixedHeader, PacketType, PingRequestPacket, PingResponsePacket,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, SubscribePacket, UnsubscribePacket,
};

use crate::constants::MAX_PACKET_SIZE;
use crate::context::Context;
use crate::error::Error;
use crate::{delivery, publish, session, subscribe};

/// What the connection should do after a packet was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// Keep the connection going.
    Continue,

    /// Shut the connection down: protocol violation, malformed packet or
    /// an orderly DISCONNECT.
    Disconnect,
}

/// Decode and dispatch every complete packet in the connection's receive
/// buffer.
///
/// Stops early when the buffer holds a partial packet (`Continue`, retry
/// on next readability) or when a handler asks for connection shutdown
/// (`Disconnect`).
///
/// # Errors
///
/// Only fatal errors propagate; everything protocol-level is folded into
/// the returned [`PacketStatus`].
pub fn process_incoming(ctx: &mut Context, conn_id: u16, now: u64) -> Result<PacketStatus, Error> {
    let mut scratch = [0u8; MAX_PACKET_SIZE];

    loop {
        let (packet_type, total) = {
            let conn = &ctx.connections[usize::from(conn_id)];
            let readable = conn.recv_buffer.readable();
            if readable.is_empty() {
                return Ok(PacketStatus::Continue);
            }

            let mut ba = ByteArray::new(readable);
            let header = match FixedHeader::decode(&mut ba) {
                Ok(header) => header,
                Err(DecodeError::Incomplete) => return Ok(PacketStatus::Continue),
                Err(err) => {
                    log::error!("dispatcher: malformed fixed header, {err}");
                    return Ok(PacketStatus::Disconnect);
                }
            };
            if header.packet_bytes() > readable.len() {
                // Body still arriving; the read position stays put.
                return Ok(PacketStatus::Continue);
            }
            (header.packet_type(), header.packet_bytes())
        };

        scratch[..total].copy_from_slice(
            &ctx.connections[usize::from(conn_id)].recv_buffer.readable()[..total],
        );
        ctx.connections[usize::from(conn_id)]
            .recv_buffer
            .advance_read(total);

        // The first packet on a connection must be CONNECT [MQTT-3.1.0-1].
        if !ctx.connections[usize::from(conn_id)].connected
            && !matches!(packet_type, PacketType::Connect)
        {
            log::error!("dispatcher: {packet_type:?} before CONNECT");
            return Ok(PacketStatus::Disconnect);
        }

        let status = dispatch(ctx, conn_id, now, packet_type, &scratch[..total])?;
        if status == PacketStatus::Disconnect {
            return Ok(PacketStatus::Disconnect);
        }
    }
}

fn dispatch(
    ctx: &mut Context,
    conn_id: u16,
    now: u64,
    packet_type: PacketType,
    packet_bytes: &[u8],
) -> Result<PacketStatus, Error> {
    let mut ba = ByteArray::new(packet_bytes);

    match packet_type {
        PacketType::Connect => match ConnectPacket::decode(&mut ba) {
            Ok(packet) => session::on_connect(ctx, conn_id, &packet),
            Err(DecodeError::InvalidProtocolLevel) => {
                log::error!("dispatcher: unsupported protocol version");
                ctx.reply(
                    conn_id,
                    &ConnectAckPacket::new(false, ConnectReasonCode::UnsupportedProtocolVersion),
                );
                Ok(PacketStatus::Disconnect)
            }
            Err(err) => {
                log::error!("dispatcher: malformed CONNECT, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::Publish { .. } => match PublishPacket::decode(&mut ba) {
            Ok(packet) => publish::on_publish(ctx, conn_id, now, &packet),
            Err(err) => {
                log::error!("dispatcher: malformed PUBLISH, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::PublishAck => match PublishAckPacket::decode(&mut ba) {
            Ok(packet) => Ok(delivery::on_puback(ctx, conn_id, packet.packet_id())),
            Err(err) => {
                log::error!("dispatcher: malformed PUBACK, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::PublishReceived => match PublishReceivedPacket::decode(&mut ba) {
            Ok(packet) => Ok(delivery::on_pubrec(ctx, conn_id, now, packet.packet_id())),
            Err(err) => {
                log::error!("dispatcher: malformed PUBREC, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::PublishRelease => match PublishReleasePacket::decode(&mut ba) {
            Ok(packet) => delivery::on_pubrel(ctx, conn_id, now, packet.packet_id()),
            Err(err) => {
                log::error!("dispatcher: malformed PUBREL, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::PublishComplete => match PublishCompletePacket::decode(&mut ba) {
            Ok(packet) => Ok(delivery::on_pubcomp(ctx, conn_id, packet.packet_id())),
            Err(err) => {
                log::error!("dispatcher: malformed PUBCOMP, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::Subscribe => match SubscribePacket::decode(&mut ba) {
            Ok(packet) => subscribe::on_subscribe(ctx, conn_id, &packet),
            Err(err) => {
                log::error!("dispatcher: malformed SUBSCRIBE, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::Unsubscribe => match UnsubscribePacket::decode(&mut ba) {
            Ok(packet) => subscribe::on_unsubscribe(ctx, conn_id, &packet),
            Err(err) => {
                log::error!("dispatcher: malformed UNSUBSCRIBE, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::PingRequest => match PingRequestPacket::decode(&mut ba) {
            Ok(_packet) => {
                log::info!("recv: PINGREQ");
                ctx.reply(conn_id, &PingResponsePacket);
                log::info!("sent: PINGRESP");
                Ok(PacketStatus::Continue)
            }
            Err(err) => {
                log::error!("dispatcher: malformed PINGREQ, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        PacketType::Disconnect => match DisconnectPacket::decode(&mut ba) {
            Ok(packet) => Ok(session::on_disconnect(&packet)),
            Err(err) => {
                log::error!("dispatcher: malformed DISCONNECT, {err}");
                Ok(PacketStatus::Disconnect)
            }
        },

        // Server-to-client packets are never expected on an inbound
        // stream; drop whatever else is queued and carry on.
        PacketType::ConnectAck
        | PacketType::SubscribeAck
        | PacketType::UnsubscribeAck
        | PacketType::PingResponse => {
            log::error!("dispatcher: unexpected {packet_type:?}, skipping buffered bytes");
            let recv = &mut ctx.connections[usize::from(conn_id)].recv_buffer;
            let pending = recv.available();
            let _ = recv.skip(pending);
            Ok(PacketStatus::Continue)
        }
    }
}
