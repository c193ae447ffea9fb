// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    topic, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket,
    SUBACK_UNSPECIFIED_ERROR, UNSUBACK_NO_SUBSCRIPTION_EXISTED, UNSUBACK_SUCCESS,
};

use crate::constants::MAX_SUBSCRIBE_TOPICS;
use crate::context::Context;
use crate::dispatcher::PacketStatus;
use crate::error::{Error, ErrorKind};

/// Store the filters of a SUBSCRIBE and answer with per-filter reason
/// codes.
///
/// A filter failing the wildcard syntax rules, a requested QoS above 2, or
/// slot/arena exhaustion all degrade to `SUBACK_UNSPECIFIED_ERROR` for
/// that entry; only a malformed packet closes the connection.
///
/// # Errors
///
/// Only fatal errors propagate.
pub fn on_subscribe(
    ctx: &mut Context,
    conn_id: u16,
    packet: &SubscribePacket<'_>,
) -> Result<PacketStatus, Error> {
    if packet.topic_count() > MAX_SUBSCRIBE_TOPICS {
        log::error!(
            "subscribe: {} filters exceeds the per-packet bound",
            packet.topic_count()
        );
        return Ok(PacketStatus::Disconnect);
    }

    let subscription_id = packet.subscription_id().unwrap_or(0);
    let mut reason_codes = [0u8; MAX_SUBSCRIBE_TOPICS];
    let mut count = 0;

    for entry in packet.topics() {
        reason_codes[count] = subscribe_one(ctx, conn_id, subscription_id, &entry)?;
        log::info!(
            "recv: SUBSCRIBE id: {} sid: {} cid: {} qos: {} rc: {:#04x}",
            packet.packet_id(),
            subscription_id,
            conn_id,
            entry.qos_bits(),
            reason_codes[count]
        );
        count += 1;
    }

    let ack = SubscribeAckPacket::new(packet.packet_id(), &reason_codes[..count]);
    ctx.reply(conn_id, &ack);
    log::info!(
        "sent: SUBACK packet_id: {} topics: {}",
        packet.packet_id(),
        count
    );
    Ok(PacketStatus::Continue)
}

fn subscribe_one(
    ctx: &mut Context,
    conn_id: u16,
    subscription_id: u32,
    entry: &codec::SubscribeTopic<'_>,
) -> Result<u8, Error> {
    let Ok(kind) = topic::validate_filter(entry.filter()) else {
        return Ok(SUBACK_UNSPECIFIED_ERROR);
    };
    let qos = entry.qos_bits();
    if qos > 2 {
        return Ok(SUBACK_UNSPECIFIED_ERROR);
    }

    let Some(index) = ctx.alloc_subscription() else {
        log::warn!("subscribe: subscription table exhausted");
        return Ok(SUBACK_UNSPECIFIED_ERROR);
    };

    let topic_offset = match ctx.topic_arena.alloc_from(entry.filter()) {
        Ok(offset) => offset,
        Err(err) if err.kind() == ErrorKind::OutOfMemory => {
            log::warn!("subscribe: topic arena exhausted");
            ctx.release_subscription(index);
            return Ok(SUBACK_UNSPECIFIED_ERROR);
        }
        Err(err) => return Err(err),
    };

    let sub = &mut ctx.subscriptions[usize::from(index)];
    sub.client_id = conn_id;
    sub.topic_offset = topic_offset;
    sub.topic_len = entry.filter().len() as u16;
    sub.kind = kind;
    sub.options = entry.options();
    sub.subscription_id = subscription_id;

    Ok(qos)
}

/// Clear the client's subscriptions matching each UNSUBSCRIBE filter and
/// answer with per-filter reason codes.
///
/// # Errors
///
/// Only fatal errors propagate.
pub fn on_unsubscribe(
    ctx: &mut Context,
    conn_id: u16,
    packet: &UnsubscribePacket<'_>,
) -> Result<PacketStatus, Error> {
    if packet.filter_count() > MAX_SUBSCRIBE_TOPICS {
        log::error!(
            "unsubscribe: {} filters exceeds the per-packet bound",
            packet.filter_count()
        );
        return Ok(PacketStatus::Disconnect);
    }

    let mut reason_codes = [0u8; MAX_SUBSCRIBE_TOPICS];
    let mut count = 0;

    for filter in packet.filters() {
        let mut removed = false;
        for index in 0..ctx.subscriptions.len() {
            let sub = &ctx.subscriptions[index];
            if !sub.active || sub.client_id != conn_id {
                continue;
            }
            let stored = ctx
                .topic_arena
                .at(sub.topic_offset, usize::from(sub.topic_len));
            if stored == filter {
                ctx.release_subscription(index as u16);
                removed = true;
            }
        }
        reason_codes[count] = if removed {
            UNSUBACK_SUCCESS
        } else {
            UNSUBACK_NO_SUBSCRIPTION_EXISTED
        };
        log::info!(
            "recv: UNSUBSCRIBE cid: {} rc: {:#04x}",
            conn_id,
            reason_codes[count]
        );
        count += 1;
    }

    let ack = UnsubscribeAckPacket::new(packet.packet_id(), &reason_codes[..count]);
    ctx.reply(conn_id, &ack);
    log::info!(
        "sent: UNSUBACK packet_id: {} filters: {}",
        packet.packet_id(),
        count
    );
    Ok(PacketStatus::Continue)
}
