// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{topic, PublishAckPacket, PublishPacket, PublishReceivedPacket, QoS};

use crate::context::{Context, DeliveryState};
use crate::dispatcher::PacketStatus;
use crate::error::Error;

/// Store an inbound PUBLISH and run the delivery flow for its QoS.
///
/// QoS 0 and 1 fan out immediately, and the publisher is acknowledged
/// right after fan-out for QoS 1. QoS 2 is stored and answered with
/// PUBREC; fan-out is deferred until the publisher's PUBREL releases the
/// message.
///
/// # Errors
///
/// Message-arena exhaustion on this path is fatal: the arena does not
/// reclaim and the broker cannot accept further publishes.
pub fn on_publish(
    ctx: &mut Context,
    conn_id: u16,
    now: u64,
    packet: &PublishPacket<'_>,
) -> Result<PacketStatus, Error> {
    log::info!(
        "recv: PUBLISH id: {} dup: {} retain: {} qos: {}",
        packet.packet_id(),
        u8::from(packet.dup()),
        u8::from(packet.retain()),
        packet.qos() as u8
    );

    // A QoS 2 retransmission for an exchange already awaiting PUBREL is
    // answered with PUBREC again and nothing is stored twice.
    if packet.qos() == QoS::ExactOnce
        && ctx
            .find_delivery_in_state(conn_id, packet.packet_id(), DeliveryState::AwaitingPubrel)
            .is_some()
    {
        log::info!("publish: duplicate QoS 2 publish, re-sending PUBREC");
        ctx.reply(conn_id, &PublishReceivedPacket::new(packet.packet_id()));
        log::info!("sent: PUBREC mid: {} rc: 0x00", packet.packet_id());
        return Ok(PacketStatus::Continue);
    }

    // Slot exhaustion drops the publish without an acknowledgement; the
    // publisher retransmits once slots have drained.
    let Some(msg_idx) = ctx.alloc_message() else {
        log::warn!("publish: message slots exhausted, dropping publish");
        return Ok(PacketStatus::Continue);
    };
    let Some(prop_idx) = ctx.alloc_property() else {
        log::warn!("publish: property slots exhausted, dropping publish");
        ctx.release_message_if_idle(msg_idx);
        return Ok(PacketStatus::Continue);
    };

    let topic_offset = ctx.message_arena.alloc_from(packet.topic())?;
    let payload_offset = ctx.message_arena.alloc_from(packet.payload())?;
    ctx.properties[usize::from(prop_idx)].store(packet.properties(), &mut ctx.message_arena)?;

    let msg = &mut ctx.messages[usize::from(msg_idx)];
    msg.packet_id = packet.packet_id();
    msg.publisher = conn_id;
    msg.property_id = prop_idx;
    msg.topic_offset = topic_offset;
    msg.topic_len = packet.topic().len() as u16;
    msg.payload_offset = payload_offset;
    msg.payload_len = packet.payload().len() as u16;
    msg.options = crate::context::PublishedMessage::pack_options(
        packet.retain(),
        packet.qos(),
        packet.dup(),
        true,
    );

    match packet.qos() {
        QoS::AtMostOnce => {
            fan_out(ctx, msg_idx, now)?;
            ctx.release_message_if_idle(msg_idx);
        }
        QoS::AtLeastOnce => {
            fan_out(ctx, msg_idx, now)?;
            ctx.reply(conn_id, &PublishAckPacket::new(packet.packet_id()));
            log::info!("sent: PUBACK mid: {} rc: 0x00", packet.packet_id());
            ctx.release_message_if_idle(msg_idx);
        }
        QoS::ExactOnce => {
            // The publisher-side half of the exchange: remember the message,
            // confirm reception, and hold fan-out until PUBREL.
            let Some(delivery_idx) = ctx.alloc_delivery() else {
                log::warn!("publish: delivery slots exhausted, dropping QoS 2 publish");
                ctx.release_message_if_idle(msg_idx);
                return Ok(PacketStatus::Continue);
            };
            let retry_timeout = ctx.retry.retry_timeout_ms;
            let delivery = &mut ctx.deliveries[usize::from(delivery_idx)];
            delivery.message_idx = msg_idx;
            delivery.client_id = conn_id;
            delivery.packet_id = packet.packet_id();
            delivery.qos = QoS::ExactOnce;
            delivery.state = DeliveryState::AwaitingPubrel;
            delivery.last_sent_at = now;
            delivery.next_retry_at = now + retry_timeout;
            delivery.retry_count = 0;
            ctx.register_delivery(conn_id, packet.packet_id(), delivery_idx)?;
            ctx.messages[usize::from(msg_idx)].deliveries = 1;

            ctx.reply(conn_id, &PublishReceivedPacket::new(packet.packet_id()));
            log::info!("sent: PUBREC mid: {} rc: 0x00", packet.packet_id());
        }
    }

    Ok(PacketStatus::Continue)
}

/// Produce deliveries for every active subscription matching the message
/// topic.
///
/// The delivered QoS is the min of origin and granted QoS. QoS 0 copies
/// are written and forgotten; QoS 1/2 copies allocate a delivery slot,
/// take the subscription's next packet id and enter the retransmission
/// schedule. Under slot exhaustion or a full send buffer that
/// subscriber's copy is dropped and fan-out continues.
///
/// # Errors
///
/// Delivery lookup bucket overflow is fatal.
pub fn fan_out(ctx: &mut Context, msg_idx: u16, now: u64) -> Result<(), Error> {
    let msg = ctx.messages[usize::from(msg_idx)];
    let origin_qos = msg.qos();

    for index in 0..ctx.subscriptions.len() {
        let sub = ctx.subscriptions[index];
        if !sub.active {
            continue;
        }

        let matches = {
            let filter = ctx
                .topic_arena
                .at(sub.topic_offset, usize::from(sub.topic_len));
            let topic_name = ctx
                .message_arena
                .at(msg.topic_offset, usize::from(msg.topic_len));
            topic::topic_matches(filter, sub.kind, topic_name)
        };
        if !matches {
            continue;
        }

        let delivery_qos = origin_qos.min(sub.granted_qos());
        if delivery_qos == QoS::AtMostOnce {
            // One transmission, nothing retained.
            if send_publish(
                ctx,
                sub.client_id,
                msg_idx,
                0,
                delivery_qos,
                false,
                sub.subscription_id,
            ) {
                log::info!(
                    "sent: PUBLISH mid: 0 cid: {} sid: {} qos: 0",
                    sub.client_id,
                    sub.subscription_id
                );
            }
            continue;
        }

        let mid = ctx.subscriptions[index].take_mid();
        let Some(delivery_idx) = ctx.alloc_delivery() else {
            log::warn!("publish: delivery slots exhausted, dropping copy for {}", sub.client_id);
            continue;
        };
        let retry_timeout = ctx.retry.retry_timeout_ms;
        let delivery = &mut ctx.deliveries[usize::from(delivery_idx)];
        delivery.message_idx = msg_idx;
        delivery.client_id = sub.client_id;
        delivery.packet_id = mid;
        delivery.qos = delivery_qos;
        delivery.subscription_id = sub.subscription_id;
        delivery.state = if delivery_qos == QoS::AtLeastOnce {
            DeliveryState::AwaitingPuback
        } else {
            DeliveryState::AwaitingPubrec
        };
        delivery.last_sent_at = now;
        delivery.next_retry_at = now + retry_timeout;
        delivery.retry_count = 0;

        if !send_publish(
            ctx,
            sub.client_id,
            msg_idx,
            mid,
            delivery_qos,
            false,
            sub.subscription_id,
        ) {
            ctx.release_delivery(delivery_idx);
            continue;
        }

        ctx.register_delivery(sub.client_id, mid, delivery_idx)?;
        ctx.messages[usize::from(msg_idx)].deliveries += 1;
        log::info!(
            "sent: PUBLISH mid: {} cid: {} sid: {} qos: {}",
            mid,
            sub.client_id,
            sub.subscription_id,
            delivery_qos as u8
        );
    }

    Ok(())
}

/// Write one PUBLISH for a stored message into a subscriber's send
/// buffer. Returns false if the connection is gone or the buffer has no
/// room for the whole packet.
pub(crate) fn send_publish(
    ctx: &mut Context,
    conn_id: u16,
    msg_idx: u16,
    mid: u16,
    qos: QoS,
    dup: bool,
    subscription_id: u32,
) -> bool {
    if !ctx.connections[usize::from(conn_id)].open {
        return false;
    }

    let msg = ctx.messages[usize::from(msg_idx)];
    let topic_name = ctx
        .message_arena
        .at(msg.topic_offset, usize::from(msg.topic_len));
    let payload = ctx
        .message_arena
        .at(msg.payload_offset, usize::from(msg.payload_len));
    let props =
        ctx.properties[usize::from(msg.property_id)].to_packet(&ctx.message_arena, subscription_id);

    let mut packet = PublishPacket::with_packet_id(topic_name, payload, qos, mid);
    *packet.properties_mut() = props;
    packet.set_dup(dup);

    crate::connection::queue_packet(
        &mut ctx.scratch,
        &mut ctx.connections[usize::from(conn_id)],
        &packet,
    )
}
