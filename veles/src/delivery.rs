// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The QoS delivery state machine and its retransmission scheduler.
//!
//! Acknowledgements arriving for unknown deliveries are logged and
//! ignored; terminal deliveries leave the lookup table immediately, so no
//! inbound packet can resurrect a finished exchange.

use codec::{PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket};

use crate::context::{Context, DeliveryState};
use crate::dispatcher::PacketStatus;
use crate::error::Error;
use crate::publish;

/// PUBACK from a subscriber: a QoS 1 delivery completed.
pub fn on_puback(ctx: &mut Context, conn_id: u16, packet_id: u16) -> PacketStatus {
    log::info!("recv: PUBACK mid: {packet_id}");
    let Some(index) =
        ctx.find_delivery_in_state(conn_id, packet_id, DeliveryState::AwaitingPuback)
    else {
        log::info!("delivery: PUBACK for unknown delivery, ignored");
        return PacketStatus::Continue;
    };
    complete(ctx, index);
    PacketStatus::Continue
}

/// PUBREC from a subscriber: move a QoS 2 delivery to the release phase.
pub fn on_pubrec(ctx: &mut Context, conn_id: u16, now: u64, packet_id: u16) -> PacketStatus {
    log::info!("recv: PUBREC mid: {packet_id}");
    let Some(index) =
        ctx.find_delivery_in_state(conn_id, packet_id, DeliveryState::AwaitingPubrec)
    else {
        log::info!("delivery: PUBREC for unknown delivery, ignored");
        return PacketStatus::Continue;
    };

    ctx.reply(conn_id, &PublishReleasePacket::new(packet_id));
    log::info!("sent: PUBREL mid: {packet_id} rc: 0x00");

    let retry_timeout = ctx.retry.retry_timeout_ms;
    let delivery = &mut ctx.deliveries[usize::from(index)];
    delivery.state = DeliveryState::AwaitingPubcomp;
    delivery.last_sent_at = now;
    delivery.next_retry_at = now + retry_timeout;
    delivery.retry_count = 0;
    PacketStatus::Continue
}

/// PUBCOMP from a subscriber: a QoS 2 delivery completed.
pub fn on_pubcomp(ctx: &mut Context, conn_id: u16, packet_id: u16) -> PacketStatus {
    log::info!("recv: PUBCOMP mid: {packet_id}");
    let Some(index) =
        ctx.find_delivery_in_state(conn_id, packet_id, DeliveryState::AwaitingPubcomp)
    else {
        log::info!("delivery: PUBCOMP for unknown delivery, ignored");
        return PacketStatus::Continue;
    };
    complete(ctx, index);
    PacketStatus::Continue
}

/// PUBREL from a publisher: the held QoS 2 message becomes eligible, fan
/// out now, confirm with PUBCOMP and finish the publisher-side exchange.
///
/// # Errors
///
/// Only fatal errors from fan-out propagate.
pub fn on_pubrel(
    ctx: &mut Context,
    conn_id: u16,
    now: u64,
    packet_id: u16,
) -> Result<PacketStatus, Error> {
    log::info!("recv: PUBREL mid: {packet_id}");
    let Some(index) =
        ctx.find_delivery_in_state(conn_id, packet_id, DeliveryState::AwaitingPubrel)
    else {
        log::info!("delivery: PUBREL for unknown delivery, ignored");
        return Ok(PacketStatus::Continue);
    };

    let msg_idx = ctx.deliveries[usize::from(index)].message_idx;
    publish::fan_out(ctx, msg_idx, now)?;

    ctx.reply(conn_id, &PublishCompletePacket::new(packet_id));
    log::info!("sent: PUBCOMP mid: {packet_id} rc: 0x00");

    complete(ctx, index);
    Ok(PacketStatus::Continue)
}

/// Finish a delivery: unlink it, recycle the slot and drop its message
/// reference.
fn complete(ctx: &mut Context, index: u16) {
    let msg_idx = ctx.deliveries[usize::from(index)].message_idx;
    ctx.deliveries[usize::from(index)].state = DeliveryState::Acknowledged;
    ctx.release_delivery(index);
    ctx.release_message_ref(msg_idx);
}

/// Re-send or expire every delivery whose retry deadline has passed.
///
/// The packet re-emitted depends on the state: the PUBLISH itself with
/// DUP=1 while an acknowledgement is outstanding, PUBREL while waiting
/// for PUBCOMP, PUBREC while waiting for the publisher's PUBREL.
/// Deliveries out of attempts expire and release their message
/// reference.
///
/// # Errors
///
/// Only fatal errors propagate.
pub fn sweep(ctx: &mut Context, now: u64) -> Result<(), Error> {
    let max_attempts = ctx.retry.max_attempts;
    let retry_timeout = ctx.retry.retry_timeout_ms;

    for index in 0..ctx.deliveries.len() {
        let delivery = ctx.deliveries[index];
        if !delivery.active || delivery.state.is_terminal() {
            continue;
        }
        if delivery.next_retry_at > now {
            continue;
        }

        if delivery.retry_count >= max_attempts {
            log::warn!(
                "delivery: expiring mid: {} cid: {} after {} attempts",
                delivery.packet_id,
                delivery.client_id,
                delivery.retry_count
            );
            ctx.deliveries[index].state = DeliveryState::Expired;
            ctx.release_delivery(index as u16);
            ctx.release_message_ref(delivery.message_idx);
            continue;
        }

        // A closed connection keeps its deliveries on the retry schedule
        // until they expire, but nothing is written for it.
        let target_open = ctx.connections[usize::from(delivery.client_id)].open;

        match delivery.state {
            DeliveryState::AwaitingPuback | DeliveryState::AwaitingPubrec => {
                let sent = target_open
                    && publish::send_publish(
                        ctx,
                        delivery.client_id,
                        delivery.message_idx,
                        delivery.packet_id,
                        delivery.qos,
                        true,
                        delivery.subscription_id,
                    );
                if sent {
                    log::info!(
                        "sent: PUBLISH mid: {} cid: {} dup: 1 (retry {})",
                        delivery.packet_id,
                        delivery.client_id,
                        delivery.retry_count + 1
                    );
                }
            }
            DeliveryState::AwaitingPubcomp => {
                if target_open {
                    ctx.reply(
                        delivery.client_id,
                        &PublishReleasePacket::new(delivery.packet_id),
                    );
                    log::info!("sent: PUBREL mid: {} (retry)", delivery.packet_id);
                }
            }
            DeliveryState::AwaitingPubrel => {
                if target_open {
                    ctx.reply(
                        delivery.client_id,
                        &PublishReceivedPacket::new(delivery.packet_id),
                    );
                    log::info!("sent: PUBREC mid: {} (retry)", delivery.packet_id);
                }
            }
            DeliveryState::PendingSend
            | DeliveryState::Acknowledged
            | DeliveryState::Expired => {}
        }

        let slot = &mut ctx.deliveries[index];
        slot.retry_count += 1;
        slot.last_sent_at = now;
        slot.next_retry_at = now + retry_timeout;
    }

    Ok(())
}

/// The earliest pending retry deadline, for the event loop's wait
/// timeout.
#[must_use]
pub fn next_retry_deadline(ctx: &Context) -> Option<u64> {
    let mut deadline = None;
    for delivery in ctx.deliveries.iter() {
        if !delivery.active || delivery.state.is_terminal() {
            continue;
        }
        deadline = Some(match deadline {
            None => delivery.next_retry_at,
            Some(current) if delivery.next_retry_at < current => delivery.next_retry_at,
            Some(current) => current,
        });
    }
    deadline
}
