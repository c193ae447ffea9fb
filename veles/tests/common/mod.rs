// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! In-process test harness: drives a broker `Context` through the
//! dispatcher without sockets, feeding packet bytes into receive buffers
//! and reading replies out of send buffers.

#![allow(dead_code)]

use codec::{
    Buffer, ByteArray, ConnectPacket, DecodePacket, EncodePacket, PublishPacket, QoS,
    SubscribePacketBuilder, SubscribeTopic,
};

use veles::context::{Context, RetryPolicy};
use veles::dispatcher::{self, PacketStatus};

pub const CONNACK_SUCCESS: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];

/// Append `bytes` to the connection's receive buffer and run the
/// dispatcher at time `now`.
pub fn feed(ctx: &mut Context, conn_id: u16, now: u64, bytes: &[u8]) -> PacketStatus {
    ctx.connections[usize::from(conn_id)]
        .recv_buffer
        .append(bytes)
        .unwrap();
    dispatcher::process_incoming(ctx, conn_id, now).unwrap()
}

/// Take everything queued in the connection's send buffer.
pub fn take_output(ctx: &mut Context, conn_id: u16) -> Vec<u8> {
    let buf = &mut ctx.connections[usize::from(conn_id)].send_buffer;
    let bytes = buf.readable().to_vec();
    buf.reset();
    bytes
}

/// Serialize a packet the way a client would put it on the wire.
pub fn encode<P: EncodePacket>(packet: &P) -> Vec<u8> {
    let mut buf = Buffer::new(veles::constants::MAX_PACKET_SIZE);
    packet.encode(&mut buf).unwrap();
    buf.readable().to_vec()
}

/// Open a connection slot and complete a CONNECT handshake on it.
pub fn connect(ctx: &mut Context, client_id: &str) -> u16 {
    let conn_id = ctx.connection_open().unwrap();
    let packet = ConnectPacket::new(client_id.as_bytes(), 60, true);
    let status = feed(ctx, conn_id, 0, &encode(&packet));
    assert_eq!(status, PacketStatus::Continue);
    assert_eq!(take_output(ctx, conn_id), CONNACK_SUCCESS);
    conn_id
}

/// Subscribe with one filter and assert the granted reason code.
pub fn subscribe(ctx: &mut Context, conn_id: u16, filter: &str, qos: u8) {
    subscribe_with_id(ctx, conn_id, filter, qos, None);
}

/// Subscribe with one filter carrying a subscription identifier.
pub fn subscribe_with_id(
    ctx: &mut Context,
    conn_id: u16,
    filter: &str,
    qos: u8,
    subscription_id: Option<u32>,
) {
    let topics = [SubscribeTopic::new(filter.as_bytes(), qos)];
    let mut buf = Buffer::new(veles::constants::MAX_PACKET_SIZE);
    let mut builder = SubscribePacketBuilder::new(10);
    if let Some(id) = subscription_id {
        builder = builder.with_subscription_id(id);
    }
    builder.encode(&topics, &mut buf).unwrap();

    let status = feed(ctx, conn_id, 0, buf.readable());
    assert_eq!(status, PacketStatus::Continue);
    let reply = take_output(ctx, conn_id);
    // SUBACK with a single reason code equal to the granted QoS.
    assert_eq!(reply, [0x90, 0x04, 0x00, 0x0a, 0x00, qos]);
}

/// Decode the single PUBLISH queued for a subscriber.
pub fn decode_publish(bytes: &[u8]) -> (QoS, u16, Vec<u8>, Vec<u8>, bool) {
    let mut ba = ByteArray::new(bytes);
    let packet = PublishPacket::decode(&mut ba).unwrap();
    (
        packet.qos(),
        packet.packet_id(),
        packet.topic().to_vec(),
        packet.payload().to_vec(),
        packet.dup(),
    )
}

/// Number of active published-message slots.
pub fn active_messages(ctx: &Context) -> usize {
    ctx.messages.iter().filter(|m| m.active()).count()
}

/// Number of active delivery slots.
pub fn active_deliveries(ctx: &Context) -> usize {
    ctx.deliveries.iter().filter(|d| d.active).count()
}

/// A context with retransmission timing shrunk for tests.
pub fn test_context() -> Context {
    Context::with_policy(RetryPolicy {
        check_interval_ms: 50,
        retry_timeout_ms: 100,
        max_attempts: 3,
    })
}
