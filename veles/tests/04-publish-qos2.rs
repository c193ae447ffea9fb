// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
};

use veles::context::Context;
use veles::dispatcher::PacketStatus;

mod common;
use common::{
    active_deliveries, active_messages, connect, decode_publish, encode, feed, subscribe,
    take_output,
};

#[test]
fn test_qos2_release_then_forward() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let subscriber = connect(&mut ctx, "sub");
    subscribe(&mut ctx, subscriber, "q2/topic", 2);

    // PUBLISH(qos=2, mid=9): the broker answers PUBREC and holds the
    // message; nothing reaches the subscriber yet.
    let publish = PublishPacket::with_packet_id(b"q2/topic", b"payload", QoS::ExactOnce, 9);
    let status = feed(&mut ctx, publisher, 0, &encode(&publish));
    assert_eq!(status, PacketStatus::Continue);
    assert_eq!(take_output(&mut ctx, publisher), [0x50, 0x02, 0x00, 0x09]);
    assert!(take_output(&mut ctx, subscriber).is_empty());
    assert_eq!(active_messages(&ctx), 1);

    // PUBREL(9) releases the message: the broker fans out, then answers
    // PUBCOMP.
    let status = feed(&mut ctx, publisher, 0, &encode(&PublishReleasePacket::new(9)));
    assert_eq!(status, PacketStatus::Continue);
    assert_eq!(take_output(&mut ctx, publisher), [0x70, 0x02, 0x00, 0x09]);

    let delivered = take_output(&mut ctx, subscriber);
    let (qos, mid, topic, payload, _dup) = decode_publish(&delivered);
    assert_eq!(qos, QoS::ExactOnce);
    assert_eq!(mid, 1);
    assert_eq!(topic, b"q2/topic");
    assert_eq!(payload, b"payload");

    // Subscriber half of the exchange: PUBREC -> PUBREL -> PUBCOMP.
    let status = feed(
        &mut ctx,
        subscriber,
        0,
        &encode(&PublishReceivedPacket::new(mid)),
    );
    assert_eq!(status, PacketStatus::Continue);
    assert_eq!(take_output(&mut ctx, subscriber), [0x62, 0x02, 0x00, 0x01]);

    let status = feed(
        &mut ctx,
        subscriber,
        0,
        &encode(&PublishCompletePacket::new(mid)),
    );
    assert_eq!(status, PacketStatus::Continue);

    assert_eq!(active_deliveries(&ctx), 0);
    assert_eq!(active_messages(&ctx), 0);
}

#[test]
fn test_qos2_duplicate_publish_is_not_stored_twice() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let subscriber = connect(&mut ctx, "sub");
    subscribe(&mut ctx, subscriber, "q2/topic", 2);

    let publish = PublishPacket::with_packet_id(b"q2/topic", b"payload", QoS::ExactOnce, 9);
    feed(&mut ctx, publisher, 0, &encode(&publish));
    assert_eq!(take_output(&mut ctx, publisher), [0x50, 0x02, 0x00, 0x09]);

    // The retransmission only triggers another PUBREC.
    let mut dup_publish =
        PublishPacket::with_packet_id(b"q2/topic", b"payload", QoS::ExactOnce, 9);
    dup_publish.set_dup(true);
    feed(&mut ctx, publisher, 0, &encode(&dup_publish));
    assert_eq!(take_output(&mut ctx, publisher), [0x50, 0x02, 0x00, 0x09]);

    assert_eq!(active_messages(&ctx), 1);
    assert_eq!(active_deliveries(&ctx), 1);
    assert!(take_output(&mut ctx, subscriber).is_empty());
}

#[test]
fn test_qos2_with_no_subscribers_completes_cleanly() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");

    let publish = PublishPacket::with_packet_id(b"nowhere", b"p", QoS::ExactOnce, 4);
    feed(&mut ctx, publisher, 0, &encode(&publish));
    assert_eq!(take_output(&mut ctx, publisher), [0x50, 0x02, 0x00, 0x04]);

    feed(&mut ctx, publisher, 0, &encode(&PublishReleasePacket::new(4)));
    assert_eq!(take_output(&mut ctx, publisher), [0x70, 0x02, 0x00, 0x04]);

    assert_eq!(active_deliveries(&ctx), 0);
    assert_eq!(active_messages(&ctx), 0);
}

#[test]
fn test_late_acks_cannot_resurrect_a_finished_exchange() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");

    let publish = PublishPacket::with_packet_id(b"t", b"p", QoS::ExactOnce, 6);
    feed(&mut ctx, publisher, 0, &encode(&publish));
    feed(&mut ctx, publisher, 0, &encode(&PublishReleasePacket::new(6)));
    take_output(&mut ctx, publisher);

    // A second PUBREL for the completed exchange is ignored.
    let status = feed(&mut ctx, publisher, 0, &encode(&PublishReleasePacket::new(6)));
    assert_eq!(status, PacketStatus::Continue);
    assert!(take_output(&mut ctx, publisher).is_empty());
    assert_eq!(active_deliveries(&ctx), 0);
}
