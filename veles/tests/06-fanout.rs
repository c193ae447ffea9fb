// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ByteArray, DecodePacket, PublishPacket, QoS};

use veles::context::Context;

mod common;
use common::{connect, decode_publish, encode, feed, subscribe, subscribe_with_id, take_output};

#[test]
fn test_wildcard_routing() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let plus = connect(&mut ctx, "plus");
    let hash = connect(&mut ctx, "hash");
    let other = connect(&mut ctx, "other");
    subscribe(&mut ctx, plus, "sensor/+/temp", 0);
    subscribe(&mut ctx, hash, "sensor/#", 0);
    subscribe(&mut ctx, other, "building/+", 0);

    let publish = PublishPacket::new(b"sensor/kitchen/temp", b"21");
    feed(&mut ctx, publisher, 0, &encode(&publish));

    // Both wildcard subscribers match, the unrelated one does not.
    let (_, _, topic, payload, _) = decode_publish(&take_output(&mut ctx, plus));
    assert_eq!(topic, b"sensor/kitchen/temp");
    assert_eq!(payload, b"21");
    let (_, _, topic, _, _) = decode_publish(&take_output(&mut ctx, hash));
    assert_eq!(topic, b"sensor/kitchen/temp");
    assert!(take_output(&mut ctx, other).is_empty());

    // The parent level matches `sensor/#` but not `sensor/+/temp`.
    let publish = PublishPacket::new(b"sensor", b"x");
    feed(&mut ctx, publisher, 0, &encode(&publish));
    assert!(take_output(&mut ctx, plus).is_empty());
    assert!(!take_output(&mut ctx, hash).is_empty());

    // A sibling prefix is not a level boundary.
    let publish = PublishPacket::new(b"sensors", b"x");
    feed(&mut ctx, publisher, 0, &encode(&publish));
    assert!(take_output(&mut ctx, hash).is_empty());
}

#[test]
fn test_all_matching_subscribers_get_a_copy() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let mut subscribers = Vec::new();
    for i in 0..5 {
        let conn_id = connect(&mut ctx, &format!("sub{i}"));
        subscribe(&mut ctx, conn_id, "fan/out", 0);
        subscribers.push(conn_id);
    }

    let publish = PublishPacket::new(b"fan/out", b"all");
    feed(&mut ctx, publisher, 0, &encode(&publish));

    for conn_id in subscribers {
        let (_, _, _, payload, _) = decode_publish(&take_output(&mut ctx, conn_id));
        assert_eq!(payload, b"all");
    }
}

#[test]
fn test_subscription_identifier_is_delivered_per_subscriber() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let with_id = connect(&mut ctx, "with-id");
    let without_id = connect(&mut ctx, "without-id");
    subscribe_with_id(&mut ctx, with_id, "ids/topic", 0, Some(42));
    subscribe(&mut ctx, without_id, "ids/topic", 0);

    let publish = PublishPacket::new(b"ids/topic", b"p");
    feed(&mut ctx, publisher, 0, &encode(&publish));

    let bytes = take_output(&mut ctx, with_id);
    let mut ba = ByteArray::new(&bytes);
    let packet = PublishPacket::decode(&mut ba).unwrap();
    assert_eq!(packet.properties().subscription_ids(), &[42]);

    let bytes = take_output(&mut ctx, without_id);
    let mut ba = ByteArray::new(&bytes);
    let packet = PublishPacket::decode(&mut ba).unwrap();
    assert!(packet.properties().subscription_ids().is_empty());
}

#[test]
fn test_publish_properties_are_forwarded() {
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let subscriber = connect(&mut ctx, "sub");
    subscribe(&mut ctx, subscriber, "props/topic", 1);

    let mut publish = PublishPacket::with_packet_id(b"props/topic", b"p", QoS::AtLeastOnce, 3);
    publish.properties_mut().payload_format_indicator = Some(1);
    publish.properties_mut().message_expiry_interval = Some(120);
    publish.properties_mut().content_type = Some(&b"text/plain"[..]);
    publish.properties_mut().response_topic = Some(&b"answer/here"[..]);
    publish.properties_mut().correlation_data = Some(&[1, 2, 3][..]);
    feed(&mut ctx, publisher, 0, &encode(&publish));
    take_output(&mut ctx, publisher);

    let bytes = take_output(&mut ctx, subscriber);
    let mut ba = ByteArray::new(&bytes);
    let packet = PublishPacket::decode(&mut ba).unwrap();
    let props = packet.properties();
    assert_eq!(props.payload_format_indicator, Some(1));
    assert_eq!(props.message_expiry_interval, Some(120));
    assert_eq!(props.content_type, Some(&b"text/plain"[..]));
    assert_eq!(props.response_topic, Some(&b"answer/here"[..]));
    assert_eq!(props.correlation_data, Some(&[1u8, 2, 3][..]));
}

#[test]
fn test_subscriber_with_multiple_matching_filters_gets_multiple_copies() {
    // Each matching subscription produces its own delivery, mirroring a
    // per-subscription fan-out model.
    let mut ctx = Context::new();
    let publisher = connect(&mut ctx, "pub");
    let subscriber = connect(&mut ctx, "sub");
    subscribe(&mut ctx, subscriber, "m/t", 0);
    subscribe(&mut ctx, subscriber, "m/+", 0);

    let publish = PublishPacket::new(b"m/t", b"p");
    feed(&mut ctx, publisher, 0, &encode(&publish));

    let bytes = take_output(&mut ctx, subscriber);
    // Two back-to-back PUBLISH packets.
    let mut ba = ByteArray::new(&bytes);
    let first = PublishPacket::decode(&mut ba).unwrap();
    assert_eq!(first.topic(), b"m/t");
    let rest = &bytes[bytes.len() - ba.remaining_bytes()..];
    let mut ba = ByteArray::new(rest);
    let second = PublishPacket::decode(&mut ba).unwrap();
    assert_eq!(second.topic(), b"m/t");
}
