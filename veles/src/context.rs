// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The single owning aggregate of all broker state.
//!
//! Every cross-entity reference is an integer index into one of the fixed
//! slot tables below; [`NIL`] stands for "absent". Slots are recycled
//! through intrusive free lists (a head index plus a per-slot `next_free`
//! link). All of it is built once at startup and mutated only by the event
//! loop thread.

use mio::net::TcpStream;

use codec::{Buffer, EncodePacket, FilterKind, PacketId, QoS};

use crate::arena::Arena;
use crate::connection::{queue_packet, Connection};
use crate::constants::{
    DELIVERY_BUCKET_SIZE, DELIVERY_TABLE_BITS, DELIVERY_TABLE_SIZE, MAX_CLIENTS, MAX_CLIENT_DATA,
    MAX_DELIVERY_MESSAGES, MAX_MESSAGE_DATA, MAX_PACKET_SIZE, MAX_PUBLISHED_MESSAGES,
    MAX_RETRY_ATTEMPTS, MAX_SUBSCRIPTIONS, MAX_TOPIC_DATA, NIL, RETRANSMISSION_CHECK_MS,
    RETRY_TIMEOUT_MS,
};
use crate::error::{Error, ErrorKind};
use crate::session::ClientRecord;

/// Timing knobs of the retransmission scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How often the retry sweep runs.
    pub check_interval_ms: u64,

    /// Delay before an unacknowledged delivery is retransmitted.
    pub retry_timeout_ms: u64,

    /// Retransmissions before a delivery is expired.
    pub max_attempts: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            check_interval_ms: RETRANSMISSION_CHECK_MS,
            retry_timeout_ms: RETRY_TIMEOUT_MS,
            max_attempts: MAX_RETRY_ATTEMPTS,
        }
    }
}

/// The origin record of one inbound PUBLISH.
///
/// `options` packs retain/qos/dup/active into one byte; explicit accessors
/// below keep the layout portable and testable. `deliveries` counts the
/// outstanding deliveries sourced from this message; the slot is recycled
/// when it reaches zero.
#[derive(Debug, Clone, Copy)]
pub struct PublishedMessage {
    /// The publisher's packet identifier.
    pub packet_id: PacketId,

    /// Connection index of the publisher.
    pub publisher: u16,

    /// Paired property slot.
    pub property_id: u16,

    pub topic_offset: u32,
    pub topic_len: u16,
    pub payload_offset: u32,
    pub payload_len: u16,

    /// Bit-packed retain/qos/dup/active.
    pub options: u8,

    /// Outstanding deliveries sourced from this message.
    pub deliveries: u16,

    pub(crate) next_free: u16,
}

const OPT_RETAIN: u8 = 0;
const OPT_QOS: u8 = 1;
const OPT_DUP: u8 = 3;
const OPT_ACTIVE: u8 = 4;

impl PublishedMessage {
    const fn empty() -> Self {
        Self {
            packet_id: 0,
            publisher: NIL,
            property_id: NIL,
            topic_offset: 0,
            topic_len: 0,
            payload_offset: 0,
            payload_len: 0,
            options: 0,
            deliveries: 0,
            next_free: NIL,
        }
    }

    /// Pack the option bits.
    #[must_use]
    pub const fn pack_options(retain: bool, qos: QoS, dup: bool, active: bool) -> u8 {
        (retain as u8) << OPT_RETAIN
            | (qos as u8) << OPT_QOS
            | (dup as u8) << OPT_DUP
            | (active as u8) << OPT_ACTIVE
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        (self.options >> OPT_RETAIN) & 0x01 != 0
    }

    #[must_use]
    pub fn qos(&self) -> QoS {
        match (self.options >> OPT_QOS) & 0x03 {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactOnce,
            _ => QoS::AtMostOnce,
        }
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        (self.options >> OPT_DUP) & 0x01 != 0
    }

    #[must_use]
    pub const fn active(&self) -> bool {
        (self.options >> OPT_ACTIVE) & 0x01 != 0
    }

    pub fn set_active(&mut self, active: bool) {
        self.options = (self.options & !(0x01 << OPT_ACTIVE)) | ((active as u8) << OPT_ACTIVE);
    }
}

/// MQTT 5.0 properties stored alongside one [`PublishedMessage`].
///
/// String and binary values live in the message arena; `NIL`-length
/// offsets mean "absent".
#[derive(Debug, Clone, Copy)]
pub struct PropertySlot {
    pub active: bool,
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub topic_alias: Option<u16>,
    pub content_type_offset: u32,
    pub content_type_len: u16,
    pub response_topic_offset: u32,
    pub response_topic_len: u16,
    pub correlation_data_offset: u32,
    pub correlation_data_len: u16,
    pub subscription_ids: [u32; codec::MAX_SUBSCRIPTION_IDS],
    pub subscription_id_count: u8,
    pub(crate) next_free: u16,
}

impl PropertySlot {
    const fn empty() -> Self {
        Self {
            active: false,
            payload_format_indicator: None,
            message_expiry_interval: None,
            topic_alias: None,
            content_type_offset: 0,
            content_type_len: 0,
            response_topic_offset: 0,
            response_topic_len: 0,
            correlation_data_offset: 0,
            correlation_data_len: 0,
            subscription_ids: [0; codec::MAX_SUBSCRIPTION_IDS],
            subscription_id_count: 0,
            next_free: NIL,
        }
    }

    fn reset(&mut self) {
        let next_free = self.next_free;
        *self = Self::empty();
        self.next_free = next_free;
    }

    /// Copy the borrowed property values of a decoded PUBLISH into this
    /// slot, string values into the message arena.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the arena cannot hold the string values.
    pub fn store(
        &mut self,
        props: &codec::PublishProperties<'_>,
        arena: &mut Arena,
    ) -> Result<(), Error> {
        self.payload_format_indicator = props.payload_format_indicator;
        self.message_expiry_interval = props.message_expiry_interval;
        self.topic_alias = props.topic_alias;

        if let Some(content_type) = props.content_type {
            self.content_type_offset = arena.alloc_from(content_type)?;
            self.content_type_len = content_type.len() as u16;
        }
        if let Some(response_topic) = props.response_topic {
            self.response_topic_offset = arena.alloc_from(response_topic)?;
            self.response_topic_len = response_topic.len() as u16;
        }
        if let Some(correlation_data) = props.correlation_data {
            self.correlation_data_offset = arena.alloc_from(correlation_data)?;
            self.correlation_data_len = correlation_data.len() as u16;
        }
        for id in props.subscription_ids() {
            self.subscription_ids[usize::from(self.subscription_id_count)] = *id;
            self.subscription_id_count += 1;
        }
        Ok(())
    }

    /// Project this slot back into a borrowed property set for encoding,
    /// attaching `extra_subscription_id` when non-zero.
    #[must_use]
    pub fn to_packet<'a>(
        &self,
        arena: &'a Arena,
        extra_subscription_id: u32,
    ) -> codec::PublishProperties<'a> {
        let mut props = codec::PublishProperties::default();
        props.payload_format_indicator = self.payload_format_indicator;
        props.message_expiry_interval = self.message_expiry_interval;
        props.topic_alias = self.topic_alias;
        if self.content_type_len > 0 {
            props.content_type =
                Some(arena.at(self.content_type_offset, usize::from(self.content_type_len)));
        }
        if self.response_topic_len > 0 {
            props.response_topic =
                Some(arena.at(self.response_topic_offset, usize::from(self.response_topic_len)));
        }
        if self.correlation_data_len > 0 {
            props.correlation_data = Some(arena.at(
                self.correlation_data_offset,
                usize::from(self.correlation_data_len),
            ));
        }
        for id in &self.subscription_ids[..usize::from(self.subscription_id_count)] {
            // Capacity bounds were enforced when the slot was stored.
            let _ = props.add_subscription_id(*id);
        }
        if extra_subscription_id != 0 {
            let _ = props.add_subscription_id(extra_subscription_id);
        }
        props
    }
}

/// One stored topic filter of one client.
#[derive(Debug, Clone, Copy)]
pub struct Subscription {
    pub active: bool,

    /// Connection index of the owning client.
    pub client_id: u16,

    pub topic_offset: u32,
    pub topic_len: u16,

    /// Classification decided at SUBSCRIBE time; never re-derived on the
    /// fan-out path.
    pub kind: FilterKind,

    /// The raw subscription options byte; the low two bits are the
    /// granted QoS ceiling.
    pub options: u8,

    /// MQTT 5.0 subscription identifier; 0 means none.
    pub subscription_id: u32,

    /// Per-subscription outbound packet id generator.
    pub next_mid: PacketId,

    pub(crate) next_free: u16,
}

impl Subscription {
    const fn empty() -> Self {
        Self {
            active: false,
            client_id: NIL,
            topic_offset: 0,
            topic_len: 0,
            kind: FilterKind::Literal,
            options: 0,
            subscription_id: 0,
            next_mid: 1,
            next_free: NIL,
        }
    }

    #[must_use]
    pub fn granted_qos(&self) -> QoS {
        QoS::try_from(self.options & 0x03).unwrap_or(QoS::AtMostOnce)
    }

    /// Hand out the next outbound packet id. Ids are monotonic per
    /// subscription and never zero.
    pub fn take_mid(&mut self) -> PacketId {
        let mid = self.next_mid;
        self.next_mid = self.next_mid.checked_add(1).unwrap_or(1);
        mid
    }
}

/// Where one delivery stands in its QoS exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryState {
    /// Created but not yet written to a send buffer.
    #[default]
    PendingSend,

    /// QoS 1 outbound: PUBLISH sent, waiting for PUBACK.
    AwaitingPuback,

    /// QoS 2 outbound: PUBLISH sent, waiting for PUBREC.
    AwaitingPubrec,

    /// QoS 2 inbound: PUBREC sent to the publisher, waiting for PUBREL.
    AwaitingPubrel,

    /// QoS 2 outbound: PUBREL sent, waiting for PUBCOMP.
    AwaitingPubcomp,

    /// Terminal: the exchange completed.
    Acknowledged,

    /// Terminal: retransmission attempts ran out.
    Expired,
}

impl DeliveryState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Expired)
    }
}

/// One outbound delivery obligation, or the publisher-side half of a
/// QoS 2 exchange.
#[derive(Debug, Clone, Copy)]
pub struct MessageDelivery {
    pub active: bool,

    /// Index of the parent [`PublishedMessage`].
    pub message_idx: u16,

    /// Target connection.
    pub client_id: u16,

    /// Packet id used on the wire with this client; retransmissions keep
    /// it stable.
    pub packet_id: PacketId,

    /// Negotiated QoS, the min of origin and granted.
    pub qos: QoS,

    /// Subscription identifier carried on the PUBLISH to this client;
    /// kept so retransmissions are byte-identical. 0 means none.
    pub subscription_id: u32,

    pub state: DeliveryState,
    pub last_sent_at: u64,
    pub next_retry_at: u64,
    pub retry_count: u8,

    pub(crate) next_free: u16,
}

impl MessageDelivery {
    const fn empty() -> Self {
        Self {
            active: false,
            message_idx: NIL,
            client_id: NIL,
            packet_id: 0,
            qos: QoS::AtMostOnce,
            subscription_id: 0,
            state: DeliveryState::PendingSend,
            last_sent_at: 0,
            next_retry_at: 0,
            retry_count: 0,
            next_free: NIL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u8,
    indexes: [u16; DELIVERY_BUCKET_SIZE],
}

impl Bucket {
    const fn empty() -> Self {
        Self {
            count: 0,
            indexes: [NIL; DELIVERY_BUCKET_SIZE],
        }
    }
}

/// Fixed-size bucketed index of deliveries by `(client, packet id)`.
///
/// Keyed by a Knuth multiplicative hash of the 32-bit concatenation,
/// shifted down to the table bit width. Insertion appends within the
/// bucket, deletion shifts the tail down. Overflowing a bucket means the
/// in-flight window was provisioned wrong and is reported as fatal.
#[derive(Debug)]
pub struct DeliveryLookup {
    buckets: Box<[Bucket]>,
}

impl DeliveryLookup {
    fn new() -> Self {
        Self {
            buckets: vec![Bucket::empty(); DELIVERY_TABLE_SIZE].into_boxed_slice(),
        }
    }

    fn bucket_key(client_id: u16, packet_id: PacketId) -> usize {
        let hash_key = (u32::from(client_id) << 16) | u32::from(packet_id);
        (hash_key.wrapping_mul(2_654_435_761) >> (32 - DELIVERY_TABLE_BITS)) as usize
    }

    fn insert(&mut self, client_id: u16, packet_id: PacketId, index: u16) -> Result<(), Error> {
        let bucket = &mut self.buckets[Self::bucket_key(client_id, packet_id)];
        if usize::from(bucket.count) >= DELIVERY_BUCKET_SIZE {
            return Err(Error::new(
                ErrorKind::TableOverflow,
                "delivery lookup bucket overflow",
            ));
        }
        bucket.indexes[usize::from(bucket.count)] = index;
        bucket.count += 1;
        Ok(())
    }

    fn candidates(&self, client_id: u16, packet_id: PacketId) -> &[u16] {
        let bucket = &self.buckets[Self::bucket_key(client_id, packet_id)];
        &bucket.indexes[..usize::from(bucket.count)]
    }

    fn remove(&mut self, client_id: u16, packet_id: PacketId, index: u16) {
        let bucket = &mut self.buckets[Self::bucket_key(client_id, packet_id)];
        let count = usize::from(bucket.count);
        let Some(pos) = bucket.indexes[..count].iter().position(|i| *i == index) else {
            return;
        };
        bucket.indexes.copy_within(pos + 1..count, pos);
        bucket.indexes[count - 1] = NIL;
        bucket.count -= 1;
    }
}

/// All broker state: arenas, slot tables, free lists and the delivery
/// lookup table.
#[derive(Debug)]
pub struct Context {
    pub client_arena: Arena,
    pub topic_arena: Arena,
    pub message_arena: Arena,

    pub connections: Box<[Connection]>,
    pub clients: Box<[ClientRecord]>,
    pub subscriptions: Box<[Subscription]>,
    pub messages: Box<[PublishedMessage]>,
    pub properties: Box<[PropertySlot]>,
    pub deliveries: Box<[MessageDelivery]>,

    conn_free_head: u16,
    sub_free_head: u16,
    msg_free_head: u16,
    prop_free_head: u16,
    delivery_free_head: u16,

    lookup: DeliveryLookup,

    /// Scratch buffer for encoding one outbound packet before it is
    /// appended to a send buffer.
    pub scratch: Buffer,

    pub retry: RetryPolicy,
}

fn chained<T: Clone>(mut template: T, count: usize, set_next: impl Fn(&mut T, u16)) -> Box<[T]> {
    let mut slots = Vec::with_capacity(count);
    for i in 0..count {
        let next = if i + 1 < count { (i + 1) as u16 } else { NIL };
        set_next(&mut template, next);
        slots.push(template.clone());
    }
    slots.into_boxed_slice()
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    /// Build the context with custom retransmission timing; tests shrink
    /// the timeouts this way.
    #[must_use]
    pub fn with_policy(retry: RetryPolicy) -> Self {
        let mut connections = Vec::with_capacity(MAX_CLIENTS);
        for i in 0..MAX_CLIENTS {
            let mut conn = Connection::new();
            conn.next_free = if i + 1 < MAX_CLIENTS {
                (i + 1) as u16
            } else {
                NIL
            };
            connections.push(conn);
        }

        Self {
            client_arena: Arena::new(MAX_CLIENT_DATA),
            topic_arena: Arena::new(MAX_TOPIC_DATA),
            message_arena: Arena::new(MAX_MESSAGE_DATA),
            connections: connections.into_boxed_slice(),
            clients: vec![ClientRecord::empty(); MAX_CLIENTS].into_boxed_slice(),
            subscriptions: chained(Subscription::empty(), MAX_SUBSCRIPTIONS, |s, n| {
                s.next_free = n;
            }),
            messages: chained(PublishedMessage::empty(), MAX_PUBLISHED_MESSAGES, |m, n| {
                m.next_free = n;
            }),
            properties: chained(PropertySlot::empty(), MAX_PUBLISHED_MESSAGES, |p, n| {
                p.next_free = n;
            }),
            deliveries: chained(MessageDelivery::empty(), MAX_DELIVERY_MESSAGES, |d, n| {
                d.next_free = n;
            }),
            conn_free_head: 0,
            sub_free_head: 0,
            msg_free_head: 0,
            prop_free_head: 0,
            delivery_free_head: 0,
            lookup: DeliveryLookup::new(),
            scratch: Buffer::new(MAX_PACKET_SIZE),
            retry,
        }
    }

    /// Encode `packet` into the target connection's send buffer.
    ///
    /// Returns false if the packet was dropped because the buffer is full.
    pub fn reply<P: EncodePacket>(&mut self, conn_id: u16, packet: &P) -> bool {
        queue_packet(
            &mut self.scratch,
            &mut self.connections[usize::from(conn_id)],
            packet,
        )
    }

    /// Claim a connection slot for a freshly accepted socket.
    pub fn connection_open(&mut self) -> Option<u16> {
        let index = self.conn_free_head;
        if index == NIL {
            return None;
        }
        let conn = &mut self.connections[usize::from(index)];
        self.conn_free_head = conn.next_free;
        conn.open = true;
        conn.connected = false;
        conn.recv_buffer.reset();
        conn.send_buffer.reset();
        self.clients[usize::from(index)].reset();
        Some(index)
    }

    /// Tear a connection down: clear the client's subscriptions and
    /// session record and recycle the slot. In-flight deliveries targeted
    /// at this client stay in their slots until the retry sweep expires
    /// them.
    ///
    /// Returns the detached socket so the caller can unregister it.
    pub fn connection_close(&mut self, conn_id: u16) -> Option<TcpStream> {
        for index in 0..self.subscriptions.len() {
            if self.subscriptions[index].active
                && self.subscriptions[index].client_id == conn_id
            {
                self.release_subscription(index as u16);
            }
        }

        self.clients[usize::from(conn_id)].reset();
        let conn = &mut self.connections[usize::from(conn_id)];
        conn.open = false;
        conn.connected = false;
        conn.recv_buffer.reset();
        conn.send_buffer.reset();
        let stream = conn.detach();
        conn.next_free = self.conn_free_head;
        self.conn_free_head = conn_id;
        stream
    }

    pub fn alloc_subscription(&mut self) -> Option<u16> {
        let index = self.sub_free_head;
        if index == NIL {
            return None;
        }
        let sub = &mut self.subscriptions[usize::from(index)];
        self.sub_free_head = sub.next_free;
        let next_free = sub.next_free;
        *sub = Subscription::empty();
        sub.next_free = next_free;
        sub.active = true;
        Some(index)
    }

    pub fn release_subscription(&mut self, index: u16) {
        let sub = &mut self.subscriptions[usize::from(index)];
        if !sub.active {
            return;
        }
        sub.active = false;
        sub.next_free = self.sub_free_head;
        self.sub_free_head = index;
    }

    /// Claim a message slot, marked active with all flag bits clear.
    pub fn alloc_message(&mut self) -> Option<u16> {
        let index = self.msg_free_head;
        if index == NIL {
            return None;
        }
        let msg = &mut self.messages[usize::from(index)];
        self.msg_free_head = msg.next_free;
        let next_free = msg.next_free;
        *msg = PublishedMessage::empty();
        msg.next_free = next_free;
        msg.options = PublishedMessage::pack_options(false, QoS::AtMostOnce, false, true);
        Some(index)
    }

    pub fn alloc_property(&mut self) -> Option<u16> {
        let index = self.prop_free_head;
        if index == NIL {
            return None;
        }
        let prop = &mut self.properties[usize::from(index)];
        self.prop_free_head = prop.next_free;
        prop.reset();
        prop.active = true;
        Some(index)
    }

    fn release_property(&mut self, index: u16) {
        let prop = &mut self.properties[usize::from(index)];
        if !prop.active {
            return;
        }
        prop.active = false;
        prop.next_free = self.prop_free_head;
        self.prop_free_head = index;
    }

    /// Drop one delivery reference; the slot and its property slot are
    /// recycled when the last reference goes.
    pub fn release_message_ref(&mut self, index: u16) {
        let msg = &mut self.messages[usize::from(index)];
        msg.deliveries = msg.deliveries.saturating_sub(1);
        if msg.deliveries == 0 {
            self.release_message(index);
        }
    }

    /// Recycle a message slot that has no outstanding deliveries, e.g. a
    /// QoS 0 publish right after fan-out.
    pub fn release_message_if_idle(&mut self, index: u16) {
        if self.messages[usize::from(index)].deliveries == 0 {
            self.release_message(index);
        }
    }

    fn release_message(&mut self, index: u16) {
        let msg = &mut self.messages[usize::from(index)];
        if !msg.active() {
            return;
        }
        msg.set_active(false);
        let property_id = msg.property_id;
        msg.next_free = self.msg_free_head;
        self.msg_free_head = index;
        if property_id != NIL {
            self.release_property(property_id);
        }
    }

    pub fn alloc_delivery(&mut self) -> Option<u16> {
        let index = self.delivery_free_head;
        if index == NIL {
            return None;
        }
        let delivery = &mut self.deliveries[usize::from(index)];
        self.delivery_free_head = delivery.next_free;
        let next_free = delivery.next_free;
        *delivery = MessageDelivery::empty();
        delivery.next_free = next_free;
        delivery.active = true;
        Some(index)
    }

    /// Make a delivery findable by `(client, packet id)`.
    ///
    /// # Errors
    ///
    /// Bucket overflow is a provisioning bug and fatal.
    pub fn register_delivery(
        &mut self,
        client_id: u16,
        packet_id: PacketId,
        index: u16,
    ) -> Result<(), Error> {
        self.lookup.insert(client_id, packet_id, index)
    }

    /// Find the active delivery matching `(client, packet id)`.
    #[must_use]
    pub fn find_delivery(&self, client_id: u16, packet_id: PacketId) -> Option<u16> {
        for index in self.lookup.candidates(client_id, packet_id) {
            let delivery = &self.deliveries[usize::from(*index)];
            if delivery.active
                && delivery.client_id == client_id
                && delivery.packet_id == packet_id
            {
                return Some(*index);
            }
        }
        None
    }

    /// Find the active delivery matching `(client, packet id)` in a
    /// specific state.
    ///
    /// A connection can be publisher and subscriber at once, so an
    /// inbound exchange and an outbound delivery may share a key; the
    /// expected state tells them apart.
    #[must_use]
    pub fn find_delivery_in_state(
        &self,
        client_id: u16,
        packet_id: PacketId,
        state: DeliveryState,
    ) -> Option<u16> {
        for index in self.lookup.candidates(client_id, packet_id) {
            let delivery = &self.deliveries[usize::from(*index)];
            if delivery.active
                && delivery.client_id == client_id
                && delivery.packet_id == packet_id
                && delivery.state == state
            {
                return Some(*index);
            }
        }
        None
    }

    /// Unlink a delivery from the lookup table and recycle its slot.
    /// The parent message reference is released separately.
    pub fn release_delivery(&mut self, index: u16) {
        let delivery = &mut self.deliveries[usize::from(index)];
        if !delivery.active {
            return;
        }
        delivery.active = false;
        let client_id = delivery.client_id;
        let packet_id = delivery.packet_id;
        delivery.next_free = self.delivery_free_head;
        self.delivery_free_head = index;
        self.lookup.remove(client_id, packet_id, index);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_options_packing() {
        let options = PublishedMessage::pack_options(true, QoS::ExactOnce, false, true);
        let msg = PublishedMessage {
            options,
            ..PublishedMessage::empty()
        };
        assert!(msg.retain());
        assert_eq!(msg.qos(), QoS::ExactOnce);
        assert!(!msg.dup());
        assert!(msg.active());

        let mut msg = msg;
        msg.set_active(false);
        assert!(!msg.active());
        assert_eq!(msg.qos(), QoS::ExactOnce);
    }

    #[test]
    fn test_connection_slots_recycle() {
        let mut ctx = Context::new();
        let first = ctx.connection_open().unwrap();
        let second = ctx.connection_open().unwrap();
        assert_ne!(first, second);
        ctx.connection_close(first);
        let third = ctx.connection_open().unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn test_message_refcount_release() {
        let mut ctx = Context::new();
        let msg_idx = ctx.alloc_message().unwrap();
        let prop_idx = ctx.alloc_property().unwrap();
        ctx.messages[usize::from(msg_idx)].property_id = prop_idx;
        ctx.messages[usize::from(msg_idx)].deliveries = 2;

        ctx.release_message_ref(msg_idx);
        assert!(ctx.messages[usize::from(msg_idx)].active());
        assert!(ctx.properties[usize::from(prop_idx)].active);

        ctx.release_message_ref(msg_idx);
        assert!(!ctx.messages[usize::from(msg_idx)].active());
        assert!(!ctx.properties[usize::from(prop_idx)].active);

        // Both slots come back from the free lists.
        assert_eq!(ctx.alloc_message(), Some(msg_idx));
        assert_eq!(ctx.alloc_property(), Some(prop_idx));
    }

    #[test]
    fn test_delivery_lookup() {
        let mut ctx = Context::new();
        let a = ctx.alloc_delivery().unwrap();
        let b = ctx.alloc_delivery().unwrap();
        ctx.deliveries[usize::from(a)].client_id = 3;
        ctx.deliveries[usize::from(a)].packet_id = 7;
        ctx.deliveries[usize::from(b)].client_id = 3;
        ctx.deliveries[usize::from(b)].packet_id = 8;
        ctx.register_delivery(3, 7, a).unwrap();
        ctx.register_delivery(3, 8, b).unwrap();

        assert_eq!(ctx.find_delivery(3, 7), Some(a));
        assert_eq!(ctx.find_delivery(3, 8), Some(b));
        assert_eq!(ctx.find_delivery(4, 7), None);

        ctx.release_delivery(a);
        assert_eq!(ctx.find_delivery(3, 7), None);
        assert_eq!(ctx.find_delivery(3, 8), Some(b));
    }

    #[test]
    fn test_delivery_bucket_overflow_is_fatal() {
        let mut ctx = Context::new();
        // Same (client, packet id) maps to the same bucket every time.
        let mut last = Ok(());
        for _ in 0..=DELIVERY_BUCKET_SIZE {
            let index = ctx.alloc_delivery().unwrap();
            last = ctx.register_delivery(9, 9, index);
        }
        assert_eq!(last.unwrap_err().kind(), ErrorKind::TableOverflow);
    }

    #[test]
    fn test_subscription_mid_is_monotonic_and_skips_zero() {
        let mut sub = Subscription::empty();
        assert_eq!(sub.take_mid(), 1);
        assert_eq!(sub.take_mid(), 2);
        sub.next_mid = u16::MAX;
        assert_eq!(sub.take_mid(), u16::MAX);
        assert_eq!(sub.take_mid(), 1);
    }
}
