// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Capacity and timing bounds of the broker.
//!
//! Every table is sized here at compile time; the process allocates once at
//! startup and never grows.

/// Maximum number of concurrently open connections.
pub const MAX_CLIENTS: usize = 1024;

/// Largest control packet accepted or produced, fixed header included.
/// Receive and send buffers hold exactly one maximum packet.
pub const MAX_PACKET_SIZE: usize = codec::MAX_PACKET_SIZE;

/// Published messages awaiting delivery or acknowledgement.
pub const MAX_PUBLISHED_MESSAGES: usize = 1024;

/// Outstanding deliveries across all subscribers.
pub const MAX_DELIVERY_MESSAGES: usize = 8 * MAX_PUBLISHED_MESSAGES;

/// Active subscriptions across all clients.
pub const MAX_SUBSCRIPTIONS: usize = 8192;

/// Topic filters accepted in a single SUBSCRIBE or UNSUBSCRIBE packet.
pub const MAX_SUBSCRIBE_TOPICS: usize = 64;

/// Client identity arena: client ids, usernames, passwords, will data.
pub const MAX_CLIENT_DATA: usize = MAX_CLIENTS * 1024;

/// Topic filter arena.
pub const MAX_TOPIC_DATA: usize = MAX_SUBSCRIPTIONS * 64;

/// Message arena: topic + payload bytes of published messages.
pub const MAX_MESSAGE_DATA: usize = MAX_DELIVERY_MESSAGES * MAX_PACKET_SIZE;

/// Delivery lookup table width in bits; the table has `2^BITS` buckets.
pub const DELIVERY_TABLE_BITS: u32 = 13;

/// Number of buckets in the `(client, packet id)` delivery lookup table.
pub const DELIVERY_TABLE_SIZE: usize = 1 << DELIVERY_TABLE_BITS;

/// Delivery indices one lookup bucket can hold. Overflow is treated as a
/// configuration bug: the table is provisioned well above the QoS
/// in-flight window.
pub const DELIVERY_BUCKET_SIZE: usize = 8;

/// How often the retry sweep runs.
pub const RETRANSMISSION_CHECK_MS: u64 = 5_000;

/// Delay before an unacknowledged delivery is retransmitted.
pub const RETRY_TIMEOUT_MS: u64 = 20_000;

/// Retransmissions before a delivery is expired.
pub const MAX_RETRY_ATTEMPTS: u8 = 5;

/// "absent" marker for u16 slot indices.
pub const NIL: u16 = u16::MAX;

/// "absent" marker for u32 arena offsets.
pub const NIL_OFFSET: u32 = u32::MAX;
