// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Packet codec for the MQTT 5.0 wire format.
//!
//! Framing is explicit: [`FixedHeader::decode`] reports `Incomplete` while
//! bytes are still arriving, and per-packet decoders run over the bytes of
//! exactly one complete control packet, borrowing topic and payload slices
//! instead of copying.

#![deny(
    warnings,
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic
)]
#![allow(clippy::module_name_repetitions)]

mod ack;
mod base;
mod buffer;
mod byte_array;
mod connack;
mod connect;
mod disconnect;
mod error;
mod header;
mod ping;
mod property;
mod publish;
mod suback;
mod subscribe;
pub mod topic;
mod unsuback;
mod unsubscribe;
mod var_int;

pub use ack::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
};
pub use base::{DecodePacket, EncodePacket, PacketId, ProtocolLevel, QoS, PACKET_ID_BYTES};
pub use buffer::Buffer;
pub use byte_array::ByteArray;
pub use connack::{ConnectAckPacket, ConnectReasonCode};
pub use connect::{ConnectFlags, ConnectPacket};
pub use disconnect::DisconnectPacket;
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, PacketType, MAX_PACKET_SIZE};
pub use ping::{PingRequestPacket, PingResponsePacket};
pub use property::{PropertyType, PublishProperties, MAX_SUBSCRIPTION_IDS};
pub use publish::PublishPacket;
pub use suback::{
    SubscribeAckPacket, SUBACK_QOS0, SUBACK_QOS1, SUBACK_QOS2, SUBACK_UNSPECIFIED_ERROR,
};
pub use subscribe::{SubscribePacket, SubscribePacketBuilder, SubscribeTopic};
pub use topic::FilterKind;
pub use unsuback::{
    UnsubscribeAckPacket, UNSUBACK_NO_SUBSCRIPTION_EXISTED, UNSUBACK_SUCCESS,
};
pub use unsubscribe::{UnsubscribePacket, UnsubscribePacketBuilder};
pub use var_int::{VarInt, VarIntError, VAR_INT_MAX};
