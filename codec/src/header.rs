// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{Buffer, ByteArray, DecodeError, EncodePacket, EncodeError, QoS, VarInt, VarIntError};

/// Largest control packet the broker accepts, fixed header included.
///
/// A declared remaining length that would push a packet past this bound is
/// rejected before any payload is read.
pub const MAX_PACKET_SIZE: usize = 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    /// Request to connect to broker
    #[default]
    Connect,

    /// Broker reply to connect request
    ConnectAck,

    /// Publish message
    Publish { dup: bool, qos: QoS, retain: bool },

    /// Publish acknowledgement
    PublishAck,

    /// Publish received
    PublishReceived,

    /// Publish release
    PublishRelease,

    /// Publish complete
    PublishComplete,

    /// Client subscribe request
    Subscribe,

    /// Subscribe acknowledgement
    SubscribeAck,

    /// Unsubscribe request
    Unsubscribe,

    /// Unsubscribe acknowledgement
    UnsubscribeAck,

    /// Client ping request
    PingRequest,

    /// Server ping response
    PingResponse,

    /// Client is disconnecting
    Disconnect,
}

impl PacketType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::PublishReceived => 5,
            PacketType::PublishRelease => 6,
            PacketType::PublishComplete => 7,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
        };

        let flags_bits = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0b0000_0000 };
                let qos = match qos {
                    QoS::AtMostOnce => 0b0000_0000,
                    QoS::AtLeastOnce => 0b0000_0010,
                    QoS::ExactOnce => 0b0000_0100,
                };
                let retain = if retain { 0b0000_0001 } else { 0b0000_0000 };
                dup | qos | retain
            }
            // Bits 3,2,1 and 0 of the fixed header in the PUBREL, SUBSCRIBE
            // and UNSUBSCRIBE packets are reserved and MUST be set to
            // 0,0,1,0 [MQTT-2.2.2-1].
            PacketType::PublishRelease | PacketType::Subscribe | PacketType::Unsubscribe => {
                0b0000_0010
            }
            _ => 0b0000_0000,
        };
        (type_bits << 4) | flags_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    /// Parse packet type from one byte data.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacketFlags` if the low flag bits are not the value
    /// reserved for the packet type. If invalid flags are received, the
    /// receiver MUST close the network connection [MQTT-2.2.2-2].
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        let required_flag = match type_bits {
            3 => {
                let dup = (flag & 0b0000_1000) == 0b0000_1000;
                let retain = (flag & 0b0000_0001) == 0b0000_0001;
                let qos = match flag & 0b0000_0110 {
                    0b0000_0000 => QoS::AtMostOnce,
                    0b0000_0010 => QoS::AtLeastOnce,
                    0b0000_0100 => QoS::ExactOnce,
                    _ => {
                        log::error!("header: Got invalid QoS in Publish: {flag:#b}");
                        return Err(DecodeError::InvalidPacketFlags);
                    }
                };
                return Ok(Self::Publish { dup, qos, retain });
            }
            6 | 8 | 10 => 0b0000_0010,
            1 | 2 | 4 | 5 | 7 | 9 | 11..=14 => 0b0000_0000,
            t => {
                log::error!("header: Invalid packet type bits: {t:#b}");
                return Err(DecodeError::InvalidPacketType);
            }
        };

        if flag != required_flag {
            log::error!("header: Got invalid packet flag {flag:#b} for type {type_bits}");
            return Err(DecodeError::InvalidPacketFlags);
        }

        Ok(match type_bits {
            1 => Self::Connect,
            2 => Self::ConnectAck,
            4 => Self::PublishAck,
            5 => Self::PublishReceived,
            6 => Self::PublishRelease,
            7 => Self::PublishComplete,
            8 => Self::Subscribe,
            9 => Self::SubscribeAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubscribeAck,
            12 => Self::PingRequest,
            13 => Self::PingResponse,
            _ => Self::Disconnect,
        })
    }
}

/// Fixed header part of a mqtt control packet. It consists of at least two
/// bytes.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,

    /// `Remaining Length` uses variable length encoding method. The 7th bit
    /// in a byte is used to indicate that more bytes follow. The maximum
    /// number of bytes in the `Remaining Length` field is 4.
    remaining_length: VarInt,
}

impl FixedHeader {
    /// Create a new fixed header with `packet_type` and `remaining_length`.
    ///
    /// # Errors
    ///
    /// Returns error if `remaining_length` is invalid.
    pub fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, VarIntError> {
        let remaining_length = VarInt::from(remaining_length)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }

    /// Total size of the packet this header introduces.
    #[must_use]
    pub const fn packet_bytes(&self) -> usize {
        self.bytes() + self.remaining_length.value()
    }

    /// Decode a fixed header.
    ///
    /// Unlike the per-packet decoders this runs against a receive buffer
    /// that may hold a partial packet, so a truncated header is reported as
    /// `Incomplete` rather than malformed. A truncated variable byte
    /// integer is indistinguishable from one that is still arriving;
    /// malformed encodings (five bytes, non-minimum) stay hard errors.
    ///
    /// # Errors
    ///
    /// Returns `Incomplete`, `InvalidPacketType`/`InvalidPacketFlags`,
    /// `InvalidVarInt`, or `PacketTooLarge`.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        if ba.remaining_bytes() < 2 {
            return Err(DecodeError::Incomplete);
        }
        let flag = ba.read_byte()?;
        let packet_type = PacketType::try_from(flag)?;
        let remaining_length = match VarInt::decode(ba) {
            Ok(v) => v,
            Err(DecodeError::OutOfRange) => return Err(DecodeError::Incomplete),
            Err(err) => return Err(err),
        };

        let header = Self {
            packet_type,
            remaining_length,
        };
        if header.packet_bytes() > MAX_PACKET_SIZE {
            log::error!(
                "header: remaining length {} exceeds max packet size",
                remaining_length
            );
            return Err(DecodeError::PacketTooLarge);
        }
        Ok(header)
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        let packet_type: u8 = self.packet_type.into();
        buf.write_u8(packet_type)?;
        let len_bytes = self.remaining_length.encode(buf)?;
        Ok(PacketType::bytes() + len_bytes)
    }
}
