// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    topic, Buffer, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketId, PacketType, PublishProperties, QoS, PACKET_ID_BYTES,
};

/// PUBLISH packet, used to transport application messages in both
/// directions.
///
/// Topic, payload and the string-valued properties borrow from the packet
/// bytes; the broker copies them into its message arena when it stores the
/// publish.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishPacket<'a> {
    dup: bool,
    retain: bool,
    qos: QoS,
    topic: &'a [u8],

    /// Only meaningful when `qos` is 1 or 2; zero otherwise.
    packet_id: PacketId,

    properties: PublishProperties<'a>,
    payload: &'a [u8],
}

impl<'a> PublishPacket<'a> {
    /// A QoS 0 publish.
    #[must_use]
    pub fn new(topic: &'a [u8], payload: &'a [u8]) -> Self {
        Self {
            topic,
            payload,
            ..Self::default()
        }
    }

    /// A QoS 1/2 publish carrying a packet identifier.
    #[must_use]
    pub fn with_packet_id(
        topic: &'a [u8],
        payload: &'a [u8],
        qos: QoS,
        packet_id: PacketId,
    ) -> Self {
        Self {
            qos,
            topic,
            packet_id,
            payload,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_dup(&mut self, dup: bool) {
        self.dup = dup;
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) {
        self.retain = retain;
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn topic(&self) -> &'a [u8] {
        self.topic
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn properties(&self) -> &PublishProperties<'a> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PublishProperties<'a> {
        &mut self.properties
    }

    #[must_use]
    pub const fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

impl<'a> DecodePacket<'a> for PublishPacket<'a> {
    fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        // The DUP flag MUST be 0 for QoS 0 messages [MQTT-3.3.1-2].
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let topic_name = ba.read_string()?;
        if topic::validate_pub_topic(topic_name).is_err() {
            return Err(DecodeError::InvalidTopic);
        }

        let packet_id = if qos == QoS::AtMostOnce {
            0
        } else {
            let packet_id = ba.read_u16()?;
            // A zero packet identifier is a protocol error [MQTT-2.2.1-2].
            if packet_id == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = PublishProperties::decode(ba)?;

        // The payload is whatever the remaining length has left; a zero
        // length payload is valid.
        let end = fixed_header.packet_bytes();
        if ba.offset() > end {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let payload = ba.read_bytes(end - ba.offset())?;

        Ok(Self {
            dup,
            retain,
            qos,
            topic: topic_name,
            packet_id,
            properties,
            payload,
        })
    }
}

impl EncodePacket for PublishPacket<'_> {
    fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        let mut remaining_length = 2 + self.topic.len() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PACKET_ID_BYTES;
        }
        let properties_bytes = self.properties.bytes();
        remaining_length +=
            crate::VarInt::encoded_bytes(properties_bytes as u32) + properties_bytes;

        let fixed_header = FixedHeader::new(
            PacketType::Publish {
                dup: self.dup,
                qos: self.qos,
                retain: self.retain,
            },
            remaining_length,
        )
        .map_err(|_| EncodeError::InvalidVarInt)?;

        let written = fixed_header.encode(buf)?;
        buf.write_string(self.topic)?;
        if self.qos != QoS::AtMostOnce {
            buf.write_u16(self.packet_id)?;
        }
        self.properties.encode(buf)?;
        buf.append(self.payload)?;

        Ok(written + remaining_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_qos0_round_trip() {
        let packet = PublishPacket::new(b"a/b", b"hi");
        let mut buf = Buffer::new(64);
        packet.encode(&mut buf).unwrap();
        // type/flags, remaining length, topic, empty properties, payload.
        assert_eq!(
            buf.readable(),
            &[0x30, 0x08, 0x00, 0x03, b'a', b'/', b'b', 0x00, b'h', b'i']
        );

        let bytes = buf.readable().to_vec();
        let mut ba = ByteArray::new(&bytes);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.payload(), b"hi");
    }

    #[test]
    fn test_publish_qos1_round_trip() {
        let mut packet = PublishPacket::with_packet_id(b"a/b", b"hi", QoS::AtLeastOnce, 7);
        packet.set_dup(true);
        let mut buf = Buffer::new(64);
        packet.encode(&mut buf).unwrap();

        let bytes = buf.readable().to_vec();
        assert_eq!(bytes[0], 0x3a);
        let mut ba = ByteArray::new(&bytes);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.packet_id(), 7);
        assert!(decoded.dup());
    }

    #[test]
    fn test_publish_empty_payload() {
        let packet = PublishPacket::new(b"t", b"");
        let mut buf = Buffer::new(16);
        packet.encode(&mut buf).unwrap();
        let bytes = buf.readable().to_vec();
        let mut ba = ByteArray::new(&bytes);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_publish_rejects_zero_packet_id() {
        let packet = PublishPacket::with_packet_id(b"a", b"x", QoS::AtLeastOnce, 0);
        let mut buf = Buffer::new(16);
        packet.encode(&mut buf).unwrap();
        let bytes = buf.readable().to_vec();
        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            PublishPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidPacketId
        );
    }

    #[test]
    fn test_publish_rejects_wildcard_topic() {
        let packet = PublishPacket::new(b"a/+/b", b"x");
        let mut buf = Buffer::new(16);
        packet.encode(&mut buf).unwrap();
        let bytes = buf.readable().to_vec();
        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            PublishPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidTopic
        );
    }
}
