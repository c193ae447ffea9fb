// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! PUBACK, PUBREC, PUBREL and PUBCOMP share one wire shape: a packet
//! identifier, an optional reason code and optional properties. A reason
//! code of zero and no properties may be omitted, leaving a remaining
//! length of 2 [MQTT-3.4.2-1]; the encoders here do exactly that on
//! success.

use crate::{
    Buffer, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketId, PacketType, VarInt, PACKET_ID_BYTES,
};

fn decode_ack(ba: &mut ByteArray, expected: PacketType) -> Result<(PacketId, u8), DecodeError> {
    let fixed_header = FixedHeader::decode(ba)?;
    if fixed_header.packet_type() != expected {
        return Err(DecodeError::InvalidPacketType);
    }
    if fixed_header.remaining_length() < PACKET_ID_BYTES {
        return Err(DecodeError::InvalidRemainingLength);
    }
    let packet_id = ba.read_u16()?;
    if packet_id == 0 {
        return Err(DecodeError::InvalidPacketId);
    }

    let mut reason_code = 0;
    if fixed_header.remaining_length() > PACKET_ID_BYTES {
        reason_code = ba.read_byte()?;
    }
    if fixed_header.remaining_length() > PACKET_ID_BYTES + 1 {
        let properties_length = VarInt::decode(ba)?.value();
        ba.skip(properties_length)?;
    }
    if ba.remaining_bytes() != 0 {
        return Err(DecodeError::InvalidRemainingLength);
    }
    Ok((packet_id, reason_code))
}

fn encode_ack(
    buf: &mut Buffer,
    packet_type: PacketType,
    packet_id: PacketId,
    reason_code: u8,
) -> Result<usize, EncodeError> {
    let remaining_length = if reason_code == 0 {
        PACKET_ID_BYTES
    } else {
        PACKET_ID_BYTES + 1
    };
    let fixed_header = FixedHeader::new(packet_type, remaining_length)
        .map_err(|_| EncodeError::InvalidVarInt)?;
    let written = fixed_header.encode(buf)?;
    buf.write_u16(packet_id)?;
    if reason_code != 0 {
        buf.write_u8(reason_code)?;
    }
    Ok(written + remaining_length)
}

macro_rules! ack_packet {
    ($name:ident, $packet_type:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            packet_id: PacketId,
            reason_code: u8,
        }

        impl $name {
            #[must_use]
            pub const fn new(packet_id: PacketId) -> Self {
                Self {
                    packet_id,
                    reason_code: 0,
                }
            }

            #[must_use]
            pub const fn with_reason(packet_id: PacketId, reason_code: u8) -> Self {
                Self {
                    packet_id,
                    reason_code,
                }
            }

            #[must_use]
            pub const fn packet_id(&self) -> PacketId {
                self.packet_id
            }

            #[must_use]
            pub const fn reason_code(&self) -> u8 {
                self.reason_code
            }
        }

        impl<'a> DecodePacket<'a> for $name {
            fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
                let (packet_id, reason_code) = decode_ack(ba, $packet_type)?;
                Ok(Self {
                    packet_id,
                    reason_code,
                })
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
                encode_ack(buf, $packet_type, self.packet_id, self.reason_code)
            }
        }
    };
}

ack_packet!(
    PublishAckPacket,
    PacketType::PublishAck,
    "PUBACK packet, the response to a QoS 1 PUBLISH."
);
ack_packet!(
    PublishReceivedPacket,
    PacketType::PublishReceived,
    "PUBREC packet, the first response to a QoS 2 PUBLISH."
);
ack_packet!(
    PublishReleasePacket,
    PacketType::PublishRelease,
    "PUBREL packet, the response to PUBREC."
);
ack_packet!(
    PublishCompletePacket,
    PacketType::PublishComplete,
    "PUBCOMP packet, the response to PUBREL and the end of the QoS 2 exchange."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_ack_is_two_bytes_of_body() {
        let packet = PublishAckPacket::new(7);
        let mut buf = Buffer::new(8);
        assert_eq!(packet.encode(&mut buf).unwrap(), 4);
        assert_eq!(buf.readable(), &[0x40, 0x02, 0x00, 0x07]);

        let packet = PublishReceivedPacket::new(9);
        let mut buf = Buffer::new(8);
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf.readable(), &[0x50, 0x02, 0x00, 0x09]);

        // PUBREL carries the reserved flag bits 0b0010.
        let packet = PublishReleasePacket::new(9);
        let mut buf = Buffer::new(8);
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf.readable(), &[0x62, 0x02, 0x00, 0x09]);

        let packet = PublishCompletePacket::new(9);
        let mut buf = Buffer::new(8);
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf.readable(), &[0x70, 0x02, 0x00, 0x09]);
    }

    #[test]
    fn test_ack_round_trip() {
        let packet = PublishAckPacket::with_reason(260, 0x80);
        let mut buf = Buffer::new(8);
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf.readable(), &[0x40, 0x03, 0x01, 0x04, 0x80]);

        let bytes = buf.readable().to_vec();
        let mut ba = ByteArray::new(&bytes);
        let decoded = PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_ack_reason_defaults_to_success() {
        let bytes = [0x40, 0x02, 0x00, 0x07];
        let mut ba = ByteArray::new(&bytes);
        let decoded = PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id(), 7);
        assert_eq!(decoded.reason_code(), 0);
    }

    #[test]
    fn test_ack_with_properties_section() {
        // Remaining length 4: id, reason, empty properties.
        let bytes = [0x70, 0x04, 0x00, 0x07, 0x10, 0x00];
        let mut ba = ByteArray::new(&bytes);
        let decoded = PublishCompletePacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id(), 7);
        assert_eq!(decoded.reason_code(), 0x10);
    }

    #[test]
    fn test_ack_rejects_wrong_type() {
        let bytes = [0x40, 0x02, 0x00, 0x07];
        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            PublishReceivedPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidPacketType
        );
    }

    #[test]
    fn test_ack_rejects_zero_packet_id() {
        let bytes = [0x40, 0x02, 0x00, 0x00];
        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            PublishAckPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidPacketId
        );
    }
}
