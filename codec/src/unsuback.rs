// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    Buffer, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketId, PacketType, VarInt, PACKET_ID_BYTES,
};

/// Reason code for a filter whose subscription was removed.
pub const UNSUBACK_SUCCESS: u8 = 0x00;
/// Reason code for a filter that matched no subscription of the client.
pub const UNSUBACK_NO_SUBSCRIPTION_EXISTED: u8 = 0x11;

/// UNSUBACK packet, the broker's reply to UNSUBSCRIBE.
///
/// One reason code per filter of the UNSUBSCRIBE payload, in payload order.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubscribeAckPacket<'a> {
    packet_id: PacketId,
    reason_codes: &'a [u8],
}

impl<'a> UnsubscribeAckPacket<'a> {
    #[must_use]
    pub const fn new(packet_id: PacketId, reason_codes: &'a [u8]) -> Self {
        Self {
            packet_id,
            reason_codes,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn reason_codes(&self) -> &'a [u8] {
        self.reason_codes
    }
}

impl<'a> DecodePacket<'a> for UnsubscribeAckPacket<'a> {
    fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::UnsubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }
        let packet_id = ba.read_u16()?;
        let properties_length = VarInt::decode(ba)?.value();
        ba.skip(properties_length)?;
        let reason_codes = ba.read_bytes(ba.remaining_bytes())?;
        if reason_codes.is_empty() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self {
            packet_id,
            reason_codes,
        })
    }
}

impl EncodePacket for UnsubscribeAckPacket<'_> {
    fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        let remaining_length = PACKET_ID_BYTES + 1 + self.reason_codes.len();
        let fixed_header = FixedHeader::new(PacketType::UnsubscribeAck, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let written = fixed_header.encode(buf)?;
        buf.write_u16(self.packet_id)?;
        buf.write_u8(0)?;
        buf.append(self.reason_codes)?;
        Ok(written + remaining_length)
    }
}
