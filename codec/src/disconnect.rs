// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    Buffer, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketType, VarInt,
};

/// DISCONNECT packet, the final packet from a client.
///
/// A remaining length of zero means normal disconnection (reason 0x00)
/// [MQTT-3.14.2.1]; otherwise the body carries a reason byte followed by a
/// properties section this broker skips.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectPacket {
    reason_code: u8,
}

impl DisconnectPacket {
    #[must_use]
    pub const fn new(reason_code: u8) -> Self {
        Self { reason_code }
    }

    #[must_use]
    pub const fn reason_code(&self) -> u8 {
        self.reason_code
    }
}

impl<'a> DecodePacket<'a> for DisconnectPacket {
    fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() == 0 {
            return Ok(Self::default());
        }

        let reason_code = ba.read_byte()?;
        if fixed_header.remaining_length() > 1 {
            let properties_length = VarInt::decode(ba)?.value();
            ba.skip(properties_length)?;
        }
        if ba.remaining_bytes() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self { reason_code })
    }
}

impl EncodePacket for DisconnectPacket {
    fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        let remaining_length = if self.reason_code == 0 { 0 } else { 1 };
        let fixed_header = FixedHeader::new(PacketType::Disconnect, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let written = fixed_header.encode(buf)?;
        if self.reason_code != 0 {
            buf.write_u8(self.reason_code)?;
        }
        Ok(written + remaining_length)
    }
}
