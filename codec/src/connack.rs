// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    Buffer, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketType, VarInt,
};

/// Reason codes produced in CONNACK packets.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReasonCode {
    /// The connection is accepted.
    #[default]
    Success = 0x00,

    /// The server does not support the requested protocol version.
    UnsupportedProtocolVersion = 0x84,

    /// The client is not authorized to connect.
    NotAuthorized = 0x87,

    /// The server is unavailable, e.g. out of connection slots.
    ServerUnavailable = 0x88,
}

impl TryFrom<u8> for ConnectReasonCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Success),
            0x84 => Ok(Self::UnsupportedProtocolVersion),
            0x87 => Ok(Self::NotAuthorized),
            0x88 => Ok(Self::ServerUnavailable),
            _ => Err(DecodeError::OutOfRange),
        }
    }
}

/// CONNACK packet, the broker's reply to CONNECT.
///
/// Variable header: acknowledge flags (bit 0 is session-present), reason
/// code, properties. This broker keeps no session state across
/// connections, so session-present is always 0 and the properties section
/// is empty; a successful reply is byte-exact `20 03 00 00 00`.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAckPacket {
    session_present: bool,
    reason_code: ConnectReasonCode,
}

impl ConnectAckPacket {
    #[must_use]
    pub const fn new(session_present: bool, reason_code: ConnectReasonCode) -> Self {
        Self {
            session_present,
            reason_code,
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub const fn reason_code(&self) -> ConnectReasonCode {
        self.reason_code
    }
}

impl<'a> DecodePacket<'a> for ConnectAckPacket {
    fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
        let _fixed_header = FixedHeader::decode(ba)?;
        let ack_flags = ba.read_byte()?;
        let session_present = ack_flags & 0b0000_0001 != 0;
        let reason_code = ConnectReasonCode::try_from(ba.read_byte()?)?;
        let properties_length = VarInt::decode(ba)?.value();
        ba.skip(properties_length)?;
        Ok(Self {
            session_present,
            reason_code,
        })
    }
}

impl EncodePacket for ConnectAckPacket {
    fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        // Ack flags, reason code, empty properties.
        let fixed_header = FixedHeader::new(PacketType::ConnectAck, 3)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let written = fixed_header.encode(buf)?;
        buf.write_u8(u8::from(self.session_present))?;
        buf.write_u8(self.reason_code as u8)?;
        buf.write_u8(0)?;
        Ok(written + 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_connack_bytes() {
        let packet = ConnectAckPacket::new(false, ConnectReasonCode::Success);
        let mut buf = Buffer::new(8);
        assert_eq!(packet.encode(&mut buf).unwrap(), 5);
        assert_eq!(buf.readable(), &[0x20, 0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_connack_round_trip() {
        for rc in [
            ConnectReasonCode::Success,
            ConnectReasonCode::UnsupportedProtocolVersion,
            ConnectReasonCode::NotAuthorized,
            ConnectReasonCode::ServerUnavailable,
        ] {
            let packet = ConnectAckPacket::new(false, rc);
            let mut buf = Buffer::new(8);
            packet.encode(&mut buf).unwrap();
            let bytes = buf.readable().to_vec();
            let mut ba = ByteArray::new(&bytes);
            assert_eq!(ConnectAckPacket::decode(&mut ba).unwrap(), packet);
        }
    }
}
