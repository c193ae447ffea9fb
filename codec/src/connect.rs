// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    Buffer, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketType, ProtocolLevel, VarInt,
};

/// Connect flag byte of the CONNECT variable header.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-+-+-+-+-+-+-+-+
/// |U|P|R| Q |W|C|0|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// U = username, P = password, R = will retain, Q = will qos, W = will,
/// C = clean start. Bit 0 is reserved and must be zero [MQTT-3.1.2-3].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFlags(u8);

impl ConnectFlags {
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn clean_start(self) -> bool {
        self.0 & 0b0000_0010 != 0
    }

    #[must_use]
    pub const fn will(self) -> bool {
        self.0 & 0b0000_0100 != 0
    }

    #[must_use]
    pub const fn will_qos(self) -> u8 {
        (self.0 >> 3) & 0b0000_0011
    }

    #[must_use]
    pub const fn will_retain(self) -> bool {
        self.0 & 0b0010_0000 != 0
    }

    #[must_use]
    pub const fn has_password(self) -> bool {
        self.0 & 0b0100_0000 != 0
    }

    #[must_use]
    pub const fn has_username(self) -> bool {
        self.0 & 0b1000_0000 != 0
    }
}

impl From<u8> for ConnectFlags {
    fn from(v: u8) -> Self {
        Self(v)
    }
}

/// CONNECT packet, the first packet sent by a client after the network
/// connection is established.
///
/// Variable header: protocol name `MQTT`, protocol level, connect flags,
/// keepalive, properties. Payload: client identifier, then will
/// properties/topic/message, username and password as gated by the connect
/// flags. Connect and will properties are skipped; the fields this broker
/// acts on are stored in the session record.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectPacket<'a> {
    connect_flags: ConnectFlags,
    keepalive: u16,
    client_id: &'a [u8],
    will_topic: Option<&'a [u8]>,
    will_message: Option<&'a [u8]>,
    username: Option<&'a [u8]>,
    password: Option<&'a [u8]>,
}

impl<'a> ConnectPacket<'a> {
    #[must_use]
    pub fn new(client_id: &'a [u8], keepalive: u16, clean_start: bool) -> Self {
        let flags = if clean_start { 0b0000_0010 } else { 0 };
        Self {
            connect_flags: ConnectFlags(flags),
            keepalive,
            client_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn connect_flags(&self) -> ConnectFlags {
        self.connect_flags
    }

    #[must_use]
    pub const fn keepalive(&self) -> u16 {
        self.keepalive
    }

    #[must_use]
    pub const fn client_id(&self) -> &'a [u8] {
        self.client_id
    }

    #[must_use]
    pub const fn will_topic(&self) -> Option<&'a [u8]> {
        self.will_topic
    }

    #[must_use]
    pub const fn will_message(&self) -> Option<&'a [u8]> {
        self.will_message
    }

    #[must_use]
    pub const fn username(&self) -> Option<&'a [u8]> {
        self.username
    }

    #[must_use]
    pub const fn password(&self) -> Option<&'a [u8]> {
        self.password
    }

    pub fn set_will(&mut self, topic: &'a [u8], message: &'a [u8]) {
        self.connect_flags.0 |= 0b0000_0100;
        self.will_topic = Some(topic);
        self.will_message = Some(message);
    }

    pub fn set_username(&mut self, username: &'a [u8]) {
        self.connect_flags.0 |= 0b1000_0000;
        self.username = Some(username);
    }

    pub fn set_password(&mut self, password: &'a [u8]) {
        self.connect_flags.0 |= 0b0100_0000;
        self.password = Some(password);
    }
}

impl<'a> DecodePacket<'a> for ConnectPacket<'a> {
    fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
        let _fixed_header = FixedHeader::decode(ba)?;

        // Protocol name must be the UTF-8 string "MQTT" [MQTT-3.1.2-1].
        let protocol_name = ba.read_string()?;
        if protocol_name != b"MQTT" {
            log::error!("connect: invalid protocol name");
            return Err(DecodeError::InvalidProtocolName);
        }

        // Only protocol level 5 is served; the caller answers lower levels
        // with CONNACK 0x84.
        let level = ba.read_byte()?;
        if ProtocolLevel::try_from(level)? != ProtocolLevel::V5 {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let connect_flags = ConnectFlags::from(ba.read_byte()?);
        if connect_flags.bits() & 0b0000_0001 != 0 {
            // Reserved bit must be zero [MQTT-3.1.2-3].
            return Err(DecodeError::InvalidPacketFlags);
        }
        let keepalive = ba.read_u16()?;

        // Connect properties are not acted upon.
        let properties_length = VarInt::decode(ba)?.value();
        ba.skip(properties_length)?;

        let client_id = ba.read_string()?;

        let mut will_topic = None;
        let mut will_message = None;
        if connect_flags.will() {
            let will_properties_length = VarInt::decode(ba)?.value();
            ba.skip(will_properties_length)?;
            will_topic = Some(ba.read_string()?);
            will_message = Some(ba.read_string()?);
        }

        let username = if connect_flags.has_username() {
            Some(ba.read_string()?)
        } else {
            None
        };
        let password = if connect_flags.has_password() {
            Some(ba.read_string()?)
        } else {
            None
        };

        if ba.remaining_bytes() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            connect_flags,
            keepalive,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket<'_> {
    fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        // Protocol name + level + flags + keepalive + empty properties.
        let mut remaining_length = 2 + 4 + 1 + 1 + 2 + 1;
        remaining_length += 2 + self.client_id.len();
        if let (Some(topic), Some(message)) = (self.will_topic, self.will_message) {
            // Empty will properties, then topic and message.
            remaining_length += 1 + 2 + topic.len() + 2 + message.len();
        }
        if let Some(username) = self.username {
            remaining_length += 2 + username.len();
        }
        if let Some(password) = self.password {
            remaining_length += 2 + password.len();
        }

        let fixed_header = FixedHeader::new(PacketType::Connect, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let mut written = fixed_header.encode(buf)?;

        buf.write_string(b"MQTT")?;
        buf.write_u8(ProtocolLevel::V5 as u8)?;
        buf.write_u8(self.connect_flags.bits())?;
        buf.write_u16(self.keepalive)?;
        buf.write_u8(0)?;
        buf.write_string(self.client_id)?;
        if let (Some(topic), Some(message)) = (self.will_topic, self.will_message) {
            buf.write_u8(0)?;
            buf.write_string(topic)?;
            buf.write_string(message)?;
        }
        if let Some(username) = self.username {
            buf.write_string(username)?;
        }
        if let Some(password) = self.password {
            buf.write_string(password)?;
        }

        written += remaining_length;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_round_trip() {
        let mut packet = ConnectPacket::new(b"c1", 60, true);
        packet.set_username(b"user");
        packet.set_password(b"secret");
        packet.set_will(b"will/topic", b"gone");

        let mut buf = Buffer::new(256);
        packet.encode(&mut buf).unwrap();

        let bytes = buf.readable().to_vec();
        let mut ba = ByteArray::new(&bytes);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.connect_flags().clean_start());
        assert!(decoded.connect_flags().will());
        assert_eq!(decoded.client_id(), b"c1");
        assert_eq!(decoded.keepalive(), 60);
        assert_eq!(decoded.username(), Some(&b"user"[..]));
    }

    #[test]
    fn test_connect_rejects_wrong_protocol_name() {
        let packet = ConnectPacket::new(b"c1", 30, true);
        let mut buf = Buffer::new(64);
        packet.encode(&mut buf).unwrap();
        let mut bytes = buf.readable().to_vec();
        // "MQTT" -> "MQTX"
        bytes[7] = b'X';

        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            ConnectPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidProtocolName
        );
    }

    #[test]
    fn test_connect_rejects_old_protocol_level() {
        let packet = ConnectPacket::new(b"c1", 30, true);
        let mut buf = Buffer::new(64);
        packet.encode(&mut buf).unwrap();
        let mut bytes = buf.readable().to_vec();
        // Level byte sits right after the protocol name.
        bytes[8] = 4;

        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            ConnectPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidProtocolLevel
        );
    }

    #[test]
    fn test_connect_rejects_reserved_flag_bit() {
        let packet = ConnectPacket::new(b"c1", 30, true);
        let mut buf = Buffer::new(64);
        packet.encode(&mut buf).unwrap();
        let mut bytes = buf.readable().to_vec();
        bytes[9] |= 0b0000_0001;

        let mut ba = ByteArray::new(&bytes);
        assert_eq!(
            ConnectPacket::decode(&mut ba).unwrap_err(),
            DecodeError::InvalidPacketFlags
        );
    }
}
