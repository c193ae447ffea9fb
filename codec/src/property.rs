// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{Buffer, ByteArray, DecodeError, EncodeError, VarInt};

/// Upper bound on subscription identifiers carried by one PUBLISH.
///
/// Multiple identifiers are included when the publication matched more than
/// one subscription of the receiving client.
pub const MAX_SUBSCRIPTION_IDS: usize = 8;

/// Property identifiers understood by this codec.
///
/// Any other identifier on an inbound packet is a protocol error; the
/// decoder fails closed instead of guessing at the length of a value it
/// does not know.
#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// Byte. 0 means unspecified bytes, 1 means UTF-8 payload.
    PayloadFormatIndicator = 0x01,

    /// Four byte integer, lifetime of the message in seconds.
    MessageExpiryInterval = 0x02,

    /// UTF-8 string describing the content of the payload.
    ContentType = 0x03,

    /// UTF-8 string used as the topic name for a response message.
    ResponseTopic = 0x08,

    /// Binary data used to correlate a response with its request.
    CorrelationData = 0x09,

    /// Variable byte integer identifying the matched subscription,
    /// 1 to 268,435,455. Zero is a protocol error.
    SubscriptionIdentifier = 0x0b,

    /// Two byte integer standing in for the topic name.
    TopicAlias = 0x23,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x23 => Ok(Self::TopicAlias),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// The PUBLISH property set the broker understands.
///
/// String and binary values borrow from the packet bytes; the broker copies
/// whatever it needs to keep into its arenas.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishProperties<'a> {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<&'a [u8]>,
    pub response_topic: Option<&'a [u8]>,
    pub correlation_data: Option<&'a [u8]>,
    pub topic_alias: Option<u16>,

    subscription_ids: [u32; MAX_SUBSCRIPTION_IDS],
    subscription_id_count: u8,
}

impl<'a> PublishProperties<'a> {
    #[must_use]
    pub fn subscription_ids(&self) -> &[u32] {
        &self.subscription_ids[..usize::from(self.subscription_id_count)]
    }

    /// Attach a subscription identifier, ignoring duplicates.
    ///
    /// # Errors
    ///
    /// Returns `TooManyData` when the fixed capacity is exhausted.
    pub fn add_subscription_id(&mut self, id: u32) -> Result<(), EncodeError> {
        if self.subscription_ids().contains(&id) {
            return Ok(());
        }
        if usize::from(self.subscription_id_count) >= MAX_SUBSCRIPTION_IDS {
            return Err(EncodeError::TooManyData);
        }
        self.subscription_ids[usize::from(self.subscription_id_count)] = id;
        self.subscription_id_count += 1;
        Ok(())
    }

    /// Byte length of the property body, identifier bytes included but not
    /// the leading property-length varint.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let mut length = 0;
        if self.payload_format_indicator.is_some() {
            length += PropertyType::bytes() + 1;
        }
        if self.message_expiry_interval.is_some() {
            length += PropertyType::bytes() + 4;
        }
        if let Some(content_type) = self.content_type {
            length += PropertyType::bytes() + 2 + content_type.len();
        }
        if let Some(response_topic) = self.response_topic {
            length += PropertyType::bytes() + 2 + response_topic.len();
        }
        if let Some(correlation_data) = self.correlation_data {
            length += PropertyType::bytes() + 2 + correlation_data.len();
        }
        if self.topic_alias.is_some() {
            length += PropertyType::bytes() + 2;
        }
        for id in self.subscription_ids() {
            length += PropertyType::bytes() + VarInt::encoded_bytes(*id);
        }
        length
    }

    /// Decode the property section: leading length varint, then properties
    /// until the declared length is consumed.
    ///
    /// # Errors
    ///
    /// Fails closed with `InvalidPropertyType` on identifiers outside the
    /// understood set, and with `InvalidRemainingLength` when a property
    /// value crosses the declared section length.
    pub fn decode(ba: &mut ByteArray<'a>) -> Result<Self, DecodeError> {
        let length = VarInt::decode(ba)?.value();
        let mut props = Self::default();
        let start = ba.offset();

        while ba.offset() - start < length {
            let id = ba.read_byte()?;
            match PropertyType::try_from(id)? {
                PropertyType::PayloadFormatIndicator => {
                    props.payload_format_indicator = Some(ba.read_byte()?);
                }
                PropertyType::MessageExpiryInterval => {
                    props.message_expiry_interval = Some(ba.read_u32()?);
                }
                PropertyType::ContentType => {
                    props.content_type = Some(ba.read_string()?);
                }
                PropertyType::ResponseTopic => {
                    props.response_topic = Some(ba.read_string()?);
                }
                PropertyType::CorrelationData => {
                    props.correlation_data = Some(ba.read_string()?);
                }
                PropertyType::SubscriptionIdentifier => {
                    let id = VarInt::decode(ba)?;
                    let id = u32::try_from(id.value())
                        .map_err(|_| DecodeError::InvalidVarInt)?;
                    if id == 0 {
                        return Err(DecodeError::InvalidVarInt);
                    }
                    if props.add_subscription_id(id).is_err() {
                        log::error!("property: too many subscription identifiers");
                        return Err(DecodeError::TooManyData);
                    }
                }
                PropertyType::TopicAlias => {
                    props.topic_alias = Some(ba.read_u16()?);
                }
            }
        }

        if ba.offset() - start != length {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(props)
    }

    /// Encode the property section: length varint, then each present
    /// property.
    ///
    /// # Errors
    ///
    /// Returns error if the buffer has no room left.
    pub fn encode(&self, buf: &mut Buffer) -> Result<usize, EncodeError> {
        let body = self.bytes();
        let length =
            VarInt::from(body).map_err(|_| EncodeError::InvalidVarInt)?;
        let mut written = length.encode(buf)?;

        if let Some(v) = self.payload_format_indicator {
            buf.write_u8(PropertyType::PayloadFormatIndicator as u8)?;
            buf.write_u8(v)?;
            written += 2;
        }
        if let Some(v) = self.message_expiry_interval {
            buf.write_u8(PropertyType::MessageExpiryInterval as u8)?;
            buf.write_u32(v)?;
            written += 5;
        }
        if let Some(v) = self.content_type {
            buf.write_u8(PropertyType::ContentType as u8)?;
            buf.write_string(v)?;
            written += 3 + v.len();
        }
        if let Some(v) = self.response_topic {
            buf.write_u8(PropertyType::ResponseTopic as u8)?;
            buf.write_string(v)?;
            written += 3 + v.len();
        }
        if let Some(v) = self.correlation_data {
            buf.write_u8(PropertyType::CorrelationData as u8)?;
            buf.write_string(v)?;
            written += 3 + v.len();
        }
        if let Some(v) = self.topic_alias {
            buf.write_u8(PropertyType::TopicAlias as u8)?;
            buf.write_u16(v)?;
            written += 3;
        }
        for id in self.subscription_ids() {
            buf.write_u8(PropertyType::SubscriptionIdentifier as u8)?;
            let id = VarInt::from(*id as usize).map_err(|_| EncodeError::InvalidVarInt)?;
            written += 1 + id.encode(buf)?;
        }

        Ok(written)
    }
}
