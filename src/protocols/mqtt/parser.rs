//! MQTT packet classifier.
//!
//! Only the fixed header's control type is interpreted. Everything the
//! responder sends back is a fixed-size acknowledgment built here.

use crate::error::PacketError;
use std::fmt;

/// Control type of a CONNECT packet.
pub const CONTROL_CONNECT: u8 = 0x1;
/// Control type of a PUBLISH packet.
pub const CONTROL_PUBLISH: u8 = 0x3;

/// CONNACK: session accepted, no session present.
pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

/// Acknowledgment identifier used when a PUBLISH is too short to carry one.
pub const FALLBACK_ACK_ID: [u8; 2] = [0x00, 0x01];

/// Minimum PUBLISH length before bytes 2..4 are taken as the identifier.
const MIN_IDENTIFIED_PUBLISH: usize = 5;

/// A classified inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Connect,
    /// `ack_id` is echoed verbatim in the PUBACK.
    Publish { ack_id: [u8; 2] },
    /// Any other control type, kept for logging.
    Other(u8),
}

impl Packet {
    /// The 4-bit control type this packet was classified from.
    pub fn control_type(&self) -> u8 {
        match self {
            Packet::Connect => CONTROL_CONNECT,
            Packet::Publish { .. } => CONTROL_PUBLISH,
            Packet::Other(kind) => *kind,
        }
    }

    /// Human-readable packet name for logs.
    pub fn name(&self) -> &'static str {
        match self.control_type() {
            0x1 => "CONNECT",
            0x2 => "CONNACK",
            0x3 => "PUBLISH",
            0x4 => "PUBACK",
            0x5 => "PUBREC",
            0x6 => "PUBREL",
            0x7 => "PUBCOMP",
            0x8 => "SUBSCRIBE",
            0x9 => "SUBACK",
            0xA => "UNSUBSCRIBE",
            0xB => "UNSUBACK",
            0xC => "PINGREQ",
            0xD => "PINGRESP",
            0xE => "DISCONNECT",
            0xF => "AUTH",
            _ => "RESERVED",
        }
    }
}

/// Classify one read's worth of bytes by the high nibble of its first byte.
///
/// The PUBLISH identifier is positional: bytes 2 and 3 of the buffer when it
/// is at least 5 bytes long, otherwise [`FALLBACK_ACK_ID`]. No remaining-length
/// or topic-length parsing takes place.
pub fn classify(buf: &[u8]) -> Result<Packet, PacketError> {
    let first = *buf.first().ok_or(PacketError::Empty)?;

    let packet = match first >> 4 {
        CONTROL_CONNECT => Packet::Connect,
        CONTROL_PUBLISH => {
            let ack_id = if buf.len() >= MIN_IDENTIFIED_PUBLISH {
                [buf[2], buf[3]]
            } else {
                FALLBACK_ACK_ID
            };
            Packet::Publish { ack_id }
        }
        kind => Packet::Other(kind),
    };

    Ok(packet)
}

/// Build a PUBACK for the given identifier.
pub fn puback(ack_id: [u8; 2]) -> [u8; 4] {
    [0x40, 0x02, ack_id[0], ack_id[1]]
}

/// Borrowed view of a PUBLISH packet's topic and payload.
///
/// Produced by [`inspect_publish`] for logging only.
#[derive(Debug, PartialEq, Eq)]
pub struct PublishView<'a> {
    pub qos: u8,
    pub topic: &'a str,
    pub packet_id: Option<u16>,
    pub payload: &'a [u8],
}

/// Decode the variable header of a PUBLISH packet.
///
/// Returns `None` if the buffer is not a well-formed, complete PUBLISH.
pub fn inspect_publish(buf: &[u8]) -> Option<PublishView<'_>> {
    let first = *buf.first()?;
    if first >> 4 != CONTROL_PUBLISH {
        return None;
    }
    let qos = (first >> 1) & 0x03;

    let (remaining, header_len) = decode_remaining_length(&buf[1..])?;
    let body = buf.get(1 + header_len..1 + header_len + remaining)?;

    let topic_len = u16::from_be_bytes([*body.first()?, *body.get(1)?]) as usize;
    let topic = std::str::from_utf8(body.get(2..2 + topic_len)?).ok()?;
    let mut offset = 2 + topic_len;

    let packet_id = if qos > 0 {
        let id = u16::from_be_bytes([*body.get(offset)?, *body.get(offset + 1)?]);
        offset += 2;
        Some(id)
    } else {
        None
    };

    Some(PublishView {
        qos,
        topic,
        packet_id,
        payload: &body[offset..],
    })
}

/// Decode an MQTT variable byte integer, returning the value and bytes consumed.
fn decode_remaining_length(buf: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in buf.iter().take(4).enumerate() {
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Lowercase hex rendering for log fields.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_connect() {
        assert_eq!(classify(&[0x10, 0x00]), Ok(Packet::Connect));
        // Flags in the low nibble are ignored
        assert_eq!(classify(&[0x1F]), Ok(Packet::Connect));
    }

    #[test]
    fn test_classify_publish_positional_id() {
        let packet = [0x30, 0x05, 0x00, 0x03, 0x61, 0x2f, 0x62];
        assert_eq!(
            classify(&packet),
            Ok(Packet::Publish {
                ack_id: [0x00, 0x03]
            })
        );

        // QoS 1 flags still land in the publish bucket
        assert_eq!(
            classify(&[0x32, 0x09, 0xAB, 0xCD, 0x00]),
            Ok(Packet::Publish {
                ack_id: [0xAB, 0xCD]
            })
        );
    }

    #[test]
    fn test_classify_short_publish_uses_fallback() {
        for packet in [&[0x30][..], &[0x30, 0x02], &[0x30, 0x02, 0x00, 0x07]] {
            assert_eq!(
                classify(packet),
                Ok(Packet::Publish {
                    ack_id: FALLBACK_ACK_ID
                })
            );
        }
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify(&[0x82, 0x00]), Ok(Packet::Other(0x8)));
        assert_eq!(classify(&[0xC0, 0x00]), Ok(Packet::Other(0xC)));
        assert_eq!(classify(&[0x00]), Ok(Packet::Other(0x0)));
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(classify(&[]), Err(PacketError::Empty));
    }

    #[test]
    fn test_responses() {
        assert_eq!(CONNACK_ACCEPTED, [0x20, 0x02, 0x00, 0x00]);
        assert_eq!(puback([0x00, 0x03]), [0x40, 0x02, 0x00, 0x03]);
        assert_eq!(puback(FALLBACK_ACK_ID), [0x40, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn test_packet_names() {
        assert_eq!(Packet::Connect.name(), "CONNECT");
        assert_eq!(Packet::Publish { ack_id: [0, 1] }.name(), "PUBLISH");
        assert_eq!(Packet::Other(0x8).name(), "SUBSCRIBE");
        assert_eq!(Packet::Other(0x0).name(), "RESERVED");
    }

    #[test]
    fn test_inspect_publish_qos0() {
        let packet = [0x30, 0x05, 0x00, 0x03, 0x61, 0x2f, 0x62];
        let view = inspect_publish(&packet).unwrap();
        assert_eq!(view.qos, 0);
        assert_eq!(view.topic, "a/b");
        assert_eq!(view.packet_id, None);
        assert!(view.payload.is_empty());
    }

    #[test]
    fn test_inspect_publish_qos1_with_payload() {
        let mut packet = vec![0x32, 0x00, 0x00, 0x08];
        packet.extend_from_slice(b"rgb/ctrl");
        packet.extend_from_slice(&[0x00, 0x2A]);
        packet.extend_from_slice(br#"{"cmd":"set"}"#);
        packet[1] = (packet.len() - 2) as u8;

        let view = inspect_publish(&packet).unwrap();
        assert_eq!(view.qos, 1);
        assert_eq!(view.topic, "rgb/ctrl");
        assert_eq!(view.packet_id, Some(42));
        assert_eq!(view.payload, br#"{"cmd":"set"}"#);

        // The positional identifier is the topic length, not the packet id
        assert_eq!(
            classify(&packet),
            Ok(Packet::Publish {
                ack_id: [0x00, 0x08]
            })
        );
    }

    #[test]
    fn test_inspect_publish_multibyte_length() {
        let payload = vec![b'x'; 200];
        let mut packet = vec![0x30];
        let remaining = 2 + 1 + payload.len();
        packet.push((remaining % 128) as u8 | 0x80);
        packet.push((remaining / 128) as u8);
        packet.extend_from_slice(&[0x00, 0x01, b't']);
        packet.extend_from_slice(&payload);

        let view = inspect_publish(&packet).unwrap();
        assert_eq!(view.topic, "t");
        assert_eq!(view.payload.len(), 200);
    }

    #[test]
    fn test_inspect_rejects_malformed() {
        assert!(inspect_publish(&[0x10, 0x00]).is_none());
        assert!(inspect_publish(&[0x30, 0x0A, 0x00, 0x03]).is_none());
        assert!(inspect_publish(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF]).is_none());
    }

    #[test]
    fn test_hex() {
        assert_eq!(Hex(&[0x20, 0x02, 0x0a]).to_string(), "20020a");
        assert_eq!(Hex(&[]).to_string(), "");
    }
}
