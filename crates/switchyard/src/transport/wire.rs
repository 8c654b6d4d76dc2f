//! TCP record layout.
//!
//! Records are length-delimited by [`LengthDelimitedCodec`]. The first record
//! of a connection is the greeting: one byte of socket type followed by the
//! sender's identity (possibly empty). Every later record is one frame,
//! prefixed by a flags byte whose [`MORE`] bit says another frame of the same
//! message follows.
//!
//! [`LengthDelimitedCodec`]: tokio_util::codec::LengthDelimitedCodec

use bytes::{BufMut, Bytes, BytesMut};
use switchyard_core::{Error, Frame, Identity, Message, Result, SocketType};

pub(crate) const MORE: u8 = 0x01;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Greeting {
    pub(crate) kind: SocketType,
    pub(crate) identity: Option<Identity>,
}

pub(crate) fn encode_greeting(kind: SocketType, identity: Option<&Identity>) -> Bytes {
    let identity = identity.map(Identity::as_bytes);
    let mut buf = BytesMut::with_capacity(1 + identity.map_or(0, Bytes::len));
    buf.put_u8(kind.native_value());
    if let Some(identity) = identity {
        buf.put_slice(identity);
    }
    buf.freeze()
}

pub(crate) fn decode_greeting(record: Bytes) -> Result<Greeting> {
    let Some(&native) = record.first() else {
        return Err(Error::Protocol {
            context: "empty greeting".to_string(),
        });
    };
    let kind = SocketType::from_native(native).ok_or_else(|| Error::Protocol {
        context: format!("unknown socket type {native} in greeting"),
    })?;
    let identity = (record.len() > 1).then(|| Identity::new(record.slice(1..)));
    Ok(Greeting { kind, identity })
}

/// One record per frame, `MORE` set on all but the last.
pub(crate) fn encode_message(message: &Message) -> impl Iterator<Item = Bytes> + '_ {
    let last = message.frame_count() - 1;
    message.frames().iter().enumerate().map(move |(i, frame)| {
        let mut buf = BytesMut::with_capacity(1 + frame.len());
        buf.put_u8(if i < last { MORE } else { 0 });
        buf.put_slice(frame.as_ref());
        buf.freeze()
    })
}

/// Collects frame records until one without `MORE` completes a message.
#[derive(Debug, Default)]
pub(crate) struct MessageAssembler {
    frames: Vec<Frame>,
}

impl MessageAssembler {
    pub(crate) fn push(&mut self, record: Bytes) -> Result<Option<Message>> {
        let Some(&flags) = record.first() else {
            return Err(Error::Protocol {
                context: "frame record without flags".to_string(),
            });
        };
        if flags & !MORE != 0 {
            return Err(Error::Protocol {
                context: format!("unknown frame flags {flags:#04x}"),
            });
        }
        self.frames.push(Frame::new(record.slice(1..)));
        if flags & MORE != 0 {
            return Ok(None);
        }
        Message::new(std::mem::take(&mut self.frames)).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_carries_type_and_optional_identity() {
        let id = Identity::from("AAAA-0001");
        let greeting = decode_greeting(encode_greeting(SocketType::Dealer, Some(&id))).unwrap();
        assert_eq!(greeting.kind, SocketType::Dealer);
        assert_eq!(greeting.identity, Some(id));

        let anonymous = decode_greeting(encode_greeting(SocketType::Router, None)).unwrap();
        assert_eq!(anonymous.identity, None);
        assert!(decode_greeting(Bytes::from_static(&[3])).is_err());
        assert!(decode_greeting(Bytes::new()).is_err());
    }

    #[test]
    fn multipart_message_is_reassembled_at_the_last_frame() {
        let message = Message::new(vec![
            Frame::from("AAAA-0001"),
            Frame::empty(),
            Frame::from("body"),
        ])
        .unwrap();
        let records: Vec<_> = encode_message(&message).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[1][..], &[MORE][..]);

        let mut assembler = MessageAssembler::default();
        assert_eq!(assembler.push(records[0].clone()).unwrap(), None);
        assert_eq!(assembler.push(records[1].clone()).unwrap(), None);
        assert_eq!(assembler.push(records[2].clone()).unwrap(), Some(message));
    }

    #[test]
    fn malformed_records_are_protocol_errors() {
        let mut assembler = MessageAssembler::default();
        assert!(matches!(assembler.push(Bytes::new()), Err(Error::Protocol { .. })));
        assert!(matches!(
            assembler.push(Bytes::from_static(&[0x80, b'x'])),
            Err(Error::Protocol { .. })
        ));
    }
}
