//! Envelope model: the routing prefix of a message and the payload behind it.
//!
//! A router-style endpoint prepends the sender's identity to every inbound
//! message. Anything downstream that wants to reply splits the message into
//! an [`Envelope`] and a payload, builds new payload frames, and sends the
//! envelope back out unmodified. The broker itself never splits messages: it
//! forwards them whole, which is what keeps the envelope intact.

use crate::{Error, Frame, Identity, Message, Result};

/// Where the envelope of a message ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeShape {
    /// The first `n` frames, one identity frame per router hop.
    Hops(usize),
    /// Every frame up to and including the first empty delimiter frame.
    Delimited,
}

impl EnvelopeShape {
    /// Envelope for a message that crossed exactly one router.
    pub const SINGLE_HOP: Self = Self::Hops(1);
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self::SINGLE_HOP
    }
}

/// The routing frames of a message, replayed verbatim on the reply leg.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    frames: Vec<Frame>,
}

impl Envelope {
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The identity of the nearest router peer, i.e. the first frame.
    pub fn identity(&self) -> Option<Identity> {
        self.frames
            .first()
            .filter(|f| !f.is_empty())
            .map(Identity::from)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A message split into its [`Envelope`] and its payload frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedMessage {
    envelope: Envelope,
    payload: Vec<Frame>,
}

impl RoutedMessage {
    /// Splits `message` according to `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the message is too short for the
    /// shape, has no delimiter, or carries no payload after the envelope.
    pub fn split(message: Message, shape: EnvelopeShape) -> Result<Self> {
        let mut frames = message.into_frames();
        let envelope_len = match shape {
            EnvelopeShape::Hops(hops) => hops,
            EnvelopeShape::Delimited => {
                frames
                    .iter()
                    .position(Frame::is_empty)
                    .ok_or_else(|| Error::Protocol {
                        context: "message has no envelope delimiter".to_string(),
                    })?
                    + 1
            }
        };

        if frames.len() <= envelope_len {
            return Err(Error::Protocol {
                context: format!(
                    "message has {} frame(s), expected an envelope of {envelope_len} plus payload",
                    frames.len()
                ),
            });
        }

        let payload = frames.split_off(envelope_len);
        Ok(Self {
            envelope: Envelope { frames },
            payload,
        })
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn payload(&self) -> &[Frame] {
        &self.payload
    }

    /// The last payload frame, where request bodies conventionally live.
    pub fn body(&self) -> &Frame {
        &self.payload[self.payload.len() - 1]
    }

    /// Builds a reply that carries this message's envelope ahead of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyMessage`] if both the envelope and `payload` are
    /// empty.
    pub fn reply(&self, payload: impl IntoIterator<Item = Frame>) -> Result<Message> {
        let mut frames = self.envelope.frames.clone();
        frames.extend(payload);
        Message::new(frames)
    }

    /// Reassembles the original message, envelope first.
    pub fn to_message(&self) -> Message {
        let mut frames = self.envelope.frames.clone();
        frames.extend(self.payload.iter().cloned());
        // `split` guarantees a non-empty payload.
        Message::from_nonempty(frames)
    }
}

impl From<RoutedMessage> for Message {
    fn from(routed: RoutedMessage) -> Self {
        let mut frames = routed.envelope.frames;
        frames.extend(routed.payload);
        Self::from_nonempty(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(frames: &[&'static str]) -> Message {
        Message::new(frames.iter().map(|f| Frame::from(*f)).collect()).unwrap()
    }

    #[test]
    fn single_hop_split_keeps_identity() {
        let routed =
            RoutedMessage::split(msg(&["AAAA-0001", "request #1"]), EnvelopeShape::SINGLE_HOP)
                .unwrap();
        assert_eq!(routed.envelope().identity(), Some(Identity::from("AAAA-0001")));
        assert_eq!(routed.body().to_string(), "request #1");
    }

    #[test]
    fn delimited_split_includes_delimiter() {
        let routed =
            RoutedMessage::split(msg(&["hop-2", "hop-1", "", "body"]), EnvelopeShape::Delimited)
                .unwrap();
        assert_eq!(routed.envelope().len(), 3);
        assert_eq!(routed.payload(), &[Frame::from("body")]);
    }

    #[test]
    fn reply_replays_envelope_verbatim() {
        let original = msg(&["\u{0}id", "x", "request"]);
        let routed = RoutedMessage::split(original.clone(), EnvelopeShape::Hops(2)).unwrap();
        let reply = routed.reply([Frame::from("response")]).unwrap();
        assert_eq!(&reply.frames()[..2], &original.frames()[..2]);
        assert_eq!(reply.last().to_string(), "response");
        assert_eq!(Message::from(routed), original);
    }

    #[test]
    fn too_short_or_undelimited_messages_are_rejected() {
        assert!(matches!(
            RoutedMessage::split(msg(&["AAAA-0001"]), EnvelopeShape::SINGLE_HOP),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(
            RoutedMessage::split(msg(&["a", "b"]), EnvelopeShape::Delimited),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(
            RoutedMessage::split(msg(&["a", ""]), EnvelopeShape::Delimited),
            Err(Error::Protocol { .. })
        ));
    }
}
