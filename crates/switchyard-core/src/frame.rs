use crate::{Error, Result};
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;

/// An opaque byte sequence, the atomic unit of a [`Message`].
///
/// Frames are reference counted ([`Bytes`]), so cloning a frame or a message
/// never copies payload bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The zero-length frame, used as an envelope delimiter.
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Frame {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Frame {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

/// An ordered, non-empty sequence of [`Frame`]s.
///
/// Frame order is preserved end-to-end: nothing between the sender and the
/// receiver reorders, merges or splits frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Frame>,
}

impl Message {
    /// Builds a message from its frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyMessage`] if `frames` is empty.
    pub fn new(frames: Vec<Frame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(Error::EmptyMessage);
        }
        Ok(Self { frames })
    }

    /// Callers guarantee `frames` is non-empty.
    pub(crate) fn from_nonempty(frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty());
        Self { frames }
    }

    pub fn single(frame: impl Into<Frame>) -> Self {
        Self {
            frames: vec![frame.into()],
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn first(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn last(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    /// Total payload size across all frames, in bytes.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }

    pub fn push_front(&mut self, frame: impl Into<Frame>) {
        self.frames.insert(0, frame.into());
    }

    pub fn push_back(&mut self, frame: impl Into<Frame>) {
        self.frames.push(frame.into());
    }

    /// Splits off the leading frame. The remainder is `None` when the message
    /// consisted of that single frame.
    pub fn split_first(self) -> (Frame, Option<Self>) {
        let mut frames = self.frames;
        let head = frames.remove(0);
        let rest = (!frames.is_empty()).then_some(Self { frames });
        (head, rest)
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Self::single(frame)
    }
}

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Self::single(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::single(s)
    }
}

impl TryFrom<Vec<Frame>> for Message {
    type Error = Error;

    fn try_from(frames: Vec<Frame>) -> Result<Self> {
        Self::new(frames)
    }
}

impl IntoIterator for Message {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_is_rejected() {
        assert_eq!(Message::new(Vec::new()), Err(Error::EmptyMessage));
    }

    #[test]
    fn split_first_keeps_remaining_order() {
        let msg = Message::new(vec!["id".into(), "a".into(), "b".into()]).unwrap();
        let (head, rest) = msg.split_first();
        assert_eq!(head, Frame::from("id"));
        let rest = rest.unwrap();
        assert_eq!(rest.frames(), &[Frame::from("a"), Frame::from("b")]);
    }

    #[test]
    fn split_first_of_single_frame_has_no_rest() {
        let (head, rest) = Message::single("only").split_first();
        assert_eq!(head.to_string(), "only");
        assert!(rest.is_none());
    }

    #[test]
    fn push_front_prepends() {
        let mut msg = Message::single("payload");
        msg.push_front("AAAA-0001");
        assert_eq!(msg.first().to_string(), "AAAA-0001");
        assert_eq!(msg.last().to_string(), "payload");
        assert_eq!(msg.byte_len(), "AAAA-0001".len() + "payload".len());
    }
}
