use crate::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use std::fmt;

/// Leading byte of identities assigned by a router to peers that did not set
/// one. Application identities never start with it.
const AUTO_IDENTITY_PREFIX: u8 = 0x00;

/// An opaque token addressing one peer of a router-style endpoint.
///
/// Uniqueness per active connection is the transport's concern, not the
/// broker's: the broker only ever replays identities it received.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Bytes);

impl Identity {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Draws a printable `XXXX-XXXX` identity from the caller's RNG.
    ///
    /// The RNG is passed explicitly so identity generation is reproducible
    /// when seeded.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let hi: u16 = rng.random();
        let lo: u16 = rng.random();
        Self(Bytes::from(format!("{hi:04X}-{lo:04X}")))
    }

    /// Builds the identity a router hands out to its `counter`-th anonymous
    /// peer.
    pub fn auto(counter: u32) -> Self {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(AUTO_IDENTITY_PREFIX);
        buf.put_u32(counter);
        Self(buf.freeze())
    }

    /// Returns `true` for identities assigned by a router rather than chosen
    /// by the peer.
    pub fn is_auto(&self) -> bool {
        self.0.first() == Some(&AUTO_IDENTITY_PREFIX)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(self.0.clone())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic()) {
            // Checked above: every byte is printable ASCII.
            f.write_str(&String::from_utf8_lossy(&self.0))
        } else {
            for b in &self.0 {
                write!(f, "{b:02X}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

impl From<Frame> for Identity {
    fn from(frame: Frame) -> Self {
        Self(frame.into_bytes())
    }
}

impl From<&Frame> for Identity {
    fn from(frame: &Frame) -> Self {
        Self(frame.as_bytes().clone())
    }
}

impl From<&'static str> for Identity {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}
