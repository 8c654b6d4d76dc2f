use std::fmt;

/// The closed set of endpoint kinds.
///
/// Each kind is a pure description: how outbound messages pick a peer, whether
/// inbound messages gain an identity frame, and which peer kinds it may talk
/// to. The transport reads these rules; nothing dispatches on a type
/// hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketType {
    /// Exclusive one-to-one connection.
    Pair,
    /// Fan-out to every subscriber; never blocks, drops on a full queue.
    Publisher,
    /// Receives publisher messages matching one of its prefixes.
    Subscriber,
    /// Round-robin out, fair-queued in; carries no envelope of its own.
    Dealer,
    /// Addresses peers by a leading identity frame in both directions.
    Router,
    /// Receive-only end of a pipeline.
    Pull,
    /// Send-only, round-robin end of a pipeline.
    Push,
}

/// How a socket chooses the peer that receives an outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundRouting {
    /// Next peer in rotation; skips full peers and blocks only if all are full.
    RoundRobin,
    /// The first frame names the peer; it is stripped before delivery.
    ByIdentity,
    /// Every peer gets a copy; full peers are skipped.
    FanOut,
    /// The socket cannot send.
    Disabled,
}

impl SocketType {
    /// All socket types, in native-value order.
    pub const ALL: [Self; 7] = [
        Self::Pair,
        Self::Publisher,
        Self::Subscriber,
        Self::Dealer,
        Self::Router,
        Self::Pull,
        Self::Push,
    ];

    /// Transport-native constant for this socket type (ZMTP numbering).
    pub const fn native_value(self) -> u8 {
        match self {
            Self::Pair => 0,
            Self::Publisher => 1,
            Self::Subscriber => 2,
            Self::Dealer => 5,
            Self::Router => 6,
            Self::Pull => 7,
            Self::Push => 8,
        }
    }

    pub const fn from_native(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pair),
            1 => Some(Self::Publisher),
            2 => Some(Self::Subscriber),
            5 => Some(Self::Dealer),
            6 => Some(Self::Router),
            7 => Some(Self::Pull),
            8 => Some(Self::Push),
            _ => None,
        }
    }

    pub const fn outbound(self) -> OutboundRouting {
        match self {
            Self::Pair | Self::Dealer | Self::Push => OutboundRouting::RoundRobin,
            Self::Router => OutboundRouting::ByIdentity,
            Self::Publisher => OutboundRouting::FanOut,
            Self::Subscriber | Self::Pull => OutboundRouting::Disabled,
        }
    }

    pub const fn can_send(self) -> bool {
        !matches!(self.outbound(), OutboundRouting::Disabled)
    }

    pub const fn can_receive(self) -> bool {
        !matches!(self, Self::Publisher | Self::Push)
    }

    /// Router sockets prepend the sender identity to every inbound message.
    pub const fn prepends_identity(self) -> bool {
        matches!(self, Self::Router)
    }

    /// Subscribers filter inbound messages on their first frame.
    pub const fn filters_inbound(self) -> bool {
        matches!(self, Self::Subscriber)
    }

    /// Maximum number of simultaneous peers, if limited.
    pub const fn max_peers(self) -> Option<usize> {
        match self {
            Self::Pair => Some(1),
            _ => None,
        }
    }

    /// Whether a socket of this type may be connected to `peer`.
    pub const fn is_compatible(self, peer: Self) -> bool {
        matches!(
            (self, peer),
            (Self::Pair, Self::Pair)
                | (Self::Publisher, Self::Subscriber)
                | (Self::Subscriber, Self::Publisher)
                | (Self::Dealer | Self::Router, Self::Dealer | Self::Router)
                | (Self::Push, Self::Pull)
                | (Self::Pull, Self::Push)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pair => "PAIR",
            Self::Publisher => "PUB",
            Self::Subscriber => "SUB",
            Self::Dealer => "DEALER",
            Self::Router => "ROUTER",
            Self::Pull => "PULL",
            Self::Push => "PUSH",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_values_round_trip() {
        for kind in SocketType::ALL {
            assert_eq!(SocketType::from_native(kind.native_value()), Some(kind));
        }
        assert_eq!(SocketType::from_native(3), None);
        assert_eq!(SocketType::from_native(42), None);
    }

    #[test]
    fn compatibility_is_symmetric() {
        for a in SocketType::ALL {
            for b in SocketType::ALL {
                assert_eq!(a.is_compatible(b), b.is_compatible(a), "{a} / {b}");
            }
        }
    }

    #[test]
    fn broker_pairs_are_compatible() {
        assert!(SocketType::Router.is_compatible(SocketType::Dealer));
        assert!(SocketType::Dealer.is_compatible(SocketType::Dealer));
        assert!(!SocketType::Router.is_compatible(SocketType::Push));
        assert!(!SocketType::Publisher.is_compatible(SocketType::Publisher));
    }

    #[test]
    fn direction_rules() {
        assert!(!SocketType::Pull.can_send());
        assert!(!SocketType::Subscriber.can_send());
        assert!(!SocketType::Push.can_receive());
        assert!(!SocketType::Publisher.can_receive());
        assert!(SocketType::Router.prepends_identity());
        assert!(!SocketType::Dealer.prepends_identity());
        assert_eq!(SocketType::Router.outbound(), OutboundRouting::ByIdentity);
        assert_eq!(SocketType::Dealer.outbound(), OutboundRouting::RoundRobin);
    }
}
