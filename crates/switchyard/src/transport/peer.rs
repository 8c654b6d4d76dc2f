use crate::transport::mailbox::{Inbox, PushError};
use parking_lot::Mutex;
use std::sync::Arc;
use switchyard_core::{Identity, Message};
use tokio::sync::Notify;
use tracing::trace;

pub(crate) type PeerId = u64;

/// The outbound half of a peer link.
///
/// For in-process peers `target` is the remote endpoint's inbox; for TCP
/// peers it is the session's write queue. `sender` is the identity the
/// remote side knows us by, stamped on every message pushed through.
#[derive(Clone)]
pub(crate) struct Pipe {
    target: Arc<Inbox>,
    sender: Identity,
}

impl Pipe {
    pub(crate) fn new(target: Arc<Inbox>, sender: Identity) -> Self {
        Self { target, sender }
    }

    pub(crate) fn try_deliver(&self, message: Message) -> Result<(), PushError<Message>> {
        self.target.try_deliver(self.sender.clone(), message)
    }

    pub(crate) async fn deliver(&self, message: Message) -> Result<(), PushError<Message>> {
        self.target.deliver(self.sender.clone(), message).await
    }

    /// Whether the far end has gone away.
    pub(crate) fn is_closed(&self) -> bool {
        self.target.is_closed()
    }
}

struct Peer {
    id: PeerId,
    identity: Identity,
    pipe: Pipe,
}

#[derive(Default)]
struct PeerTable {
    peers: Vec<Peer>,
    cursor: usize,
    next_id: PeerId,
    next_auto: u32,
}

impl PeerTable {
    /// Drops peers whose far end has closed, so their identities are free
    /// again.
    fn prune_closed(&mut self) {
        while let Some(index) = self.peers.iter().position(|p| p.pipe.is_closed()) {
            let peer = self.remove_at(index);
            trace!(peer = %peer.identity, "pruned closed peer");
        }
    }

    fn is_full(&self, limit: Option<usize>) -> bool {
        limit.is_some_and(|max| self.peers.len() >= max)
    }

    /// The requested identity, unless it is empty or already taken, in which
    /// case a fresh auto identity.
    fn resolve(&mut self, requested: Option<Identity>) -> Identity {
        if let Some(identity) = requested.filter(|identity| {
            !identity.is_empty() && !self.peers.iter().any(|p| &p.identity == identity)
        }) {
            return identity;
        }
        loop {
            let identity = Identity::auto(self.next_auto);
            self.next_auto = self.next_auto.wrapping_add(1);
            if !self.peers.iter().any(|p| p.identity == identity) {
                return identity;
            }
        }
    }

    fn push(&mut self, identity: Identity, pipe: Pipe) -> PeerId {
        let id = self.next_id;
        self.next_id += 1;
        self.peers.push(Peer { id, identity, pipe });
        id
    }

    fn remove_at(&mut self, index: usize) -> Peer {
        let peer = self.peers.remove(index);
        if self.cursor > index {
            self.cursor -= 1;
        }
        peer
    }
}

/// The set of peers attached to one endpoint.
#[derive(Default)]
pub(crate) struct Peers {
    table: Mutex<PeerTable>,
    attached: Notify,
}

/// One side of an in-process link, as seen by [`attach_linked`].
pub(crate) struct LinkEnd<'a> {
    pub(crate) peers: &'a Peers,
    pub(crate) inbox: &'a Arc<Inbox>,
    /// The identity this side asked to be known by.
    pub(crate) identity: Option<Identity>,
    pub(crate) max_peers: Option<usize>,
}

/// Attaches two endpoints to each other with both peer tables locked, so a
/// concurrent link cannot claim the same identity in between.
///
/// Returns the identity `a` addresses `b` by and the one `b` addresses `a`
/// by, or `None` if either side has no room for another peer. `a` and `b`
/// must be distinct tables.
pub(crate) fn attach_linked(a: LinkEnd<'_>, b: LinkEnd<'_>) -> Option<(Identity, Identity)> {
    let (mut a_table, mut b_table) = if std::ptr::from_ref(a.peers) < std::ptr::from_ref(b.peers)
    {
        let a_table = a.peers.table.lock();
        (a_table, b.peers.table.lock())
    } else {
        let b_table = b.peers.table.lock();
        (a.peers.table.lock(), b_table)
    };
    a_table.prune_closed();
    b_table.prune_closed();
    if a_table.is_full(a.max_peers) || b_table.is_full(b.max_peers) {
        return None;
    }

    let a_sees = a_table.resolve(b.identity);
    let b_sees = b_table.resolve(a.identity);
    a_table.push(a_sees.clone(), Pipe::new(b.inbox.clone(), b_sees.clone()));
    b_table.push(b_sees.clone(), Pipe::new(a.inbox.clone(), a_sees.clone()));
    drop(a_table);
    drop(b_table);

    a.peers.attached.notify_waiters();
    b.peers.attached.notify_waiters();
    Some((a_sees, b_sees))
}

impl Peers {
    /// Attaches a peer under the identity it asked for, or an auto identity
    /// when that one is empty or held by a live peer. Returns `None` when
    /// `limit` peers are already attached.
    pub(crate) fn attach_resolved(
        &self,
        requested: Option<Identity>,
        limit: Option<usize>,
        pipe: Pipe,
    ) -> Option<(PeerId, Identity)> {
        let attached = {
            let mut table = self.table.lock();
            table.prune_closed();
            if table.is_full(limit) {
                return None;
            }
            let identity = table.resolve(requested);
            (table.push(identity.clone(), pipe), identity)
        };
        self.attached.notify_waiters();
        Some(attached)
    }

    pub(crate) fn detach(&self, id: PeerId) -> Option<Identity> {
        let mut table = self.table.lock();
        let index = table.peers.iter().position(|p| p.id == id)?;
        Some(table.remove_at(index).identity)
    }

    pub(crate) fn clear(&self) {
        let mut table = self.table.lock();
        table.peers.clear();
        table.cursor = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().peers.len()
    }

    /// Every peer, starting at the round-robin cursor, which then advances by
    /// one so consecutive sends start at consecutive peers.
    pub(crate) fn rotation(&self) -> Vec<(PeerId, Pipe)> {
        let mut table = self.table.lock();
        let len = table.peers.len();
        if len == 0 {
            return Vec::new();
        }
        let start = table.cursor % len;
        table.cursor = (start + 1) % len;
        (0..len)
            .map(|offset| {
                let peer = &table.peers[(start + offset) % len];
                (peer.id, peer.pipe.clone())
            })
            .collect()
    }

    pub(crate) fn all(&self) -> Vec<(PeerId, Pipe)> {
        self.table
            .lock()
            .peers
            .iter()
            .map(|p| (p.id, p.pipe.clone()))
            .collect()
    }

    pub(crate) fn by_identity(&self, identity: &Identity) -> Option<(PeerId, Pipe)> {
        self.table
            .lock()
            .peers
            .iter()
            .find(|p| &p.identity == identity)
            .map(|p| (p.id, p.pipe.clone()))
    }

    /// Resolves once at least one peer is attached.
    pub(crate) async fn wait_attached(&self) {
        loop {
            let notified = self.attached.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.len() > 0 {
                return;
            }
            notified.await;
        }
    }
}
