use crate::transport::Context;
use crate::transport::inproc;
use crate::transport::mailbox::{Inbox, PushError};
use crate::transport::peer::{PeerId, Peers};
use crate::transport::tcp;
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use switchyard_core::{Address, Error, Identity, Message, OutboundRouting, Result, SocketType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Per-endpoint settings, fixed when the endpoint is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Capacity of every queue the endpoint owns, in messages.
    pub high_water_mark: usize,
    /// Upper bound on how long a send may wait for queue space. `None` waits
    /// indefinitely.
    pub send_timeout: Option<Duration>,
    /// Delay between TCP connection attempts.
    pub reconnect_interval: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            high_water_mark: 1000,
            send_timeout: None,
            reconnect_interval: Duration::from_millis(100),
        }
    }
}

/// State shared between an [`Endpoint`] and the transport tasks serving it.
pub(crate) struct SocketCore {
    pub(crate) kind: SocketType,
    identity: Mutex<Option<Identity>>,
    pub(crate) inbox: Arc<Inbox>,
    pub(crate) peers: Peers,
    pub(crate) options: EndpointOptions,
    pub(crate) token: CancellationToken,
}

impl SocketCore {
    pub(crate) fn identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }
}

/// A message endpoint of one [`SocketType`].
///
/// Endpoints are owned by a single task; all I/O goes through `&mut self`.
/// Every blocking call observes the owning context's shutdown token and
/// returns [`Error::InterruptedWait`] once it fires.
pub struct Endpoint {
    context: Context,
    core: Arc<SocketCore>,
    attached: bool,
    inproc_names: Vec<String>,
    last_endpoint: Option<String>,
}

impl Endpoint {
    pub(crate) fn new(context: Context, kind: SocketType, options: EndpointOptions) -> Self {
        let inbox = if kind.filters_inbound() {
            Inbox::filtered(options.high_water_mark)
        } else {
            Inbox::new(options.high_water_mark)
        };
        let token = context.shutdown_token().child_token();
        Self {
            core: Arc::new(SocketCore {
                kind,
                identity: Mutex::new(None),
                inbox: Arc::new(inbox),
                peers: Peers::default(),
                options,
                token,
            }),
            context,
            attached: false,
            inproc_names: Vec::new(),
            last_endpoint: None,
        }
    }

    pub fn socket_type(&self) -> SocketType {
        self.core.kind
    }

    pub fn identity(&self) -> Option<Identity> {
        self.core.identity()
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.core.options
    }

    /// The address most recently bound, with the actual port for `tcp://`
    /// addresses bound to port 0.
    pub fn last_endpoint(&self) -> Option<&str> {
        self.last_endpoint.as_deref()
    }

    pub fn peer_count(&self) -> usize {
        self.core.peers.len()
    }

    /// Sets the identity router peers will address this endpoint by.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityAfterAttach`] once the endpoint has been bound
    /// or connected.
    pub fn set_identity(&mut self, identity: Identity) -> Result<()> {
        if self.attached {
            return Err(Error::IdentityAfterAttach);
        }
        *self.core.identity.lock() = Some(identity);
        Ok(())
    }

    pub async fn bind(&mut self, address: &str) -> Result<()> {
        self.ensure_open()?;
        match Address::parse(address)? {
            Address::Inproc { name } => {
                let parked = self.context.registry().lock().bind(&name, &self.core)?;
                inproc::link_pending(&self.core, parked, &name);
                self.inproc_names.push(name);
                self.last_endpoint = Some(address.to_string());
            }
            tcp @ Address::Tcp { .. } => {
                let local = tcp::bind(self.core.clone(), &tcp).await?;
                self.last_endpoint = Some(format!("tcp://{local}"));
            }
        }
        self.attached = true;
        debug!(kind = %self.core.kind, address, "bound");
        Ok(())
    }

    pub async fn connect(&mut self, address: &str) -> Result<()> {
        self.ensure_open()?;
        match Address::parse(address)? {
            Address::Inproc { name } => {
                let mut registry = self.context.registry().lock();
                match registry.lookup(&name) {
                    Some(binder) => {
                        drop(registry);
                        inproc::link(&binder, &self.core)?;
                    }
                    None => registry.park(&name, &self.core),
                }
            }
            tcp @ Address::Tcp { .. } => tcp::connect(self.core.clone(), &tcp)?,
        }
        self.attached = true;
        debug!(kind = %self.core.kind, address, "connected");
        Ok(())
    }

    /// Adds a prefix filter. Only meaningful on subscriber endpoints.
    pub fn subscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        if self.core.inbox.subscribe(prefix.into()) {
            Ok(())
        } else {
            Err(self.unsupported("subscribe"))
        }
    }

    pub fn unsubscribe(&mut self, prefix: impl AsRef<[u8]>) -> Result<()> {
        if self.core.inbox.unsubscribe(prefix.as_ref()) {
            Ok(())
        } else {
            Err(self.unsupported("unsubscribe"))
        }
    }

    /// Sends `message` according to the socket type's outbound routing.
    ///
    /// # Errors
    ///
    /// - [`Error::SendTimeout`] if the configured send timeout elapses while
    ///   every eligible peer queue is full.
    /// - [`Error::SendFailure`] if a router cannot resolve the destination
    ///   identity.
    /// - [`Error::InterruptedWait`] if shutdown fires while blocked.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.ensure_open()?;
        let routing = self.core.kind.outbound();
        if routing == OutboundRouting::Disabled {
            return Err(self.unsupported("send"));
        }

        let core = &self.core;
        let route = async {
            match routing {
                OutboundRouting::ByIdentity => send_addressed(core, message).await,
                OutboundRouting::FanOut => {
                    publish(core, &message);
                    Ok(())
                }
                _ => send_round_robin(core, message).await,
            }
        };
        let bounded = async {
            match core.options.send_timeout {
                Some(timeout) => tokio::time::timeout(timeout, route)
                    .await
                    .unwrap_or(Err(Error::SendTimeout { timeout })),
                None => route.await,
            }
        };

        tokio::select! {
            biased;
            () = core.token.cancelled() => Err(Error::InterruptedWait),
            result = bounded => result,
        }
    }

    /// Waits for the next inbound message.
    pub async fn receive(&mut self) -> Result<Message> {
        self.ensure_open()?;
        if !self.core.kind.can_receive() {
            return Err(self.unsupported("receive"));
        }
        let inbound = tokio::select! {
            biased;
            () = self.core.token.cancelled() => return Err(Error::InterruptedWait),
            inbound = self.core.inbox.pop() => inbound,
        };
        inbound
            .map(|i| self.stamp(i.from, i.message))
            .ok_or(Error::EndpointClosed)
    }

    /// Takes the next inbound message if one is queued.
    pub fn try_receive(&mut self) -> Result<Option<Message>> {
        self.ensure_open()?;
        if !self.core.kind.can_receive() {
            return Err(self.unsupported("receive"));
        }
        Ok(self
            .core
            .inbox
            .try_pop()
            .map(|i| self.stamp(i.from, i.message)))
    }

    /// Whether [`Endpoint::receive`] would return without waiting, either
    /// with a message or with an error.
    pub fn can_receive_without_blocking(&self) -> bool {
        self.core.inbox.is_ready() || self.core.token.is_cancelled()
    }

    /// Number of inbound messages queued and not yet received.
    pub fn queued(&self) -> usize {
        self.core.inbox.len()
    }

    /// Closes the endpoint. Queued inbound messages are dropped and peers
    /// observe the disconnect on their next send.
    pub fn close(self) {}

    pub(crate) fn inbox(&self) -> Arc<Inbox> {
        self.core.inbox.clone()
    }

    fn stamp(&self, from: Identity, mut message: Message) -> Message {
        if self.core.kind.prepends_identity() {
            message.push_front(from.to_frame());
        }
        message
    }

    fn ensure_open(&self) -> Result<()> {
        if self.core.inbox.is_closed() {
            Err(Error::EndpointClosed)
        } else {
            Ok(())
        }
    }

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            socket_type: self.core.kind,
            operation,
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.core.token.cancel();
        self.core.inbox.close();
        self.core.peers.clear();
        if !self.inproc_names.is_empty() {
            let mut registry = self.context.registry().lock();
            for name in &self.inproc_names {
                registry.unbind(name, &self.core);
            }
        }
        trace!(kind = %self.core.kind, "endpoint closed");
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.core.kind)
            .field("identity", &self.core.identity())
            .field("peers", &self.core.peers.len())
            .field("last_endpoint", &self.last_endpoint)
            .finish_non_exhaustive()
    }
}

/// Next peer in rotation that has room. Closed peers are detached on the
/// way; if every peer is full, waits on the first one.
async fn send_round_robin(core: &SocketCore, mut message: Message) -> Result<()> {
    loop {
        let rotation = core.peers.rotation();
        if rotation.is_empty() {
            core.peers.wait_attached().await;
            continue;
        }

        let mut fallback = None;
        for (id, pipe) in rotation {
            match pipe.try_deliver(message) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(m)) => {
                    message = m;
                    if fallback.is_none() {
                        fallback = Some((id, pipe));
                    }
                }
                Err(PushError::Closed(m)) => {
                    message = m;
                    detach(core, id);
                }
            }
        }

        let Some((id, pipe)) = fallback else {
            continue;
        };
        trace!(kind = %core.kind, "all peers full, waiting");
        match pipe.deliver(message).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                message = e.into_inner();
                detach(core, id);
            }
        }
    }
}

/// Strips the leading identity frame and delivers the rest to that peer.
async fn send_addressed(core: &SocketCore, message: Message) -> Result<()> {
    let (head, rest) = message.split_first();
    let identity = Identity::from(head);
    let Some(rest) = rest else {
        return Err(Error::SendFailure {
            reason: format!("message for {identity} has no frames after the identity"),
        });
    };
    let Some((id, pipe)) = core.peers.by_identity(&identity) else {
        return Err(Error::SendFailure {
            reason: format!("no peer with identity {identity}"),
        });
    };
    match pipe.deliver(rest).await {
        Ok(()) => Ok(()),
        Err(_) => {
            detach(core, id);
            Err(Error::SendFailure {
                reason: format!("peer {identity} disconnected"),
            })
        }
    }
}

/// A copy to every peer with room; full peers miss this message.
fn publish(core: &SocketCore, message: &Message) {
    for (id, pipe) in core.peers.all() {
        match pipe.try_deliver(message.clone()) {
            Ok(()) => {}
            Err(PushError::Full(_)) => trace!("subscriber full, dropping message"),
            Err(PushError::Closed(_)) => detach(core, id),
        }
    }
}

fn detach(core: &SocketCore, id: PeerId) {
    if let Some(identity) = core.peers.detach(id) {
        debug!(kind = %core.kind, peer = %identity, "peer detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::Frame;

    fn msg(frames: &[&'static str]) -> Message {
        Message::new(frames.iter().map(|f| Frame::from(*f)).collect()).unwrap()
    }

    #[tokio::test]
    async fn router_stamps_and_strips_identity() {
        let ctx = Context::new();
        let mut router = ctx.socket(SocketType::Router);
        router.bind("inproc://router").await.unwrap();

        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.set_identity(Identity::from("AAAA-0001")).unwrap();
        dealer.connect("inproc://router").await.unwrap();

        dealer.send(msg(&["request #1"])).await.unwrap();
        let received = router.receive().await.unwrap();
        assert_eq!(received, msg(&["AAAA-0001", "request #1"]));

        router.send(msg(&["AAAA-0001", "reply"])).await.unwrap();
        assert_eq!(dealer.receive().await.unwrap(), msg(&["reply"]));
    }

    #[tokio::test]
    async fn router_send_to_unknown_identity_fails() {
        let ctx = Context::new();
        let mut router = ctx.socket(SocketType::Router);
        router.bind("inproc://nobody").await.unwrap();
        let err = router.send(msg(&["ghost", "hello"])).await.unwrap_err();
        assert!(matches!(err, Error::SendFailure { .. }), "{err}");
    }

    #[tokio::test]
    async fn anonymous_peers_get_auto_identities() {
        let ctx = Context::new();
        let mut router = ctx.socket(SocketType::Router);
        router.bind("inproc://auto").await.unwrap();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.connect("inproc://auto").await.unwrap();

        dealer.send(msg(&["hi"])).await.unwrap();
        let received = router.receive().await.unwrap();
        let identity = Identity::from(received.first());
        assert!(identity.is_auto());

        router
            .send(Message::new(vec![identity.to_frame(), Frame::from("back")]).unwrap())
            .await
            .unwrap();
        assert_eq!(dealer.receive().await.unwrap(), msg(&["back"]));
    }

    #[tokio::test]
    async fn dealer_round_robins_across_peers() {
        let ctx = Context::new();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.bind("inproc://rr").await.unwrap();

        let mut a = ctx.socket(SocketType::Dealer);
        a.connect("inproc://rr").await.unwrap();
        let mut b = ctx.socket(SocketType::Dealer);
        b.connect("inproc://rr").await.unwrap();

        for body in ["1", "2", "3", "4"] {
            dealer.send(Message::from(body)).await.unwrap();
        }
        assert_eq!(a.queued(), 2);
        assert_eq!(b.queued(), 2);
    }

    #[tokio::test]
    async fn connect_before_bind_is_linked_on_bind() {
        let ctx = Context::new();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.connect("inproc://later").await.unwrap();
        assert_eq!(dealer.peer_count(), 0);

        let mut router = ctx.socket(SocketType::Router);
        router.bind("inproc://later").await.unwrap();
        assert_eq!(dealer.peer_count(), 1);
        assert_eq!(router.peer_count(), 1);
    }

    #[tokio::test]
    async fn identity_is_frozen_after_attach() {
        let ctx = Context::new();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.connect("inproc://frozen").await.unwrap();
        assert_eq!(
            dealer.set_identity(Identity::from("late")),
            Err(Error::IdentityAfterAttach)
        );
    }

    #[tokio::test]
    async fn address_errors_surface_at_bind() {
        let ctx = Context::new();
        let mut router = ctx.socket(SocketType::Router);
        assert!(matches!(
            router.bind("bogus").await,
            Err(Error::AddressError { .. })
        ));
        router.bind("inproc://taken").await.unwrap();
        let mut other = ctx.socket(SocketType::Router);
        assert!(matches!(
            other.bind("inproc://taken").await,
            Err(Error::AddressError { .. })
        ));
    }

    #[tokio::test]
    async fn incompatible_and_one_way_sockets_are_rejected() {
        let ctx = Context::new();
        let mut router = ctx.socket(SocketType::Router);
        router.bind("inproc://strict").await.unwrap();
        let mut push = ctx.socket(SocketType::Push);
        assert!(matches!(
            push.connect("inproc://strict").await,
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(
            push.receive().await,
            Err(Error::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn pair_accepts_a_single_peer() {
        let ctx = Context::new();
        let mut pair = ctx.socket(SocketType::Pair);
        pair.bind("inproc://pair").await.unwrap();
        let mut first = ctx.socket(SocketType::Pair);
        first.connect("inproc://pair").await.unwrap();
        let mut second = ctx.socket(SocketType::Pair);
        assert!(second.connect("inproc://pair").await.is_err());

        first.send(Message::from("ping")).await.unwrap();
        assert_eq!(pair.receive().await.unwrap(), Message::from("ping"));
    }

    #[tokio::test]
    async fn publisher_fans_out_to_matching_subscribers() {
        let ctx = Context::new();
        let mut publisher = ctx.socket(SocketType::Publisher);
        publisher.bind("inproc://news").await.unwrap();

        let mut weather = ctx.socket(SocketType::Subscriber);
        weather.subscribe("weather").unwrap();
        weather.connect("inproc://news").await.unwrap();
        let mut everything = ctx.socket(SocketType::Subscriber);
        everything.subscribe("").unwrap();
        everything.connect("inproc://news").await.unwrap();

        publisher.send(Message::from("weather: rain")).await.unwrap();
        publisher.send(Message::from("sports: none")).await.unwrap();

        assert_eq!(weather.queued(), 1);
        assert_eq!(everything.queued(), 2);
        assert!(matches!(
            publisher.subscribe("x"),
            Err(Error::Unsupported { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_peer_blocks_until_drained() {
        let ctx = Context::new();
        let mut backend = ctx.socket(SocketType::Dealer);
        backend.bind("inproc://hwm").await.unwrap();
        let mut worker = ctx.socket_with(
            SocketType::Dealer,
            EndpointOptions {
                high_water_mark: 1,
                ..EndpointOptions::default()
            },
        );
        worker.connect("inproc://hwm").await.unwrap();

        backend.send(Message::from("one")).await.unwrap();
        let two = backend.send(Message::from("two"));
        let blocked = tokio::time::timeout(Duration::from_millis(50), two).await;
        assert!(blocked.is_err(), "send should wait for queue space");

        let sender = tokio::spawn(async move {
            backend.send(Message::from("three")).await.unwrap();
            backend
        });
        assert_eq!(worker.receive().await.unwrap(), Message::from("one"));
        let _backend = sender.await.unwrap();
        assert_eq!(worker.receive().await.unwrap(), Message::from("three"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_reports_the_configured_bound() {
        let ctx = Context::new();
        let timeout = Duration::from_millis(20);
        let mut backend = ctx.socket_with(
            SocketType::Dealer,
            EndpointOptions {
                send_timeout: Some(timeout),
                ..EndpointOptions::default()
            },
        );
        backend.bind("inproc://timeout").await.unwrap();
        let mut worker = ctx.socket_with(
            SocketType::Dealer,
            EndpointOptions {
                high_water_mark: 1,
                ..EndpointOptions::default()
            },
        );
        worker.connect("inproc://timeout").await.unwrap();

        backend.send(Message::from("fills the queue")).await.unwrap();
        assert_eq!(
            backend.send(Message::from("times out")).await,
            Err(Error::SendTimeout { timeout })
        );
        assert_eq!(
            worker.try_receive().unwrap(),
            Some(Message::from("fills the queue"))
        );
        assert_eq!(worker.try_receive().unwrap(), None);
    }

    #[tokio::test]
    async fn terminate_interrupts_blocked_receive() {
        let ctx = Context::new();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.bind("inproc://quiet").await.unwrap();
        let waiting = tokio::spawn(async move { dealer.receive().await });
        tokio::task::yield_now().await;
        ctx.terminate();
        assert_eq!(waiting.await.unwrap(), Err(Error::InterruptedWait));
    }

    #[tokio::test]
    async fn closed_peer_is_skipped_by_round_robin() {
        let ctx = Context::new();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.bind("inproc://gone").await.unwrap();
        let mut gone = ctx.socket(SocketType::Dealer);
        gone.connect("inproc://gone").await.unwrap();
        let mut alive = ctx.socket(SocketType::Dealer);
        alive.connect("inproc://gone").await.unwrap();

        gone.close();
        dealer.send(Message::from("a")).await.unwrap();
        dealer.send(Message::from("b")).await.unwrap();
        assert_eq!(alive.queued(), 2);
        assert_eq!(dealer.peer_count(), 1);
    }

    #[tokio::test]
    async fn reconnecting_peer_reclaims_its_identity() {
        let ctx = Context::new();
        let mut router = ctx.socket(SocketType::Router);
        router.bind("inproc://rejoin").await.unwrap();

        let mut first = ctx.socket(SocketType::Dealer);
        first.set_identity(Identity::from("AAAA-0001")).unwrap();
        first.connect("inproc://rejoin").await.unwrap();
        drop(first);

        let mut second = ctx.socket(SocketType::Dealer);
        second.set_identity(Identity::from("AAAA-0001")).unwrap();
        second.connect("inproc://rejoin").await.unwrap();
        assert_eq!(router.peer_count(), 1);

        second.send(msg(&["hi"])).await.unwrap();
        assert_eq!(router.receive().await.unwrap(), msg(&["AAAA-0001", "hi"]));
        router.send(msg(&["AAAA-0001", "welcome back"])).await.unwrap();
        assert_eq!(second.receive().await.unwrap(), msg(&["welcome back"]));
    }

    #[tokio::test]
    async fn endpoint_cannot_connect_to_itself() {
        let ctx = Context::new();
        let mut dealer = ctx.socket(SocketType::Dealer);
        dealer.bind("inproc://mirror").await.unwrap();
        let err = dealer.connect("inproc://mirror").await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "{err}");
        assert_eq!(dealer.peer_count(), 0);
    }
}
