//! Bounded, closable message queues.
//!
//! A [`Mailbox`] is the only buffering point in the transport: every endpoint
//! owns one for inbound traffic, and every TCP session owns one for outbound
//! traffic. Capacity is the endpoint's high-water mark. Producers either fail
//! fast ([`Mailbox::try_push`]) or wait for a free slot ([`Mailbox::push`]);
//! the single consumer can wait for readiness without dequeuing, which is what
//! the poller builds on.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use switchyard_core::{Identity, Message};
use tokio::sync::{Notify, Semaphore, TryAcquireError};

/// The item returned to the caller when a push does not go through.
#[derive(Debug)]
pub(crate) enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

pub(crate) struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    slots: Semaphore,
    readable: Notify,
    closed: AtomicBool,
}

impl<T> Mailbox<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            slots: Semaphore::new(capacity),
            readable: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.enqueue(item)
            }
            Err(TryAcquireError::NoPermits) => Err(PushError::Full(item)),
            Err(TryAcquireError::Closed) => Err(PushError::Closed(item)),
        }
    }

    /// Waits for a free slot. Only fails once the mailbox is closed.
    pub(crate) async fn push(&self, item: T) -> Result<(), PushError<T>> {
        match self.slots.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.enqueue(item)
            }
            Err(_) => Err(PushError::Closed(item)),
        }
    }

    fn enqueue(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut queue = self.queue.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(PushError::Closed(item));
            }
            queue.push_back(item);
        }
        self.readable.notify_waiters();
        Ok(())
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        let item = self.queue.lock().pop_front();
        if item.is_some() {
            self.slots.add_permits(1);
        }
        item
    }

    /// Waits for the next item. Returns `None` once the mailbox is closed.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            self.readable().await;
        }
    }

    /// Resolves once an item is queued or the mailbox is closed. Does not
    /// dequeue anything.
    pub(crate) async fn readable(&self) {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.is_closed() || !self.queue.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the mailbox, dropping anything still queued and waking every
    /// producer and consumer.
    pub(crate) fn close(&self) {
        {
            let mut queue = self.queue.lock();
            self.closed.store(true, Ordering::Release);
            queue.clear();
        }
        self.slots.close();
        self.readable.notify_waiters();
    }
}

/// A message as queued for an endpoint: who it came from, plus the frames.
#[derive(Clone, Debug)]
pub(crate) struct Inbound {
    pub(crate) from: Identity,
    pub(crate) message: Message,
}

/// An endpoint's inbound queue together with its subscription filter.
pub(crate) struct Inbox {
    mailbox: Mailbox<Inbound>,
    subscriptions: Option<RwLock<Vec<Bytes>>>,
}

impl Inbox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            mailbox: Mailbox::new(capacity),
            subscriptions: None,
        }
    }

    /// An inbox that only accepts messages whose first frame starts with one
    /// of its subscribed prefixes. It starts with no subscriptions.
    pub(crate) fn filtered(capacity: usize) -> Self {
        Self {
            mailbox: Mailbox::new(capacity),
            subscriptions: Some(RwLock::new(Vec::new())),
        }
    }

    pub(crate) fn subscribe(&self, prefix: Bytes) -> bool {
        let Some(subscriptions) = &self.subscriptions else {
            return false;
        };
        let mut subscriptions = subscriptions.write();
        if !subscriptions.contains(&prefix) {
            subscriptions.push(prefix);
        }
        true
    }

    pub(crate) fn unsubscribe(&self, prefix: &[u8]) -> bool {
        let Some(subscriptions) = &self.subscriptions else {
            return false;
        };
        subscriptions.write().retain(|s| s.as_ref() != prefix);
        true
    }

    fn accepts(&self, message: &Message) -> bool {
        match &self.subscriptions {
            None => true,
            Some(subscriptions) => subscriptions
                .read()
                .iter()
                .any(|prefix| message.first().as_bytes().starts_with(prefix)),
        }
    }

    /// Filtered-out messages count as delivered.
    pub(crate) fn try_deliver(
        &self,
        from: Identity,
        message: Message,
    ) -> Result<(), PushError<Message>> {
        if !self.accepts(&message) {
            return Ok(());
        }
        self.mailbox
            .try_push(Inbound { from, message })
            .map_err(|e| match e {
                PushError::Full(i) => PushError::Full(i.message),
                PushError::Closed(i) => PushError::Closed(i.message),
            })
    }

    pub(crate) async fn deliver(
        &self,
        from: Identity,
        message: Message,
    ) -> Result<(), PushError<Message>> {
        if !self.accepts(&message) {
            return Ok(());
        }
        self.mailbox
            .push(Inbound { from, message })
            .await
            .map_err(|e| PushError::Closed(e.into_inner().message))
    }

    pub(crate) fn try_pop(&self) -> Option<Inbound> {
        self.mailbox.try_pop()
    }

    pub(crate) async fn pop(&self) -> Option<Inbound> {
        self.mailbox.pop().await
    }

    pub(crate) async fn readable(&self) {
        self.mailbox.readable().await;
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.mailbox.is_ready()
    }

    pub(crate) fn len(&self) -> usize {
        self.mailbox.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub(crate) fn close(&self) {
        self.mailbox.close();
    }
}
