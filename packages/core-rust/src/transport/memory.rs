//! In-process broker implementing the queue semantics the RPC layers need.
//!
//! Queues live in a `DashMap` shared by every connection of one broker.
//! Each consumer is driven by a pump task that moves ready messages into the
//! consumer's channel, bounded by its prefetch window. Unsettled deliveries
//! are requeued at the front when their acker is dropped, which is how
//! at-least-once delivery survives a consumer that goes away mid-message.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::{
    validate_queue_name, Acknowledge, Broker, ConsumeOptions, Consumer, Connection, Delivery,
    MessageProperties, QueueOptions, TransportError,
};

/// Prefix of broker-generated queue names.
pub const GENERATED_QUEUE_PREFIX: &str = "amq.gen-";

const RESERVED_PREFIX: &str = "amq.";

/// Channel capacity for consumers without a prefetch window.
const UNBOUNDED_CONSUMER_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// In-process broker. Cloning shares the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BrokerState {
                endpoint: endpoint.into(),
                queues: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
                next_delivery_tag: AtomicU64::new(1),
                open_connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Names of all existing queues, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of ready (not yet delivered) messages in a queue.
    #[must_use]
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.state.queue(name).map(|queue| queue.ready.lock().len())
    }

    /// Number of connections that have not been closed yet.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::Acquire)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("memory://localhost")
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let id = self.state.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.state.open_connections.fetch_add(1, Ordering::AcqRel);
        debug!(connection_id = id, endpoint = %self.state.endpoint, "connection opened");
        Ok(Box::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
            exclusive_queues: Mutex::new(Vec::new()),
            pumps: Mutex::new(Vec::new()),
        }))
    }

    fn endpoint(&self) -> &str {
        &self.state.endpoint
    }
}

struct BrokerState {
    endpoint: String,
    queues: DashMap<String, Arc<QueueState>>,
    next_connection_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    open_connections: AtomicUsize,
}

impl BrokerState {
    fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.queues.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn remove_queue(&self, name: &str) {
        if let Some((_, queue)) = self.queues.remove(name) {
            queue.mark_deleted();
            debug!(queue = name, "queue deleted");
        }
    }
}

// ---------------------------------------------------------------------------
// QueueState
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StoredMessage {
    properties: MessageProperties,
    body: Bytes,
    redelivered: bool,
}

struct QueueState {
    name: String,
    options: QueueOptions,
    /// Owning connection of an exclusive queue.
    owner: Option<u64>,
    ready: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    deleted: AtomicBool,
}

impl QueueState {
    fn new(name: String, options: QueueOptions, owner: Option<u64>) -> Self {
        Self {
            name,
            options,
            owner,
            ready: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        }
    }

    fn check_access(&self, connection_id: u64) -> Result<(), TransportError> {
        match self.owner {
            Some(owner) if owner != connection_id => Err(TransportError::ResourceLocked {
                queue: self.name.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn push_back(&self, message: StoredMessage) {
        if self.is_deleted() {
            return;
        }
        self.ready.lock().push_back(message);
        self.notify.notify_one();
    }

    fn requeue(&self, mut message: StoredMessage) {
        if self.is_deleted() {
            return;
        }
        message.redelivered = true;
        self.ready.lock().push_front(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StoredMessage> {
        self.ready.lock().pop_front()
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.ready.lock().clear();
        self.notify.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

/// Connection to a [`MemoryBroker`].
///
/// Closing or dropping it cancels its consumers and deletes the exclusive
/// queues it declared.
pub struct MemoryConnection {
    id: u64,
    state: Arc<BrokerState>,
    open: AtomicBool,
    exclusive_queues: Mutex<Vec<String>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }

    fn release(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        for name in self.exclusive_queues.lock().drain(..) {
            self.state.remove_queue(&name);
        }
        self.state.open_connections.fetch_sub(1, Ordering::AcqRel);
        debug!(connection_id = self.id, "connection closed");
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, TransportError> {
        self.ensure_open()?;

        let name = if name.is_empty() {
            format!("{GENERATED_QUEUE_PREFIX}{}", Uuid::new_v4().simple())
        } else {
            validate_queue_name(name)?;
            if name.starts_with(RESERVED_PREFIX) {
                return Err(TransportError::InvalidQueueName {
                    name: name.to_string(),
                    reason: "the amq. prefix is reserved",
                });
            }
            name.to_string()
        };

        match self.state.queues.entry(name.clone()) {
            Entry::Occupied(entry) => {
                let queue = entry.get();
                queue.check_access(self.id)?;
                if queue.options != options {
                    return Err(TransportError::PreconditionFailed { queue: name });
                }
            }
            Entry::Vacant(entry) => {
                let owner = options.exclusive.then_some(self.id);
                entry.insert(Arc::new(QueueState::new(name.clone(), options, owner)));
                if options.exclusive {
                    self.exclusive_queues.lock().push(name.clone());
                }
                debug!(queue = %name, exclusive = options.exclusive, "queue declared");
            }
        }

        Ok(name)
    }

    async fn publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        match self.state.queue(routing_key) {
            Some(queue) => queue.push_back(StoredMessage {
                properties,
                body,
                redelivered: false,
            }),
            None => debug!(routing_key, "unroutable message dropped"),
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Consumer, TransportError> {
        self.ensure_open()?;
        let queue = self
            .state
            .queue(queue)
            .ok_or_else(|| TransportError::QueueNotFound {
                queue: queue.to_string(),
            })?;
        queue.check_access(self.id)?;

        // A prefetch of zero means "unlimited", as in AMQP basic.qos.
        let window = if options.no_ack {
            None
        } else {
            options.prefetch.filter(|n| *n > 0).map(usize::from)
        };
        let (tx, rx) = mpsc::channel(window.unwrap_or(UNBOUNDED_CONSUMER_BUFFER));
        let window = window.map(|n| Arc::new(Semaphore::new(n)));

        let name = queue.name.clone();
        let pump = tokio::spawn(pump(
            Arc::clone(&self.state),
            queue,
            tx,
            window,
            options.no_ack,
        ));
        self.pumps.lock().push(pump);

        Ok(Consumer::new(name, rx))
    }

    async fn delete_queue(&self, name: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        if let Some(queue) = self.state.queue(name) {
            queue.check_access(self.id)?;
        }
        self.exclusive_queues.lock().retain(|owned| owned != name);
        self.state.remove_queue(name);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.release();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Consumer pump
// ---------------------------------------------------------------------------

async fn pump(
    state: Arc<BrokerState>,
    queue: Arc<QueueState>,
    tx: mpsc::Sender<Delivery>,
    window: Option<Arc<Semaphore>>,
    no_ack: bool,
) {
    loop {
        let permit = match &window {
            Some(window) => tokio::select! {
                permit = Arc::clone(window).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                () = tx.closed() => return,
            },
            None => None,
        };

        let Some(message) = next_message(&queue, &tx).await else {
            return;
        };

        let acker: Box<dyn Acknowledge> = if no_ack {
            Box::new(AutoAck)
        } else {
            Box::new(MemoryAcker {
                queue: Arc::clone(&queue),
                pending: Mutex::new(Some((message.clone(), permit))),
            })
        };
        let delivery = Delivery::new(
            state.next_delivery_tag.fetch_add(1, Ordering::Relaxed),
            queue.name.clone(),
            message.redelivered,
            message.properties,
            message.body,
            acker,
        );

        // On failure the delivery is dropped here and its acker requeues it.
        if tx.send(delivery).await.is_err() {
            return;
        }
    }
}

async fn next_message(queue: &QueueState, tx: &mpsc::Sender<Delivery>) -> Option<StoredMessage> {
    loop {
        // Registered before the checks so a concurrent push or delete is not missed.
        let notified = queue.notify.notified();
        if queue.is_deleted() {
            return None;
        }
        if let Some(message) = queue.pop() {
            return Some(message);
        }
        tokio::select! {
            () = notified => {}
            () = tx.closed() => return None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ackers
// ---------------------------------------------------------------------------

struct MemoryAcker {
    queue: Arc<QueueState>,
    pending: Mutex<Option<(StoredMessage, Option<OwnedSemaphorePermit>)>>,
}

impl MemoryAcker {
    fn settle(&self, requeue: bool) {
        if let Some((message, permit)) = self.pending.lock().take() {
            if requeue {
                self.queue.requeue(message);
            }
            drop(permit);
        }
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.settle(false);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.settle(requeue);
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        self.settle(true);
    }
}

struct AutoAck;

#[async_trait]
impl Acknowledge for AutoAck {
    async fn ack(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
