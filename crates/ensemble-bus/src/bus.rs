use crate::message::{HandoffRequest, InterAgentMessage, MessageKind, Recipient};
use async_trait::async_trait;
use ensemble_core::{AgentType, BusConfig, EnsembleError, EnsembleResult};
use ensemble_session::SessionManager;
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handler implemented by an agent endpoint subscribed to the bus.
#[async_trait]
pub trait BusSubscriber: Send + Sync {
    /// Handles one delivered message.
    async fn deliver(&self, message: InterAgentMessage) -> EnsembleResult<()>;
}

struct Enqueued {
    message: InterAgentMessage,
    seq: u64,
}

impl PartialEq for Enqueued {
    fn eq(&self, other: &Self) -> bool {
        self.message.priority == other.message.priority && self.seq == other.seq
    }
}

impl Eq for Enqueued {}

impl PartialOrd for Enqueued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Enqueued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, lower sequence (earlier
        // arrival) breaking ties.
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct BusInner {
    config: BusConfig,
    sessions: Arc<SessionManager>,
    queue: Mutex<BinaryHeap<Enqueued>>,
    notify: Notify,
    seq: AtomicU64,
    subscribers: RwLock<HashMap<AgentType, Arc<dyn BusSubscriber>>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<InterAgentMessage>>>,
}

/// Priority-ordered inter-agent message bus.
///
/// Messages are delivered in priority order (higher first); equal
/// priorities preserve arrival order. The dispatcher runs as a background
/// task started with [`MessageBus::start`].
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
    dispatcher: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl MessageBus {
    /// Creates a bus over the given session manager. Call
    /// [`start`](Self::start) to begin dispatching.
    pub fn new(config: BusConfig, sessions: Arc<SessionManager>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                sessions,
                queue: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                subscribers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
            dispatcher: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the dispatcher task. Idempotent.
    pub async fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *dispatcher = Some(tokio::spawn(async move {
            info!("message bus dispatcher started");
            loop {
                let next = { inner.queue.lock().await.pop() };
                match next {
                    Some(entry) => inner.dispatch(entry.message).await,
                    None => inner.notify.notified().await,
                }
            }
        }));
    }

    /// Stops the dispatcher task. Queued messages remain until `start` is
    /// called again.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }
    }

    /// Registers the handler for an agent type, replacing any previous
    /// one.
    pub async fn subscribe(&self, agent_type: AgentType, handler: Arc<dyn BusSubscriber>) {
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers.insert(agent_type, handler);
    }

    /// Removes the handler for an agent type.
    pub async fn unsubscribe(&self, agent_type: AgentType) {
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers.remove(&agent_type);
    }

    /// Number of subscribed agents.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Submits a message for delivery.
    ///
    /// Responses resolve their pending request instead of being queued; a
    /// response with no matching pending request is logged and discarded.
    pub async fn send(&self, message: InterAgentMessage) -> EnsembleResult<()> {
        if message.message_type == MessageKind::Response {
            return self.inner.resolve_response(message).await;
        }
        self.inner.enqueue(message).await;
        Ok(())
    }

    /// Sends a request and awaits its correlated response.
    pub async fn request(
        &self,
        message: InterAgentMessage,
    ) -> EnsembleResult<InterAgentMessage> {
        if message.message_type != MessageKind::Request {
            return Err(EnsembleError::Bus(
                "request() requires a message of kind 'request'".into(),
            ));
        }
        let id = message.id;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id, tx);
        }
        self.inner.enqueue(message).await;

        let timeout = std::time::Duration::from_millis(self.inner.config.request_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(EnsembleError::Bus("response channel closed".into())),
            Err(_) => {
                let mut pending = self.inner.pending.lock().await;
                pending.remove(&id);
                Err(EnsembleError::Timeout(format!(
                    "no response to request {id} within {}ms",
                    self.inner.config.request_timeout_ms
                )))
            }
        }
    }

    /// Number of messages waiting for dispatch.
    pub async fn queue_depth(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

impl BusInner {
    async fn enqueue(&self, message: InterAgentMessage) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(
            id = %message.id,
            kind = ?message.message_type,
            priority = message.priority,
            "message enqueued"
        );
        {
            let mut queue = self.queue.lock().await;
            queue.push(Enqueued { message, seq });
        }
        self.notify.notify_one();
    }

    async fn resolve_response(&self, message: InterAgentMessage) -> EnsembleResult<()> {
        let Some(parent) = message.context.parent_message_id else {
            warn!(id = %message.id, "response without parent_message_id discarded");
            return Ok(());
        };
        let sender = {
            let mut pending = self.pending.lock().await;
            pending.remove(&parent)
        };
        match sender {
            Some(tx) => {
                if tx.send(message).is_err() {
                    warn!(parent = %parent, "requester gave up before response arrived");
                }
            }
            None => {
                warn!(parent = %parent, "response with no pending request discarded");
            }
        }
        Ok(())
    }

    async fn dispatch(&self, message: InterAgentMessage) {
        match message.message_type {
            MessageKind::Handoff => self.dispatch_handoff(message).await,
            MessageKind::Broadcast => self.dispatch_broadcast(message).await,
            _ => match message.recipient {
                Recipient::All => self.dispatch_broadcast(message).await,
                Recipient::Agent(agent) => self.deliver_to(agent, message).await,
                Recipient::Orchestrator => {
                    self.deliver_to(AgentType::Orchestrator, message).await;
                }
            },
        }
    }

    async fn deliver_to(&self, agent: AgentType, message: InterAgentMessage) {
        let handler = {
            let subscribers = self.subscribers.read().await;
            subscribers.get(&agent).cloned()
        };
        match handler {
            Some(handler) => {
                if let Err(e) = handler.deliver(message).await {
                    error!(agent = %agent, error = %e, "subscriber handler failed");
                }
            }
            None => {
                warn!(agent = %agent, "message for unsubscribed agent dropped");
            }
        }
    }

    async fn dispatch_broadcast(&self, message: InterAgentMessage) {
        let handlers: Vec<(AgentType, Arc<dyn BusSubscriber>)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .map(|(&agent, handler)| (agent, Arc::clone(handler)))
                .collect()
        };

        // Each subscriber is delivered to independently: one handler's
        // failure must not block the others.
        let deliveries = handlers.into_iter().map(|(agent, handler)| {
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.deliver(message).await {
                    error!(agent = %agent, error = %e, "broadcast delivery failed");
                }
            })
        });
        join_all(deliveries).await;
    }

    async fn dispatch_handoff(&self, mut message: InterAgentMessage) {
        let Recipient::Agent(to) = message.recipient else {
            warn!(id = %message.id, "handoff requires a specific agent recipient");
            return;
        };
        let handoff: HandoffRequest = match serde_json::from_value(message.content.clone()) {
            Ok(h) => h,
            Err(e) => {
                warn!(id = %message.id, error = %e, "malformed handoff payload dropped");
                return;
            }
        };

        if let Some(session_id) = message.context.session_id {
            if let Err(e) = self.sessions.apply_handoff(session_id, to).await {
                warn!(session_id = %session_id, error = %e, "handoff target session missing");
            } else if handoff.preserve_history {
                match self.sessions.history(session_id).await {
                    Ok(mut history) => {
                        if let Some(limit) = self.config.max_handoff_history {
                            if history.len() > limit {
                                history.drain(..history.len() - limit);
                            }
                        }
                        message.context.history = history;
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "handoff history unavailable");
                    }
                }
            }
        } else {
            warn!(id = %message.id, "handoff without session context");
        }

        self.deliver_to(to, message).await;
    }
}
