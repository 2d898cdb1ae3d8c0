//! In-process agent transport.
//!
//! [`LocalConnector`] runs each connection on its own thread and drives a
//! [`MechanismHandler`] the way an agent process drives a plugin. Handlers
//! are registered per `plugin:param` and created fresh for every
//! connection. Used by hosts that embed their mechanisms and by tests.

use super::channel::{AgentChannel, AgentConnector, ConnectRequest};
use super::message::{AgentReply, AgentRequest, CreateResult, InboundEvent, OutboundMessage};
use super::wire::{decode_items, encode_items, Attachments};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};
use warden_concurrency::completion;
use warden_core::error::TransportError;
use warden_core::types::{ItemStore, MechanismResult};

/// The stores a mechanism sees during one invocation.
#[derive(Debug, Default)]
pub struct InvokeCall {
    /// Hints; changes are returned to the engine.
    pub hints: ItemStore,

    /// Context; changes are returned to the engine.
    pub context: ItemStore,

    /// Caller description. Changes are discarded.
    pub immutable_hints: ItemStore,
}

/// A mechanism implementation driven by [`LocalConnector`].
pub trait MechanismHandler: Send {
    /// Handle `CREATE`.
    fn create(&mut self) -> CreateResult {
        CreateResult::Success
    }

    /// Handle `INVOKE`.
    fn invoke(&mut self, call: &mut InvokeCall) -> MechanismResult;

    /// Handle `INTERRUPT`.
    fn interrupt(&mut self) {}

    /// Handle `DEACTIVATE`.
    fn deactivate(&mut self) {}
}

struct FnHandler<F>(F);

impl<F> MechanismHandler for FnHandler<F>
where
    F: FnMut(&mut InvokeCall) -> MechanismResult + Send,
{
    fn invoke(&mut self, call: &mut InvokeCall) -> MechanismResult {
        (self.0)(call)
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn MechanismHandler> + Send + Sync>;

struct Connection {
    key: String,
    events: Sender<InboundEvent>,
}

#[derive(Default)]
struct LocalInner {
    factories: RwLock<HashMap<String, Factory>>,
    invocations: Mutex<HashMap<String, usize>>,
    live: Mutex<HashMap<u64, Connection>>,
    next_connection: AtomicU64,
    connections: AtomicUsize,
}

impl LocalInner {
    fn count_invocation(&self, key: &str) {
        *self.invocations.lock().entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Connector running mechanisms in-process.
#[derive(Clone, Default)]
pub struct LocalConnector {
    inner: Arc<LocalInner>,
}

impl LocalConnector {
    /// Create a connector with no mechanisms registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory for `plugin:param`.
    pub fn register<F>(&self, mechanism: &str, factory: F)
    where
        F: Fn() -> Box<dyn MechanismHandler> + Send + Sync + 'static,
    {
        self.inner
            .factories
            .write()
            .insert(mechanism.to_string(), Arc::new(factory));
    }

    /// Register a stateless handler from an invoke closure.
    ///
    /// The closure is shared by every connection to the mechanism.
    pub fn register_fn<F>(&self, mechanism: &str, invoke: F)
    where
        F: Fn(&mut InvokeCall) -> MechanismResult + Send + Sync + 'static,
    {
        let invoke = Arc::new(invoke);
        self.register(mechanism, move || {
            let invoke = Arc::clone(&invoke);
            Box::new(FnHandler(move |call: &mut InvokeCall| invoke(call)))
                as Box<dyn MechanismHandler>
        });
    }

    /// Number of `INVOKE` requests handled for `plugin:param`.
    pub fn invocations(&self, mechanism: &str) -> usize {
        self.inner
            .invocations
            .lock()
            .get(mechanism)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `INVOKE` requests handled across all mechanisms.
    pub fn total_invocations(&self) -> usize {
        self.inner.invocations.lock().values().sum()
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::Relaxed)
    }

    /// Send an unsolicited interrupt request from every live connection to
    /// `plugin:param`, as an agent process would.
    ///
    /// Blocks until each agent has applied the request.
    ///
    /// # Returns
    ///
    /// The number of agents that applied it.
    pub fn request_interrupt(&self, mechanism: &str) -> usize {
        let targets: Vec<Sender<InboundEvent>> = self
            .inner
            .live
            .lock()
            .values()
            .filter(|c| c.key == mechanism)
            .map(|c| c.events.clone())
            .collect();

        let mut applied = 0;
        for events in targets {
            let (completer, waiter) = completion();
            let event = InboundEvent::InterruptRequested {
                applied: Some(completer),
            };
            if events.send(event).is_ok() && waiter.wait().is_ok() {
                applied += 1;
            }
        }
        applied
    }

    fn serve(
        inner: Arc<LocalInner>,
        connection_id: u64,
        key: String,
        mut handler: Option<Box<dyn MechanismHandler>>,
        requests: Receiver<OutboundMessage>,
        events: Sender<InboundEvent>,
    ) {
        for message in requests.iter() {
            let OutboundMessage {
                id,
                request,
                mut attachments,
            } = message;
            trace!(mechanism = %key, id, kind = request.kind(), "Local agent received request");

            let reply = match (request, handler.as_mut()) {
                (AgentRequest::Create { .. }, None) => {
                    warn!(mechanism = %key, "No local handler registered");
                    Some((AgentReply::Create { result: CreateResult::Failure }, Vec::new()))
                }
                (AgentRequest::Create { .. }, Some(handler)) => Some((
                    AgentReply::Create {
                        result: handler.create(),
                    },
                    Vec::new(),
                )),
                (
                    AgentRequest::Invoke {
                        hints,
                        context,
                        immutable_hints,
                    },
                    Some(handler),
                ) => {
                    let decoded = decode_items(hints, &mut attachments).and_then(|hints| {
                        let context = decode_items(context, &mut attachments)?;
                        let immutable_hints = decode_items(immutable_hints, &mut attachments)?;
                        Ok(InvokeCall {
                            hints,
                            context,
                            immutable_hints,
                        })
                    });
                    let mut call = match decoded {
                        Ok(call) => call,
                        Err(e) => {
                            let _ = events.send(InboundEvent::Failed(e));
                            break;
                        }
                    };
                    let result = handler.invoke(&mut call);
                    inner.count_invocation(&key);

                    let mut reply_attachments = Attachments::new();
                    let hints = encode_items(call.hints, &mut reply_attachments);
                    let context = encode_items(call.context, &mut reply_attachments);
                    Some((
                        AgentReply::Invoke {
                            hints,
                            context,
                            result,
                        },
                        reply_attachments,
                    ))
                }
                (AgentRequest::Interrupt, Some(handler)) => {
                    handler.interrupt();
                    None
                }
                (AgentRequest::Deactivate, Some(handler)) => {
                    handler.deactivate();
                    Some((AgentReply::Deactivate, Vec::new()))
                }
                (AgentRequest::Destroy, _) => break,
                (request, None) => {
                    let _ = events.send(InboundEvent::Failed(TransportError::Protocol(format!(
                        "{} before successful create",
                        request.kind()
                    ))));
                    break;
                }
            };

            if let Some((reply, attachments)) = reply {
                let event = InboundEvent::Reply {
                    id,
                    reply,
                    attachments,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }

        inner.live.lock().remove(&connection_id);
        debug!(mechanism = %key, "Local agent connection ended");
    }
}

impl AgentConnector for LocalConnector {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: Sender<InboundEvent>,
    ) -> Result<Arc<dyn AgentChannel>, TransportError> {
        let key = format!("{}:{}", request.plugin, request.param);
        let handler = self.inner.factories.read().get(&key).map(|factory| factory());
        let connection_id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);

        let (sender, receiver) = unbounded();
        self.inner.live.lock().insert(
            connection_id,
            Connection {
                key: key.clone(),
                events: events.clone(),
            },
        );

        let inner = Arc::clone(&self.inner);
        let worker_key = key.clone();
        let spawned = thread::Builder::new()
            .name(format!("warden-local-agent-{}", connection_id))
            .spawn(move || Self::serve(inner, connection_id, worker_key, handler, receiver, events));
        if let Err(e) = spawned {
            self.inner.live.lock().remove(&connection_id);
            return Err(TransportError::ConnectFailed(e.to_string()));
        }

        self.inner.connections.fetch_add(1, Ordering::Relaxed);
        debug!(mechanism = %key, service = %request.service, "Local agent connected");
        Ok(Arc::new(LocalChannel {
            sender: Mutex::new(Some(sender)),
        }))
    }
}

impl fmt::Debug for LocalConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut mechanisms: Vec<String> = self.inner.factories.read().keys().cloned().collect();
        mechanisms.sort();
        f.debug_struct("LocalConnector")
            .field("mechanisms", &mechanisms)
            .field("connections", &self.connections())
            .finish()
    }
}

struct LocalChannel {
    sender: Mutex<Option<Sender<OutboundMessage>>>,
}

impl AgentChannel for LocalChannel {
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TransportError::Closed)?;
        sender.send(message).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

impl fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChannel")
            .field("open", &self.sender.lock().is_some())
            .finish()
    }
}
