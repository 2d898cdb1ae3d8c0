//! The agent state machine.
//!
//! Each agent has two serial contexts. Outbound actions (create, run,
//! deactivate, interrupt notices, destroy) are funnelled through an
//! actions [`SerialQueue`]; everything the transport delivers is handled
//! in order by a dedicated inbound thread, which also tears the channel
//! down when the agent dies. Callers never block on the actions queue:
//! a request is queued, and the caller then waits on a completion that the
//! inbound thread fulfils with the reply.

mod state;

pub use state::AgentState;

use crate::ipc::wire::{decode_items, encode_items, Attachments};
use crate::ipc::{
    AgentChannel, AgentConnector, AgentReply, AgentRequest, AgentService, ConnectRequest,
    CreateResult, InboundEvent, OutboundMessage,
};
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info, trace, warn};
use warden_concurrency::{completion, Completer, SerialQueue, Waiter};
use warden_core::error::TransportError;
use warden_core::id::AgentIndex;
use warden_core::types::{ItemStore, MechanismResult};
use warden_policy::Mechanism;

/// Receives interrupt requests raised by agent processes.
pub trait InterruptListener: Send + Sync {
    /// Called on the agent's inbound thread after the agent has moved to
    /// [`AgentState::Interrupting`].
    fn agent_interrupted(&self, agent: AgentIndex);
}

/// Parameters for [`Agent::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Service hosting the mechanism.
    pub service: AgentService,

    /// Audit session to attach, if any.
    pub audit_session: Option<u32>,

    /// Bootstrap namespace to attach, if any.
    pub bootstrap: Option<u64>,

    /// Whether this is the first mechanism of a chain. Only the first
    /// mechanism retries `CREATE` across interrupted connections.
    pub first: bool,

    /// Maximum number of `CREATE` attempts.
    pub retry_limit: u32,
}

impl CreateOptions {
    /// Options for `service` with nothing attached.
    pub fn new(service: AgentService) -> Self {
        Self {
            service,
            audit_session: None,
            bootstrap: None,
            first: false,
            retry_limit: 16,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Created(CreateResult),
    Invoked(MechanismResult),
    Deactivated,
}

type ReplyResult = Result<Outcome, TransportError>;

struct Pending {
    id: u64,
    kind: &'static str,
    completer: Completer<ReplyResult>,
}

struct Shared {
    state: AgentState,
    result: MechanismResult,
    hints: ItemStore,
    context: ItemStore,
    pending: Option<Pending>,
    channel: Option<Arc<dyn AgentChannel>>,
    listener: Option<Weak<dyn InterruptListener>>,
}

impl Shared {
    /// Move to `dead`, fail the outstanding request and close the channel.
    fn kill(&mut self, error: TransportError) {
        self.state = AgentState::Dead;
        if let Some(pending) = self.pending.take() {
            pending.completer.complete(Err(error));
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}

/// One running instance of a mechanism for one evaluation.
pub struct Agent {
    index: AgentIndex,
    mechanism: Mechanism,
    service: AgentService,
    actions: SerialQueue,
    shared: Arc<Mutex<Shared>>,
    next_id: AtomicU64,
}

impl Agent {
    /// Connect to the agent service and create the mechanism instance.
    ///
    /// # Arguments
    ///
    /// * `mechanism` - The mechanism to instantiate.
    /// * `connector` - Transport to reach agent services with.
    /// * `options` - Service choice and create parameters.
    /// * `listener` - Notified when the agent process requests an
    ///   interrupt.
    ///
    /// # Returns
    ///
    /// The agent in [`AgentState::Created`], or `None` if it ended up in
    /// any other state.
    pub fn create(
        mechanism: &Mechanism,
        connector: &dyn AgentConnector,
        options: &CreateOptions,
        listener: Option<Weak<dyn InterruptListener>>,
    ) -> Option<Arc<Self>> {
        let index = AgentIndex::next();
        let (events_tx, events_rx) = unbounded();
        let request = ConnectRequest {
            service: options.service,
            plugin: mechanism.plugin().to_string(),
            param: mechanism.param().to_string(),
        };

        let channel = match connector.connect(&request, events_tx) {
            Ok(channel) => channel,
            Err(e) => {
                error!(agent = %index, mechanism = %mechanism, "Failed to reach agent service: {}", e);
                return None;
            }
        };

        let actions = match SerialQueue::new(format!("agent-{}", index)) {
            Ok(queue) => queue,
            Err(e) => {
                error!(agent = %index, "Failed to start action queue: {}", e);
                channel.close();
                return None;
            }
        };

        let shared = Arc::new(Mutex::new(Shared {
            state: AgentState::Init,
            result: MechanismResult::Undefined,
            hints: ItemStore::new(),
            context: ItemStore::new(),
            pending: None,
            channel: Some(channel),
            listener,
        }));

        let inbound = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("warden-agent-{}-events", index))
            .spawn(move || Self::inbound_loop(index, inbound, events_rx));
        if let Err(e) = spawned {
            error!(agent = %index, "Failed to start inbound thread: {}", e);
            shared.lock().kill(TransportError::Closed);
            return None;
        }

        let agent = Arc::new(Self {
            index,
            mechanism: mechanism.clone(),
            service: options.service,
            actions,
            shared,
            next_id: AtomicU64::new(1),
        });

        let mut attempts = 0;
        loop {
            attempts += 1;
            let request = AgentRequest::Create {
                plugin: mechanism.plugin().to_string(),
                param: mechanism.param().to_string(),
                audit_session: options.audit_session,
                bootstrap: options.bootstrap,
            };
            match agent.transact(move |_| Some((request, Attachments::new()))) {
                Some(Ok(Outcome::Created(CreateResult::Success)))
                    if agent.state() == AgentState::Created =>
                {
                    debug!(
                        agent = %index,
                        mechanism = %mechanism,
                        service = %options.service,
                        "Agent created"
                    );
                    return Some(agent);
                }
                Some(Ok(Outcome::Created(CreateResult::ConnectionInterrupted)))
                    if options.first && attempts < options.retry_limit =>
                {
                    debug!(agent = %index, attempts, "Agent service interrupted, retrying create");
                }
                other => {
                    warn!(agent = %index, mechanism = %mechanism, "Agent creation failed: {:?}", other);
                    agent.destroy();
                    return None;
                }
            }
        }
    }

    /// Queue a request on the actions context, then wait for its reply.
    ///
    /// `prepare` runs under the state lock; returning `None` skips the
    /// request.
    fn transact<F>(&self, prepare: F) -> Option<ReplyResult>
    where
        F: FnOnce(&mut Shared) -> Option<(AgentRequest, Attachments)> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let index = self.index;

        let submitted = self.actions.sync(
            move || -> Result<Option<Waiter<ReplyResult>>, TransportError> {
                let mut guard = shared.lock();
                let Some((request, attachments)) = prepare(&mut *guard) else {
                    return Ok(None);
                };
                let channel = guard.channel.clone().ok_or(TransportError::Closed)?;
                let kind = request.kind();
                let (completer, waiter) = completion();
                guard.pending = Some(Pending {
                    id,
                    kind,
                    completer,
                });
                drop(guard);

                trace!(agent = %index, id, kind, "Sending request");
                let message = OutboundMessage {
                    id,
                    request,
                    attachments,
                };
                if let Err(e) = channel.send(message) {
                    shared.lock().kill(e.clone());
                    return Err(e);
                }
                Ok(Some(waiter))
            },
        );

        let waiter = match submitted {
            Ok(Ok(Some(waiter))) => waiter,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => return Some(Err(e)),
            Err(e) => return Some(Err(TransportError::SendFailed(e.to_string()))),
        };
        Some(waiter.wait().unwrap_or(Err(TransportError::Closed)))
    }

    /// Run the mechanism.
    ///
    /// Blocks until the agent replies or the channel fails. In
    /// [`AgentState::MechInterrupting`] or [`AgentState::Dead`] nothing is
    /// sent and the last known result is returned.
    pub fn run(
        &self,
        hints: &ItemStore,
        context: &ItemStore,
        immutable_hints: &ItemStore,
    ) -> MechanismResult {
        let hints = hints.clone();
        let context = context.clone();
        let immutable_hints = immutable_hints.clone();

        let outcome = self.transact(move |shared| {
            if shared.state.skips_run() {
                return None;
            }
            shared.state = AgentState::Current;
            shared.hints.clear();
            shared.context.clear();

            let mut attachments = Attachments::new();
            let request = AgentRequest::Invoke {
                hints: encode_items(hints, &mut attachments),
                context: encode_items(context, &mut attachments),
                immutable_hints: encode_items(immutable_hints, &mut attachments),
            };
            Some((request, attachments))
        });

        match outcome {
            None => {
                let shared = self.shared.lock();
                debug!(agent = %self.index, state = %shared.state, "Run skipped");
                shared.result
            }
            Some(Ok(Outcome::Invoked(result))) => {
                debug!(agent = %self.index, mechanism = %self.mechanism, result = %result, "Mechanism finished");
                result
            }
            Some(Ok(other)) => {
                error!(agent = %self.index, "Invoke answered with {:?}", other);
                self.shared.lock().kill(TransportError::Protocol(format!("{:?}", other)));
                MechanismResult::Undefined
            }
            Some(Err(e)) => {
                error!(agent = %self.index, mechanism = %self.mechanism, "Mechanism invocation failed: {}", e);
                self.shared.lock().kill(e);
                MechanismResult::Undefined
            }
        }
    }

    /// Deactivate the mechanism. A successful reply leaves the agent
    /// [`AgentState::Active`] and usable.
    pub fn deactivate(&self) -> Result<(), TransportError> {
        let outcome = self.transact(|shared| {
            if shared.state.is_terminal() {
                return None;
            }
            shared.state = AgentState::Deactivating;
            Some((AgentRequest::Deactivate, Attachments::new()))
        });
        match outcome {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Closed),
        }
    }

    /// Send `DESTROY` and mark the agent dead.
    ///
    /// A caller blocked in [`run`](Self::run) is released with
    /// [`MechanismResult::Undefined`].
    pub fn destroy(&self) {
        let shared = Arc::clone(&self.shared);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let index = self.index;
        let result = self.actions.sync(move || {
            let mut guard = shared.lock();
            if guard.state.is_terminal() {
                return;
            }
            if let Some(channel) = guard.channel.clone() {
                let message = OutboundMessage {
                    id,
                    request: AgentRequest::Destroy,
                    attachments: Attachments::new(),
                };
                if let Err(e) = channel.send(message) {
                    debug!(agent = %index, "Destroy not delivered: {}", e);
                }
            }
            guard.kill(TransportError::Closed);
            debug!(agent = %index, "Agent destroyed");
        });
        if let Err(e) = result {
            warn!(agent = %self.index, "Failed to destroy agent: {}", e);
        }
    }

    /// Notify the agent that an interrupt is in progress.
    ///
    /// A running agent is told to abort; an idle one skips its next run.
    pub fn notify_interrupt(&self) {
        let shared = Arc::clone(&self.shared);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let index = self.index;
        let result = self.actions.sync(move || {
            let mut guard = shared.lock();
            let (next, send) = guard.state.on_interrupt_notice();
            if next != guard.state {
                debug!(agent = %index, from = %guard.state, to = %next, "Interrupt notice");
            }
            guard.state = next;
            if !send {
                return;
            }
            let Some(channel) = guard.channel.clone() else {
                return;
            };
            drop(guard);

            let message = OutboundMessage {
                id,
                request: AgentRequest::Interrupt,
                attachments: Attachments::new(),
            };
            if let Err(e) = channel.send(message) {
                shared.lock().kill(e);
            }
        });
        if let Err(e) = result {
            warn!(agent = %self.index, "Failed to deliver interrupt notice: {}", e);
        }
    }

    /// Return a deferred interrupt to [`AgentState::Active`]. Other states
    /// are left alone.
    pub fn clear_interrupt(&self) {
        let shared = Arc::clone(&self.shared);
        let result = self.actions.sync(move || {
            let mut guard = shared.lock();
            guard.state = guard.state.on_interrupt_cleared();
        });
        if let Err(e) = result {
            warn!(agent = %self.index, "Failed to clear interrupt: {}", e);
        }
    }

    fn inbound_loop(index: AgentIndex, shared: Arc<Mutex<Shared>>, events: Receiver<InboundEvent>) {
        for event in events.iter() {
            match event {
                InboundEvent::Reply {
                    id,
                    reply,
                    mut attachments,
                } => Self::handle_reply(index, &shared, id, reply, &mut attachments),
                InboundEvent::InterruptRequested { applied } => {
                    let listener = {
                        let mut guard = shared.lock();
                        if guard.state.is_terminal() {
                            trace!(agent = %index, "Interrupt request dropped");
                            continue;
                        }
                        info!(agent = %index, "Agent requested interrupt");
                        guard.state = AgentState::Interrupting;
                        guard.listener.as_ref().and_then(Weak::upgrade)
                    };
                    if let Some(listener) = listener {
                        listener.agent_interrupted(index);
                    }
                    if let Some(applied) = applied {
                        applied.complete(());
                    }
                }
                InboundEvent::Failed(e) => {
                    let mut guard = shared.lock();
                    if !guard.state.is_terminal() {
                        error!(agent = %index, "Agent transport failed: {}", e);
                        guard.kill(e);
                    }
                }
            }
        }

        let mut guard = shared.lock();
        if !guard.state.is_terminal() {
            debug!(agent = %index, "Agent channel closed");
            guard.kill(TransportError::Closed);
        }
    }

    fn handle_reply(
        index: AgentIndex,
        shared: &Mutex<Shared>,
        id: u64,
        reply: AgentReply,
        attachments: &mut Attachments,
    ) {
        let mut guard = shared.lock();
        if guard.state.is_terminal() {
            trace!(agent = %index, id, "Reply dropped");
            return;
        }
        let Some(pending) = guard.pending.take() else {
            warn!(agent = %index, id, kind = reply.kind(), "Unsolicited reply ignored");
            return;
        };
        if pending.id != id || pending.kind != reply.kind() {
            let e = TransportError::UnexpectedReply {
                expected: format!("{} #{}", pending.kind, pending.id),
                actual: format!("{} #{}", reply.kind(), id),
            };
            error!(agent = %index, "{}", e);
            guard.pending = Some(pending);
            guard.kill(e);
            return;
        }

        let outcome = match reply {
            AgentReply::Create { result } => {
                if result == CreateResult::Success {
                    guard.state = AgentState::Created;
                }
                Outcome::Created(result)
            }
            AgentReply::Invoke {
                hints,
                context,
                result,
            } => {
                let hints = decode_items(hints, attachments);
                let context = decode_items(context, attachments);
                match (hints, context) {
                    (Ok(hints), Ok(context)) => {
                        guard.hints = hints;
                        guard.context = context;
                        guard.result = result;
                        guard.state = AgentState::Active;
                        Outcome::Invoked(result)
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        error!(agent = %index, "Malformed invoke reply: {}", e);
                        guard.pending = Some(pending);
                        guard.kill(e);
                        return;
                    }
                }
            }
            AgentReply::Deactivate => {
                guard.state = AgentState::Active;
                Outcome::Deactivated
            }
        };
        drop(guard);
        pending.completer.complete(Ok(outcome));
    }

    /// The agent index.
    pub fn index(&self) -> AgentIndex {
        self.index
    }

    /// The mechanism this agent runs.
    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    /// The service hosting the mechanism.
    pub fn service(&self) -> AgentService {
        self.service
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        self.shared.lock().state
    }

    /// Result of the last completed run.
    pub fn result(&self) -> MechanismResult {
        self.shared.lock().result
    }

    /// Hints returned by the last completed run.
    pub fn hints(&self) -> ItemStore {
        self.shared.lock().hints.clone()
    }

    /// Context returned by the last completed run.
    pub fn context(&self) -> ItemStore {
        self.shared.lock().context.clone()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("index", &self.index)
            .field("mechanism", &self.mechanism)
            .field("service", &self.service)
            .field("state", &self.state())
            .finish()
    }
}
