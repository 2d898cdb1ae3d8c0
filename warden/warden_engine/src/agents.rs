//! The per-engine agent cache.
//!
//! An engine starts each mechanism at most once per lifetime and reuses
//! the agent on later passes. The cache is read and written both by the
//! evaluating thread and by interrupt notifications arriving on agents'
//! inbound threads, so every access runs on one serial queue.
//!
//! Calls that wait for an agent reply (`run`, `deactivate`) never happen
//! on the queue: an inbound thread delivering that reply may itself be
//! waiting to enter the queue.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_agent::{Agent, AgentState, InterruptListener};
use warden_concurrency::SerialQueue;
use warden_core::error::{Error, Result};
use warden_core::id::{AgentIndex, EngineIndex};
use warden_policy::Mechanism;

type AgentMap = Arc<Mutex<HashMap<Mechanism, Arc<Agent>>>>;

/// Agents started by one engine, keyed by mechanism.
pub struct AgentCache {
    engine: EngineIndex,
    queue: SerialQueue,
    agents: AgentMap,
}

impl AgentCache {
    /// Create an empty cache for `engine`.
    pub fn new(engine: EngineIndex) -> Result<Self> {
        let queue = SerialQueue::new(format!("engine-{}-agents", engine))
            .map_err(|e| Error::Execution(e.to_string()))?;
        Ok(Self {
            engine,
            queue,
            agents: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn with_agents<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut HashMap<Mechanism, Arc<Agent>>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let agents = Arc::clone(&self.agents);
        match self.queue.sync(move || f(&mut agents.lock())) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(engine = %self.engine, "Agent cache unavailable: {}", e);
                None
            }
        }
    }

    /// Get the agent running `mechanism`.
    pub fn get(&self, mechanism: &Mechanism) -> Option<Arc<Agent>> {
        let key = mechanism.clone();
        self.with_agents(move |agents| agents.get(&key).cloned())
            .flatten()
    }

    /// Cache an agent.
    pub fn insert(&self, agent: Arc<Agent>) {
        self.with_agents(move |agents| {
            agents.insert(agent.mechanism().clone(), agent);
        });
    }

    /// Number of cached agents.
    pub fn len(&self) -> usize {
        self.with_agents(|agents| agents.len()).unwrap_or(0)
    }

    /// Whether no agent is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the cached agents.
    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.with_agents(|agents| agents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Find the first of `mechanisms` whose agent is interrupting.
    ///
    /// # Returns
    ///
    /// The position within `mechanisms` and the agent.
    pub fn find_interrupting(&self, mechanisms: &[Mechanism]) -> Option<(usize, Arc<Agent>)> {
        let keys = mechanisms.to_vec();
        self.with_agents(move |agents| {
            keys.iter().enumerate().find_map(|(position, key)| {
                agents
                    .get(key)
                    .filter(|agent| agent.state() == AgentState::Interrupting)
                    .map(|agent| (position, Arc::clone(agent)))
            })
        })
        .flatten()
    }

    /// Tell every cached agent that an interrupt is in progress.
    pub fn notify_interrupt(&self) {
        self.with_agents(|agents| {
            for agent in agents.values() {
                agent.notify_interrupt();
            }
        });
    }

    /// Release every deferred interrupt.
    pub fn clear_interrupts(&self) {
        self.with_agents(|agents| {
            for agent in agents.values() {
                agent.clear_interrupt();
            }
        });
    }

    /// Deactivate every cached agent. Agents stay cached and usable.
    pub fn deactivate_all(&self) {
        for agent in self.agents() {
            if let Err(e) = agent.deactivate() {
                debug!(engine = %self.engine, agent = %agent.index(), "Deactivate failed: {}", e);
            }
        }
    }

    /// Destroy and forget every cached agent.
    pub fn destroy_all(&self) {
        let engine = self.engine;
        self.with_agents(move |agents| {
            if !agents.is_empty() {
                debug!(engine = %engine, count = agents.len(), "Destroying agents");
            }
            for (_, agent) in agents.drain() {
                agent.destroy();
            }
        });
    }
}

impl InterruptListener for AgentCache {
    fn agent_interrupted(&self, agent: AgentIndex) {
        info!(engine = %self.engine, agent = %agent, "Agent interrupted the chain");
        self.notify_interrupt();
    }
}

impl Drop for AgentCache {
    fn drop(&mut self) {
        self.destroy_all();
        self.queue.shutdown();
    }
}

impl fmt::Debug for AgentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCache")
            .field("engine", &self.engine)
            .field("agents", &self.agents.lock().len())
            .finish()
    }
}
