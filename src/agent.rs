//! Agents: recurring work units scheduled by cycle count.
//!
//! Live agents sit in an [`AgentTable`] in start order, which is also the order
//! the scheduler runs them in. Agents are shared as [`AgentRef`] handles so the
//! creator can keep stopping or inspecting an agent after handing it to the
//! table.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::error::AgentResult;
use crate::server::CogServer;

/// A periodic unit of work run on the server thread.
pub trait Agent: Send {
    /// Stable class identifier, matching the registry name it was created from.
    fn class_id(&self) -> &str;

    /// Run once every `frequency()` cycles. Zero is treated as one.
    fn frequency(&self) -> u32 {
        1
    }

    /// Do one step of work.
    fn run(&mut self, server: &mut CogServer) -> AgentResult<()>;

    /// Called after the agent has been removed from the table by a destroy.
    ///
    /// The table no longer contains this agent when the hook runs, so the hook
    /// may call back into the server, including `destroy_all_agents` for its
    /// own class.
    fn teardown(&mut self, server: &mut CogServer) {
        let _ = server;
    }
}

/// Shared handle to a live agent.
///
/// The class id is read once when the handle is made, so the table and the
/// scheduler can name an agent without locking it. An agent in the middle of
/// its own `run` is locked by the server thread.
#[derive(Clone)]
pub struct AgentRef {
    class_id: Arc<str>,
    agent: Arc<Mutex<Box<dyn Agent>>>,
}

impl AgentRef {
    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// Whether both handles point at the same agent.
    pub fn ptr_eq(&self, other: &AgentRef) -> bool {
        Arc::ptr_eq(&self.agent, &other.agent)
    }
}

impl Deref for AgentRef {
    type Target = Mutex<Box<dyn Agent>>;

    fn deref(&self) -> &Self::Target {
        &self.agent
    }
}

impl std::fmt::Debug for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AgentRef").field(&self.class_id).finish()
    }
}

/// Wrap a boxed agent into a handle.
pub fn agent_ref(agent: Box<dyn Agent>) -> AgentRef {
    AgentRef {
        class_id: Arc::from(agent.class_id()),
        agent: Arc::new(Mutex::new(agent)),
    }
}

/// Ordered list of live agents.
#[derive(Default)]
pub struct AgentTable {
    entries: Vec<AgentRef>,
}

impl AgentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an agent. Returns `false` if it is already in the table.
    pub fn start(&mut self, agent: AgentRef) -> bool {
        if self.contains(&agent) {
            return false;
        }
        self.entries.push(agent);
        true
    }

    /// Remove the first occurrence of `agent`. Returns `false` if absent.
    pub fn stop(&mut self, agent: &AgentRef) -> bool {
        match self.position(agent) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove every agent of `class_id`, preserving list order of the removed set.
    pub fn remove_class(&mut self, class_id: &str) -> Vec<AgentRef> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.class_id() == class_id);
        self.entries = kept;
        removed
    }

    /// Remove every agent.
    pub fn clear(&mut self) -> Vec<AgentRef> {
        std::mem::take(&mut self.entries)
    }

    pub fn contains(&self, agent: &AgentRef) -> bool {
        self.position(agent).is_some()
    }

    /// Snapshot of the live agents in scheduling order.
    pub fn snapshot(&self) -> Vec<AgentRef> {
        self.entries.clone()
    }

    /// Class ids of the live agents in scheduling order.
    pub fn class_ids(&self) -> Vec<&str> {
        self.entries.iter().map(AgentRef::class_id).collect()
    }

    /// Number of live agents of `class_id`.
    pub fn count_of(&self, class_id: &str) -> usize {
        self.entries.iter().filter(|e| e.class_id() == class_id).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, agent: &AgentRef) -> Option<usize> {
        self.entries.iter().position(|e| e.ptr_eq(agent))
    }
}

impl std::fmt::Debug for AgentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTable")
            .field("agents", &self.class_ids())
            .finish()
    }
}

/// Whether an agent of `frequency` is due on `cycle`.
pub fn is_due(cycle: i64, frequency: u32) -> bool {
    cycle % i64::from(frequency.max(1)) == 0
}
