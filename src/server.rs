//! The server facade.
//!
//! [`CogServer`] owns the knowledge store, both factory registries, the
//! module registry, the live agent table, the request queue and the network
//! listener. Everything runs on the thread that owns the server; other threads
//! talk to it through a [`ServerHandle`].

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, TryLockError};

use crate::agent::{Agent, AgentRef, AgentTable, agent_ref};
use crate::config::ServerConfig;
use crate::error::{ModuleResult, NetworkResult, RegistryResult, ScriptResult};
use crate::module::{self, DynamicLoader, ModuleData, ModuleInfo, ModuleLoader, ModuleRegistry};
use crate::network::NetworkServer;
use crate::registry::{AgentRegistry, ClassInfo, Factory, RequestRegistry};
use crate::request::{Request, RequestQueue};
use crate::scheduler::{self, CyclePacer};
use crate::script::{CommandScriptLoader, ScriptLoader};
use crate::store::KnowledgeStore;

/// Cloneable, `Send` handle for other threads.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    queue: RequestQueue,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Queue a request for the next cycle.
    pub fn submit_request(&self, request: Box<dyn Request>) {
        self.queue.push(request);
    }

    /// Ask the server loop to exit after the current cycle.
    ///
    /// A stop issued before the loop starts makes the next `serve` return
    /// without running a cycle.
    pub fn stop(&self) {
        request_stop(&self.running, &self.stop_requested);
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn request_stop(running: &AtomicBool, stop_requested: &AtomicBool) {
    stop_requested.store(true, Ordering::SeqCst);
    running.store(false, Ordering::SeqCst);
}

/// The cognitive server.
pub struct CogServer {
    config: ServerConfig,
    agent_registry: AgentRegistry,
    request_registry: RequestRegistry,
    pub(crate) modules: ModuleRegistry,
    pub(crate) loader: Box<dyn ModuleLoader>,
    pub(crate) agents: AgentTable,
    /// Agents destroyed while running; torn down once their run returns.
    deferred_teardown: Vec<AgentRef>,
    queue: RequestQueue,
    cycle_count: i64,
    /// Set while `serve` or `tick` is looping.
    running: Arc<AtomicBool>,
    /// Set by `stop`, consumed when the loop exits.
    stop_requested: Arc<AtomicBool>,
    network: Option<NetworkServer>,
    script_loader: Option<Box<dyn ScriptLoader>>,
    // Declared last so it is dropped last.
    store: KnowledgeStore,
}

impl CogServer {
    /// Create a server that loads modules from disk.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_loader(config, Box::new(DynamicLoader::new()))
    }

    /// Create a server with a custom module loader.
    pub fn with_loader(config: ServerConfig, loader: Box<dyn ModuleLoader>) -> Self {
        tracing::debug!(
            port = config.server_port,
            cycle_ms = config.server_cycle_duration,
            "creating cogserver"
        );
        Self {
            config,
            agent_registry: AgentRegistry::new("agent"),
            request_registry: RequestRegistry::new("request"),
            modules: ModuleRegistry::new(),
            loader,
            agents: AgentTable::new(),
            deferred_teardown: Vec::new(),
            queue: RequestQueue::new(),
            cycle_count: 1,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            network: None,
            script_loader: Some(Box::new(CommandScriptLoader)),
            store: KnowledgeStore::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Replace the loader used for the bootstrap script.
    pub fn set_script_loader(&mut self, loader: Box<dyn ScriptLoader>) {
        self.script_loader = Some(loader);
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            queue: self.queue.clone(),
            running: Arc::clone(&self.running),
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut KnowledgeStore {
        &mut self.store
    }

    // -----------------------------------------------------------------------
    // Agent kinds and live agents
    // -----------------------------------------------------------------------

    pub fn register_agent(
        &mut self,
        name: impl Into<String>,
        factory: Box<dyn Factory<dyn Agent>>,
    ) -> RegistryResult<()> {
        self.agent_registry.register(name, factory)
    }

    /// Unregister an agent kind, destroying its live agents first.
    pub fn unregister_agent(&mut self, name: &str) -> RegistryResult<()> {
        if !self.agent_registry.contains(name) {
            return self.agent_registry.unregister(name);
        }
        self.destroy_all_agents(name);
        self.agent_registry.unregister(name)
    }

    /// Registered agent kinds, sorted.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agent_registry.names().into_iter().map(String::from).collect()
    }

    pub fn agent_info(&self, name: &str) -> RegistryResult<ClassInfo> {
        self.agent_registry.class_info(name).cloned()
    }

    /// Create an agent by kind, optionally starting it right away.
    pub fn create_agent(&mut self, name: &str, start: bool) -> RegistryResult<AgentRef> {
        let agent = agent_ref(self.agent_registry.create(name)?);
        if start {
            self.start_agent(&agent);
        }
        Ok(agent)
    }

    /// Append an agent to the schedule. Returns `false` if already running.
    pub fn start_agent(&mut self, agent: &AgentRef) -> bool {
        let started = self.agents.start(agent.clone());
        if started {
            tracing::debug!(agents = self.agents.len(), "agent started");
        }
        started
    }

    /// Remove an agent from the schedule. The caller keeps its handle.
    pub fn stop_agent(&mut self, agent: &AgentRef) -> bool {
        self.agents.stop(agent)
    }

    /// Stop an agent and run its teardown hook.
    pub fn destroy_agent(&mut self, agent: AgentRef) {
        self.agents.stop(&agent);
        self.teardown(agent);
    }

    /// Destroy every live agent of `class_id`. Returns how many were removed.
    ///
    /// All matching agents leave the table before any teardown hook runs, so a
    /// hook may call this again and finds its own entry already gone.
    pub fn destroy_all_agents(&mut self, class_id: &str) -> usize {
        let removed = self.agents.remove_class(class_id);
        let count = removed.len();
        for agent in removed {
            self.teardown(agent);
        }
        if count > 0 {
            tracing::debug!(agent = class_id, count, "destroyed agents");
        }
        count
    }

    /// Live agents in scheduling order.
    pub fn running_agents(&self) -> Vec<AgentRef> {
        self.agents.snapshot()
    }

    /// Class ids of the live agents in scheduling order.
    pub fn running_agent_ids(&self) -> Vec<String> {
        self.agents.class_ids().into_iter().map(String::from).collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn teardown(&mut self, agent: AgentRef) {
        let busy = match agent.try_lock() {
            Ok(mut guard) => {
                guard.teardown(self);
                false
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().teardown(self);
                false
            }
            Err(TryLockError::WouldBlock) => true,
        };
        if busy {
            self.deferred_teardown.push(agent);
        }
    }

    /// Tear down agents that were destroyed during their own run.
    pub(crate) fn flush_deferred_teardown(&mut self) {
        for agent in std::mem::take(&mut self.deferred_teardown) {
            self.teardown(agent);
        }
    }

    // -----------------------------------------------------------------------
    // Request kinds and the queue
    // -----------------------------------------------------------------------

    pub fn register_request(
        &mut self,
        name: impl Into<String>,
        factory: Box<dyn Factory<dyn Request>>,
    ) -> RegistryResult<()> {
        self.request_registry.register(name, factory)
    }

    pub fn unregister_request(&mut self, name: &str) -> RegistryResult<()> {
        self.request_registry.unregister(name)
    }

    pub fn create_request(&self, name: &str) -> RegistryResult<Box<dyn Request>> {
        self.request_registry.create(name)
    }

    pub fn request_info(&self, name: &str) -> RegistryResult<ClassInfo> {
        self.request_registry.class_info(name).cloned()
    }

    /// Registered request kinds, sorted.
    pub fn request_ids(&self) -> Vec<String> {
        self.request_registry.names().into_iter().map(String::from).collect()
    }

    pub fn push_request(&self, request: Box<dyn Request>) {
        self.queue.push(request);
    }

    pub fn pop_request(&self) -> Option<Box<dyn Request>> {
        self.queue.pop()
    }

    pub fn request_queue_size(&self) -> usize {
        self.queue.len()
    }

    // -----------------------------------------------------------------------
    // Modules
    // -----------------------------------------------------------------------

    /// Load a module library and run its `init`.
    pub fn load_module(&mut self, path: &str) -> ModuleResult<()> {
        module::load(self, path)
    }

    /// Unload a module by id or filename.
    pub fn unload_module(&mut self, key: &str) -> ModuleResult<()> {
        module::unload(self, key)
    }

    /// Look a module up by id or filename.
    pub fn get_module(&self, key: &str) -> Option<Arc<ModuleData>> {
        self.modules.get(key)
    }

    pub fn module_info(&self, key: &str) -> Option<ModuleInfo> {
        self.modules.get(key).map(|m| m.info())
    }

    /// Ids of the loaded modules, sorted.
    pub fn module_ids(&self) -> Vec<String> {
        self.modules.modules().into_iter().map(|m| m.id).collect()
    }

    /// Loaded modules, sorted by id.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.modules()
    }

    // -----------------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------------

    /// Start the console listener on `SERVER_PORT`. Returns the bound address.
    pub fn enable_network(&mut self) -> NetworkResult<SocketAddr> {
        if let Some(addr) = self.network_addr() {
            return Ok(addr);
        }
        if self.network.is_none() {
            self.network = Some(NetworkServer::start()?);
        }
        let queue = self.queue.clone();
        let port = self.config.server_port;
        match self.network.as_mut() {
            Some(network) => network.add_console_listener(port, queue),
            None => Err(crate::error::NetworkError::NotRunning),
        }
    }

    pub fn disable_network(&mut self) {
        if let Some(mut network) = self.network.take() {
            network.stop();
        }
    }

    /// Address of the console listener, if the network is enabled.
    pub fn network_addr(&self) -> Option<SocketAddr> {
        self.network.as_ref().and_then(|n| n.console_addr())
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    pub fn cycle_count(&self) -> i64 {
        self.cycle_count
    }

    pub(crate) fn advance_cycle(&mut self) {
        self.cycle_count = scheduler::next_cycle(self.cycle_count);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to exit after the current cycle.
    pub fn stop(&self) {
        request_stop(&self.running, &self.stop_requested);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Run the bootstrap script, then paced cycles until [`stop`](Self::stop).
    ///
    /// Returns at once if a stop was requested before the call.
    pub fn serve(&mut self) {
        if self.stop_requested.swap(false, Ordering::SeqCst) {
            tracing::info!("stop requested before serve, not starting");
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        self.run_bootstrap_script();

        let mut pacer = CyclePacer::new(self.config.server_cycle_duration);
        tracing::info!(
            cycle_ms = self.config.server_cycle_duration,
            network = ?self.network_addr(),
            "cogserver ready"
        );
        while !self.stop_requested() {
            scheduler::run_cycle(self);
            pacer.wait();
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(cycle = self.cycle_count, "server loop stopped");
    }

    /// Run `cycles` cycles back to back without pacing or bootstrap.
    ///
    /// With `cycles == 0` runs until [`stop`](Self::stop), honouring a stop
    /// issued before the call. Returns the number of cycles run.
    pub fn tick(&mut self, cycles: u64) -> u64 {
        self.running.store(true, Ordering::SeqCst);
        let mut done = 0;
        loop {
            let more = match cycles {
                0 => !self.stop_requested.swap(false, Ordering::SeqCst),
                n => done < n,
            };
            if !more {
                break;
            }
            scheduler::run_cycle(self);
            done += 1;
        }
        self.running.store(false, Ordering::SeqCst);
        done
    }

    /// Execute a script through the installed script loader.
    pub fn run_script(&mut self, path: &Path) -> ScriptResult<usize> {
        let Some(mut loader) = self.script_loader.take() else {
            tracing::warn!(path = %path.display(), "script loader busy, skipping script");
            return Ok(0);
        };
        let result = loader.load(self, path);
        self.script_loader = Some(loader);
        result
    }

    fn run_bootstrap_script(&mut self) {
        let Some(path) = self.config.bootstrap_script.clone() else {
            return;
        };
        match self.run_script(&path) {
            Ok(commands) => {
                tracing::info!(path = %path.display(), commands, "bootstrap script executed");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "bootstrap script failed");
            }
        }
    }
}

impl Drop for CogServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.disable_network();

        let unloaded = module::unload_all_instances(self);

        for agent in self.agents.clear() {
            self.teardown(agent);
        }
        self.flush_deferred_teardown();
        self.agents.clear();
        self.deferred_teardown.clear();
        self.agent_registry.clear();
        self.request_registry.clear();
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded pending requests");
        }
        self.script_loader = None;

        // Module code must stay mapped until nothing above can reach it.
        for data in unloaded {
            let _ = module::close(&data);
        }
        tracing::debug!("cogserver dropped");
    }
}

impl std::fmt::Debug for CogServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CogServer")
            .field("cycle_count", &self.cycle_count)
            .field("running", &self.is_running())
            .field("agents", &self.agents)
            .field("queue", &self.queue)
            .field("modules", &self.modules)
            .finish_non_exhaustive()
    }
}
