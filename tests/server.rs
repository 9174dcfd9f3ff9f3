//! End-to-end tests for the server loop.
//!
//! These drive a real `CogServer` through ticks and paced cycles, checking
//! request ordering, agent frequencies, module load/unload through the
//! in-process loader, and re-entrant agent teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cogserver::config::ServerConfig;
use cogserver::error::{
    AgentError, AgentResult, CogResult, ModuleError, RegistryError, RequestError, RequestResult,
};
use cogserver::module::StaticLoader;
use cogserver::registry::{ClassInfo, FnFactory, TypeFactory};
use cogserver::{Agent, AgentRef, CogServer, Module, Request};

fn test_server() -> CogServer {
    CogServer::new(ServerConfig::default())
}

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ---------------------------------------------------------------------------
// Test agents and requests
// ---------------------------------------------------------------------------

struct Append {
    log: Log,
    value: String,
}

impl Request for Append {
    fn class_id(&self) -> &str {
        "append"
    }

    fn execute(&mut self, _server: &mut CogServer) -> RequestResult<String> {
        self.log.lock().unwrap().push(self.value.clone());
        Ok(String::new())
    }
}

struct Failing;

impl Request for Failing {
    fn class_id(&self) -> &str {
        "failing"
    }

    fn execute(&mut self, _server: &mut CogServer) -> RequestResult<String> {
        Err(RequestError::Failed {
            request: "failing".into(),
            message: "always fails".into(),
        })
    }
}

struct Periodic {
    id: &'static str,
    frequency: u32,
    log: Log,
}

impl Agent for Periodic {
    fn class_id(&self) -> &str {
        self.id
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn run(&mut self, server: &mut CogServer) -> AgentResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}@{}", self.id, server.cycle_count()));
        Ok(())
    }
}

fn register_periodic(server: &mut CogServer, id: &'static str, frequency: u32, log: &Log) {
    let log = Arc::clone(log);
    server
        .register_agent(
            id,
            Box::new(FnFactory::new(ClassInfo::new(id), move || {
                Box::new(Periodic {
                    id,
                    frequency,
                    log: Arc::clone(&log),
                }) as Box<dyn Agent>
            })),
        )
        .unwrap();
}

fn runs_of(log: &Log, id: &str) -> usize {
    entries(log)
        .iter()
        .filter(|e| e.split('@').next() == Some(id))
        .count()
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn paced_loop_runs_about_ten_cycles_per_second() {
    let mut server = CogServer::new(ServerConfig {
        server_cycle_duration: 100,
        ..ServerConfig::default()
    });
    let handle = server.handle();
    let stopper = std::thread::spawn(move || {
        while !handle.is_running() {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_secs(1));
        handle.stop();
    });

    server.serve();
    stopper.join().unwrap();

    let executed = server.cycle_count() - 1;
    assert!((9..=11).contains(&executed), "executed {executed} cycles");
}

#[test]
fn requests_run_in_push_order() {
    let mut server = test_server();
    let log = new_log();
    for i in 1..=100 {
        server.push_request(Box::new(Append {
            log: Arc::clone(&log),
            value: i.to_string(),
        }));
    }
    assert_eq!(server.request_queue_size(), 100);

    server.tick(2);

    let expected: Vec<String> = (1..=100).map(|i| i.to_string()).collect();
    assert_eq!(entries(&log), expected);
    assert_eq!(server.request_queue_size(), 0);
}

#[test]
fn requests_from_other_threads_run_on_next_cycle() {
    let mut server = test_server();
    let log = new_log();
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let handle = server.handle();
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 0..25 {
                    handle.submit_request(Box::new(Append {
                        log: Arc::clone(&log),
                        value: format!("{p}:{i}"),
                    }));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    server.tick(1);
    let seen = entries(&log);
    assert_eq!(seen.len(), 100);
    for p in 0..4 {
        let order: Vec<usize> = seen
            .iter()
            .filter_map(|e| e.strip_prefix(&format!("{p}:")))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(order, (0..25).collect::<Vec<_>>());
    }
}

#[test]
fn requests_run_before_agents_within_a_cycle() {
    let mut server = test_server();
    let log = new_log();
    register_periodic(&mut server, "A", 1, &log);
    server.create_agent("A", true).unwrap();
    server.push_request(Box::new(Append {
        log: Arc::clone(&log),
        value: "request".into(),
    }));

    server.tick(1);
    assert_eq!(entries(&log), vec!["request".to_string(), "A@1".to_string()]);
}

#[test]
fn failing_request_does_not_block_queue() {
    let mut server = test_server();
    let log = new_log();
    server.push_request(Box::new(Failing));
    server.push_request(Box::new(Append {
        log: Arc::clone(&log),
        value: "after".into(),
    }));
    server.tick(1);
    assert_eq!(entries(&log), vec!["after".to_string()]);
}

#[test]
fn agents_run_on_their_frequency() {
    let mut server = test_server();
    let log = new_log();
    register_periodic(&mut server, "A", 3, &log);
    register_periodic(&mut server, "B", 5, &log);
    server.create_agent("A", true).unwrap();
    server.create_agent("B", true).unwrap();

    assert_eq!(server.cycle_count(), 1);
    server.tick(30);

    assert_eq!(runs_of(&log, "A"), 10);
    assert_eq!(runs_of(&log, "B"), 6);
    assert!(entries(&log).contains(&"A@30".to_string()));
    assert!(entries(&log).contains(&"B@30".to_string()));
    // Start order is run order on shared cycles.
    let seen = entries(&log);
    let a = seen.iter().position(|e| e == "A@15").unwrap();
    let b = seen.iter().position(|e| e == "B@15").unwrap();
    assert!(a < b);
}

struct Exploding;

impl Agent for Exploding {
    fn class_id(&self) -> &str {
        "exploding"
    }

    fn run(&mut self, _server: &mut CogServer) -> AgentResult<()> {
        panic!("agent blew up");
    }
}

struct Erroring;

impl Agent for Erroring {
    fn class_id(&self) -> &str {
        "erroring"
    }

    fn run(&mut self, _server: &mut CogServer) -> AgentResult<()> {
        Err(AgentError::Failed {
            agent: "erroring".into(),
            message: "nope".into(),
        })
    }
}

#[test]
fn misbehaving_agents_do_not_stop_the_loop() {
    let mut server = test_server();
    let log = new_log();
    server
        .register_agent(
            "exploding",
            Box::new(FnFactory::new(ClassInfo::new("exploding"), || {
                Box::new(Exploding) as Box<dyn Agent>
            })),
        )
        .unwrap();
    server
        .register_agent(
            "erroring",
            Box::new(FnFactory::new(ClassInfo::new("erroring"), || {
                Box::new(Erroring) as Box<dyn Agent>
            })),
        )
        .unwrap();
    register_periodic(&mut server, "A", 1, &log);
    server.create_agent("exploding", true).unwrap();
    server.create_agent("erroring", true).unwrap();
    server.create_agent("A", true).unwrap();

    server.tick(3);
    assert_eq!(runs_of(&log, "A"), 3);
    assert_eq!(server.agent_count(), 3);
}

// ---------------------------------------------------------------------------
// Agent destruction
// ---------------------------------------------------------------------------

/// Re-enters `destroy_all_agents` for its own class from teardown and records
/// what the table looked like at that point.
struct Reentrant {
    observed: Log,
    torn_down: Arc<AtomicUsize>,
}

impl Agent for Reentrant {
    fn class_id(&self) -> &str {
        "R"
    }

    fn run(&mut self, _server: &mut CogServer) -> AgentResult<()> {
        Ok(())
    }

    fn teardown(&mut self, server: &mut CogServer) {
        let nested = server.destroy_all_agents("R");
        self.observed.lock().unwrap().push(format!(
            "nested={nested} remaining={}",
            server.running_agent_ids().join(",")
        ));
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

fn register_reentrant(server: &mut CogServer) -> (Log, Arc<AtomicUsize>) {
    let observed = new_log();
    let torn_down = Arc::new(AtomicUsize::new(0));
    let (o, t) = (Arc::clone(&observed), Arc::clone(&torn_down));
    server
        .register_agent(
            "R",
            Box::new(FnFactory::new(ClassInfo::new("R"), move || {
                Box::new(Reentrant {
                    observed: Arc::clone(&o),
                    torn_down: Arc::clone(&t),
                }) as Box<dyn Agent>
            })),
        )
        .unwrap();
    (observed, torn_down)
}

#[test]
fn reentrant_destroy_completes() {
    let mut server = test_server();
    let log = new_log();
    register_periodic(&mut server, "A", 1, &log);
    let (observed, torn_down) = register_reentrant(&mut server);

    server.create_agent("R", true).unwrap();
    server.create_agent("A", true).unwrap();
    server.create_agent("R", true).unwrap();

    assert_eq!(server.destroy_all_agents("R"), 2);
    assert_eq!(torn_down.load(Ordering::SeqCst), 2);
    assert_eq!(
        entries(&observed),
        vec!["nested=0 remaining=A".to_string(), "nested=0 remaining=A".to_string()]
    );
    assert_eq!(server.running_agent_ids(), vec!["A".to_string()]);
}

#[test]
fn destroy_all_agents_is_idempotent() {
    let mut server = test_server();
    let (_, torn_down) = register_reentrant(&mut server);
    server.create_agent("R", true).unwrap();

    assert_eq!(server.destroy_all_agents("R"), 1);
    assert_eq!(server.destroy_all_agents("R"), 0);
    assert_eq!(server.destroy_all_agents("never-registered"), 0);
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
}

/// Destroys its own class while running.
struct SelfDestruct {
    torn_down: Arc<AtomicUsize>,
}

impl Agent for SelfDestruct {
    fn class_id(&self) -> &str {
        "self-destruct"
    }

    fn run(&mut self, server: &mut CogServer) -> AgentResult<()> {
        server.destroy_all_agents("self-destruct");
        // Not torn down yet: this run still holds the agent.
        assert_eq!(self.torn_down.load(Ordering::SeqCst), 0);
        Ok(())
    }

    fn teardown(&mut self, _server: &mut CogServer) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn agent_destroyed_during_its_run_is_torn_down_afterwards() {
    let mut server = test_server();
    let torn_down = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&torn_down);
    server
        .register_agent(
            "self-destruct",
            Box::new(FnFactory::new(ClassInfo::new("self-destruct"), move || {
                Box::new(SelfDestruct {
                    torn_down: Arc::clone(&t),
                }) as Box<dyn Agent>
            })),
        )
        .unwrap();
    server.create_agent("self-destruct", true).unwrap();

    server.tick(1);
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    assert_eq!(server.agent_count(), 0);
}

/// Stops every `A` agent when it runs.
#[derive(Default)]
struct Stopper;

impl Agent for Stopper {
    fn class_id(&self) -> &str {
        "stopper"
    }

    fn run(&mut self, server: &mut CogServer) -> AgentResult<()> {
        server.destroy_all_agents("A");
        Ok(())
    }
}

#[test]
fn agent_stopped_mid_cycle_is_skipped() {
    let mut server = test_server();
    let log = new_log();
    register_periodic(&mut server, "A", 1, &log);
    server
        .register_agent(
            "stopper",
            Box::new(TypeFactory::<Stopper>::new(ClassInfo::new("stopper"))),
        )
        .unwrap();
    server.create_agent("stopper", true).unwrap();
    server.create_agent("A", true).unwrap();

    server.tick(2);
    assert_eq!(runs_of(&log, "A"), 0);
}

/// Stops and restarts its own handle on every run.
struct Restarter {
    me: Arc<Mutex<Option<AgentRef>>>,
    runs: Arc<AtomicUsize>,
}

impl Agent for Restarter {
    fn class_id(&self) -> &str {
        "restarter"
    }

    fn run(&mut self, server: &mut CogServer) -> AgentResult<()> {
        let me = self.me.lock().unwrap().clone().unwrap();
        assert!(server.stop_agent(&me));
        assert!(server.start_agent(&me));
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn agent_can_restart_itself_during_its_run() {
    let mut server = test_server();
    let log = new_log();
    register_periodic(&mut server, "A", 1, &log);
    let me = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));
    let (slot, counter) = (Arc::clone(&me), Arc::clone(&runs));
    server
        .register_agent(
            "restarter",
            Box::new(FnFactory::new(ClassInfo::new("restarter"), move || {
                Box::new(Restarter {
                    me: Arc::clone(&slot),
                    runs: Arc::clone(&counter),
                }) as Box<dyn Agent>
            })),
        )
        .unwrap();
    let agent = server.create_agent("restarter", true).unwrap();
    *me.lock().unwrap() = Some(agent);
    server.create_agent("A", true).unwrap();

    server.tick(3);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(runs_of(&log, "A"), 3);
    assert_eq!(server.agent_count(), 2);
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TickModule;

#[derive(Default)]
struct TickAgent;

impl Agent for TickAgent {
    fn class_id(&self) -> &str {
        "T"
    }

    fn run(&mut self, _server: &mut CogServer) -> AgentResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct PingRequest;

impl Request for PingRequest {
    fn class_id(&self) -> &str {
        "ping"
    }

    fn execute(&mut self, _server: &mut CogServer) -> RequestResult<String> {
        Ok("pong".into())
    }
}

impl Module for TickModule {
    fn init(&mut self, server: &mut CogServer) -> CogResult<()> {
        server.register_agent("T", Box::new(TypeFactory::<TickAgent>::new(ClassInfo::new("T"))))?;
        server.register_request(
            "ping",
            Box::new(TypeFactory::<PingRequest>::new(ClassInfo::new("ping"))),
        )?;
        Ok(())
    }

    fn shutdown(&mut self, server: &mut CogServer) {
        let _ = server.unregister_agent("T");
        let _ = server.unregister_request("ping");
    }
}

/// Registers an agent and then fails.
#[derive(Default)]
struct BrokenModule;

impl Module for BrokenModule {
    fn init(&mut self, server: &mut CogServer) -> CogResult<()> {
        server.register_agent("T", Box::new(TypeFactory::<TickAgent>::new(ClassInfo::new("T"))))?;
        // Second registration of the same name fails.
        server.register_agent("T", Box::new(TypeFactory::<TickAgent>::new(ClassInfo::new("T"))))?;
        Ok(())
    }

    fn shutdown(&mut self, server: &mut CogServer) {
        let _ = server.unregister_agent("T");
    }
}

fn module_server() -> (CogServer, Arc<AtomicUsize>) {
    let loader = StaticLoader::new()
        .with_module("libtick.so", cogserver::module_entry_points!(TickModule, "tick"))
        .with_module("libbroken.so", cogserver::module_entry_points!(BrokenModule, "broken"));
    let open = loader.open_libraries();
    (
        CogServer::with_loader(ServerConfig::default(), Box::new(loader)),
        open,
    )
}

#[test]
fn module_round_trip() {
    let (mut server, open) = module_server();

    server.load_module("libtick.so").unwrap();
    assert!(server.agent_ids().contains(&"T".to_string()));
    assert!(server.request_ids().contains(&"ping".to_string()));
    assert!(server.get_module("tick").is_some());
    assert!(server.get_module("libtick.so").is_some());

    server.create_agent("T", true).unwrap();
    server.tick(2);

    server.unload_module("tick").unwrap();
    assert!(!server.agent_ids().contains(&"T".to_string()));
    assert!(!server.request_ids().contains(&"ping".to_string()));
    assert_eq!(server.agent_count(), 0);
    assert!(server.get_module("tick").is_none());
    assert!(server.get_module("libtick.so").is_none());
    assert!(server.module_ids().is_empty());
    assert!(matches!(
        server.create_agent("T", false),
        Err(RegistryError::UnknownName { .. })
    ));
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[test]
fn double_load_is_rejected() {
    let (mut server, open) = module_server();
    server.load_module("libtick.so").unwrap();

    let err = server.load_module("libtick.so").unwrap_err();
    assert!(matches!(err, ModuleError::AlreadyLoaded { .. }));
    assert_eq!(server.module_ids(), vec!["tick".to_string()]);
    assert_eq!(open.load(Ordering::SeqCst), 1);
}

#[test]
fn load_unload_pair_leaves_module_map_unchanged() {
    let (mut server, _) = module_server();
    server.load_module("libtick.so").unwrap();
    let before = server.modules();

    // A failed load changes nothing.
    assert!(server.load_module("libmissing.so").is_err());
    assert_eq!(server.modules(), before);

    server.unload_module("libtick.so").unwrap();
    server.load_module("libtick.so").unwrap();
    assert_eq!(server.modules(), before);
}

#[test]
fn failed_init_unloads_the_module() {
    let (mut server, open) = module_server();

    let err = server.load_module("libbroken.so").unwrap_err();
    assert!(matches!(err, ModuleError::InitFailed { ref id, .. } if id == "broken"));
    assert!(server.get_module("broken").is_none());
    assert!(server.agent_ids().is_empty());
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_server_releases_modules() {
    let (mut server, open) = module_server();
    server.load_module("libtick.so").unwrap();
    server.create_agent("T", true).unwrap();
    server.push_request(server.create_request("ping").unwrap());

    drop(server);
    assert_eq!(open.load(Ordering::SeqCst), 0);
}
