//! Sample cogserver module.
//!
//! Registers a `hello` request that greets and records the greeted name in the
//! knowledge store, and a `hello-watcher` agent that logs store growth every
//! ten cycles. Build as a cdylib and load with `loadmodule`.

use cogserver::error::{AgentResult, CogResult, RequestResult};
use cogserver::registry::{ClassInfo, TypeFactory};
use cogserver::store::SymbolKind;
use cogserver::{Agent, CogServer, Module, Request};

pub const MODULE_ID: &str = "hello";
pub const HELLO_REQUEST: &str = "hello";
pub const WATCHER_AGENT: &str = "hello-watcher";

#[derive(Debug, Default)]
pub struct HelloRequest {
    name: Option<String>,
}

impl Request for HelloRequest {
    fn class_id(&self) -> &str {
        HELLO_REQUEST
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        self.name = (!params.is_empty()).then(|| params.join(" "));
        Ok(())
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        let Some(name) = &self.name else {
            return Ok("hello, world".into());
        };
        let cycle = server.cycle_count();
        if let Err(e) = server
            .store_mut()
            .ensure_symbol(SymbolKind::Concept, name, cycle)
        {
            tracing::warn!(name, error = %e, "could not record greeting");
        }
        Ok(format!("hello, {name}"))
    }
}

#[derive(Debug, Default)]
pub struct WatcherAgent {
    last_seen: usize,
}

impl Agent for WatcherAgent {
    fn class_id(&self) -> &str {
        WATCHER_AGENT
    }

    fn frequency(&self) -> u32 {
        10
    }

    fn run(&mut self, server: &mut CogServer) -> AgentResult<()> {
        let symbols = server.store().symbol_count();
        if symbols != self.last_seen {
            tracing::info!(
                cycle = server.cycle_count(),
                symbols,
                added = symbols.saturating_sub(self.last_seen),
                "store changed"
            );
            self.last_seen = symbols;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct HelloModule;

impl Module for HelloModule {
    fn init(&mut self, server: &mut CogServer) -> CogResult<()> {
        server.register_request(
            HELLO_REQUEST,
            Box::new(TypeFactory::<HelloRequest>::new(
                ClassInfo::new(HELLO_REQUEST)
                    .with_description("Greet someone and remember them")
                    .with_help("usage: hello [name]"),
            )),
        )?;
        server.register_agent(
            WATCHER_AGENT,
            Box::new(TypeFactory::<WatcherAgent>::new(
                ClassInfo::new(WATCHER_AGENT).with_description("Log knowledge store growth"),
            )),
        )?;
        Ok(())
    }

    fn shutdown(&mut self, server: &mut CogServer) {
        let _ = server.unregister_agent(WATCHER_AGENT);
        let _ = server.unregister_request(HELLO_REQUEST);
    }
}

cogserver::declare_module!(HelloModule, "hello");
