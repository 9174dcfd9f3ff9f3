//! Built-in console requests.
//!
//! | Name | Arguments |
//! |---|---|
//! | `help` | `[command]` |
//! | `shutdown` | |
//! | `loadmodule` | `<path>` |
//! | `unloadmodule` | `<id-or-path>` |
//! | `listmodules` | |
//! | `agents-list` | |
//! | `agents-start` | `<class>...` |
//! | `agents-stop` | `<class>...` |
//! | `stats` | |

use std::fmt::Write as _;

use crate::error::{RegistryResult, RequestError, RequestResult};
use crate::registry::{ClassInfo, TypeFactory};
use crate::request::Request;
use crate::server::CogServer;

fn invalid(request: &str, message: &str) -> RequestError {
    RequestError::InvalidParameters {
        request: request.to_string(),
        message: message.to_string(),
    }
}

fn expect_none(request: &str, params: &[String]) -> RequestResult<()> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(invalid(request, "takes no arguments"))
    }
}

fn expect_one(request: &str, params: Vec<String>) -> RequestResult<String> {
    let mut params = params.into_iter();
    match (params.next(), params.next()) {
        (Some(arg), None) => Ok(arg),
        _ => Err(invalid(request, "expects exactly one argument")),
    }
}

// ---------------------------------------------------------------------------
// help
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct HelpRequest {
    command: Option<String>,
}

impl Request for HelpRequest {
    fn class_id(&self) -> &str {
        "help"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        let mut params = params.into_iter();
        self.command = params.next();
        if params.next().is_some() {
            return Err(invalid("help", "expects at most one argument"));
        }
        Ok(())
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        if let Some(name) = &self.command {
            let info = server.request_info(name)?;
            let text = if info.help.is_empty() {
                &info.description
            } else {
                &info.help
            };
            return Ok(text.clone());
        }

        let mut out = String::from("Available commands:\n");
        for name in server.request_ids() {
            let description = server
                .request_info(&name)
                .map(|info| info.description)
                .unwrap_or_default();
            let _ = writeln!(out, "  {name:<16} {description}");
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// shutdown
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ShutdownRequest;

impl Request for ShutdownRequest {
    fn class_id(&self) -> &str {
        "shutdown"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        expect_none("shutdown", &params)
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        tracing::info!("shutdown requested from console");
        server.stop();
        Ok("shutting down".into())
    }
}

// ---------------------------------------------------------------------------
// modules
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LoadModuleRequest {
    path: String,
}

impl Request for LoadModuleRequest {
    fn class_id(&self) -> &str {
        "loadmodule"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        self.path = expect_one("loadmodule", params)?;
        Ok(())
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        server.load_module(&self.path)?;
        let id = server
            .module_info(&self.path)
            .map(|info| info.id)
            .unwrap_or_else(|| self.path.clone());
        Ok(format!("module loaded: {id}"))
    }
}

#[derive(Debug, Default)]
pub struct UnloadModuleRequest {
    key: String,
}

impl Request for UnloadModuleRequest {
    fn class_id(&self) -> &str {
        "unloadmodule"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        self.key = expect_one("unloadmodule", params)?;
        Ok(())
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        server.unload_module(&self.key)?;
        Ok(format!("module unloaded: {}", self.key))
    }
}

#[derive(Debug, Default)]
pub struct ListModulesRequest;

impl Request for ListModulesRequest {
    fn class_id(&self) -> &str {
        "listmodules"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        expect_none("listmodules", &params)
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        let modules = server.modules();
        if modules.is_empty() {
            return Ok("no modules loaded".into());
        }
        let mut out = String::new();
        for module in modules {
            let _ = writeln!(out, "{}\t{}", module.id, module.filename);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// agents
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AgentsListRequest;

impl Request for AgentsListRequest {
    fn class_id(&self) -> &str {
        "agents-list"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        expect_none("agents-list", &params)
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        let registered = server.agent_ids();
        let running = server.running_agent_ids();
        let mut out = String::new();
        let _ = writeln!(out, "registered: {}", registered.join(", "));
        let _ = writeln!(out, "running: {}", running.join(", "));
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct AgentsStartRequest {
    classes: Vec<String>,
}

impl Request for AgentsStartRequest {
    fn class_id(&self) -> &str {
        "agents-start"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        if params.is_empty() {
            return Err(invalid("agents-start", "expects at least one agent class"));
        }
        self.classes = params;
        Ok(())
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        // Check every name first so a typo starts nothing.
        for class in &self.classes {
            server.agent_info(class)?;
        }
        for class in &self.classes {
            server.create_agent(class, true)?;
        }
        Ok(format!("started: {}", self.classes.join(", ")))
    }
}

#[derive(Debug, Default)]
pub struct AgentsStopRequest {
    classes: Vec<String>,
}

impl Request for AgentsStopRequest {
    fn class_id(&self) -> &str {
        "agents-stop"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        if params.is_empty() {
            return Err(invalid("agents-stop", "expects at least one agent class"));
        }
        self.classes = params;
        Ok(())
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        let mut out = String::new();
        for class in &self.classes {
            let stopped = server.destroy_all_agents(class);
            let _ = writeln!(out, "{class}: {stopped} stopped");
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StatsRequest;

impl Request for StatsRequest {
    fn class_id(&self) -> &str {
        "stats"
    }

    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        expect_none("stats", &params)
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        let mut out = String::new();
        let _ = writeln!(out, "cycle: {}", server.cycle_count());
        let _ = writeln!(out, "queued requests: {}", server.request_queue_size());
        let _ = writeln!(out, "running agents: {}", server.agent_count());
        let _ = writeln!(out, "modules: {}", server.module_ids().len());
        let _ = writeln!(out, "symbols: {}", server.store().symbol_count());
        let _ = writeln!(out, "triples: {}", server.store().triple_count());
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// registration
// ---------------------------------------------------------------------------

fn info(id: &str, description: &str, usage: &str) -> ClassInfo {
    ClassInfo::new(id)
        .with_description(description)
        .with_help(format!("{description}\nusage: {usage}"))
}

/// Register every built-in request with the server.
pub fn register_builtin_requests(server: &mut CogServer) -> RegistryResult<()> {
    server.register_request(
        "help",
        Box::new(TypeFactory::<HelpRequest>::new(info(
            "help",
            "List commands or show help for one",
            "help [command]",
        ))),
    )?;
    server.register_request(
        "shutdown",
        Box::new(TypeFactory::<ShutdownRequest>::new(info(
            "shutdown",
            "Stop the server loop",
            "shutdown",
        ))),
    )?;
    server.register_request(
        "loadmodule",
        Box::new(TypeFactory::<LoadModuleRequest>::new(info(
            "loadmodule",
            "Load a module library",
            "loadmodule <path>",
        ))),
    )?;
    server.register_request(
        "unloadmodule",
        Box::new(TypeFactory::<UnloadModuleRequest>::new(info(
            "unloadmodule",
            "Unload a module by id or path",
            "unloadmodule <id-or-path>",
        ))),
    )?;
    server.register_request(
        "listmodules",
        Box::new(TypeFactory::<ListModulesRequest>::new(info(
            "listmodules",
            "List loaded modules",
            "listmodules",
        ))),
    )?;
    server.register_request(
        "agents-list",
        Box::new(TypeFactory::<AgentsListRequest>::new(info(
            "agents-list",
            "List agent kinds and running agents",
            "agents-list",
        ))),
    )?;
    server.register_request(
        "agents-start",
        Box::new(TypeFactory::<AgentsStartRequest>::new(info(
            "agents-start",
            "Create and start agents",
            "agents-start <class>...",
        ))),
    )?;
    server.register_request(
        "agents-stop",
        Box::new(TypeFactory::<AgentsStopRequest>::new(info(
            "agents-stop",
            "Destroy all running agents of the given classes",
            "agents-stop <class>...",
        ))),
    )?;
    server.register_request(
        "stats",
        Box::new(TypeFactory::<StatsRequest>::new(info(
            "stats",
            "Show server statistics",
            "stats",
        ))),
    )?;
    Ok(())
}
