// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # cogserver
//!
//! The core of a cognitive server: a fixed-tick loop driving cooperating
//! agents over a shared knowledge store, interleaved with requests submitted
//! from network consoles, and extended at runtime by dynamically loaded
//! modules.
//!
//! ## Architecture
//!
//! - **Server** (`server`): owns everything below; the single executor thread
//! - **Scheduler** (`scheduler`): per-cycle request drain, agent dispatch, pacing
//! - **Registries** (`registry`): name → factory tables for agents and requests
//! - **Agents** (`agent`) and **requests** (`request`): the two kinds of work
//! - **Modules** (`module`): plugin ABI and loaders (`libloading` or in-process)
//! - **Network** (`network`, `console`): tokio TCP console feeding the queue
//! - **Store** (`store`): symbols and triples shared by all agents
//!
//! ## Library usage
//!
//! ```no_run
//! use cogserver::config::ServerConfig;
//! use cogserver::server::CogServer;
//!
//! let mut server = CogServer::new(ServerConfig::default());
//! cogserver::builtin::register_builtin_requests(&mut server).unwrap();
//! server.enable_network().unwrap();
//! server.serve();
//! ```

pub mod agent;
pub mod builtin;
pub mod config;
pub mod console;
pub mod error;
pub mod module;
pub mod network;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod script;
pub mod server;
pub mod store;

pub use agent::{Agent, AgentRef};
pub use error::{CogError, CogResult};
pub use module::Module;
pub use request::Request;
pub use server::{CogServer, ServerHandle};
