//! Rich diagnostic error types for the cogserver core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Core operations never abort the process:
//! they hand one of these back and leave server state intact.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the cogserver.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum CogError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("{kind} \"{name}\" is already registered")]
    #[diagnostic(
        code(cog::registry::duplicate_name),
        help(
            "Names are unique within a registry. Unregister the existing {kind} first, \
             or pick a different name."
        )
    )]
    DuplicateName { kind: &'static str, name: String },

    #[error("unknown {kind}: \"{name}\"")]
    #[diagnostic(
        code(cog::registry::unknown_name),
        help(
            "No factory is registered under this name. The module providing it may not \
             be loaded; list known names with `help` or `agents-list`."
        )
    )]
    UnknownName { kind: &'static str, name: String },
}

// ---------------------------------------------------------------------------
// Module errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModuleError {
    #[error("module \"{key}\" is already loaded")]
    #[diagnostic(
        code(cog::module::already_loaded),
        help("Unload it first with `unloadmodule {key}` if you want to reload it.")
    )]
    AlreadyLoaded { key: String },

    #[error("module \"{key}\" is not loaded")]
    #[diagnostic(
        code(cog::module::unknown),
        help("Modules are indexed by both id and filename. List them with `listmodules`.")
    )]
    UnknownModule { key: String },

    #[error("unable to load module \"{path}\": {message}")]
    #[diagnostic(
        code(cog::module::load_failed),
        help(
            "The library must exist and export `cogserver_module_id`, \
             `cogserver_module_load` and `cogserver_module_unload`. \
             Use the `declare_module!` macro to generate them."
        )
    )]
    LoadFailed { path: String, message: String },

    #[error("module id \"{id}\" from \"{path}\" collides with an already loaded module")]
    #[diagnostic(
        code(cog::module::key_collision),
        help("Module ids and filenames share one index; rename the module id.")
    )]
    KeyCollision { id: String, path: String },

    #[error("module \"{id}\" failed to initialize: {message}")]
    #[diagnostic(
        code(cog::module::init_failed),
        help("The module was unloaded again. Check the registrations it performs in `init`.")
    )]
    InitFailed { id: String, message: String },

    #[error("unable to close module library \"{path}\": {message}")]
    #[diagnostic(
        code(cog::module::close_failed),
        help("The module entries were removed; only the library handle could not be released.")
    )]
    CloseFailed { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RequestError {
    #[error("invalid parameters for \"{request}\": {message}")]
    #[diagnostic(
        code(cog::request::invalid_parameters),
        help("Run `help {request}` for usage.")
    )]
    InvalidParameters { request: String, message: String },

    #[error("request \"{request}\" failed: {message}")]
    #[diagnostic(code(cog::request::failed))]
    Failed { request: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Module(#[from] ModuleError),
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("agent \"{agent}\" failed: {message}")]
    #[diagnostic(
        code(cog::agent::failed),
        help("The agent stays scheduled; the failure only affects the current cycle.")
    )]
    Failed { agent: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(cog::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(cog::config::parse),
        help("Check the TOML syntax; keys are upper case, e.g. `SERVER_PORT = 17001`.")
    )]
    Parse { path: String, message: String },

    #[error("invalid value for {key}: \"{value}\"")]
    #[diagnostic(
        code(cog::config::invalid_value),
        help("{expected}")
    )]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum NetworkError {
    #[error("failed to start network runtime")]
    #[diagnostic(code(cog::network::runtime))]
    Runtime {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind console listener on port {port}")]
    #[diagnostic(
        code(cog::network::bind),
        help("Another process may be using the port. Change SERVER_PORT or use 0 for any port.")
    )]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("network server is not running")]
    #[diagnostic(
        code(cog::network::not_running),
        help("Call `enable_network()` before adding listeners.")
    )]
    NotRunning,
}

// ---------------------------------------------------------------------------
// Script errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ScriptError {
    #[error("failed to read script: {path}")]
    #[diagnostic(
        code(cog::script::read),
        help("Check BOOTSTRAP_SCRIPT; relative paths resolve against the working directory.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("symbol allocator exhausted")]
    #[diagnostic(
        code(cog::store::exhausted),
        help("The store cannot allocate more than u64::MAX symbols.")
    )]
    Exhausted,

    #[error("duplicate label \"{label}\" (already symbol {existing_id})")]
    #[diagnostic(
        code(cog::store::duplicate_label),
        help("Labels are case-insensitive and unique. Look the symbol up instead of creating it.")
    )]
    DuplicateLabel { label: String, existing_id: u64 },

    #[error("symbol not found: {symbol_id}")]
    #[diagnostic(code(cog::store::not_found))]
    SymbolNotFound { symbol_id: u64 },
}

// ---------------------------------------------------------------------------
// Result aliases
// ---------------------------------------------------------------------------

pub type CogResult<T> = std::result::Result<T, CogError>;
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;
pub type RequestResult<T> = std::result::Result<T, RequestError>;
pub type AgentResult<T> = std::result::Result<T, AgentError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
