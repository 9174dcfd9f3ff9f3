//! Script execution.
//!
//! The server runs its bootstrap script through a [`ScriptLoader`] right
//! before the first cycle. [`CommandScriptLoader`] treats a script as a list
//! of console commands, one per line.

use std::path::Path;

use crate::console::execute_line;
use crate::error::{ScriptError, ScriptResult};
use crate::server::CogServer;

/// Executes a script file against the server.
pub trait ScriptLoader: Send {
    /// Run the script at `path`. Returns the number of commands executed.
    fn load(&mut self, server: &mut CogServer, path: &Path) -> ScriptResult<usize>;
}

/// Runs one console command per line. Blank lines and `#` comments are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandScriptLoader;

impl ScriptLoader for CommandScriptLoader {
    fn load(&mut self, server: &mut CogServer, path: &Path) -> ScriptResult<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| ScriptError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut executed = 0;
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let output = execute_line(server, line);
            tracing::debug!(
                path = %path.display(),
                line = idx + 1,
                command = line,
                output = %output,
                "script command executed"
            );
            executed += 1;
        }
        Ok(executed)
    }
}
