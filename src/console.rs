//! Console command execution.
//!
//! A console line is `name arg1 arg2 ...`. The name selects a registered
//! request kind; the remaining words become its parameters. Network sessions
//! wrap each line in a [`ConsoleCommand`] so it executes on the server thread,
//! and the bootstrap script runs lines directly through [`execute_line`].

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::oneshot;

use crate::error::RequestResult;
use crate::request::Request;
use crate::scheduler::panic_message;
use crate::server::CogServer;

/// Class id of [`ConsoleCommand`] requests.
pub const CONSOLE_COMMAND: &str = "console-command";

/// Run one console line against the server and return its textual reply.
///
/// Failures are reported in the reply rather than returned. A panicking
/// request is caught and reported the same way.
pub fn execute_line(server: &mut CogServer, line: &str) -> String {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return String::new();
    };
    let params: Vec<String> = words.map(String::from).collect();

    let mut request = match server.create_request(name) {
        Ok(request) => request,
        Err(_) => {
            tracing::debug!(command = name, "unknown console command");
            return format!("command not found: {name}");
        }
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        request.set_parameters(params)?;
        request.execute(server)
    }));
    match outcome {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!(command = name, error = %e, "console command failed");
            e.to_string()
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(command = name, panic = %message, "console command panicked");
            format!("command panicked: {message}")
        }
    }
}

/// A console line queued by a network session, with the channel its reply
/// goes back on.
pub struct ConsoleCommand {
    line: String,
    reply: Option<oneshot::Sender<String>>,
}

impl ConsoleCommand {
    pub fn new(line: impl Into<String>, reply: oneshot::Sender<String>) -> Self {
        Self {
            line: line.into(),
            reply: Some(reply),
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }
}

impl Request for ConsoleCommand {
    fn class_id(&self) -> &str {
        CONSOLE_COMMAND
    }

    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String> {
        let output = execute_line(server, &self.line);
        if let Some(reply) = self.reply.take() {
            // The session may have hung up; the output is still returned.
            let _ = reply.send(output.clone());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::{ClassInfo, FnFactory};
    use crate::error::RequestError;

    struct Echo {
        words: Vec<String>,
    }

    impl Request for Echo {
        fn class_id(&self) -> &str {
            "echo"
        }

        fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
            if params.is_empty() {
                return Err(RequestError::InvalidParameters {
                    request: "echo".into(),
                    message: "nothing to echo".into(),
                });
            }
            self.words = params;
            Ok(())
        }

        fn execute(&mut self, _server: &mut CogServer) -> RequestResult<String> {
            Ok(self.words.join(" "))
        }
    }

    struct Explode;

    impl Request for Explode {
        fn class_id(&self) -> &str {
            "explode"
        }

        fn execute(&mut self, _server: &mut CogServer) -> RequestResult<String> {
            panic!("kaboom");
        }
    }

    fn server_with_echo() -> CogServer {
        let mut server = CogServer::new(ServerConfig::default());
        server
            .register_request(
                "echo",
                Box::new(FnFactory::new(ClassInfo::new("echo"), || {
                    Box::new(Echo { words: Vec::new() }) as Box<dyn Request>
                })),
            )
            .unwrap();
        server
            .register_request(
                "explode",
                Box::new(FnFactory::new(ClassInfo::new("explode"), || {
                    Box::new(Explode) as Box<dyn Request>
                })),
            )
            .unwrap();
        server
    }

    #[test]
    fn line_dispatches_with_arguments() {
        let mut server = server_with_echo();
        assert_eq!(execute_line(&mut server, "echo  hello   world "), "hello world");
    }

    #[test]
    fn unknown_command_reply() {
        let mut server = server_with_echo();
        assert_eq!(execute_line(&mut server, "frobnicate 1"), "command not found: frobnicate");
        assert_eq!(execute_line(&mut server, "   "), "");
    }

    #[test]
    fn parameter_errors_become_replies() {
        let mut server = server_with_echo();
        let reply = execute_line(&mut server, "echo");
        assert!(reply.contains("nothing to echo"));
    }

    #[test]
    fn panicking_command_becomes_reply() {
        let mut server = server_with_echo();
        assert_eq!(execute_line(&mut server, "explode"), "command panicked: kaboom");
        assert_eq!(execute_line(&mut server, "echo still here"), "still here");
    }

    #[test]
    fn queued_command_replies_on_channel() {
        let mut server = server_with_echo();
        let (tx, mut rx) = oneshot::channel();
        server.push_request(Box::new(ConsoleCommand::new("echo ping", tx)));
        server.tick(1);
        assert_eq!(rx.try_recv().unwrap(), "ping");
    }
}
