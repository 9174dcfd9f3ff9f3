//! Cycle pacing and the per-cycle work loop.
//!
//! One cycle drains the request queue, runs every due agent, advances the
//! cycle counter and, when paced, sleeps out the rest of the cycle period.
//! Overruns are not caught up: the next cycle starts when the previous one
//! (including its sleep) ended.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::PoisonError;
use std::time::{Duration, Instant};

use crate::agent::is_due;
use crate::server::CogServer;

/// Fixed-period pacer for the server loop.
#[derive(Debug, Clone)]
pub struct CyclePacer {
    cycle_duration: Duration,
    cycle_start: Instant,
}

impl CyclePacer {
    /// Pacer with a period of `cycle_ms` milliseconds, starting now.
    pub fn new(cycle_ms: u64) -> Self {
        Self {
            cycle_duration: Duration::from_micros(cycle_ms.saturating_mul(1000)),
            cycle_start: Instant::now(),
        }
    }

    pub fn cycle_duration(&self) -> Duration {
        self.cycle_duration
    }

    /// Time left in the current cycle at `now`. Zero after an overrun.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.cycle_duration
            .saturating_sub(now.saturating_duration_since(self.cycle_start))
    }

    /// Sleep out the current cycle and start the next one.
    pub fn wait(&mut self) {
        let remaining = self.remaining(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.cycle_start = Instant::now();
    }
}

/// Next value of the cycle counter. Never negative.
pub fn next_cycle(cycle: i64) -> i64 {
    let next = cycle.wrapping_add(1);
    if next < 0 { 0 } else { next }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Execute every pending request in FIFO order. Returns how many ran.
///
/// Requests pushed while draining also run in this pass.
pub fn process_requests(server: &mut CogServer) -> usize {
    let mut executed = 0;
    while let Some(mut request) = server.pop_request() {
        let class_id = request.class_id().to_string();
        match catch_unwind(AssertUnwindSafe(|| request.execute(server))) {
            Ok(Ok(output)) => {
                tracing::trace!(request = %class_id, output_len = output.len(), "request executed");
            }
            Ok(Err(e)) => {
                tracing::warn!(request = %class_id, error = %e, "request failed");
            }
            Err(payload) => {
                tracing::error!(
                    request = %class_id,
                    panic = %panic_message(payload.as_ref()),
                    "request panicked"
                );
            }
        }
        executed += 1;
    }
    executed
}

/// Run every agent due on the current cycle, in start order. Returns how many ran.
pub fn process_agents(server: &mut CogServer) -> usize {
    let cycle = server.cycle_count();
    let mut ran = 0;
    for agent in server.running_agents() {
        // An earlier agent this cycle may have stopped this one.
        if !server.agents.contains(&agent) {
            continue;
        }
        let mut guard = agent.lock().unwrap_or_else(PoisonError::into_inner);
        if !is_due(cycle, guard.frequency()) {
            continue;
        }
        let class_id = agent.class_id();
        match catch_unwind(AssertUnwindSafe(|| guard.run(server))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(agent = %class_id, cycle, error = %e, "agent run failed");
            }
            Err(payload) => {
                tracing::error!(
                    agent = %class_id,
                    cycle,
                    panic = %panic_message(payload.as_ref()),
                    "agent panicked"
                );
            }
        }
        drop(guard);
        ran += 1;
        server.flush_deferred_teardown();
    }
    ran
}

/// One cycle without pacing: requests, then agents, then the counter.
pub fn run_cycle(server: &mut CogServer) {
    process_requests(server);
    process_agents(server);
    server.advance_cycle();
}
