//! Scripted command runner for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::command::HypervisorCommand;
use super::runner::{CommandOutput, CommandRunner};
use crate::error::Result;

/// Runner that answers from a script instead of spawning processes.
///
/// Responses are keyed by [`HypervisorCommand::key`] (`"virsh domifaddr"`,
/// `"qemu-img create"`, `"virt-install"`). Queued responses are consumed in
/// order; the last one keeps answering once the queue is down to one entry.
/// Unscripted commands succeed with empty output. Every invocation is
/// recorded.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<HypervisorCommand>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for commands with `key`.
    pub fn on(&self, key: &str, output: CommandOutput) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// All commands run so far.
    pub fn calls(&self) -> Vec<HypervisorCommand> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Keys of all commands run so far, in order.
    pub fn call_keys(&self) -> Vec<String> {
        self.calls().iter().map(HypervisorCommand::key).collect()
    }

    /// Number of times a command with `key` ran.
    pub fn count(&self, key: &str) -> usize {
        self.calls().iter().filter(|c| c.key() == key).count()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, cmd: &HypervisorCommand) -> Result<CommandOutput> {
        debug!(command = %cmd, "[MOCK] Executing");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.clone());

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let output = match responses.get_mut(&cmd.key()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::success(""),
        };
        Ok(output)
    }
}
