// Orchestrator module - runs one collection per server concurrently
//
// This module implements the fan-out over servers using Tokio tasks.
// Each server is collected in its own task with its own time budget.
//
// # Architecture
// - Collectors are resolved through the registry before any task starts
// - Each collection runs in its own spawned task
// - Handles are awaited in input order, so output order matches input order
// - The budget is handed to the collector as a deadline, so an expired
//   server still logs out; a task that outlives budget + logout grace is
//   abandoned
// - A panic, timeout or unresolvable target only degrades that server's result

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use crate::error::CollectorError;
use crate::model::{CollectionResult, CommandSet, ServerTarget};
use crate::registry::CollectorRegistry;

/// Pending outcome for one target
enum Slot {
    Running(ServerTarget, JoinHandle<Option<CollectionResult>>),
    Failed(CollectionResult),
}

/// Runs collections against many servers at once
///
/// Stateless between calls; credentials and settings live in the registry.
pub struct Orchestrator {
    registry: Arc<CollectorRegistry>,

    /// Budget for one server's identity and command fetches
    server_timeout: Duration,

    /// Extra time past the budget for a late login to return and the logout to run
    logout_grace: Duration,
}

impl Orchestrator {
    pub fn new(registry: Arc<CollectorRegistry>, server_timeout: Duration) -> Self {
        // Login and logout are single requests, each bounded by the request timeout
        let logout_grace = registry.settings().request_timeout() * 2;
        Orchestrator {
            registry,
            server_timeout,
            logout_grace,
        }
    }

    pub fn with_logout_grace(mut self, logout_grace: Duration) -> Self {
        self.logout_grace = logout_grace;
        self
    }

    /// Collects `commands` from every target
    ///
    /// # Returns
    /// One result per target, in the order of `targets`. Never fails: every
    /// problem is logged and recorded in the affected server's `failures`.
    pub async fn collect_all(&self, targets: &[ServerTarget], commands: &CommandSet) -> Vec<CollectionResult> {
        info!(
            "Starting collection of {} command(s) from {} server(s)",
            commands.len(),
            targets.len()
        );

        let slots: Vec<Slot> = targets
            .iter()
            .map(|target| self.spawn_collection(target, commands))
            .collect();

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Failed(result) => result,
                Slot::Running(target, handle) => match handle.await {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        let limit = self.server_timeout + self.logout_grace;
                        warn!(
                            "[{}] Collection exceeded {:?}, keeping an empty result",
                            target.id, limit
                        );
                        degraded(
                            target,
                            "task",
                            CollectorError::Transport(format!("collection timed out after {:?}", limit)),
                        )
                    }
                    Err(e) => {
                        error!("[{}] Collection task panicked: {}", target.id, e);
                        degraded(
                            target,
                            "task",
                            CollectorError::Transport(format!("collection task failed: {}", e)),
                        )
                    }
                },
            };
            results.push(result);
        }

        let complete = results.iter().filter(|r| r.is_complete()).count();
        info!(
            "Collection complete: {}/{} server(s) without failures",
            complete,
            results.len()
        );

        results
    }

    fn spawn_collection(&self, target: &ServerTarget, commands: &CommandSet) -> Slot {
        let collector = match self.registry.resolve(target) {
            Ok(collector) => collector,
            Err(e) => {
                error!("[{}] Cannot build collector: {}", target.id, e);
                return Slot::Failed(degraded(target.clone(), "registry", e));
            }
        };

        let commands = commands.clone();
        let deadline = Instant::now() + self.server_timeout;
        let backstop = self.server_timeout + self.logout_grace;
        let handle = tokio::spawn(async move {
            timeout(backstop, collector.collect_until(&commands, Some(deadline)))
                .await
                .ok()
        });

        Slot::Running(target.clone(), handle)
    }
}

/// Result carrying only the server and the reason nothing else is there
fn degraded(target: ServerTarget, stage: &str, error: CollectorError) -> CollectionResult {
    let mut result = CollectionResult::new(target);
    result.record_failure(stage, &error);
    result
}
