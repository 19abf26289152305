// Collectors module - the uniform contract every storage-family adapter satisfies
//
// An adapter implements `Authenticator` (login/logout) and `StorageArray`
// (identity + one fetch per command). The shared protocol in `run_collection`
// turns that into a `Collector`:
//
// 1. authenticate
// 2. fetch identity
// 3. fetch and normalize each requested command, isolating failures per command
// 4. de-authenticate whenever step 1 produced a live session
//
// An optional deadline bounds steps 2 and 3. Steps still pending when it
// passes are recorded as failures and the session is closed as usual.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::future::Future;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{CollectorError, Result};
use crate::model::{CollectionResult, Command, CommandSet, Identity, ServerTarget, Telemetry};
use crate::normalize::as_f64;
use crate::session::{with_session, Authenticator, SessionToken};

pub mod datadomain;
pub mod isilon;
pub mod unity;
pub mod vnx;
pub mod xtremio;

/// Identity plus the raw payload it came from
///
/// Some families answer several commands from the identity payload
/// (XtremIO capacity, DataDomain capacity and uptime), so it is kept around.
#[derive(Debug, Clone, Default)]
pub struct SystemInfo {
    pub identity: Identity,
    pub details: Value,
}

/// Vendor-specific reads behind the collection protocol
#[async_trait]
pub trait StorageArray: Authenticator {
    /// The server this adapter polls
    fn server(&self) -> &ServerTarget;

    /// Fetches name and model. Called once, before any command.
    async fn system_info(&self, token: &SessionToken) -> Result<SystemInfo>;

    /// Fetches and normalizes one command.
    ///
    /// # Returns
    /// * `Ok(Some(_))` - normalized data for the command's key
    /// * `Ok(None)` - this family has no such data; the key stays absent
    /// * `Err(_)` - the command failed; recorded, other commands continue
    async fn fetch(
        &self,
        command: Command,
        system: &SystemInfo,
        token: &SessionToken,
    ) -> Result<Option<Telemetry>>;
}

/// Uniform telemetry-fetch contract used by the orchestrator
#[async_trait]
pub trait Collector: Send + Sync {
    fn target(&self) -> &ServerTarget;

    /// Collects identity plus the requested commands. Never fails: problems
    /// are logged and recorded in `CollectionResult::failures`.
    ///
    /// Work still pending at `deadline` is abandoned and recorded as failed;
    /// an open session is still closed afterwards.
    async fn collect_until(&self, commands: &CommandSet, deadline: Option<Instant>) -> CollectionResult;

    /// Collects without a time limit
    async fn collect(&self, commands: &CommandSet) -> CollectionResult {
        self.collect_until(commands, None).await
    }
}

#[async_trait]
impl<T: StorageArray> Collector for T {
    fn target(&self) -> &ServerTarget {
        self.server()
    }

    async fn collect_until(&self, commands: &CommandSet, deadline: Option<Instant>) -> CollectionResult {
        run_collection(self, commands, deadline).await
    }
}

/// Runs the authenticate / identity / commands / logout protocol
pub async fn run_collection<A>(array: &A, commands: &CommandSet, deadline: Option<Instant>) -> CollectionResult
where
    A: StorageArray + ?Sized,
{
    let server = array.server();
    info!(
        "[{}] Collecting {} command(s) from {} at {}",
        server.id,
        commands.len(),
        server.storage,
        server.address
    );

    let outcome = with_session(array, &server.id, |token| async move {
        collect_in_session(array, commands, &token, deadline).await
    })
    .await;

    match outcome {
        Ok(result) => {
            info!(
                "[{}] Collection finished with {} failure(s)",
                server.id,
                result.failures.len()
            );
            result
        }
        Err(e) => {
            error!("[{}] Authentication failed: {}", server.id, e);
            let mut result = CollectionResult::new(server.clone());
            result.record_failure("authenticate", &e);
            result
        }
    }
}

async fn collect_in_session<A>(
    array: &A,
    commands: &CommandSet,
    token: &SessionToken,
    deadline: Option<Instant>,
) -> CollectionResult
where
    A: StorageArray + ?Sized,
{
    let server = array.server();
    let mut result = CollectionResult::new(server.clone());

    let system = match within(deadline, array.system_info(token)).await {
        Ok(system) => system,
        Err(e) => {
            error!("[{}] Failed to fetch system identity: {}", server.id, e);
            result.record_failure("identity", &e);
            return result;
        }
    };
    debug!(
        "[{}] Identity: {} ({})",
        server.id, system.identity.name, system.identity.model
    );
    result.info = system.identity.clone();

    for command in commands.iter() {
        match within(deadline, array.fetch(command, &system, token)).await {
            Ok(Some(telemetry)) => result.insert(telemetry),
            Ok(None) => debug!(
                "[{}] '{}' is not available on {} arrays",
                server.id, command, server.storage
            ),
            Err(e) => {
                warn!("[{}] Command '{}' failed: {}", server.id, command, e);
                result.record_failure(command.as_str(), &e);
            }
        }
    }

    result
}

/// Runs one protocol step, giving up once `deadline` has passed
async fn within<T, F>(deadline: Option<Instant>, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => step.await,
        Some(deadline) if Instant::now() >= deadline => Err(CollectorError::DeadlineExceeded),
        Some(deadline) => timeout_at(deadline, step)
            .await
            .unwrap_or_else(|_| Err(CollectorError::DeadlineExceeded)),
    }
}

/// Issues one detail request per listed entry concurrently and joins the
/// results in listing order.
///
/// Any failed entry fails the whole expansion with `PartialData`, so a
/// command never reports an inconsistent subset.
pub(crate) async fn expand_all<I, F, Fut, T>(server_id: &str, entries: I, fetch: F) -> Result<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let outcomes = join_all(entries.into_iter().map(fetch)).await;
    let total = outcomes.len();

    let mut items = Vec::with_capacity(total);
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!("[{}] Detail request failed: {}", server_id, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(CollectorError::PartialData { failed, total });
    }
    Ok(items)
}

/// Array-valued field of a payload
pub(crate) fn array_field<'a>(payload: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| CollectorError::missing(key))
}

/// Numeric field of a payload; absent or non-numeric is a parse error
pub(crate) fn number_field(payload: &Value, key: &str) -> Result<f64> {
    payload
        .get(key)
        .and_then(as_f64)
        .ok_or_else(|| CollectorError::missing(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Capacity, CapacityReport, Datastore};
    use crate::testing;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Array whose behavior is switched by flags
    struct FakeArray {
        server: ServerTarget,
        fail_login: bool,
        fail_identity: bool,
        failing_command: Option<Command>,
        stalled_command: Option<Command>,
        logouts: AtomicUsize,
    }

    impl FakeArray {
        fn new() -> Self {
            FakeArray {
                server: testing::target("FAKE_01", "Fake"),
                fail_login: false,
                fail_identity: false,
                failing_command: None,
                stalled_command: None,
                logouts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Authenticator for FakeArray {
        async fn login(&self) -> Result<SessionToken> {
            if self.fail_login {
                return Err(CollectorError::Http {
                    path: "/login".into(),
                    status: 401,
                    body: String::new(),
                });
            }
            Ok(SessionToken::Cookie { csrf: None })
        }

        async fn logout(&self, _token: &SessionToken) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl StorageArray for FakeArray {
        fn server(&self) -> &ServerTarget {
            &self.server
        }

        async fn system_info(&self, _token: &SessionToken) -> Result<SystemInfo> {
            if self.fail_identity {
                return Err(CollectorError::missing("name"));
            }
            Ok(SystemInfo {
                identity: Identity {
                    name: "fake".into(),
                    model: "F1".into(),
                },
                details: Value::Null,
            })
        }

        async fn fetch(
            &self,
            command: Command,
            _system: &SystemInfo,
            _token: &SessionToken,
        ) -> Result<Option<Telemetry>> {
            if self.failing_command == Some(command) {
                return Err(CollectorError::Transport("timeout".into()));
            }
            if self.stalled_command == Some(command) {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
            Ok(match command {
                Command::Capacity => Some(Telemetry::Capacity(CapacityReport::Single(
                    Capacity::default(),
                ))),
                Command::Datastores => Some(Telemetry::Datastores(vec![Datastore {
                    name: "lun0".into(),
                    world_wide_name: "wwn0".into(),
                    size_kb: 1.0,
                    health_state: None,
                }])),
                Command::Alerts => Some(Telemetry::Alerts(Vec::new())),
                Command::Disks | Command::Uptime => None,
            })
        }
    }

    #[tokio::test]
    async fn test_only_requested_keys_are_populated() {
        let array = FakeArray::new();
        let commands = CommandSet::from_names(["capacity", "datastores"]);
        let result = array.collect(&commands).await;

        let value = serde_json::to_value(&result).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["capacity", "datastores", "info", "server"]);
        assert_eq!(array.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_login_yields_empty_identity() {
        let mut array = FakeArray::new();
        array.fail_login = true;
        let result = array.collect(&CommandSet::from_names(["capacity"])).await;

        assert_eq!(result.info, Identity::default());
        assert!(result.capacity.is_none());
        assert_eq!(result.failures[0].stage, "authenticate");
        assert_eq!(array.logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_identity_aborts_commands_but_logs_out() {
        let mut array = FakeArray::new();
        array.fail_identity = true;
        let result = array
            .collect(&CommandSet::from_names(["capacity", "datastores"]))
            .await;

        assert!(result.capacity.is_none());
        assert!(result.datastores.is_none());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, "identity");
        assert_eq!(array.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_command_failure_is_isolated() {
        let mut array = FakeArray::new();
        array.failing_command = Some(Command::Capacity);
        let result = array
            .collect(&CommandSet::from_names(["capacity", "datastores", "alerts"]))
            .await;

        assert_eq!(result.info.name, "fake");
        assert!(result.capacity.is_none());
        assert_eq!(result.datastores.as_ref().map(Vec::len), Some(1));
        assert_eq!(result.alerts, Some(Vec::new()));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, "capacity");
        assert_eq!(array.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_fails_pending_commands_and_still_logs_out() {
        let mut array = FakeArray::new();
        array.stalled_command = Some(Command::Datastores);
        let deadline = Instant::now() + std::time::Duration::from_millis(100);
        let result = array
            .collect_until(&CommandSet::from_names(["capacity", "datastores", "alerts"]), Some(deadline))
            .await;

        assert_eq!(result.info.name, "fake");
        assert!(result.capacity.is_some());
        assert!(result.datastores.is_none());
        assert!(result.alerts.is_none());
        let stages: Vec<&str> = result.failures.iter().map(|f| f.stage.as_str()).collect();
        assert_eq!(stages, vec!["datastores", "alerts"]);
        assert!(result.failures[0].message.contains("time limit"));
        assert_eq!(array.logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_number_field_requires_a_number() {
        let payload = serde_json::json!({"size": 10, "text": "12.5", "name": "pool"});
        assert_eq!(number_field(&payload, "size").unwrap(), 10.0);
        assert_eq!(number_field(&payload, "text").unwrap(), 12.5);
        assert!(matches!(number_field(&payload, "name"), Err(CollectorError::Parse(_))));
        assert!(matches!(number_field(&payload, "absent"), Err(CollectorError::Parse(_))));
    }

    #[tokio::test]
    async fn test_unsupported_command_leaves_key_absent() {
        let array = FakeArray::new();
        let result = array.collect(&CommandSet::from_names(["uptime"])).await;
        assert!(result.uptime.is_none());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_expand_all_keeps_order_and_fails_whole() {
        let ok = expand_all("S", vec![3u64, 1, 2], |n| async move {
            tokio::time::sleep(std::time::Duration::from_millis(n)).await;
            Ok::<_, CollectorError>(n * 10)
        })
        .await
        .unwrap();
        assert_eq!(ok, vec![30, 10, 20]);

        let err = expand_all("S", vec![1u64, 2, 3], |n| async move {
            if n == 2 {
                Err(CollectorError::Transport("boom".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CollectorError::PartialData { failed: 1, total: 3 }));
    }
}
