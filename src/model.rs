// Model module - the canonical, vendor-agnostic telemetry schema
//
// Every adapter produces values already shaped like the types below.
// Capacities are always kilobytes, timestamps ISO-8601 or epoch seconds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{CollectorError, ErrorKind};

/// One storage array to poll, as declared in the inventory
///
/// # Example YAML
/// ```yaml
/// id: XIO_01
/// address: 10.0.0.11
/// storage: XIO
/// location: Ljubljana
/// params:
///   cluster: "1"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTarget {
    /// Unique identifier used in logs and output
    pub id: String,

    /// Host name or IP address of the management interface
    pub address: String,

    /// Storage-family tag selecting the adapter (e.g. "Isilon", "VNX")
    pub storage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Family-specific parameters, e.g. the XtremIO cluster index
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ServerTarget {
    pub fn new(id: &str, address: &str, storage: &str) -> Self {
        ServerTarget {
            id: id.to_string(),
            address: address.to_string(),
            storage: storage.to_string(),
            location: None,
            params: BTreeMap::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Username/secret pair for one storage family
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

// Secrets must never reach a log line.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// A telemetry category that can be requested for a collection run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Capacity,
    Datastores,
    Disks,
    Alerts,
    Uptime,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Capacity,
        Command::Datastores,
        Command::Disks,
        Command::Alerts,
        Command::Uptime,
    ];

    /// Parses a command name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Command> {
        match name.trim().to_ascii_lowercase().as_str() {
            "capacity" => Some(Command::Capacity),
            "datastores" => Some(Command::Datastores),
            "disks" => Some(Command::Disks),
            "alerts" => Some(Command::Alerts),
            "uptime" => Some(Command::Uptime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Capacity => "capacity",
            Command::Datastores => "datastores",
            Command::Disks => "disks",
            Command::Alerts => "alerts",
            Command::Uptime => "uptime",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, de-duplicated set of requested commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet(Vec<Command>);

impl CommandSet {
    /// Builds a set from raw names. Unrecognized names are accepted and dropped,
    /// so newer callers can ask for categories this build does not know yet.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = CommandSet::default();
        for name in names {
            match Command::parse(name.as_ref()) {
                Some(command) => set.insert(command),
                None => debug!("Ignoring unknown command '{}'", name.as_ref()),
            }
        }
        set
    }

    pub fn insert(&mut self, command: Command) {
        if !self.0.contains(&command) {
            self.0.push(command);
        }
    }

    pub fn contains(&self, command: Command) -> bool {
        self.0.contains(&command)
    }

    pub fn iter(&self) -> impl Iterator<Item = Command> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Command> for CommandSet {
    fn from_iter<T: IntoIterator<Item = Command>>(iter: T) -> Self {
        let mut set = CommandSet::default();
        for command in iter {
            set.insert(command);
        }
        set
    }
}

/// Name and model of the polled system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub model: String,
}

/// Capacity block, all values in kilobytes
///
/// Invariants: `configured = used + available`, `total = configured + unconfigured`.
/// Build it through the constructors in `normalize` so both always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub available: f64,
    pub configured: f64,
    pub unconfigured: f64,
}

/// Capacity of a system; two-tier arrays report logical and physical separately
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapacityReport {
    Single(Capacity),
    Tiered { volume: Capacity, physical: Capacity },
}

/// A logical volume: LUN, quota, mtree or volume depending on the vendor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datastore {
    pub name: String,

    #[serde(rename = "worldWideName")]
    pub world_wide_name: String,

    #[serde(rename = "sizeKB")]
    pub size_kb: f64,

    #[serde(rename = "healthState")]
    pub health_state: Option<String>,
}

/// A physical media unit. Vendor attributes pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disk {
    pub id: String,

    #[serde(rename = "capacityKB")]
    pub capacity_kb: Option<f64>,

    pub state: Option<String>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Disk {
    /// Output names of the fixed fields; vendor attributes never repeat them
    const FIXED_KEYS: [&'static str; 3] = ["id", "capacityKB", "state"];

    /// Builds a disk record. Vendor keys that collide with a fixed field are
    /// dropped so every key appears once in the serialized record.
    pub fn new(
        id: String,
        capacity_kb: Option<f64>,
        state: Option<String>,
        mut attributes: Map<String, Value>,
    ) -> Self {
        for key in Self::FIXED_KEYS {
            attributes.remove(key);
        }
        Disk {
            id,
            capacity_kb,
            state,
            attributes,
        }
    }
}

/// Common severity vocabulary, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    Ok,
}

/// An active alert with vendor extra fields passed through
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,

    #[serde(rename = "raisedAt", skip_serializing_if = "Option::is_none")]
    pub raised_at: Option<String>,

    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Uptime of one component with its own clock
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeSample {
    pub node: String,
    pub observed_at_epoch_seconds: i64,
    pub uptime_seconds: u64,
}

/// Normalized output of one command
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Capacity(CapacityReport),
    Datastores(Vec<Datastore>),
    Disks(Vec<Disk>),
    Alerts(Vec<Alert>),
    Uptime(Vec<UptimeSample>),
}

/// Why a part of a result is missing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionFailure {
    /// "authenticate", "identity", "registry", "task" or a command name
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-server snapshot. Only keys for requested, successful commands are present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionResult {
    pub server: ServerTarget,
    pub info: Identity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<CapacityReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datastores: Option<Vec<Datastore>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disks: Option<Vec<Disk>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts: Option<Vec<Alert>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<Vec<UptimeSample>>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CollectionFailure>,
}

impl CollectionResult {
    /// Empty result: server plus blank identity
    pub fn new(server: ServerTarget) -> Self {
        CollectionResult {
            server,
            info: Identity::default(),
            capacity: None,
            datastores: None,
            disks: None,
            alerts: None,
            uptime: None,
            failures: Vec::new(),
        }
    }

    /// Stores the output of one command under its key
    pub fn insert(&mut self, telemetry: Telemetry) {
        match telemetry {
            Telemetry::Capacity(capacity) => self.capacity = Some(capacity),
            Telemetry::Datastores(datastores) => self.datastores = Some(datastores),
            Telemetry::Disks(disks) => self.disks = Some(disks),
            Telemetry::Alerts(alerts) => self.alerts = Some(alerts),
            Telemetry::Uptime(uptime) => self.uptime = Some(uptime),
        }
    }

    pub fn record_failure(&mut self, stage: &str, error: &CollectorError) {
        self.failures.push(CollectionFailure {
            stage: stage.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
