// VNX collector
//
// VNX block arrays are read through the local `naviseccli` tool in XML mode.
// Every invocation authenticates on its own, so there is no session to close.
//
// naviseccli flattens list output into one sequence of NAME/VALUE pairs. A
// record starts at a marker parameter (`Bus 0 Enclosure 0 Disk 4`,
// `LOGICAL UNIT NUMBER 12`) and runs until the next marker.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{StorageArray, SystemInfo};
use crate::config::CollectorSettings;
use crate::error::{CollectorError, Result};
use crate::model::{
    CapacityReport, Command, Credentials, Datastore, Disk, Identity, ServerTarget, Telemetry,
};
use crate::normalize::{as_f64, blocks_to_kb, capacity_from_raw, field_string, join_nonempty, mb_to_kb};
use crate::session::{Authenticator, SessionToken};
use crate::transport::{CommandRunner, ProcessRunner};

const GETDISK: &str = "getdisk -bind -capacity -actualcapacity -userlba -lun -private -product -rb -rev -serial -state -vendor -rg -cpn -drivetype -tla -usercapacity -speeds -powersavingsdiskcapable -powersavingsdiskeligible -powersavingsstate";
const LUN_LIST: &str = "lun -list -uid -capacities -status -aa -at -alOwner -tiers -tieringPolicy -initialTier -allowSnapAutoDelete -allocationPolicy -owner -default -state -drivetype -rtype -poolName -isPoolLUN -isThinLUN -isPrivate -isCompressed";
const POOL_CAPACITIES: &str = "storagepool -list -capacities";

const DISK_MARKER: &str = r"^Bus .*";
const LUN_MARKER: &str = r"^LOGICAL UNIT NUMBER .*";

/// One NAME/VALUE pair of a naviseccli response
pub type Param = (String, String);

/// Parameters of one record, in output order
pub type Record = Map<String, Value>;

/// Collector for VNX arrays
pub struct VnxCollector {
    server: ServerTarget,
    credentials: Credentials,
    runner: Arc<dyn CommandRunner>,
    program: String,
    disk_marker: Regex,
    lun_marker: Regex,

    // getdisk output feeds both `disks` and `capacity`
    disk_records: OnceCell<Vec<Record>>,
}

impl VnxCollector {
    pub fn new(server: ServerTarget, credentials: Credentials, settings: &CollectorSettings) -> Result<Self> {
        let runner = ProcessRunner::new(settings.cli_timeout());
        Self::with_runner(server, credentials, Arc::new(runner), &settings.naviseccli_path)
    }

    pub fn with_runner(
        server: ServerTarget,
        credentials: Credentials,
        runner: Arc<dyn CommandRunner>,
        program: &str,
    ) -> Result<Self> {
        let marker = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| CollectorError::Configuration(format!("bad record marker {}: {}", pattern, e)))
        };

        Ok(VnxCollector {
            server,
            credentials,
            runner,
            program: program.to_string(),
            disk_marker: marker(DISK_MARKER)?,
            lun_marker: marker(LUN_MARKER)?,
            disk_records: OnceCell::new(),
        })
    }

    /// Runs one naviseccli verb against the array and returns its parameter list
    async fn naviseccli(&self, verb: &str) -> Result<Vec<Param>> {
        let mut args: Vec<String> = vec![
            "-User".into(),
            self.credentials.username.clone(),
            "-Password".into(),
            self.credentials.password.clone(),
            "-Scope".into(),
            "0".into(),
            "-Xml".into(),
            "-h".into(),
            self.server.address.clone(),
        ];
        args.extend(verb.split_whitespace().map(str::to_string));

        let verb_name = verb.split_whitespace().next().unwrap_or_default();
        debug!("[{}] naviseccli {}", self.server.id, verb_name);

        let stdout = self.runner.run(&self.program, &args).await?;
        let params = parse_params(&stdout)?;

        debug!(
            "[{}] naviseccli {} returned {} parameter(s)",
            self.server.id,
            verb_name,
            params.len()
        );
        Ok(params)
    }

    async fn disk_records(&self) -> Result<&Vec<Record>> {
        self.disk_records
            .get_or_try_init(|| async {
                let params = self.naviseccli(GETDISK).await?;
                Ok(split_records(
                    &self.server.id,
                    params,
                    &self.disk_marker,
                    RecordMarker::KeyedAs("Disk"),
                ))
            })
            .await
    }

    async fn disks(&self) -> Result<Vec<Disk>> {
        Ok(self.disk_records().await?.iter().map(to_disk).collect())
    }

    async fn luns(&self) -> Result<Vec<Datastore>> {
        let params = self.naviseccli(LUN_LIST).await?;
        let records = split_records(&self.server.id, params, &self.lun_marker, RecordMarker::Included);
        Ok(records.iter().map(to_datastore).collect())
    }

    /// Raw media size from populated slots, unbound media as unconfigured,
    /// pool free space as free
    async fn capacity(&self) -> Result<CapacityReport> {
        let disks = self.disk_records().await?;

        let mut total_mb = 0.0;
        let mut unbound_mb = 0.0;
        for disk in disks {
            let state = record_str(disk, "State");
            if state == "Empty" {
                continue;
            }
            let size = record_f64(disk, "Actual Capacity");
            total_mb += size;
            if state == "Unbound" {
                unbound_mb += size;
            }
        }

        let free_blocks: f64 = self
            .naviseccli(POOL_CAPACITIES)
            .await?
            .iter()
            .filter(|(name, _)| name == "Available Capacity (Blocks)")
            .filter_map(|(_, value)| value.trim().parse::<f64>().ok())
            .sum();

        Ok(CapacityReport::Single(capacity_from_raw(
            mb_to_kb(total_mb),
            mb_to_kb(unbound_mb),
            blocks_to_kb(free_blocks),
        )))
    }
}

/// How a record's marker parameter is stored in the record
#[derive(Debug, Clone, Copy)]
pub enum RecordMarker {
    /// The marker's NAME becomes the value of the given key
    KeyedAs(&'static str),

    /// The marker is stored like any other parameter
    Included,
}

/// Extracts the NAME/VALUE pairs of a naviseccli XML response
///
/// The list lives under `CIM/MESSAGE/SIMPLERSP/METHODRESPONSE/PARAMVALUE`.
/// When that level holds a single PARAMVALUE, the real list is nested in
/// its VALUE element.
pub fn parse_params(xml: &str) -> Result<Vec<Param>> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|e| CollectorError::Parse(format!("naviseccli XML: {}", e)))?;

    let mut node = document.root_element();
    if !node.has_tag_name("CIM") {
        return Err(CollectorError::missing("CIM"));
    }
    for tag in ["MESSAGE", "SIMPLERSP", "METHODRESPONSE"] {
        node = child(node, tag).ok_or_else(|| CollectorError::missing(tag))?;
    }

    let mut values: Vec<roxmltree::Node> = children(node, "PARAMVALUE").collect();
    if values.len() == 1 {
        if let Some(nested) = child(values[0], "VALUE") {
            values = children(nested, "PARAMVALUE").collect();
        }
    }

    Ok(values
        .into_iter()
        .filter_map(|param| {
            let name = param.attribute("NAME")?;
            let value = child(param, "VALUE")
                .and_then(|v| v.text())
                .unwrap_or_default();
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect())
}

fn child<'a, 'input>(node: roxmltree::Node<'a, 'input>, tag: &str) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.has_tag_name(tag))
}

fn children<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> + 'a {
    node.children().filter(move |n| n.is_element() && n.has_tag_name(tag))
}

/// Groups a flat parameter list into records, one per marker
///
/// Parameters ahead of the first marker belong to no record and are dropped.
pub fn split_records(server_id: &str, params: Vec<Param>, marker: &Regex, style: RecordMarker) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut orphans = 0;

    for (name, value) in params {
        if marker.is_match(&name) {
            if let Some(record) = current.take() {
                records.push(record);
            }
            let mut record = Record::new();
            match style {
                RecordMarker::KeyedAs(key) => {
                    record.insert(key.to_string(), Value::String(name));
                }
                RecordMarker::Included => {
                    record.insert(name, Value::String(value));
                }
            }
            current = Some(record);
            continue;
        }

        match current.as_mut() {
            Some(record) => {
                record.insert(name, Value::String(value));
            }
            None => orphans += 1,
        }
    }
    if let Some(record) = current {
        records.push(record);
    }

    if orphans > 0 {
        debug!(
            "[{}] Dropped {} parameter(s) before the first record marker",
            server_id, orphans
        );
    }
    records
}

fn record_str<'a>(record: &'a Record, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn record_f64(record: &Record, key: &str) -> f64 {
    record.get(key).and_then(as_f64).unwrap_or(0.0)
}

fn to_disk(record: &Record) -> Disk {
    let mut attributes = record.clone();
    attributes.remove("Disk");

    Disk::new(
        record_str(record, "Disk").to_string(),
        record.get("Actual Capacity").and_then(as_f64).map(mb_to_kb),
        record.get("State").and_then(Value::as_str).map(str::to_string),
        attributes,
    )
}

fn to_datastore(record: &Record) -> Datastore {
    let blocks = record
        .get("LUN Allocation (Blocks)")
        .and_then(as_f64)
        .or_else(|| record.get("LUN Capacity(Blocks)").and_then(as_f64))
        .unwrap_or(0.0);

    Datastore {
        name: record_str(record, "Name").to_string(),
        world_wide_name: record_str(record, "UID").to_string(),
        size_kb: blocks_to_kb(blocks),
        health_state: record.get("Status").and_then(Value::as_str).map(str::to_string),
    }
}

#[async_trait]
impl Authenticator for VnxCollector {
    // naviseccli takes the credentials on every invocation
    async fn login(&self) -> Result<SessionToken> {
        Ok(SessionToken::Stateless)
    }

    async fn logout(&self, _token: &SessionToken) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageArray for VnxCollector {
    fn server(&self) -> &ServerTarget {
        &self.server
    }

    async fn system_info(&self, _token: &SessionToken) -> Result<SystemInfo> {
        let params = self.naviseccli("getagent").await?;
        let agent: Map<String, Value> = params
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        let details = Value::Object(agent);

        let identity = Identity {
            name: join_nonempty(&[&field_string(&details, "Name"), &field_string(&details, "Node")]),
            model: field_string(&details, "Model"),
        };
        Ok(SystemInfo { identity, details })
    }

    async fn fetch(
        &self,
        command: Command,
        _system: &SystemInfo,
        _token: &SessionToken,
    ) -> Result<Option<Telemetry>> {
        Ok(match command {
            Command::Capacity => Some(Telemetry::Capacity(self.capacity().await?)),
            Command::Datastores => Some(Telemetry::Datastores(self.luns().await?)),
            Command::Disks => Some(Telemetry::Disks(self.disks().await?)),
            Command::Alerts | Command::Uptime => None,
        })
    }
}
