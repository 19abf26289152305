// Isilon (OneFS) collector
//
// Platform API on port 8080 with a cookie session created by
// POST /session/1/session and released by DELETE on the same path.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::{array_field, number_field, StorageArray, SystemInfo};
use crate::config::CollectorSettings;
use crate::error::{CollectorError, Result};
use crate::model::{
    Alert, CapacityReport, Command, Credentials, Datastore, Disk, Identity, ServerTarget,
    Telemetry, UptimeSample,
};
use crate::normalize::{
    as_f64, bytes_to_kb, capacity_from_total, epoch_to_iso, field_f64, field_string,
    join_nonempty, severity_from_name,
};
use crate::session::{Authenticator, SessionToken};
use crate::transport::{ApiRequest, HttpTransport, ReqwestTransport};

pub const PORT: u16 = 8080;

const SESSION_PATH: &str = "/session/1/session";
const CLUSTER_CONFIG_PATH: &str = "/platform/1/cluster/config";
const CAPACITY_PATH: &str = "/platform/1/statistics/current?key=ifs.bytes.total&key=ifs.bytes.used&key=ifs.bytes.free&key=ifs.bytes.avail&devid=all";
const QUOTAS_PATH: &str = "/platform/1/quota/quotas?keys=all";
const DRIVES_PATH: &str = "/platform/3/cluster/nodes/ALL/drives/ALL";
const EVENTS_PATH: &str = "/platform/3/event/eventgroup-occurrences?resolved=false&ignore=false";
const UPTIME_PATH: &str = "/platform/1/statistics/current?key=node.uptime&devid=all";

// Event-group bookkeeping that means nothing for unresolved, non-ignored events
const DROPPED_EVENT_FIELDS: [&str; 5] = ["ignore", "ignore_time", "resolve_time", "resolved", "resolver"];

/// Collector for Isilon / PowerScale clusters
pub struct IsilonCollector {
    server: ServerTarget,
    credentials: Credentials,
    transport: Arc<dyn HttpTransport>,
}

impl IsilonCollector {
    pub fn new(server: ServerTarget, credentials: Credentials, settings: &CollectorSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(&server.address, Some(PORT), settings.request_timeout())?;
        Ok(Self::with_transport(server, credentials, Arc::new(transport)))
    }

    pub fn with_transport(
        server: ServerTarget,
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        IsilonCollector {
            server,
            credentials,
            transport,
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        Ok(self.transport.execute(ApiRequest::get(path)).await?.body)
    }

    /// Statistics keys mapped to their (summed) values
    async fn statistics(&self, path: &str) -> Result<HashMap<String, f64>> {
        let body = self.get(path).await?;
        let mut stats = HashMap::new();
        for stat in array_field(&body, "stats")? {
            *stats.entry(field_string(stat, "key")).or_insert(0.0) += field_f64(stat, "value");
        }
        Ok(stats)
    }

    async fn capacity(&self) -> Result<CapacityReport> {
        let stats = self.statistics(CAPACITY_PATH).await?;
        let stat = |key: &str| {
            stats
                .get(key)
                .copied()
                .ok_or_else(|| CollectorError::missing(key))
        };

        let total = bytes_to_kb(stat("ifs.bytes.total")?);
        let used = bytes_to_kb(stat("ifs.bytes.used")?);
        let available = bytes_to_kb(stat("ifs.bytes.avail")?);

        Ok(CapacityReport::Single(capacity_from_total(total, used, available)))
    }

    async fn datastores(&self) -> Result<Vec<Datastore>> {
        let body = self.get(QUOTAS_PATH).await?;
        Ok(array_field(&body, "quotas")?
            .iter()
            .map(quota_to_datastore)
            .collect())
    }

    async fn disks(&self) -> Result<Vec<Disk>> {
        let body = self.get(DRIVES_PATH).await?;
        let mut disks = Vec::new();
        for node in array_field(&body, "nodes")? {
            let lnn = field_string(node, "lnn");
            if let Some(drives) = node.get("drives").and_then(Value::as_array) {
                disks.extend(drives.iter().map(|drive| drive_to_disk(&lnn, drive)));
            }
        }
        Ok(disks)
    }

    async fn alerts(&self) -> Result<Vec<Alert>> {
        let body = self.get(EVENTS_PATH).await?;
        Ok(array_field(&body, "eventgroups")?
            .iter()
            .map(event_to_alert)
            .collect())
    }

    async fn uptime(&self) -> Result<Vec<UptimeSample>> {
        let body = self.get(UPTIME_PATH).await?;
        array_field(&body, "stats")?
            .iter()
            .map(|stat| -> Result<UptimeSample> {
                Ok(UptimeSample {
                    node: format!("Node {}", field_string(stat, "devid")),
                    observed_at_epoch_seconds: number_field(stat, "time")? as i64,
                    uptime_seconds: number_field(stat, "value")? as u64,
                })
            })
            .collect()
    }
}

fn quota_to_datastore(quota: &Value) -> Datastore {
    let path = field_string(quota, "path");
    let hard_limit = quota
        .get("thresholds")
        .map(|t| field_f64(t, "hard"))
        .unwrap_or(0.0);

    Datastore {
        name: path.trim_start_matches("/ifs/").to_string(),
        world_wide_name: path,
        size_kb: bytes_to_kb(hard_limit),
        health_state: None,
    }
}

fn drive_to_disk(lnn: &str, drive: &Value) -> Disk {
    let capacity_kb = match (
        drive.get("blocks").and_then(as_f64),
        drive.get("logical_block_length").and_then(as_f64),
    ) {
        (Some(blocks), Some(block_length)) => Some(bytes_to_kb(blocks * block_length)),
        _ => None,
    };

    let mut attributes = drive.as_object().cloned().unwrap_or_default();
    attributes.insert("lnn".to_string(), json!(lnn));

    Disk::new(
        format!("{}:{}", lnn, field_string(drive, "baynum")),
        capacity_kb,
        drive.get("ui_state").and_then(Value::as_str).map(str::to_string),
        attributes,
    )
}

fn event_to_alert(event: &Value) -> Alert {
    let mut details: Map<String, Value> = event.as_object().cloned().unwrap_or_default();
    for field in DROPPED_EVENT_FIELDS {
        details.remove(field);
    }
    let severity = details
        .remove("severity")
        .and_then(|v| v.as_str().map(severity_from_name))
        .unwrap_or_else(|| severity_from_name(""));
    let message = details
        .remove("message")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    for field in ["last_event", "time_noticed"] {
        if let Some(iso) = details
            .get(field)
            .and_then(as_f64)
            .and_then(|secs| epoch_to_iso(secs as i64))
        {
            details.insert(field.to_string(), Value::String(iso));
        }
    }
    for field in ["specifier", "causes", "channels"] {
        if let Some(value) = details.get_mut(field) {
            if !value.is_string() {
                *value = Value::String(value.to_string());
            }
        }
    }

    Alert {
        severity,
        message,
        raised_at: details
            .get("time_noticed")
            .and_then(Value::as_str)
            .map(str::to_string),
        details,
    }
}

#[async_trait]
impl Authenticator for IsilonCollector {
    async fn login(&self) -> Result<SessionToken> {
        let body = json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
            "services": ["platform", "namespace"],
        });
        self.transport
            .execute(ApiRequest::post(SESSION_PATH, body))
            .await?;
        Ok(SessionToken::Cookie { csrf: None })
    }

    async fn logout(&self, token: &SessionToken) -> Result<()> {
        self.transport
            .execute(token.apply(ApiRequest::delete(SESSION_PATH)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageArray for IsilonCollector {
    fn server(&self) -> &ServerTarget {
        &self.server
    }

    async fn system_info(&self, _token: &SessionToken) -> Result<SystemInfo> {
        let config = self.get(CLUSTER_CONFIG_PATH).await?;
        let version = config
            .get("onefs_version")
            .ok_or_else(|| CollectorError::missing("onefs_version"))?;

        let identity = Identity {
            name: field_string(&config, "name"),
            model: join_nonempty(&[
                &field_string(version, "type"),
                &field_string(version, "release"),
                &field_string(version, "build"),
            ]),
        };
        Ok(SystemInfo {
            identity,
            details: config,
        })
    }

    async fn fetch(
        &self,
        command: Command,
        _system: &SystemInfo,
        _token: &SessionToken,
    ) -> Result<Option<Telemetry>> {
        Ok(Some(match command {
            Command::Capacity => Telemetry::Capacity(self.capacity().await?),
            Command::Datastores => Telemetry::Datastores(self.datastores().await?),
            Command::Disks => Telemetry::Disks(self.disks().await?),
            Command::Alerts => Telemetry::Alerts(self.alerts().await?),
            Command::Uptime => Telemetry::Uptime(self.uptime().await?),
        }))
    }
}
