// Unity collector
//
// REST API on port 443. Login is a Basic-auth GET that sets a session cookie
// and returns an EMC-CSRF-TOKEN header; every later call carries both.
// Uptime comes from an asynchronous metrics query that has to be polled.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{array_field, number_field, StorageArray, SystemInfo};
use crate::config::CollectorSettings;
use crate::error::{CollectorError, Result};
use crate::model::{
    Alert, CapacityReport, Command, Credentials, Datastore, Disk, Identity, ServerTarget,
    Telemetry, UptimeSample,
};
use crate::normalize::{
    as_f64, bytes_to_kb, capacity_from_usage, field_f64, field_string, iso_to_epoch,
    severity_from_ordinal, unity_health_name,
};
use crate::session::{Authenticator, SessionToken};
use crate::transport::{ApiRequest, HttpTransport, ReqwestTransport};

const CLIENT_HEADER: (&str, &str) = ("X-EMC-REST-CLIENT", "true");
const CSRF_HEADER: &str = "EMC-CSRF-TOKEN";

const LOGIN_PATH: &str = "/api/types/system/instances";
const LOGOUT_PATH: &str = "/api/types/loginSessionInfo/action/logout";
const SYSTEM_INFO_PATH: &str = "/api/types/basicSystemInfo/instances";
const CAPACITY_PATH: &str = "/api/types/systemCapacity/instances?fields=sizeFree,sizeTotal,sizeUsed";
const TIER_PATH: &str = "/api/types/storageTier/instances?fields=sizeUnconfigured::@sum(sizeTotal)&per_page=2000";
const LUNS_PATH: &str = "/api/types/lun/instances?fields=name,health,sizeTotal,wwn&compact=true";
const DISKS_PATH: &str = "/api/types/disk/instances?fields=id,name,model,manufacturer,version,emcPartNumber,emcSerialNumber,wwn,tierType,diskTechnology,rpm,isSED,size,rawSize,vendorSize,health,isInUse,needsReplacement,parent,parentDae,parentDpe,pool,diskGroup,slotNumber,busId,currentSpeed,maxSpeed,estimatedEOL&compact=true";
const ALERTS_PATH: &str = "/api/types/alert/instances?fields=severity,message,timestamp,component,messageId,isAcknowledged&filter=isAcknowledged eq false&compact=true";
const METRIC_QUERY_PATH: &str = "/api/types/metricRealTimeQuery/instances";
const UPTIME_METRIC: &str = "sp.*.cpu.uptime";

/// Collector for Unity arrays
pub struct UnityCollector {
    server: ServerTarget,
    credentials: Credentials,
    transport: Arc<dyn HttpTransport>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl UnityCollector {
    pub fn new(server: ServerTarget, credentials: Credentials, settings: &CollectorSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(&server.address, None, settings.request_timeout())?;
        Ok(Self::with_transport(server, credentials, Arc::new(transport), settings))
    }

    pub fn with_transport(
        server: ServerTarget,
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
        settings: &CollectorSettings,
    ) -> Self {
        UnityCollector {
            server,
            credentials,
            transport,
            poll_attempts: settings.uptime_poll_attempts,
            poll_interval: settings.uptime_poll_interval(),
        }
    }

    async fn call(&self, request: ApiRequest, token: &SessionToken) -> Result<Value> {
        let request = token.apply(request.header(CLIENT_HEADER.0, CLIENT_HEADER.1));
        Ok(self.transport.execute(request).await?.body)
    }

    /// `content` objects of a collection response
    async fn contents(&self, path: &str, token: &SessionToken) -> Result<Vec<Value>> {
        let body = self.call(ApiRequest::get(path), token).await?;
        Ok(array_field(&body, "entries")?
            .iter()
            .filter_map(|entry| entry.get("content").cloned())
            .collect())
    }

    async fn capacity(&self, token: &SessionToken) -> Result<CapacityReport> {
        let pools = self.contents(CAPACITY_PATH, token).await?;
        if pools.is_empty() {
            return Err(CollectorError::Parse("empty systemCapacity list".into()));
        }

        let (mut used, mut free, mut configured) = (0.0, 0.0, 0.0);
        for content in &pools {
            used += number_field(content, "sizeUsed")?;
            free += number_field(content, "sizeFree")?;
            configured += number_field(content, "sizeTotal")?;
        }

        let mut unconfigured = 0.0;
        for content in self.contents(TIER_PATH, token).await? {
            unconfigured += number_field(&content, "sizeUnconfigured")?;
        }

        // sizeTotal already equals used + free; pool free space is what is available
        debug!(
            "[{}] Pool size {} B, used {} B, free {} B, unconfigured {} B",
            self.server.id, configured, used, free, unconfigured
        );
        let free = bytes_to_kb(free);
        Ok(CapacityReport::Single(capacity_from_usage(
            bytes_to_kb(used),
            free,
            free,
            bytes_to_kb(unconfigured),
        )))
    }

    async fn datastores(&self, token: &SessionToken) -> Result<Vec<Datastore>> {
        Ok(self
            .contents(LUNS_PATH, token)
            .await?
            .iter()
            .map(|lun| Datastore {
                name: field_string(lun, "name"),
                world_wide_name: field_string(lun, "wwn"),
                size_kb: bytes_to_kb(field_f64(lun, "sizeTotal")),
                health_state: health_of(lun),
            })
            .collect())
    }

    async fn disks(&self, token: &SessionToken) -> Result<Vec<Disk>> {
        Ok(self
            .contents(DISKS_PATH, token)
            .await?
            .iter()
            .map(|content| {
                Disk::new(
                    field_string(content, "id"),
                    content.get("rawSize").and_then(as_f64).map(bytes_to_kb),
                    health_of(content),
                    flatten_references(content),
                )
            })
            .collect())
    }

    async fn alerts(&self, token: &SessionToken) -> Result<Vec<Alert>> {
        Ok(self
            .contents(ALERTS_PATH, token)
            .await?
            .iter()
            .map(|content| {
                let mut details = flatten_references(content);
                let severity = details
                    .remove("severity")
                    .and_then(|v| v.as_u64())
                    .map(severity_from_ordinal)
                    .unwrap_or_else(|| severity_from_ordinal(6));
                let message = field_string(content, "message");
                details.remove("message");
                Alert {
                    severity,
                    message,
                    raised_at: content
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    details,
                }
            })
            .collect())
    }

    /// Creates a real-time metrics query and polls its result until at least
    /// one entry arrives or the attempt budget runs out. Running out is not
    /// an error: the command then reports no samples.
    async fn uptime(&self, token: &SessionToken) -> Result<Vec<UptimeSample>> {
        let body = json!({ "paths": [UPTIME_METRIC], "interval": 5 });
        let created = self
            .call(ApiRequest::post(METRIC_QUERY_PATH, body), token)
            .await?;
        let query_id = created
            .get("content")
            .map(|content| field_string(content, "id"))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CollectorError::missing("content.id"))?;

        let outcome = self.poll_query(&query_id, token).await;

        // Queries expire on their own; deleting them early is a courtesy
        let delete = ApiRequest::delete(&format!("/api/instances/metricRealTimeQuery/{}", query_id));
        if let Err(e) = self.call(delete, token).await {
            debug!("[{}] Could not delete metrics query {}: {}", self.server.id, query_id, e);
        }

        outcome
    }

    async fn poll_query(&self, query_id: &str, token: &SessionToken) -> Result<Vec<UptimeSample>> {
        let path = format!(
            "/api/types/metricQueryResult/instances?filter=queryId EQ {}",
            query_id
        );

        for attempt in 1..=self.poll_attempts {
            let body = self.call(ApiRequest::get(&path), token).await?;
            let entries = body
                .get("entries")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if !entries.is_empty() {
                debug!(
                    "[{}] Metrics query {} answered after {} attempt(s)",
                    self.server.id, query_id, attempt
                );
                return Ok(entries
                    .iter()
                    .filter_map(|entry| entry.get("content"))
                    .flat_map(samples_from_metric)
                    .collect());
            }

            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        warn!(
            "[{}] Metrics query {} returned nothing after {} attempts",
            self.server.id, query_id, self.poll_attempts
        );
        Ok(Vec::new())
    }
}

/// Unity health objects carry a numeric `value`
fn health_of(content: &Value) -> Option<String> {
    content
        .get("health")
        .and_then(|h| h.get("value"))
        .and_then(Value::as_u64)
        .map(|code| unity_health_name(code).to_string())
}

/// Replaces `{"value": ..}` and `{"id": ..}` reference objects by their scalar
fn flatten_references(content: &Value) -> Map<String, Value> {
    let mut map = content.as_object().cloned().unwrap_or_default();
    for value in map.values_mut() {
        let scalar = value
            .as_object()
            .and_then(|obj| obj.get("value").or_else(|| obj.get("id")))
            .cloned();
        if let Some(scalar) = scalar {
            *value = scalar;
        }
    }
    map
}

/// One sample per storage processor in a metric result
fn samples_from_metric(content: &Value) -> Vec<UptimeSample> {
    let observed_at = content
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(iso_to_epoch)
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    content
        .get("values")
        .and_then(Value::as_object)
        .map(|values| {
            values
                .iter()
                .filter_map(|(sp, value)| {
                    as_f64(value).map(|uptime| UptimeSample {
                        node: sp.to_string(),
                        observed_at_epoch_seconds: observed_at,
                        uptime_seconds: uptime as u64,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Authenticator for UnityCollector {
    async fn login(&self) -> Result<SessionToken> {
        let request = ApiRequest::get(LOGIN_PATH)
            .header(CLIENT_HEADER.0, CLIENT_HEADER.1)
            .basic_auth(&self.credentials);
        let response = self.transport.execute(request).await?;

        match response.header(CSRF_HEADER) {
            Some(csrf) if !csrf.is_empty() => Ok(SessionToken::Cookie {
                csrf: Some((CSRF_HEADER, csrf.to_string())),
            }),
            _ => Err(CollectorError::Authentication(
                "login response carried no EMC-CSRF-TOKEN".into(),
            )),
        }
    }

    async fn logout(&self, token: &SessionToken) -> Result<()> {
        let request = ApiRequest::post(LOGOUT_PATH, json!({ "localCleanupOnly": true }));
        self.call(request, token).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageArray for UnityCollector {
    fn server(&self) -> &ServerTarget {
        &self.server
    }

    async fn system_info(&self, token: &SessionToken) -> Result<SystemInfo> {
        let contents = self.contents(SYSTEM_INFO_PATH, token).await?;
        let info = contents
            .into_iter()
            .next()
            .ok_or_else(|| CollectorError::missing("entries[0].content"))?;

        let identity = Identity {
            name: field_string(&info, "name"),
            model: format!(
                "{} v{}",
                field_string(&info, "model"),
                field_string(&info, "softwareVersion")
            ),
        };
        Ok(SystemInfo {
            identity,
            details: info,
        })
    }

    async fn fetch(
        &self,
        command: Command,
        _system: &SystemInfo,
        token: &SessionToken,
    ) -> Result<Option<Telemetry>> {
        Ok(Some(match command {
            Command::Capacity => Telemetry::Capacity(self.capacity(token).await?),
            Command::Datastores => Telemetry::Datastores(self.datastores(token).await?),
            Command::Disks => Telemetry::Disks(self.disks(token).await?),
            Command::Alerts => Telemetry::Alerts(self.alerts(token).await?),
            Command::Uptime => Telemetry::Uptime(self.uptime(token).await?),
        }))
    }
}
