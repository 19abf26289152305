// XtremIO collector
//
// JSON API v2 served by the XMS on port 443. Every call carries Basic auth,
// so there is no session to open or close. One XMS manages several clusters;
// the target's `cluster` parameter selects the one this collector owns.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::{array_field, number_field, StorageArray, SystemInfo};
use crate::config::CollectorSettings;
use crate::error::{CollectorError, Result};
use crate::model::{
    Alert, CapacityReport, Command, Credentials, Datastore, Disk, Identity, ServerTarget,
    Telemetry,
};
use crate::normalize::{as_f64, capacity_from_total, field_f64, field_string, severity_from_name};
use crate::session::{Authenticator, SessionToken};
use crate::transport::{ApiRequest, HttpTransport, ReqwestTransport};

/// Collector for XtremIO clusters
pub struct XtremIoCollector {
    server: ServerTarget,
    credentials: Credentials,
    transport: Arc<dyn HttpTransport>,
    cluster: String,
}

impl XtremIoCollector {
    pub fn new(server: ServerTarget, credentials: Credentials, settings: &CollectorSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(&server.address, None, settings.request_timeout())?;
        Self::with_transport(server, credentials, Arc::new(transport))
    }

    /// Fails with a configuration error when the target has no `cluster` parameter
    pub fn with_transport(
        server: ServerTarget,
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let cluster = server
            .param("cluster")
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                CollectorError::Configuration(format!(
                    "XtremIO server {} needs a 'cluster' parameter",
                    server.id
                ))
            })?;

        Ok(XtremIoCollector {
            server,
            credentials,
            transport,
            cluster,
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let request = ApiRequest::get(path).basic_auth(&self.credentials);
        Ok(self.transport.execute(request).await?.body)
    }

    async fn datastores(&self) -> Result<Vec<Datastore>> {
        let path = format!(
            "/api/json/v2/types/volumes?cluster-index={}&full=1&prop=name&prop=naa-name&prop=vol-size&prop=obj-severity&prop=logical-space-in-use",
            self.cluster
        );
        let body = self.get(&path).await?;

        // vol-size is reported in KB
        Ok(array_field(&body, "volumes")?
            .iter()
            .map(|volume| Datastore {
                name: field_string(volume, "name"),
                world_wide_name: field_string(volume, "naa-name"),
                size_kb: field_f64(volume, "vol-size"),
                health_state: volume
                    .get("obj-severity")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect())
    }

    async fn disks(&self) -> Result<Vec<Disk>> {
        let path = format!("/api/json/v2/types/local-disks?cluster-index={}&full=1", self.cluster);
        let body = self.get(&path).await?;

        Ok(array_field(&body, "local-disks")?
            .iter()
            .map(|disk| {
                Disk::new(
                    field_string(disk, "name"),
                    disk.get("capacity").and_then(as_f64),
                    disk.get("fru-lifecycle-state")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    disk.as_object().cloned().unwrap_or_default(),
                )
            })
            .collect())
    }

    /// The XMS alert feed spans every managed cluster; keep only this one's
    async fn alerts(&self, system: &SystemInfo) -> Result<Vec<Alert>> {
        let cluster_name = field_string(&system.details, "name");
        let body = self.get("/api/json/v2/types/alerts?full=1").await?;
        let feed = array_field(&body, "alerts")?;

        let alerts: Vec<Alert> = feed
            .iter()
            .filter(|alert| field_string(alert, "cluster-name") == cluster_name)
            .map(|alert| {
                let mut details: Map<String, Value> = alert.as_object().cloned().unwrap_or_default();
                let severity = severity_from_name(&field_string(alert, "severity"));
                details.remove("severity");
                let message = details
                    .remove("description")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                Alert {
                    severity,
                    message,
                    raised_at: alert
                        .get("raise-time")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    details,
                }
            })
            .collect();

        debug!(
            "[{}] Kept {} of {} alert(s) for cluster '{}'",
            self.server.id,
            alerts.len(),
            feed.len(),
            cluster_name
        );
        Ok(alerts)
    }
}

/// Logical (volume) and physical (SSD) capacity, both already in KB
fn cluster_capacity(content: &Value) -> Result<CapacityReport> {
    let volume_total = number_field(content, "vol-size")?;
    let volume_used = number_field(content, "logical-space-in-use")?;
    let physical_total = number_field(content, "ud-ssd-space")?;
    let physical_used = number_field(content, "ud-ssd-space-in-use")?;

    Ok(CapacityReport::Tiered {
        volume: capacity_from_total(
            volume_total,
            volume_used,
            (volume_total - volume_used).max(0.0),
        ),
        physical: capacity_from_total(
            physical_total,
            physical_used,
            (physical_total - physical_used).max(0.0),
        ),
    })
}

#[async_trait]
impl Authenticator for XtremIoCollector {
    // Credentials travel with every request
    async fn login(&self) -> Result<SessionToken> {
        Ok(SessionToken::Stateless)
    }

    async fn logout(&self, _token: &SessionToken) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageArray for XtremIoCollector {
    fn server(&self) -> &ServerTarget {
        &self.server
    }

    async fn system_info(&self, _token: &SessionToken) -> Result<SystemInfo> {
        let body = self
            .get(&format!("/api/json/v2/types/clusters/{}", self.cluster))
            .await?;
        let content = body
            .get("content")
            .cloned()
            .ok_or_else(|| CollectorError::missing("content"))?;

        let identity = Identity {
            name: field_string(&content, "sys-psnt-serial-number"),
            model: format!(
                "{} v{}",
                field_string(&content, "name"),
                field_string(&content, "sys-sw-version")
            ),
        };
        Ok(SystemInfo {
            identity,
            details: content,
        })
    }

    async fn fetch(
        &self,
        command: Command,
        system: &SystemInfo,
        _token: &SessionToken,
    ) -> Result<Option<Telemetry>> {
        Ok(match command {
            Command::Capacity => Some(Telemetry::Capacity(cluster_capacity(&system.details)?)),
            Command::Datastores => Some(Telemetry::Datastores(self.datastores().await?)),
            Command::Disks => Some(Telemetry::Disks(self.disks().await?)),
            Command::Alerts => Some(Telemetry::Alerts(self.alerts(system).await?)),
            Command::Uptime => None,
        })
    }
}
