// DataDomain collector
//
// REST API v1.0 on port 3009. Login hands out a short-lived token in the
// X-DD-AUTH-TOKEN response header; every later call echoes it back and the
// token is deleted at the end of the session.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::{array_field, expand_all, number_field, StorageArray, SystemInfo};
use crate::config::CollectorSettings;
use crate::error::{CollectorError, Result};
use crate::model::{
    Alert, CapacityReport, Command, Credentials, Datastore, Identity, ServerTarget, Telemetry,
    UptimeSample,
};
use crate::normalize::{
    bytes_to_kb, capacity_from_total, epoch_to_iso, field_string, join_nonempty, severity_from_name,
};
use crate::session::{Authenticator, SessionToken};
use crate::transport::{ApiRequest, HttpTransport, ReqwestTransport};

pub const PORT: u16 = 3009;

const AUTH_PATH: &str = "/rest/v1.0/auth";
const SYSTEM_PATH: &str = "/rest/v1.0/system";
const MTREES_PATH: &str = "/rest/v1.0/dd-systems/0/mtrees";
const ALERTS_PATH: &str = "/rest/v1.0/dd-systems/0/alerts";
const TOKEN_HEADER: &str = "X-DD-AUTH-TOKEN";

/// Collector for DataDomain backup appliances
pub struct DataDomainCollector {
    server: ServerTarget,
    credentials: Credentials,
    transport: Arc<dyn HttpTransport>,
}

impl DataDomainCollector {
    pub fn new(server: ServerTarget, credentials: Credentials, settings: &CollectorSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(&server.address, Some(PORT), settings.request_timeout())?;
        Ok(Self::with_transport(server, credentials, Arc::new(transport)))
    }

    pub fn with_transport(
        server: ServerTarget,
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        DataDomainCollector {
            server,
            credentials,
            transport,
        }
    }

    async fn get(&self, path: &str, token: &SessionToken) -> Result<Value> {
        let request = token.apply(ApiRequest::get(path));
        Ok(self.transport.execute(request).await?.body)
    }

    /// Lists mtree ids, then fetches every mtree's details concurrently
    async fn mtrees(&self, token: &SessionToken) -> Result<Vec<Datastore>> {
        let listing = self.get(MTREES_PATH, token).await?;
        let ids: Vec<String> = array_field(&listing, "mtree")?
            .iter()
            .map(|entry| field_string(entry, "id"))
            .filter(|id| !id.is_empty())
            .collect();
        debug!("[{}] Expanding {} mtree(s)", self.server.id, ids.len());

        expand_all(&self.server.id, ids, |id| async move {
            let detail = self.get(&format!("{}/{}", MTREES_PATH, id), token).await?;
            mtree_datastore(&detail)
        })
        .await
    }

    async fn alerts(&self, token: &SessionToken) -> Result<Vec<Alert>> {
        let body = self.get(ALERTS_PATH, token).await?;

        Ok(array_field(&body, "alert_list")?
            .iter()
            .filter(|alert| field_string(alert, "status").eq_ignore_ascii_case("active"))
            .map(to_alert)
            .collect())
    }
}

/// Datastore view of one mtree detail payload. The mtree path
/// (`/data/col1/backup`) is reduced to its last segment.
fn mtree_datastore(detail: &Value) -> Result<Datastore> {
    let path = field_string(detail, "name");
    let name = path.rsplit('/').next().unwrap_or_default().to_string();
    let logical = detail
        .get("logical_capacity")
        .ok_or_else(|| CollectorError::missing("logical_capacity"))?;

    Ok(Datastore {
        name,
        world_wide_name: field_string(detail, "id"),
        size_kb: bytes_to_kb(number_field(logical, "used")?),
        health_state: None,
    })
}

fn to_alert(alert: &Value) -> Alert {
    let mut details: Map<String, Value> = alert.as_object().cloned().unwrap_or_default();
    let severity = severity_from_name(&field_string(alert, "severity"));
    details.remove("severity");

    let message = ["msg", "description"]
        .iter()
        .find_map(|key| details.remove(*key).and_then(|v| v.as_str().map(str::to_string)))
        .unwrap_or_default();
    let raised_at = alert
        .get("alert_gen_epoch")
        .and_then(Value::as_i64)
        .and_then(epoch_to_iso);

    Alert {
        severity,
        message,
        raised_at,
        details,
    }
}

#[async_trait]
impl Authenticator for DataDomainCollector {
    async fn login(&self) -> Result<SessionToken> {
        let body = json!({
            "auth_info": {
                "username": self.credentials.username,
                "password": self.credentials.password,
            }
        });
        let response = self.transport.execute(ApiRequest::post(AUTH_PATH, body)).await?;

        let value = response
            .header(TOKEN_HEADER)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                CollectorError::Authentication(format!("no {} header in login response", TOKEN_HEADER))
            })?;

        Ok(SessionToken::Header {
            name: TOKEN_HEADER,
            value: value.to_string(),
        })
    }

    async fn logout(&self, token: &SessionToken) -> Result<()> {
        self.transport
            .execute(token.apply(ApiRequest::delete(AUTH_PATH)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageArray for DataDomainCollector {
    fn server(&self) -> &ServerTarget {
        &self.server
    }

    async fn system_info(&self, token: &SessionToken) -> Result<SystemInfo> {
        let details = self.get(SYSTEM_PATH, token).await?;

        let identity = Identity {
            name: field_string(&details, "name"),
            model: join_nonempty(&[
                &field_string(&details, "model"),
                &field_string(&details, "location"),
                &field_string(&details, "version"),
            ]),
        };
        Ok(SystemInfo { identity, details })
    }

    async fn fetch(
        &self,
        command: Command,
        system: &SystemInfo,
        token: &SessionToken,
    ) -> Result<Option<Telemetry>> {
        Ok(match command {
            Command::Capacity => {
                let physical = system
                    .details
                    .get("physical_capacity")
                    .ok_or_else(|| CollectorError::missing("physical_capacity"))?;
                Some(Telemetry::Capacity(CapacityReport::Single(capacity_from_total(
                    bytes_to_kb(number_field(physical, "total")?),
                    bytes_to_kb(number_field(physical, "used")?),
                    bytes_to_kb(number_field(physical, "available")?),
                ))))
            }
            Command::Datastores => Some(Telemetry::Datastores(self.mtrees(token).await?)),
            Command::Alerts => Some(Telemetry::Alerts(self.alerts(token).await?)),
            Command::Uptime => Some(Telemetry::Uptime(vec![UptimeSample {
                node: field_string(&system.details, "model"),
                observed_at_epoch_seconds: Utc::now().timestamp(),
                uptime_seconds: number_field(&system.details, "uptime_secs")? as u64,
            }])),
            Command::Disks => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Collector;
    use crate::error::ErrorKind;
    use crate::model::{CommandSet, Severity};
    use std::time::Duration;
    use tokio::time::Instant;
    use crate::testing::{self, ScriptedTransport};
    use crate::transport::{ApiResponse, Method};

    fn scripted() -> ScriptedTransport {
        ScriptedTransport::new()
            .on_response(
                Method::Post,
                AUTH_PATH,
                ApiResponse::json(Value::Null).with_header("x-dd-auth-token", "tok-123"),
            )
            .on(Method::Delete, AUTH_PATH, Value::Null)
            .on(
                Method::Get,
                SYSTEM_PATH,
                json!({
                    "name": "dd01.example.com",
                    "model": "DD6300",
                    "location": "",
                    "version": "7.2.0.5",
                    "uptime_secs": 864000,
                    "physical_capacity": {"total": 10485760, "used": 4194304, "available": 5242880}
                }),
            )
    }

    fn collector(transport: Arc<ScriptedTransport>) -> DataDomainCollector {
        DataDomainCollector::with_transport(
            testing::target("DD_01", "DataDomain"),
            testing::credentials(),
            transport,
        )
    }

    #[tokio::test]
    async fn test_token_on_every_call_and_logout() {
        let transport = Arc::new(scripted());
        let result = collector(transport.clone())
            .collect(&CommandSet::from_names(["capacity"]))
            .await;

        assert_eq!(result.info.name, "dd01.example.com");
        // Empty location is skipped rather than leaving a double space
        assert_eq!(result.info.model, "DD6300 7.2.0.5");

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        for call in &calls[1..] {
            assert!(call
                .headers
                .iter()
                .any(|(name, value)| name == TOKEN_HEADER && value == "tok-123"));
        }
        assert_eq!(calls[2].method, Method::Delete);
    }

    #[tokio::test]
    async fn test_capacity_from_physical_block() {
        let transport = Arc::new(scripted());
        let result = collector(transport)
            .collect(&CommandSet::from_names(["capacity"]))
            .await;

        match result.capacity {
            Some(CapacityReport::Single(capacity)) => {
                assert_eq!(capacity.total, 10_240.0);
                assert_eq!(capacity.used, 4_096.0);
                assert_eq!(capacity.available, 5_120.0);
                assert_eq!(capacity.free, 5_120.0);
                assert_eq!(capacity.configured, 9_216.0);
                assert_eq!(capacity.unconfigured, 1_024.0);
            }
            other => panic!("unexpected capacity: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mtrees_expanded_in_listing_order() {
        let transport = Arc::new(
            scripted()
                .on(
                    Method::Get,
                    MTREES_PATH,
                    json!({"mtree": [{"id": "m1"}, {"id": "m2"}]}),
                )
                .on(
                    Method::Get,
                    "/rest/v1.0/dd-systems/0/mtrees/m1",
                    json!({"id": "m1", "name": "/data/col1/backup", "logical_capacity": {"used": 2048}}),
                )
                .on(
                    Method::Get,
                    "/rest/v1.0/dd-systems/0/mtrees/m2",
                    json!({"id": "m2", "name": "/data/col1/archive", "logical_capacity": {"used": 1048576}}),
                ),
        );
        let result = collector(transport)
            .collect(&CommandSet::from_names(["datastores"]))
            .await;

        let mtrees = result.datastores.unwrap();
        assert_eq!(mtrees.len(), 2);
        assert_eq!(mtrees[0].name, "backup");
        assert_eq!(mtrees[0].world_wide_name, "m1");
        assert_eq!(mtrees[0].size_kb, 2.0);
        assert_eq!(mtrees[1].name, "archive");
        assert_eq!(mtrees[1].size_kb, 1_024.0);
        assert!(mtrees[1].health_state.is_none());
    }

    #[tokio::test]
    async fn test_failed_mtree_detail_fails_whole_command() {
        let transport = Arc::new(
            scripted()
                .on(
                    Method::Get,
                    MTREES_PATH,
                    json!({"mtree": [{"id": "m1"}, {"id": "m2"}]}),
                )
                .on(
                    Method::Get,
                    "/rest/v1.0/dd-systems/0/mtrees/m1",
                    json!({"id": "m1", "name": "/data/col1/backup", "logical_capacity": {"used": 2048}}),
                )
                .on_status(Method::Get, "/rest/v1.0/dd-systems/0/mtrees/m2", 500),
        );
        let result = collector(transport.clone())
            .collect(&CommandSet::from_names(["datastores", "uptime"]))
            .await;

        assert!(result.datastores.is_none());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, "datastores");
        assert_eq!(result.uptime.as_ref().map(Vec::len), Some(1));
        assert_eq!(transport.count(Method::Delete, AUTH_PATH), 1);
    }

    #[tokio::test]
    async fn test_uptime_and_unsupported_disks() {
        let transport = Arc::new(scripted());
        let result = collector(transport)
            .collect(&CommandSet::from_names(["uptime", "disks"]))
            .await;

        let uptime = result.uptime.as_ref().unwrap();
        assert_eq!(uptime[0].node, "DD6300");
        assert_eq!(uptime[0].uptime_seconds, 864_000);
        assert!(uptime[0].observed_at_epoch_seconds > 0);
        assert!(result.disks.is_none());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_incomplete_system_payload_records_failures() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_response(
                    Method::Post,
                    AUTH_PATH,
                    ApiResponse::json(Value::Null).with_header("x-dd-auth-token", "tok-123"),
                )
                .on(Method::Delete, AUTH_PATH, Value::Null)
                .on(
                    Method::Get,
                    SYSTEM_PATH,
                    json!({"name": "dd01", "model": "DD6300", "physical_capacity": {"total": 10485760}}),
                ),
        );
        let result = collector(transport)
            .collect(&CommandSet::from_names(["capacity", "uptime"]))
            .await;

        assert!(result.capacity.is_none());
        assert!(result.uptime.is_none());
        let stages: Vec<&str> = result.failures.iter().map(|f| f.stage.as_str()).collect();
        assert_eq!(stages, vec!["capacity", "uptime"]);
        assert!(result.failures.iter().all(|f| f.kind == ErrorKind::Parse));
    }

    #[tokio::test]
    async fn test_mtree_without_logical_capacity_fails_command() {
        let transport = Arc::new(
            scripted()
                .on(Method::Get, MTREES_PATH, json!({"mtree": [{"id": "m1"}]}))
                .on(
                    Method::Get,
                    "/rest/v1.0/dd-systems/0/mtrees/m1",
                    json!({"id": "m1", "name": "/data/col1/backup"}),
                ),
        );
        let result = collector(transport)
            .collect(&CommandSet::from_names(["datastores"]))
            .await;

        assert!(result.datastores.is_none());
        assert_eq!(result.failures[0].kind, ErrorKind::PartialData);
    }

    #[tokio::test]
    async fn test_stalled_array_is_logged_out_at_deadline() {
        let transport = Arc::new(
            scripted()
                .on_stall(Method::Get, MTREES_PATH)
                .on(Method::Get, ALERTS_PATH, json!({"alert_list": []})),
        );
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = collector(transport.clone())
            .collect_until(&CommandSet::from_names(["capacity", "datastores", "alerts"]), Some(deadline))
            .await;

        assert!(result.capacity.is_some());
        assert!(result.datastores.is_none());
        assert!(result.alerts.is_none());
        assert_eq!(result.failures.len(), 2);
        assert_eq!(transport.count(Method::Post, AUTH_PATH), 1);
        assert_eq!(transport.count(Method::Delete, AUTH_PATH), 1);
        assert_eq!(transport.count(Method::Get, ALERTS_PATH), 0);
    }

    #[tokio::test]
    async fn test_only_active_alerts() {
        let transport = Arc::new(scripted().on(
            Method::Get,
            ALERTS_PATH,
            json!({"alert_list": [
                {"id": 1, "status": "active", "severity": "CRITICAL", "msg": "Disk failure", "alert_gen_epoch": 0},
                {"id": 2, "status": "cleared", "severity": "WARNING", "msg": "Old"}
            ]}),
        ));
        let result = collector(transport)
            .collect(&CommandSet::from_names(["alerts"]))
            .await;

        let alerts = result.alerts.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].message, "Disk failure");
        assert_eq!(alerts[0].raised_at.as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(alerts[0].details["id"], 1);
    }

    #[tokio::test]
    async fn test_missing_token_header_is_auth_failure() {
        let transport = Arc::new(
            ScriptedTransport::new().on(Method::Post, AUTH_PATH, Value::Null),
        );
        let result = collector(transport.clone())
            .collect(&CommandSet::from_names(["capacity"]))
            .await;

        assert_eq!(result.failures[0].stage, "authenticate");
        assert_eq!(transport.count(Method::Delete, AUTH_PATH), 0);
    }
}
