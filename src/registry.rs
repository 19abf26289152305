// Registry module - maps a server's storage-family tag to its collector
//
// Lookups happen before any network activity: an unknown tag or a family
// without credentials is a configuration error for that server only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::collectors::datadomain::DataDomainCollector;
use crate::collectors::isilon::IsilonCollector;
use crate::collectors::unity::UnityCollector;
use crate::collectors::vnx::VnxCollector;
use crate::collectors::xtremio::XtremIoCollector;
use crate::collectors::Collector;
use crate::config::CollectorSettings;
use crate::error::{CollectorError, Result};
use crate::model::{Credentials, ServerTarget};

/// Builds a collector for one server invocation
pub type CollectorFactory = Arc<
    dyn Fn(ServerTarget, Credentials, &CollectorSettings) -> Result<Box<dyn Collector>> + Send + Sync,
>;

/// Storage families with a built-in collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFamily {
    Isilon,
    Unity,
    XtremIo,
    DataDomain,
    Vnx,
}

impl StorageFamily {
    pub const ALL: [StorageFamily; 5] = [
        StorageFamily::Isilon,
        StorageFamily::Unity,
        StorageFamily::XtremIo,
        StorageFamily::DataDomain,
        StorageFamily::Vnx,
    ];

    /// Tag used in the inventory
    pub fn tag(&self) -> &'static str {
        match self {
            StorageFamily::Isilon => "Isilon",
            StorageFamily::Unity => "Unity",
            StorageFamily::XtremIo => "XIO",
            StorageFamily::DataDomain => "DataDomain",
            StorageFamily::Vnx => "VNX",
        }
    }

    /// Case-insensitive; `XtremIO` is accepted for `XIO`
    pub fn parse(tag: &str) -> Option<StorageFamily> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "isilon" => Some(StorageFamily::Isilon),
            "unity" => Some(StorageFamily::Unity),
            "xio" | "xtremio" => Some(StorageFamily::XtremIo),
            "datadomain" => Some(StorageFamily::DataDomain),
            "vnx" => Some(StorageFamily::Vnx),
            _ => None,
        }
    }

    fn factory(self) -> CollectorFactory {
        match self {
            StorageFamily::Isilon => collector_factory(IsilonCollector::new),
            StorageFamily::Unity => collector_factory(UnityCollector::new),
            StorageFamily::XtremIo => collector_factory(XtremIoCollector::new),
            StorageFamily::DataDomain => collector_factory(DataDomainCollector::new),
            StorageFamily::Vnx => collector_factory(VnxCollector::new),
        }
    }
}

/// Wraps a typed constructor into a boxed-collector factory
pub fn collector_factory<C, F>(build: F) -> CollectorFactory
where
    C: Collector + 'static,
    F: Fn(ServerTarget, Credentials, &CollectorSettings) -> Result<C> + Send + Sync + 'static,
{
    Arc::new(
        move |server: ServerTarget, credentials: Credentials, settings: &CollectorSettings| {
            Ok(Box::new(build(server, credentials, settings)?) as Box<dyn Collector>)
        },
    )
}

impl fmt::Display for StorageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Normalizes a tag so aliases and casing resolve to one key
pub(crate) fn registry_key(tag: &str) -> String {
    match StorageFamily::parse(tag) {
        Some(family) => family.tag().to_ascii_lowercase(),
        None => tag.trim().to_ascii_lowercase(),
    }
}

/// Family tag → collector constructor, plus the credentials for each family
pub struct CollectorRegistry {
    factories: HashMap<String, CollectorFactory>,
    credentials: HashMap<String, Credentials>,
    settings: CollectorSettings,
}

impl CollectorRegistry {
    /// Empty registry; families are added with `register`
    pub fn new(credentials: HashMap<String, Credentials>, settings: CollectorSettings) -> Self {
        let credentials = credentials
            .into_iter()
            .map(|(tag, creds)| (registry_key(&tag), creds))
            .collect();

        CollectorRegistry {
            factories: HashMap::new(),
            credentials,
            settings,
        }
    }

    /// Registry holding every built-in family
    pub fn with_builtin_adapters(
        credentials: HashMap<String, Credentials>,
        settings: CollectorSettings,
    ) -> Self {
        let mut registry = Self::new(credentials, settings);
        for family in StorageFamily::ALL {
            registry.register(family.tag(), family.factory());
        }
        registry
    }

    /// Adds or replaces the collector for a tag
    pub fn register(&mut self, tag: &str, factory: CollectorFactory) {
        debug!("Registering collector for '{}'", tag);
        self.factories.insert(registry_key(tag), factory);
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Builds the collector for one server
    pub fn resolve(&self, target: &ServerTarget) -> Result<Box<dyn Collector>> {
        let key = registry_key(&target.storage);

        let factory = self.factories.get(&key).ok_or_else(|| {
            CollectorError::Configuration(format!(
                "no collector registered for storage '{}' (server {})",
                target.storage, target.id
            ))
        })?;
        let credentials = self.credentials.get(&key).cloned().ok_or_else(|| {
            CollectorError::Configuration(format!(
                "no credentials configured for storage '{}' (server {})",
                target.storage, target.id
            ))
        })?;

        factory(target.clone(), credentials, &self.settings)
    }

    /// Checks that every target can be resolved, without building anything
    pub fn validate(&self, targets: &[ServerTarget]) -> Result<()> {
        for target in targets {
            let key = registry_key(&target.storage);
            if !self.factories.contains_key(&key) {
                return Err(CollectorError::Configuration(format!(
                    "no collector registered for storage '{}' (server {})",
                    target.storage, target.id
                )));
            }
            if !self.credentials.contains_key(&key) {
                return Err(CollectorError::Configuration(format!(
                    "no credentials configured for storage '{}' (server {})",
                    target.storage, target.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectionResult, CommandSet};
    use crate::testing;
    use async_trait::async_trait;

    fn all_credentials() -> HashMap<String, Credentials> {
        ["Isilon", "unity", "XtremIO", "DATADOMAIN", "vnx"]
            .iter()
            .map(|tag| (tag.to_string(), testing::credentials()))
            .collect()
    }

    #[test]
    fn test_family_tags_case_insensitive() {
        assert_eq!(StorageFamily::parse("isilon"), Some(StorageFamily::Isilon));
        assert_eq!(StorageFamily::parse("XtremIO"), Some(StorageFamily::XtremIo));
        assert_eq!(StorageFamily::parse(" xio "), Some(StorageFamily::XtremIo));
        assert_eq!(StorageFamily::parse("3PAR"), None);
        for family in StorageFamily::ALL {
            assert_eq!(StorageFamily::parse(family.tag()), Some(family));
        }
    }

    #[test]
    fn test_resolves_every_builtin_family() {
        let registry = CollectorRegistry::with_builtin_adapters(all_credentials(), CollectorSettings::default());

        for family in StorageFamily::ALL {
            let mut target = testing::target(&format!("{}_01", family), family.tag());
            target.params.insert("cluster".into(), "1".into());
            let collector = registry.resolve(&target).unwrap();
            assert_eq!(collector.target().id, target.id);
        }
    }

    #[test]
    fn test_unknown_tag_is_configuration_error() {
        let registry = CollectorRegistry::with_builtin_adapters(all_credentials(), CollectorSettings::default());
        let target = testing::target("P_01", "3PAR");

        let err = registry.resolve(&target).err().unwrap();
        assert!(matches!(err, CollectorError::Configuration(_)));
        assert!(registry.validate(&[target]).is_err());
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let registry = CollectorRegistry::with_builtin_adapters(HashMap::new(), CollectorSettings::default());
        let target = testing::target("ISI_01", "Isilon");

        let err = registry.resolve(&target).err().unwrap();
        assert!(err.to_string().contains("no credentials"));
    }

    #[test]
    fn test_xtremio_without_cluster_fails_resolution() {
        let registry = CollectorRegistry::with_builtin_adapters(all_credentials(), CollectorSettings::default());
        let target = testing::target("XIO_01", "XIO");

        assert!(registry.validate(&[target.clone()]).is_ok());
        assert!(matches!(
            registry.resolve(&target).err().unwrap(),
            CollectorError::Configuration(_)
        ));
    }

    struct StaticCollector(ServerTarget);

    #[async_trait]
    impl Collector for StaticCollector {
        fn target(&self) -> &ServerTarget {
            &self.0
        }

        async fn collect_until(
            &self,
            _commands: &CommandSet,
            _deadline: Option<tokio::time::Instant>,
        ) -> CollectionResult {
            CollectionResult::new(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_custom_family_registration() {
        let mut credentials = HashMap::new();
        credentials.insert("PowerStore".to_string(), testing::credentials());
        let mut registry = CollectorRegistry::new(credentials, CollectorSettings::default());
        registry.register(
            "powerstore",
            collector_factory(|server, _credentials, _settings| Ok(StaticCollector(server))),
        );

        let collector = registry.resolve(&testing::target("PS_01", "POWERSTORE")).unwrap();
        let result = collector.collect(&CommandSet::from_names(["capacity"])).await;
        assert_eq!(result.server.id, "PS_01");
    }
}
