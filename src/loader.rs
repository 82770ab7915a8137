//! Definition loaders.
//!
//! A [`DefinitionLoader`] fills a registry on every refresh of a
//! [`RefreshableFactoryStrategy`](crate::strategy::RefreshableFactoryStrategy).
//! Closures are loaders, and [`ConfigDefinitionLoader`] reads definitions from
//! JSON documents.

use crate::caches::{self, MetadataCache, ResettableCache};
use crate::di::{ComponentDefinition, DefinitionRegistry, Scope};
use anyhow::Context;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::debug;

pub trait DefinitionLoader: Send + Sync {
    fn load_definitions(&self, registry: &dyn DefinitionRegistry) -> anyhow::Result<()>;

    /// Drops anything cached while loading. Called once a refresh finished.
    fn clear_caches(&self) {}
}

impl<F> DefinitionLoader for F
where
    F: Fn(&dyn DefinitionRegistry) -> anyhow::Result<()> + Send + Sync,
{
    fn load_definitions(&self, registry: &dyn DefinitionRegistry) -> anyhow::Result<()> {
        self(registry)
    }
}

/// One entry of a config document.
///
/// ```json
/// { "name": "userService", "type": "UserService", "scope": "prototype",
///   "lazy": true, "depends_on": ["database"], "properties": { "pool": 4 } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ComponentConfig {
    /// Deserializes one entry of `properties`.
    pub fn property<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        self.properties
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("property '{key}' of component '{}'", self.name))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

type Constructor = Arc<dyn Fn(&ComponentConfig) -> anyhow::Result<ComponentDefinition> + Send + Sync>;

/// Named constructors that config entries refer to through `type`.
#[derive(Clone, Default)]
pub struct TypeCatalog {
    constructors: HashMap<String, Constructor>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `type_name`. The definition it returns is
    /// renamed after the entry and gets the entry's scope, laziness and
    /// dependencies.
    pub fn register<F>(mut self, type_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ComponentConfig) -> anyhow::Result<ComponentDefinition> + Send + Sync + 'static,
    {
        self.constructors.insert(type_name.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    fn build(&self, config: &ComponentConfig) -> anyhow::Result<ComponentDefinition> {
        let constructor = self.constructors.get(&config.type_name).with_context(|| {
            format!(
                "component '{}' refers to unknown type '{}'",
                config.name, config.type_name
            )
        })?;
        let mut definition = constructor(config)?;
        definition.set_name(config.name.clone());
        definition.set_scope(config.scope);
        definition.set_lazy_init(config.lazy);
        if !config.depends_on.is_empty() {
            definition.set_depends_on(config.depends_on.clone());
        }
        Ok(definition)
    }
}

static DOCUMENTS: LazyLock<MetadataCache<PathBuf, Arc<ConfigDocument>>> =
    LazyLock::new(|| MetadataCache::new("config-documents"));

/// Loads definitions from JSON documents on disk.
///
/// Parsed documents are cached until the caches are reset, which happens at
/// the end of every refresh.
pub struct ConfigDefinitionLoader {
    catalog: TypeCatalog,
    locations: Vec<PathBuf>,
}

impl ConfigDefinitionLoader {
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            catalog,
            locations: Vec::new(),
        }
    }

    pub fn location(mut self, path: impl Into<PathBuf>) -> Self {
        self.locations.push(path.into());
        self
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    fn document(&self, path: &Path) -> anyhow::Result<Arc<ConfigDocument>> {
        caches::register(&*DOCUMENTS);
        if let Some(document) = DOCUMENTS.get(&path.to_path_buf()) {
            return Ok(document);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config document {}", path.display()))?;
        let document: ConfigDocument = serde_json::from_str(&text)
            .with_context(|| format!("parsing config document {}", path.display()))?;
        let document = Arc::new(document);
        DOCUMENTS.insert(path.to_path_buf(), Arc::clone(&document));
        Ok(document)
    }

    /// Registers the entries of a single in-memory document.
    pub fn load_document(&self, document: &ConfigDocument, registry: &dyn DefinitionRegistry) -> anyhow::Result<()> {
        for config in &document.components {
            registry.register_definition(self.catalog.build(config)?)?;
        }
        Ok(())
    }
}

impl DefinitionLoader for ConfigDefinitionLoader {
    fn load_definitions(&self, registry: &dyn DefinitionRegistry) -> anyhow::Result<()> {
        for location in &self.locations {
            let document = self.document(location)?;
            debug!(
                location = %location.display(),
                components = document.components.len(),
                "Loading component definitions"
            );
            self.load_document(&document, registry)?;
        }
        Ok(())
    }

    fn clear_caches(&self) {
        DOCUMENTS.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::DefaultComponentFactory;
    use std::io::Write;

    struct Pool {
        size: u32,
    }

    fn catalog() -> TypeCatalog {
        TypeCatalog::new().register("Pool", |config: &ComponentConfig| {
            let size = config.property::<u32>("size")?.unwrap_or(1);
            Ok(ComponentDefinition::new("ignored", move |_| Ok(Pool { size })))
        })
    }

    #[test]
    fn test_loads_definitions_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "components": [
                {{ "name": "small", "type": "Pool", "properties": {{ "size": 2 }} }},
                {{ "name": "large", "type": "Pool", "scope": "prototype", "lazy": true,
                   "depends_on": ["small"], "properties": {{ "size": 64 }} }}
            ] }}"#
        )
        .unwrap();

        let loader = ConfigDefinitionLoader::new(catalog()).location(&path);
        let factory = DefaultComponentFactory::new();
        loader.load_definitions(&factory).unwrap();

        let large = factory.definition("large").unwrap();
        assert!(large.is_prototype());
        assert!(large.is_lazy_init());
        assert_eq!(large.dependencies(), ["small".to_string()]);
        assert_eq!(factory.get::<Pool>("small").unwrap().size, 2);
        assert_eq!(factory.get::<Pool>("large").unwrap().size, 64);
    }

    #[test]
    fn test_unknown_type_and_bad_property_fail() {
        let factory = DefaultComponentFactory::new();
        let loader = ConfigDefinitionLoader::new(catalog());

        let unknown: ConfigDocument =
            serde_json::from_str(r#"{ "components": [ { "name": "x", "type": "Nope" } ] }"#).unwrap();
        let err = loader.load_document(&unknown, &factory).unwrap_err();
        assert!(err.to_string().contains("unknown type 'Nope'"));

        let bad: ConfigDocument = serde_json::from_str(
            r#"{ "components": [ { "name": "x", "type": "Pool", "properties": { "size": "big" } } ] }"#,
        )
        .unwrap();
        assert!(loader.load_document(&bad, &factory).is_err());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigDefinitionLoader::new(catalog()).location(dir.path().join("absent.json"));
        let err = loader
            .load_definitions(&DefaultComponentFactory::new())
            .unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
