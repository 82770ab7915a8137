//! Property sources, placeholder resolution and required-property checks.
//!
//! An [`Environment`] is an ordered list of [`PropertySource`]s. Lookups walk
//! the list front to back and the first source holding a key wins. Values may
//! reference other keys with `${key}` or `${key:default}`.

use crate::caches::MetadataCache;
use crate::error::{ContextError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::env;
use std::sync::{Arc, LazyLock};

const PLACEHOLDER_PREFIX: &str = "${";
const PLACEHOLDER_SUFFIX: char = '}';
const VALUE_SEPARATOR: char = ':';
const MAX_PLACEHOLDER_DEPTH: usize = 32;

/// Name of the source created by [`Environment::new`].
pub const SYSTEM_ENVIRONMENT_SOURCE_NAME: &str = "systemEnvironment";

/// A named key/value source.
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn property(&self, key: &str) -> Option<String>;

    fn contains(&self, key: &str) -> bool {
        self.property(key).is_some()
    }

    fn property_names(&self) -> Vec<String>;
}

/// Mutable in-memory source.
#[derive(Clone)]
pub struct MapPropertySource {
    name: String,
    values: Arc<DashMap<String, String>>,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Arc::new(DashMap::new()),
        }
    }

    pub fn from_pairs<K, V>(name: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let source = Self::new(name);
        for (key, value) in pairs {
            source.set(key, value);
        }
        source
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.remove(key).map(|(_, v)| v)
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn property(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.clone())
    }

    fn property_names(&self) -> Vec<String> {
        self.values.iter().map(|e| e.key().clone()).collect()
    }
}

/// Snapshot of the process environment.
///
/// `db.url` also matches `db_url`, `DB_URL` and `DB-URL`-style variants, so
/// dotted keys can be supplied through shell variables.
pub struct SystemEnvironmentSource {
    name: String,
    vars: HashMap<String, String>,
}

impl SystemEnvironmentSource {
    pub fn new() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            name: SYSTEM_ENVIRONMENT_SOURCE_NAME.to_string(),
            vars: vars.into_iter().collect(),
        }
    }

    fn candidates(key: &str) -> [String; 3] {
        let underscored = key.replace(['.', '-'], "_");
        let upper = underscored.to_uppercase();
        [key.to_string(), underscored, upper]
    }
}

impl Default for SystemEnvironmentSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertySource for SystemEnvironmentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn property(&self, key: &str) -> Option<String> {
        Self::candidates(key)
            .iter()
            .find_map(|candidate| self.vars.get(candidate).cloned())
    }

    fn property_names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}

/// A JSON document flattened into dotted keys (`server.port`, `hosts[0]`).
pub struct JsonPropertySource {
    name: String,
    values: HashMap<String, String>,
}

impl JsonPropertySource {
    pub fn from_value(name: impl Into<String>, value: &serde_json::Value) -> Self {
        let mut values = HashMap::new();
        flatten_json("", value, &mut values);
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn from_json_str(name: impl Into<String>, json: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Ok(Self::from_value(name, &value))
    }
}

impl PropertySource for JsonPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn property(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut HashMap<String, String>) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json(&path, nested, out);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_json(&format!("{prefix}[{index}]"), nested, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Property sources plus the set of keys that must resolve before a refresh.
pub struct Environment {
    sources: RwLock<Vec<Arc<dyn PropertySource>>>,
    required: RwLock<Vec<String>>,
}

impl Environment {
    /// An environment backed by the process environment.
    pub fn new() -> Self {
        let env = Self::empty();
        env.add_last(SystemEnvironmentSource::new());
        env
    }

    pub fn empty() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            required: RwLock::new(Vec::new()),
        }
    }

    /// Inserts a source with the highest precedence, replacing any source of the same name.
    pub fn add_first(&self, source: impl PropertySource + 'static) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        sources.insert(0, Arc::new(source));
    }

    /// Appends a source with the lowest precedence, replacing any source of the same name.
    pub fn add_last(&self, source: impl PropertySource + 'static) {
        self.add_last_shared(Arc::new(source));
    }

    fn add_last_shared(&self, source: Arc<dyn PropertySource>) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        sources.push(source);
    }

    pub fn remove_source(&self, name: &str) -> bool {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|s| s.name() != name);
        sources.len() != before
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Appends the parent's sources that this environment does not already have.
    ///
    /// Parent sources keep their relative order and rank below every local source.
    /// Required properties are merged the same way.
    pub fn merge(&self, parent: &Environment) {
        let local: Vec<String> = self.source_names();
        let inherited: Vec<Arc<dyn PropertySource>> = parent
            .sources
            .read()
            .iter()
            .filter(|s| !local.iter().any(|name| name == s.name()))
            .cloned()
            .collect();
        for source in inherited {
            self.add_last_shared(source);
        }

        let parent_required = parent.required.read().clone();
        let mut required = self.required.write();
        for key in parent_required {
            if !required.contains(&key) {
                required.push(key);
            }
        }
    }

    pub fn set_required_properties<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.required.write() = keys.into_iter().map(Into::into).collect();
    }

    pub fn add_required_property(&self, key: impl Into<String>) {
        let key = key.into();
        let mut required = self.required.write();
        if !required.contains(&key) {
            required.push(key);
        }
    }

    pub fn required_properties(&self) -> Vec<String> {
        self.required.read().clone()
    }

    /// Fails with every required key that has no value.
    pub fn validate_required_properties(&self) -> Result<()> {
        let missing: Vec<String> = self
            .required
            .read()
            .iter()
            .filter(|key| self.property(key).is_none())
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ContextError::MissingRequiredProperties { keys: missing })
        }
    }

    fn raw_property(&self, key: &str) -> Option<String> {
        self.sources.read().iter().find_map(|s| s.property(key))
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.sources.read().iter().any(|s| s.contains(key))
    }

    /// Looks up a key and resolves placeholders in its value.
    ///
    /// Nested placeholders that cannot be resolved are left as written.
    pub fn property(&self, key: &str) -> Option<String> {
        let raw = self.raw_property(key)?;
        Some(self.resolve(&raw, false, 0).unwrap_or(raw))
    }

    pub fn property_or(&self, key: &str, default: &str) -> String {
        self.property(key).unwrap_or_else(|| default.to_string())
    }

    /// Resolves `${...}` placeholders, leaving unresolvable ones untouched.
    pub fn resolve_placeholders(&self, text: &str) -> String {
        self.resolve(text, false, 0)
            .unwrap_or_else(|_| text.to_string())
    }

    /// Resolves `${...}` placeholders, failing on the first one without a value or default.
    pub fn resolve_required_placeholders(&self, text: &str) -> Result<String> {
        self.resolve(text, true, 0)
    }

    fn resolve(&self, text: &str, strict: bool, depth: usize) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        for segment in parse_template(text).iter() {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Placeholder { raw, .. } if depth >= MAX_PLACEHOLDER_DEPTH => {
                    return Err(ContextError::CircularPlaceholder { value: raw.clone() });
                }
                Segment::Placeholder { key, default, raw } => {
                    let resolved_key = self.resolve(key, strict, depth + 1)?;
                    match self.raw_property(&resolved_key) {
                        Some(value) => out.push_str(&self.resolve(&value, strict, depth + 1)?),
                        None => match default {
                            Some(default) => {
                                out.push_str(&self.resolve(default, strict, depth + 1)?)
                            }
                            None if strict => {
                                return Err(ContextError::UnresolvablePlaceholder {
                                    placeholder: resolved_key,
                                    value: text.to_string(),
                                });
                            }
                            None => out.push_str(raw),
                        },
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Literal(String),
    Placeholder {
        key: String,
        default: Option<String>,
        raw: String,
    },
}

static PLACEHOLDER_TEMPLATES: LazyLock<MetadataCache<String, Arc<[Segment]>>> =
    LazyLock::new(|| MetadataCache::new("placeholder-templates"));

pub(crate) fn placeholder_cache() -> &'static MetadataCache<String, Arc<[Segment]>> {
    &PLACEHOLDER_TEMPLATES
}

fn parse_template(text: &str) -> Arc<[Segment]> {
    if !text.contains(PLACEHOLDER_PREFIX) {
        return Arc::from(vec![Segment::Literal(text.to_string())]);
    }
    PLACEHOLDER_TEMPLATES.get_or_insert_with(text.to_string(), || Arc::from(split_segments(text)))
}

fn split_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
        let body_start = start + PLACEHOLDER_PREFIX.len();
        let Some(end) = matching_suffix(&rest[body_start..]) else {
            break;
        };
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let body = &rest[body_start..body_start + end];
        let (key, default) = split_default(body);
        segments.push(Segment::Placeholder {
            key: key.to_string(),
            default: default.map(str::to_string),
            raw: rest[start..=body_start + end].to_string(),
        });
        rest = &rest[body_start + end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    segments
}

/// Byte offset of the `}` closing a placeholder body, honoring nested `${`.
fn matching_suffix(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(PLACEHOLDER_PREFIX.as_bytes()) {
            depth += 1;
            i += PLACEHOLDER_PREFIX.len();
            continue;
        }
        if bytes[i] == PLACEHOLDER_SUFFIX as u8 {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
        }
        i += 1;
    }
    None
}

/// Splits `key:default` at the first separator outside nested placeholders.
fn split_default(body: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(PLACEHOLDER_PREFIX.as_bytes()) {
            depth += 1;
            i += PLACEHOLDER_PREFIX.len();
            continue;
        }
        match bytes[i] {
            b'}' if depth > 0 => depth -= 1,
            b':' if depth == 0 => return (&body[..i], Some(&body[i + VALUE_SEPARATOR.len_utf8()..])),
            _ => {}
        }
        i += 1;
    }
    (body, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(pairs: &[(&str, &str)]) -> Environment {
        let env = Environment::empty();
        env.add_last(MapPropertySource::from_pairs(
            "test",
            pairs.iter().map(|(k, v)| (*k, *v)),
        ));
        env
    }

    #[test]
    fn test_first_source_wins() {
        let env = env_with(&[("name", "low")]);
        env.add_first(MapPropertySource::from_pairs("high", [("name", "high")]));
        assert_eq!(env.property("name").as_deref(), Some("high"));
        assert_eq!(env.source_names(), vec!["high", "test"]);
    }

    #[test]
    fn test_placeholders_with_defaults_and_nesting() {
        let env = env_with(&[("host", "localhost"), ("port", "5432"), ("url", "${host}:${port}")]);
        assert_eq!(
            env.resolve_placeholders("db=${url}/${name:app}"),
            "db=localhost:5432/app"
        );
        assert_eq!(env.resolve_placeholders("${missing:${host}}"), "localhost");
        assert_eq!(env.property("url").as_deref(), Some("localhost:5432"));
    }

    #[test]
    fn test_unresolvable_placeholder_is_kept_or_rejected() {
        let env = env_with(&[]);
        assert_eq!(env.resolve_placeholders("a ${nope} b"), "a ${nope} b");
        let err = env.resolve_required_placeholders("a ${nope} b").unwrap_err();
        assert!(matches!(
            err,
            ContextError::UnresolvablePlaceholder { ref placeholder, .. } if placeholder == "nope"
        ));
    }

    #[test]
    fn test_self_referencing_placeholder_is_bounded() {
        let env = env_with(&[("loop", "${loop}")]);
        let err = env.resolve_required_placeholders("${loop}").unwrap_err();
        assert!(matches!(err, ContextError::CircularPlaceholder { ref value } if value == "${loop}"));
        assert_eq!(err.to_string(), "Circular placeholder reference in value \"${loop}\"");
        assert_eq!(env.property("loop").as_deref(), Some("${loop}"));
    }

    #[test]
    fn test_validate_required_properties_reports_all_missing() {
        let env = env_with(&[("present", "1")]);
        env.set_required_properties(["present", "a", "b"]);
        match env.validate_required_properties() {
            Err(ContextError::MissingRequiredProperties { keys }) => assert_eq!(keys, vec!["a", "b"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_merge_appends_parent_sources_after_local() {
        let parent = env_with(&[("shared", "parent"), ("only.parent", "yes")]);
        parent.add_last(MapPropertySource::from_pairs("parent-extra", [("x", "1")]));
        let child = Environment::empty();
        child.add_last(MapPropertySource::from_pairs("child", [("shared", "child")]));

        child.merge(&parent);

        assert_eq!(child.source_names(), vec!["child", "test", "parent-extra"]);
        assert_eq!(child.property("shared").as_deref(), Some("child"));
        assert_eq!(child.property("only.parent").as_deref(), Some("yes"));
    }

    #[test]
    fn test_system_environment_relaxed_names() {
        let source = SystemEnvironmentSource::from_vars([("DB_URL".to_string(), "pg://".to_string())]);
        assert_eq!(source.property("db.url").as_deref(), Some("pg://"));
        assert_eq!(source.property("db-url").as_deref(), Some("pg://"));
        assert!(source.property("db.user").is_none());
    }

    #[test]
    fn test_json_source_flattens_nested_documents() {
        let source = JsonPropertySource::from_json_str(
            "app",
            r#"{"server": {"port": 8080, "hosts": ["a", "b"]}, "debug": true}"#,
        )
        .unwrap();
        assert_eq!(source.property("server.port").as_deref(), Some("8080"));
        assert_eq!(source.property("server.hosts[1]").as_deref(), Some("b"));
        assert_eq!(source.property("debug").as_deref(), Some("true"));
    }

    #[test]
    fn test_template_parsing() {
        assert_eq!(
            split_segments("x${a:b}y"),
            vec![
                Segment::Literal("x".into()),
                Segment::Placeholder {
                    key: "a".into(),
                    default: Some("b".into()),
                    raw: "${a:b}".into()
                },
                Segment::Literal("y".into()),
            ]
        );
        assert_eq!(split_segments("${open"), vec![Segment::Literal("${open".into())]);
    }
}
