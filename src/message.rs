//! Message catalogs.
//!
//! A [`MessageSource`] resolves a message code for a locale, formatting
//! positional `{0}`-style arguments into the result. Sources form a chain:
//! a code a source cannot resolve is looked up in its parent.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

pub trait MessageSource: Send + Sync {
    /// Resolves `code` for `locale`, or `None` when neither this source nor
    /// its parents know the code.
    fn resolve(&self, code: &str, args: &[&str], locale: &str) -> Option<String>;

    fn parent(&self) -> Option<Arc<dyn MessageSource>> {
        None
    }

    /// Installs a parent. Returns false if this source does not support one.
    fn set_parent(&self, _parent: Arc<dyn MessageSource>) -> bool {
        false
    }
}

/// Resolves nothing itself and delegates every code to its parent.
///
/// Installed when a context defines no message source of its own.
#[derive(Default)]
pub struct DelegatingMessageSource {
    parent: RwLock<Option<Arc<dyn MessageSource>>>,
}

impl DelegatingMessageSource {
    pub fn new(parent: Option<Arc<dyn MessageSource>>) -> Self {
        Self {
            parent: RwLock::new(parent),
        }
    }
}

impl MessageSource for DelegatingMessageSource {
    fn resolve(&self, code: &str, args: &[&str], locale: &str) -> Option<String> {
        let parent = self.parent.read().clone();
        parent.and_then(|parent| parent.resolve(code, args, locale))
    }

    fn parent(&self) -> Option<Arc<dyn MessageSource>> {
        self.parent.read().clone()
    }

    fn set_parent(&self, parent: Arc<dyn MessageSource>) -> bool {
        *self.parent.write() = Some(parent);
        true
    }
}

/// An in-memory catalog keyed by code and locale.
///
/// Lookup tries the exact locale (`de_AT`), then its language (`de`), then
/// messages registered for the empty locale.
#[derive(Default)]
pub struct StaticMessageSource {
    messages: DashMap<(String, String), String>,
    parent: RwLock<Option<Arc<dyn MessageSource>>>,
}

impl StaticMessageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, code: impl Into<String>, locale: impl Into<String>, template: impl Into<String>) {
        self.messages
            .insert((code.into(), locale.into()), template.into());
    }

    pub fn with_message(self, code: &str, locale: &str, template: &str) -> Self {
        self.add_message(code, locale, template);
        self
    }

    fn template(&self, code: &str, locale: &str) -> Option<String> {
        let language = locale.split(['_', '-']).next().unwrap_or(locale);
        [locale, language, ""]
            .into_iter()
            .find_map(|candidate| {
                self.messages
                    .get(&(code.to_string(), candidate.to_string()))
                    .map(|template| template.value().clone())
            })
    }
}

impl MessageSource for StaticMessageSource {
    fn resolve(&self, code: &str, args: &[&str], locale: &str) -> Option<String> {
        match self.template(code, locale) {
            Some(template) => Some(format_message(&template, args)),
            None => {
                let parent = self.parent.read().clone();
                parent.and_then(|parent| parent.resolve(code, args, locale))
            }
        }
    }

    fn parent(&self) -> Option<Arc<dyn MessageSource>> {
        self.parent.read().clone()
    }

    fn set_parent(&self, parent: Arc<dyn MessageSource>) -> bool {
        *self.parent.write() = Some(parent);
        true
    }
}

/// Replaces `{0}`, `{1}`, ... with the matching argument. Indexes without an
/// argument are left as written.
pub fn format_message(template: &str, args: &[&str]) -> String {
    if args.is_empty() {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            let arg = args.get(index)?;
            Some((arg, close))
        });
        match substituted {
            Some((arg, close)) => {
                out.push_str(arg);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_fallback() {
        let source = StaticMessageSource::new()
            .with_message("greeting", "", "Hello {0}")
            .with_message("greeting", "de", "Hallo {0}")
            .with_message("greeting", "de_AT", "Servus {0}");

        assert_eq!(source.resolve("greeting", &["Ana"], "de_AT").as_deref(), Some("Servus Ana"));
        assert_eq!(source.resolve("greeting", &["Ana"], "de_DE").as_deref(), Some("Hallo Ana"));
        assert_eq!(source.resolve("greeting", &["Ana"], "fr").as_deref(), Some("Hello Ana"));
        assert_eq!(source.resolve("missing", &[], "fr"), None);
    }

    #[test]
    fn test_parent_chain() {
        let parent: Arc<dyn MessageSource> =
            Arc::new(StaticMessageSource::new().with_message("app.name", "", "Mesh"));
        let child = StaticMessageSource::new().with_message("local", "", "here");
        assert!(child.set_parent(Arc::clone(&parent)));

        assert_eq!(child.resolve("app.name", &[], "en").as_deref(), Some("Mesh"));
        assert_eq!(child.resolve("local", &[], "en").as_deref(), Some("here"));

        let delegating = DelegatingMessageSource::new(None);
        assert_eq!(delegating.resolve("app.name", &[], "en"), None);
        delegating.set_parent(parent);
        assert_eq!(delegating.resolve("app.name", &[], "en").as_deref(), Some("Mesh"));
    }

    #[test]
    fn test_format_message() {
        assert_eq!(format_message("{1} before {0}", &["a", "b"]), "b before a");
        assert_eq!(format_message("{x} and {5}", &["a"]), "{x} and {5}");
        assert_eq!(format_message("no args {0}", &[]), "no args {0}");
    }
}
