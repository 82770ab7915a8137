use crate::di::Bean;
use crate::interceptor::ConstructionInterceptor;
use std::time::Instant;
use dashmap::DashMap;

/// An interceptor that logs component initialization and its timing
#[derive(Default)]
pub struct LoggingInterceptor {
    started: DashMap<String, Instant>,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConstructionInterceptor for LoggingInterceptor {
    fn before_initialization(&self, bean: Bean, name: &str) -> anyhow::Result<Bean> {
        tracing::debug!(component = name, "--> initializing");
        self.started.insert(name.to_string(), Instant::now());
        Ok(bean)
    }

    fn after_initialization(&self, bean: Bean, name: &str) -> anyhow::Result<Bean> {
        match self.started.remove(name) {
            Some((_, start)) => {
                tracing::debug!(component = name, elapsed = ?start.elapsed(), "<-- initialized")
            }
            None => tracing::debug!(component = name, "<-- initialized"),
        }
        Ok(bean)
    }

    fn early_reference(&self, bean: Bean, name: &str) -> anyhow::Result<Bean> {
        tracing::debug!(component = name, "<-> early reference handed out");
        Ok(bean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_logging_interceptor_passes_instance_through() {
        let interceptor = LoggingInterceptor::new();
        let bean: Bean = Arc::new(7u32);

        let before = interceptor.before_initialization(Arc::clone(&bean), "n").unwrap();
        let after = interceptor.after_initialization(before, "n").unwrap();

        assert!(Arc::ptr_eq(&bean, &after));
        assert!(interceptor.started.is_empty());
    }
}
