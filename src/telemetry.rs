use std::collections::HashMap;

/// Namespaced counters and gauges. Names are qualified with the namespace on
/// the way in, so `prepare.accepted` on namespace `concord.node.a` is stored
/// as `concord.node.a.prepare.accepted`.
#[derive(Debug)]
pub struct MetricsRegistry {
    namespace: String,
    counters: HashMap<String, u64>,
    gauges: HashMap<String, u64>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counters: HashMap::new(),
            gauges: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, delta: u64) -> u64 {
        let key = self.qualify(name.into());
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: u64) {
        let key = self.qualify(name.into());
        self.gauges.insert(key, value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
        }
    }

    fn qualify(&self, name: String) -> String {
        let namespace = if self.namespace.ends_with('.') {
            self.namespace.clone()
        } else {
            format!("{}.", self.namespace)
        };
        if name.starts_with(&namespace) {
            name
        } else {
            format!("{}{}", namespace, name)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }
}
