/// Webhook route table using ArcSwap
///
/// Maps a normalised webhook path to the trigger nodes listening on it. The HTTP
/// layer reads it lock-free on every request; registration swaps in a new map.

use crate::triggers::spec::normalize_webhook_path;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// One trigger node listening on a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub flow_id: String,
    pub node_id: String,
    /// Upper-case method filter; `None` accepts any method
    pub method: Option<String>,
}

#[derive(Debug)]
pub struct WebhookRoutes {
    routes: ArcSwap<HashMap<String, Vec<WebhookTarget>>>,
}

impl WebhookRoutes {
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    pub fn insert(&self, path: &str, target: WebhookTarget) {
        let path = normalize_webhook_path(path);
        self.routes.rcu(|current| {
            let mut next = HashMap::clone(current);
            let targets = next.entry(path.clone()).or_default();
            targets.retain(|t| !(t.flow_id == target.flow_id && t.node_id == target.node_id));
            targets.push(target.clone());
            Arc::new(next)
        });
        tracing::debug!("🔗 Webhook route /webhook/{} -> {}:{}", path, target.flow_id, target.node_id);
    }

    pub fn remove(&self, path: &str, flow_id: &str, node_id: &str) {
        let path = normalize_webhook_path(path);
        self.routes.rcu(|current| {
            let mut next = HashMap::clone(current);
            if let Some(targets) = next.get_mut(&path) {
                targets.retain(|t| !(t.flow_id == flow_id && t.node_id == node_id));
                if targets.is_empty() {
                    next.remove(&path);
                }
            }
            Arc::new(next)
        });
    }

    /// Targets listening on `path` that accept `method`
    pub fn lookup(&self, path: &str, method: &str) -> Vec<WebhookTarget> {
        let path = normalize_webhook_path(path);
        let method = method.to_uppercase();
        self.routes
            .load()
            .get(&path)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| t.method.as_deref().map(|m| m == method).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether anything listens on `path`, regardless of method
    pub fn has_path(&self, path: &str) -> bool {
        self.routes.load().contains_key(&normalize_webhook_path(path))
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.load().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Default for WebhookRoutes {
    fn default() -> Self {
        Self::new()
    }
}
