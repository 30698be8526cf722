//! # Session State
//!
//! Each transport session owns an in-memory registry of tool bindings and
//! documentation resources, populated by `find_tools` and cleared on the
//! next `find_tools` call or when the session's TTL lapses. A binding is
//! never visible to any other session; only the global baseline
//! (`find_tools` itself) is shared.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};
use uuid::Uuid;

/// A callable binding installed into a session by `find_tools`.
#[derive(Debug, Clone)]
pub struct ToolBinding {
    pub tool_id: String,
    pub title: String,
    pub description: String,
    pub input_schema: Arc<Map<String, Value>>,
}

/// A per-tool documentation resource scoped to a session.
#[derive(Debug, Clone)]
pub struct DocResource {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub text: String,
}

/// One client session's registry.
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    bindings: RwLock<HashMap<String, ToolBinding>>,
    resources: RwLock<HashMap<String, DocResource>>,
    last_touch: Mutex<Instant>,
    ttl: Duration,
}

impl SessionState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bindings: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            last_touch: Mutex::new(Instant::now()),
            ttl,
        }
    }

    pub fn touch(&self) {
        *self.last_touch.lock().unwrap() = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_touch.lock().unwrap().elapsed() > self.ttl
    }

    /// Drop every non-baseline binding and resource.
    pub fn clear(&self) {
        self.bindings.write().unwrap().clear();
        self.resources.write().unwrap().clear();
    }

    pub fn insert_binding(&self, name: impl Into<String>, binding: ToolBinding) {
        self.bindings.write().unwrap().insert(name.into(), binding);
    }

    pub fn binding(&self, name: &str) -> Option<ToolBinding> {
        self.bindings.read().unwrap().get(name).cloned()
    }

    pub fn bindings_snapshot(&self) -> Vec<(String, ToolBinding)> {
        let mut entries: Vec<_> = self
            .bindings
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn insert_resource(&self, resource: DocResource) {
        self.resources
            .write()
            .unwrap()
            .insert(resource.uri.clone(), resource);
    }

    pub fn resource(&self, uri: &str) -> Option<DocResource> {
        self.resources.read().unwrap().get(uri).cloned()
    }

    pub fn resources_snapshot(&self) -> Vec<DocResource> {
        let mut entries: Vec<_> = self.resources.read().unwrap().values().cloned().collect();
        entries.sort_by(|a, b| a.uri.cmp(&b.uri));
        entries
    }
}

/// Tracks every live session so expired ones can be swept.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionState>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Create and track a fresh session.
    pub fn create(&self) -> Arc<SessionState> {
        let session = Arc::new(SessionState::new(self.ttl));
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Clear bindings of expired sessions and forget them.
    pub fn sweep_expired(&self) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            if let Some((_, session)) = self.sessions.remove(&id) {
                tracing::debug!(session_id = %id, "session expired");
                session.clear();
            }
        }
    }

    /// Start the periodic TTL sweeper.
    pub fn start_background_sweeper(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                self.sweep_expired();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(tool_id: &str) -> ToolBinding {
        ToolBinding {
            tool_id: tool_id.to_string(),
            title: tool_id.to_string(),
            description: String::new(),
            input_schema: Arc::new(Map::new()),
        }
    }

    #[test]
    fn bindings_are_scoped_to_their_session() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let a = registry.create();
        let b = registry.create();

        a.insert_binding("fastqc", binding("t1"));
        assert!(a.binding("fastqc").is_some());
        assert!(b.binding("fastqc").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clear_drops_bindings_and_resources() {
        let session = SessionState::new(Duration::from_secs(60));
        session.insert_binding("x", binding("t1"));
        session.insert_resource(DocResource {
            uri: "resource://documentation/x".to_string(),
            name: "x Documentation".to_string(),
            description: String::new(),
            text: "docs".to_string(),
        });

        session.clear();
        assert!(session.binding("x").is_none());
        assert!(session.resources_snapshot().is_empty());
    }

    #[test]
    fn sweeper_clears_expired_sessions() {
        let registry = SessionRegistry::new(Duration::from_millis(0));
        let session = registry.create();
        session.insert_binding("x", binding("t1"));

        std::thread::sleep(Duration::from_millis(5));
        registry.sweep_expired();

        assert_eq!(registry.len(), 0);
        assert!(session.binding("x").is_none());
    }
}
