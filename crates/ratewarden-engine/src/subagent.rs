//! Component C8 — maps a subagent session to its root session for
//! hierarchical fallback (spec §4.8).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use ratewarden_core::{Clock, SessionId};

#[derive(Debug, Clone, PartialEq)]
pub enum SubagentFallbackState {
    Idle,
    InProgress,
    Completed,
}

#[derive(Debug, Clone)]
pub struct SubagentEntry {
    pub fallback_state: SubagentFallbackState,
    pub last_activity: DateTime<Utc>,
}

/// The full hierarchy rooted at one session: every subagent registered
/// under it, plus whatever fallback state is currently shared.
#[derive(Debug, Clone)]
pub struct SessionHierarchy {
    pub root_session_id: SessionId,
    pub subagents: HashMap<SessionId, SubagentEntry>,
}

struct Inner {
    /// Every session ID (subagent or root) maps to its root.
    parent_of_root: HashMap<SessionId, SessionId>,
    hierarchies: HashMap<SessionId, SessionHierarchy>,
}

pub struct SubagentTracker {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl SubagentTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                parent_of_root: HashMap::new(),
                hierarchies: HashMap::new(),
            }),
            clock,
        }
    }

    /// Register `child` as a subagent of `parent`. If `parent` is itself a
    /// subagent, the child is attached to `parent`'s root instead, keeping
    /// the hierarchy flat (one root, N subagents).
    pub fn register_subagent(&self, child: &SessionId, parent: &SessionId) {
        let mut inner = self.inner.write();
        let root = inner
            .parent_of_root
            .get(parent)
            .cloned()
            .unwrap_or_else(|| parent.clone());

        inner.parent_of_root.insert(parent.clone(), root.clone());
        inner.parent_of_root.insert(child.clone(), root.clone());

        let now = self.clock.now();
        let hierarchy = inner
            .hierarchies
            .entry(root.clone())
            .or_insert_with(|| SessionHierarchy {
                root_session_id: root.clone(),
                subagents: HashMap::new(),
            });
        hierarchy.subagents.insert(
            child.clone(),
            SubagentEntry {
                fallback_state: SubagentFallbackState::Idle,
                last_activity: now,
            },
        );
    }

    /// Walk `any` to its root session. Returns `any` itself if it isn't
    /// tracked as part of any hierarchy.
    pub fn get_root_session(&self, any: &SessionId) -> SessionId {
        self.inner
            .read()
            .parent_of_root
            .get(any)
            .cloned()
            .unwrap_or_else(|| any.clone())
    }

    pub fn get_hierarchy(&self, any: &SessionId) -> Option<SessionHierarchy> {
        let root = self.get_root_session(any);
        self.inner.read().hierarchies.get(&root).cloned()
    }

    /// Mark every subagent in `root`'s hierarchy as having completed
    /// fallback (spec §4.11: "propagates the new model... and marks their
    /// fallbackState = completed").
    pub fn mark_hierarchy_completed(&self, root: &SessionId) {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        if let Some(hierarchy) = inner.hierarchies.get_mut(root) {
            for entry in hierarchy.subagents.values_mut() {
                entry.fallback_state = SubagentFallbackState::Completed;
                entry.last_activity = now;
            }
        }
    }

    /// Drop every tracked hierarchy (engine teardown).
    pub fn clear_all(&self) {
        let mut inner = self.inner.write();
        inner.parent_of_root.clear();
        inner.hierarchies.clear();
    }

    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let mut emptied_roots = Vec::new();
        for (root, hierarchy) in inner.hierarchies.iter_mut() {
            hierarchy.subagents.retain(|_, entry| {
                (now - entry.last_activity).num_milliseconds().max(0) as u64 <= ttl_ms
            });
            if hierarchy.subagents.is_empty() {
                emptied_roots.push(root.clone());
            }
        }
        for root in emptied_roots {
            inner.hierarchies.remove(&root);
        }
        // drop parent_of_root pointers whose hierarchy no longer exists,
        // except the root->root identity entries which are harmless no-ops.
        let live_roots: std::collections::HashSet<SessionId> =
            inner.hierarchies.keys().cloned().collect();
        inner
            .parent_of_root
            .retain(|child, root| child == root || live_roots.contains(root));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewarden_core::TestClock;

    fn tracker() -> SubagentTracker {
        SubagentTracker::new(Arc::new(TestClock::new(Utc::now())))
    }

    #[test]
    fn untracked_session_is_its_own_root() {
        let t = tracker();
        assert_eq!(t.get_root_session(&"s1".to_string()), "s1".to_string());
    }

    #[test]
    fn register_subagent_resolves_to_root() {
        let t = tracker();
        t.register_subagent(&"child".to_string(), &"root".to_string());
        assert_eq!(t.get_root_session(&"child".to_string()), "root".to_string());
    }

    #[test]
    fn nested_subagent_attaches_to_same_root() {
        let t = tracker();
        t.register_subagent(&"mid".to_string(), &"root".to_string());
        t.register_subagent(&"leaf".to_string(), &"mid".to_string());
        assert_eq!(t.get_root_session(&"leaf".to_string()), "root".to_string());

        let hierarchy = t.get_hierarchy(&"root".to_string()).unwrap();
        assert!(hierarchy.subagents.contains_key(&"mid".to_string()));
        assert!(hierarchy.subagents.contains_key(&"leaf".to_string()));
    }

    /// Property P8 from spec §8 — shape check; the actual model write is the
    /// orchestrator's job, this only verifies every subagent is reachable
    /// and markable as completed together.
    #[test]
    fn p8_hierarchy_propagation_marks_every_subagent() {
        let t = tracker();
        t.register_subagent(&"a".to_string(), &"root".to_string());
        t.register_subagent(&"b".to_string(), &"root".to_string());
        t.mark_hierarchy_completed(&"root".to_string());

        let hierarchy = t.get_hierarchy(&"root".to_string()).unwrap();
        for entry in hierarchy.subagents.values() {
            assert_eq!(entry.fallback_state, SubagentFallbackState::Completed);
        }
    }

    #[test]
    fn cleanup_drops_stale_subagents() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let t = SubagentTracker::new(clock.clone());
        t.register_subagent(&"child".to_string(), &"root".to_string());

        clock.set(start + chrono::Duration::milliseconds(5000));
        t.cleanup_stale_entries(1000);

        assert!(t.get_hierarchy(&"root".to_string()).is_none());
    }
}
