use crate::types::ActiveCall;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory map of active calls keyed by provider call id.
///
/// Cloning shares the same map. The lock is never held across an await point; readers get owned
/// copies.
#[derive(Clone, Default)]
pub struct CallRegistry {
    calls: Arc<Mutex<HashMap<String, ActiveCall>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<String, ActiveCall>> {
        // a panic while holding the guard leaves the map itself intact
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace the entry for `call.call_id`.
    pub fn insert(&self, call: ActiveCall) {
        self.calls().insert(call.call_id.clone(), call);
    }

    pub fn get(&self, call_id: &str) -> Option<ActiveCall> {
        self.calls().get(call_id).cloned()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls().contains_key(call_id)
    }

    /// Whether some active call was handed `control_url` by the provider.
    pub fn has_control_url(&self, control_url: &str) -> bool {
        self.calls()
            .values()
            .any(|c| c.control_url.as_deref() == Some(control_url))
    }

    /// All active calls, oldest first.
    pub fn snapshot(&self) -> Vec<ActiveCall> {
        let mut calls: Vec<ActiveCall> = self.calls().values().cloned().collect();
        calls.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        calls
    }

    pub fn len(&self) -> usize {
        self.calls().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a call as ended at `now` and compute its duration.
    ///
    /// Returns the updated entry on the first transition only; unknown or already-ended calls
    /// yield `None`.
    pub fn mark_ended(&self, call_id: &str, now: f64) -> Option<ActiveCall> {
        let mut calls = self.calls();
        let call = calls.get_mut(call_id)?;
        if call.ended {
            return None;
        }
        call.ended = true;
        call.end_time = Some(now);
        call.duration = Some((now - call.start_time).max(0.0));
        Some(call.clone())
    }

    /// Remove a call. Removing an absent call is a no-op.
    pub fn remove(&self, call_id: &str) -> Option<ActiveCall> {
        self.calls().remove(call_id)
    }

    /// Append a transcript segment and, when given, replace the running grade.
    ///
    /// Returns the accumulated transcript, or `None` for an unknown call.
    pub fn record_transcription(
        &self,
        call_id: &str,
        segment: Option<&str>,
        grade: Option<&str>,
    ) -> Option<String> {
        let mut calls = self.calls();
        let call = calls.get_mut(call_id)?;
        if let Some(segment) = segment.map(str::trim).filter(|s| !s.is_empty()) {
            call.transcription.segments.push(segment.to_string());
        }
        if let Some(grade) = grade {
            call.transcription.grade = Some(grade.to_string());
            call.current_grade = Some(grade.to_string());
        }
        Some(call.transcription.transcript())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, start: f64) -> ActiveCall {
        ActiveCall::new(
            id.to_string(),
            "asst_1".to_string(),
            format!("student {id}"),
            format!("wss://listen/{id}"),
            start,
        )
    }

    #[test]
    fn empty_registry_lists_nothing() {
        let registry = CallRegistry::new();
        assert!(registry.snapshot().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn insert_keys_by_call_id_and_replaces() {
        let registry = CallRegistry::new();
        registry.insert(call("a", 1.0));
        registry.insert(call("a", 2.0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().start_time, 2.0);
    }

    #[test]
    fn snapshot_is_ordered_and_detached() {
        let registry = CallRegistry::new();
        registry.insert(call("b", 20.0));
        registry.insert(call("a", 10.0));
        let snapshot = registry.snapshot();
        registry.remove("a");

        let ids: Vec<&str> = snapshot.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mark_ended_transitions_once() {
        let registry = CallRegistry::new();
        registry.insert(call("a", 100.0));

        let ended = registry.mark_ended("a", 145.5).unwrap();
        assert!(ended.ended);
        assert_eq!(ended.end_time, Some(145.5));
        assert_eq!(ended.duration, Some(45.5));

        assert!(registry.mark_ended("a", 200.0).is_none());
        assert_eq!(registry.get("a").unwrap().end_time, Some(145.5));
        assert!(registry.mark_ended("missing", 1.0).is_none());
    }

    #[test]
    fn control_urls_are_matched_exactly() {
        let registry = CallRegistry::new();
        let mut tracked = call("a", 1.0);
        tracked.control_url = Some("https://control/a".into());
        registry.insert(tracked);
        registry.insert(call("b", 2.0));

        assert!(registry.has_control_url("https://control/a"));
        assert!(!registry.has_control_url("https://control/a/../b"));
        assert!(!registry.has_control_url(""));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = CallRegistry::new();
        registry.insert(call("a", 1.0));
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn transcription_accumulates_with_the_call() {
        let registry = CallRegistry::new();
        registry.insert(call("a", 1.0));
        registry.record_transcription("a", Some("hola"), None);
        let transcript = registry
            .record_transcription("a", Some(" me llamo Ana "), Some("B"))
            .unwrap();
        assert_eq!(transcript, "hola me llamo Ana");
        assert_eq!(registry.get("a").unwrap().current_grade.as_deref(), Some("B"));
        assert!(registry.record_transcription("zzz", Some("x"), None).is_none());

        registry.remove("a");
        registry.insert(call("a", 2.0));
        assert!(registry.get("a").unwrap().transcription.segments.is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_entries() {
        let registry = CallRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.insert(call(&format!("{i}-{j}"), j as f64));
                        registry.snapshot();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
    }
}
