use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::info;
use uuid::Uuid;

use crate::game::rules::{ChessRules, RulesEngine};
use crate::models::clock::TimeControl;
use crate::models::match_state::MatchState;

/// How long both slots may stay disconnected before the match is swept.
pub const ABANDON_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
#[error("unknown time control selection: {0}")]
pub struct InvalidTimeControlError(pub u64);

/// Process-wide table of live matches, constructed once at startup and
/// handed to the connection-accept path. Each match sits behind its own
/// mutex, so operations on one match are serialized while distinct
/// matches proceed in parallel. Also owns the rules collaborator shared
/// by all matches.
pub struct SessionRegistry {
    matches: Mutex<HashMap<String, Arc<Mutex<MatchState>>>>,
    rules: Arc<dyn RulesEngine>,
}

impl SessionRegistry {
    pub fn new(rules: Arc<dyn RulesEngine>) -> Self {
        SessionRegistry {
            matches: Mutex::new(HashMap::new()),
            rules,
        }
    }

    pub fn rules(&self) -> Arc<dyn RulesEngine> {
        Arc::clone(&self.rules)
    }

    /// Allocates a fresh match for the given catalog selector and returns
    /// its id.
    pub fn create(&self, selection: u64) -> Result<String, InvalidTimeControlError> {
        let control =
            TimeControl::from_selection(selection).ok_or(InvalidTimeControlError(selection))?;
        let id = Uuid::new_v4().to_string();
        let state = MatchState::new(id.clone(), control);
        self.matches
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::new(Mutex::new(state)));
        info!("created match {id} (time selection {selection})");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<MatchState>>> {
        self.matches.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.matches.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes matches whose slots have all been disconnected for longer
    /// than `grace`. Returns how many were dropped.
    pub fn sweep(&self, now: Instant, grace: Duration) -> usize {
        let mut table = self.matches.lock().unwrap();
        let before = table.len();
        table.retain(|id, state| {
            let keep = match state.lock().unwrap().abandoned_for(now) {
                Some(idle) => idle < grace,
                None => true,
            };
            if !keep {
                info!("sweeping abandoned match {id}");
            }
            keep
        });
        before - table.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new(Arc::new(ChessRules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_validates_the_catalog() {
        let registry = SessionRegistry::default();
        let id = registry.create(1).unwrap();
        assert!(registry.get(&id).is_some());

        let err = registry.create(7).unwrap_err();
        assert_eq!(err.0, 7);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_unknown_match_is_none() {
        let registry = SessionRegistry::default();
        assert!(registry.get("no-such-match").is_none());
    }

    #[test]
    fn sweep_drops_never_joined_matches_after_grace() {
        let registry = SessionRegistry::default();
        let id = registry.create(0).unwrap();
        assert!(!registry.is_empty());
        // Still inside the grace window.
        assert_eq!(registry.sweep(Instant::now(), Duration::from_secs(60)), 0);
        assert!(registry.get(&id).is_some());
        // Window elapsed.
        assert_eq!(registry.sweep(Instant::now(), Duration::ZERO), 1);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }
}
