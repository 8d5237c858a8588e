//! Reading and writing the dashboard document.
//!
//! Loading never fails: a missing, unreadable or malformed document decodes
//! to the empty default and asks the caller to write it back, so storage
//! heals itself into a well-formed document.

use crate::error::StorageError;
use crate::model::{DashboardState, StoredDocument};
use crate::storage::{KeyValueStore, DASHBOARD_KEY};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub state: DashboardState,
    /// Set when the stored form differs from the canonical form.
    pub should_persist: bool,
}

pub fn decode(raw: Option<&str>) -> Loaded {
    let Some(raw) = raw else {
        return Loaded::fresh_default();
    };
    let stored: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "dashboard document is not valid JSON");
            return Loaded::fresh_default();
        }
    };
    let Some(document) = StoredDocument::from_value(stored.clone()) else {
        debug!("dashboard document is not an object");
        return Loaded::fresh_default();
    };
    let state = document.migrate();
    let should_persist = match serde_json::to_value(&state) {
        Ok(canonical) => canonical != stored,
        Err(_) => true,
    };
    Loaded {
        state,
        should_persist,
    }
}

pub fn encode(state: &DashboardState) -> Result<String, StorageError> {
    serde_json::to_string(state).map_err(|source| StorageError::Encode {
        key: DASHBOARD_KEY.to_string(),
        source,
    })
}

pub fn load(store: &dyn KeyValueStore) -> Loaded {
    match store.get(DASHBOARD_KEY) {
        Ok(raw) => decode(raw.as_deref()),
        Err(err) => {
            warn!(error = %err, "dashboard unreadable, starting from defaults");
            Loaded::fresh_default()
        }
    }
}

pub fn save(store: &dyn KeyValueStore, state: &DashboardState) -> Result<(), StorageError> {
    let encoded = encode(state)?;
    store.set(DASHBOARD_KEY, &encoded)
}

/// Load, then write back the canonical form if the loader asked for it.
pub fn hydrate(store: &dyn KeyValueStore) -> DashboardState {
    let loaded = load(store);
    if loaded.should_persist {
        if let Err(err) = save(store, &loaded.state) {
            warn!(error = %err, "could not re-persist dashboard");
        }
    }
    loaded.state
}

impl Loaded {
    fn fresh_default() -> Self {
        Loaded {
            state: DashboardState::default(),
            should_persist: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use crate::storage::MemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn missing_document_defaults_and_asks_to_persist() {
        let loaded = decode(None);
        assert_eq!(loaded.state, DashboardState::default());
        assert!(loaded.should_persist);
    }

    #[test]
    fn corrupt_document_defaults_and_asks_to_persist() {
        for raw in ["{not json", "[]", "null", "42", "\"text\""] {
            let loaded = decode(Some(raw));
            assert_eq!(loaded.state, DashboardState::default(), "input {raw}");
            assert!(loaded.should_persist, "input {raw}");
        }
    }

    #[test]
    fn default_persists_once() {
        let store = MemoryStore::new();
        let first = load(&store);
        assert!(first.should_persist);
        save(&store, &first.state).unwrap();

        let second = load(&store);
        assert_eq!(second.state, DashboardState::default());
        assert!(!second.should_persist);
    }

    #[test]
    fn legacy_document_is_dirty_once() {
        let raw = json!({"tasks": ["buy milk"], "notes": ["a", "b"], "links": []}).to_string();
        let loaded = decode(Some(&raw));
        assert!(loaded.should_persist);
        assert_eq!(loaded.state.tasks, vec![Task::new("buy milk")]);
        assert_eq!(loaded.state.notes, "a\nb");

        let rewritten = encode(&loaded.state).unwrap();
        let again = decode(Some(&rewritten));
        assert!(!again.should_persist);
        assert_eq!(again.state, loaded.state);
    }

    #[test]
    fn hydrate_survives_failing_store() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert_eq!(hydrate(&store), DashboardState::default());
    }

    #[test]
    fn failed_save_leaves_state_alone() {
        let store = MemoryStore::new();
        let mut state = DashboardState::default();
        state.tasks.push(Task::new("keep me"));
        store.set_failing(true);
        assert!(save(&store, &state).is_err());
        assert_eq!(state.tasks, vec![Task::new("keep me")]);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[ a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                (
                    prop::sample::select(vec!["text", "completed", "x"]),
                    inner
                )
                    .prop_map(|(k, v)| json!({ k: v })),
            ]
        })
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            tasks in arb_json(),
            notes in arb_json(),
            links in arb_json(),
        ) {
            let raw = json!({"tasks": tasks, "notes": notes, "links": links}).to_string();
            let once = decode(Some(&raw)).state;
            let twice = decode(Some(&encode(&once).unwrap()));
            prop_assert_eq!(&twice.state, &once);
            prop_assert!(!twice.should_persist);
        }
    }
}
