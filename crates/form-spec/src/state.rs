//! Canonical session state and its publish/subscribe store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

/// Item id → ordered list of messages.
pub type ErrorMap = BTreeMap<String, Vec<String>>;

/// A choice after its rules have been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedChoice {
    pub value: Value,
    pub label: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

impl ResolvedChoice {
    pub fn selectable(&self) -> bool {
        self.visible && !self.disabled
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormState {
    /// Answer id → value.
    pub values: Map<String, Value>,
    /// Item id → visible.
    pub visibility: BTreeMap<String, bool>,
    /// Item id → read-only.
    pub read_only: BTreeMap<String, bool>,
    pub errors: ErrorMap,
    /// Server errors whose field maps to no item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form_errors: Vec<String>,
    /// Item id → resolved choice list.
    pub choices: BTreeMap<String, Vec<ResolvedChoice>>,
    pub current_view: String,
    pub completed_views: BTreeSet<String>,
    /// Incremented on every commit.
    pub revision: u64,
}

impl FormState {
    pub fn value(&self, answer_id: &str) -> Option<&Value> {
        self.values.get(answer_id)
    }

    /// Items without a computed visibility are treated as visible.
    pub fn is_visible(&self, item_id: &str) -> bool {
        self.visibility.get(item_id).copied().unwrap_or(true)
    }

    pub fn is_read_only(&self, item_id: &str) -> bool {
        self.read_only.get(item_id).copied().unwrap_or(false)
    }

    pub fn has_errors(&self) -> bool {
        !self.form_errors.is_empty() || self.errors.values().any(|messages| !messages.is_empty())
    }

    /// Replaces an item's messages wholesale; an empty list removes the entry.
    pub fn replace_errors(&mut self, item_id: &str, messages: Vec<String>) {
        if messages.is_empty() {
            self.errors.remove(item_id);
        } else {
            self.errors.insert(item_id.to_string(), messages);
        }
    }

    /// Adds messages to an item without dropping existing ones.
    pub fn merge_errors(&mut self, item_id: &str, messages: impl IntoIterator<Item = String>) {
        let entry = self.errors.entry(item_id.to_string()).or_default();
        for message in messages {
            if !entry.contains(&message) {
                entry.push(message);
            }
        }
        if entry.is_empty() {
            self.errors.remove(item_id);
        }
    }
}

/// Holds the latest committed [`FormState`] and notifies subscribers with
/// immutable snapshots.
#[derive(Debug)]
pub struct Store {
    current: Arc<FormState>,
    sender: watch::Sender<Arc<FormState>>,
}

impl Store {
    pub fn new(initial: FormState) -> Self {
        let current = Arc::new(initial);
        let (sender, _) = watch::channel(current.clone());
        Self { current, sender }
    }

    pub fn snapshot(&self) -> Arc<FormState> {
        self.current.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FormState>> {
        self.sender.subscribe()
    }

    /// Working copy for the single writer; nothing is visible until
    /// [`Store::commit`].
    pub fn draft(&self) -> FormState {
        (*self.current).clone()
    }

    pub fn commit(&mut self, mut next: FormState) -> Arc<FormState> {
        if next == *self.current {
            return self.current.clone();
        }
        next.revision = self.current.revision + 1;
        self.current = Arc::new(next);
        self.sender.send_replace(self.current.clone());
        self.current.clone()
    }
}
