use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tracing::{debug, instrument, warn};

use crate::compiled::{CompiledForm, CompiledView};
use crate::engine::{Engine, PassReport, Trigger, initial_values, view_visible};
use crate::expr::{Evaluator, Limits};
use crate::navigation::{FieldError, NavigationError};
use crate::state::{ErrorMap, FormState, Store};
use crate::submission::assemble_in_views;
use crate::validate::{Scope, apply_errors, validate_items};

/// Read-only `user` and `task` namespaces for expressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub task: Value,
}

impl SessionContext {
    pub fn new(user: Value, task: Value) -> Self {
        Self { user, task }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Answer { id: String, value: Value },
    Answers(Map<String, Value>),
    /// Back to initial values and the first view.
    Reset,
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Owns the state of one form fill. Every mutation goes through here.
#[derive(Debug)]
pub struct Session {
    form: Arc<CompiledForm>,
    context: SessionContext,
    evaluator: Evaluator,
    store: Store,
    staged: BTreeMap<String, Value>,
}

impl Session {
    pub fn new(form: Arc<CompiledForm>, context: SessionContext) -> Self {
        Self::with_answers(form, context, &Map::new())
    }

    pub fn with_answers(
        form: Arc<CompiledForm>,
        context: SessionContext,
        answers: &Map<String, Value>,
    ) -> Self {
        let limits = form.limits();
        Self::with_limits(form, context, answers, limits)
    }

    pub fn with_limits(
        form: Arc<CompiledForm>,
        context: SessionContext,
        answers: &Map<String, Value>,
        limits: Limits,
    ) -> Self {
        let evaluator = Evaluator::new(limits);
        let (state, _) = initial_state(&form, &context, &evaluator, answers);
        Self {
            form,
            context,
            evaluator,
            store: Store::new(state),
            staged: BTreeMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn form(&self) -> &CompiledForm {
        &self.form
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn snapshot(&self) -> Arc<FormState> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FormState>> {
        self.store.subscribe()
    }

    pub fn apply(&mut self, update: Update) -> PassReport {
        match update {
            Update::Answer { id, value } => self.set_answer(id, value),
            Update::Answers(answers) => {
                for (id, value) in answers {
                    self.stage(id, value);
                }
                self.settle()
            }
            Update::Reset => self.reset(),
        }
    }

    /// Buffers an answer; the last write per id wins. Edits to read-only
    /// items are dropped.
    pub fn stage(&mut self, id: impl Into<String>, value: Value) {
        let id = id.into();
        if let Some(item) = self.form.item_by_answer(&id)
            && self.store.snapshot().is_read_only(item.id())
        {
            warn!(item = item.id(), "ignoring edit to read-only item");
            return;
        }
        self.staged.insert(id, value);
    }

    /// Runs one pass over every staged answer whose value actually changed.
    #[instrument(skip_all, fields(form = self.form.id(), staged = self.staged.len()))]
    pub fn settle(&mut self) -> PassReport {
        let staged = std::mem::take(&mut self.staged);
        let mut draft = self.store.draft();
        let mut changed = Vec::new();
        for (id, value) in staged {
            let current = draft.values.get(&id).unwrap_or(&Value::Null);
            if *current == value {
                continue;
            }
            draft.values.insert(id.clone(), value);
            changed.push(id);
        }
        if changed.is_empty() {
            return PassReport::default();
        }
        debug!(answers = ?changed, "settling answers");

        let report = Engine::new(&self.form, self.evaluator).run_pass(
            &mut draft,
            &self.context,
            Trigger::Changed(changed),
        );
        self.store.commit(draft);
        report
    }

    pub fn set_answer(&mut self, id: impl Into<String>, value: Value) -> PassReport {
        self.stage(id, value);
        self.settle()
    }

    fn reset(&mut self) -> PassReport {
        self.staged.clear();
        let (state, report) = initial_state(&self.form, &self.context, &self.evaluator, &Map::new());
        self.store.commit(state);
        report
    }

    /// Validates `scope`, stores the resulting messages and returns them.
    pub fn validate(&mut self, scope: Scope<'_>) -> ErrorMap {
        let mut draft = self.store.draft();
        let errors = validate_items(&self.form, &draft, &self.context, &self.evaluator, scope);
        apply_errors(&self.form, &mut draft, scope, &errors);
        self.store.commit(draft);
        errors
    }

    /// Attaches host-reported errors to items by answer id, then item id.
    /// Fields matching neither become form-level errors.
    pub fn merge_server_errors(&mut self, fields: &[FieldError]) -> Arc<FormState> {
        let form = self.form.clone();
        self.commit_with(|state| {
            for error in fields {
                let item = form
                    .item_by_answer(&error.field)
                    .or_else(|| form.item(&error.field));
                match item {
                    Some(item) => state.merge_errors(item.id(), [error.message.clone()]),
                    None => {
                        if !state.form_errors.contains(&error.message) {
                            state.form_errors.push(error.message.clone());
                        }
                    }
                }
            }
        })
    }

    /// Payload for the host; items of invisible views are left out.
    pub fn submission(&self) -> Map<String, Value> {
        let state = self.store.snapshot();
        assemble_in_views(&self.form, &state, |view| {
            view_visible(&self.evaluator, view, &state.values, &self.context)
        })
    }

    /// Restores progress a host kept between calls.
    pub fn resume_at(
        &mut self,
        view_id: &str,
        completed: impl IntoIterator<Item = String>,
    ) -> Result<Arc<FormState>, NavigationError> {
        if self.form.view(view_id).is_none() {
            return Err(NavigationError::UnknownView(view_id.to_string()));
        }
        let form = self.form.clone();
        Ok(self.commit_with(|state| {
            state.current_view = view_id.to_string();
            state
                .completed_views
                .extend(completed.into_iter().filter(|id| form.view(id).is_some()));
        }))
    }

    pub fn is_view_visible(&self, view: &CompiledView) -> bool {
        view_visible(&self.evaluator, view, &self.store.snapshot().values, &self.context)
    }

    /// Applies `change` to a working copy and publishes it as one commit.
    pub(crate) fn commit_with(&mut self, change: impl FnOnce(&mut FormState)) -> Arc<FormState> {
        let mut draft = self.store.draft();
        change(&mut draft);
        self.store.commit(draft)
    }
}

fn initial_state(
    form: &CompiledForm,
    context: &SessionContext,
    evaluator: &Evaluator,
    answers: &Map<String, Value>,
) -> (FormState, PassReport) {
    let mut state = FormState {
        values: initial_values(form, answers),
        current_view: form.first_view().id.clone(),
        ..FormState::default()
    };
    let report = Engine::new(form, *evaluator).run_pass(&mut state, context, Trigger::Full);
    (state, report)
}
