//! Moving between views through the host.
//!
//! [`NavigationController::begin`] validates, resolves the target view and
//! issues a ticket for the host call; [`NavigationController::complete`]
//! applies the host's answer. Only the most recent ticket can complete, and
//! issuing one cancels the token of the request it supersedes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::compiled::{CompiledItem, CompiledRule, CompiledView};
use crate::expr::Context;
use crate::session::{Session, SharedSession};
use crate::spec::ItemType;
use crate::state::{ErrorMap, FormState};
use crate::validate::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    Navigate,
    /// Persist without validating or advancing.
    Save,
    Submit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    pub current_view_id: String,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub next_view_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResponse {
    pub current_view_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The request may be retried unchanged.
    #[error("host communication failed: {0}")]
    Transport(String),
    #[error("host rejected {} field(s)", .0.len())]
    Validation(Vec<FieldError>),
}

#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn send(&self, action: HostAction, request: HostRequest)
    -> Result<HostResponse, HostError>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NavigationError {
    #[error("view has {} item(s) with errors", .0.len())]
    Blocked(ErrorMap),
    #[error("no reachable view after '{0}'")]
    NoNextView(String),
    #[error("navigation superseded by a newer request")]
    Cancelled,
    #[error("unknown view '{0}'")]
    UnknownView(String),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("'{0}' is not an action item")]
    UnknownAction(String),
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavRequest {
    pub action: HostAction,
    /// Action item that triggered the request; its `next_view` rule wins.
    pub via: Option<String>,
}

impl NavRequest {
    pub fn next() -> Self {
        Self {
            action: HostAction::Navigate,
            via: None,
        }
    }

    pub fn via(action_item: impl Into<String>) -> Self {
        Self {
            action: HostAction::Navigate,
            via: Some(action_item.into()),
        }
    }

    pub fn save() -> Self {
        Self {
            action: HostAction::Save,
            via: None,
        }
    }

    pub fn submit() -> Self {
        Self {
            action: HostAction::Submit,
            via: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavState {
    Editing { view: String },
    Validating,
    ResolvingNext,
    AwaitingHost {
        ticket: Ticket,
        target: Option<String>,
    },
}

/// A request ready to be sent to the host.
#[derive(Debug, Clone)]
pub struct PendingNavigation {
    pub ticket: Ticket,
    pub action: HostAction,
    pub request: HostRequest,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct InFlight {
    ticket: Ticket,
    origin: String,
    action: HostAction,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Inner {
    next_ticket: u64,
    in_flight: Option<InFlight>,
    state: NavState,
}

#[derive(Debug)]
pub struct NavigationController {
    inner: Mutex<Inner>,
}

impl NavigationController {
    /// Starts in `Editing` on the session's current view.
    pub fn new(session: &Session) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_ticket: 1,
                in_flight: None,
                state: NavState::Editing {
                    view: session.snapshot().current_view.clone(),
                },
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: NavState) {
        self.lock().state = state;
    }

    pub fn state(&self) -> NavState {
        self.lock().state.clone()
    }

    /// Validates, resolves the target and issues a ticket. Any request in
    /// flight is cancelled first, even when this one fails. Errors leave the
    /// session on its current view.
    #[instrument(skip_all, fields(action = ?request.action))]
    pub fn begin(
        &self,
        session: &mut Session,
        request: NavRequest,
    ) -> Result<PendingNavigation, NavigationError> {
        self.cancel_in_flight();
        let origin = session.snapshot().current_view.clone();
        let result = self.prepare(session, &request, &origin);
        let (target, payload) = match result {
            Ok(prepared) => prepared,
            Err(err) => {
                debug!(error = %err, "navigation stopped before the host call");
                self.set_state(NavState::Editing { view: origin });
                return Err(err);
            }
        };

        let mut inner = self.lock();
        let ticket = Ticket(inner.next_ticket);
        inner.next_ticket += 1;
        let cancel = CancellationToken::new();
        inner.in_flight = Some(InFlight {
            ticket,
            origin: origin.clone(),
            action: request.action,
            cancel: cancel.clone(),
        });
        inner.state = NavState::AwaitingHost {
            ticket,
            target: target.clone(),
        };

        Ok(PendingNavigation {
            ticket,
            action: request.action,
            request: HostRequest {
                current_view_id: origin,
                data: payload,
                next_view_id: target,
            },
            cancel,
        })
    }

    fn cancel_in_flight(&self) {
        if let Some(previous) = self.lock().in_flight.take() {
            debug!(ticket = previous.ticket.0, "cancelling superseded request");
            previous.cancel.cancel();
        }
    }

    fn prepare(
        &self,
        session: &mut Session,
        request: &NavRequest,
        origin: &str,
    ) -> Result<(Option<String>, Map<String, Value>), NavigationError> {
        let form = session.form();
        let view = form
            .view(origin)
            .ok_or_else(|| NavigationError::UnknownView(origin.to_string()))?
            .clone();
        let action_item = match &request.via {
            Some(id) => Some(
                form.item(id)
                    .filter(|item| item.spec.kind == ItemType::Action)
                    .ok_or_else(|| NavigationError::UnknownAction(id.clone()))?
                    .clone(),
            ),
            None => None,
        };

        self.set_state(NavState::Validating);
        let scope = match request.action {
            HostAction::Navigate => Some(Scope::View(origin)),
            HostAction::Submit => Some(Scope::All),
            HostAction::Save => None,
        };
        if let Some(scope) = scope {
            let errors = session.validate(scope);
            if !errors.is_empty() {
                return Err(NavigationError::Blocked(errors));
            }
        }

        self.set_state(NavState::ResolvingNext);
        let target = match request.action {
            HostAction::Navigate => Some(resolve_target(session, &view, action_item.as_ref())?),
            HostAction::Save | HostAction::Submit => None,
        };
        Ok((target, session.submission()))
    }

    /// Applies the host's answer to `ticket`. Stale tickets change nothing.
    #[instrument(skip_all, fields(ticket = ticket.0))]
    pub fn complete(
        &self,
        session: &mut Session,
        ticket: Ticket,
        result: Result<HostResponse, HostError>,
    ) -> Result<Arc<FormState>, NavigationError> {
        let flight = {
            let mut inner = self.lock();
            match inner.in_flight.take() {
                Some(flight) if flight.ticket == ticket => flight,
                other => {
                    inner.in_flight = other;
                    debug!("discarding response to a superseded request");
                    return Err(NavigationError::Cancelled);
                }
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    HostError::Validation(fields) => {
                        warn!(fields = fields.len(), "host rejected the submission");
                        session.merge_server_errors(fields);
                    }
                    HostError::Transport(reason) => {
                        warn!(reason = reason.as_str(), "host unreachable; request can be retried");
                    }
                }
                self.set_state(NavState::Editing { view: flight.origin });
                return Err(NavigationError::Host(err));
            }
        };

        if session.form().view(&response.current_view_id).is_none() {
            warn!(view = response.current_view_id.as_str(), "host answered with an unknown view");
            self.set_state(NavState::Editing { view: flight.origin });
            return Err(NavigationError::UnknownView(response.current_view_id));
        }

        let origin = flight.origin;
        let advanced = flight.action != HostAction::Save;
        let state = session.commit_with(|state| {
            if advanced {
                state.completed_views.insert(origin.clone());
            }
            state.current_view = response.current_view_id.clone();
            state.form_errors.clear();
        });
        info!(
            from = origin.as_str(),
            to = state.current_view.as_str(),
            action = ?flight.action,
            "navigation committed"
        );
        self.set_state(NavState::Editing {
            view: state.current_view.clone(),
        });
        Ok(state)
    }

    /// Drops the in-flight request, if any.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(flight) = inner.in_flight.take() {
            flight.cancel.cancel();
            inner.state = NavState::Editing { view: flight.origin };
        }
    }
}

/// Action item rule, then the view's rule, then the next visible view in
/// declaration order. Menu-hidden views are reachable.
fn resolve_target(
    session: &Session,
    view: &CompiledView,
    action_item: Option<&CompiledItem>,
) -> Result<String, NavigationError> {
    let form = session.form();
    let snapshot = session.snapshot();
    let rules: [Option<&CompiledRule>; 2] = [
        action_item.and_then(|item| item.next_view.as_ref()),
        view.next_view.as_ref(),
    ];
    for rule in rules.into_iter().flatten() {
        let ctx = Context::new(
            &snapshot.values,
            &session.context().user,
            &session.context().task,
        );
        match session.evaluator().evaluate_rule(&rule.expr, &ctx, &view.id) {
            Some(Value::String(target)) if !target.is_empty() => {
                match form.view(&target) {
                    Some(candidate) if session.is_view_visible(candidate) => return Ok(target),
                    Some(_) => warn!(view = target.as_str(), "next_view rule chose a hidden view; using declaration order"),
                    None => warn!(view = target.as_str(), "next_view rule chose an unknown view; using declaration order"),
                }
            }
            _ => {}
        }
    }

    form.views()[view.index + 1..]
        .iter()
        .find(|candidate| session.is_view_visible(candidate))
        .map(|candidate| candidate.id.clone())
        .ok_or_else(|| NavigationError::NoNextView(view.id.clone()))
}

/// Begins a navigation, awaits the host and completes it. Returns
/// [`NavigationError::Cancelled`] as soon as a newer request supersedes
/// this one.
pub async fn navigate(
    session: &SharedSession,
    controller: &NavigationController,
    transport: &(impl HostTransport + ?Sized),
    request: NavRequest,
) -> Result<Arc<FormState>, NavigationError> {
    let pending = {
        let mut session = session.lock().await;
        controller.begin(&mut session, request)?
    };

    let result = tokio::select! {
        biased;
        _ = pending.cancel.cancelled() => return Err(NavigationError::Cancelled),
        result = transport.send(pending.action, pending.request.clone()) => result,
    };

    let mut session = session.lock().await;
    controller.complete(&mut session, pending.ticket, result)
}
