use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use form_spec::{
    CompiledForm, DefinitionError, FormSpec, Limits, NavRequest, NavigationController,
    NavigationError, RenderPayload, Scope, Session, SessionContext, build_render_payload,
    render_json_ui as form_render_json_ui, render_text as form_render_text,
};

const DEFAULT_SPEC: &str = include_str!("../../form-spec/tests/fixtures/intake_form.json");

#[derive(Debug, Error)]
enum ComponentError {
    #[error("failed to parse config/{0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("invalid form definition: {0}")]
    Definition(#[from] DefinitionError),
    #[error("form '{0}' is not available")]
    FormUnavailable(String),
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct ComponentConfig {
    #[serde(default)]
    form_spec_json: Option<String>,
    /// Overrides the definition's own limits.
    #[serde(default)]
    limits: Option<Limits>,
}

/// Per-call session context: expression namespaces plus saved progress.
#[derive(Debug, Deserialize, Default)]
struct CallContext {
    #[serde(default)]
    user: Value,
    #[serde(default)]
    task: Value,
    #[serde(default)]
    current_view: Option<String>,
    #[serde(default)]
    completed_views: Vec<String>,
}

struct Loaded {
    form: Arc<CompiledForm>,
    limits: Limits,
}

fn parse_config(config_json: &str) -> Result<ComponentConfig, ComponentError> {
    if config_json.trim().is_empty() {
        Ok(ComponentConfig::default())
    } else {
        serde_json::from_str(config_json).map_err(ComponentError::ConfigParse)
    }
}

fn load_form_spec(config_json: &str) -> Result<FormSpec, ComponentError> {
    let config = parse_config(config_json)?;
    let spec_json = config.form_spec_json.as_deref().unwrap_or(DEFAULT_SPEC);
    serde_json::from_str(spec_json).map_err(ComponentError::ConfigParse)
}

fn ensure_form(form_id: &str, config_json: &str) -> Result<Loaded, ComponentError> {
    let config = parse_config(config_json)?;
    let spec = load_form_spec(config_json)?;
    if spec.id != form_id {
        return Err(ComponentError::FormUnavailable(form_id.to_string()));
    }
    let form = CompiledForm::load(spec)?;
    let limits = config.limits.unwrap_or_else(|| form.limits());
    Ok(Loaded {
        form: Arc::new(form),
        limits,
    })
}

fn parse_context(ctx_json: &str) -> CallContext {
    serde_json::from_str(ctx_json).unwrap_or_default()
}

fn parse_answers(answers_json: &str) -> Map<String, Value> {
    serde_json::from_str(answers_json).unwrap_or_default()
}

fn open_session(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
) -> Result<Session, ComponentError> {
    let loaded = ensure_form(form_id, config_json)?;
    let ctx = parse_context(ctx_json);
    let mut session = Session::with_limits(
        loaded.form,
        SessionContext::new(ctx.user, ctx.task),
        &parse_answers(answers_json),
        loaded.limits,
    );
    if let Some(view) = ctx.current_view.as_deref() {
        session.resume_at(view, ctx.completed_views)?;
    }
    Ok(session)
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn respond_string(result: Result<String, ComponentError>) -> String {
    match result {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

pub fn describe(form_id: &str, config_json: &str) -> String {
    respond(load_form_spec(config_json).and_then(|spec| {
        if spec.id != form_id {
            Err(ComponentError::FormUnavailable(form_id.to_string()))
        } else {
            serde_json::to_value(spec).map_err(ComponentError::JsonEncode)
        }
    }))
}

/// Derived state after applying `answers_json` from scratch.
pub fn evaluate(form_id: &str, config_json: &str, ctx_json: &str, answers_json: &str) -> String {
    respond(
        open_session(form_id, config_json, ctx_json, answers_json).and_then(|session| {
            serde_json::to_value(&*session.snapshot()).map_err(ComponentError::JsonEncode)
        }),
    )
}

/// Validates one view, or every view when `view_id` is empty.
pub fn validate_view(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
    view_id: &str,
) -> String {
    respond(
        open_session(form_id, config_json, ctx_json, answers_json).and_then(|mut session| {
            let scope = if view_id.is_empty() {
                Scope::All
            } else if session.form().view(view_id).is_some() {
                Scope::View(view_id)
            } else {
                return Err(NavigationError::UnknownView(view_id.to_string()).into());
            };
            let errors = session.validate(scope);
            Ok(json!({
                "valid": errors.is_empty(),
                "errors": errors,
            }))
        }),
    )
}

pub fn submission_payload(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
) -> String {
    respond(
        open_session(form_id, config_json, ctx_json, answers_json)
            .map(|session| Value::Object(session.submission())),
    )
}

/// Where `next` would go from the context's current view, without calling
/// a host.
pub fn next_view(form_id: &str, config_json: &str, ctx_json: &str, answers_json: &str) -> String {
    respond(
        open_session(form_id, config_json, ctx_json, answers_json).and_then(|mut session| {
            let controller = NavigationController::new(&session);
            match controller.begin(&mut session, NavRequest::next()) {
                Ok(pending) => Ok(json!({
                    "status": "ready",
                    "current_view_id": pending.request.current_view_id,
                    "next_view_id": pending.request.next_view_id,
                    "data": pending.request.data,
                })),
                Err(NavigationError::Blocked(errors)) => Ok(json!({
                    "status": "blocked",
                    "current_view_id": session.snapshot().current_view,
                    "errors": errors,
                })),
                Err(NavigationError::NoNextView(view)) => Ok(json!({
                    "status": "complete",
                    "current_view_id": view,
                    "next_view_id": null,
                })),
                Err(err) => Err(err.into()),
            }
        }),
    )
}

fn render_payload(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
) -> Result<RenderPayload, ComponentError> {
    let session = open_session(form_id, config_json, ctx_json, answers_json)?;
    Ok(build_render_payload(&session))
}

pub fn render_text(form_id: &str, config_json: &str, ctx_json: &str, answers_json: &str) -> String {
    respond_string(
        render_payload(form_id, config_json, ctx_json, answers_json)
            .map(|payload| form_render_text(&payload)),
    )
}

pub fn render_json_ui(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
) -> String {
    respond(
        render_payload(form_id, config_json, ctx_json, answers_json)
            .map(|payload| form_render_json_ui(&payload)),
    )
}
