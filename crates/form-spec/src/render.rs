use serde_json::{Map, Value, json};

use crate::expr::to_display;
use crate::session::Session;
use crate::spec::ItemType;
use crate::state::ResolvedChoice;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// More input is required.
    NeedInput,
    /// Every visible view has been completed.
    Complete,
    /// Validation or host errors are pending.
    Error,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
            RenderStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderProgress {
    pub completed: usize,
    pub total: usize,
}

/// One entry of the navigation menu.
#[derive(Debug, Clone)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
    pub current: bool,
    pub completed: bool,
}

/// An item of the current view with its derived state.
#[derive(Debug, Clone)]
pub struct RenderItem {
    pub id: String,
    pub answer_id: Option<String>,
    pub kind: ItemType,
    pub label: String,
    pub visible: bool,
    pub read_only: bool,
    pub value: Option<Value>,
    pub choices: Vec<ResolvedChoice>,
    pub errors: Vec<String>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub form_id: String,
    pub form_title: String,
    pub form_version: String,
    pub help: Option<String>,
    pub status: RenderStatus,
    pub view_id: String,
    pub view_title: String,
    pub menu: Vec<MenuEntry>,
    pub progress: RenderProgress,
    pub items: Vec<RenderItem>,
    pub form_errors: Vec<String>,
}

/// Read-only view of the session's latest snapshot for renderers.
pub fn build_render_payload(session: &Session) -> RenderPayload {
    let form = session.form();
    let state = session.snapshot();
    let current = form
        .view(&state.current_view)
        .unwrap_or_else(|| form.first_view());

    let visible_views: Vec<_> = form
        .views()
        .iter()
        .filter(|view| session.is_view_visible(view))
        .collect();
    let menu = visible_views
        .iter()
        .filter(|view| !view.hide_from_menu)
        .map(|view| MenuEntry {
            id: view.id.clone(),
            title: view.title.clone().unwrap_or_else(|| view.id.clone()),
            current: view.id == current.id,
            completed: state.completed_views.contains(&view.id),
        })
        .collect();
    let completed = visible_views
        .iter()
        .filter(|view| state.completed_views.contains(&view.id))
        .count();

    let items = form
        .view_items(current)
        .map(|item| RenderItem {
            id: item.id().to_string(),
            answer_id: item.answer_id().map(str::to_string),
            kind: item.spec.kind,
            label: item.spec.display_label().to_string(),
            visible: state.is_visible(item.id()),
            read_only: state.is_read_only(item.id()),
            value: item
                .answer_id()
                .and_then(|answer| state.value(answer))
                .filter(|value| !value.is_null())
                .cloned(),
            choices: state.choices.get(item.id()).cloned().unwrap_or_default(),
            errors: state.errors.get(item.id()).cloned().unwrap_or_default(),
        })
        .collect();

    let status = if state.has_errors() {
        RenderStatus::Error
    } else if completed == visible_views.len() {
        RenderStatus::Complete
    } else {
        RenderStatus::NeedInput
    };

    RenderPayload {
        form_id: form.id().to_string(),
        form_title: form.spec().title.clone(),
        form_version: form.spec().version.clone(),
        help: form.spec().description.clone(),
        status,
        view_id: current.id.clone(),
        view_title: current.title.clone().unwrap_or_else(|| current.id.clone()),
        menu,
        progress: RenderProgress {
            completed,
            total: visible_views.len(),
        },
        items,
        form_errors: state.form_errors.clone(),
    }
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    let items = payload
        .items
        .iter()
        .map(|item| {
            let mut map = Map::new();
            map.insert("id".into(), Value::String(item.id.clone()));
            if let Some(answer_id) = &item.answer_id {
                map.insert("answer_id".into(), Value::String(answer_id.clone()));
            }
            map.insert("type".into(), Value::String(item.kind.label().to_string()));
            map.insert("label".into(), Value::String(item.label.clone()));
            map.insert("visible".into(), Value::Bool(item.visible));
            map.insert("read_only".into(), Value::Bool(item.read_only));
            if let Some(value) = &item.value {
                map.insert("value".into(), value.clone());
            }
            if !item.choices.is_empty() {
                map.insert(
                    "choices".into(),
                    Value::Array(
                        item.choices
                            .iter()
                            .filter(|choice| choice.visible)
                            .map(|choice| {
                                json!({
                                    "value": choice.value,
                                    "label": choice.label,
                                    "disabled": choice.disabled,
                                })
                            })
                            .collect(),
                    ),
                );
            }
            if !item.errors.is_empty() {
                map.insert("errors".into(), json!(item.errors));
            }
            Value::Object(map)
        })
        .collect::<Vec<_>>();

    let menu = payload
        .menu
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "title": entry.title,
                "current": entry.current,
                "completed": entry.completed,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "form_id": payload.form_id,
        "form_title": payload.form_title,
        "form_version": payload.form_version,
        "status": payload.status.as_str(),
        "help": payload.help,
        "view": { "id": payload.view_id, "title": payload.view_title },
        "menu": menu,
        "progress": {
            "completed": payload.progress.completed,
            "total": payload.progress.total,
        },
        "items": items,
        "form_errors": payload.form_errors,
    })
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Form: {} ({})", payload.form_title, payload.form_id));
    lines.push(format!(
        "Status: {} ({}/{} views)",
        payload.status.as_str(),
        payload.progress.completed,
        payload.progress.total
    ));
    if let Some(help) = &payload.help {
        lines.push(format!("Help: {}", help));
    }

    let menu = payload
        .menu
        .iter()
        .map(|entry| {
            let marker = if entry.current {
                ">"
            } else if entry.completed {
                "x"
            } else {
                " "
            };
            format!("[{marker}] {}", entry.title)
        })
        .collect::<Vec<_>>();
    if !menu.is_empty() {
        lines.push(format!("Menu: {}", menu.join("  ")));
    }

    lines.push(format!("View: {} ({})", payload.view_title, payload.view_id));
    for item in payload.items.iter().filter(|item| item.visible) {
        let mut entry = format!(" - {} ({})", item.label, item.kind.label());
        if item.read_only {
            entry.push_str(" [read-only]");
        }
        if let Some(value) = &item.value {
            entry.push_str(&format!(" = {}", to_display(value)));
        }
        lines.push(entry);
        let offered = item
            .choices
            .iter()
            .filter(|choice| choice.selectable())
            .map(|choice| choice.label.as_str())
            .collect::<Vec<_>>();
        if !offered.is_empty() {
            lines.push(format!("     choices: {}", offered.join(", ")));
        }
        for error in &item.errors {
            lines.push(format!("     ! {}", error));
        }
    }
    for error in &payload.form_errors {
        lines.push(format!("! {}", error));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::CompiledForm;
    use crate::session::SessionContext;
    use std::sync::Arc;

    fn session() -> Session {
        let form = CompiledForm::from_json(
            &json!({
                "id": "intake", "title": "Intake", "version": "2",
                "views": [
                    { "id": "about", "title": "About you", "items": [
                        { "id": "name", "type": "text", "label": "Name" },
                        { "id": "plan", "type": "radio", "options": [
                            { "value": "a", "label": "Alpha" },
                            { "value": "b", "label": "Beta",
                              "visible": { "expr": "data.name == 'vip'", "depends_on": ["name"] } }
                        ] },
                        { "id": "nick", "type": "text",
                          "visible": { "expr": "data.name != ''", "depends_on": ["name"] } }
                    ] },
                    { "id": "hidden", "hide_from_menu": true, "items": [] },
                    { "id": "staff", "items": [],
                      "visible": { "expr": "user.staff", "depends_on": [] } },
                    { "id": "done", "title": "Done", "items": [] }
                ]
            })
            .to_string(),
        )
        .expect("form loads");
        Session::with_answers(
            Arc::new(form),
            SessionContext::default(),
            json!({ "name": "Ada" }).as_object().expect("object"),
        )
    }

    #[test]
    fn payload_lists_menu_without_hidden_views() {
        let payload = build_render_payload(&session());
        let menu: Vec<_> = payload.menu.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(menu, vec!["about", "done"]);
        assert!(payload.menu[0].current);
        assert_eq!(payload.progress.total, 3);
        assert_eq!(payload.status, RenderStatus::NeedInput);
    }

    #[test]
    fn json_ui_carries_item_state() {
        let ui = render_json_ui(&build_render_payload(&session()));
        assert_eq!(ui["view"]["title"], json!("About you"));
        assert_eq!(ui["items"][0]["value"], json!("Ada"));
        assert_eq!(ui["items"][1]["choices"], json!([{ "value": "a", "label": "Alpha", "disabled": false }]));
        assert_eq!(ui["items"][2]["visible"], json!(true));
    }

    #[test]
    fn text_output_shows_visible_items_and_errors() {
        let mut session = session();
        session.merge_server_errors(&[crate::navigation::FieldError::new("name", "taken")]);
        let text = render_text(&build_render_payload(&session));
        assert!(text.contains("Form: Intake (intake)"));
        assert!(text.contains("Menu: [>] About you  [ ] Done"));
        assert!(text.contains(" - Name (text) = Ada"));
        assert!(text.contains("choices: Alpha"));
        assert!(text.contains("! taken"));
        assert!(text.contains("Status: error"));
    }
}
