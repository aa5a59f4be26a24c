use std::sync::Arc;

use serde_json::json;

use form_spec::{
    CompiledForm, RenderStatus, Session, SessionContext, build_render_payload, render_json_ui,
    render_text,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "intake_form" => include_str!("../tests/fixtures/intake_form.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn session(user: serde_json::Value) -> Session {
    let form = CompiledForm::from_json(fixture("intake_form")).expect("fixture loads");
    Session::new(Arc::new(form), SessionContext::new(user, json!({})))
}

#[test]
fn menu_excludes_menu_hidden_and_invisible_views() {
    let payload = build_render_payload(&session(json!({ "role": "applicant" })));
    let menu: Vec<_> = payload.menu.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(menu, vec!["applicant", "income", "thanks"]);
    assert_eq!(payload.progress.total, 4);
    assert_eq!(payload.status, RenderStatus::NeedInput);

    let payload = build_render_payload(&session(json!({ "role": "manager" })));
    let menu: Vec<_> = payload.menu.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(menu, vec!["applicant", "income", "manager", "thanks"]);
}

#[test]
fn json_ui_exposes_current_view_state() {
    let mut session = session(json!({ "country": "DE" }));
    session.set_answer("full_name", json!("Ada"));
    let ui = render_json_ui(&build_render_payload(&session));

    assert_eq!(ui["form_id"], "rental-intake");
    assert_eq!(ui["view"]["id"], "applicant");
    let items = ui["items"].as_array().expect("items array");
    assert_eq!(items[0]["value"], "Ada");
    assert_eq!(items[1]["answer_id"], "email_address");
    assert_eq!(items[2]["value"], "employed");
    assert_eq!(items[2]["choices"][2]["disabled"], true);
}

#[test]
fn text_render_lists_visible_items() {
    let mut session = session(json!({}));
    session.set_answer("employment", json!("student"));
    let text = render_text(&build_render_payload(&session));
    assert!(text.contains("Form: Rental application (rental-intake)"));
    assert!(text.contains("View: Applicant (applicant)"));
    assert!(text.contains(" - Employment (radio) = student"));
    assert!(!text.contains("Employer (text)"));
}
