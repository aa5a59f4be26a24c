use std::sync::Arc;

use serde_json::json;

use form_spec::{CompiledForm, Scope, Session, SessionContext};

fn fixture(name: &str) -> &'static str {
    match name {
        "intake_form" => include_str!("../tests/fixtures/intake_form.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn session() -> Session {
    let form = CompiledForm::from_json(fixture("intake_form")).expect("fixture loads");
    Session::new(Arc::new(form), SessionContext::default())
}

#[test]
fn required_fields_report_templated_messages() {
    let mut session = session();
    let errors = session.validate(Scope::View("applicant"));
    assert_eq!(errors["full_name"], vec!["Full name is required"]);
    assert_eq!(errors["email"], vec!["Email is required"]);
    assert_eq!(errors["employer"], vec!["Employer is required"]);
    assert!(!errors.contains_key("mobile"));
}

#[test]
fn regexp_and_max_length_apply_to_non_empty_values() {
    let mut session = session();
    session.set_answer("full_name", json!("x".repeat(41)));
    session.set_answer("email_address", json!("not-an-email"));
    let errors = session.validate(Scope::View("applicant"));
    assert_eq!(
        errors["full_name"],
        vec!["Full name must be at most 40 characters"]
    );
    assert_eq!(errors["email"], vec!["'not-an-email' is not an email address"]);

    session.set_answer("full_name", json!("x".repeat(40)));
    session.set_answer("email_address", json!("a@b"));
    let errors = session.validate(Scope::View("applicant"));
    assert!(!errors.contains_key("full_name"));
    assert!(!errors.contains_key("email"));
}

#[test]
fn hiding_an_item_clears_its_errors_on_the_next_run() {
    let mut session = session();
    session.validate(Scope::View("applicant"));
    assert!(session.snapshot().errors.contains_key("employer"));

    session.set_answer("employment", json!("self_employed"));
    session.validate(Scope::View("applicant"));
    assert!(!session.snapshot().errors.contains_key("employer"));
}

#[test]
fn custom_rule_reads_other_answers() {
    let mut session = session();
    session.set_answer("salary", json!(36000));
    session.set_answer("rent", json!(1500));
    let errors = session.validate(Scope::View("income"));
    assert_eq!(
        errors["rent"],
        vec!["Rent may not exceed a third of monthly income"]
    );

    session.set_answer("rent", json!(900));
    assert!(session.validate(Scope::View("income")).is_empty());
}

#[test]
fn validating_twice_gives_the_same_result() {
    let mut session = session();
    session.set_answer("email_address", json!("nope"));
    let first = session.validate(Scope::All);
    let snapshot = session.snapshot();
    let second = session.validate(Scope::All);
    assert_eq!(first, second);
    assert_eq!(snapshot.errors, session.snapshot().errors);
    assert_eq!(snapshot.revision, session.snapshot().revision);
}
