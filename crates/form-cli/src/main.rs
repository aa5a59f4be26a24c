mod logging;
mod walk;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use component_form::{
    evaluate as form_evaluate, render_json_ui as form_render_json_ui,
    render_text as form_render_text, submission_payload, validate_view,
};
use form_spec::{CompiledForm, FormSpec, Limits, Session, SessionContext};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Form rule engine CLI",
    long_about = "Evaluates, validates and walks multi-page form definitions backed by the form component"
)]
struct Cli {
    /// Log debug diagnostics to stderr (GREENTIC_FORMS_LOG takes precedence).
    #[arg(long, global = true, alias = "debug")]
    verbose: bool,
    #[command(flatten)]
    limits: LimitArgs,
    #[command(subcommand)]
    command: Command,
}

/// Overrides for the definition's expression budgets.
#[derive(Args, Default)]
struct LimitArgs {
    #[arg(long, global = true, value_name = "N")]
    max_steps: Option<u64>,
    #[arg(long, global = true, value_name = "MS")]
    time_budget_ms: Option<u64>,
    #[arg(long, global = true, value_name = "BYTES")]
    max_memory_bytes: Option<usize>,
}

impl LimitArgs {
    fn apply(&self, mut limits: Limits) -> Limits {
        if let Some(steps) = self.max_steps {
            limits.max_steps = steps;
        }
        if let Some(ms) = self.time_budget_ms {
            limits.time_budget_ms = ms;
        }
        if let Some(bytes) = self.max_memory_bytes {
            limits.max_memory_bytes = bytes;
        }
        limits
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub(crate) enum RenderMode {
    Text,
    Json,
}

/// Definition plus the session inputs every command shares.
#[derive(Args)]
struct FormInputs {
    /// Path to the form definition JSON.
    #[arg(long, value_name = "SPEC")]
    spec: PathBuf,
    /// JSON file with initial answers keyed by answer id.
    #[arg(long, value_name = "ANSWERS")]
    answers: Option<PathBuf>,
    /// JSON file with `user`, `task` and optionally `answers`.
    #[arg(long, value_name = "CONTEXT")]
    context: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the derived state after applying the answers.
    Evaluate {
        #[command(flatten)]
        inputs: FormInputs,
    },
    /// Validate one view, or every view when none is given.
    Validate {
        #[command(flatten)]
        inputs: FormInputs,
        #[arg(long, value_name = "VIEW")]
        view: Option<String>,
    },
    /// Print the data object a submission would send.
    Payload {
        #[command(flatten)]
        inputs: FormInputs,
    },
    /// Render the first view.
    Render {
        #[command(flatten)]
        inputs: FormInputs,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Page through the form against a host that accepts every request.
    Walk {
        #[command(flatten)]
        inputs: FormInputs,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Print the JSON Schema of the definition format.
    Schema,
}

#[derive(Debug, Default, Deserialize)]
struct ContextFile {
    #[serde(default)]
    user: Value,
    #[serde(default)]
    task: Value,
    #[serde(default)]
    answers: Map<String, Value>,
}

/// Everything loaded from disk for one invocation.
struct Loaded {
    form: CompiledForm,
    limits: Limits,
    config_json: String,
    ctx_json: String,
    answers: Map<String, Value>,
    context: SessionContext,
}

impl Loaded {
    fn answers_json(&self) -> String {
        Value::Object(self.answers.clone()).to_string()
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let limits = &cli.limits;
    match cli.command {
        Command::Evaluate { inputs } => run_evaluate(&load(&inputs, limits)?),
        Command::Validate { inputs, view } => run_validate(&load(&inputs, limits)?, view),
        Command::Payload { inputs } => run_payload(&load(&inputs, limits)?),
        Command::Render { inputs, format } => run_render(&load(&inputs, limits)?, format),
        Command::Walk { inputs, format } => run_walk(load(&inputs, limits)?, format).await,
        Command::Schema => run_schema(),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("cannot read {}: {}", path.display(), err))?;
    serde_json::from_str(&text).map_err(|err| format!("{}: {}", path.display(), err).into())
}

fn load(inputs: &FormInputs, limits: &LimitArgs) -> CliResult<Loaded> {
    let spec_json = fs::read_to_string(&inputs.spec)
        .map_err(|err| format!("cannot read {}: {}", inputs.spec.display(), err))?;
    let form = CompiledForm::from_json(&spec_json)?;
    let limits = limits.apply(form.limits());
    debug!(form = form.id(), ?limits, "definition loaded");

    let context = match &inputs.context {
        Some(path) => read_json::<ContextFile>(path)?,
        None => ContextFile::default(),
    };
    let mut answers = context.answers;
    if let Some(path) = &inputs.answers {
        answers.extend(read_json::<Map<String, Value>>(path)?);
    }

    let config_json = json!({ "form_spec_json": spec_json, "limits": limits }).to_string();
    let ctx_json = json!({ "user": context.user, "task": context.task }).to_string();
    Ok(Loaded {
        form,
        limits,
        config_json,
        ctx_json,
        answers,
        context: SessionContext::new(context.user, context.task),
    })
}

/// Component calls answer with JSON; an `error` field means the call failed.
fn component_result(response: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(response)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(error.to_string().into());
    }
    Ok(value)
}

fn run_evaluate(loaded: &Loaded) -> CliResult<()> {
    let state = component_result(&form_evaluate(
        loaded.form.id(),
        &loaded.config_json,
        &loaded.ctx_json,
        &loaded.answers_json(),
    ))?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn run_validate(loaded: &Loaded, view: Option<String>) -> CliResult<()> {
    let result = component_result(&validate_view(
        loaded.form.id(),
        &loaded.config_json,
        &loaded.ctx_json,
        &loaded.answers_json(),
        view.as_deref().unwrap_or_default(),
    ))?;
    let valid = result["valid"].as_bool().unwrap_or(false);
    println!(
        "Validation result: {}",
        if valid { "valid" } else { "invalid" }
    );
    if let Some(errors) = result["errors"].as_object()
        && !errors.is_empty()
    {
        println!("Errors:");
        for (item, messages) in errors {
            for message in messages.as_array().into_iter().flatten() {
                println!("  {} - {}", item, message.as_str().unwrap_or_default());
            }
        }
    }

    if valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn run_payload(loaded: &Loaded) -> CliResult<()> {
    let data = component_result(&submission_payload(
        loaded.form.id(),
        &loaded.config_json,
        &loaded.ctx_json,
        &loaded.answers_json(),
    ))?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

fn run_render(loaded: &Loaded, format: RenderMode) -> CliResult<()> {
    let (form_id, answers_json) = (loaded.form.id(), loaded.answers_json());
    match format {
        RenderMode::Text => {
            let text = form_render_text(form_id, &loaded.config_json, &loaded.ctx_json, &answers_json);
            if text.starts_with('{') {
                component_result(&text)?;
            }
            println!("{}", text);
        }
        RenderMode::Json => {
            let ui = component_result(&form_render_json_ui(
                form_id,
                &loaded.config_json,
                &loaded.ctx_json,
                &answers_json,
            ))?;
            println!("{}", serde_json::to_string_pretty(&ui)?);
        }
    }
    Ok(())
}

async fn run_walk(loaded: Loaded, format: RenderMode) -> CliResult<()> {
    let session = Session::with_limits(
        Arc::new(loaded.form),
        loaded.context,
        &loaded.answers,
        loaded.limits,
    );
    let mut stdout = std::io::stdout().lock();
    walk::walk(session, format, &mut stdout).await?;
    Ok(())
}

fn run_schema() -> CliResult<()> {
    let schema = schemars::schema_for!(FormSpec);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use assert_fs::prelude::*;

    const FORM: &str = include_str!("../../form-spec/tests/fixtures/intake_form.json");

    fn workspace() -> assert_fs::TempDir {
        let workspace = assert_fs::TempDir::new().expect("temp dir");
        workspace.child("form.json").write_str(FORM).expect("write spec");
        workspace
    }

    fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
        String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
    }

    #[test]
    fn limit_flags_override_definition_limits() {
        let args = LimitArgs {
            max_steps: Some(7),
            time_budget_ms: None,
            max_memory_bytes: Some(1024),
        };
        let limits = args.apply(Limits::default());
        assert_eq!(limits.max_steps, 7);
        assert_eq!(limits.max_memory_bytes, 1024);
        assert_eq!(limits.time_budget_ms, Limits::default().time_budget_ms);
    }

    #[test]
    fn component_errors_become_cli_errors() {
        let err = component_result(r#"{"error":"form 'x' is not available"}"#)
            .expect_err("error envelope");
        assert_eq!(err.to_string(), "form 'x' is not available");
        assert!(component_result(r#"{"valid":true}"#).is_ok());
    }

    #[test]
    fn evaluate_prints_derived_values() -> CliResult<()> {
        let workspace = workspace();
        workspace
            .child("answers.json")
            .write_str(r#"{"salary": 70000, "bonus": 500}"#)?;

        let assert = Command::cargo_bin("greentic-forms")?
            .arg("evaluate")
            .arg("--spec")
            .arg(workspace.child("form.json").path())
            .arg("--answers")
            .arg(workspace.child("answers.json").path())
            .assert()
            .success();
        let state: Value = serde_json::from_str(&stdout_of(&assert))?;
        assert_eq!(state["values"]["total_income"], json!(70500));
        assert_eq!(state["choices"]["bracket"][1]["value"], json!("top"));
        Ok(())
    }

    #[test]
    fn validate_fails_on_missing_answers() -> CliResult<()> {
        let workspace = workspace();
        let assert = Command::cargo_bin("greentic-forms")?
            .args(["validate", "--view", "applicant", "--spec"])
            .arg(workspace.child("form.json").path())
            .assert()
            .failure();
        let stdout = stdout_of(&assert);
        assert!(stdout.contains("Validation result: invalid"));
        assert!(stdout.contains("email - Email is required"));
        Ok(())
    }

    #[test]
    fn payload_reads_answers_from_the_context_file() -> CliResult<()> {
        let workspace = workspace();
        workspace.child("ctx.json").write_str(
            r#"{"user": {"role": "manager"}, "answers": {"notes": "ok", "rent": 900}}"#,
        )?;

        let assert = Command::cargo_bin("greentic-forms")?
            .arg("payload")
            .arg("--spec")
            .arg(workspace.child("form.json").path())
            .arg("--context")
            .arg(workspace.child("ctx.json").path())
            .assert()
            .success();
        let data: Value = serde_json::from_str(&stdout_of(&assert))?;
        assert_eq!(data["notes"], json!("ok"));
        assert_eq!(data["rent"], json!({ "amount": 900, "currency": "EUR" }));
        Ok(())
    }

    #[test]
    fn walk_submits_a_complete_form_and_logs_commits() -> CliResult<()> {
        let workspace = workspace();
        workspace.child("answers.json").write_str(
            r#"{"full_name": "Ada", "email_address": "ada@example.com",
                "employer": "ACME", "salary": 50000, "consent": true}"#,
        )?;

        let assert = Command::cargo_bin("greentic-forms")?
            .env(logging::ENV_VAR, "info")
            .arg("walk")
            .arg("--spec")
            .arg(workspace.child("form.json").path())
            .arg("--answers")
            .arg(workspace.child("answers.json").path())
            .assert()
            .success();
        let stdout = stdout_of(&assert);
        let stderr = String::from_utf8(assert.get_output().stderr.clone())?;
        assert!(stdout.contains("View: Thanks (thanks)"));
        assert!(stdout.contains("Submitted:"));
        assert!(stderr.contains("navigation committed"));
        Ok(())
    }

    #[test]
    fn schema_describes_the_definition_format() -> CliResult<()> {
        let assert = Command::cargo_bin("greentic-forms")?
            .arg("schema")
            .assert()
            .success();
        let schema: Value = serde_json::from_str(&stdout_of(&assert))?;
        assert_eq!(schema["title"], json!("FormSpec"));
        assert!(schema["properties"].get("views").is_some());
        Ok(())
    }

    #[test]
    fn render_rejects_a_broken_definition() -> CliResult<()> {
        let workspace = assert_fs::TempDir::new()?;
        workspace.child("form.json").write_str(r#"{"id": "x", "views": []}"#)?;
        Command::cargo_bin("greentic-forms")?
            .arg("render")
            .arg("--spec")
            .arg(workspace.child("form.json").path())
            .assert()
            .failure();
        Ok(())
    }
}
