use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use form_spec::{
    FormState, HostAction, HostError, HostRequest, HostResponse, HostTransport, NavRequest,
    NavigationController, NavigationError, Session, build_render_payload, navigate,
    render_json_ui, render_text,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{CliResult, RenderMode};

/// Accepts every request: moves to the requested view, or stays put when
/// none was named.
#[derive(Default)]
pub struct ConfirmingHost {
    submitted: Mutex<Option<Map<String, Value>>>,
}

impl ConfirmingHost {
    pub fn submitted(&self) -> Option<Map<String, Value>> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HostTransport for ConfirmingHost {
    async fn send(
        &self,
        action: HostAction,
        request: HostRequest,
    ) -> Result<HostResponse, HostError> {
        debug!(?action, view = request.current_view_id.as_str(), "host received request");
        if action == HostAction::Submit {
            *self.submitted.lock().unwrap_or_else(PoisonError::into_inner) = Some(request.data);
        }
        Ok(HostResponse {
            current_view_id: request.next_view_id.unwrap_or(request.current_view_id),
        })
    }
}

/// Pages through every reachable view, printing each one, then submits.
pub async fn walk(
    session: Session,
    format: RenderMode,
    out: &mut impl Write,
) -> CliResult<Arc<FormState>> {
    // Each view is left at most twice before a next_view rule is deemed to loop.
    let max_hops = session.form().views().len() * 2;
    let controller = NavigationController::new(&session);
    let shared = session.into_shared();
    let host = ConfirmingHost::default();

    for _ in 0..=max_hops {
        {
            let session = shared.lock().await;
            print_view(&session, format, out)?;
        }
        match navigate(&shared, &controller, &host, NavRequest::next()).await {
            Ok(_) => continue,
            Err(NavigationError::NoNextView(_)) => {
                let state = navigate(&shared, &controller, &host, NavRequest::submit())
                    .await
                    .map_err(|err| describe_failure(err, out))?;
                let data = host.submitted().unwrap_or_default();
                writeln!(out, "Submitted:")?;
                writeln!(out, "{}", serde_json::to_string_pretty(&data)?)?;
                return Ok(state);
            }
            Err(err) => return Err(describe_failure(err, out)),
        }
    }
    Err(format!("form did not finish within {max_hops} view changes").into())
}

fn print_view(session: &Session, format: RenderMode, out: &mut impl Write) -> CliResult<()> {
    let payload = build_render_payload(session);
    match format {
        RenderMode::Text => writeln!(out, "{}\n", render_text(&payload))?,
        RenderMode::Json => writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(&render_json_ui(&payload))?
        )?,
    }
    Ok(())
}

fn describe_failure(err: NavigationError, out: &mut impl Write) -> Box<dyn std::error::Error> {
    if let NavigationError::Blocked(errors) = &err {
        let _ = writeln!(out, "Validation errors:");
        for (item, messages) in errors {
            for message in messages {
                let _ = writeln!(out, "  {}: {}", item, message);
            }
        }
    }
    err.into()
}
