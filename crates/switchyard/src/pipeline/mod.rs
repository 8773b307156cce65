//! Action pipeline.
//!
//! A matched handler's steps run strictly in order against one
//! [`RequestContext`]. The first step that commits a response ends the run;
//! a failing step commits a 500 and ends it too.

use crate::error::ActionError;
use crate::rules::{ActionKind, Handler, Step};
use crate::scripting::{ScriptRequest, ScriptRunner};
use std::sync::Arc;
use tracing::{debug, error, info};

mod balancing;
mod client;
mod context;
mod forwarding;
mod response;

pub use balancing::select_backend;
pub use client::{create_http_client, HttpClient};
pub use context::RequestContext;
pub use forwarding::{forward, parse_backend};
pub use response::{
    content_response, empty_body, error_response, json_response, GatewayBody, ResponseExt,
};

/// Executes handler steps. Shared by every connection task.
#[derive(Clone)]
pub struct Pipeline {
    client: HttpClient,
    scripts: Arc<dyn ScriptRunner>,
}

impl Pipeline {
    pub fn new(client: HttpClient, scripts: Arc<dyn ScriptRunner>) -> Self {
        Self { client, scripts }
    }

    /// Run `handler`'s steps until one finishes the context or all have run.
    pub async fn execute(&self, handler: &Handler, ctx: &mut RequestContext) {
        for (index, step) in handler.steps.iter().enumerate() {
            info!(
                step = index,
                uri = %ctx.request().uri(),
                rule = handler.index,
                action = %step.action,
                parameters = ?step.parameters,
                "Executing {}", step
            );

            if let Err(e) = self.run_step(step, ctx).await {
                error!(
                    rule = handler.index,
                    step = index,
                    "Action '{}' failed: {}", step.action, e
                );
                ctx.fail(&e.to_string());
            }

            if ctx.is_finished() {
                return;
            }
        }
        debug!(rule = handler.index, "Pipeline ended without a response");
    }

    async fn run_step(&self, step: &Step, ctx: &mut RequestContext) -> Result<(), ActionError> {
        match step.kind {
            ActionKind::Proxy => {
                let address = first_parameter(step)?;
                forward(&self.client, address, ctx).await
            }
            ActionKind::Balancing => {
                let address = select_backend(&step.parameters, &mut rand::thread_rng())
                    .ok_or(ActionError::MissingParameter {
                        action: step.kind.as_str(),
                    })?
                    .to_string();
                debug!("Balancing selected {}", address);
                forward(&self.client, &address, ctx).await
            }
            ActionKind::Json => {
                let literal = first_parameter(step)?;
                ctx.finish(json_response(literal));
                Ok(())
            }
            ActionKind::Call => {
                let script_id = first_parameter(step)?;
                let request = ScriptRequest::from_request(ctx.request());
                let outcome = self.scripts.run(script_id, request).await?;
                if let Some(response) = outcome.response {
                    ctx.finish(content_response(response.content_type, response.body));
                }
                Ok(())
            }
            ActionKind::Unknown => {
                debug!("Skipping unknown action '{}'", step.action);
                Ok(())
            }
        }
    }
}

fn first_parameter(step: &Step) -> Result<&str, ActionError> {
    step.parameters
        .first()
        .map(String::as_str)
        .ok_or(ActionError::MissingParameter {
            action: step.kind.as_str(),
        })
}
