//! Outbound notifications: Teams messages and interactive Slack approvals.

use serde_json::{json, Value};

use crate::client::Client;
use crate::error::{Error, Result};

/// Send a message to a Microsoft Teams conversation. `success` styles the
/// message; `card_block` optionally attaches an adaptive card.
pub fn send_teams_message(
    client: &Client,
    conversation_id: &str,
    text: &str,
    success: bool,
    card_block: Option<&Value>,
) -> Result<()> {
    client.post(
        "/teams/activities",
        &json!({
            "conversation_id": conversation_id,
            "text": text,
            "success": success,
            "card_block": card_block,
        }),
    )?;
    Ok(())
}

/// Parameters for [`request_interactive_slack_approval`]. All fields other
/// than the resource path and channel are optional refinements.
#[derive(Debug, Clone, Default)]
pub struct SlackApprovalRequest {
    pub slack_resource_path: String,
    pub channel_id: String,
    pub message: Option<String>,
    pub approver: Option<String>,
    /// Overrides for the default arguments of approval form fields.
    pub default_args_json: Option<Value>,
    /// Overrides for the enum choices of enum form fields.
    pub dynamic_enums_json: Option<Value>,
}

/// Send an interactive approval request via Slack for the current suspended
/// flow step.
///
/// Only valid inside a flow or flow preview: the ambient context must carry a
/// flow job id, otherwise this fails with [`Error::Config`].
pub fn request_interactive_slack_approval(
    client: &Client,
    request: &SlackApprovalRequest,
) -> Result<()> {
    if client.flow_job_id().is_none() {
        return Err(Error::Config(
            "interactive Slack approvals are only available inside a flow or flow preview".into(),
        ));
    }

    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(message) = &request.message {
        query.push(("message", message.clone()));
    }
    if let Some(approver) = &request.approver {
        query.push(("approver", approver.clone()));
    }
    if !request.slack_resource_path.is_empty() {
        query.push(("slack_resource_path", request.slack_resource_path.clone()));
    }
    if !request.channel_id.is_empty() {
        query.push(("channel_id", request.channel_id.clone()));
    }
    if let Some(step_id) = client.flow_step_id() {
        query.push(("flow_step_id", step_id.to_string()));
    }
    if let Some(args) = &request.default_args_json {
        query.push(("default_args_json", args.to_string()));
    }
    if let Some(enums) = &request.dynamic_enums_json {
        query.push(("dynamic_enums_json", enums.to_string()));
    }

    let endpoint = format!(
        "/w/{}/jobs/slack_approval/{}",
        client.workspace(),
        client.job_id().unwrap_or("NO_JOB_ID")
    );
    client.get_with(&endpoint, &query)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_approval_outside_flow_is_config_error() {
        let client = Client::builder()
            .base_url("http://localhost:1")
            .workspace("test-ws")
            .build()
            .unwrap();
        let request = SlackApprovalRequest {
            slack_resource_path: "u/alice/slack".into(),
            channel_id: "approvals".into(),
            ..Default::default()
        };
        let err = request_interactive_slack_approval(&client, &request).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
