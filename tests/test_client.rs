mod common;

use common::test_client;
use gust_client::{jobs, notify, Error};
use mockito::Matcher;
use serde_json::json;

#[test]
fn test_requests_carry_bearer_token() {
    let mut server = mockito::Server::new();
    let version = server
        .mock("GET", "/api/version")
        .match_header("authorization", "Bearer test-token")
        .with_body("CE.412.1")
        .expect(1)
        .create();

    let client = test_client(&server);
    assert_eq!(client.version().unwrap(), "CE.412.1");
    version.assert();
}

#[test]
fn test_create_token_posts_label_and_expiration() {
    let mut server = mockito::Server::new();
    let create = server
        .mock("POST", "/api/users/tokens/create")
        .match_body(Matcher::Regex(
            r#""expiration":"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z""#.into(),
        ))
        .with_body("new-token")
        .expect(1)
        .create();

    let client = test_client(&server);
    let token = client.create_token(chrono::Duration::days(1)).unwrap();
    assert_eq!(token, "new-token");
    create.assert();
}

#[test]
fn test_whoami_and_username_to_email() {
    let mut server = mockito::Server::new();
    let _whoami = server
        .mock("GET", "/api/users/whoami")
        .with_header("content-type", "application/json")
        .with_body(r#"{"username":"alice","email":"alice@example.com"}"#)
        .create();
    let _email = server
        .mock("GET", "/api/w/test-ws/users/username_to_email/alice")
        .with_body("alice@example.com")
        .create();

    let client = test_client(&server);
    assert_eq!(client.whoami().unwrap()["username"], json!("alice"));
    assert_eq!(
        client.username_to_email("alice").unwrap(),
        "alice@example.com"
    );
}

#[test]
fn test_get_id_token() {
    let mut server = mockito::Server::new();
    let _token = server
        .mock("POST", "/api/w/test-ws/oidc/token/aws")
        .with_body("ey.jwt.token")
        .create();

    let client = test_client(&server);
    assert_eq!(client.get_id_token("aws").unwrap(), "ey.jwt.token");
}

#[test]
fn test_send_teams_message() {
    let mut server = mockito::Server::new();
    let teams = server
        .mock("POST", "/api/teams/activities")
        .match_body(Matcher::Json(json!({
            "conversation_id": "conv-1",
            "text": "deploy finished",
            "success": true,
            "card_block": null,
        })))
        .with_body("{}")
        .expect(1)
        .create();

    let client = test_client(&server);
    notify::send_teams_message(&client, "conv-1", "deploy finished", true, None).unwrap();
    teams.assert();
}

#[test]
fn test_slack_approval_sends_flow_context() {
    let mut server = mockito::Server::new();
    let approval = server
        .mock("GET", "/api/w/test-ws/jobs/slack_approval/job-current")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("slack_resource_path".into(), "u/alice/slack".into()),
            Matcher::UrlEncoded("channel_id".into(), "approvals".into()),
            Matcher::UrlEncoded("flow_step_id".into(), "step-a".into()),
        ]))
        .with_body("{}")
        .expect(1)
        .create();

    let client = gust_client::Client::builder()
        .base_url(server.url())
        .token("test-token")
        .workspace(common::WORKSPACE)
        .job_id("job-current")
        .flow_job_id("flow-1")
        .flow_step_id("step-a")
        .build()
        .unwrap();

    let request = notify::SlackApprovalRequest {
        slack_resource_path: "u/alice/slack".into(),
        channel_id: "approvals".into(),
        ..Default::default()
    };
    notify::request_interactive_slack_approval(&client, &request).unwrap();
    approval.assert();
}

#[test]
fn test_resume_urls_requires_no_job_context() {
    let mut server = mockito::Server::new();
    let _urls = server
        .mock(
            "GET",
            Matcher::Regex(r"^/api/w/test-ws/jobs/resume_urls/NO_ID/\d+$".into()),
        )
        .with_header("content-type", "application/json")
        .with_body(r#"{"resume":"http://r","cancel":"http://c"}"#)
        .create();

    let client = test_client(&server);
    let urls = jobs::get_resume_urls(&client, None).unwrap();
    assert_eq!(urls["resume"], json!("http://r"));
}

#[test]
fn test_set_progress_attributes_parent_flow() {
    let mut server = mockito::Server::new();
    let _job = server
        .mock("GET", "/api/w/test-ws/jobs_u/get/job-current")
        .with_header("content-type", "application/json")
        .with_body(r#"{"type":"QueuedJob","parent_job":"flow-9"}"#)
        .create();
    let progress = server
        .mock("POST", "/api/w/test-ws/job_metrics/set_progress/job-current")
        .match_body(Matcher::Json(json!({"percent": 40, "flow_job_id": "flow-9"})))
        .with_body("{}")
        .expect(1)
        .create();

    let client = common::test_client_with_job_context(&server);
    jobs::set_progress(&client, 40, None).unwrap();
    progress.assert();
}

#[test]
fn test_missing_workspace_is_config_error() {
    let err = gust_client::Client::builder().build().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
