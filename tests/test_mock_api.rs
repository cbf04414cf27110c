mod common;

use std::io::Write;

use common::WORKSPACE;
use gust_client::{resources, variables, Client};
use serde_json::json;
use tempfile::NamedTempFile;

fn mock_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn client_with_mock(server: &mockito::ServerGuard, file: &NamedTempFile) -> Client {
    common::init_logging();
    Client::builder()
        .base_url(server.url())
        .token("test-token")
        .workspace(WORKSPACE)
        .mocked_api_file(file.path())
        .build()
        .unwrap()
}

#[test]
fn test_mocked_variable_read_skips_network() {
    let mut server = mockito::Server::new();
    // Any network fetch would hit this and fail the count assertion.
    let network = server
        .mock("GET", mockito::Matcher::Any)
        .expect(0)
        .create();

    let file = mock_file(r#"{"variables": {"a": "1"}}"#);
    let client = client_with_mock(&server, &file);

    assert_eq!(variables::get_variable(&client, "a").unwrap(), "1");
    network.assert();
}

#[test]
fn test_mock_miss_falls_through_to_network() {
    let mut server = mockito::Server::new();
    let get = server
        .mock("GET", "/api/w/test-ws/variables/get_value/b")
        .with_header("content-type", "application/json")
        .with_body(r#""2""#)
        .expect(1)
        .create();

    let file = mock_file(r#"{"variables": {"a": "1"}}"#);
    let client = client_with_mock(&server, &file);

    assert_eq!(variables::get_variable(&client, "b").unwrap(), "2");
    get.assert();
}

#[test]
fn test_mocked_writes_never_touch_network() {
    let mut server = mockito::Server::new();
    let network = server
        .mock("POST", mockito::Matcher::Any)
        .expect(0)
        .create();

    let file = mock_file(r#"{"variables": {}, "resources": {}}"#);
    let client = client_with_mock(&server, &file);

    variables::set_variable(&client, "x", "y", false).unwrap();
    resources::set_resource(&client, &json!({"k": 1}), "r", "any").unwrap();
    assert_eq!(variables::get_variable(&client, "x").unwrap(), "y");
    assert_eq!(
        resources::get_resource(&client, "r", false).unwrap(),
        Some(json!({"k": 1}))
    );
    network.assert();
}

#[test]
fn test_mocked_resource_miss_with_none_if_undefined() {
    let mut server = mockito::Server::new();
    let network = server
        .mock("GET", mockito::Matcher::Any)
        .expect(0)
        .create();

    let file = mock_file(r#"{"resources": {"present": {"ok": true}}}"#);
    let client = client_with_mock(&server, &file);

    assert_eq!(
        resources::get_resource(&client, "absent", true).unwrap(),
        None
    );
    network.assert();
}

#[test]
fn test_malformed_mock_file_degrades_to_empty_mock() {
    let mut server = mockito::Server::new();
    let get = server
        .mock("GET", "/api/w/test-ws/variables/get_value/a")
        .with_header("content-type", "application/json")
        .with_body(r#""from-network""#)
        .expect(1)
        .create();

    let file = mock_file("{ this is not json");
    let client = client_with_mock(&server, &file);

    // Construction tolerated the bad file; the empty mock misses and the read
    // falls through to the network.
    assert_eq!(variables::get_variable(&client, "a").unwrap(), "from-network");
    get.assert();
}
