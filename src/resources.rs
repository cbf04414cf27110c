//! Workspace resources: path-addressed JSON values tagged with a resource
//! type, plus the state helpers built on top of them.
//!
//! The mock-first read/write policy matches [`crate::variables`].

use log::{error, info};
use serde_json::{json, Value};

use crate::client::{check_status, Client};
use crate::error::Result;

/// Resource type used by the state helpers.
const STATE_RESOURCE_TYPE: &str = "state";

/// Strip the `res://` or `$res:` addressing prefix. Strings without either
/// prefix pass through unchanged.
pub fn parse_resource_path(path: &str) -> &str {
    if let Some(rest) = path.strip_prefix("res://") {
        return rest;
    }
    path.strip_prefix("$res:").unwrap_or(path)
}

/// Get the resource value at `path`, with interpolated nested references.
///
/// With `none_if_undefined`, a missing resource yields `Ok(None)` instead of
/// an error.
pub fn get_resource(client: &Client, path: &str, none_if_undefined: bool) -> Result<Option<Value>> {
    let path = parse_resource_path(path);
    if let Some(mock) = client.mocked_api() {
        let mock = mock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = mock.get_resource(path) {
            return Ok(Some(value));
        }
        if none_if_undefined {
            info!(
                "Resource missing from mock path={} none_if_undefined=true, returning None",
                path
            );
            return Ok(None);
        }
        info!(
            "Mocked API present but resource missing path={}, falling back to real API",
            path
        );
    }

    let endpoint = format!(
        "/w/{}/resources/get_value_interpolated/{}",
        client.workspace(),
        path
    );
    match client.get(&endpoint) {
        Ok(resp) => Ok(Some(resp.json()?)),
        Err(e) if none_if_undefined => {
            info!("Resource fetch failed path={} error={}", path, e);
            Ok(None)
        }
        Err(e) => {
            error!("Resource fetch failed path={} error={}", path, e);
            Err(e)
        }
    }
}

/// Set the resource at `path`, creating it with `resource_type` if it does
/// not exist.
///
/// Same create-or-update policy as variables: 404 probe creates, 2xx updates,
/// anything else raises. Idempotent for repeated identical writes.
pub fn set_resource(client: &Client, value: &Value, path: &str, resource_type: &str) -> Result<()> {
    let path = parse_resource_path(path);
    if let Some(mock) = client.mocked_api() {
        let mut mock = mock.lock().unwrap_or_else(|e| e.into_inner());
        mock.set_resource(path, value.clone());
        return Ok(());
    }

    let probe = client.get_unchecked(&format!(
        "/w/{}/resources/get/{}",
        client.workspace(),
        path
    ))?;
    if probe.status().as_u16() == 404 {
        client.post(
            &format!("/w/{}/resources/create", client.workspace()),
            &json!({
                "path": path,
                "value": value,
                "resource_type": resource_type,
            }),
        )?;
    } else {
        check_status("GET", probe)?;
        client.post(
            &format!("/w/{}/resources/update_value/{}", client.workspace(), path),
            &json!({ "value": value }),
        )?;
    }
    Ok(())
}

/// The state of the current script, stored at the configured state path.
pub fn get_state(client: &Client) -> Result<Option<Value>> {
    let state_path = client.state_path()?.to_string();
    get_resource(client, &state_path, true)
}

/// Set the state of the current script.
pub fn set_state(client: &Client, value: &Value) -> Result<()> {
    let state_path = client.state_path()?.to_string();
    set_resource(client, value, &state_path, STATE_RESOURCE_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("res://foo/bar", "foo/bar")]
    #[case("$res:foo/bar", "foo/bar")]
    #[case("foo/bar", "foo/bar")]
    #[case("res://", "")]
    #[case("$res:", "")]
    #[case("var://foo", "var://foo")]
    fn test_parse_resource_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse_resource_path(input), expected);
    }
}
