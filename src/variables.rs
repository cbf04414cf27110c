//! Workspace variables: path-addressed string values, optionally secret.
//!
//! Reads prefer the local mocked-API map when one is configured and fall back
//! to the network only on a miss; writes with a mock configured only ever
//! touch the mock.

use log::info;
use serde_json::{json, Value};

use crate::client::{check_status, Client};
use crate::error::Result;

/// Strip the `var://` addressing prefix. Strings without the prefix pass
/// through unchanged.
pub fn parse_variable_path(path: &str) -> &str {
    path.strip_prefix("var://").unwrap_or(path)
}

/// Get the variable at `path` as a string.
pub fn get_variable(client: &Client, path: &str) -> Result<String> {
    let path = parse_variable_path(path);
    if let Some(mock) = client.mocked_api() {
        let mock = mock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = mock.get_variable(path) {
            return Ok(value);
        }
        info!(
            "Mocked API present but variable missing path={}, falling back to real API",
            path
        );
    }

    let endpoint = format!("/w/{}/variables/get_value/{}", client.workspace(), path);
    let value: Value = client.get(&endpoint)?.json()?;
    match value {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Set the variable at `path`, creating it if it does not exist.
///
/// The existence probe treats 404 as "create", 2xx as "update", and raises
/// on anything else. Setting the same value twice is idempotent.
pub fn set_variable(client: &Client, path: &str, value: &str, is_secret: bool) -> Result<()> {
    let path = parse_variable_path(path);
    if let Some(mock) = client.mocked_api() {
        let mut mock = mock.lock().unwrap_or_else(|e| e.into_inner());
        mock.set_variable(path, value.to_string());
        return Ok(());
    }

    let probe = client.get_unchecked(&format!(
        "/w/{}/variables/get/{}",
        client.workspace(),
        path
    ))?;
    if probe.status().as_u16() == 404 {
        client.post(
            &format!("/w/{}/variables/create", client.workspace()),
            &json!({
                "path": path,
                "value": value,
                "is_secret": is_secret,
                "description": "",
            }),
        )?;
    } else {
        check_status("GET", probe)?;
        client.post(
            &format!("/w/{}/variables/update/{}", client.workspace(), path),
            &json!({ "value": value }),
        )?;
    }
    Ok(())
}
