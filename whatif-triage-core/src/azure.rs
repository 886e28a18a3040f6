// azure tool boundary - az what-if invocation and azd environment resolution

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

/// run `az deployment sub what-if` and return the parsed what-if document
///
/// az occasionally exits non-zero for deployment warnings while still
/// emitting a complete JSON document on stdout; that output is accepted.
/// a non-zero exit with no parseable output is fatal.
pub fn run_what_if(
    template: &str,
    location: &str,
    subscription: Option<&str>,
    parameters: &BTreeMap<String, String>,
) -> Result<Value> {
    let mut cmd = Command::new("az");
    cmd.args([
        "deployment",
        "sub",
        "what-if",
        "--location",
        location,
        "--template-file",
        template,
        "--output",
        "json",
        "--no-pretty-print",
    ]);

    if let Some(subscription) = subscription {
        cmd.args(["--subscription", subscription]);
    }

    for (key, value) in parameters {
        cmd.arg("--parameters").arg(format!("{key}={value}"));
    }

    debug!("invoking az what-if for template {template}");
    let output = cmd.output().context("failed to launch the az CLI")?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        if let Ok(document) = serde_json::from_str::<Value>(&stdout) {
            debug!("az exited non-zero but produced a parseable what-if document");
            return Ok(document);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("what-if failed: {}", stderr.trim());
    }

    serde_json::from_str(&stdout).context("failed to parse what-if output as JSON")
}

/// environment values from `azd env get-values`; empty on any failure
pub fn azd_env_values() -> BTreeMap<String, String> {
    let Ok(output) = Command::new("azd").args(["env", "get-values"]).output() else {
        return BTreeMap::new();
    };
    if !output.status.success() {
        return BTreeMap::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_env_values(&stdout)
}

/// parse KEY="value" lines as emitted by azd
pub fn parse_env_values(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            values.insert(key.to_string(), value.to_string());
        }
    }
    values
}

/// detect an azd project: azure.yaml present and a non-empty environment
pub fn detect_azd_project() -> (bool, BTreeMap<String, String>) {
    if !Path::new("azure.yaml").exists() {
        return (false, BTreeMap::new());
    }

    let values = azd_env_values();
    if values.is_empty() {
        return (false, BTreeMap::new());
    }

    (true, values)
}
