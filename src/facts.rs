//! Host fact gathering.
//!
//! Facts are collected once per host and stored as remote variables:
//!
//! ```text
//! os:
//!   release:        parsed /etc/os-release (KEY=value)
//!   kernel_version: uname -r
//!   hostname:       hostname
//!   architecture:   arch
//! process:
//!   cpuInfo:        /proc/cpuinfo, one map per processor
//!   memInfo:        parsed /proc/meminfo (Key: value)
//! ```
//!
//! Connectors that implement [`GatherFacts`](crate::connection::GatherFacts)
//! answer directly; for the rest the host is probed over the generic
//! connector interface.

use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::connection::{ConnectionResult, Connector};
use crate::vars::JsonMap;

/// Gather facts through a connector, preferring its native implementation.
pub async fn gather(connector: &dyn Connector) -> ConnectionResult<JsonMap> {
    if let Some(native) = connector.gather_facts() {
        debug!(host = connector.host(), "using native fact gathering");
        return native.host_info().await;
    }
    probe(connector).await
}

/// Probe a host with commands and file reads.
pub async fn probe(connector: &dyn Connector) -> ConnectionResult<JsonMap> {
    let release = connector.fetch_file("/etc/os-release").await?;
    let kernel = connector.execute_command("uname -r").await?;
    let hostname = connector.execute_command("hostname").await?;
    let arch = connector.execute_command("arch").await?;
    let cpu = connector.fetch_file("/proc/cpuinfo").await?;
    let mem = connector.fetch_file("/proc/meminfo").await?;

    Ok(facts_map(
        parse_key_values(&String::from_utf8_lossy(&release), '='),
        kernel.stdout_trimmed(),
        hostname.stdout_trimmed(),
        arch.stdout_trimmed(),
        parse_records(&String::from_utf8_lossy(&cpu), ':'),
        parse_key_values(&String::from_utf8_lossy(&mem), ':'),
    ))
}

/// Assemble the fact layout from its parts
pub fn facts_map(
    release: JsonMap,
    kernel_version: &str,
    hostname: &str,
    architecture: &str,
    cpu_info: Vec<JsonMap>,
    mem_info: JsonMap,
) -> JsonMap {
    let facts = json!({
        "os": {
            "release": release,
            "kernel_version": kernel_version,
            "hostname": hostname,
            "architecture": architecture,
        },
        "process": {
            "cpuInfo": cpu_info,
            "memInfo": mem_info,
        },
    });
    match facts {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn split_line(line: &str, sep: char) -> Option<(String, JsonValue)> {
    let (key, value) = line.split_once(sep)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').trim_matches('\'');
    Some((key.to_string(), JsonValue::String(value.to_string())))
}

/// Parse `key<sep>value` lines into a map; lines without `sep` are ignored.
pub fn parse_key_values(text: &str, sep: char) -> JsonMap {
    text.lines().filter_map(|l| split_line(l, sep)).collect()
}

/// Parse blank-line separated records of `key<sep>value` lines.
pub fn parse_records(text: &str, sep: char) -> Vec<JsonMap> {
    let mut records = Vec::new();
    let mut current = JsonMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((k, v)) = split_line(line, sep) {
            current.insert(k, v);
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_os_release() {
        let release = parse_key_values("NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\n# comment\nID=ubuntu\n", '=');
        assert_eq!(release["NAME"], "Ubuntu");
        assert_eq!(release["VERSION_ID"], "22.04");
        assert_eq!(release["ID"], "ubuntu");
        assert_eq!(release.len(), 3);
    }

    #[test]
    fn test_parse_cpuinfo_records() {
        let text = "processor\t: 0\nmodel name\t: cpu\n\nprocessor\t: 1\nmodel name\t: cpu\n\n";
        let records = parse_records(text, ':');
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["processor"], "1");
        assert_eq!(records[0]["model name"], "cpu");
    }

    #[test]
    fn test_facts_layout() {
        let facts = facts_map(JsonMap::new(), "6.1.0", "node1", "x86_64", vec![], JsonMap::new());
        assert_eq!(facts["os"]["kernel_version"], "6.1.0");
        assert_eq!(facts["os"]["hostname"], "node1");
        assert!(facts["process"]["cpuInfo"].is_array());
    }
}
