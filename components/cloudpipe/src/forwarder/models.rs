// External crates
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Monitored resource type every entry of a run is associated with.
pub const GENERIC_TASK: &str = "generic_task";

/// Payload substituted for an empty line, so blank lines still produce one entry.
pub const BLANK_LINE_PAYLOAD: &str = " ";

/// Severity of a forwarded entry. Only the two severities a child's output
/// streams map to are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured unit handed to the forwarder.
///
/// `payload` is never empty, see [`LogEntry::from_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Build an entry from the raw bytes of one line (terminator already stripped).
    ///
    /// Invalid UTF-8 is replaced rather than rejected, and an empty line becomes
    /// [`BLANK_LINE_PAYLOAD`].
    pub fn from_line(severity: Severity, line: &[u8]) -> Self {
        let payload = if line.is_empty() {
            BLANK_LINE_PAYLOAD.to_string()
        } else {
            String::from_utf8_lossy(line).into_owned()
        };

        Self {
            severity,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Static metadata identifying the task whose output is being forwarded.
/// Built once from the command line and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub project_id: String,
    pub location: String,
    pub namespace: String,
    pub job: String,
    pub task_id: String,
}

impl ResourceDescriptor {
    /// Labels of the `generic_task` monitored resource, taken verbatim.
    pub fn labels(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("project_id", self.project_id.clone()),
            ("location", self.location.clone()),
            ("namespace", self.namespace.clone()),
            ("job", self.job.clone()),
            ("task_id", self.task_id.clone()),
        ])
    }

    pub fn to_monitored_resource(&self) -> MonitoredResource {
        MonitoredResource {
            kind: GENERIC_TASK,
            labels: self.labels(),
        }
    }
}

//
// ------------------------ Cloud Logging wire format ------------------------------
//

/// `MonitoredResource` as accepted by `entries:write`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub labels: BTreeMap<&'static str, String>,
}

/// A single `LogEntry` of the `entries:write` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntry<'a> {
    pub severity: Severity,
    pub text_payload: &'a str,
    pub timestamp: String,
}

impl<'a> From<&'a LogEntry> for WireEntry<'a> {
    fn from(entry: &'a LogEntry) -> Self {
        Self {
            severity: entry.severity,
            text_payload: &entry.payload,
            timestamp: entry
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        }
    }
}

/// Body of `POST /v2/entries:write`. `log_name` and `resource` apply to every
/// entry that does not set its own.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteEntriesRequest<'a> {
    pub log_name: &'a str,
    pub resource: &'a MonitoredResource,
    pub entries: Vec<WireEntry<'a>>,
    pub partial_success: bool,
}

/// Full resource name of the log entries are written to, with the log id
/// URL-encoded as the API requires.
pub fn log_name(project_id: &str, log_id: &str) -> String {
    let encoded: String = log_id
        .chars()
        .map(|c| match c {
            '/' => "%2F".to_string(),
            ' ' => "%20".to_string(),
            other => other.to_string(),
        })
        .collect();
    format!("projects/{project_id}/logs/{encoded}")
}
