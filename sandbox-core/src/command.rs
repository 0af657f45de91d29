//! [`Command`] is the frame type for the newline-delimited JSON RPC between
//! the supervisor and a sandboxed child: one JSON object per line, with
//! `cmd`, `cmd_id`, and `reply` as the only mandatory fields.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use uuid::Uuid;

fn default_cmd() -> String {
    "unknown".to_string()
}

fn generate_cmd_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One newline-delimited JSON frame on the wire. Extra payload fields are
/// preserved verbatim via `#[serde(flatten)]` so resources can read
/// arbitrary fields without `Command` needing to know their shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(default = "default_cmd")]
    pub cmd: String,
    #[serde(default = "generate_cmd_id")]
    pub cmd_id: String,
    #[serde(default)]
    pub reply: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Command {
    /// Builds a fresh request-shaped command (`reply: false`) with a
    /// generated `cmd_id`.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            cmd_id: generate_cmd_id(),
            reply: false,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Parses one line of the wire protocol. A line that is not valid JSON,
    /// or not a JSON object, does not produce an error: it produces a
    /// well-formed `unknown` command carrying the raw line and the parse
    /// failure, so the registry's fallback resource can log-and-kill.
    pub fn from_line(line: &str) -> Self {
        match serde_json::from_str::<Command>(line) {
            Ok(command) => command,
            Err(e) => Self::unknown(line, &e.to_string()),
        }
    }

    fn unknown(line: &str, exception: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("line".to_string(), Value::String(line.to_string()));
        fields.insert("exception".to_string(), Value::String(exception.to_string()));
        Self {
            cmd: "unknown".to_string(),
            cmd_id: generate_cmd_id(),
            reply: false,
            fields,
        }
    }

    /// Splits `cmd` on the first `.` into `(resource_name, operation)`. An
    /// undotted name has no resource prefix.
    pub fn split_name(&self) -> (Option<&str>, &str) {
        match self.cmd.split_once('.') {
            Some((resource, operation)) => (Some(resource), operation),
            None => (None, self.cmd.as_str()),
        }
    }

    /// Builds the reply command: same `cmd` and `cmd_id`, `reply: true`,
    /// plus whatever payload fields the caller supplies.
    pub fn reply_with(&self, fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            cmd: self.cmd.clone(),
            cmd_id: self.cmd_id.clone(),
            reply: true,
            fields: fields.into_iter().collect(),
        }
    }

    /// A synthetic failure reply preserving `cmd_id`, used when a resource
    /// handler errors out.
    pub fn failure_reply(cmd: &str, cmd_id: &str, reason: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("success".to_string(), Value::Bool(false));
        fields.insert("reason".to_string(), Value::String(reason.into()));
        Self {
            cmd: cmd.to_string(),
            cmd_id: cmd_id.to_string(),
            reply: true,
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.fields
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Serializes to a single wire line, including the trailing `\n`.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
