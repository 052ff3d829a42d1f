use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Response envelope returned by the poll API.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PollResult {
    #[serde(default)]
    pub is_success: bool,
    #[serde(default, rename = "error_message")]
    pub err_msg: String,
    #[serde(default)]
    pub data: PollPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PollPayload {
    #[serde(default)]
    pub status_info: StatusInfo,
    /// On success: an ordered list of JSON-encoded objects, each one a string.
    #[serde(default)]
    pub data: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StatusInfo {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub message: String,
}

impl PollResult {
    pub fn success(items: Vec<Json>) -> Self {
        Self { is_success: true, err_msg: String::new(), data: PollPayload { status_info: StatusInfo::default(), data: Json::Array(items) } }
    }

    pub fn failure(err_msg: impl Into<String>) -> Self {
        Self { is_success: false, err_msg: err_msg.into(), data: PollPayload::default() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.data.status_info.message = message.into();
        self
    }

    pub fn status_message(&self) -> &str {
        &self.data.status_info.message
    }

    pub fn is_pending(&self) -> bool {
        self.status_message().contains(crate::WORKFLOW_PENDING)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("poll data is not a list (got {0})")]
    NotAList(&'static str),
    #[error("item {index} is not a string (got {found})")]
    NotAString { index: usize, found: &'static str },
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Check the whole batch before anything is applied. Returns the encoded objects in order.
pub fn validate_batch(data: &Json) -> Result<Vec<&str>, BatchError> {
    let list = data.as_array().ok_or(BatchError::NotAList(type_name(data)))?;
    list.iter()
        .enumerate()
        .map(|(index, item)| item.as_str().ok_or(BatchError::NotAString { index, found: type_name(item) }))
        .collect()
}
