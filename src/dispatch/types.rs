use crate::errors::TaskResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub version: &'static str,
    pub tasks: Vec<TaskInfo>,
}

#[derive(Debug, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorObj {
    pub code: String,
    pub message: String,
}

/// Wire form of a finished task: exactly one of `result` or `error`.
#[derive(Debug, Serialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObj>,
}

impl Outcome {
    pub fn new(id: Option<String>, res: TaskResult) -> Self {
        match res {
            Ok(v) => Self { id, ok: true, result: Some(v), error: None },
            Err(e) => Self { id, ok: false, result: None, error: Some(ErrorObj { code: e.code().to_string(), message: e.to_string() }) },
        }
    }
}
