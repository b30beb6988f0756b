use serde::Serialize;
use tracing::debug;

use crate::core::controller::Controller;
use crate::core::tasks::{Payload, Task};
use crate::core::wire;

/// Body of `POST /results/{session}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub tasking_id: i64,
    pub session: String,
    #[serde(rename = "task")]
    pub kind: String,
    /// Encoded copy of the task's original arguments.
    pub args: String,
    /// Encoded handler output.
    #[serde(rename = "results")]
    pub payload: String,
}

impl TaskResult {
    pub fn new(task: &Task, encoded_payload: String) -> Self {
        Self {
            tasking_id: task.id,
            session: task.session.clone(),
            kind: task.kind.clone(),
            args: wire::encode(task.args()),
            payload: encoded_payload,
        }
    }

    pub fn from_payload(task: &Task, payload: &Payload) -> Self {
        let encoded = match payload {
            Payload::Text(text) => wire::encode(text),
            Payload::File(bytes) => {
                wire::encode_bin(bytes).unwrap_or_else(|e| wire::encode(&e.to_string()))
            }
        };
        Self::new(task, encoded)
    }
}

/// Posts the result for `task`. Delivery is fire-and-forget: a failed post
/// is logged and dropped.
pub async fn ship(controller: &dyn Controller, task: &Task, payload: Payload) {
    let result = TaskResult::from_payload(task, &payload);
    if let Err(e) = controller.post_result(&result).await {
        debug!("Dropping result for task {}: {:#}", task.id, e);
    }
}
