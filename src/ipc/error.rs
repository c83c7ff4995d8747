use crate::workflow::WorkflowError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr::new("not_found", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        HandlerErr::new("invalid_state", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HandlerErr::new("forbidden", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<WorkflowError> for HandlerErr {
    fn from(e: WorkflowError) -> Self {
        let details = match &e {
            WorkflowError::CapacityExceeded {
                spots_remaining,
                requested,
            } => Some(json!({ "spotsRemaining": spots_remaining, "requested": requested })),
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

/// Storage failures keep their detail in the log; callers only see `failed to <action>`.
pub fn db_err(code: &'static str, action: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| {
        tracing::error!(error = %e, code, "failed to {}", action);
        HandlerErr::new(code, format!("failed to {}", action))
    }
}
