use serde_json::json;

use crate::schedule::ScheduleError;

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

pub fn schedule_err(id: &str, e: &ScheduleError) -> serde_json::Value {
    let details = match e {
        ScheduleError::InvalidDate { field, value } => json!({ "field": field, "value": value }),
        ScheduleError::InvertedRange { start, end } => json!({
            "startDate": start.to_string(),
            "endDate": end.to_string(),
        }),
    };
    err(id, e.code(), e.to_string(), Some(details))
}
