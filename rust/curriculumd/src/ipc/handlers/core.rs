use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;

pub(crate) fn summary_json(conn: &Connection) -> JsonValue {
    match db::workspace_summary(conn) {
        Ok(s) => json!({ "lessonCount": s.lessons, "planCount": s.plans }),
        Err(e) => {
            tracing::warn!(error = %e, "workspace summary unavailable");
            JsonValue::Null
        }
    }
}

fn handle_health(state: &mut AppState, req: &Request) -> JsonValue {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace_path_lossy(),
            "dbOpen": state.db.is_some()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> JsonValue {
    let path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    if let Err(e) = state.open_workspace(&path) {
        tracing::error!(workspace = %path.display(), error = %e, "workspace open failed");
        return err(
            &req.id,
            "db_open_failed",
            format!("{e:?}"),
            Some(json!({ "path": path.to_string_lossy() })),
        );
    }
    tracing::info!(workspace = %path.display(), "workspace selected");
    let summary = state.db.as_ref().map(summary_json).unwrap_or(JsonValue::Null);
    ok(
        &req.id,
        json!({ "workspacePath": path.to_string_lossy(), "summary": summary }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
