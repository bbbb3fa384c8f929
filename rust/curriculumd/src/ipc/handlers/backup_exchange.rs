use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::core::summary_json;
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;

/// `params.workspacePath` when given, else the selected workspace.
fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, JsonValue> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> JsonValue {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let workspace = match target_workspace(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Flush WAL pages so the file on disk is complete.
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "wal checkpoint before export failed");
        }
    }

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => {
            tracing::info!(
                path = %out_path.display(),
                sha256 = %summary.db_sha256,
                "bundle exported"
            );
            ok(
                &req.id,
                json!({
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "dbSha256": summary.db_sha256
                }),
            )
        }
        Err(e) => {
            tracing::error!(path = %out_path.display(), error = %e, "bundle export failed");
            err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path.to_string_lossy() })),
            )
        }
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> JsonValue {
    let in_path = match required_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let workspace = match target_workspace(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !in_path.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path.to_string_lossy() })),
        );
    }

    // The open connection would hold the file being replaced.
    let replacing_open =
        state.db.is_some() && state.workspace.as_deref() == Some(workspace.as_path());
    if replacing_open {
        state.db = None;
    }

    let detected = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(summary) => summary.bundle_format_detected,
        Err(e) => {
            tracing::error!(path = %in_path.display(), error = %e, "bundle import failed");
            if replacing_open {
                if let Err(reopen) = state.open_workspace(&workspace) {
                    tracing::error!(
                        workspace = %workspace.display(),
                        error = %reopen,
                        "reopening workspace after failed import failed"
                    );
                }
            }
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path.to_string_lossy() })),
            );
        }
    };
    if let Err(e) = state.open_workspace(&workspace) {
        return err(&req.id, "db_open_failed", format!("{e:?}"), None);
    }
    tracing::info!(
        path = %in_path.display(),
        workspace = %workspace.display(),
        format = %detected,
        "bundle imported"
    );
    let summary = state.db.as_ref().map(summary_json).unwrap_or(JsonValue::Null);
    ok(
        &req.id,
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "bundleFormatDetected": detected,
            "summary": summary
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "workspace.exportBundle" => Some(handle_export_bundle(state, req)),
        "workspace.importBundle" => Some(handle_import_bundle(state, req)),
        _ => None,
    }
}
