use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// Method families, tried in order. Each claims only its own method names.
const FAMILIES: [(&str, TryHandle); 5] = [
    ("core", handlers::core::try_handle),
    ("setup", handlers::setup::try_handle),
    ("lessons", handlers::lessons::try_handle),
    ("curriculum", handlers::curriculum::try_handle),
    ("backup", handlers::backup_exchange::try_handle),
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for (family, try_handle) in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            tracing::debug!(id = %req.id, method = %req.method, family, "dispatched");
            return resp;
        }
    }
    tracing::warn!(id = %req.id, method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
