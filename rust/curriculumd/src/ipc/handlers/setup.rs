use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{AgeGroup, RangePolicy};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Curriculum,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "curriculum" => Some(Self::Curriculum),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Curriculum => "setup.curriculum",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CurriculumSetup {
    pub range_policy: RangePolicy,
    pub default_age_group: AgeGroup,
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Curriculum => json!({
            "invertedRangePolicy": RangePolicy::default().as_str(),
            "defaultAgeGroup": AgeGroup::default().label()
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Curriculum => match k.as_str() {
                "invertedRangePolicy" => {
                    let policy = v
                        .as_str()
                        .and_then(RangePolicy::parse)
                        .ok_or("invertedRangePolicy must be one of: reject, tolerate")?;
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "defaultAgeGroup" => {
                    let group = v.as_str().and_then(AgeGroup::parse).ok_or_else(|| {
                        format!(
                            "defaultAgeGroup must be one of: {}",
                            AgeGroup::ALL.map(|g| g.label()).join(", ")
                        )
                    })?;
                    obj.insert(k.clone(), Value::String(group.label().to_string()));
                }
                _ => return Err(format!("unknown curriculum field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values keep their defaults.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

pub fn load_curriculum_setup(conn: &Connection) -> anyhow::Result<CurriculumSetup> {
    let section = load_section(conn, SetupSection::Curriculum)?;
    let range_policy = section
        .get("invertedRangePolicy")
        .and_then(|v| v.as_str())
        .and_then(RangePolicy::parse)
        .unwrap_or_default();
    let default_age_group = section
        .get("defaultAgeGroup")
        .and_then(|v| v.as_str())
        .and_then(AgeGroup::parse)
        .unwrap_or_default();
    Ok(CurriculumSetup {
        range_policy,
        default_age_group,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let section_raw = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .unwrap_or("curriculum");
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    match load_section(conn, section) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
