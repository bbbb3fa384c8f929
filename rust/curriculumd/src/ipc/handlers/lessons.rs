use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, json_array_string, now_ts, parse_json_array_string, parse_opt_string,
    parse_string_array, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::Lesson;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

const LESSON_COLUMNS: &str = "id, title, passage, theme, age_group, duration, memory_verse_text, memory_verse_reference, objectives_json, description, created_at, updated_at";

/// Text fields a lesson carries besides its title, as (input key, column).
const TEXT_FIELDS: [(&str, &str); 7] = [
    ("passage", "passage"),
    ("theme", "theme"),
    ("ageGroup", "age_group"),
    ("duration", "duration"),
    ("memoryVerseText", "memory_verse_text"),
    ("memoryVerseReference", "memory_verse_reference"),
    ("description", "description"),
];

fn lesson_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<JsonValue> {
    let objectives_raw: String = row.get(8)?;
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "title": row.get::<_, String>(1)?,
        "passage": row.get::<_, String>(2)?,
        "theme": row.get::<_, String>(3)?,
        "ageGroup": row.get::<_, String>(4)?,
        "duration": row.get::<_, String>(5)?,
        "memoryVerseText": row.get::<_, String>(6)?,
        "memoryVerseReference": row.get::<_, String>(7)?,
        "objectives": parse_json_array_string(&objectives_raw),
        "description": row.get::<_, String>(9)?,
        "createdAt": row.get::<_, String>(10)?,
        "updatedAt": row.get::<_, String>(11)?,
    }))
}

/// The scheduler's view of the whole catalog.
pub fn load_catalog(conn: &Connection) -> rusqlite::Result<Vec<Lesson>> {
    let mut stmt = conn.prepare("SELECT id, title, passage, theme, duration FROM lessons")?;
    let rows = stmt.query_map([], |r| {
        Ok(Lesson {
            id: r.get(0)?,
            title: r.get(1)?,
            passage: r.get(2)?,
            theme: r.get(3)?,
            duration: r.get(4)?,
        })
    })?;
    rows.collect()
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sql = format!("SELECT {} FROM lessons ORDER BY title, id", LESSON_COLUMNS);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = match stmt.query_map([], lesson_to_json) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "lessons": lessons }))
}

fn handle_lessons_open(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sql = format!("SELECT {} FROM lessons WHERE id = ?", LESSON_COLUMNS);
    match conn
        .query_row(&sql, [&lesson_id], lesson_to_json)
        .optional()
    {
        Ok(Some(lesson)) => ok(&req.id, json!({ "lesson": lesson })),
        Ok(None) => err(&req.id, "not_found", "lesson not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn text_field(input: &Map<String, JsonValue>, key: &str) -> Result<Option<String>, String> {
    match input.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(String::new())),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()))
            .ok_or_else(|| format!("{} must be string or null", key)),
    }
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing input", None);
    };
    let title = match parse_opt_string(input.get("title")) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "input.title is required", None),
        Err(m) => return err(&req.id, "bad_params", format!("input.title {}", m), None),
    };
    let mut texts: Vec<String> = Vec::with_capacity(TEXT_FIELDS.len());
    for (key, _) in TEXT_FIELDS {
        match text_field(input, key) {
            Ok(v) => texts.push(v.unwrap_or_default()),
            Err(m) => return err(&req.id, "bad_params", format!("input.{}", m), None),
        }
    }
    let objectives = match parse_string_array(input.get("objectives")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.objectives {}", m), None),
    };

    let lesson_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(
            id, title, passage, theme, age_group, duration, memory_verse_text,
            memory_verse_reference, objectives_json, description, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            lesson_id,
            title,
            texts[0],
            texts[1],
            texts[2],
            texts[3],
            texts[4],
            texts[5],
            json_array_string(&objectives),
            texts[6],
            ts,
            ts
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    tracing::info!(lesson_id = %lesson_id, "lesson created");
    ok(&req.id, json!({ "lessonId": lesson_id }))
}

fn handle_lessons_update(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if patch.contains_key("title") {
        match parse_opt_string(patch.get("title")) {
            Ok(Some(v)) => {
                sets.push("title = ?".into());
                values.push(v.into());
            }
            Ok(None) => return err(&req.id, "bad_params", "patch.title must not be empty", None),
            Err(m) => return err(&req.id, "bad_params", format!("patch.title {}", m), None),
        }
    }
    for (key, column) in TEXT_FIELDS {
        match text_field(patch, key) {
            Ok(Some(v)) => {
                sets.push(format!("{} = ?", column));
                values.push(v.into());
            }
            Ok(None) => {}
            Err(m) => return err(&req.id, "bad_params", format!("patch.{}", m), None),
        }
    }
    if patch.contains_key("objectives") {
        match parse_string_array(patch.get("objectives")) {
            Ok(v) => {
                sets.push("objectives_json = ?".into());
                values.push(json_array_string(&v).into());
            }
            Err(m) => return err(&req.id, "bad_params", format!("patch.objectives {}", m), None),
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no known fields", None);
    }
    sets.push("updated_at = ?".into());
    values.push(now_ts().into());
    values.push(lesson_id.into());

    let sql = format!("UPDATE lessons SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "lesson not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Plans referencing the lesson keep the id; schedules report it as unresolved.
    match conn.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id]) {
        Ok(0) => err(&req.id, "not_found", "lesson not found", None),
        Ok(_) => {
            tracing::info!(lesson_id = %lesson_id, "lesson deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.open" => Some(handle_lessons_open(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.update" => Some(handle_lessons_update(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        _ => None,
    }
}
