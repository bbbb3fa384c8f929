use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

const DB_FILE_NAME: &str = "curriculum.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            passage TEXT NOT NULL,
            theme TEXT NOT NULL,
            age_group TEXT NOT NULL,
            duration TEXT NOT NULL,
            memory_verse_text TEXT NOT NULL,
            memory_verse_reference TEXT NOT NULL,
            objectives_json TEXT NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_plans(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            age_group TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // No foreign key on lesson_id: plans keep ids of deleted lessons.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_plan_lessons(
            plan_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            lesson_id TEXT NOT NULL,
            PRIMARY KEY(plan_id, position),
            FOREIGN KEY(plan_id) REFERENCES curriculum_plans(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_curriculum_plan_lessons_lesson ON curriculum_plan_lessons(lesson_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn plan_lesson_ids(conn: &Connection, plan_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT lesson_id FROM curriculum_plan_lessons WHERE plan_id = ? ORDER BY position",
    )?;
    let ids = stmt
        .query_map([plan_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Replaces a plan's lesson list. Callers wrap this in a transaction.
pub fn replace_plan_lesson_ids(
    conn: &Connection,
    plan_id: &str,
    lesson_ids: &[String],
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM curriculum_plan_lessons WHERE plan_id = ?",
        [plan_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO curriculum_plan_lessons(plan_id, position, lesson_id) VALUES(?, ?, ?)",
    )?;
    for (i, id) in lesson_ids.iter().enumerate() {
        stmt.execute((plan_id, i as i64, id))?;
    }
    Ok(())
}

/// Row counts reported when a workspace is opened or restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceSummary {
    pub lessons: i64,
    pub plans: i64,
}

pub fn workspace_summary(conn: &Connection) -> rusqlite::Result<WorkspaceSummary> {
    let lessons = conn.query_row("SELECT COUNT(*) FROM lessons", [], |r| r.get(0))?;
    let plans = conn.query_row("SELECT COUNT(*) FROM curriculum_plans", [], |r| r.get(0))?;
    Ok(WorkspaceSummary { lessons, plans })
}
