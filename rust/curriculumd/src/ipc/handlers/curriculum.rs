use crate::db;
use crate::ipc::error::{err, ok, schedule_err};
use crate::ipc::handlers::lessons::load_catalog;
use crate::ipc::handlers::setup::{load_curriculum_setup, CurriculumSetup};
use crate::ipc::helpers::{
    db_conn, now_ts, parse_bool, parse_opt_string, parse_string_array, required_str, today_param,
};
use crate::ipc::types::{AppState, Request};
use crate::ics::CalendarExport;
use crate::schedule::{
    self, AgeGroup, DateRange, PlanSchedule, PlanStatus, RangePolicy, DATE_FORMAT,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PlanRow {
    id: String,
    title: String,
    description: String,
    start_date: String,
    end_date: String,
    age_group: String,
    created_at: String,
    updated_at: String,
    lesson_ids: Vec<String>,
}

impl PlanRow {
    fn to_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "title": self.title,
            "description": self.description,
            "startDate": self.start_date,
            "endDate": self.end_date,
            "ageGroup": self.age_group,
            "lessonIds": self.lesson_ids,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }

    /// Range for display. Stored plans were validated on write, so listing
    /// never rejects; only scheduling applies the configured policy.
    fn display_range(&self) -> Option<DateRange> {
        DateRange::parse(&self.start_date, &self.end_date, RangePolicy::Tolerate).ok()
    }
}

const PLAN_COLUMNS: &str =
    "id, title, description, start_date, end_date, age_group, created_at, updated_at";

fn plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanRow> {
    Ok(PlanRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        age_group: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        lesson_ids: Vec::new(),
    })
}

fn load_plan(conn: &Connection, plan_id: &str) -> rusqlite::Result<Option<PlanRow>> {
    let sql = format!("SELECT {} FROM curriculum_plans WHERE id = ?", PLAN_COLUMNS);
    let Some(mut plan) = conn.query_row(&sql, [plan_id], plan_from_row).optional()? else {
        return Ok(None);
    };
    plan.lesson_ids = db::plan_lesson_ids(conn, plan_id)?;
    Ok(Some(plan))
}

fn load_plans(conn: &Connection) -> rusqlite::Result<Vec<PlanRow>> {
    let sql = format!(
        "SELECT {} FROM curriculum_plans ORDER BY start_date, title, id",
        PLAN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut plans = stmt
        .query_map([], plan_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for plan in plans.iter_mut() {
        plan.lesson_ids = db::plan_lesson_ids(conn, &plan.id)?;
    }
    Ok(plans)
}

fn load_setup(conn: &Connection, req: &Request) -> Result<CurriculumSetup, JsonValue> {
    load_curriculum_setup(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn parse_age_group(v: Option<&JsonValue>, key: &str) -> Result<Option<AgeGroup>, String> {
    match parse_opt_string(v) {
        Ok(None) => Ok(None),
        Ok(Some(raw)) => AgeGroup::parse(&raw).map(Some).ok_or_else(|| {
            format!(
                "{} must be one of: {}",
                key,
                AgeGroup::ALL.map(|g| g.label()).join(", ")
            )
        }),
        Err(m) => Err(format!("{} {}", key, m)),
    }
}

fn validated_range(
    req: &Request,
    start: &str,
    end: &str,
    policy: RangePolicy,
) -> Result<DateRange, JsonValue> {
    DateRange::parse(start, end, policy).map_err(|e| {
        tracing::warn!(start = %start, end = %end, error = %e, "plan dates rejected");
        schedule_err(&req.id, &e)
    })
}

fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn handle_curriculum_list(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let today = match today_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plans = match load_plans(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let out: Vec<JsonValue> = plans
        .iter()
        .map(|plan| {
            let mut obj = plan.to_json();
            let range = plan.display_range();
            obj["status"] = json!(range.map(|r| r.status(today)));
            obj["weeksDuration"] = json!(range.map(|r| r.weeks()));
            obj["lessonCount"] = json!(plan.lesson_ids.len());
            obj
        })
        .collect();
    ok(&req.id, json!({ "plans": out }))
}

fn handle_curriculum_open(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match load_plan(conn, &plan_id) {
        Ok(Some(plan)) => ok(&req.id, json!({ "plan": plan.to_json() })),
        Ok(None) => err(&req.id, "not_found", "curriculum plan not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_curriculum_create(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let setup = match load_setup(conn, req) {
        Ok(v) => v,
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
    let description = match parse_opt_string(input.get("description")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("input.description {}", m), None),
    };
    let (start_raw, end_raw) = match (
        parse_opt_string(input.get("startDate")),
        parse_opt_string(input.get("endDate")),
    ) {
        (Ok(Some(s)), Ok(Some(e))) => (s, e),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "input.startDate and input.endDate are required strings",
                None,
            )
        }
    };
    let range = match validated_range(req, &start_raw, &end_raw, setup.range_policy) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let age_group = match parse_age_group(input.get("ageGroup"), "input.ageGroup") {
        Ok(v) => v.unwrap_or(setup.default_age_group),
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let lesson_ids = match parse_string_array(input.get("lessonIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.lessonIds {}", m), None),
    };

    let plan_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO curriculum_plans(
            id, title, description, start_date, end_date, age_group, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            plan_id,
            title,
            description,
            fmt_date(range.start),
            fmt_date(range.end),
            age_group.label(),
            ts,
            ts
        ],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = db::replace_plan_lesson_ids(&tx, &plan_id, &lesson_ids) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(plan_id = %plan_id, lessons = lesson_ids.len(), "curriculum plan created");
    ok(&req.id, json!({ "planId": plan_id }))
}

fn handle_curriculum_update(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let setup = match load_setup(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let mut plan = match load_plan(conn, &plan_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "curriculum plan not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(m) = apply_plan_patch(&mut plan, patch) {
        return err(&req.id, "bad_params", m, None);
    }
    if patch.contains_key("startDate") || patch.contains_key("endDate") {
        let range = match validated_range(req, &plan.start_date, &plan.end_date, setup.range_policy)
        {
            Ok(v) => v,
            Err(e) => return e,
        };
        plan.start_date = fmt_date(range.start);
        plan.end_date = fmt_date(range.end);
    }
    plan.updated_at = now_ts();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE curriculum_plans
         SET title = ?, description = ?, start_date = ?, end_date = ?, age_group = ?, updated_at = ?
         WHERE id = ?",
        params![
            plan.title,
            plan.description,
            plan.start_date,
            plan.end_date,
            plan.age_group,
            plan.updated_at,
            plan.id
        ],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if patch.contains_key("lessonIds") {
        if let Err(e) = db::replace_plan_lesson_ids(&tx, &plan.id, &plan.lesson_ids) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "plan": plan.to_json() }))
}

fn apply_plan_patch(plan: &mut PlanRow, patch: &Map<String, JsonValue>) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "title" => match parse_opt_string(Some(v)) {
                Ok(Some(s)) => plan.title = s,
                Ok(None) => return Err("patch.title must not be empty".into()),
                Err(m) => return Err(format!("patch.title {}", m)),
            },
            "description" => {
                plan.description = parse_opt_string(Some(v))
                    .map_err(|m| format!("patch.description {}", m))?
                    .unwrap_or_default();
            }
            "startDate" | "endDate" => {
                let s = parse_opt_string(Some(v))
                    .map_err(|m| format!("patch.{} {}", k, m))?
                    .ok_or_else(|| format!("patch.{} must not be empty", k))?;
                if k == "startDate" {
                    plan.start_date = s;
                } else {
                    plan.end_date = s;
                }
            }
            "ageGroup" => {
                if let Some(g) = parse_age_group(Some(v), "patch.ageGroup")? {
                    plan.age_group = g.label().to_string();
                }
            }
            "lessonIds" => {
                plan.lesson_ids =
                    parse_string_array(Some(v)).map_err(|m| format!("patch.lessonIds {}", m))?;
            }
            _ => return Err(format!("unknown plan field: {}", k)),
        }
    }
    Ok(())
}

fn is_permutation(current: &[String], proposed: &[String]) -> bool {
    let mut a = current.to_vec();
    let mut b = proposed.to_vec();
    a.sort();
    b.sort();
    a == b
}

fn handle_curriculum_reorder(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_order) = req.params.get("lessonIdOrder") else {
        return err(&req.id, "bad_params", "missing lessonIdOrder", None);
    };
    let order = match parse_string_array(Some(raw_order)) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("lessonIdOrder {}", m), None),
    };
    let current = match load_plan(conn, &plan_id) {
        Ok(Some(p)) => p.lesson_ids,
        Ok(None) => return err(&req.id, "not_found", "curriculum plan not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !is_permutation(&current, &order) {
        return err(
            &req.id,
            "bad_params",
            "lessonIdOrder must be a permutation of the plan's lessonIds",
            Some(json!({ "lessonIds": current })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = db::replace_plan_lesson_ids(&tx, &plan_id, &order) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE curriculum_plans SET updated_at = ? WHERE id = ?",
        params![now_ts(), plan_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_curriculum_delete(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM curriculum_plans WHERE id = ?", [&plan_id]) {
        Ok(0) => err(&req.id, "not_found", "curriculum plan not found", None),
        Ok(_) => {
            tracing::info!(plan_id = %plan_id, "curriculum plan deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_curriculum_stats(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let today = match today_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plans = match load_plans(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let (mut active, mut upcoming, mut completed) = (0usize, 0usize, 0usize);
    for plan in &plans {
        match plan.display_range().map(|r| r.status(today)) {
            Some(PlanStatus::Active) => active += 1,
            Some(PlanStatus::Upcoming) => upcoming += 1,
            Some(PlanStatus::Completed) => completed += 1,
            None => {}
        }
    }
    let total_lessons: usize = plans.iter().map(|p| p.lesson_ids.len()).sum();
    ok(
        &req.id,
        json!({
            "totalPlans": plans.len(),
            "activePlans": active,
            "upcomingPlans": upcoming,
            "completedPlans": completed,
            "totalLessons": total_lessons
        }),
    )
}

/// Shared by `curriculum.schedule`, `curriculum.preview` and `curriculum.exportIcs`.
fn compute_schedule(
    conn: &Connection,
    req: &Request,
    start: &str,
    end: &str,
    lesson_ids: &[String],
) -> Result<PlanSchedule, JsonValue> {
    let setup = load_setup(conn, req)?;
    let today = today_param(req)?;
    let strict = parse_bool(req.params.get("strict"), false)
        .map_err(|m| err(&req.id, "bad_params", format!("strict {}", m), None))?;
    let range = validated_range(req, start, end, setup.range_policy)?;
    let catalog = load_catalog(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    if strict {
        if let Err(unresolved) = schedule::resolve_lessons(lesson_ids, &catalog) {
            return Err(err(
                &req.id,
                "unresolved_lessons",
                format!("{} lesson id(s) do not resolve", unresolved.len()),
                Some(json!({ "unresolvedLessonIds": unresolved })),
            ));
        }
    }

    let plan_schedule = schedule::build_schedule(range, lesson_ids, &catalog, today);
    for missing in &plan_schedule.unresolved_lesson_ids {
        tracing::warn!(
            lesson_id = %missing.lesson_id,
            position = missing.position,
            "lesson id does not resolve; omitted from schedule"
        );
    }
    Ok(plan_schedule)
}

fn schedule_response(
    conn: &Connection,
    req: &Request,
    start: &str,
    end: &str,
    lesson_ids: &[String],
) -> Result<JsonValue, JsonValue> {
    let plan_schedule = compute_schedule(conn, req, start, end, lesson_ids)?;
    serde_json::to_value(&plan_schedule)
        .map_err(|e| err(&req.id, "internal", e.to_string(), None))
}

fn handle_curriculum_schedule(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan = match load_plan(conn, &plan_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "curriculum plan not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match schedule_response(conn, req, &plan.start_date, &plan.end_date, &plan.lesson_ids) {
        Ok(mut v) => {
            v["planId"] = json!(plan.id);
            ok(&req.id, v)
        }
        Err(e) => e,
    }
}

fn handle_curriculum_preview(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let start = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_ids = match parse_string_array(req.params.get("lessonIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("lessonIds {}", m), None),
    };
    match schedule_response(conn, req, &start, &end, &lesson_ids) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e,
    }
}

/// Calendar events start at `params.startTime` (local `HH:MM`), 09:00 by default.
fn parse_start_time(req: &Request) -> Result<NaiveTime, JsonValue> {
    match parse_opt_string(req.params.get("startTime")) {
        Ok(None) => Ok(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()),
        Ok(Some(raw)) => NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|_| {
            err(
                &req.id,
                "bad_params",
                "startTime must be HH:MM",
                Some(json!({ "value": raw })),
            )
        }),
        Err(m) => Err(err(&req.id, "bad_params", format!("startTime {}", m), None)),
    }
}

fn handle_curriculum_export_ics(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_time = match parse_start_time(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan = match load_plan(conn, &plan_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "curriculum plan not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let plan_schedule =
        match compute_schedule(conn, req, &plan.start_date, &plan.end_date, &plan.lesson_ids) {
            Ok(v) => v,
            Err(e) => return e,
        };

    let ics_content = CalendarExport {
        plan_id: &plan.id,
        plan_title: &plan.title,
        start_time,
        stamp: Utc::now(),
    }
    .render(&plan_schedule);
    let filename = format!(
        "curriculum-{}.ics",
        plan.id.chars().take(8).collect::<String>()
    );

    let out_path = match parse_opt_string(req.params.get("outPath")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("outPath {}", m), None),
    };
    if let Some(path) = out_path.as_deref() {
        if let Err(e) = std::fs::write(path, &ics_content) {
            tracing::error!(path = %path, error = %e, "calendar export failed");
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": path })),
            );
        }
    }
    tracing::info!(
        plan_id = %plan.id,
        events = plan_schedule.lesson_schedule.len(),
        "calendar exported"
    );
    ok(
        &req.id,
        json!({
            "planId": plan.id,
            "filename": filename,
            "path": out_path,
            "eventCount": plan_schedule.lesson_schedule.len(),
            "unresolvedLessonIds": plan_schedule.unresolved_lesson_ids,
            "icsContent": ics_content
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "curriculum.list" => Some(handle_curriculum_list(state, req)),
        "curriculum.open" => Some(handle_curriculum_open(state, req)),
        "curriculum.create" => Some(handle_curriculum_create(state, req)),
        "curriculum.update" => Some(handle_curriculum_update(state, req)),
        "curriculum.reorder" => Some(handle_curriculum_reorder(state, req)),
        "curriculum.delete" => Some(handle_curriculum_delete(state, req)),
        "curriculum.stats" => Some(handle_curriculum_stats(state, req)),
        "curriculum.schedule" => Some(handle_curriculum_schedule(state, req)),
        "curriculum.preview" => Some(handle_curriculum_preview(state, req)),
        "curriculum.exportIcs" => Some(handle_curriculum_export_ics(state, req)),
        _ => None,
    }
}
