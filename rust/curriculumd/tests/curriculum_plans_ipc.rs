use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_curriculumd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("CURRICULUMD_WORKSPACE")
        .spawn()
        .expect("spawn curriculumd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

fn create_plan(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    input: serde_json::Value,
) -> String {
    request_ok(stdin, reader, id, "curriculum.create", json!({ "input": input }))["planId"]
        .as_str()
        .expect("planId")
        .to_string()
}

#[test]
fn plan_lifecycle_create_open_update_delete() {
    let workspace = temp_dir("curriculum-plans-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let plan_id = create_plan(
        &mut stdin,
        &mut reader,
        "1",
        json!({
            "title": "Winter Term",
            "description": "Patriarchs",
            "startDate": "2024-01-07T09:30:00Z",
            "endDate": "2024-02-25",
            "lessonIds": ["l-1", "l-2", "l-1"]
        }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "curriculum.open",
        json!({ "planId": plan_id }),
    );
    let plan = &opened["plan"];
    assert_eq!(plan["title"], json!("Winter Term"));
    assert_eq!(plan["startDate"], json!("2024-01-07"));
    assert_eq!(plan["endDate"], json!("2024-02-25"));
    assert_eq!(plan["ageGroup"], json!("Elementary (6-10)"));
    assert_eq!(plan["lessonIds"], json!(["l-1", "l-2", "l-1"]));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.update",
        json!({
            "planId": plan_id,
            "patch": { "title": "Winter Term 2024", "ageGroup": "Teen (14-17)", "lessonIds": ["l-3"] }
        }),
    );
    assert_eq!(updated["plan"]["title"], json!("Winter Term 2024"));
    assert_eq!(updated["plan"]["ageGroup"], json!("Teen (14-17)"));
    assert_eq!(updated["plan"]["lessonIds"], json!(["l-3"]));
    assert_eq!(updated["plan"]["startDate"], json!("2024-01-07"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "curriculum.delete",
        json!({ "planId": plan_id }),
    );
    let gone = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "curriculum.open",
        json!({ "planId": plan_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn plan_dates_are_validated_on_create_and_update() {
    let workspace = temp_dir("curriculum-plans-dates");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let inverted = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "curriculum.create",
        json!({ "input": { "title": "Backwards", "startDate": "2024-02-25", "endDate": "2024-01-07" } }),
    );
    assert_eq!(error_code(&inverted), "inverted_range");
    assert_eq!(inverted["details"]["startDate"], json!("2024-02-25"));
    assert_eq!(inverted["details"]["endDate"], json!("2024-01-07"));

    let invalid = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "curriculum.create",
        json!({ "input": { "title": "Garbled", "startDate": "2024-01-07", "endDate": "2024-13-40" } }),
    );
    assert_eq!(error_code(&invalid), "invalid_date");
    assert_eq!(invalid["details"]["field"], json!("endDate"));

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.create",
        json!({ "input": { "title": "No dates" } }),
    );
    assert_eq!(error_code(&missing), "bad_params");

    let bad_group = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "curriculum.create",
        json!({
            "input": {
                "title": "Toddlers",
                "startDate": "2024-01-07",
                "endDate": "2024-01-14",
                "ageGroup": "Toddlers (1-2)"
            }
        }),
    );
    assert_eq!(error_code(&bad_group), "bad_params");

    let plan_id = create_plan(
        &mut stdin,
        &mut reader,
        "5",
        json!({ "title": "Spring", "startDate": "2024-03-03", "endDate": "2024-05-26" }),
    );
    let bad_patch = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "curriculum.update",
        json!({ "planId": plan_id, "patch": { "endDate": "2024-03-01" } }),
    );
    assert_eq!(error_code(&bad_patch), "inverted_range");

    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "curriculum.open",
        json!({ "planId": plan_id }),
    );
    assert_eq!(unchanged["plan"]["endDate"], json!("2024-05-26"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reorder_requires_a_permutation_of_current_ids() {
    let workspace = temp_dir("curriculum-plans-reorder");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let plan_id = create_plan(
        &mut stdin,
        &mut reader,
        "1",
        json!({
            "title": "Gospels",
            "startDate": "2024-09-01",
            "endDate": "2024-11-24",
            "lessonIds": ["a", "b", "a", "c"]
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "curriculum.reorder",
        json!({ "planId": plan_id, "lessonIdOrder": ["c", "a", "b", "a"] }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.open",
        json!({ "planId": plan_id }),
    );
    assert_eq!(opened["plan"]["lessonIds"], json!(["c", "a", "b", "a"]));

    let dropped_duplicate = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "curriculum.reorder",
        json!({ "planId": plan_id, "lessonIdOrder": ["c", "a", "b"] }),
    );
    assert_eq!(error_code(&dropped_duplicate), "bad_params");

    let foreign = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "curriculum.reorder",
        json!({ "planId": plan_id, "lessonIdOrder": ["c", "a", "b", "z"] }),
    );
    assert_eq!(error_code(&foreign), "bad_params");

    let unknown = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "curriculum.reorder",
        json!({ "planId": "no-such-plan", "lessonIdOrder": [] }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_and_stats_classify_plans_against_today() {
    let workspace = temp_dir("curriculum-plans-stats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = create_plan(
        &mut stdin,
        &mut reader,
        "1",
        json!({ "title": "Past", "startDate": "2023-09-03", "endDate": "2023-12-17", "lessonIds": ["a", "b"] }),
    );
    let _ = create_plan(
        &mut stdin,
        &mut reader,
        "2",
        json!({ "title": "Current", "startDate": "2024-01-07", "endDate": "2024-02-25", "lessonIds": ["a", "b", "c"] }),
    );
    let _ = create_plan(
        &mut stdin,
        &mut reader,
        "3",
        json!({ "title": "Future", "startDate": "2024-03-03", "endDate": "2024-03-03" }),
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "curriculum.list",
        json!({ "today": "2024-02-25" }),
    );
    let plans = list["plans"].as_array().expect("plans");
    assert_eq!(plans.len(), 3);
    let by_title = |title: &str| {
        plans
            .iter()
            .find(|p| p["title"] == json!(title))
            .cloned()
            .expect("plan by title")
    };
    assert_eq!(by_title("Past")["status"], json!("completed"));
    assert_eq!(by_title("Current")["status"], json!("active"));
    assert_eq!(by_title("Current")["weeksDuration"], json!(7));
    assert_eq!(by_title("Current")["lessonCount"], json!(3));
    assert_eq!(by_title("Future")["status"], json!("upcoming"));
    assert_eq!(by_title("Future")["weeksDuration"], json!(0));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "curriculum.stats",
        json!({ "today": "2024-02-25" }),
    );
    assert_eq!(stats["totalPlans"], json!(3));
    assert_eq!(stats["activePlans"], json!(1));
    assert_eq!(stats["upcomingPlans"], json!(1));
    assert_eq!(stats["completedPlans"], json!(1));
    assert_eq!(stats["totalLessons"], json!(5));

    let bad_today = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "curriculum.stats",
        json!({ "today": "yesterday" }),
    );
    assert_eq!(error_code(&bad_today), "invalid_date");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
