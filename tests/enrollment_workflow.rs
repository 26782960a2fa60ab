use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
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
    let exe = env!("CARGO_BIN_EXE_tgcontrold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tgcontrold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string();
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected an error envelope: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn seed_class_and_advisor(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let _ = request_ok(
        stdin,
        reader,
        "classes.create",
        json!({ "discipline": "ADS", "year": 2025, "semester": 2 }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "auth.register",
        json!({
            "email": "orientador@uni.br",
            "firstName": "Olavo",
            "lastName": "Orientador",
            "password": "senha123"
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "teachers.register",
        json!({ "email": "orientador@uni.br", "isCoordinator": false }),
    );
}

fn enroll_params(email: &str, agreement_url: &str) -> serde_json::Value {
    json!({
        "email": email,
        "agreementUrl": agreement_url,
        "profile": {
            "personalEmail": "pessoal@gmail.com",
            "advisorEmail": "orientador@uni.br",
            "discipline": "ADS",
            "year": 2025,
            "semester": 2,
            "tgType": "Artigo",
            "problemStatement": "Gestão de filas em clínicas"
        }
    })
}

#[test]
fn enroll_creates_student_and_six_sections() {
    let workspace = temp_dir("tg-enroll-happy");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class_and_advisor(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "auth.register",
        json!({
            "email": "aluno@uni.br",
            "firstName": "Aldo",
            "lastName": "Aluno",
            "password": "senha123"
        }),
    );

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "students.enroll",
        enroll_params("aluno@uni.br", "file:///docs/termo.pdf"),
    );
    assert_eq!(enrolled.get("tasksCreated").and_then(|v| v.as_i64()), Some(6));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "sections.list",
        json!({ "studentEmail": "aluno@uni.br" }),
    );
    let sections = listed
        .get("sections")
        .and_then(|v| v.as_array())
        .expect("sections array");
    assert_eq!(sections.len(), 6);
    let expected_stages = [1, 1, 1, 1, 2, 2];
    for (i, section) in sections.iter().enumerate() {
        assert_eq!(
            section.get("sequenceOrder").and_then(|v| v.as_i64()),
            Some(i as i64 + 1)
        );
        assert_eq!(
            section.get("stage").and_then(|v| v.as_i64()),
            Some(expected_stages[i])
        );
        let expected_status = if i == 0 { "in_progress" } else { "locked" };
        assert_eq!(
            section.get("status").and_then(|v| v.as_str()),
            Some(expected_status)
        );
        assert!(section
            .get("dueDate")
            .and_then(|v| v.as_str())
            .is_some_and(|d| !d.is_empty()));
    }
    assert_eq!(
        sections[0].get("title").and_then(|v| v.as_str()),
        Some("Apresentação Pessoal e Acadêmica")
    );
    assert_eq!(
        sections[5].get("title").and_then(|v| v.as_str()),
        Some("Relatório PIM VI")
    );

    let details = request_ok(
        &mut stdin,
        &mut reader,
        "students.details",
        json!({ "email": "aluno@uni.br" }),
    );
    assert_eq!(
        details.get("classLabel").and_then(|v| v.as_str()),
        Some("ADS 2025/2")
    );
    assert_eq!(
        details.get("advisorName").and_then(|v| v.as_str()),
        Some("Olavo Orientador")
    );

    let config = request_ok(
        &mut stdin,
        &mut reader,
        "students.stageConfig",
        json!({ "email": "aluno@uni.br" }),
    );
    assert_eq!(config.get("currentStage").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(config.get("maxTasks").and_then(|v| v.as_i64()), Some(6));

    let complete = request_ok(
        &mut stdin,
        &mut reader,
        "students.isTgComplete",
        json!({ "email": "aluno@uni.br" }),
    );
    assert_eq!(complete.get("complete").and_then(|v| v.as_bool()), Some(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn enroll_rejects_missing_agreement_document() {
    let workspace = temp_dir("tg-enroll-no-agreement");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class_and_advisor(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "auth.register",
        json!({
            "email": "aluno@uni.br",
            "firstName": "Aldo",
            "lastName": "Aluno",
            "password": "senha123"
        }),
    );

    let rejected = request(
        &mut stdin,
        &mut reader,
        "students.enroll",
        enroll_params("aluno@uni.br", "  "),
    );
    assert_eq!(error_code(&rejected), "bad_params");

    // Nothing was written: no student profile, no sections.
    let details = request(
        &mut stdin,
        &mut reader,
        "students.details",
        json!({ "email": "aluno@uni.br" }),
    );
    assert_eq!(error_code(&details), "not_found");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "sections.list",
        json!({ "studentEmail": "aluno@uni.br" }),
    );
    assert_eq!(
        listed.get("sections").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn duplicate_enrollment_rolls_back_cleanly() {
    let workspace = temp_dir("tg-enroll-dup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class_and_advisor(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "auth.register",
        json!({
            "email": "aluno@uni.br",
            "firstName": "Aldo",
            "lastName": "Aluno",
            "password": "senha123"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "students.enroll",
        enroll_params("aluno@uni.br", "file:///docs/termo.pdf"),
    );
    let second = request(
        &mut stdin,
        &mut reader,
        "students.enroll",
        enroll_params("aluno@uni.br", "file:///docs/termo.pdf"),
    );
    assert_eq!(error_code(&second), "db_tx_failed");

    // The first enrollment survives untouched: still exactly six sections.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "sections.list",
        json!({ "studentEmail": "aluno@uni.br" }),
    );
    assert_eq!(
        listed.get("sections").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(6)
    );
    let advisees = request_ok(
        &mut stdin,
        &mut reader,
        "students.listAdvisees",
        json!({ "advisorEmail": "orientador@uni.br" }),
    );
    assert_eq!(
        advisees.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
