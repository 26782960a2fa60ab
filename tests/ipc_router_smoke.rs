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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("tgcontrol-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "discipline": "ADS", "year": 2025, "semester": 2 }),
    );
    let _ = request(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.register",
        json!({
            "email": "coord@uni.br",
            "firstName": "Carla",
            "lastName": "Coordenadora",
            "password": "senha123"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.register",
        json!({
            "email": "aluno@uni.br",
            "firstName": "Aldo",
            "lastName": "Aluno",
            "password": "senha123"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.register",
        json!({
            "email": "coord@uni.br",
            "isCoordinator": true,
            "coordinations": [
                { "discipline": "ADS", "year": 2025, "semester": 2, "stages": [1, 2] }
            ]
        }),
    );
    let _ = request(&mut stdin, &mut reader, "8", "teachers.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "teachers.coordinatedClasses",
        json!({ "email": "coord@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.enroll",
        json!({
            "email": "aluno@uni.br",
            "agreementUrl": "file:///docs/termo.pdf",
            "profile": {
                "personalEmail": "aldo@gmail.com",
                "advisorEmail": "coord@uni.br",
                "discipline": "ADS",
                "year": 2025,
                "semester": 2,
                "tgType": "Artigo",
                "problemStatement": "Roteamento de entregas"
            }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "students.listByClass",
        json!({ "discipline": "ADS", "year": 2025, "semester": 2 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "students.listAdvisees",
        json!({ "advisorEmail": "coord@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "students.details",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "students.stageConfig",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "students.isTgComplete",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "sections.list",
        json!({ "studentEmail": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "sections.current",
        json!({ "studentEmail": "aluno@uni.br" }),
    );
    let submitted = request(
        &mut stdin,
        &mut reader,
        "18",
        "submissions.create",
        json!({
            "studentEmail": "aluno@uni.br",
            "sequenceOrder": 1,
            "fileName": "secao1.pdf",
            "filePath": "/uploads/secao1.pdf"
        }),
    );
    let submitted_at = submitted
        .get("result")
        .and_then(|v| v.get("submittedAt"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "submissions.list",
        json!({ "studentEmail": "aluno@uni.br", "sequenceOrder": 1 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "submissions.history",
        json!({ "studentEmail": "aluno@uni.br", "sequenceOrder": 1 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "submissions.latestTimestamp",
        json!({ "studentEmail": "aluno@uni.br", "sequenceOrder": 1 }),
    );
    if !submitted_at.is_empty() {
        let _ = request(
            &mut stdin,
            &mut reader,
            "22",
            "submissions.filePath",
            json!({
                "studentEmail": "aluno@uni.br",
                "sequenceOrder": 1,
                "submittedAt": submitted_at
            }),
        );
        let _ = request(
            &mut stdin,
            &mut reader,
            "23",
            "reviews.record",
            json!({
                "studentEmail": "aluno@uni.br",
                "sequenceOrder": 1,
                "submittedAt": submitted_at,
                "reviewerEmail": "coord@uni.br",
                "status": "approved",
                "comment": "Bom trabalho"
            }),
        );
    }
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "sections.advance",
        json!({ "studentEmail": "aluno@uni.br", "sequenceOrder": 1 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "defenses.schedule",
        json!({
            "studentEmail": "aluno@uni.br",
            "schedulerEmail": "coord@uni.br",
            "defenseAt": "2025-12-15T14:30",
            "location": "Sala 101",
            "panel": "Banca A"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "26",
        "defenses.list",
        json!({ "studentEmail": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "27",
        "dashboard.advisor",
        json!({ "email": "coord@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "28",
        "dashboard.coordinator",
        json!({ "email": "coord@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "29",
        "notifications.send",
        json!({ "email": "aluno@uni.br", "content": "Aviso geral" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "30",
        "notifications.list",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "31",
        "notifications.unreadCount",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "32",
        "notifications.markAllRead",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "33",
        "users.displayName",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "34",
        "users.profilePicture.set",
        json!({ "email": "aluno@uni.br", "url": "file:///fotos/aldo.png" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "35",
        "users.profilePicture.get",
        json!({ "email": "aluno@uni.br" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "36",
        "auth.login",
        json!({ "email": "aluno@uni.br", "password": "senha123" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "37",
        "auth.resetPassword",
        json!({ "email": "aluno@uni.br", "newPassword": "outraSenha" }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
