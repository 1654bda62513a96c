mod common;

use std::io::Write;
use std::process::{Command, Stdio};

fn write_schema(dir: &tempfile::TempDir) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.path().join("schema.json");
    let defs = vec![common::table1(), common::table2()];
    std::fs::write(&path, serde_json::to_string(&defs)?)?;
    Ok(path)
}

#[test]
fn test_cli_executes_statements() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let schema = write_schema(&dir)?;

    let output = Command::new(env!("CARGO_BIN_EXE_rusty-mini-query"))
        .arg("--schema")
        .arg(&schema)
        .args([
            "-e",
            "INSERT INTO table1 (id, age) VALUES (1, 33), (2, 40)",
            "-e",
            "INSERT INTO table2 (id, parent, age) VALUES (1, 2, 5)",
            "-e",
            "SELECT id, parent->age FROM table2",
        ])
        .output()?;
    anyhow::ensure!(
        output.status.success(),
        "cli failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(
        lines,
        vec![
            serde_json::json!({"table1": [1, 2]}),
            serde_json::json!({"table2": [1]}),
            serde_json::json!([{"id": 1, "parent->age": 40}]),
        ]
    );
    Ok(())
}

#[test]
fn test_cli_reads_stdin_and_reports_errors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let schema = write_schema(&dir)?;

    let mut child = Command::new(env!("CARGO_BIN_EXE_rusty-mini-query"))
        .arg("--schema")
        .arg(&schema)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to open cli stdin"))?;
        writeln!(stdin, "INSERT INTO table1 (id, age) VALUES (7, 1)")?;
        writeln!(stdin)?;
        writeln!(stdin, "SELECT nope FROM table1")?;
    }
    let output = child.wait_with_output()?;

    assert!(!output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout.trim(), r#"{"table1":[7]}"#);
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));
    Ok(())
}
