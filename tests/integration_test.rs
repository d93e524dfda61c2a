use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

/// Write `script` to a temp file and run the binary on it against `sh`.
fn run_script(name: &str, script: &str, extra: &[&str]) -> Output {
    let script_path: PathBuf =
        std::env::temp_dir().join(format!("shellexpect_{name}_{}.script", std::process::id()));
    fs::write(&script_path, script).expect("Failed to write test script");

    let output = Command::new(env!("CARGO_BIN_EXE_shellexpect"))
        .arg("--script")
        .arg(&script_path)
        .arg("--command")
        .arg("sh")
        .args(extra)
        .output()
        .expect("Failed to execute shellexpect");

    let _ = fs::remove_file(&script_path);
    output
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "shellexpect failed with stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_basic_script_execution() {
    let script = r#"
wait 100ms
type "echo test"
wait 100ms
"#;
    let output = run_script("basic", script, &[]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("echo test"),
        "Output should contain typed command"
    );
}

#[test]
fn test_expect_command() {
    let script = r#"
expect "$"
type "echo 'Hello World'"
expect "Hello World"
wait 200ms
type "exit"
"#;
    let output = run_script("expect", script, &[]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Hello World"),
        "Output should contain expected text"
    );
}

#[test]
fn test_send_and_key_commands() {
    let script = r#"
expect "$"
send "echo instant"
expect "instant"
send "sleep 30"
wait 200ms
key Ctrl+C
expect "$"
send "exit"
"#;
    let output = run_script("send", script, &[]);
    assert_success(&output);
}

#[test]
fn test_expect_several_targets() {
    let script = r#"
expect "$"
send "echo value=42"
expect "never" re"value=\d+" EOF 5s
send "exit"
expect EOF
"#;
    let output = run_script("targets", script, &[]);
    assert_success(&output);
}

#[test]
fn test_invalid_script() {
    let script = r#"
invalid_command "test"
"#;
    let output = run_script("invalid", script, &[]);
    assert!(
        !output.status.success(),
        "shellexpect should fail with invalid command"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Unknown command"),
        "Error should mention unknown command"
    );
}

#[test]
fn test_expect_timeout() {
    let script = r#"
expect "$"
type "echo test"
expect "this_will_never_appear" 500ms
"#;
    let output = run_script("timeout", script, &[]);
    assert!(
        !output.status.success(),
        "shellexpect should fail with timeout"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Timeout"), "Error should mention timeout");
}

#[test]
fn test_expect_after_exit_fails() {
    let script = r#"
expect "$"
send "exit"
expect "this_will_never_appear" 5s
"#;
    let output = run_script("ended", script, &[]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ended"), "got: {stderr}");
}

#[test]
fn test_wait_exit_status() {
    let script = r#"
expect "$"
send "exit 3"
"#;
    let output = run_script("status", script, &["--wait-exit"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_comment_handling() {
    let script = r#"
# This is a comment
expect "$"  # Wait for prompt

# Another comment
type "echo test"

wait 200ms
type "exit"
"#;
    let output = run_script("comments", script, &[]);
    assert_success(&output);
}

#[test]
fn test_wait_for_exit_in_script() {
    let script = r#"
expect "$"
send "echo stopping; exit 0"
wait exit 5s
"#;
    let output = run_script("wait_exit", script, &[]);
    assert_success(&output);

    let script = r#"
expect "$"
send "exit 4"
wait exit 5s
"#;
    let output = run_script("wait_exit_fail", script, &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("status 4"), "got: {stderr}");
}

#[test]
fn test_show_screen_and_quiet_wait() {
    let script = r#"
expect "$"
send "printf 'old\rnew\n'"
wait quiet 300ms
show screen
send "exit"
"#;
    let output = run_script("show_screen", script, &[]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\nnew\n"), "got: {stdout}");
}
