use std::process::Command;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_redshelf");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run redshelf --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    let exe = env!("CARGO_BIN_EXE_redshelf");
    let output = Command::new(exe)
        .arg("--help")
        .output()
        .expect("run redshelf --help");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(stdout.contains("Redshelf"));
    assert!(stdout.contains("--version"));
    assert!(stdout.contains("import"));
}

#[test]
fn unknown_commands_fail() {
    let exe = env!("CARGO_BIN_EXE_redshelf");
    let output = Command::new(exe)
        .arg("no-such-command")
        .output()
        .expect("run redshelf no-such-command");
    assert!(!output.status.success());
}
