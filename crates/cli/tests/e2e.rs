use std::process::Command;

fn teep() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_teep"));
    cmd.env_remove("TEEP_DATA_DIR").env("RUST_LOG", "off");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.output().expect("run teep");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout).expect("utf8 stdout")
}

#[test]
fn keygen_is_idempotent_and_honours_env_dir() {
    let dir = tempfile::tempdir().unwrap();
    let first = stdout_of(teep().env("TEEP_DATA_DIR", dir.path()).args(["keygen", "--label", "tam"]));
    let second = stdout_of(teep().args(["keygen", "--label", "tam", "--dir"]).arg(dir.path()));
    assert_eq!(first, second);
    assert!(first.contains("fingerprint="));
    assert!(dir.path().join("tam.key").exists());
}

#[test]
fn demo_request_prints_outcome_and_metrics_header() {
    let tam = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let out = stdout_of(
        teep()
            .args(["demo", "request", "--tam-dir"])
            .arg(tam.path())
            .arg("--agent-dir")
            .arg(agent.path()),
    );
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some("outcome=SUCCESS"));
    assert_eq!(lines.next(), Some("outbound_delta=4"));
    // Guard against accidental schema drift in the metrics CSV.
    assert_eq!(
        lines.next(),
        Some("teep_errors_sent,teep_inbound_accepted,teep_inbound_dropped,teep_outbound_messages")
    );
}

#[test]
fn trust_rejects_a_non_key_file() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("peer.pub");
    std::fs::write(&bogus, "not a key").unwrap();
    let out = teep().args(["trust", "--dir"]).arg(dir.path()).arg(&bogus).output().unwrap();
    assert!(!out.status.success());
}
