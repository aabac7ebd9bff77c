//! End-to-end tests running the binary as separate processes.

use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_swarm-coord");

/// Build a command isolated from any config on the host.
fn coord(dir: &Path) -> Command {
    let mut cmd = Command::new(BIN);
    cmd.arg("--state-dir")
        .arg(dir.join("state"))
        .args(["--log", "0"])
        .env("SWARM_PROJECT_DIR", dir.join("project"))
        .env("SWARM_USER_DIR", dir.join("user"))
        .env_remove("SWARM_CONFIG_PATH")
        .env_remove("SWARM_STATE_DIR")
        .env_remove("SWARM_LOCK_TIMEOUT_MS")
        .env_remove("SWARM_LOCK_RETRY_MS")
        .env_remove("SWARM_MAX_AGENTS");
    cmd
}

fn run(dir: &Path, args: &[&str]) -> Output {
    coord(dir).args(args).output().expect("Failed to run binary")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

mod task_command_tests {
    use super::*;

    #[test]
    fn add_then_claim_then_lose() {
        let dir = TempDir::new().unwrap();

        let out = run(dir.path(), &["tasks", "add", "--id", "DEV-001", "--title", "Fix"]);
        assert!(out.status.success());
        assert_eq!(stdout_json(&out)["status"], "open");

        let out = run(dir.path(), &["tasks", "claim", "DEV-001", "--agent", "a1"]);
        assert!(out.status.success());
        assert_eq!(stdout_json(&out)["claimed_by"], "a1");

        let out = run(dir.path(), &["tasks", "claim", "DEV-001", "--agent", "a2"]);
        assert_eq!(out.status.code(), Some(2));
        let report = stdout_json(&out);
        assert_eq!(report["code"], "ALREADY_CLAIMED");
        assert_eq!(report["retryable"], false);
    }

    #[test]
    fn unknown_task_exits_with_failure() {
        let dir = TempDir::new().unwrap();
        let out = run(dir.path(), &["tasks", "get", "NOPE"]);
        assert_eq!(out.status.code(), Some(1));
        assert_eq!(stdout_json(&out)["code"], "TASK_NOT_FOUND");
    }

    #[test]
    fn markdown_list_groups_by_status() {
        let dir = TempDir::new().unwrap();
        run(dir.path(), &["tasks", "add", "--id", "A", "--title", "Alpha"]);
        run(dir.path(), &["tasks", "add", "--id", "B", "--title", "Beta"]);
        run(dir.path(), &["tasks", "claim", "B", "--agent", "a1"]);

        let out = run(dir.path(), &["--format", "markdown", "tasks", "list"]);
        assert!(out.status.success());
        let text = String::from_utf8(out.stdout).unwrap();
        assert!(text.starts_with("# Tasks (2)"));
        assert!(text.contains("## Claimed"));
        assert!(text.contains("- Beta `B` @a1"));
    }

    #[test]
    fn concurrent_processes_claim_exactly_once() {
        let dir = TempDir::new().unwrap();
        let out = run(dir.path(), &["tasks", "add", "--id", "DEV-001", "--title", "Hot"]);
        assert!(out.status.success());

        let children: Vec<_> = (0..8)
            .map(|i| {
                coord(dir.path())
                    .args(["tasks", "claim", "DEV-001", "--agent", &format!("agent-{i}")])
                    .stdout(Stdio::piped())
                    .spawn()
                    .expect("Failed to spawn")
            })
            .collect();
        let codes: Vec<Option<i32>> = children
            .into_iter()
            .map(|c| c.wait_with_output().unwrap().status.code())
            .collect();

        assert_eq!(codes.iter().filter(|c| **c == Some(0)).count(), 1);
        assert_eq!(codes.iter().filter(|c| **c == Some(2)).count(), 7);
    }
}

mod agent_command_tests {
    use super::*;

    #[test]
    fn register_list_and_reap_a_dead_agent() {
        let dir = TempDir::new().unwrap();

        // A child that has already exited gives a pid that is no longer live.
        let mut child = Command::new(BIN)
            .arg("--version")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let dead_pid = child.id().to_string();
        child.wait().unwrap();

        let me = std::process::id().to_string();
        for (id, pid) in [("live", &me), ("gone", &dead_pid)] {
            let out = run(
                dir.path(),
                &["agents", "register", "--id", id, "--cli", "claude", "--genome", "g", "--pid", pid.as_str()],
            );
            assert!(out.status.success());
        }
        run(dir.path(), &["tasks", "add", "--id", "T1", "--title", "Orphan"]);
        run(dir.path(), &["tasks", "claim", "T1", "--agent", "gone"]);

        let out = run(dir.path(), &["agents", "list"]);
        let query = stdout_json(&out);
        assert_eq!(query["count"], 1);
        assert_eq!(query["dead"][0]["agent_id"], "gone");

        let out = run(dir.path(), &["reap", "--cleanup"]);
        assert!(out.status.success());
        let report = stdout_json(&out);
        assert_eq!(report["released"][0], "T1");
        assert_eq!(report["removed_agents"], 1);

        let out = run(dir.path(), &["tasks", "get", "T1"]);
        assert_eq!(stdout_json(&out)["status"], "open");
    }

    #[test]
    fn deregister_unknown_agent_is_not_found() {
        let dir = TempDir::new().unwrap();
        let me = std::process::id().to_string();
        let out = run(
            dir.path(),
            &["agents", "register", "--id", "a1", "--cli", "claude", "--genome", "g", "--pid", me.as_str()],
        );
        assert!(out.status.success());

        let out = run(dir.path(), &["agents", "deregister", "a1"]);
        assert!(out.status.success());
        assert_eq!(stdout_json(&out)["removed"], true);

        let out = run(dir.path(), &["agents", "deregister", "a1"]);
        assert_eq!(out.status.code(), Some(1));
        assert_eq!(stdout_json(&out)["code"], "AGENT_NOT_FOUND");
    }
}

mod safety_command_tests {
    use super::*;

    #[test]
    fn replay_records_trip_in_log() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("run.jsonl");
        let line = "{\"tool\":\"read\",\"args\":{\"p\":\"a\"},\"ok\":true}\n";
        std::fs::write(&transcript, line.repeat(3)).unwrap();

        let out = run(
            dir.path(),
            &["safety", "replay", transcript.to_str().unwrap(), "--agent", "a1"],
        );
        assert!(out.status.success());
        assert_eq!(stdout_json(&out)["trips"][0]["type"], "doom_loop");

        let out = run(dir.path(), &["safety", "log", "--type", "doom_loop"]);
        let events = stdout_json(&out);
        assert_eq!(events.as_array().unwrap().len(), 1);
        assert_eq!(events[0]["data"]["agent_id"], "a1");
    }

    #[test]
    fn parallel_writers_do_not_lose_events() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("run.jsonl");
        let failures: String = (0..5)
            .map(|n| format!("{{\"tool\":\"t{n}\",\"ok\":false,\"error\":\"boom\"}}\n"))
            .collect();
        std::fs::write(&transcript, failures).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let root = dir.path().to_path_buf();
                let transcript = transcript.clone();
                thread::spawn(move || {
                    coord(&root)
                        .args(["safety", "replay"])
                        .arg(&transcript)
                        .args(["--agent", &format!("agent-{i}")])
                        .output()
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().status.success());
        }

        let out = run(dir.path(), &["safety", "log", "--limit", "100", "--type", "max_mistakes"]);
        assert_eq!(stdout_json(&out).as_array().unwrap().len(), 4);
    }
}
