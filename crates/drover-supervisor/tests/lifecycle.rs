//! End-to-end runs against fake agent scripts.
#![allow(clippy::unwrap_used)]
#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use drover_core::config::Config;
use drover_supervisor::lifecycle::{
    EXIT_MESSAGE_KIND, SpawnRequest, Supervisor, SupervisorError, SupervisorOptions,
};
use drover_supervisor::storage::{
    AgentId, AgentKind, AgentStatus, AgentStore, Database, LogEntry, MessageFilter,
};
use tempfile::TempDir;

const CODEX_SUCCESS: &str = r#"
printf '%s\n' "$@" > "$0.args"
echo "$CODEX_HOME" > "$0.home"
ls "$CODEX_HOME" > "$0.seeded"
cat <<'JSON'
{"type":"thread.started","thread_id":"real-123"}
{"type":"turn.started"}
{"type":"item.completed","item":{"id":"i1","type":"assistant_message","text":"done"}}
{"type":"turn.completed","usage":{"input_tokens":10,"cached_input_tokens":2,"output_tokens":5}}
JSON
echo "warming up" >&2
exit 0
"#;

const RUN_FOREVER: &str = r#"
trap 'echo interrupted; sleep 0.5; exit 130' INT
echo started
while true; do sleep 0.1; done
"#;

struct Harness {
    dir: TempDir,
    supervisor: Supervisor<Database>,
}

impl Harness {
    async fn new(script: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let script_path = dir.path().join("agent.sh");
        std::fs::write(&script_path, script).unwrap();
        let codex_home = dir.path().join("codex-home");
        std::fs::create_dir_all(&codex_home).unwrap();
        std::fs::write(codex_home.join("auth.json"), "{}").unwrap();

        let mut config = Config::default();
        config.supervisor.state_dir = Some(dir.path().join("state"));
        config.agents.codex_bin = PathBuf::from("/bin/sh");
        config.agents.codex_args = vec![script_path.display().to_string()];
        config.agents.codex_home = Some(codex_home);
        config.agents.claude_bin = PathBuf::from("/bin/sh");
        config.agents.claude_args = vec![script_path.display().to_string()];

        let mut options = SupervisorOptions::from_config(&config);
        options.mux = options.mux.with_echo(false);
        options.terminate_timeout = Duration::from_secs(2);

        let db = Database::open_in_memory().await.unwrap();
        Self {
            dir,
            supervisor: Supervisor::new(db, options),
        }
    }

    /// File the fake agent wrote next to its script.
    fn artifact(&self, suffix: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(format!("agent.sh.{suffix}"))).unwrap()
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }
}

fn request(name: &str, kind: AgentKind) -> SpawnRequest {
    SpawnRequest {
        agent: AgentId::new("proj:main", name),
        kind,
        task: "fix the build".to_string(),
        model: None,
        working_directory: None,
    }
}

async fn exit_messages(sup: &Supervisor<Database>, id: &AgentId) -> Vec<String> {
    sup.messages(&MessageFilter {
        scope: id.scope.clone(),
        from_agent: Some(id.name.clone()),
        kind: Some(EXIT_MESSAGE_KIND.to_string()),
        ..MessageFilter::default()
    })
    .await
    .unwrap()
    .into_iter()
    .map(|m| m.body)
    .collect()
}

fn stream_text(entries: &[LogEntry], stream: &str) -> String {
    entries
        .iter()
        .filter(|e| e.event_type == stream)
        .filter_map(|e| e.content.as_deref())
        .collect()
}

async fn wait_for_pid(sup: &Supervisor<Database>, id: &AgentId) -> u32 {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(row) = sup.agent(id).await {
                if let Some(pid) = row.pid() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap()
}

/// Wait until the agent has written `needle` to stdout, so its signal
/// handlers are installed.
async fn wait_for_stdout(sup: &Supervisor<Database>, id: &AgentId, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let entries = sup.logs(id, None, 0).await.unwrap_or_default();
            if stream_text(&entries, "stdout").contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn successful_codex_run_completes_with_full_transcript() {
    let h = Harness::new(CODEX_SUCCESS).await;
    let id = AgentId::new("proj:main", "alice");

    let (agent, status) = h
        .supervisor
        .spawn(request("alice", AgentKind::Codex))
        .await
        .unwrap();
    assert_eq!(agent, id);
    assert_eq!(status, AgentStatus::Complete);

    let row = h.supervisor.agent(&id).await.unwrap();
    assert_eq!(row.status(), AgentStatus::Complete);
    assert_eq!(row.session_token, "real-123");
    assert!(row.pid.is_none());
    assert!(row.completed_at.is_some());

    let entries = h.supervisor.logs(&id, None, 0).await.unwrap();
    let stdout = stream_text(&entries, "stdout");
    assert!(stdout.starts_with("{\"type\":\"thread.started\""));
    assert!(stdout.ends_with("\"output_tokens\":5}}\n"));
    assert_eq!(stream_text(&entries, "stderr"), "warming up\n");

    let labels: Vec<&str> = entries
        .iter()
        .map(|e| e.event_type.as_str())
        .filter(|t| *t != "stdout" && *t != "stderr")
        .collect();
    assert_eq!(
        labels,
        ["thread.started", "turn.started", "assistant", "turn.completed"]
    );

    assert_eq!(h.artifact("args"), "exec\n--json\nfix the build\n");
    assert!(h.artifact("seeded").contains("auth.json"));
    let scratch = PathBuf::from(h.artifact("home").trim());
    assert!(!scratch.exists());

    assert_eq!(exit_messages(&h.supervisor, &id).await.len(), 1);
    assert!(h.supervisor.launch_error(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn turn_failed_wins_over_clean_exit() {
    let h = Harness::new(
        r#"
echo '{"type":"turn.started"}'
echo '{"type":"turn.failed","error":{"message":"quota exceeded"}}'
exit 0
"#,
    )
    .await;
    let id = AgentId::new("proj:main", "alice");

    let err = h
        .supervisor
        .spawn(request("alice", AgentKind::Codex))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::TurnFailed { message: Some(ref m) } if m == "quota exceeded"
    ));

    assert_eq!(
        h.supervisor.agent(&id).await.unwrap().status(),
        AgentStatus::Failed
    );
    let exits = exit_messages(&h.supervisor, &id).await;
    assert_eq!(exits.len(), 1);
    assert!(exits[0].contains("quota exceeded"));
}

#[tokio::test]
async fn nonzero_exit_fails_and_writes_error_file() {
    let h = Harness::new("echo partial; echo oops >&2; exit 3\n").await;
    let id = AgentId::new("proj:main", "bob");

    let err = h
        .supervisor
        .spawn(request("bob", AgentKind::Claude))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::ExitedWithFailure { code: Some(3), .. }
    ));

    assert_eq!(
        h.supervisor.agent(&id).await.unwrap().status(),
        AgentStatus::Failed
    );
    let entries = h.supervisor.logs(&id, None, 0).await.unwrap();
    assert_eq!(stream_text(&entries, "stdout"), "partial\n");
    assert_eq!(stream_text(&entries, "stderr"), "oops\n");
    assert!(entries.iter().all(|e| e.raw.is_none()));

    let text = h.supervisor.launch_error(&id).await.unwrap().unwrap();
    assert!(text.contains("exited"));
    assert!(
        drover_supervisor::lifecycle::launch_error_path(&h.state_dir(), &id).exists()
    );
}

#[tokio::test]
async fn prompt_resumes_with_observed_session_token() {
    let h = Harness::new(CODEX_SUCCESS).await;
    let id = AgentId::new("proj:main", "alice");
    h.supervisor
        .spawn(request("alice", AgentKind::Codex))
        .await
        .unwrap();
    h.supervisor.archive(&id).await.unwrap();

    let status = h.supervisor.prompt(&id, "now add tests").await.unwrap();
    assert_eq!(status, AgentStatus::Complete);
    assert_eq!(
        h.artifact("args"),
        "exec\n--json\nresume\nreal-123\nnow add tests\n"
    );

    let row = h.supervisor.agent(&id).await.unwrap();
    assert!(row.archived_at.is_none());
    assert_eq!(exit_messages(&h.supervisor, &id).await.len(), 2);
}

#[tokio::test]
async fn next_run_clears_stale_error_file() {
    let h = Harness::new("exit 1\n").await;
    let id = AgentId::new("proj:main", "bob");
    h.supervisor
        .spawn(request("bob", AgentKind::Claude))
        .await
        .unwrap_err();
    assert!(h.supervisor.launch_error(&id).await.unwrap().is_some());

    std::fs::write(h.dir.path().join("agent.sh"), "exit 0\n").unwrap();
    h.supervisor.prompt(&id, "retry").await.unwrap();
    assert!(h.supervisor.launch_error(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn interrupt_leaves_agent_waiting() {
    let h = Harness::new(RUN_FOREVER).await;
    let id = AgentId::new("proj:main", "carol");

    let sup = h.supervisor.clone();
    let run = tokio::spawn(async move { sup.spawn(request("carol", AgentKind::Claude)).await });
    wait_for_pid(&h.supervisor, &id).await;
    wait_for_stdout(&h.supervisor, &id, "started").await;

    h.supervisor.interrupt(&id).await.unwrap();
    let err = h.supervisor.prompt(&id, "carry on").await.unwrap_err();
    assert!(matches!(err, SupervisorError::StillRunning { .. }));

    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(SupervisorError::ExitedWithFailure { code: Some(130), .. })
    ));

    let row = h.supervisor.agent(&id).await.unwrap();
    assert_eq!(row.status(), AgentStatus::Waiting);
    assert!(row.pid.is_none());
    assert!(row.owner_pid.is_none());
    let entries = h.supervisor.logs(&id, None, 0).await.unwrap();
    assert!(stream_text(&entries, "stdout").contains("interrupted"));
}

#[tokio::test]
async fn kill_terminates_and_deletes_running_agent() {
    let h = Harness::new(RUN_FOREVER).await;
    let id = AgentId::new("proj:main", "dave");

    let sup = h.supervisor.clone();
    let run = tokio::spawn(async move { sup.spawn(request("dave", AgentKind::Claude)).await });
    let pid = wait_for_pid(&h.supervisor, &id).await;

    h.supervisor.kill(&id).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err());

    assert!(h.supervisor.store().find_agent(&id).await.unwrap().is_none());
    assert!(!drover_supervisor::subprocess::signal::is_alive(pid));
    let exits = exit_messages(&h.supervisor, &id).await;
    assert!(exits.iter().any(|body| body == "dave killed"));
}

#[tokio::test]
async fn sweep_fails_agent_whose_process_is_gone() {
    let h = Harness::new("exit 0\n").await;
    let row = h
        .supervisor
        .register(&request("erin", AgentKind::Claude))
        .await
        .unwrap();
    let id = row.id();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    h.supervisor
        .store()
        .claim_run(&id, row.run_seq, pid, pid)
        .await
        .unwrap();

    let reaped = h.supervisor.sweep().await.unwrap();
    assert_eq!(reaped, [id.clone()]);

    let row = h.supervisor.agent(&id).await.unwrap();
    assert_eq!(row.status(), AgentStatus::Failed);
    assert!(row.pid.is_none());
    let entries = h.supervisor.logs(&id, None, 0).await.unwrap();
    assert_eq!(entries.last().unwrap().event_type, EXIT_MESSAGE_KIND);
    assert_eq!(exit_messages(&h.supervisor, &id).await.len(), 1);

    assert!(h.supervisor.sweep().await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_ignores_live_agents() {
    let h = Harness::new("exit 0\n").await;
    let row = h
        .supervisor
        .register(&request("frank", AgentKind::Claude))
        .await
        .unwrap();
    let id = row.id();
    let own = std::process::id();
    h.supervisor
        .store()
        .claim_run(&id, row.run_seq, own, own)
        .await
        .unwrap();

    assert!(h.supervisor.sweep().await.unwrap().is_empty());
    assert_eq!(
        h.supervisor.agent(&id).await.unwrap().status(),
        AgentStatus::Busy
    );
}

#[tokio::test]
async fn prompt_waits_for_asked_run_to_finish() {
    let h = Harness::new("echo started; sleep 1; echo finished; exit 0\n").await;
    let id = AgentId::new("proj:main", "gina");

    let sup = h.supervisor.clone();
    let run = tokio::spawn(async move { sup.spawn(request("gina", AgentKind::Claude)).await });
    let first_pid = wait_for_pid(&h.supervisor, &id).await;
    wait_for_stdout(&h.supervisor, &id, "started").await;

    h.supervisor.ask(&id, "which branch?").await.unwrap();
    let err = h.supervisor.prompt(&id, "main").await.unwrap_err();
    assert!(matches!(err, SupervisorError::StillRunning { pid, .. } if pid == first_pid));

    let (_, status) = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(status, AgentStatus::Waiting);
    let row = h.supervisor.agent(&id).await.unwrap();
    assert_eq!(row.status(), AgentStatus::Waiting);
    assert!(row.pid.is_none());
    assert!(row.owner_pid.is_none());
    assert!(exit_messages(&h.supervisor, &id).await.is_empty());

    let status = h.supervisor.prompt(&id, "main").await.unwrap();
    assert_eq!(status, AgentStatus::Complete);
    let row = h.supervisor.agent(&id).await.unwrap();
    assert_eq!(row.run_seq, 1);
    assert_eq!(row.status(), AgentStatus::Complete);
    assert_eq!(exit_messages(&h.supervisor, &id).await.len(), 1);
}
