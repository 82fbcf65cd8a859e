//! Integration tests for terminal-only (ANSI) mode.

use ftl2_runner::ansi;
use ftl2_runner::automation::{Automation, NotificationSink, RunContext};
use ftl2_runner::engine::TerminalRun;
use ftl2_runner::error::{Error, Result};
use ftl2_runner::model::{JobStatus, Notification};
use serde_json::{Value, json};

struct Fixed(Vec<Notification>);

impl Automation for Fixed {
    fn run(&mut self, _ctx: &RunContext, sink: &mut dyn NotificationSink) -> Result<i32> {
        for n in self.0.drain(..) {
            sink.notify(n)?;
        }
        Ok(0)
    }
}

fn ping(success: bool) -> Fixed {
    Fixed(vec![
        Notification::start("ping", "localhost"),
        Notification::complete("ping", "localhost", success, false, json!({"ping": "pong"})),
    ])
}

fn run(base: &TerminalRun, mut automation: Fixed) -> (JobStatus, i32, String) {
    let script = tempfile::NamedTempFile::new().unwrap();
    let mut run = base.clone();
    run.playbook = script.path().to_path_buf();

    let mut out = Vec::new();
    let outcome = run.run(&mut automation, &mut out).unwrap();
    (outcome.status, outcome.rc, String::from_utf8(out).unwrap())
}

#[test]
fn events_are_bracketed_by_markers() {
    let (status, rc, text) = run(&TerminalRun::new("unused"), ping(true));
    assert_eq!(status, JobStatus::Successful);
    assert_eq!(rc, 0);

    // Begin and end marker per event.
    let envelopes = ansi::decode_all(&text);
    let tags: Vec<&str> = envelopes
        .iter()
        .map(|e| e["event"].as_str().unwrap())
        .collect();
    assert_eq!(
        tags,
        vec![
            "playbook_on_start",
            "playbook_on_start",
            "playbook_on_play_start",
            "playbook_on_play_start",
            "playbook_on_task_start",
            "playbook_on_task_start",
            "runner_on_ok",
            "runner_on_ok",
            "playbook_on_stats",
            "playbook_on_stats",
        ]
    );
    for pair in envelopes.chunks(2) {
        assert_eq!(pair[0], pair[1]);
    }

    let ok = &envelopes[6];
    assert_eq!(ok["event_data"]["host"], "localhost");
    assert_eq!(ok["pid"], json!(std::process::id()));
    assert!(ok.get("job_id").is_none());
    assert_eq!(ok["parent_uuid"], envelopes[4]["uuid"]);
}

#[test]
fn visible_text_reads_like_a_playbook_run() {
    let (_, _, text) = run(&TerminalRun::new("unused"), ping(true));
    let visible = ansi::visible_text(&text);

    assert!(visible.contains("PLAY [FTL2 Script] *"));
    assert!(visible.contains("TASK [ping] *"));
    assert!(visible.contains("ok: [localhost]\n"));
    assert!(!visible.contains("=>"));
    assert!(visible.contains("PLAY RECAP *"));
}

#[test]
fn verbose_includes_results() {
    let mut config = TerminalRun::new("unused");
    config.verbosity = 1;
    let (_, _, text) = run(&config, ping(true));
    assert!(ansi::visible_text(&text).contains("ok: [localhost] => {\n    \"ping\": \"pong\"\n}"));
}

#[test]
fn job_id_and_width_are_applied() {
    let mut config = TerminalRun::new("unused");
    config.job_id = Some(99);
    config.ansi_width = 10;
    let (_, _, text) = run(&config, ping(true));

    let envelopes: Vec<Value> = ansi::decode_all(&text);
    assert!(envelopes.iter().all(|e| e["job_id"] == 99));
    assert!(text.contains("\x1b[10D"));
}

#[test]
fn failures_set_rc_two() {
    let (status, rc, _) = run(&TerminalRun::new("unused"), ping(false));
    assert_eq!(status, JobStatus::Failed);
    assert_eq!(rc, 2);
}

#[test]
fn missing_playbook_is_an_automation_error() {
    let run = TerminalRun::new("/nonexistent/site.py");
    let mut out = Vec::new();
    let err = run.run(&mut ping(true), &mut out).unwrap_err();
    assert!(matches!(err, Error::Automation(_)));
    assert!(out.is_empty());
}
