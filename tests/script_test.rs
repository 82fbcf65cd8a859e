//! Integration tests for the script-backed automation.
//!
//! Only one test here spawns a child, so no other thread in this binary can
//! hold the script open for writing while it is exec'd.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use ftl2_runner::automation::{Automation, NotificationSink, RunContext, ScriptAutomation};
use ftl2_runner::error::Result;
use ftl2_runner::model::Notification;
use serde_json::{Map, json};

#[derive(Default)]
struct Recorder {
    blocks: Vec<String>,
    notifications: Vec<Notification>,
}

impl NotificationSink for Recorder {
    fn enter_block(&mut self, name: &str) -> Result<()> {
        self.blocks.push(name.to_string());
        Ok(())
    }

    fn notify(&mut self, notification: Notification) -> Result<()> {
        self.notifications.push(notification);
        Ok(())
    }
}

const SCRIPT: &str = r#"#!/bin/sh
echo '{"event": "automation_start", "name": "Setup"}'
echo '{"event": "module_start", "module": "ping", "host": "web1"}'
echo 'plain progress text'
echo '{"event": "module_complete", "module": "ping", "host": "web1", "success": true, "output": {"ping": "pong"}}'
echo "ident=$FTL2_IDENT vars=$FTL2_EXTRAVARS inv=$FTL2_INVENTORY" >&2
pwd >&2
exit 3
"#;

#[test]
fn script_reports_notifications_and_exit_code() {
    let pdd = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let script = bin.path().join("main.sh");
    fs::write(&script, SCRIPT).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let stderr_path = pdd.path().join("stderr");
    let mut extravars = Map::new();
    extravars.insert("region".to_string(), json!("eu"));
    let ctx = RunContext {
        ident: "7".to_string(),
        private_data_dir: pdd.path().to_path_buf(),
        inventory: Some(pdd.path().join("inventory")),
        extravars,
        stderr_path: Some(stderr_path.clone()),
    };

    let mut automation = ScriptAutomation::new(&script);
    let mut recorder = Recorder::default();
    let rc = automation.run(&ctx, &mut recorder).unwrap();

    assert_eq!(rc, 3);
    assert_eq!(recorder.blocks, vec!["Setup"]);
    assert_eq!(recorder.notifications.len(), 2);
    assert_eq!(recorder.notifications[0], Notification::start("ping", "web1"));
    assert_eq!(
        recorder.notifications[1],
        Notification::complete("ping", "web1", true, false, json!({"ping": "pong"}))
    );

    let stderr = fs::read_to_string(&stderr_path).unwrap();
    let inventory = pdd.path().join("inventory");
    assert!(stderr.contains(&format!(
        "ident=7 vars={{\"region\":\"eu\"}} inv={}",
        inventory.display()
    )));
    let cwd = PathBuf::from(stderr.lines().nth(1).unwrap());
    assert_eq!(
        fs::canonicalize(cwd).unwrap(),
        fs::canonicalize(pdd.path()).unwrap()
    );

    let command = automation.command(&ctx);
    assert_eq!(command.command, vec![script.display().to_string()]);
    assert_eq!(command.cwd, pdd.path());
    assert_eq!(command.env["FTL2_IDENT"], "7");
}

#[test]
fn missing_script_reports_success() {
    let pdd = tempfile::tempdir().unwrap();
    let ctx = RunContext {
        ident: "1".to_string(),
        private_data_dir: pdd.path().to_path_buf(),
        ..Default::default()
    };

    let mut automation = ScriptAutomation::new("/nonexistent/main.py");
    let mut recorder = Recorder::default();
    let rc = automation.run(&ctx, &mut recorder).unwrap();

    assert_eq!(rc, 0);
    assert!(recorder.blocks.is_empty());
    assert_eq!(
        recorder.notifications,
        vec![
            Notification::start("ftl2_runner", "localhost"),
            Notification::complete(
                "ftl2_runner",
                "localhost",
                true,
                false,
                json!({"msg": "No script found at /nonexistent/main.py"}),
            ),
        ]
    );
}
