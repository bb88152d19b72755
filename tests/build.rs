#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use cartforge::build::{BuildEvent, BuildHandle, BuildType, Orchestrator};
use cartforge::config::BuildConfig;
use cartforge::error::BuildError;
use cartforge::writer::{GeneratedFile, GeneratedSources};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(20);

/// Toolchain stand-in: `sh rom` runs the script saved as `<src_root>/rom`.
fn setup(script: &str) -> (TempDir, Orchestrator) {
    let dir = TempDir::new().unwrap();
    let src_root = dir.path().join("engine");
    fs::create_dir_all(&src_root).unwrap();
    fs::write(src_root.join("rom"), script).unwrap();

    let cfg = BuildConfig {
        build_program: "sh".to_string(),
        toolchain_bin: dir.path().join("bin"),
        src_root,
        build_dir: dir.path().join("staged"),
        ..BuildConfig::default()
    };
    (dir, Orchestrator::new(cfg))
}

fn sources() -> GeneratedSources {
    GeneratedSources {
        files: vec![GeneratedFile {
            path: "banks.h".into(),
            contents: b"#define NUM_BANKS 1\n".to_vec(),
        }],
    }
}

async fn drain(handle: &mut BuildHandle) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(TIMEOUT, handle.next_event())
        .await
        .expect("build stalled")
    {
        events.push(event);
    }
    events
}

async fn wait_for_out(handle: &mut BuildHandle, wanted: &str) {
    loop {
        let event = tokio::time::timeout(TIMEOUT, handle.next_event())
            .await
            .expect("build stalled")
            .expect("stream closed early");
        if event == (BuildEvent::Out { text: wanted.into() }) {
            return;
        }
    }
}

fn is_running(pid_file: &Path) -> bool {
    let pid = fs::read_to_string(pid_file).unwrap();
    std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap()
        .success()
}

#[tokio::test]
async fn clean_build_streams_lines_in_order() {
    let (_dir, orch) = setup("echo one\necho two\necho note 1>&2\necho three\n");
    let mut handle = orch.start(sources(), BuildType::Rom);
    let events = drain(&mut handle).await;

    let out: Vec<&BuildEvent> = events
        .iter()
        .filter(|e| matches!(e, BuildEvent::Out { .. }))
        .collect();
    assert_eq!(
        out,
        vec![
            &BuildEvent::Out { text: "one".into() },
            &BuildEvent::Out { text: "two".into() },
            &BuildEvent::Out { text: "three".into() },
        ]
    );
    assert!(events.contains(&BuildEvent::Err { text: "note".into() }));
    assert_eq!(events.last(), Some(&BuildEvent::Complete { error: None }));
    assert_eq!(events.iter().filter(|e| e.is_complete()).count(), 1);
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn toolchain_runs_in_src_root_against_staged_files() {
    let (_dir, orch) = setup("cat include/banks.h\nls src/data\necho \"$PATH\" | cut -d: -f1\n");
    let bin = orch.config().toolchain_bin.display().to_string();
    let mut handle = orch.start(sources(), BuildType::Rom);
    let events = drain(&mut handle).await;

    assert!(events.contains(&BuildEvent::Out { text: "#define NUM_BANKS 1".into() }));
    assert!(events.contains(&BuildEvent::Out { text: "banks.h".into() }));
    assert!(events.contains(&BuildEvent::Out { text: bin }));
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn nonzero_exit_reports_last_stderr_line() {
    let (_dir, orch) = setup("echo compiling\necho 'ld: overflow in bank 3' 1>&2\nexit 2\n");
    let mut handle = orch.start(sources(), BuildType::Rom);
    let events = drain(&mut handle).await;

    match events.last() {
        Some(BuildEvent::Complete { error: Some(e) }) => {
            assert!(e.contains("overflow in bank 3"), "{e}")
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert!(matches!(handle.wait().await, Err(BuildError::Toolchain(_))));
}

#[tokio::test]
async fn fatal_marker_fails_a_clean_exit() {
    let (_dir, orch) =
        setup("echo '*** no rule to make target' 1>&2\necho 'make: leaving' 1>&2\nexit 0\n");
    let mut handle = orch.start(sources(), BuildType::Rom);
    let events = drain(&mut handle).await;

    match events.last() {
        Some(BuildEvent::Complete { error: Some(e) }) => assert!(e.contains("*** no rule"), "{e}"),
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert!(handle.wait().await.is_err());
}

#[tokio::test]
async fn cancel_kills_the_process() {
    let (dir, orch) = setup("echo $$ > ../pid\necho started\nexec sleep 30\n");
    let mut handle = orch.start(sources(), BuildType::Rom);
    wait_for_out(&mut handle, "started").await;

    handle.cancel();
    let events = drain(&mut handle).await;
    assert_eq!(
        events.last(),
        Some(&BuildEvent::Complete { error: Some("build cancelled".into()) })
    );
    assert!(matches!(handle.wait().await, Err(BuildError::Cancelled)));
    assert!(!is_running(&dir.path().join("pid")));
}

#[tokio::test]
async fn invalid_utf8_line_does_not_stop_the_stream() {
    let script = "\
echo before
printf 'bad \\377 byte\\n'
echo after
i=0
while [ $i -lt 20000 ]; do echo line$i; i=$((i + 1)); done
echo done
";
    let (_dir, orch) = setup(script);
    let mut handle = orch.start(sources(), BuildType::Rom);
    let events = drain(&mut handle).await;

    let out: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            BuildEvent::Out { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(out.len(), 20004);
    assert_eq!(&out[..3], &["before", "bad \u{FFFD} byte", "after"]);
    assert_eq!(out[3], "line0");
    assert_eq!(out.last(), Some(&"done"));
    assert_eq!(events.last(), Some(&BuildEvent::Complete { error: None }));
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn cancel_kills_background_children_too() {
    let (dir, orch) = setup("(sleep 1; echo stale > ../late) &\necho started\nwait\n");
    let mut handle = orch.start(sources(), BuildType::Rom);
    wait_for_out(&mut handle, "started").await;

    handle.cancel();
    drain(&mut handle).await;
    assert!(matches!(handle.wait().await, Err(BuildError::Cancelled)));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!dir.path().join("late").exists(), "background job outlived the cancel");
}

#[tokio::test]
async fn cancel_before_start_never_runs_the_toolchain() {
    let (dir, orch) = setup("touch ../ran\necho ran\n");
    let mut handle = orch.start(sources(), BuildType::Rom);
    handle.cancel();

    let events = drain(&mut handle).await;
    assert_eq!(
        events,
        vec![BuildEvent::Complete { error: Some("build cancelled".into()) }]
    );
    assert!(matches!(handle.wait().await, Err(BuildError::Cancelled)));
    assert!(!dir.path().join("ran").exists());
}

#[tokio::test]
async fn new_build_supersedes_the_running_one() {
    let script = "\
if [ -f ../first ]; then
  if kill -0 \"$(cat ../pid)\" 2>/dev/null; then echo '*** previous build still alive' 1>&2; fi
  echo second
  exit 0
fi
touch ../first
echo $$ > ../pid
echo started
exec sleep 30
";
    let (_dir, orch) = setup(script);
    let mut first = orch.start(sources(), BuildType::Rom);
    wait_for_out(&mut first, "started").await;

    let mut second = orch.start(sources(), BuildType::Rom);
    let first_events = drain(&mut first).await;
    assert_eq!(
        first_events.last(),
        Some(&BuildEvent::Complete { error: Some("build cancelled".into()) })
    );

    let second_events = drain(&mut second).await;
    assert!(second_events.contains(&BuildEvent::Out { text: "second".into() }));
    assert_eq!(second_events.last(), Some(&BuildEvent::Complete { error: None }));
    second.wait().await.unwrap();
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let (_dir, orch) = setup("");
    let cfg = BuildConfig {
        build_program: "cartforge-no-such-toolchain".to_string(),
        ..orch.config().clone()
    };
    let mut handle = Orchestrator::new(cfg).start(sources(), BuildType::Rom);
    let events = drain(&mut handle).await;
    assert!(matches!(events.last(), Some(BuildEvent::Complete { error: Some(_) })));
    assert!(matches!(handle.wait().await, Err(BuildError::Spawn { .. })));
}
