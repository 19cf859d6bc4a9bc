//! End-to-end executor and job-table tests. Everything here forks, so the
//! tests are serialized through one mutex; each one drives the executor
//! the way the read loop would.

use std::fs;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use rish::exec::{self, ExecOutcome, EXIT_NOT_FOUND};
use rish::job::ProcState;
use rish::parser;
use rish::session::Session;

static LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run(session: &mut Session, line: &str) -> ExecOutcome {
    let pipeline = parser::parse(line).expect("pipeline should parse");
    exec::execute(session, &pipeline).expect("pipeline should launch")
}

fn assert_done(outcome: ExecOutcome, code: u8) {
    match outcome {
        ExecOutcome::Done(c) => assert_eq!(c, code),
        other => panic!("expected Done({code}), got {other:?}"),
    }
}

/// Polls until `pred` holds for the table, failing after five seconds.
fn poll_until(session: &mut Session, what: &str, pred: impl Fn(&Session) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !pred(session) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        session.jobs.poll();
        thread::sleep(Duration::from_millis(20));
    }
}

/// Kills a job's group and polls it out of the table.
fn cleanup_job(session: &mut Session, id: u32, pgid: Pid) {
    let _ = killpg(pgid, Signal::SIGKILL);
    poll_until(session, "job cleanup", |s| s.jobs.iter().all(|j| j.id != id));
}

#[test]
fn pipe_carries_bytes_across_a_buffer_boundary() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    // Well past the 64 KiB pipe buffer.
    let line = format!("head -c 100000 /dev/zero | cat > {}", out.display());
    let mut session = Session::new();
    assert_done(run(&mut session, &line), 0);
    assert_eq!(fs::metadata(&out).unwrap().len(), 100_000);
}

#[test]
fn input_and_output_redirection() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    fs::write(&input, "hello redirection\n").unwrap();
    let mut session = Session::new();
    let line = format!("cat < {} > {}", input.display(), output.display());
    assert_done(run(&mut session, &line), 0);
    assert_eq!(fs::read_to_string(&output).unwrap(), "hello redirection\n");
}

#[test]
fn append_redirection_keeps_earlier_contents() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("log.txt");
    let mut session = Session::new();
    assert_done(run(&mut session, &format!("echo one > {}", out.display())), 0);
    assert_done(run(&mut session, &format!("echo two >> {}", out.display())), 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\n");
}

#[test]
fn truncating_redirection_discards_earlier_contents() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("log.txt");
    let mut session = Session::new();
    assert_done(run(&mut session, &format!("echo one > {}", out.display())), 0);
    assert_done(run(&mut session, &format!("echo two > {}", out.display())), 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "two\n");
}

#[test]
fn three_stage_pipeline_orders_stages_left_to_right() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("sorted.txt");
    let line = format!("printf 'b\\na\\nb\\n' | sort | cat > {}", out.display());
    let mut session = Session::new();
    assert_done(run(&mut session, &line), 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\nb\n");
}

#[test]
fn missing_command_reports_the_reserved_status() {
    let _guard = serial();
    let mut session = Session::new();
    assert_done(
        run(&mut session, "rish-no-such-command-xyzzy"),
        EXIT_NOT_FOUND,
    );
    // As the last stage of a pipeline its status is the pipeline's.
    assert_done(
        run(&mut session, "cat /dev/null | rish-no-such-command-xyzzy"),
        EXIT_NOT_FOUND,
    );
    // Elsewhere in the pipeline it does not poison the siblings.
    assert_done(
        run(&mut session, "rish-no-such-command-xyzzy | cat"),
        0,
    );
}

#[test]
fn missing_redirect_file_is_fatal_to_that_child_only() {
    let _guard = serial();
    let mut session = Session::new();
    assert_done(
        run(&mut session, "cat < /rish-no-such-dir/no-such-file"),
        exec::EXIT_REDIRECT_FAILED,
    );
}

#[test]
fn pipeline_exit_code_is_the_last_stage() {
    let _guard = serial();
    let mut session = Session::new();
    assert_done(run(&mut session, "sh -c 'exit 3'"), 3);
    assert_done(run(&mut session, "sh -c 'exit 3' | cat /dev/null"), 0);
}

#[test]
fn background_pipeline_returns_without_blocking() {
    let _guard = serial();
    let mut session = Session::new();
    let started = Instant::now();
    let outcome = run(&mut session, "sleep 0.3 &");
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "background launch blocked"
    );
    let ExecOutcome::Background { id, .. } = outcome else {
        panic!("expected a background job, got {outcome:?}");
    };

    let job = session.jobs.iter().find(|j| j.id == id).expect("job listed");
    assert_eq!(job.state(), ProcState::Running);
    assert_eq!(job.command, "sleep 0.3 &");

    // Poll until the job's group exits and it drops out of the table.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut done_notice = false;
    while session.jobs.iter().any(|j| j.id == id) {
        assert!(Instant::now() < deadline, "job never finished");
        done_notice |= session
            .jobs
            .poll()
            .iter()
            .any(|n| n.id == id && n.state == ProcState::Done);
        thread::sleep(Duration::from_millis(20));
    }
    assert!(done_notice, "no Done notice was emitted");
}

#[test]
fn background_jobs_get_their_own_process_group() {
    let _guard = serial();
    let mut session = Session::new();
    let outcome = run(&mut session, "sleep 0.2 &");
    let ExecOutcome::Background { id, pgid } = outcome else {
        panic!("expected a background job, got {outcome:?}");
    };
    assert_ne!(pgid, nix::unistd::getpgrp());
    let job = session.jobs.iter().find(|j| j.id == id).unwrap();
    // The group is rooted at the first stage's pid.
    assert_eq!(job.procs[0].pid, pgid);
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.jobs.iter().any(|j| j.id == id) {
        assert!(Instant::now() < deadline, "job never finished");
        session.jobs.poll();
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn builtin_fast_path_affects_the_shell_process() {
    let _guard = serial();
    let mut session = Session::new();
    assert_done(run(&mut session, "exit 7"), 0);
    assert_eq!(session.exit, Some(7));
}

#[test]
fn builtins_run_in_a_child_when_piped() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("pwd.txt");
    let mut session = Session::new();
    // pwd with a redirect takes the forked path; the shell's own state is
    // untouched and the output lands in the file.
    assert_done(run(&mut session, &format!("pwd > {}", out.display())), 0);
    let written = fs::read_to_string(&out).unwrap();
    assert_eq!(
        written.trim_end(),
        std::env::current_dir().unwrap().to_string_lossy()
    );
    assert_eq!(session.exit, None);
}

#[test]
fn jobs_listing_in_a_child_reports_live_jobs() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("jobs.txt");
    let mut session = Session::new();
    let outcome = run(&mut session, "sleep 2 &");
    let ExecOutcome::Background { id, pgid } = outcome else {
        panic!("expected a background job, got {outcome:?}");
    };

    // `jobs` with a redirect runs in a forked child; the listing it
    // writes must still show the shell's live job as Running.
    assert_done(run(&mut session, &format!("jobs > {}", out.display())), 0);
    let listing = fs::read_to_string(&out).unwrap();
    assert!(
        listing.contains(&format!("[{id}]  Running\tsleep 2 &")),
        "listing misreported the live job: {listing:?}"
    );
    assert!(!listing.contains("Done"), "listing: {listing:?}");

    // And the shell's own table was not disturbed by the child.
    let job = session.jobs.iter().find(|j| j.id == id).expect("job kept");
    assert_eq!(job.state(), ProcState::Running);

    cleanup_job(&mut session, id, pgid);
}

#[test]
fn stopped_jobs_are_tracked_and_resumable() {
    let _guard = serial();
    let mut session = Session::new();
    let outcome = run(&mut session, "sleep 5 &");
    let ExecOutcome::Background { id, pgid } = outcome else {
        panic!("expected a background job, got {outcome:?}");
    };

    killpg(pgid, Signal::SIGSTOP).unwrap();
    poll_until(&mut session, "job to stop", |s| {
        s.jobs
            .iter()
            .any(|j| j.id == id && j.state() == ProcState::Stopped)
    });

    session.jobs.resume_in_background(id).unwrap();
    let job = session.jobs.iter().find(|j| j.id == id).unwrap();
    assert_eq!(job.state(), ProcState::Running);

    // A later sweep sees the SIGCONT-driven status and keeps it Running.
    session.jobs.poll();
    let job = session.jobs.iter().find(|j| j.id == id).unwrap();
    assert_eq!(job.state(), ProcState::Running);

    cleanup_job(&mut session, id, pgid);
}

#[test]
fn quoted_arguments_survive_the_whole_path() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("echo.txt");
    let mut session = Session::new();
    let line = format!("echo 'a b' c > {}", out.display());
    assert_done(run(&mut session, &line), 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "a b c\n");
}
