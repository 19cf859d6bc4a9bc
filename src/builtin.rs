//! Builtin dispatch and bodies.
//!
//! A builtin runs with the stdio it was handed: in the shell's own
//! process for a plain single command, or in a forked child with already
//! redirected descriptors when it appears inside a pipeline. Output goes
//! through the real stdout handle rather than the `print!` macros: the
//! macros can be rebound by the embedding process (libtest captures them
//! per thread), and a forked child must hit the descriptor that was just
//! dup2'd into place.

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::job::GroupOutcome;
use crate::session::Session;
use crate::types::Stage;

pub type BuiltinFn = fn(&mut Session, &Stage) -> u8;

/// Resolves a command name to its in-process implementation, or `None`
/// for the external-process path.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    match name {
        "cd" => Some(cd),
        "pwd" => Some(pwd),
        "exit" => Some(exit),
        "help" => Some(help),
        "history" => Some(history),
        "jobs" => Some(jobs),
        "fg" => Some(fg),
        "bg" => Some(bg),
        _ => None,
    }
}

fn cd(_session: &mut Session, stage: &Stage) -> u8 {
    let target = match stage.args.get(1) {
        Some(dir) => PathBuf::from(dir),
        None => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home),
            None => {
                eprintln!("rish: cd: HOME not set");
                return 1;
            }
        },
    };
    match env::set_current_dir(&target) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("rish: cd: {}: {}", target.display(), e);
            1
        }
    }
}

fn pwd(_session: &mut Session, _stage: &Stage) -> u8 {
    match env::current_dir() {
        Ok(dir) => {
            let _ = writeln!(io::stdout(), "{}", dir.display());
            0
        }
        Err(e) => {
            eprintln!("rish: pwd: {e}");
            1
        }
    }
}

fn exit(session: &mut Session, stage: &Stage) -> u8 {
    let code = match stage.args.get(1) {
        None => 0,
        Some(arg) => match arg.parse() {
            Ok(code) => code,
            Err(_) => {
                eprintln!("rish: exit: {arg}: numeric argument required");
                2
            }
        },
    };
    session.exit = Some(code);
    0
}

fn help(_session: &mut Session, _stage: &Stage) -> u8 {
    let _ = writeln!(io::stdout(), "Built-ins: cd pwd help exit history jobs fg bg");
    0
}

fn history(session: &mut Session, _stage: &Stage) -> u8 {
    let mut out = io::stdout();
    for (i, line) in session.history.iter().enumerate() {
        let _ = writeln!(out, "{:4}  {}", i + 1, line);
    }
    0
}

fn jobs(session: &mut Session, _stage: &Stage) -> u8 {
    // Refresh first so the listing reflects reality, and surface anything
    // that finished since the last sweep. Only the owning shell process
    // may do this: in a forked child the table is a copy whose processes
    // are the shell's children, so waitpid would see ECHILD and the
    // listing would misreport live jobs as done.
    let mut out = io::stdout();
    if !session.in_child {
        for notice in session.jobs.poll() {
            let _ = writeln!(out, "{notice}");
        }
    }
    for job in session.jobs.iter() {
        let _ = writeln!(out, "[{}]  {}\t{}", job.id, job.state(), job.command);
    }
    0
}

/// `fg`/`bg` take `%N`, a bare id, or nothing (the most recent job).
fn job_arg(session: &Session, stage: &Stage) -> Result<u32, String> {
    match stage.args.get(1) {
        None => session
            .jobs
            .latest_id()
            .ok_or_else(|| "no current job".to_string()),
        Some(arg) => arg
            .trim_start_matches('%')
            .parse()
            .map_err(|_| format!("invalid job id: {arg}")),
    }
}

fn fg(session: &mut Session, stage: &Stage) -> u8 {
    let id = match job_arg(session, stage) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("rish: fg: {msg}");
            return 1;
        }
    };
    if let Some(job) = session.jobs.iter().find(|j| j.id == id) {
        let _ = writeln!(io::stdout(), "{}", job.command);
    }
    match session.jobs.bring_to_foreground(id) {
        Ok(GroupOutcome::Exited(code)) => code,
        Ok(GroupOutcome::Stopped) => {
            let _ = writeln!(io::stdout(), "[{id}]  Stopped");
            0
        }
        Err(e) => {
            eprintln!("rish: fg: {e}");
            1
        }
    }
}

fn bg(session: &mut Session, stage: &Stage) -> u8 {
    let id = match job_arg(session, stage) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("rish: bg: {msg}");
            return 1;
        }
    };
    match session.jobs.resume_in_background(id) {
        Ok(()) => {
            if let Some(job) = session.jobs.iter().find(|j| j.id == id) {
                let _ = writeln!(io::stdout(), "[{}] {} &", job.id, job.command);
            }
            0
        }
        Err(e) => {
            eprintln!("rish: bg: {e}");
            1
        }
    }
}
