//! Pipeline executor.
//!
//! A pipeline is dispatched in two phases. Planning turns the parsed
//! pipeline into one [`SpawnSpec`] per stage: argv already converted to
//! `CString`s and stdin/stdout bound to a pipe end, a redirect file, or
//! the inherited descriptor. All pipes are created up front with
//! `O_CLOEXEC` as `OwnedFd`s, so abandoning a half-built plan closes
//! everything already allocated. Spawning then forks each stage into a
//! shared process group, wires its descriptors, and either waits in the
//! foreground or registers a background job.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, ForkResult, Pid};

use crate::builtin;
use crate::error::ShellError;
use crate::job::{wait_for_procs, GroupOutcome, Proc};
use crate::session::Session;
use crate::signals;
use crate::types::{Pipeline, Stage};

/// Reserved child exit statuses the waiting parent can tell apart.
pub const EXIT_REDIRECT_FAILED: u8 = 125;
pub const EXIT_EXEC_FAILED: u8 = 126;
pub const EXIT_NOT_FOUND: u8 = 127;

/// Result of dispatching one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The pipeline (or in-process builtin) finished; exit code of the
    /// last stage.
    Done(u8),
    /// Registered as a background job; the shell did not block.
    Background { id: u32, pgid: Pid },
    /// The foreground pipeline was stopped and kept as a job.
    Stopped { id: u32 },
}

enum StdinBinding {
    Inherit,
    Pipe(OwnedFd),
    File(String),
}

enum StdoutBinding {
    Inherit,
    Pipe(OwnedFd),
    File { path: String, append: bool },
}

/// Everything one stage needs after fork. Assembled before any fork so
/// the child allocates as little as possible.
struct SpawnSpec {
    argv: Vec<CString>,
    stdin: StdinBinding,
    stdout: StdoutBinding,
}

fn plan(pipeline: &Pipeline) -> Result<Vec<SpawnSpec>, ShellError> {
    let n = pipeline.stages.len();
    let mut specs = Vec::with_capacity(n);
    let mut prev_read: Option<OwnedFd> = None;
    for (i, stage) in pipeline.stages.iter().enumerate() {
        let argv = stage
            .args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(std::io::Error::from)?;
        let stdin = match prev_read.take() {
            Some(fd) => StdinBinding::Pipe(fd),
            // An input redirect is only meaningful on the first stage;
            // the parser records it wherever it was written.
            None => match (i, &stage.input) {
                (0, Some(path)) => StdinBinding::File(path.clone()),
                _ => StdinBinding::Inherit,
            },
        };
        let stdout = if i + 1 < n {
            let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
            prev_read = Some(read);
            StdoutBinding::Pipe(write)
        } else {
            match &stage.output {
                Some(redir) => StdoutBinding::File {
                    path: redir.path.clone(),
                    append: redir.append,
                },
                None => StdoutBinding::Inherit,
            }
        };
        specs.push(SpawnSpec {
            argv,
            stdin,
            stdout,
        });
    }
    Ok(specs)
}

/// Forks the pipeline's processes and collects them into one process
/// group rooted at the first child's pid. Both parent and child call
/// `setpgid`; whichever runs first wins and the other side's call is an
/// idempotent no-op (it may also fail once the child has exec'd, which is
/// equally harmless), so neither the exec nor the parent's terminal
/// handoff can race the group assignment.
struct JobBuilder {
    pgid: Option<Pid>,
    procs: Vec<Proc>,
}

impl JobBuilder {
    fn new(size_hint: usize) -> JobBuilder {
        JobBuilder {
            pgid: None,
            procs: Vec::with_capacity(size_hint),
        }
    }

    fn push_fork(&mut self) -> nix::Result<ForkResult> {
        // SAFETY: the child only wires descriptors and execs or _exits;
        // argv and stdio bindings were prepared before the fork.
        let result = unsafe { unistd::fork() }?;
        match result {
            ForkResult::Parent { child } => {
                let pgid = self.pgid.unwrap_or(child);
                let _ = unistd::setpgid(child, pgid);
                self.pgid = Some(pgid);
                self.procs.push(Proc {
                    pid: child,
                    status: WaitStatus::StillAlive,
                });
            }
            ForkResult::Child => {
                let pgid = self.pgid.unwrap_or(Pid::from_raw(0));
                let _ = unistd::setpgid(Pid::from_raw(0), pgid);
            }
        }
        Ok(result)
    }

    fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    fn build(self) -> (Pid, Vec<Proc>) {
        assert!(!self.procs.is_empty());
        (self.pgid.unwrap(), self.procs)
    }
}

/// Binds the child's stdin/stdout. A failed redirect open is fatal to
/// this child only; the reserved status lets the parent tell it apart
/// from the program's own exit codes.
fn wire_stdio(spec: &SpawnSpec) -> Result<(), u8> {
    match &spec.stdin {
        StdinBinding::Inherit => {}
        StdinBinding::Pipe(fd) => {
            unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO).map_err(|_| EXIT_EXEC_FAILED)?;
        }
        StdinBinding::File(path) => {
            let file = File::open(path).map_err(|e| {
                eprintln!("rish: {path}: {e}");
                EXIT_REDIRECT_FAILED
            })?;
            let fd = file.into_raw_fd();
            unistd::dup2(fd, libc::STDIN_FILENO).map_err(|_| EXIT_EXEC_FAILED)?;
            let _ = unistd::close(fd);
        }
    }
    match &spec.stdout {
        StdoutBinding::Inherit => {}
        StdoutBinding::Pipe(fd) => {
            unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO).map_err(|_| EXIT_EXEC_FAILED)?;
        }
        StdoutBinding::File { path, append } => {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true);
            if *append {
                opts.append(true);
            } else {
                opts.truncate(true);
            }
            let file = opts.open(path).map_err(|e| {
                eprintln!("rish: {path}: {e}");
                EXIT_REDIRECT_FAILED
            })?;
            let fd = file.into_raw_fd();
            unistd::dup2(fd, libc::STDOUT_FILENO).map_err(|_| EXIT_EXEC_FAILED)?;
            let _ = unistd::close(fd);
        }
    }
    Ok(())
}

fn run_child(
    session: &mut Session,
    stage: &Stage,
    spec: &SpawnSpec,
    pipe_fds: &[RawFd],
    skip_builtin: bool,
) -> ! {
    signals::restore_child_defaults();
    if let Err(status) = wire_stdio(spec) {
        unsafe { libc::_exit(status as i32) }
    }
    // A process holding an unused pipe end keeps its sibling from ever
    // seeing EOF; close them all, the wired copies at fd 0/1 survive.
    for &fd in pipe_fds {
        let _ = unistd::close(fd);
    }
    if !skip_builtin {
        if let Some(builtin) = builtin::lookup(&stage.args[0]) {
            session.in_child = true;
            let status = builtin(session, stage);
            unsafe { libc::_exit(status as i32) }
        }
    }
    match unistd::execvp(&spec.argv[0], &spec.argv) {
        Err(Errno::ENOENT) => {
            eprintln!("rish: {}: command not found", stage.args[0]);
            unsafe { libc::_exit(EXIT_NOT_FOUND as i32) }
        }
        Err(e) => {
            eprintln!("rish: {}: {}", stage.args[0], e);
            unsafe { libc::_exit(EXIT_EXEC_FAILED as i32) }
        }
        Ok(infallible) => match infallible {},
    }
}

fn spawn_stages(
    session: &mut Session,
    pipeline: &Pipeline,
    specs: Vec<SpawnSpec>,
    skip_builtin: bool,
    builder: &mut JobBuilder,
) -> Result<(), ShellError> {
    let pipe_fds: Vec<RawFd> = specs
        .iter()
        .flat_map(|spec| {
            let mut fds = Vec::new();
            if let StdinBinding::Pipe(fd) = &spec.stdin {
                fds.push(fd.as_raw_fd());
            }
            if let StdoutBinding::Pipe(fd) = &spec.stdout {
                fds.push(fd.as_raw_fd());
            }
            fds
        })
        .collect();
    for (stage, spec) in pipeline.stages.iter().zip(&specs) {
        match builder.push_fork()? {
            ForkResult::Parent { .. } => {}
            ForkResult::Child => run_child(session, stage, spec, &pipe_fds, skip_builtin),
        }
    }
    // Dropping the plan closes the parent's copies of every pipe end; the
    // last stage is already spawned with its read end, so no data can be
    // cut off, and the downstream EOFs now depend only on the children.
    drop(specs);
    Ok(())
}

/// Dispatches one parsed pipeline: blocks until a foreground pipeline
/// completes or stops, or registers a background job and returns at once.
pub fn execute(session: &mut Session, pipeline: &Pipeline) -> Result<ExecOutcome, ShellError> {
    let stages = &pipeline.stages;
    if stages.is_empty() || stages.iter().any(|s| s.args.is_empty()) {
        return Err(ShellError::Sys(Errno::EINVAL));
    }

    // Single-command, non-background, redirect-free builtins run in the
    // shell's own process. This is the only path that creates no process,
    // and the reason cd and exit can affect the shell itself.
    let mut skip_builtin = false;
    if stages.len() == 1
        && !pipeline.background
        && stages[0].input.is_none()
        && stages[0].output.is_none()
    {
        match builtin::lookup(&stages[0].args[0]) {
            Some(builtin) => return Ok(ExecOutcome::Done(builtin(session, &stages[0]))),
            // Known external; the child need not re-check the table.
            None => skip_builtin = true,
        }
    }

    let specs = plan(pipeline)?;
    let mut builder = JobBuilder::new(stages.len());
    if let Err(e) = spawn_stages(session, pipeline, specs, skip_builtin, &mut builder) {
        // A fork failure mid-pipeline: report it, but the stages already
        // spawned are still waited for (or registered) below.
        eprintln!("rish: {e}");
    }
    if builder.is_empty() {
        return Ok(ExecOutcome::Done(EXIT_EXEC_FAILED));
    }
    let (pgid, mut procs) = builder.build();

    if pipeline.background {
        let id = session.jobs.add(pgid, procs, pipeline.to_string());
        return Ok(ExecOutcome::Background { id, pgid });
    }

    signals::give_terminal_to(pgid);
    let outcome = wait_for_procs(&mut procs);
    signals::reclaim_terminal();
    match outcome {
        GroupOutcome::Exited(code) => Ok(ExecOutcome::Done(code)),
        GroupOutcome::Stopped => {
            let id = session.jobs.add(pgid, procs, pipeline.to_string());
            Ok(ExecOutcome::Stopped { id })
        }
    }
}
