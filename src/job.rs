//! Job tracking and wait machinery.
//!
//! A job is one pipeline's worth of processes sharing a process group.
//! Job state is derived from the member processes: the table never stores
//! a state that could go stale, it re-derives it from the last wait status
//! seen for each member. `Running < Stopped < Done` ordered so that the
//! job state is simply the minimum over its members.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::error::ShellError;
use crate::signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcState {
    Running,
    Stopped,
    Done,
}

impl std::fmt::Display for ProcState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            ProcState::Running => "Running",
            ProcState::Stopped => "Stopped",
            ProcState::Done => "Done",
        })
    }
}

pub trait WaitStatusExt {
    fn proc_state(&self) -> ProcState;
    fn exit_code(&self) -> u8;
}

impl WaitStatusExt for WaitStatus {
    fn proc_state(&self) -> ProcState {
        match self {
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => ProcState::Done,
            WaitStatus::Stopped(..) => ProcState::Stopped,
            _ => ProcState::Running,
        }
    }

    /// Shell convention: a signal-terminated process reports 128 + signo.
    fn exit_code(&self) -> u8 {
        match self {
            WaitStatus::Exited(_, code) => *code as u8,
            WaitStatus::Signaled(_, sig, _) => (128 + *sig as i32) as u8,
            _ => 0,
        }
    }
}

/// One process of a job, with the last wait status observed for it.
#[derive(Debug, Clone, Copy)]
pub struct Proc {
    pub pid: Pid,
    pub status: WaitStatus,
}

impl Proc {
    pub fn state(&self) -> ProcState {
        self.status.proc_state()
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: u32,
    pub pgid: Pid,
    pub procs: Vec<Proc>,
    pub command: String,
}

impl Job {
    pub fn state(&self) -> ProcState {
        self.procs
            .iter()
            .map(Proc::state)
            .min()
            .unwrap_or(ProcState::Done)
    }
}

/// How a foreground wait ended: every member exited, or at least one
/// member stopped (and the pipeline should be kept as a stopped job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Exit code of the last stage.
    Exited(u8),
    Stopped,
}

/// Blocks until every member has exited or stopped, recording each status.
/// `WUNTRACED` so a Ctrl-Z'd pipeline comes back instead of hanging.
pub fn wait_for_procs(procs: &mut [Proc]) -> GroupOutcome {
    loop {
        let running = procs.iter_mut().find(|p| p.state() == ProcState::Running);
        let Some(proc) = running else { break };
        match waitpid(proc.pid, Some(WaitPidFlag::WUNTRACED)) {
            Ok(status) => proc.status = status,
            // Already reaped or gone; count it as exited.
            Err(_) => proc.status = WaitStatus::Exited(proc.pid, 0),
        }
    }
    if procs.iter().any(|p| p.state() == ProcState::Stopped) {
        GroupOutcome::Stopped
    } else {
        GroupOutcome::Exited(procs.last().map_or(0, |p| p.status.exit_code()))
    }
}

/// A job state change worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotice {
    pub id: u32,
    pub state: ProcState,
    pub command: String,
}

impl std::fmt::Display for JobNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{}]  {}\t{}", self.id, self.state, self.command)
    }
}

/// In-memory registry of background and stopped pipelines. Owned by the
/// session, so independent sessions (and tests) get independent tables.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: u32,
}

impl JobTable {
    pub fn new() -> JobTable {
        JobTable::default()
    }

    /// Registers a launched pipeline. Ids are assigned monotonically and
    /// never reused within a session.
    pub fn add(&mut self, pgid: Pid, procs: Vec<Proc>, command: String) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.jobs.push(Job {
            id,
            pgid,
            procs,
            command,
        });
        id
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Most recently added live job, the default target for `fg`/`bg`.
    pub fn latest_id(&self) -> Option<u32> {
        self.jobs.last().map(|j| j.id)
    }

    fn index_of(&self, id: u32) -> Result<usize, ShellError> {
        self.jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or(ShellError::UnknownJob(id))
    }

    /// Non-blocking sweep over every tracked process group: drains pending
    /// wait statuses, transitions Running <-> Stopped, drops jobs whose
    /// group has fully exited. Returns one notice per state change.
    pub fn poll(&mut self) -> Vec<JobNotice> {
        let mut notices = Vec::new();
        for job in &mut self.jobs {
            let before = job.state();
            reap_group(job);
            let after = job.state();
            if after != before {
                notices.push(JobNotice {
                    id: job.id,
                    state: after,
                    command: job.command.clone(),
                });
            }
        }
        self.jobs.retain(|j| j.state() != ProcState::Done);
        notices
    }

    /// Continues the job if stopped, gives it the terminal, blocks until it
    /// exits or stops again, then reclaims the terminal. The job leaves
    /// the table on exit and stays (as Stopped) otherwise.
    pub fn bring_to_foreground(&mut self, id: u32) -> Result<GroupOutcome, ShellError> {
        let idx = self.index_of(id)?;
        let job = &mut self.jobs[idx];
        if job.state() == ProcState::Stopped {
            killpg(job.pgid, Signal::SIGCONT)?;
            mark_continued(job);
        }
        signals::give_terminal_to(job.pgid);
        let outcome = wait_for_procs(&mut job.procs);
        signals::reclaim_terminal();
        if let GroupOutcome::Exited(_) = outcome {
            self.jobs.remove(idx);
        }
        Ok(outcome)
    }

    /// Continues the job without touching terminal ownership and returns
    /// immediately.
    pub fn resume_in_background(&mut self, id: u32) -> Result<(), ShellError> {
        let idx = self.index_of(id)?;
        let job = &mut self.jobs[idx];
        if job.state() == ProcState::Stopped {
            killpg(job.pgid, Signal::SIGCONT)?;
            mark_continued(job);
        }
        Ok(())
    }
}

fn mark_continued(job: &mut Job) {
    for proc in &mut job.procs {
        if proc.state() == ProcState::Stopped {
            proc.status = WaitStatus::Continued(proc.pid);
        }
    }
}

fn reap_group(job: &mut Job) {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(Pid::from_raw(-job.pgid.as_raw()), Some(flags)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                let pid = status.pid();
                if let Some(proc) = job.procs.iter_mut().find(|p| Some(p.pid) == pid) {
                    proc.status = status;
                }
            }
            Err(Errno::ECHILD) => {
                // Nothing left to wait for in this group; whatever we still
                // considered live has exited.
                for proc in &mut job.procs {
                    if proc.state() != ProcState::Done {
                        proc.status = WaitStatus::Exited(proc.pid, 0);
                    }
                }
                break;
            }
            Err(_) => break,
        }
    }
}
