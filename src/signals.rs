//! Process-wide signal policy and terminal ownership.
//!
//! The shell ignores the interactive signals for the lifetime of the
//! session: SIGTTIN/SIGTTOU so a background job touching the terminal
//! stops itself rather than the shell (and so reclaiming the terminal
//! from a finished job does not stop us), and SIGINT/SIGQUIT/SIGTSTP so
//! keyboard signals only ever reach the foreground job. Children restore
//! the default dispositions before exec.

use std::io;
use std::os::fd::AsFd;

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{self, Pid};

const INTERACTIVE_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

/// Installs the shell's dispositions. Called once at session startup,
/// before the first pipeline is launched.
pub fn install_interactive_policy() {
    for sig in INTERACTIVE_SIGNALS {
        // SAFETY: SigIgn replaces no Rust handler and is inherited intact
        // across fork/exec.
        let _ = unsafe { signal(sig, SigHandler::SigIgn) };
    }
}

/// Restores default dispositions in a forked child so external programs
/// behave normally under Ctrl-C and friends. Runs between fork and exec.
pub fn restore_child_defaults() {
    for sig in INTERACTIVE_SIGNALS {
        // SAFETY: only resets to SIG_DFL.
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }
}

fn interactive() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

/// Hands the controlling terminal to `pgid`. Best-effort: skipped when
/// stdin is not a terminal, so the executor also works headless.
pub fn give_terminal_to(pgid: Pid) {
    if interactive() {
        let _ = unistd::tcsetpgrp(io::stdin().as_fd(), pgid);
    }
}

/// Reclaims the controlling terminal for the shell's own process group.
/// Called unconditionally after a foreground pipeline leaves the running
/// state, however it ended. Relies on SIGTTOU being ignored.
pub fn reclaim_terminal() {
    if interactive() {
        let _ = unistd::tcsetpgrp(io::stdin().as_fd(), unistd::getpgrp());
    }
}

/// Puts the shell into its own process group and makes that group the
/// terminal's foreground group. Called once at session startup.
pub fn claim_session() {
    if interactive() {
        let shell_pid = unistd::getpid();
        let _ = unistd::setpgid(shell_pid, shell_pid);
        let _ = unistd::tcsetpgrp(io::stdin().as_fd(), shell_pid);
    }
}
