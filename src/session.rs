use crate::job::JobTable;

/// Per-session state: an owned job table plus the in-memory history.
/// Nothing here is global, so independent sessions can coexist in one
/// process (and in one test binary).
#[derive(Debug, Default)]
pub struct Session {
    pub jobs: JobTable,
    pub history: Vec<String>,
    /// Set by the `exit` builtin; the read loop honors it after the
    /// current dispatch.
    pub exit: Option<i32>,
    /// True in a forked child's copy of the session. The child's job
    /// table is a snapshot of processes owned by the shell, so builtins
    /// running there must not try to reap them.
    pub in_child: bool,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn remember(&mut self, line: &str) {
        self.history.push(line.to_string());
    }
}
