use thiserror::Error;

/// Failures reported to the user. None of these take the shell down; a
/// malformed line is not an error at all (the parser returns no pipeline
/// and the caller re-prompts).
#[derive(Debug, Error)]
pub enum ShellError {
    /// Pipe or process creation failed; the pipeline launch was aborted.
    #[error("{0}")]
    Sys(#[from] nix::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// `fg`/`bg` named a job that is not in the table.
    #[error("no such job: {0}")]
    UnknownJob(u32),
}
