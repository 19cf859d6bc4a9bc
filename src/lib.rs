//! rish — a small interactive shell.
//!
//! The crate is split along the seams of the problem: [`parser`] turns a
//! line of text into a [`types::Pipeline`] with no side effects,
//! [`exec`] runs a pipeline as OS processes wired together with pipes,
//! [`job`] tracks background and stopped pipelines, and [`signals`]
//! holds the process-wide signal and terminal-ownership policy. The
//! interactive read loop lives in the binary and is deliberately thin.

pub mod builtin;
pub mod error;
pub mod exec;
pub mod job;
pub mod parser;
pub mod session;
pub mod signals;
pub mod types;
