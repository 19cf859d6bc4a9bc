use std::fmt;

/// One command within a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    /// argv; `args[0]` is the program or builtin name.
    pub args: Vec<String>,
    /// `< file`; honored by the executor only on the first stage.
    pub input: Option<String>,
    /// `> file` / `>> file`; honored only on the last stage.
    pub output: Option<OutputRedirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: String,
    pub append: bool,
}

/// An ordered chain of stages connected by pipes. Stage order is execution
/// order: stdout of stage `i` feeds stdin of stage `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// Set by an unquoted `&` anywhere on the line; applies to the whole
    /// pipeline.
    pub background: bool,
}

fn needs_quoting(arg: &str) -> bool {
    arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '|' | '<' | '>' | '&' | '\'' | '"' | '\\'))
}

fn write_arg(f: &mut fmt::Formatter, arg: &str) -> fmt::Result {
    if needs_quoting(arg) {
        write!(f, "'{}'", arg)
    } else {
        f.write_str(arg)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write_arg(f, arg)?;
        }
        if let Some(path) = &self.input {
            f.write_str(" < ")?;
            write_arg(f, path)?;
        }
        if let Some(redir) = &self.output {
            f.write_str(if redir.append { " >> " } else { " > " })?;
            write_arg(f, &redir.path)?;
        }
        Ok(())
    }
}

/// Canonical reconstruction of the command line, used for job listings.
/// Reparsing the result of `to_string()` yields an equivalent pipeline for
/// inputs without quoting edge cases.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            stage.fmt(f)?;
        }
        if self.background {
            f.write_str(" &")?;
        }
        Ok(())
    }
}
