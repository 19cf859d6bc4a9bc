use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rish::exec::{self, ExecOutcome};
use rish::session::Session;
use rish::{parser, signals};

const PROMPT: &str = "rish> ";

fn main() -> Result<()> {
    signals::install_interactive_policy();
    signals::claim_session();

    let mut rl = DefaultEditor::new()?;
    let mut session = Session::new();
    loop {
        for notice in session.jobs.poll() {
            println!("{notice}");
        }
        let line = match rl.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if !line.trim().is_empty() {
            let _ = rl.add_history_entry(line.as_str());
            session.remember(&line);
        }
        let Some(pipeline) = parser::parse(&line) else {
            continue;
        };
        match exec::execute(&mut session, &pipeline) {
            Ok(ExecOutcome::Done(_)) => {}
            Ok(ExecOutcome::Background { id, pgid }) => println!("[{id}] {pgid}"),
            Ok(ExecOutcome::Stopped { id }) => println!("[{id}]  Stopped\t{pipeline}"),
            Err(e) => eprintln!("rish: {e}"),
        }
        if let Some(code) = session.exit {
            std::process::exit(code);
        }
    }
    Ok(())
}
