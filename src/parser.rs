//! Turns one line of input into a [`Pipeline`].
//!
//! A single left-to-right scan with an explicit quote state. Quote
//! characters open and close a literal region and are never part of the
//! token; a backslash outside quotes takes the next character literally.
//! Unterminated quotes are tolerated: the rest of the line is taken
//! literally and flushed at end of input.

use crate::types::{OutputRedirect, Pipeline, Stage};

struct Parser {
    chars: Vec<char>,
    i: usize,
}

fn flush_token(stage: &mut Stage, token: &mut String) {
    if !token.is_empty() {
        stage.args.push(std::mem::take(token));
    }
}

impl Parser {
    fn skip_whitespace(&mut self) {
        while matches!(self.chars.get(self.i), Some(&(' ' | '\t'))) {
            self.i += 1;
        }
    }

    /// Reads a redirect target: optional leading whitespace, then a word
    /// under the same quote/escape rules as ordinary tokens, terminated by
    /// the matching quote or by unquoted whitespace/operator. An empty
    /// target invalidates the parse.
    fn read_redirect_target(&mut self) -> Option<String> {
        self.skip_whitespace();
        let mut out = String::new();
        let mut quote: Option<char> = None;
        while let Some(&c) = self.chars.get(self.i) {
            if let Some(q) = quote {
                self.i += 1;
                if c == q {
                    return if out.is_empty() { None } else { Some(out) };
                }
                out.push(c);
                continue;
            }
            match c {
                ' ' | '\t' | '|' | '<' | '>' | '&' => break,
                '\'' | '"' => {
                    quote = Some(c);
                    self.i += 1;
                }
                '\\' => {
                    self.i += 1;
                    if let Some(&next) = self.chars.get(self.i) {
                        out.push(next);
                        self.i += 1;
                    }
                }
                _ => {
                    out.push(c);
                    self.i += 1;
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    fn parse_pipeline(&mut self) -> Option<Pipeline> {
        let mut stages = vec![Stage::default()];
        let mut background = false;
        let mut token = String::new();
        let mut quote: Option<char> = None;

        while let Some(&c) = self.chars.get(self.i) {
            if let Some(q) = quote {
                self.i += 1;
                if c == q {
                    quote = None;
                } else {
                    token.push(c);
                }
                continue;
            }
            match c {
                ' ' | '\t' => {
                    self.i += 1;
                    flush_token(stages.last_mut().unwrap(), &mut token);
                }
                '\'' | '"' => {
                    self.i += 1;
                    quote = Some(c);
                }
                '\\' => {
                    // Escapes whitespace, quotes and operators; a trailing
                    // backslash is a no-op.
                    self.i += 1;
                    if let Some(&next) = self.chars.get(self.i) {
                        token.push(next);
                        self.i += 1;
                    }
                }
                '|' => {
                    self.i += 1;
                    flush_token(stages.last_mut().unwrap(), &mut token);
                    stages.push(Stage::default());
                }
                '<' => {
                    self.i += 1;
                    flush_token(stages.last_mut().unwrap(), &mut token);
                    let path = self.read_redirect_target()?;
                    stages.last_mut().unwrap().input = Some(path);
                }
                '>' => {
                    let append = self.chars.get(self.i + 1) == Some(&'>');
                    self.i += if append { 2 } else { 1 };
                    flush_token(stages.last_mut().unwrap(), &mut token);
                    let path = self.read_redirect_target()?;
                    stages.last_mut().unwrap().output = Some(OutputRedirect { path, append });
                }
                '&' => {
                    // Applies to the whole pipeline and is not a token
                    // boundary.
                    self.i += 1;
                    background = true;
                }
                _ => {
                    self.i += 1;
                    token.push(c);
                }
            }
        }
        flush_token(stages.last_mut().unwrap(), &mut token);

        if stages.iter().any(|s| s.args.is_empty()) {
            return None;
        }
        Some(Pipeline { stages, background })
    }
}

/// Parses one line. `None` means no pipeline: a blank line, a stage with
/// no arguments (e.g. a trailing `|`), or a redirect without a target.
pub fn parse(line: &str) -> Option<Pipeline> {
    let mut parser = Parser {
        chars: line.chars().collect(),
        i: 0,
    };
    parser.parse_pipeline()
}
