//! Script control-flow built-ins: `goto`, `if`/`else`/`endif`,
//! `for`/`endfor` and `shift`.

use crate::builtin::{BuiltinCommand, parse_number, raw_args};
use crate::command::{CommandIo, ExitCode};
use crate::error::{SUCCESS, ShellError};
use crate::script::{LoopState, LoopValues, ScriptFile};
use crate::session::Session;
use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// The innermost running script, or `InvalidParameter` at the prompt.
fn in_script(session: &mut Session) -> Result<&mut ScriptFile, ShellError> {
    session
        .current_script()
        .ok_or_else(|| ShellError::InvalidParameter("only valid in a script".into()))
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    ShellError::InvalidParameter(message.into()).into()
}

#[derive(FromArgs)]
/// Continue the script at a label.
pub struct Goto {
    #[argh(positional)]
    /// label to jump to, without the colon.
    pub label: String,
}

impl BuiltinCommand for Goto {
    fn name() -> &'static str {
        "goto"
    }

    const CONTROL_FLOW: bool = true;

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let script = in_script(session)?;
        let label = self.label.trim_start_matches(':');
        let idx = script
            .find_label(label)
            .ok_or_else(|| ShellError::NotFound(format!("label '{label}'")))?;
        script.jump_to(idx);
        Ok(SUCCESS)
    }
}

/// Comparison operators accepted between two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Same,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparison {
    fn parse(word: &str) -> Option<Self> {
        Some(match word.to_ascii_lowercase().as_str() {
            "==" => Comparison::Same,
            "eq" => Comparison::Eq,
            "ne" => Comparison::Ne,
            "gt" => Comparison::Gt,
            "lt" => Comparison::Lt,
            "ge" => Comparison::Ge,
            "le" => Comparison::Le,
            _ => return None,
        })
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Same | Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Ge => ordering != Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Exist(String),
    Compare(String, Comparison, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    And,
    Or,
}

/// Conditionally run the following block.
#[derive(Debug, PartialEq, Eq)]
pub struct If {
    /// `/i`: compare strings ignoring case.
    pub ignore_case: bool,
    /// `/s`: never compare numerically.
    pub strings_only: bool,
    /// First term, then `(joiner, term)` pairs; each term may be negated.
    terms: Vec<(Option<Joiner>, bool, Condition)>,
}

const IF_USAGE: &str = "Usage: if [/i] [/s] [not] <condition> [and|or [not] <condition>]... [then]\n\n\
Conditions: exist <path>, <a> == <b>, <a> eq|ne|gt|lt|ge|le <b>.\n\
Runs the lines up to the matching else or endif when the condition holds.";

impl FromArgs for If {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let args = raw_args(args, IF_USAGE)?;
        parse_if(&args).map_err(|message| EarlyExit {
            output: format!("{message}\n"),
            status: Err(()),
        })
    }
}

fn parse_if(args: &[String]) -> Result<If, String> {
    let mut words = args.iter().map(String::as_str).peekable();
    let mut cmd = If {
        ignore_case: false,
        strings_only: false,
        terms: Vec::new(),
    };
    while let Some(flag) = words.next_if(|w| w.starts_with('/')) {
        match flag.to_ascii_lowercase().as_str() {
            "/i" => cmd.ignore_case = true,
            "/s" => cmd.strings_only = true,
            _ => return Err(format!("unknown flag '{flag}'")),
        }
    }

    let mut joiner = None;
    loop {
        let negated = words.next_if(|w| w.eq_ignore_ascii_case("not")).is_some();
        let condition = match words.next() {
            None => return Err("missing condition".into()),
            Some(w) if w.eq_ignore_ascii_case("exist") => {
                let path = words.next().ok_or("'exist' needs a path")?;
                Condition::Exist(path.to_string())
            }
            Some(left) => {
                let op = words.next().ok_or_else(|| format!("missing operator after '{left}'"))?;
                let comparison =
                    Comparison::parse(op).ok_or_else(|| format!("unknown operator '{op}'"))?;
                let right = words.next().ok_or_else(|| format!("missing operand after '{op}'"))?;
                Condition::Compare(left.to_string(), comparison, right.to_string())
            }
        };
        cmd.terms.push((joiner, negated, condition));

        match words.next() {
            None => break,
            Some(w) if w.eq_ignore_ascii_case("then") => {
                if let Some(extra) = words.next() {
                    return Err(format!("unexpected '{extra}' after 'then'"));
                }
                break;
            }
            Some(w) if w.eq_ignore_ascii_case("and") => joiner = Some(Joiner::And),
            Some(w) if w.eq_ignore_ascii_case("or") => joiner = Some(Joiner::Or),
            Some(w) => return Err(format!("unexpected '{w}'")),
        }
    }
    Ok(cmd)
}

impl If {
    fn compare(&self, left: &str, op: Comparison, right: &str) -> bool {
        let numbers = (op != Comparison::Same && !self.strings_only)
            .then(|| parse_number(left).zip(parse_number(right)))
            .flatten();
        let ordering = match numbers {
            Some((l, r)) => l.cmp(&r),
            None if self.ignore_case => left.to_lowercase().cmp(&right.to_lowercase()),
            None => left.cmp(right),
        };
        op.holds(ordering)
    }

    /// Terms are combined left to right.
    fn evaluate(&self, session: &Session) -> bool {
        let mut result = false;
        for (joiner, negated, condition) in &self.terms {
            let value = match condition {
                Condition::Exist(path) => session
                    .fs
                    .resolve(&session.context.location, path)
                    .is_some_and(|p| session.fs.metadata(&p).is_some()),
                Condition::Compare(left, op, right) => self.compare(left, *op, right),
            } != *negated;
            result = match joiner {
                None => value,
                Some(Joiner::And) => result && value,
                Some(Joiner::Or) => result || value,
            };
        }
        result
    }
}

impl BuiltinCommand for If {
    fn name() -> &'static str {
        "if"
    }

    const CONTROL_FLOW: bool = true;

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        in_script(session)?;
        let holds = self.evaluate(session);
        let script = in_script(session)?;
        let (else_idx, endif_idx) = script
            .find_block_end(script.cursor, "if", "endif", Some("else"))
            .ok_or_else(|| invalid("missing endif"))?;
        if !holds {
            script.jump_to(else_idx.unwrap_or(endif_idx) + 1);
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Start the alternative block of an if.
pub struct Else {}

impl BuiltinCommand for Else {
    fn name() -> &'static str {
        "else"
    }

    const CONTROL_FLOW: bool = true;

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let script = in_script(session)?;
        let cursor = script.cursor;
        script
            .find_block_start(cursor, "if", "endif")
            .ok_or_else(|| invalid("else without if"))?;
        // Reached only after the if-block ran: skip the alternative.
        let (_, endif_idx) = script
            .find_block_end(cursor, "if", "endif", None)
            .ok_or_else(|| invalid("missing endif"))?;
        script.jump_to(endif_idx + 1);
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// End an if block.
pub struct EndIf {}

impl BuiltinCommand for EndIf {
    fn name() -> &'static str {
        "endif"
    }

    const CONTROL_FLOW: bool = true;

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let script = in_script(session)?;
        script
            .find_block_start(script.cursor, "if", "endif")
            .ok_or_else(|| invalid("endif without if"))?;
        Ok(SUCCESS)
    }
}

/// Repeat the following block for each value.
#[derive(Debug, PartialEq, Eq)]
pub struct For {
    /// Loop variable without the `%`.
    pub var: String,
    values: LoopValues,
}

const FOR_USAGE: &str = "Usage: for %<x> in <word>...\n       for %<x> run (<start> <end> [<step>])\n\n\
Run the lines up to the matching endfor once per value, with %<x> bound to it.";

impl FromArgs for For {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let args = raw_args(args, FOR_USAGE)?;
        parse_for(&args).map_err(|message| EarlyExit {
            output: format!("{message}\n"),
            status: Err(()),
        })
    }
}

fn parse_for(args: &[String]) -> Result<For, String> {
    let [var, mode, rest @ ..] = args else {
        return Err("expected '%<x> in ...' or '%<x> run (...)'".into());
    };
    let var = var
        .strip_prefix('%')
        .filter(|v| v.len() == 1 && v.chars().all(|c| c.is_ascii_alphabetic()))
        .ok_or_else(|| format!("'{var}' is not a loop variable"))?
        .to_string();

    let values = if mode.eq_ignore_ascii_case("in") {
        LoopValues::Words(rest.iter().cloned().collect::<VecDeque<_>>())
    } else if mode.eq_ignore_ascii_case("run") {
        let joined = rest.join(" ");
        let inner = joined
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or("range must be written as (start end [step])")?;
        let numbers = inner
            .split_whitespace()
            .map(|w| parse_number(w).ok_or_else(|| format!("'{w}' is not a number")))
            .collect::<Result<Vec<_>, _>>()?;
        let (start, end, step) = match numbers[..] {
            [start, end] => (start, end, if start <= end { 1 } else { -1 }),
            [start, end, step] => (start, end, step),
            _ => return Err("range must be written as (start end [step])".into()),
        };
        if step == 0 {
            return Err("step must not be zero".into());
        }
        LoopValues::Range {
            next: start,
            end,
            step,
        }
    } else {
        return Err(format!("expected 'in' or 'run', found '{mode}'"));
    };
    Ok(For { var, values })
}

impl BuiltinCommand for For {
    fn name() -> &'static str {
        "for"
    }

    const CONTROL_FLOW: bool = true;

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let script = in_script(session)?;
        let idx = script.cursor;
        let (_, endfor_idx) = script
            .find_block_end(idx, "for", "endfor", None)
            .ok_or_else(|| invalid("missing endfor"))?;

        // Entering from above starts over; coming back from endfor resumes.
        let resumed = script.pending_loop.take() == Some(idx);
        if !resumed || !script.loops.contains_key(&idx) {
            script.loops.insert(
                idx,
                LoopState {
                    var: self.var,
                    values: self.values,
                },
            );
        }
        let next = script.loops.get_mut(&idx).and_then(|state| {
            let value = state.values.next()?;
            Some((state.var.clone(), value))
        });
        match next {
            Some((var, value)) => script.set_var(&var, &value),
            None => {
                if let Some(state) = script.loops.remove(&idx) {
                    script.remove_var(&state.var);
                }
                script.jump_to(endfor_idx + 1);
            }
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// End a for block.
pub struct EndFor {}

impl BuiltinCommand for EndFor {
    fn name() -> &'static str {
        "endfor"
    }

    const CONTROL_FLOW: bool = true;

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let script = in_script(session)?;
        let for_idx = script
            .find_block_start(script.cursor, "for", "endfor")
            .ok_or_else(|| invalid("endfor without for"))?;
        script.pending_loop = Some(for_idx);
        script.jump_to(for_idx);
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Move script arguments down by one; %0 is kept.
pub struct Shift {}

impl BuiltinCommand for Shift {
    fn name() -> &'static str {
        "shift"
    }

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let script = in_script(session)?;
        if script.args.len() > 1 {
            script.args.remove(1);
        }
        Ok(SUCCESS)
    }
}
