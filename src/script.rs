//! Script files: loading, per-script state and the line-by-line engine.

use crate::command::ExitCode;
use crate::context::ExitScope;
use crate::error::ShellError;
use crate::expand;
use crate::filesystem::FileSystem;
use crate::interpreter::Interpreter;
use crate::io_adapters::{Encoding, decode_text};
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One executable line of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    pub text: String,
    /// 1-based line number in the file, for error reports.
    pub number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Loading,
    Running,
    Done,
    Aborted,
}

/// Values a `for` loop has not produced yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopValues {
    Words(VecDeque<String>),
    Range { next: i64, end: i64, step: i64 },
}

impl Iterator for LoopValues {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self {
            LoopValues::Words(words) => words.pop_front(),
            LoopValues::Range { next, end, step } => {
                let done = if *step > 0 { *next > *end } else { *next < *end };
                if done {
                    return None;
                }
                let value = *next;
                match next.checked_add(*step) {
                    Some(n) => *next = n,
                    // Nothing representable follows: this was the last value.
                    None => *end = if *step > 0 { value - 1 } else { value + 1 },
                }
                Some(value.to_string())
            }
        }
    }
}

/// A `for` loop in progress, keyed by the index of its `for` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoopState {
    pub var: String,
    pub values: LoopValues,
}

/// A loaded script and everything scoped to one run of it.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub name: String,
    pub path: PathBuf,
    /// `%0`..: the script name as typed, then its arguments, quotes kept.
    pub args: Vec<String>,
    pub lines: Vec<ScriptLine>,
    /// Index into `lines` of the line being executed.
    pub cursor: usize,
    /// Set when the current line moved the cursor itself.
    pub(crate) jumped: bool,
    /// Script-scoped single-letter variables, e.g. a loop's `%a`.
    pub(crate) vars: Vec<(String, String)>,
    pub(crate) loops: BTreeMap<usize, LoopState>,
    /// `for` line an `endfor` just sent the cursor back to.
    pub(crate) pending_loop: Option<usize>,
    saved_echo: bool,
    pub state: ScriptState,
    /// Status of a failed control-flow command; ends the script.
    pub fault: Option<ExitCode>,
}

impl ScriptFile {
    /// Read and split a script. Blank lines and `#` comment lines are dropped.
    pub fn load(fs: &dyn FileSystem, path: &Path, args: Vec<String>) -> Result<Self, ShellError> {
        let bytes = fs.read(path)?;
        let text = decode_text(&bytes, Encoding::Narrow);
        let lines = text
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| {
                let trimmed = line.trim();
                (!trimmed.is_empty() && !trimmed.starts_with('#')).then(|| ScriptLine {
                    text: trimmed.to_string(),
                    number: idx + 1,
                })
            })
            .collect::<Vec<_>>();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!(target: "script", %name, lines = lines.len(), "loaded script");
        Ok(Self {
            name,
            path: path.to_path_buf(),
            args,
            lines,
            cursor: 0,
            jumped: false,
            vars: Vec::new(),
            loops: BTreeMap::new(),
            pending_loop: None,
            saved_echo: true,
            state: ScriptState::Loading,
            fault: None,
        })
    }

    /// Continue execution at line `idx` instead of the next one.
    pub fn jump_to(&mut self, idx: usize) {
        debug!(target: "script", from = self.cursor, to = idx, "jump");
        self.cursor = idx;
        self.jumped = true;
    }

    /// Index of the `:label` line, searching forward from the cursor and
    /// then from the top.
    pub fn find_label(&self, label: &str) -> Option<usize> {
        let is_label = |idx: &usize| {
            self.lines[*idx]
                .text
                .strip_prefix(':')
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|name| name.eq_ignore_ascii_case(label))
        };
        let len = self.lines.len();
        (1..=len).map(|step| (self.cursor + step) % len).find(is_label)
    }

    /// Lowercased first word of line `idx`, without a leading `@`.
    pub fn keyword(&self, idx: usize) -> String {
        self.lines
            .get(idx)
            .map(|line| line.text.trim_start_matches('@'))
            .and_then(|text| text.split_whitespace().next())
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    /// Index of the line closing the block opened at `open_idx`.
    ///
    /// Nested blocks with the same opener are skipped. With `middle`, the
    /// first such keyword at the outermost level is reported as well.
    pub(crate) fn find_block_end(
        &self,
        open_idx: usize,
        opener: &str,
        closer: &str,
        middle: Option<&str>,
    ) -> Option<(Option<usize>, usize)> {
        let mut depth = 0usize;
        let mut found_middle = None;
        for idx in open_idx + 1..self.lines.len() {
            let word = self.keyword(idx);
            if word == opener {
                depth += 1;
            } else if word == closer {
                if depth == 0 {
                    return Some((found_middle, idx));
                }
                depth -= 1;
            } else if depth == 0 && found_middle.is_none() && middle == Some(word.as_str()) {
                found_middle = Some(idx);
            }
        }
        None
    }

    /// Index of the opener matching the closer at `close_idx`.
    pub(crate) fn find_block_start(&self, close_idx: usize, opener: &str, closer: &str) -> Option<usize> {
        let mut depth = 0usize;
        for idx in (0..close_idx).rev() {
            let word = self.keyword(idx);
            if word == closer {
                depth += 1;
            } else if word == opener {
                if depth == 0 {
                    return Some(idx);
                }
                depth -= 1;
            }
        }
        None
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        match self.vars.iter_mut().find(|(var, _)| var == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.vars.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_var(&mut self, name: &str) {
        self.vars.retain(|(var, _)| var != name);
    }

    /// Line `idx` after positional and script-variable substitution.
    ///
    /// On a `for` line the loop's own variable is left in place.
    fn expand_line(&self, idx: usize) -> String {
        let text = &self.lines[idx].text;
        let positional = expand::substitute_positional(text, &self.args);
        let skip = (self.keyword(idx) == "for")
            .then(|| positional.trim_start_matches('@').split_whitespace().nth(1))
            .flatten()
            .and_then(|word| word.strip_prefix('%'));
        expand::substitute_script_vars(&positional, &self.vars, skip)
    }
}

impl Interpreter {
    /// Run a loaded script to completion and return its status.
    pub(crate) fn run_script_file(&mut self, mut script: ScriptFile) -> Result<ExitCode, ShellError> {
        script.state = ScriptState::Running;
        script.saved_echo = self.session.context.echo;
        debug!(target: "script", name = %script.name, "running script");
        self.session.scripts.push(script);

        let result = self.run_script_lines();

        if let Some(script) = self.session.scripts.pop() {
            self.session.context.echo = script.saved_echo;
            debug!(target: "script", name = %script.name, state = ?script.state, "script finished");
        }
        result
    }

    fn run_script_lines(&mut self) -> Result<ExitCode, ShellError> {
        loop {
            if self.session.context.signals.cancel_requested() {
                return Ok(self.finish_script(ScriptState::Aborted, ShellError::Aborted.status()));
            }
            let Some(script) = self.session.scripts.last_mut() else {
                return Ok(self.session.context.last_error);
            };
            let idx = script.cursor;
            let Some(line) = script.lines.get(idx) else {
                let status = self.session.context.last_error;
                return Ok(self.finish_script(ScriptState::Done, status));
            };
            let number = line.number;
            let expanded = script.expand_line(idx);
            script.jumped = false;

            if expanded.starts_with(':') {
                script.cursor += 1;
                continue;
            }
            let (text, quiet) = match expanded.strip_prefix('@') {
                Some(rest) => (rest.trim_start(), true),
                None => (expanded.as_str(), false),
            };
            if self.session.context.echo && !quiet {
                let location = self.session.context.location.to_string();
                writeln!(self.session.streams.stdout, "{location}> {text}")?;
            }

            let outcome = self.execute_line(text);

            if outcome.exit.is_some() {
                return Ok(self.finish_script(ScriptState::Done, outcome.status));
            }
            if let Some(request) = self.session.context.exit_request
                && request.scope == ExitScope::Script
            {
                self.session.context.exit_request = None;
                return Ok(self.finish_script(ScriptState::Done, request.code));
            }
            if self.session.context.signals.cancel_requested() {
                return Ok(self.finish_script(ScriptState::Aborted, ShellError::Aborted.status()));
            }
            let Some(script) = self.session.scripts.last_mut() else {
                return Ok(outcome.status);
            };
            if let Some(status) = script.fault.take() {
                let name = script.name.clone();
                if writeln!(
                    self.session.streams.stderr,
                    "{name}: script aborted at line {number}"
                )
                .is_err()
                {
                    warn!(target: "script", %name, line = number, "could not report script abort");
                }
                return Ok(self.finish_script(ScriptState::Aborted, status));
            }
            if !script.jumped {
                script.cursor += 1;
            }
        }
    }

    fn finish_script(&mut self, state: ScriptState, status: ExitCode) -> ExitCode {
        if let Some(script) = self.session.scripts.last_mut() {
            script.state = state;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::HostFileSystem;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn load(text: &str) -> ScriptFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.nsh");
        fs::write(&path, text).unwrap();
        let fs = HostFileSystem::default();
        ScriptFile::load(&fs, &path, vec!["test.nsh".into()]).unwrap()
    }

    #[test]
    fn test_load_skips_blank_and_comment_lines() {
        let script = load("# header\r\n\r\necho one\r\n  :top\r\n   # indented comment\r\necho two\r\n");
        let lines: Vec<_> = script.lines.iter().map(|l| (l.number, l.text.as_str())).collect();
        assert_eq!(lines, vec![(3, "echo one"), (4, ":top"), (6, "echo two")]);
        assert_eq!(script.name, "test.nsh");
        assert_eq!(script.state, ScriptState::Loading);
    }

    #[test]
    fn test_load_decodes_wide_text_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.nsh");
        let mut bytes = crate::io_adapters::WIDE_BOM.to_vec();
        bytes.extend(crate::io_adapters::encode_text("echo é\n", Encoding::Wide));
        fs::write(&path, bytes).unwrap();
        let script = ScriptFile::load(&HostFileSystem::default(), &path, Vec::new()).unwrap();
        assert_eq!(script.lines[0].text, "echo é");
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptFile::load(&HostFileSystem::default(), &dir.path().join("nope.nsh"), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ShellError::NotFound(_)));
    }

    #[test]
    fn test_find_label_searches_forward_then_wraps() {
        let mut script = load(":a\necho 1\n:b\necho 2\n:A2\n");
        script.cursor = 1;
        assert_eq!(script.find_label("b"), Some(2));
        assert_eq!(script.find_label("A"), Some(0));
        assert_eq!(script.find_label("a2"), Some(4));
        assert_eq!(script.find_label("missing"), None);
    }

    #[test]
    fn test_block_matching_is_nesting_aware() {
        let script = load("if a == a\n@if b == b\nelse\nendif\nelse\nendif\n");
        assert_eq!(script.keyword(1), "if");
        assert_eq!(script.find_block_end(0, "if", "endif", Some("else")), Some((Some(4), 5)));
        assert_eq!(script.find_block_end(1, "if", "endif", Some("else")), Some((Some(2), 3)));
        assert_eq!(script.find_block_start(5, "if", "endif"), Some(0));
        assert_eq!(script.find_block_start(3, "if", "endif"), Some(1));
    }

    #[test]
    fn test_range_values() {
        let up = LoopValues::Range { next: 1, end: 7, step: 3 };
        assert_eq!(up.collect::<Vec<_>>(), vec!["1", "4", "7"]);
        let down = LoopValues::Range { next: 3, end: 1, step: -1 };
        assert_eq!(down.collect::<Vec<_>>(), vec!["3", "2", "1"]);
        let edge = LoopValues::Range { next: i64::MAX - 1, end: i64::MAX, step: 5 };
        assert_eq!(edge.count(), 1);
    }

    #[test]
    fn test_for_line_keeps_its_own_variable() {
        let mut script = load("for %a in %1 b\necho %a %b\n");
        script.args.push("first".into());
        script.set_var("a", "x");
        script.set_var("b", "y");
        assert_eq!(script.expand_line(0), "for %a in first b");
        assert_eq!(script.expand_line(1), "echo x y");
        script.remove_var("a");
        assert_eq!(script.expand_line(1), "echo %a y");
    }
}
