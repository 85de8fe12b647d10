use crate::classify::{CommandKind, classify};
use crate::command::{CommandFactory, ExitCode};
use crate::config::ShellConfig;
use crate::context::BreakSignals;
use crate::error::{SUCCESS, ShellError};
use crate::external::ImageRequest;
use crate::filesystem::ShellLocation;
use crate::io_adapters::Console;
use crate::redirect::{self, RedirectionSpec};
use crate::script::ScriptFile;
use crate::session::Session;
use crate::{expand, lexer, pipeline};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate, i.e. implementors of
/// `BuiltinCommand`.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Result of executing one command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOutcome {
    /// Status recorded in `lasterror`.
    pub status: ExitCode,
    /// Set once the session has been asked to terminate, with its exit code.
    pub exit: Option<ExitCode>,
}

/// A command line segment that passed every check and is ready to run.
pub(crate) struct Prepared {
    pub spec: RedirectionSpec,
    /// Tokens with quotes stripped; index 0 is the command name.
    pub tokens: Vec<String>,
    /// Tokens with quotes kept, used as script arguments.
    pub raw: Vec<String>,
    pub kind: CommandKind,
}

/// The shell interpreter: a [`Session`] plus the registered built-ins.
///
/// Example
/// ```
/// use efi_shell::{Console, Interpreter, ShellConfig};
/// let (console, out, _err) = Console::memory("");
/// let mut sh = Interpreter::with_console(ShellConfig::default(), console).unwrap();
/// sh.execute_line("set -v greeting hello");
/// let outcome = sh.execute_line("echo %greeting% world");
/// assert_eq!(outcome.status, 0);
/// assert_eq!(out.text(), "hello world\n");
/// ```
pub struct Interpreter {
    pub(crate) session: Session,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create an interpreter over `session` with a custom set of command factories.
    pub fn new(session: Session, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { session, commands }
    }

    /// Interpreter with the default built-ins and host services.
    pub fn from_config(config: ShellConfig) -> Result<Self, ShellError> {
        Ok(Self::with_session(Session::builder(config).build()?))
    }

    /// Interpreter with the default built-ins, writing to `console`.
    pub fn with_console(config: ShellConfig, console: Console) -> Result<Self, ShellError> {
        Ok(Self::with_session(
            Session::builder(config).console(console).build()?,
        ))
    }

    /// Interpreter with the default built-ins over a prepared session.
    pub fn with_session(session: Session) -> Self {
        Self::new(session, default_commands())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Handle the host keyboard thread uses to cancel or pause output.
    pub fn signals(&self) -> BreakSignals {
        self.session.context.signals.clone()
    }

    pub fn location(&self) -> &ShellLocation {
        &self.session.context.location
    }

    pub(crate) fn is_builtin(&self, name: &str) -> bool {
        self.commands.iter().any(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Execute one line of shell text.
    ///
    /// Errors never escape: they are reported on the bound stderr and
    /// recorded in `lasterror` like any other status.
    pub fn execute_line(&mut self, line: &str) -> LineOutcome {
        let status = match self.run_line(line) {
            Ok(Some(status)) => Some(status),
            Ok(None) => None,
            Err(e) => {
                self.report(&e);
                Some(e.status())
            }
        };
        let status = if self.session.context.signals.cancel_requested() {
            Some(ShellError::Aborted.status())
        } else {
            status
        };
        if let Some(status) = status {
            self.session.set_last_error(status);
        }
        LineOutcome {
            status: self.session.context.last_error,
            exit: self.exit_code(),
        }
    }

    /// Run a script file with trailing arguments, as if typed at the prompt.
    pub fn run_script(&mut self, path: &str, args: &[&str]) -> LineOutcome {
        let mut line = quote_arg(path);
        for arg in args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        self.execute_line(&line)
    }

    /// Read one line from the editor and execute it.
    ///
    /// Returns `Some(code)` once the session is over, either by `exit` or
    /// end of input.
    pub fn prompt_cycle(&mut self, editor: &mut DefaultEditor) -> rustyline::Result<Option<ExitCode>> {
        let prompt = format!("{}> ", self.session.context.location);
        match editor.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    editor.add_history_entry(line.as_str())?;
                }
                self.session.context.signals.clear_cancel();
                Ok(self.execute_line(&line).exit)
            }
            Err(ReadlineError::Interrupted) => Ok(None),
            Err(ReadlineError::Eof) => Ok(Some(self.session.context.last_error)),
            Err(err) => Err(err),
        }
    }

    /// Interactive read-execute loop; returns the session exit code.
    pub fn repl(&mut self) -> rustyline::Result<ExitCode> {
        let mut editor = DefaultEditor::new()?;
        loop {
            if let Some(code) = self.prompt_cycle(&mut editor)? {
                return Ok(code);
            }
        }
    }

    fn exit_code(&self) -> Option<ExitCode> {
        self.session
            .context
            .should_exit()
            .then(|| self.session.context.exit_request.map(|r| r.code))
            .flatten()
    }

    /// Write an error to the bound stderr.
    pub(crate) fn report(&mut self, err: &ShellError) {
        if writeln!(self.session.streams.stderr, "{err}").is_err() {
            tracing::warn!("could not report error: {err}");
        }
    }

    /// Report a command that classified as nothing runnable.
    pub(crate) fn not_recognized(&mut self, name: &str) -> ExitCode {
        if writeln!(
            self.session.streams.stderr,
            "'{name}' is not recognized as an internal or external command, operable program, or script file."
        )
        .is_err()
        {
            tracing::warn!("could not report unrecognized command '{name}'");
        }
        ShellError::NotFound(name.to_string()).status()
    }

    fn run_line(&mut self, line: &str) -> Result<Option<ExitCode>, ShellError> {
        let limit = self.session.config.shell.max_nesting_depth;
        if self.session.depth >= limit {
            return Err(ShellError::OutOfResources(format!(
                "nesting deeper than {limit} levels"
            )));
        }
        self.session.depth += 1;
        let result = self.run_line_at_depth(line);
        self.session.depth -= 1;
        result
    }

    fn run_line_at_depth(&mut self, line: &str) -> Result<Option<ExitCode>, ShellError> {
        let normalized = lexer::normalize(line);
        if normalized.is_empty() {
            return Ok(None);
        }
        let aliased = self.substitute_alias(&normalized);
        let expanded = expand::substitute_variables(&aliased, &self.session.env);
        debug!(target: "commands", line = %expanded, depth = self.session.depth, "executing");

        if lexer::find_unescaped(&expanded, '|').is_some() {
            return pipeline::run(self, &expanded).map(Some);
        }
        match self.prepare(&expanded)? {
            Some(prepared) => self.run_prepared(&prepared).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn substitute_alias(&self, line: &str) -> String {
        expand::substitute_alias(line, &self.session.aliases, |name| self.is_builtin(name))
    }

    /// Strip redirections, tokenize and classify one segment.
    pub(crate) fn prepare(&self, text: &str) -> Result<Option<Prepared>, ShellError> {
        let (rest, spec) = redirect::parse(text, &self.session.env)?;
        let tokens = lexer::tokenize(&rest, true)?;
        let Some(name) = tokens.first() else {
            return Ok(None);
        };
        let raw = lexer::tokenize(&rest, false)?;
        let kind = classify(name, &self.session, |n| self.is_builtin(n));
        debug!(target: "commands", name = %name, kind = ?kind, "classified");
        Ok(Some(Prepared {
            spec,
            tokens,
            raw,
            kind,
        }))
    }

    /// Bind the segment's redirections, dispatch it and restore the streams.
    pub(crate) fn run_prepared(&mut self, prepared: &Prepared) -> Result<ExitCode, ShellError> {
        let fs = self.session.fs.clone();
        let (bindings, captures) = redirect::bind(
            &prepared.spec,
            &self.session.streams,
            fs.as_ref(),
            &self.session.context.location,
            &mut self.session.env,
        )?;
        let previous = std::mem::replace(&mut self.session.streams, bindings);
        let result = self.dispatch(prepared);
        // The command's endpoints close here, before captured text is read.
        self.session.streams = previous;
        redirect::release(captures, &mut self.session.env)?;
        result
    }

    fn dispatch(&mut self, prepared: &Prepared) -> Result<ExitCode, ShellError> {
        match &prepared.kind {
            CommandKind::DriveChange(drive) => {
                let root = self
                    .session
                    .fs
                    .drive_root(drive)
                    .ok_or_else(|| ShellError::NotFound(format!("{drive}:")))?;
                self.session.context.location = ShellLocation::drive_root(drive, root);
                Ok(SUCCESS)
            }
            CommandKind::Builtin => self.run_builtin(&prepared.tokens),
            CommandKind::Script(path) => {
                let script = ScriptFile::load(self.session.fs.as_ref(), path, prepared.raw.clone())?;
                self.run_script_file(script)
            }
            CommandKind::External(path) => self.run_external(path, &prepared.tokens),
            CommandKind::Invalid => Ok(self.not_recognized(&prepared.tokens[0])),
        }
    }

    fn run_builtin(&mut self, tokens: &[String]) -> Result<ExitCode, ShellError> {
        let name = &tokens[0];
        let args: Vec<&str> = tokens[1..].iter().map(String::as_str).collect();
        let (control, cmd) = self
            .commands
            .iter()
            .find_map(|f| f.try_create(name, &args).map(|cmd| (f.is_control_flow(), cmd)))
            .ok_or_else(|| ShellError::NotFound(name.clone()))?;

        let streams = self.session.streams.clone();
        let result = streams.with_io(|io| cmd.execute(io, &mut self.session));
        let status = match result {
            Ok(status) => status,
            Err(e) => ShellError::status_of(&e),
        };
        if control && status != SUCCESS {
            if let Some(script) = self.session.current_script() {
                script.fault = Some(status);
            }
        }
        Ok(status)
    }

    fn run_external(&mut self, path: &Path, tokens: &[String]) -> Result<ExitCode, ShellError> {
        let request = ImageRequest {
            path,
            args: tokens,
            working_dir: &self.session.context.location.dir,
            env: self
                .session
                .env
                .iter()
                .map(|v| (v.name.clone(), v.value.clone()))
                .collect(),
        };
        debug!(target: "commands", path = %path.display(), "starting image");
        let loader = self.session.loader.clone();
        let streams = self.session.streams.clone();
        streams
            .with_io(|io| loader.execute(&request, io))
            .map_err(|e| match e.downcast_ref::<std::io::Error>() {
                Some(io) => ShellError::from_io(io),
                None => ShellError::DeviceError(format!("{e:#}")),
            })
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// The built-ins every interpreter starts with.
fn default_commands() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    use crate::control::*;
    vec![
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Set>::default()),
        Box::new(Factory::<Alias>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Type>::default()),
        Box::new(Factory::<Goto>::default()),
        Box::new(Factory::<If>::default()),
        Box::new(Factory::<Else>::default()),
        Box::new(Factory::<EndIf>::default()),
        Box::new(Factory::<For>::default()),
        Box::new(Factory::<EndFor>::default()),
        Box::new(Factory::<Shift>::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{Encoding, InputHandle, MemWriter, OutputHandle};
    use pretty_assertions::assert_eq;

    fn shell() -> (Interpreter, MemWriter, MemWriter) {
        let (console, out, err) = Console::memory("");
        let sh = Interpreter::with_console(ShellConfig::default(), console).unwrap();
        (sh, out, err)
    }

    #[test]
    fn test_set_then_echo_substitutes() {
        let (mut sh, out, _) = shell();
        sh.execute_line("set foo=bar");
        let outcome = sh.execute_line("echo %foo%");
        assert_eq!(outcome, LineOutcome { status: 0, exit: None });
        assert_eq!(out.text(), "bar\n");
    }

    #[test]
    fn test_unknown_command_sets_lasterror_and_continues() {
        let (mut sh, out, err) = shell();
        let outcome = sh.execute_line("badcommand");
        assert_eq!(outcome.status, 14);
        assert!(err.text().contains("'badcommand' is not recognized"));
        assert_eq!(sh.session().env.get("lasterror"), Some("0xe"));

        sh.execute_line("echo %lasterror%");
        assert_eq!(out.text(), "0xe\n");
        assert_eq!(sh.session().env.get("lasterror"), Some("0x0"));
    }

    #[test]
    fn test_blank_and_comment_lines_keep_lasterror() {
        let (mut sh, _, _) = shell();
        sh.execute_line("badcommand");
        assert_eq!(sh.execute_line("   # nothing").status, 14);
        assert_eq!(sh.execute_line("%undefined%").status, 14);
    }

    #[test]
    fn test_alias_expands_first_word() {
        let (mut sh, out, _) = shell();
        sh.execute_line("alias -v greet echo hello");
        sh.execute_line("greet world");
        assert_eq!(out.text(), "hello world\n");
    }

    #[test]
    fn test_builtin_names_are_case_insensitive() {
        let (mut sh, out, _) = shell();
        assert_eq!(sh.execute_line("ECHO loud").status, 0);
        assert_eq!(out.text(), "loud\n");
    }

    #[test]
    fn test_parse_errors_are_reported_inline() {
        let (mut sh, out, err) = shell();
        assert_eq!(sh.execute_line("echo \"open").status, 14);
        assert_eq!(sh.execute_line("echo hi > a >v b").status, 2);
        assert!(err.text().contains("stdout is redirected to both a file and a variable"));
        assert_eq!(out.text(), "");
    }

    #[test]
    fn test_exit_reports_session_code() {
        let (mut sh, _, _) = shell();
        let outcome = sh.execute_line("exit 3");
        assert_eq!(outcome, LineOutcome { status: 3, exit: Some(3) });
    }

    #[test]
    fn test_control_flow_outside_script_is_invalid() {
        let (mut sh, _, err) = shell();
        assert_eq!(sh.execute_line("goto somewhere").status, 2);
        assert!(err.text().starts_with("goto:"));
    }

    #[test]
    fn test_cancel_records_aborted() {
        let (mut sh, _, _) = shell();
        sh.signals().request_cancel();
        assert_eq!(sh.execute_line("set -v x 1").status, 21);
    }

    #[test]
    fn test_nesting_limit_is_out_of_resources() {
        let (mut sh, _, _) = shell();
        sh.session_mut().depth = sh.session().config.shell.max_nesting_depth;
        assert_eq!(sh.execute_line("echo deep").status, 9);
    }

    #[test]
    fn test_drive_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ShellConfig::default();
        config.mappings.insert("fs1".into(), dir.path().to_path_buf());
        let (console, _, _) = Console::memory("");
        let mut sh = Interpreter::with_console(config, console).unwrap();
        sh.session_mut().context.location = ShellLocation::host("/");

        assert_eq!(sh.execute_line("fs1:").status, 0);
        assert_eq!(sh.location().to_string(), "FS1:\\");
        assert_eq!(sh.execute_line("fs9:").status, 14);
    }

    struct Unwritable;

    impl Write for Unwritable {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_broken_stderr_keeps_statuses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.nsh"), "goto nowhere\necho unreachable\n").unwrap();
        let mut config = ShellConfig::default();
        config.shell.echo = false;
        config.mappings.insert("fs0".into(), dir.path().to_path_buf());
        let (output, out) = OutputHandle::memory(Encoding::Narrow);
        let console = Console {
            input: InputHandle::from_text(""),
            output,
            error: OutputHandle::new(Unwritable, Encoding::Narrow),
        };
        let mut sh = Interpreter::with_console(config, console).unwrap();

        assert_eq!(sh.execute_line("badcommand").status, 14);
        assert_eq!(sh.session().env.get("lasterror"), Some("0xe"));

        assert_eq!(sh.run_script("t.nsh", &[]).status, 14);
        assert_eq!(out.text(), "");
        assert!(sh.session().scripts.is_empty());
    }
}
