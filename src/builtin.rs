use crate::command::{CommandFactory, CommandIo, ExecutableCommand, ExitCode};
use crate::context::{ExitRequest, ExitScope};
use crate::error::{SUCCESS, ShellError};
use crate::expand::is_well_formed_name;
use crate::interpreter::Factory;
use crate::io_adapters::{Encoding, decode_text};
use crate::session::Session;
use anyhow::Result;
use argh::{EarlyExit, FromArgs};


/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process against the session.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Failures of control-flow commands end the running script.
    const CONTROL_FLOW: bool = false;

    /// Executes the command using provided IO streams and session.
    ///
    /// Return value is a shell status: 0 for success, see [`ShellError::status`]
    /// for the rest.
    fn execute(self, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        match BuiltinCommand::execute(*self, io, session) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(io.stderr, "{}: {}", T::name(), e)?;
                Ok(ShellError::status_of(&e))
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, io: &mut CommandIo<'_>, _session: &mut Session) -> Result<ExitCode> {
        if self.is_error {
            io.stderr.write_all(self.output.as_bytes())?;
            Ok(ShellError::InvalidParameter(String::new()).status())
        } else {
            io.stdout.write_all(self.output.as_bytes())?;
            Ok(SUCCESS)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn is_control_flow(&self) -> bool {
        T::CONTROL_FLOW
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name.eq_ignore_ascii_case(T::name()) {
            Some(match T::from_args(&[T::name()], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// Usage text for commands whose arguments are parsed by hand.
pub(crate) fn usage_exit(usage: &str) -> EarlyExit {
    EarlyExit {
        output: format!("{usage}\n"),
        status: Ok(()),
    }
}

/// Collect arguments verbatim, answering `--help` with `usage`.
pub(crate) fn raw_args(args: &[&str], usage: &str) -> Result<Vec<String>, EarlyExit> {
    if args.first().is_some_and(|a| *a == "--help" || *a == "-?") {
        return Err(usage_exit(usage));
    }
    Ok(args.iter().map(|a| a.to_string()).collect())
}

/// Parse a decimal or `0x` hexadecimal number.
pub(crate) fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse().ok()?
        }
        None => return None,
    };
    Some(if negative { -value } else { value })
}

/// Write the arguments to standard output, or switch script echo.
pub struct Echo {
    /// `-on` / `-off`.
    pub toggle: Option<bool>,
    pub args: Vec<String>,
}

const ECHO_USAGE: &str = "Usage: echo [-on|-off] [message...]\n\n\
Display a message, or turn script command echoing on or off.";

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let args = raw_args(args, ECHO_USAGE)?;
        let toggle = match args.as_slice() {
            [flag] if flag.eq_ignore_ascii_case("-on") => Some(true),
            [flag] if flag.eq_ignore_ascii_case("-off") => Some(false),
            _ => None,
        };
        Ok(Echo { toggle, args })
    }
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        if let Some(on) = self.toggle {
            session.context.echo = on;
        } else if self.args.is_empty() {
            let state = if session.context.echo { "on" } else { "off" };
            writeln!(io.stdout, "Echo is {state}")?;
        } else {
            writeln!(io.stdout, "{}", self.args.join(" "))?;
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Display, create, change or delete environment variables.
pub struct Set {
    #[argh(switch, short = 'v')]
    /// create the variable volatile (lost when the shell exits).
    pub volatile: bool,

    #[argh(option, short = 'd')]
    /// delete the named variable.
    pub delete: Option<String>,

    #[argh(positional, greedy)]
    /// variable name (or `name=value`) followed by the new value; value words
    /// are joined by single spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Set {
    fn name() -> &'static str {
        "set"
    }

    fn execute(self, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        if let Some(name) = &self.delete {
            session.env.remove(name)?;
            return Ok(SUCCESS);
        }
        let mut args = self.args.into_iter();
        let Some(name) = args.next() else {
            for var in session.env.iter() {
                let marker = if var.persistent { ' ' } else { 'V' };
                writeln!(io.stdout, "{marker} {} = {}", var.name, var.value)?;
            }
            return Ok(SUCCESS);
        };
        let rest: Vec<String> = args.collect();
        let (name, value) = match name.split_once('=') {
            Some((name, first)) => {
                let mut words = vec![first.to_string()];
                words.extend(rest);
                (name.to_string(), words.join(" "))
            }
            None if rest.is_empty() => {
                let value = session
                    .env
                    .get(&name)
                    .ok_or_else(|| ShellError::NotFound(format!("variable '{name}'")))?;
                writeln!(io.stdout, "{name} = {value}")?;
                return Ok(SUCCESS);
            }
            None => (name, rest.join(" ")),
        };
        if !is_well_formed_name(&name) {
            return Err(ShellError::InvalidParameter(format!("'{name}' is not a variable name")).into());
        }
        session.env.set(&name, &value, !self.volatile)?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Display, create or delete command aliases.
pub struct Alias {
    #[argh(switch, short = 'v')]
    /// create the alias volatile. Aliases defined here always are; only
    /// configured aliases come back next session.
    pub volatile: bool,

    #[argh(option, short = 'd')]
    /// delete the named alias.
    pub delete: Option<String>,

    #[argh(positional, greedy)]
    /// alias name followed by the replacement command text.
    pub args: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(self, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        if let Some(name) = &self.delete {
            session.aliases.remove(name)?;
            return Ok(SUCCESS);
        }
        match self.args.split_first() {
            None => {
                for alias in session.aliases.iter() {
                    let marker = if alias.persistent || alias.builtin { ' ' } else { 'V' };
                    writeln!(io.stdout, "{marker} {} : {}", alias.name, alias.replacement)?;
                }
            }
            Some((name, [])) => {
                let alias = session
                    .aliases
                    .get(name)
                    .ok_or_else(|| ShellError::NotFound(format!("alias '{name}'")))?;
                writeln!(io.stdout, "{} : {}", alias.name, alias.replacement)?;
            }
            Some((name, replacement)) => {
                session.aliases.set(name, &replacement.join(" "), false)?;
            }
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Display or change the current directory.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to: `..`, `\`, `fs0:\dir` or a relative path.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let Some(target) = self.target.filter(|t| !t.is_empty()) else {
            writeln!(io.stdout, "{}", session.context.location)?;
            return Ok(SUCCESS);
        };
        let location = session
            .fs
            .locate(&session.context.location, &target)
            .ok_or_else(|| ShellError::NotFound(target.clone()))?;
        match session.fs.metadata(&location.dir) {
            Some(info) if info.is_dir => {
                tracing::debug!(target: "commands", %location, "changing directory");
                session.context.location = location;
                Ok(SUCCESS)
            }
            Some(_) => Err(ShellError::InvalidParameter(format!("'{target}' is not a directory")).into()),
            None => Err(ShellError::NotFound(target).into()),
        }
    }
}

/// Exit the running script (`/b`) or the shell.
pub struct Exit {
    pub script_only: bool,
    pub code: Option<String>,
}

const EXIT_USAGE: &str = "Usage: exit [/b] [code]\n\n\
Exit the shell, or with /b only the running script, returning code.";

impl FromArgs for Exit {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let mut script_only = false;
        let mut code = None;
        for arg in raw_args(args, EXIT_USAGE)? {
            if arg.eq_ignore_ascii_case("/b") {
                script_only = true;
            } else if code.is_none() {
                code = Some(arg);
            } else {
                return Err(EarlyExit {
                    output: format!("unexpected argument '{arg}'\n"),
                    status: Err(()),
                });
            }
        }
        Ok(Exit { script_only, code })
    }
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        let code = match &self.code {
            Some(text) => parse_number(text)
                .and_then(|n| ExitCode::try_from(n).ok())
                .ok_or_else(|| ShellError::InvalidParameter(format!("exit code '{text}'")))?,
            None => SUCCESS,
        };
        // `/b` outside a script ends the shell.
        let scope = if self.script_only && !session.scripts.is_empty() {
            ExitScope::Script
        } else {
            ExitScope::Shell
        };
        session.context.exit_request = Some(ExitRequest { scope, code });
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Write the contents of files, or of standard input, to standard output.
pub struct Type {
    #[argh(positional, greedy)]
    /// files to print.
    pub files: Vec<String>,
}

impl BuiltinCommand for Type {
    fn name() -> &'static str {
        "type"
    }

    fn execute(self, io: &mut CommandIo<'_>, session: &mut Session) -> Result<ExitCode> {
        if self.files.is_empty() {
            let mut buf = String::new();
            io.stdin.read_to_string(&mut buf)?;
            write!(io.stdout, "{buf}")?;
            return Ok(SUCCESS);
        }
        for name in &self.files {
            let path = session
                .fs
                .resolve(&session.context.location, name)
                .filter(|p| session.fs.metadata(p).is_some_and(|info| !info.is_dir))
                .ok_or_else(|| ShellError::NotFound(name.clone()))?;
            let bytes = session.fs.read(&path)?;
            write!(io.stdout, "{}", decode_text(&bytes, Encoding::Narrow))?;
        }
        Ok(SUCCESS)
    }
}
