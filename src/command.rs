use crate::session::Session;
use anyhow::Result;
use std::io::{Cursor, Read, Write};

/// Shell status code type used by this crate.
///
/// A value of 0 indicates success; non-zero values follow the shell status
/// table (see [`crate::ShellError::status`]) or come from external programs.
pub type ExitCode = u64;

/// Abstraction over a readable input stream bound to a command.
///
/// The only extra knowledge a command needs about its input is whether it is
/// attached to the interactive console, which the image loader uses to decide
/// between inheriting the host stdin and feeding buffered bytes.
pub trait Stdin: Read {
    /// True when this stream reads from the interactive console.
    fn is_console(&self) -> bool {
        false
    }
}

impl<T: AsRef<[u8]>> Stdin for Cursor<T> {}

/// The three streams a command runs against.
pub struct CommandIo<'a> {
    /// Bound standard input.
    pub stdin: &'a mut dyn Stdin,
    /// Bound standard output.
    pub stdout: &'a mut dyn Write,
    /// Bound standard error.
    pub stderr: &'a mut dyn Write,
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
pub trait ExecutableCommand {
    /// Executes the command.
    fn execute(self: Box<Self>, io: &mut CommandIo<'_>, session: &mut Session)
    -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Registered command name, matched case-insensitively.
    fn name(&self) -> &'static str;

    /// Control-flow commands are fatal to the running script when they fail.
    fn is_control_flow(&self) -> bool {
        false
    }

    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
