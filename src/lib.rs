//! An embeddable command interpreter for a UEFI-style shell language.
//!
//! Command lines go through alias and `%variable%` substitution, redirection
//! parsing, tokenization and classification before they are dispatched to a
//! built-in, a script file or an external program. Lines containing `|` run
//! as pipelines whose stages are connected by in-memory buffers.
//!
//! The main entry point is [`Interpreter`], which owns a [`Session`]: the
//! environment, aliases, execution context, script stack and the host
//! services ([`FileSystem`], [`ImageLoader`], [`VariableStore`]) the shell
//! runs on. The public modules [`command`] and [`env`] expose the traits
//! needed to plug in your own commands and variable storage.

pub mod alias;
mod builtin;
mod classify;
pub mod command;
pub mod config;
pub mod context;
mod control;
pub mod env;
pub mod error;
pub mod expand;
pub mod external;
pub mod filesystem;
mod interpreter;
pub mod io_adapters;
pub mod lexer;
mod pipeline;
pub mod redirect;
mod script;
pub mod session;

pub use classify::CommandKind;
pub use command::ExitCode;
pub use config::{ShellConfig, ShellSettings};
pub use context::{BreakSignals, ExecutionContext, ExitScope};
pub use env::{EnvironmentStore, FileVariableStore, MemoryVariableStore, VariableStore};
pub use error::ShellError;
pub use external::{ImageLoader, ImageRequest, ProcessImageLoader};
pub use filesystem::{FileSystem, HostFileSystem, ShellLocation};
pub use io_adapters::{Console, Encoding, InputHandle, MemWriter, OutputHandle};
pub use pipeline::SplitStage;
pub use script::{ScriptFile, ScriptState};
pub use session::{Session, SessionBuilder};

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Interpreter, LineOutcome};
