use crate::alias::AliasTable;
use crate::command::ExitCode;
use crate::config::ShellConfig;
use crate::context::ExecutionContext;
use crate::env::{EnvironmentStore, FileVariableStore, MemoryVariableStore, VariableAttributes, VariableStore};
use crate::error::{ShellError, format_status};
use crate::external::{ImageLoader, ProcessImageLoader};
use crate::filesystem::{FileSystem, HostFileSystem, ShellLocation};
use crate::io_adapters::{Console, StreamBindings};
use crate::pipeline::SplitStage;
use crate::script::ScriptFile;
use std::rc::Rc;

/// Name of the shell-owned status variable.
pub const LAST_ERROR: &str = "lasterror";

/// All state one interpreter instance works on.
///
/// Built-ins receive it by mutable reference; nothing in the crate keeps
/// global state, so independent sessions never observe each other.
pub struct Session {
    pub env: EnvironmentStore,
    pub aliases: AliasTable,
    pub context: ExecutionContext,
    pub config: ShellConfig,
    /// Fallback endpoints when nothing is redirected.
    pub console: Console,
    /// Endpoints the next command runs against.
    pub streams: StreamBindings,
    /// Running scripts, innermost last.
    pub scripts: Vec<ScriptFile>,
    /// Pipeline links not yet joined, innermost last.
    pub splits: Vec<SplitStage>,
    pub fs: Rc<dyn FileSystem>,
    pub loader: Rc<dyn ImageLoader>,
    pub(crate) depth: usize,
}

impl Session {
    pub fn builder(config: ShellConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            console: None,
            fs: None,
            loader: None,
            store: None,
            location: None,
        }
    }

    /// Record `status` as the most recent command status.
    pub fn set_last_error(&mut self, status: ExitCode) {
        self.context.last_error = status;
        self.env
            .set_shell(LAST_ERROR, &format_status(status), VariableAttributes::READ_ONLY);
    }

    /// The innermost running script, if any.
    pub fn current_script(&mut self) -> Option<&mut ScriptFile> {
        self.scripts.last_mut()
    }
}

/// Assembles a [`Session`], defaulting every host service.
pub struct SessionBuilder {
    config: ShellConfig,
    console: Option<Console>,
    fs: Option<Rc<dyn FileSystem>>,
    loader: Option<Rc<dyn ImageLoader>>,
    store: Option<Box<dyn VariableStore>>,
    location: Option<ShellLocation>,
}

impl SessionBuilder {
    pub fn console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    pub fn file_system(mut self, fs: Rc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn image_loader(mut self, loader: Rc<dyn ImageLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn variable_store(mut self, store: Box<dyn VariableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn location(mut self, location: ShellLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn build(self) -> Result<Session, ShellError> {
        let config = self.config;
        let store: Box<dyn VariableStore> = match (self.store, &config.variables_file) {
            (Some(store), _) => store,
            (None, Some(path)) => Box::new(FileVariableStore::open(path)?),
            (None, None) => Box::new(MemoryVariableStore::new()),
        };
        let mut env = EnvironmentStore::new(store)?;
        for (name, value) in &config.variables {
            if env.get(name).is_none() {
                env.set_volatile(name, value)?;
            }
        }

        let mut aliases = AliasTable::new();
        for (name, replacement) in &config.aliases {
            if let Err(e) = aliases.set(name, replacement, true) {
                tracing::warn!("ignoring configured alias: {e}");
            }
        }

        let fs = self
            .fs
            .unwrap_or_else(|| Rc::new(HostFileSystem::new(config.mappings.clone())));
        let location = self.location.unwrap_or_else(|| initial_location(&config));
        let context = ExecutionContext::new(location, config.shell.echo);

        let console = self.console.unwrap_or_else(Console::host);
        console.output.attach_signals(context.signals.clone());
        console.error.attach_signals(context.signals.clone());

        let mut session = Session {
            env,
            aliases,
            context,
            streams: console.bindings(),
            console,
            scripts: Vec::new(),
            splits: Vec::new(),
            fs,
            loader: self.loader.unwrap_or_else(|| Rc::new(ProcessImageLoader)),
            depth: 0,
            config,
        };
        session.set_last_error(0);
        Ok(session)
    }
}

/// Root of the first mapped drive, or the host working directory.
fn initial_location(config: &ShellConfig) -> ShellLocation {
    match config.mappings.iter().next() {
        Some((drive, root)) => ShellLocation::drive_root(drive, root.clone()),
        None => ShellLocation::host(std::env::current_dir().unwrap_or_else(|_| "/".into())),
    }
}
