use anyhow::{Context, Result};
use argh::FromArgs;
use efi_shell::{ExitCode, Interpreter, LineOutcome, ShellConfig};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(FromArgs)]
/// Run shell scripts and commands, or an interactive prompt.
struct ShellArgs {
    #[argh(option)]
    /// TOML configuration file.
    config: Option<PathBuf>,

    #[argh(option)]
    /// log level for diagnostics on stderr (error, warn, info, debug, trace).
    log_level: Option<String>,

    #[argh(switch)]
    /// do not run the startup script.
    nostartup: bool,

    #[argh(option, short = 'c')]
    /// execute one command line and exit.
    command: Option<String>,

    #[argh(positional, greedy)]
    /// script to run, followed by its arguments.
    script: Vec<String>,
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let level = match level {
        Some(text) => LevelFilter::from_str(text).with_context(|| format!("log level '{text}'"))?,
        None => LevelFilter::WARN,
    };
    let filter = Targets::new().with_default(level);
    let stderr_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_filter(filter);
    tracing_subscriber::registry()
        .with(stderr_log_layer)
        .try_init()
        .context("failed to initialize tracing")
}

fn finished(outcome: LineOutcome) -> ExitCode {
    outcome.exit.unwrap_or(outcome.status)
}

fn run(interpreter: &mut Interpreter, args: &ShellArgs) -> Result<ExitCode> {
    if let Some(line) = &args.command {
        return Ok(finished(interpreter.execute_line(line)));
    }
    if let Some((script, rest)) = args.script.split_first() {
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        return Ok(finished(interpreter.run_script(script, &rest)));
    }

    let startup = interpreter.session().config.shell.startup_script.clone();
    if let Some(name) = startup.filter(|_| !args.nostartup) {
        let session = interpreter.session();
        let present = session
            .fs
            .resolve(&session.context.location, &name)
            .and_then(|path| session.fs.metadata(&path))
            .is_some_and(|info| !info.is_dir);
        if present {
            tracing::debug!(target: "script", %name, "running startup script");
            if let Some(code) = interpreter.run_script(&name, &[]).exit {
                return Ok(code);
            }
        }
    }
    Ok(interpreter.repl()?)
}

fn main() -> Result<()> {
    let args: ShellArgs = argh::from_env();
    let config = match &args.config {
        Some(path) => ShellConfig::load(path)?,
        None => ShellConfig::default(),
    };
    init_tracing(args.log_level.as_deref().or(config.shell.log_level.as_deref()))?;

    let mut interpreter = Interpreter::from_config(config)?;
    let code = run(&mut interpreter, &args)?;
    std::process::exit(i32::try_from(code).unwrap_or(i32::MAX));
}
