use crate::external::find_command_path;
use crate::session::Session;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static DRIVE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+:$").expect("drive pattern"));

/// What the first token of a line names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `fs0:`; carries the drive name without the colon.
    DriveChange(String),
    Builtin,
    Script(PathBuf),
    External(PathBuf),
    Invalid,
}

/// Classify `name`, first match wins: drive change, built-in, script file,
/// any other file.
pub fn classify(name: &str, session: &Session, is_builtin: impl Fn(&str) -> bool) -> CommandKind {
    if DRIVE_NAME.is_match(name) {
        return CommandKind::DriveChange(name.trim_end_matches(':').to_string());
    }
    if is_builtin(name) {
        return CommandKind::Builtin;
    }
    let settings = &session.config.shell;
    let found = find_command_path(
        session.fs.as_ref(),
        &session.context.location,
        session.env.get("path"),
        name,
        &settings.executable_extensions,
    );
    match found {
        Some(file) if session.config.is_script_name(&file.path) => CommandKind::Script(file.path),
        Some(file) => CommandKind::External(file.path),
        None => CommandKind::Invalid,
    }
}
