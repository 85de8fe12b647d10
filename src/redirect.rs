//! Redirection clauses: recognizing them in a line, then binding and
//! releasing the endpoints they name.

use crate::env::EnvironmentStore;
use crate::error::ShellError;
use crate::expand::is_well_formed_name;
use crate::filesystem::{FileSystem, ShellLocation};
use crate::io_adapters::{
    Encoding, InputHandle, MemWriter, OutputHandle, StreamBindings, WIDE_BOM, decode_text,
};
use crate::lexer;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    fn label(self) -> &'static str {
        match self {
            Stream::Stdin => "stdin",
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Where a redirected stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File(String),
    Variable(String),
    /// `NUL`, the literal null stream.
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub target: Target,
    pub append: bool,
    pub encoding: Encoding,
}

/// Redirections requested by one command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectionSpec {
    pub stdin: Option<StreamTarget>,
    pub stdout: Option<StreamTarget>,
    pub stderr: Option<StreamTarget>,
}

impl RedirectionSpec {
    pub fn is_empty(&self) -> bool {
        self.targets().next().is_none()
    }

    fn slot(&mut self, stream: Stream) -> &mut Option<StreamTarget> {
        match stream {
            Stream::Stdin => &mut self.stdin,
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }

    fn targets(&self) -> impl Iterator<Item = &StreamTarget> {
        [&self.stdin, &self.stdout, &self.stderr]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    File,
    Variable,
}

#[derive(Debug, Clone, Copy)]
struct Operator {
    stream: Stream,
    kind: TargetKind,
    append: bool,
    encoding: Encoding,
}

/// Decode a redirection operator word.
///
/// The grammar is `[1|2]` `>` or `>>`, then an optional `a` (narrow file) or
/// `v` (variable) suffix; stdin is `<`, `<a` or `<v`.
fn operator(word: &str) -> Option<Operator> {
    let lower = word.to_ascii_lowercase();
    let (stream, rest) = match lower.as_bytes().first()? {
        b'<' => (Stream::Stdin, &lower[1..]),
        b'1' => (Stream::Stdout, lower[1..].strip_prefix('>')?),
        b'2' => (Stream::Stderr, lower[1..].strip_prefix('>')?),
        b'>' => (Stream::Stdout, &lower[1..]),
        _ => return None,
    };
    let (append, suffix) = match rest.strip_prefix('>') {
        Some(tail) if stream != Stream::Stdin => (true, tail),
        Some(_) => return None,
        None => (false, rest),
    };
    let (kind, encoding) = match suffix {
        "" => (TargetKind::File, Encoding::Wide),
        "a" => (TargetKind::File, Encoding::Narrow),
        "v" => (TargetKind::Variable, Encoding::Narrow),
        _ => return None,
    };
    Some(Operator {
        stream,
        kind,
        append,
        encoding,
    })
}

/// Strip redirection clauses from `line`.
///
/// Returns the remaining command text (raw words re-joined by single spaces)
/// and the recorded targets. Nothing is opened here, so a failure leaves no
/// partial state behind.
pub fn parse(line: &str, env: &EnvironmentStore) -> Result<(String, RedirectionSpec), ShellError> {
    let mut spec = RedirectionSpec::default();
    let mut kinds: Vec<(Stream, TargetKind)> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut kept = Vec::new();

    let mut words = lexer::split_words(line).into_iter();
    while let Some(word) = words.next() {
        let Some(op) = operator(word) else {
            kept.push(word);
            continue;
        };
        let Some(raw_target) = words.next() else {
            return Err(ShellError::InvalidParameter(format!(
                "'{word}' has no target"
            )));
        };
        let name = lexer::tokenize(raw_target, true)?
            .into_iter()
            .next()
            .unwrap_or_default();
        if name.is_empty() {
            return Err(ShellError::InvalidParameter(format!(
                "'{word}' has no target"
            )));
        }

        if let Some((_, earlier)) = kinds.iter().find(|(s, _)| *s == op.stream) {
            let reason = if *earlier != op.kind {
                "to both a file and a variable"
            } else {
                "more than once"
            };
            return Err(ShellError::InvalidParameter(format!(
                "{} is redirected {reason}",
                op.stream.label()
            )));
        }
        kinds.push((op.stream, op.kind));

        let target = match op.kind {
            TargetKind::File if name.eq_ignore_ascii_case("nul") => Target::Null,
            TargetKind::File => Target::File(name.clone()),
            TargetKind::Variable => {
                check_variable_target(op.stream, &name, env)?;
                Target::Variable(name.clone())
            }
        };
        if target != Target::Null {
            if names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                return Err(ShellError::InvalidParameter(format!(
                    "'{name}' is the target of two redirections"
                )));
            }
            names.push(name);
        }

        *spec.slot(op.stream) = Some(StreamTarget {
            target,
            append: op.append,
            encoding: op.encoding,
        });
    }

    Ok((kept.join(" "), spec))
}

fn check_variable_target(stream: Stream, name: &str, env: &EnvironmentStore) -> Result<(), ShellError> {
    if !is_well_formed_name(name) {
        return Err(ShellError::InvalidParameter(format!(
            "'{name}' is not a variable name"
        )));
    }
    match stream {
        Stream::Stdin if env.get(name).is_none() => {
            Err(ShellError::NotFound(format!("variable '{name}'")))
        }
        Stream::Stdout | Stream::Stderr if env.is_persistent(name) => {
            Err(ShellError::InvalidParameter(format!(
                "'{name}' is persistent and cannot capture output"
            )))
        }
        _ => Ok(()),
    }
}

/// A variable receiving a stream's text once the command finishes.
struct Capture {
    name: String,
    buffer: MemWriter,
}

/// Variable targets of a bound command, filled in by [`release`].
#[derive(Default)]
pub struct Captures(Vec<Capture>);

/// Open every target of `spec` and return `current` with them applied.
///
/// Every target is resolved and checked before anything is created, so a
/// missing input or an unresolvable output leaves both the file system and
/// the environment unchanged.
pub fn bind(
    spec: &RedirectionSpec,
    current: &StreamBindings,
    fs: &dyn FileSystem,
    location: &ShellLocation,
    env: &mut EnvironmentStore,
) -> Result<(StreamBindings, Captures), ShellError> {
    let mut next = current.clone();
    if let Some(input) = &spec.stdin {
        next.stdin = open_input(input, fs, location, env)?;
    }

    let mut planned = Vec::new();
    for (stream, output) in [(Stream::Stdout, &spec.stdout), (Stream::Stderr, &spec.stderr)] {
        let Some(output) = output else { continue };
        let plan = match &output.target {
            Target::File(name) => Some(plan_output_file(name, output, fs, location)?),
            _ => None,
        };
        planned.push((stream, output, plan));
    }

    let mut captures = Vec::new();
    let mut pending_vars = Vec::new();
    for (stream, output, plan) in planned {
        let handle = match (&output.target, plan) {
            (Target::File(_), Some(plan)) => open_output_file(plan, output, fs)?,
            (Target::Variable(name), _) => {
                let (handle, buffer) = OutputHandle::memory(Encoding::Narrow);
                pending_vars.push((name.clone(), output.append));
                captures.push(Capture {
                    name: name.clone(),
                    buffer,
                });
                handle
            }
            _ => OutputHandle::null(),
        };
        match stream {
            Stream::Stdout => next.stdout = handle,
            _ => next.stderr = handle,
        }
    }

    for (name, append) in pending_vars {
        let value = match env.get(&name) {
            Some(existing) if append => existing.to_string(),
            _ => String::new(),
        };
        env.set_volatile(&name, &value)?;
    }

    Ok((next, Captures(captures)))
}

/// Append the text each captured stream received to its variable.
pub fn release(captures: Captures, env: &mut EnvironmentStore) -> Result<(), ShellError> {
    for capture in captures.0 {
        let mut value = env.get(&capture.name).unwrap_or_default().to_string();
        value.push_str(&capture.buffer.text());
        env.set_volatile(&capture.name, &value)?;
    }
    Ok(())
}

fn open_input(
    input: &StreamTarget,
    fs: &dyn FileSystem,
    location: &ShellLocation,
    env: &EnvironmentStore,
) -> Result<InputHandle, ShellError> {
    match &input.target {
        Target::Null => Ok(InputHandle::from_bytes(Vec::new())),
        Target::Variable(name) => env
            .get(name)
            .map(InputHandle::from_text)
            .ok_or_else(|| ShellError::NotFound(format!("variable '{name}'"))),
        Target::File(name) => {
            let path = fs
                .resolve(location, name)
                .ok_or_else(|| ShellError::NotFound(name.clone()))?;
            if fs.metadata(&path).is_none_or(|info| info.is_dir) {
                return Err(ShellError::NotFound(name.clone()));
            }
            let bytes = fs.read(&path)?;
            Ok(InputHandle::from_text(&decode_text(&bytes, input.encoding)))
        }
    }
}

/// A resolved output file, not yet created.
struct OutputPlan {
    path: PathBuf,
    fresh: bool,
}

fn plan_output_file(
    name: &str,
    output: &StreamTarget,
    fs: &dyn FileSystem,
    location: &ShellLocation,
) -> Result<OutputPlan, ShellError> {
    let path = fs
        .resolve(location, name)
        .ok_or_else(|| ShellError::NotFound(name.to_string()))?;
    let info = fs.metadata(&path);
    if info.as_ref().is_some_and(|info| info.is_dir) {
        return Err(ShellError::NotFound(format!("'{name}' is a directory")));
    }
    let fresh = !output.append || info.is_none_or(|info| info.size == 0);
    Ok(OutputPlan { path, fresh })
}

fn open_output_file(
    plan: OutputPlan,
    output: &StreamTarget,
    fs: &dyn FileSystem,
) -> Result<OutputHandle, ShellError> {
    let mut file = fs.create(&plan.path, output.append)?;
    if plan.fresh && output.encoding == Encoding::Wide {
        file.write_all(&WIDE_BOM)?;
    }
    Ok(OutputHandle::from_boxed(file, output.encoding))
}
