use crate::command::{CommandIo, ExitCode};
use crate::filesystem::{FileSystem, ShellLocation};
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

/// A file found by [`find_command_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// What the image-execution service is asked to run.
pub struct ImageRequest<'a> {
    /// Host path of the program.
    pub path: &'a Path,
    /// Full token list; index 0 is the name the user typed.
    pub args: &'a [String],
    /// Directory the program starts in.
    pub working_dir: &'a Path,
    /// Shell variables exported to the program.
    pub env: Vec<(String, String)>,
}

/// Runs external programs on behalf of the shell.
pub trait ImageLoader {
    /// Run the program to completion with the given streams and return its
    /// numeric status.
    fn execute(&self, request: &ImageRequest<'_>, io: &mut CommandIo<'_>) -> Result<ExitCode>;
}

/// [`ImageLoader`] that spawns host processes.
///
/// Output is collected and copied into the bound streams. Input is inherited
/// when it comes from the console and fed from the bound stream otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessImageLoader;

impl ImageLoader for ProcessImageLoader {
    fn execute(&self, request: &ImageRequest<'_>, io: &mut CommandIo<'_>) -> Result<ExitCode> {
        let interactive = io.stdin.is_console();
        let mut child = std::process::Command::new(request.path)
            .args(request.args.iter().skip(1))
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(request.working_dir)
            .stdin(if interactive {
                Stdio::inherit()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", request.path.display()))?;

        let feeder = match child.stdin.take() {
            Some(mut pipe) => {
                let mut input = Vec::new();
                io.stdin.read_to_end(&mut input)?;
                // A child that exits without reading closes the pipe; that is not our error.
                Some(std::thread::spawn(move || {
                    let _ = pipe.write_all(&input);
                }))
            }
            None => None,
        };

        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }
        io.stdout.write_all(&output.stdout)?;
        io.stderr.write_all(&output.stderr)?;

        Ok(match output.status.code() {
            Some(code) => ExitCode::from(code as u32),
            None => terminated_by_signal(output.status),
        })
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal as ExitCode
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        ExitCode::MAX
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    ExitCode::MAX
}

fn has_separator(name: &str) -> bool {
    name.contains(['\\', '/', ':'])
}

fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn find_by_path(fs: &dyn FileSystem, path: &Path, extensions: &[String]) -> Option<ResolvedFile> {
    let exact = fs
        .metadata(path)
        .filter(|info| !info.is_dir)
        .map(|info| ResolvedFile {
            path: path.to_path_buf(),
            size: info.size,
        });
    if exact.is_some() || path.extension().is_some() {
        return exact;
    }
    extensions.iter().find_map(|ext| {
        let candidate = with_extension(path, ext);
        let info = fs.metadata(&candidate).filter(|info| !info.is_dir)?;
        Some(ResolvedFile {
            path: candidate,
            size: info.size,
        })
    })
}

/// Resolve a command name to a file the way the shell searches for programs.
///
/// Behavior:
/// - A name with a drive or a path separator is resolved against `current`
///   (or its drive) only.
/// - A bare name is tried in the current location, then in each
///   `;`-separated directory of `search_path`.
/// - A name without an extension is also tried with each of `extensions`.
/// - Directories never match; an empty name resolves to nothing.
pub fn find_command_path(
    fs: &dyn FileSystem,
    current: &ShellLocation,
    search_path: Option<&str>,
    name: &str,
    extensions: &[String],
) -> Option<ResolvedFile> {
    if name.is_empty() {
        return None;
    }
    let direct = fs.resolve(current, name)?;
    if let Some(found) = find_by_path(fs, &direct, extensions) {
        return Some(found);
    }
    if has_separator(name) {
        return None;
    }
    search_path?
        .split(';')
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .filter_map(|dir| fs.locate(current, dir))
        .filter_map(|dir| fs.resolve(&dir, name))
        .find_map(|candidate| find_by_path(fs, &candidate, extensions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::HostFileSystem;
    use std::fs;

    fn extensions() -> Vec<String> {
        vec!["nsh".to_string(), "efi".to_string()]
    }

    fn tree() -> (tempfile::TempDir, HostFileSystem, ShellLocation) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tools")).unwrap();
        fs::create_dir_all(dir.path().join("work")).unwrap();
        fs::write(dir.path().join("tools").join("hello.efi"), b"MZ").unwrap();
        fs::write(dir.path().join("work").join("run.nsh"), b"echo hi").unwrap();
        let fs = HostFileSystem::new([("fs0".to_string(), dir.path().to_path_buf())]);
        let loc = fs.locate(&ShellLocation::drive_root("fs0", dir.path()), "work").unwrap();
        (dir, fs, loc)
    }

    #[test]
    fn test_current_location_with_implied_extension() {
        let (_dir, fs, loc) = tree();
        let found = find_command_path(&fs, &loc, None, "run", &extensions()).unwrap();
        assert!(found.path.ends_with("work/run.nsh"));
        assert_eq!(found.size, 7);
    }

    #[test]
    fn test_search_path_entries_are_tried_in_order() {
        let (_dir, fs, loc) = tree();
        let found = find_command_path(&fs, &loc, Some(";fs0:\\nowhere;fs0:\\tools"), "hello", &extensions());
        assert!(found.unwrap().path.ends_with("tools/hello.efi"));
    }

    #[test]
    fn test_names_with_separators_skip_the_search_path() {
        let (_dir, fs, loc) = tree();
        assert!(find_command_path(&fs, &loc, Some("fs0:\\tools"), "sub\\hello", &extensions()).is_none());
        assert!(find_command_path(&fs, &loc, None, "fs0:\\tools\\hello.efi", &extensions()).is_some());
    }

    #[test]
    fn test_directories_and_empty_names_do_not_resolve() {
        let (_dir, fs, loc) = tree();
        assert!(find_command_path(&fs, &loc, Some("fs0:\\"), "tools", &extensions()).is_none());
        assert!(find_command_path(&fs, &loc, Some("fs0:\\"), "", &extensions()).is_none());
    }

    #[test]
    #[cfg(unix)]
    fn test_process_loader_feeds_input_and_collects_output() {
        use crate::io_adapters::MemReader;

        let mut stdin = MemReader::new(b"piped text".to_vec());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut io = CommandIo {
            stdin: &mut stdin,
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        let args = vec!["cat".to_string()];
        let request = ImageRequest {
            path: Path::new("/bin/cat"),
            args: &args,
            working_dir: Path::new("/"),
            env: Vec::new(),
        };

        let status = ProcessImageLoader.execute(&request, &mut io).unwrap();
        assert_eq!(status, 0);
        assert_eq!(stdout, b"piped text");
    }

    #[test]
    #[cfg(unix)]
    fn test_process_loader_reports_exit_status() {
        use crate::io_adapters::MemReader;

        let mut stdin = MemReader::new(Vec::new());
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut io = CommandIo {
            stdin: &mut stdin,
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        let args = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let request = ImageRequest {
            path: Path::new("/bin/sh"),
            args: &args,
            working_dir: Path::new("/"),
            env: Vec::new(),
        };

        assert_eq!(ProcessImageLoader.execute(&request, &mut io).unwrap(), 3);
    }
}
