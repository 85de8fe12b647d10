//! Split (`|`) execution: every stage is checked before any stage runs, then
//! stages are chained through in-memory buffers, left to right.

use crate::classify::CommandKind;
use crate::command::ExitCode;
use crate::error::ShellError;
use crate::interpreter::{Interpreter, Prepared};
use crate::io_adapters::{Encoding, InputHandle, MemWriter, OutputHandle, decode_text};
use crate::lexer;
use tracing::debug;

/// One in-flight link between two pipeline stages.
///
/// The upstream stage writes into `write`; [`SplitStage::hand_off`] then moves
/// those bytes to the read side, so the buffer is never shared by both ends.
pub struct SplitStage {
    encoding: Encoding,
    write: MemWriter,
    read: Option<InputHandle>,
}

impl SplitStage {
    /// A fresh link plus the handle the upstream stage writes to.
    pub fn new(encoding: Encoding) -> (Self, OutputHandle) {
        let (handle, write) = OutputHandle::memory(encoding);
        let stage = Self {
            encoding,
            write,
            read: None,
        };
        (stage, handle)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The read endpoint, once the upstream stage has handed off.
    pub fn read_end(&self) -> Option<&InputHandle> {
        self.read.as_ref()
    }

    /// Move everything written so far to the read endpoint and return it.
    pub fn hand_off(&mut self) -> InputHandle {
        let bytes = self.write.take();
        let read = InputHandle::from_text(&decode_text(&bytes, self.encoding));
        self.read = Some(read.clone());
        read
    }
}

/// Split `line` at unquoted, unescaped `|`.
///
/// Returns each segment's text together with the encoding of the link that
/// feeds it (`|a` selects narrow); the first segment's encoding is unused.
fn split_segments(line: &str) -> Result<Vec<(String, Encoding)>, ShellError> {
    let mut segments = Vec::new();
    let mut rest = line;
    let mut encoding = Encoding::Wide;
    loop {
        let (segment, next) = match lexer::find_unescaped(rest, '|') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(ShellError::InvalidParameter(
                "empty command in pipeline".into(),
            ));
        }
        segments.push((segment.to_string(), encoding));
        let Some(next) = next else {
            return Ok(segments);
        };
        (encoding, rest) = match next.strip_prefix(['a', 'A']) {
            Some(tail) if tail.is_empty() || tail.starts_with(char::is_whitespace) => {
                (Encoding::Narrow, tail)
            }
            _ => (Encoding::Wide, next),
        };
    }
}

/// Validate and run a line containing `|`.
pub(crate) fn run(interp: &mut Interpreter, line: &str) -> Result<ExitCode, ShellError> {
    let segments = split_segments(line)?;
    let last = segments.len() - 1;

    let mut stages = Vec::with_capacity(segments.len());
    let mut links = Vec::with_capacity(last);
    for (idx, (text, encoding)) in segments.into_iter().enumerate() {
        // The whole line was alias-expanded already, which covers the first stage.
        let text = if idx == 0 {
            text
        } else {
            links.push(encoding);
            interp.substitute_alias(&text)
        };
        let prepared = interp.prepare(&text)?.ok_or_else(|| {
            ShellError::InvalidParameter(format!("pipeline stage '{text}' has no command"))
        })?;
        if idx < last && prepared.spec.stdout.is_some() {
            return Err(ShellError::InvalidParameter(format!(
                "stdout of '{text}' is already piped"
            )));
        }
        if idx > 0 && prepared.spec.stdin.is_some() {
            return Err(ShellError::InvalidParameter(format!(
                "stdin of '{text}' is already piped"
            )));
        }
        stages.push(prepared);
    }

    if let Some(invalid) = stages.iter().find(|s| s.kind == CommandKind::Invalid) {
        let name = invalid.tokens[0].clone();
        return Ok(interp.not_recognized(&name));
    }
    debug!(target: "commands", stages = stages.len(), "running pipeline");
    run_stages(interp, &stages, &links)
}

fn run_stages(
    interp: &mut Interpreter,
    stages: &[Prepared],
    links: &[Encoding],
) -> Result<ExitCode, ShellError> {
    let (first, rest) = match stages.split_first() {
        Some((first, rest)) if !rest.is_empty() => (first, rest),
        Some((only, _)) => return interp.run_prepared(only),
        None => return Ok(interp.session.context.last_error),
    };

    let (stage, write) = SplitStage::new(links[0]);
    interp.session.splits.push(stage);
    let saved = interp.session.streams.clone();

    interp.session.streams.stdout = write;
    let upstream = interp.run_prepared(first);
    interp.session.streams = saved.clone();

    let result = match upstream {
        Err(e) => Err(e),
        Ok(status)
            if interp.session.context.should_exit()
                || interp.session.context.signals.cancel_requested() =>
        {
            Ok(status)
        }
        Ok(_) => {
            let read = match interp.session.splits.last_mut() {
                Some(stage) => stage.hand_off(),
                None => InputHandle::from_bytes(Vec::new()),
            };
            interp.session.streams.stdin = read;
            let downstream = run_stages(interp, rest, &links[1..]);
            interp.session.streams = saved;
            downstream
        }
    };
    interp.session.splits.pop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::io_adapters::{Console, encode_text};
    use pretty_assertions::assert_eq;

    fn shell() -> (Interpreter, MemWriter, MemWriter) {
        let (console, out, err) = Console::memory("");
        let sh = Interpreter::with_console(ShellConfig::default(), console).unwrap();
        (sh, out, err)
    }

    #[test]
    fn test_split_segments_and_link_encodings() {
        let segments = split_segments("echo a |a type | type").unwrap();
        assert_eq!(
            segments,
            vec![
                ("echo a".to_string(), Encoding::Wide),
                ("type".to_string(), Encoding::Narrow),
                ("type".to_string(), Encoding::Wide),
            ]
        );
        assert_eq!(
            split_segments("echo \"a|b\" | type")
                .unwrap()
                .into_iter()
                .map(|(s, _)| s)
                .collect::<Vec<_>>(),
            vec!["echo \"a|b\"", "type"]
        );
        assert_eq!(split_segments("echo x |alias").unwrap().len(), 2);
        assert!(matches!(
            split_segments("echo x | | type"),
            Err(ShellError::InvalidParameter(_))
        ));
        assert!(matches!(
            split_segments("echo x |"),
            Err(ShellError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_hand_off_moves_bytes() {
        let (mut stage, mut write) = SplitStage::new(Encoding::Wide);
        std::io::Write::write_all(&mut write, "héllo\n".as_bytes()).unwrap();
        assert_eq!(stage.write.contents(), encode_text("héllo\n", Encoding::Wide));

        assert!(stage.read_end().is_none());
        let read = stage.hand_off();
        assert!(stage.write.contents().is_empty());
        assert!(stage.read_end().is_some());
        let mut text = String::new();
        std::io::Read::read_to_string(&mut read.reader(), &mut text).unwrap();
        assert_eq!(text, "héllo\n");
    }

    #[test]
    fn test_two_stage_pipeline_delivers_all_output() {
        let (mut sh, out, _) = shell();
        let long = "x".repeat(10_000);
        sh.execute_line(&format!("set -v big {long}"));
        let outcome = sh.execute_line("echo %big% | type");
        assert_eq!(outcome.status, 0);
        assert_eq!(out.text(), format!("{long}\n"));
        assert!(sh.session().splits.is_empty());
    }

    #[test]
    fn test_narrow_and_multi_stage_links() {
        let (mut sh, out, _) = shell();
        sh.execute_line("echo one two |a type | type |a type");
        assert_eq!(out.text(), "one two\n");
    }

    #[test]
    fn test_invalid_first_stage_runs_nothing() {
        let (mut sh, out, err) = shell();
        let outcome = sh.execute_line("nosuchcmd | set -v ran yes");
        assert_eq!(outcome.status, 14);
        assert!(err.text().contains("'nosuchcmd' is not recognized"));
        assert_eq!(sh.session().env.get("ran"), None);
        assert_eq!(out.text(), "");
    }

    #[test]
    fn test_invalid_later_stage_runs_nothing() {
        let (mut sh, _, _) = shell();
        sh.execute_line("set -v ran no");
        sh.execute_line("set -v ran yes | nosuchcmd");
        assert_eq!(sh.session().env.get("ran"), Some("no"));
    }

    #[test]
    fn test_redirection_conflicting_with_pipe() {
        let (mut sh, _, _) = shell();
        assert_eq!(sh.execute_line("echo a >v x | type").status, 2);
        assert_eq!(sh.execute_line("echo a | type <v x").status, 2);
        assert_eq!(sh.session().env.get("x"), None);
    }

    #[test]
    fn test_last_stage_may_redirect_output() {
        let (mut sh, out, _) = shell();
        sh.execute_line("echo captured | type >v result");
        assert_eq!(sh.session().env.get("result"), Some("captured\n"));
        assert_eq!(out.text(), "");
    }
}
