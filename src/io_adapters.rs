use crate::command::{CommandIo, Stdin};
use crate::context::BreakSignals;
use crate::error::ShellError;
use std::cell::RefCell;
use std::io::{self, Cursor, Read, Result as IoResult, Write};
use std::rc::Rc;
use std::time::Duration;

/// UTF-16LE byte-order mark written at the start of new wide text files.
pub const WIDE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Text encoding of a stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-16LE ("Unicode" in shell terms).
    #[default]
    Wide,
    /// Plain bytes, UTF-8 for text ("ASCII" in shell terms).
    Narrow,
}

/// Encode text for an endpoint with the given encoding.
pub fn encode_text(text: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Narrow => text.as_bytes().to_vec(),
        Encoding::Wide => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
    }
}

/// Decode bytes read from an endpoint. A byte-order mark wins over `encoding`.
pub fn decode_text(bytes: &[u8], encoding: Encoding) -> String {
    if let Some(rest) = bytes.strip_prefix(&WIDE_BOM) {
        return decode_wide(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&UTF8_BOM) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    match encoding {
        Encoding::Wide => decode_wide(bytes),
        Encoding::Narrow => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_wide(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Memory-backed reader for builtins.
pub struct MemReader {
    cursor: Cursor<Vec<u8>>,
}

impl MemReader {
    /// Create a MemReader that will read from the provided buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(buf),
        }
    }
}

impl Read for MemReader {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        self.cursor.read(out)
    }
}

impl Stdin for MemReader {}

/// Growable in-memory byte buffer; clones share the same bytes.
#[derive(Clone, Default)]
pub struct MemWriter {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.borrow().clone()
    }

    /// Move the bytes out, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.borrow_mut())
    }

    /// Captured bytes as lossy UTF-8, for tests and variable capture.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf.borrow()).into_owned()
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Converts the UTF-8 text commands write into the endpoint's encoding.
struct TextSink {
    inner: Box<dyn Write>,
    encoding: Encoding,
    pending: Vec<u8>,
    signals: Option<BreakSignals>,
}

impl TextSink {
    fn wait_for_output(&self) -> IoResult<()> {
        let Some(signals) = &self.signals else {
            return Ok(());
        };
        loop {
            if signals.cancel_requested() {
                // Not `Interrupted`: `write_all` would retry that forever.
                return Err(io::Error::other(ShellError::Aborted));
            }
            if !signals.output_halted() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn write_text(&mut self, data: &[u8]) -> IoResult<()> {
        self.wait_for_output()?;
        if self.encoding == Encoding::Narrow {
            return self.inner.write_all(data);
        }
        self.pending.extend_from_slice(data);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // An incomplete trailing sequence waits for the next write.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let chunk: Vec<u8> = self.pending.drain(..complete).collect();
        let text = String::from_utf8_lossy(&chunk);
        self.inner.write_all(&encode_text(&text, Encoding::Wide))
    }
}

/// A shareable output endpoint (console, file, pipe buffer, variable, null).
#[derive(Clone)]
pub struct OutputHandle {
    sink: Rc<RefCell<TextSink>>,
}

impl OutputHandle {
    pub fn new(writer: impl Write + 'static, encoding: Encoding) -> Self {
        Self::from_boxed(Box::new(writer), encoding)
    }

    pub fn from_boxed(writer: Box<dyn Write>, encoding: Encoding) -> Self {
        Self {
            sink: Rc::new(RefCell::new(TextSink {
                inner: writer,
                encoding,
                pending: Vec::new(),
                signals: None,
            })),
        }
    }

    /// Endpoint that discards everything (`NUL`).
    pub fn null() -> Self {
        Self::new(io::sink(), Encoding::Narrow)
    }

    /// In-memory endpoint plus a handle to read what was written.
    pub fn memory(encoding: Encoding) -> (Self, MemWriter) {
        let buf = MemWriter::new();
        (Self::new(buf.clone(), encoding), buf)
    }

    pub fn encoding(&self) -> Encoding {
        self.sink.borrow().encoding
    }

    /// Make writes observe the cancel and halt-output signals.
    pub(crate) fn attach_signals(&self, signals: BreakSignals) {
        self.sink.borrow_mut().signals = Some(signals);
    }
}

impl Write for OutputHandle {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.sink.borrow_mut().write_text(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        self.sink.borrow_mut().inner.flush()
    }
}

/// A shareable input endpoint. Buffered inputs keep one read position for
/// every command bound to them.
#[derive(Clone)]
pub enum InputHandle {
    Console,
    Buffer(Rc<RefCell<Cursor<Vec<u8>>>>),
}

impl InputHandle {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        InputHandle::Buffer(Rc::new(RefCell::new(Cursor::new(bytes))))
    }

    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes().to_vec())
    }

    /// Fresh reader for one command invocation.
    pub fn reader(&self) -> Box<dyn Stdin> {
        match self {
            InputHandle::Console => Box::new(ConsoleIn),
            InputHandle::Buffer(cursor) => Box::new(SharedReader(cursor.clone())),
        }
    }
}

struct SharedReader(Rc<RefCell<Cursor<Vec<u8>>>>);

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.0.borrow_mut().read(buf)
    }
}

impl Stdin for SharedReader {}

struct ConsoleIn;

impl Read for ConsoleIn {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        io::stdin().lock().read(buf)
    }
}

impl Stdin for ConsoleIn {
    fn is_console(&self) -> bool {
        true
    }
}

/// The endpoints stdin/stdout/stderr are currently bound to.
#[derive(Clone)]
pub struct StreamBindings {
    pub stdin: InputHandle,
    pub stdout: OutputHandle,
    pub stderr: OutputHandle,
}

impl StreamBindings {
    /// Build a [`CommandIo`] over fresh views of the bound endpoints.
    pub fn with_io<R>(&self, f: impl FnOnce(&mut CommandIo<'_>) -> R) -> R {
        let mut stdin = self.stdin.reader();
        let mut stdout = self.stdout.clone();
        let mut stderr = self.stderr.clone();
        let mut io = CommandIo {
            stdin: stdin.as_mut(),
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        f(&mut io)
    }
}

/// The console the session falls back to when nothing is redirected.
#[derive(Clone)]
pub struct Console {
    pub input: InputHandle,
    pub output: OutputHandle,
    pub error: OutputHandle,
}

impl Console {
    /// The host's stdin/stdout/stderr.
    pub fn host() -> Self {
        Self {
            input: InputHandle::Console,
            output: OutputHandle::new(io::stdout(), Encoding::Narrow),
            error: OutputHandle::new(io::stderr(), Encoding::Narrow),
        }
    }

    /// Console over memory buffers; returns the output and error captures.
    pub fn memory(input: &str) -> (Self, MemWriter, MemWriter) {
        let (output, out) = OutputHandle::memory(Encoding::Narrow);
        let (error, err) = OutputHandle::memory(Encoding::Narrow);
        let console = Self {
            input: InputHandle::from_text(input),
            output,
            error,
        };
        (console, out, err)
    }

    pub fn bindings(&self) -> StreamBindings {
        StreamBindings {
            stdin: self.input.clone(),
            stdout: self.output.clone(),
            stderr: self.error.clone(),
        }
    }
}
