//! Byte sources and sinks the reader and writer run on top of.
//!
//! A source or sink remembers a display name, the fopen-style mode it was
//! opened with and, when the backend is an OS object, its descriptor.

use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::net::TcpStream;
#[cfg(unix)]
use std::os::fd::AsRawFd;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::ChildStdin;
use std::process::ChildStdout;
use std::str::FromStr;
use strum_macros::Display;
use strum_macros::EnumString;

use crate::Result;
use crate::error::PcaptureError;

/// OS-level handle number.
pub type Descriptor = i32;

/// Path that stands for the standard input or output stream.
pub static STD_STREAM_PATH: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum OpenMode {
    #[strum(to_string = "rb")]
    ReadBinary,
    #[strum(to_string = "wb")]
    WriteBinary,
    #[strum(to_string = "ab")]
    AppendBinary,
    #[strum(to_string = "r+b", serialize = "rb+")]
    ReadWriteBinary,
    #[strum(to_string = "r")]
    ReadText,
    #[strum(to_string = "w")]
    WriteText,
    #[strum(to_string = "a")]
    AppendText,
    #[strum(to_string = "r+")]
    ReadWriteText,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<OpenMode> {
        OpenMode::from_str(mode).map_err(|_| PcaptureError::Mode {
            mode: mode.to_string(),
            reason: String::from("unknown mode"),
        })
    }
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            OpenMode::ReadBinary
                | OpenMode::WriteBinary
                | OpenMode::AppendBinary
                | OpenMode::ReadWriteBinary
        )
    }
    pub fn is_readable(self) -> bool {
        matches!(
            self,
            OpenMode::ReadBinary
                | OpenMode::ReadWriteBinary
                | OpenMode::ReadText
                | OpenMode::ReadWriteText
        )
    }
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::ReadBinary | OpenMode::ReadText)
    }
    /// Fails unless the mode allows reading binary data.
    pub fn check_read(self) -> Result<()> {
        if !self.is_binary() {
            return Err(PcaptureError::Mode {
                mode: self.to_string(),
                reason: String::from("pcap data must be read in binary mode"),
            });
        }
        if !self.is_readable() {
            return Err(PcaptureError::Mode {
                mode: self.to_string(),
                reason: String::from("stream is not readable"),
            });
        }
        Ok(())
    }
    /// Fails unless the mode allows writing binary data.
    pub fn check_write(self) -> Result<()> {
        if !self.is_binary() {
            return Err(PcaptureError::Mode {
                mode: self.to_string(),
                reason: String::from("pcap data must be written in binary mode"),
            });
        }
        if !self.is_writable() {
            return Err(PcaptureError::Mode {
                mode: self.to_string(),
                reason: String::from("stream is read-only"),
            });
        }
        Ok(())
    }
}

/// Anything that may expose an OS descriptor. A plain descriptor number is
/// its own descriptor.
pub trait HasDescriptor {
    fn descriptor(&self) -> Option<Descriptor>;
}

impl HasDescriptor for Descriptor {
    fn descriptor(&self) -> Option<Descriptor> {
        if *self >= 0 { Some(*self) } else { None }
    }
}

#[cfg(unix)]
fn os_descriptor<T: AsRawFd>(t: &T) -> Option<Descriptor> {
    Some(t.as_raw_fd())
}

#[cfg(not(unix))]
fn os_descriptor<T>(_t: &T) -> Option<Descriptor> {
    None
}

macro_rules! impl_os_descriptor {
    ($($t:ty),*) => {
        $(
            impl HasDescriptor for $t {
                fn descriptor(&self) -> Option<Descriptor> {
                    os_descriptor(self)
                }
            }
        )*
    };
}

impl_os_descriptor!(
    File,
    io::Stdin,
    io::Stdout,
    ChildStdin,
    ChildStdout,
    TcpStream
);

#[cfg(unix)]
impl_os_descriptor!(UnixStream);

impl<T> HasDescriptor for Cursor<T> {
    fn descriptor(&self) -> Option<Descriptor> {
        None
    }
}

impl HasDescriptor for Vec<u8> {
    fn descriptor(&self) -> Option<Descriptor> {
        None
    }
}

impl<T: HasDescriptor + ?Sized> HasDescriptor for &T {
    fn descriptor(&self) -> Option<Descriptor> {
        (**self).descriptor()
    }
}

fn path_name(path: &Path) -> Result<String> {
    let name = path.to_string_lossy().to_string();
    if name.is_empty() {
        return Err(PcaptureError::ResourceOpen {
            target: name,
            e: String::from("empty path"),
        });
    }
    Ok(name)
}

/// Where pcap bytes are read from.
pub struct CaptureSource {
    inner: Box<dyn Read + Send>,
    descriptor: Option<Descriptor>,
    name: String,
    mode: OpenMode,
}

impl CaptureSource {
    /// Open `path` for reading; `-` is the standard input.
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<CaptureSource> {
        let mode = OpenMode::parse(mode)?;
        mode.check_read()?;
        let name = path_name(path.as_ref())?;
        if name == STD_STREAM_PATH {
            return Ok(CaptureSource::stdin());
        }
        let file = File::open(path.as_ref()).map_err(|e| PcaptureError::ResourceOpen {
            target: name.clone(),
            e: e.to_string(),
        })?;
        Ok(CaptureSource::from_file(file, &name))
    }
    pub fn stdin() -> CaptureSource {
        let stdin = io::stdin();
        CaptureSource {
            descriptor: stdin.descriptor(),
            inner: Box::new(stdin),
            name: String::from("<stdin>"),
            mode: OpenMode::ReadBinary,
        }
    }
    pub fn from_file(file: File, name: &str) -> CaptureSource {
        CaptureSource {
            descriptor: file.descriptor(),
            inner: Box::new(BufReader::new(file)),
            name: name.to_string(),
            mode: OpenMode::ReadBinary,
        }
    }
    /// Read the output of a child process spawned with a piped stdout.
    pub fn from_child(stdout: ChildStdout) -> CaptureSource {
        CaptureSource::from_stream(stdout, "<child stdout>")
    }
    /// Any readable OS object, keeping its descriptor.
    pub fn from_stream<R>(stream: R, name: &str) -> CaptureSource
    where
        R: Read + HasDescriptor + Send + 'static,
    {
        CaptureSource {
            descriptor: stream.descriptor(),
            inner: Box::new(stream),
            name: name.to_string(),
            mode: OpenMode::ReadBinary,
        }
    }
    /// Any reader without a descriptor, e.g. an in-memory buffer.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, name: &str) -> CaptureSource {
        CaptureSource {
            inner: Box::new(reader),
            descriptor: None,
            name: name.to_string(),
            mode: OpenMode::ReadBinary,
        }
    }
    /// Declare the mode the underlying handle was opened with.
    pub fn with_mode(mut self, mode: &str) -> Result<CaptureSource> {
        self.mode = OpenMode::parse(mode)?;
        Ok(self)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn mode(&self) -> OpenMode {
        self.mode
    }
}

impl Read for CaptureSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl HasDescriptor for CaptureSource {
    fn descriptor(&self) -> Option<Descriptor> {
        self.descriptor
    }
}

impl fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CaptureSource")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Where pcap bytes are written to.
pub struct CaptureSink {
    inner: Box<dyn Write + Send>,
    descriptor: Option<Descriptor>,
    name: String,
    mode: OpenMode,
}

impl CaptureSink {
    /// Create or open `path` for writing; `-` is the standard output.
    /// `ab` and `r+b` both position the sink after the existing content.
    pub fn create<P: AsRef<Path>>(path: P, mode: &str) -> Result<CaptureSink> {
        let mode = OpenMode::parse(mode)?;
        mode.check_write()?;
        let name = path_name(path.as_ref())?;
        if name == STD_STREAM_PATH {
            return Ok(CaptureSink::stdout());
        }
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::AppendBinary => options.append(true).create(true),
            OpenMode::ReadWriteBinary => options.read(true).write(true),
            _ => options.write(true).create(true).truncate(true),
        };
        let mut file = options
            .open(path.as_ref())
            .map_err(|e| PcaptureError::ResourceOpen {
                target: name.clone(),
                e: e.to_string(),
            })?;
        // r+b continues the existing data instead of overwriting it
        if mode == OpenMode::ReadWriteBinary {
            file.seek(SeekFrom::End(0))
                .map_err(|e| PcaptureError::ResourceOpen {
                    target: name.clone(),
                    e: e.to_string(),
                })?;
        }
        let mut sink = CaptureSink::from_file(file, &name);
        sink.mode = mode;
        Ok(sink)
    }
    pub fn stdout() -> CaptureSink {
        let stdout = io::stdout();
        CaptureSink {
            descriptor: stdout.descriptor(),
            inner: Box::new(stdout),
            name: String::from("<stdout>"),
            mode: OpenMode::WriteBinary,
        }
    }
    pub fn from_file(file: File, name: &str) -> CaptureSink {
        CaptureSink {
            descriptor: file.descriptor(),
            inner: Box::new(BufWriter::new(file)),
            name: name.to_string(),
            mode: OpenMode::WriteBinary,
        }
    }
    /// Feed the stdin of a child process spawned with a piped stdin.
    pub fn from_child(stdin: ChildStdin) -> CaptureSink {
        CaptureSink::from_stream(stdin, "<child stdin>")
    }
    pub fn from_stream<W>(stream: W, name: &str) -> CaptureSink
    where
        W: Write + HasDescriptor + Send + 'static,
    {
        CaptureSink {
            descriptor: stream.descriptor(),
            inner: Box::new(stream),
            name: name.to_string(),
            mode: OpenMode::WriteBinary,
        }
    }
    pub fn from_writer<W: Write + Send + 'static>(writer: W, name: &str) -> CaptureSink {
        CaptureSink {
            inner: Box::new(writer),
            descriptor: None,
            name: name.to_string(),
            mode: OpenMode::WriteBinary,
        }
    }
    /// Declare the mode the underlying handle was opened with.
    pub fn with_mode(mut self, mode: &str) -> Result<CaptureSink> {
        self.mode = OpenMode::parse(mode)?;
        Ok(self)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn mode(&self) -> OpenMode {
        self.mode
    }
}

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl HasDescriptor for CaptureSink {
    fn descriptor(&self) -> Option<Descriptor> {
        self.descriptor
    }
}

impl fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CaptureSink")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
