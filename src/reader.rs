use log::debug;
use log::trace;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;

use crate::Result;
use crate::error::PcaptureError;
use crate::pcap::FILE_HEADER_LEN;
use crate::pcap::FileHeader;
use crate::pcap::PacketRecord;
use crate::pcap::RECORD_HEADER_LEN;
use crate::pcap::RecordHeader;
use crate::stream::CaptureSource;
use crate::stream::Descriptor;
use crate::stream::HasDescriptor;
use crate::stream::OpenMode;

/// Fill `buf` as far as the source allows, returning the number of bytes read.
/// Less than `buf.len()` means the source hit end of stream.
pub(crate) fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Forward-only pcap decoder.
///
/// The global header is parsed when the reader is built. Opening a reader on
/// a pipe therefore blocks until the producer has written the header.
#[derive(Debug)]
pub struct PcapReader {
    source: Option<CaptureSource>,
    name: String,
    mode: OpenMode,
    header: FileHeader,
    // byte offset of the next record
    offset: u64,
    records_read: u64,
    exhausted: bool,
}

impl PcapReader {
    /// Open a pcap file, `-` reads the standard input.
    /// ```rust,no_run
    /// use pcapio::PcapReader;
    ///
    /// fn main() {
    ///     let mut reader = PcapReader::open("test.pcap").unwrap();
    ///     for record in reader.records() {
    ///         let record = record.unwrap();
    ///         println!("packet len: {}", record.packet_data.len());
    ///     }
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PcapReader> {
        Self::open_with_mode(path, "rb")
    }
    pub fn open_with_mode<P: AsRef<Path>>(path: P, mode: &str) -> Result<PcapReader> {
        let source = CaptureSource::open(path, mode)?;
        Self::new(source)
    }
    /// Wrap an already open source and parse its global header.
    pub fn new(mut source: CaptureSource) -> Result<PcapReader> {
        source.mode().check_read()?;
        let mut buf = [0u8; FILE_HEADER_LEN];
        let n = read_full(&mut source, &mut buf)?;
        let header = FileHeader::decode(&buf[..n])?;
        debug!(
            "opened pcap reader on {}: format {}, snaplen {}, linktype {}",
            source.name(),
            header.format,
            header.snaplen,
            header.linktype
        );
        Ok(PcapReader {
            name: source.name().to_string(),
            mode: source.mode(),
            source: Some(source),
            header,
            offset: FILE_HEADER_LEN as u64,
            records_read: 0,
            exhausted: false,
        })
    }
    pub fn header(&self) -> &FileHeader {
        &self.header
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn mode(&self) -> OpenMode {
        self.mode
    }
    /// Number of records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
    /// Decode the next record, `None` at the end of the stream.
    ///
    /// A truncated record is reported once; the reader is exhausted afterwards
    /// and has to be reopened to read the data again.
    pub fn next_record(&mut self) -> Result<Option<PacketRecord>> {
        let source = match self.source.as_mut() {
            Some(s) => s,
            None => {
                return Err(PcaptureError::Closed {
                    name: self.name.clone(),
                });
            }
        };
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = [0u8; RECORD_HEADER_LEN];
        let n = read_full(source, &mut buf)?;
        if n == 0 {
            self.exhausted = true;
            return Ok(None);
        }
        if n < RECORD_HEADER_LEN {
            self.exhausted = true;
            return Err(PcaptureError::TruncatedRecord {
                index: self.records_read,
                offset: self.offset,
                declared: RECORD_HEADER_LEN as u64,
                available: n as u64,
            });
        }
        let header = RecordHeader::decode(&buf, &self.header)?;

        let declared = header.captured_packet_length as u64;
        let mut packet_data = Vec::new();
        let got = source.by_ref().take(declared).read_to_end(&mut packet_data)? as u64;
        if got < declared {
            self.exhausted = true;
            return Err(PcaptureError::TruncatedRecord {
                index: self.records_read,
                offset: self.offset,
                declared,
                available: got,
            });
        }
        trace!(
            "record #{} at offset {}: {} bytes",
            self.records_read, self.offset, declared
        );
        if header.captured_packet_length > self.header.snaplen {
            debug!(
                "record #{} captured length {} exceeds snaplen {}",
                self.records_read, header.captured_packet_length, self.header.snaplen
            );
        }
        self.offset += RECORD_HEADER_LEN as u64 + declared;
        self.records_read += 1;
        Ok(Some(PacketRecord {
            header,
            packet_data,
        }))
    }
    /// Lazy, single pass view of the remaining records.
    pub fn records(&mut self) -> Records<'_> {
        Records { reader: self }
    }
    /// Decode every remaining record and return how many there were.
    pub fn read(&mut self) -> Result<u64> {
        let mut count = 0;
        while self.next_record()?.is_some() {
            count += 1;
        }
        debug!("read {} records from {}", count, self.name);
        Ok(count)
    }
    pub fn fileno(&self) -> Result<Descriptor> {
        match &self.source {
            Some(source) => source.descriptor().ok_or_else(|| PcaptureError::Unsupported {
                what: format!("'{}' has no file descriptor", self.name),
            }),
            None => Err(PcaptureError::Closed {
                name: self.name.clone(),
            }),
        }
    }
    pub fn closed(&self) -> bool {
        self.source.is_none()
    }
    /// `closed` only changes through [`PcapReader::close`].
    pub fn set_closed(&mut self, _closed: bool) -> Result<()> {
        Err(PcaptureError::Immutable {
            attribute: "closed",
        })
    }
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!(
                "closed pcap reader on {} after {} records",
                self.name, self.records_read
            );
        }
    }
}

impl HasDescriptor for PcapReader {
    fn descriptor(&self) -> Option<Descriptor> {
        self.source.as_ref().and_then(|s| s.descriptor())
    }
}

pub struct Records<'a> {
    reader: &'a mut PcapReader,
}

impl Iterator for Records<'_> {
    type Item = Result<PacketRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_record().transpose()
    }
}
