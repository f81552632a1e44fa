use log::debug;
use log::trace;
use log::warn;
use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;

use crate::Result;
use crate::error::PcaptureError;
use crate::pcap::FileHeader;
use crate::pcap::PacketRecord;
use crate::pcap::RecordHeader;
use crate::pcap::TsResolution;
use crate::reader::PcapReader;
use crate::stream::CaptureSink;
use crate::stream::Descriptor;
use crate::stream::HasDescriptor;
use crate::stream::OpenMode;

/// Sequential pcap encoder.
///
/// The header format is fixed when the writer is built, but the header bytes
/// are only written right before the first packet (or on close, if no packet
/// was ever written).
#[derive(Debug)]
pub struct PcapWriter {
    sink: Option<CaptureSink>,
    filename: String,
    mode: OpenMode,
    header: FileHeader,
    header_written: bool,
    records_written: u64,
    // a sink write failed, the output may end in a partial record
    failed: bool,
}

impl PcapWriter {
    /// Create a little endian, microsecond pcap file, `-` writes to stdout.
    /// ```rust,no_run
    /// use pcapio::PcapWriter;
    ///
    /// fn main() {
    ///     let mut writer = PcapWriter::create("test.pcap").unwrap();
    ///     writer.write(&[0xff; 60]).unwrap();
    ///     writer.close().unwrap();
    /// }
    /// ```
    pub fn create<P: AsRef<Path>>(path: P) -> Result<PcapWriter> {
        Self::with_header(path, FileHeader::default())
    }
    /// With `ab` or `r+b` on an existing, non-empty trace the records continue
    /// that trace: its header is adopted and not written again. The existing
    /// trace must decode to its end, a damaged one is rejected untouched.
    pub fn create_with_mode<P: AsRef<Path>>(path: P, mode: &str) -> Result<PcapWriter> {
        let existing = match OpenMode::parse(mode)? {
            OpenMode::AppendBinary | OpenMode::ReadWriteBinary => {
                Self::existing_header(path.as_ref())?
            }
            _ => None,
        };
        let sink = CaptureSink::create(path.as_ref(), mode)?;
        let mut writer = Self::from_sink(sink, existing.unwrap_or_default())?;
        writer.filename = path.as_ref().to_string_lossy().to_string();
        if existing.is_some() {
            debug!(
                "appending to {} in format {}",
                writer.filename, writer.header.format
            );
            writer.header_written = true;
        }
        Ok(writer)
    }
    fn existing_header(path: &Path) -> Result<Option<FileHeader>> {
        match fs::metadata(path) {
            Ok(m) if m.is_file() && m.len() > 0 => {
                let mut reader = PcapReader::open(path)?;
                let count = reader.read()?;
                debug!("{} holds {} valid records", reader.name(), count);
                Ok(Some(*reader.header()))
            }
            _ => Ok(None),
        }
    }
    pub fn with_header<P: AsRef<Path>>(path: P, header: FileHeader) -> Result<PcapWriter> {
        let sink = CaptureSink::create(path.as_ref(), "wb")?;
        let mut writer = Self::from_sink(sink, header)?;
        writer.filename = path.as_ref().to_string_lossy().to_string();
        Ok(writer)
    }
    /// Write into an already open sink.
    pub fn from_sink(sink: CaptureSink, header: FileHeader) -> Result<PcapWriter> {
        sink.mode().check_write()?;
        debug!(
            "opened pcap writer on {}: format {}, snaplen {}",
            sink.name(),
            header.format,
            header.snaplen
        );
        Ok(PcapWriter {
            filename: sink.name().to_string(),
            mode: sink.mode(),
            sink: Some(sink),
            header,
            header_written: false,
            records_written: 0,
            failed: false,
        })
    }
    fn sink_failed(&mut self, e: io::Error) -> PcaptureError {
        if !self.failed {
            warn!("write to {} failed, no further writes accepted", self.filename);
        }
        self.failed = true;
        PcaptureError::SinkWrite {
            name: self.filename.clone(),
            e,
        }
    }
    fn usable_sink(&mut self) -> Result<&mut CaptureSink> {
        if self.failed {
            return Err(PcaptureError::SinkWrite {
                name: self.filename.clone(),
                e: io::Error::other("an earlier write failed, the output is incomplete"),
            });
        }
        match self.sink.as_mut() {
            Some(s) => Ok(s),
            None => Err(PcaptureError::Closed {
                name: self.filename.clone(),
            }),
        }
    }
    fn ensure_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let bytes = self.header.to_bytes();
        let result = self.usable_sink()?.write_all(&bytes);
        if let Err(e) = result {
            return Err(self.sink_failed(e));
        }
        self.header_written = true;
        Ok(())
    }
    fn write_packet(&mut self, record: &RecordHeader, data: &[u8]) -> Result<()> {
        self.ensure_header()?;
        let pbo = self.header.format.byte_order();
        let sink = self.usable_sink()?;
        let result = record.write(sink, pbo).and_then(|_| sink.write_all(data));
        if let Err(e) = result {
            return Err(self.sink_failed(e));
        }
        trace!("record #{}: {} bytes", self.records_written, data.len());
        self.records_written += 1;
        Ok(())
    }
    /// Write `data` as one packet stamped with the current time. Data longer
    /// than the snaplen is cut; returns the number of payload bytes stored.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let record = PacketRecord::new(self.header.resolution(), data, self.header.snaplen);
        self.write_packet(&record.header, &record.packet_data)?;
        Ok(record.packet_data.len())
    }
    /// Write a record decoded from a file with timestamps in `resolution`.
    pub fn write_record(&mut self, record: &PacketRecord, resolution: TsResolution) -> Result<()> {
        let header = record.header.rescale(resolution, self.header.resolution());
        let snaplen = self.header.snaplen as usize;
        let data = if record.packet_data.len() > snaplen {
            warn!(
                "record of {} bytes cut to snaplen {} in {}",
                record.packet_data.len(),
                snaplen,
                self.filename
            );
            &record.packet_data[..snaplen]
        } else {
            &record.packet_data[..]
        };
        let header = RecordHeader {
            captured_packet_length: data.len() as u32,
            original_packet_length: header.original_packet_length.max(data.len() as u32),
            ..header
        };
        self.write_packet(&header, data)
    }
    /// Copy every remaining record of `reader` into this writer, returns the
    /// number of records copied. Repeated calls append.
    pub fn write_from_pcap_reader(&mut self, reader: &mut PcapReader) -> Result<u64> {
        if self.sink.is_none() {
            return Err(PcaptureError::Closed {
                name: self.filename.clone(),
            });
        }
        let source = *reader.header();
        if self.header_written {
            if source.linktype != self.header.linktype {
                warn!(
                    "copying linktype {} records from {} into linktype {} file {}",
                    source.linktype,
                    reader.name(),
                    self.header.linktype,
                    self.filename
                );
            }
        } else {
            // the header is not out yet, so it can still fit the source
            if source.linktype != self.header.linktype {
                debug!(
                    "{} adopts linktype {} from {}",
                    self.filename,
                    source.linktype,
                    reader.name()
                );
                self.header.linktype = source.linktype;
            }
            self.header.snaplen = self.header.snaplen.max(source.snaplen);
        }
        let resolution = source.resolution();
        let mut count = 0;
        while let Some(record) = reader.next_record()? {
            self.write_record(&record, resolution)?;
            count += 1;
        }
        debug!(
            "copied {} records from {} into {}",
            count,
            reader.name(),
            self.filename
        );
        Ok(count)
    }
    /// Resolve the descriptor of `obj`; a plain descriptor is returned as is.
    pub fn getfileno<T: HasDescriptor + ?Sized>(obj: &T) -> Result<Descriptor> {
        obj.descriptor().ok_or_else(|| PcaptureError::Unsupported {
            what: String::from("object has no file descriptor"),
        })
    }
    pub fn fileno(&self) -> Result<Descriptor> {
        match &self.sink {
            Some(sink) => sink.descriptor().ok_or_else(|| PcaptureError::Unsupported {
                what: format!("'{}' has no file descriptor", self.filename),
            }),
            None => Err(PcaptureError::Closed {
                name: self.filename.clone(),
            }),
        }
    }
    pub fn name(&self) -> &str {
        &self.filename
    }
    pub fn filename(&self) -> &str {
        &self.filename
    }
    pub fn mode(&self) -> OpenMode {
        self.mode
    }
    pub fn stream(&self) -> Option<&CaptureSink> {
        self.sink.as_ref()
    }
    pub fn header(&self) -> &FileHeader {
        &self.header
    }
    pub fn records_written(&self) -> u64 {
        self.records_written
    }
    pub fn closed(&self) -> bool {
        self.sink.is_none()
    }
    pub fn set_filename(&mut self, _filename: &str) -> Result<()> {
        Err(PcaptureError::Immutable {
            attribute: "filename",
        })
    }
    pub fn set_mode(&mut self, _mode: &str) -> Result<()> {
        Err(PcaptureError::Immutable { attribute: "mode" })
    }
    /// `closed` only changes through [`PcapWriter::close`].
    pub fn set_closed(&mut self, _closed: bool) -> Result<()> {
        Err(PcaptureError::Immutable {
            attribute: "closed",
        })
    }
    pub fn flush(&mut self) -> Result<()> {
        let result = self.usable_sink()?.flush();
        result.map_err(|e| self.sink_failed(e))
    }
    /// Flush and release the sink. The sink is released even if the final
    /// flush fails; later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        let result = self.ensure_header().and_then(|_| self.flush());
        self.sink = None;
        debug!(
            "closed pcap writer on {} after {} records",
            self.filename, self.records_written
        );
        result
    }
}

impl HasDescriptor for PcapWriter {
    fn descriptor(&self) -> Option<Descriptor> {
        self.sink.as_ref().and_then(|s| s.descriptor())
    }
}

impl Drop for PcapWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing {} on drop failed: {}", self.filename, e);
        }
    }
}
