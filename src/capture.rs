use log::debug;
use log::info;
use log::warn;
use pnet::datalink;
use pnet::datalink::Channel::Ethernet;
use pnet::datalink::ChannelType;
use pnet::datalink::Config;
use pnet::datalink::DataLinkReceiver;
use serde::Deserialize;
use serde::Serialize;
use std::io::ErrorKind;
use std::time::Duration;
use strum_macros::Display;

use crate::DEFAULT_BUFFER_SIZE;
use crate::DEFAULT_SNAPLEN;
use crate::DEFAULT_TIMEOUT_MS;
use crate::Result;
use crate::error::PcaptureError;
use crate::pcap::FileHeader;
use crate::pcap::LinkType;
use crate::pcap::PcapFormat;
use crate::writer::PcapWriter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub interface_name: String,
    pub output_filename: String,
    /// Capture stops after this many packets.
    pub max_packets: usize,
    pub promiscuous: bool,
    /// Upper bound of a single wait for a packet.
    pub timeout_ms: u64,
    /// Snaplen of the capture and of the output file.
    pub packet_length: u32,
}

impl CaptureConfig {
    pub fn new(interface_name: &str, output_filename: &str, max_packets: usize) -> CaptureConfig {
        CaptureConfig {
            interface_name: interface_name.to_string(),
            output_filename: output_filename.to_string(),
            max_packets,
            promiscuous: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            packet_length: DEFAULT_SNAPLEN,
        }
    }
    pub fn promiscuous(&mut self, promiscuous: bool) -> &mut Self {
        self.promiscuous = promiscuous;
        self
    }
    /// timeout as ms
    pub fn timeout_ms(&mut self, timeout_ms: u64) -> &mut Self {
        self.timeout_ms = timeout_ms;
        self
    }
    pub fn packet_length(&mut self, packet_length: u32) -> &mut Self {
        self.packet_length = packet_length;
        self
    }
    pub fn validate(&self) -> Result<()> {
        if self.max_packets == 0 {
            return Err(PcaptureError::InvalidConfig {
                field: "max_packets",
                reason: "must be > 0",
            });
        }
        if self.timeout_ms == 0 {
            return Err(PcaptureError::InvalidConfig {
                field: "timeout_ms",
                reason: "must be > 0",
            });
        }
        if self.packet_length == 0 {
            return Err(PcaptureError::InvalidConfig {
                field: "packet_length",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Outcome of one wait on a capture handle.
#[derive(Debug, PartialEq, Eq)]
pub enum CapturePoll<'a> {
    Packet(&'a [u8]),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The handle will not deliver any more packets.
    Exhausted,
}

/// A handle bound to one interface.
pub trait CaptureHandle {
    /// Wait at most the configured timeout for the next frame.
    fn next_packet(&mut self) -> Result<CapturePoll<'_>>;
    fn linktype(&self) -> u32 {
        LinkType::ETHERNET.to_u32()
    }
}

/// The platform facility that binds handles to interfaces.
pub trait CaptureFacility {
    type Handle: CaptureHandle;

    fn open(&self, config: &CaptureConfig) -> Result<Self::Handle>;
}

/// Layer 2 capture through `pnet::datalink`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PnetFacility;

pub struct PnetHandle {
    rx: Box<dyn DataLinkReceiver>,
}

impl CaptureFacility for PnetFacility {
    type Handle = PnetHandle;

    fn open(&self, config: &CaptureConfig) -> Result<PnetHandle> {
        let interface = match datalink::interfaces()
            .into_iter()
            .find(|i| i.name == config.interface_name)
        {
            Some(i) => i,
            None => {
                return Err(PcaptureError::UnableFoundInterface {
                    i: config.interface_name.clone(),
                });
            }
        };
        let timeout = Duration::from_millis(config.timeout_ms);
        let buffer_size = DEFAULT_BUFFER_SIZE.max(config.packet_length as usize);
        let dl_config = Config {
            write_buffer_size: buffer_size,
            read_buffer_size: buffer_size,
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            channel_type: ChannelType::Layer2,
            promiscuous: config.promiscuous,
            ..Default::default()
        };
        match datalink::channel(&interface, dl_config) {
            Ok(Ethernet(_tx, rx)) => Ok(PnetHandle { rx }),
            Ok(_) => Err(PcaptureError::UnhandledChannelType),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(PcaptureError::Permission {
                e: format!("capture on {}: {}", interface.name, e),
            }),
            Err(e) => Err(PcaptureError::UnableCreateChannel { e: e.to_string() }),
        }
    }
}

impl CaptureHandle for PnetHandle {
    fn next_packet(&mut self) -> Result<CapturePoll<'_>> {
        match self.rx.next() {
            Ok(data) => Ok(CapturePoll::Packet(data)),
            Err(e)
                if e.kind() == ErrorKind::TimedOut
                    || e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::Interrupted =>
            {
                Ok(CapturePoll::Timeout)
            }
            Err(e) => Err(PcaptureError::CapturePacketError { e: e.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Configured,
    Opened,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub packets: u64,
    pub timeouts: u64,
    /// Set when a capture error ended the run before `max_packets`.
    pub early_stop: Option<String>,
}

/// A single-use, bounded capture from one interface into one pcap file.
/// ```rust,no_run
/// use pcapio::CaptureConfig;
/// use pcapio::LiveCaptureSession;
///
/// fn main() {
///     let mut config = CaptureConfig::new("ens33", "test.pcap", 5);
///     config.promiscuous(true).timeout_ms(500);
///     let mut session = LiveCaptureSession::new(config).unwrap();
///     let stats = session.run().unwrap();
///     println!("captured {} packets", stats.packets);
/// }
/// ```
pub struct LiveCaptureSession<F: CaptureFacility = PnetFacility> {
    config: CaptureConfig,
    facility: F,
    state: SessionState,
    handle: Option<F::Handle>,
    writer: Option<PcapWriter>,
    packets_captured: u64,
}

impl LiveCaptureSession<PnetFacility> {
    pub fn new(config: CaptureConfig) -> Result<LiveCaptureSession<PnetFacility>> {
        Self::with_facility(config, PnetFacility)
    }
}

impl<F: CaptureFacility> LiveCaptureSession<F> {
    pub fn with_facility(config: CaptureConfig, facility: F) -> Result<LiveCaptureSession<F>> {
        config.validate()?;
        Ok(LiveCaptureSession {
            config,
            facility,
            state: SessionState::Configured,
            handle: None,
            writer: None,
            packets_captured: 0,
        })
    }
    /// Bind the interface and create the output file.
    pub fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Configured {
            return Err(PcaptureError::SessionState {
                state: self.state.to_string(),
                op: "open",
            });
        }
        let handle = self.facility.open(&self.config)?;
        let header = FileHeader::new(
            PcapFormat::default(),
            self.config.packet_length,
            handle.linktype(),
        );
        // the handle is dropped, and so released, if the output can not be opened
        let writer = PcapWriter::with_header(&self.config.output_filename, header)?;
        info!(
            "capture opened on {} into {} (promiscuous: {}, snaplen: {})",
            self.config.interface_name,
            self.config.output_filename,
            self.config.promiscuous,
            self.config.packet_length
        );
        self.handle = Some(handle);
        self.writer = Some(writer);
        self.state = SessionState::Opened;
        Ok(())
    }
    /// Capture until `max_packets` were written or the handle is exhausted,
    /// then stop the session. A capture error ends the loop early but keeps
    /// what was already written.
    pub fn run(&mut self) -> Result<CaptureStats> {
        match self.state {
            SessionState::Configured => self.open()?,
            SessionState::Opened => (),
            state => {
                return Err(PcaptureError::SessionState {
                    state: state.to_string(),
                    op: "run",
                });
            }
        }
        self.state = SessionState::Running;
        let result = self.capture_loop();
        let stopped = self.stop();
        let stats = result?;
        stopped?;
        info!(
            "capture on {} finished: {} packets, {} timeouts",
            self.config.interface_name, stats.packets, stats.timeouts
        );
        Ok(stats)
    }
    fn capture_loop(&mut self) -> Result<CaptureStats> {
        let (handle, writer) = match (self.handle.as_mut(), self.writer.as_mut()) {
            (Some(h), Some(w)) => (h, w),
            _ => {
                return Err(PcaptureError::SessionState {
                    state: self.state.to_string(),
                    op: "run",
                });
            }
        };
        let mut stats = CaptureStats::default();
        while stats.packets < self.config.max_packets as u64 {
            match handle.next_packet() {
                Ok(CapturePoll::Packet(data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    writer.write(data)?;
                    stats.packets += 1;
                    self.packets_captured += 1;
                }
                Ok(CapturePoll::Timeout) => stats.timeouts += 1,
                Ok(CapturePoll::Exhausted) => {
                    debug!("{} has no more packets", self.config.interface_name);
                    break;
                }
                Err(e) => {
                    warn!(
                        "capture on {} stopped after {} packets: {}",
                        self.config.interface_name, stats.packets, e
                    );
                    stats.early_stop = Some(e.to_string());
                    break;
                }
            }
        }
        Ok(stats)
    }
    /// Release the handle and close the output. Later calls do nothing.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        self.handle = None;
        let result = match self.writer.take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        };
        self.state = SessionState::Stopped;
        debug!("capture session on {} stopped", self.config.interface_name);
        result
    }
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
    pub fn interface_name(&self) -> &str {
        &self.config.interface_name
    }
    pub fn output_filename(&self) -> &str {
        &self.config.output_filename
    }
    pub fn max_packets(&self) -> usize {
        self.config.max_packets
    }
    pub fn promiscuous(&self) -> bool {
        self.config.promiscuous
    }
    pub fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }
    pub fn packet_length(&self) -> u32 {
        self.config.packet_length
    }
    pub fn state(&self) -> SessionState {
        self.state
    }
    pub fn packets_captured(&self) -> u64 {
        self.packets_captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::PcapReader;
    use std::collections::VecDeque;
    use std::path::Path;
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    enum Event {
        Packet(Vec<u8>),
        Timeout,
        Fail,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeFacility {
        script: Vec<Event>,
        linktype: u32,
        missing: bool,
        denied: bool,
    }

    struct FakeHandle {
        script: VecDeque<Event>,
        current: Vec<u8>,
        linktype: u32,
    }

    impl CaptureFacility for FakeFacility {
        type Handle = FakeHandle;

        fn open(&self, config: &CaptureConfig) -> Result<FakeHandle> {
            if self.missing {
                return Err(PcaptureError::UnableFoundInterface {
                    i: config.interface_name.clone(),
                });
            }
            if self.denied {
                return Err(PcaptureError::Permission {
                    e: String::from("operation not permitted"),
                });
            }
            Ok(FakeHandle {
                script: self.script.iter().cloned().collect(),
                current: Vec::new(),
                linktype: self.linktype,
            })
        }
    }

    impl CaptureHandle for FakeHandle {
        fn next_packet(&mut self) -> Result<CapturePoll<'_>> {
            match self.script.pop_front() {
                Some(Event::Packet(data)) => {
                    self.current = data;
                    Ok(CapturePoll::Packet(&self.current))
                }
                Some(Event::Timeout) => Ok(CapturePoll::Timeout),
                Some(Event::Fail) => Err(PcaptureError::CapturePacketError {
                    e: String::from("network is down"),
                }),
                None => Ok(CapturePoll::Exhausted),
            }
        }
        fn linktype(&self) -> u32 {
            self.linktype
        }
    }

    fn packets(n: usize) -> Vec<Event> {
        (0..n).map(|i| Event::Packet(vec![i as u8; 60])).collect()
    }

    fn facility(script: Vec<Event>) -> FakeFacility {
        FakeFacility {
            script,
            linktype: 1,
            ..Default::default()
        }
    }

    fn count_records(path: &Path) -> u64 {
        PcapReader::open(path).unwrap().read().unwrap()
    }

    fn session(
        dir: &TempDir,
        max_packets: usize,
        facility: FakeFacility,
    ) -> LiveCaptureSession<FakeFacility> {
        let output = dir.path().join("cap.pcap");
        let config = CaptureConfig::new("lo", &output.to_string_lossy(), max_packets);
        LiveCaptureSession::with_facility(config, facility).unwrap()
    }

    #[test]
    fn config_defaults() {
        let mut config = CaptureConfig::new("lo", "foo.pcap", 10000);
        assert_eq!(config.interface_name, "lo");
        assert_eq!(config.output_filename, "foo.pcap");
        assert_eq!(config.max_packets, 10000);
        assert!(!config.promiscuous);
        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(config.packet_length, 65535);
        config.promiscuous(true).timeout_ms(10).packet_length(128);
        assert!(config.promiscuous);
        assert_eq!(config.timeout_ms, 10);
        assert_eq!(config.packet_length, 128);
    }
    #[test]
    fn invalid_config() {
        let config = CaptureConfig::new("lo", "foo.pcap", 0);
        assert!(matches!(
            LiveCaptureSession::with_facility(config, facility(vec![])),
            Err(PcaptureError::InvalidConfig {
                field: "max_packets",
                ..
            })
        ));
        let mut config = CaptureConfig::new("lo", "foo.pcap", 1);
        config.timeout_ms(0);
        assert!(config.validate().is_err());
    }
    #[test]
    fn stops_at_max_packets() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, 3, facility(packets(5)));
        assert_eq!(s.state(), SessionState::Configured);
        let stats = s.run().unwrap();
        assert_eq!(stats.packets, 3);
        assert_eq!(stats.early_stop, None);
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(s.packets_captured(), 3);
        assert_eq!(count_records(Path::new(s.output_filename())), 3);
    }
    #[test]
    fn timeouts_are_retried() {
        let dir = TempDir::new().unwrap();
        let script = vec![
            Event::Timeout,
            Event::Packet(vec![1; 10]),
            Event::Timeout,
            Event::Packet(vec![2; 10]),
        ];
        let mut s = session(&dir, 2, facility(script));
        let stats = s.run().unwrap();
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.timeouts, 2);
    }
    #[test]
    fn ends_when_source_exhausted() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, 10, facility(packets(2)));
        let stats = s.run().unwrap();
        assert_eq!(stats.packets, 2);
        assert_eq!(count_records(Path::new(s.output_filename())), 2);
    }
    #[test]
    fn transient_error_keeps_written_packets() {
        let dir = TempDir::new().unwrap();
        let mut script = packets(2);
        script.push(Event::Fail);
        script.extend(packets(3));
        let mut s = session(&dir, 10, facility(script));
        let stats = s.run().unwrap();
        assert_eq!(stats.packets, 2);
        assert!(stats.early_stop.unwrap().contains("network is down"));
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(count_records(Path::new(s.output_filename())), 2);
    }
    #[test]
    fn missing_interface_is_fatal_at_open() {
        let dir = TempDir::new().unwrap();
        let fake = FakeFacility {
            missing: true,
            ..Default::default()
        };
        let mut s = session(&dir, 1, fake);
        assert!(matches!(
            s.open(),
            Err(PcaptureError::UnableFoundInterface { .. })
        ));
        assert_eq!(s.state(), SessionState::Configured);
        assert!(!Path::new(s.output_filename()).exists());
    }
    #[test]
    fn permission_denied_at_open() {
        let dir = TempDir::new().unwrap();
        let fake = FakeFacility {
            denied: true,
            ..Default::default()
        };
        let mut s = session(&dir, 1, fake);
        assert!(matches!(s.run(), Err(PcaptureError::Permission { .. })));
    }
    #[test]
    fn unopenable_output_is_fatal() {
        let config = CaptureConfig::new("lo", "", 1);
        let mut s = LiveCaptureSession::with_facility(config, facility(packets(1))).unwrap();
        assert!(matches!(
            s.open(),
            Err(PcaptureError::ResourceOpen { .. })
        ));
        assert_eq!(s.state(), SessionState::Configured);
    }
    #[test]
    fn single_use() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, 1, facility(packets(1)));
        s.open().unwrap();
        assert_eq!(s.state(), SessionState::Opened);
        assert!(matches!(
            s.open(),
            Err(PcaptureError::SessionState { op: "open", .. })
        ));
        s.run().unwrap();
        s.stop().unwrap();
        assert!(matches!(
            s.open(),
            Err(PcaptureError::SessionState { .. })
        ));
        assert!(matches!(
            s.run(),
            Err(PcaptureError::SessionState { op: "run", .. })
        ));
    }
    #[test]
    fn snaplen_and_linktype_reach_the_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("sll.pcap");
        let mut config = CaptureConfig::new("any", &output.to_string_lossy(), 1);
        config.packet_length(10);
        let fake = FakeFacility {
            script: vec![Event::Packet(vec![7; 100])],
            linktype: 113,
            ..Default::default()
        };
        let mut s = LiveCaptureSession::with_facility(config, fake).unwrap();
        s.run().unwrap();
        let mut reader = PcapReader::open(&output).unwrap();
        assert_eq!(reader.header().linktype, 113);
        assert_eq!(reader.header().snaplen, 10);
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.header.captured_packet_length, 10);
        assert_eq!(record.header.original_packet_length, 100);
    }
    #[test]
    fn pnet_unknown_interface() {
        let config = CaptureConfig::new("pcapio-no-such-if0", "unused.pcap", 1);
        let mut s = LiveCaptureSession::new(config).unwrap();
        assert!(matches!(
            s.open(),
            Err(PcaptureError::UnableFoundInterface { .. })
        ));
        assert!(!Path::new("unused.pcap").exists());
    }
}
