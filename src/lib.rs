use std::result;

pub mod capture;
pub mod device;
pub mod error;
pub mod pcap;
pub mod reader;
pub mod stream;
pub mod writer;

#[cfg(test)]
mod test_utils;

pub use capture::CaptureConfig;
pub use capture::CaptureStats;
pub use capture::LiveCaptureSession;
pub use capture::SessionState;
pub use device::DeviceDescriptor;
pub use device::DeviceFlag;
pub use device::find_all_devices;
pub use error::PcaptureError;
pub use pcap::FileHeader;
pub use pcap::LinkType;
pub use pcap::PacketRecord;
pub use pcap::PcapByteOrder;
pub use pcap::PcapFormat;
pub use pcap::RecordHeader;
pub use pcap::TsResolution;
pub use reader::PcapReader;
pub use stream::CaptureSink;
pub use stream::CaptureSource;
pub use stream::Descriptor;
pub use stream::HasDescriptor;
pub use stream::OpenMode;
pub use writer::PcapWriter;

pub static DEFAULT_BUFFER_SIZE: usize = 65535;
pub static DEFAULT_TIMEOUT_MS: u64 = 1000;
pub static DEFAULT_SNAPLEN: u32 = 65535;

pub type Result<T, E = error::PcaptureError> = result::Result<T, E>;
