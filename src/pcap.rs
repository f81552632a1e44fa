use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::io;
use std::io::Write;
use strum::IntoEnumIterator;
use strum_macros::Display;
use strum_macros::EnumIter;
use strum_macros::EnumString;

use crate::DEFAULT_SNAPLEN;
use crate::Result;
use crate::error::PcaptureError;

/// Size of the encoded global header.
pub const FILE_HEADER_LEN: usize = 24;
/// Size of the encoded per-record header.
pub const RECORD_HEADER_LEN: usize = 16;
/// Magic for files whose record timestamps carry microseconds.
pub const MAGIC_MICRO: u32 = 0xa1b2c3d4;
/// Magic for files whose record timestamps carry nanoseconds.
pub const MAGIC_NANO: u32 = 0xa1b23c4d;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcapByteOrder {
    BigEndian,
    LittleEndian,
}

/// Unit of the fractional part of a record timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum TsResolution {
    #[strum(serialize = "microsecond")]
    Micro,
    #[strum(serialize = "nanosecond")]
    Nano,
}

impl TsResolution {
    pub fn magic(self) -> u32 {
        match self {
            TsResolution::Micro => MAGIC_MICRO,
            TsResolution::Nano => MAGIC_NANO,
        }
    }
    /// Number of fractional units in one second.
    pub fn units_per_sec(self) -> u32 {
        match self {
            TsResolution::Micro => 1_000_000,
            TsResolution::Nano => 1_000_000_000,
        }
    }
}

/// The four encodings a pcap file can use, one per known magic pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum PcapFormat {
    #[default]
    LittleEndianMicro,
    BigEndianMicro,
    LittleEndianNano,
    BigEndianNano,
}

impl PcapFormat {
    pub fn new(pbo: PcapByteOrder, resolution: TsResolution) -> PcapFormat {
        let big = pbo == PcapByteOrder::BigEndian;
        match (big, resolution) {
            (false, TsResolution::Micro) => PcapFormat::LittleEndianMicro,
            (true, TsResolution::Micro) => PcapFormat::BigEndianMicro,
            (false, TsResolution::Nano) => PcapFormat::LittleEndianNano,
            (true, TsResolution::Nano) => PcapFormat::BigEndianNano,
        }
    }
    /// Match the leading four bytes of a file against the known magic patterns.
    pub fn detect(magic: [u8; 4]) -> Option<PcapFormat> {
        match magic {
            [0xd4, 0xc3, 0xb2, 0xa1] => Some(PcapFormat::LittleEndianMicro),
            [0xa1, 0xb2, 0xc3, 0xd4] => Some(PcapFormat::BigEndianMicro),
            [0x4d, 0x3c, 0xb2, 0xa1] => Some(PcapFormat::LittleEndianNano),
            [0xa1, 0xb2, 0x3c, 0x4d] => Some(PcapFormat::BigEndianNano),
            _ => None,
        }
    }
    pub fn byte_order(self) -> PcapByteOrder {
        match self {
            PcapFormat::LittleEndianMicro | PcapFormat::LittleEndianNano => {
                PcapByteOrder::LittleEndian
            }
            PcapFormat::BigEndianMicro | PcapFormat::BigEndianNano => PcapByteOrder::BigEndian,
        }
    }
    pub fn resolution(self) -> TsResolution {
        match self {
            PcapFormat::LittleEndianMicro | PcapFormat::BigEndianMicro => TsResolution::Micro,
            PcapFormat::LittleEndianNano | PcapFormat::BigEndianNano => TsResolution::Nano,
        }
    }
    pub fn magic_bytes(self) -> [u8; 4] {
        let magic = self.resolution().magic();
        match self.byte_order() {
            PcapByteOrder::BigEndian => magic.to_be_bytes(),
            PcapByteOrder::LittleEndian => magic.to_le_bytes(),
        }
    }
}

/// Common link-layer type codes. Files may carry codes outside this list,
/// so headers keep the raw value and this is only a typed view of it.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, Serialize, Deserialize)]
pub enum LinkType {
    NULL = 0,
    ETHERNET = 1,
    IEEE8025 = 6,
    PPP = 9,
    FDDI = 10,
    RAW = 101,
    IEEE80211 = 105,
    LOOP = 108,
    LINUXSLL = 113,
    PFLOG = 117,
    IEEE80211RADIOTAP = 127,
    USBLINUX = 189,
    IPV4 = 228,
    IPV6 = 229,
    NFLOG = 239,
    NETLINK = 253,
    LINUXSLL2 = 276,
}

impl LinkType {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
    pub fn from_u32(value: u32) -> Option<Self> {
        LinkType::iter().find(|&e| e as u32 == value)
    }
}

// File Header
// from https://www.ietf.org/archive/id/draft-gharris-opsawg-pcap-01.html#name-file-header
//
//  0 | Magic Number                                                  |
//  4 | Major Version                 | Minor Version                 |
//  8 | This Zone (GMT offset, signed)                                |
// 12 | Sigfigs                                                       |
// 16 | SnapLen                                                       |
// 20 | LinkType                                                      |

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Byte order and timestamp unit, selected by the magic number.
    pub format: PcapFormat,
    pub major_version: u16,
    pub minor_version: u16,
    /// GMT to local correction in seconds, in practice always 0.
    pub thiszone: i32,
    /// Accuracy of timestamps, in practice always 0.
    pub sigfigs: u32,
    /// Maximum number of octets stored for each packet.
    pub snaplen: u32,
    /// Raw link-layer type code, see [`LinkType`].
    pub linktype: u32,
}

impl Default for FileHeader {
    fn default() -> Self {
        FileHeader {
            format: PcapFormat::default(),
            major_version: 2,
            minor_version: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: DEFAULT_SNAPLEN,
            linktype: LinkType::ETHERNET.to_u32(),
        }
    }
}

impl FileHeader {
    pub fn new(format: PcapFormat, snaplen: u32, linktype: u32) -> FileHeader {
        FileHeader {
            format,
            snaplen,
            linktype,
            ..Default::default()
        }
    }
    pub fn resolution(&self) -> TsResolution {
        self.format.resolution()
    }
    pub fn link_type(&self) -> Option<LinkType> {
        LinkType::from_u32(self.linktype)
    }
    pub fn decode(bytes: &[u8]) -> Result<FileHeader> {
        if bytes.len() < FILE_HEADER_LEN {
            return Err(PcaptureError::Format {
                field: "file header",
                offset: bytes.len() as u64,
                reason: format!(
                    "need {} bytes, got {}",
                    FILE_HEADER_LEN,
                    bytes.len()
                ),
            });
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let format = match PcapFormat::detect(magic) {
            Some(f) => f,
            None => {
                return Err(PcaptureError::Format {
                    field: "magic number",
                    offset: 0,
                    reason: format!("unrecognized bytes {:02x?}", magic),
                });
            }
        };
        let rest = &bytes[4..FILE_HEADER_LEN];
        let header = match format.byte_order() {
            PcapByteOrder::BigEndian => Self::read_fields::<BigEndian>(format, rest)?,
            PcapByteOrder::LittleEndian => Self::read_fields::<LittleEndian>(format, rest)?,
        };
        Ok(header)
    }
    fn read_fields<B: ByteOrder>(format: PcapFormat, mut rest: &[u8]) -> io::Result<FileHeader> {
        Ok(FileHeader {
            format,
            major_version: rest.read_u16::<B>()?,
            minor_version: rest.read_u16::<B>()?,
            thiszone: rest.read_i32::<B>()?,
            sigfigs: rest.read_u32::<B>()?,
            snaplen: rest.read_u32::<B>()?,
            linktype: rest.read_u32::<B>()?,
        })
    }
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_LEN] {
        match self.format.byte_order() {
            PcapByteOrder::BigEndian => self.fill_fields::<BigEndian>(),
            PcapByteOrder::LittleEndian => self.fill_fields::<LittleEndian>(),
        }
    }
    fn fill_fields<B: ByteOrder>(&self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.format.magic_bytes());
        B::write_u16(&mut buf[4..6], self.major_version);
        B::write_u16(&mut buf[6..8], self.minor_version);
        B::write_i32(&mut buf[8..12], self.thiszone);
        B::write_u32(&mut buf[12..16], self.sigfigs);
        B::write_u32(&mut buf[16..20], self.snaplen);
        B::write_u32(&mut buf[20..24], self.linktype);
        buf
    }
    pub fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

// Packet Record
// from https://www.ietf.org/archive/id/draft-gharris-opsawg-pcap-01.html#name-packet-record
//
//  0 | Timestamp (Seconds)                                           |
//  4 | Timestamp (Microseconds or nanoseconds)                       |
//  8 | Captured Packet Length                                        |
// 12 | Original Packet Length                                        |
// 16 / Packet Data (Captured Packet Length octets)                   /

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordHeader {
    pub ts_sec: u32,
    /// Fraction of a second, in the unit of the owning file header.
    pub ts_frac: u32,
    /// Number of octets stored in the file for this packet.
    pub captured_packet_length: u32,
    /// Length of the packet on the wire.
    pub original_packet_length: u32,
}

impl RecordHeader {
    /// A header stamped with the current wall-clock time.
    pub fn now(resolution: TsResolution, captured: u32, original: u32) -> RecordHeader {
        let now = Utc::now();
        let ts_frac = match resolution {
            TsResolution::Micro => now.timestamp_subsec_micros().min(999_999),
            TsResolution::Nano => now.timestamp_subsec_nanos().min(999_999_999),
        };
        RecordHeader {
            // u32 is what the pcap format defines
            ts_sec: now.timestamp() as u32,
            ts_frac,
            captured_packet_length: captured,
            original_packet_length: original,
        }
    }
    pub fn decode(bytes: &[u8], header: &FileHeader) -> Result<RecordHeader> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(PcaptureError::TruncatedRecord {
                index: 0,
                offset: 0,
                declared: RECORD_HEADER_LEN as u64,
                available: bytes.len() as u64,
            });
        }
        let rest = &bytes[..RECORD_HEADER_LEN];
        let record = match header.format.byte_order() {
            PcapByteOrder::BigEndian => Self::read_fields::<BigEndian>(rest)?,
            PcapByteOrder::LittleEndian => Self::read_fields::<LittleEndian>(rest)?,
        };
        Ok(record)
    }
    fn read_fields<B: ByteOrder>(mut rest: &[u8]) -> io::Result<RecordHeader> {
        Ok(RecordHeader {
            ts_sec: rest.read_u32::<B>()?,
            ts_frac: rest.read_u32::<B>()?,
            captured_packet_length: rest.read_u32::<B>()?,
            original_packet_length: rest.read_u32::<B>()?,
        })
    }
    pub fn write<W: Write>(&self, w: &mut W, pbo: PcapByteOrder) -> io::Result<()> {
        w.write_all(&self.to_bytes(pbo))
    }
    pub fn to_bytes(&self, pbo: PcapByteOrder) -> [u8; RECORD_HEADER_LEN] {
        match pbo {
            PcapByteOrder::BigEndian => self.fill_fields::<BigEndian>(),
            PcapByteOrder::LittleEndian => self.fill_fields::<LittleEndian>(),
        }
    }
    fn fill_fields<B: ByteOrder>(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        B::write_u32(&mut buf[0..4], self.ts_sec);
        B::write_u32(&mut buf[4..8], self.ts_frac);
        B::write_u32(&mut buf[8..12], self.captured_packet_length);
        B::write_u32(&mut buf[12..16], self.original_packet_length);
        buf
    }
    /// Convert the fractional timestamp between resolutions.
    /// Going to a coarser unit truncates, it never rounds.
    pub fn rescale(self, from: TsResolution, to: TsResolution) -> RecordHeader {
        let ts_frac = match (from, to) {
            (TsResolution::Micro, TsResolution::Nano) => self.ts_frac.saturating_mul(1000),
            (TsResolution::Nano, TsResolution::Micro) => self.ts_frac / 1000,
            _ => self.ts_frac,
        };
        RecordHeader { ts_frac, ..self }
    }
    pub fn timestamp(&self, resolution: TsResolution) -> Option<DateTime<Utc>> {
        let nanos = match resolution {
            TsResolution::Micro => self.ts_frac.checked_mul(1000)?,
            TsResolution::Nano => self.ts_frac,
        };
        DateTime::from_timestamp(self.ts_sec as i64, nanos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub header: RecordHeader,
    /// Packet Data:
    /// The data coming from the network, including link-layer headers.
    /// The actual length of this field is Captured Packet Length.
    pub packet_data: Vec<u8>,
}

impl PacketRecord {
    /// Stamp `packet_data` with the current time, keeping at most `snaplen` bytes.
    pub fn new(resolution: TsResolution, packet_data: &[u8], snaplen: u32) -> PacketRecord {
        let packet_slice = if packet_data.len() > snaplen as usize {
            &packet_data[..snaplen as usize]
        } else {
            packet_data
        };
        let header = RecordHeader::now(
            resolution,
            packet_slice.len() as u32,
            packet_data.len() as u32,
        );
        PacketRecord {
            header,
            packet_data: packet_slice.to_vec(),
        }
    }
    pub fn timestamp(&self, resolution: TsResolution) -> Option<DateTime<Utc>> {
        self.header.timestamp(resolution)
    }
}

/// Decode the 24 byte global header at the start of `bytes`.
pub fn decode_header(bytes: &[u8]) -> Result<FileHeader> {
    FileHeader::decode(bytes)
}

/// Decode one record at the start of `bytes`, returning its header and payload.
pub fn decode_record<'a>(bytes: &'a [u8], header: &FileHeader) -> Result<(RecordHeader, &'a [u8])> {
    let record = RecordHeader::decode(bytes, header)?;
    let declared = record.captured_packet_length as u64;
    let available = (bytes.len() - RECORD_HEADER_LEN) as u64;
    if declared > available {
        return Err(PcaptureError::TruncatedRecord {
            index: 0,
            offset: RECORD_HEADER_LEN as u64,
            declared,
            available,
        });
    }
    let end = RECORD_HEADER_LEN + record.captured_packet_length as usize;
    Ok((record, &bytes[RECORD_HEADER_LEN..end]))
}

pub fn encode_header(header: &FileHeader) -> Vec<u8> {
    header.encode()
}

/// Encode a record in the byte order of `header`. The captured length
/// written is always the payload length.
pub fn encode_record(header: &FileHeader, record: &RecordHeader, payload: &[u8]) -> Vec<u8> {
    let record = RecordHeader {
        captured_packet_length: payload.len() as u32,
        ..*record
    };
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    buf.extend_from_slice(&record.to_bytes(header.format.byte_order()));
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMATS: [PcapFormat; 4] = [
        PcapFormat::LittleEndianMicro,
        PcapFormat::BigEndianMicro,
        PcapFormat::LittleEndianNano,
        PcapFormat::BigEndianNano,
    ];

    #[test]
    fn header_roundtrip_all_formats() {
        for format in FORMATS {
            let header = FileHeader {
                format,
                major_version: 2,
                minor_version: 4,
                thiszone: -3600,
                sigfigs: 7,
                snaplen: 262144,
                linktype: 4242,
            };
            let bytes = encode_header(&header);
            assert_eq!(bytes.len(), FILE_HEADER_LEN);
            assert_eq!(&bytes[..4], &format.magic_bytes());
            assert_eq!(decode_header(&bytes).unwrap(), header);
        }
    }
    #[test]
    fn magic_patterns() {
        let le_micro = [0xd4, 0xc3, 0xb2, 0xa1];
        let be_nano = [0xa1, 0xb2, 0x3c, 0x4d];
        assert_eq!(
            PcapFormat::detect(le_micro),
            Some(PcapFormat::LittleEndianMicro)
        );
        assert_eq!(PcapFormat::detect(be_nano), Some(PcapFormat::BigEndianNano));
        assert_eq!(PcapFormat::BigEndianNano.resolution(), TsResolution::Nano);
        assert_eq!(
            PcapFormat::new(PcapByteOrder::LittleEndian, TsResolution::Micro),
            PcapFormat::LittleEndianMicro
        );
        for format in FORMATS {
            assert_eq!(PcapFormat::new(format.byte_order(), format.resolution()), format);
        }
    }
    #[test]
    fn bad_magic_names_field() {
        let mut bytes = FileHeader::default().encode();
        bytes[0] = 0x0a;
        match decode_header(&bytes) {
            Err(PcaptureError::Format { field, offset, .. }) => {
                assert_eq!(field, "magic number");
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    #[test]
    fn short_header() {
        let bytes = FileHeader::default().encode();
        match decode_header(&bytes[..10]) {
            Err(PcaptureError::Format { field, offset, .. }) => {
                assert_eq!(field, "file header");
                assert_eq!(offset, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    #[test]
    fn unknown_linktype_is_kept() {
        let header = FileHeader::new(PcapFormat::default(), 65535, 9999);
        let decoded = decode_header(&header.encode()).unwrap();
        assert_eq!(decoded.linktype, 9999);
        assert_eq!(decoded.link_type(), None);
        assert_eq!(
            FileHeader::default().link_type(),
            Some(LinkType::ETHERNET)
        );
    }
    #[test]
    fn streaming_and_buffer_encodings_agree() {
        let record = RecordHeader {
            ts_sec: 0x01020304,
            ts_frac: 5,
            captured_packet_length: 6,
            original_packet_length: 7,
        };
        let mut streamed = Vec::new();
        record.write(&mut streamed, PcapByteOrder::BigEndian).unwrap();
        assert_eq!(streamed, record.to_bytes(PcapByteOrder::BigEndian));
        assert_eq!(&streamed[..4], &[1, 2, 3, 4]);
        assert_eq!(&record.to_bytes(PcapByteOrder::LittleEndian)[..4], &[4, 3, 2, 1]);

        let header = FileHeader::new(PcapFormat::BigEndianNano, 262144, 113);
        let mut streamed = Vec::new();
        header.write(&mut streamed).unwrap();
        assert_eq!(streamed, header.to_bytes());
        assert_eq!(&streamed[16..20], &262144u32.to_be_bytes());
    }
    #[test]
    fn record_roundtrip() {
        for format in FORMATS {
            let header = FileHeader::new(format, 65535, 1);
            for payload in [vec![], vec![0xab; 1], vec![7u8; 1500]] {
                let record = RecordHeader {
                    ts_sec: 1_700_000_000,
                    ts_frac: 999_999,
                    captured_packet_length: payload.len() as u32,
                    original_packet_length: payload.len() as u32 + 10,
                };
                let bytes = encode_record(&header, &record, &payload);
                assert_eq!(bytes.len(), RECORD_HEADER_LEN + payload.len());
                let (decoded, data) = decode_record(&bytes, &header).unwrap();
                assert_eq!(decoded, record);
                assert_eq!(data, &payload[..]);
            }
        }
    }
    #[test]
    fn record_declared_longer_than_bytes() {
        let header = FileHeader::default();
        let record = RecordHeader {
            captured_packet_length: 60,
            original_packet_length: 60,
            ..Default::default()
        };
        let bytes = encode_record(&header, &record, &[1u8; 60]);
        match decode_record(&bytes[..50], &header) {
            Err(PcaptureError::TruncatedRecord {
                declared,
                available,
                ..
            }) => {
                assert_eq!(declared, 60);
                assert_eq!(available, 34);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            decode_record(&bytes[..5], &header),
            Err(PcaptureError::TruncatedRecord { available: 5, .. })
        ));
    }
    #[test]
    fn rescale_micro_to_nano() {
        let r = RecordHeader {
            ts_frac: 123_456,
            ..Default::default()
        };
        let n = r.rescale(TsResolution::Micro, TsResolution::Nano);
        assert_eq!(n.ts_frac, 123_456_000);
    }
    #[test]
    fn rescale_nano_to_micro_truncates() {
        let r = RecordHeader {
            ts_frac: 123_456_999,
            ..Default::default()
        };
        assert_eq!(
            r.rescale(TsResolution::Nano, TsResolution::Micro).ts_frac,
            123_456
        );
        let r = RecordHeader {
            ts_frac: 999,
            ..Default::default()
        };
        assert_eq!(r.rescale(TsResolution::Nano, TsResolution::Micro).ts_frac, 0);
        assert_eq!(r.rescale(TsResolution::Nano, TsResolution::Nano).ts_frac, 999);
    }
    #[test]
    fn packet_record_truncates_to_snaplen() {
        let data = vec![1u8; 100];
        let record = PacketRecord::new(TsResolution::Nano, &data, 64);
        assert_eq!(record.packet_data.len(), 64);
        assert_eq!(record.header.captured_packet_length, 64);
        assert_eq!(record.header.original_packet_length, 100);
        assert!(record.header.ts_frac < TsResolution::Nano.units_per_sec());
        assert!(record.timestamp(TsResolution::Nano).is_some());
    }
    #[test]
    fn timestamp_view() {
        let r = RecordHeader {
            ts_sec: 1,
            ts_frac: 500_000,
            ..Default::default()
        };
        let dt = r.timestamp(TsResolution::Micro).unwrap();
        assert_eq!(dt.timestamp(), 1);
        assert_eq!(dt.timestamp_subsec_micros(), 500_000);
    }
}
