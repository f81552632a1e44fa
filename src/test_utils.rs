use crate::pcap::FileHeader;
use crate::pcap::PcapFormat;
use crate::pcap::RecordHeader;
use crate::pcap::encode_header;
use crate::pcap::encode_record;

/// An in-memory trace of `count` records, record `i` carrying `i % 64`
/// payload bytes of value `i as u8` and a timestamp of `i` seconds plus
/// `i * 1001` fractional units.
pub fn build_pcap(format: PcapFormat, count: usize) -> Vec<u8> {
    let header = FileHeader::new(format, 65535, 1);
    let mut buf = encode_header(&header);
    for i in 0..count {
        let payload = vec![i as u8; i % 64];
        let record = RecordHeader {
            ts_sec: i as u32,
            ts_frac: i as u32 * 1001,
            captured_packet_length: payload.len() as u32,
            original_packet_length: payload.len() as u32,
        };
        buf.extend(encode_record(&header, &record, &payload));
    }
    buf
}
