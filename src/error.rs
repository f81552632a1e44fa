use thiserror::Error;

#[derive(Error, Debug)]
pub enum PcaptureError {
    #[error("invalid pcap {field} at offset {offset}: {reason}")]
    Format {
        field: &'static str,
        offset: u64,
        reason: String,
    },
    #[error(
        "truncated record #{index} at offset {offset}: declared {declared} bytes, only {available} available"
    )]
    TruncatedRecord {
        index: u64,
        offset: u64,
        declared: u64,
        available: u64,
    },
    #[error("unsupported open mode '{mode}': {reason}")]
    Mode { mode: String, reason: String },
    #[error("operation on closed stream '{name}'")]
    Closed { name: String },
    #[error("attribute '{attribute}' is read-only")]
    Immutable { attribute: &'static str },
    #[error("unsupported operation: {what}")]
    Unsupported { what: String },
    #[error("could not open '{target}': {e}")]
    ResourceOpen { target: String, e: String },
    #[error("permission denied: {e}")]
    Permission { e: String },
    #[error("write to '{name}' failed: {e}")]
    SinkWrite { name: String, e: std::io::Error },
    #[error("can not {op} a capture session in state {state}")]
    SessionState { state: String, op: &'static str },
    #[error("invalid capture config {field}: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: &'static str,
    },
    #[error("unhandled channel type")]
    UnhandledChannelType,
    #[error("unable to create channel: {e}")]
    UnableCreateChannel { e: String },
    #[error("unable to found interface: {i}")]
    UnableFoundInterface { i: String },
    #[error("capture the packet error: {e}")]
    CapturePacketError { e: String },
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
}
