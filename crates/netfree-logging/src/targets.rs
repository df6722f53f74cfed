//! Tracing targets routed to their own log files or filtered separately.

/// Capture producer thread; also written to `capture.log`
pub const T_CAPTURE: &str = "netfree::capture";
/// Ranking queue mutations
pub const T_QUEUE: &str = "netfree::queue";
/// Spoof/probe loop
pub const T_SPOOF: &str = "netfree::spoof";
