#![deny(unsafe_op_in_unsafe_fn)]
#[cfg(not(target_os = "linux"))]
compile_error!("netfree-core needs Linux: it captures with AF_PACKET and changes MACs with ioctls.");

pub mod app;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod probe;
pub mod queue;
pub mod scanner;
pub mod signals;
pub mod spoof;

pub use cancel::{CancelFlag, CancelledError};
pub use cli::Cli;
pub use config::NetfreeConfig;
pub use probe::{ConnectivityProbe, HttpProbe};
pub use queue::{
    MacEntry, PriorityMacQueue, QueueError, ScoreWeights, NETFREE_MIN_ADDRESSES, REVCOUNT_WEIGHT,
    TIMEDELTA_WEIGHT,
};
pub use scanner::{observe_frame, ExclusionSet, ScanReport, Scanner};
pub use spoof::{
    AcceptFirst, CandidateDecider, Decision, MacAssigner, PromptDecider, SpoofConfig, SpoofLoop,
    SpoofOutcome,
};
