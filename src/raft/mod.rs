//! The consensus core: a Raft replicated log with a leader-lease extension
//! that lets the leader serve linearizable reads without a quorum round-trip
//! per request.

pub mod client;
pub mod log;
pub mod message;
pub mod node;
pub mod state;
pub mod timer;
pub mod transport;

pub use node::{Event, Node};
pub use transport::PeerTransport;

use std::time::Duration;

/// Unique node identifier, assigned by the cluster configuration file.
pub type NodeId = u64;

/// The interval between leader heartbeats. Strictly less than the election
/// timeout floor so a healthy leader always beats follower elections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// The minimum election timeout.
pub const ELECTION_TIMEOUT_MIN: Duration = Duration::from_secs(10);

/// The maximum election timeout.
pub const ELECTION_TIMEOUT_MAX: Duration = Duration::from_secs(20);

/// How long a leader's lease lasts without quorum renewal. Known a priori to
/// every node; at most the election timeout floor, so a stale leader cannot
/// outlive a partitioned majority's patience.
pub const LEASE_DURATION: Duration = Duration::from_secs(7);
