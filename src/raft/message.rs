use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::raft::log::LogEntry;
use crate::raft::NodeId;

/// A peer-to-peer protocol message.
///
/// Messages are independent, one-way, and carry no session: a vote or log
/// reply is its own message back to the sender, not a transport-level
/// response. Duplicates and reordering are tolerated by the protocol, so the
/// transport never retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A candidate soliciting a vote for `term`.
    VoteRequest { candidate: NodeId, term: u64, log_length: u64, last_log_term: u64 },
    /// A voter's decision. `lease_remaining` is the voter's view of any
    /// outstanding leader lease, reported on grants and denials alike so a
    /// future leader learns the upper bound either way.
    VoteResponse { voter: NodeId, term: u64, granted: bool, lease_remaining: Duration },
    /// Replication from the leader: everything after the follower's assumed
    /// prefix, plus the leader's commit watermark and remaining lease.
    LogRequest {
        leader: NodeId,
        term: u64,
        prefix_len: u64,
        prefix_term: u64,
        leader_commit: u64,
        suffix: Vec<LogEntry>,
        lease_remaining: Duration,
    },
    /// A follower's replication outcome. On success `ack` is the follower's
    /// new log length; on rejection it is 0 and the leader backs off.
    LogResponse { follower: NodeId, term: u64, ack: u64, success: bool },
    /// A client write forwarded from a follower to the leader.
    Forward { origin: NodeId, term: u64, command: String },
}

/// A request on the client surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    Get { key: String },
    Set { key: String, value: String },
}

/// A reply on the client surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientResponse {
    /// The leader found the key (`1 value`).
    Found { value: String },
    /// The leader accepted the write (`1`).
    Accepted,
    /// The key does not exist at the leader (`2`).
    NotFound,
    /// This node is not the leader (`0 leaderId-or-none`).
    NotLeader { leader: Option<NodeId> },
}

impl std::fmt::Display for ClientResponse {
    /// The numeric reply codes of the client surface.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientResponse::Found { value } => write!(f, "1 {}", value),
            ClientResponse::Accepted => write!(f, "1"),
            ClientResponse::NotFound => write!(f, "2"),
            ClientResponse::NotLeader { leader: Some(id) } => write!(f, "0 {}", id),
            ClientResponse::NotLeader { leader: None } => write!(f, "0 None"),
        }
    }
}

/// The connection-level envelope. Peers fire `Peer` frames and never read;
/// clients send a `Client` frame and read back exactly one `Reply`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Peer(Message),
    Client(ClientRequest),
    Reply(ClientResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_codes() {
        assert_eq!(ClientResponse::Found { value: "7".into() }.to_string(), "1 7");
        assert_eq!(ClientResponse::Accepted.to_string(), "1");
        assert_eq!(ClientResponse::NotFound.to_string(), "2");
        assert_eq!(ClientResponse::NotLeader { leader: Some(3) }.to_string(), "0 3");
        assert_eq!(ClientResponse::NotLeader { leader: None }.to_string(), "0 None");
    }

    #[test]
    fn messages_roundtrip_through_bincode() {
        let msg = Message::LogRequest {
            leader: 0,
            term: 3,
            prefix_len: 2,
            prefix_term: 2,
            leader_commit: 2,
            suffix: vec![LogEntry::new(3, "SET x 1")],
            lease_remaining: Duration::from_millis(3500),
        };
        let bytes = bincode::serialize(&Frame::Peer(msg.clone())).unwrap();
        let decoded: Frame = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, Frame::Peer(msg));
    }
}
