use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::Result;
use crate::raft::log::{Log, LogEntry};
use crate::raft::message::{ClientRequest, ClientResponse, Message};
use crate::raft::state::KvState;
use crate::raft::timer::{self, Timer};
use crate::raft::transport::PeerTransport;
use crate::raft::{
    NodeId, ELECTION_TIMEOUT_MAX, ELECTION_TIMEOUT_MIN, HEARTBEAT_INTERVAL, LEASE_DURATION,
};
use crate::storage::{DiskStorage, Metadata};

/// An input to the node's state machine. Transport tasks and client
/// connection handlers post events; only the node task touches state.
pub enum Event {
    /// A protocol message from a peer.
    Peer(Message),
    /// A local client request. Dropping the reply sender without answering
    /// means the operation was not acknowledged.
    Client { request: ClientRequest, reply: oneshot::Sender<ClientResponse> },
}

/// The node's role, with the volatile state that only exists in that role.
enum Role {
    Follower,
    Candidate {
        /// Votes received, including our own.
        votes: HashSet<NodeId>,
        /// Latest instant any lease reported during this election could
        /// still be live. Promotion waits this out after winning.
        lease_horizon: Instant,
    },
    Leader {
        /// Per peer, how many leading entries we believe it holds; the next
        /// replication prefix length.
        sent_length: HashMap<NodeId, u64>,
        /// Per peer, how many leading entries it has acknowledged.
        acked_length: HashMap<NodeId, u64>,
        /// Distinct peers that acknowledged replication since the lease
        /// timer was last restarted.
        lease_acks: HashSet<NodeId>,
    },
}

/// A single Raft node with the leader-lease extension.
///
/// All state mutation happens on one task: [`Node::run`] selects over the
/// event queue and the timers the current role arms, so handlers execute
/// mutually exclusively and no lock guards `current_term`, the log, or the
/// commit length.
pub struct Node {
    id: NodeId,
    peers: Vec<NodeId>,
    cluster_size: usize,

    storage: DiskStorage,
    kv: KvState,

    // Persistent state; every durable change goes through storage first.
    current_term: u64,
    voted_for: Option<NodeId>,
    log: Log,
    commit_length: u64,

    // Volatile state.
    role: Role,
    current_leader: Option<NodeId>,

    election_timer: Timer,
    heartbeat_timer: Timer,
    lease_timer: Timer,

    transport: PeerTransport,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Node {
    /// A fresh node with empty persistent state.
    pub fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        storage: DiskStorage,
        transport: PeerTransport,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self::with_state(id, peers, storage, Metadata::default(), Vec::new(), transport, events)
    }

    /// A node recovered from its persistent files: the committed prefix is
    /// replayed into the state machine and the node restarts as a follower
    /// with empty volatile leader state.
    pub fn recover(
        id: NodeId,
        peers: Vec<NodeId>,
        storage: DiskStorage,
        metadata: Metadata,
        entries: Vec<LogEntry>,
        transport: PeerTransport,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self::with_state(id, peers, storage, metadata, entries, transport, events)
    }

    fn with_state(
        id: NodeId,
        peers: Vec<NodeId>,
        storage: DiskStorage,
        metadata: Metadata,
        entries: Vec<LogEntry>,
        transport: PeerTransport,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let log = Log::from_entries(entries);
        let mut commit_length = metadata.commit_length;
        if commit_length > log.len() {
            warn!(
                "node {}: recovered commit length {} exceeds log length {}, clamping",
                id,
                commit_length,
                log.len()
            );
            commit_length = log.len();
        }
        let mut kv = KvState::new();
        for entry in log.range(0, commit_length) {
            kv.apply(&entry.command);
        }

        let cluster_size = peers.len() + 1;
        let mut node = Self {
            id,
            peers,
            cluster_size,
            storage,
            kv,
            current_term: metadata.current_term,
            voted_for: metadata.voted_for,
            log,
            commit_length,
            role: Role::Follower,
            current_leader: None,
            election_timer: Timer::new(),
            heartbeat_timer: Timer::new(),
            lease_timer: Timer::new(),
            transport,
            events,
        };
        node.reset_election_timer();
        node
    }

    /// Runs the node until its event queue closes.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "node {} running: term {}, log length {}, commit length {}",
            self.id,
            self.current_term,
            self.log.len(),
            self.commit_length
        );
        loop {
            let election = self.election_deadline();
            let promotion = self.promotion_deadline();
            let heartbeat = self.heartbeat_deadline();
            let lease = self.lease_deadline();
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = timer::expired(election) => self.on_election_timeout(),
                _ = timer::expired(promotion) => self.become_leader(),
                _ = timer::expired(heartbeat) => self.on_heartbeat(),
                _ = timer::expired(lease) => self.on_lease_expired(),
            }
        }
        info!("node {} event queue closed, shutting down", self.id);
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Peer(message) => self.handle_message(message),
            Event::Client { request, reply } => {
                if let Some(response) = self.client_request(request) {
                    let _ = reply.send(response);
                }
                // A dropped reply is a deliberate non-acknowledgement.
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        let result = match message {
            Message::VoteRequest { candidate, term, log_length, last_log_term } => {
                self.on_vote_request(candidate, term, log_length, last_log_term)
            }
            Message::VoteResponse { voter, term, granted, lease_remaining } => {
                self.on_vote_response(voter, term, granted, lease_remaining)
            }
            Message::LogRequest {
                leader,
                term,
                prefix_len,
                prefix_term,
                leader_commit,
                suffix,
                lease_remaining,
            } => self.on_log_request(
                leader,
                term,
                prefix_len,
                prefix_term,
                leader_commit,
                suffix,
                lease_remaining,
            ),
            Message::LogResponse { follower, term, ack, success } => {
                self.on_log_response(follower, term, ack, success)
            }
            Message::Forward { origin, term: _, command } => self.on_forward(origin, command),
        };
        if let Err(err) = result {
            error!("node {}: operation dropped after storage failure: {}", self.id, err);
        }
    }

    // ------------------------------------------------------------------
    // Role bookkeeping

    fn quorum(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader { .. })
    }

    fn reset_election_timer(&mut self) {
        self.election_timer.set(rand::thread_rng().gen_range(ELECTION_TIMEOUT_MIN..=ELECTION_TIMEOUT_MAX));
    }

    /// Persists the hard state triple, then commits it to memory. Nothing
    /// that depends on a term or vote may be sent before this succeeds.
    fn persist_hard_state(&mut self, term: u64, voted_for: Option<NodeId>) -> Result<()> {
        self.storage.write_metadata(&Metadata {
            commit_length: self.commit_length,
            current_term: term,
            voted_for,
        })?;
        self.current_term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn persist_metadata(&mut self) -> Result<()> {
        self.storage.write_metadata(&Metadata {
            commit_length: self.commit_length,
            current_term: self.current_term,
            voted_for: self.voted_for,
        })
    }

    /// Adopts a higher term seen in any message and falls back to follower.
    fn adopt_term(&mut self, term: u64) -> Result<()> {
        self.persist_hard_state(term, None)?;
        self.become_follower(None);
        Ok(())
    }

    fn become_follower(&mut self, leader: Option<NodeId>) {
        if !matches!(self.role, Role::Follower) {
            info!("node {} becoming follower in term {}", self.id, self.current_term);
        }
        self.role = Role::Follower;
        self.current_leader = leader;
        self.heartbeat_timer.cancel();
        self.reset_election_timer();
    }

    /// Leader fields are cleared; the term and vote survive.
    fn step_down(&mut self) {
        self.become_follower(None);
    }

    // ------------------------------------------------------------------
    // Timer deadlines for the event loop

    fn election_deadline(&self) -> Option<Instant> {
        match self.role {
            Role::Leader { .. } => None,
            // A winner waiting out outstanding leases suspends its election
            // timer; a current-term leader or a higher term cancels the wait.
            Role::Candidate { ref votes, .. } if votes.len() >= self.quorum() => None,
            _ => self.election_timer.deadline(),
        }
    }

    fn promotion_deadline(&self) -> Option<Instant> {
        match self.role {
            Role::Candidate { ref votes, lease_horizon } if votes.len() >= self.quorum() => {
                Some(lease_horizon)
            }
            _ => None,
        }
    }

    fn heartbeat_deadline(&self) -> Option<Instant> {
        if self.is_leader() {
            self.heartbeat_timer.deadline()
        } else {
            None
        }
    }

    fn lease_deadline(&self) -> Option<Instant> {
        if self.is_leader() {
            self.lease_timer.deadline()
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Election

    fn on_election_timeout(&mut self) {
        if let Err(err) = self.start_election() {
            error!("node {}: election aborted by storage failure: {}", self.id, err);
            self.reset_election_timer();
        }
    }

    fn start_election(&mut self) -> Result<()> {
        let term = self.current_term + 1;
        self.persist_hard_state(term, Some(self.id))?;
        self.current_leader = None;
        self.role = Role::Candidate {
            votes: HashSet::from([self.id]),
            // We are a voter too: any lease we know about bounds us as well.
            lease_horizon: Instant::now() + self.lease_timer.remaining(),
        };
        self.storage.dump(&format!(
            "Node {} election timer timed out, starting election for term {}",
            self.id, term
        ));
        info!("node {} starting election for term {}", self.id, term);

        let request = Message::VoteRequest {
            candidate: self.id,
            term,
            log_length: self.log.len(),
            last_log_term: self.log.last_term(),
        };
        for peer in &self.peers {
            self.transport.send(*peer, request.clone());
        }
        self.reset_election_timer();
        Ok(())
    }

    fn on_vote_request(
        &mut self,
        candidate: NodeId,
        term: u64,
        log_length: u64,
        last_log_term: u64,
    ) -> Result<()> {
        if term > self.current_term {
            self.adopt_term(term)?;
        }

        let log_ok = last_log_term > self.log.last_term()
            || (last_log_term == self.log.last_term() && log_length >= self.log.len());
        let granted = term == self.current_term
            && log_ok
            && (self.voted_for.is_none() || self.voted_for == Some(candidate));

        if granted {
            self.persist_hard_state(self.current_term, Some(candidate))?;
            self.reset_election_timer();
            self.storage.dump(&format!("Vote granted for Node {} in term {}", candidate, term));
            info!("node {} voted for {} in term {}", self.id, candidate, term);
        } else {
            self.storage.dump(&format!("Vote denied for Node {} in term {}", candidate, term));
            debug!("node {} denied vote for {} in term {}", self.id, candidate, term);
        }

        // Denials also carry our lease view so a future leader learns the
        // upper bound either way.
        self.transport.send(
            candidate,
            Message::VoteResponse {
                voter: self.id,
                term: self.current_term,
                granted,
                lease_remaining: self.lease_timer.remaining(),
            },
        );
        Ok(())
    }

    fn on_vote_response(
        &mut self,
        voter: NodeId,
        term: u64,
        granted: bool,
        lease_remaining: Duration,
    ) -> Result<()> {
        if term > self.current_term {
            self.adopt_term(term)?;
            return Ok(());
        }

        let quorum = self.quorum();
        let mut newly_won = false;
        if let Role::Candidate { ref mut votes, ref mut lease_horizon } = self.role {
            let bound = Instant::now() + lease_remaining;
            if bound > *lease_horizon {
                *lease_horizon = bound;
            }
            if term == self.current_term && granted {
                let had_quorum = votes.len() >= quorum;
                votes.insert(voter);
                newly_won = !had_quorum && votes.len() >= quorum;
            }
        }
        if newly_won {
            self.storage.dump(&format!("Node {} waiting for old lease to expire", self.id));
            info!(
                "node {} won the election for term {}, waiting out outstanding leases",
                self.id, self.current_term
            );
            // Promotion itself happens when the lease horizon passes.
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leadership

    /// Finishes a won election once every lease reported during it has
    /// provably expired.
    fn become_leader(&mut self) {
        if let Err(err) = self.try_become_leader() {
            error!("node {}: failed to assume leadership: {}", self.id, err);
            self.step_down();
        }
    }

    fn try_become_leader(&mut self) -> Result<()> {
        let term = self.current_term;
        self.role = Role::Leader {
            sent_length: self.peers.iter().map(|p| (*p, self.log.len())).collect(),
            acked_length: self.peers.iter().map(|p| (*p, 0)).collect(),
            lease_acks: HashSet::new(),
        };
        self.current_leader = Some(self.id);
        self.election_timer.cancel();
        self.storage.dump(&format!("Node {} became the leader for term {}", self.id, term));
        info!("node {} became leader for term {}", self.id, term);

        // Commit the term boundary so reads after promotion reflect our log.
        self.append_local(LogEntry::new(term, "NO-OP"))?;

        self.heartbeat_timer.set(HEARTBEAT_INTERVAL);
        self.lease_timer.set(LEASE_DURATION);
        self.replicate_all();
        Ok(())
    }

    fn on_heartbeat(&mut self) {
        if !self.is_leader() {
            return;
        }
        if let Role::Leader { ref mut lease_acks, .. } = self.role {
            lease_acks.clear();
        }
        self.storage.dump(&format!("Leader {} sending heartbeat and renewing lease", self.id));
        debug!("node {} heartbeat", self.id);
        self.replicate_all();
        self.heartbeat_timer.set(HEARTBEAT_INTERVAL);
    }

    fn on_lease_expired(&mut self) {
        if !self.is_leader() {
            return;
        }
        self.storage.dump(&format!("Leader {} lease timer timed out. Stepping down.", self.id));
        info!("node {} lease expired without quorum renewal, stepping down", self.id);
        self.step_down();
    }

    /// True while this node may act as leader. A leader whose lease lapsed
    /// before the timer event was delivered steps down here instead of
    /// serving a possibly stale answer.
    fn leader_lease_valid(&mut self) -> bool {
        if !self.is_leader() {
            return false;
        }
        if self.lease_timer.remaining() > Duration::ZERO {
            return true;
        }
        self.on_lease_expired();
        false
    }

    // ------------------------------------------------------------------
    // Replication

    fn replicate_all(&mut self) {
        let targets: Vec<(NodeId, u64)> = match self.role {
            Role::Leader { ref sent_length, .. } => self
                .peers
                .iter()
                .map(|p| (*p, sent_length.get(p).copied().unwrap_or(0)))
                .collect(),
            _ => return,
        };
        for (peer, prefix_len) in targets {
            self.replicate(peer, prefix_len);
        }
    }

    fn replicate(&self, follower: NodeId, prefix_len: u64) {
        let prefix_term = if prefix_len > 0 { self.log.term_at(prefix_len - 1) } else { 0 };
        self.transport.send(
            follower,
            Message::LogRequest {
                leader: self.id,
                term: self.current_term,
                prefix_len,
                prefix_term,
                leader_commit: self.commit_length,
                suffix: self.log.entries_from(prefix_len).to_vec(),
                lease_remaining: self.lease_timer.remaining(),
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn on_log_request(
        &mut self,
        leader: NodeId,
        term: u64,
        prefix_len: u64,
        prefix_term: u64,
        leader_commit: u64,
        suffix: Vec<LogEntry>,
        lease_remaining: Duration,
    ) -> Result<()> {
        if term > self.current_term {
            self.adopt_term(term)?;
        }
        // Two leaders in one term would break election safety; refuse below
        // so the sender sees the anomaly in a normal rejection.
        let conflicting_leader = term == self.current_term && self.is_leader() && leader != self.id;
        if conflicting_leader {
            warn!("node {}: replication from {} in our own term {}", self.id, leader, term);
        }
        if term == self.current_term && !conflicting_leader {
            self.become_follower(Some(leader));
            // Track the leader's lease so our vote responses bound it.
            let bound = self.lease_timer.remaining().max(lease_remaining);
            self.lease_timer.set(bound);
        }

        let log_ok = self.log.len() >= prefix_len
            && (prefix_len == 0 || self.log.term_at(prefix_len - 1) == prefix_term);

        if term == self.current_term && !conflicting_leader && log_ok {
            self.append_entries(prefix_len, leader_commit, &suffix)?;
            let ack = prefix_len + suffix.len() as u64;
            if !suffix.is_empty() {
                self.storage.dump(&format!(
                    "Node {} accepted AppendEntries RPC from {}",
                    self.id, leader
                ));
            }
            self.transport.send(
                leader,
                Message::LogResponse { follower: self.id, term: self.current_term, ack, success: true },
            );
        } else {
            self.storage.dump(&format!(
                "Node {} rejected AppendEntries RPC from {}",
                self.id, leader
            ));
            debug!(
                "node {} rejected entries from {} (term {}, prefix {})",
                self.id, leader, term, prefix_len
            );
            self.transport.send(
                leader,
                Message::LogResponse { follower: self.id, term: self.current_term, ack: 0, success: false },
            );
        }
        Ok(())
    }

    /// Reconciles the local log with the leader's suffix and applies newly
    /// committed entries. Redelivery of an identical request is a no-op.
    fn append_entries(
        &mut self,
        prefix_len: u64,
        leader_commit: u64,
        suffix: &[LogEntry],
    ) -> Result<()> {
        // A term mismatch inside the overlap means everything from the
        // conflict on is uncommitted garbage; keep only the agreed prefix.
        if !suffix.is_empty() && self.log.len() > prefix_len {
            let index = std::cmp::min(self.log.len(), prefix_len + suffix.len() as u64) - 1;
            if self.log.term_at(index) != suffix[(index - prefix_len) as usize].term {
                self.log.truncate(prefix_len);
                self.storage.rewrite_log(self.log.entries())?;
            }
        }

        if prefix_len + suffix.len() as u64 > self.log.len() {
            let new_entries = &suffix[(self.log.len() - prefix_len) as usize..];
            self.storage.append_entries(new_entries)?;
            for entry in new_entries {
                self.log.append(entry.clone());
            }
        }

        if leader_commit > self.commit_length {
            let commit_to = std::cmp::min(leader_commit, self.log.len());
            for index in self.commit_length..commit_to {
                let command = match self.log.get(index) {
                    Some(entry) => entry.command.clone(),
                    None => break,
                };
                self.kv.apply(&command);
                self.storage.dump(&format!(
                    "Node {} (follower) committed the entry {} to the state machine",
                    self.id, command
                ));
            }
            if commit_to > self.commit_length {
                self.commit_length = commit_to;
                self.persist_metadata()?;
            }
        }
        Ok(())
    }

    fn on_log_response(&mut self, follower: NodeId, term: u64, ack: u64, success: bool) -> Result<()> {
        if term > self.current_term {
            self.adopt_term(term)?;
            return Ok(());
        }
        if term != self.current_term || !self.is_leader() {
            return Ok(());
        }

        // Lease renewal: a quorum of distinct acks since the last restart
        // extends the lease for another full window.
        if success {
            let quorum = self.quorum();
            let mut renewed = false;
            if let Role::Leader { ref mut lease_acks, .. } = self.role {
                lease_acks.insert(follower);
                if lease_acks.len() + 1 >= quorum {
                    lease_acks.clear();
                    renewed = true;
                }
            }
            if renewed {
                self.lease_timer.set(LEASE_DURATION);
                debug!("node {} lease renewed by quorum acks", self.id);
            }
        }

        let mut advance = false;
        let mut resend = None;
        if let Role::Leader { ref mut sent_length, ref mut acked_length, .. } = self.role {
            let acked = acked_length.get(&follower).copied().unwrap_or(0);
            if success && ack >= acked {
                acked_length.insert(follower, ack);
                sent_length.insert(follower, ack);
                advance = true;
            } else {
                // Back off one entry and retry until the logs share a prefix.
                let sent = sent_length.entry(follower).or_insert(0);
                if *sent > 0 {
                    *sent -= 1;
                    resend = Some((follower, *sent));
                }
            }
        }
        if advance {
            self.commit_advance()?;
        }
        if let Some((peer, prefix_len)) = resend {
            self.storage.dump(&format!(
                "Node {} rejected AppendEntries RPC, leader {} reducing sent length",
                peer, self.id
            ));
            self.replicate(peer, prefix_len);
        }
        Ok(())
    }

    /// Advances the commit watermark to the highest quorum-acknowledged
    /// index, guarded by the standard same-term rule.
    fn commit_advance(&mut self) -> Result<()> {
        let acked: Vec<u64> = match self.role {
            Role::Leader { ref acked_length, .. } => acked_length.values().copied().collect(),
            _ => return Ok(()),
        };
        let quorum = self.quorum();
        // The leader's own log always holds every index.
        let acks = |i: u64| acked.iter().filter(|&&a| a >= i).count() + 1;

        let mut ready = None;
        for i in (self.commit_length + 1..=self.log.len()).rev() {
            if acks(i) >= quorum {
                ready = Some(i);
                break;
            }
        }
        let Some(commit_to) = ready else { return Ok(()) };
        if self.log.term_at(commit_to - 1) != self.current_term {
            // Entries from prior terms only commit indirectly, once an entry
            // of the current term reaches quorum above them.
            return Ok(());
        }

        for index in self.commit_length..commit_to {
            let command = match self.log.get(index) {
                Some(entry) => entry.command.clone(),
                None => break,
            };
            self.kv.apply(&command);
            self.storage.dump(&format!(
                "Leader Node {} committed the entry {} to the state machine",
                self.id, command
            ));
            info!("node {} committed {:?} at index {}", self.id, command, index);
        }
        self.commit_length = commit_to;
        self.persist_metadata()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Client surface

    fn client_request(&mut self, request: ClientRequest) -> Option<ClientResponse> {
        match request {
            ClientRequest::Get { key } => Some(self.client_get(&key)),
            ClientRequest::Set { key, value } => self.client_set(&key, &value),
        }
    }

    fn client_get(&mut self, key: &str) -> ClientResponse {
        if self.leader_lease_valid() {
            match self.kv.get(key) {
                Some(value) => ClientResponse::Found { value: value.to_string() },
                None => ClientResponse::NotFound,
            }
        } else {
            ClientResponse::NotLeader { leader: self.current_leader }
        }
    }

    fn client_set(&mut self, key: &str, value: &str) -> Option<ClientResponse> {
        let command = format!("SET {} {}", key, value);
        if self.leader_lease_valid() {
            self.storage.dump(&format!(
                "Leader Node {} received an entry request {}",
                self.id, command
            ));
            match self.leader_append(command) {
                Ok(()) => Some(ClientResponse::Accepted),
                Err(err) => {
                    error!("node {}: write dropped after storage failure: {}", self.id, err);
                    None
                }
            }
        } else if let Some(leader) = self.current_leader {
            // Hand the write to the leader; the redirect tells the client
            // where to retry in the meantime.
            self.transport.send(
                leader,
                Message::Forward { origin: self.id, term: self.current_term, command },
            );
            Some(ClientResponse::NotLeader { leader: Some(leader) })
        } else {
            Some(ClientResponse::NotLeader { leader: None })
        }
    }

    fn on_forward(&mut self, origin: NodeId, command: String) -> Result<()> {
        if self.leader_lease_valid() {
            self.storage.dump(&format!(
                "Leader Node {} received an entry request {}",
                self.id, command
            ));
            self.leader_append(command)?;
        } else if let Some(leader) = self.current_leader {
            if leader != self.id {
                self.transport.send(
                    leader,
                    Message::Forward { origin, term: self.current_term, command },
                );
            }
        } else {
            debug!("node {}: dropping forwarded write, no known leader", self.id);
        }
        Ok(())
    }

    /// Appends a client command to the leader's log and kicks off
    /// replication. The reply goes out as soon as the local append is
    /// durable; commit follows via quorum acks.
    fn leader_append(&mut self, command: String) -> Result<()> {
        self.append_local(LogEntry::new(self.current_term, command))?;
        if let Role::Leader { ref mut lease_acks, .. } = self.role {
            lease_acks.clear();
        }
        self.replicate_all();
        Ok(())
    }

    fn append_local(&mut self, entry: LogEntry) -> Result<()> {
        self.storage.append_entry(&entry)?;
        self.log.append(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    struct TestNode {
        node: Node,
        outboxes: HashMap<NodeId, UnboundedReceiver<Message>>,
        _events: mpsc::UnboundedSender<Event>,
        _dir: tempfile::TempDir,
    }

    fn test_node(id: NodeId, cluster: &[NodeId]) -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::create(dir.path()).unwrap();
        test_node_with(id, cluster, storage, Metadata::default(), Vec::new(), dir)
    }

    fn test_node_with(
        id: NodeId,
        cluster: &[NodeId],
        storage: DiskStorage,
        metadata: Metadata,
        entries: Vec<LogEntry>,
        dir: tempfile::TempDir,
    ) -> TestNode {
        let peers: Vec<NodeId> = cluster.iter().copied().filter(|p| *p != id).collect();
        let (transport, outboxes) = PeerTransport::in_memory(&peers);
        let (tx, rx) = mpsc::unbounded_channel();
        let node = Node::recover(id, peers, storage, metadata, entries, transport, rx);
        TestNode { node, outboxes, _events: tx, _dir: dir }
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Elects `node` leader of a cluster where peer 1 grants its vote with
    /// no outstanding lease.
    fn make_leader(tn: &mut TestNode) {
        tn.node.on_election_timeout();
        let term = tn.node.current_term;
        tn.node.handle_message(Message::VoteResponse {
            voter: 1,
            term,
            granted: true,
            lease_remaining: Duration::ZERO,
        });
        tn.node.become_leader();
        assert!(tn.node.is_leader());
        for rx in tn.outboxes.values_mut() {
            drain(rx);
        }
    }

    /// Delivers queued messages between nodes until the network is quiet.
    fn pump(cluster: &mut Vec<TestNode>) {
        loop {
            let mut pending = Vec::new();
            for tn in cluster.iter_mut() {
                for (peer, rx) in tn.outboxes.iter_mut() {
                    while let Ok(message) = rx.try_recv() {
                        pending.push((*peer, message));
                    }
                }
            }
            if pending.is_empty() {
                break;
            }
            for (to, message) in pending {
                if let Some(target) = cluster.iter_mut().find(|t| t.node.id == to) {
                    target.node.handle_message(message);
                }
            }
        }
    }

    fn promote_when_due(tn: &mut TestNode) {
        if let Some(deadline) = tn.node.promotion_deadline() {
            if deadline <= Instant::now() {
                tn.node.become_leader();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follower_grants_vote_once_per_term() {
        let mut tn = test_node(0, &[0, 1, 2]);
        tn.node.on_vote_request(1, 1, 0, 0).unwrap();

        assert_eq!(tn.node.current_term, 1);
        assert_eq!(tn.node.voted_for, Some(1));
        assert_eq!(
            drain(tn.outboxes.get_mut(&1).unwrap()),
            vec![Message::VoteResponse {
                voter: 0,
                term: 1,
                granted: true,
                lease_remaining: Duration::ZERO
            }]
        );

        // Retransmit from the same candidate: same grant decision.
        tn.node.on_vote_request(1, 1, 0, 0).unwrap();
        assert!(matches!(
            drain(tn.outboxes.get_mut(&1).unwrap())[0],
            Message::VoteResponse { granted: true, .. }
        ));

        // A different candidate in the same term is refused.
        tn.node.on_vote_request(2, 1, 0, 0).unwrap();
        assert!(matches!(
            drain(tn.outboxes.get_mut(&2).unwrap())[0],
            Message::VoteResponse { granted: false, .. }
        ));
        assert_eq!(tn.node.voted_for, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn vote_denied_for_stale_term_and_stale_log() {
        let mut tn = test_node(0, &[0, 1, 2]);
        tn.node.current_term = 5;

        // Stale term: denied, reply carries our term so the sender steps down.
        tn.node.on_vote_request(1, 3, 9, 3).unwrap();
        assert!(matches!(
            drain(tn.outboxes.get_mut(&1).unwrap())[0],
            Message::VoteResponse { term: 5, granted: false, .. }
        ));

        // Stale log: candidate's last term is behind ours.
        let mut tn = test_node(0, &[0, 1, 2]);
        tn.node.append_local(LogEntry::new(2, "SET a 1")).unwrap();
        tn.node.current_term = 2;
        tn.node.on_vote_request(1, 3, 1, 1).unwrap();
        assert!(matches!(
            drain(tn.outboxes.get_mut(&1).unwrap())[0],
            Message::VoteResponse { granted: false, .. }
        ));

        // Same last term but shorter log: also denied.
        tn.node.on_vote_request(2, 4, 0, 2).unwrap();
        assert!(matches!(
            drain(tn.outboxes.get_mut(&2).unwrap())[0],
            Message::VoteResponse { granted: false, .. }
        ));

        // Longer last term wins over our longer log.
        tn.node.on_vote_request(1, 5, 1, 3).unwrap();
        assert!(matches!(
            drain(tn.outboxes.get_mut(&1).unwrap())[0],
            Message::VoteResponse { granted: true, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn election_timeout_starts_election() {
        let mut tn = test_node(0, &[0, 1, 2]);
        tn.node.on_election_timeout();

        assert_eq!(tn.node.current_term, 1);
        assert_eq!(tn.node.voted_for, Some(0));
        assert!(matches!(tn.node.role, Role::Candidate { .. }));
        assert_eq!(tn.node.current_leader, None);

        for peer in [1, 2] {
            assert_eq!(
                drain(tn.outboxes.get_mut(&peer).unwrap()),
                vec![Message::VoteRequest { candidate: 0, term: 1, log_length: 0, last_log_term: 0 }]
            );
        }

        // A second timeout bumps the term again.
        tn.node.on_election_timeout();
        assert_eq!(tn.node.current_term, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_win_promotes_after_lease_horizon() {
        let mut tn = test_node(0, &[0, 1, 2, 3, 4]);
        tn.node.on_election_timeout();
        for rx in tn.outboxes.values_mut() {
            drain(rx);
        }

        tn.node.on_vote_response(1, 1, true, Duration::ZERO).unwrap();
        assert!(tn.node.promotion_deadline().is_none(), "2 of 5 is not a quorum");

        tn.node.on_vote_response(2, 1, true, Duration::from_secs(3)).unwrap();
        let deadline = tn.node.promotion_deadline().expect("3 of 5 wins");
        assert_eq!(deadline, Instant::now() + Duration::from_secs(3));
        // The election timer is suspended during the wait.
        assert!(tn.node.election_deadline().is_none());

        // A straggling denial with a larger lease pushes the promotion out.
        tn.node.on_vote_response(3, 1, false, Duration::from_secs(5)).unwrap();
        assert_eq!(tn.node.promotion_deadline().unwrap(), Instant::now() + Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(5)).await;
        promote_when_due(&mut tn);
        assert!(tn.node.is_leader());
        assert_eq!(tn.node.current_leader, Some(0));

        // Promotion appended the term-boundary entry and replicated it.
        assert_eq!(tn.node.log.entries(), &[LogEntry::new(1, "NO-OP")]);
        let sent = drain(tn.outboxes.get_mut(&1).unwrap());
        assert_eq!(
            sent,
            vec![Message::LogRequest {
                leader: 0,
                term: 1,
                prefix_len: 0,
                prefix_term: 0,
                leader_commit: 0,
                suffix: vec![LogEntry::new(1, "NO-OP")],
                lease_remaining: Duration::from_secs(7),
            }]
        );
        assert!(tn.node.heartbeat_deadline().is_some());
        assert!(tn.node.lease_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn candidate_steps_down_on_higher_term_response() {
        let mut tn = test_node(0, &[0, 1, 2]);
        tn.node.on_election_timeout();
        tn.node.on_vote_response(1, 7, false, Duration::ZERO).unwrap();

        assert!(matches!(tn.node.role, Role::Follower));
        assert_eq!(tn.node.current_term, 7);
        assert_eq!(tn.node.voted_for, None);
    }

    #[tokio::test(start_paused = true)]
    async fn follower_appends_and_commits_from_leader() {
        let mut tn = test_node(2, &[0, 1, 2]);
        let suffix = vec![LogEntry::new(1, "NO-OP"), LogEntry::new(1, "SET x 1")];
        tn.node
            .on_log_request(0, 1, 0, 0, 2, suffix.clone(), Duration::from_secs(6))
            .unwrap();

        assert_eq!(tn.node.current_term, 1);
        assert_eq!(tn.node.current_leader, Some(0));
        assert_eq!(tn.node.log.len(), 2);
        assert_eq!(tn.node.commit_length, 2);
        assert_eq!(tn.node.kv.get("x"), Some("1"));
        assert_eq!(tn.node.lease_timer.remaining(), Duration::from_secs(6));
        assert_eq!(
            drain(tn.outboxes.get_mut(&0).unwrap()),
            vec![Message::LogResponse { follower: 2, term: 1, ack: 2, success: true }]
        );

        // Identical redelivery is a no-op with the same acknowledgement.
        tn.node
            .on_log_request(0, 1, 0, 0, 2, suffix, Duration::from_secs(6))
            .unwrap();
        assert_eq!(tn.node.log.len(), 2);
        assert_eq!(tn.node.commit_length, 2);
        assert_eq!(
            drain(tn.outboxes.get_mut(&0).unwrap()),
            vec![Message::LogResponse { follower: 2, term: 1, ack: 2, success: true }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn follower_rejects_gapped_prefix() {
        let mut tn = test_node(1, &[0, 1, 2]);
        tn.node
            .on_log_request(0, 1, 3, 1, 3, vec![LogEntry::new(1, "SET d 4")], Duration::ZERO)
            .unwrap();

        assert_eq!(tn.node.log.len(), 0);
        assert_eq!(
            drain(tn.outboxes.get_mut(&0).unwrap()),
            vec![Message::LogResponse { follower: 1, term: 1, ack: 0, success: false }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn follower_truncates_on_conflict() {
        let mut tn = test_node(1, &[0, 1, 2]);
        // Old-term entries beyond the agreed prefix, none committed.
        tn.node.append_local(LogEntry::new(1, "NO-OP")).unwrap();
        tn.node.append_local(LogEntry::new(1, "SET a old")).unwrap();
        tn.node.append_local(LogEntry::new(1, "SET b old")).unwrap();

        let suffix = vec![LogEntry::new(2, "SET a new")];
        tn.node.on_log_request(0, 2, 1, 1, 0, suffix, Duration::ZERO).unwrap();

        assert_eq!(
            tn.node.log.entries(),
            &[LogEntry::new(1, "NO-OP"), LogEntry::new(2, "SET a new")]
        );
        assert_eq!(
            drain(tn.outboxes.get_mut(&0).unwrap()),
            vec![Message::LogResponse { follower: 1, term: 2, ack: 2, success: true }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn leader_commits_on_quorum_acks() {
        let mut tn = test_node(0, &[0, 1, 2]);
        make_leader(&mut tn);
        assert_eq!(tn.node.commit_length, 0);

        let response = tn.node.client_set("x", "1");
        assert_eq!(response, Some(ClientResponse::Accepted));
        assert_eq!(tn.node.log.len(), 2);

        // One follower acknowledging both entries makes 2 of 3.
        tn.node.on_log_response(1, 1, 2, true).unwrap();
        assert_eq!(tn.node.commit_length, 2);
        assert_eq!(tn.node.kv.get("x"), Some("1"));

        // A duplicate stale ack cannot move anything backwards.
        tn.node.on_log_response(1, 1, 2, true).unwrap();
        assert_eq!(tn.node.commit_length, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn prior_term_entries_commit_only_indirectly() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::create(dir.path()).unwrap();
        let mut tn = test_node_with(
            0,
            &[0, 1, 2],
            storage,
            Metadata { commit_length: 0, current_term: 1, voted_for: None },
            vec![LogEntry::new(1, "SET a 1")],
            dir,
        );
        make_leader(&mut tn);
        assert_eq!(tn.node.current_term, 2);
        // Log: [SET a 1 @1, NO-OP @2].

        // Quorum on the prior-term entry alone: no commit.
        tn.node.on_log_response(1, 2, 1, true).unwrap();
        assert_eq!(tn.node.commit_length, 0);

        // Quorum on the current-term boundary commits both.
        tn.node.on_log_response(1, 2, 2, true).unwrap();
        assert_eq!(tn.node.commit_length, 2);
        assert_eq!(tn.node.kv.get("a"), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn leader_backs_off_after_rejection() {
        // A leader promoted with existing entries starts replication at its
        // full log length and has room to back off.
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::create(dir.path()).unwrap();
        let entries = vec![LogEntry::new(1, "NO-OP"), LogEntry::new(1, "SET a 1")];
        let mut tn = test_node_with(
            0,
            &[0, 1, 2],
            storage,
            Metadata { commit_length: 0, current_term: 1, voted_for: Some(0) },
            entries,
            dir,
        );
        make_leader(&mut tn);
        assert_eq!(tn.node.current_term, 2);

        // Rejections back off by one entry at a time.
        tn.node.on_log_response(1, 2, 0, false).unwrap();
        let resent = drain(tn.outboxes.get_mut(&1).unwrap());
        assert_eq!(resent.len(), 1);
        assert!(matches!(resent[0], Message::LogRequest { prefix_len: 1, .. }));

        tn.node.on_log_response(1, 2, 0, false).unwrap();
        let resent = drain(tn.outboxes.get_mut(&1).unwrap());
        assert!(matches!(resent[0], Message::LogRequest { prefix_len: 0, .. }));

        // Acceptance snaps the acknowledged prefix forward and commits.
        tn.node.on_log_response(1, 2, 3, true).unwrap();
        assert_eq!(tn.node.commit_length, 3);
        assert_eq!(tn.node.kv.get("a"), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_acks_renew_the_lease() {
        let mut tn = test_node(0, &[0, 1, 2, 3, 4]);
        make_leader(&mut tn);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(tn.node.lease_timer.remaining(), Duration::from_secs(5));

        // 1 of 5 plus self is below quorum: no renewal yet.
        tn.node.on_log_response(1, 1, 1, true).unwrap();
        assert_eq!(tn.node.lease_timer.remaining(), Duration::from_secs(5));

        // A second distinct peer reaches 3 of 5: full lease again.
        tn.node.on_log_response(2, 1, 1, true).unwrap();
        assert_eq!(tn.node.lease_timer.remaining(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_acks_do_not_renew_the_lease() {
        let mut tn = test_node(0, &[0, 1, 2, 3, 4]);
        make_leader(&mut tn);
        tokio::time::advance(Duration::from_secs(3)).await;

        // The same peer acknowledging repeatedly is one renewal vote.
        tn.node.on_log_response(1, 1, 1, true).unwrap();
        tn.node.on_log_response(1, 1, 1, true).unwrap();
        tn.node.on_log_response(1, 1, 1, true).unwrap();
        assert_eq!(tn.node.lease_timer.remaining(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn leader_steps_down_when_lease_expires() {
        let mut tn = test_node(0, &[0, 1, 2]);
        make_leader(&mut tn);

        tokio::time::advance(LEASE_DURATION).await;
        tn.node.on_lease_expired();

        assert!(matches!(tn.node.role, Role::Follower));
        assert_eq!(tn.node.current_leader, None);
        assert!(tn.node.heartbeat_deadline().is_none());
        assert!(tn.node.election_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_lease_guards_reads_and_writes() {
        let mut tn = test_node(0, &[0, 1, 2]);
        make_leader(&mut tn);
        tn.node.client_set("k", "v");
        tn.node.on_log_response(1, 1, 2, true).unwrap();
        assert_eq!(tn.node.client_get("k"), ClientResponse::Found { value: "v".into() });

        // Freeze past the lease without renewals: the node must refuse to
        // serve even before the timer event is delivered.
        tokio::time::advance(LEASE_DURATION + Duration::from_secs(1)).await;
        assert_eq!(tn.node.client_get("k"), ClientResponse::NotLeader { leader: None });
        assert!(!tn.node.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn client_dispatch_by_role() {
        // Leader: Found / NotFound.
        let mut leader = test_node(0, &[0, 1, 2]);
        make_leader(&mut leader);
        assert_eq!(leader.node.client_get("missing"), ClientResponse::NotFound);

        // Follower with a known leader: redirect and forward writes.
        let mut follower = test_node(1, &[0, 1, 2]);
        follower
            .node
            .on_log_request(0, 1, 0, 0, 0, vec![], Duration::from_secs(7))
            .unwrap();
        drain(follower.outboxes.get_mut(&0).unwrap());

        assert_eq!(
            follower.node.client_get("x"),
            ClientResponse::NotLeader { leader: Some(0) }
        );
        assert_eq!(
            follower.node.client_set("x", "1"),
            Some(ClientResponse::NotLeader { leader: Some(0) })
        );
        assert_eq!(
            drain(follower.outboxes.get_mut(&0).unwrap()),
            vec![Message::Forward { origin: 1, term: 1, command: "SET x 1".into() }]
        );

        // Follower with no leader: nothing to forward to.
        let mut lost = test_node(2, &[0, 1, 2]);
        assert_eq!(lost.node.client_get("x"), ClientResponse::NotLeader { leader: None });
        assert_eq!(
            lost.node.client_set("x", "1"),
            Some(ClientResponse::NotLeader { leader: None })
        );
        assert!(drain(lost.outboxes.get_mut(&0).unwrap()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forwarded_writes_are_appended_at_the_leader() {
        let mut tn = test_node(0, &[0, 1, 2]);
        make_leader(&mut tn);

        tn.node
            .handle_message(Message::Forward { origin: 2, term: 1, command: "SET y 9".into() });
        assert_eq!(tn.node.log.len(), 2);
        assert_eq!(tn.node.log.get(1).unwrap().command, "SET y 9");
        assert!(!drain(tn.outboxes.get_mut(&1).unwrap()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leader_steps_down_on_higher_term_replication() {
        let mut tn = test_node(0, &[0, 1, 2]);
        make_leader(&mut tn);

        tn.node
            .on_log_request(2, 3, 0, 0, 0, vec![LogEntry::new(3, "NO-OP")], Duration::from_secs(7))
            .unwrap();

        assert!(!tn.node.is_leader());
        assert_eq!(tn.node.current_term, 3);
        assert_eq!(tn.node.current_leader, Some(2));
        // The conflicting NO-OP from our abandoned term is replaced.
        assert_eq!(tn.node.log.entries(), &[LogEntry::new(3, "NO-OP")]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_term_replication_from_another_leader_is_refused() {
        let mut tn = test_node(0, &[0, 1, 2]);
        make_leader(&mut tn);

        tn.node
            .on_log_request(1, 1, 0, 0, 0, vec![LogEntry::new(1, "NO-OP")], Duration::from_secs(7))
            .unwrap();

        // We keep our leadership and our log, and the anomalous sender still
        // gets a rejection back rather than silence.
        assert!(tn.node.is_leader());
        assert_eq!(tn.node.log.len(), 1);
        assert_eq!(
            drain(tn.outboxes.get_mut(&1).unwrap()),
            vec![Message::LogResponse { follower: 0, term: 1, ack: 0, success: false }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn split_vote_retries_in_a_higher_term() {
        let mut cluster = vec![test_node(0, &[0, 1, 2, 3]), test_node(1, &[0, 1, 2, 3])];

        // Both time out simultaneously and vote for themselves in term 1;
        // the other two nodes never answer.
        cluster[0].node.on_election_timeout();
        cluster[1].node.on_election_timeout();
        pump(&mut cluster);

        // Each denied the other, so neither reached 3 of 4.
        assert!(matches!(cluster[0].node.role, Role::Candidate { .. }));
        assert!(cluster[0].node.promotion_deadline().is_none());
        assert!(cluster[1].node.promotion_deadline().is_none());

        // The next timeout starts a fresh election in a higher term.
        cluster[0].node.on_election_timeout();
        assert_eq!(cluster[0].node.current_term, 2);
        assert_eq!(cluster[0].node.voted_for, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_election_write_and_read() {
        let mut cluster = vec![
            test_node(0, &[0, 1, 2]),
            test_node(1, &[0, 1, 2]),
            test_node(2, &[0, 1, 2]),
        ];

        // Node 0's election timer fires first.
        cluster[0].node.on_election_timeout();
        pump(&mut cluster);
        promote_when_due(&mut cluster[0]);
        assert!(cluster[0].node.is_leader());

        // The term boundary replicates and commits on the full cluster.
        pump(&mut cluster);
        assert!(cluster[0].node.commit_length >= 1);

        assert_eq!(cluster[0].node.client_set("x", "1"), Some(ClientResponse::Accepted));
        pump(&mut cluster);
        // The followers learn the advanced commit on the next heartbeat.
        cluster[0].node.on_heartbeat();
        pump(&mut cluster);

        for tn in &cluster {
            assert_eq!(tn.node.commit_length, 2);
            assert_eq!(tn.node.kv.get("x"), Some("1"));
        }
        assert_eq!(
            cluster[0].node.client_get("x"),
            ClientResponse::Found { value: "1".into() }
        );
        assert_eq!(
            cluster[1].node.client_get("x"),
            ClientResponse::NotLeader { leader: Some(0) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_follower_catches_up_through_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::create(dir.path()).unwrap();
        let entries = vec![
            LogEntry::new(1, "NO-OP"),
            LogEntry::new(1, "SET a 1"),
            LogEntry::new(1, "SET b 2"),
        ];
        let mut cluster = vec![
            test_node_with(
                0,
                &[0, 1, 2],
                storage,
                Metadata { commit_length: 3, current_term: 1, voted_for: Some(0) },
                entries,
                dir,
            ),
            test_node(2, &[0, 1, 2]),
        ];
        make_leader(&mut cluster[0]);
        cluster[0].node.replicate_all();

        // Backoff walks the prefix down until the empty follower accepts.
        pump(&mut cluster);

        assert_eq!(cluster[1].node.log.entries(), cluster[0].node.log.entries());
        assert_eq!(cluster[1].node.log.len(), 4);
        assert!(cluster[1].node.commit_length >= 3);
        assert_eq!(cluster[1].node.kv.get("a"), Some("1"));
        assert_eq!(cluster[1].node.kv.get("b"), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_preserves_term_commit_and_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskStorage::create(dir.path()).unwrap();
            let peers = vec![1, 2];
            let (transport, _outboxes) = PeerTransport::in_memory(&peers);
            let (_tx, rx) = mpsc::unbounded_channel();
            let mut node = Node::new(0, peers, storage, transport, rx);

            node.on_election_timeout();
            node.on_vote_response(1, 1, true, Duration::ZERO).unwrap();
            node.become_leader();
            node.client_set("x", "1");
            node.client_set("y", "2");
            node.on_log_response(1, 1, 3, true).unwrap();
            assert_eq!(node.commit_length, 3);
        }

        let (storage, metadata, entries) = DiskStorage::open(dir.path()).unwrap();
        let peers = vec![1, 2];
        let (transport, _outboxes) = PeerTransport::in_memory(&peers);
        let (_tx, rx) = mpsc::unbounded_channel();
        let node = Node::recover(0, peers, storage, metadata, entries, transport, rx);

        assert!(!node.is_leader());
        assert_eq!(node.current_term, 1);
        assert_eq!(node.commit_length, 3);
        assert_eq!(node.log.len(), 3);
        assert_eq!(node.kv.get("x"), Some("1"));
        assert_eq!(node.kv.get("y"), Some("2"));
    }
}
