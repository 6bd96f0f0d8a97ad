use std::time::Duration;

use futures::{SinkExt, TryStreamExt};
use tokio::net::TcpStream;

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::raft::message::{ClientRequest, ClientResponse, Frame};
use crate::raft::transport::{frame_sink, frame_stream};
use crate::raft::NodeId;

/// How many times the whole cluster is tried before giving up.
const MAX_ROUNDS: usize = 3;
/// Pause between attempts, so a cluster mid-election can settle.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// A cluster client for the key-value surface.
///
/// Tracks the last node that answered as leader and follows `NotLeader`
/// redirects; unreachable nodes rotate to the next candidate. Gives up after
/// [`MAX_ROUNDS`] passes over the cluster.
pub struct KvClient {
    servers: Vec<(NodeId, String)>,
    last_leader: usize,
}

impl KvClient {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            servers: config.iter().map(|(id, addr)| (id, addr.to_string())).collect(),
            last_leader: 0,
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<ClientResponse> {
        self.execute(ClientRequest::Get { key: key.to_string() }).await
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<ClientResponse> {
        self.execute(ClientRequest::Set { key: key.to_string(), value: value.to_string() }).await
    }

    /// Executes one request, chasing leader redirects.
    async fn execute(&mut self, request: ClientRequest) -> Result<ClientResponse> {
        for attempt in 0..MAX_ROUNDS * self.servers.len() {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }
            let (id, addr) = self.servers[self.last_leader].clone();
            match self.roundtrip(&addr, &request).await {
                Ok(ClientResponse::NotLeader { leader: Some(leader) }) if leader != id => {
                    match self.servers.iter().position(|(sid, _)| *sid == leader) {
                        Some(pos) => self.last_leader = pos,
                        None => self.advance(),
                    }
                }
                Ok(ClientResponse::NotLeader { .. }) => self.advance(),
                Ok(response) => return Ok(response),
                // Unreachable or dropped mid-request: try the next node.
                Err(_) => self.advance(),
            }
        }
        Err(Error::Internal("no leader reachable".to_string()))
    }

    fn advance(&mut self) {
        self.last_leader = (self.last_leader + 1) % self.servers.len();
    }

    async fn roundtrip(&self, addr: &str, request: &ClientRequest) -> Result<ClientResponse> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        let mut frames_out = frame_sink(write);
        let mut frames_in = frame_stream(read);

        frames_out.send(Frame::Client(request.clone())).await?;
        match frames_in.try_next().await? {
            Some(Frame::Reply(response)) => Ok(response),
            Some(_) => Err(Error::Parse("unexpected frame from server".to_string())),
            None => Err(Error::Internal("connection closed before reply".to_string())),
        }
    }
}
