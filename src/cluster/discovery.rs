//! Cluster-wide coordinator polling.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use super::{CoordinatorProbe, PeerError};
use crate::db::{DbError, Node, Store};

/// Reports which nodes claim coordinator status.
pub struct Discovery<P> {
    probe: P,
    timeout: Duration,
    is_coordinator: bool,
}

impl<P: CoordinatorProbe> Discovery<P> {
    /// `is_coordinator` is this node's own configured flag.
    pub fn new(probe: P, timeout: Duration, is_coordinator: bool) -> Self {
        Self {
            probe,
            timeout,
            is_coordinator,
        }
    }

    /// This node's flag, served to peers. No network call.
    pub fn is_coordinator_self(&self) -> bool {
        self.is_coordinator
    }

    /// Load the node list and poll every peer.
    pub async fn list_nodes_with_status(&self, store: Arc<Store>) -> Result<Vec<Node>, DbError> {
        let nodes = tokio::task::spawn_blocking(move || store.list_nodes()).await??;

        Ok(self.poll(nodes).await)
    }

    /// Poll all peers concurrently.
    ///
    /// Returns one entry per input node, in order. A peer that errors or
    /// exceeds the timeout is reported as not coordinator.
    pub async fn poll(&self, nodes: Vec<Node>) -> Vec<Node> {
        let polls = nodes.into_iter().map(|mut node| async move {
            node.is_coordinator = match self.poll_one(&node.ip_address).await {
                Ok(flag) => flag,
                Err(e) => {
                    tracing::warn!("Unable to contact node [{}], assuming offline: {}", node.ip_address, e);
                    false
                }
            };
            node
        });

        let nodes = join_all(polls).await;

        let claimants: Vec<&str> = nodes
            .iter()
            .filter(|n| n.is_coordinator)
            .map(|n| n.ip_address.as_str())
            .collect();
        if claimants.len() > 1 {
            tracing::warn!("Multiple nodes report coordinator status: {:?}", claimants);
        }

        nodes
    }

    async fn poll_one(&self, address: &str) -> Result<bool, PeerError> {
        tokio::time::timeout(self.timeout, self.probe.query_coordinator_flag(address))
            .await
            .map_err(|_| PeerError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;

    #[derive(Clone, Copy)]
    enum Peer {
        Flag(bool),
        Down,
        Hang,
    }

    struct FakeProbe {
        peers: HashMap<String, Peer>,
    }

    impl FakeProbe {
        fn new(peers: &[(&str, Peer)]) -> Self {
            Self {
                peers: peers.iter().map(|(a, p)| (a.to_string(), *p)).collect(),
            }
        }
    }

    impl CoordinatorProbe for FakeProbe {
        async fn query_coordinator_flag(&self, address: &str) -> Result<bool, PeerError> {
            match self.peers.get(address).copied().unwrap_or(Peer::Down) {
                Peer::Flag(flag) => Ok(flag),
                Peer::Down => Err(PeerError::Network("connection refused".to_string())),
                Peer::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(true)
                }
            }
        }
    }

    fn nodes(addresses: &[&str]) -> Vec<Node> {
        addresses
            .iter()
            .enumerate()
            .map(|(i, a)| Node {
                id: i as i64 + 1,
                ip_address: a.to_string(),
                node_id: i as i64 + 1,
                is_coordinator: false,
            })
            .collect()
    }

    fn flags(nodes: &[Node]) -> Vec<bool> {
        nodes.iter().map(|n| n.is_coordinator).collect()
    }

    #[tokio::test]
    async fn test_poll_reports_every_node() {
        let probe = FakeProbe::new(&[
            ("a", Peer::Flag(false)),
            ("b", Peer::Flag(true)),
            ("c", Peer::Down),
            ("d", Peer::Hang),
        ]);
        let discovery = Discovery::new(probe, Duration::from_millis(100), false);

        let start = Instant::now();
        let result = discovery.poll(nodes(&["a", "b", "c", "d"])).await;

        assert_eq!(result.len(), 4);
        assert_eq!(flags(&result), vec![false, true, false, false]);
        let addresses: Vec<_> = result.iter().map(|n| n.ip_address.as_str()).collect();
        assert_eq!(addresses, vec!["a", "b", "c", "d"]);
        // The hanging peer is cut off by the timeout rather than awaited
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_slow_peers_do_not_serialize() {
        let probe = FakeProbe::new(&[("a", Peer::Hang), ("b", Peer::Hang), ("c", Peer::Hang)]);
        let discovery = Discovery::new(probe, Duration::from_millis(200), true);

        let start = Instant::now();
        let result = discovery.poll(nodes(&["a", "b", "c"])).await;

        assert_eq!(flags(&result), vec![false, false, false]);
        // Polled concurrently: three timeouts cost roughly one
        assert!(start.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_all_unreachable_still_returns() {
        let discovery = Discovery::new(FakeProbe::new(&[]), Duration::from_millis(50), false);
        let result = discovery.poll(nodes(&["x", "y"])).await;
        assert_eq!(flags(&result), vec![false, false]);
    }

    #[tokio::test]
    async fn test_split_brain_is_reported_as_is() {
        let probe = FakeProbe::new(&[("a", Peer::Flag(true)), ("b", Peer::Flag(true))]);
        let discovery = Discovery::new(probe, Duration::from_millis(50), false);
        let result = discovery.poll(nodes(&["a", "b"])).await;
        assert_eq!(flags(&result), vec![true, true]);
    }

    #[tokio::test]
    async fn test_list_nodes_with_status_uses_store() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.sync_nodes(&["a".to_string(), "b".to_string()]).unwrap();

        let probe = FakeProbe::new(&[("a", Peer::Flag(true)), ("b", Peer::Down)]);
        let discovery = Discovery::new(probe, Duration::from_millis(50), true);

        assert!(discovery.is_coordinator_self());
        let result = discovery.list_nodes_with_status(store).await.unwrap();
        assert_eq!(flags(&result), vec![true, false]);
    }
}
