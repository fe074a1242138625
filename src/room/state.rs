use std::collections::HashSet;

/// The room currently joined and the remote ids believed present in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    id: String,
    peers: HashSet<String>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            peers: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns false if the peer was already known.
    pub fn add_peer(&mut self, peer_id: &str) -> bool {
        self.peers.insert(peer_id.to_string())
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(String::as_str)
    }
}
