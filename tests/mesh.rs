//! Several managers wired together through an in-memory relay.
mod common;

use common::{applied_candidates, candidate, Harness};
use tokio::sync::mpsc;
use webrtc_mesh::signaling::{InboundMessage, OutboundMessage};
use webrtc_mesh::transport::{SessionDescription, TransportEvent, TransportState};
use webrtc_mesh::{Role, SessionState};

/// Mimics the relay: presence fan-out plus point-to-point forwarding.
struct Mesh {
    peers: Vec<(String, Harness)>,
    offers: Vec<(String, String)>,
}

impl Mesh {
    fn new() -> Self {
        Self {
            peers: Vec::new(),
            offers: Vec::new(),
        }
    }

    fn index(&self, id: &str) -> usize {
        self.peers.iter().position(|(p, _)| p == id).unwrap()
    }

    fn harness(&mut self, id: &str) -> &mut Harness {
        let i = self.index(id);
        &mut self.peers[i].1
    }

    async fn join(&mut self, id: &str) {
        let mut newcomer = Harness::joined(id, "r1").await;
        let present: Vec<String> = self.peers.iter().map(|(p, _)| p.clone()).collect();
        newcomer
            .manager
            .handle_signal(InboundMessage::ExistingPeers {
                peers: present.clone(),
            })
            .await;
        for (_, h) in self.peers.iter_mut() {
            h.manager
                .handle_signal(InboundMessage::NewPeer {
                    peer: id.to_string(),
                })
                .await;
        }
        self.peers.push((id.to_string(), newcomer));
        self.pump().await;
    }

    async fn leave(&mut self, id: &str) {
        let i = self.index(id);
        let (_, mut h) = self.peers.remove(i);
        h.manager.leave().await.unwrap();
        for (_, other) in self.peers.iter_mut() {
            other
                .manager
                .handle_signal(InboundMessage::PeerLeft {
                    sid: id.to_string(),
                })
                .await;
        }
    }

    /// Delivers messages until every outbound queue is quiet.
    async fn pump(&mut self) {
        loop {
            let mut deliveries = Vec::new();
            for (from, h) in self.peers.iter_mut() {
                h.manager.drain_transport_events().await;
                for msg in h.take_outbound() {
                    let routed = match msg {
                        OutboundMessage::Offer { to, description } => {
                            self.offers.push((from.clone(), to.clone()));
                            Some((
                                to,
                                InboundMessage::Offer {
                                    from: from.clone(),
                                    description,
                                },
                            ))
                        }
                        OutboundMessage::Answer { to, description } => Some((
                            to,
                            InboundMessage::Answer {
                                from: from.clone(),
                                description,
                            },
                        )),
                        OutboundMessage::IceCandidate { to, candidate } => Some((
                            to,
                            InboundMessage::IceCandidate {
                                from: from.clone(),
                                candidate,
                            },
                        )),
                        OutboundMessage::Join { .. } | OutboundMessage::Leave { .. } => None,
                    };
                    deliveries.extend(routed);
                }
            }
            if deliveries.is_empty() {
                break;
            }
            for (to, msg) in deliveries {
                self.harness(&to).manager.handle_signal(msg).await;
            }
        }
    }

    /// Both transports of the pair report a live connection.
    async fn connect(&mut self, a: &str, b: &str) {
        self.harness(a).factory.report(b, TransportState::Connected);
        self.harness(b).factory.report(a, TransportState::Connected);
        self.pump().await;
    }
}

#[tokio::test]
async fn test_two_peers_negotiate_with_one_offer() {
    let mut mesh = Mesh::new();
    mesh.join("A").await;
    mesh.join("B").await;

    assert_eq!(mesh.offers, vec![("A".to_string(), "B".to_string())]);
    {
        let a = mesh.harness("A");
        let session = a.manager.session("B").unwrap();
        assert_eq!(session.role(), Role::Initiator);
        assert_eq!(session.state(), SessionState::Connected);
    }
    {
        let b = mesh.harness("B");
        let session = b.manager.session("A").unwrap();
        assert_eq!(session.role(), Role::Responder);
        assert_eq!(session.state(), SessionState::NegotiatingAnswer);
    }

    mesh.connect("A", "B").await;
    assert_eq!(
        mesh.harness("B").manager.session("A").unwrap().state(),
        SessionState::Connected
    );
    assert!(mesh.harness("A").manager.stats().is_running("B"));
    assert!(mesh.harness("B").manager.stats().is_running("A"));
}

#[tokio::test]
async fn test_local_candidates_cross_the_relay() {
    let mut mesh = Mesh::new();
    mesh.join("A").await;
    mesh.join("B").await;

    mesh.harness("A")
        .factory
        .sink("B")
        .emit(TransportEvent::LocalCandidate(candidate(1)));
    mesh.harness("B")
        .factory
        .sink("A")
        .emit(TransportEvent::LocalCandidate(candidate(2)));
    mesh.pump().await;

    assert_eq!(
        applied_candidates(&mesh.harness("B").factory.calls("A")),
        vec![candidate(1)]
    );
    assert_eq!(
        applied_candidates(&mesh.harness("A").factory.calls("B")),
        vec![candidate(2)]
    );
}

#[tokio::test]
async fn test_three_peers_form_full_mesh() {
    let mut mesh = Mesh::new();
    for id in ["A", "B", "C"] {
        mesh.join(id).await;
    }
    mesh.connect("A", "B").await;
    mesh.connect("A", "C").await;
    mesh.connect("B", "C").await;

    let mut offers = mesh.offers.clone();
    offers.sort();
    let expected: Vec<(String, String)> = [("A", "B"), ("A", "C"), ("B", "C")]
        .iter()
        .map(|(f, t)| (f.to_string(), t.to_string()))
        .collect();
    assert_eq!(offers, expected);

    for id in ["A", "B", "C"] {
        let h = mesh.harness(id);
        assert_eq!(h.manager.session_count(), 2);
        assert_eq!(h.manager.registry().len(), 3);
        for remote in h.manager.session_ids() {
            assert_eq!(
                h.manager.session(&remote).unwrap().state(),
                SessionState::Connected
            );
        }
    }

    mesh.leave("B").await;
    for id in ["A", "C"] {
        let h = mesh.harness(id);
        assert_eq!(h.manager.session_ids().len(), 1);
        assert!(h.manager.session("B").is_none());
        assert!(!h.manager.registry().contains("B"));
    }
}

#[tokio::test]
async fn test_rejoin_gets_fresh_session() {
    let mut mesh = Mesh::new();
    mesh.join("A").await;
    mesh.join("B").await;
    mesh.connect("A", "B").await;
    mesh.leave("B").await;
    mesh.join("B").await;

    assert_eq!(mesh.harness("A").factory.created_count("B"), 2);
    assert_eq!(
        mesh.harness("A").manager.session("B").unwrap().state(),
        SessionState::Connected
    );
    assert_eq!(mesh.offers.len(), 2);
}

#[tokio::test]
async fn test_run_loop_tears_down_when_relay_closes() {
    let mut h = Harness::joined("B", "r1").await;
    let (tx, rx) = mpsc::channel(8);
    tx.send(InboundMessage::ExistingPeers {
        peers: vec!["A".to_string()],
    })
    .await
    .unwrap();
    tx.send(InboundMessage::Offer {
        from: "A".to_string(),
        description: SessionDescription::offer("sdp-a"),
    })
    .await
    .unwrap();
    drop(tx);

    h.manager
        .run(rx, std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(
        h.take_outbound(),
        vec![
            OutboundMessage::Answer {
                to: "A".to_string(),
                description: SessionDescription::answer("answer-from-A"),
            },
            OutboundMessage::Leave {
                room: "r1".to_string()
            },
        ]
    );
    assert_eq!(h.manager.session_count(), 0);
    assert!(!h.manager.is_joined());
    assert_eq!(h.media.lock().unwrap().released, 1);
}

#[tokio::test]
async fn test_run_loop_leaves_on_shutdown() {
    let mut h = Harness::joined("A", "r1").await;
    h.manager.on_peer_joined("B").await.unwrap();
    h.take_outbound();
    let (_tx, rx) = mpsc::channel(8);

    h.manager.run(rx, async {}).await.unwrap();

    assert_eq!(
        h.take_outbound(),
        vec![OutboundMessage::Leave {
            room: "r1".to_string()
        }]
    );
    assert!(h.manager.session("B").is_none());
}
