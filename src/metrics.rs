use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::transport::{SessionTransport, StatsEntry, StatsReport};

/// Most recent connection-quality reading for one session.
///
/// Receive-side and send-side counters are kept apart; loss rates are only
/// ever computed within one direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSample {
    pub round_trip_time_ms: Option<f64>,
    /// Cumulative, media received from the peer.
    pub packets_received: u64,
    /// Cumulative, media received from the peer; may be negative when
    /// duplicates are received.
    pub packets_lost: i64,
    /// Cumulative, media sent to the peer.
    pub packets_sent: u64,
    /// Cumulative loss on media sent to the peer, as reported back by it.
    pub remote_packets_lost: i64,
}

impl ConnectionSample {
    /// Extracts RTT from the active candidate pair and sums RTP counters
    /// per direction.
    pub fn from_report(report: &StatsReport) -> Self {
        let mut sample = ConnectionSample::default();
        let mut receiver_report_rtt = None;
        for entry in &report.entries {
            match entry {
                StatsEntry::CandidatePair {
                    selected,
                    succeeded,
                    current_round_trip_time,
                    round_trip_time,
                } => {
                    if !(*selected || *succeeded) {
                        continue;
                    }
                    let rtt = current_round_trip_time
                        .filter(|v| *v > 0.0)
                        .or(*round_trip_time)
                        .filter(|v| *v > 0.0);
                    if let Some(rtt) = rtt {
                        // The selected pair wins over any other succeeded pair.
                        if *selected || sample.round_trip_time_ms.is_none() {
                            sample.round_trip_time_ms = Some(rtt * 1000.0);
                        }
                    }
                }
                StatsEntry::InboundRtp {
                    packets_received,
                    packets_lost,
                    ..
                } => {
                    sample.packets_received += packets_received;
                    sample.packets_lost += packets_lost;
                }
                StatsEntry::OutboundRtp { packets_sent, .. } => {
                    sample.packets_sent += packets_sent;
                }
                StatsEntry::RemoteInboundRtp {
                    packets_lost,
                    round_trip_time,
                    ..
                } => {
                    sample.remote_packets_lost += packets_lost;
                    if receiver_report_rtt.is_none() {
                        receiver_report_rtt = round_trip_time.filter(|v| *v > 0.0);
                    }
                }
            }
        }
        if sample.round_trip_time_ms.is_none() {
            sample.round_trip_time_ms = receiver_report_rtt.map(|rtt| rtt * 1000.0);
        }
        sample
    }

    /// Percentage (0-100) of packets lost on the way to us, over received + lost.
    pub fn packet_loss_rate(&self) -> f64 {
        let lost = self.packets_lost.max(0) as f64;
        percent(lost, self.packets_received as f64 + lost)
    }

    /// Percentage (0-100) of the packets we sent that the peer reports lost.
    pub fn outbound_loss_rate(&self) -> f64 {
        percent(
            self.remote_packets_lost.max(0) as f64,
            self.packets_sent as f64,
        )
    }

    /// 0-100. Loss is scored on the worse of the two directions.
    pub fn quality_score(&self) -> u8 {
        let rtt_score = match self.round_trip_time_ms {
            Some(rtt) if rtt < 150.0 => 50,
            Some(rtt) if rtt < 300.0 => 35,
            Some(_) => 20,
            None => 50,
        };

        let loss = self.packet_loss_rate().max(self.outbound_loss_rate());
        let loss_score = if loss < 1.0 {
            50
        } else if loss < 3.0 {
            35
        } else if loss < 5.0 {
            25
        } else {
            10
        };

        rtt_score + loss_score
    }
}

fn percent(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        (part / total * 100.0).min(100.0)
    } else {
        0.0
    }
}

struct SamplingLoop {
    handle: JoinHandle<()>,
    latest: watch::Receiver<Option<ConnectionSample>>,
}

/// Best-effort periodic sampler, one loop per connected session.
pub struct StatsMonitor {
    period: Duration,
    loops: HashMap<String, SamplingLoop>,
}

impl StatsMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            loops: HashMap::new(),
        }
    }

    /// Starts sampling `remote_id`. No-op if a loop is already running.
    pub fn start(&mut self, remote_id: &str, transport: Arc<dyn SessionTransport>) {
        if self.loops.contains_key(remote_id) {
            return;
        }
        let (tx, latest) = watch::channel(None);
        let period = self.period;
        let peer = remote_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first sample is one period in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match transport.get_stats().await {
                    Ok(report) => {
                        let sample = ConnectionSample::from_report(&report);
                        trace!("Stats for {}: {:?}", peer, sample);
                        if tx.send(Some(sample)).is_err() {
                            break;
                        }
                    }
                    Err(e) => trace!("Skipping stats tick for {}: {}", peer, e),
                }
            }
        });

        debug!("Stats sampling started for {}", remote_id);
        self.loops
            .insert(remote_id.to_string(), SamplingLoop { handle, latest });
    }

    pub fn stop(&mut self, remote_id: &str) -> bool {
        match self.loops.remove(remote_id) {
            Some(sampling) => {
                sampling.handle.abort();
                debug!("Stats sampling stopped for {}", remote_id);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (_, sampling) in self.loops.drain() {
            sampling.handle.abort();
        }
    }

    pub fn is_running(&self, remote_id: &str) -> bool {
        self.loops.contains_key(remote_id)
    }

    pub fn running(&self) -> usize {
        self.loops.len()
    }

    pub fn latest(&self, remote_id: &str) -> Option<ConnectionSample> {
        self.loops
            .get(remote_id)
            .and_then(|sampling| sampling.latest.borrow().clone())
    }

    pub fn subscribe(&self, remote_id: &str) -> Option<watch::Receiver<Option<ConnectionSample>>> {
        self.loops.get(remote_id).map(|sampling| sampling.latest.clone())
    }
}

impl Drop for StatsMonitor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
