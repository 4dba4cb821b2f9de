use erdp::ErrorDisplay;
use log::{debug, info, warn};
use std::io::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Neighbor id used for broadcast traffic and broadcast-mode sessions.
pub const BROADCAST_NEIGHBOR_ID: u32 = 0xFFFF;

const MSG_PACKET: u8 = 0x01;
const MSG_METRICS: u8 = 0x02;
const MSG_TOKENS: u8 = 0x03;

const HELLO_PAYLOAD: [u8; 1] = [b'H'];

/// Per-neighbor link measurements for one report interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborMetric {
    pub id: u32,
    pub sinr_avg_db: f32,
    pub rx_frames: u32,
    pub missed_frames: u32,
    pub bw_consumption: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetric {
    pub queue_id: u8,
    pub avg_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfMetric {
    pub max_datarate_bps: u64,
    pub broadcast_datarate_bps: u64,
    pub report_interval: Duration,
}

/// One complete metric report from the emulation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReport {
    pub neighbors: Vec<NeighborMetric>,
    pub queues: Vec<QueueMetric>,
    pub self_metric: SelfMetric,
}

/// Messages delivered by the transport to the supervisor.
#[derive(Debug)]
pub enum TransportEvent {
    /// A frame from a remote peer.
    Upstream { src: u32, data: Vec<u8> },
    /// A metric report covering neighbors, queues and self.
    Metrics(MetricReport),
    /// Flow-control tokens were replenished.
    TokenUpdate { tokens: u16 },
    /// A downstream packet left for the emulation; used by the aggregator to
    /// schedule direct-mode grants.
    DownstreamSent { dst: u32, credits: u16, len: usize },
}

/// A frame headed to a remote peer.
#[derive(Debug)]
pub struct Downstream {
    pub dst: u32,
    pub credits: u16,
    pub data: Vec<u8>,
}

/// Sender half handed to the supervisor.
#[derive(Clone)]
pub struct TransportHandle {
    tx: UnboundedSender<Downstream>,
}

impl TransportHandle {
    pub fn send(&self, dst: u32, credits: u16, data: Vec<u8>) {
        let _ = self.tx.send(Downstream { dst, credits, data });
    }
}

/// Adapter to the radio-to-router emulation layer over a pair of UDP
/// endpoints. The datagram encoding here is a stand-in; the supervisor only
/// sees the typed [`TransportEvent`] surface.
pub struct Transport {
    sock: Arc<UdpSocket>,
    peer: SocketAddr,
    flow_control: bool,
    hello_interval: Duration,
}

impl Transport {
    pub async fn connect(
        local: &str,
        remote: &str,
        flow_control: bool,
        hello_interval: Duration,
    ) -> Result<Self, TransportError> {
        let sock = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::Bind(local.to_string(), e))?;
        let peer = remote
            .parse()
            .map_err(|_| TransportError::BadEndpoint(remote.to_string()))?;

        info!("transport bound {local}, peer {peer}");

        Ok(Self {
            sock: Arc::new(sock),
            peer,
            flow_control,
            hello_interval,
        })
    }

    /// Spawn the transport tasks. Returns the downstream handle; events
    /// arrive on `events`.
    pub fn start(
        self,
        events: UnboundedSender<TransportEvent>,
        running: CancellationToken,
    ) -> TransportHandle {
        let (tx, rx) = unbounded_channel();
        let tokens = Arc::new(Semaphore::new(0));

        tokio::spawn(run_receiver(
            self.sock.clone(),
            events.clone(),
            tokens.clone(),
            running.clone(),
        ));

        // Token acquisition can block for a while, so downstream sends run on
        // their own task, never on the supervisor's routing loop.
        tokio::spawn(run_sender(
            self.sock.clone(),
            self.peer,
            self.flow_control.then_some(tokens),
            rx,
            events,
            running.clone(),
        ));

        if !self.hello_interval.is_zero() {
            tokio::spawn(run_hello(
                TransportHandle { tx: tx.clone() },
                self.hello_interval,
                running,
            ));
        }

        TransportHandle { tx }
    }
}

async fn run_receiver(
    sock: Arc<UdpSocket>,
    events: UnboundedSender<TransportEvent>,
    tokens: Arc<Semaphore>,
    running: CancellationToken,
) {
    let mut buf = vec![0u8; 65536];

    loop {
        let len = tokio::select! {
            _ = running.cancelled() => return,
            v = sock.recv(&mut buf) => match v {
                Ok(v) => v,
                Err(e) => {
                    warn!("transport recv failed: {}", e.display());
                    continue;
                }
            }
        };

        match decode_message(&buf[..len]) {
            Ok(TransportEvent::TokenUpdate { tokens: n }) => {
                tokens.add_permits(n.into());

                let _ = events.send(TransportEvent::TokenUpdate { tokens: n });
            }
            Ok(event) => {
                let _ = events.send(event);
            }
            Err(e) => debug!("unparseable transport message, len {len}: {e}"),
        }
    }
}

async fn run_sender(
    sock: Arc<UdpSocket>,
    peer: SocketAddr,
    tokens: Option<Arc<Semaphore>>,
    mut rx: UnboundedReceiver<Downstream>,
    events: UnboundedSender<TransportEvent>,
    running: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = running.cancelled() => return,
            v = rx.recv() => match v {
                Some(v) => v,
                None => return,
            }
        };

        // Wait for an available flow-control token before each packet.
        if let Some(tokens) = &tokens {
            let permit = tokio::select! {
                _ = running.cancelled() => return,
                v = tokens.acquire() => v,
            };

            match permit {
                Ok(p) => p.forget(),
                Err(_) => return,
            }
        }

        let len = item.data.len();
        let buf = encode_packet(item.dst, item.credits, &item.data);

        if let Err(e) = sock.send_to(&buf, peer).await {
            warn!("transport send to {} failed: {}", item.dst, e.display());
            continue;
        }

        let _ = events.send(TransportEvent::DownstreamSent {
            dst: item.dst,
            credits: item.credits,
            len,
        });
    }
}

async fn run_hello(handle: TransportHandle, interval: Duration, running: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);

    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = running.cancelled() => return,
            _ = ticker.tick() => {
                handle.send(BROADCAST_NEIGHBOR_ID, 0, HELLO_PAYLOAD.to_vec());
            }
        }
    }
}

pub fn is_hello(data: &[u8]) -> bool {
    data == HELLO_PAYLOAD
}

fn encode_packet(dst: u32, credits: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + data.len());

    buf.push(MSG_PACKET);
    buf.extend_from_slice(&dst.to_be_bytes());
    buf.extend_from_slice(&credits.to_be_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

pub fn encode_metrics(report: &MetricReport) -> Vec<u8> {
    let mut buf = vec![MSG_METRICS];

    buf.extend_from_slice(&(report.neighbors.len() as u16).to_be_bytes());

    for n in &report.neighbors {
        buf.extend_from_slice(&n.id.to_be_bytes());
        buf.extend_from_slice(&n.sinr_avg_db.to_bits().to_be_bytes());
        buf.extend_from_slice(&n.rx_frames.to_be_bytes());
        buf.extend_from_slice(&n.missed_frames.to_be_bytes());
        buf.extend_from_slice(&(n.bw_consumption.as_micros() as u64).to_be_bytes());
    }

    buf.extend_from_slice(&(report.queues.len() as u16).to_be_bytes());

    for q in &report.queues {
        buf.push(q.queue_id);
        buf.extend_from_slice(&(q.avg_delay.as_micros() as u64).to_be_bytes());
    }

    buf.extend_from_slice(&report.self_metric.max_datarate_bps.to_be_bytes());
    buf.extend_from_slice(&report.self_metric.broadcast_datarate_bps.to_be_bytes());
    buf.extend_from_slice(&(report.self_metric.report_interval.as_micros() as u64).to_be_bytes());
    buf
}

fn decode_message(buf: &[u8]) -> Result<TransportEvent, TransportError> {
    let (&kind, rest) = buf.split_first().ok_or(TransportError::Truncated)?;
    let mut r = Cursor { data: rest };

    match kind {
        MSG_PACKET => {
            let src = r.u32()?;
            let credits = r.u16()?;
            let len = r.u16()?;
            let data = r.bytes(len.into())?;

            // Credits on upstream packets are advisory only.
            let _ = credits;

            Ok(TransportEvent::Upstream { src, data })
        }
        MSG_METRICS => {
            let nbr_count = r.u16()?;
            let mut neighbors = Vec::with_capacity(nbr_count.into());

            for _ in 0..nbr_count {
                neighbors.push(NeighborMetric {
                    id: r.u32()?,
                    sinr_avg_db: f32::from_bits(r.u32()?),
                    rx_frames: r.u32()?,
                    missed_frames: r.u32()?,
                    bw_consumption: Duration::from_micros(r.u64()?),
                });
            }

            let queue_count = r.u16()?;
            let mut queues = Vec::with_capacity(queue_count.into());

            for _ in 0..queue_count {
                queues.push(QueueMetric {
                    queue_id: r.u8()?,
                    avg_delay: Duration::from_micros(r.u64()?),
                });
            }

            let self_metric = SelfMetric {
                max_datarate_bps: r.u64()?,
                broadcast_datarate_bps: r.u64()?,
                report_interval: Duration::from_micros(r.u64()?),
            };

            Ok(TransportEvent::Metrics(MetricReport {
                neighbors,
                queues,
                self_metric,
            }))
        }
        MSG_TOKENS => Ok(TransportEvent::TokenUpdate { tokens: r.u16()? }),
        other => Err(TransportError::UnknownKind(other)),
    }
}

struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        let chunk = self.data.get(..n).ok_or(TransportError::Truncated)?;

        self.data = &self.data[n..];

        Ok(chunk)
    }

    fn u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TransportError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, TransportError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, TransportError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        Ok(self.take(n)?.to_vec())
    }
}

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("failed to bind transport endpoint {0}: {1}")]
    Bind(String, #[source] Error),
    #[error("invalid transport endpoint {0}")]
    BadEndpoint(String),
    #[error("truncated transport message")]
    Truncated,
    #[error("unknown transport message kind 0x{0:02x}")]
    UnknownKind(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_roundtrip() {
        let buf = encode_packet(20, 2, &[1, 2, 3]);
        let event = decode_message(&buf).unwrap();

        match event {
            TransportEvent::Upstream { src, data } => {
                assert_eq!(src, 20);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn metrics_roundtrip() {
        let report = MetricReport {
            neighbors: vec![NeighborMetric {
                id: 20,
                sinr_avg_db: 10.0,
                rx_frames: 80,
                missed_frames: 20,
                bw_consumption: Duration::from_millis(400),
            }],
            queues: vec![QueueMetric {
                queue_id: 0,
                avg_delay: Duration::from_millis(12),
            }],
            self_metric: SelfMetric {
                max_datarate_bps: 1_000_000,
                broadcast_datarate_bps: 500_000,
                report_interval: Duration::from_secs(1),
            },
        };
        let buf = encode_metrics(&report);

        match decode_message(&buf).unwrap() {
            TransportEvent::Metrics(back) => assert_eq!(back, report),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn truncated_rejected() {
        let mut buf = encode_packet(20, 0, &[1, 2, 3]);

        buf.truncate(buf.len() - 1);

        assert!(matches!(
            decode_message(&buf),
            Err(TransportError::Truncated)
        ));
        assert!(matches!(decode_message(&[]), Err(TransportError::Truncated)));
    }

    #[test]
    fn hello_detection() {
        assert!(is_hello(b"H"));
        assert!(!is_hello(b"HH"));
    }
}
