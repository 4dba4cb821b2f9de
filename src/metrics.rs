use crate::config::{Config, CreditDistMode};
use crate::msg::PadqParams;
use crate::transport::{MetricReport, BROADCAST_NEIGHBOR_ID};
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// How long a neighbor may sit in a non-ACTIVE state before its record is
/// torn down.
pub const NBR_INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Small deferral applied to grants and initiations scheduled off a report.
const REPORT_DELAY: Duration = Duration::from_micros(100);

pub const DR_KBS: u8 = 0;
pub const DR_MBS: u8 = 1;
pub const DR_GBS: u8 = 2;
pub const DR_TBS: u8 = 3;

/// Something the supervisor should do on the aggregator's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsAction {
    Initiate {
        neighbor_id: u32,
        credit_scalar: u16,
    },
    Terminate {
        neighbor_id: u32,
    },
    Padq {
        neighbor_id: u32,
        padq: PadqParams,
    },
    SchedulePadg {
        neighbor_id: u32,
        credits: u16,
        delay: Duration,
    },
}

#[derive(Debug)]
struct NeighborStats {
    sinr_last: f32,
    rr_last: f32,
    last_tx_datarate: u64,
    pending_credits: u16,
}

impl Default for NeighborStats {
    fn default() -> Self {
        Self {
            sinr_last: -256.0,
            rr_last: 0.0,
            last_tx_datarate: 0,
            pending_credits: 0,
        }
    }
}

/// Turns transport metric reports into PADQ injections and credit
/// distributions for the active neighbors.
pub struct MetricsAggregator {
    sinr_min: f32,
    sinr_max: f32,
    credit_grant: u16,
    credit_scalar: u16,
    credit_threshold: f32,
    dist_mode: CreditDistMode,
    p2p_mode: bool,
    stats: HashMap<u32, NeighborStats>,
    cached_neighbors: BTreeSet<u32>,
    max_sys_datarate: u64,
    last_credit_report: Option<Instant>,
}

impl MetricsAggregator {
    pub fn new(config: &Config) -> Self {
        Self {
            sinr_min: config.sinr_min,
            sinr_max: config.sinr_max,
            credit_grant: config.credit_grant,
            credit_scalar: config.credit_scalar,
            credit_threshold: config.credit_threshold,
            dist_mode: config.credit_dist_mode,
            p2p_mode: config.p2p_mode,
            stats: HashMap::new(),
            cached_neighbors: BTreeSet::new(),
            max_sys_datarate: 0,
            last_credit_report: None,
        }
    }

    /// In broadcast mode every remote collapses onto the broadcast neighbor.
    fn map_id(&self, id: u32) -> u32 {
        if self.p2p_mode {
            id
        } else {
            BROADCAST_NEIGHBOR_ID
        }
    }

    /// Digest one full metric report. `is_active` reports whether a
    /// neighbor's session is up.
    pub fn handle_report(
        &mut self,
        report: &MetricReport,
        is_active: impl Fn(u32) -> bool,
    ) -> Vec<MetricsAction> {
        let mut actions = Vec::new();
        let mut total_bw = Duration::ZERO;
        let mut latest: BTreeSet<u32> = BTreeSet::new();

        for metric in &report.neighbors {
            total_bw += metric.bw_consumption;
            latest.insert(self.map_id(metric.id));
        }

        // New neighbors get a session initiated; vanished ones are expunged.
        for nbr in latest.difference(&self.cached_neighbors) {
            debug!("new nbr {nbr}, scalar {}, scheduling initiate", self.credit_scalar);

            actions.push(MetricsAction::Initiate {
                neighbor_id: *nbr,
                credit_scalar: self.credit_scalar,
            });
            self.stats.insert(*nbr, NeighborStats::default());
        }

        for nbr in self.cached_neighbors.difference(&latest) {
            debug!("expunge old nbr {nbr}");

            actions.push(MetricsAction::Terminate { neighbor_id: *nbr });
            self.stats.remove(nbr);
        }

        self.cached_neighbors = latest;

        let max_queue_delay = report
            .queues
            .iter()
            .map(|q| q.avg_delay)
            .max()
            .unwrap_or_default();
        let latency = max_queue_delay.as_millis().min(u16::MAX.into()) as u16;
        let max_datarate = report.self_metric.max_datarate_bps;
        let broadcast_datarate = report.self_metric.broadcast_datarate_bps;

        self.max_sys_datarate = max_datarate;

        if report.neighbors.is_empty() {
            return actions;
        }

        let (mdr, mdr_scale) = scale_datarate(max_datarate);
        let resources = resources(total_bw, report.self_metric.report_interval);

        if self.p2p_mode {
            for metric in &report.neighbors {
                if !self.stats.contains_key(&metric.id) || !is_active(metric.id) {
                    continue;
                }

                let rlq = self.rlq(
                    metric.id,
                    metric.sinr_avg_db,
                    metric.rx_frames,
                    metric.missed_frames,
                );
                let stats = self.stats.get_mut(&metric.id).unwrap();
                let current_datarate = if stats.last_tx_datarate > 0 {
                    stats.last_tx_datarate
                } else {
                    broadcast_datarate
                };

                stats.last_tx_datarate = current_datarate;

                let (cdr, cdr_scale) = scale_datarate(current_datarate);

                actions.push(MetricsAction::Padq {
                    neighbor_id: metric.id,
                    padq: PadqParams {
                        receive_only: 0,
                        rlq,
                        resources,
                        latency,
                        cdr_scale: cdr_scale.into(),
                        cdr,
                        mdr_scale: mdr_scale.into(),
                        mdr,
                    },
                });
            }
        } else {
            let (cdr, cdr_scale) = scale_datarate(broadcast_datarate);

            actions.push(MetricsAction::Padq {
                neighbor_id: BROADCAST_NEIGHBOR_ID,
                padq: PadqParams {
                    receive_only: 0,
                    rlq: 100,
                    resources: 0,
                    latency,
                    cdr_scale: cdr_scale.into(),
                    cdr,
                    mdr_scale: mdr_scale.into(),
                    mdr,
                },
            });
        }

        actions
    }

    /// Relative link quality for one neighbor, persisting SINR and reception
    /// ratio for the hold rule.
    fn rlq(&mut self, neighbor_id: u32, sinr_avg: f32, rx: u32, missed: u32) -> u8 {
        let Some(stats) = self.stats.get_mut(&neighbor_id) else {
            return 0;
        };

        let (sinr, rr) = if rx + missed == 0 {
            // No frames this interval: hold the last SINR minus 3 dB.
            (stats.sinr_last - 3.0, stats.rr_last)
        } else {
            (sinr_avg, rx as f32 / (rx + missed) as f32)
        };

        let rlq = if sinr > self.sinr_min {
            let val = 100.0 * ((sinr - self.sinr_min) / (self.sinr_max - self.sinr_min)) * rr;

            val.clamp(0.0, 100.0) as u8
        } else {
            0
        };

        stats.sinr_last = sinr;
        stats.rr_last = rr;

        debug!("nbr {neighbor_id}, sinr {sinr}, rr {rr}, RLQ {rlq}");

        rlq
    }

    /// Flow-control tokens were replenished: schedule the EVEN or FLAT
    /// distribution across current neighbors.
    pub fn handle_token_update(&mut self) -> Vec<MetricsAction> {
        if self.dist_mode != CreditDistMode::Even && self.dist_mode != CreditDistMode::Flat {
            return Vec::new();
        }

        if self.stats.is_empty() {
            return Vec::new();
        }

        let credits = if self.dist_mode == CreditDistMode::Even {
            self.credit_grant / self.stats.len() as u16
        } else {
            self.credit_grant
        };

        self.stats
            .keys()
            .map(|&neighbor_id| MetricsAction::SchedulePadg {
                neighbor_id,
                credits,
                delay: REPORT_DELAY,
            })
            .collect()
    }

    /// A downstream packet left: in DIRECT mode, schedule the consumed
    /// credits to be granted back once the packet has drained at the system
    /// data rate. Successive grants are staggered monotonically.
    pub fn handle_downstream_sent(
        &mut self,
        dst: u32,
        credits: u16,
        len: usize,
    ) -> Option<MetricsAction> {
        if self.dist_mode != CreditDistMode::Direct || credits == 0 || self.max_sys_datarate == 0 {
            return None;
        }

        let now = Instant::now();
        let duration =
            Duration::from_secs_f64((len as f64 * 8.0) / self.max_sys_datarate as f64);
        let mut at = now + duration;

        if let Some(last) = self.last_credit_report {
            if last > now {
                at += last - now;
            }
        }

        self.last_credit_report = Some(at);

        Some(MetricsAction::SchedulePadg {
            neighbor_id: dst,
            credits,
            delay: at - now,
        })
    }

    /// A scheduled grant came due. Small grants pool up per neighbor; the
    /// PADG goes out only once the pool reaches the configured share of the
    /// credit grant.
    pub fn grant_due(&mut self, neighbor_id: u32, credits: u16) -> Option<u16> {
        let stats = self.stats.get_mut(&neighbor_id)?;

        stats.pending_credits = stats.pending_credits.saturating_add(credits);

        if f32::from(stats.pending_credits) >= self.credit_threshold * f32::from(self.credit_grant)
        {
            let flush = stats.pending_credits;

            stats.pending_credits = 0;

            Some(flush)
        } else {
            debug!(
                "dst {neighbor_id}, add {credits} to pending credits, now {}",
                stats.pending_credits
            );

            None
        }
    }

    /// A session went away; forget its statistics.
    pub fn neighbor_terminated(&mut self, neighbor_id: u32) {
        self.stats.remove(&neighbor_id);
        self.cached_neighbors.remove(&neighbor_id);
    }
}

/// Resources as a percentage of uncommitted airtime, clamped to 30..100.
fn resources(total_bw_consumption: Duration, interval: Duration) -> u8 {
    let ratio = if interval.is_zero() {
        0.0
    } else {
        total_bw_consumption.as_secs_f32() / interval.as_secs_f32()
    };

    (100.0 * (1.5 - ratio)).clamp(30.0, 100.0) as u8
}

/// Scale a data rate in bps down to the PADQ field and its unit selector.
fn scale_datarate(bps: u64) -> (u16, u8) {
    if bps < 1_000_000 {
        ((bps / 1_000) as u16, DR_KBS)
    } else if bps < 1_000_000_000 {
        ((bps / 1_000_000) as u16, DR_MBS)
    } else if bps < 1_000_000_000_000 {
        ((bps / 1_000_000_000) as u16, DR_GBS)
    } else {
        ((bps / 1_000_000_000_000) as u16, DR_TBS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NeighborMetric, QueueMetric, SelfMetric};

    fn config() -> Config {
        Config {
            node_id: 10,
            ..Config::default()
        }
    }

    fn aggregator() -> MetricsAggregator {
        MetricsAggregator::new(&config())
    }

    fn report(neighbors: Vec<NeighborMetric>) -> MetricReport {
        MetricReport {
            neighbors,
            queues: vec![QueueMetric {
                queue_id: 0,
                avg_delay: Duration::from_millis(12),
            }],
            self_metric: SelfMetric {
                max_datarate_bps: 1_000_000,
                broadcast_datarate_bps: 500_000,
                report_interval: Duration::from_secs(1),
            },
        }
    }

    fn nbr20() -> NeighborMetric {
        NeighborMetric {
            id: 20,
            sinr_avg_db: 10.0,
            rx_frames: 80,
            missed_frames: 20,
            bw_consumption: Duration::from_millis(400),
        }
    }

    #[test]
    fn first_report_initiates_then_emits_padq() {
        let mut agg = aggregator();

        // First sighting: the neighbor is not active yet, so only the
        // initiate comes out.
        let actions = agg.handle_report(&report(vec![nbr20()]), |_| false);

        assert_eq!(
            actions,
            vec![MetricsAction::Initiate {
                neighbor_id: 20,
                credit_scalar: 64
            }]
        );

        // Once active, the PADQ carries the computed fields.
        let actions = agg.handle_report(&report(vec![nbr20()]), |_| true);

        assert_eq!(actions.len(), 1);

        match &actions[0] {
            MetricsAction::Padq { neighbor_id, padq } => {
                assert_eq!(*neighbor_id, 20);
                // RR = 0.8, RLQ = 100 * (10/20) * 0.8 = 40.
                assert_eq!(padq.rlq, 40);
                // resources = clamp(30..100, 100 * (1.5 - 0.4)) = 100.
                assert_eq!(padq.resources, 100);
                assert_eq!(padq.latency, 12);
                assert_eq!(padq.cdr, 500);
                assert_eq!(padq.cdr_scale, u16::from(DR_KBS));
                assert_eq!(padq.mdr, 1000);
                assert_eq!(padq.mdr_scale, u16::from(DR_KBS));
                assert_eq!(padq.receive_only, 0);
            }
            other => panic!("expected Padq, got {other:?}"),
        }
    }

    #[test]
    fn vanished_neighbor_terminated() {
        let mut agg = aggregator();

        agg.handle_report(&report(vec![nbr20()]), |_| false);

        let actions = agg.handle_report(&report(vec![]), |_| false);

        assert_eq!(actions, vec![MetricsAction::Terminate { neighbor_id: 20 }]);
    }

    #[test]
    fn rlq_boundaries() {
        let mut agg = aggregator();

        agg.stats.insert(20, NeighborStats::default());

        // At or below SINR_MIN the link is dead.
        assert_eq!(agg.rlq(20, 0.0, 100, 0), 0);
        assert_eq!(agg.rlq(20, -5.0, 100, 0), 0);
        // At SINR_MAX with perfect reception it pegs at 100.
        assert_eq!(agg.rlq(20, 20.0, 100, 0), 100);
        assert_eq!(agg.rlq(20, 500.0, 100, 0), 100);
        // Unknown neighbor reports zero.
        assert_eq!(agg.rlq(99, 20.0, 100, 0), 0);
    }

    #[test]
    fn rlq_holds_last_sinr_when_idle() {
        let mut agg = aggregator();

        agg.stats.insert(20, NeighborStats::default());

        assert_eq!(agg.rlq(20, 10.0, 100, 0), 50);

        // No frames: hold 10 dB - 3 dB with the previous RR of 1.0.
        assert_eq!(agg.rlq(20, 99.0, 0, 0), 35);
        // And it keeps decaying.
        assert_eq!(agg.rlq(20, 99.0, 0, 0), 20);
    }

    #[test]
    fn resources_clamped() {
        assert_eq!(resources(Duration::ZERO, Duration::from_secs(1)), 100);
        assert_eq!(
            resources(Duration::from_millis(400), Duration::from_secs(1)),
            100
        );
        assert_eq!(
            resources(Duration::from_millis(700), Duration::from_secs(1)),
            80
        );
        // Fully busy clamps at the floor of 30.
        assert_eq!(
            resources(Duration::from_secs(2), Duration::from_secs(1)),
            30
        );
    }

    #[test]
    fn datarate_scaling_boundaries() {
        assert_eq!(scale_datarate(999_999), (999, DR_KBS));
        assert_eq!(scale_datarate(1_000_000), (1, DR_MBS));
        assert_eq!(scale_datarate(500_000_000), (500, DR_MBS));
        assert_eq!(scale_datarate(2_000_000_000), (2, DR_GBS));
        assert_eq!(scale_datarate(3_000_000_000_000), (3, DR_TBS));
    }

    #[test]
    fn even_distribution_splits_grant() {
        let mut config = config();

        config.credit_dist_mode = CreditDistMode::Even;

        let mut agg = MetricsAggregator::new(&config);

        agg.stats.insert(20, NeighborStats::default());
        agg.stats.insert(30, NeighborStats::default());

        let actions = agg.handle_token_update();

        assert_eq!(actions.len(), 2);

        for action in actions {
            match action {
                MetricsAction::SchedulePadg { credits, .. } => assert_eq!(credits, 128),
                other => panic!("expected SchedulePadg, got {other:?}"),
            }
        }
    }

    #[test]
    fn flat_distribution_grants_full_amount() {
        let mut config = config();

        config.credit_dist_mode = CreditDistMode::Flat;

        let mut agg = MetricsAggregator::new(&config);

        agg.stats.insert(20, NeighborStats::default());

        match agg.handle_token_update().as_slice() {
            [MetricsAction::SchedulePadg { credits, .. }] => assert_eq!(*credits, 256),
            other => panic!("unexpected actions {other:?}"),
        }
    }

    #[test]
    fn direct_mode_schedules_drain_delay() {
        let mut agg = aggregator();

        agg.max_sys_datarate = 1_000_000;

        let Some(MetricsAction::SchedulePadg {
            neighbor_id,
            credits,
            delay,
        }) = agg.handle_downstream_sent(20, 2, 1250)
        else {
            panic!("expected SchedulePadg");
        };

        assert_eq!(neighbor_id, 20);
        assert_eq!(credits, 2);
        // 1250 bytes * 8 / 1e6 bps = 10 ms.
        assert!(delay >= Duration::from_millis(10));
        assert!(delay < Duration::from_millis(12));

        // Successive grants are staggered past the previous one.
        let Some(MetricsAction::SchedulePadg { delay: second, .. }) =
            agg.handle_downstream_sent(20, 2, 1250)
        else {
            panic!("expected SchedulePadg");
        };

        assert!(second > delay);
    }

    #[test]
    fn direct_mode_requires_credits_and_rate() {
        let mut agg = aggregator();

        assert!(agg.handle_downstream_sent(20, 2, 100).is_none());

        agg.max_sys_datarate = 1_000_000;

        assert!(agg.handle_downstream_sent(20, 0, 100).is_none());
    }

    #[test]
    fn pending_credits_flush_at_threshold() {
        let mut agg = aggregator();

        agg.stats.insert(20, NeighborStats::default());

        // Threshold is 0.25 * 256 = 64 credits.
        assert_eq!(agg.grant_due(20, 30), None);
        assert_eq!(agg.grant_due(20, 30), None);
        assert_eq!(agg.grant_due(20, 10), Some(70));
        // Pool restarts after the flush.
        assert_eq!(agg.grant_due(20, 30), None);
        // Unknown neighbors never flush.
        assert_eq!(agg.grant_due(99, 100), None);
    }

    #[test]
    fn broadcast_mode_collapses_to_sentinel() {
        let mut config = config();

        config.p2p_mode = false;

        let mut agg = MetricsAggregator::new(&config);
        let actions = agg.handle_report(&report(vec![nbr20()]), |_| true);

        assert_eq!(
            actions[0],
            MetricsAction::Initiate {
                neighbor_id: BROADCAST_NEIGHBOR_ID,
                credit_scalar: 64
            }
        );

        match &actions[1] {
            MetricsAction::Padq { neighbor_id, padq } => {
                assert_eq!(*neighbor_id, BROADCAST_NEIGHBOR_ID);
                assert_eq!(padq.rlq, 100);
                assert_eq!(padq.resources, 0);
                assert_eq!(padq.cdr, 500);
            }
            other => panic!("expected Padq, got {other:?}"),
        }
    }
}
