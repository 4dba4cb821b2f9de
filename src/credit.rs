use crate::packet::{PacketError, PppoePacket, PPP_OVERHEAD};
use crate::tags::{TAG_CREDITS_LENGTH, TAG_HDR_SIZE};
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MAX_CREDITS: u16 = 0xFFFF;
pub const DEFAULT_CREDIT_SCALAR: u16 = 64;
pub const PADG_RETRY_TIME: Duration = Duration::from_secs(1);
pub const MAX_PADC_WAIT_TIME: Duration = Duration::from_secs(60);

const INBAND_OVERHEAD: u16 = (TAG_HDR_SIZE + TAG_CREDITS_LENGTH) as u16;

/// State of the out-of-band grant exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    PadgSent,
    PadcReceived,
}

/// Whether a scalar tag is expected in the PADS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarState {
    Needed,
    NotNeeded,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Rfc4938Only,
    Rfc4938Scaling,
}

/// A PADG ready to go on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadgFrame {
    pub seq: u16,
    pub fcn: u16,
    pub bcn: u16,
}

/// A PADC reply to a received PADG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadcFrame {
    pub seq: u16,
    pub fcn: u16,
    pub bcn: u16,
}

/// Outcome of an out-of-band grant request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Transmit this PADG.
    Send(PadgFrame),
    /// Still waiting on a PADC; the grant was added to the cache.
    Cached,
    /// The PADC wait deadline has passed; tear the session down.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadcOutcome {
    Synced,
    Duplicate,
    WrongSeq { expected: u16 },
}

/// Per-session credit bookkeeping for RFC 4938 and its scaled-credits
/// extension.
#[derive(Debug)]
pub struct CreditEngine {
    pub peer_id: u32,
    pub session_id: u16,
    pub local_credits: u16,
    pub peer_credits: u16,
    pub local_scalar: u16,
    pub peer_scalar: u16,
    pub grant_limit: u16,
    pub mode: OperatingMode,
    pub scalar_state: ScalarState,
    pub send_inband_grant: bool,
    credit_cache: u16,
    credits_pending_padc: u16,
    grant_state: GrantState,
    padg_seq_num: u16,
    padg_tries: u32,
    padg_initial_send_time: Option<Instant>,
    padg_retry_send_time: Option<Instant>,
}

impl CreditEngine {
    /// A `credit_scalar` of 0 selects plain RFC 4938 with the default scalar;
    /// anything else enables the scaled-credits extension.
    pub fn new(peer_id: u32, credit_scalar: u16, grant_limit: u16) -> Self {
        let (mode, scalar_state, local_scalar) = if credit_scalar == 0 {
            (
                OperatingMode::Rfc4938Only,
                ScalarState::NotNeeded,
                DEFAULT_CREDIT_SCALAR,
            )
        } else {
            (
                OperatingMode::Rfc4938Scaling,
                ScalarState::Needed,
                credit_scalar,
            )
        };

        Self {
            peer_id,
            session_id: 0,
            local_credits: 0,
            peer_credits: 0,
            local_scalar,
            // Assume the default for the peer until the PADS tells us.
            peer_scalar: DEFAULT_CREDIT_SCALAR,
            grant_limit,
            mode,
            scalar_state,
            send_inband_grant: false,
            credit_cache: 0,
            credits_pending_padc: 0,
            grant_state: GrantState::PadcReceived,
            padg_seq_num: 0,
            padg_tries: 0,
            padg_initial_send_time: None,
            padg_retry_send_time: None,
        }
    }

    pub fn grant_state(&self) -> GrantState {
        self.grant_state
    }

    pub fn padg_seq_num(&self) -> u16 {
        self.padg_seq_num
    }

    pub fn padg_tries(&self) -> u32 {
        self.padg_tries
    }

    /// Credit cost of a local session frame of `pppoe_length` payload bytes.
    pub fn compute_local_credits(&self, pppoe_length: u16) -> u16 {
        scaled_cost(pppoe_length.saturating_sub(PPP_OVERHEAD as u16), self.local_scalar)
    }

    /// Same, for a frame that carries an in-band credit tag.
    pub fn compute_local_credits_with_inband(&self, pppoe_length: u16) -> u16 {
        scaled_cost(
            pppoe_length.saturating_sub(PPP_OVERHEAD as u16 + INBAND_OVERHEAD),
            self.local_scalar,
        )
    }

    /// Credit cost charged to the peer for a received session frame.
    pub fn compute_peer_credits(&self, pppoe_length: u16) -> u16 {
        if self.mode == OperatingMode::Rfc4938Only {
            return 0;
        }

        scaled_cost(pppoe_length.saturating_sub(PPP_OVERHEAD as u16), self.peer_scalar)
    }

    /// Same, for a received frame that carries an in-band credit tag.
    pub fn compute_peer_credits_with_inband(&self, pppoe_length: u16) -> u16 {
        scaled_cost(
            pppoe_length.saturating_sub(PPP_OVERHEAD as u16 + INBAND_OVERHEAD),
            self.peer_scalar,
        )
    }

    /// Request an out-of-band grant of `credits` to the peer.
    pub fn out_of_band_grant(&mut self, credits: u16, now: Instant) -> GrantOutcome {
        if self.grant_state == GrantState::PadgSent {
            let initial = self.padg_initial_send_time.unwrap_or(now);

            if now.duration_since(initial) >= MAX_PADC_WAIT_TIME {
                warn!(
                    "({},{}): too many PADCs missed, sent {} PADGs over {:?}",
                    self.peer_id,
                    self.session_id,
                    self.padg_tries,
                    now.duration_since(initial)
                );

                return GrantOutcome::Exhausted;
            }

            self.credit_cache = bump_credits(credits, self.credit_cache, self.grant_limit);

            let retry = self.padg_retry_send_time.unwrap_or(now);

            if now.duration_since(retry) < PADG_RETRY_TIME {
                debug!(
                    "({},{}): waiting for PADC seq 0x{:04x}, cached {} credits",
                    self.peer_id, self.session_id, self.padg_seq_num, credits
                );

                return GrantOutcome::Cached;
            }

            // Retransmit the outstanding sequence with zero new credits.
            match self.prepare_padg(0, now) {
                Some(frame) => GrantOutcome::Send(frame),
                None => GrantOutcome::Cached,
            }
        } else {
            match self.prepare_padg(credits, now) {
                Some(frame) => GrantOutcome::Send(frame),
                None => GrantOutcome::Cached,
            }
        }
    }

    /// Build the next PADG. A non-zero request while a grant is outstanding
    /// is refused; a zero request retransmits the outstanding sequence.
    fn prepare_padg(&mut self, mut grant_req: u16, now: Instant) -> Option<PadgFrame> {
        if self.grant_state == GrantState::PadgSent && grant_req != 0 {
            info!(
                "({},{}): grant outstanding, waiting on seq 0x{:04x}",
                self.peer_id, self.session_id, self.padg_seq_num
            );

            return None;
        }

        if self.grant_state == GrantState::PadcReceived {
            self.padg_seq_num = self.padg_seq_num.wrapping_add(1);

            if self.credit_cache > 0 {
                let current_limit = self.grant_limit.saturating_sub(self.peer_credits);

                grant_req = bump_credits(self.credit_cache, grant_req, current_limit);
                self.credit_cache = 0;
            }

            self.credits_pending_padc = grant_req;
            self.padg_initial_send_time = Some(now);
            self.padg_retry_send_time = Some(now);
        } else {
            self.padg_retry_send_time = Some(now);
        }

        self.padg_tries += 1;
        self.grant_state = GrantState::PadgSent;

        Some(PadgFrame {
            seq: self.padg_seq_num,
            fcn: grant_req,
            bcn: self.local_credits,
        })
    }

    /// True when the outstanding PADG should be retransmitted.
    pub fn padg_retry_due(&self, now: Instant) -> bool {
        self.grant_state == GrantState::PadgSent
            && self
                .padg_retry_send_time
                .is_some_and(|t| now.duration_since(t) >= PADG_RETRY_TIME)
    }

    /// True when the PADC wait deadline has passed.
    pub fn padc_deadline_exceeded(&self, now: Instant) -> bool {
        self.grant_state == GrantState::PadgSent
            && self
                .padg_initial_send_time
                .is_some_and(|t| now.duration_since(t) >= MAX_PADC_WAIT_TIME)
    }

    /// Apply a credit grant from a PADG or a PADS credit tag.
    pub fn credit_grant(&mut self, fcn: u16, bcn: u16) {
        self.local_credits = add_saturated(self.local_credits, fcn);
        self.peer_credits = bcn;
    }

    /// Handle a received PADG and produce the PADC reply.
    pub fn recv_padg(&mut self, seq: u16, fcn: u16, bcn: u16) -> PadcFrame {
        self.credit_grant(fcn, bcn);

        debug!(
            "({},{}): PADG fcn:{fcn}, bcn:{bcn}, seq:0x{seq:04x}, local {} peer {}",
            self.peer_id, self.session_id, self.local_credits, self.peer_credits
        );

        PadcFrame {
            seq,
            fcn: self.peer_credits,
            bcn: self.local_credits,
        }
    }

    /// Handle a received PADC.
    pub fn recv_padc(&mut self, seq: u16, fcn: u16, bcn: u16) -> PadcOutcome {
        if seq != self.padg_seq_num {
            info!(
                "({},{}): PADC with incorrect sequence, expected 0x{:04x} received 0x{seq:04x}",
                self.peer_id, self.session_id, self.padg_seq_num
            );

            return PadcOutcome::WrongSeq {
                expected: self.padg_seq_num,
            };
        }

        if self.grant_state == GrantState::PadcReceived {
            info!(
                "({},{}): ignore duplicate PADC sequence 0x{seq:04x}",
                self.peer_id, self.session_id
            );

            return PadcOutcome::Duplicate;
        }

        if self.credits_pending_padc > 0 {
            self.peer_credits = add_saturated(self.peer_credits, self.credits_pending_padc);
            self.credits_pending_padc = 0;
        }

        // Resynchronize both views from the peer's report.
        self.local_credits = fcn;
        self.peer_credits = bcn;
        self.grant_state = GrantState::PadcReceived;
        self.padg_tries = 0;

        PadcOutcome::Synced
    }

    /// Charge credits for a downstream frame and, when flagged, piggyback an
    /// in-band grant. Returns the credits consumed. A shortfall is logged and
    /// the frame is sent anyway, consuming what is left.
    pub fn consume_for_send(&mut self, packet: &mut PppoePacket) -> u16 {
        let mut required = self.compute_local_credits(packet.pppoe_length());

        if self.local_credits < required {
            warn!(
                "({},{}): req credits {required}, not enough local_credits {}, send anyway",
                self.peer_id, self.session_id, self.local_credits
            );

            required = self.local_credits;
        }

        let consumed = if self.send_inband_grant {
            self.insert_inband_grant(packet, self.grant_limit)
        } else {
            required
        };

        self.local_credits = self.local_credits.saturating_sub(consumed);

        debug!(
            "({},{}): required {required}, consumed {consumed}, local_credits {}",
            self.peer_id, self.session_id, self.local_credits
        );

        consumed
    }

    /// Prepend an in-band credit tag unless the tagged frame would exceed the
    /// PPPoE MTU. Returns the credits the tagged (or untagged) frame costs.
    fn insert_inband_grant(&mut self, packet: &mut PppoePacket, credits: u16) -> u16 {
        if packet.inband_would_exceed_mtu() {
            debug!(
                "({},{}): request would exceed MTU, not adding tag",
                self.peer_id, self.session_id
            );

            return self
                .compute_local_credits(packet.pppoe_length())
                .min(self.local_credits);
        }

        let fcn = credits.min(MAX_CREDITS - self.peer_credits);

        packet.insert_inband_credits(fcn, self.local_credits);
        self.peer_credits = add_saturated(self.peer_credits, fcn);
        self.send_inband_grant = false;

        self.compute_local_credits_with_inband(packet.pppoe_length())
    }

    /// Validate and account a session frame received from the peer, stripping
    /// an in-band credit tag when present. Returns the credits the peer
    /// consumed; the frame in `packet` is left carrying plain PPP payload.
    pub fn account_received_frame(
        &mut self,
        packet: &mut PppoePacket,
    ) -> Result<u16, CreditError> {
        let required = if packet.has_inband_credits() {
            let mut required = self.compute_peer_credits_with_inband(packet.pppoe_length());
            let (fcn, bcn) = packet.strip_inband_credits()?;

            self.local_credits = add_saturated(self.local_credits, fcn);

            // The peer's own view of its remaining credits wins when it
            // implies a higher cost than our accounting.
            let router_cost = self.peer_credits.saturating_sub(bcn);

            if router_cost != required {
                if router_cost > required {
                    debug!(
                        "({},{}): using router bcn, cost {router_cost} over {required}",
                        self.peer_id, self.session_id
                    );

                    required = router_cost;
                } else {
                    debug!(
                        "({},{}): peer says bcn {bcn}, our cost {required}, ignore router bcn",
                        self.peer_id, self.session_id
                    );
                }
            }

            required
        } else {
            self.compute_peer_credits(packet.pppoe_length())
        };

        if self.peer_credits < required {
            return Err(CreditError::PeerCreditViolation {
                peer_credits: self.peer_credits,
                required,
            });
        }

        self.peer_credits = self.peer_credits.saturating_sub(required);

        Ok(required)
    }

    /// Bound an operator/aggregator grant request by the grant limit. Returns
    /// `None` when the peer is already at the limit.
    pub fn allowed_grant(&self, req_credits: u16) -> Option<u16> {
        if u32::from(req_credits) + u32::from(self.peer_credits) > u32::from(self.grant_limit) {
            if self.grant_limit < self.peer_credits {
                return None;
            }

            Some(self.grant_limit - self.peer_credits)
        } else {
            Some(req_credits)
        }
    }
}

fn scaled_cost(len: u16, scalar: u16) -> u16 {
    if scalar == 0 {
        return 0;
    }

    len.div_ceil(scalar)
}

fn add_saturated(current: u16, add: u16) -> u16 {
    match current.checked_add(add) {
        Some(v) => v,
        None => MAX_CREDITS,
    }
}

fn bump_credits(add: u16, current: u16, limit: u16) -> u16 {
    add_saturated(current, add).min(limit)
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("peer exceeded credit allowance (peer_credits {peer_credits}, required {required})")]
    PeerCreditViolation { peer_credits: u16, required: u16 },
    #[error(transparent)]
    Packet(#[from] PacketError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{CODE_SESS, ETH_PPPOE_SESSION, MAX_PPPOE_MTU, PPPOE_HDR_SIZE};
    use macaddr::MacAddr6;

    fn engine(scalar: u16) -> CreditEngine {
        let mut e = CreditEngine::new(20, scalar, 256);

        e.session_id = 0x1234;
        e
    }

    fn session_packet(payload_len: usize) -> PppoePacket {
        PppoePacket::new(
            MacAddr6::new(2, 0, 0, 0, 0, 2),
            MacAddr6::new(2, 0, 0, 0, 0, 1),
            ETH_PPPOE_SESSION,
            CODE_SESS,
            0x1234,
            vec![0; payload_len],
        )
    }

    #[test]
    fn mode_selection() {
        let only = engine(0);

        assert_eq!(only.mode, OperatingMode::Rfc4938Only);
        assert_eq!(only.scalar_state, ScalarState::NotNeeded);
        assert_eq!(only.local_scalar, 64);
        assert_eq!(only.peer_scalar, 64);

        let scaling = engine(128);

        assert_eq!(scaling.mode, OperatingMode::Rfc4938Scaling);
        assert_eq!(scaling.scalar_state, ScalarState::Needed);
        assert_eq!(scaling.local_scalar, 128);
        assert_eq!(scaling.peer_scalar, 64);
    }

    #[test]
    fn local_cost_is_ceiling_of_ppp_payload() {
        let e = engine(64);

        // 130 bytes of PPPoE payload is 128 bytes of PPP payload.
        assert_eq!(e.compute_local_credits(130), 2);
        assert_eq!(e.compute_local_credits(131), 3);
        assert_eq!(e.compute_local_credits(2), 0);
        // In-band variant subtracts the 8-byte tag as well.
        assert_eq!(e.compute_local_credits_with_inband(138), 2);
    }

    #[test]
    fn peer_cost_is_zero_without_scaling() {
        let e = engine(0);

        assert_eq!(e.compute_peer_credits(130), 0);

        let e = engine(64);

        assert_eq!(e.compute_peer_credits(130), 2);
    }

    #[test]
    fn padg_seq_increments_only_on_new_grants() {
        let mut e = engine(64);
        let t0 = Instant::now();

        let GrantOutcome::Send(first) = e.out_of_band_grant(10, t0) else {
            panic!("expected send");
        };

        assert_eq!(first.seq, 1);
        assert_eq!(first.fcn, 10);
        assert_eq!(e.grant_state(), GrantState::PadgSent);

        // Within the retry window the grant only accumulates in the cache.
        assert_eq!(
            e.out_of_band_grant(5, t0 + Duration::from_millis(100)),
            GrantOutcome::Cached
        );

        // After the retry window the same sequence goes out with zero credits.
        let GrantOutcome::Send(retry) = e.out_of_band_grant(5, t0 + Duration::from_secs(2)) else {
            panic!("expected retransmit");
        };

        assert_eq!(retry.seq, 1);
        assert_eq!(retry.fcn, 0);

        // PADC acknowledges; the next grant drains the cache into seq 2.
        assert_eq!(e.recv_padc(1, 0, 0), PadcOutcome::Synced);

        let GrantOutcome::Send(second) = e.out_of_band_grant(7, t0 + Duration::from_secs(3))
        else {
            panic!("expected send");
        };

        assert_eq!(second.seq, 2);
        // 7 requested + 10 cached from the refused grants.
        assert_eq!(second.fcn, 17);
    }

    #[test]
    fn padc_wait_deadline_exhausts() {
        let mut e = engine(64);
        let t0 = Instant::now();

        e.out_of_band_grant(10, t0);

        assert!(!e.padc_deadline_exceeded(t0 + Duration::from_secs(59)));
        assert!(e.padc_deadline_exceeded(t0 + MAX_PADC_WAIT_TIME));
        assert_eq!(
            e.out_of_band_grant(1, t0 + MAX_PADC_WAIT_TIME),
            GrantOutcome::Exhausted
        );
    }

    #[test]
    fn recv_padg_replies_with_current_view() {
        let mut e = engine(64);
        let padc = e.recv_padg(1, 10, 240);

        assert_eq!(e.local_credits, 10);
        assert_eq!(e.peer_credits, 240);
        assert_eq!(padc, PadcFrame {
            seq: 1,
            fcn: 240,
            bcn: 10
        });
    }

    #[test]
    fn recv_padg_saturates_local_credits() {
        let mut e = engine(64);

        e.local_credits = MAX_CREDITS - 1;

        e.recv_padg(1, 100, 0);

        assert_eq!(e.local_credits, MAX_CREDITS);
    }

    #[test]
    fn padc_merges_pending_and_resyncs() {
        let mut e = engine(64);
        let t0 = Instant::now();

        e.peer_credits = 20;

        let GrantOutcome::Send(frame) = e.out_of_band_grant(5, t0) else {
            panic!("expected send");
        };

        assert_eq!(frame.fcn, 5);

        // Peer acknowledges with its own counts.
        assert_eq!(e.recv_padc(frame.seq, 123, 25), PadcOutcome::Synced);
        assert_eq!(e.local_credits, 123);
        assert_eq!(e.peer_credits, 25);
        assert_eq!(e.grant_state(), GrantState::PadcReceived);

        // A duplicate PADC must not double-credit.
        assert_eq!(e.recv_padc(frame.seq, 123, 25), PadcOutcome::Duplicate);
        assert_eq!(e.peer_credits, 25);
    }

    #[test]
    fn padc_wrong_seq_ignored() {
        let mut e = engine(64);
        let t0 = Instant::now();

        e.out_of_band_grant(5, t0);

        assert_eq!(
            e.recv_padc(9, 1, 1),
            PadcOutcome::WrongSeq { expected: 1 }
        );
        assert_eq!(e.grant_state(), GrantState::PadgSent);
        assert_eq!(e.local_credits, 0);
    }

    #[test]
    fn consume_shortfall_sends_anyway() {
        let mut e = engine(64);

        e.local_credits = 1;

        let mut pkt = session_packet(130);
        let consumed = e.consume_for_send(&mut pkt);

        assert_eq!(consumed, 1);
        assert_eq!(e.local_credits, 0);
    }

    #[test]
    fn inband_send_grants_and_charges_tag() {
        let mut e = engine(64);

        e.local_credits = 100;
        e.send_inband_grant = true;

        let mut pkt = session_packet(130);
        let consumed = e.consume_for_send(&mut pkt);

        assert!(pkt.has_inband_credits());
        assert!(!e.send_inband_grant);
        assert_eq!(e.peer_credits, 256);
        // 130 + 8 bytes of tag, minus PPP and tag overhead is 128 -> 2.
        assert_eq!(consumed, 2);
        assert_eq!(e.local_credits, 98);
    }

    #[test]
    fn inband_send_caps_fcn_at_max() {
        let mut e = engine(64);

        e.peer_credits = MAX_CREDITS - 10;
        e.send_inband_grant = true;
        e.local_credits = 50;

        let mut pkt = session_packet(10);

        e.consume_for_send(&mut pkt);

        assert_eq!(e.peer_credits, MAX_CREDITS);

        let (fcn, _) = pkt.strip_inband_credits().unwrap();

        assert_eq!(fcn, 10);
    }

    #[test]
    fn inband_send_skipped_at_mtu() {
        let mut e = engine(64);

        e.local_credits = 100;
        e.send_inband_grant = true;

        let mut pkt = session_packet(MAX_PPPOE_MTU - PPPOE_HDR_SIZE - 7);

        e.consume_for_send(&mut pkt);

        assert!(!pkt.has_inband_credits());
        // The flag stays set for the next smaller frame.
        assert!(e.send_inband_grant);
        assert_eq!(e.peer_credits, 0);
    }

    #[test]
    fn account_received_inband_frame() {
        let mut e = engine(64);

        e.peer_credits = 130;

        // 130 bytes of payload after the 8-byte tag is stripped.
        let mut pkt = session_packet(130);

        pkt.insert_inband_credits(7, 128);

        let consumed = e.account_received_frame(&mut pkt).unwrap();

        assert_eq!(e.local_credits, 7);
        assert_eq!(consumed, 2);
        assert_eq!(e.peer_credits, 128);
        assert!(!pkt.has_inband_credits());
        assert_eq!(pkt.pppoe_length(), 130);
    }

    #[test]
    fn account_received_inband_violation_drops() {
        let mut e = engine(64);

        e.peer_credits = 1;

        let mut pkt = session_packet(130);

        pkt.insert_inband_credits(0, 0);

        assert!(matches!(
            e.account_received_frame(&mut pkt),
            Err(CreditError::PeerCreditViolation { .. })
        ));
    }

    #[test]
    fn account_received_prefers_router_view_when_costlier() {
        let mut e = engine(64);

        e.peer_credits = 100;

        let mut pkt = session_packet(130);

        // bcn of 90 implies a cost of 10, above our computed 2.
        pkt.insert_inband_credits(0, 90);

        let consumed = e.account_received_frame(&mut pkt).unwrap();

        assert_eq!(consumed, 10);
        assert_eq!(e.peer_credits, 90);
    }

    #[test]
    fn allowed_grant_bounded_by_limit() {
        let mut e = engine(64);

        e.peer_credits = 200;

        assert_eq!(e.allowed_grant(100), Some(56));
        assert_eq!(e.allowed_grant(10), Some(10));

        e.peer_credits = 300;

        assert_eq!(e.allowed_grant(10), None);
    }
}
