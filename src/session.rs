pub mod discovery;
pub mod lcp;

use crate::credit::{CreditEngine, GrantOutcome, OperatingMode, PadcFrame, PadgFrame};
use crate::msg::{CtlMessage, PadqParams};
use crate::packet::{
    discovery_packet, PppoePacket, BROADCAST_MAC, CODE_PADC, CODE_PADG, CODE_PADQ, CODE_PADT,
    CODE_SESS,
};
use crate::tags::{self, LinkMetrics, Tag, TAG_RFC4938_CREDITS, TAG_RFC4938_SEQ_NUM};
use log::{debug, error, info, warn};
use macaddr::MacAddr6;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ZERO_MAC: MacAddr6 = MacAddr6::new(0, 0, 0, 0, 0, 0);
const HOUSEKEEPING_TICK: Duration = Duration::from_millis(500);
const PADT_PAUSE: Duration = Duration::from_secs(1);

/// Where the discovery handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    SentPadi,
    ReceivedPado,
    SentPadr,
    Session,
    Terminated,
}

/// Parameters a session worker is spawned with.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub peer_id: u32,
    pub parent_id: u32,
    pub host_id: u32,
    pub my_port: u16,
    pub peer_pid: u32,
    pub my_eth: MacAddr6,
    pub service_name: String,
    pub ac_name: Option<String>,
    pub use_host_uniq: bool,
    pub credit_scalar: u16,
    pub grant_limit: u16,
    pub timed_credits: u16,
    pub p2p_mode: bool,
    pub lcp_echo_reply: bool,
    pub session_timeout: u16,
    pub eth_discovery: u16,
    pub eth_session: u16,
}

/// A control message from a worker, tagged with its sender and sequence
/// number for missed-message accounting.
#[derive(Debug)]
pub struct Envelope {
    pub neighbor_id: u32,
    pub seq: u32,
    pub msg: CtlMessage,
}

/// The supervisor's handle to a running worker.
pub struct WorkerHandle {
    pub tx: UnboundedSender<CtlMessage>,
    pub cancel: CancellationToken,
}

impl WorkerHandle {
    pub fn send(&self, msg: CtlMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Spawn the session worker task for one neighbor.
pub fn spawn(params: SessionParams, to_supervisor: UnboundedSender<Envelope>) -> WorkerHandle {
    let (tx, rx) = unbounded_channel();
    let cancel = CancellationToken::new();
    let worker = SessionWorker::new(params, rx, to_supervisor, cancel.clone());

    tokio::spawn(worker.run());

    WorkerHandle { tx, cancel }
}

/// How a session ended; drives the PADT-first tear-down.
struct SessionEnd {
    reason: String,
    tell_parent: bool,
    pause: bool,
}

/// Per-neighbor PPPoE client: discovery handshake, then the credit-governed
/// session phase.
pub struct SessionWorker {
    params: SessionParams,
    rx: UnboundedReceiver<CtlMessage>,
    to_supervisor: UnboundedSender<Envelope>,
    cancel: CancellationToken,
    seqnum: u32,
    pub(crate) discovery_state: DiscoveryState,
    pub(crate) session_id: u16,
    pub(crate) peer_eth: MacAddr6,
    pub(crate) num_pados: u32,
    pub(crate) ac_cookie: Option<Tag>,
    pub(crate) relay_id: Option<Tag>,
    pub(crate) credits: CreditEngine,
    peer_pid: u32,
    local_magic: u32,
    peer_magic: u32,
    last_activity: Instant,
}

impl SessionWorker {
    fn new(
        params: SessionParams,
        rx: UnboundedReceiver<CtlMessage>,
        to_supervisor: UnboundedSender<Envelope>,
        cancel: CancellationToken,
    ) -> Self {
        let credits = CreditEngine::new(params.peer_id, params.credit_scalar, params.grant_limit);
        let peer_pid = params.peer_pid;

        Self {
            params,
            rx,
            to_supervisor,
            cancel,
            seqnum: 0,
            discovery_state: DiscoveryState::SentPadi,
            session_id: 0,
            peer_eth: ZERO_MAC,
            num_pados: 0,
            ac_cookie: None,
            relay_id: None,
            credits,
            peer_pid,
            local_magic: 0,
            peer_magic: 0,
            last_activity: Instant::now(),
        }
    }

    async fn run(mut self) {
        self.notify(CtlMessage::ChildReady {
            neighbor_id: self.params.peer_id,
            port: self.params.my_port,
            pid: self.params.host_id,
        });

        info!(
            "({},{}): begin discovery phase",
            self.params.peer_id, self.session_id
        );

        let end = match discovery::run(&mut self).await {
            Ok(session_id) => {
                info!(
                    "({},{}): discovery phase completed",
                    self.params.peer_id, self.session_id
                );

                self.notify(CtlMessage::ChildSessionUp {
                    neighbor_id: self.params.peer_id,
                    session_id,
                    pid: self.params.host_id,
                });

                info!(
                    "({},{}): begin session phase",
                    self.params.peer_id, self.session_id
                );

                self.session_phase().await
            }
            Err(SessionError::Stopped) => SessionEnd {
                reason: "received terminate signal".to_string(),
                tell_parent: false,
                pause: false,
            },
            Err(e) => SessionEnd {
                reason: e.to_string(),
                tell_parent: true,
                pause: true,
            },
        };

        self.discovery_state = DiscoveryState::Terminated;
        self.send_padt(&end.reason);

        if end.pause {
            tokio::time::sleep(PADT_PAUSE).await;
        }

        if end.tell_parent {
            self.notify(CtlMessage::ChildSessionTerminated {
                neighbor_id: self.params.peer_id,
                session_id: self.session_id,
            });
        }

        info!(
            "({},{}): session phase completed: {}",
            self.params.peer_id, self.session_id, end.reason
        );
    }

    /// Steady state: route frames and grants until something terminal
    /// happens.
    async fn session_phase(&mut self) -> SessionEnd {
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_TICK);
        let mut timed_grant = (self.params.timed_credits > 0).then(|| {
            let period = Duration::from_secs(self.params.timed_credits.into());

            tokio::time::interval_at(Instant::now() + period, period)
        });

        self.last_activity = Instant::now();

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return SessionEnd {
                        reason: "received terminate signal".to_string(),
                        tell_parent: false,
                        pause: false,
                    };
                }
                _ = housekeeping.tick() => self.housekeeping(),
                _ = async {
                    match timed_grant.as_mut() {
                        Some(t) => { t.tick().await; }
                        None => std::future::pending().await,
                    }
                } => self.timed_grant(),
                v = self.rx.recv() => match v {
                    Some(msg) => self.handle_message(msg),
                    None => Err(SessionError::Stopped),
                },
            };

            match result {
                Ok(()) => {}
                Err(SessionError::Stopped) => {
                    return SessionEnd {
                        reason: "Received session_stop message from parent".to_string(),
                        tell_parent: false,
                        pause: false,
                    };
                }
                Err(SessionError::PeerTerminated) => {
                    return SessionEnd {
                        reason: "Received PADT from peer".to_string(),
                        tell_parent: true,
                        pause: false,
                    };
                }
                Err(e) => {
                    return SessionEnd {
                        reason: e.to_string(),
                        tell_parent: true,
                        pause: true,
                    };
                }
            }
        }
    }

    fn handle_message(&mut self, msg: CtlMessage) -> Result<(), SessionError> {
        match msg {
            CtlMessage::SessionStop => Err(SessionError::Stopped),
            CtlMessage::SessionStartReady { pid, .. } => {
                info!(
                    "({},{}): peer pid set to {pid}",
                    self.params.peer_id, self.session_id
                );

                self.peer_pid = pid;

                Ok(())
            }
            CtlMessage::SessionPadq(padq) => {
                self.send_padq(&padq);

                Ok(())
            }
            CtlMessage::SessionPadg { credits } => self.handle_grant_request(credits),
            CtlMessage::PeerSessionData { data, .. } => self.handle_peer_payload(data),
            CtlMessage::FrameData { proto, data, .. } => self.handle_wire_frame(proto, &data),
            other => {
                debug!(
                    "({},{}): unsupported ctrl command 0x{:02x}, drop",
                    self.params.peer_id,
                    self.session_id,
                    other.cmd_code()
                );

                Ok(())
            }
        }
    }

    /// PADG retry window, PADC deadline and session inactivity.
    fn housekeeping(&mut self) -> Result<(), SessionError> {
        let now = Instant::now().into_std();

        if self.credits.padc_deadline_exceeded(now) {
            return Err(SessionError::PadgRetriesExceeded);
        }

        if self.credits.padg_retry_due(now) {
            match self.credits.out_of_band_grant(0, now) {
                GrantOutcome::Send(frame) => self.send_padg(frame),
                GrantOutcome::Exhausted => return Err(SessionError::PadgRetriesExceeded),
                GrantOutcome::Cached => {}
            }
        }

        if self.params.session_timeout > 0
            && Instant::now().duration_since(self.last_activity)
                >= Duration::from_secs(self.params.session_timeout.into())
        {
            return Err(SessionError::InactivityTimeout);
        }

        Ok(())
    }

    /// Timed-credit mode: grant the full limit on every interval.
    fn timed_grant(&mut self) -> Result<(), SessionError> {
        self.grant(self.credits.grant_limit)
    }

    fn grant(&mut self, credits: u16) -> Result<(), SessionError> {
        match self
            .credits
            .out_of_band_grant(credits, Instant::now().into_std())
        {
            GrantOutcome::Send(frame) => {
                self.send_padg(frame);

                Ok(())
            }
            GrantOutcome::Cached => Ok(()),
            GrantOutcome::Exhausted => Err(SessionError::PadgRetriesExceeded),
        }
    }

    /// An operator or aggregator grant request, bounded by the grant limit.
    fn handle_grant_request(&mut self, req_credits: u16) -> Result<(), SessionError> {
        let Some(allowed) = self.credits.allowed_grant(req_credits) else {
            debug!(
                "({},{}): req_credits {req_credits} already at limit, not sending PADG",
                self.params.peer_id, self.session_id
            );

            return Ok(());
        };

        if self.params.timed_credits > 0 {
            debug!(
                "({},{}): timed grant amount updated to {allowed}",
                self.params.peer_id, self.session_id
            );

            self.credits.grant_limit = allowed;

            Ok(())
        } else {
            self.grant(allowed)
        }
    }

    /// Session payload from the remote peer: rebuild the wire frame, charge
    /// local credits and write it to the device.
    fn handle_peer_payload(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        if self.session_id == 0 {
            warn!(
                "({}): session id has not been established, drop msg",
                self.params.peer_id
            );

            return Ok(());
        }

        let mut pkt = PppoePacket::new(
            self.peer_eth,
            self.params.my_eth,
            self.params.eth_session,
            CODE_SESS,
            self.session_id,
            data,
        );

        if self.peer_magic == 0 {
            if let Some(magic) = lcp::config_req_magic(&pkt) {
                debug!(
                    "({},{}): acquired peer magic number 0x{magic:08x}",
                    self.params.peer_id, self.session_id
                );

                self.peer_magic = magic;
            }
        }

        self.credits.consume_for_send(&mut pkt);
        self.send_frame_to_device(&pkt);

        Ok(())
    }

    /// A frame from the device, fanned out to us by the supervisor.
    fn handle_wire_frame(&mut self, proto: u16, frame: &[u8]) -> Result<(), SessionError> {
        let pkt = match PppoePacket::deserialize(frame) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "({},{}): {e}, drop packet",
                    self.params.peer_id, self.session_id
                );

                return Ok(());
            }
        };

        if proto == self.params.eth_discovery {
            self.handle_wire_discovery_frame(&pkt)
        } else {
            self.handle_wire_session_frame(pkt)
        }
    }

    fn handle_wire_discovery_frame(&mut self, pkt: &PppoePacket) -> Result<(), SessionError> {
        if pkt.session_id != self.session_id {
            debug!(
                "({},{}): pkt session mismatch {} != {}",
                self.params.peer_id, self.session_id, pkt.session_id, self.session_id
            );

            return Ok(());
        }

        self.last_activity = Instant::now();

        match pkt.code {
            CODE_PADT => {
                if pkt.dst != self.params.my_eth || pkt.src != self.peer_eth {
                    debug!(
                        "({},{}): PADT eth addrs not for me, drop packet",
                        self.params.peer_id, self.session_id
                    );

                    return Ok(());
                }

                info!(
                    "({},{}): session terminated -- received PADT from peer",
                    self.params.peer_id, self.session_id
                );

                if let Ok(tag_list) = pkt.tags() {
                    for tag in tag_list.iter().filter(|t| t.is_error()) {
                        error!(
                            "({},{}): PADT error tag: {}",
                            self.params.peer_id,
                            self.session_id,
                            String::from_utf8_lossy(error_text(tag))
                        );
                    }
                }

                Err(SessionError::PeerTerminated)
            }
            CODE_PADG => {
                self.recv_padg(pkt);

                Ok(())
            }
            CODE_PADC => {
                self.recv_padc(pkt);

                Ok(())
            }
            CODE_PADQ => {
                self.recv_padq(pkt);

                Ok(())
            }
            other => {
                debug!(
                    "({},{}): unexpected discovery code 0x{other:02x}, drop",
                    self.params.peer_id, self.session_id
                );

                Ok(())
            }
        }
    }

    /// Session frame from the wire peer: validate, credit-account (in-band
    /// aware), intercept LCP where configured, then forward the payload to
    /// the remote neighbor.
    fn handle_wire_session_frame(&mut self, mut pkt: PppoePacket) -> Result<(), SessionError> {
        if pkt.code != CODE_SESS {
            warn!(
                "({},{}): unexpected packet code 0x{:02x}, drop packet",
                self.params.peer_id, self.session_id, pkt.code
            );

            return Ok(());
        }

        if pkt.dst != self.params.my_eth {
            debug!(
                "({},{}): dst eth not for me, drop packet",
                self.params.peer_id, self.session_id
            );

            return Ok(());
        }

        if pkt.src != self.peer_eth {
            debug!(
                "({},{}): src eth not from peer, drop packet",
                self.params.peer_id, self.session_id
            );

            return Ok(());
        }

        if pkt.session_id != self.session_id {
            debug!(
                "({},{}): session {} not for me, drop packet",
                self.params.peer_id, self.session_id, pkt.session_id
            );

            return Ok(());
        }

        self.last_activity = Instant::now();

        let consumed = match self.credits.account_received_frame(&mut pkt) {
            Ok(v) => v,
            Err(e) => {
                error!(
                    "({},{}): {e}, drop packet",
                    self.params.peer_id, self.session_id
                );

                return Ok(());
            }
        };

        // In broadcast mode the local stack has no real PPP responder, so
        // LCP and IPCP negotiation is synthesized right here.
        if !self.params.p2p_mode {
            let echo_magic =
                (self.params.lcp_echo_reply && self.peer_magic != 0).then_some(self.peer_magic);

            if let lcp::BcOutcome::Consume(replies) = lcp::process_bc_mode(&pkt, echo_magic) {
                for reply in replies {
                    self.send_frame_to_device(&reply);
                }

                return Ok(());
            }
        }

        if self.local_magic == 0 {
            if let Some(magic) = lcp::config_req_magic(&pkt) {
                debug!(
                    "({},{}): acquired local magic number 0x{magic:08x}",
                    self.params.peer_id, self.session_id
                );

                self.local_magic = magic;
            }
        }

        if self.params.lcp_echo_reply && self.peer_magic != 0 {
            if let Some(reply) = lcp::echo_reply(&pkt, self.peer_magic) {
                debug!(
                    "({},{}): bounce LCP echo reply with magic 0x{:08x}",
                    self.params.peer_id, self.session_id, self.peer_magic
                );

                self.send_frame_to_device(&reply);

                return Ok(());
            }
        }

        self.notify(CtlMessage::ChildSessionData {
            neighbor_id: self.params.peer_id,
            credits: consumed,
            data: pkt.payload,
        });

        Ok(())
    }

    fn recv_padg(&mut self, pkt: &PppoePacket) {
        let Some((seq, fcn, bcn)) = grant_tags(pkt) else {
            error!(
                "({},{}): missing sequence or credit tag in PADG packet",
                self.params.peer_id, self.session_id
            );

            return;
        };

        let reply = self.credits.recv_padg(seq, fcn, bcn);

        self.send_padc(reply);
    }

    fn recv_padc(&mut self, pkt: &PppoePacket) {
        let Some((seq, fcn, bcn)) = grant_tags(pkt) else {
            error!(
                "({},{}): missing sequence or credit tag in PADC packet, ignore",
                self.params.peer_id, self.session_id
            );

            return;
        };

        self.credits.recv_padc(seq, fcn, bcn);
    }

    fn recv_padq(&mut self, pkt: &PppoePacket) {
        match pkt
            .tags()
            .ok()
            .and_then(|t| tags::find(&t, tags::TAG_RFC4938_METRICS).cloned())
        {
            Some(Tag::Metrics(_)) => {
                // A peer answering our PADQ carries data; ignore it.
                debug!(
                    "({},{}): received a PADQ packet from the peer, ignore",
                    self.params.peer_id, self.session_id
                );
            }
            _ => {
                debug!(
                    "({},{}): received PADQ query packet",
                    self.params.peer_id, self.session_id
                );
            }
        }
    }

    fn send_padg(&mut self, frame: PadgFrame) {
        if self.session_id == 0 {
            info!(
                "({}): no session info, not sending PADG",
                self.params.peer_id
            );

            return;
        }

        let pkt = discovery_packet(
            self.peer_eth,
            self.params.my_eth,
            self.params.eth_discovery,
            CODE_PADG,
            self.session_id,
            &[
                Tag::SeqNum(frame.seq),
                Tag::Credits {
                    fcn: frame.fcn,
                    bcn: frame.bcn,
                },
            ],
        );

        debug!(
            "({},{}): sent PADG fcn:{} (peer), bcn:{} (local), seq:0x{:04x}, try {}",
            self.params.peer_id,
            self.session_id,
            frame.fcn,
            frame.bcn,
            frame.seq,
            self.credits.padg_tries()
        );

        self.send_frame_to_device(&pkt);
    }

    fn send_padc(&mut self, frame: PadcFrame) {
        if self.session_id == 0 {
            info!(
                "({}): no session info, not sending PADC",
                self.params.peer_id
            );

            return;
        }

        let pkt = discovery_packet(
            self.peer_eth,
            self.params.my_eth,
            self.params.eth_discovery,
            CODE_PADC,
            self.session_id,
            &[
                Tag::SeqNum(frame.seq),
                Tag::Credits {
                    fcn: frame.fcn,
                    bcn: frame.bcn,
                },
            ],
        );

        debug!(
            "({},{}): sent PADC fcn:{} (peer), bcn:{} (local), seq:0x{:04x}",
            self.params.peer_id, self.session_id, frame.fcn, frame.bcn, frame.seq
        );

        self.send_frame_to_device(&pkt);
    }

    fn send_padq(&mut self, padq: &PadqParams) {
        if self.session_id == 0 {
            info!(
                "({}): no session info, not sending PADQ",
                self.params.peer_id
            );

            return;
        }

        if padq.receive_only > 1 {
            error!(
                "({},{}): receive_only value must be <= 1",
                self.params.peer_id, self.session_id
            );

            return;
        }

        let scaling = self.credits.mode == OperatingMode::Rfc4938Scaling;

        if scaling && (padq.mdr_scale > 3 || padq.cdr_scale > 3) {
            error!(
                "({},{}): data rate scale values must be <= 3",
                self.params.peer_id, self.session_id
            );

            return;
        }

        let metrics = LinkMetrics {
            receive_only: padq.receive_only != 0,
            rlq: padq.rlq,
            resources: padq.resources,
            latency: padq.latency,
            cdr_scale: if scaling { padq.cdr_scale as u8 } else { 0 },
            cdr: padq.cdr,
            mdr_scale: if scaling { padq.mdr_scale as u8 } else { 0 },
            mdr: padq.mdr,
        };

        let pkt = discovery_packet(
            self.peer_eth,
            self.params.my_eth,
            self.params.eth_discovery,
            CODE_PADQ,
            self.session_id,
            &[Tag::Metrics(metrics)],
        );

        debug!(
            "({},{}): sent PADQ mdr:{} cdr:{} latency:{} resources:{} rlq:{}",
            self.params.peer_id,
            self.session_id,
            padq.mdr,
            padq.cdr,
            padq.latency,
            padq.resources,
            padq.rlq
        );

        self.send_frame_to_device(&pkt);
    }

    fn send_padt(&mut self, msg: &str) {
        let dst = if self.peer_eth == ZERO_MAC {
            BROADCAST_MAC
        } else {
            self.peer_eth
        };

        let tag_list = if msg.is_empty() {
            Vec::new()
        } else {
            vec![Tag::GenericError(msg.as_bytes().to_vec())]
        };

        let pkt = discovery_packet(
            dst,
            self.params.my_eth,
            self.params.eth_discovery,
            CODE_PADT,
            self.session_id,
            &tag_list,
        );

        info!(
            "({},{}): sent PADT: {msg}",
            self.params.peer_id, self.session_id
        );

        self.send_frame_to_device(&pkt);
    }

    pub(crate) fn send_frame_to_device(&mut self, pkt: &PppoePacket) {
        self.notify(CtlMessage::FrameData {
            session_id: pkt.session_id,
            proto: pkt.ether_type,
            data: pkt.serialize(),
        });
    }

    /// Send a control message up to the supervisor. The sequence counter is
    /// consumed only on successful send.
    fn notify(&mut self, msg: CtlMessage) {
        let envelope = Envelope {
            neighbor_id: self.params.peer_id,
            seq: self.seqnum,
            msg,
        };

        if self.to_supervisor.send(envelope).is_ok() {
            self.seqnum = self.seqnum.wrapping_add(1);
        }
    }

    pub(crate) fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery_state
    }

    /// Wait for the next discovery-EtherType frame from the wire, handling
    /// control messages that may interleave. `Ok(None)` means the deadline
    /// passed.
    pub(crate) async fn recv_discovery_frame(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<PppoePacket>, SessionError> {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Stopped),
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                v = self.rx.recv() => match v {
                    Some(v) => v,
                    None => return Err(SessionError::Stopped),
                },
            };

            match msg {
                CtlMessage::FrameData { proto, data, .. }
                    if proto == self.params.eth_discovery =>
                {
                    match PppoePacket::deserialize(&data) {
                        Ok(pkt) => return Ok(Some(pkt)),
                        Err(e) => {
                            warn!(
                                "({},{}): {e}, ignore frame",
                                self.params.peer_id, self.session_id
                            );
                        }
                    }
                }
                CtlMessage::SessionStop => return Err(SessionError::Stopped),
                CtlMessage::SessionStartReady { pid, .. } => self.peer_pid = pid,
                other => {
                    debug!(
                        "({},{}): not in session, dropping command 0x{:02x}",
                        self.params.peer_id,
                        self.session_id,
                        other.cmd_code()
                    );
                }
            }
        }
    }
}

fn grant_tags(pkt: &PppoePacket) -> Option<(u16, u16, u16)> {
    let tag_list = pkt.tags().ok()?;
    let seq = match tags::find(&tag_list, TAG_RFC4938_SEQ_NUM)? {
        Tag::SeqNum(v) => *v,
        _ => return None,
    };
    let (fcn, bcn) = match tags::find(&tag_list, TAG_RFC4938_CREDITS)? {
        Tag::Credits { fcn, bcn } => (*fcn, *bcn),
        _ => return None,
    };

    Some((seq, fcn, bcn))
}

fn error_text(tag: &Tag) -> &[u8] {
    match tag {
        Tag::ServiceNameError(v) | Tag::AcSystemError(v) | Tag::GenericError(v) => v,
        _ => &[],
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Timeout waiting for {0} packets")]
    DiscoveryTimeout(&'static str),
    #[error("credit/scaling mismatch")]
    ScalarMismatch,
    #[error("discovery error: {0}")]
    DiscoveryError(String),
    #[error("Number of PADG retries exceeded")]
    PadgRetriesExceeded,
    #[error("Inactivity timeout")]
    InactivityTimeout,
    #[error("received PADT from peer")]
    PeerTerminated,
    #[error("received terminate signal")]
    Stopped,
}
