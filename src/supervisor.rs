use crate::config::Config;
use crate::device::Device;
use crate::metrics::{MetricsAction, MetricsAggregator, NBR_INIT_TIMEOUT};
use crate::msg::{CtlMessage, MsgError};
use crate::neighbor::{NeighborTable, SessionState};
use crate::session::{self, Envelope, SessionParams};
use crate::transport::{Transport, TransportError, TransportEvent, TransportHandle};
use erdp::ErrorDisplay;
use log::{debug, error, info, warn};
use macaddr::MacAddr6;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

const PPPOE_START_PORT: u16 = 10000;
const EXPIRY_TICK: Duration = Duration::from_secs(5);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);

/// Who asked for a neighbor tear-down; decides which notifications go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdSource {
    Local,
    Cli,
    Peer,
    Transport,
    Child,
}

/// Frames and datagrams collected by the reader tasks.
enum Event {
    DeviceFrame(Vec<u8>),
    Cli { from: SocketAddr, data: Vec<u8> },
}

/// The per-node supervisor: owns the neighbor table, the device and CLI
/// sockets, the transport adapter and the metrics aggregator, and routes
/// everything between them and the session workers.
pub struct Supervisor {
    config: Config,
    host_id: u32,
    my_eth: MacAddr6,
    device: Arc<Device>,
    cli_sock: Arc<UdpSocket>,
    transport: TransportHandle,
    transport_rx: UnboundedReceiver<TransportEvent>,
    events_rx: UnboundedReceiver<Event>,
    worker_tx: UnboundedSender<Envelope>,
    worker_rx: UnboundedReceiver<Envelope>,
    grants_tx: UnboundedSender<(u32, u16)>,
    grants_rx: UnboundedReceiver<(u32, u16)>,
    table: NeighborTable,
    aggregator: MetricsAggregator,
    seqnum: u32,
    rolling_port: u16,
    running: CancellationToken,
}

impl Supervisor {
    pub async fn start(config: Config) -> Result<Self, SupervisorError> {
        let host_id = std::process::id();
        let (device, my_eth) = Device::open(&config)?;
        let device = Arc::new(device);

        info!(
            "({}): device {} open, hwaddr {my_eth}",
            config.node_id, config.iface
        );

        let cli_sock = Arc::new(
            UdpSocket::bind(("127.0.0.1", config.port))
                .await
                .map_err(SupervisorError::CliBind)?,
        );

        let running = CancellationToken::new();
        let (transport_tx, transport_rx) = unbounded_channel();
        let transport = Transport::connect(
            &config.transport_endpoint,
            &config.platform_endpoint,
            config.flow_control_enabled,
            Duration::from_secs(config.hello_interval.into()),
        )
        .await?
        .start(transport_tx, running.clone());

        let (events_tx, events_rx) = unbounded_channel();

        tokio::spawn(run_device_reader(
            device.clone(),
            events_tx.clone(),
            running.clone(),
        ));
        tokio::spawn(run_cli_reader(cli_sock.clone(), events_tx, running.clone()));

        let (worker_tx, worker_rx) = unbounded_channel();
        let (grants_tx, grants_rx) = unbounded_channel();
        let table = NeighborTable::new(config.max_neighbors);
        let aggregator = MetricsAggregator::new(&config);

        Ok(Self {
            config,
            host_id,
            my_eth,
            device,
            cli_sock,
            transport,
            transport_rx,
            events_rx,
            worker_tx,
            worker_rx,
            grants_tx,
            grants_rx,
            table,
            aggregator,
            seqnum: 0,
            rolling_port: PPPOE_START_PORT,
            running,
        })
    }

    /// The supervisor's routing loop. Returns on SIGINT/SIGHUP/SIGTERM.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let mut sigint = signal(SignalKind::interrupt()).map_err(SupervisorError::Signals)?;
        let mut sighup = signal(SignalKind::hangup()).map_err(SupervisorError::Signals)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signals)?;
        let mut expiry = tokio::time::interval(EXPIRY_TICK);

        info!("({}): supervisor up, port {}", self.config.node_id, self.config.port);

        loop {
            tokio::select! {
                v = self.events_rx.recv() => match v {
                    Some(Event::DeviceFrame(frame)) => self.handle_device_frame(&frame),
                    Some(Event::Cli { from, data }) => self.handle_cli(from, &data),
                    None => break,
                },
                v = self.worker_rx.recv() => match v {
                    Some(envelope) => self.handle_worker_envelope(envelope),
                    None => break,
                },
                v = self.transport_rx.recv() => match v {
                    Some(event) => self.handle_transport_event(event),
                    None => break,
                },
                v = self.grants_rx.recv() => {
                    if let Some((neighbor_id, credits)) = v {
                        self.handle_grant_due(neighbor_id, credits);
                    }
                },
                _ = expiry.tick() => self.expire_neighbors(),
                _ = sigint.recv() => break,
                _ = sighup.recv() => break,
                _ = sigterm.recv() => break,
            }
        }

        info!("({}): shutting down", self.config.node_id);
        self.shutdown().await;

        Ok(())
    }

    /// Fan a frame from the device out to the workers whose session it
    /// belongs to. Discovery traffic with session id 0 goes to every worker
    /// that is at least READY.
    fn handle_device_frame(&mut self, frame: &[u8]) {
        let Some((proto, session_id)) = frame_keys(frame) else {
            debug!("({}): runt device frame, drop", self.config.node_id);

            return;
        };

        for nbr in self.table.iter() {
            let Some(handle) = &nbr.handle else {
                continue;
            };

            let wanted = nbr.session_id == session_id
                || (nbr.session_id == 0 && nbr.state >= SessionState::Ready);

            if wanted {
                handle.send(CtlMessage::FrameData {
                    session_id,
                    proto,
                    data: frame.to_vec(),
                });
            }
        }
    }

    fn handle_cli(&mut self, from: SocketAddr, data: &[u8]) {
        let (_, msg) = match CtlMessage::decode(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("({}): bad CLI datagram: {e}", self.config.node_id);

                return;
            }
        };

        match msg {
            CtlMessage::CliSessionInitiate {
                neighbor_id,
                credit_scalar,
            } => {
                info!(
                    "({}): CLI initiate nbr {neighbor_id}, credit_scalar {credit_scalar}",
                    self.config.node_id
                );

                if neighbor_id == 0 {
                    for id in self.table.ids() {
                        self.initiate_neighbor(id, 0, credit_scalar);
                    }
                } else {
                    self.initiate_neighbor(neighbor_id, 0, credit_scalar);
                }
            }
            CtlMessage::CliSessionTerminate { neighbor_id } => {
                info!(
                    "({}): CLI terminate nbr {neighbor_id}",
                    self.config.node_id
                );

                if neighbor_id == 0 {
                    for id in self.table.ids() {
                        self.terminate_neighbor(id, CmdSource::Cli);
                    }
                } else {
                    self.terminate_neighbor(neighbor_id, CmdSource::Cli);
                }
            }
            CtlMessage::CliSessionPadq { neighbor_id, padq } => {
                self.send_to_active_worker(neighbor_id, CtlMessage::SessionPadq(padq));
            }
            CtlMessage::CliSessionPadg {
                neighbor_id,
                credits,
            } => {
                self.send_to_active_worker(neighbor_id, CtlMessage::SessionPadg { credits });
            }
            CtlMessage::CliSessionShow => self.send_show_response(from),
            other => {
                warn!(
                    "({}): unsupported CLI command 0x{:02x}",
                    self.config.node_id,
                    other.cmd_code()
                );
            }
        }
    }

    fn send_show_response(&mut self, to: SocketAddr) {
        let lines: Vec<(u32, String)> = self
            .table
            .iter()
            .map(|n| (n.neighbor_id, n.show_line()))
            .collect();

        for (neighbor_id, text) in lines {
            self.send_cli(to, CtlMessage::CliSessionShowResponse { neighbor_id, text });
        }

        // Terminating record so the tool knows the walk is over.
        self.send_cli(
            to,
            CtlMessage::CliSessionShowResponse {
                neighbor_id: 0,
                text: String::new(),
            },
        );
    }

    fn send_cli(&mut self, to: SocketAddr, msg: CtlMessage) {
        let buf = msg.encode(self.seqnum);

        match self.cli_sock.try_send_to(&buf, to) {
            Ok(_) => self.seqnum = self.seqnum.wrapping_add(1),
            Err(e) => warn!(
                "({}): CLI send to {to} failed: {}",
                self.config.node_id,
                e.display()
            ),
        }
    }

    fn handle_worker_envelope(&mut self, envelope: Envelope) {
        if let Some(nbr) = self.table.get_mut(envelope.neighbor_id) {
            nbr.record_seqnum(envelope.seq);
        }

        match envelope.msg {
            CtlMessage::ChildReady {
                neighbor_id,
                port,
                pid,
            } => {
                info!(
                    "({}): nbr {neighbor_id} child ready, port {port}, pid {pid}",
                    self.config.node_id
                );

                if let Some(nbr) = self.table.get_mut(neighbor_id) {
                    nbr.state = SessionState::Ready;
                    nbr.child_port = port;
                    nbr.child_pid = pid;
                }
            }
            CtlMessage::ChildSessionUp {
                neighbor_id,
                session_id,
                pid,
            } => self.handle_child_session_up(neighbor_id, session_id, pid),
            CtlMessage::ChildSessionTerminated { neighbor_id, .. } => {
                info!(
                    "({}): nbr {neighbor_id} child session terminated",
                    self.config.node_id
                );

                self.terminate_neighbor(neighbor_id, CmdSource::Child);
            }
            CtlMessage::ChildSessionData {
                neighbor_id,
                credits,
                data,
            } => {
                // Session payload headed for the remote node, re-headed as
                // peer session data from us.
                let buf = CtlMessage::PeerSessionData {
                    neighbor_id: self.config.node_id,
                    credits,
                    data,
                }
                .encode(self.seqnum);

                self.seqnum = self.seqnum.wrapping_add(1);
                self.transport.send(neighbor_id, credits, buf);
            }
            CtlMessage::FrameData { proto, data, .. } => {
                if let Err(e) = self.device.send(&data, proto, self.config.eth_discovery) {
                    warn!(
                        "({}): device send failed: {}",
                        self.config.node_id,
                        e.display()
                    );
                }
            }
            other => {
                warn!(
                    "({}): unsupported worker message 0x{:02x}",
                    self.config.node_id,
                    other.cmd_code()
                );
            }
        }
    }

    fn handle_child_session_up(&mut self, neighbor_id: u32, session_id: u16, pid: u32) {
        if session_id == 0 {
            error!(
                "({}): nbr {neighbor_id} reported session id 0, ignoring",
                self.config.node_id
            );

            return;
        }

        if let Some(other) = self.table.by_session_id(session_id) {
            if other.neighbor_id != neighbor_id {
                error!(
                    "({}): session id {session_id} already in use by nbr {}",
                    self.config.node_id, other.neighbor_id
                );

                return;
            }
        }

        if let Some(nbr) = self.table.get_mut(neighbor_id) {
            if nbr.child_pid != pid {
                error!(
                    "({}): child pid mismatch, expected {} got {pid}",
                    self.config.node_id, nbr.child_pid
                );

                return;
            }

            nbr.state = SessionState::Active;
            nbr.session_id = session_id;

            info!(
                "({}): nbr {neighbor_id}, session id {session_id} set to ACTIVE",
                self.config.node_id
            );
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Upstream { src, data } => self.handle_upstream(src, &data),
            TransportEvent::Metrics(report) => {
                let actions = {
                    let table = &self.table;

                    self.aggregator.handle_report(&report, |id| {
                        table
                            .get(id)
                            .is_some_and(|n| n.state == SessionState::Active)
                    })
                };

                self.apply_metrics_actions(actions);
            }
            TransportEvent::TokenUpdate { .. } => {
                let actions = self.aggregator.handle_token_update();

                self.apply_metrics_actions(actions);
            }
            TransportEvent::DownstreamSent { dst, credits, len } => {
                if let Some(action) = self.aggregator.handle_downstream_sent(dst, credits, len) {
                    self.apply_metrics_actions(vec![action]);
                }
            }
        }
    }

    /// A datagram from a remote node: box-box control messages.
    fn handle_upstream(&mut self, src: u32, data: &[u8]) {
        if crate::transport::is_hello(data) {
            debug!("({}): hello from nbr {src}", self.config.node_id);

            return;
        }

        let (_, msg) = match CtlMessage::decode(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "({}): unparseable upstream packet from {src}: {e}",
                    self.config.node_id
                );

                return;
            }
        };

        match msg {
            CtlMessage::SessionStart {
                neighbor_id,
                pid,
                credit_scalar,
            } => self.handle_session_start(self.map_peer_id(neighbor_id), pid, credit_scalar),
            CtlMessage::SessionStartReady { neighbor_id, pid } => {
                let id = self.map_peer_id(neighbor_id);

                if let Some(nbr) = self.table.get(id) {
                    if let Some(handle) = &nbr.handle {
                        handle.send(CtlMessage::SessionStartReady {
                            neighbor_id: id,
                            pid,
                        });
                    }
                }
            }
            CtlMessage::PeerSessionData {
                neighbor_id,
                credits,
                data,
            } => {
                let id = self.map_peer_id(neighbor_id);

                if let Some(nbr) = self.table.get(id) {
                    if let Some(handle) = &nbr.handle {
                        handle.send(CtlMessage::PeerSessionData {
                            neighbor_id: id,
                            credits,
                            data,
                        });
                    }
                } else {
                    debug!(
                        "({}): session data for unknown nbr {id}, drop",
                        self.config.node_id
                    );
                }
            }
            CtlMessage::PeerSessionTerminated { neighbor_id } => {
                let id = self.map_peer_id(neighbor_id);

                info!(
                    "({}): peer session terminated from nbr {id}",
                    self.config.node_id
                );

                self.terminate_neighbor(id, CmdSource::Peer);
            }
            other => {
                warn!(
                    "({}): unsupported upstream command 0x{:02x} from {src}",
                    self.config.node_id,
                    other.cmd_code()
                );
            }
        }
    }

    /// A remote node asked for a session. If its worker is already up we
    /// relay a start-ready so the sides learn each other's pids; otherwise
    /// spin one up.
    fn handle_session_start(&mut self, neighbor_id: u32, pid: u32, credit_scalar: u16) {
        info!(
            "({}): session start from nbr {neighbor_id}, pid {pid}, scalar {credit_scalar}",
            self.config.node_id
        );

        enum Next {
            Initiate,
            StartReady,
            SavedPid,
        }

        let next = match self.table.get_mut(neighbor_id) {
            Some(nbr) if nbr.state == SessionState::Active || nbr.handle.is_some() => {
                if nbr.state == SessionState::Inactive {
                    nbr.peer_pid = pid;

                    Next::SavedPid
                } else {
                    Next::StartReady
                }
            }
            _ => Next::Initiate,
        };

        match next {
            Next::Initiate => self.initiate_neighbor(neighbor_id, pid, credit_scalar),
            Next::SavedPid => {}
            Next::StartReady => {
                if let Some(handle) = self.table.get(neighbor_id).and_then(|n| n.handle.as_ref())
                {
                    handle.send(CtlMessage::SessionStartReady { neighbor_id, pid });
                }
            }
        }
    }

    fn map_peer_id(&self, id: u32) -> u32 {
        if self.config.p2p_mode {
            id
        } else {
            crate::transport::BROADCAST_NEIGHBOR_ID
        }
    }

    fn apply_metrics_actions(&mut self, actions: Vec<MetricsAction>) {
        for action in actions {
            match action {
                MetricsAction::Initiate {
                    neighbor_id,
                    credit_scalar,
                } => self.initiate_neighbor(neighbor_id, 0, credit_scalar),
                MetricsAction::Terminate { neighbor_id } => {
                    self.terminate_neighbor(neighbor_id, CmdSource::Transport)
                }
                MetricsAction::Padq { neighbor_id, padq } => {
                    self.send_to_active_worker(neighbor_id, CtlMessage::SessionPadq(padq))
                }
                MetricsAction::SchedulePadg {
                    neighbor_id,
                    credits,
                    delay,
                } => {
                    let grants = self.grants_tx.clone();

                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;

                        let _ = grants.send((neighbor_id, credits));
                    });
                }
            }
        }
    }

    /// A scheduled grant came due; flush it once the pending pool crosses
    /// the threshold.
    fn handle_grant_due(&mut self, neighbor_id: u32, credits: u16) {
        if let Some(flush) = self.aggregator.grant_due(neighbor_id, credits) {
            self.send_to_active_worker(neighbor_id, CtlMessage::SessionPadg { credits: flush });
        }
    }

    fn send_to_active_worker(&mut self, neighbor_id: u32, msg: CtlMessage) {
        match self.table.get(neighbor_id) {
            Some(nbr) if nbr.state == SessionState::Active => {
                if let Some(handle) = &nbr.handle {
                    handle.send(msg);
                }
            }
            Some(_) => {
                info!(
                    "({}): nbr {neighbor_id} is not active yet, drop",
                    self.config.node_id
                );
            }
            None => {
                warn!(
                    "({}): unable to find neighbor_id {neighbor_id}",
                    self.config.node_id
                );
            }
        }
    }

    fn initiate_neighbor(&mut self, neighbor_id: u32, peer_pid: u32, credit_scalar: u16) {
        let node_id = self.config.node_id;
        let nbr = match self.table.init(neighbor_id) {
            Ok(v) => v,
            Err(e) => {
                error!("({node_id}): could not allocate neighbor {neighbor_id}: {e}");

                return;
            }
        };

        if nbr.state == SessionState::Active {
            info!("({node_id}): neighbor {neighbor_id} already ACTIVE, not initiating new one");

            return;
        }

        if nbr.handle.is_some() {
            info!(
                "({node_id}): already have a session worker for neighbor {neighbor_id}, \
                 not initiating new one"
            );

            return;
        }

        if self.rolling_port == u16::MAX {
            self.rolling_port = PPPOE_START_PORT;
        } else {
            self.rolling_port += 1;
        }

        let params = SessionParams {
            peer_id: neighbor_id,
            parent_id: self.config.node_id,
            host_id: self.host_id,
            my_port: self.rolling_port,
            peer_pid,
            my_eth: self.my_eth,
            service_name: self.config.service_name.clone(),
            ac_name: None,
            use_host_uniq: true,
            credit_scalar,
            grant_limit: self.config.credit_grant,
            timed_credits: 0,
            p2p_mode: self.config.p2p_mode,
            lcp_echo_reply: self.config.lcp_echo_pong_mode,
            session_timeout: self.config.session_timeout,
            eth_discovery: self.config.eth_discovery,
            eth_session: self.config.eth_session,
        };

        info!(
            "({node_id}): spawning session worker for nbr {neighbor_id}, port {}, scalar {}",
            params.my_port, params.credit_scalar
        );

        let handle = session::spawn(params, self.worker_tx.clone());
        let nbr = self.table.get_mut(neighbor_id).unwrap();

        nbr.handle = Some(handle);
        nbr.state = SessionState::Pending;
        nbr.peer_pid = peer_pid;
        nbr.created = std::time::Instant::now();
    }

    fn terminate_neighbor(&mut self, neighbor_id: u32, src: CmdSource) {
        let node_id = self.config.node_id;
        let Some(nbr) = self.table.get_mut(neighbor_id) else {
            return;
        };

        info!(
            "({node_id}): terminating nbr {neighbor_id}, state {}, source {src:?}",
            nbr.state
        );

        // The worker is told to stop unless it is the one reporting.
        if src != CmdSource::Local && src != CmdSource::Child {
            if nbr.state > SessionState::Pending {
                if let Some(handle) = &nbr.handle {
                    handle.send(CtlMessage::SessionStop);
                }
            }
        }

        if matches!(
            src,
            CmdSource::Local | CmdSource::Cli | CmdSource::Peer | CmdSource::Child
        ) {
            self.aggregator.neighbor_terminated(neighbor_id);
        }

        // When the tear-down originated on our side, the peer gets told.
        if matches!(
            src,
            CmdSource::Local | CmdSource::Cli | CmdSource::Transport | CmdSource::Child
        ) {
            let buf = CtlMessage::PeerSessionTerminated {
                neighbor_id: self.config.node_id,
            }
            .encode(self.seqnum);

            self.seqnum = self.seqnum.wrapping_add(1);
            self.transport.send(neighbor_id, 0, buf);
        }

        if let Some(nbr) = self.table.get_mut(neighbor_id) {
            nbr.reset();
        }
    }

    /// Tear down neighbors that never made it to ACTIVE, and free dormant
    /// records that have not been observed for a while.
    fn expire_neighbors(&mut self) {
        let mut stuck = Vec::new();
        let mut dormant = Vec::new();

        for n in self.table.iter() {
            if n.state == SessionState::Active || n.created.elapsed() < NBR_INIT_TIMEOUT {
                continue;
            }

            if n.handle.is_some() {
                stuck.push(n.neighbor_id);
            } else {
                dormant.push(n.neighbor_id);
            }
        }

        for id in stuck {
            info!(
                "({}): nbr {id} inactive timeout, terminating session",
                self.config.node_id
            );

            self.terminate_neighbor(id, CmdSource::Local);
        }

        for id in dormant {
            debug!("({}): freeing dormant nbr {id}", self.config.node_id);

            self.aggregator.neighbor_terminated(id);
            self.table.release(id);
        }
    }

    /// Stop every worker, give their PADTs a moment to reach the device,
    /// then cancel the reader tasks.
    async fn shutdown(&mut self) {
        for nbr in self.table.iter() {
            if let Some(handle) = &nbr.handle {
                handle.send(CtlMessage::SessionStop);
            }
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN;

        loop {
            let envelope = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                v = self.worker_rx.recv() => match v {
                    Some(v) => v,
                    None => break,
                },
            };

            if let CtlMessage::FrameData { proto, data, .. } = envelope.msg {
                if let Err(e) = self.device.send(&data, proto, self.config.eth_discovery) {
                    warn!(
                        "({}): device send failed: {}",
                        self.config.node_id,
                        e.display()
                    );
                }
            }
        }

        for nbr in self.table.iter_mut() {
            nbr.reset();
        }

        self.running.cancel();
    }
}

async fn run_device_reader(
    device: Arc<Device>,
    events: UnboundedSender<Event>,
    running: CancellationToken,
) {
    let mut buf = vec![0u8; 2048];

    loop {
        let len = tokio::select! {
            _ = running.cancelled() => return,
            v = device.recv(&mut buf) => match v {
                Ok(v) => v,
                Err(e) => {
                    warn!("device recv failed: {}", e.display());
                    continue;
                }
            }
        };

        if events.send(Event::DeviceFrame(buf[..len].to_vec())).is_err() {
            return;
        }
    }
}

async fn run_cli_reader(
    sock: Arc<UdpSocket>,
    events: UnboundedSender<Event>,
    running: CancellationToken,
) {
    let mut buf = vec![0u8; 4096];

    loop {
        let (len, from) = tokio::select! {
            _ = running.cancelled() => return,
            v = sock.recv_from(&mut buf) => match v {
                Ok(v) => v,
                Err(e) => {
                    warn!("CLI recv failed: {}", e.display());
                    continue;
                }
            }
        };

        let event = Event::Cli {
            from,
            data: buf[..len].to_vec(),
        };

        if events.send(event).is_err() {
            return;
        }
    }
}

/// EtherType and PPPoE session id of a raw frame, if it is long enough.
fn frame_keys(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < crate::packet::ETH_PPPOE_OVERHEAD {
        return None;
    }

    let proto = u16::from_be_bytes(frame[12..14].try_into().unwrap());
    let session_id = u16::from_be_bytes(frame[16..18].try_into().unwrap());

    Some((proto, session_id))
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to open device: {0}")]
    Device(#[from] std::io::Error),
    #[error("failed to bind CLI socket: {0}")]
    CliBind(#[source] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error(transparent)]
    Msg(#[from] MsgError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        discovery_packet, PppoePacket, CODE_PADI, CODE_SESS, ETH_PPPOE_DISCOVERY,
        ETH_PPPOE_SESSION,
    };
    use crate::tags::Tag;
    use macaddr::MacAddr6;

    #[test]
    fn frame_keys_parsed() {
        let pkt = PppoePacket::new(
            MacAddr6::new(2, 0, 0, 0, 0, 2),
            MacAddr6::new(2, 0, 0, 0, 0, 1),
            ETH_PPPOE_SESSION,
            CODE_SESS,
            0x1234,
            vec![0; 8],
        );

        assert_eq!(
            frame_keys(&pkt.serialize()),
            Some((ETH_PPPOE_SESSION, 0x1234))
        );
        assert_eq!(frame_keys(&[0; 10]), None);
    }

    #[test]
    fn frame_keys_on_discovery() {
        let pkt = discovery_packet(
            crate::packet::BROADCAST_MAC,
            MacAddr6::new(2, 0, 0, 0, 0, 1),
            ETH_PPPOE_DISCOVERY,
            CODE_PADI,
            0,
            &[Tag::ServiceName(b"rfc4938".to_vec())],
        );

        assert_eq!(frame_keys(&pkt.serialize()), Some((ETH_PPPOE_DISCOVERY, 0)));
    }
}
