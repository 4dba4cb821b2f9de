use super::{DiscoveryState, SessionError, SessionWorker};
use crate::credit::{ScalarState, DEFAULT_CREDIT_SCALAR, OperatingMode};
use crate::packet::{
    self, discovery_packet, PppoePacket, BROADCAST_MAC, CODE_PADO, CODE_PADR, CODE_PADS,
};
use crate::tags::Tag;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::Instant;

pub const MAX_PADI_ATTEMPTS: u32 = 3;
pub const MAX_PADR_ATTEMPTS: u32 = 3;
pub const PADI_TIMEOUT: Duration = Duration::from_secs(5);

/// Service name sentinel that suppresses the Service-Name tag entirely.
pub const NO_SERVICE_NAME: &str = "NO-SERVICE-NAME-NON-RFC-COMPLIANT";

/// Run the discovery phase: PADI/PADO then PADR/PADS, each with
/// exponentially backed-off retries. Returns the assigned session id.
pub(crate) async fn run(worker: &mut SessionWorker) -> Result<u16, SessionError> {
    let mut timeout = PADI_TIMEOUT;

    for attempt in 1.. {
        if attempt > MAX_PADI_ATTEMPTS {
            return Err(SessionError::DiscoveryTimeout("PADO"));
        }

        info!(
            "({},{},0x{:x}): PADI try number {attempt}, timeout is {:?}",
            worker.params().peer_id,
            worker.session_id,
            worker.params().host_id,
            timeout
        );

        send_padi(worker);

        worker.discovery_state = DiscoveryState::SentPadi;

        if wait_for_pado(worker, timeout).await? {
            worker.discovery_state = DiscoveryState::ReceivedPado;
            break;
        }

        timeout *= 2;
    }

    timeout = PADI_TIMEOUT;

    for attempt in 1.. {
        if attempt > MAX_PADR_ATTEMPTS {
            return Err(SessionError::DiscoveryTimeout("PADS"));
        }

        info!(
            "({},{},0x{:x}): PADR try number {attempt}, timeout is {:?}",
            worker.params().peer_id,
            worker.session_id,
            worker.params().host_id,
            timeout
        );

        send_padr(worker);

        worker.discovery_state = DiscoveryState::SentPadr;

        if wait_for_pads(worker, timeout).await? {
            worker.discovery_state = DiscoveryState::Session;
            break;
        }

        timeout *= 2;
    }

    Ok(worker.session_id)
}

fn send_padi(worker: &mut SessionWorker) {
    if worker.session_id != 0 {
        info!(
            "({}): already have session id {}, not sending PADI",
            worker.params().peer_id,
            worker.session_id
        );

        return;
    }

    let mut tag_list = Vec::with_capacity(2);

    if worker.params().service_name != NO_SERVICE_NAME {
        tag_list.push(Tag::ServiceName(
            worker.params().service_name.clone().into_bytes(),
        ));
    }

    if worker.params().use_host_uniq {
        tag_list.push(Tag::HostUniq(
            worker.params().host_id.to_be_bytes().to_vec(),
        ));
    }

    let pkt = discovery_packet(
        BROADCAST_MAC,
        worker.params().my_eth,
        worker.params().eth_discovery,
        packet::CODE_PADI,
        0,
        &tag_list,
    );

    worker.send_frame_to_device(&pkt);
}

fn send_padr(worker: &mut SessionWorker) {
    if worker.session_id != 0 {
        info!(
            "({}): already have session id {}, not sending PADR",
            worker.params().peer_id,
            worker.session_id
        );

        return;
    }

    let mut tag_list = vec![Tag::ServiceName(
        worker.params().service_name.clone().into_bytes(),
    )];

    if worker.params().use_host_uniq {
        tag_list.push(Tag::HostUniq(
            worker.params().host_id.to_be_bytes().to_vec(),
        ));
    }

    if let Some(cookie) = &worker.ac_cookie {
        tag_list.push(cookie.clone());
    }

    if let Some(relay) = &worker.relay_id {
        tag_list.push(relay.clone());
    }

    tag_list.push(Tag::Credits {
        fcn: worker.credits.grant_limit,
        bcn: 0,
    });

    if worker.credits.mode == OperatingMode::Rfc4938Scaling {
        tag_list.push(Tag::Scalar(worker.credits.local_scalar));
    }

    let pkt = discovery_packet(
        worker.peer_eth,
        worker.params().my_eth,
        worker.params().eth_discovery,
        CODE_PADR,
        0,
        &tag_list,
    );

    worker.send_frame_to_device(&pkt);
}

/// Does the packet carry our Host-Uniq (when that mode is on) and our
/// destination MAC?
fn packet_is_for_me(worker: &SessionWorker, pkt: &PppoePacket, tag_list: &[Tag]) -> bool {
    if pkt.dst != worker.params().my_eth {
        return false;
    }

    if !worker.params().use_host_uniq {
        return true;
    }

    tag_list.iter().any(|t| match t {
        Tag::HostUniq(v) => v.as_slice() == worker.params().host_id.to_be_bytes(),
        _ => false,
    })
}

async fn wait_for_pado(
    worker: &mut SessionWorker,
    timeout: Duration,
) -> Result<bool, SessionError> {
    let deadline = Instant::now() + timeout;

    loop {
        let pkt = match worker.recv_discovery_frame(deadline).await? {
            Some(v) => v,
            None => return Ok(false),
        };

        if pkt.code != CODE_PADO {
            debug!(
                "({},{}): ignore code 0x{:02x} while waiting for PADO",
                worker.params().peer_id,
                worker.session_id,
                pkt.code
            );

            continue;
        }

        if !packet::is_unicast(pkt.src) {
            warn!(
                "({},{}): ignoring PADO packet from non-unicast MAC address",
                worker.params().peer_id,
                worker.session_id
            );

            continue;
        }

        let tag_list = match pkt.tags() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "({},{}): bad PADO tags: {e}",
                    worker.params().peer_id,
                    worker.session_id
                );

                continue;
            }
        };

        if !packet_is_for_me(worker, &pkt, &tag_list) {
            debug!(
                "({},{},0x{:x}): frame not for me, drop",
                worker.params().peer_id,
                worker.session_id,
                worker.params().host_id
            );

            continue;
        }

        if let Some(tag) = tag_list.iter().find(|t| t.is_error()) {
            return Err(SessionError::DiscoveryError(format!(
                "PADO error tag 0x{:04x}",
                tag.kind()
            )));
        }

        let mut seen_ac_name = false;
        let mut seen_service_name = false;
        let mut ac_name_ok = worker.params().ac_name.is_none();
        let mut service_name_ok = false;

        for tag in &tag_list {
            match tag {
                Tag::AcName(v) => {
                    seen_ac_name = true;

                    if let Some(want) = &worker.params().ac_name {
                        if v.as_slice() == want.as_bytes() {
                            ac_name_ok = true;
                        }
                    }
                }
                Tag::ServiceName(v) => {
                    seen_service_name = true;

                    if v.as_slice() == worker.params().service_name.as_bytes() {
                        service_name_ok = true;
                    }
                }
                Tag::AcCookie(_) => worker.ac_cookie = Some(tag.clone()),
                Tag::RelaySessionId(_) => worker.relay_id = Some(tag.clone()),
                _ => {}
            }
        }

        if !seen_ac_name {
            warn!(
                "({},{}): ignoring PADO packet with no AC-Name tag",
                worker.params().peer_id,
                worker.session_id
            );

            continue;
        }

        if !seen_service_name {
            warn!(
                "({},{}): ignoring PADO packet with no Service-Name tag",
                worker.params().peer_id,
                worker.session_id
            );

            continue;
        }

        worker.num_pados += 1;

        if ac_name_ok && service_name_ok {
            worker.peer_eth = pkt.src;

            debug!(
                "({},{},0x{:x}): PADO received, AC address {}",
                worker.params().peer_id,
                worker.session_id,
                worker.params().host_id,
                worker.peer_eth
            );

            return Ok(true);
        }
    }
}

async fn wait_for_pads(
    worker: &mut SessionWorker,
    timeout: Duration,
) -> Result<bool, SessionError> {
    let deadline = Instant::now() + timeout;

    loop {
        let pkt = match worker.recv_discovery_frame(deadline).await? {
            Some(v) => v,
            None => return Ok(false),
        };

        // If it's not from the AC, it's not for me.
        if pkt.src != worker.peer_eth {
            debug!(
                "({},{}): frame not from the AC, drop",
                worker.params().peer_id,
                worker.session_id
            );

            continue;
        }

        if pkt.code != CODE_PADS {
            debug!(
                "({},{}): ignore code 0x{:02x} while waiting for PADS",
                worker.params().peer_id,
                worker.session_id,
                pkt.code
            );

            continue;
        }

        let tag_list = match pkt.tags() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "({},{}): bad PADS tags: {e}",
                    worker.params().peer_id,
                    worker.session_id
                );

                continue;
            }
        };

        if !packet_is_for_me(worker, &pkt, &tag_list) {
            debug!(
                "({},{},0x{:x}): frame not for me, drop",
                worker.params().peer_id,
                worker.session_id,
                worker.params().host_id
            );

            continue;
        }

        let mut had_error = false;

        for tag in &tag_list {
            match tag {
                Tag::ServiceName(v) => {
                    debug!(
                        "({},{}): PADS Service-Name: '{}'",
                        worker.params().peer_id,
                        worker.session_id,
                        String::from_utf8_lossy(v)
                    );
                }
                Tag::ServiceNameError(_) | Tag::AcSystemError(_) | Tag::GenericError(_) => {
                    warn!(
                        "({},{}): PADS error tag 0x{:04x}",
                        worker.params().peer_id,
                        worker.session_id,
                        tag.kind()
                    );

                    had_error = true;
                }
                Tag::RelaySessionId(_) => worker.relay_id = Some(tag.clone()),
                Tag::Credits { fcn, bcn } => {
                    debug!(
                        "({},{}): PADS fcn:{fcn}, bcn:{bcn}",
                        worker.params().peer_id,
                        worker.session_id
                    );

                    worker.credits.credit_grant(*fcn, *bcn);
                }
                Tag::Scalar(scalar) => {
                    if worker.credits.mode == OperatingMode::Rfc4938Scaling {
                        worker.credits.peer_scalar = *scalar;
                        worker.credits.scalar_state = ScalarState::Received;

                        debug!(
                            "({},{}): received credit scalar:{scalar} in PADS",
                            worker.params().peer_id,
                            worker.session_id
                        );
                    } else {
                        // The peer is scaling but this session was brought up
                        // plain RFC 4938. Unrecoverable.
                        return Err(SessionError::ScalarMismatch);
                    }
                }
                _ => {}
            }
        }

        if had_error {
            continue;
        }

        if worker.credits.scalar_state == ScalarState::Needed {
            debug!(
                "({},{},0x{:x}): PADS did NOT have scalar info, falling back to default",
                worker.params().peer_id,
                worker.session_id,
                worker.params().host_id
            );

            worker.credits.local_scalar = DEFAULT_CREDIT_SCALAR;
        }

        // RFC 2516 says the session id MUST NOT be zero or 0xFFFF; tolerate
        // a violating AC but complain.
        if pkt.session_id == 0 || pkt.session_id == 0xFFFF {
            warn!(
                "({},{}): access concentrator used a session value of 0x{:04x} \
                 -- the AC is violating RFC 2516",
                worker.params().peer_id,
                worker.session_id,
                pkt.session_id
            );
        }

        worker.session_id = pkt.session_id;
        worker.credits.session_id = pkt.session_id;

        info!(
            "({},{},0x{:x}): PADS received, PPP session is {} (0x{:04x})",
            worker.params().peer_id,
            worker.session_id,
            worker.params().host_id,
            worker.session_id,
            worker.session_id
        );

        return Ok(true);
    }
}
