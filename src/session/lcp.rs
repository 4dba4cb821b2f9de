use crate::packet::PppoePacket;

pub const PPP_LCP: u16 = 0xC021;
pub const PPP_IPCP: u16 = 0x8021;

pub const PPP_CONFIG_REQ: u8 = 1;
pub const PPP_CONFIG_ACK: u8 = 2;
pub const PPP_CONFIG_NAK: u8 = 3;
pub const PPP_CONFIG_REJECT: u8 = 4;
pub const PPP_TERMINATE_REQ: u8 = 5;
pub const PPP_TERMINATE_ACK: u8 = 6;
pub const PPP_CODE_REJECT: u8 = 7;
pub const PPP_ECHO_REQ: u8 = 9;
pub const PPP_ECHO_REPLY: u8 = 10;

pub const LCP_OPT_MAGIC_NUMBER: u8 = 5;
pub const IPCP_OPT_IP_ADDRESS: u8 = 3;

const PPP_HDR: usize = 6;

/// What broadcast-mode interception decided for a frame from the local
/// stack: synthesize the given replies, or let the frame through.
#[derive(Debug, PartialEq, Eq)]
pub enum BcOutcome {
    Consume(Vec<PppoePacket>),
    PassThrough,
}

fn ppp_proto(pkt: &PppoePacket) -> Option<u16> {
    if pkt.payload.len() < PPP_HDR {
        return None;
    }

    Some(u16::from_be_bytes(pkt.payload[..2].try_into().unwrap()))
}

fn ppp_code(pkt: &PppoePacket) -> u8 {
    pkt.payload[2]
}

fn swapped(pkt: &PppoePacket) -> PppoePacket {
    let mut out = pkt.clone();

    std::mem::swap(&mut out.dst, &mut out.src);
    out
}

/// Offset of an option's value bytes inside a Configure-Request, scanning
/// the option list. PPP option lengths include the 2 header bytes.
fn find_option(pkt: &PppoePacket, opt: u8) -> Option<usize> {
    let ppp_len: usize = u16::from_be_bytes(pkt.payload[4..6].try_into().ok()?).into();
    let end = (PPP_HDR - 4 + ppp_len).min(pkt.payload.len());
    let mut at = PPP_HDR;

    while at + 2 <= end {
        let length = usize::from(pkt.payload[at + 1]);

        if length < 2 || at + length > end {
            return None;
        }

        if pkt.payload[at] == opt {
            return Some(at + 2);
        }

        at += length;
    }

    None
}

/// Magic number carried in an LCP Configure-Request, if any.
pub fn config_req_magic(pkt: &PppoePacket) -> Option<u32> {
    if ppp_proto(pkt)? != PPP_LCP || ppp_code(pkt) != PPP_CONFIG_REQ {
        return None;
    }

    let at = find_option(pkt, LCP_OPT_MAGIC_NUMBER)?;
    let bytes = pkt.payload.get(at..at + 4)?;

    Some(u32::from_be_bytes(bytes.try_into().unwrap()))
}

pub fn is_lcp_echo_request(pkt: &PppoePacket) -> bool {
    ppp_proto(pkt) == Some(PPP_LCP) && ppp_code(pkt) == PPP_ECHO_REQ
}

/// Bounce an LCP Echo-Request back as an Echo-Reply carrying the peer's
/// magic number.
pub fn echo_reply(pkt: &PppoePacket, peer_magic: u32) -> Option<PppoePacket> {
    if !is_lcp_echo_request(pkt) {
        return None;
    }

    let mut reply = swapped(pkt);

    reply.payload[2] = PPP_ECHO_REPLY;

    if reply.payload.len() >= PPP_HDR + 4 {
        reply.payload[PPP_HDR..PPP_HDR + 4].copy_from_slice(&peer_magic.to_be_bytes());
    }

    Some(reply)
}

/// Intercept LCP and IPCP frames from the local stack when no real PPP
/// responder exists. `echo_magic` carries the peer magic number when echo
/// replies are enabled and the magic is known.
pub fn process_bc_mode(pkt: &PppoePacket, echo_magic: Option<u32>) -> BcOutcome {
    let proto = match ppp_proto(pkt) {
        Some(v) => v,
        None => return BcOutcome::PassThrough,
    };

    match proto {
        PPP_LCP => match ppp_code(pkt) {
            PPP_CONFIG_REQ => {
                let mut reply = swapped(pkt);
                let mut out = Vec::with_capacity(2);

                reply.payload[2] = PPP_CONFIG_ACK;
                out.push(reply.clone());

                // Re-emit the request from our side with the magic bumped so
                // the stack does not see its own number come back.
                if let Some(at) = find_option(&reply, LCP_OPT_MAGIC_NUMBER) {
                    let magic =
                        u32::from_be_bytes(reply.payload[at..at + 4].try_into().unwrap());

                    reply.payload[at..at + 4]
                        .copy_from_slice(&magic.wrapping_add(1).to_be_bytes());
                }

                reply.payload[2] = PPP_CONFIG_REQ;
                out.push(reply);

                BcOutcome::Consume(out)
            }
            PPP_TERMINATE_REQ => {
                let mut reply = swapped(pkt);

                reply.payload[2] = PPP_TERMINATE_ACK;

                BcOutcome::Consume(vec![reply])
            }
            PPP_ECHO_REQ => match echo_magic {
                Some(magic) => match echo_reply(pkt, magic) {
                    Some(reply) => BcOutcome::Consume(vec![reply]),
                    None => BcOutcome::PassThrough,
                },
                None => BcOutcome::PassThrough,
            },
            PPP_CONFIG_ACK | PPP_CONFIG_NAK | PPP_CONFIG_REJECT | PPP_TERMINATE_ACK
            | PPP_CODE_REJECT => BcOutcome::Consume(Vec::new()),
            _ => BcOutcome::PassThrough,
        },
        PPP_IPCP => match ppp_code(pkt) {
            PPP_CONFIG_REQ => {
                let mut reply = swapped(pkt);
                let mut out = Vec::with_capacity(2);

                reply.payload[2] = PPP_CONFIG_ACK;
                out.push(reply.clone());

                // Shift the address into a different host slot before asking
                // the stack to configure our side.
                if let Some(at) = find_option(&reply, IPCP_OPT_IP_ADDRESS) {
                    if at + 4 <= reply.payload.len() {
                        reply.payload[at + 3] |= 0xFF;
                    }
                }

                reply.payload[2] = PPP_CONFIG_REQ;
                out.push(reply);

                BcOutcome::Consume(out)
            }
            PPP_TERMINATE_REQ => {
                let mut reply = swapped(pkt);

                reply.payload[2] = PPP_TERMINATE_ACK;

                BcOutcome::Consume(vec![reply])
            }
            PPP_CONFIG_ACK | PPP_CONFIG_NAK | PPP_CONFIG_REJECT | PPP_TERMINATE_ACK
            | PPP_CODE_REJECT => BcOutcome::Consume(Vec::new()),
            _ => BcOutcome::PassThrough,
        },
        _ => BcOutcome::PassThrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{CODE_SESS, ETH_PPPOE_SESSION};
    use macaddr::MacAddr6;

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, last)
    }

    fn ppp_packet(proto: u16, code: u8, options: &[u8]) -> PppoePacket {
        let mut payload = Vec::new();

        payload.extend_from_slice(&proto.to_be_bytes());
        payload.push(code);
        payload.push(0x01);
        payload.extend_from_slice(&((options.len() + 4) as u16).to_be_bytes());
        payload.extend_from_slice(options);

        PppoePacket::new(mac(2), mac(1), ETH_PPPOE_SESSION, CODE_SESS, 0x1234, payload)
    }

    fn magic_option(magic: u32) -> Vec<u8> {
        let mut opt = vec![LCP_OPT_MAGIC_NUMBER, 6];

        opt.extend_from_slice(&magic.to_be_bytes());
        opt
    }

    #[test]
    fn magic_number_extracted() {
        let pkt = ppp_packet(PPP_LCP, PPP_CONFIG_REQ, &magic_option(0xDEADBEEF));

        assert_eq!(config_req_magic(&pkt), Some(0xDEADBEEF));

        let pkt = ppp_packet(PPP_LCP, PPP_CONFIG_REQ, &[1, 4, 0x05, 0xF4]);

        assert_eq!(config_req_magic(&pkt), None);
    }

    #[test]
    fn lcp_config_req_acked_and_reemitted() {
        let pkt = ppp_packet(PPP_LCP, PPP_CONFIG_REQ, &magic_option(7));

        let BcOutcome::Consume(out) = process_bc_mode(&pkt, None) else {
            panic!("expected consume");
        };

        assert_eq!(out.len(), 2);
        // Ack goes back with the MACs swapped.
        assert_eq!(out[0].payload[2], PPP_CONFIG_ACK);
        assert_eq!(out[0].dst, pkt.src);
        assert_eq!(out[0].src, pkt.dst);
        // The re-emitted request carries the magic bumped by one.
        assert_eq!(out[1].payload[2], PPP_CONFIG_REQ);
        assert_eq!(config_req_magic(&out[1]), Some(8));
    }

    #[test]
    fn lcp_terminate_req_acked() {
        let pkt = ppp_packet(PPP_LCP, PPP_TERMINATE_REQ, &[]);

        let BcOutcome::Consume(out) = process_bc_mode(&pkt, None) else {
            panic!("expected consume");
        };

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload[2], PPP_TERMINATE_ACK);
    }

    #[test]
    fn lcp_echo_req_bounced_with_peer_magic() {
        let pkt = ppp_packet(PPP_LCP, PPP_ECHO_REQ, &[]);
        // Echo data: magic number then payload.
        let mut pkt = pkt;

        pkt.payload.extend_from_slice(&1u32.to_be_bytes());

        let BcOutcome::Consume(out) = process_bc_mode(&pkt, Some(0xCAFE)) else {
            panic!("expected consume");
        };

        assert_eq!(out[0].payload[2], PPP_ECHO_REPLY);
        assert_eq!(out[0].payload[6..10], 0xCAFEu32.to_be_bytes());

        // Without a known magic the request passes through.
        assert_eq!(process_bc_mode(&pkt, None), BcOutcome::PassThrough);
    }

    #[test]
    fn ipcp_config_req_rewrites_address() {
        let mut opt = vec![IPCP_OPT_IP_ADDRESS, 6];

        opt.extend_from_slice(&[10, 0, 0, 1]);

        let pkt = ppp_packet(PPP_IPCP, PPP_CONFIG_REQ, &opt);

        let BcOutcome::Consume(out) = process_bc_mode(&pkt, None) else {
            panic!("expected consume");
        };

        assert_eq!(out[0].payload[2], PPP_CONFIG_ACK);
        assert_eq!(out[1].payload[2], PPP_CONFIG_REQ);
        assert_eq!(&out[1].payload[8..12], &[10, 0, 0, 0xFF]);
    }

    #[test]
    fn acks_consumed_silently() {
        for code in [
            PPP_CONFIG_ACK,
            PPP_CONFIG_NAK,
            PPP_CONFIG_REJECT,
            PPP_TERMINATE_ACK,
            PPP_CODE_REJECT,
        ] {
            let pkt = ppp_packet(PPP_LCP, code, &[]);

            assert_eq!(process_bc_mode(&pkt, None), BcOutcome::Consume(Vec::new()));
        }
    }

    #[test]
    fn other_protocols_pass_through() {
        let pkt = ppp_packet(0x0021, PPP_CONFIG_REQ, &[]);

        assert_eq!(process_bc_mode(&pkt, None), BcOutcome::PassThrough);
    }
}
