use thiserror::Error;

pub const HDR_PREFIX: u16 = 0xBAAF;
pub const HDR_SIZE: usize = 8;
pub const SHOW_TEXT_LEN: usize = 1000;

pub const CTL_SESSION_START: u8 = 0;
pub const CTL_SESSION_START_READY: u8 = 1;
pub const CTL_CHILD_READY: u8 = 2;
pub const CTL_CHILD_SESSION_UP: u8 = 3;
pub const CTL_CHILD_SESSION_TERMINATED: u8 = 4;
pub const CTL_CHILD_SESSION_DATA: u8 = 5;
pub const CTL_PEER_SESSION_TERMINATED: u8 = 6;
pub const CTL_PEER_SESSION_DATA: u8 = 7;
pub const CTL_SESSION_STOP: u8 = 8;
pub const CTL_SESSION_PADQ: u8 = 9;
pub const CTL_SESSION_PADG: u8 = 10;
pub const CTL_FRAME_DATA: u8 = 11;
pub const CLI_SESSION_INITIATE: u8 = 12;
pub const CLI_SESSION_TERMINATE: u8 = 13;
pub const CLI_SESSION_PADQ: u8 = 14;
pub const CLI_SESSION_PADG: u8 = 15;
pub const CLI_SESSION_SHOW: u8 = 16;
pub const CLI_SESSION_SHOW_RESPONSE: u8 = 17;

/// PADQ injection parameters shared by the control and CLI variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadqParams {
    pub receive_only: u8,
    pub rlq: u8,
    pub resources: u8,
    pub latency: u16,
    pub cdr_scale: u16,
    pub cdr: u16,
    pub mdr_scale: u16,
    pub mdr: u16,
}

impl PadqParams {
    fn decode(r: &mut Reader) -> Result<Self, MsgError> {
        Ok(Self {
            receive_only: r.u8()?,
            rlq: r.u8()?,
            resources: r.u8()?,
            latency: r.u16()?,
            cdr_scale: r.u16()?,
            cdr: r.u16()?,
            mdr_scale: r.u16()?,
            mdr: r.u16()?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.receive_only);
        buf.push(self.rlq);
        buf.push(self.resources);
        buf.extend_from_slice(&self.latency.to_be_bytes());
        buf.extend_from_slice(&self.cdr_scale.to_be_bytes());
        buf.extend_from_slice(&self.cdr.to_be_bytes());
        buf.extend_from_slice(&self.mdr_scale.to_be_bytes());
        buf.extend_from_slice(&self.mdr.to_be_bytes());
    }
}

/// A message of the local control protocol, exchanged between the supervisor,
/// its session workers and the operator CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlMessage {
    SessionStart {
        neighbor_id: u32,
        pid: u32,
        credit_scalar: u16,
    },
    SessionStartReady {
        neighbor_id: u32,
        pid: u32,
    },
    ChildReady {
        neighbor_id: u32,
        port: u16,
        pid: u32,
    },
    ChildSessionUp {
        neighbor_id: u32,
        session_id: u16,
        pid: u32,
    },
    ChildSessionTerminated {
        neighbor_id: u32,
        session_id: u16,
    },
    ChildSessionData {
        neighbor_id: u32,
        credits: u16,
        data: Vec<u8>,
    },
    PeerSessionTerminated {
        neighbor_id: u32,
    },
    PeerSessionData {
        neighbor_id: u32,
        credits: u16,
        data: Vec<u8>,
    },
    SessionStop,
    SessionPadq(PadqParams),
    SessionPadg {
        credits: u16,
    },
    FrameData {
        session_id: u16,
        proto: u16,
        data: Vec<u8>,
    },
    CliSessionInitiate {
        neighbor_id: u32,
        credit_scalar: u16,
    },
    CliSessionTerminate {
        neighbor_id: u32,
    },
    CliSessionPadq {
        neighbor_id: u32,
        padq: PadqParams,
    },
    CliSessionPadg {
        neighbor_id: u32,
        credits: u16,
    },
    CliSessionShow,
    CliSessionShowResponse {
        neighbor_id: u32,
        text: String,
    },
}

impl CtlMessage {
    pub fn cmd_code(&self) -> u8 {
        match self {
            Self::SessionStart { .. } => CTL_SESSION_START,
            Self::SessionStartReady { .. } => CTL_SESSION_START_READY,
            Self::ChildReady { .. } => CTL_CHILD_READY,
            Self::ChildSessionUp { .. } => CTL_CHILD_SESSION_UP,
            Self::ChildSessionTerminated { .. } => CTL_CHILD_SESSION_TERMINATED,
            Self::ChildSessionData { .. } => CTL_CHILD_SESSION_DATA,
            Self::PeerSessionTerminated { .. } => CTL_PEER_SESSION_TERMINATED,
            Self::PeerSessionData { .. } => CTL_PEER_SESSION_DATA,
            Self::SessionStop => CTL_SESSION_STOP,
            Self::SessionPadq(_) => CTL_SESSION_PADQ,
            Self::SessionPadg { .. } => CTL_SESSION_PADG,
            Self::FrameData { .. } => CTL_FRAME_DATA,
            Self::CliSessionInitiate { .. } => CLI_SESSION_INITIATE,
            Self::CliSessionTerminate { .. } => CLI_SESSION_TERMINATE,
            Self::CliSessionPadq { .. } => CLI_SESSION_PADQ,
            Self::CliSessionPadg { .. } => CLI_SESSION_PADG,
            Self::CliSessionShow => CLI_SESSION_SHOW,
            Self::CliSessionShowResponse { .. } => CLI_SESSION_SHOW_RESPONSE,
        }
    }

    /// Encode the message with its header and sequence number.
    pub fn encode(&self, seq: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HDR_SIZE + 16);

        buf.extend_from_slice(&HDR_PREFIX.to_be_bytes());
        buf.push(self.cmd_code());
        buf.push(0);
        buf.extend_from_slice(&seq.to_be_bytes());

        match self {
            Self::SessionStart {
                neighbor_id,
                pid,
                credit_scalar,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&pid.to_be_bytes());
                buf.extend_from_slice(&credit_scalar.to_be_bytes());
            }
            Self::SessionStartReady { neighbor_id, pid } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&pid.to_be_bytes());
            }
            Self::ChildReady {
                neighbor_id,
                port,
                pid,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                buf.extend_from_slice(&pid.to_be_bytes());
            }
            Self::ChildSessionUp {
                neighbor_id,
                session_id,
                pid,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.extend_from_slice(&pid.to_be_bytes());
            }
            Self::ChildSessionTerminated {
                neighbor_id,
                session_id,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&session_id.to_be_bytes());
            }
            Self::ChildSessionData {
                neighbor_id,
                credits,
                data,
            }
            | Self::PeerSessionData {
                neighbor_id,
                credits,
                data,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
                buf.extend_from_slice(&credits.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Self::PeerSessionTerminated { neighbor_id } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
            }
            Self::SessionStop | Self::CliSessionShow => {}
            Self::SessionPadq(padq) => padq.encode(&mut buf),
            Self::SessionPadg { credits } => {
                buf.extend_from_slice(&credits.to_be_bytes());
            }
            Self::FrameData {
                session_id,
                proto,
                data,
            } => {
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
                buf.extend_from_slice(&proto.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Self::CliSessionInitiate {
                neighbor_id,
                credit_scalar,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&credit_scalar.to_be_bytes());
            }
            Self::CliSessionTerminate { neighbor_id } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
            }
            Self::CliSessionPadq { neighbor_id, padq } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                padq.encode(&mut buf);
            }
            Self::CliSessionPadg {
                neighbor_id,
                credits,
            } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());
                buf.extend_from_slice(&credits.to_be_bytes());
            }
            Self::CliSessionShowResponse { neighbor_id, text } => {
                buf.extend_from_slice(&neighbor_id.to_be_bytes());

                let mut fixed = [0u8; SHOW_TEXT_LEN];
                let bytes = text.as_bytes();
                let n = bytes.len().min(SHOW_TEXT_LEN - 1);

                fixed[..n].copy_from_slice(&bytes[..n]);
                buf.extend_from_slice(&fixed);
            }
        }

        buf
    }

    /// Decode a datagram into its sequence number and message.
    pub fn decode(buf: &[u8]) -> Result<(u32, Self), MsgError> {
        if buf.len() < HDR_SIZE {
            return Err(MsgError::TooShort(buf.len()));
        }

        let hdrchk = u16::from_be_bytes(buf[..2].try_into().unwrap());

        if hdrchk != HDR_PREFIX {
            return Err(MsgError::BadPrefix(hdrchk));
        }

        let cmd = buf[2];
        let seq = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let mut r = Reader::new(&buf[HDR_SIZE..]);

        let msg = match cmd {
            CTL_SESSION_START => Self::SessionStart {
                neighbor_id: r.u32()?,
                pid: r.u32()?,
                credit_scalar: r.u16()?,
            },
            CTL_SESSION_START_READY => Self::SessionStartReady {
                neighbor_id: r.u32()?,
                pid: r.u32()?,
            },
            CTL_CHILD_READY => Self::ChildReady {
                neighbor_id: r.u32()?,
                port: r.u16()?,
                pid: r.u32()?,
            },
            CTL_CHILD_SESSION_UP => Self::ChildSessionUp {
                neighbor_id: r.u32()?,
                session_id: r.u16()?,
                pid: r.u32()?,
            },
            CTL_CHILD_SESSION_TERMINATED => Self::ChildSessionTerminated {
                neighbor_id: r.u32()?,
                session_id: r.u16()?,
            },
            CTL_CHILD_SESSION_DATA | CTL_PEER_SESSION_DATA => {
                let neighbor_id = r.u32()?;
                let data_len = r.u16()?;
                let credits = r.u16()?;
                let data = r.bytes(data_len.into())?;

                if cmd == CTL_CHILD_SESSION_DATA {
                    Self::ChildSessionData {
                        neighbor_id,
                        credits,
                        data,
                    }
                } else {
                    Self::PeerSessionData {
                        neighbor_id,
                        credits,
                        data,
                    }
                }
            }
            CTL_PEER_SESSION_TERMINATED => Self::PeerSessionTerminated {
                neighbor_id: r.u32()?,
            },
            CTL_SESSION_STOP => Self::SessionStop,
            CTL_SESSION_PADQ => Self::SessionPadq(PadqParams::decode(&mut r)?),
            CTL_SESSION_PADG => Self::SessionPadg {
                credits: r.u16()?,
            },
            CTL_FRAME_DATA => {
                let session_id = r.u16()?;
                let data_len = r.u16()?;
                let proto = r.u16()?;

                Self::FrameData {
                    session_id,
                    proto,
                    data: r.bytes(data_len.into())?,
                }
            }
            CLI_SESSION_INITIATE => Self::CliSessionInitiate {
                neighbor_id: r.u32()?,
                credit_scalar: r.u16()?,
            },
            CLI_SESSION_TERMINATE => Self::CliSessionTerminate {
                neighbor_id: r.u32()?,
            },
            CLI_SESSION_PADQ => Self::CliSessionPadq {
                neighbor_id: r.u32()?,
                padq: PadqParams::decode(&mut r)?,
            },
            CLI_SESSION_PADG => Self::CliSessionPadg {
                neighbor_id: r.u32()?,
                credits: r.u16()?,
            },
            CLI_SESSION_SHOW => Self::CliSessionShow,
            CLI_SESSION_SHOW_RESPONSE => {
                let neighbor_id = r.u32()?;
                let raw = r.bytes(SHOW_TEXT_LEN)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());

                Self::CliSessionShowResponse {
                    neighbor_id,
                    text: String::from_utf8_lossy(&raw[..end]).into_owned(),
                }
            }
            other => return Err(MsgError::UnknownCommand(other)),
        };

        Ok((seq, msg))
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MsgError> {
        let chunk = self.data.get(..n).ok_or(MsgError::TruncatedPayload)?;

        self.data = &self.data[n..];

        Ok(chunk)
    }

    fn u8(&mut self) -> Result<u8, MsgError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MsgError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, MsgError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>, MsgError> {
        Ok(self.take(n)?.to_vec())
    }
}

#[derive(Debug, Error)]
pub enum MsgError {
    #[error("control message too short ({0} bytes)")]
    TooShort(usize),
    #[error("hdrchk 0x{0:04x} failed test")]
    BadPrefix(u16),
    #[error("unsupported ctrl command 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("truncated control message payload")]
    TruncatedPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: CtlMessage) {
        let buf = msg.encode(42);
        let (seq, back) = CtlMessage::decode(&buf).unwrap();

        assert_eq!(seq, 42);
        assert_eq!(back, msg);
    }

    #[test]
    fn roundtrip_control_messages() {
        roundtrip(CtlMessage::SessionStart {
            neighbor_id: 20,
            pid: 777,
            credit_scalar: 64,
        });
        roundtrip(CtlMessage::SessionStartReady {
            neighbor_id: 20,
            pid: 777,
        });
        roundtrip(CtlMessage::ChildReady {
            neighbor_id: 20,
            port: 10001,
            pid: 777,
        });
        roundtrip(CtlMessage::ChildSessionUp {
            neighbor_id: 20,
            session_id: 0x1234,
            pid: 777,
        });
        roundtrip(CtlMessage::ChildSessionTerminated {
            neighbor_id: 20,
            session_id: 0x1234,
        });
        roundtrip(CtlMessage::ChildSessionData {
            neighbor_id: 20,
            credits: 2,
            data: vec![0xC0, 0x21, 1, 2],
        });
        roundtrip(CtlMessage::PeerSessionTerminated { neighbor_id: 20 });
        roundtrip(CtlMessage::PeerSessionData {
            neighbor_id: 20,
            credits: 0,
            data: vec![0x00, 0x21],
        });
        roundtrip(CtlMessage::SessionStop);
        roundtrip(CtlMessage::SessionPadg { credits: 256 });
        roundtrip(CtlMessage::FrameData {
            session_id: 0x1234,
            proto: 0x8864,
            data: vec![1, 2, 3, 4],
        });
    }

    #[test]
    fn roundtrip_cli_messages() {
        let padq = PadqParams {
            receive_only: 0,
            rlq: 40,
            resources: 100,
            latency: 12,
            cdr_scale: 0,
            cdr: 500,
            mdr_scale: 0,
            mdr: 1000,
        };

        roundtrip(CtlMessage::SessionPadq(padq));
        roundtrip(CtlMessage::CliSessionInitiate {
            neighbor_id: 20,
            credit_scalar: 0,
        });
        roundtrip(CtlMessage::CliSessionTerminate { neighbor_id: 20 });
        roundtrip(CtlMessage::CliSessionPadq {
            neighbor_id: 20,
            padq,
        });
        roundtrip(CtlMessage::CliSessionPadg {
            neighbor_id: 20,
            credits: 100,
        });
        roundtrip(CtlMessage::CliSessionShow);
        roundtrip(CtlMessage::CliSessionShowResponse {
            neighbor_id: 20,
            text: "Neighbor\t Active\n20\t\t ACTIVE\n".to_string(),
        });
    }

    #[test]
    fn show_response_is_fixed_size() {
        let buf = CtlMessage::CliSessionShowResponse {
            neighbor_id: 1,
            text: "x".to_string(),
        }
        .encode(0);

        assert_eq!(buf.len(), HDR_SIZE + 4 + SHOW_TEXT_LEN);
    }

    #[test]
    fn bad_prefix_rejected() {
        let mut buf = CtlMessage::SessionStop.encode(0);

        buf[0] = 0xDE;
        buf[1] = 0xAD;

        assert!(matches!(
            CtlMessage::decode(&buf),
            Err(MsgError::BadPrefix(0xDEAD))
        ));
    }

    #[test]
    fn short_datagram_rejected() {
        assert!(matches!(
            CtlMessage::decode(&[0xBA, 0xAF, 0x08]),
            Err(MsgError::TooShort(3))
        ));
    }

    #[test]
    fn truncated_data_rejected() {
        let mut buf = CtlMessage::ChildSessionData {
            neighbor_id: 20,
            credits: 1,
            data: vec![1, 2, 3, 4],
        }
        .encode(0);

        buf.truncate(buf.len() - 2);

        assert!(matches!(
            CtlMessage::decode(&buf),
            Err(MsgError::TruncatedPayload)
        ));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut buf = CtlMessage::SessionStop.encode(0);

        buf[2] = 0x7F;

        assert!(matches!(
            CtlMessage::decode(&buf),
            Err(MsgError::UnknownCommand(0x7F))
        ));
    }
}
