use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const TAG_END_OF_LIST: u16 = 0x0000;
pub const TAG_SERVICE_NAME: u16 = 0x0101;
pub const TAG_AC_NAME: u16 = 0x0102;
pub const TAG_HOST_UNIQ: u16 = 0x0103;
pub const TAG_AC_COOKIE: u16 = 0x0104;
pub const TAG_RELAY_SESSION_ID: u16 = 0x0110;
pub const TAG_SERVICE_NAME_ERROR: u16 = 0x0201;
pub const TAG_AC_SYSTEM_ERROR: u16 = 0x0202;
pub const TAG_GENERIC_ERROR: u16 = 0x0203;
pub const TAG_RFC4938_CREDITS: u16 = 0x0106;
pub const TAG_RFC4938_METRICS: u16 = 0x0107;
pub const TAG_RFC4938_SEQ_NUM: u16 = 0x0108;
pub const TAG_RFC4938_SCALAR: u16 = 0x0109;

pub const TAG_HDR_SIZE: usize = 4;
pub const TAG_CREDITS_LENGTH: usize = 4;
pub const TAG_METRICS_LENGTH: usize = 10;

/// Link quality metrics carried by a PADQ packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkMetrics {
    pub receive_only: bool,
    pub rlq: u8,
    pub resources: u8,
    pub latency: u16,
    pub cdr_scale: u8,
    pub cdr: u16,
    pub mdr_scale: u8,
    pub mdr: u16,
}

impl LinkMetrics {
    fn decode(data: &[u8]) -> Result<Self, TagError> {
        if data.len() != TAG_METRICS_LENGTH {
            return Err(TagError::BadValueLength {
                kind: TAG_RFC4938_METRICS,
                len: data.len(),
            });
        }

        let reserved = u16::from_be_bytes(data[..2].try_into().unwrap());

        Ok(Self {
            receive_only: (reserved & 0x1) != 0,
            cdr_scale: ((reserved >> 1) & 0x3) as u8,
            mdr_scale: ((reserved >> 3) & 0x3) as u8,
            rlq: data[2],
            resources: data[3],
            latency: u16::from_be_bytes(data[4..6].try_into().unwrap()),
            cdr: u16::from_be_bytes(data[6..8].try_into().unwrap()),
            mdr: u16::from_be_bytes(data[8..10].try_into().unwrap()),
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let reserved = (u16::from(self.mdr_scale & 0x3) << 3)
            | (u16::from(self.cdr_scale & 0x3) << 1)
            | u16::from(self.receive_only);

        buf.extend_from_slice(&reserved.to_be_bytes());
        buf.push(self.rlq);
        buf.push(self.resources);
        buf.extend_from_slice(&self.latency.to_be_bytes());
        buf.extend_from_slice(&self.cdr.to_be_bytes());
        buf.extend_from_slice(&self.mdr.to_be_bytes());
    }
}

/// A PPPoE discovery tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    EndOfList,
    ServiceName(Vec<u8>),
    AcName(Vec<u8>),
    HostUniq(Vec<u8>),
    AcCookie(Vec<u8>),
    RelaySessionId(Vec<u8>),
    ServiceNameError(Vec<u8>),
    AcSystemError(Vec<u8>),
    GenericError(Vec<u8>),
    Credits { fcn: u16, bcn: u16 },
    Metrics(LinkMetrics),
    SeqNum(u16),
    Scalar(u16),
    Unknown { kind: u16, value: Vec<u8> },
}

impl Tag {
    pub fn kind(&self) -> u16 {
        match self {
            Self::EndOfList => TAG_END_OF_LIST,
            Self::ServiceName(_) => TAG_SERVICE_NAME,
            Self::AcName(_) => TAG_AC_NAME,
            Self::HostUniq(_) => TAG_HOST_UNIQ,
            Self::AcCookie(_) => TAG_AC_COOKIE,
            Self::RelaySessionId(_) => TAG_RELAY_SESSION_ID,
            Self::ServiceNameError(_) => TAG_SERVICE_NAME_ERROR,
            Self::AcSystemError(_) => TAG_AC_SYSTEM_ERROR,
            Self::GenericError(_) => TAG_GENERIC_ERROR,
            Self::Credits { .. } => TAG_RFC4938_CREDITS,
            Self::Metrics(_) => TAG_RFC4938_METRICS,
            Self::SeqNum(_) => TAG_RFC4938_SEQ_NUM,
            Self::Scalar(_) => TAG_RFC4938_SCALAR,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    /// True for the Service-Name-Error, AC-System-Error and Generic-Error
    /// kinds that abort discovery.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ServiceNameError(_) | Self::AcSystemError(_) | Self::GenericError(_)
        )
    }

    fn from_parts(kind: u16, value: &[u8]) -> Result<Self, TagError> {
        let tag = match kind {
            TAG_END_OF_LIST => Self::EndOfList,
            TAG_SERVICE_NAME => Self::ServiceName(value.to_vec()),
            TAG_AC_NAME => Self::AcName(value.to_vec()),
            TAG_HOST_UNIQ => Self::HostUniq(value.to_vec()),
            TAG_AC_COOKIE => Self::AcCookie(value.to_vec()),
            TAG_RELAY_SESSION_ID => Self::RelaySessionId(value.to_vec()),
            TAG_SERVICE_NAME_ERROR => Self::ServiceNameError(value.to_vec()),
            TAG_AC_SYSTEM_ERROR => Self::AcSystemError(value.to_vec()),
            TAG_GENERIC_ERROR => Self::GenericError(value.to_vec()),
            TAG_RFC4938_CREDITS => {
                if value.len() != TAG_CREDITS_LENGTH {
                    return Err(TagError::BadValueLength {
                        kind,
                        len: value.len(),
                    });
                }

                Self::Credits {
                    fcn: u16::from_be_bytes(value[..2].try_into().unwrap()),
                    bcn: u16::from_be_bytes(value[2..4].try_into().unwrap()),
                }
            }
            TAG_RFC4938_METRICS => Self::Metrics(LinkMetrics::decode(value)?),
            TAG_RFC4938_SEQ_NUM => Self::SeqNum(decode_u16(kind, value)?),
            TAG_RFC4938_SCALAR => Self::Scalar(decode_u16(kind, value)?),
            _ => Self::Unknown {
                kind,
                value: value.to_vec(),
            },
        };

        Ok(tag)
    }

    /// Decode all tags in a discovery payload.
    ///
    /// A tag whose length would run past the end of the payload aborts
    /// decoding.
    pub fn decode_all(mut data: &[u8]) -> Result<Vec<Self>, TagError> {
        let mut tags = Vec::new();

        while !data.is_empty() {
            if data.len() < TAG_HDR_SIZE {
                return Err(TagError::TruncatedHeader(data.len()));
            }

            let kind = u16::from_be_bytes(data[..2].try_into().unwrap());
            let length: usize = u16::from_be_bytes(data[2..4].try_into().unwrap()).into();
            let value = data[TAG_HDR_SIZE..]
                .get(..length)
                .ok_or(TagError::Overrun { kind, length })?;

            tags.push(Self::from_parts(kind, value)?);
            data = &data[(TAG_HDR_SIZE + length)..];
        }

        Ok(tags)
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::EndOfList => encode_raw(buf, TAG_END_OF_LIST, &[]),
            Self::ServiceName(v)
            | Self::AcName(v)
            | Self::HostUniq(v)
            | Self::AcCookie(v)
            | Self::RelaySessionId(v)
            | Self::ServiceNameError(v)
            | Self::AcSystemError(v)
            | Self::GenericError(v) => encode_raw(buf, self.kind(), v),
            Self::Credits { fcn, bcn } => {
                let mut value = [0; TAG_CREDITS_LENGTH];

                value[..2].copy_from_slice(&fcn.to_be_bytes());
                value[2..].copy_from_slice(&bcn.to_be_bytes());

                encode_raw(buf, TAG_RFC4938_CREDITS, &value);
            }
            Self::Metrics(m) => {
                buf.extend_from_slice(&TAG_RFC4938_METRICS.to_be_bytes());
                buf.extend_from_slice(&(TAG_METRICS_LENGTH as u16).to_be_bytes());
                m.encode(buf);
            }
            Self::SeqNum(v) => encode_raw(buf, TAG_RFC4938_SEQ_NUM, &v.to_be_bytes()),
            Self::Scalar(v) => encode_raw(buf, TAG_RFC4938_SCALAR, &v.to_be_bytes()),
            Self::Unknown { kind, value } => encode_raw(buf, *kind, value),
        }
    }

    pub fn encode_all(tags: &[Self]) -> Vec<u8> {
        let mut buf = Vec::new();

        for tag in tags {
            tag.encode(&mut buf);
        }

        buf
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credits { fcn, bcn } => write!(f, "Credits(fcn:{fcn}, bcn:{bcn})"),
            Self::SeqNum(v) => write!(f, "SeqNum(0x{v:04x})"),
            Self::Scalar(v) => write!(f, "Scalar({v})"),
            other => write!(f, "Tag(0x{:04x})", other.kind()),
        }
    }
}

fn decode_u16(kind: u16, value: &[u8]) -> Result<u16, TagError> {
    if value.len() != 2 {
        return Err(TagError::BadValueLength {
            kind,
            len: value.len(),
        });
    }

    Ok(u16::from_be_bytes(value.try_into().unwrap()))
}

fn encode_raw(buf: &mut Vec<u8>, kind: u16, value: &[u8]) {
    buf.extend_from_slice(&kind.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

/// Find the first tag of the requested kind.
pub fn find<'a>(tags: &'a [Tag], kind: u16) -> Option<&'a Tag> {
    tags.iter().find(|t| t.kind() == kind)
}

#[derive(Debug, Error)]
pub enum TagError {
    #[error("truncated tag header ({0} bytes left)")]
    TruncatedHeader(usize),
    #[error("tag 0x{kind:04x} length {length} runs past end of payload")]
    Overrun { kind: u16, length: usize },
    #[error("tag 0x{kind:04x} has invalid value length {len}")]
    BadValueLength { kind: u16, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tag: Tag) {
        let mut buf = Vec::new();

        tag.encode(&mut buf);

        let decoded = Tag::decode_all(&buf).unwrap();

        assert_eq!(decoded, vec![tag]);
    }

    #[test]
    fn roundtrip_simple_tags() {
        roundtrip(Tag::EndOfList);
        roundtrip(Tag::ServiceName(b"rfc4938".to_vec()));
        roundtrip(Tag::AcName(b"ac-1".to_vec()));
        roundtrip(Tag::HostUniq(0x1234u32.to_be_bytes().to_vec()));
        roundtrip(Tag::AcCookie(vec![1, 2, 3, 4, 5]));
        roundtrip(Tag::RelaySessionId(vec![9; 12]));
        roundtrip(Tag::GenericError(b"nope".to_vec()));
    }

    #[test]
    fn roundtrip_rfc4938_tags() {
        roundtrip(Tag::Credits { fcn: 7, bcn: 130 });
        roundtrip(Tag::SeqNum(0x0102));
        roundtrip(Tag::Scalar(64));
        roundtrip(Tag::Metrics(LinkMetrics {
            receive_only: true,
            rlq: 40,
            resources: 100,
            latency: 12,
            cdr_scale: 0,
            cdr: 500,
            mdr_scale: 3,
            mdr: 1000,
        }));
    }

    #[test]
    fn roundtrip_unknown_tag() {
        roundtrip(Tag::Unknown {
            kind: 0x0105,
            value: vec![0xde, 0xad],
        });
    }

    #[test]
    fn metrics_reserved_packing() {
        let mut buf = Vec::new();

        Tag::Metrics(LinkMetrics {
            receive_only: true,
            rlq: 0,
            resources: 0,
            latency: 0,
            cdr_scale: 2,
            cdr: 0,
            mdr_scale: 1,
            mdr: 0,
        })
        .encode(&mut buf);

        // reserved = mdr_scale << 3 | cdr_scale << 1 | receive_only
        let reserved = u16::from_be_bytes(buf[4..6].try_into().unwrap());

        assert_eq!(reserved, (1 << 3) | (2 << 1) | 1);
    }

    #[test]
    fn multiple_tags_in_order() {
        let buf = Tag::encode_all(&[
            Tag::SeqNum(1),
            Tag::Credits { fcn: 10, bcn: 240 },
            Tag::EndOfList,
        ]);
        let tags = Tag::decode_all(&buf).unwrap();

        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], Tag::SeqNum(1));
        assert_eq!(tags[1], Tag::Credits { fcn: 10, bcn: 240 });
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            Tag::decode_all(&[0x01, 0x01, 0x00]),
            Err(TagError::TruncatedHeader(3))
        ));
    }

    #[test]
    fn overrun_rejected() {
        // Claims 8 bytes of value but only 2 follow.
        let buf = [0x01, 0x01, 0x00, 0x08, 0x61, 0x62];

        assert!(matches!(
            Tag::decode_all(&buf),
            Err(TagError::Overrun {
                kind: TAG_SERVICE_NAME,
                length: 8
            })
        ));
    }

    #[test]
    fn credits_length_enforced() {
        let buf = [0x01, 0x06, 0x00, 0x02, 0x00, 0x01];

        assert!(matches!(
            Tag::decode_all(&buf),
            Err(TagError::BadValueLength { .. })
        ));
    }
}
