use crate::tags::{self, Tag, TagError, TAG_CREDITS_LENGTH, TAG_HDR_SIZE, TAG_RFC4938_CREDITS};
use macaddr::MacAddr6;
use thiserror::Error;

pub const CODE_SESS: u8 = 0x00;
pub const CODE_PADO: u8 = 0x07;
pub const CODE_PADI: u8 = 0x09;
pub const CODE_PADG: u8 = 0x0A;
pub const CODE_PADC: u8 = 0x0B;
pub const CODE_PADQ: u8 = 0x0C;
pub const CODE_PADR: u8 = 0x19;
pub const CODE_PADS: u8 = 0x65;
pub const CODE_PADT: u8 = 0xA7;

pub const ETH_PPPOE_DISCOVERY: u16 = 0x8863;
pub const ETH_PPPOE_SESSION: u16 = 0x8864;

pub const ETH_ALEN: usize = 6;
pub const ETH_HDR_SIZE: usize = 14;
pub const PPPOE_HDR_SIZE: usize = 6;
pub const ETH_PPPOE_OVERHEAD: usize = ETH_HDR_SIZE + PPPOE_HDR_SIZE;
pub const PPP_OVERHEAD: usize = 2;
pub const ETH_DATA_LEN: usize = 1500;
pub const MAX_PPPOE_PAYLOAD: usize = ETH_DATA_LEN - PPPOE_HDR_SIZE;
pub const MAX_PPPOE_MTU: usize = MAX_PPPOE_PAYLOAD - PPP_OVERHEAD;

pub const BROADCAST_MAC: MacAddr6 = MacAddr6::new(0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF);

/// A PPPoE packet over a full Ethernet frame.
///
/// Discovery packets carry a tag list in `payload`; session packets carry PPP
/// payload, optionally prefixed with an in-band credit tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PppoePacket {
    pub dst: MacAddr6,
    pub src: MacAddr6,
    pub ether_type: u16,
    pub code: u8,
    pub session_id: u16,
    pub payload: Vec<u8>,
}

impl PppoePacket {
    pub fn new(
        dst: MacAddr6,
        src: MacAddr6,
        ether_type: u16,
        code: u8,
        session_id: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            dst,
            src,
            ether_type,
            code,
            session_id,
            payload,
        }
    }

    /// Deserialize a full Ethernet frame.
    ///
    /// Frames shorter than the claimed PPPoE length are rejected; trailing
    /// Ethernet padding is tolerated.
    pub fn deserialize(frame: &[u8]) -> Result<Self, PacketError> {
        if frame.len() < ETH_PPPOE_OVERHEAD {
            return Err(PacketError::TooShort(frame.len()));
        }

        let dst = mac_from(&frame[0..6]);
        let src = mac_from(&frame[6..12]);
        let ether_type = u16::from_be_bytes(frame[12..14].try_into().unwrap());

        // Check version and type.
        let ver = frame[14] & 0xF;
        let ty = frame[14] >> 4;

        if ver != 1 || ty != 1 {
            return Err(PacketError::BadVersionType { ver, ty });
        }

        let code = frame[15];
        let session_id = u16::from_be_bytes(frame[16..18].try_into().unwrap());
        let length: usize = u16::from_be_bytes(frame[18..20].try_into().unwrap()).into();
        let payload = frame[ETH_PPPOE_OVERHEAD..]
            .get(..length)
            .ok_or(PacketError::BadLength {
                claimed: length,
                actual: frame.len() - ETH_PPPOE_OVERHEAD,
            })?;

        Ok(Self {
            dst,
            src,
            ether_type,
            code,
            session_id,
            payload: payload.to_vec(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ETH_PPPOE_OVERHEAD + self.payload.len());

        buf.extend_from_slice(self.dst.as_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.extend_from_slice(&self.ether_type.to_be_bytes());
        buf.push(0x11);
        buf.push(self.code);
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn pppoe_length(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Decode the discovery tag list carried in the payload.
    pub fn tags(&self) -> Result<Vec<Tag>, TagError> {
        Tag::decode_all(&self.payload)
    }

    /// True when the session payload begins with an in-band credit tag.
    pub fn has_inband_credits(&self) -> bool {
        self.payload.len() >= 2
            && u16::from_be_bytes(self.payload[..2].try_into().unwrap()) == TAG_RFC4938_CREDITS
    }

    /// Strip the leading in-band credit tag from a session payload, sliding
    /// the remaining PPP payload down. Returns the tag's `(fcn, bcn)`.
    pub fn strip_inband_credits(&mut self) -> Result<(u16, u16), PacketError> {
        if self.payload.len() < TAG_HDR_SIZE {
            return Err(PacketError::TooShort(self.payload.len()));
        }

        let length: usize = u16::from_be_bytes(self.payload[2..4].try_into().unwrap()).into();
        let tag_size = TAG_HDR_SIZE + length;

        if length != TAG_CREDITS_LENGTH || tag_size > self.payload.len() {
            return Err(PacketError::Tag(TagError::Overrun {
                kind: TAG_RFC4938_CREDITS,
                length,
            }));
        }

        let fcn = u16::from_be_bytes(self.payload[4..6].try_into().unwrap());
        let bcn = u16::from_be_bytes(self.payload[6..8].try_into().unwrap());

        self.payload.drain(..tag_size);

        Ok((fcn, bcn))
    }

    /// Prepend an in-band credit tag to a session payload, extending the
    /// PPPoE length. The MTU guard is the caller's job.
    pub fn insert_inband_credits(&mut self, fcn: u16, bcn: u16) {
        let mut tag = Vec::with_capacity(TAG_HDR_SIZE + TAG_CREDITS_LENGTH);

        Tag::Credits { fcn, bcn }.encode(&mut tag);
        tag.extend_from_slice(&self.payload);

        self.payload = tag;
    }

    /// True when inserting an in-band credit tag would exceed the PPPoE MTU.
    pub fn inband_would_exceed_mtu(&self) -> bool {
        self.payload.len() + TAG_HDR_SIZE + TAG_CREDITS_LENGTH + PPPOE_HDR_SIZE > MAX_PPPOE_MTU
    }
}

/// Build a discovery packet from a tag list.
pub fn discovery_packet(
    dst: MacAddr6,
    src: MacAddr6,
    ether_type: u16,
    code: u8,
    session_id: u16,
    tag_list: &[Tag],
) -> PppoePacket {
    PppoePacket::new(
        dst,
        src,
        ether_type,
        code,
        session_id,
        tags::Tag::encode_all(tag_list),
    )
}

pub fn is_unicast(mac: MacAddr6) -> bool {
    (mac.as_bytes()[0] & 0x01) == 0
}

fn mac_from(bytes: &[u8]) -> MacAddr6 {
    MacAddr6::from(TryInto::<[u8; ETH_ALEN]>::try_into(bytes).unwrap())
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("unexpected PPPoE version {ver} type {ty}")]
    BadVersionType { ver: u8, ty: u8 },
    #[error("bogus PPPoE length field ({claimed} > {actual})")]
    BadLength { claimed: usize, actual: usize },
    #[error(transparent)]
    Tag(#[from] TagError),
}
