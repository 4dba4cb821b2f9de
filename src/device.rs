use crate::config::{Config, VifMode};
use crate::packet::ETH_ALEN;
use libc::{
    c_char, c_int, c_short, c_ulong, fcntl, ifreq, ioctl, read, recvfrom, sendto, sockaddr,
    sockaddr_ll, socket, socklen_t, write, AF_PACKET, F_GETFL, F_SETFL, IFF_NO_PI, IFF_TAP,
    O_NONBLOCK, O_RDWR, SIOCGIFHWADDR, SIOCGIFINDEX, SOCK_RAW,
};
use log::trace;
use macaddr::MacAddr6;
use pretty_hex::{hex_write, HexConfig};
use std::ffi::CString;
use std::io::Error;
use std::mem::{size_of_val, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

const TUNSETIFF: c_ulong = 0x4004_54CA;

/// Struct to build a [`sockaddr_ll`] for a bound interface.
pub struct AddrBuilder {
    ifindex: c_int,
}

impl AddrBuilder {
    pub fn new(ifindex: c_int) -> Self {
        Self { ifindex }
    }

    pub fn build(&self, proto: u16) -> sockaddr_ll {
        let mut v: sockaddr_ll = unsafe { zeroed() };

        v.sll_family = AF_PACKET as _;
        v.sll_protocol = proto.to_be();
        v.sll_ifindex = self.ifindex;
        v.sll_halen = ETH_ALEN as _;
        v
    }
}

/// Encapsulate an `AF_PACKET` socket bound to one EtherType.
pub struct PacketSocket {
    fd: AsyncFd<OwnedFd>,
    addr: sockaddr_ll,
}

impl PacketSocket {
    /// Open a raw packet socket for `proto` on the interface, non-blocking
    /// and registered with Tokio.
    pub fn open(ifindex: c_int, proto: u16) -> Result<Self, Error> {
        let s = unsafe { socket(AF_PACKET, SOCK_RAW, i32::from(proto.to_be())) };

        if s < 0 {
            return Err(Error::last_os_error());
        }

        let s = unsafe { OwnedFd::from_raw_fd(s) };

        set_nonblocking(s.as_raw_fd())?;

        let addr = AddrBuilder::new(ifindex).build(proto);

        bind_ll(s.as_raw_fd(), &addr)?;

        Ok(Self {
            fd: AsyncFd::with_interest(s, Interest::READABLE)?,
            addr,
        })
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let received = loop {
            if let Ok(v) = self.fd.readable().await?.try_io(|s| {
                let mut addr: sockaddr_ll = unsafe { zeroed() };
                let mut alen: socklen_t = size_of_val(&addr).try_into().unwrap();
                let received = unsafe {
                    recvfrom(
                        s.as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        0,
                        &mut addr as *mut sockaddr_ll as _,
                        &mut alen,
                    )
                };

                if received < 0 {
                    return Err(Error::last_os_error());
                }

                Ok(received as usize)
            }) {
                break v?;
            }
        };

        dump_frame("R", &buf[..received]);

        Ok(received)
    }

    pub fn send(&self, frame: &[u8]) -> Result<(), Error> {
        let sent = unsafe {
            sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr().cast(),
                frame.len(),
                0,
                &self.addr as *const sockaddr_ll as _,
                size_of_val(&self.addr).try_into().unwrap(),
            )
        };

        if sent < 0 {
            return Err(Error::last_os_error());
        }

        dump_frame("S", frame);

        Ok(())
    }
}

/// A TAP device delivering full Ethernet frames.
pub struct TapDevice {
    fd: AsyncFd<OwnedFd>,
    name: String,
}

impl TapDevice {
    pub fn open(name: &str) -> Result<Self, Error> {
        let path = CString::new("/dev/net/tun").unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), O_RDWR | O_NONBLOCK) };

        if fd < 0 {
            return Err(Error::last_os_error());
        }

        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let mut req: ifreq = unsafe { zeroed() };

        copy_ifname(&mut req, name)?;

        req.ifr_ifru.ifru_flags = (IFF_TAP | IFF_NO_PI) as c_short;

        if unsafe { ioctl(fd.as_raw_fd(), TUNSETIFF, &req) } < 0 {
            return Err(Error::last_os_error());
        }

        Ok(Self {
            fd: AsyncFd::with_interest(fd, Interest::READABLE)?,
            name: name.to_string(),
        })
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let received = loop {
            if let Ok(v) = self.fd.readable().await?.try_io(|s| {
                let received = unsafe { read(s.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };

                if received < 0 {
                    return Err(Error::last_os_error());
                }

                Ok(received as usize)
            }) {
                break v?;
            }
        };

        dump_frame("R", &buf[..received]);

        Ok(received)
    }

    pub fn send(&self, frame: &[u8]) -> Result<(), Error> {
        let sent = unsafe { write(self.fd.as_raw_fd(), frame.as_ptr().cast(), frame.len()) };

        if sent < 0 {
            return Err(Error::last_os_error());
        }

        dump_frame("S", frame);

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The local PPP-facing device, either a pair of raw packet sockets (one per
/// PPPoE EtherType) or a single TAP.
pub enum Device {
    Raw {
        discovery: PacketSocket,
        session: PacketSocket,
    },
    Tap(TapDevice),
}

impl Device {
    pub fn open(config: &Config) -> Result<(Self, MacAddr6), Error> {
        match config.vif_mode {
            VifMode::Raw => {
                let ifindex = interface_index(&config.iface)?;
                let hwaddr = interface_hwaddr(&config.iface)?;
                let discovery = PacketSocket::open(ifindex, config.eth_discovery)?;
                let session = PacketSocket::open(ifindex, config.eth_session)?;

                Ok((Self::Raw { discovery, session }, hwaddr))
            }
            VifMode::Tap => {
                let tap = TapDevice::open(&config.iface)?;
                let hwaddr = interface_hwaddr(tap.name())?;

                Ok((Self::Tap(tap), hwaddr))
            }
        }
    }

    /// Wait for the next frame from the local stack.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        match self {
            Self::Raw { discovery, session } => {
                let mut other = vec![0u8; buf.len()];
                tokio::select! {
                    v = discovery.recv(buf) => v,
                    v = session.recv(&mut other) => {
                        if let Ok(n) = v {
                            buf[..n].copy_from_slice(&other[..n]);
                        }
                        v
                    }
                }
            }
            Self::Tap(tap) => tap.recv(buf).await,
        }
    }

    /// Write a frame toward the local stack, picking the socket by EtherType
    /// in raw mode.
    pub fn send(&self, frame: &[u8], proto: u16, eth_discovery: u16) -> Result<(), Error> {
        match self {
            Self::Raw { discovery, session } => {
                if proto == eth_discovery {
                    discovery.send(frame)
                } else {
                    session.send(frame)
                }
            }
            Self::Tap(tap) => tap.send(frame),
        }
    }
}

pub fn interface_index(name: &str) -> Result<c_int, Error> {
    let mut req: ifreq = unsafe { zeroed() };
    let s = scratch_socket()?;

    copy_ifname(&mut req, name)?;

    if unsafe { ioctl(s.as_raw_fd(), SIOCGIFINDEX, &req) } < 0 {
        return Err(Error::last_os_error());
    }

    Ok(unsafe { req.ifr_ifru.ifru_ifindex })
}

pub fn interface_hwaddr(name: &str) -> Result<MacAddr6, Error> {
    let mut req: ifreq = unsafe { zeroed() };
    let s = scratch_socket()?;

    copy_ifname(&mut req, name)?;

    if unsafe { ioctl(s.as_raw_fd(), SIOCGIFHWADDR, &req) } < 0 {
        return Err(Error::last_os_error());
    }

    let raw = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
    let mut bytes = [0u8; ETH_ALEN];

    for (dst, src) in bytes.iter_mut().zip(raw.iter()) {
        *dst = *src as u8;
    }

    Ok(MacAddr6::from(bytes))
}

fn scratch_socket() -> Result<OwnedFd, Error> {
    let s = unsafe { socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };

    if s < 0 {
        return Err(Error::last_os_error());
    }

    Ok(unsafe { OwnedFd::from_raw_fd(s) })
}

fn copy_ifname(req: &mut ifreq, name: &str) -> Result<(), Error> {
    let bytes = name.as_bytes();

    if bytes.len() >= req.ifr_name.len() {
        return Err(Error::from(std::io::ErrorKind::InvalidInput));
    }

    for (dst, src) in req.ifr_name.iter_mut().zip(bytes.iter()) {
        *dst = *src as c_char;
    }

    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<(), Error> {
    let f = unsafe { fcntl(fd, F_GETFL) };

    if f < 0 || unsafe { fcntl(fd, F_SETFL, f | O_NONBLOCK) } < 0 {
        return Err(Error::last_os_error());
    }

    Ok(())
}

fn bind_ll(fd: RawFd, addr: &sockaddr_ll) -> Result<(), Error> {
    let len = size_of_val(addr).try_into().unwrap();
    let addr = addr as *const sockaddr_ll as *const sockaddr;

    if unsafe { libc::bind(fd, addr, len) < 0 } {
        Err(Error::last_os_error())
    } else {
        Ok(())
    }
}

fn dump_frame(dir: &str, data: &[u8]) {
    if log::log_enabled!(log::Level::Trace) {
        let mut out = format!("{dir}: (Length = {})\n", data.len());
        let mut conf = HexConfig::default();

        conf.title = false;

        hex_write(&mut out, &data, conf).unwrap();
        trace!("{out}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_builder_packs_fields() {
        let addr = AddrBuilder::new(3).build(0x8863);

        assert_eq!(addr.sll_family, AF_PACKET as u16);
        assert_eq!(addr.sll_protocol, 0x8863u16.to_be());
        assert_eq!(addr.sll_ifindex, 3);
        assert_eq!(usize::from(addr.sll_halen), ETH_ALEN);
    }
}
