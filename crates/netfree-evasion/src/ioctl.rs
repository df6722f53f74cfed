//! Interface address and flag manipulation using ioctl (no external binaries).

use std::ffi::CString;
use std::os::unix::io::RawFd;

use crate::error::{EvasionError, Result};
use crate::mac::MacAddress;

const ARPHRD_ETHER: libc::sa_family_t = 1;

#[repr(C)]
#[derive(Clone, Copy)]
union IfReqData {
    hwaddr: libc::sockaddr,
    flags: libc::c_short,
    // sizeof(struct ifreq) is 40 on 64-bit; the kernel copies the full union back
    _pad: [u8; 24],
}

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_ifru: IfReqData,
}

impl IfReq {
    fn new(name: &CString) -> Self {
        // SAFETY: IfReq is plain old data; all-zero is a valid value.
        let mut ifr: IfReq = unsafe { std::mem::zeroed() };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name.as_bytes().iter()) {
            *dst = *src as libc::c_char;
        }
        ifr
    }
}

struct IoctlSocket(RawFd);

impl IoctlSocket {
    fn open() -> Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_IP) };
        if fd < 0 {
            return Err(EvasionError::System(format!(
                "Failed to open ioctl socket: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self(fd))
    }

    fn ioctl(&self, request: libc::c_ulong, ifr: &mut IfReq) -> std::io::Result<()> {
        let res = unsafe { libc::ioctl(self.0, request as _, ifr as *mut IfReq) };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for IoctlSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Validate an interface name and convert it for use in an `ifreq`
pub fn validate_ifname(name: &str) -> Result<CString> {
    if name.trim().is_empty() {
        return Err(EvasionError::InterfaceNotFound(
            "empty interface name".into(),
        ));
    }
    if name.len() >= libc::IFNAMSIZ {
        return Err(EvasionError::InterfaceError(format!(
            "Interface name '{}' too long",
            name
        )));
    }
    if name.contains('/') {
        return Err(EvasionError::InterfaceError(
            "invalid characters in interface name".into(),
        ));
    }
    CString::new(name).map_err(|_| {
        EvasionError::InterfaceError(format!("Interface name '{}' contains NUL", name))
    })
}

/// Read the hardware address of an interface with `SIOCGIFHWADDR`
pub fn get_hwaddr(interface: &str) -> Result<MacAddress> {
    let name = validate_ifname(interface)?;
    let sock = IoctlSocket::open()?;
    let mut ifr = IfReq::new(&name);
    sock.ioctl(libc::SIOCGIFHWADDR as libc::c_ulong, &mut ifr)
        .map_err(|e| EvasionError::from_os("reading MAC address", interface, e))?;

    let data = unsafe { ifr.ifr_ifru.hwaddr.sa_data };
    let mut bytes = [0u8; 6];
    for (dst, src) in bytes.iter_mut().zip(data.iter()) {
        *dst = *src as u8;
    }
    Ok(MacAddress::new(bytes))
}

/// Assign a hardware address with `SIOCSIFHWADDR`
///
/// Most drivers refuse this while the link is up; see [`set_link_up`].
pub fn set_hwaddr(interface: &str, mac: &MacAddress) -> Result<()> {
    let name = validate_ifname(interface)?;
    let sock = IoctlSocket::open()?;
    let mut ifr = IfReq::new(&name);

    // SAFETY: writing the sockaddr member of a zeroed union.
    let mut hwaddr: libc::sockaddr = unsafe { std::mem::zeroed() };
    hwaddr.sa_family = ARPHRD_ETHER;
    for (dst, src) in hwaddr.sa_data.iter_mut().zip(mac.as_bytes().iter()) {
        *dst = *src as libc::c_char;
    }
    ifr.ifr_ifru.hwaddr = hwaddr;

    sock.ioctl(libc::SIOCSIFHWADDR as libc::c_ulong, &mut ifr)
        .map_err(|e| EvasionError::from_os("setting MAC address", interface, e))
}

/// Bring an interface up or down by toggling `IFF_UP`
pub fn set_link_up(interface: &str, up: bool) -> Result<()> {
    let name = validate_ifname(interface)?;
    let sock = IoctlSocket::open()?;
    let mut ifr = IfReq::new(&name);

    let operation = if up {
        "bringing interface up"
    } else {
        "bringing interface down"
    };

    sock.ioctl(libc::SIOCGIFFLAGS as libc::c_ulong, &mut ifr)
        .map_err(|e| EvasionError::from_os(operation, interface, e))?;

    let mut flags = unsafe { ifr.ifr_ifru.flags };
    if up {
        flags |= libc::IFF_UP as libc::c_short;
    } else {
        flags &= !(libc::IFF_UP as libc::c_short);
    }
    ifr.ifr_ifru.flags = flags;

    sock.ioctl(libc::SIOCSIFFLAGS as libc::c_ulong, &mut ifr)
        .map_err(|e| EvasionError::from_os(operation, interface, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_ifreq_matches_kernel_size() {
        assert_eq!(std::mem::size_of::<IfReq>(), 40);
    }

    #[test]
    fn test_validate_ifname() {
        assert!(validate_ifname("wlan0").is_ok());
        assert!(validate_ifname("").is_err());
        assert!(validate_ifname("a/b").is_err());
        assert!(validate_ifname("wlan0\0").is_err());
        assert!(validate_ifname("averyveryverylongname").is_err());
    }

    #[test]
    fn test_ifreq_copies_name() {
        let name = validate_ifname("eth0").unwrap();
        let ifr = IfReq::new(&name);
        assert_eq!(ifr.ifr_name[0] as u8, b'e');
        assert_eq!(ifr.ifr_name[3] as u8, b'0');
        assert_eq!(ifr.ifr_name[4], 0);
    }
}
