use anyhow::{Result, anyhow};
use socket2::{Domain, Protocol, Socket, Type};

/// Socket with metadata about type (for DGRAM-aware parsing)
#[derive(Debug)]
pub struct SocketInfo {
    pub socket: Socket,
    /// True if SOCK_DGRAM (no IP header in received packets)
    pub is_dgram: bool,
}

/// Create a raw ICMP socket
pub fn create_raw_icmp_socket(ipv6: bool) -> Result<Socket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Create an unprivileged ICMP socket (SOCK_DGRAM)
///
/// On Linux this needs the caller's group inside `net.ipv4.ping_group_range`.
pub fn create_dgram_icmp_socket(ipv6: bool) -> Result<Socket> {
    let socket = if ipv6 {
        Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::ICMPV6))?
    } else {
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?
    };
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Create a socket for sending echo requests and reading their replies
///
/// On macOS, prefers DGRAM because RAW sockets don't support IP_TTL.
/// Elsewhere prefers RAW and falls back to DGRAM for unprivileged ICMP.
pub fn create_echo_socket(ipv6: bool) -> Result<SocketInfo> {
    #[cfg(target_os = "macos")]
    {
        if let Ok(socket) = create_dgram_icmp_socket(ipv6) {
            return Ok(SocketInfo {
                socket,
                is_dgram: true,
            });
        }
        return match create_raw_icmp_socket(ipv6) {
            Ok(socket) => Ok(SocketInfo {
                socket,
                is_dgram: false,
            }),
            Err(_) => Err(permission_error()),
        };
    }

    #[cfg(not(target_os = "macos"))]
    {
        if let Ok(socket) = create_raw_icmp_socket(ipv6) {
            return Ok(SocketInfo {
                socket,
                is_dgram: false,
            });
        }
        match create_dgram_icmp_socket(ipv6) {
            Ok(socket) => {
                tracing::warn!(
                    "Using unprivileged ICMP sockets. Some features may be limited \
                     (intermediate traceroute hops are not reported)."
                );
                Ok(SocketInfo {
                    socket,
                    is_dgram: true,
                })
            }
            Err(_) => Err(permission_error()),
        }
    }
}

fn permission_error() -> anyhow::Error {
    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "netprobe".to_string());

    anyhow!(
        "Insufficient permissions for ICMP sockets.\n\n\
         Fix options:\n\
         \u{2022} Run with sudo\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}\n\
         \u{2022} Enable unprivileged ICMP: sudo sysctl -w net.ipv4.ping_group_range='0 65534'",
        binary_path
    )
}

/// Set TTL (IPv4) or hop limit (IPv6) on any socket-like handle
pub fn set_ttl(socket: socket2::SockRef<'_>, ttl: u8, ipv6: bool) -> Result<()> {
    if ipv6 {
        socket.set_unicast_hops_v6(ttl as u32)?;
    } else {
        socket.set_ttl(ttl as u32)?;
    }
    Ok(())
}

/// Set Don't Fragment flag
/// - IPv4: Sets IP_MTU_DISCOVER = IP_PMTUDISC_DO (always set DF bit)
/// - IPv6: Sets IPV6_DONTFRAG = 1 (prevent source fragmentation)
#[cfg(target_os = "linux")]
pub fn set_dont_fragment(socket: &Socket, ipv6: bool) -> Result<()> {
    // IPV6_DONTFRAG = 62; IP_MTU_DISCOVER = 10 with IP_PMTUDISC_DO = 2
    if ipv6 {
        setsockopt_int(socket, libc::IPPROTO_IPV6, 62, 1)
    } else {
        setsockopt_int(socket, libc::IPPROTO_IP, 10, 2)
    }
}

/// Set Don't Fragment flag (macOS)
/// - IPv4: Sets IP_DONTFRAG = 1
/// - IPv6: Sets IPV6_DONTFRAG = 1
#[cfg(target_os = "macos")]
pub fn set_dont_fragment(socket: &Socket, ipv6: bool) -> Result<()> {
    // IPV6_DONTFRAG = 62; IP_DONTFRAG = 28
    if ipv6 {
        setsockopt_int(socket, libc::IPPROTO_IPV6, 62, 1)
    } else {
        setsockopt_int(socket, libc::IPPROTO_IP, 28, 1)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn set_dont_fragment(_socket: &Socket, _ipv6: bool) -> Result<()> {
    Err(anyhow!("Don't-fragment is not supported on this platform"))
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn setsockopt_int(
    socket: &Socket,
    level: libc::c_int,
    optname: libc::c_int,
    val: libc::c_int,
) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            optname,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
