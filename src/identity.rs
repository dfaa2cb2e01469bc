//! Host identity reported to the control plane with every status poll
//!
//! Every field is best-effort: a lookup that fails leaves its field `null`
//! instead of failing the poll.

use crate::error::IdentityError;
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::warn;

/// Client name reported in the payload and the User-Agent
pub const CLIENT_NAME: &str = "wrenchmode-rs";
/// Client version reported in the payload and the User-Agent
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Value for the User-Agent header of status calls
pub fn user_agent() -> String {
    format!("{}-{}", CLIENT_NAME, CLIENT_VERSION)
}

/// JSON body of a status poll
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpdatePackage {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub pid: Option<u32>,
    pub client_name: &'static str,
    pub client_version: &'static str,
}

impl UpdatePackage {
    /// Gather identity from the running host
    pub fn collect(logging: bool) -> Self {
        let hostname = lookup_hostname()
            .map_err(|e| {
                if logging {
                    warn!(error = %e, "Could not determine hostname");
                }
            })
            .ok();

        let ip_address = lookup_public_ipv4()
            .map_err(|e| {
                if logging {
                    warn!(error = %e, "Could not determine IP address");
                }
            })
            .ok()
            .map(|ip| ip.to_string());

        Self {
            hostname,
            ip_address,
            pid: Some(std::process::id()),
            client_name: CLIENT_NAME,
            client_version: CLIENT_VERSION,
        }
    }
}

/// Whether an address is worth reporting as this host's public address
pub fn is_reportable(ip: &Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_private() && !ip.is_link_local() && !ip.is_unspecified()
}

/// First interface address that is neither loopback nor private
pub fn lookup_public_ipv4() -> Result<Ipv4Addr, IdentityError> {
    interface_ipv4_addrs()?
        .into_iter()
        .find(is_reportable)
        .ok_or(IdentityError::NoPublicAddress)
}

pub fn lookup_hostname() -> Result<String, IdentityError> {
    let name = hostname::get()
        .map_err(|e| IdentityError::Hostname(e.to_string()))?
        .to_string_lossy()
        .into_owned();
    if name.is_empty() {
        return Err(IdentityError::Hostname("empty hostname".to_string()));
    }
    Ok(name)
}

#[cfg(unix)]
fn interface_ipv4_addrs() -> Result<Vec<Ipv4Addr>, IdentityError> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success getifaddrs hands us a list that we release with freeifaddrs
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(IdentityError::Interfaces(
            std::io::Error::last_os_error().to_string(),
        ));
    }

    let mut addrs = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: cursor is a non-null node of the list returned above
        let entry = unsafe { &*cursor };
        if !entry.ifa_addr.is_null() {
            // SAFETY: ifa_addr is non-null and points at a sockaddr
            let family = unsafe { (*entry.ifa_addr).sa_family } as i32;
            if family == libc::AF_INET {
                // SAFETY: AF_INET entries hold a sockaddr_in
                let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                addrs.push(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
            }
        }
        cursor = entry.ifa_next;
    }

    // SAFETY: head came from getifaddrs and is freed exactly once
    unsafe { libc::freeifaddrs(head) };
    Ok(addrs)
}

#[cfg(not(unix))]
fn interface_ipv4_addrs() -> Result<Vec<Ipv4Addr>, IdentityError> {
    Err(IdentityError::Interfaces(
        "interface enumeration is not supported on this platform".to_string(),
    ))
}
