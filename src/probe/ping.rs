//! Ping primitive with native ICMP and command fallback.
//!
//! Everything here blocks; callers run it on tokio's blocking pool.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};

use super::{Pinger, ProbeError};

/// Default per-probe timeout, matching common desktop ping tools.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn next_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // Unprivileged ICMP on Linux needs ping_group_range; macOS allows it.
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// ICMP echo pinger used outside of tests.
#[derive(Debug, Clone)]
pub struct IcmpPinger {
    timeout: Duration,
}

impl Default for IcmpPinger {
    fn default() -> Self {
        Self::new(DEFAULT_PING_TIMEOUT)
    }
}

impl IcmpPinger {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Pinger for IcmpPinger {
    fn ping(&self, address: &str) -> Result<Duration, ProbeError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ProbeError::Config("empty address".to_string()));
        }

        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        if capability == IcmpCapability::CommandOnly {
            return run_ping_command(address, self.timeout);
        }

        let ip = resolve_address(address)?;
        match send_echo(ip, self.timeout) {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    "Native ping failed with permission error for {}, falling back to command: {}",
                    address, msg
                );
                run_ping_command(address, self.timeout)
            }
            other => other,
        }
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    (address, 0)
        .to_socket_addrs()
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// ICMP parameters that differ between address families.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
}

impl EchoFamily {
    fn for_ip(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self {
                domain: Domain::IPV4,
                protocol: Protocol::ICMPV4,
                request_type: 8,
                reply_type: 0,
            },
            IpAddr::V6(_) => Self {
                domain: Domain::IPV6,
                protocol: Protocol::ICMPV6,
                request_type: 128,
                reply_type: 129,
            },
        }
    }
}

/// Send one echo request and wait for the matching reply.
fn send_echo(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = EchoFamily::for_ip(&ip);

    let (socket, raw) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(s) => (s, true),
        Err(_) => Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
            .map(|s| (s, false))
            .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?,
    };

    socket
        .set_read_timeout(Some(timeout))
        .and_then(|_| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let (identifier, sequence) = next_ping_id();
    let packet = build_echo_request(family.request_type, identifier, sequence, ip.is_ipv4());

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => ProbeError::Network(format!("Failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized the first `len` bytes.
        let reply: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        // The kernel rewrites the identifier on DGRAM sockets and only
        // delivers replies for this socket, so only RAW replies are checked.
        if let Some((kind, id, seq)) = parse_echo_reply(reply) {
            if kind == family.reply_type && seq == sequence && (!raw || id == identifier) {
                return Ok(elapsed);
            }
        }
    }
}

/// Build an echo request: 8 byte header plus 56 byte payload.
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    // ICMPv6 checksums cover a pseudo-header and are filled in by the kernel.
    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Extract (type, identifier, sequence) from a reply, skipping an IPv4
/// header when a RAW socket delivered one.
fn parse_echo_reply(buf: &[u8]) -> Option<(u8, u16, u16)> {
    let offset = match buf.first() {
        Some(b) if b >> 4 == 4 => usize::from(b & 0x0f) * 4,
        Some(_) => 0,
        None => return None,
    };
    let icmp = buf.get(offset..offset + 8)?;
    Some((
        icmp[0],
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    ))
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Run ping via the system command (fallback).
fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1).to_string();

    let mut cmd = Command::new("ping");
    if cfg!(windows) {
        let timeout_ms = timeout.as_millis().max(1).to_string();
        cmd.args(["-n", "1", "-w", &timeout_ms, address]);
    } else {
        cmd.args(["-c", "1", "-W", &timeout_secs, address]);
    }

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout") || stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout.trim())));
    }

    parse_ping_output(&stdout)
}

/// Parse ping command output for the round-trip time.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // Per-packet "time=12.3 ms" (Linux, macOS) or "time<1ms" (Windows)
            r"time[=<](?P<ms>[0-9.]+)\s*ms",
            // macOS summary
            r"round-trip\s+min/avg/max/stddev\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/",
            // Linux summary
            r"rtt\s+min/avg/max/mdev\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/",
        ]
        .into_iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });

    for re in patterns {
        let ms = re
            .captures(output)
            .and_then(|caps| caps.name("ms"))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        if let Some(ms) = ms {
            return Ok(Duration::from_secs_f64(ms / 1000.0));
        }
    }

    Err(ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_echo_request(8, 0x1234, 0x0001, true);
        // A packet carrying its own checksum sums to zero.
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        assert_eq!(icmp_checksum(&[0xff]), 0x00ff);
    }

    #[test]
    fn test_build_echo_request() {
        let packet = build_echo_request(8, 0x1234, 0x0001, true);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = build_echo_request(128, 1, 2, false);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_parse_echo_reply_skips_ipv4_header() {
        let mut raw = vec![0u8; 28];
        raw[0] = 0x45;
        raw[20] = 0;
        raw[24..26].copy_from_slice(&0xbeefu16.to_be_bytes());
        raw[26..28].copy_from_slice(&7u16.to_be_bytes());
        assert_eq!(parse_echo_reply(&raw), Some((0, 0xbeef, 7)));

        let dgram = [129u8, 0, 0, 0, 0, 1, 0, 2];
        assert_eq!(parse_echo_reply(&dgram), Some((129, 1, 2)));
        assert_eq!(parse_echo_reply(&[0x45, 0, 0]), None);
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let rtt = parse_ping_output(output).unwrap();
        assert!((rtt.as_secs_f64() * 1000.0 - 12.345).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let rtt = parse_ping_output(output).unwrap();
        assert!((rtt.as_secs_f64() * 1000.0 - 17.906).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_windows() {
        let output = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=64";
        let rtt = parse_ping_output(output).unwrap();
        assert_eq!(rtt, Duration::from_millis(1));
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(matches!(parse_ping_output("ping: unknown host"), Err(ProbeError::Command(_))));
    }

    #[test]
    fn test_empty_address_is_config_error() {
        let pinger = IcmpPinger::default();
        assert!(matches!(pinger.ping("  "), Err(ProbeError::Config(_))));
    }
}
