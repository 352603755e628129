//! Default gateway discovery for NAT-PMP
//!
//! NAT-PMP requests go to the default gateway, which is read from the
//! platform routing table.

use super::types::MappingError;
use std::net::{IpAddr, Ipv4Addr};

/// Find the default IPv4 gateway
pub fn find_default_gateway() -> Result<IpAddr, MappingError> {
    #[cfg(target_os = "linux")]
    {
        let table = std::fs::read_to_string("/proc/net/route")
            .map_err(|e| MappingError::Internal(format!("Failed to read route table: {}", e)))?;
        parse_proc_net_route(&table).ok_or(MappingError::NoGateway)
    }

    #[cfg(target_os = "macos")]
    {
        let output = run_command("netstat", &["-rn", "-f", "inet"])?;
        parse_netstat_routes(&output).ok_or(MappingError::NoGateway)
    }

    #[cfg(target_os = "windows")]
    {
        let output = run_command("route", &["print", "0.0.0.0"])?;
        parse_route_print(&output).ok_or(MappingError::NoGateway)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(MappingError::NotSupported)
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn run_command(program: &str, args: &[&str]) -> Result<String, MappingError> {
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .map_err(|e| MappingError::Internal(format!("Failed to run {}: {}", program, e)))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse Linux `/proc/net/route`: the default route has destination
/// `00000000` and a little-endian hex gateway in the third column.
pub(crate) fn parse_proc_net_route(table: &str) -> Option<IpAddr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        let gateway = u32::from_str_radix(fields[2], 16).ok()?;
        if gateway == 0 {
            return None;
        }
        Some(IpAddr::V4(Ipv4Addr::from(gateway.swap_bytes())))
    })
}

/// Parse `netstat -rn -f inet` output (macOS/BSD)
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn parse_netstat_routes(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .filter(|line| line.starts_with("default"))
        .find_map(|line| line.split_whitespace().nth(1)?.parse::<Ipv4Addr>().ok())
        .map(IpAddr::V4)
}

/// Parse `route print 0.0.0.0` output (Windows)
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn parse_route_print(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("0.0.0.0"))
        .find_map(|line| line.split_whitespace().nth(2)?.parse::<Ipv4Addr>().ok())
        .map(IpAddr::V4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_net_route() {
        let table = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\n\
                     eth0\t0000A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\n\
                     eth0\t00000000\t0101A8C0\t0003\t0\t0\t0\t00000000\n";
        assert_eq!(
            parse_proc_net_route(table),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)))
        );
    }

    #[test]
    fn test_parse_proc_net_route_without_default() {
        let table = "Iface\tDestination\tGateway\n\
                     eth0\t0000A8C0\t00000000\n";
        assert_eq!(parse_proc_net_route(table), None);
    }

    #[test]
    fn test_parse_netstat_routes() {
        let output = "Routing tables\n\nInternet:\n\
                      Destination        Gateway            Flags        Netif Expire\n\
                      default            10.0.0.1           UGScg          en0\n\
                      127                127.0.0.1          UCS            lo0\n";
        assert_eq!(
            parse_netstat_routes(output),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );
    }

    #[test]
    fn test_parse_route_print() {
        let output = "IPv4 Route Table\n\
                      Network Destination        Netmask          Gateway       Interface  Metric\n\
                      \x20         0.0.0.0          0.0.0.0      192.168.0.1    192.168.0.23     25\n";
        assert_eq!(
            parse_route_print(output),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)))
        );
    }
}
