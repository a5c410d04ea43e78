/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! iperf (v2, UDP mode) command lines and report parsing.

use std::sync::LazyLock;

use regex::Regex;

/// Matches the bandwidth / jitter / loss columns of a UDP report line, e.g.
/// `2.40 Mbits/sec   0.123 ms    5/ 1000 (0.5%)`.
static REPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)([0-9]*\.?[0-9]+)\s*([kmg]?)bits/sec\s+([0-9]*\.?[0-9]+)\s*ms\s+(\d+)\s*/\s*(\d+)\s*\(([0-9]*\.?[0-9]+(?:e[+-]?\d+)?)%\)",
    )
    .expect("report pattern is valid")
});

/// Figures extracted from the client-side server report.
#[derive(Debug, Clone, PartialEq)]
pub struct IperfReport {
    pub throughput_mbps: f64,
    pub jitter_ms: f64,
    pub lost_packets: u64,
    pub total_packets: u64,
    pub loss_percent: f64,
}

/// Shell snippet printing the first IPv4 address of `interface`.
pub fn address_command(interface: &str) -> String {
    format!("ip addr show {interface} | grep 'inet ' | awk '{{print $2}}' | cut -d/ -f1")
}

pub fn link_status_command(interface: &str) -> String {
    format!("iw dev {interface} link")
}

/// Prints the pids of running iperf processes, one per line.
pub const FIND_STALE: &str = "pgrep -x iperf";

pub const KILL_STALE: &str = "pkill -x iperf";

/// Starts a detached UDP server and prints its pid.
pub const START_SERVER: &str = "nohup iperf -s -u > /dev/null 2>&1 & echo $!";

pub fn client_command(server_ip: &str, bandwidth_mbps: f64, data_bytes: u64) -> String {
    format!("iperf -c {server_ip} -u -b {bandwidth_mbps}M -n {data_bytes}")
}

pub fn kill_command(pid: u32) -> String {
    format!("kill -9 {pid}")
}

/// Whether `iw dev <if> link` output reports an association.
pub fn is_associated(output: &str) -> bool {
    output.contains("Connected to")
}

/// Parse the pid echoed by [`START_SERVER`].
pub fn parse_pid(output: &str) -> Option<u32> {
    output.lines().map(str::trim).find(|l| !l.is_empty())?.parse().ok()
}

/// Extract the server report from client output.
///
/// The last matching line wins: with UDP the client prints its own interval
/// line first and the server's report (the one carrying loss) last.
pub fn parse_report(output: &str) -> Option<IperfReport> {
    let caps = output
        .lines()
        .filter(|l| l.contains("bits/sec"))
        .filter_map(|l| REPORT_RE.captures(l))
        .last()?;

    let rate: f64 = caps[1].parse().ok()?;
    let throughput_mbps = match caps[2].to_ascii_lowercase().as_str() {
        "k" => rate / 1_000.0,
        "m" => rate,
        "g" => rate * 1_000.0,
        _ => rate / 1_000_000.0,
    };

    Some(IperfReport {
        throughput_mbps,
        jitter_ms: caps[3].parse().ok()?,
        lost_packets: caps[4].parse().ok()?,
        total_packets: caps[5].parse().ok()?,
        loss_percent: caps[6].parse().ok()?,
    })
}
