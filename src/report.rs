//! Report generation for the console.
//!
//! A [`Report`] captures one view of a [`LeaseStore`] together with the single
//! timestamp used to compute it. It can be rendered as the classic dhcpd
//! lease table or serialized as JSON.

use std::fmt::Write;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::record::LeaseRecord;
use crate::store::LeaseStore;

const ACTIVE_RULE: &str =
    "+-----------------+-------------------+----------------------+-----------------";
const ABANDONED_RULE: &str = "+-----------------+----------------------+-----------------";
const STARTS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Active,
    Static,
    Abandoned,
}

impl ReportKind {
    fn title(self) -> &'static str {
        match self {
            Self::Active => "DHCPD ACTIVE LEASES REPORT",
            Self::Static => "DHCPD STATIC LEASES REPORT",
            Self::Abandoned => "DHCPD ABANDONED LEASES REPORT",
        }
    }

    fn total_label(self) -> &'static str {
        match self {
            Self::Active => "Total Active Leases",
            Self::Static => "Total Static Leases",
            Self::Abandoned => "Total Abandoned Leases",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report<'a> {
    pub kind: ReportKind,
    pub generated_at: DateTime<Utc>,
    pub count: usize,
    pub leases: Vec<&'a LeaseRecord>,
}

impl<'a> Report<'a> {
    /// Builds the requested view of `store` as of `now`.
    pub fn build(store: &'a LeaseStore, kind: ReportKind, now: DateTime<Utc>) -> Self {
        let leases = match kind {
            ReportKind::Active => store.active_view(now),
            ReportKind::Static => store.static_view(now),
            ReportKind::Abandoned => store.abandoned_view(),
        };

        Self {
            kind,
            generated_at: now,
            count: leases.len(),
            leases,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Renders the report as a text table.
    ///
    /// `hardware_placeholder` stands in for leases with no MAC address.
    pub fn render_text(&self, hardware_placeholder: &str) -> String {
        let mut out = String::new();

        match self.kind {
            ReportKind::Active | ReportKind::Static => {
                self.render_active(&mut out, hardware_placeholder)
            }
            ReportKind::Abandoned => self.render_abandoned(&mut out),
        }

        out
    }

    fn render_active(&self, out: &mut String, hardware_placeholder: &str) {
        let _ = writeln!(out, "+{}", "-".repeat(78));
        let _ = writeln!(out, "| {}", self.kind.title());
        let _ = writeln!(out, "{ACTIVE_RULE}");
        let _ = writeln!(
            out,
            "| {:<15} | {:<17} | {:<20} | {:<16}",
            "IP Address", "MAC Address", "Expires (days,H:M:S)", "Client Hostname"
        );
        let _ = writeln!(out, "{ACTIVE_RULE}");

        for lease in &self.leases {
            let expires = match lease.remaining(self.generated_at) {
                Some(remaining) => format_remaining(remaining),
                None => "never".to_string(),
            };
            let hardware = lease
                .hardware_address
                .as_deref()
                .unwrap_or(hardware_placeholder);

            let _ = writeln!(
                out,
                "| {:<15} | {:<17} | {:>20} | {}",
                address(lease),
                hardware,
                expires,
                lease.hostname.as_deref().unwrap_or_default()
            );
        }

        let _ = writeln!(out, "{ACTIVE_RULE}");
        self.render_footer(out, 78);
    }

    fn render_abandoned(&self, out: &mut String) {
        let _ = writeln!(out, "+{}", "-".repeat(58));
        let _ = writeln!(out, "| {}", self.kind.title());
        let _ = writeln!(out, "{ABANDONED_RULE}");
        let _ = writeln!(
            out,
            "| {:<15} | {:<20} | {:<16}",
            "IP Address", "Starts", "Client Hostname"
        );
        let _ = writeln!(out, "{ABANDONED_RULE}");

        for lease in &self.leases {
            let starts = lease
                .starts
                .map(|starts| starts.format(STARTS_FORMAT).to_string())
                .unwrap_or_default();

            let _ = writeln!(
                out,
                "| {:<15} | {:<20} | {}",
                address(lease),
                starts,
                lease.hostname.as_deref().unwrap_or_default()
            );
        }

        let _ = writeln!(out, "{ABANDONED_RULE}");
        self.render_footer(out, 58);
    }

    fn render_footer(&self, out: &mut String, width: usize) {
        let _ = writeln!(out, "| {}: {}", self.kind.total_label(), self.count);
        let _ = writeln!(
            out,
            "| Report generated (UTC): {}",
            round_to_second(self.generated_at).format(STARTS_FORMAT)
        );
        let _ = writeln!(out, "+{}", "-".repeat(width));
    }
}

fn address(lease: &LeaseRecord) -> String {
    lease.ip.map(|ip| ip.to_string()).unwrap_or_default()
}

/// Rounds to the nearest second; exactly half a second rounds down.
fn round_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at
        .duration_trunc(TimeDelta::seconds(1))
        .unwrap_or(at);
    if at - truncated > TimeDelta::milliseconds(500) {
        truncated + TimeDelta::seconds(1)
    } else {
        truncated
    }
}

/// Formats a remaining lease time as `H:MM:SS`, `1 day, H:MM:SS` or
/// `N days, H:MM:SS`, rounded to the nearest second.
pub fn format_remaining(remaining: TimeDelta) -> String {
    let mut seconds = remaining.num_seconds();
    if remaining.subsec_nanos() > 500_000_000 {
        seconds += 1;
    } else if remaining.subsec_nanos() < -500_000_000 {
        seconds -= 1;
    }

    let sign = if seconds < 0 { "-" } else { "" };
    let seconds = seconds.unsigned_abs();
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let seconds = seconds % 60;
    let clock = format!("{hours}:{minutes:02}:{seconds:02}");

    match days {
        0 => format!("{sign}{clock}"),
        1 => format!("{sign}1 day, {clock}"),
        days => format!("{sign}{days} days, {clock}"),
    }
}
