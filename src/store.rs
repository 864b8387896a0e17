//! Lease log loading and reconciliation.
//!
//! The dhcpd lease file is log-structured: whenever a lease changes, a new
//! declaration for it is appended to the end of the file. The same address
//! can therefore appear many times, and the declaration that appears last is
//! the one in effect. [`LeaseStore`] keeps every parsed declaration in file
//! order and derives the current views from it on demand.
//!
//! Every view takes the evaluation time `now` as a parameter. Callers sample
//! the clock once per report and pass the same value everywhere.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::MalformedPolicy;
use crate::error::{Error, Result};
use crate::record::LeaseRecord;

/// Address of a `lease <ipv4> {` header line, if `line` is one.
fn lease_header(line: &str) -> Option<Ipv4Addr> {
    let rest = line.trim_start().strip_prefix("lease")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let mut words = rest.split_whitespace();
    let first = words.next()?;
    let (address, brace) = match first.strip_suffix('{') {
        Some(address) => (address, true),
        None => (first, words.next().is_some_and(|word| word.starts_with('{'))),
    };

    if !brace {
        return None;
    }
    address.parse().ok()
}

/// Splits raw lease file content into `lease <ipv4> { ... }` blocks.
///
/// A block starts at a header line and ends at the first following line that
/// holds only `}`. Anything between blocks (comments, `server-duid`,
/// `failover peer` state, `lease6` declarations) is skipped. An unterminated
/// block is discarded.
pub fn split_blocks(content: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut open: Option<usize> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if lease_header(line).is_some() {
            if let Some(start) = open {
                warn!(
                    offset = start,
                    "discarding unterminated lease block"
                );
            }
            open = Some(line_start);
            continue;
        }

        if let Some(start) = open
            && line.trim() == "}"
        {
            blocks.push(content[start..offset].trim_end());
            open = None;
        }
    }

    if let Some(start) = open {
        warn!(offset = start, "discarding unterminated lease block at end of file");
    }

    blocks
}

fn sort_by_address(records: &mut [&LeaseRecord]) {
    records.sort_by_key(|record| record.ip_key());
}

/// Every lease declaration from one snapshot of a lease file.
///
/// Built once and never modified. Views are recomputed on each call.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use dhcpd_leases::{LeaseStore, MalformedPolicy};
///
/// let content = "lease 10.0.0.5 {\n  binding state active;\n}\n";
/// let store = LeaseStore::parse(content, MalformedPolicy::Abort).unwrap();
/// assert_eq!(store.active_view(Utc::now()).len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LeaseStore {
    records: Vec<LeaseRecord>,
}

impl LeaseStore {
    /// Reads and parses the lease file at `path`.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileAccess`] if the file cannot be read, and
    /// [`Error::MalformedLease`] under [`MalformedPolicy::Abort`].
    pub async fn load<P: AsRef<Path>>(path: P, policy: MalformedPolicy) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| Error::file_access(path, source))?;
        let content = String::from_utf8_lossy(&bytes);

        let store = Self::parse(&content, policy)?;
        info!(
            path = %path.display(),
            records = store.records.len(),
            "loaded lease file"
        );
        Ok(store)
    }

    /// Parses lease file content that is already in memory.
    pub fn parse(content: &str, policy: MalformedPolicy) -> Result<Self> {
        let mut records = Vec::new();

        for block in split_blocks(content) {
            let record = match LeaseRecord::parse(block) {
                Ok(record) => record,
                Err(error @ Error::MalformedLease { .. }) if policy == MalformedPolicy::Skip => {
                    warn!(%error, "skipping malformed lease");
                    continue;
                }
                Err(error) => return Err(error),
            };

            if record.ip.is_none() {
                warn!("skipping lease block without a readable address");
                continue;
            }
            records.push(record);
        }

        debug!(records = records.len(), "parsed lease blocks");
        Ok(Self { records })
    }

    /// All declarations in file order, oldest first.
    pub fn records(&self) -> &[LeaseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The current lease for each address that is active at `now`.
    ///
    /// Walks the log forward; each active declaration replaces whatever was
    /// held for its address. Sorted ascending by address.
    pub fn active_view(&self, now: DateTime<Utc>) -> Vec<&LeaseRecord> {
        let mut current: HashMap<Ipv4Addr, &LeaseRecord> = HashMap::new();

        for record in &self.records {
            let Some(ip) = record.ip else {
                continue;
            };
            if record.is_active(now) {
                current.insert(ip, record);
            }
        }

        let mut view: Vec<&LeaseRecord> = current.into_values().collect();
        sort_by_address(&mut view);
        view
    }

    /// The active view restricted to leases that never expire.
    pub fn static_view(&self, now: DateTime<Utc>) -> Vec<&LeaseRecord> {
        self.active_view(now)
            .into_iter()
            .filter(|record| record.is_static())
            .collect()
    }

    /// Every abandoned declaration, including older versions of the same
    /// address. Sorted by address; equal addresses keep file order.
    pub fn abandoned_view(&self) -> Vec<&LeaseRecord> {
        let mut view: Vec<&LeaseRecord> = self
            .records
            .iter()
            .filter(|record| record.is_abandoned())
            .collect();
        sort_by_address(&mut view);
        view
    }

    /// Every declaration for `ip`, in file order.
    pub fn history(&self, ip: Ipv4Addr) -> Vec<&LeaseRecord> {
        self.records
            .iter()
            .filter(|record| record.ip == Some(ip))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LeaseEnd;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn active_block(ip: &str, state: &str) -> String {
        format!(
            "lease {ip} {{\n  starts 0 2025/06/01 00:00:00;\n  ends 1 2025/06/02 00:00:00;\n  binding state {state};\n}}\n"
        )
    }

    fn expired_block(ip: &str) -> String {
        format!(
            "lease {ip} {{\n  starts 0 2025/05/01 00:00:00;\n  ends 1 2025/05/02 00:00:00;\n  binding state free;\n}}\n"
        )
    }

    fn static_block(ip: &str) -> String {
        format!("lease {ip} {{\n  ends never;\n  binding state active;\n}}\n")
    }

    fn abandoned_block(ip: &str, hostname: &str) -> String {
        format!(
            "lease {ip} {{\n  starts 0 2025/05/01 00:00:00;\n  ends 1 2025/05/02 00:00:00;\n  binding state abandoned;\n  client-hostname \"{hostname}\";\n}}\n"
        )
    }

    fn ips(view: &[&LeaseRecord]) -> Vec<String> {
        view.iter()
            .map(|record| record.ip.map(|ip| ip.to_string()).unwrap_or_default())
            .collect()
    }

    fn parse(content: &str) -> LeaseStore {
        LeaseStore::parse(content, MalformedPolicy::Abort).unwrap()
    }

    #[test]
    fn test_split_blocks_skips_other_declarations() {
        let content = format!(
            "# The format of this file is documented in the dhcpd.leases(5) manual page.\n\
             authoring-byte-order little-endian;\n\
             server-duid \"\\000\\001\";\n\
             failover peer \"dhcp\" state {{\n  my state normal at 1 2025/06/01 00:00:00;\n}}\n\
             {}\
             lease6 2001:db8::1 {{\n  binding state active;\n}}\n\
             {}",
            active_block("10.0.0.1", "active"),
            static_block("10.0.0.2"),
        );

        let blocks = split_blocks(&content);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("lease 10.0.0.1 {"));
        assert!(blocks[0].ends_with('}'));
        assert!(blocks[1].starts_with("lease 10.0.0.2 {"));
    }

    #[test]
    fn test_split_blocks_discards_unterminated_block() {
        let content = format!(
            "lease 10.0.0.1 {{\n  binding state active;\n{}lease 10.0.0.3 {{\n  binding state free;\n",
            static_block("10.0.0.2")
        );
        let blocks = split_blocks(&content);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("lease 10.0.0.2 {"));
    }

    #[test]
    fn test_lease_header_variants() {
        assert_eq!(lease_header("lease 10.0.0.1 {"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(lease_header("  lease 10.0.0.1{\n"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(lease_header("lease6 2001:db8::1 {"), None);
        assert_eq!(lease_header("lease 10.0.0.1"), None);
        assert_eq!(lease_header("lease-time 600;"), None);
        assert_eq!(lease_header("lease host.example {"), None);
    }

    #[test]
    fn test_last_declaration_wins() {
        let content = format!(
            "{}{}",
            active_block("10.0.0.5", "active"),
            active_block("10.0.0.5", "backup"),
        );
        let store = parse(&content);
        let view = store.active_view(now());

        assert_eq!(store.len(), 2);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].binding_state.as_deref(), Some("backup"));
    }

    #[test]
    fn test_inactive_later_version_does_not_hide_active_one() {
        let content = format!(
            "{}{}",
            active_block("10.0.0.5", "active"),
            expired_block("10.0.0.5"),
        );
        let store = parse(&content);
        let view = store.active_view(now());

        assert_eq!(view.len(), 1);
        assert_eq!(view[0].binding_state.as_deref(), Some("active"));
    }

    #[test]
    fn test_active_view_sorted_numerically() {
        let content = format!(
            "{}{}{}",
            active_block("10.0.0.5", "active"),
            active_block("2.2.2.2", "active"),
            active_block("192.168.1.1", "active"),
        );
        let store = parse(&content);
        assert_eq!(
            ips(&store.active_view(now())),
            vec!["2.2.2.2", "10.0.0.5", "192.168.1.1"]
        );
    }

    #[test]
    fn test_active_view_excludes_expired() {
        let content = format!(
            "{}{}",
            expired_block("10.0.0.1"),
            active_block("10.0.0.2", "active"),
        );
        let store = parse(&content);
        assert_eq!(ips(&store.active_view(now())), vec!["10.0.0.2"]);
    }

    #[test]
    fn test_active_view_depends_on_now() {
        let store = parse(&active_block("10.0.0.1", "active"));
        let later = Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap();
        assert_eq!(store.active_view(now()).len(), 1);
        assert!(store.active_view(later).is_empty());
    }

    #[test]
    fn test_distinct_addresses_all_reported_once() {
        let content: String = (1..=50)
            .map(|host| active_block(&format!("172.16.0.{host}"), "active"))
            .collect();
        let store = parse(&content);
        let view = ips(&store.active_view(now()));

        assert_eq!(view.len(), 50);
        for host in 1..=50 {
            let ip = format!("172.16.0.{host}");
            assert_eq!(view.iter().filter(|seen| **seen == ip).count(), 1);
        }
    }

    #[test]
    fn test_static_view_is_subset_of_active_view() {
        let content = format!(
            "{}{}{}",
            active_block("10.0.0.1", "active"),
            static_block("10.0.0.2"),
            static_block("10.0.0.3"),
        );
        let store = parse(&content);
        let active = store.active_view(now());
        let statics = store.static_view(now());

        assert_eq!(ips(&statics), vec!["10.0.0.2", "10.0.0.3"]);
        for record in &statics {
            assert!(record.is_static());
            assert!(active.iter().any(|candidate| candidate == record));
        }
    }

    #[test]
    fn test_abandoned_view_keeps_every_version() {
        let content = format!(
            "{}{}{}",
            abandoned_block("10.0.0.9", "first"),
            abandoned_block("10.0.0.3", "other"),
            abandoned_block("10.0.0.9", "second"),
        );
        let store = parse(&content);
        let view = store.abandoned_view();

        assert_eq!(ips(&view), vec!["10.0.0.3", "10.0.0.9", "10.0.0.9"]);
        assert_eq!(view[1].hostname.as_deref(), Some("first"));
        assert_eq!(view[2].hostname.as_deref(), Some("second"));
    }

    #[test]
    fn test_static_abandoned_lease_shows_in_both_views() {
        let store = parse("lease 10.0.0.7 {\n  binding state abandoned;\n}\n");
        assert_eq!(store.abandoned_view().len(), 1);
        assert_eq!(store.static_view(now()).len(), 1);
    }

    #[test]
    fn test_malformed_lease_aborts_by_default() {
        let content = format!(
            "{}lease 10.0.0.2 {{\n  ends 1 whenever;\n}}\n",
            active_block("10.0.0.1", "active")
        );
        let result = LeaseStore::parse(&content, MalformedPolicy::Abort);
        assert!(matches!(result, Err(Error::MalformedLease { .. })));
    }

    #[test]
    fn test_malformed_lease_skipped_when_configured() {
        let content = format!(
            "{}lease 10.0.0.2 {{\n  ends 1 whenever;\n}}\n{}",
            active_block("10.0.0.1", "active"),
            static_block("10.0.0.3"),
        );
        let store = LeaseStore::parse(&content, MalformedPolicy::Skip).unwrap();
        assert_eq!(ips(&store.active_view(now())), vec!["10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn test_history_returns_versions_in_file_order() {
        let content = format!(
            "{}{}{}",
            active_block("10.0.0.5", "active"),
            static_block("10.0.0.6"),
            expired_block("10.0.0.5"),
        );
        let store = parse(&content);
        let history = store.history(Ipv4Addr::new(10, 0, 0, 5));

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].binding_state.as_deref(), Some("active"));
        assert_eq!(history[1].binding_state.as_deref(), Some("free"));
    }

    #[test]
    fn test_views_are_recomputed_consistently() {
        let store = parse(&format!(
            "{}{}",
            active_block("10.0.0.1", "active"),
            static_block("10.0.0.2")
        ));
        assert_eq!(store.active_view(now()), store.active_view(now()));
        assert_eq!(
            store.active_view(now())[1].ends,
            Some(LeaseEnd::Never)
        );
    }

    #[test]
    fn test_empty_content() {
        let store = parse("");
        assert!(store.is_empty());
        assert!(store.active_view(now()).is_empty());
        assert!(store.abandoned_view().is_empty());
    }

    #[tokio::test]
    async fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        std::fs::write(&path, active_block("10.0.0.1", "active")).unwrap();

        let store = LeaseStore::load(&path, MalformedPolicy::Abort).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_load_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        let mut bytes = b"lease 10.0.0.1 {\n  uid \"\xff\xfe\";\n  ends never;\n}\n".to_vec();
        bytes.extend_from_slice(static_block("10.0.0.2").as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let store = LeaseStore::load(&path, MalformedPolicy::Abort).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.records()[0].client_uid.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.leases");

        let result = LeaseStore::load(&path, MalformedPolicy::Abort).await;
        match result {
            Err(Error::FileAccess { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected FileAccess, got {other:?}"),
        }
    }
}
