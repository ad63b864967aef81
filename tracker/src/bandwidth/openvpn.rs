//! OpenVPN status-log parsing and per-session delta accounting.
//!
//! The status file only reports cumulative counters for each connected
//! client, so traffic has to be derived by diffing consecutive polls:
//!
//! - a session seen in both polls contributes `new - previous` per
//!   direction, or the whole new value if the counter went backwards;
//! - a session seen for the first time only establishes its baseline;
//! - a session that vanished contributes its last known counters once and
//!   counts as one completed session.

use super::model::ClientState;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub const CLIENT_LIST_TAG: &str = "CLIENT_LIST";
const CONNECTED_SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MIN_CLIENT_LIST_FIELDS: usize = 8;

/// Source of the current status-log text.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Returns `Ok(None)` when there is no status log to read.
    async fn read_status(&self) -> io::Result<Option<String>>;
}

pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl StatusSource for StatusFile {
    async fn read_status(&self) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "OpenVPN status file not present");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Parses every `CLIENT_LIST` record into a map keyed by common name.
///
/// Lines that do not parse are skipped. A later record for the same common
/// name replaces an earlier one.
pub fn parse_status(content: &str, now: DateTime<Utc>) -> BTreeMap<String, ClientState> {
    let mut clients = BTreeMap::new();

    for line in content.lines() {
        if let Some(client) = parse_client_line(line, now) {
            clients.insert(client.common_name.clone(), client);
        }
    }

    clients
}

// CLIENT_LIST,common_name,real_address,virtual_ip,virtual_ipv6,bytes_received,bytes_sent,connected_since,username,client_id,peer_id
fn parse_client_line(line: &str, now: DateTime<Utc>) -> Option<ClientState> {
    let fields: Vec<&str> = line.trim_end_matches('\r').split(',').collect();
    if fields.first() != Some(&CLIENT_LIST_TAG) {
        return None;
    }
    if fields.len() < MIN_CLIENT_LIST_FIELDS {
        debug!(fields = fields.len(), "skipping short CLIENT_LIST line");
        return None;
    }

    let (Ok(bytes_received), Ok(bytes_sent)) =
        (fields[5].trim().parse::<u64>(), fields[6].trim().parse::<u64>())
    else {
        debug!(common_name = fields[1], "skipping CLIENT_LIST line with bad byte counters");
        return None;
    };

    let connected_since = NaiveDateTime::parse_from_str(fields[7].trim(), CONNECTED_SINCE_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);

    Some(ClientState {
        common_name: fields[1].to_string(),
        real_address: fields[2].to_string(),
        bytes_sent,
        bytes_received,
        connected_since,
        last_seen_at: now,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionDeltas {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub sessions_ended: u64,
}

/// Byte and session deltas between two consecutive polls.
pub fn compute_deltas(
    previous: &BTreeMap<String, ClientState>,
    current: &BTreeMap<String, ClientState>,
) -> SessionDeltas {
    let mut deltas = SessionDeltas::default();

    for (common_name, now) in current {
        let Some(before) = previous.get(common_name) else {
            continue;
        };
        deltas.bytes_sent = deltas
            .bytes_sent
            .saturating_add(counter_delta(before.bytes_sent, now.bytes_sent));
        deltas.bytes_received = deltas
            .bytes_received
            .saturating_add(counter_delta(before.bytes_received, now.bytes_received));
    }

    for (common_name, before) in previous {
        if current.contains_key(common_name) {
            continue;
        }
        debug!(
            common_name = %common_name,
            bytes_sent = before.bytes_sent,
            bytes_received = before.bytes_received,
            "OpenVPN session ended"
        );
        deltas.bytes_sent = deltas.bytes_sent.saturating_add(before.bytes_sent);
        deltas.bytes_received = deltas.bytes_received.saturating_add(before.bytes_received);
        deltas.sessions_ended += 1;
    }

    deltas
}

// A counter that went backwards means the session restarted; its whole
// current value is new traffic.
fn counter_delta(previous: u64, current: u64) -> u64 {
    current.checked_sub(previous).unwrap_or(current)
}

/// Sum of the cumulative counters of every listed client.
pub fn live_totals(clients: &BTreeMap<String, ClientState>) -> (u64, u64) {
    clients.values().fold((0u64, 0u64), |(sent, received), client| {
        (
            sent.saturating_add(client.bytes_sent),
            received.saturating_add(client.bytes_received),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const STATUS_V2: &str = "\
TITLE,OpenVPN 2.5.9 x86_64-pc-linux-gnu
TIME,2024-05-01 12:00:00,1714564800
HEADER,CLIENT_LIST,Common Name,Real Address,Virtual Address,Virtual IPv6 Address,Bytes Received,Bytes Sent,Connected Since,Connected Since (time_t),Username,Client ID,Peer ID
CLIENT_LIST,alice,203.0.113.10:51820,10.8.0.2,,2048,4096,2024-05-01 11:30:00,UNDEF,0,0
CLIENT_LIST,bob,198.51.100.7:40000,10.8.0.3,,10,20,2024-05-01 11:45:12,UNDEF,1,1
HEADER,ROUTING_TABLE,Virtual Address,Common Name,Real Address,Last Ref
ROUTING_TABLE,10.8.0.2,alice,203.0.113.10:51820,2024-05-01 11:59:59
GLOBAL_STATS,Max bcast/mcast queue length,0
END
";

    fn client(name: &str, sent: u64, received: u64) -> ClientState {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        ClientState {
            common_name: name.to_string(),
            real_address: "192.0.2.1:1194".to_string(),
            bytes_sent: sent,
            bytes_received: received,
            connected_since: at,
            last_seen_at: at,
        }
    }

    fn snapshot(clients: &[ClientState]) -> BTreeMap<String, ClientState> {
        clients
            .iter()
            .map(|c| (c.common_name.clone(), c.clone()))
            .collect()
    }

    #[test]
    fn parses_client_list_records() {
        let now = Utc::now();
        let clients = parse_status(STATUS_V2, now);

        assert_eq!(clients.len(), 2);
        let alice = &clients["alice"];
        assert_eq!(alice.real_address, "203.0.113.10:51820");
        assert_eq!(alice.bytes_received, 2048);
        assert_eq!(alice.bytes_sent, 4096);
        assert_eq!(
            alice.connected_since,
            Utc.with_ymd_and_hms(2024, 5, 1, 11, 30, 0).unwrap()
        );
        assert_eq!(alice.last_seen_at, now);
    }

    #[test]
    fn skips_malformed_lines() {
        let content = "\
CLIENT_LIST,short,1.2.3.4:1,10.8.0.9
CLIENT_LIST,badbytes,1.2.3.4:1,10.8.0.9,,lots,20,2024-05-01 11:45:12
CLIENT_LIST_EXTRA,other,1.2.3.4:1,10.8.0.9,,1,2,2024-05-01 11:45:12
CLIENT_LIST,good,1.2.3.4:1,10.8.0.9,,1,2,2024-05-01 11:45:12
";
        let clients = parse_status(content, Utc::now());
        assert_eq!(clients.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn unparseable_connected_since_falls_back_to_poll_time() {
        let now = Utc::now();
        let clients = parse_status("CLIENT_LIST,carol,1.2.3.4:1,10.8.0.4,,5,6,yesterday", now);
        assert_eq!(clients["carol"].connected_since, now);
    }

    #[test]
    fn handles_crlf_line_endings() {
        let content = "CLIENT_LIST,dave,1.2.3.4:1,10.8.0.5,,7,8,2024-05-01 11:45:12,UNDEF\r\n";
        let clients = parse_status(content, Utc::now());
        assert_eq!(clients["dave"].bytes_sent, 8);
    }

    #[test]
    fn empty_status_has_no_clients() {
        assert!(parse_status("", Utc::now()).is_empty());
    }

    #[test]
    fn continuing_session_contributes_its_increase() {
        let previous = snapshot(&[client("A", 100, 200)]);
        let current = snapshot(&[client("A", 150, 250)]);

        let deltas = compute_deltas(&previous, &current);
        assert_eq!(deltas.bytes_sent, 50);
        assert_eq!(deltas.bytes_received, 50);
        assert_eq!(deltas.sessions_ended, 0);
    }

    #[test]
    fn counter_decrease_counts_full_new_value() {
        let previous = snapshot(&[client("A", 1_000, 2_000)]);
        let current = snapshot(&[client("A", 30, 2_500)]);

        let deltas = compute_deltas(&previous, &current);
        assert_eq!(deltas.bytes_sent, 30);
        assert_eq!(deltas.bytes_received, 500);
    }

    #[test]
    fn new_session_only_sets_baseline() {
        let previous = BTreeMap::new();
        let current = snapshot(&[client("A", 100, 200)]);

        assert_eq!(compute_deltas(&previous, &current), SessionDeltas::default());
    }

    #[test]
    fn ended_session_contributes_last_known_counters_once() {
        let previous = snapshot(&[client("A", 150, 250), client("B", 1, 1)]);
        let current = snapshot(&[client("B", 1, 1)]);

        let deltas = compute_deltas(&previous, &current);
        assert_eq!(deltas.bytes_sent, 150);
        assert_eq!(deltas.bytes_received, 250);
        assert_eq!(deltas.sessions_ended, 1);

        let after = compute_deltas(&current, &current);
        assert_eq!(after, SessionDeltas::default());
    }

    #[test]
    fn three_poll_scenario_accumulates_without_loss() {
        let polls = [
            snapshot(&[client("A", 100, 200)]),
            snapshot(&[client("A", 150, 250)]),
            BTreeMap::new(),
        ];

        let mut sent = 0;
        let mut received = 0;
        let mut sessions = 0;
        for pair in polls.windows(2) {
            let deltas = compute_deltas(&pair[0], &pair[1]);
            sent += deltas.bytes_sent;
            received += deltas.bytes_received;
            sessions += deltas.sessions_ended;
        }

        assert_eq!((sent, received, sessions), (200, 300, 1));
    }

    #[test]
    fn live_totals_sum_active_clients() {
        let clients = snapshot(&[client("A", 10, 20), client("B", 1, 2)]);
        assert_eq!(live_totals(&clients), (11, 22));
    }

    #[tokio::test]
    async fn missing_status_file_reads_as_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = StatusFile::new(dir.path().join("status.log"));
        assert_eq!(source.read_status().await.unwrap(), None);
    }

    #[tokio::test]
    async fn status_file_returns_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("status.log");
        std::fs::write(&path, STATUS_V2).unwrap();

        let source = StatusFile::new(&path);
        let content = source.read_status().await.unwrap().unwrap();
        assert_eq!(parse_status(&content, Utc::now()).len(), 2);
    }
}
