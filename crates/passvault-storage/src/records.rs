//! Record types persisted by the repositories.
//!
//! These mirror table rows one-to-one. Business rules (what counts as a
//! tracked attempt, how an export is laid out) live in `passvault-core`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// A persisted request attempt.
///
/// Rows are append-only. The only mutation ever applied is setting
/// `time_unlock`, which retires the row from window counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub source: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Unix seconds when the attempt was recorded.
    pub time: i64,
    /// Unix seconds when an administrator unlocked the row.
    pub time_unlock: Option<i64>,
}

impl TrackRecord {
    /// Whether the row still counts towards throttling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.time_unlock.is_none()
    }

    /// The client address, preferring IPv4.
    #[must_use]
    pub fn address(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }

    /// Whether this row belongs to the given client address.
    #[must_use]
    pub fn matches_address(&self, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> bool {
        (ipv4.is_some() && self.ipv4 == ipv4) || (ipv6.is_some() && self.ipv6 == ipv6)
    }
}

/// Insert shape for a track row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrack {
    pub user_id: Option<i64>,
    pub source: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub time: i64,
}

/// Window count query: active rows for one source and client since `since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackQuery {
    pub source: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub since: i64,
}

/// Filter for administrative listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFilter {
    pub source: Option<String>,
    pub active_only: bool,
    pub limit: Option<usize>,
}

impl TrackFilter {
    /// Whether a row passes this filter.
    #[must_use]
    pub fn accepts(&self, track: &TrackRecord) -> bool {
        if self.active_only && !track.is_active() {
            return false;
        }
        self.source
            .as_deref()
            .is_none_or(|source| source == track.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub is_global: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: i64,
    pub name: String,
}

/// A stored credential.
///
/// `pass` is ciphertext under the vault master key; the storage layer never
/// sees the plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: i64,
    pub name: String,
    pub client_id: i64,
    pub category_id: i64,
    pub login: String,
    pub url: String,
    pub notes: String,
    pub pass: Vec<u8>,
    pub tag_ids: Vec<i64>,
}

impl std::fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("category_id", &self.category_id)
            .field("pass", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Insert shape for an account.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub client_id: i64,
    pub category_id: i64,
    pub login: String,
    pub url: String,
    pub notes: String,
    pub pass: Vec<u8>,
    pub tag_ids: Vec<i64>,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("pass", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> TrackRecord {
        TrackRecord {
            id: 1,
            user_id: None,
            source: "login".to_owned(),
            ipv4,
            ipv6,
            time: 100,
            time_unlock: None,
        }
    }

    #[test]
    fn matches_address_compares_present_family_only() {
        let v4 = Ipv4Addr::new(10, 0, 0, 1);
        let row = track(Some(v4), None);
        assert!(row.matches_address(Some(v4), None));
        assert!(!row.matches_address(Some(Ipv4Addr::new(10, 0, 0, 2)), None));
        // A missing family on both sides must not count as a match.
        assert!(!row.matches_address(None, None));
    }

    #[test]
    fn address_prefers_ipv4() {
        let row = track(Some(Ipv4Addr::LOCALHOST), Some(Ipv6Addr::LOCALHOST));
        assert_eq!(row.address(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn filter_active_only_skips_unlocked() {
        let mut row = track(Some(Ipv4Addr::LOCALHOST), None);
        let filter = TrackFilter {
            active_only: true,
            ..TrackFilter::default()
        };
        assert!(filter.accepts(&row));
        row.time_unlock = Some(200);
        assert!(!filter.accepts(&row));
    }

    #[test]
    fn filter_by_source() {
        let row = track(Some(Ipv4Addr::LOCALHOST), None);
        let filter = TrackFilter {
            source: Some("api".to_owned()),
            ..TrackFilter::default()
        };
        assert!(!filter.accepts(&row));
    }

    #[test]
    fn account_debug_redacts_pass() {
        let account = AccountRecord {
            id: 1,
            name: "db".to_owned(),
            client_id: 1,
            category_id: 1,
            login: "root".to_owned(),
            url: String::new(),
            notes: String::new(),
            pass: b"ciphertext".to_vec(),
            tag_ids: vec![],
        };
        let debug = format!("{account:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("99, 105"));
    }
}
