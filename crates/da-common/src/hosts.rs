//! Hosts-file parsing: one line per process, `id ip_or_hostname port`.

use std::collections::BTreeMap;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use thiserror::Error;

use crate::ProcessId;

#[derive(Debug, Error)]
pub enum HostsError {
    #[error("hosts file `{path}` does not exist or could not be read: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{path}` failed to parse at line {line}: expected `id ip_or_hostname port`")]
    BadLine { path: String, line: usize },
    #[error("`{path}` must contain at least two hosts")]
    TooFew { path: String },
    #[error("`{path}` has a duplicate id {id}")]
    DuplicateId { path: String, id: ProcessId },
    #[error("in `{path}` ids of processes must start from 1 and be compact (1..N)")]
    NonCompactIds { path: String },
    #[error("could not resolve host `{host}` in `{path}`")]
    UnresolvableHost { path: String, host: String },
}

/// The parsed hosts file: process id → socket address, 1-indexed and compact.
#[derive(Debug, Clone)]
pub struct HostsTable {
    entries: BTreeMap<ProcessId, SocketAddr>,
}

impl HostsTable {
    /// Parse a hosts file. Enforces the same invariants the reference parser
    /// does: at least two hosts, ids compact over 1..N.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, HostsError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let contents = fs::read_to_string(path_ref).map_err(|source| HostsError::Unreadable {
            path: path_str.clone(),
            source,
        })?;

        let mut entries = BTreeMap::new();
        for (idx, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(id_str), Some(host_str), Some(port_str)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(HostsError::BadLine {
                    path: path_str,
                    line: idx + 1,
                });
            };
            if fields.next().is_some() {
                return Err(HostsError::BadLine {
                    path: path_str,
                    line: idx + 1,
                });
            }

            let id: ProcessId = id_str.parse().map_err(|_| HostsError::BadLine {
                path: path_str.clone(),
                line: idx + 1,
            })?;
            let port: u16 = port_str.parse().map_err(|_| HostsError::BadLine {
                path: path_str.clone(),
                line: idx + 1,
            })?;
            let addr = resolve(host_str, port).ok_or_else(|| HostsError::UnresolvableHost {
                path: path_str.clone(),
                host: host_str.to_string(),
            })?;

            if entries.insert(id, addr).is_some() {
                return Err(HostsError::DuplicateId {
                    path: path_str,
                    id,
                });
            }
        }

        if entries.len() < 2 {
            return Err(HostsError::TooFew { path: path_str });
        }

        let min_id = *entries.keys().next().unwrap();
        let max_id = *entries.keys().next_back().unwrap();
        if min_id != 1 || max_id as usize != entries.len() {
            return Err(HostsError::NonCompactIds { path: path_str });
        }

        tracing::info!(n = entries.len(), "parsed hosts file");
        Ok(HostsTable { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addr_of(&self, id: ProcessId) -> Option<SocketAddr> {
        self.entries.get(&id).copied()
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.entries.contains_key(&id)
    }

    /// All peers other than `self_id`, in ascending id order.
    pub fn peers_of(&self, self_id: ProcessId) -> impl Iterator<Item = (ProcessId, SocketAddr)> + '_ {
        self.entries
            .iter()
            .filter(move |(&id, _)| id != self_id)
            .map(|(&id, &addr)| (id, addr))
    }

    pub fn ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.entries.keys().copied()
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    (host, port).to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_compact_ids() {
        let f = write_tmp("1 127.0.0.1 11001\n2 127.0.0.1 11002\n3 127.0.0.1 11003\n");
        let table = HostsTable::parse(f.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.addr_of(2).unwrap(),
            "127.0.0.1:11002".parse().unwrap()
        );
        let peers: Vec<_> = table.peers_of(1).map(|(id, _)| id).collect();
        assert_eq!(peers, vec![2, 3]);
    }

    #[test]
    fn rejects_non_compact_ids() {
        let f = write_tmp("1 127.0.0.1 11001\n5 127.0.0.1 11002\n");
        assert!(matches!(
            HostsTable::parse(f.path()),
            Err(HostsError::NonCompactIds { .. })
        ));
    }

    #[test]
    fn rejects_too_few_hosts() {
        let f = write_tmp("1 127.0.0.1 11001\n");
        assert!(matches!(
            HostsTable::parse(f.path()),
            Err(HostsError::TooFew { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let f = write_tmp("1 127.0.0.1 11001\n1 127.0.0.1 11002\n");
        assert!(matches!(
            HostsTable::parse(f.path()),
            Err(HostsError::DuplicateId { .. })
        ));
    }

    #[test]
    fn rejects_malformed_line() {
        let f = write_tmp("1 127.0.0.1 11001\nbanana\n");
        assert!(matches!(
            HostsTable::parse(f.path()),
            Err(HostsError::BadLine { .. })
        ));
    }

    #[test]
    fn ignores_blank_lines() {
        let f = write_tmp("1 127.0.0.1 11001\n\n2 127.0.0.1 11002\n   \n");
        let table = HostsTable::parse(f.path()).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn missing_file_is_unreadable() {
        assert!(matches!(
            HostsTable::parse("/nonexistent/path/hosts.txt"),
            Err(HostsError::Unreadable { .. })
        ));
    }
}
