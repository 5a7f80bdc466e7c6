//! Mode-specific config file parsing and the `Mode` selector.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::ProcessId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file `{path}` does not exist or could not be read: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config file `{path}` is empty")]
    Empty { path: String },
    #[error("`{path}` failed to parse at line {line}")]
    BadLine { path: String, line: usize },
    #[error("mode `{mode}` requires a config file but none was given")]
    Missing { mode: &'static str },
}

/// Which top-level protocol the driver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Pl,
    Fifo,
    Lattice,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Pl => "pl",
            Mode::Fifo => "fifo",
            Mode::Lattice => "lattice",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pl" => Ok(Mode::Pl),
            "fifo" => Ok(Mode::Fifo),
            "lattice" => Ok(Mode::Lattice),
            other => Err(format!("invalid mode `{other}` (expected pl|fifo|lattice)")),
        }
    }
}

/// Line 1 of a `pl`-mode config: `<n_messages> <receiver_id>`.
#[derive(Debug, Clone, Copy)]
pub struct PlConfig {
    pub n_messages: u32,
    pub receiver_id: ProcessId,
}

/// Line 1 of a `fifo`-mode config: `<n_messages>`.
#[derive(Debug, Clone, Copy)]
pub struct FifoConfig {
    pub n_messages: u32,
}

/// A `lattice`-mode config: `<p> <vs> <ds>` header then `p` proposal lines.
#[derive(Debug, Clone)]
pub struct LatticeConfig {
    /// Number of proposals (rounds) this process will drive.
    pub n_proposals: u32,
    /// Maximum proposal size — used to size send buffers.
    pub max_proposal_size: u32,
    /// Maximum decided-set size — used to size the receive buffer / MTU.
    pub max_decided_size: u32,
    pub proposals: Vec<Vec<u32>>,
}

pub fn parse_pl(path: impl AsRef<Path>) -> Result<PlConfig, ConfigError> {
    let (path_str, first_line) = read_first_line(path)?;
    let mut fields = first_line.split_whitespace();
    let (Some(n), Some(r)) = (fields.next(), fields.next()) else {
        return Err(ConfigError::BadLine { path: path_str, line: 1 });
    };
    let n_messages = n
        .parse()
        .map_err(|_| ConfigError::BadLine { path: path_str.clone(), line: 1 })?;
    let receiver_id = r
        .parse()
        .map_err(|_| ConfigError::BadLine { path: path_str, line: 1 })?;
    Ok(PlConfig { n_messages, receiver_id })
}

pub fn parse_fifo(path: impl AsRef<Path>) -> Result<FifoConfig, ConfigError> {
    let (path_str, first_line) = read_first_line(path)?;
    let n_messages = first_line
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(ConfigError::BadLine { path: path_str, line: 1 })?;
    Ok(FifoConfig { n_messages })
}

pub fn parse_lattice(path: impl AsRef<Path>) -> Result<LatticeConfig, ConfigError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::Unreadable {
        path: path_str.clone(),
        source,
    })?;
    let mut lines = contents.lines();

    let header = lines.next().ok_or_else(|| ConfigError::Empty { path: path_str.clone() })?;
    let mut fields = header.split_whitespace();
    let (Some(p), Some(vs), Some(ds)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(ConfigError::BadLine { path: path_str, line: 1 });
    };
    let n_proposals = p
        .parse()
        .map_err(|_| ConfigError::BadLine { path: path_str.clone(), line: 1 })?;
    let max_proposal_size = vs
        .parse()
        .map_err(|_| ConfigError::BadLine { path: path_str.clone(), line: 1 })?;
    let max_decided_size = ds
        .parse()
        .map_err(|_| ConfigError::BadLine { path: path_str.clone(), line: 1 })?;

    let mut proposals = Vec::new();
    for (idx, raw_line) in lines.enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let mut values = Vec::new();
        for tok in line.split_whitespace() {
            let v: u32 = tok
                .parse()
                .map_err(|_| ConfigError::BadLine { path: path_str.clone(), line: idx + 2 })?;
            values.push(v);
        }
        proposals.push(values);
    }

    Ok(LatticeConfig {
        n_proposals,
        max_proposal_size,
        max_decided_size,
        proposals,
    })
}

fn read_first_line(path: impl AsRef<Path>) -> Result<(String, String), ConfigError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::Unreadable {
        path: path_str.clone(),
        source,
    })?;
    let first = contents
        .lines()
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::Empty { path: path_str.clone() })?;
    Ok((path_str, first))
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
    fn parses_pl_config() {
        let f = write_tmp("5 2\n");
        let cfg = parse_pl(f.path()).unwrap();
        assert_eq!(cfg.n_messages, 5);
        assert_eq!(cfg.receiver_id, 2);
    }

    #[test]
    fn parses_fifo_config() {
        let f = write_tmp("10\n");
        let cfg = parse_fifo(f.path()).unwrap();
        assert_eq!(cfg.n_messages, 10);
    }

    #[test]
    fn parses_lattice_config_with_proposals() {
        let f = write_tmp("3 4 8\n1 2\n2 3\n3 4\n");
        let cfg = parse_lattice(f.path()).unwrap();
        assert_eq!(cfg.n_proposals, 3);
        assert_eq!(cfg.max_proposal_size, 4);
        assert_eq!(cfg.max_decided_size, 8);
        assert_eq!(cfg.proposals, vec![vec![1, 2], vec![2, 3], vec![3, 4]]);
    }

    #[test]
    fn mode_from_str_round_trips() {
        for m in [Mode::Pl, Mode::Fifo, Mode::Lattice] {
            assert_eq!(m.as_str().parse::<Mode>().unwrap(), m);
        }
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn empty_config_is_rejected() {
        let f = write_tmp("");
        assert!(matches!(parse_fifo(f.path()), Err(ConfigError::Empty { .. })));
    }
}
