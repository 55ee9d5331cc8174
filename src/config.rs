//! Replica configuration: the handful of facts every replica must agree on
//! before it can talk to its peers, loadable from TOML or built directly
//! for tests and in-process demos.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub replica_id: u32,
    pub n: u32,
    pub peer_addresses: Vec<String>,
    pub primary_id: u32,
    #[serde(with = "humantime_range")]
    pub anti_entropy_interval: Range<Duration>,
    #[serde(with = "humantime_serde")]
    pub rpc_timeout: Duration,
    pub persist_path: PathBuf,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(Error::Io)?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_id >= self.n {
            return Err(Error::InvalidConfig(format!(
                "replica_id {} out of range for n={}",
                self.replica_id, self.n
            )));
        }
        if self.primary_id >= self.n {
            return Err(Error::InvalidConfig(format!(
                "primary_id {} out of range for n={}",
                self.primary_id, self.n
            )));
        }
        if self.peer_addresses.len() != self.n as usize {
            return Err(Error::InvalidConfig(format!(
                "peer_addresses has {} entries, expected n={}",
                self.peer_addresses.len(),
                self.n
            )));
        }
        if self.anti_entropy_interval.start >= self.anti_entropy_interval.end {
            return Err(Error::InvalidConfig(
                "anti_entropy_interval must be non-empty".into(),
            ));
        }
        Ok(())
    }

    pub fn is_primary(&self) -> bool {
        self.replica_id == self.primary_id
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod humantime_range {
    use super::humantime_serde;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::ops::Range;
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct RangeRepr {
        #[serde(with = "humantime_serde")]
        min: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    }

    pub fn serialize<S: Serializer>(r: &Range<Duration>, s: S) -> std::result::Result<S::Ok, S::Error> {
        RangeRepr {
            min: r.start,
            max: r.end,
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Range<Duration>, D::Error> {
        let repr = RangeRepr::deserialize(d)?;
        Ok(repr.min..repr.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            replica_id: 0,
            n: 3,
            peer_addresses: vec!["a".into(), "b".into(), "c".into()],
            primary_id: 0,
            anti_entropy_interval: Duration::from_millis(100)..Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(5),
            persist_path: PathBuf::from("/tmp/bayou"),
        }
    }

    #[test]
    fn valid_config_passes() {
        valid().validate().unwrap();
    }

    #[test]
    fn replica_id_out_of_range_is_rejected() {
        let mut c = valid();
        c.replica_id = 5;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn mismatched_peer_count_is_rejected() {
        let mut c = valid();
        c.peer_addresses.pop();
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn empty_anti_entropy_interval_is_rejected() {
        let mut c = valid();
        c.anti_entropy_interval = Duration::from_millis(500)..Duration::from_millis(500);
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn is_primary_matches_replica_and_primary_id() {
        let mut c = valid();
        assert!(c.is_primary());
        c.replica_id = 1;
        assert!(!c.is_primary());
    }

    #[test]
    fn round_trips_through_toml() {
        let c = valid();
        let text = toml::to_string(&c).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        back.validate().unwrap();
        assert_eq!(back.n, c.n);
        assert_eq!(back.anti_entropy_interval, c.anti_entropy_interval);
    }
}
