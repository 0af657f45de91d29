//! The set of OS resource limits a sandboxed child may be constrained by,
//! and their restrictive-by-default values.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::LaunchError;
use crate::error::Result;

const KB: i64 = 1024;
const MB: i64 = 1024 * 1024;

/// A well-known OS resource limit name. Closed set, matching the limits the
/// original sandbox configured -- unlike the source's "any RLIMIT_* constant
/// by string lookup" this is a fixed enum so an unknown name is a
/// compile-time-checked parse error rather than a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RlimitName {
    /// RLIMIT_AS -- total address space.
    AddressSpace,
    /// RLIMIT_CPU -- CPU time, in seconds.
    Cpu,
    /// RLIMIT_FSIZE -- maximum file size.
    FileSize,
    /// RLIMIT_NOFILE -- maximum number of open file descriptors.
    OpenFiles,
    /// RLIMIT_STACK -- maximum stack size.
    Stack,
    /// RLIMIT_RSS -- maximum resident set size.
    ResidentSet,
    /// RLIMIT_CORE -- maximum core dump size.
    Core,
    /// RLIMIT_DATA -- maximum data segment size.
    Data,
    /// RLIMIT_MEMLOCK -- maximum locked-in-memory size.
    MemoryLock,
}

impl RlimitName {
    /// Parses a config-facing name (e.g. from a TOML table key) into a
    /// `RlimitName`, accepting both the snake_case variant name and the
    /// bare libc constant name for operator familiarity.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = match raw.to_ascii_lowercase().as_str() {
            "address_space" | "as" | "rlimit_as" => RlimitName::AddressSpace,
            "cpu" | "rlimit_cpu" => RlimitName::Cpu,
            "file_size" | "fsize" | "rlimit_fsize" => RlimitName::FileSize,
            "open_files" | "nofile" | "rlimit_nofile" => RlimitName::OpenFiles,
            "stack" | "rlimit_stack" => RlimitName::Stack,
            "resident_set" | "rss" | "rlimit_rss" => RlimitName::ResidentSet,
            "core" | "rlimit_core" => RlimitName::Core,
            "data" | "rlimit_data" => RlimitName::Data,
            "memory_lock" | "memlock" | "rlimit_memlock" => RlimitName::MemoryLock,
            other => return Err(LaunchError::UnknownLimit(other.to_string())),
        };
        Ok(name)
    }

    #[cfg(unix)]
    pub(crate) fn to_libc_resource(self) -> libc::c_int {
        match self {
            RlimitName::AddressSpace => libc::RLIMIT_AS,
            RlimitName::Cpu => libc::RLIMIT_CPU,
            RlimitName::FileSize => libc::RLIMIT_FSIZE,
            RlimitName::OpenFiles => libc::RLIMIT_NOFILE,
            RlimitName::Stack => libc::RLIMIT_STACK,
            #[cfg(target_os = "linux")]
            RlimitName::ResidentSet => libc::RLIMIT_RSS,
            #[cfg(not(target_os = "linux"))]
            RlimitName::ResidentSet => libc::RLIMIT_AS,
            RlimitName::Core => libc::RLIMIT_CORE,
            RlimitName::Data => libc::RLIMIT_DATA,
            RlimitName::MemoryLock => libc::RLIMIT_MEMLOCK,
        }
    }
}

/// A (soft, hard) limit pair, in bytes/seconds/count depending on the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlimitPair {
    pub soft: i64,
    pub hard: i64,
}

impl RlimitPair {
    pub fn fixed(value: i64) -> Self {
        Self {
            soft: value,
            hard: value,
        }
    }
}

/// The full set of limits to apply to a single spawned child.
pub type Rlimits = HashMap<RlimitName, RlimitPair>;

/// The restrictive defaults every sandbox run starts from, in the absence
/// of operator overrides.
pub fn default_rlimits() -> Rlimits {
    HashMap::from([
        (RlimitName::Core, RlimitPair::fixed(1 * MB)),
        (RlimitName::Cpu, RlimitPair::fixed(60)),
        (RlimitName::FileSize, RlimitPair::fixed(1 * MB)),
        (RlimitName::Data, RlimitPair::fixed(32 * MB)),
        (RlimitName::Stack, RlimitPair::fixed(1 * MB)),
        (RlimitName::ResidentSet, RlimitPair::fixed(10 * MB)),
        (RlimitName::OpenFiles, RlimitPair::fixed(15)),
        (RlimitName::MemoryLock, RlimitPair::fixed(64 * KB)),
        (RlimitName::AddressSpace, RlimitPair::fixed(196 * MB)),
    ])
}

/// Merges `overrides` (typically parsed from config) on top of
/// [`default_rlimits`], returning a parse error for any unknown limit name.
pub fn merge_overrides(overrides: &HashMap<String, RlimitPair>) -> Result<Rlimits> {
    let mut rlimits = default_rlimits();
    for (raw_name, pair) in overrides {
        let name = RlimitName::parse(raw_name)?;
        rlimits.insert(name, *pair);
    }
    Ok(rlimits)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_cover_every_known_limit() {
        let rlimits = default_rlimits();
        assert_eq!(rlimits.len(), 9);
        assert_eq!(rlimits[&RlimitName::Cpu], RlimitPair::fixed(60));
        assert_eq!(
            rlimits[&RlimitName::AddressSpace],
            RlimitPair::fixed(196 * MB)
        );
    }

    #[test]
    fn parse_accepts_libc_style_and_snake_case_names() {
        assert_eq!(RlimitName::parse("cpu").unwrap(), RlimitName::Cpu);
        assert_eq!(RlimitName::parse("RLIMIT_CPU").unwrap(), RlimitName::Cpu);
        assert_eq!(
            RlimitName::parse("address_space").unwrap(),
            RlimitName::AddressSpace
        );
        assert_eq!(RlimitName::parse("as").unwrap(), RlimitName::AddressSpace);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        let err = RlimitName::parse("rlimit_nonsense").unwrap_err();
        assert!(matches!(err, LaunchError::UnknownLimit(_)));
    }

    #[test]
    fn merge_overrides_replaces_only_named_limits() {
        let overrides = HashMap::from([("cpu".to_string(), RlimitPair::fixed(5))]);
        let merged = merge_overrides(&overrides).unwrap();
        assert_eq!(merged[&RlimitName::Cpu], RlimitPair::fixed(5));
        assert_eq!(merged[&RlimitName::Stack], RlimitPair::fixed(1 * MB));
    }

    #[test]
    fn merge_overrides_rejects_unknown_limit_name() {
        let overrides = HashMap::from([("nonsense".to_string(), RlimitPair::fixed(1))]);
        assert!(merge_overrides(&overrides).is_err());
    }
}
