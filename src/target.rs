//! Build targets and the static platform table.
//!
//! The set of targets is closed: every `BuildTarget` has exactly one row in
//! [`TARGET_TABLE`], and all naming (distribution platform label, file
//! extension) is looked up there rather than computed. Existing consumers of
//! the distribution store depend on these names, so the table must not drift.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An operating-system/architecture pair the matrix compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BuildTarget {
    Linux386,
    LinuxAmd64,
    WindowsAmd64,
    DarwinAmd64,
    DarwinArm64,
}

/// One row of the static platform table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub target: BuildTarget,
    /// Operating system as understood by the toolchain (`GOOS`)
    pub os: &'static str,
    /// Architecture as understood by the toolchain (`GOARCH`)
    pub arch: &'static str,
    /// Platform label used in distribution keys
    pub platform: &'static str,
    /// File extension appended to the binary name
    pub extension: &'static str,
}

/// Static lookup table, indexed by `BuildTarget as usize`.
pub const TARGET_TABLE: [TargetSpec; 5] = [
    TargetSpec {
        target: BuildTarget::Linux386,
        os: "linux",
        arch: "386",
        platform: "x86",
        extension: "",
    },
    TargetSpec {
        target: BuildTarget::LinuxAmd64,
        os: "linux",
        arch: "amd64",
        platform: "amd64",
        extension: "",
    },
    TargetSpec {
        target: BuildTarget::WindowsAmd64,
        os: "windows",
        arch: "amd64",
        platform: "amd64",
        extension: ".exe",
    },
    TargetSpec {
        target: BuildTarget::DarwinAmd64,
        os: "darwin",
        arch: "amd64",
        platform: "amd64",
        extension: "",
    },
    TargetSpec {
        target: BuildTarget::DarwinArm64,
        os: "darwin",
        arch: "arm64",
        platform: "arm64",
        extension: "",
    },
];

impl BuildTarget {
    /// Every target, in table order.
    pub const ALL: [BuildTarget; 5] = [
        BuildTarget::Linux386,
        BuildTarget::LinuxAmd64,
        BuildTarget::WindowsAmd64,
        BuildTarget::DarwinAmd64,
        BuildTarget::DarwinArm64,
    ];

    /// The target whose artifact is embedded into baked images.
    pub const REFERENCE: BuildTarget = BuildTarget::LinuxAmd64;

    /// Look up this target's row in the platform table.
    pub const fn spec(self) -> &'static TargetSpec {
        &TARGET_TABLE[self as usize]
    }

    pub fn os(self) -> &'static str {
        self.spec().os
    }

    pub fn arch(self) -> &'static str {
        self.spec().arch
    }

    pub fn platform(self) -> &'static str {
        self.spec().platform
    }

    pub fn extension(self) -> &'static str {
        self.spec().extension
    }

    /// Find the target for an (os, arch) pair.
    pub fn from_parts(os: &str, arch: &str) -> Option<Self> {
        TARGET_TABLE
            .iter()
            .find(|row| row.os == os && row.arch == arch)
            .map(|row| row.target)
    }

    /// Binary file name for this target, e.g. `dstack-runner-linux-x86`.
    pub fn file_name(self, name: &str) -> String {
        format!(
            "{}-{}-{}{}",
            name,
            self.os(),
            self.platform(),
            self.extension()
        )
    }

    /// Short identifier used in stage ids and work directories, e.g. `linux-386`.
    pub fn slug(self) -> String {
        format!("{}-{}", self.os(), self.arch())
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os(), self.arch())
    }
}

impl FromStr for BuildTarget {
    type Err = String;

    /// Accepts `os/arch` or `os-arch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (os, arch) = s
            .split_once('/')
            .or_else(|| s.split_once('-'))
            .ok_or_else(|| format!("Invalid target '{}': expected os/arch", s))?;
        Self::from_parts(os, arch).ok_or_else(|| {
            format!(
                "Unknown target '{}'. Valid targets: {}",
                s,
                BuildTarget::ALL
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

impl TryFrom<String> for BuildTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BuildTarget> for String {
    fn from(target: BuildTarget) -> Self {
        target.to_string()
    }
}
