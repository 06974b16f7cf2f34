//! Strace related code

use std::fmt;
use std::io::BufRead as _;
use std::process::Command;

mod parser;
mod run;

pub(crate) use parser::RecordParser;
pub(crate) use run::Strace;

const STRACE_BIN: &str = "strace";

/// A single decoded syscall argument or return value
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) enum TraceValue {
    Null,
    Integer(i64),
    Text {
        decoded: Vec<u8>,
        /// Strace elided the tail of the string ('"...')
        truncated: bool,
    },
    Descriptor(Descriptor),
    DescriptorList(Vec<Descriptor>),
    /// Anything no decoder recognized, kept verbatim
    Raw(String),
}

/// File descriptor, with what strace knows of the object behind it
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) struct Descriptor {
    pub fd: i32,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) enum Endpoint {
    Tcp {
        local: SocketAddress,
        remote: SocketAddress,
    },
    Unix {
        local_inode: u64,
        peer_inode: u64,
    },
    Unknown,
}

/// IPv4 address (as printed, not validated) and port
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) struct SocketAddress {
    pub ip: String,
    pub port: u16,
}

impl SocketAddress {
    pub(crate) fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_owned(),
            port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub(crate) enum InstructionPointer {
    Address(u64),
    /// Strace printed '?' placeholders instead of an address
    Unresolved,
}

/// Fields shared by all record kinds
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct Header {
    /// Absolute timestamp in seconds
    pub timestamp: f64,
    pub instruction_pointer: InstructionPointer,
    /// Source line, without terminator
    pub raw: String,
}

impl Header {
    /// Timestamp and bracketed address, exactly as strace printed them
    pub(crate) fn text(&self) -> &str {
        self.raw
            .find(']')
            .and_then(|end| self.raw.get(..=end))
            .unwrap_or(&self.raw)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// One parsed strace output line
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) enum TraceRecord {
    Syscall {
        header: Header,
        name: String,
        arguments: Vec<TraceValue>,
        result: TraceValue,
    },
    Exit {
        header: Header,
        /// Exit status or killing signal description, as printed
        message: String,
    },
}

impl TraceRecord {
    pub(crate) fn header(&self) -> &Header {
        match self {
            Self::Syscall { header, .. } | Self::Exit { header, .. } => header,
        }
    }
}

#[derive(Ord, PartialOrd, Eq, PartialEq)]
pub(crate) struct StraceVersion {
    pub major: u16,
    pub minor: u16,
}

impl StraceVersion {
    pub(crate) fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub(crate) fn local_system() -> anyhow::Result<Self> {
        let output = Command::new(STRACE_BIN).arg("--version").output()?;
        if !output.status.success() {
            anyhow::bail!("strace invocation failed with code {:?}", output.status);
        }
        let version_line = output
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Unable to get strace version"))??;
        Self::from_version_line(&version_line)
    }

    /// Parse the first line of `strace --version` output
    fn from_version_line(line: &str) -> anyhow::Result<Self> {
        let (major, minor) = line
            .rsplit_once(' ')
            .ok_or_else(|| anyhow::anyhow!("Unable to get strace version"))?
            .1
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("Unable to get strace version"))?;
        // Some distributions append a patch level ('6.1.0')
        let minor = minor.split('.').next().unwrap_or(minor);
        Ok(Self {
            major: major.parse()?,
            minor: minor.parse()?,
        })
    }
}

impl fmt::Display for StraceVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
