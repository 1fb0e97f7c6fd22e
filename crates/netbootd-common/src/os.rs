use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Operating systems a host can be provisioned with.
///
/// Each kind has its own boot menu template and provisioning script on the
/// server, both named after [`OsKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsKind {
    Debian,
    Openbsd,
    Alpine,
}

impl OsKind {
    pub const ALL: [OsKind; 3] = [OsKind::Debian, OsKind::Openbsd, OsKind::Alpine];

    pub fn as_str(&self) -> &'static str {
        match self {
            OsKind::Debian => "debian",
            OsKind::Openbsd => "openbsd",
            OsKind::Alpine => "alpine",
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debian" => Ok(OsKind::Debian),
            "openbsd" => Ok(OsKind::Openbsd),
            "alpine" => Ok(OsKind::Alpine),
            other => Err(Error::UnrecognizedOs(other.to_string())),
        }
    }
}
