//! Exit codes for the hostlog CLI.
//!
//! | code | name           | meaning                                        |
//! |------|----------------|------------------------------------------------|
//! | 0    | `OK_CLEAN`     | finished, nothing left over                    |
//! | 3    | `ERR_PARTIAL`  | some day, kind or delivery cycle failed        |
//! | 10   | `ERR_ARGS`     | bad command line                               |
//! | 11   | `ERR_CONFIG`   | configuration missing, malformed or invalid    |
//! | 20   | `ERR_INTERNAL` | bug or unexpected runtime failure              |
//! | 21   | `ERR_IO`       | storage or artifact could not be read/written  |

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Clean,
    PartialFail,
    ArgsError,
    ConfigError,
    InternalError,
    IoError,
}

impl ExitCode {
    const TABLE: [(ExitCode, i32, &'static str); 6] = [
        (ExitCode::Clean, 0, "OK_CLEAN"),
        (ExitCode::PartialFail, 3, "ERR_PARTIAL"),
        (ExitCode::ArgsError, 10, "ERR_ARGS"),
        (ExitCode::ConfigError, 11, "ERR_CONFIG"),
        (ExitCode::InternalError, 20, "ERR_INTERNAL"),
        (ExitCode::IoError, 21, "ERR_IO"),
    ];

    fn entry(self) -> (i32, &'static str) {
        Self::TABLE
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, value, name)| (*value, *name))
            .unwrap_or((20, "ERR_INTERNAL"))
    }

    pub fn as_i32(self) -> i32 {
        self.entry().0
    }

    /// Stable name for logs and JSON output.
    pub fn name(self) -> &'static str {
        self.entry().1
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}
