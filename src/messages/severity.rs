//! # Severity classes and the routing rule.
//!
//! [`Severity`] is both the tag carried by every [`Message`](crate::Message) and the
//! key of a distribution class. Six classes are concrete; [`Severity::All`] is a
//! synthetic catch-all that no message is ever created with.
//!
//! ## Routing
//! ```text
//! severity ──► own class ──► All ──► Alert (only if severity < Warning)
//!
//! Debug    ──► [Debug]    [All] [Alert]
//! Info     ──► [Info]     [All] [Alert]
//! Warning  ──► [Warning]  [All]
//! Error    ──► [Error]    [All]
//! Critical ──► [Critical] [All]
//! Alert    ──► [Alert]    [All]
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Ordered severity class.
///
/// Ordering is numeric: `Debug < Info < Warning < Error < Critical < Alert < All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
    Alert = 5,
    /// Catch-all class; never a message's own severity.
    All = 6,
}

impl Severity {
    /// Every distribution class, in numeric order.
    pub const CLASSES: [Severity; 7] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
        Severity::Alert,
        Severity::All,
    ];

    /// Severities a message may be posted with.
    pub const CONCRETE: [Severity; 6] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
        Severity::Alert,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Alert => "alert",
            Severity::All => "all",
        }
    }

    /// Position in [`Severity::CLASSES`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// True for every severity a message can carry (everything below `All`).
    #[inline]
    pub fn is_concrete(self) -> bool {
        self < Severity::All
    }

    /// True if messages of this severity are also surfaced on the `Alert` class.
    ///
    /// The boundary is strict: `Debug` and `Info` raise alerts, `Warning` does not.
    #[inline]
    pub fn raises_alert(self) -> bool {
        self < Severity::Warning
    }

    /// Classes a message of this severity is routed to, in routing order.
    ///
    /// # Example
    /// ```
    /// use alertbus::Severity;
    ///
    /// assert_eq!(
    ///     Severity::Info.routes(),
    ///     vec![Severity::Info, Severity::All, Severity::Alert]
    /// );
    /// assert_eq!(Severity::Warning.routes(), vec![Severity::Warning, Severity::All]);
    /// ```
    pub fn routes(self) -> Vec<Severity> {
        let mut classes = Vec::with_capacity(3);
        classes.push(self);
        classes.push(Severity::All);
        if self.raises_alert() {
            classes.push(Severity::Alert);
        }
        classes
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::CLASSES
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BusError::validation(format!("unknown severity '{s}'")))
    }
}
