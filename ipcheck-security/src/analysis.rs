//! Per-connection risk classification.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ipcheck_core::types::{is_private_ip, LookupRecord, LookupStatus};

use crate::score::ScoreWeights;

/// Remote ports commonly used by malware, backdoors or exposed services.
pub const SUSPICIOUS_PORTS: [u16; 9] = [23, 69, 1337, 4444, 5555, 6667, 8081, 1433, 3389];

/// Remote ports of encrypted protocols (SSH, HTTPS, IMAPS, POP3S, SIPS).
pub const SECURE_PORTS: [u16; 5] = [22, 443, 993, 995, 5061];

/// TCP states that are part of a normal connection lifecycle.
const NORMAL_STATES: [&str; 3] = ["ESTABLISHED", "TIME_WAIT", "CLOSE_WAIT"];

/// A network connection to assess.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Local endpoint (`ip:port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<String>,
    /// Remote address
    pub remote_ip: IpAddr,
    /// Remote port
    pub remote_port: u16,
    /// Socket state as reported by the OS (`ESTABLISHED`, `SYN_SENT`, ...)
    pub status: String,
    /// `TCP` or `UDP`
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Owning process id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Owning process name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
}

fn default_protocol() -> String {
    "TCP".into()
}

impl Connection {
    /// Returns `ip:port` of the remote end.
    pub fn remote_addr(&self) -> String {
        match self.remote_ip {
            IpAddr::V4(ip) => format!("{}:{}", ip, self.remote_port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.remote_port),
        }
    }
}

/// Risk of a single connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Nothing notable.
    Info,
    /// Unusual, worth a look.
    Warning,
    /// Likely malicious.
    Danger,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Info => "info",
            RiskLevel::Warning => "warning",
            RiskLevel::Danger => "danger",
        })
    }
}

/// A connection with its assessment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalyzedConnection {
    /// The connection
    #[serde(flatten)]
    pub connection: Connection,
    /// Overall risk
    pub risk_level: RiskLevel,
    /// Human readable findings
    pub risks: Vec<String>,
    /// Geolocation of the remote end, if looked up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<LookupRecord>,
    /// Remote end is private, loopback or link-local
    pub is_private: bool,
}

impl AnalyzedConnection {
    /// Returns true if a geolocation lookup was made and did not succeed.
    pub fn geo_failed(&self) -> bool {
        self.geo
            .as_ref()
            .map(|g| g.status != LookupStatus::Success)
            .unwrap_or(false)
    }

    /// Returns the geolocated country, if any.
    pub fn country(&self) -> Option<&str> {
        self.geo.as_ref().and_then(|g| g.field_str("country"))
    }
}

/// Classifies connections and scores them.
#[derive(Clone, Debug)]
pub struct SecurityAnalyzer {
    /// Ports that mark a connection as dangerous
    pub suspicious_ports: BTreeSet<u16>,
    /// Ports counted as encrypted
    pub secure_ports: BTreeSet<u16>,
    /// Score deductions
    pub weights: ScoreWeights,
}

impl Default for SecurityAnalyzer {
    fn default() -> Self {
        Self {
            suspicious_ports: SUSPICIOUS_PORTS.into_iter().collect(),
            secure_ports: SECURE_PORTS.into_iter().collect(),
            weights: ScoreWeights::default(),
        }
    }
}

impl SecurityAnalyzer {
    /// Assesses one connection.
    ///
    /// Private remotes are always `Info`. A suspicious port is `Danger`
    /// whatever the socket state. Otherwise an unusual state is a `Warning`;
    /// a failed geolocation is recorded but does not raise the level.
    pub fn analyze(&self, connection: Connection, geo: Option<LookupRecord>) -> AnalyzedConnection {
        let is_private = is_private_ip(connection.remote_ip);
        let (risk_level, risks) = if is_private {
            (RiskLevel::Info, Vec::new())
        } else {
            self.classify(&connection, geo.as_ref())
        };

        if risk_level == RiskLevel::Danger {
            debug!(remote = %connection.remote_addr(), "dangerous connection");
        }

        AnalyzedConnection {
            connection,
            risk_level,
            risks,
            geo,
            is_private,
        }
    }

    fn classify(&self, connection: &Connection, geo: Option<&LookupRecord>) -> (RiskLevel, Vec<String>) {
        if self.suspicious_ports.contains(&connection.remote_port) {
            return (
                RiskLevel::Danger,
                vec![format!("Port {} is commonly used by malware", connection.remote_port)],
            );
        }

        let mut level = RiskLevel::Info;
        let mut risks = Vec::new();

        let state = connection.status.to_ascii_uppercase();
        if !NORMAL_STATES.contains(&state.as_str()) {
            risks.push(format!("Unusual state: {}", connection.status));
            level = RiskLevel::Warning;
        }

        if geo.map(|g| g.status != LookupStatus::Success).unwrap_or(false) {
            risks.push("Geolocation lookup failed".to_string());
        }

        (level, risks)
    }

    /// Returns true if `port` is a secure port.
    pub fn is_secure_port(&self, port: u16) -> bool {
        self.secure_ports.contains(&port)
    }

    /// Returns true if `port` is a suspicious port.
    pub fn is_suspicious_port(&self, port: u16) -> bool {
        self.suspicious_ports.contains(&port)
    }
}
