//! Overall security score.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analysis::{AnalyzedConnection, RiskLevel, SecurityAnalyzer};

/// Score deductions. Defaults reproduce the dashboard's weighting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Per `Warning` connection
    pub warning: u32,
    /// Per `Danger` connection
    pub threat: u32,
    /// Per connection on a suspicious port
    pub suspicious_port: u32,
    /// Cap on the suspicious port deduction
    pub suspicious_port_cap: u32,
    /// Per failed geolocation
    pub geo_failure: u32,
    /// Cap on the geolocation deduction
    pub geo_failure_cap: u32,
    /// Deducted when under 20% of external connections use secure ports
    pub few_secure: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            warning: 4,
            threat: 10,
            suspicious_port: 3,
            suspicious_port_cap: 20,
            geo_failure: 1,
            geo_failure_cap: 10,
            few_secure: 5,
        }
    }
}

/// Letter grade of a score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    /// 90 and above
    A,
    /// 80 to 89
    B,
    /// 70 to 79
    C,
    /// 60 to 69
    D,
    /// Below 60
    F,
}

impl Grade {
    /// Grade for a 0-100 score.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Grade::A,
            80..=89 => Grade::B,
            70..=79 => Grade::C,
            60..=69 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(letter)
    }
}

/// Result of scoring a set of connections.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SecurityScore {
    /// 0 (worst) to 100 (best)
    pub score: u8,
    /// Letter grade
    pub grade: Grade,
    /// `Warning` connections
    pub warnings: usize,
    /// `Danger` connections
    pub threats: usize,
    /// Connections to secure ports
    pub secure: usize,
    /// External connections to secure ports; drives the encryption ratio
    pub external_secure: usize,
    /// Connections to suspicious ports
    pub suspicious_ports: usize,
    /// Failed geolocations
    pub geo_failures: usize,
    /// Connections scored
    pub total_connections: usize,
    /// Connections with a public remote end
    pub external_connections: usize,
    /// Most frequent countries, descending
    pub top_countries: Vec<(String, usize)>,
    /// Notable patterns
    pub risk_factors: Vec<String>,
    /// Suggested actions
    pub recommendations: Vec<String>,
}

impl SecurityAnalyzer {
    /// Scores analyzed connections.
    ///
    /// Starts at 100 and deducts per warning, per threat, per suspicious port
    /// and per failed geolocation (the last two capped), plus a flat penalty
    /// when few external connections are encrypted. No connections scores 100.
    pub fn score(&self, connections: &[AnalyzedConnection]) -> SecurityScore {
        if connections.is_empty() {
            return SecurityScore {
                score: 100,
                grade: Grade::A,
                warnings: 0,
                threats: 0,
                secure: 0,
                external_secure: 0,
                suspicious_ports: 0,
                geo_failures: 0,
                total_connections: 0,
                external_connections: 0,
                top_countries: Vec::new(),
                risk_factors: Vec::new(),
                recommendations: vec!["No active connections detected".into()],
            };
        }

        let (mut warnings, mut threats, mut secure, mut external_secure) = (0usize, 0usize, 0usize, 0usize);
        let (mut suspicious_ports, mut geo_failures, mut external_connections) = (0usize, 0usize, 0usize);
        for c in connections {
            match c.risk_level {
                RiskLevel::Warning => warnings += 1,
                RiskLevel::Danger => threats += 1,
                RiskLevel::Info => {}
            }
            let port = c.connection.remote_port;
            if self.is_secure_port(port) {
                secure += 1;
                if !c.is_private {
                    external_secure += 1;
                }
            }
            if self.is_suspicious_port(port) {
                suspicious_ports += 1;
            }
            if c.geo_failed() {
                geo_failures += 1;
            }
            if !c.is_private {
                external_connections += 1;
            }
        }

        let w = &self.weights;
        let mut score: i64 = 100;
        score -= warnings as i64 * w.warning as i64;
        score -= threats as i64 * w.threat as i64;
        score -= (suspicious_ports as i64 * w.suspicious_port as i64).min(w.suspicious_port_cap as i64);
        score -= (geo_failures as i64 * w.geo_failure as i64).min(w.geo_failure_cap as i64);
        if external_connections > 0 && (external_secure as f64 / external_connections as f64) < 0.2 {
            score -= w.few_secure as i64;
        }
        let score = score.clamp(0, 100) as u8;

        if threats > 0 {
            warn!(threats, score, "Threats detected in connections");
        }

        let top_countries = top_countries(connections);
        let recommendations = recommendations(
            score,
            threats,
            warnings,
            external_secure,
            suspicious_ports,
            external_connections,
            connections.len(),
            &top_countries,
        );

        SecurityScore {
            score,
            grade: Grade::from_score(score),
            warnings,
            threats,
            secure,
            external_secure,
            suspicious_ports,
            geo_failures,
            total_connections: connections.len(),
            external_connections,
            top_countries,
            risk_factors: risk_factors(connections),
            recommendations,
        }
    }
}

/// Counts by country, most frequent first, ties by name.
fn top_countries(connections: &[AnalyzedConnection]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for country in connections.iter().filter_map(|c| c.country()) {
        *counts.entry(country).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().map(|(c, n)| (c.to_string(), n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(5);
    ranked
}

#[allow(clippy::too_many_arguments)]
fn recommendations(
    score: u8,
    threats: usize,
    warnings: usize,
    external_secure: usize,
    suspicious_ports: usize,
    external: usize,
    total: usize,
    top_countries: &[(String, usize)],
) -> Vec<String> {
    let mut out = Vec::new();

    if threats > 0 {
        out.push(format!(
            "CRITICAL: {} threat(s) detected. Review suspicious connections immediately.",
            threats
        ));
    }
    if warnings > 3 {
        out.push(format!(
            "WARNING: {} connections flagged. Consider reviewing firewall rules.",
            warnings
        ));
    }
    if suspicious_ports > 0 {
        out.push(format!(
            "{} connection(s) using suspicious ports. Verify these are legitimate.",
            suspicious_ports
        ));
    }
    if external > 0 && (external_secure as f64 / external as f64) < 0.3 {
        out.push("Few secure connections detected. Consider using HTTPS/SSL where possible.".into());
    }
    if let Some((country, n)) = top_countries.first() {
        if *n as f64 > total as f64 * 0.5 {
            out.push(format!(
                "Many connections to {}. Verify this is expected behavior.",
                country
            ));
        }
    }

    if out.is_empty() {
        if score >= 90 {
            out.push("Excellent security posture! Keep monitoring regularly.".into());
        } else {
            out.push("No critical issues detected. Continue monitoring.".into());
        }
    }
    out
}

fn risk_factors(connections: &[AnalyzedConnection]) -> Vec<String> {
    let mut out = Vec::new();

    let mut processes: HashMap<&str, usize> = HashMap::new();
    for name in connections.iter().filter_map(|c| c.connection.process.as_deref()) {
        if name != "unknown" {
            *processes.entry(name).or_default() += 1;
        }
    }
    let mut processes: Vec<(&str, usize)> = processes.into_iter().collect();
    processes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    for (name, n) in processes.into_iter().take(3) {
        out.push(format!("{} connections from {}", n, name));
    }

    // Many distinct ports on one external host looks like scanning.
    let mut ports: BTreeMap<String, BTreeSet<u16>> = BTreeMap::new();
    for c in connections.iter().filter(|c| !c.is_private) {
        ports
            .entry(c.connection.remote_ip.to_string())
            .or_default()
            .insert(c.connection.remote_port);
    }
    for (ip, set) in ports {
        if set.len() > 10 {
            out.push(format!("{} connected to {} different ports", ip, set.len()));
        }
    }

    out
}
