//! Chain Resolution
//!
//! Extracts discovered domains from one phase's tool output and turns them
//! into variables for the next phase's `{{chain.<name>}}` placeholders.
//!
//! Substitution here is textual only. Discovered values come from scanned
//! hosts and must still pass the sanitizer's per-value validation before
//! they reach an argv array.

use crate::result::ExecutionResult;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use tracing::{debug, info};

/// Number of domains exposed individually as `domain_1..domain_N`
pub const MAX_INDEXED_DOMAINS: usize = 10;

/// Placeholder recorded as the IP when the target could not be resolved
pub const UNRESOLVED_IP: &str = "unresolved";

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid regex");
    static ref FOUND_LINE: Regex = Regex::new(
        r"(?m)Found:\s+([A-Za-z0-9][A-Za-z0-9.-]*)\s+\(?Status:\s*(\d{3})\)?\s*\[Size:\s*(\d+)\]"
    )
    .expect("valid regex");
    static ref HOST_BLOCK: Regex = Regex::new(
        r"(?m)^\s*Host:\s*([A-Za-z0-9][A-Za-z0-9.-]*)\s*\r?\n\s*Status:\s*(\d{3})\s*\r?\n\s*Size:\s*(\d+)"
    )
    .expect("valid regex");
}

/// Output layouts the resolver knows how to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `Found: <domain> (Status: <code>) [Size: <n>]`, one per line
    FoundLine,
    /// `Host:` / `Status:` / `Size:` on consecutive lines
    HostBlock,
}

impl OutputFormat {
    /// Format produced by a tool, if known
    pub fn for_tool(tool: &str) -> Option<Self> {
        let name = tool.rsplit('/').next().unwrap_or(tool).to_ascii_lowercase();
        match name.as_str() {
            "gobuster" => Some(Self::FoundLine),
            "ffuf" | "wfuzz" => Some(Self::HostBlock),
            _ => None,
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            Self::FoundLine => &*FOUND_LINE,
            Self::HostBlock => &*HOST_BLOCK,
        }
    }
}

/// A host discovered by a previous phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDomain {
    pub domain: String,
    pub ip: String,
    pub status_code: u16,
    pub size: u64,
}

impl DiscoveredDomain {
    fn is_success(&self) -> bool {
        self.status_code == 200
    }

    fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302)
    }
}

/// Value of a chain variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainValue {
    Text(String),
    Number(u64),
    List(Vec<String>),
}

impl fmt::Display for ChainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{}", n),
            Self::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// Variables derived from the current set of discovered domains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainVariables {
    values: BTreeMap<String, ChainValue>,
}

impl ChainVariables {
    /// Create an empty variable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value
    pub fn insert(&mut self, name: &str, value: ChainValue) {
        self.values.insert(name.to_string(), value);
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&ChainValue> {
        self.values.get(name)
    }

    /// Iterate variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChainValue)> {
        self.values.iter()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// An empty set means "no substitution performed"
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolve the target's IP address
///
/// Strips scheme, credentials, port and path. IP literals are returned
/// unchanged; anything else goes through a blocking DNS lookup. Returns
/// `None` when the host cannot be resolved.
pub fn resolve_target_ip(target: &str) -> Option<IpAddr> {
    let host = extract_host(target)?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }

    match (host.as_str(), 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
        Err(e) => {
            debug!("DNS resolution failed for target host: {}", e);
            None
        }
    }
}

fn extract_host(target: &str) -> Option<String> {
    let without_scheme = target.split_once("://").map_or(target, |(_, rest)| rest);
    let authority = without_scheme.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split_once(']').map(|(inner, _)| inner)?
    } else if authority.matches(':').count() == 1 {
        authority.split_once(':').map(|(host, _)| host)?
    } else {
        authority
    };

    let host = host.trim();
    (!host.is_empty()).then(|| host.to_string())
}

/// Parse discovered domains out of prior results
///
/// Only results from tools with a known [`OutputFormat`] are parsed.
/// Duplicates by `(domain, ip)` are dropped; first-seen order is kept.
pub fn extract_discovered_domains(
    results: &[ExecutionResult],
    target_ip: Option<IpAddr>,
) -> Vec<DiscoveredDomain> {
    let ip = target_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNRESOLVED_IP.to_string());

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut domains = Vec::new();

    for result in results {
        let Some(format) = OutputFormat::for_tool(&result.tool) else {
            continue;
        };
        let output = ANSI_ESCAPE.replace_all(&result.stdout, "");

        for captures in format.pattern().captures_iter(&output) {
            let domain = captures[1].trim_end_matches('.').to_ascii_lowercase();
            let (Ok(status_code), Ok(size)) = (captures[2].parse::<u16>(), captures[3].parse::<u64>())
            else {
                continue;
            };

            if seen.insert((domain.clone(), ip.clone())) {
                domains.push(DiscoveredDomain {
                    domain,
                    ip: ip.clone(),
                    status_code,
                    size,
                });
            }
        }
    }

    if !domains.is_empty() {
        info!("Discovered {} domains from previous phase", domains.len());
    }
    domains
}

/// Derive chain variables from discovered domains
///
/// Returns an empty set when there are no domains.
pub fn generate_chain_variables(domains: &[DiscoveredDomain]) -> ChainVariables {
    let mut vars = ChainVariables::new();
    if domains.is_empty() {
        return vars;
    }

    let all: Vec<String> = domains.iter().map(|d| d.domain.clone()).collect();
    let success: Vec<String> = domains
        .iter()
        .filter(|d| d.is_success())
        .map(|d| d.domain.clone())
        .collect();
    let redirect: Vec<String> = domains
        .iter()
        .filter(|d| d.is_redirect())
        .map(|d| d.domain.clone())
        .collect();

    let primary = success.first().unwrap_or(&all[0]).clone();

    vars.insert("domain_count", ChainValue::Number(all.len() as u64));
    vars.insert("success_count", ChainValue::Number(success.len() as u64));
    vars.insert("redirect_count", ChainValue::Number(redirect.len() as u64));

    for (index, domain) in all.iter().take(MAX_INDEXED_DOMAINS).enumerate() {
        vars.insert(&format!("domain_{}", index + 1), ChainValue::Text(domain.clone()));
    }

    vars.insert("primary_domain", ChainValue::Text(primary));
    vars.insert("domains_comma", ChainValue::Text(all.join(",")));
    vars.insert("domains_space", ChainValue::Text(all.join(" ")));
    vars.insert("domains_newline", ChainValue::Text(all.join("\n")));

    vars.insert("discovered_domains", ChainValue::List(all));
    vars.insert("success_domains", ChainValue::List(success));
    vars.insert("redirect_domains", ChainValue::List(redirect));

    vars
}

/// Replace every `{{chain.<name>}}` in `args` with the variable's value
///
/// Arguments without a matching placeholder pass through unchanged.
pub fn resolve_variables(args: &[String], chain_variables: &ChainVariables) -> Vec<String> {
    if chain_variables.is_empty() {
        return args.to_vec();
    }

    args.iter()
        .map(|arg| {
            if !arg.contains("{{chain.") {
                return arg.clone();
            }
            chain_variables
                .iter()
                .fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{{chain.{}}}}}", name), &value.to_string())
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_for(tool: &str, stdout: &str) -> ExecutionResult {
        ExecutionResult::exited("phase1", tool, "example.com", 0, stdout.to_string(), String::new(), 1.0)
    }

    fn domain(name: &str, status: u16) -> DiscoveredDomain {
        DiscoveredDomain {
            domain: name.to_string(),
            ip: "10.0.0.1".to_string(),
            status_code: status,
            size: 100,
        }
    }

    #[test]
    fn test_found_line_round_trip() {
        let results = vec![result_for(
            "gobuster",
            "Found: api.example.com (Status: 200) [Size: 512]\n",
        )];
        let domains = extract_discovered_domains(&results, None);

        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].domain, "api.example.com");
        assert_eq!(domains[0].status_code, 200);
        assert_eq!(domains[0].size, 512);
        assert_eq!(domains[0].ip, UNRESOLVED_IP);

        let vars = generate_chain_variables(&domains);
        assert_eq!(
            vars.get("primary_domain"),
            Some(&ChainValue::Text("api.example.com".to_string()))
        );
        assert_eq!(vars.get("domain_count"), Some(&ChainValue::Number(1)));
    }

    #[test]
    fn test_found_line_variants_and_ansi() {
        let stdout = "\x1b[2KFound: dev.example.com Status: 301 [Size: 0]\n\
                      noise line\n\
                      Found: www.example.com (Status: 200) [Size: 1024]\n";
        let domains = extract_discovered_domains(&[result_for("/usr/bin/gobuster", stdout)], None);
        let names: Vec<&str> = domains.iter().map(|d| d.domain.as_str()).collect();
        assert_eq!(names, vec!["dev.example.com", "www.example.com"]);
    }

    #[test]
    fn test_host_block_format() {
        let stdout = "Host: a.example.com\nStatus: 302\nSize: 10\n\nHost: b.example.com\nStatus: 200\nSize: 20\n";
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let domains = extract_discovered_domains(&[result_for("ffuf", stdout)], Some(ip));

        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].status_code, 302);
        assert_eq!(domains[1].ip, "10.0.0.5");
    }

    #[test]
    fn test_unknown_tools_ignored_and_dedup() {
        let results = vec![
            result_for("nmap", "Found: x.example.com (Status: 200) [Size: 1]"),
            result_for("gobuster", "Found: y.example.com (Status: 200) [Size: 1]"),
            result_for("gobuster", "Found: Y.example.com (Status: 404) [Size: 9]"),
        ];
        let domains = extract_discovered_domains(&results, None);
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].domain, "y.example.com");
        assert_eq!(domains[0].status_code, 200);
    }

    #[test]
    fn test_injection_payload_not_captured() {
        let stdout = "Found: evil.com;id (Status: 200) [Size: 1]\nFound: $(reboot) (Status: 200) [Size: 1]\n";
        let domains = extract_discovered_domains(&[result_for("gobuster", stdout)], None);
        assert!(domains.is_empty());
    }

    #[test]
    fn test_generate_chain_variables() {
        let domains = vec![
            domain("r.example.com", 301),
            domain("a.example.com", 200),
            domain("b.example.com", 404),
        ];
        let vars = generate_chain_variables(&domains);

        assert_eq!(vars.get("primary_domain").unwrap().to_string(), "a.example.com");
        assert_eq!(vars.get("domain_count"), Some(&ChainValue::Number(3)));
        assert_eq!(vars.get("success_count"), Some(&ChainValue::Number(1)));
        assert_eq!(vars.get("redirect_count"), Some(&ChainValue::Number(1)));
        assert_eq!(vars.get("domain_1").unwrap().to_string(), "r.example.com");
        assert_eq!(vars.get("domain_3").unwrap().to_string(), "b.example.com");
        assert!(vars.get("domain_4").is_none());
        assert_eq!(
            vars.get("domains_comma").unwrap().to_string(),
            "r.example.com,a.example.com,b.example.com"
        );
        assert_eq!(
            vars.get("redirect_domains"),
            Some(&ChainValue::List(vec!["r.example.com".to_string()]))
        );
    }

    #[test]
    fn test_primary_domain_falls_back_to_first() {
        let vars = generate_chain_variables(&[domain("z.example.com", 403)]);
        assert_eq!(vars.get("primary_domain").unwrap().to_string(), "z.example.com");
    }

    #[test]
    fn test_indexed_domains_capped() {
        let domains: Vec<DiscoveredDomain> =
            (0..15).map(|i| domain(&format!("h{}.example.com", i), 200)).collect();
        let vars = generate_chain_variables(&domains);
        assert!(vars.get("domain_10").is_some());
        assert!(vars.get("domain_11").is_none());
        assert_eq!(vars.get("domain_count"), Some(&ChainValue::Number(15)));
    }

    #[test]
    fn test_empty_domains_yield_empty_variables() {
        assert!(generate_chain_variables(&[]).is_empty());
    }

    #[test]
    fn test_resolve_variables() {
        let mut vars = ChainVariables::new();
        vars.insert("primary_domain", ChainValue::Text("api.example.com".to_string()));
        vars.insert("domain_count", ChainValue::Number(2));

        let args = vec![
            "-u".to_string(),
            "https://{{chain.primary_domain}}/FUZZ".to_string(),
            "{{chain.domain_count}}".to_string(),
            "{{chain.unknown}}".to_string(),
        ];
        let resolved = resolve_variables(&args, &vars);
        assert_eq!(
            resolved,
            vec!["-u", "https://api.example.com/FUZZ", "2", "{{chain.unknown}}"]
        );

        assert_eq!(resolve_variables(&args, &ChainVariables::new()), args);
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://user@example.com:8443/path").as_deref(), Some("example.com"));
        assert_eq!(extract_host("example.com:80").as_deref(), Some("example.com"));
        assert_eq!(extract_host("http://[::1]:8080/").as_deref(), Some("::1"));
        assert_eq!(extract_host("::1").as_deref(), Some("::1"));
        assert_eq!(extract_host("").as_deref(), None);
    }

    #[test]
    fn test_resolve_target_ip_literal() {
        assert_eq!(
            resolve_target_ip("http://192.168.1.10:8080/x"),
            Some("192.168.1.10".parse().unwrap())
        );
        assert_eq!(resolve_target_ip("localhost").map(|ip| ip.is_loopback()), Some(true));
        assert_eq!(resolve_target_ip("host.invalid"), None);
    }
}
