// ---------------------------------------------------------------------------
// Scan document -> findings
// ---------------------------------------------------------------------------
//
// Normalizes a scan document (RustMap JSON or nmap XML) into one finding per
// (host, port, CVE). Only open TCP ports count. Ports with scoring tables
// contribute every CVE at or above the CVSS threshold; other ports
// contribute the first CVE mentioned in script output.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;

use exploitmap_types::{PortEntry, ScanDocument, ScanFinding};
use regex::Regex;
use tracing::{debug, warn};

use crate::nmap::{looks_like_xml, parse_nmap_xml};

/// Minimum CVSS score for a scored vulnerability entry to become a finding.
pub const CVSS_THRESHOLD: f64 = 7.5;

static CVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").expect("CVE pattern compiles"));

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read scan document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scan document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed XML scan document: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("XML document is not an nmap report (root element <{0}>)")]
    NotNmap(String),
    #[error("invalid host address '{0}'")]
    InvalidAddress(String),
    #[error("invalid port id '{0}'")]
    InvalidPortId(String),
    #[error("host {host} lists port 0")]
    InvalidPort { host: IpAddr },
}

/// Whether `s` is exactly a CVE identifier.
pub fn is_cve_id(s: &str) -> bool {
    CVE_PATTERN
        .find(s.trim())
        .is_some_and(|m| m.start() == 0 && m.end() == s.trim().len())
}

/// First CVE identifier mentioned in `text`, upper-cased.
pub fn extract_cve(text: &str) -> Option<String> {
    CVE_PATTERN
        .find(text)
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Parse a scan document, nmap XML when it starts with `<` and JSON
/// otherwise. Either every finding is returned or the whole document is
/// rejected.
pub fn parse_findings(document: &str) -> Result<Vec<ScanFinding>, ParseError> {
    let doc: ScanDocument = if looks_like_xml(document) {
        parse_nmap_xml(document)?
    } else {
        serde_json::from_str(document)?
    };
    findings_from_document(&doc)
}

fn findings_from_document(doc: &ScanDocument) -> Result<Vec<ScanFinding>, ParseError> {
    let mut findings = Vec::new();

    for entry in &doc.hosts {
        let host = match entry.host.ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => {
                warn!("skipping non-IPv4 host");
                continue;
            }
        };

        for port in &entry.ports {
            if port.number == 0 {
                return Err(ParseError::InvalidPort {
                    host: entry.host.ip,
                });
            }
            if !port.is_open_tcp() {
                debug!(
                    port = port.number,
                    state = port.state.as_deref().unwrap_or("-"),
                    protocol = port.protocol.as_deref().unwrap_or("-"),
                    "skipping port that is not open TCP"
                );
                continue;
            }

            let base = ScanFinding {
                host,
                port: port.number,
                service: port.service_name().map(str::to_string),
                product: port.product().map(str::to_string),
                version: port.version().map(str::to_string),
                cve: None,
            };

            let cves = port_cves(port);
            debug!(port = port.number, cves = cves.len(), "parsed port");
            if cves.is_empty() {
                findings.push(base);
            } else {
                findings.extend(cves.into_iter().map(|cve| ScanFinding {
                    cve: Some(cve),
                    ..base.clone()
                }));
            }
        }
    }

    Ok(findings)
}

/// Read and parse a scan document from disk.
pub fn parse_findings_file(path: &Path) -> Result<Vec<ScanFinding>, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_findings(&content)
}

/// CVEs qualifying for one port, in document order without duplicates.
fn port_cves(port: &PortEntry) -> Vec<String> {
    let scored: Vec<(String, f64)> = port
        .script_results
        .iter()
        .filter_map(|script| script.elements.as_ref())
        .flat_map(|elements| elements.tables())
        .filter(|table| table.is_scored_entry())
        .filter_map(|table| {
            let id = table.get("id")?.as_str()?;
            let cvss = table.get("cvss")?.as_f64()?;
            Some((id.trim().to_ascii_uppercase(), cvss))
        })
        .collect();

    if scored.is_empty() {
        return port
            .script_results
            .iter()
            .find_map(|script| extract_cve(&script.output))
            .into_iter()
            .collect();
    }

    let mut seen = HashSet::new();
    scored
        .into_iter()
        .filter(|(id, cvss)| *cvss >= CVSS_THRESHOLD && is_cve_id(id))
        .filter(|(id, _)| seen.insert(id.clone()))
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn doc(ports: &str) -> String {
        format!(r#"{{"hosts":[{{"host":{{"ip":"10.0.0.5"}},"ports":[{ports}]}}]}}"#)
    }

    #[test]
    fn cve_id_shape() {
        assert!(is_cve_id("CVE-2017-0144"));
        assert!(is_cve_id("cve-2021-44228"));
        assert!(is_cve_id("CVE-2021-1234567"));
        assert!(!is_cve_id("CVE-17-0144"));
        assert!(!is_cve_id("EDB-ID:41891"));
        assert!(!is_cve_id("xCVE-2017-0144"));
    }

    #[test]
    fn extract_first_cve_from_text() {
        assert_eq!(
            extract_cve("VULNERABLE: Remote Code Execution (ms17-010)\n IDs: CVE:CVE-2017-0143 CVE-2017-0144"),
            Some("CVE-2017-0143".into())
        );
        assert_eq!(extract_cve("no identifiers here"), None);
    }

    #[test]
    fn port_without_cve_yields_bare_finding() {
        let findings = parse_findings(&doc(
            r#"{"number":22,"service_info":{"name":"ssh","product":"OpenSSH","version":"7.2p2"}}"#,
        ))
        .unwrap();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.host, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(f.port, 22);
        assert_eq!(f.service.as_deref(), Some("ssh"));
        assert_eq!(f.product.as_deref(), Some("OpenSSH"));
        assert_eq!(f.version.as_deref(), Some("7.2p2"));
        assert_eq!(f.cve, None);
    }

    #[test]
    fn free_text_cve_used_without_scores() {
        let findings = parse_findings(&doc(
            r#"{"number":445,"script_results":[
                {"id":"smb-os-discovery","output":"OS: Windows 7"},
                {"id":"smb-vuln-ms17-010","output":"State: VULNERABLE\n IDs:  CVE:CVE-2017-0143"}
            ]}"#,
        ))
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].cve.as_deref(), Some("CVE-2017-0143"));
    }

    #[test]
    fn scored_entries_filtered_by_threshold_and_split() {
        let findings = parse_findings(&doc(
            r#"{"number":80,"service_info":{"name":"http","product":"Apache httpd","version":"2.4.49"},
               "script_results":[{"id":"vulners","output":"CVE-2021-40438 9.0 CVE-2021-41773 7.5 CVE-2021-34798 5.0",
                 "elements":{"cpe:/a:apache:http_server:2.4.49":[
                   {"id":"CVE-2021-40438","cvss":"9.0","type":"cve"},
                   {"id":"CVE-2021-41773","cvss":"7.5","type":"cve"},
                   {"id":"CVE-2021-34798","cvss":"5.0","type":"cve"},
                   {"id":"EDB-ID:50383","cvss":"7.5","type":"exploitdb"},
                   {"id":"CVE-2021-40438","cvss":9.0,"type":"cve"}
                 ]}}]}"#,
        ))
        .unwrap();
        let cves: Vec<_> = findings.iter().map(|f| f.cve.clone().unwrap()).collect();
        assert_eq!(cves, vec!["CVE-2021-40438", "CVE-2021-41773"]);
        assert!(findings.iter().all(|f| f.port == 80 && f.product.as_deref() == Some("Apache httpd")));
    }

    #[test]
    fn scored_entries_below_threshold_do_not_fall_back_to_text() {
        let findings = parse_findings(&doc(
            r#"{"number":80,"script_results":[{"id":"vulners","output":"CVE-2021-34798 5.0",
                 "elements":[{"id":"CVE-2021-34798","cvss":"5.0"}]}]}"#,
        ))
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].cve, None);
    }

    #[test]
    fn pair_list_tables_are_understood() {
        let findings = parse_findings(&doc(
            r#"{"number":8080,"script_results":[{"id":"vulners","output":"",
                 "elements":[[["id","CVE-2017-12617"],["cvss","8.1"]]]}]}"#,
        ))
        .unwrap();
        assert_eq!(findings[0].cve.as_deref(), Some("CVE-2017-12617"));
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(matches!(parse_findings("{not json"), Err(ParseError::Json(_))));
        assert!(matches!(
            parse_findings(r#"{"hosts":[{"host":{"ip":"999.1.1.1"}}]}"#),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn port_zero_rejects_whole_document() {
        let err = parse_findings(&doc(r#"{"number":22},{"number":0}"#)).unwrap_err();
        assert!(matches!(err, ParseError::InvalidPort { .. }));
    }

    #[test]
    fn ipv6_hosts_are_skipped() {
        let findings = parse_findings(
            r#"{"hosts":[{"host":{"ip":"::1"},"ports":[{"number":22}]},
                         {"host":{"ip":"192.168.1.10"},"ports":[{"number":21}]}]}"#,
        )
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].host, Ipv4Addr::new(192, 168, 1, 10));
    }

    #[test]
    fn closed_filtered_and_udp_ports_are_skipped() {
        let findings = parse_findings(&doc(
            r#"{"number":21,"protocol":"Tcp","state":"open","service_info":{"name":"ftp","product":"vsftpd","version":"2.3.4"}},
               {"number":23,"protocol":"Tcp","state":"closed"},
               {"number":139,"protocol":"Tcp","state":"filtered"},
               {"number":161,"protocol":"Udp","state":"open"}"#,
        ))
        .unwrap();
        let ports: Vec<u16> = findings.iter().map(|f| f.port).collect();
        assert_eq!(ports, vec![21]);
    }

    const VULNERS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sV --script vulners -oX nmap-vulners.xml 10.0.0.7">
  <host>
    <address addr="10.0.0.7" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="7.2p2 Ubuntu 4ubuntu2.10"/>
        <script id="vulners" output="cpe:/a:openbsd:openssh:7.2p2">
          <table key="cpe:/a:openbsd:openssh:7.2p2">
            <table>
              <elem key="id">CVE-2016-6515</elem>
              <elem key="cvss">7.8</elem>
              <elem key="type">cve</elem>
              <elem key="is_exploit">false</elem>
            </table>
            <table>
              <elem key="id">EDB-ID:40136</elem>
              <elem key="cvss">7.8</elem>
              <elem key="type">exploitdb</elem>
              <elem key="is_exploit">true</elem>
            </table>
            <table>
              <elem key="id">CVE-2016-10009</elem>
              <elem key="cvss">7.5</elem>
              <elem key="type">cve</elem>
            </table>
            <table>
              <elem key="id">CVE-2016-0778</elem>
              <elem key="cvss">4.6</elem>
              <elem key="type">cve</elem>
            </table>
          </table>
        </script>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http" product="Apache httpd" version="2.4.18"/>
        <script id="vulners" output="cpe:/a:apache:http_server:2.4.18">
          <table key="cpe:/a:apache:http_server:2.4.18">
            <table>
              <elem key="id">CVE-2017-3167</elem>
              <elem key="cvss">5.0</elem>
            </table>
          </table>
        </script>
      </port>
      <port protocol="tcp" portid="3306">
        <state state="closed" reason="reset"/>
        <service name="mysql"/>
      </port>
      <port protocol="udp" portid="161">
        <state state="open" reason="udp-response"/>
        <service name="snmp"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn nmap_vulners_report_uses_score_threshold() {
        let findings = parse_findings(VULNERS_XML).unwrap();
        let summary: Vec<(u16, Option<&str>)> = findings
            .iter()
            .map(|f| (f.port, f.cve.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (22, Some("CVE-2016-6515")),
                (22, Some("CVE-2016-10009")),
                (80, None),
            ]
        );
        assert_eq!(findings[0].host, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(findings[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(findings[2].version.as_deref(), Some("2.4.18"));
    }

    #[test]
    fn nmap_free_text_cve_without_tables() {
        let findings = parse_findings(
            r#"<nmaprun><host><address addr="10.0.0.5" addrtype="ipv4"/><ports>
            <port protocol="tcp" portid="445"><state state="open"/><service name="microsoft-ds"/>
              <script id="smb-vuln-ms17-010" output="VULNERABLE: Remote Code Execution vulnerability in Microsoft SMBv1 servers (ms17-010) IDs: CVE:CVE-2017-0143"/>
            </port></ports></host></nmaprun>"#,
        )
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].cve.as_deref(), Some("CVE-2017-0143"));
        assert_eq!(findings[0].service.as_deref(), Some("microsoft-ds"));
    }

    #[test]
    fn nmap_port_zero_rejects_document() {
        let err = parse_findings(
            r#"<nmaprun><host><address addr="10.0.0.5" addrtype="ipv4"/><ports>
            <port protocol="tcp" portid="0"><state state="open"/></port></ports></host></nmaprun>"#,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidPort { .. }));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(matches!(parse_findings("<nmaprun><host>"), Err(ParseError::Xml(_))));
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert!(parse_findings("{}").unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("exploitmap_missing_scan.json");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(parse_findings_file(&path), Err(ParseError::Io { .. })));
    }
}
