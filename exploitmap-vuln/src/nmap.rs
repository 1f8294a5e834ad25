// ---------------------------------------------------------------------------
// nmap XML -> scan document
// ---------------------------------------------------------------------------
//
// Maps `nmap -oX` output onto the same document model the JSON reader
// fills, so both inputs go through one finding extraction. Script
// `<table>`/`<elem>` trees become script values: keyed children form a
// table, unkeyed children a list.

use std::net::IpAddr;

use exploitmap_types::{
    HostAddr, HostEntry, PortEntry, ScanDocument, ScriptResult, ScriptTable, ScriptValue,
    ServiceInfo,
};
use roxmltree::{Document, Node};
use tracing::warn;

use crate::findings::ParseError;

/// Whether a document is XML rather than JSON.
pub fn looks_like_xml(document: &str) -> bool {
    document
        .trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with('<')
}

/// Parse an nmap XML report.
pub fn parse_nmap_xml(document: &str) -> Result<ScanDocument, ParseError> {
    let xml = Document::parse(document)?;
    let root = xml.root_element();
    if !root.has_tag_name("nmaprun") {
        return Err(ParseError::NotNmap(root.tag_name().name().to_string()));
    }

    let mut hosts = Vec::new();
    for host in children(root, "host") {
        let Some(addr) = host_address(host) else {
            warn!("skipping host without an address");
            continue;
        };
        let ip: IpAddr = addr
            .parse()
            .map_err(|_| ParseError::InvalidAddress(addr.clone()))?;
        let hostname = child(host, "hostnames")
            .and_then(|names| child(names, "hostname"))
            .and_then(|name| attr(name, "name"));
        let ports = match child(host, "ports") {
            Some(ports) => children(ports, "port")
                .map(port_entry)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        hosts.push(HostEntry {
            host: HostAddr { ip, hostname },
            ports,
        });
    }

    Ok(ScanDocument { hosts })
}

fn children<'a, 'i>(node: Node<'a, 'i>, tag: &'static str) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(move |n| n.has_tag_name(tag))
}

fn child<'a, 'i>(node: Node<'a, 'i>, tag: &'static str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn attr(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

/// IPv4 address if the host has one, else IPv6. MAC addresses are ignored.
fn host_address(host: Node<'_, '_>) -> Option<String> {
    let addresses: Vec<Node> = children(host, "address").collect();
    ["ipv4", "ipv6"].iter().find_map(|kind| {
        addresses
            .iter()
            .find(|a| a.attribute("addrtype") == Some(*kind))
            .and_then(|a| attr(*a, "addr"))
    })
}

fn port_entry(port: Node<'_, '_>) -> Result<PortEntry, ParseError> {
    let raw = port.attribute("portid").unwrap_or_default();
    let number: u16 = raw
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidPortId(raw.to_string()))?;
    let service = child(port, "service");

    Ok(PortEntry {
        number,
        protocol: attr(port, "protocol"),
        state: child(port, "state").and_then(|s| attr(s, "state")),
        service: service.and_then(|s| attr(s, "name")),
        service_info: service.map(|s| ServiceInfo {
            name: attr(s, "name").unwrap_or_default(),
            product: attr(s, "product"),
            version: attr(s, "version"),
        }),
        script_results: children(port, "script").map(script_result).collect(),
    })
}

fn script_result(script: Node<'_, '_>) -> ScriptResult {
    ScriptResult {
        id: attr(script, "id").unwrap_or_default(),
        output: attr(script, "output").unwrap_or_default(),
        elements: table_value(script),
    }
}

/// Structured children of a `<script>` or `<table>`, `None` when it has none.
fn table_value(node: Node<'_, '_>) -> Option<ScriptValue> {
    let items: Vec<Node> = node
        .children()
        .filter(|n| n.has_tag_name("table") || n.has_tag_name("elem"))
        .collect();
    if items.is_empty() {
        return None;
    }

    if items.iter().all(|n| n.attribute("key").is_some()) {
        let entries = items
            .iter()
            .map(|n| (attr(*n, "key").unwrap_or_default(), item_value(*n)))
            .collect();
        Some(ScriptValue::Map(ScriptTable(entries)))
    } else {
        Some(ScriptValue::List(items.iter().map(|n| item_value(*n)).collect()))
    }
}

fn item_value(node: Node<'_, '_>) -> ScriptValue {
    if node.has_tag_name("elem") {
        ScriptValue::String(node.text().unwrap_or_default().trim().to_string())
    } else {
        table_value(node).unwrap_or(ScriptValue::List(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMBA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sV 10.0.0.5">
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <address addr="08:00:27:AA:BB:CC" addrtype="mac"/>
    <hostnames><hostname name="metasploitable" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="139">
        <state state="open" reason="syn-ack"/>
        <service name="netbios-ssn" product="Samba smbd" version="3.0.20-Debian"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn sniffs_xml() {
        assert!(looks_like_xml(SAMBA));
        assert!(looks_like_xml("\u{feff}  <nmaprun/>"));
        assert!(!looks_like_xml(r#"{"hosts":[]}"#));
    }

    #[test]
    fn reads_hosts_ports_and_services() {
        let doc = parse_nmap_xml(SAMBA).unwrap();
        assert_eq!(doc.hosts.len(), 1);
        let host = &doc.hosts[0];
        assert_eq!(host.host.ip.to_string(), "10.0.0.5");
        assert_eq!(host.host.hostname.as_deref(), Some("metasploitable"));
        let port = &host.ports[0];
        assert_eq!(port.number, 139);
        assert_eq!(port.state.as_deref(), Some("open"));
        assert_eq!(port.protocol.as_deref(), Some("tcp"));
        assert_eq!(port.service_name(), Some("netbios-ssn"));
        assert_eq!(port.product(), Some("Samba smbd"));
        assert_eq!(port.version(), Some("3.0.20-Debian"));
        assert!(port.script_results.is_empty());
    }

    #[test]
    fn vulners_tables_keep_keys_and_order() {
        let doc = parse_nmap_xml(
            r#"<nmaprun><host><address addr="10.0.0.9" addrtype="ipv4"/><ports>
            <port protocol="tcp" portid="80"><state state="open"/>
              <script id="vulners" output="cpe:/a:apache:http_server:2.4.49">
                <table key="cpe:/a:apache:http_server:2.4.49">
                  <table><elem key="id">CVE-2021-42013</elem><elem key="cvss">9.8</elem></table>
                  <table><elem key="id">CVE-2021-41773</elem><elem key="cvss">7.5</elem></table>
                </table>
              </script>
            </port></ports></host></nmaprun>"#,
        )
        .unwrap();
        let script = &doc.hosts[0].ports[0].script_results[0];
        assert_eq!(script.id, "vulners");
        let elements = script.elements.as_ref().unwrap();
        let ids: Vec<_> = elements
            .tables()
            .into_iter()
            .filter(|t| t.is_scored_entry())
            .filter_map(|t| t.get("id").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(ids, vec!["CVE-2021-42013", "CVE-2021-41773"]);
    }

    #[test]
    fn rejects_other_xml_and_bad_values() {
        assert!(matches!(parse_nmap_xml("<html/>"), Err(ParseError::NotNmap(_))));
        assert!(matches!(parse_nmap_xml("<nmaprun><host>"), Err(ParseError::Xml(_))));
        assert!(matches!(
            parse_nmap_xml(r#"<nmaprun><host><address addr="10.0.0.300" addrtype="ipv4"/></host></nmaprun>"#),
            Err(ParseError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_nmap_xml(
                r#"<nmaprun><host><address addr="10.0.0.3" addrtype="ipv4"/><ports><port portid="http"/></ports></host></nmaprun>"#
            ),
            Err(ParseError::InvalidPortId(_))
        ));
    }

    #[test]
    fn host_without_address_is_skipped() {
        let doc = parse_nmap_xml(r#"<nmaprun><host><status state="up"/></host></nmaprun>"#).unwrap();
        assert!(doc.hosts.is_empty());
    }
}
