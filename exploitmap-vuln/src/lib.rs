pub mod findings;
pub mod matcher;
pub mod nmap;

pub use findings::{
    CVSS_THRESHOLD, ParseError, extract_cve, is_cve_id, parse_findings, parse_findings_file,
};
pub use matcher::{ExploitCandidateMatcher, search_key};
pub use nmap::{looks_like_xml, parse_nmap_xml};
