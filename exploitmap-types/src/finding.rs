use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A normalized scan finding: one service endpoint and at most one CVE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub host: Ipv4Addr,
    pub port: u16,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cve: Option<String>,
}

impl ScanFinding {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self {
            host,
            port,
            service: None,
            product: None,
            version: None,
            cve: None,
        }
    }

    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.cve = Some(cve.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>, version: Option<&str>) -> Self {
        self.product = Some(product.into());
        self.version = version.map(str::to_string);
        self
    }
}

impl fmt::Display for ScanFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(ref product) = self.product {
            write!(f, " {product}")?;
            if let Some(ref version) = self.version {
                write!(f, " {version}")?;
            }
        }
        if let Some(ref cve) = self.cve {
            write!(f, " ({cve})")?;
        }
        Ok(())
    }
}
