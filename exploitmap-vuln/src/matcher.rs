// ---------------------------------------------------------------------------
// Finding -> exploit candidates
// ---------------------------------------------------------------------------
//
// Looks findings up in the remote module catalog and keeps the exploit
// modules that are reliable enough to run unattended.

use std::collections::HashSet;
use std::sync::Arc;

use exploitmap_output::mask;
use exploitmap_rpc::{ExploitService, ModuleInfo, RpcError};
use exploitmap_types::{ExploitCandidate, Rank, ScanFinding};
use tracing::{debug, info, warn};

/// Catalog search text for a finding: product and version when known, the
/// product alone, or the CVE id when no product was detected.
pub fn search_key(finding: &ScanFinding) -> Option<String> {
    let product = finding.product.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let version = finding.version.as_deref().map(str::trim).filter(|v| !v.is_empty());
    match (product, version) {
        (Some(p), Some(v)) => Some(format!("{p} {v}")),
        (Some(p), None) => Some(p.to_string()),
        (None, _) => finding
            .cve
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    }
}

pub struct ExploitCandidateMatcher {
    service: Arc<dyn ExploitService>,
    min_rank: Rank,
}

impl ExploitCandidateMatcher {
    pub fn new(service: Arc<dyn ExploitService>) -> Self {
        Self {
            service,
            min_rank: Rank::Good,
        }
    }

    pub fn with_min_rank(mut self, min_rank: Rank) -> Self {
        self.min_rank = min_rank;
        self
    }

    pub fn min_rank(&self) -> Rank {
        self.min_rank
    }

    /// Query the catalog once for `finding`. Results are exploit modules at
    /// or above the minimum rank, unique by path, best rank first and then
    /// by path. An empty list is a normal outcome. Module details are only
    /// fetched for summaries without a rank and for modules that pass the
    /// rank filter.
    pub async fn match_finding(
        &self,
        finding: &ScanFinding,
    ) -> Result<Vec<ExploitCandidate>, RpcError> {
        let Some(query) = search_key(finding) else {
            debug!(port = finding.port, "nothing to search for");
            return Ok(Vec::new());
        };

        let mut modules: Vec<ModuleInfo> = self
            .service
            .search(&query)
            .await?
            .into_iter()
            .filter(|m| m.kind.is_empty() || m.kind.eq_ignore_ascii_case("exploit"))
            .filter(|m| !m.fullname.trim().is_empty())
            .collect();
        let total = modules.len();

        for module in modules.iter_mut().filter(|m| m.rank.trim().is_empty()) {
            self.complete(module).await;
        }
        let mut kept = self.select(modules);
        for module in kept.iter_mut().filter(|m| needs_details(m)) {
            self.complete(module).await;
        }

        let mut candidates: Vec<ExploitCandidate> = kept
            .into_iter()
            .map(|m| ExploitCandidate {
                rank: Rank::from_str_loose(&m.rank),
                module_path: m.fullname,
                platform: m.platform,
                description: m.description,
                references: m.references,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.rank
                .cmp(&a.rank)
                .then_with(|| a.module_path.cmp(&b.module_path))
        });

        info!(
            query = %mask(&query),
            total,
            kept = candidates.len(),
            "catalog search complete"
        );
        Ok(candidates)
    }

    /// Modules at or above the minimum rank, first occurrence of each path.
    fn select(&self, modules: Vec<ModuleInfo>) -> Vec<ModuleInfo> {
        let mut seen = HashSet::new();
        modules
            .into_iter()
            .filter(|m| Rank::from_str_loose(&m.rank) >= self.min_rank)
            .filter(|m| seen.insert(m.fullname.clone()))
            .collect()
    }

    /// Fill blank fields of a summary from the full catalog entry. A failed
    /// lookup keeps the summary as it is.
    async fn complete(&self, module: &mut ModuleInfo) {
        match self.service.module_info(&module.fullname).await {
            Ok(detail) => {
                if module.rank.trim().is_empty() {
                    module.rank = detail.rank;
                }
                if module.platform.is_empty() {
                    module.platform = detail.platform;
                }
                if module.description.is_empty() {
                    module.description = detail.description;
                }
                if module.references.is_empty() {
                    module.references = detail.references;
                }
            }
            Err(e) => warn!(
                module = %module.fullname,
                error = %mask(&e.to_string()),
                "module details unavailable"
            ),
        }
    }
}

fn needs_details(module: &ModuleInfo) -> bool {
    module.platform.is_empty() || module.references.is_empty()
}
