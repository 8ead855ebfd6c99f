//! Change detection: map a diff to the set of affected services.
//!
//! Detection never fails outright. Any error while reading the changed-files
//! list, diffing, or scanning the working directory degrades to "every
//! service directory with definition files".

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{classify_changed_paths, references_module};
use crate::io::config::OrchestratorConfig;
use crate::io::git::Git;

/// Where the list of changed paths comes from.
#[derive(Debug, Clone)]
pub struct ChangeSource {
    /// File with one changed path per line. Preferred when present and non-empty.
    pub changed_files: Option<PathBuf>,
    /// Base reference for the git fallback.
    pub base_ref: Option<String>,
    pub head_ref: String,
    /// Directory git runs in.
    pub repo_root: PathBuf,
}

impl Default for ChangeSource {
    fn default() -> Self {
        Self {
            changed_files: None,
            base_ref: None,
            head_ref: "HEAD".to_string(),
            repo_root: PathBuf::from("."),
        }
    }
}

/// Affected services for one run, deduplicated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    services: BTreeSet<String>,
    /// Shared modules seen in the diff.
    pub modules: BTreeSet<String>,
    /// True when detection failed and every service was selected.
    pub degraded: bool,
}

impl ChangeSet {
    pub fn from_services<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn services(&self) -> Vec<String> {
        self.services.iter().cloned().collect()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Scans a working directory of service subdirectories.
#[derive(Debug, Clone)]
pub struct ChangeDetector<'a> {
    working_dir: &'a Path,
    config: &'a OrchestratorConfig,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(working_dir: &'a Path, config: &'a OrchestratorConfig) -> Self {
        Self {
            working_dir,
            config,
        }
    }

    /// Detect affected services, degrading to a full scan on any error.
    #[instrument(skip_all, fields(working_dir = %self.working_dir.display()))]
    pub fn detect(&self, source: &ChangeSource) -> ChangeSet {
        match self.try_detect(source) {
            Ok(changes) => changes,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not detect changes; falling back to all services");
                let services = match self.all_services() {
                    Ok(services) => services,
                    Err(err) => {
                        warn!(err = %format!("{err:#}"), "could not scan working directory; no services selected");
                        Vec::new()
                    }
                };
                ChangeSet {
                    degraded: true,
                    ..ChangeSet::from_services(services)
                }
            }
        }
    }

    fn try_detect(&self, source: &ChangeSource) -> Result<ChangeSet> {
        let mut paths = Vec::new();
        if let Some(list) = source.changed_files.as_deref()
            && list.exists()
        {
            paths = read_changed_files(list)?;
            debug!(path = %list.display(), count = paths.len(), "loaded changed-files list");
        }
        if paths.is_empty() {
            let base = source
                .base_ref
                .as_deref()
                .ok_or_else(|| anyhow!("either a changed-files list or a base ref is required"))?;
            debug!(base, head = %source.head_ref, "using git diff");
            paths = Git::new(&source.repo_root)
                .diff_names(base, &source.head_ref)
                .context("git diff")?;
        }
        self.detect_from_paths(&paths)
    }

    /// Affected services for an explicit list of repository-relative paths.
    pub fn detect_from_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<ChangeSet> {
        let workdir_name = self.workdir_name()?;
        let classified =
            classify_changed_paths(paths, &workdir_name, &self.config.modules_prefix);

        let mut services = BTreeSet::new();
        for name in classified.services {
            let dir = self.working_dir.join(&name);
            if dir.is_dir() && self.has_definition_files(&dir)? {
                debug!(service = %name, "direct change");
                services.insert(name);
            }
        }

        if !classified.modules.is_empty() {
            info!(modules = %join(&classified.modules), "shared module changes detected");
            let affected = self.services_using_modules(&classified.modules)?;
            if !affected.is_empty() {
                info!(services = %join(&affected), "services affected by module changes");
            }
            services.extend(affected);
        }

        Ok(ChangeSet {
            services,
            modules: classified.modules,
            degraded: false,
        })
    }

    /// Every non-hidden subdirectory holding at least one definition file, sorted.
    pub fn all_services(&self) -> Result<Vec<String>> {
        let mut services = Vec::new();
        for dir in self.service_dirs()? {
            if self.has_definition_files(&dir)?
                && let Some(name) = dir.file_name()
            {
                services.push(name.to_string_lossy().into_owned());
            }
        }
        services.sort();
        Ok(services)
    }

    /// Services whose definition files reference any of `modules`.
    ///
    /// Unreadable files are skipped.
    fn services_using_modules(&self, modules: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        let prefix = &self.config.modules_prefix;
        let mut services = BTreeSet::new();
        for dir in self.service_dirs()? {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            'files: for file in self.definition_files(&dir)? {
                let content = match fs::read_to_string(&file) {
                    Ok(content) => content,
                    Err(err) => {
                        debug!(path = %file.display(), err = %err, "skipping unreadable file");
                        continue;
                    }
                };
                for module in modules {
                    if references_module(&content, prefix, module) {
                        debug!(service = %name, module = %module, "service uses module");
                        services.insert(name.clone());
                        break 'files;
                    }
                }
            }
        }
        Ok(services)
    }

    fn service_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(self.working_dir)
            .with_context(|| format!("read {}", self.working_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if path.is_dir() && !hidden {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn definition_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry.context("read entry")?.path();
            if path.is_file() && self.config.is_definition_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn has_definition_files(&self, dir: &Path) -> Result<bool> {
        Ok(!self.definition_files(dir)?.is_empty())
    }

    fn workdir_name(&self) -> Result<String> {
        let name = match self.working_dir.file_name() {
            Some(name) => name.to_os_string(),
            None => self
                .working_dir
                .canonicalize()
                .with_context(|| format!("resolve {}", self.working_dir.display()))?
                .file_name()
                .ok_or_else(|| anyhow!("working directory has no name"))?
                .to_os_string(),
        };
        Ok(name.to_string_lossy().into_owned())
    }
}

/// Read a changed-files list: one path per line, blank lines ignored.
pub fn read_changed_files(path: &Path) -> Result<Vec<String>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn join(items: &BTreeSet<String>) -> String {
    items.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ServiceTree;

    #[test]
    fn direct_changes_require_definition_files() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "resource \"x\" \"y\" {}").expect("network");
        tree.empty_dir("docs").expect("docs");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        let changes = detector
            .detect_from_paths(&[
                "toronto/network/main.tf",
                "toronto/docs/README.md",
                "toronto/missing/main.tf",
            ])
            .expect("detect");
        assert_eq!(changes.services(), vec!["network".to_string()]);
        assert!(!changes.degraded);
    }

    #[test]
    fn module_change_fans_out_to_referencing_services() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "module \"vcn\" { source = \"../../modules/net-common\" }")
            .expect("network");
        tree.service("compute", "module \"subnet\" { source = \"../../modules/net-common/subnet\" }")
            .expect("compute");
        tree.service("identity", "resource \"oci_identity_group\" \"ops\" {}")
            .expect("identity");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        let changes = detector
            .detect_from_paths(&["modules/net-common/main.tf"])
            .expect("detect");
        assert_eq!(
            changes.services(),
            vec!["compute".to_string(), "network".to_string()]
        );
        assert!(changes.modules.contains("net-common"));
    }

    #[test]
    fn direct_and_module_changes_are_merged_and_deduplicated() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "source = \"../../modules/net-common\"").expect("network");
        tree.service("dns", "resource \"a\" \"b\" {}").expect("dns");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        let changes = detector
            .detect_from_paths(&[
                "toronto/network/main.tf",
                "toronto/dns/main.tf",
                "modules/net-common/variables.tf",
            ])
            .expect("detect");
        assert_eq!(changes.services(), vec!["dns".to_string(), "network".to_string()]);
    }

    #[test]
    fn all_services_skips_hidden_and_empty_dirs() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "x").expect("network");
        tree.service("identity", "x").expect("identity");
        tree.service(".terraform", "x").expect("hidden");
        tree.empty_dir("scripts").expect("scripts");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        assert_eq!(
            detector.all_services().expect("scan"),
            vec!["identity".to_string(), "network".to_string()]
        );
    }

    #[test]
    fn changed_files_list_takes_priority() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "x").expect("network");
        tree.service("identity", "x").expect("identity");
        let list = tree.root().join("changed-files.txt");
        fs::write(&list, "\n  toronto/identity/main.tf  \n\n").expect("write list");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        let changes = detector.detect(&ChangeSource {
            changed_files: Some(list),
            base_ref: Some("not-a-real-ref".to_string()),
            repo_root: tree.root().to_path_buf(),
            ..ChangeSource::default()
        });
        assert_eq!(changes.services(), vec!["identity".to_string()]);
        assert!(!changes.degraded);
    }

    #[test]
    fn detection_failure_falls_back_to_all_services() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "x").expect("network");
        tree.service("identity", "x").expect("identity");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        let changes = detector.detect(&ChangeSource {
            changed_files: Some(tree.root().join("missing.txt")),
            base_ref: None,
            repo_root: tree.root().to_path_buf(),
            ..ChangeSource::default()
        });
        assert!(changes.degraded);
        assert_eq!(
            changes.services(),
            vec!["identity".to_string(), "network".to_string()]
        );
    }

    #[test]
    fn git_failure_falls_back_to_all_services() {
        let tree = ServiceTree::new("toronto").expect("tree");
        tree.service("network", "x").expect("network");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(tree.working_dir(), &cfg);

        let changes = detector.detect(&ChangeSource {
            base_ref: Some("origin/main".to_string()),
            repo_root: tree.root().to_path_buf(),
            ..ChangeSource::default()
        });
        assert!(changes.degraded);
        assert_eq!(changes.services(), vec!["network".to_string()]);
    }

    #[test]
    fn missing_working_dir_degrades_to_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let working_dir = temp.path().join("nowhere");
        let cfg = OrchestratorConfig::default();
        let detector = ChangeDetector::new(&working_dir, &cfg);

        let changes = detector.detect(&ChangeSource::default());
        assert!(changes.degraded);
        assert!(changes.is_empty());
    }
}
