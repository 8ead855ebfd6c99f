//! Deterministic classification of changed paths.
//!
//! Paths are repository-relative. A path names a service when its first
//! component is the working directory's name, and names a shared module when
//! it starts with the modules prefix. Whether the service directory actually
//! holds definition files is checked by the I/O layer.

use std::collections::BTreeSet;
use std::path::{Component, Path};

/// Services and modules named by a set of changed paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedPaths {
    /// Candidate service names (second component under the working dir).
    pub services: BTreeSet<String>,
    /// Shared module names (second component under the modules prefix).
    pub modules: BTreeSet<String>,
}

/// Split changed paths into candidate services and changed modules.
pub fn classify_changed_paths<P: AsRef<Path>>(
    changed_paths: &[P],
    workdir_name: &str,
    modules_prefix: &str,
) -> ClassifiedPaths {
    let mut classified = ClassifiedPaths::default();
    for path in changed_paths {
        let mut components = normal_components(path.as_ref());
        let (Some(first), Some(second)) = (components.next(), components.next()) else {
            continue;
        };
        if first == workdir_name {
            classified.services.insert(second.clone());
        }
        if first == modules_prefix {
            classified.modules.insert(second);
        }
    }
    classified
}

fn normal_components(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// True if `content` references `<modules_prefix>/<module>` as a whole path segment.
///
/// This is a textual scan, not a parse: any occurrence followed by end of
/// text, `/`, a quote or whitespace counts.
pub fn references_module(content: &str, modules_prefix: &str, module: &str) -> bool {
    let needle = format!("{modules_prefix}/{module}");
    content.match_indices(&needle).any(|(idx, _)| {
        match content[idx + needle.len()..].chars().next() {
            None => true,
            Some(next) => next == '/' || next == '"' || next == '\'' || next.is_whitespace(),
        }
    })
}
