//! Architecture/variant enumeration for manifest lists.
//!
//! Groups list entries by architecture, orders each group so that the
//! default variant comes first, and derives destination tags.

use crate::manifest::{ManifestDescriptor, ManifestList};

/// One (digest, variant) member of an architecture group.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantEntry {
    pub descriptor: ManifestDescriptor,
    pub variant: Option<String>,
}

/// All list entries for one architecture, default first.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureGroup {
    pub architecture: String,
    pub entries: Vec<VariantEntry>,
}

impl ArchitectureGroup {
    /// The entry published under the unqualified `tag-arch`.
    pub fn default_entry(&self) -> Option<&VariantEntry> {
        self.entries.first()
    }

    /// Destination tag for the entry at `index` of this group.
    pub fn dest_tag(&self, tag: &str, index: usize) -> String {
        let variant = self
            .entries
            .get(index)
            .and_then(|e| e.variant.as_deref());
        arch_tag(tag, &self.architecture, variant, index)
    }
}

/// `tag-arch` for the default (index 0), `tag-arch-variant` otherwise.
pub fn arch_tag(tag: &str, architecture: &str, variant: Option<&str>, index: usize) -> String {
    match variant {
        Some(variant) if index > 0 => format!("{}-{}-{}", tag, architecture, variant),
        _ => format!("{}-{}", tag, architecture),
    }
}

/// Entries that take part in enumeration: linux or unspecified OS.
fn is_candidate(descriptor: &ManifestDescriptor) -> bool {
    match &descriptor.platform {
        Some(platform) => platform.os.is_empty() || platform.os == "linux",
        None => false,
    }
}

/// Group the entries of `architecture` and order them.
///
/// Order: no variant first, then variants in descending lexical order. The
/// result depends only on the variant strings, never on list order. When
/// two entries share a variant the smaller digest is kept.
pub fn group_for(list: &ManifestList, architecture: &str) -> Option<ArchitectureGroup> {
    let mut entries: Vec<VariantEntry> = list
        .manifests
        .iter()
        .filter(|d| is_candidate(d) && d.architecture() == Some(architecture))
        .map(|d| VariantEntry {
            descriptor: d.clone(),
            variant: d.variant().map(String::from),
        })
        .collect();

    if entries.is_empty() {
        return None;
    }

    entries.sort_by(|a, b| {
        match (&a.variant, &b.variant) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(x),
        }
        .then_with(|| a.descriptor.digest.cmp(&b.descriptor.digest))
    });
    entries.dedup_by(|later, earlier| later.variant == earlier.variant);

    Some(ArchitectureGroup {
        architecture: architecture.to_string(),
        entries,
    })
}

/// Groups for each configured architecture, in configured order.
///
/// The second element lists configured architectures absent from the list.
pub fn enumerate(
    list: &ManifestList,
    architectures: &[String],
) -> (Vec<ArchitectureGroup>, Vec<String>) {
    let mut groups = Vec::new();
    let mut missing = Vec::new();
    for architecture in architectures {
        match group_for(list, architecture) {
            Some(group) => groups.push(group),
            None => missing.push(architecture.clone()),
        }
    }
    (groups, missing)
}
