use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Component, Path};

use zip::read::ZipArchive;

use crate::error::{Error, Result};

/// Name of the manifest entry in a built package.
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// Entry listing of a package (ZIP) file.
///
/// Only names are read; entry data is left in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApkContents {
    entries: BTreeSet<String>,
}

impl ApkContents {
    /// Load the entry names of an APK on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut entries = BTreeSet::new();
        for idx in 0..archive.len() {
            let entry = archive.by_index(idx)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry
                .enclosed_name()
                .map(entry_name)
                .ok_or_else(|| Error::format(path, format!("unsafe entry path {}", entry.name())))?;
            entries.insert(name);
        }
        Ok(ApkContents { entries })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    /// Top-level `classes*.dex` entries, in name order.
    pub fn dex_entries(&self) -> Vec<&str> {
        self.entry_names()
            .filter(|name| !name.contains('/') && name.starts_with("classes") && name.ends_with(".dex"))
            .collect()
    }
}

/// Checks that a freshly built package has a manifest and bytecode.
pub fn verify_package(path: impl AsRef<Path>) -> Result<ApkContents> {
    let path = path.as_ref();
    let contents = ApkContents::from_file(path).map_err(|err| match err {
        Error::Zip(zip) => Error::format(path, format!("not a valid package archive: {zip}")),
        other => other,
    })?;
    if !contents.contains(MANIFEST_ENTRY) {
        return Err(Error::format(path, format!("package has no {MANIFEST_ENTRY}")));
    }
    if contents.dex_entries().is_empty() {
        return Err(Error::format(path, "package has no classes*.dex"));
    }
    Ok(contents)
}

fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|comp| match comp {
            Component::Normal(part) => Some(part.to_string_lossy().replace('\\', "/")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
