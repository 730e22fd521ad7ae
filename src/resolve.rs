//! Locating class files inside a decompiled tree.
//!
//! apktool splits multi-dex packages into several partitions (`smali`,
//! `smali_classes2`, ...). A class lives in exactly one of them, and which one
//! is not derivable from its name, so resolution probes every partition.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::types::ObjectIdentifier;

/// Prefix shared by every partition directory name.
pub const PARTITION_PREFIX: &str = "smali";

/// Manifest file name at the root of a decoded package.
pub const MANIFEST_FILE: &str = "AndroidManifest.xml";

/// Read-only access to a directory tree.
pub trait TreeView {
    /// Names of the immediate subdirectories of `dir`. A missing `dir` has none.
    fn subdirectories(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// True if `path` is a regular file.
    fn is_file(&self, path: &Path) -> bool;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsView;

impl TreeView for FsView {
    fn subdirectories(&self, dir: &Path) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut names = vec![];
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// An in-memory tree made of file paths, for exercising resolution without touching disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: BTreeSet<PathBuf>,
}

impl MemoryTree {
    pub fn new() -> Self {
        MemoryTree::default()
    }

    /// Adds a file; its parent directories exist implicitly.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }
}

impl TreeView for MemoryTree {
    fn subdirectories(&self, dir: &Path) -> io::Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .files
            .iter()
            .filter_map(|f| f.strip_prefix(dir).ok())
            .filter_map(|rel| {
                let mut components = rel.components();
                let first = components.next()?;
                // Only directories: something must follow the first component.
                components.next()?;
                first.as_os_str().to_str().map(str::to_string)
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }
}

/// Maps class names to smali files across partitions.
pub struct PathResolver<V: TreeView> {
    view: V,
}

impl<V: TreeView> PathResolver<V> {
    pub fn new(view: V) -> Self {
        PathResolver { view }
    }

    /// Partition directory names under `root`, in lexicographic order.
    pub fn partitions(&self, root: &Path) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .view
            .subdirectories(root)?
            .into_iter()
            .filter(|name| name.starts_with(PARTITION_PREFIX))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Finds the smali file defining `class` under `root`.
    ///
    /// Returns `Ok(None)` when no partition holds the class and
    /// [`Error::AmbiguousClass`] when more than one does.
    ///
    /// # Examples
    ///
    /// ```
    /// use apkmod::resolve::{MemoryTree, PathResolver};
    /// use apkmod::types::ObjectIdentifier;
    /// use std::path::Path;
    ///
    /// let tree = MemoryTree::new().with_file("out/smali_classes2/com/a/Main.smali");
    /// let resolver = PathResolver::new(tree);
    /// let class = ObjectIdentifier::from_java_type("com.a.Main");
    /// let found = resolver.resolve(&class, Path::new("out")).unwrap();
    /// assert_eq!(found, Some(Path::new("out/smali_classes2/com/a/Main.smali").to_path_buf()));
    /// ```
    pub fn resolve(&self, class: &ObjectIdentifier, root: &Path) -> Result<Option<PathBuf>> {
        let relative = class.smali_path();
        let mut hits: Vec<(String, PathBuf)> = vec![];

        for partition in self.partitions(root)? {
            let candidate = root.join(&partition).join(&relative);
            if self.view.is_file(&candidate) {
                hits.push((partition, candidate));
            }
        }

        match hits.len() {
            0 => {
                debug!("{} not found under {}", class.as_java_type(), root.display());
                Ok(None)
            }
            1 => {
                let (partition, path) = hits.remove(0);
                debug!("{} resolved in partition {partition}", class.as_java_type());
                Ok(Some(path))
            }
            _ => {
                let partitions: Vec<String> = hits.into_iter().map(|(p, _)| p).collect();
                warn!(
                    "{} is defined in {} partitions",
                    class.as_java_type(),
                    partitions.len()
                );
                Err(Error::AmbiguousClass {
                    class: class.as_java_type(),
                    partitions,
                })
            }
        }
    }
}

/// A package decoded by apktool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompiledTree {
    root: PathBuf,
}

impl DecompiledTree {
    /// Opens a decoded package directory; it must contain a manifest.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(MANIFEST_FILE).is_file() {
            return Err(Error::NotFound(format!(
                "{} in {}",
                MANIFEST_FILE,
                root.display()
            )));
        }
        Ok(DecompiledTree { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Directory holding native libraries for `abi`, e.g. `lib/arm64-v8a`.
    pub fn native_lib_dir(&self, abi: &str) -> PathBuf {
        self.root.join("lib").join(abi)
    }

    pub fn resolve_class(&self, class: &ObjectIdentifier) -> Result<Option<PathBuf>> {
        PathResolver::new(FsView).resolve(class, &self.root)
    }
}
