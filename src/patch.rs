//! Named, idempotent transformations of a decompiled tree.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::android::manifest::{launch_activity, manifest_text, remove_extract_native_libs, ManifestEdit};
use crate::error::{Error, Result};
use crate::inject::{Hook, InjectionPlanner, Planned, ON_CREATE};
use crate::resolve::DecompiledTree;
use crate::types::ObjectIdentifier;
use crate::unit::BytecodeUnit;

/// How a patch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOutcome {
    Applied,
    Skipped,
    Failed,
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatchOutcome::Applied => "applied",
            PatchOutcome::Skipped => "skipped",
            PatchOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Report line for one patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub name: String,
    pub outcome: PatchOutcome,
    pub diagnostic: Option<String>,
}

/// What a successful patch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Applied(String),
    /// Already in the desired state.
    Skipped(String),
}

/// A transformation applied to a decompiled tree.
///
/// Applying a patch to a tree it has already transformed must report
/// [`Change::Skipped`] and leave the tree untouched.
pub trait Patch {
    fn name(&self) -> &str;

    fn apply(&self, tree: &mut DecompiledTree) -> Result<Change>;
}

/// A file opened for modification.
///
/// Changes reach the disk only through [`PatchTarget::commit`], which writes a
/// sibling temporary file and renames it over the target. A target dropped
/// without committing leaves the file as it was.
pub struct PatchTarget {
    path: PathBuf,
    contents: Vec<u8>,
}

impl PatchTarget {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = fs::read(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(err),
        })?;
        Ok(PatchTarget { path, contents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.contents
    }

    pub fn text(&self) -> Result<&str> {
        str::from_utf8(&self.contents).map_err(|err| Error::format(&self.path, err.to_string()))
    }

    /// Parses the target as a smali file.
    pub fn unit(&self) -> Result<BytecodeUnit> {
        BytecodeUnit::from_smali(self.text()?).map_err(|err| Error::format(&self.path, err.to_string()))
    }

    /// Replaces the file with `contents` atomically.
    pub fn commit(self, contents: &[u8]) -> Result<()> {
        write_atomic(&self.path, contents)
    }
}

/// Writes through a temporary file in the destination directory and renames it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    match fs::metadata(path) {
        Ok(existing) if existing.is_file() => tmp.as_file().set_permissions(existing.permissions())?,
        _ => {}
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// Which class receives a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookTarget {
    /// The activity the manifest declares as launcher entry point.
    LaunchActivity,
    Class(ObjectIdentifier),
}

/// Injects a [`Hook`] at the start of a method.
pub struct InjectHook {
    hook: Hook,
    target: HookTarget,
    method: String,
}

impl InjectHook {
    /// Targets `onCreate(Bundle)` of the given class.
    pub fn new(hook: Hook, target: HookTarget) -> Self {
        InjectHook {
            hook,
            target,
            method: ON_CREATE.to_string(),
        }
    }

    pub fn with_method(mut self, signature: impl Into<String>) -> Self {
        self.method = signature.into();
        self
    }

    fn target_class(&self, tree: &DecompiledTree) -> Result<ObjectIdentifier> {
        match &self.target {
            HookTarget::Class(class) => Ok(class.clone()),
            HookTarget::LaunchActivity => {
                let manifest = PatchTarget::open(tree.manifest_path())?;
                let name = launch_activity(manifest_text(manifest.bytes())?)?
                    .ok_or_else(|| Error::NotFound("launch activity in the manifest".to_string()))?;
                debug!("launch activity is {name}");
                Ok(ObjectIdentifier::from_java_type(&name))
            }
        }
    }
}

impl Patch for InjectHook {
    fn name(&self) -> &str {
        &self.hook.name
    }

    fn apply(&self, tree: &mut DecompiledTree) -> Result<Change> {
        let class = self.target_class(tree)?;
        let path = tree.resolve_class(&class)?.ok_or_else(|| {
            Error::NotFound(format!("smali file for class {}", class.as_java_type()))
        })?;

        let target = PatchTarget::open(&path)?;
        let mut unit = target.unit()?;
        let plan = match InjectionPlanner::new(&self.hook).plan(&unit, &self.method)? {
            Planned::AlreadyApplied { .. } => {
                return Ok(Change::Skipped(format!(
                    "{} already loads {} in {}",
                    class.as_java_type(),
                    self.hook.library,
                    self.method
                )))
            }
            Planned::Insert(plan) => plan,
        };

        plan.apply(&mut unit)
            .map_err(|err| Error::format(&path, err.to_string()))?;
        target.commit(unit.to_smali().as_bytes())?;
        info!(
            "injected {} into {}->{} ({})",
            self.hook.name,
            class.as_java_type(),
            self.method,
            path.display()
        );
        Ok(Change::Applied(format!(
            "{} lines at line {} of {}",
            plan.block.len(),
            plan.offset + 1,
            path.display()
        )))
    }
}

/// Drops `android:extractNativeLibs` from the manifest's `<application>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveExtractNativeLibs;

impl Patch for RemoveExtractNativeLibs {
    fn name(&self) -> &str {
        "remove-extract-native-libs"
    }

    fn apply(&self, tree: &mut DecompiledTree) -> Result<Change> {
        let target = PatchTarget::open(tree.manifest_path())?;
        match remove_extract_native_libs(manifest_text(target.bytes())?)? {
            ManifestEdit::Skipped => Ok(Change::Skipped(
                "manifest does not set extractNativeLibs".to_string(),
            )),
            ManifestEdit::Applied(text) => {
                target.commit(text.as_bytes())?;
                Ok(Change::Applied("removed extractNativeLibs from <application>".to_string()))
            }
        }
    }
}

/// Copies a native library into `lib/<abi>/` of the tree.
#[derive(Debug, Clone)]
pub struct StageNativeLibrary {
    source: PathBuf,
    abi: String,
}

impl StageNativeLibrary {
    pub fn new(source: impl Into<PathBuf>, abi: impl Into<String>) -> Self {
        StageNativeLibrary {
            source: source.into(),
            abi: abi.into(),
        }
    }
}

impl Patch for StageNativeLibrary {
    fn name(&self) -> &str {
        "stage-native-library"
    }

    fn apply(&self, tree: &mut DecompiledTree) -> Result<Change> {
        let file_name = self
            .source
            .file_name()
            .ok_or_else(|| Error::format(&self.source, "not a file path"))?;
        let payload = PatchTarget::open(&self.source)?;
        let dir = tree.native_lib_dir(&self.abi);
        let dest = dir.join(file_name);

        if dest.is_file() && fs::read(&dest)? == payload.bytes() {
            return Ok(Change::Skipped(format!("{} is up to date", dest.display())));
        }
        fs::create_dir_all(&dir)?;
        write_atomic(&dest, payload.bytes())?;
        Ok(Change::Applied(format!("copied {} bytes to {}", payload.bytes().len(), dest.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::MANIFEST_FILE;

    const MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example">
    <application android:extractNativeLibs="false" android:label="x">
        <activity android:name=".MainActivity">
            <intent-filter>
                <action android:name="android.intent.action.MAIN"/>
                <category android:name="android.intent.category.LAUNCHER"/>
            </intent-filter>
        </activity>
    </application>
</manifest>
"#;

    const ACTIVITY: &str = ".class public Lcom/example/MainActivity;
.super Landroid/app/Activity;

.method protected onCreate(Landroid/os/Bundle;)V
    .locals 2

    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V
    return-void
.end method
";

    fn tree() -> (tempfile::TempDir, DecompiledTree) {
        let dir = tempfile::tempdir().unwrap();
        let class_dir = dir.path().join("smali").join("com").join("example");
        fs::create_dir_all(&class_dir).unwrap();
        fs::write(class_dir.join("MainActivity.smali"), ACTIVITY).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        let tree = DecompiledTree::open(dir.path()).unwrap();
        (dir, tree)
    }

    #[test]
    fn uncommitted_targets_leave_no_trace() {
        let (dir, tree) = tree();
        let target = PatchTarget::open(tree.manifest_path()).unwrap();
        drop(target);
        assert_eq!(fs::read_to_string(tree.manifest_path()).unwrap(), MANIFEST);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_commit_discards_the_temporary_file() {
        let (dir, _tree) = tree();
        let blocked = dir.path().join("res");
        fs::create_dir_all(blocked.join("values")).unwrap();
        fs::write(blocked.join("values").join("strings.xml"), "<resources/>").unwrap();

        let err = write_atomic(&blocked, b"replacement").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(blocked.is_dir());
        assert_eq!(fs::read_to_string(blocked.join("values").join("strings.xml")).unwrap(), "<resources/>");

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec![MANIFEST_FILE, "res", "smali"]);
    }

    #[cfg(unix)]
    #[test]
    fn commit_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, tree) = tree();
        let path = tree.manifest_path();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        PatchTarget::open(&path).unwrap().commit(b"<manifest/>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<manifest/>");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[test]
    fn hook_lands_in_the_launch_activity() {
        let (dir, mut tree) = tree();
        let patch = InjectHook::new(Hook::mem_scanner("memscanner"), HookTarget::LaunchActivity);
        assert_eq!(patch.name(), "mem-scanner");

        assert!(matches!(patch.apply(&mut tree).unwrap(), Change::Applied(_)));
        let path = dir.path().join("smali/com/example/MainActivity.smali");
        let once = fs::read_to_string(&path).unwrap();
        assert!(once.contains("    .locals 3\n    # apkmod-hook: mem-scanner\n"));
        assert!(once.contains("const-string v2, \"memscanner\""));

        assert!(matches!(patch.apply(&mut tree).unwrap(), Change::Skipped(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), once);
    }

    #[test]
    fn missing_class_fails() {
        let (_dir, mut tree) = tree();
        let patch = InjectHook::new(
            Hook::mem_scanner("memscanner"),
            HookTarget::Class(ObjectIdentifier::from_java_type("com.example.Missing")),
        );
        assert!(matches!(patch.apply(&mut tree), Err(Error::NotFound(_))));
    }

    #[test]
    fn manifest_patch_is_idempotent() {
        let (_dir, mut tree) = tree();
        assert!(matches!(
            RemoveExtractNativeLibs.apply(&mut tree).unwrap(),
            Change::Applied(_)
        ));
        let text = fs::read_to_string(tree.manifest_path()).unwrap();
        assert_eq!(text, MANIFEST.replace(" android:extractNativeLibs=\"false\"", ""));
        assert!(matches!(
            RemoveExtractNativeLibs.apply(&mut tree).unwrap(),
            Change::Skipped(_)
        ));
    }

    #[test]
    fn stages_native_library_once() {
        let (dir, mut tree) = tree();
        let payload = dir.path().join("libmemscanner.so");
        fs::write(&payload, b"\x7fELF").unwrap();

        let patch = StageNativeLibrary::new(&payload, "arm64-v8a");
        assert!(matches!(patch.apply(&mut tree).unwrap(), Change::Applied(_)));
        let staged = dir.path().join("lib/arm64-v8a/libmemscanner.so");
        assert_eq!(fs::read(&staged).unwrap(), b"\x7fELF");
        assert!(matches!(patch.apply(&mut tree).unwrap(), Change::Skipped(_)));
    }

    #[test]
    fn outcomes_serialize_lowercase() {
        let result = PatchResult {
            name: "mem-scanner".to_string(),
            outcome: PatchOutcome::Skipped,
            diagnostic: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"name":"mem-scanner","outcome":"skipped","diagnostic":null}"#);
    }
}
