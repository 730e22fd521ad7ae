use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::Result;
use crate::resolve::{DecompiledTree, MANIFEST_FILE};
use crate::tools::{Decompiler, Recompiler, Signer, ToolOutput};

pub const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="no"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <uses-permission android:name="android.permission.INTERNET"/>
    <application android:allowBackup="true" android:extractNativeLibs="false" android:label="@string/app_name">
        <activity android:exported="true" android:name=".MainActivity">
            <intent-filter>
                <action android:name="android.intent.action.MAIN"/>
                <category android:name="android.intent.category.LAUNCHER"/>
            </intent-filter>
        </activity>
    </application>
</manifest>
"#;

pub const MAIN_ACTIVITY: &str = r#".class public Lcom/example/app/MainActivity;
.super Landroid/app/Activity;
.source "MainActivity.java"


# direct methods
.method public constructor <init>()V
    .locals 0

    .line 6
    invoke-direct {p0}, Landroid/app/Activity;-><init>()V

    return-void
.end method


# virtual methods
.method protected onCreate(Landroid/os/Bundle;)V
    .locals 2
    .param p1, "savedInstanceState"    # Landroid/os/Bundle;

    .line 10
    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V

    .line 11
    const v0, 0x7f0b001c

    invoke-virtual {p0, v0}, Lcom/example/app/MainActivity;->setContentView(I)V

    .line 12
    const-string v0, "main"

    const-string v1, "created"

    invoke-static {v0, v1}, Landroid/util/Log;->d(Ljava/lang/String;Ljava/lang/String;)I

    return-void
.end method
"#;

pub const MAIN_ACTIVITY_PATH: &str = "smali_classes2/com/example/app/MainActivity.smali";

/// Lays out a decoded package: the activity lives in the second partition.
pub fn write_tree(root: &Path) {
    let activity = root.join(MAIN_ACTIVITY_PATH);
    fs::create_dir_all(activity.parent().unwrap()).unwrap();
    fs::write(&activity, MAIN_ACTIVITY).unwrap();

    let other = root.join("smali/androidx/core/app/ComponentActivity.smali");
    fs::create_dir_all(other.parent().unwrap()).unwrap();
    fs::write(&other, ".class public Landroidx/core/app/ComponentActivity;\n.super Landroid/app/Activity;\n").unwrap();

    fs::write(root.join(MANIFEST_FILE), MANIFEST).unwrap();
    fs::write(root.join("apktool.yml"), "version: 2.9.3\n").unwrap();
}

pub fn decompiled_tree() -> (tempfile::TempDir, DecompiledTree) {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let tree = DecompiledTree::open(dir.path()).unwrap();
    (dir, tree)
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn ok(lines: &[&str]) -> ToolOutput {
    ToolOutput {
        status: Some(0),
        lines: lines.iter().map(|l| l.to_string()).collect(),
    }
}

fn status(code: i32) -> ToolOutput {
    ToolOutput {
        status: Some(code),
        lines: vec![format!("exit {code}")],
    }
}

/// Stands in for apktool: decoding writes the fixture tree, building zips the
/// manifest and the activity smali so tests can inspect what was built.
#[derive(Default)]
pub struct FakeApktool {
    pub decompile_status: i32,
    pub build_status: i32,
    /// Write something that is not a package archive.
    pub corrupt_build: bool,
    pub builds: RefCell<Vec<PathBuf>>,
}

impl Decompiler for FakeApktool {
    fn decompile(&self, apk: &Path, out_dir: &Path) -> Result<ToolOutput> {
        assert!(apk.is_file(), "decompiling a missing package");
        if self.decompile_status != 0 {
            return Ok(status(self.decompile_status));
        }
        write_tree(out_dir);
        Ok(ok(&["I: Using Apktool 2.9.3", "I: Baksmaling classes.dex..."]))
    }
}

impl Recompiler for FakeApktool {
    fn recompile(&self, tree: &Path, apk: &Path) -> Result<ToolOutput> {
        self.builds.borrow_mut().push(apk.to_path_buf());
        if self.build_status != 0 {
            return Ok(status(self.build_status));
        }
        if self.corrupt_build {
            fs::write(apk, b"truncated")?;
            return Ok(ok(&[]));
        }
        let manifest = fs::read_to_string(tree.join(MANIFEST_FILE))?;
        let smali = fs::read_to_string(tree.join(MAIN_ACTIVITY_PATH))?;
        write_zip(apk, &[("AndroidManifest.xml", manifest.as_str()), ("classes.dex", smali.as_str())]);
        Ok(ok(&["I: Built apk into: out.apk"]))
    }
}

#[derive(Default)]
pub struct RecordingSigner {
    pub signed: RefCell<Vec<PathBuf>>,
}

impl Signer for RecordingSigner {
    fn sign(&self, apk: &Path) -> Result<ToolOutput> {
        self.signed.borrow_mut().push(apk.to_path_buf());
        Ok(ok(&["VERIFY", "signature verified"]))
    }
}

/// Reads one entry of a package archive as text.
pub fn read_entry(apk: &Path, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(File::open(apk).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    std::io::Read::read_to_string(&mut entry, &mut text).unwrap();
    text
}
