use std::fs;

use super::fixtures::{decompiled_tree, MAIN_ACTIVITY, MAIN_ACTIVITY_PATH, MANIFEST};
use crate::engine::{EngineOptions, PatchEngine};
use crate::inject::{Hook, InjectionPlanner, Planned, ON_CREATE};
use crate::patch::{HookTarget, InjectHook, Patch, PatchOutcome, RemoveExtractNativeLibs, StageNativeLibrary};
use crate::resolve::{FsView, PathResolver};
use crate::types::ObjectIdentifier;
use crate::unit::BytecodeUnit;
use crate::SmaliRegister;

fn standard_patches() -> Vec<Box<dyn Patch>> {
    vec![
        Box::new(InjectHook::new(Hook::mem_scanner("memscanner"), HookTarget::LaunchActivity)),
        Box::new(RemoveExtractNativeLibs),
    ]
}

#[test]
fn resolves_launch_activity_in_second_partition() {
    let (dir, _tree) = decompiled_tree();
    let class = ObjectIdentifier::from_java_type("com.example.app.MainActivity");
    let found = PathResolver::new(FsView).resolve(&class, dir.path()).unwrap();
    assert_eq!(found, Some(dir.path().join(MAIN_ACTIVITY_PATH)));

    let missing = ObjectIdentifier::from_java_type("com.example.app.Gone");
    assert_eq!(PathResolver::new(FsView).resolve(&missing, dir.path()).unwrap(), None);
}

#[test]
fn plan_for_minimal_activity() {
    let unit = BytecodeUnit::from_smali(MAIN_ACTIVITY).unwrap();
    let hook = Hook::mem_scanner("memscanner");
    let plan = match InjectionPlanner::new(&hook).plan(&unit, ON_CREATE).unwrap() {
        Planned::Insert(plan) => plan,
        other => panic!("unexpected {other:?}"),
    };

    // Right after `.locals 2` and its `.param` line.
    assert_eq!(unit.lines()[plan.register_decl.line].trim(), ".locals 2");
    assert_eq!(plan.offset, plan.register_decl.line + 2);
    assert_eq!(plan.register_decl.count, 2);
    assert_eq!(plan.new_register_count, 3);
    for register in &plan.scratch {
        match register {
            SmaliRegister::Local(n) => assert!(*n >= 2),
            SmaliRegister::Parameter(_) => panic!("hook writes a parameter register"),
        }
    }
}

#[test]
fn patching_twice_equals_patching_once() {
    let (dir, mut tree) = decompiled_tree();
    let engine = PatchEngine::default();

    let first = engine.apply_all(&mut tree, &standard_patches());
    assert!(first.iter().all(|r| r.outcome == PatchOutcome::Applied), "{first:?}");
    let smali_once = fs::read(dir.path().join(MAIN_ACTIVITY_PATH)).unwrap();
    let manifest_once = fs::read(tree.manifest_path()).unwrap();

    let second = engine.apply_all(&mut tree, &standard_patches());
    assert!(second.iter().all(|r| r.outcome == PatchOutcome::Skipped), "{second:?}");
    assert_eq!(fs::read(dir.path().join(MAIN_ACTIVITY_PATH)).unwrap(), smali_once);
    assert_eq!(fs::read(tree.manifest_path()).unwrap(), manifest_once);

    let smali = String::from_utf8(smali_once).unwrap();
    assert_eq!(smali.matches("# apkmod-hook: mem-scanner").count(), 1);
    assert!(smali.contains("    .locals 3\n"));
    // Every original line survives, in order.
    let mut patched = smali.lines();
    for line in MAIN_ACTIVITY.lines().filter(|l| l.trim() != ".locals 2") {
        assert!(patched.any(|p| p == line), "lost line {line:?}");
    }

    let manifest = String::from_utf8(manifest_once).unwrap();
    assert_eq!(manifest, MANIFEST.replace(" android:extractNativeLibs=\"false\"", ""));
}

#[test]
fn failure_stops_later_patches() {
    let (dir, mut tree) = decompiled_tree();
    let payload = dir.path().join("libmemscanner.so");
    fs::write(&payload, b"\x7fELF").unwrap();

    let patches: Vec<Box<dyn Patch>> = vec![
        Box::new(RemoveExtractNativeLibs),
        Box::new(InjectHook::new(
            Hook::mem_scanner("memscanner"),
            HookTarget::Class(ObjectIdentifier::from_java_type("com.example.app.Missing")),
        )),
        Box::new(StageNativeLibrary::new(&payload, "arm64-v8a")),
    ];

    let results = PatchEngine::default().apply_all(&mut tree, &patches);
    let outcomes: Vec<_> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![PatchOutcome::Applied, PatchOutcome::Failed]);
    assert_eq!(results[1].name, "mem-scanner");
    assert!(results[1].diagnostic.as_deref().unwrap().contains("com.example.app.Missing"));

    // The tree is as the first patch left it.
    assert!(!dir.path().join("lib").exists());
    assert!(!fs::read_to_string(tree.manifest_path()).unwrap().contains("extractNativeLibs"));
    assert_eq!(fs::read_to_string(dir.path().join(MAIN_ACTIVITY_PATH)).unwrap(), MAIN_ACTIVITY);

    let results = PatchEngine::new(EngineOptions { fail_fast: false }).apply_all(&mut tree, &patches);
    let outcomes: Vec<_> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![PatchOutcome::Skipped, PatchOutcome::Failed, PatchOutcome::Applied]
    );
}

#[test]
fn unsupported_body_leaves_file_untouched() {
    let (dir, mut tree) = decompiled_tree();
    let path = dir.path().join(MAIN_ACTIVITY_PATH);
    // `this` addressed as v2 in a two-local frame.
    let tricky = MAIN_ACTIVITY.replace("invoke-virtual {p0, v0}", "invoke-virtual {v2, v0}");
    fs::write(&path, &tricky).unwrap();

    let results = PatchEngine::default().apply_all(&mut tree, &standard_patches());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, PatchOutcome::Failed);
    assert_eq!(fs::read_to_string(&path).unwrap(), tricky);
}
