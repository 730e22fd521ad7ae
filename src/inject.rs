//! Planning of hook insertions into smali methods.
//!
//! A plan is computed against an immutable [`BytecodeUnit`] and only touches the
//! file when [`InjectionPlan::apply`] is called. The inserted block gets one
//! fresh scratch register: the method's register declaration grows by one and
//! the new register takes the index right after the old locals, so parameter
//! registers move up and nothing live at method entry is overwritten.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::smali_parse::{classify, is_marker, operand_limit, LineKind, SmaliRegister};
use crate::types::MethodRef;
use crate::unit::{BytecodeUnit, MethodDef, RegisterDecl, SmaliError};

/// Lifecycle entry point of an activity, the default injection target.
pub const ON_CREATE: &str = "onCreate(Landroid/os/Bundle;)V";

const SCRATCH_REGISTERS: u32 = 1;
const MAX_FRAME: u32 = 0xffff;
// const-string encodes its destination in 8 bits.
const MAX_CONST_STRING_REGISTER: u32 = 0xff;
const MAX_INVOKE_REGISTER: u32 = 0xf;

/// A native library the instrumented application loads on start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Name used in markers and labels.
    pub name: String,
    /// Library passed to `System.loadLibrary`, without `lib` prefix and `.so` suffix.
    pub library: String,
}

impl Hook {
    pub fn new(name: impl Into<String>, library: impl Into<String>) -> Self {
        Hook {
            name: name.into(),
            library: library.into(),
        }
    }

    /// The memory scanner hook loading `lib<library>.so`.
    pub fn mem_scanner(library: impl Into<String>) -> Self {
        Hook::new("mem-scanner", library)
    }

    pub fn begin_marker(&self) -> String {
        format!("# apkmod-hook: {}", self.name)
    }

    pub fn end_marker(&self) -> String {
        format!("# apkmod-hook-end: {}", self.name)
    }

    fn label_stem(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("apkmod_{name}")
    }

    fn load_library() -> MethodRef {
        MethodRef {
            class: "Ljava/lang/System;".to_string(),
            name: "loadLibrary".to_string(),
            descriptor: "(Ljava/lang/String;)V".to_string(),
        }
    }
}

/// A ready-to-apply insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionPlan {
    /// Signature of the target method.
    pub method: String,
    /// Register declaration before the change.
    pub register_decl: RegisterDecl,
    /// Declared count after the change.
    pub new_register_count: u32,
    /// Line index the block is inserted at.
    pub offset: usize,
    /// Registers written by the block.
    pub scratch: Vec<SmaliRegister>,
    pub block: Vec<String>,
}

/// What the planner decided for a method.
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    Insert(InjectionPlan),
    /// The hook block is already present where it would be inserted.
    AlreadyApplied { method: String, offset: usize },
}

/// Computes where and how a [`Hook`] goes into a method.
pub struct InjectionPlanner<'a> {
    hook: &'a Hook,
}

impl<'a> InjectionPlanner<'a> {
    pub fn new(hook: &'a Hook) -> Self {
        InjectionPlanner { hook }
    }

    /// Plans the injection of the hook at the start of the method `signature`
    /// (`name` + descriptor, e.g. [`ON_CREATE`]).
    pub fn plan(&self, unit: &BytecodeUnit, signature: &str) -> Result<Planned, PlanError> {
        let method = match unit.find_methods(signature).as_slice() {
            [] => return Err(PlanError::NoSuchMethod(signature.to_string())),
            [m] => *m,
            many => {
                return Err(PlanError::AmbiguousEntry {
                    signature: signature.to_string(),
                    count: many.len(),
                })
            }
        };

        let decl = method.registers.ok_or_else(|| {
            PlanError::unsupported(signature, "no register declaration (abstract or native)")
        })?;
        let ins = method
            .parameter_registers()
            .ok_or_else(|| PlanError::unsupported(signature, "malformed descriptor"))?;
        let locals = method.locals().ok_or_else(|| {
            PlanError::unsupported(signature, "declared registers do not cover the parameters")
        })?;

        let lines = unit.lines();
        let offset = prologue_end(lines, method, decl.line, &self.hook.begin_marker());

        if let Some(found) = self.find_marker(lines, method) {
            if found == offset {
                debug!("{signature}: hook {} already present at line {}", self.hook.name, offset + 1);
                return Ok(Planned::AlreadyApplied {
                    method: signature.to_string(),
                    offset,
                });
            }
            return Err(PlanError::unsupported(
                signature,
                format!(
                    "hook marker at line {} but the hook belongs at line {}",
                    found + 1,
                    offset + 1
                ),
            ));
        }

        check_registers(method, signature, locals, ins)?;

        let scratch = locals;
        if scratch > MAX_CONST_STRING_REGISTER {
            return Err(PlanError::unsupported(
                signature,
                format!("scratch register v{scratch} is out of const-string range"),
            ));
        }
        if locals + SCRATCH_REGISTERS + ins > MAX_FRAME {
            return Err(PlanError::unsupported(signature, "frame would exceed 65535 registers"));
        }

        let indent: String = lines[decl.line]
            .chars()
            .take_while(|c| c.is_whitespace())
            .collect();
        let prefix = self.label_prefix(method);
        let block = self.block(&indent, &prefix, scratch);
        debug!(
            "{signature}: inserting {} lines at line {} using v{scratch}",
            block.len(),
            offset + 1
        );

        Ok(Planned::Insert(InjectionPlan {
            method: signature.to_string(),
            register_decl: decl,
            new_register_count: decl.count + SCRATCH_REGISTERS,
            offset,
            scratch: vec![SmaliRegister::Local(scratch as u16)],
            block,
        }))
    }

    fn find_marker(&self, lines: &[String], method: &MethodDef) -> Option<usize> {
        let marker = self.hook.begin_marker();
        (method.start..method.end).find(|&i| is_marker(&lines[i], &marker))
    }

    // Labels are method scoped; bump a numeric suffix until none of ours is taken.
    fn label_prefix(&self, method: &MethodDef) -> String {
        let stem = self.hook.label_stem();
        let taken = |prefix: &str| {
            ["try_start", "try_end", "resume"]
                .iter()
                .any(|suffix| method.symbols.labels.contains(&format!("{prefix}_{suffix}")))
        };
        if !taken(&stem) {
            return stem;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{stem}_{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn block(&self, indent: &str, prefix: &str, scratch: u32) -> Vec<String> {
        let library = self.hook.library.replace('\\', "\\\\").replace('"', "\\\"");
        let load = Hook::load_library();
        let invoke = if scratch <= MAX_INVOKE_REGISTER {
            format!("invoke-static {{v{scratch}}}, {load}")
        } else {
            format!("invoke-static/range {{v{scratch} .. v{scratch}}}, {load}")
        };

        vec![
            self.hook.begin_marker(),
            format!(":{prefix}_try_start"),
            format!("const-string v{scratch}, \"{library}\""),
            invoke,
            format!(":{prefix}_try_end"),
            format!(
                ".catch Ljava/lang/UnsatisfiedLinkError; {{:{prefix}_try_start .. :{prefix}_try_end}} :{prefix}_resume"
            ),
            format!(":{prefix}_resume"),
            self.hook.end_marker(),
        ]
        .into_iter()
        .map(|line| format!("{indent}{line}"))
        .collect()
    }
}

impl InjectionPlan {
    /// Writes the plan into the unit.
    pub fn apply(&self, unit: &mut BytecodeUnit) -> Result<(), SmaliError> {
        let decl = self.register_decl;
        let indent: String = unit
            .lines()
            .get(decl.line)
            .map(|l| l.chars().take_while(|c| c.is_whitespace()).collect())
            .unwrap_or_default();
        unit.replace_line(
            decl.line,
            format!("{indent}{} {}", decl.kind.directive(), self.new_register_count),
        )?;
        unit.insert_lines(self.offset, self.block.clone())
    }
}

// First line after the register declaration and the method prologue:
// method annotations, `.param` lines and blocks, `.prologue`.
fn prologue_end(lines: &[String], method: &MethodDef, decl_line: usize, marker: &str) -> usize {
    let mut offset = decl_line + 1;
    let mut i = offset;

    while i < method.end {
        if is_marker(&lines[i], marker) {
            break;
        }
        match classify(&lines[i]) {
            LineKind::Blank | LineKind::Comment => i += 1,
            LineKind::Directive("annotation") => {
                i = skip_to(lines, i, method.end, ".end annotation") + 1;
                offset = i;
            }
            LineKind::Directive("param") => {
                i = param_block_end(lines, i, method.end) + 1;
                offset = i;
            }
            LineKind::Directive("prologue") => {
                i += 1;
                offset = i;
            }
            _ => break,
        }
    }

    offset
}

fn skip_to(lines: &[String], from: usize, limit: usize, end: &str) -> usize {
    (from..limit)
        .find(|&i| lines[i].trim().starts_with(end))
        .unwrap_or(from)
}

// A `.param` is either a single line or opens a block of annotations closed by `.end param`.
fn param_block_end(lines: &[String], start: usize, limit: usize) -> usize {
    let mut i = start + 1;
    while i < limit {
        match classify(&lines[i]) {
            LineKind::Blank => i += 1,
            LineKind::Directive("annotation") => i = skip_to(lines, i, limit, ".end annotation") + 1,
            LineKind::Directive("end") if lines[i].trim().starts_with(".end param") => return i,
            _ => break,
        }
    }
    start
}

fn check_registers(
    method: &MethodDef,
    signature: &str,
    locals: u32,
    ins: u32,
) -> Result<(), PlanError> {
    // A range from a local into the parameters would grow by the scratch register.
    let registers = &method.symbols.registers;
    for (i, usage) in registers.iter().enumerate() {
        if !usage.opcode.ends_with("/range") || !matches!(usage.register, SmaliRegister::Local(_)) {
            continue;
        }
        let crosses = registers[i + 1..]
            .iter()
            .take_while(|other| other.line == usage.line)
            .any(|other| matches!(other.register, SmaliRegister::Parameter(_)));
        if crosses {
            return Err(PlanError::unsupported(
                signature,
                format!(
                    "line {}: `{}` spans locals and parameters",
                    usage.line + 1,
                    usage.opcode
                ),
            ));
        }
    }

    for usage in registers {
        match usage.register {
            SmaliRegister::Local(n) if u32::from(n) >= locals => {
                return Err(PlanError::unsupported(
                    signature,
                    format!(
                        "line {}: v{n} addresses a parameter register by its frame index",
                        usage.line + 1
                    ),
                ));
            }
            SmaliRegister::Parameter(n) if u32::from(n) >= ins => {
                return Err(PlanError::unsupported(
                    signature,
                    format!("line {}: p{n} is not a parameter of this method", usage.line + 1),
                ));
            }
            SmaliRegister::Parameter(n) => {
                let shifted = locals + SCRATCH_REGISTERS + u32::from(n);
                let limit = operand_limit(&usage.opcode);
                if shifted > limit {
                    return Err(PlanError::unsupported(
                        signature,
                        format!(
                            "line {}: p{n} would move to v{shifted}, beyond what `{}` can encode",
                            usage.line + 1,
                            usage.opcode
                        ),
                    ));
                }
            }
            SmaliRegister::Local(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smali_parse::RegisterKind;

    fn activity(body: &str) -> String {
        format!(
            ".class public Lcom/example/MainActivity;\n.super Landroid/app/Activity;\n\n\
             .method protected onCreate(Landroid/os/Bundle;)V\n{body}.end method\n"
        )
    }

    fn plan(smali: &str) -> Result<Planned, PlanError> {
        let unit = BytecodeUnit::from_smali(smali).unwrap();
        InjectionPlanner::new(&Hook::mem_scanner("memscanner")).plan(&unit, ON_CREATE)
    }

    fn insert(smali: &str) -> InjectionPlan {
        match plan(smali).unwrap() {
            Planned::Insert(p) => p,
            other => panic!("expected an insertion, got {other:?}"),
        }
    }

    #[test]
    fn inserts_right_after_register_declaration() {
        let smali = activity(
            "    .locals 2\n    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V\n    return-void\n",
        );
        let p = insert(&smali);
        assert_eq!(p.register_decl.line, 4);
        assert_eq!(p.register_decl.kind, RegisterKind::Locals);
        assert_eq!(p.offset, 5);
        assert_eq!(p.new_register_count, 3);
        assert_eq!(p.scratch, vec![SmaliRegister::Local(2)]);
        assert!(p.block.iter().any(|l| l.trim() == "const-string v2, \"memscanner\""));
        assert!(p
            .block
            .iter()
            .any(|l| l.trim() == "invoke-static {v2}, Ljava/lang/System;->loadLibrary(Ljava/lang/String;)V"));
    }

    #[test]
    fn skips_parameter_and_annotation_prologue() {
        let smali = activity(
            "    .locals 1\n    .annotation build Landroid/annotation/SuppressLint;\n        value = {\n            \"x\"\n        }\n    .end annotation\n\n    .param p1, \"savedInstanceState\"    # Landroid/os/Bundle;\n\n    .line 12\n    return-void\n",
        );
        let p = insert(&smali);
        let unit = BytecodeUnit::from_smali(&smali).unwrap();
        assert!(unit.lines()[p.offset - 1].trim().starts_with(".param p1"));
    }

    #[test]
    fn skips_param_blocks() {
        let smali = activity(
            "    .locals 0\n    .param p1    # Landroid/os/Bundle;\n        .annotation runtime Landroidx/annotation/Nullable;\n        .end annotation\n    .end param\n    .prologue\n    return-void\n",
        );
        let p = insert(&smali);
        let unit = BytecodeUnit::from_smali(&smali).unwrap();
        assert_eq!(unit.lines()[p.offset - 1].trim(), ".prologue");
        assert_eq!(unit.lines()[p.offset].trim(), "return-void");
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let smali = activity("    .locals 2\n    return-void\n");
        let mut unit = BytecodeUnit::from_smali(&smali).unwrap();
        let hook = Hook::mem_scanner("memscanner");
        let planner = InjectionPlanner::new(&hook);

        match planner.plan(&unit, ON_CREATE).unwrap() {
            Planned::Insert(p) => p.apply(&mut unit).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
        let once = unit.to_smali();
        assert!(once.contains("    .locals 3\n    # apkmod-hook: mem-scanner\n"));

        match planner.plan(&unit, ON_CREATE).unwrap() {
            Planned::AlreadyApplied { offset, .. } => assert_eq!(offset, 5),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(unit.to_smali(), once);

        let reparsed = BytecodeUnit::from_smali(&once).unwrap();
        let method = reparsed.find_methods(ON_CREATE)[0];
        assert_eq!(method.locals(), Some(3));
        assert!(method.symbols.labels.contains("apkmod_mem_scanner_try_start"));
    }

    #[test]
    fn misplaced_marker_is_rejected() {
        let smali = activity("    .locals 1\n    return-void\n    # apkmod-hook: mem-scanner\n");
        assert!(matches!(plan(&smali), Err(PlanError::UnsupportedBody { .. })));
    }

    #[test]
    fn label_collisions_get_a_suffix() {
        let smali = activity("    .locals 0\n    :apkmod_mem_scanner_resume\n    return-void\n");
        let p = insert(&smali);
        assert!(p.block.iter().any(|l| l.trim() == ":apkmod_mem_scanner_1_try_start"));
        assert!(!p.block.iter().any(|l| l.trim() == ":apkmod_mem_scanner_resume"));
    }

    #[test]
    fn registers_form_allocates_after_locals() {
        // 2 parameter registers (this, bundle), so 3 locals.
        let smali = activity("    .registers 5\n    return-void\n");
        let p = insert(&smali);
        assert_eq!(p.scratch, vec![SmaliRegister::Local(3)]);
        assert_eq!(p.new_register_count, 6);
    }

    #[test]
    fn missing_or_duplicate_methods() {
        let smali = ".class La;\n.method public f()V\n    .locals 0\n    return-void\n.end method\n";
        assert_eq!(plan(smali), Err(PlanError::NoSuchMethod(ON_CREATE.to_string())));

        let twice = format!("{}{}", activity("    .locals 0\n    return-void\n"), ".method protected onCreate(Landroid/os/Bundle;)V\n    .locals 0\n    return-void\n.end method\n");
        assert!(matches!(plan(&twice), Err(PlanError::AmbiguousEntry { count: 2, .. })));
    }

    #[test]
    fn bodies_without_frame_are_unsupported() {
        let smali = ".class public abstract La;\n.method protected abstract onCreate(Landroid/os/Bundle;)V\n.end method\n";
        assert!(matches!(plan(smali), Err(PlanError::UnsupportedBody { .. })));
    }

    #[test]
    fn v_named_parameters_are_unsupported() {
        // v2 is `this` in a frame of 2 locals.
        let smali = activity("    .locals 2\n    invoke-super {v2, v3}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V\n    return-void\n");
        assert!(matches!(plan(&smali), Err(PlanError::UnsupportedBody { .. })));
    }

    #[test]
    fn ranges_from_locals_into_parameters_are_unsupported() {
        let smali = activity("    .locals 2\n    invoke-static/range {v0 .. p1}, La;->f(IIII)V\n    return-void\n");
        match plan(&smali) {
            Err(PlanError::UnsupportedBody { reason, .. }) => assert!(reason.contains("spans locals and parameters")),
            other => panic!("unexpected {other:?}"),
        }

        // Ranges that stay on one side of the boundary are fine.
        let smali = activity("    .locals 2\n    invoke-static/range {v0 .. v1}, La;->f(II)V\n    invoke-static/range {p0 .. p1}, La;->g(II)V\n    return-void\n");
        assert!(matches!(plan(&smali), Ok(Planned::Insert(_))));
    }

    #[test]
    fn shifted_parameters_must_fit_their_operands() {
        let call = "    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V\n    return-void\n";
        // p1 lands on v15: still a valid 4-bit operand.
        assert!(matches!(plan(&activity(&format!("    .locals 13\n{call}"))), Ok(Planned::Insert(_))));
        // p1 would land on v16.
        assert!(matches!(
            plan(&activity(&format!("    .locals 14\n{call}"))),
            Err(PlanError::UnsupportedBody { .. })
        ));
    }

    #[test]
    fn high_scratch_uses_range_invoke() {
        let smali = ".class La;\n.method public static onCreate(Landroid/os/Bundle;)V\n    .locals 20\n    return-void\n.end method\n";
        let p = insert(smali);
        assert_eq!(p.scratch, vec![SmaliRegister::Local(20)]);
        assert!(p.block.iter().any(|l| l.trim().starts_with("invoke-static/range {v20 .. v20}")));
    }
}
