//! Line-preserving model of one smali file.
//!
//! The unit keeps the file as the exact sequence of lines it was read from, so
//! writing it back without changes reproduces the input byte for byte. On top
//! of the lines it indexes method boundaries, register declarations and a
//! per-method symbol table used to plan insertions that do not collide with
//! what is already there.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::smali_parse::{
    classify, parse_method_header, parse_register_decl, register_refs, LineKind, RegisterKind,
    SmaliRegister,
};
use crate::types::{AccessFlags, MethodSignature, ObjectIdentifier};

/// Structural problem found while indexing a smali file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {details}")]
pub struct SmaliError {
    /// One-based line number.
    pub line: usize,
    pub details: String,
}

impl SmaliError {
    fn new(index: usize, details: impl Into<String>) -> Self {
        SmaliError {
            line: index + 1,
            details: details.into(),
        }
    }
}

/// The `.locals`/`.registers` declaration of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDecl {
    /// Line index of the directive.
    pub line: usize,
    pub kind: RegisterKind,
    pub count: u32,
}

/// One register operand and where it was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterUse {
    pub line: usize,
    pub register: SmaliRegister,
    /// Instruction mnemonic, or the directive (with its dot) for debug directives.
    pub opcode: String,
}

/// Labels and register operands of one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSymbols {
    pub labels: BTreeSet<String>,
    pub registers: Vec<RegisterUse>,
}

/// A method's position and declaration inside the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: String,
    pub flags: AccessFlags,
    /// Line index of `.method`.
    pub start: usize,
    /// Line index of `.end method`.
    pub end: usize,
    pub registers: Option<RegisterDecl>,
    pub symbols: MethodSymbols,
}

impl MethodDef {
    /// `name` + descriptor, e.g. `onCreate(Landroid/os/Bundle;)V`.
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    /// Registers taken by incoming arguments, `None` if the descriptor is malformed.
    pub fn parameter_registers(&self) -> Option<u32> {
        MethodSignature::from_jni(&self.descriptor).map(|m| m.parameter_registers(self.is_static()))
    }

    /// Number of local (non-parameter) registers in the frame.
    pub fn locals(&self) -> Option<u32> {
        let decl = self.registers?;
        match decl.kind {
            RegisterKind::Locals => Some(decl.count),
            RegisterKind::Registers => decl.count.checked_sub(self.parameter_registers()?),
        }
    }
}

/// An editable smali file.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeUnit {
    lines: Vec<String>,
    line_ending: &'static str,
    trailing_newline: bool,
    class: Option<ObjectIdentifier>,
    methods: Vec<MethodDef>,
}

impl BytecodeUnit {
    /// Indexes a smali document.
    ///
    /// # Examples
    ///
    /// ```
    /// use apkmod::unit::BytecodeUnit;
    ///
    /// let smali = ".class public Lcom/a/B;\n.super Ljava/lang/Object;\n";
    /// let unit = BytecodeUnit::from_smali(smali).unwrap();
    /// assert_eq!(unit.class().unwrap().as_java_type(), "com.a.B");
    /// assert_eq!(unit.to_smali(), smali);
    /// ```
    pub fn from_smali(text: &str) -> Result<BytecodeUnit, SmaliError> {
        let line_ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = text.ends_with('\n');
        let mut lines: Vec<String> = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        if trailing_newline || text.is_empty() {
            lines.pop();
        }

        let mut unit = BytecodeUnit {
            lines,
            line_ending,
            trailing_newline,
            class: None,
            methods: vec![],
        };
        unit.reindex()?;
        Ok(unit)
    }

    pub fn to_smali(&self) -> String {
        let mut out = self.lines.join(self.line_ending);
        if self.trailing_newline {
            out.push_str(self.line_ending);
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn class(&self) -> Option<&ObjectIdentifier> {
        self.class.as_ref()
    }

    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    /// Every method whose `name + descriptor` equals `signature`.
    pub fn find_methods(&self, signature: &str) -> Vec<&MethodDef> {
        self.methods
            .iter()
            .filter(|m| m.signature() == signature)
            .collect()
    }

    /// Replaces one line and re-indexes.
    pub fn replace_line(&mut self, at: usize, line: String) -> Result<(), SmaliError> {
        let slot = self
            .lines
            .get_mut(at)
            .ok_or_else(|| SmaliError::new(at, "line index out of range"))?;
        *slot = line;
        self.reindex()
    }

    /// Inserts `new_lines` before line `at` and re-indexes.
    pub fn insert_lines(&mut self, at: usize, new_lines: Vec<String>) -> Result<(), SmaliError> {
        if at > self.lines.len() {
            return Err(SmaliError::new(at, "insertion point out of range"));
        }
        self.lines.splice(at..at, new_lines);
        self.reindex()
    }

    fn reindex(&mut self) -> Result<(), SmaliError> {
        self.class = None;
        self.methods.clear();
        let mut current: Option<MethodDef> = None;
        let mut skip_until: Option<&'static str> = None;

        for (idx, line) in self.lines.iter().enumerate() {
            let trimmed = line.trim();

            if let Some(end) = skip_until {
                if trimmed.starts_with(end) {
                    skip_until = None;
                }
                continue;
            }

            match classify(line) {
                LineKind::Directive("class") if current.is_none() => {
                    let name = trimmed.split_whitespace().last().unwrap_or_default();
                    self.class = ObjectIdentifier::from_jni_type(name);
                }
                LineKind::Directive("method") => {
                    if current.is_some() {
                        return Err(SmaliError::new(idx, "`.method` inside another method"));
                    }
                    let (_, header) = parse_method_header(line)
                        .map_err(|_| SmaliError::new(idx, "malformed `.method` line"))?;
                    current = Some(MethodDef {
                        name: header.name.to_string(),
                        descriptor: header.descriptor.to_string(),
                        flags: header.flags,
                        start: idx,
                        end: idx,
                        registers: None,
                        symbols: MethodSymbols::default(),
                    });
                }
                LineKind::Directive("end") if trimmed.starts_with(".end method") => {
                    let mut method = current
                        .take()
                        .ok_or_else(|| SmaliError::new(idx, "`.end method` without `.method`"))?;
                    method.end = idx;
                    self.methods.push(method);
                }
                LineKind::Directive(directive @ ("locals" | "registers")) => {
                    let method = current.as_mut().ok_or_else(|| {
                        SmaliError::new(idx, format!("`.{directive}` outside a method"))
                    })?;
                    if method.registers.is_some() {
                        return Err(SmaliError::new(idx, "duplicate register declaration"));
                    }
                    let (_, (kind, count)) = parse_register_decl(line)
                        .map_err(|_| SmaliError::new(idx, "malformed register declaration"))?;
                    method.registers = Some(RegisterDecl {
                        line: idx,
                        kind,
                        count,
                    });
                }
                LineKind::Directive("annotation") => skip_until = Some(".end annotation"),
                LineKind::Directive("array-data") => skip_until = Some(".end array-data"),
                LineKind::Directive("packed-switch") => skip_until = Some(".end packed-switch"),
                LineKind::Directive("sparse-switch") => skip_until = Some(".end sparse-switch"),
                LineKind::Directive(directive @ ("local" | "param" | "restart" | "end")) => {
                    if let Some(method) = current.as_mut() {
                        record_registers(method, idx, line, &format!(".{directive}"));
                    }
                }
                LineKind::Label(label) => {
                    if let Some(method) = current.as_mut() {
                        method.symbols.labels.insert(label.to_string());
                    }
                }
                LineKind::Instruction(mnemonic) => {
                    let method = current
                        .as_mut()
                        .ok_or_else(|| SmaliError::new(idx, "instruction outside a method"))?;
                    record_registers(method, idx, line, mnemonic);
                }
                _ => {}
            }
        }

        if let Some(method) = current {
            return Err(SmaliError::new(
                method.start,
                format!("method {} is missing `.end method`", method.signature()),
            ));
        }
        if let Some(end) = skip_until {
            return Err(SmaliError::new(self.lines.len(), format!("missing `{end}`")));
        }
        Ok(())
    }
}

fn record_registers(method: &mut MethodDef, idx: usize, line: &str, opcode: &str) {
    for register in register_refs(line) {
        method.symbols.registers.push(RegisterUse {
            line: idx,
            register,
            opcode: opcode.to_string(),
        });
    }
}

impl fmt::Display for BytecodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_smali())
    }
}
