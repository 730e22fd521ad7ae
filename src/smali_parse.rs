use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{digit1, space0, space1};
use nom::combinator::{map_opt, map_res, opt, rest};
use nom::multi::many0;
use nom::sequence::{preceded, terminated};
use nom::IResult;

use crate::types::AccessFlags;

/// How a method declares its frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// `.locals N`: N local registers, parameters come on top.
    Locals,
    /// `.registers N`: N registers in total, parameters included.
    Registers,
}

impl RegisterKind {
    pub fn directive(&self) -> &'static str {
        match self {
            RegisterKind::Locals => ".locals",
            RegisterKind::Registers => ".registers",
        }
    }
}

/// A register operand as written in smali.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SmaliRegister {
    Local(u16),
    Parameter(u16),
}

/// The `.method` line broken into its parts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MethodHeader<'a> {
    pub flags: AccessFlags,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Coarse classification of a smali line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LineKind<'a> {
    Blank,
    Comment,
    Label(&'a str),
    /// A dot-directive, carrying its name without the dot (`end` for `.end x`).
    Directive(&'a str),
    Instruction(&'a str),
}

// A helper function to determine valid characters for a label.
fn is_label_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace()
}

pub(crate) fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with('#') {
        return LineKind::Comment;
    }
    if let Ok((_, label)) = parse_label(trimmed) {
        return LineKind::Label(label);
    }
    let word = trimmed.split_whitespace().next().unwrap_or(trimmed);
    match word.strip_prefix('.') {
        Some(directive) => LineKind::Directive(directive),
        None => LineKind::Instruction(word),
    }
}

/// Parse a label definition such as ":cond_0", returning the name without the colon.
pub(crate) fn parse_label(input: &str) -> IResult<&str, &str> {
    preceded(tag(":"), take_while1(is_label_char))(input)
}

fn parse_modifier(input: &str) -> IResult<&str, AccessFlags> {
    map_opt(take_while1(is_word_char), AccessFlags::from_modifier)(input)
}

/// Parses `.method public static foo(I)V`.
pub(crate) fn parse_method_header(line: &str) -> IResult<&str, MethodHeader<'_>> {
    let (input, _) = preceded(space0, tag(".method"))(line)?;
    let (input, _) = space1(input)?;
    let (input, modifiers) = many0(terminated(parse_modifier, space1))(input)?;
    let (input, name) = take_while1(|c: char| c != '(' && !c.is_whitespace())(input)?;
    let (input, descriptor) = take_while1(is_word_char)(input)?;
    let (input, _) = space0(input)?;

    let flags = modifiers
        .into_iter()
        .fold(AccessFlags::empty(), |acc, f| acc | f);
    Ok((
        input,
        MethodHeader {
            flags,
            name,
            descriptor,
        },
    ))
}

/// Parses `.locals 3` or `.registers 5`.
pub(crate) fn parse_register_decl(line: &str) -> IResult<&str, (RegisterKind, u32)> {
    let (input, _) = space0(line)?;
    let (input, directive) = alt((tag(".locals"), tag(".registers")))(input)?;
    let (input, _) = space1(input)?;
    let (input, count) = map_res(digit1, str::parse::<u32>)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = opt(preceded(tag("#"), rest))(input)?;

    let kind = if directive == ".locals" {
        RegisterKind::Locals
    } else {
        RegisterKind::Registers
    };
    Ok((input, (kind, count)))
}

fn parse_register(input: &str) -> IResult<&str, SmaliRegister> {
    let (o, kind) = alt((tag("v"), tag("p")))(input)?;
    let (o, n) = map_res(digit1, str::parse::<u16>)(o)?;
    let reg = if kind == "v" {
        SmaliRegister::Local(n)
    } else {
        SmaliRegister::Parameter(n)
    };
    Ok((o, reg))
}

fn opens_operand(c: char) -> bool {
    c == ' ' || c == '\t' || c == '{' || c == ','
}

fn closes_operand(c: char) -> bool {
    c == ' ' || c == '\t' || c == '}' || c == ','
}

/// Collects the register operands of one line. String literals and trailing
/// comments are skipped; identifiers that merely contain `v1` are not matches.
pub(crate) fn register_refs(line: &str) -> Vec<SmaliRegister> {
    let mut refs = vec![];
    let mut in_string = false;
    let mut escaped = false;
    let mut prev: Option<char> = None;

    for (idx, c) in line.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            prev = Some(c);
            continue;
        }
        match c {
            '"' => in_string = true,
            '#' => break,
            'v' | 'p' if prev.map_or(true, opens_operand) => {
                if let Ok((rest, reg)) = parse_register(&line[idx..]) {
                    if rest.chars().next().map_or(true, closes_operand) {
                        refs.push(reg);
                    }
                }
            }
            _ => {}
        }
        prev = Some(c);
    }

    refs
}

/// Largest register index an instruction can encode in its register operands.
///
/// Only the mnemonic is inspected, so the answer is the narrowest operand of the
/// format. Directives are not bounded by an instruction format.
pub(crate) fn operand_limit(mnemonic: &str) -> u32 {
    const NIBBLE: u32 = 0xf;
    const BYTE: u32 = 0xff;
    const WIDE: u32 = 0xffff;

    if mnemonic.starts_with('.')
        || mnemonic.ends_with("/range")
        || (mnemonic.starts_with("move") && mnemonic.ends_with("/16"))
    {
        return WIDE;
    }
    if mnemonic.starts_with("invoke-")
        || mnemonic == "filled-new-array"
        || mnemonic.ends_with("/2addr")
        || mnemonic.ends_with("/lit16")
        || mnemonic == "const/4"
        || mnemonic == "array-length"
        || mnemonic == "instance-of"
        || mnemonic == "new-array"
        || mnemonic.starts_with("iget")
        || mnemonic.starts_with("iput")
        || mnemonic.starts_with("neg-")
        || mnemonic.starts_with("not-")
        || mnemonic.contains("-to-")
        || matches!(mnemonic, "move" | "move-wide" | "move-object")
    {
        return NIBBLE;
    }
    if let Some(cond) = mnemonic.strip_prefix("if-") {
        if !cond.ends_with('z') {
            return NIBBLE;
        }
    }
    BYTE
}

/// True when `line` is exactly the given comment marker, ignoring indentation.
pub(crate) fn is_marker(line: &str, marker: &str) -> bool {
    line.trim() == marker
}
