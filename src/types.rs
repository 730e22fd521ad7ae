/* Java class identifiers and smali type descriptors. */
/* Identifiers are stored in the smali native (also JNI) form without the L...; wrapper. */

use bitflags::bitflags;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, one_of};
use nom::error::ErrorKind;
use nom::multi::many0;
use nom::sequence::delimited;
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// File extension of smali class files.
pub const SMALI_EXTENSION: &str = "smali";

/// Represents a Java object identifier
///
/// # Examples
///
/// ```
/// use apkmod::types::ObjectIdentifier;
///
/// let o = ObjectIdentifier::from_java_type("com.basic.Test");
/// assert_eq!(o.as_java_type(), "com.basic.Test");
/// assert_eq!(o.as_jni_type(), "Lcom/basic/Test;");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub(crate) class_name: String,
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_jni_type())
    }
}

impl ObjectIdentifier {
    pub fn from_java_type(t: &str) -> ObjectIdentifier {
        ObjectIdentifier {
            class_name: t.trim().replace('.', "/"),
        }
    }

    /// Parses `Lcom/basic/Test;`, returning `None` for anything that is not an object type.
    pub fn from_jni_type(t: &str) -> Option<ObjectIdentifier> {
        match parse_typesignature(t) {
            Ok(("", TypeSignature::Object(o))) => Some(o),
            _ => None,
        }
    }

    pub fn as_jni_type(&self) -> String {
        format!("L{};", self.class_name)
    }

    pub fn as_java_type(&self) -> String {
        self.class_name.replace('/', ".")
    }

    /// Path of this class' smali file relative to a partition root,
    /// e.g. `com/basic/Test.smali`, using the platform separator.
    pub fn smali_path(&self) -> PathBuf {
        let mut path: PathBuf = self.class_name.split('/').collect();
        path.set_extension(SMALI_EXTENSION);
        path
    }
}

/// A Java type as it appears in method descriptors.
///
/// # Examples
///
/// ```
/// use apkmod::types::TypeSignature;
///
/// let t = TypeSignature::Bool;
/// assert_eq!(t.to_jni(), "Z");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSignature {
    Array(Box<TypeSignature>),
    Object(ObjectIdentifier),
    Int,
    Bool,
    Byte,
    Char,
    Short,
    Long,
    Float,
    Double,
    Void,
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_jni())
    }
}

impl TypeSignature {
    pub fn to_jni(&self) -> String {
        match self {
            TypeSignature::Array(a) => "[".to_string() + &a.to_jni(),
            TypeSignature::Object(o) => o.as_jni_type(),
            TypeSignature::Int => "I".to_string(),
            TypeSignature::Bool => "Z".to_string(),
            TypeSignature::Byte => "B".to_string(),
            TypeSignature::Char => "C".to_string(),
            TypeSignature::Short => "S".to_string(),
            TypeSignature::Long => "J".to_string(),
            TypeSignature::Float => "F".to_string(),
            TypeSignature::Double => "D".to_string(),
            TypeSignature::Void => "V".to_string(),
        }
    }

    /// Number of dalvik registers a value of this type occupies.
    pub fn register_width(&self) -> u32 {
        match self {
            TypeSignature::Long | TypeSignature::Double => 2,
            TypeSignature::Void => 0,
            _ => 1,
        }
    }
}

/// A method descriptor: argument types and return type.
///
/// # Examples
///
/// ```
/// use apkmod::types::{MethodSignature, TypeSignature};
///
/// let m = MethodSignature::from_jni("(Landroid/os/Bundle;)V").unwrap();
/// assert_eq!(m.result, TypeSignature::Void);
/// assert_eq!(m.parameter_registers(false), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub args: Vec<TypeSignature>,
    pub result: TypeSignature,
}

impl MethodSignature {
    pub fn from_jni(s: &str) -> Option<MethodSignature> {
        match parse_methodsignature(s) {
            Ok(("", m)) => Some(m),
            _ => None,
        }
    }

    pub fn to_jni(&self) -> String {
        let mut s = String::from("(");
        for t in &self.args {
            s.push_str(&t.to_jni());
        }
        s.push(')');
        s.push_str(&self.result.to_jni());
        s
    }

    /// Registers taken by the incoming arguments, including `this` for instance methods.
    pub fn parameter_registers(&self, is_static: bool) -> u32 {
        let this = if is_static { 0 } else { 1 };
        this + self.args.iter().map(TypeSignature::register_width).sum::<u32>()
    }
}

/// A symbolic reference to a method, as written in invoke instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    /// The class in JNI form, e.g. "Ljava/lang/System;".
    pub class: String,
    pub name: String,
    /// The method descriptor, e.g. "(Ljava/lang/String;)V".
    pub descriptor: String,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ljava/lang/System;->loadLibrary(Ljava/lang/String;)V
        write!(f, "{}->{}{}", self.class, self.name, self.descriptor)
    }
}

bitflags! {
    /// Access flags written as modifier words on `.class`/`.method` lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const BRIDGE = 0x40;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    /// Maps a smali modifier word to its flag, `None` if the word is not a modifier.
    pub fn from_modifier(word: &str) -> Option<AccessFlags> {
        Some(match word {
            "public" => Self::PUBLIC,
            "private" => Self::PRIVATE,
            "protected" => Self::PROTECTED,
            "static" => Self::STATIC,
            "final" => Self::FINAL,
            "synchronized" => Self::SYNCHRONIZED,
            "bridge" => Self::BRIDGE,
            "varargs" => Self::VARARGS,
            "native" => Self::NATIVE,
            "interface" => Self::INTERFACE,
            "abstract" => Self::ABSTRACT,
            "strict" => Self::STRICT,
            "synthetic" => Self::SYNTHETIC,
            "annotation" => Self::ANNOTATION,
            "enum" => Self::ENUM,
            "constructor" => Self::CONSTRUCTOR,
            "declared-synchronized" => Self::DECLARED_SYNCHRONIZED,
            _ => return None,
        })
    }
}

pub(crate) fn parse_typesignature(smali: &str) -> IResult<&str, TypeSignature> {
    // Array
    let b: IResult<&str, char> = char('[')(smali);
    if let Ok((o, _)) = b {
        let (o, t) = parse_typesignature(o)?;
        return Ok((o, TypeSignature::Array(Box::new(t))));
    }

    // Object
    let l: IResult<&str, &str> = tag("L")(smali);
    if let Ok((o, _)) = l {
        let (o, t) = take_while1(|x| x != ';' && x != '(' && x != ')')(o)?;
        let (o, _) = char(';')(o)?;
        let object = ObjectIdentifier {
            class_name: t.to_string(),
        };
        return Ok((o, TypeSignature::Object(object)));
    }

    // Primitive
    let p: IResult<&str, char> = one_of("ZBCSIJFDV")(smali);
    if let Ok((o, t)) = p {
        let ts = match t {
            'Z' => TypeSignature::Bool,
            'B' => TypeSignature::Byte,
            'C' => TypeSignature::Char,
            'S' => TypeSignature::Short,
            'I' => TypeSignature::Int,
            'J' => TypeSignature::Long,
            'F' => TypeSignature::Float,
            'D' => TypeSignature::Double,
            _ => TypeSignature::Void,
        };
        return Ok((o, ts));
    }

    Err(nom::Err::Error(nom::error::Error {
        input: smali,
        code: ErrorKind::Complete,
    }))
}

pub(crate) fn parse_methodsignature(smali: &str) -> IResult<&str, MethodSignature> {
    let (o, args) = delimited(char('('), many0(parse_typesignature), char(')'))(smali)?;
    let (o, result) = parse_typesignature(o)?;
    Ok((o, MethodSignature { args, result }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn object_identifier_round_trip() {
        let o = ObjectIdentifier::from_jni_type("Lcom/basic/Test;").unwrap();
        assert_eq!(o.as_java_type(), "com.basic.Test");
        assert_eq!(o, ObjectIdentifier::from_java_type("com.basic.Test"));
        assert!(ObjectIdentifier::from_jni_type("I").is_none());
    }

    #[test]
    fn smali_path_uses_platform_separators() {
        let o = ObjectIdentifier::from_java_type("com.example.MainActivity");
        assert_eq!(
            o.smali_path(),
            Path::new("com").join("example").join("MainActivity.smali")
        );
        let inner = ObjectIdentifier::from_java_type("a.b$C");
        assert_eq!(inner.smali_path(), Path::new("a").join("b$C.smali"));
    }

    #[test]
    fn method_signature_registers() {
        let m = MethodSignature::from_jni("(IJLjava/lang/String;[D)V").unwrap();
        assert_eq!(m.args.len(), 4);
        assert_eq!(m.parameter_registers(true), 5);
        assert_eq!(m.parameter_registers(false), 6);
        assert_eq!(m.to_jni(), "(IJLjava/lang/String;[D)V");
    }

    #[test]
    fn method_signature_rejects_garbage() {
        assert!(MethodSignature::from_jni("(Lfoo").is_none());
        assert!(MethodSignature::from_jni("()").is_none());
        assert!(MethodSignature::from_jni("()VX").is_none());
    }

    #[test]
    fn modifiers_to_flags() {
        assert_eq!(AccessFlags::from_modifier("static"), Some(AccessFlags::STATIC));
        assert_eq!(AccessFlags::from_modifier("onCreate"), None);
    }
}
