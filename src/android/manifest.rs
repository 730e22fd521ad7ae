//! Queries and minimal edits on a decoded (text) `AndroidManifest.xml`.
//!
//! Edits are textual: the document is parsed with quick-xml to validate it and
//! to find the byte span of the element being changed, then only that span is
//! rewritten. Formatting, comments and attribute order elsewhere survive
//! unchanged.

use std::collections::BTreeMap;
use std::ops::Range;
use std::str;

use log::debug;
use nom::branch::alt;
use nom::bytes::complete::{take_until, take_while1};
use nom::character::complete::{char, multispace0, multispace1};
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

pub const ANDROID_NAMESPACE_URI: &str = "http://schemas.android.com/apk/res/android";

/// Attribute that, set to false, makes the installer leave native libraries
/// inside the package. Rebuilt packages do not satisfy its alignment rules.
pub const EXTRACT_NATIVE_LIBS: &str = "extractNativeLibs";

const DEFAULT_ANDROID_PREFIX: &str = "android";
const ACTION_MAIN: &str = "android.intent.action.MAIN";
const CATEGORY_LAUNCHER: &str = "android.intent.category.LAUNCHER";

// Chunk type RES_XML_TYPE, little endian.
const BINARY_XML_MAGIC: [u8; 2] = [0x03, 0x00];

/// Result of a manifest edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEdit {
    /// The new document text.
    Applied(String),
    /// Nothing to change; the document is left as is.
    Skipped,
}

/// Checks that manifest bytes are decoded text XML and returns them as a string.
pub fn manifest_text(bytes: &[u8]) -> Result<&str> {
    if bytes.starts_with(&BINARY_XML_MAGIC) {
        return Err(malformed("manifest is binary XML, decode the package resources first"));
    }
    str::from_utf8(bytes).map_err(|err| malformed(format!("manifest is not UTF-8: {err}")))
}

/// Removes `android:extractNativeLibs` from the `<application>` element.
///
/// # Examples
///
/// ```
/// use apkmod::android::manifest::{remove_extract_native_libs, ManifestEdit};
///
/// let xml = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="a.b">
///   <application android:label="x" android:extractNativeLibs="false"/>
/// </manifest>"#;
/// let edit = remove_extract_native_libs(xml).unwrap();
/// assert_eq!(
///     edit,
///     ManifestEdit::Applied(xml.replace(r#" android:extractNativeLibs="false""#, ""))
/// );
/// ```
pub fn remove_extract_native_libs(text: &str) -> Result<ManifestEdit> {
    let application = locate_application(text)?;
    let qname = format!("{}:{}", application.android_prefix, EXTRACT_NATIVE_LIBS);

    if !application.attributes.contains_key(&qname) {
        debug!("<application> carries no {qname}");
        return Ok(ManifestEdit::Skipped);
    }

    let tag = &text[application.span.clone()];
    let span = attribute_span(tag, &qname)
        .ok_or_else(|| malformed(format!("cannot delimit {qname} in <application>")))?;
    let start = application.span.start + span.start;
    let end = application.span.start + span.end;
    debug!("removing {qname} at bytes {start}..{end}");

    let mut out = String::with_capacity(text.len() - (end - start));
    out.push_str(&text[..start]);
    out.push_str(&text[end..]);
    Ok(ManifestEdit::Applied(out))
}

/// Fully-qualified name of the activity started from the launcher, if any.
///
/// For an `<activity-alias>` the aliased activity is returned since that is
/// where the code lives.
pub fn launch_activity(text: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(text);
    let mut scope = NamespaceScope::default();
    let mut elements: Vec<String> = vec![];
    let mut package = String::new();
    let mut candidate: Option<String> = None;
    let mut filter = (false, false);
    let mut launchable = false;

    loop {
        let (start, empty) = match reader.read_event().map_err(|err| malformed(err.to_string()))? {
            Event::Start(start) => (start, false),
            Event::Empty(start) => (start, true),
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                match name.as_str() {
                    "intent-filter" => {
                        launchable |= filter.0 && filter.1;
                        filter = (false, false);
                    }
                    "activity" | "activity-alias" => {
                        if let Some(activity) = candidate.take() {
                            if launchable {
                                return Ok(Some(qualify(&package, &activity)));
                            }
                        }
                        launchable = false;
                    }
                    _ => {}
                }
                elements.pop();
                scope.pop();
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let (namespaces, attributes) = extract_attributes(&start)?;
        scope.push(namespaces);
        let android = scope.android_prefix();
        let attr = |local: &str| attributes.get(&format!("{android}:{local}")).cloned();
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        match name.as_str() {
            "manifest" => {
                package = attributes.get("package").cloned().unwrap_or_default();
            }
            "activity" | "activity-alias" if !empty => {
                candidate = attr("targetActivity").or_else(|| attr("name"));
                launchable = false;
            }
            "action" if in_filter(&elements) => {
                filter.0 |= attr("name").as_deref() == Some(ACTION_MAIN);
            }
            "category" if in_filter(&elements) => {
                filter.1 |= attr("name").as_deref() == Some(CATEGORY_LAUNCHER);
            }
            _ => {}
        }

        if empty {
            scope.pop();
        } else {
            elements.push(name);
        }
    }

    Ok(None)
}

fn in_filter(elements: &[String]) -> bool {
    elements.last().map(String::as_str) == Some("intent-filter")
}

/// Expands `.Main` and `Main` against the manifest package.
fn qualify(package: &str, name: &str) -> String {
    if name.starts_with('.') {
        format!("{package}{name}")
    } else if !name.contains('.') && !package.is_empty() {
        format!("{package}.{name}")
    } else {
        name.to_string()
    }
}

fn malformed(message: impl Into<String>) -> Error {
    Error::AttributeFormat(message.into())
}

/// The `<application ...>` start tag.
struct ApplicationTag {
    /// Byte span of the start tag, `<` to `>` inclusive.
    span: Range<usize>,
    android_prefix: String,
    attributes: BTreeMap<String, String>,
}

#[derive(Default)]
struct NamespaceScope {
    stack: Vec<BTreeMap<String, String>>,
}

impl NamespaceScope {
    fn push(&mut self, declarations: BTreeMap<String, String>) {
        self.stack.push(declarations);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    // Innermost binding wins; apktool always declares `android` on the root.
    fn android_prefix(&self) -> String {
        self.stack
            .iter()
            .rev()
            .flat_map(|decls| decls.iter())
            .find(|(_, uri)| uri.as_str() == ANDROID_NAMESPACE_URI)
            .map(|(prefix, _)| prefix.clone())
            .unwrap_or_else(|| DEFAULT_ANDROID_PREFIX.to_string())
    }
}

fn extract_attributes(
    start: &BytesStart<'_>,
) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>)> {
    let mut namespaces = BTreeMap::new();
    let mut attrs = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| malformed(err.to_string()))?;
        let key = str::from_utf8(attr.key.as_ref()).map_err(|err| malformed(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(err.to_string()))?
            .into_owned();
        if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespaces.insert(prefix.to_string(), value);
        } else {
            attrs.insert(key.to_string(), value);
        }
    }
    Ok((namespaces, attrs))
}

// Validates the whole document and finds the one `<application>` under `<manifest>`.
fn locate_application(text: &str) -> Result<ApplicationTag> {
    let mut reader = Reader::from_str(text);
    let mut scope = NamespaceScope::default();
    let mut root_seen = false;
    let mut found: Option<ApplicationTag> = None;

    loop {
        let event = reader.read_event().map_err(|err| malformed(err.to_string()))?;
        let end = reader.buffer_position() as usize;
        let (start, empty) = match event {
            Event::Start(start) => (start, false),
            Event::Empty(start) => (start, true),
            Event::End(_) => {
                if scope.depth() == 0 {
                    return Err(malformed("unbalanced end tag"));
                }
                scope.pop();
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let (namespaces, attributes) = extract_attributes(&start)?;
        let depth = scope.depth();
        scope.push(namespaces);
        let name = start.name();

        if depth == 0 {
            if root_seen {
                return Err(malformed("more than one root element"));
            }
            if name.as_ref() != b"manifest" {
                return Err(malformed("root element is not <manifest>"));
            }
            root_seen = true;
        } else if depth == 1 && name.as_ref() == b"application" {
            if found.is_some() {
                return Err(malformed("more than one <application> element"));
            }
            // `<` cannot occur inside attribute values, so the last one opens this tag.
            let begin = text[..end]
                .rfind('<')
                .ok_or_else(|| malformed("cannot delimit <application>"))?;
            found = Some(ApplicationTag {
                span: begin..end,
                android_prefix: scope.android_prefix(),
                attributes,
            });
        }

        if empty {
            scope.pop();
        }
    }

    if scope.depth() != 0 {
        return Err(malformed("unclosed elements at end of document"));
    }
    if !root_seen {
        return Err(malformed("no <manifest> root element"));
    }
    found.ok_or_else(|| malformed("no <application> element"))
}

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '=' | '>' | '/' | '<' | '"' | '\'')
}

fn element_name(input: &str) -> IResult<&str, &str> {
    preceded(char('<'), take_while1(is_name_char))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_until("\""), char('"')),
        delimited(char('\''), take_until("'"), char('\'')),
    ))(input)
}

/// One ` name = "value"` run, leading whitespace included.
fn attribute(input: &str) -> IResult<&str, &str> {
    let (input, _) = multispace1(input)?;
    let (input, name) = take_while1(is_name_char)(input)?;
    let (input, _) = tuple((multispace0, char('='), multispace0))(input)?;
    let (input, _) = quoted(input)?;
    Ok((input, name))
}

/// Span of attribute `qname` and its leading whitespace inside a start tag.
fn attribute_span(tag: &str, qname: &str) -> Option<Range<usize>> {
    let (mut input, _) = element_name(tag).ok()?;
    loop {
        let start = tag.len() - input.len();
        let (rest, name) = attribute(input).ok()?;
        if name == qname {
            return Some(start..tag.len() - rest.len());
        }
        input = rest;
    }
}
