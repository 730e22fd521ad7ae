use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;

use nom::bytes::complete::{is_not, tag, take_until, take_while1};
use nom::character::complete::{char, space0, space1};
use nom::multi::many0;
use nom::sequence::{delimited, preceded, separated_pair};
use nom::IResult;
use serde::Serialize;

use super::{execute_command, ToolOutput};
use crate::error::Result;

/// The Android asset packaging tool, used for `dump badging`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aapt {
    program: String,
}

impl Aapt {
    pub fn new(program: impl Into<String>) -> Self {
        Aapt {
            program: program.into(),
        }
    }

    pub fn dump_badging(&self, apk: &Path) -> Result<ToolOutput> {
        execute_command(
            &self.program,
            [OsStr::new("dump"), OsStr::new("badging"), apk.as_os_str()],
        )
    }
}

/// The parts of a badging dump worth reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Badging {
    pub package: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
    pub launchable_activity: Option<String>,
    pub permissions: Vec<String>,
}

impl Badging {
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Badging {
        let mut badging = Badging::default();
        for line in lines {
            let Ok((_, (key, values))) = badging_line(line.as_ref()) else {
                continue;
            };
            match key {
                "package" => {
                    badging.package = values.get("name").cloned();
                    badging.version_code = values.get("versionCode").cloned();
                    badging.version_name = values.get("versionName").cloned();
                }
                "launchable-activity" if badging.launchable_activity.is_none() => {
                    badging.launchable_activity = values.get("name").cloned();
                }
                "uses-permission" => {
                    if let Some(name) = values.get("name") {
                        badging.permissions.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        badging
    }
}

fn quoted_value(input: &str) -> IResult<&str, &str> {
    delimited(char('\''), take_until("'"), char('\''))(input)
}

fn key_value(input: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        space1,
        separated_pair(take_while1(|c: char| c.is_alphanumeric() || c == '-' || c == '_'), char('='), quoted_value),
    )(input)
}

// `key: a='x' b='y'`
fn badging_line(input: &str) -> IResult<&str, (&str, BTreeMap<String, String>)> {
    let (input, key) = is_not(":' ")(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, pairs) = many0(key_value)(input)?;
    let (input, _) = space0(input)?;
    let values = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Ok((input, (key, values)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &[&str] = &[
        "package: name='com.example.app' versionCode='42' versionName='1.4.2' platformBuildVersionName='13'",
        "sdkVersion:'21'",
        "uses-permission: name='android.permission.INTERNET'",
        "uses-permission: name='android.permission.CAMERA'",
        "application-label:'Example'",
        "launchable-activity: name='com.example.app.MainActivity'  label='Example' icon=''",
        "native-code: 'arm64-v8a' 'armeabi-v7a'",
    ];

    #[test]
    fn parses_badging() {
        let badging = Badging::parse(DUMP);
        assert_eq!(badging.package.as_deref(), Some("com.example.app"));
        assert_eq!(badging.version_code.as_deref(), Some("42"));
        assert_eq!(badging.version_name.as_deref(), Some("1.4.2"));
        assert_eq!(
            badging.launchable_activity.as_deref(),
            Some("com.example.app.MainActivity")
        );
        assert_eq!(
            badging.permissions,
            vec!["android.permission.INTERNET", "android.permission.CAMERA"]
        );
    }

    #[test]
    fn tolerates_noise() {
        let badging = Badging::parse(&["ERROR: dump failed because no AndroidManifest.xml found", ""]);
        assert_eq!(badging, Badging::default());
    }
}
