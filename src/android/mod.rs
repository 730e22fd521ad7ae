//! Android package formats: the decoded manifest and built package archives.

pub mod archive;
pub mod manifest;
