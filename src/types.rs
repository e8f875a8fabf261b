use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Deserialize;

/// check that a name can be used as a single path component
fn check_component(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{kind} name is empty"));
    }
    if name == "." || name == ".." {
        return Err(format!("{kind} name `{name}` is not a valid directory name"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!("{kind} name `{name}` contains a path separator"));
    }
    Ok(())
}

/// an address mapping scheme, e.g. `1RA-16R-2B-7C-2BG`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct MappingPolicy(String);

impl MappingPolicy {
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        check_component("mapping", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MappingPolicy {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for MappingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
struct RawTracePattern {
    name: String,
    path: PathBuf,
}

/// a named, pre-generated access trace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTracePattern")]
pub struct TracePattern {
    name: String,
    path: PathBuf,
}

impl TracePattern {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, String> {
        let name = name.into();
        check_component("trace pattern", &name)?;
        Ok(Self {
            name,
            path: path.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TryFrom<RawTracePattern> for TracePattern {
    type Error = String;
    fn try_from(raw: RawTracePattern) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.path)
    }
}

/// one unit of work: a mapping run against one trace
#[derive(Debug, Clone, Copy)]
pub struct TrialSpec<'a> {
    pub mapping: &'a MappingPolicy,
    pub pattern: &'a TracePattern,
}

impl<'a> TrialSpec<'a> {
    pub fn new(mapping: &'a MappingPolicy, pattern: &'a TracePattern) -> Self {
        Self { mapping, pattern }
    }
}

impl fmt::Display for TrialSpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mapping, self.pattern.name())
    }
}
