use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use crate::error::CostError;
use crate::package::package_name;

/// Source syntaxes the parser understands.
///
/// `Vue` and `Svelte` are markup dialects: only their first `<script>` block
/// is scanned, as TypeScript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    JavaScript,
    TypeScript,
    Vue,
    Svelte,
}

impl Dialect {
    /// Pick the dialect for a file from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "vue" => Some(Self::Vue),
            "svelte" => Some(Self::Svelte),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Vue => "vue",
            Self::Svelte => "svelte",
        }
    }

    pub fn is_markup(self) -> bool {
        matches!(self, Self::Vue | Self::Svelte)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "javascript" | "js" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "vue" => Ok(Self::Vue),
            "svelte" => Ok(Self::Svelte),
            other => Err(format!("unsupported dialect '{other}'")),
        }
    }
}

/// One import/require occurrence found in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    /// File the import was found in.
    pub file: PathBuf,
    /// Module string exactly as written.
    pub specifier: String,
    /// 1-based line the import statement ends on.
    pub line: usize,
    /// Standalone program that imports only this specifier.
    pub entry_source: String,
}

impl ImportDescriptor {
    /// Relative specifiers point at project files, not dependencies.
    pub fn is_relative(&self) -> bool {
        self.specifier.starts_with('.')
    }

    pub fn package_name(&self) -> &str {
        package_name(&self.specifier)
    }

    /// Identity used to supersede older requests for the same location.
    pub fn location_key(&self) -> String {
        format!("{}#{}", self.file.display(), self.line)
    }
}

/// Bundled byte counts for one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeResult {
    pub size: u64,
    pub gzip: u64,
}

/// Result reported for one import: the descriptor plus its size, or a zero
/// size annotated with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCost {
    #[serde(flatten)]
    pub import: ImportDescriptor,
    pub size: u64,
    pub gzip: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CostError>,
}

impl PackageCost {
    pub fn sized(import: ImportDescriptor, result: SizeResult) -> Self {
        Self { import, size: result.size, gzip: result.gzip, error: None }
    }

    pub fn failed(import: ImportDescriptor, error: CostError) -> Self {
        Self { import, size: 0, gzip: 0, error: Some(error) }
    }
}
