use anyhow::{Context, Result};
use log::trace;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use import_cost_core::ImportDescriptor;

/// A temporary `.js` file holding the entry source of one import.
///
/// The file is removed when the entry point is dropped.
pub struct EntryPoint {
    file: NamedTempFile,
}

impl EntryPoint {
    pub fn write(import: &ImportDescriptor) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("import-cost-")
            .suffix(".js")
            .tempfile()
            .context("Failed to create entry file")?;
        let path = file.path().to_path_buf();
        file.write_all(import.entry_source.as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("Failed to write entry file {}", path.display()))?;
        trace!("Wrote entry for '{}' to {}", import.specifier, file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_entry_file_lifecycle() {
        let import = ImportDescriptor {
            file: PathBuf::from("/project/index.js"),
            specifier: "chai".to_string(),
            line: 1,
            entry_source: "import chai from 'chai';\nconsole.log(chai);".to_string(),
        };
        let entry = EntryPoint::write(&import).unwrap();
        let path = entry.path().to_path_buf();

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("js"));
        assert_eq!(fs::read_to_string(&path).unwrap(), import.entry_source);

        drop(entry);
        assert!(!path.exists());
    }
}
