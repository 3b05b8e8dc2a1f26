use std::{
    env,
    io::{self, Write},
    path::{Component, Path, PathBuf},
};

use colored::{ColoredString, Colorize};
use log::{debug, trace};

use import_cost_core::PackageCost;

/// Sizes below this many bytes are shown as small.
const SMALL_PACKAGE: u64 = 50 * 1024;
/// Sizes below this many bytes are shown as medium.
const MEDIUM_PACKAGE: u64 = 100 * 1024;

/// Relativize a path to the current working directory for clickable links
fn relativize_to_cwd(path: &Path) -> String {
    let cwd = match env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => {
            debug!("Failed to get current directory");
            return path.display().to_string();
        }
    };
    match make_relative(path, &cwd) {
        Some(rel_path) => {
            let result = rel_path.to_string_lossy().to_string();
            trace!("Relativized '{}' to '{}'", path.display(), result);
            result
        }
        None => path.display().to_string(),
    }
}

/// Create a relative path from `base` to `target`
fn make_relative(target: &Path, base: &Path) -> Option<PathBuf> {
    if !target.is_absolute() {
        return Some(target.to_path_buf());
    }

    let target_components: Vec<_> = target.components().collect();
    let base_components: Vec<_> = base.components().collect();

    // Paths on different roots cannot be related
    if target_components.first() != base_components.first() {
        return None;
    }

    let common_prefix_len =
        target_components.iter().zip(&base_components).take_while(|(t, b)| t == b).count();

    let mut result = PathBuf::new();
    for _ in &base_components[common_prefix_len..] {
        result.push("..");
    }
    for component in &target_components[common_prefix_len..] {
        match component {
            Component::Normal(p) => result.push(p),
            Component::ParentDir => result.push(".."),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if result.as_os_str().is_empty() { Some(PathBuf::from(".")) } else { Some(result) }
}

/// Human readable byte count: `512B`, `12.3kB`, `1.4MB`.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KB {
        format!("{bytes}B")
    } else if value < KB * KB {
        format!("{:.1}kB", value / KB)
    } else {
        format!("{:.1}MB", value / (KB * KB))
    }
}

fn colored_size(bytes: u64) -> ColoredString {
    let text = format_size(bytes);
    if bytes < SMALL_PACKAGE {
        text.green()
    } else if bytes < MEDIUM_PACKAGE {
        text.yellow()
    } else {
        text.red().bold()
    }
}

/// Print one file's costs as a tree. Failed imports are shown as `?`.
pub fn print_costs<W: Write>(writer: &mut W, file: &Path, costs: &[PackageCost]) -> io::Result<()> {
    debug!("Printing {} costs for {}", costs.len(), file.display());
    writeln!(writer, "{}", relativize_to_cwd(file).bright_white().bold())?;

    if costs.is_empty() {
        writeln!(writer, "{}  {}", "└──".dimmed(), "no package imports".dimmed())?;
        return Ok(());
    }

    for (idx, cost) in costs.iter().enumerate() {
        let prefix = if idx == costs.len() - 1 { "└──" } else { "├──" };
        let location = format!("line {}", cost.import.line);
        match &cost.error {
            None => writeln!(
                writer,
                "{}  {} {}  {} (gzip: {})",
                prefix.dimmed(),
                cost.import.specifier,
                location.dimmed(),
                colored_size(cost.size),
                format_size(cost.gzip).cyan()
            )?,
            Some(err) => writeln!(
                writer,
                "{}  {} {}  {} ({})",
                prefix.dimmed(),
                cost.import.specifier,
                location.dimmed(),
                "?".red().bold(),
                err.kind().dimmed()
            )?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use import_cost_core::{CostError, ImportDescriptor, SizeResult};

    fn cost(specifier: &str, line: usize, size: u64) -> PackageCost {
        PackageCost::sized(
            ImportDescriptor {
                file: PathBuf::from("/project/index.js"),
                specifier: specifier.to_string(),
                line,
                entry_source: String::new(),
            },
            SizeResult { size, gzip: size / 3 },
        )
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(1023), "1023B");
        assert_eq!(format_size(1536), "1.5kB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }

    #[test]
    fn test_make_relative() {
        assert_eq!(
            make_relative(Path::new("/a/b/c.js"), Path::new("/a")),
            Some(PathBuf::from("b/c.js"))
        );
        assert_eq!(
            make_relative(Path::new("/a/b/c.js"), Path::new("/a/d")),
            Some(PathBuf::from("../b/c.js"))
        );
        assert_eq!(make_relative(Path::new("/a"), Path::new("/a")), Some(PathBuf::from(".")));
        assert_eq!(make_relative(Path::new("rel.js"), Path::new("/a")), Some(PathBuf::from("rel.js")));
    }

    #[test]
    fn test_print_costs() {
        colored::control::set_override(false);
        let mut failed = cost("sinon", 2, 0);
        failed.error = Some(CostError::version("sinon", "not found"));
        let costs = vec![cost("chai", 1, 2048), failed];

        let mut out = Vec::new();
        print_costs(&mut out, Path::new("/project/index.js"), &costs).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("├──  chai line 1  2.0kB (gzip: 682B)"));
        assert!(text.contains("└──  sinon line 2  ? (VersionResolutionError)"));
    }

    #[test]
    fn test_print_no_imports() {
        colored::control::set_override(false);
        let mut out = Vec::new();
        print_costs(&mut out, Path::new("/project/empty.js"), &[]).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("no package imports"));
    }
}
