use anyhow::Result;
use flate2::{Compression, write::GzEncoder};
use log::{debug, info};
use std::{io::Write, path::Path};

use import_cost_core::{
    CostError, DEFAULT_EXTERNALS, ImportDescriptor, MODULES_DIR, SizeResult, find_package_root,
    package_module_container, read_manifest,
};

use crate::bundler::{Bundle, BundleOptions, bundle};
use crate::entry::EntryPoint;

/// Bundle one import in isolation and measure it.
pub fn calc_size(import: &ImportDescriptor) -> Result<SizeResult, CostError> {
    let package = import.package_name();
    let dir = import.file.parent().unwrap_or(&import.file);
    let project = find_package_root(dir).ok_or_else(|| {
        CostError::version(package, format!("no package.json found above {}", dir.display()))
    })?;
    let container = package_module_container(&import.file, package)?;

    let mut module_dirs = vec![project.join(MODULES_DIR)];
    if !module_dirs.contains(&container) {
        module_dirs.push(container.clone());
    }
    let options = BundleOptions { module_dirs, externals: externals_for(&container.join(package), package) };
    debug!("Externals for '{}': {:?}", package, options.externals);

    let entry = EntryPoint::write(import).map_err(|e| CostError::bundle(format!("{e:#}")))?;
    let bundle = bundle(entry.path(), &options).map_err(|e| CostError::bundle(format!("{e:#}")))?;
    let result = measure(&bundle).map_err(|e| CostError::bundle(format!("{e:#}")))?;
    info!("{}: {} bytes ({} gzipped)", import.specifier, result.size, result.gzip);
    Ok(result)
}

/// Raw and gzip byte counts summed over all assets.
pub fn measure(bundle: &Bundle) -> Result<SizeResult> {
    let mut result = SizeResult::default();
    for asset in &bundle.assets {
        result.size += asset.code.len() as u64;
        result.gzip += gzip_len(asset.code.as_bytes())?;
    }
    Ok(result)
}

fn gzip_len(bytes: &[u8]) -> Result<u64> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?.len() as u64)
}

/// Peer dependencies plus the default externals, except the package itself.
fn externals_for(package_dir: &Path, package: &str) -> Vec<String> {
    let peers = match read_manifest(package_dir) {
        Ok(manifest) => manifest.peer_dependencies.into_keys().collect(),
        Err(e) => {
            debug!("No peer dependencies for '{}': {:#}", package, e);
            Vec::new()
        }
    };
    peers
        .into_iter()
        .chain(DEFAULT_EXTERNALS.iter().map(|e| e.to_string()))
        .filter(|e| e != package)
        .collect()
}
