use anyhow::{Context, Result, anyhow, bail};
use log::{debug, trace};
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use import_cost_core::{IGNORED_MODULES, NODE_FALLBACKS, Resolver};

use crate::js::minify;
use crate::loader::load_module;
use crate::shake::Usage;

/// Name of the single emitted asset.
pub const BUNDLE_ASSET: &str = "bundle.js";

/// Module table runtime. Requests missing from a module's dependency map fall
/// through to the host `require`, which is how externals are loaded.
const RUNTIME_PRELUDE: &str = "(function (modules, host) {\n\
    var cache = {};\n\
    function load(id) {\n\
    if (cache[id]) return cache[id].exports;\n\
    var entry = modules[id], module = cache[id] = { exports: {} };\n\
    entry[0].call(module.exports, module, module.exports, function (request) {\n\
    var target = entry[1][request];\n\
    return target === undefined ? host(request) : load(target);\n\
    });\n\
    return module.exports;\n\
    }\n\
    module.exports = load(0);\n\
    })([";

#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    /// `node_modules` directories searched before the importing file's own.
    pub module_dirs: Vec<PathBuf>,
    /// Requests left to the host `require`.
    pub externals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub assets: Vec<Asset>,
}

struct ModuleRecord {
    code: String,
    deps: BTreeMap<String, usize>,
}

/// A module in the graph. The empty module has no path.
struct Node {
    path: Option<PathBuf>,
    /// Exports read by the importers seen so far.
    usage: Usage,
    record: Option<ModuleRecord>,
}

/// Bundle everything reachable from `entry` into one minified asset.
///
/// Modules are loaded level by level. A module is loaded again whenever a new
/// importer reads exports the previous load dropped, until no usage grows.
pub fn bundle(entry: &Path, options: &BundleOptions) -> Result<Bundle> {
    debug!("Bundling {}", entry.display());
    let resolver = Resolver::new(options.module_dirs.clone());
    let entry = entry.canonicalize().unwrap_or_else(|_| entry.to_path_buf());

    let mut ids: HashMap<PathBuf, usize> = HashMap::from([(entry.clone(), 0)]);
    let mut nodes = vec![Node { path: Some(entry), usage: Usage::All, record: None }];
    let mut empty_id: Option<usize> = None;
    let mut missing: BTreeSet<String> = BTreeSet::new();
    let mut frontier: BTreeSet<usize> = BTreeSet::from([0]);
    let mut loads = 0;

    while !frontier.is_empty() {
        trace!("Loading {} modules", frontier.len());
        let jobs: Vec<(usize, PathBuf, Usage)> = frontier
            .iter()
            .filter_map(|&id| nodes[id].path.clone().map(|path| (id, path, nodes[id].usage.clone())))
            .collect();
        loads += jobs.len();
        let loaded: Vec<_> = jobs
            .into_par_iter()
            .map(|(id, path, usage)| {
                let module = load_module(&path, &usage)
                    .with_context(|| format!("Failed to load module {}", path.display()));
                (id, path, module)
            })
            .collect();

        let mut next = BTreeSet::new();
        for (id, path, module) in loaded {
            let module = module?;
            let mut deps = BTreeMap::new();
            for request in &module.requests {
                if options.externals.iter().any(|e| e == request) {
                    trace!("Leaving external '{}' to the host", request);
                    continue;
                }
                let target = if IGNORED_MODULES.contains(&request.as_str()) {
                    None
                } else {
                    resolver.resolve(&path, request)
                };
                let dep_id = match target {
                    Some(target) => {
                        let usage = module.usage_of(request);
                        match ids.get(&target) {
                            Some(&dep) => {
                                if nodes[dep].usage.merge(&usage) {
                                    trace!("Usage of {} grew, reloading", target.display());
                                    next.insert(dep);
                                }
                                dep
                            }
                            None => {
                                nodes.push(Node { path: Some(target.clone()), usage, record: None });
                                let dep = nodes.len() - 1;
                                ids.insert(target, dep);
                                next.insert(dep);
                                dep
                            }
                        }
                    }
                    None if is_empty_module(request) => *empty_id.get_or_insert_with(|| {
                        trace!("Replacing '{}' with an empty module", request);
                        nodes.push(Node {
                            path: None,
                            usage: Usage::All,
                            record: Some(ModuleRecord { code: String::new(), deps: BTreeMap::new() }),
                        });
                        nodes.len() - 1
                    }),
                    None => {
                        missing.insert(format!(
                            "Module not found: Can't resolve '{}' in '{}'",
                            request,
                            path.parent().unwrap_or(&path).display()
                        ));
                        continue;
                    }
                };
                deps.insert(request.clone(), dep_id);
            }
            nodes[id].record = Some(ModuleRecord { code: module.code, deps });
        }
        frontier = next;
    }

    if !missing.is_empty() {
        bail!("{}", missing.into_iter().collect::<Vec<_>>().join("\n"));
    }

    let modules = nodes
        .into_iter()
        .map(|n| n.record.ok_or_else(|| anyhow!("module graph is incomplete")))
        .collect::<Result<Vec<_>>>()?;
    debug!("Bundled {} modules in {} loads", modules.len(), loads);

    let code = minify(&render(&modules)?)?;
    Ok(Bundle { assets: vec![Asset { name: BUNDLE_ASSET.to_string(), code }] })
}

/// Node core modules and ignored modules bundle as `{}`.
fn is_empty_module(request: &str) -> bool {
    let name = request.strip_prefix("node:").unwrap_or(request);
    NODE_FALLBACKS.contains(&name) || IGNORED_MODULES.contains(&name)
}

fn render(modules: &[ModuleRecord]) -> Result<String> {
    let mut out = String::from(RUNTIME_PRELUDE);
    for (i, module) in modules.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("[function (module, exports, require) {\n");
        out.push_str(&module.code);
        out.push_str("\n}, ");
        out.push_str(&serde_json::to_string(&module.deps)?);
        out.push(']');
    }
    out.push_str("], require);\n");
    Ok(out)
}
