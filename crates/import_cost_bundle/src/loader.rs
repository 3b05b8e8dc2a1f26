use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::trace;
use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_ast_visit::{Visit, walk};
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, Minifier, MinifierOptions};
use std::{collections::BTreeMap, fs, path::Path};

use import_cost_core::MODULES_DIR;

use crate::js::{js_string, parse_failure, parse_script};
use crate::lower::lower_module;
use crate::shake::Usage;

/// Assets at or under this many bytes are inlined as data URLs.
const URL_LOADER_LIMIT: usize = 10_000;

const STYLESHEET_EXTENSIONS: &[&str] = &["css", "scss"];

const ASSET_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "gif", "svg", "woff", "woff2", "ttf", "eot", "wav"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModuleKind {
    Script,
    Json,
    Stylesheet,
    Asset,
}

impl ModuleKind {
    pub(crate) fn of(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
        if ext == "json" {
            Self::Json
        } else if STYLESHEET_EXTENSIONS.contains(&ext.as_str()) {
            Self::Stylesheet
        } else if ASSET_EXTENSIONS.contains(&ext.as_str()) {
            Self::Asset
        } else {
            Self::Script
        }
    }
}

/// A module ready to be placed in a bundle.
#[derive(Debug)]
pub(crate) struct LoadedModule {
    /// CommonJS body, compressed.
    pub code: String,
    /// `require` requests in first-seen order.
    pub requests: Vec<String>,
    /// Exports read from each request.
    pub uses: BTreeMap<String, Usage>,
}

impl LoadedModule {
    fn leaf(code: String) -> Self {
        Self { code, requests: Vec::new(), uses: BTreeMap::new() }
    }

    pub(crate) fn usage_of(&self, request: &str) -> Usage {
        self.uses.get(request).cloned().unwrap_or(Usage::All)
    }
}

/// Load a module, keeping only the exports in `usage` when it is an ES module.
pub(crate) fn load_module(path: &Path, usage: &Usage) -> Result<LoadedModule> {
    let kind = ModuleKind::of(path);
    trace!("Loading {:?} module {}", kind, path.display());
    match kind {
        ModuleKind::Script => {
            let source = read_text(path)?;
            let lowered = lower_module(path, &source, usage)?;
            let mut module = compress_module(path, &lowered.code)?;
            module.uses = lowered.requests;
            Ok(module)
        }
        ModuleKind::Json => {
            let value: serde_json::Value = serde_json::from_str(&read_text(path)?)
                .with_context(|| format!("Failed to parse JSON module {}", path.display()))?;
            Ok(LoadedModule::leaf(format!("module.exports={value};")))
        }
        ModuleKind::Stylesheet => {
            Ok(LoadedModule::leaf(format!("module.exports={};", js_string(&read_text(path)?))))
        }
        ModuleKind::Asset => {
            let bytes =
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(LoadedModule::leaf(format!("module.exports={};", js_string(&asset_url(path, &bytes)))))
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Dead-code elimination over a lowered module, then collect what it still
/// requires.
fn compress_module(path: &Path, code: &str) -> Result<LoadedModule> {
    let allocator = Allocator::default();
    let ret = parse_script(&allocator, code);
    if let Some(errors) = parse_failure(&ret) {
        bail!("Failed to parse lowered {}: {}", path.display(), errors);
    }
    let mut program = ret.program;
    let options = MinifierOptions { mangle: None, compress: Some(CompressOptions::default()) };
    let minified = Minifier::new(options).minify(&allocator, &mut program);

    let mut collector = RequireCollector::default();
    collector.visit_program(&program);
    let code = Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(minified.scoping)
        .build(&program)
        .code;
    Ok(LoadedModule { code, requests: collector.requests, uses: BTreeMap::new() })
}

#[derive(Default)]
struct RequireCollector {
    requests: Vec<String>,
}

impl<'a> Visit<'a> for RequireCollector {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee
            && callee.name == "require"
            && let Some(Argument::StringLiteral(lit)) = call.arguments.first()
        {
            let request = lit.value.to_string();
            if !self.requests.contains(&request) {
                self.requests.push(request);
            }
        }
        walk::walk_call_expression(self, call);
    }
}

/// Data URL for small assets, `[path][name].[ext]` otherwise.
fn asset_url(path: &Path, bytes: &[u8]) -> String {
    if bytes.len() <= URL_LOADER_LIMIT {
        return format!("data:{};base64,{}", mime_type(path), STANDARD.encode(bytes));
    }
    let text = path.to_string_lossy().replace('\\', "/");
    let marker = format!("{MODULES_DIR}/");
    match text.rfind(&marker) {
        Some(idx) => text[idx + marker.len()..].to_string(),
        None => path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or(text),
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, path: &str, content: &[u8]) -> PathBuf {
        let file_path = dir.join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&file_path, content).expect("Failed to write test file");
        file_path
    }

    #[test]
    fn test_module_kind() {
        assert_eq!(ModuleKind::of(Path::new("a/index.js")), ModuleKind::Script);
        assert_eq!(ModuleKind::of(Path::new("a/index.mjs")), ModuleKind::Script);
        assert_eq!(ModuleKind::of(Path::new("a/data.json")), ModuleKind::Json);
        assert_eq!(ModuleKind::of(Path::new("a/theme.scss")), ModuleKind::Stylesheet);
        assert_eq!(ModuleKind::of(Path::new("a/logo.SVG")), ModuleKind::Asset);
    }

    #[test]
    fn test_script_requests_survive_compression() {
        let temp_dir = TempDir::new().unwrap();
        let file = create_test_file(
            temp_dir.path(),
            "index.js",
            b"import a from './a';\nconst b = require('b');\nconst again = require('./a');\nmodule.exports = [a, b, again];\n",
        );
        let module = load_module(&file, &Usage::All).unwrap();
        assert_eq!(module.requests, vec!["./a".to_string(), "b".to_string()]);
        assert!(module.code.contains("__esModule"));
    }

    #[test]
    fn test_dead_branch_requests_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let file = create_test_file(
            temp_dir.path(),
            "index.js",
            b"if (process.env.NODE_ENV === 'production') {\n  module.exports = require('./prod.js');\n} else {\n  module.exports = require('./dev.js');\n}\n",
        );
        let module = load_module(&file, &Usage::All).unwrap();
        assert_eq!(module.requests, vec!["./prod.js".to_string()]);
    }

    #[test]
    fn test_json_and_stylesheet_modules() {
        let temp_dir = TempDir::new().unwrap();
        let json = create_test_file(temp_dir.path(), "data.json", b"{ \"a\": [1, 2] }");
        assert_eq!(load_module(&json, &Usage::All).unwrap().code, "module.exports={\"a\":[1,2]};");

        let css = create_test_file(temp_dir.path(), "style.css", b".a { color: red; }");
        assert_eq!(load_module(&css, &Usage::All).unwrap().code, "module.exports=\".a { color: red; }\";");
    }

    #[test]
    fn test_asset_urls() {
        let small = asset_url(Path::new("/p/node_modules/pkg/icon.png"), b"abc");
        assert_eq!(small, "data:image/png;base64,YWJj");

        let large = vec![0u8; URL_LOADER_LIMIT + 1];
        let url = asset_url(Path::new("/p/node_modules/pkg/fonts/big.woff"), &large);
        assert_eq!(url, "pkg/fonts/big.woff");
    }

    #[test]
    fn test_invalid_json_module() {
        let temp_dir = TempDir::new().unwrap();
        let json = create_test_file(temp_dir.path(), "bad.json", b"{ nope");
        assert!(load_module(&json, &Usage::All).is_err());
    }

    #[test]
    fn test_request_uses() {
        let temp_dir = TempDir::new().unwrap();
        let file = create_test_file(
            temp_dir.path(),
            "index.mjs",
            b"import { a } from './a';
import * as b from './b';
const c = require('./c');
console.log(a, b, c);
",
        );
        let module = load_module(&file, &Usage::none()).unwrap();
        assert_eq!(module.usage_of("./a"), Usage::Names(["a".to_string()].into()));
        assert_eq!(module.usage_of("./b"), Usage::All);
        assert_eq!(module.usage_of("./c"), Usage::All);
    }
}
