use log::{debug, trace};
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::{Visit, walk};
use oxc_parser::{Parser as OxcParser, ParserReturn};
use oxc_span::{SourceType, Span};
use std::{collections::HashSet, path::Path};

use crate::error::CostError;
use crate::markup::extract_script;
use crate::types::{Dialect, ImportDescriptor};

/// Find every import site in `source` and synthesize its standalone entry
/// program.
///
/// Markup dialects are reduced to their first `<script>` block, parsed as
/// TypeScript, with line numbers shifted back to the markup file. A markup
/// file without a script block has no imports.
pub fn parse_imports(
    file: &Path,
    source: &str,
    dialect: Dialect,
) -> Result<Vec<ImportDescriptor>, CostError> {
    if dialect.is_markup() {
        let Some(script) = extract_script(source) else {
            debug!("No script block in {}", file.display());
            return Ok(Vec::new());
        };
        let st = source_type_for(file, Dialect::TypeScript);
        return imports_for(file, script.content, st, script.line_offset);
    }
    imports_for(file, source, source_type_for(file, dialect), 0)
}

fn imports_for(
    file: &Path,
    source: &str,
    st: SourceType,
    line_offset: usize,
) -> Result<Vec<ImportDescriptor>, CostError> {
    trace!("Parsing {} for imports", file.display());
    let allocator = Allocator::default();
    let ParserReturn { program, errors, panicked, .. } =
        OxcParser::new(&allocator, source, st).parse();

    if panicked || !errors.is_empty() {
        let message = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        debug!("Failed to parse {}: {}", file.display(), message);
        return Err(CostError::Parse {
            message: if message.is_empty() { "unrecoverable syntax error".into() } else { message },
        });
    }

    let mut collector =
        ImportCollector { file, lines: LineIndex::new(source), line_offset, imports: Vec::new() };
    collector.visit_program(&program);

    debug!("Found {} import sites in {}", collector.imports.len(), file.display());
    Ok(collector.imports)
}

fn source_type_for(file: &Path, dialect: Dialect) -> SourceType {
    let ext = file.extension().and_then(|e| e.to_str());
    let st = SourceType::default().with_module(true);
    match dialect {
        Dialect::JavaScript => st.with_jsx(true),
        Dialect::TypeScript => st.with_typescript(true).with_jsx(matches!(ext, Some("tsx"))),
        Dialect::Vue | Dialect::Svelte => st.with_typescript(true),
    }
}

struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(idx, _)| idx as u32 + 1));
        Self { starts }
    }

    /// 1-based line containing `offset`.
    fn line_of(&self, offset: u32) -> usize {
        self.starts.partition_point(|&start| start <= offset)
    }
}

struct ImportCollector<'s> {
    file: &'s Path,
    lines: LineIndex,
    line_offset: usize,
    imports: Vec<ImportDescriptor>,
}

impl ImportCollector<'_> {
    fn push(&mut self, specifier: &str, span: Span, entry_source: String) {
        let line = self.lines.line_of(span.end) + self.line_offset;
        trace!("Found import of '{}' on line {}", specifier, line);
        self.imports.push(ImportDescriptor {
            file: self.file.to_path_buf(),
            specifier: specifier.to_string(),
            line,
            entry_source,
        });
    }
}

impl<'a> Visit<'a> for ImportCollector<'_> {
    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        // import type { Foo } from 'bar'
        if decl.import_kind.is_type() {
            trace!("Skipping type-only import declaration in {}", self.file.display());
            return;
        }
        if let Some(entry_source) = compile_import(decl) {
            self.push(decl.source.value.as_str(), decl.span, entry_source);
        }
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee
            && callee.name.as_str() == "require"
            && let Some(specifier) =
                call.arguments.first().and_then(|arg| arg.as_expression()).and_then(literal_text)
        {
            let entry_source = format!("require({})", quote(&specifier));
            self.push(&specifier, call.span, entry_source);
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Some(specifier) = literal_text(&expr.source) {
            let entry_source =
                format!("import({}).then(res => console.log(res));", quote(&specifier));
            self.push(&specifier, expr.span, entry_source);
        }
        walk::walk_import_expression(self, expr);
    }
}

/// String literal or substitution-free template literal.
fn literal_text(expr: &Expression) -> Option<String> {
    match expr {
        Expression::StringLiteral(sl) => Some(sl.value.to_string()),
        Expression::TemplateLiteral(tl) if tl.expressions.is_empty() => {
            tl.quasis.first().map(|q| q.value.raw.to_string())
        }
        _ => None,
    }
}

fn quote(specifier: &str) -> String {
    format!("'{}'", specifier.replace('\\', "\\\\").replace('\'', "\\'"))
}

struct NamedImport {
    imported: String,
    local: String,
    clause: String,
    binding: String,
}

/// Re-emit an import declaration as a standalone program that references
/// every runtime binding, so the import survives dead-code elimination.
///
/// Named specifiers are sorted by imported name while default and namespace
/// specifiers keep their place, so reordering `{ b, a }` yields the same
/// program text. Aliases are dropped unless the imported name is already
/// bound by another specifier. Returns `None` when every specifier is
/// type-only.
fn compile_import(decl: &ImportDeclaration) -> Option<String> {
    let source = quote(decl.source.value.as_str());
    let specifiers = match &decl.specifiers {
        Some(specifiers) if !specifiers.is_empty() => specifiers,
        _ => return Some(format!("import * as tmp from {source};\nconsole.log(tmp);")),
    };

    let mut clause: Vec<String> = Vec::new();
    let mut bindings: Vec<String> = Vec::new();
    let mut named: Vec<NamedImport> = Vec::new();
    let mut named_slot: Option<usize> = None;

    for spec in specifiers {
        match spec {
            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                clause.push(s.local.name.to_string());
                bindings.push(s.local.name.to_string());
            }
            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                clause.push(format!("* as {}", s.local.name));
                bindings.push(s.local.name.to_string());
            }
            ImportDeclarationSpecifier::ImportSpecifier(s) => {
                // import { type Foo, bar } from 'baz'
                if s.import_kind.is_type() {
                    continue;
                }
                if named_slot.is_none() {
                    named_slot = Some(clause.len());
                    clause.push(String::new());
                    bindings.push(String::new());
                }
                named.push(named_import(&s.imported, s.local.name.as_str()));
            }
        }
    }

    if clause.is_empty() {
        return None;
    }
    if let Some(slot) = named_slot {
        named.sort_by(|a, b| a.imported.cmp(&b.imported));
        let mut taken: HashSet<String> = bindings.iter().filter(|b| !b.is_empty()).cloned().collect();
        for n in &mut named {
            // import expect, { expect as e } from 'chai'
            if !taken.insert(n.binding.clone()) {
                n.clause = format!("{} as {}", n.imported, n.local);
                n.binding = n.local.clone();
                taken.insert(n.local.clone());
            }
        }
        let names: Vec<&str> = named.iter().map(|n| n.clause.as_str()).collect();
        let refs: Vec<&str> = named.iter().map(|n| n.binding.as_str()).collect();
        clause[slot] = format!("{{{}}}", names.join(", "));
        bindings[slot] = format!("{{{}}}", refs.join(", "));
    }

    Some(format!(
        "import {} from {};\nconsole.log({});",
        clause.join(", "),
        source,
        bindings.join(", ")
    ))
}

fn named_import(imported: &ModuleExportName, local: &str) -> NamedImport {
    match imported {
        ModuleExportName::StringLiteral(sl) => NamedImport {
            imported: sl.value.to_string(),
            local: local.to_string(),
            clause: format!("{} as {}", quote(sl.value.as_str()), local),
            binding: local.to_string(),
        },
        ModuleExportName::IdentifierName(id) if id.name.as_str() == "default" => NamedImport {
            imported: "default".to_string(),
            local: local.to_string(),
            clause: format!("default as {}", local),
            binding: local.to_string(),
        },
        ModuleExportName::IdentifierName(id) => NamedImport {
            imported: id.name.to_string(),
            local: local.to_string(),
            clause: id.name.to_string(),
            binding: id.name.to_string(),
        },
        ModuleExportName::IdentifierReference(id) => NamedImport {
            imported: id.name.to_string(),
            local: local.to_string(),
            clause: id.name.to_string(),
            binding: id.name.to_string(),
        },
    }
}
