//! ES module to CommonJS lowering.
//!
//! Lowering rewrites source text in place: import and export statements are
//! replaced by `require` calls and `exports` assignments, everything else is
//! kept byte for byte. The output is a script that can be wrapped in a module
//! function.
//!
//! Exports the importers never read are not assigned, and the declarations
//! behind them are dropped when nothing else refers to them.

use anyhow::{Result, bail};
use log::trace;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::{Visit, walk};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use std::{collections::BTreeMap, path::Path};

use crate::js::{js_string, parse_failure, parse_script, property};
use crate::shake::{Shaking, Usage, analyze, declared_names};

/// A module rewritten to CommonJS.
#[derive(Debug)]
pub(crate) struct Lowered {
    pub code: String,
    /// How the module uses each module it requests.
    pub requests: BTreeMap<String, Usage>,
}

pub(crate) fn lower_module(path: &Path, source: &str, usage: &Usage) -> Result<Lowered> {
    let allocator = Allocator::default();
    let mut ret = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if let Some(module_errors) = parse_failure(&ret) {
        trace!("{} is not an ES module ({}), parsing as script", path.display(), module_errors);
        ret = parse_script(&allocator, source);
        if let Some(errors) = parse_failure(&ret) {
            bail!("Failed to parse {}: {}", path.display(), errors);
        }
    }

    let shaking = analyze(&ret.program, usage);
    trace!("{}: dropping {} unused declarations", path.display(), shaking.removed.len());
    let mut lowering = Lowering::new(source, usage, &shaking);
    if let Some(hashbang) = &ret.program.hashbang {
        lowering.replace(hashbang.span, "");
    }
    for stmt in &ret.program.body {
        lowering.lower_statement(stmt);
    }
    lowering.visit_program(&ret.program);
    let code = lowering.finish();
    Ok(Lowered { code, requests: shaking.requests })
}

struct Edit {
    span: Span,
    text: String,
}

struct Lowering<'s> {
    source: &'s str,
    usage: &'s Usage,
    shaking: &'s Shaking,
    edits: Vec<Edit>,
    /// `exports` assignments appended after the module body.
    trailer: Vec<String>,
    esm: bool,
    next_binding: usize,
    in_assignment_target: bool,
}

impl<'s> Lowering<'s> {
    fn new(source: &'s str, usage: &'s Usage, shaking: &'s Shaking) -> Self {
        Self {
            source,
            usage,
            shaking,
            edits: Vec::new(),
            trailer: Vec::new(),
            esm: false,
            next_binding: 0,
            in_assignment_target: false,
        }
    }

    fn replace(&mut self, span: Span, text: impl Into<String>) {
        self.edits.push(Edit { span, text: text.into() });
    }

    fn binding(&mut self) -> String {
        let name = format!("__ic_m{}", self.next_binding);
        self.next_binding += 1;
        name
    }

    fn lower_statement(&mut self, stmt: &Statement) {
        if matches!(
            stmt,
            Statement::ImportDeclaration(_)
                | Statement::ExportNamedDeclaration(_)
                | Statement::ExportDefaultDeclaration(_)
                | Statement::ExportAllDeclaration(_)
        ) {
            self.esm = true;
        }
        if self.shaking.is_removed(stmt.span()) {
            self.replace(stmt.span(), "");
            return;
        }

        match stmt {
            Statement::ImportDeclaration(decl) => {
                let text = if decl.import_kind.is_type() { String::new() } else { self.lower_import(decl) };
                self.replace(decl.span, text);
            }
            Statement::ExportNamedDeclaration(decl) => self.lower_named_export(decl),
            Statement::ExportDefaultDeclaration(decl) => self.lower_default_export(decl),
            Statement::ExportAllDeclaration(decl) => {
                let source = js_string(decl.source.value.as_str());
                let text = match &decl.exported {
                    Some(name) if self.usage.uses(&name.name()) => {
                        format!("exports{} = require({source});", property(&name.name()))
                    }
                    Some(_) => format!("require({source});"),
                    None => format!("Object.assign(exports, require({source}));"),
                };
                self.replace(decl.span, text);
            }
            _ => {}
        }
    }

    fn lower_import(&mut self, decl: &ImportDeclaration) -> String {
        let source = js_string(decl.source.value.as_str());
        let specifiers = match &decl.specifiers {
            Some(specifiers) if !specifiers.is_empty() => specifiers,
            _ => return format!("require({source});"),
        };

        let module = self.binding();
        let mut out = format!("var {module} = require({source});");
        for specifier in specifiers {
            let line = match specifier {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => format!(
                    "var {} = {module} && {module}.__esModule ? {module}.default : {module};",
                    s.local.name
                ),
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    format!("var {} = {module};", s.local.name)
                }
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    format!("var {} = {module}{};", s.local.name, property(&s.imported.name()))
                }
            };
            out.push(' ');
            out.push_str(&line);
        }
        out
    }

    fn lower_named_export(&mut self, decl: &ExportNamedDeclaration) {
        if decl.export_kind.is_type() {
            self.replace(decl.span, "");
            return;
        }

        if let Some(declaration) = &decl.declaration {
            self.replace(Span::new(decl.span.start, declaration.span().start), "");
            for name in declared_names(declaration).into_iter().filter(|n| self.usage.uses(n)) {
                self.trailer.push(format!("exports{} = {name};", property(&name)));
            }
            return;
        }

        match &decl.source {
            Some(source) => {
                let module = self.binding();
                let mut out =
                    format!("var {module} = require({});", js_string(source.value.as_str()));
                for s in decl.specifiers.iter().filter(|s| self.usage.uses(&s.exported.name())) {
                    out.push_str(&format!(
                        " exports{} = {module}{};",
                        property(&s.exported.name()),
                        property(&s.local.name())
                    ));
                }
                self.replace(decl.span, out);
            }
            None => {
                for s in decl.specifiers.iter().filter(|s| self.usage.uses(&s.exported.name())) {
                    self.trailer.push(format!(
                        "exports{} = {};",
                        property(&s.exported.name()),
                        s.local.name()
                    ));
                }
                self.replace(decl.span, "");
            }
        }
    }

    fn lower_default_export(&mut self, decl: &ExportDefaultDeclaration) {
        let prefix = Span::new(decl.span.start, decl.declaration.span().start);
        let name = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                f.id.as_ref().map(|id| id.name.to_string())
            }
            ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                c.id.as_ref().map(|id| id.name.to_string())
            }
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.replace(decl.span, "");
                return;
            }
            _ => None,
        };

        match name {
            Some(name) => {
                self.replace(prefix, "");
                if self.usage.uses("default") {
                    self.trailer.push(format!("exports.default = {name};"));
                }
            }
            None => {
                self.replace(prefix, "exports.default = ");
                if !self.source[..decl.span.end as usize].trim_end().ends_with(';') {
                    self.replace(Span::empty(decl.span.end), ";");
                }
            }
        }
    }

    fn finish(mut self) -> String {
        self.edits.sort_by_key(|e| (e.span.start, e.span.end));
        let mut out = String::with_capacity(self.source.len() + 64);
        if self.esm {
            out.push_str("exports.__esModule = true;\n");
        }
        let mut cursor = 0;
        for edit in &self.edits {
            let (start, end) = (edit.span.start as usize, edit.span.end as usize);
            if start < cursor {
                trace!("Skipping overlapping edit at offset {}", start);
                continue;
            }
            out.push_str(&self.source[cursor..start]);
            out.push_str(&edit.text);
            cursor = end;
        }
        out.push_str(&self.source[cursor..]);
        for line in &self.trailer {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

impl<'a> Visit<'a> for Lowering<'_> {
    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Expression::StringLiteral(lit) = &expr.source {
            let text = format!(
                "Promise.resolve().then(function () {{ return require({}); }})",
                js_string(lit.value.as_str())
            );
            self.replace(expr.span, text);
            return;
        }
        walk::walk_import_expression(self, expr);
    }

    fn visit_meta_property(&mut self, meta: &MetaProperty<'a>) {
        if meta.meta.name == "import" && meta.property.name == "meta" {
            self.replace(meta.span, "({})");
        }
    }

    fn visit_static_member_expression(&mut self, expr: &StaticMemberExpression<'a>) {
        if !self.in_assignment_target && is_node_env(expr) {
            self.replace(expr.span, "\"production\"");
            return;
        }
        walk::walk_static_member_expression(self, expr);
    }

    fn visit_simple_assignment_target(&mut self, target: &SimpleAssignmentTarget<'a>) {
        let outer = std::mem::replace(&mut self.in_assignment_target, true);
        walk::walk_simple_assignment_target(self, target);
        self.in_assignment_target = outer;
    }
}

/// `process.env.NODE_ENV`
fn is_node_env(expr: &StaticMemberExpression) -> bool {
    expr.property.name == "NODE_ENV"
        && matches!(&expr.object, Expression::StaticMemberExpression(env)
            if env.property.name == "env"
                && matches!(&env.object, Expression::Identifier(id) if id.name == "process"))
}
