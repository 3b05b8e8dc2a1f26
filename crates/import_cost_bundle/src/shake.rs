//! Used-export analysis for ES modules.
//!
//! Given which exports of a module its importers use, find the top-level
//! declarations nothing live refers to and how the module itself uses each
//! module it imports. Only declarations without side effects are dropped, and
//! references are matched by name, so shadowed names keep a declaration alive.

use oxc_ast::ast::*;
use oxc_ast_visit::{Visit, walk};
use oxc_span::{GetSpan, Span};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Exports of a module that its importers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Usage {
    /// The whole exports object escapes (`require`, namespace import).
    All,
    Names(BTreeSet<String>),
}

impl Usage {
    /// Imported for side effects only.
    pub(crate) fn none() -> Self {
        Self::Names(BTreeSet::new())
    }

    pub(crate) fn uses(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => names.contains(name),
        }
    }

    fn add(&mut self, name: &str) {
        if let Self::Names(names) = self {
            names.insert(name.to_string());
        }
    }

    /// Widen to cover `other`. Returns whether anything was added.
    pub(crate) fn merge(&mut self, other: &Usage) -> bool {
        match (&mut *self, other) {
            (Self::All, _) => false,
            (_, Self::All) => {
                *self = Self::All;
                true
            }
            (Self::Names(mine), Self::Names(theirs)) => {
                let before = mine.len();
                mine.extend(theirs.iter().cloned());
                mine.len() != before
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Shaking {
    /// Spans of top-level statements to drop.
    pub removed: Vec<Span>,
    /// How this module uses each module it requests.
    pub requests: BTreeMap<String, Usage>,
}

impl Shaking {
    pub(crate) fn is_removed(&self, span: Span) -> bool {
        self.removed.contains(&span)
    }
}

pub(crate) fn analyze(program: &Program, usage: &Usage) -> Shaking {
    let esm = program.body.iter().any(|stmt| {
        matches!(
            stmt,
            Statement::ImportDeclaration(_)
                | Statement::ExportNamedDeclaration(_)
                | Statement::ExportDefaultDeclaration(_)
                | Statement::ExportAllDeclaration(_)
        )
    });
    let mut facts = Facts {
        usage,
        shake: esm && *usage != Usage::All,
        candidates: Vec::new(),
        roots: Vec::new(),
        imports: Vec::new(),
        reexports: Vec::new(),
    };
    for stmt in &program.body {
        facts.collect(stmt);
    }

    let mut references = References::default();
    references.visit_program(program);

    // Start with every candidate removed and restore the ones still referenced.
    let mut removed = vec![true; facts.candidates.len()];
    loop {
        let spans = removed_spans(&facts.candidates, &removed);
        let live = live_names(&references, &facts.roots, &spans);
        let mut changed = false;
        for (candidate, gone) in facts.candidates.iter().zip(removed.iter_mut()) {
            if *gone && candidate.names.iter().any(|n| live.contains(n.as_str())) {
                *gone = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let spans = removed_spans(&facts.candidates, &removed);
    let live = live_names(&references, &facts.roots, &spans);

    let mut requests: BTreeMap<String, Usage> = BTreeMap::new();
    for (request, binding) in &facts.imports {
        let entry = requests.entry(request.clone()).or_insert_with(Usage::none);
        match binding {
            Binding::Bare => {}
            Binding::Default(local) if live.contains(local.as_str()) => entry.add("default"),
            Binding::Namespace(local) if live.contains(local.as_str()) => {
                entry.merge(&Usage::All);
            }
            Binding::Named { imported, local } if live.contains(local.as_str()) => entry.add(imported),
            _ => {}
        }
    }
    for (request, reexport) in &facts.reexports {
        let entry = requests.entry(request.clone()).or_insert_with(Usage::none);
        match reexport {
            Reexport::Named { local, exported } if usage.uses(exported) => entry.add(local),
            Reexport::Star => {
                entry.merge(usage);
            }
            Reexport::StarAs(exported) if usage.uses(exported) => {
                entry.merge(&Usage::All);
            }
            _ => {}
        }
    }
    for (request, at) in &references.dynamic {
        if !inside(*at, &spans) {
            requests.insert(request.clone(), Usage::All);
        }
    }

    Shaking { removed: spans, requests }
}

fn live_names<'r>(references: &'r References, roots: &'r [String], removed: &[Span]) -> HashSet<&'r str> {
    references
        .names
        .iter()
        .filter(|(_, at)| !inside(*at, removed))
        .map(|(name, _)| name.as_str())
        .chain(roots.iter().map(String::as_str))
        .collect()
}

fn removed_spans(candidates: &[Candidate], removed: &[bool]) -> Vec<Span> {
    candidates.iter().zip(removed).filter(|(_, gone)| **gone).map(|(c, _)| c.span).collect()
}

fn inside(at: u32, spans: &[Span]) -> bool {
    spans.iter().any(|span| span.start <= at && at < span.end)
}

struct Candidate {
    span: Span,
    names: Vec<String>,
}

enum Binding {
    Bare,
    Default(String),
    Namespace(String),
    Named { imported: String, local: String },
}

enum Reexport {
    Named { local: String, exported: String },
    Star,
    StarAs(String),
}

struct Facts<'u> {
    usage: &'u Usage,
    shake: bool,
    candidates: Vec<Candidate>,
    /// Locals of used entries in `export { .. }` lists.
    roots: Vec<String>,
    imports: Vec<(String, Binding)>,
    reexports: Vec<(String, Reexport)>,
}

impl Facts<'_> {
    fn uses(&self, name: &str) -> bool {
        self.usage.uses(name)
    }

    fn collect(&mut self, stmt: &Statement) {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                if decl.import_kind.is_type() {
                    return;
                }
                let request = decl.source.value.to_string();
                let specifiers = match &decl.specifiers {
                    Some(specifiers) if !specifiers.is_empty() => specifiers,
                    _ => {
                        self.imports.push((request, Binding::Bare));
                        return;
                    }
                };
                for specifier in specifiers {
                    let binding = match specifier {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            Binding::Default(s.local.name.to_string())
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            Binding::Namespace(s.local.name.to_string())
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            if s.import_kind.is_type() {
                                continue;
                            }
                            Binding::Named {
                                imported: s.imported.name().to_string(),
                                local: s.local.name.to_string(),
                            }
                        }
                    };
                    self.imports.push((request.clone(), binding));
                }
            }
            Statement::ExportNamedDeclaration(decl) => {
                if decl.export_kind.is_type() {
                    return;
                }
                if let Some(declaration) = &decl.declaration {
                    self.declaration(decl.span, declaration, true);
                    return;
                }
                match &decl.source {
                    Some(source) => {
                        let request = source.value.to_string();
                        if decl.specifiers.is_empty() {
                            self.imports.push((request.clone(), Binding::Bare));
                        }
                        for s in &decl.specifiers {
                            self.reexports.push((
                                request.clone(),
                                Reexport::Named {
                                    local: s.local.name().to_string(),
                                    exported: s.exported.name().to_string(),
                                },
                            ));
                        }
                    }
                    None => {
                        for s in &decl.specifiers {
                            if self.uses(&s.exported.name()) {
                                self.roots.push(s.local.name().to_string());
                            }
                        }
                    }
                }
            }
            Statement::ExportDefaultDeclaration(decl) => {
                let (names, removable) = match &decl.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                        (f.id.iter().map(|id| id.name.to_string()).collect(), true)
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                        (c.id.iter().map(|id| id.name.to_string()).collect(), is_pure_class(c))
                    }
                    ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => return,
                    other => (Vec::new(), other.as_expression().is_some_and(is_pure)),
                };
                if self.shake && removable && !self.uses("default") {
                    self.candidates.push(Candidate { span: decl.span, names });
                }
            }
            Statement::ExportAllDeclaration(decl) => {
                let reexport = match &decl.exported {
                    Some(name) => Reexport::StarAs(name.name().to_string()),
                    None => Reexport::Star,
                };
                self.reexports.push((decl.source.value.to_string(), reexport));
            }
            _ => {
                if let Some(declaration) = stmt.as_declaration() {
                    self.declaration(stmt.span(), declaration, false);
                }
            }
        }
    }

    fn declaration(&mut self, span: Span, declaration: &Declaration, exported: bool) {
        let names = declared_names(declaration);
        if !self.shake || names.is_empty() || !is_removable(declaration) {
            return;
        }
        if exported && names.iter().any(|name| self.uses(name)) {
            return;
        }
        self.candidates.push(Candidate { span, names });
    }
}

/// Identifier reads plus literal `require` and `import()` requests, with
/// their offsets. Local export lists are skipped; `Facts::roots` covers them.
#[derive(Default)]
struct References {
    names: Vec<(String, u32)>,
    dynamic: Vec<(String, u32)>,
}

impl<'a> Visit<'a> for References {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        self.names.push((ident.name.to_string(), ident.span.start));
    }

    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'a>) {
        if let Some(declaration) = &decl.declaration {
            self.visit_declaration(declaration);
        }
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee
            && callee.name == "require"
            && let Some(Argument::StringLiteral(lit)) = call.arguments.first()
        {
            self.dynamic.push((lit.value.to_string(), call.span.start));
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Expression::StringLiteral(lit) = &expr.source {
            self.dynamic.push((lit.value.to_string(), expr.span.start));
        }
        walk::walk_import_expression(self, expr);
    }
}

pub(crate) fn declared_names(declaration: &Declaration) -> Vec<String> {
    match declaration {
        Declaration::VariableDeclaration(var) => {
            let mut names = BindingNames::default();
            for declarator in &var.declarations {
                names.visit_binding_pattern(&declarator.id);
            }
            names.0
        }
        Declaration::FunctionDeclaration(f) => f.id.iter().map(|id| id.name.to_string()).collect(),
        Declaration::ClassDeclaration(c) => c.id.iter().map(|id| id.name.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Names bound by a destructuring pattern. Default values are not entered.
#[derive(Default)]
struct BindingNames(Vec<String>);

impl<'a> Visit<'a> for BindingNames {
    fn visit_binding_identifier(&mut self, ident: &BindingIdentifier<'a>) {
        self.0.push(ident.name.to_string());
    }

    fn visit_expression(&mut self, _expr: &Expression<'a>) {}
}

fn is_removable(declaration: &Declaration) -> bool {
    match declaration {
        Declaration::VariableDeclaration(var) => var.declarations.iter().all(|d| {
            matches!(d.id.kind, BindingPatternKind::BindingIdentifier(_))
                && d.init.as_ref().is_none_or(is_pure)
        }),
        Declaration::FunctionDeclaration(_) => true,
        Declaration::ClassDeclaration(c) => is_pure_class(c),
        _ => false,
    }
}

/// Evaluating `expr` has no observable effect.
fn is_pure(expr: &Expression) -> bool {
    match expr {
        Expression::BooleanLiteral(_)
        | Expression::NullLiteral(_)
        | Expression::NumericLiteral(_)
        | Expression::BigIntLiteral(_)
        | Expression::RegExpLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::Identifier(_)
        | Expression::FunctionExpression(_)
        | Expression::ArrowFunctionExpression(_) => true,
        Expression::TemplateLiteral(t) => t.expressions.iter().all(is_pure),
        Expression::ArrayExpression(array) => array.elements.iter().all(|element| match element {
            ArrayExpressionElement::SpreadElement(_) => false,
            ArrayExpressionElement::Elision(_) => true,
            other => other.as_expression().is_some_and(is_pure),
        }),
        Expression::ObjectExpression(object) => object.properties.iter().all(|property| {
            matches!(property, ObjectPropertyKind::ObjectProperty(p) if !p.computed && is_pure(&p.value))
        }),
        Expression::UnaryExpression(unary) => {
            unary.operator.as_str() != "delete" && is_pure(&unary.argument)
        }
        Expression::BinaryExpression(binary) => {
            !matches!(binary.operator.as_str(), "in" | "instanceof")
                && is_pure(&binary.left)
                && is_pure(&binary.right)
        }
        Expression::ParenthesizedExpression(inner) => is_pure(&inner.expression),
        Expression::ClassExpression(class) => is_pure_class(class),
        // `/*#__PURE__*/` annotated calls
        Expression::CallExpression(call) => call.pure && pure_arguments(&call.arguments),
        Expression::NewExpression(new) => new.pure && pure_arguments(&new.arguments),
        _ => false,
    }
}

fn pure_arguments(arguments: &[Argument]) -> bool {
    arguments.iter().all(|argument| argument.as_expression().is_some_and(is_pure))
}

fn is_pure_class(class: &Class) -> bool {
    class.decorators.is_empty()
        && class.super_class.as_ref().is_none_or(is_pure)
        && class.body.body.iter().all(|element| match element {
            ClassElement::StaticBlock(_) => false,
            ClassElement::MethodDefinition(method) => !method.computed,
            ClassElement::PropertyDefinition(property) => {
                !property.computed
                    && (!property.r#static || property.value.as_ref().is_none_or(is_pure))
            }
            _ => true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn names(list: &[&str]) -> Usage {
        Usage::Names(list.iter().map(|n| n.to_string()).collect())
    }

    fn removed_text(source: &str, usage: &Usage) -> (Vec<String>, BTreeMap<String, Usage>) {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, source, SourceType::mjs()).parse();
        assert!(ret.errors.is_empty());
        let shaking = analyze(&ret.program, usage);
        let texts = shaking.removed.iter().map(|s| s.source_text(source).to_string()).collect();
        (texts, shaking.requests)
    }

    #[test]
    fn test_merge() {
        let mut usage = Usage::none();
        assert!(!usage.merge(&Usage::none()));
        assert!(usage.merge(&names(&["a"])));
        assert!(!usage.merge(&names(&["a"])));
        assert!(usage.merge(&Usage::All));
        assert!(!usage.merge(&names(&["b"])));
        assert!(usage.uses("anything"));
    }

    #[test]
    fn test_unused_exports_removed() {
        let source = "const inner = 'x';\nexport const a = inner;\nexport const b = 2;\nexport function f() { return a; }";
        let (removed, _) = removed_text(source, &names(&["b"]));
        assert_eq!(removed, vec!["const inner = 'x';", "export const a = inner;", "export function f() { return a; }"]);

        let (removed, _) = removed_text(source, &names(&["f"]));
        assert_eq!(removed, vec!["export const b = 2;"]);

        let (removed, _) = removed_text(source, &Usage::All);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_side_effects_kept() {
        let source = "export const a = setup();\nexport const b = /*#__PURE__*/ make();\nexport class K { static x = init(); }";
        let (removed, _) = removed_text(source, &Usage::none());
        assert_eq!(removed, vec!["export const b = /*#__PURE__*/ make();"]);
    }

    #[test]
    fn test_export_list_roots() {
        let source = "const big = 'big';\nconst small = 1;\nexport { big, small as tiny };";
        let (removed, _) = removed_text(source, &names(&["tiny"]));
        assert_eq!(removed, vec!["const big = 'big';"]);
    }

    #[test]
    fn test_request_usage() {
        let source = "import d, { a, b as c } from 'm';\nimport * as ns from 'n';\nimport 'side';\nexport const f = () => [a, ns];\nexport const g = c;\nrequire('dyn');";
        let (_, requests) = removed_text(source, &names(&["g"]));
        assert_eq!(requests["m"], names(&["b"]));
        assert_eq!(requests["n"], Usage::none());
        assert_eq!(requests["side"], Usage::none());
        assert_eq!(requests["dyn"], Usage::All);

        let (_, requests) = removed_text(source, &Usage::All);
        assert_eq!(requests["m"], names(&["a", "b"]));
        assert_eq!(requests["n"], Usage::All);
    }

    #[test]
    fn test_reexport_usage() {
        let source = "export { x as y, z } from './x';\nexport * from './all';\nexport * as ns from './ns';";
        let (_, requests) = removed_text(source, &names(&["y"]));
        assert_eq!(requests["./x"], names(&["x"]));
        assert_eq!(requests["./all"], names(&["y"]));
        assert_eq!(requests["./ns"], Usage::none());
    }

    #[test]
    fn test_commonjs_is_never_shaken() {
        let (removed, requests) = removed_text("const big = 'x';\nmodule.exports = require('./a');", &Usage::none());
        assert!(removed.is_empty());
        assert_eq!(requests["./a"], Usage::All);
    }
}
