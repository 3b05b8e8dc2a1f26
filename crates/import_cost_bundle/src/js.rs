//! Helpers for parsing and emitting JavaScript text.

use anyhow::{Result, bail};
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier, MinifierOptions};
use oxc_parser::{ParseOptions, Parser, ParserReturn};
use oxc_span::SourceType;

/// CommonJS sources may `return` at the top level.
pub(crate) fn script_options() -> ParseOptions {
    ParseOptions { allow_return_outside_function: true, ..ParseOptions::default() }
}

pub(crate) fn parse_script<'a>(allocator: &'a Allocator, source: &'a str) -> ParserReturn<'a> {
    Parser::new(allocator, source, SourceType::cjs()).with_options(script_options()).parse()
}

/// Diagnostics of a failed parse, joined into one message.
pub(crate) fn parse_failure(ret: &ParserReturn) -> Option<String> {
    if !ret.panicked && ret.errors.is_empty() {
        return None;
    }
    let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
    Some(if messages.is_empty() { "unrecoverable syntax error".to_string() } else { messages.join("; ") })
}

/// Compress and mangle a complete script.
pub(crate) fn minify(source: &str) -> Result<String> {
    let allocator = Allocator::default();
    let ret = parse_script(&allocator, source);
    if let Some(errors) = parse_failure(&ret) {
        bail!("Generated bundle does not parse: {}", errors);
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::default()),
    };
    let minified = Minifier::new(options).minify(&allocator, &mut program);
    Ok(Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(minified.scoping)
        .build(&program)
        .code)
}

/// A double-quoted JavaScript string literal.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Property access for `name`: `.name` when it is an identifier, else `["name"]`.
pub(crate) fn property(name: &str) -> String {
    let mut chars = name.chars();
    let is_identifier = chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if is_identifier { format!(".{name}") } else { format!("[{}]", js_string(name)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property() {
        assert_eq!(property("default"), ".default");
        assert_eq!(property("$el"), ".$el");
        assert_eq!(property("my-export"), "[\"my-export\"]");
        assert_eq!(property("1st"), "[\"1st\"]");
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("it's \"x\""), r#""it's \"x\"""#);
    }

    #[test]
    fn test_minify_shrinks_source() {
        let source = "function add(first, second) {\n  return first + second;\n}\nmodule.exports = add;\n";
        let minified = minify(source).unwrap();
        assert!(minified.len() < source.len());
        assert!(minified.contains("module.exports"));
    }

    #[test]
    fn test_minify_rejects_invalid_source() {
        assert!(minify("function (").is_err());
    }
}
