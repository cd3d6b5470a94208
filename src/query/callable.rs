//! Inline transform functions.
//!
//! A [`Callable`] travels as its function source text, e.g.
//! `function adults() { adults }`. Turning text back into something that runs
//! goes through [`FunctionCompiler`]; the stock [`TransformRegistry`] only
//! accepts bodies naming a transform registered up front, so a client cannot
//! ship arbitrary code to the server.

use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{opt, peek},
    sequence::{delimited, preceded},
    IResult,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Query;
use crate::error::{MapperError, MapperResult};

/// The executable half of a callable.
pub type TransformFn = Arc<dyn Fn(&mut Query) + Send + Sync>;

/// A transform over a query, carried with its source text.
#[derive(Clone)]
pub struct Callable {
    source: String,
    apply: Option<TransformFn>,
}

impl Callable {
    /// Create a named transform. The name doubles as the function body.
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        Self {
            source: format!("function {}() {{ {} }}", name, name),
            apply: Some(Arc::new(f)),
        }
    }

    fn from_parts(source: String, apply: TransformFn) -> Self {
        Self {
            source,
            apply: Some(apply),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_compiled(&self) -> bool {
        self.apply.is_some()
    }

    /// Run the transform on `query`. Returns false when nothing is bound.
    pub fn call(&self, query: &mut Query) -> bool {
        match &self.apply {
            Some(apply) => {
                apply(query);
                true
            }
            None => false,
        }
    }

    /// Bind the transform by compiling the body of the source text.
    pub fn compile(&mut self, compiler: &dyn FunctionCompiler) -> MapperResult<()> {
        let parsed = parse_function_source(&self.source)?;
        self.apply = Some(compiler.compile(parsed.body)?);
        Ok(())
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("source", &self.source)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Callable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Callable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        if !looks_like_function(&source) {
            return Err(serde::de::Error::custom(format!(
                "not a function source: '{}'",
                source
            )));
        }
        Ok(Self {
            source,
            apply: None,
        })
    }
}

/// Turns a function body into a transform.
pub trait FunctionCompiler: Send + Sync {
    fn compile(&self, body: &str) -> MapperResult<TransformFn>;
}

/// Closed allow-list of named transforms.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform under `name`.
    pub fn register<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(f));
        self
    }

    /// A callable for a registered transform.
    pub fn callable(&self, name: &str) -> Option<Callable> {
        self.transforms.get(name).map(|apply| {
            Callable::from_parts(
                format!("function {}() {{ {} }}", name, name),
                Arc::clone(apply),
            )
        })
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.transforms.keys()).finish()
    }
}

impl FunctionCompiler for TransformRegistry {
    fn compile(&self, body: &str) -> MapperResult<TransformFn> {
        let name = body.trim().trim_end_matches(';').trim();
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::Compile(format!("'{}' is not a registered transform", name)))
    }
}

/// Pieces of a serialized function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSource<'a> {
    pub name: Option<&'a str>,
    pub params: &'a str,
    pub body: &'a str,
}

/// True when `text` starts with a function signature: `function [name](...) {`.
pub fn looks_like_function(text: &str) -> bool {
    signature(text).is_ok()
}

/// Split function source into name, parameters and the first top-level brace block.
pub fn parse_function_source(text: &str) -> MapperResult<FunctionSource<'_>> {
    let (rest, (name, params)) = signature(text)
        .map_err(|_| MapperError::Compile(format!("no function signature in '{}'", text)))?;
    let body = braced_body(rest)
        .ok_or_else(|| MapperError::Compile(format!("unbalanced function body in '{}'", text)))?;
    Ok(FunctionSource {
        name,
        params: params.trim(),
        body: body.trim(),
    })
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$')(input)
}

fn signature(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    let (input, _) = multispace0(input)?;
    let (input, _) = tag("function")(input)?;
    let (input, name) = opt(preceded(multispace1, identifier))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, params) = delimited(char('('), take_while(|c| c != ')'), char(')'))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = peek(char('{'))(input)?;
    Ok((input, (name, params)))
}

/// Contents of the brace block starting at `input`, matched by depth.
fn braced_body(input: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&input[1..i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Operator, QueryExt};

    #[test]
    fn test_signature_detection() {
        assert!(looks_like_function("function adults() { adults }"));
        assert!(looks_like_function("function () {\n  return 1\n}"));
        assert!(looks_like_function("  function(a, b){}"));
        assert!(!looks_like_function("malfunction"));
        assert!(!looks_like_function("functions(x) {}"));
        assert!(!looks_like_function("function adults"));
        assert!(!looks_like_function("true"));
    }

    #[test]
    fn test_body_is_first_top_level_block() {
        let parsed = parse_function_source("function f(a) { if (a) { b } } { ignored }").unwrap();
        assert_eq!(parsed.name, Some("f"));
        assert_eq!(parsed.params, "a");
        assert_eq!(parsed.body, "if (a) { b }");
    }

    #[test]
    fn test_unbalanced_body_fails() {
        assert!(parse_function_source("function f() { {").is_err());
    }

    #[test]
    fn test_registry_compiles_known_names_only() {
        let registry = TransformRegistry::new()
            .register("adults", |q: &mut Query| {
                q.edit(|q| q.where_op("age", Operator::Gte, 18));
            });

        let mut callable: Callable =
            serde_json::from_value(serde_json::json!("function adults() { adults }")).unwrap();
        assert!(!callable.is_compiled());
        callable.compile(&registry).unwrap();
        assert!(callable.is_compiled());

        let mut query = Query::table("people");
        assert!(callable.call(&mut query));
        assert_eq!(query.wheres().count(), 1);

        let mut unknown: Callable =
            serde_json::from_value(serde_json::json!("function () { drop_everything() }")).unwrap();
        assert!(matches!(
            unknown.compile(&registry),
            Err(MapperError::Compile(_))
        ));
    }

    #[test]
    fn test_registry_hands_out_named_callables() {
        let registry = TransformRegistry::new().register("active", |_q: &mut Query| {});
        let callable = registry.callable("active").unwrap();
        assert_eq!(callable.source(), "function active() { active }");
        assert!(registry.callable("missing").is_none());
    }
}
