//! Template expression language.
//!
//! Expressions appear in resource params, loop sources, conditions and
//! document outputs. Two surface forms are accepted:
//!
//! - string interpolation: `"kv-{{ param.environment }}"`. A string that is a
//!   single placeholder yields the raw value rather than a string.
//! - directive objects: a single-key object whose key starts with `$`, for
//!   example `{"$ref": "vault.uri"}` or `{"$eq": [..., ...]}`.
//!
//! Placeholder paths are `param.<name>`, `item`, `item.<path>`, `index` and
//! `ref.<template>[<index>].<output>`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tessera_spec::ParameterSet;
use thiserror::Error;

use crate::instance::{InstanceId, ParamValue, Reference};

/// Expression parsing and evaluation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("'{0}' is only available inside a loop")]
    NoLoopContext(&'static str),

    #[error("Reference to {0} is not allowed here; only static inputs can be used")]
    NonStatic(String),

    #[error("Type error: {0}")]
    Type(String),
}

/// A reference to another template's output.
#[derive(Debug, Clone, PartialEq)]
pub struct RefExpr {
    pub resource: String,
    pub index: Option<Box<Expr>>,
    pub output: String,
}

impl fmt::Display for RefExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => match index.as_ref() {
                Expr::Literal(v) => write!(f, "{}[{}].{}", self.resource, v, self.output),
                Expr::Index => write!(f, "{}[index].{}", self.resource, self.output),
                _ => write!(f, "{}[..].{}", self.resource, self.output),
            },
            None => write!(f, "{}.{}", self.resource, self.output),
        }
    }
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Param(String),
    /// Current loop item, optionally narrowed by a field path
    Item(Vec<String>),
    Index,
    Ref(RefExpr),
    Concat(Vec<Expr>),
    List(Vec<Expr>),
    Object(BTreeMap<String, Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Length(Box<Expr>),
}

/// Static inputs available while evaluating an expression.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub params: &'a ParameterSet,
    pub item: Option<&'a Value>,
    pub index: Option<usize>,
}

impl<'a> EvalContext<'a> {
    pub fn new(params: &'a ParameterSet) -> Self {
        Self {
            params,
            item: None,
            index: None,
        }
    }

    pub fn with_loop(mut self, index: usize, item: &'a Value) -> Self {
        self.index = Some(index);
        self.item = Some(item);
        self
    }
}

fn interpolation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([^}]*?)\s*\}\}").expect("valid interpolation pattern"))
}

fn ref_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)(?:\[\s*(\d+|index)\s*\])?\.([A-Za-z_][A-Za-z0-9_-]*)$")
            .expect("valid reference pattern")
    })
}

/// Name of a JSON value's type, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "object",
    }
}

/// String form of a value when spliced into a concatenation.
pub(crate) fn concat_piece(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Expr {
    /// Parse an expression from its JSON form.
    pub fn parse(value: &Value) -> Result<Expr, ExprError> {
        match value {
            Value::String(s) => Self::parse_interpolated(s),
            Value::Array(items) => Ok(Expr::List(
                items.iter().map(Expr::parse).collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => Self::parse_object(map),
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Expr, ExprError> {
        let directive = map.keys().find(|k| k.starts_with('$'));
        if let Some(key) = directive {
            if map.len() != 1 {
                return Err(ExprError::Parse(format!(
                    "directive '{}' must be the only key of its object",
                    key
                )));
            }
            return Self::parse_directive(key, &map[key]);
        }

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            fields.insert(key.clone(), Expr::parse(value)?);
        }
        Ok(Expr::Object(fields))
    }

    fn parse_directive(key: &str, arg: &Value) -> Result<Expr, ExprError> {
        match key {
            "$literal" => Ok(Expr::Literal(arg.clone())),
            "$param" => match arg {
                Value::String(name) => Ok(Expr::Param(name.clone())),
                _ => Err(ExprError::Parse("$param expects a parameter name".into())),
            },
            "$item" => match arg {
                Value::Null => Ok(Expr::Item(Vec::new())),
                Value::String(path) => Ok(Expr::Item(split_path(path))),
                _ => Err(ExprError::Parse("$item expects a field path or null".into())),
            },
            "$index" => Ok(Expr::Index),
            "$ref" => match arg {
                Value::String(path) => Self::parse_ref_path(path),
                Value::Object(fields) => {
                    let resource = fields
                        .get("resource")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| ExprError::Parse("$ref requires 'resource'".into()))?;
                    let output = fields
                        .get("output")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| ExprError::Parse("$ref requires 'output'".into()))?;
                    let index = match fields.get("index") {
                        Some(index) => Some(Box::new(Expr::parse(index)?)),
                        None => None,
                    };
                    Ok(Expr::Ref(RefExpr {
                        resource: resource.to_string(),
                        index,
                        output: output.to_string(),
                    }))
                }
                _ => Err(ExprError::Parse("$ref expects a path or an object".into())),
            },
            "$concat" => Ok(Expr::Concat(Self::parse_args(key, arg)?)),
            "$and" => Ok(Expr::And(Self::parse_args(key, arg)?)),
            "$or" => Ok(Expr::Or(Self::parse_args(key, arg)?)),
            "$eq" | "$ne" => {
                let [left, right] = Self::parse_fixed::<2>(key, arg)?;
                let (left, right) = (Box::new(left), Box::new(right));
                Ok(if key == "$eq" {
                    Expr::Eq(left, right)
                } else {
                    Expr::Ne(left, right)
                })
            }
            "$if" => {
                let [cond, then, otherwise] = Self::parse_fixed::<3>(key, arg)?;
                Ok(Expr::If(Box::new(cond), Box::new(then), Box::new(otherwise)))
            }
            "$not" => Ok(Expr::Not(Box::new(Expr::parse(arg)?))),
            "$length" => Ok(Expr::Length(Box::new(Expr::parse(arg)?))),
            other => Err(ExprError::Parse(format!("unknown directive '{}'", other))),
        }
    }

    fn parse_args(key: &str, arg: &Value) -> Result<Vec<Expr>, ExprError> {
        match arg {
            Value::Array(items) => items.iter().map(Expr::parse).collect(),
            _ => Err(ExprError::Parse(format!("{} expects a list of operands", key))),
        }
    }

    fn parse_fixed<const N: usize>(key: &str, arg: &Value) -> Result<[Expr; N], ExprError> {
        let args = Self::parse_args(key, arg)?;
        let count = args.len();
        args.try_into().map_err(|_| {
            ExprError::Parse(format!("{} expects {} operands, got {}", key, N, count))
        })
    }

    fn parse_interpolated(s: &str) -> Result<Expr, ExprError> {
        let pattern = interpolation_pattern();

        // a lone placeholder keeps the raw value
        if let Some(caps) = pattern.captures(s) {
            if let Some(whole) = caps.get(0) {
                if whole.start() == 0 && whole.end() == s.len() {
                    return Self::parse_placeholder(&caps[1]);
                }
            }
        } else {
            return Ok(Expr::Literal(Value::String(s.to_string())));
        }

        let mut parts = Vec::new();
        let mut last = 0;
        for caps in pattern.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                parts.push(Expr::Literal(Value::String(s[last..whole.start()].to_string())));
            }
            parts.push(Self::parse_placeholder(&caps[1])?);
            last = whole.end();
        }
        if last < s.len() {
            parts.push(Expr::Literal(Value::String(s[last..].to_string())));
        }
        Ok(Expr::Concat(parts))
    }

    fn parse_placeholder(path: &str) -> Result<Expr, ExprError> {
        let path = path.trim();
        if path == "index" {
            return Ok(Expr::Index);
        }
        if path == "item" {
            return Ok(Expr::Item(Vec::new()));
        }
        if let Some(rest) = path.strip_prefix("item.") {
            return Ok(Expr::Item(split_path(rest)));
        }
        if let Some(name) = path.strip_prefix("param.") {
            if name.is_empty() {
                return Err(ExprError::Parse("empty parameter name".into()));
            }
            return Ok(Expr::Param(name.to_string()));
        }
        if let Some(rest) = path.strip_prefix("ref.") {
            return Self::parse_ref_path(rest);
        }
        Err(ExprError::Parse(format!("unrecognized placeholder '{}'", path)))
    }

    /// Parse `template.output`, `template[2].output` or `template[index].output`.
    pub fn parse_ref_path(path: &str) -> Result<Expr, ExprError> {
        let caps = ref_path_pattern()
            .captures(path.trim())
            .ok_or_else(|| ExprError::Parse(format!("invalid reference '{}'", path)))?;

        let index = match caps.get(2).map(|m| m.as_str()) {
            None => None,
            Some("index") => Some(Box::new(Expr::Index)),
            Some(digits) => {
                let n: u64 = digits
                    .parse()
                    .map_err(|_| ExprError::Parse(format!("invalid index in '{}'", path)))?;
                Some(Box::new(Expr::Literal(Value::from(n))))
            }
        };

        Ok(Expr::Ref(RefExpr {
            resource: caps[1].to_string(),
            index,
            output: caps[3].to_string(),
        }))
    }

    /// Whether any reference appears in the expression.
    pub fn contains_ref(&self) -> bool {
        !self.refs().is_empty()
    }

    /// Every reference in the expression.
    pub fn refs(&self) -> Vec<&RefExpr> {
        let mut found = Vec::new();
        self.collect_refs(&mut found);
        found
    }

    fn collect_refs<'a>(&'a self, found: &mut Vec<&'a RefExpr>) {
        match self {
            Expr::Literal(_) | Expr::Param(_) | Expr::Item(_) | Expr::Index => {}
            Expr::Ref(r) => {
                found.push(r);
                if let Some(index) = &r.index {
                    index.collect_refs(found);
                }
            }
            Expr::Concat(items) | Expr::List(items) | Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_refs(found);
                }
            }
            Expr::Object(fields) => {
                for field in fields.values() {
                    field.collect_refs(found);
                }
            }
            Expr::Eq(a, b) | Expr::Ne(a, b) => {
                a.collect_refs(found);
                b.collect_refs(found);
            }
            Expr::Not(a) | Expr::Length(a) => a.collect_refs(found),
            Expr::If(c, t, e) => {
                c.collect_refs(found);
                t.collect_refs(found);
                e.collect_refs(found);
            }
        }
    }

    /// Evaluate against static inputs only. References are rejected.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Param(name) => ctx
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownParameter(name.clone())),
            Expr::Item(path) => {
                let item = ctx.item.ok_or(ExprError::NoLoopContext("item"))?;
                Ok(walk_path(item, path))
            }
            Expr::Index => ctx
                .index
                .map(Value::from)
                .ok_or(ExprError::NoLoopContext("index")),
            Expr::Ref(r) => Err(ExprError::NonStatic(r.to_string())),
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&concat_piece(&part.eval(ctx)?));
                }
                Ok(Value::String(out))
            }
            Expr::List(items) => Ok(Value::Array(
                items.iter().map(|i| i.eval(ctx)).collect::<Result<_, _>>()?,
            )),
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (key, field) in fields {
                    map.insert(key.clone(), field.eval(ctx)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Eq(a, b) => Ok(Value::Bool(a.eval(ctx)? == b.eval(ctx)?)),
            Expr::Ne(a, b) => Ok(Value::Bool(a.eval(ctx)? != b.eval(ctx)?)),
            Expr::Not(a) => Ok(Value::Bool(!eval_bool(a, ctx, "$not")?)),
            Expr::And(items) => {
                for item in items {
                    if !eval_bool(item, ctx, "$and")? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(items) => {
                for item in items {
                    if eval_bool(item, ctx, "$or")? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::If(cond, then, otherwise) => {
                if eval_bool(cond, ctx, "$if")? {
                    then.eval(ctx)
                } else {
                    otherwise.eval(ctx)
                }
            }
            Expr::Length(a) => match a.eval(ctx)? {
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                other => Err(ExprError::Type(format!(
                    "$length expects a sequence, object or string, got {}",
                    type_name(&other)
                ))),
            },
        }
    }

    /// Bind static inputs, leaving references to other instances in place.
    pub fn bind(&self, ctx: &EvalContext<'_>) -> Result<ParamValue, ExprError> {
        match self {
            Expr::Ref(r) => {
                let index = match &r.index {
                    Some(index) => {
                        let value = index.eval(ctx)?;
                        let n = value.as_u64().ok_or_else(|| {
                            ExprError::Type(format!(
                                "reference index must be a non-negative integer, got {}",
                                type_name(&value)
                            ))
                        })?;
                        Some(n as usize)
                    }
                    None => None,
                };
                Ok(ParamValue::Reference(Reference::new(
                    InstanceId {
                        template: r.resource.clone(),
                        index,
                    },
                    r.output.clone(),
                )))
            }
            Expr::Concat(parts) => {
                let bound = parts
                    .iter()
                    .map(|p| p.bind(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                if bound.iter().all(|p| matches!(p, ParamValue::Literal(_))) {
                    let joined = bound
                        .iter()
                        .map(|p| match p {
                            ParamValue::Literal(v) => concat_piece(v),
                            _ => String::new(),
                        })
                        .collect();
                    Ok(ParamValue::Literal(Value::String(joined)))
                } else {
                    Ok(ParamValue::Concat(bound))
                }
            }
            Expr::List(items) if self.contains_ref() => Ok(ParamValue::List(
                items.iter().map(|i| i.bind(ctx)).collect::<Result<_, _>>()?,
            )),
            Expr::Object(fields) if self.contains_ref() => {
                let mut bound = BTreeMap::new();
                for (key, field) in fields {
                    bound.insert(key.clone(), field.bind(ctx)?);
                }
                Ok(ParamValue::Object(bound))
            }
            other => Ok(ParamValue::Literal(other.eval(ctx)?)),
        }
    }
}

fn eval_bool(expr: &Expr, ctx: &EvalContext<'_>, op: &str) -> Result<bool, ExprError> {
    match expr.eval(ctx)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::Type(format!(
            "{} expects booleans, got {}",
            op,
            type_name(&other)
        ))),
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Follow a field path into a value. Missing fields yield null.
fn walk_path(value: &Value, path: &[String]) -> Value {
    let mut current = value;
    for segment in path {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}
