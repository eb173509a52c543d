//! `(( operator args ))` expression evaluation over a merged document.
//!
//! Operands are dotted references (`meta.name`, `hosts.0`, `users.admin`),
//! double-quoted strings, numbers, `true`/`false` and `nil`. `a || b` falls
//! back to `b` when `a` cannot be resolved.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Number, Value};

use super::{operator_body, Document, MergeError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Literal(Value),
    Word(String),
    Or,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut literal = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some(other) => literal.push(other),
                        None => return Err("dangling escape".to_string()),
                    },
                    other => literal.push(other),
                }
            }
            if !closed {
                return Err("unterminated string literal".to_string());
            }
            tokens.push(Token::Literal(Value::String(literal)));
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '"' {
                break;
            }
            word.push(c);
            chars.next();
        }

        tokens.push(classify_word(word));
    }

    Ok(tokens)
}

fn classify_word(word: String) -> Token {
    match word.as_str() {
        "||" => Token::Or,
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "nil" | "null" | "~" => Token::Literal(Value::Null),
        _ => {
            if let Ok(int) = word.parse::<i64>() {
                return Token::Literal(Value::Number(int.into()));
            }
            if let Some(float) = word.parse::<f64>().ok().and_then(Number::from_f64) {
                return Token::Literal(Value::Number(float));
            }
            Token::Word(word)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Alternative {
    Literal(Value),
    Reference(String),
}

/// One operand with its `||` fallbacks, tried left to right.
type Operand = Vec<Alternative>;

#[derive(Debug, Clone, PartialEq)]
enum Expression {
    Grab(Operand),
    Concat(Vec<Operand>),
    Prune,
}

impl Expression {
    fn parse(body: &str, path: &str) -> Result<Self, MergeError> {
        let invalid = |reason: String| MergeError::InvalidExpression {
            path: path.to_string(),
            expression: body.to_string(),
            reason,
        };

        let mut tokens = tokenize(body).map_err(invalid)?.into_iter();
        let operator = match tokens.next() {
            Some(Token::Word(word)) => word,
            Some(_) => return Err(invalid("expected an operator name".to_string())),
            None => return Err(invalid("empty expression".to_string())),
        };

        let mut operands: Vec<Operand> = Vec::new();
        let mut pending_or = false;
        for token in tokens {
            let alternative = match token {
                Token::Or => {
                    if pending_or || operands.is_empty() {
                        return Err(invalid("'||' needs an operand on both sides".to_string()));
                    }
                    pending_or = true;
                    continue;
                }
                Token::Literal(value) => Alternative::Literal(value),
                Token::Word(word) => Alternative::Reference(word),
            };

            match operands.last_mut() {
                Some(operand) if pending_or => operand.push(alternative),
                _ => operands.push(vec![alternative]),
            }
            pending_or = false;
        }
        if pending_or {
            return Err(invalid("'||' needs an operand on both sides".to_string()));
        }

        match operator.as_str() {
            "grab" => {
                if operands.len() != 1 {
                    return Err(invalid(format!(
                        "grab takes exactly one operand, got {}",
                        operands.len()
                    )));
                }
                Ok(Expression::Grab(operands.remove(0)))
            }
            "concat" => {
                if operands.is_empty() {
                    return Err(invalid("concat needs at least one operand".to_string()));
                }
                Ok(Expression::Concat(operands))
            }
            "prune" => {
                if !operands.is_empty() {
                    return Err(invalid("prune takes no operands".to_string()));
                }
                Ok(Expression::Prune)
            }
            _ => Err(MergeError::UnknownOperator {
                path: path.to_string(),
                operator,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Value(Value),
    Prune,
}

/// Location of a node as its key segments. Keys may contain dots, so two
/// locations are only equal when their segments are.
type NodePath = Vec<String>;

struct Evaluator<'a> {
    root: &'a Value,
    cache: HashMap<NodePath, Resolved>,
    in_progress: HashSet<NodePath>,
}

/// Resolves every expression in `document`. Keys marked `(( prune ))` are
/// removed from the result.
pub fn evaluate(document: Document) -> Result<Document, MergeError> {
    let root = Value::Object(document);
    let mut evaluator = Evaluator {
        root: &root,
        cache: HashMap::new(),
        in_progress: HashSet::new(),
    };

    match evaluator.eval_node(&root, &[])? {
        Resolved::Value(Value::Object(map)) => Ok(map),
        Resolved::Value(_) | Resolved::Prune => Ok(Document::new()),
    }
}

impl<'a> Evaluator<'a> {
    fn eval_node(&mut self, value: &'a Value, path: &[String]) -> Result<Resolved, MergeError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }

        match value {
            Value::String(s) => match operator_body(s) {
                Some(body) => self.eval_expression(body, &path.join(".")),
                None => Ok(Resolved::Value(value.clone())),
            },
            Value::Object(map) => {
                let mut evaluated = Map::with_capacity(map.len());
                for (key, child) in map {
                    if let Resolved::Value(v) = self.eval_node(child, &extend(path, key))? {
                        evaluated.insert(key.clone(), v);
                    }
                }
                Ok(Resolved::Value(Value::Object(evaluated)))
            }
            Value::Array(items) => {
                let mut evaluated = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let item_path = extend(path, &index.to_string());
                    if let Resolved::Value(v) = self.eval_node(item, &item_path)? {
                        evaluated.push(v);
                    }
                }
                Ok(Resolved::Value(Value::Array(evaluated)))
            }
            other => Ok(Resolved::Value(other.clone())),
        }
    }

    fn eval_expression(&mut self, body: &str, path: &str) -> Result<Resolved, MergeError> {
        match Expression::parse(body, path)? {
            Expression::Prune => Ok(Resolved::Prune),
            Expression::Grab(operand) => Ok(Resolved::Value(self.eval_operand(&operand, path)?)),
            Expression::Concat(operands) => {
                let mut joined = String::new();
                for operand in &operands {
                    match self.eval_operand(operand, path)? {
                        Value::String(s) => joined.push_str(&s),
                        Value::Number(n) => joined.push_str(&n.to_string()),
                        Value::Bool(b) => joined.push_str(&b.to_string()),
                        other => {
                            return Err(MergeError::InvalidExpression {
                                path: path.to_string(),
                                expression: body.to_string(),
                                reason: format!("cannot concat {}", type_name(&other)),
                            })
                        }
                    }
                }
                Ok(Resolved::Value(Value::String(joined)))
            }
        }
    }

    fn eval_operand(&mut self, operand: &[Alternative], path: &str) -> Result<Value, MergeError> {
        for alternative in operand {
            match alternative {
                Alternative::Literal(value) => return Ok(value.clone()),
                Alternative::Reference(reference) => {
                    if let Some(value) = self.resolve_reference(reference)? {
                        return Ok(value);
                    }
                }
            }
        }

        let reference = operand
            .iter()
            .filter_map(|alternative| match alternative {
                Alternative::Reference(r) => Some(r.as_str()),
                Alternative::Literal(_) => None,
            })
            .collect::<Vec<_>>()
            .join(" || ");

        Err(MergeError::UnresolvedReference {
            path: path.to_string(),
            reference,
        })
    }

    /// Evaluated value at `reference`, or `None` if nothing is there.
    fn resolve_reference(&mut self, reference: &str) -> Result<Option<Value>, MergeError> {
        let segments: NodePath = reference.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Ok(None);
        }

        let mut node = self.root;
        for (depth, segment) in segments.iter().enumerate() {
            // An expression sits on the way down; evaluate it and keep
            // descending through its result.
            if node.as_str().and_then(operator_body).is_some() {
                let Some(value) = self.resolve_path(&segments[..depth], node)? else {
                    return Ok(None);
                };
                return Ok(descend(&value, &segments[depth..]).cloned());
            }

            match child(node, segment) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }

        self.resolve_path(&segments, node)
    }

    fn resolve_path(
        &mut self,
        path: &[String],
        node: &'a Value,
    ) -> Result<Option<Value>, MergeError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(match cached {
                Resolved::Value(v) => Some(v.clone()),
                Resolved::Prune => None,
            });
        }

        if !self.in_progress.insert(path.to_vec()) {
            return Err(MergeError::CyclicReference {
                path: path.join("."),
            });
        }
        let resolved = self.eval_node(node, path);
        self.in_progress.remove(path);
        let resolved = resolved?;

        self.cache.insert(path.to_vec(), resolved.clone());
        Ok(match resolved {
            Resolved::Value(v) => Some(v),
            Resolved::Prune => None,
        })
    }
}

fn child<'v>(node: &'v Value, segment: &str) -> Option<&'v Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => match segment.parse::<usize>() {
            Ok(index) => items.get(index),
            Err(_) => items
                .iter()
                .find(|item| item.get("name").and_then(Value::as_str) == Some(segment)),
        },
        _ => None,
    }
}

fn extend(path: &[String], segment: &str) -> NodePath {
    let mut extended = Vec::with_capacity(path.len() + 1);
    extended.extend_from_slice(path);
    extended.push(segment.to_string());
    extended
}

fn descend<'v>(mut node: &'v Value, segments: &[String]) -> Option<&'v Value> {
    for segment in segments {
        node = child(node, segment)?;
    }
    Some(node)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
