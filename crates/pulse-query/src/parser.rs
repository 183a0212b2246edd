//! Parser for query scripts.
//!
//! The grammar lives in `script.pest`. Expressions come out of it as flat
//! operand/operator runs and are folded into a tree by a Pratt parser.
//! Precedence, loosest first:
//!
//! | level      | operators                 | associativity |
//! |------------|---------------------------|---------------|
//! | or         | `or`, `\|\|`              | left          |
//! | and        | `and`, `&&`               | left          |
//! | not        | `not`, `!` (prefix)       | right         |
//! | comparison | `==` `!=` `<` `<=` `>` `>=` | left        |
//! | additive   | `+` `-`                   | left          |
//! | term       | `*` `/` `%`               | left          |
//! | unary      | `-` (prefix)              | right         |
//! | primary    | literals, calls, `( )`    |               |
//!
//! Nesting is capped at [`MAX_DEPTH`] levels, counting brackets, prefix
//! operators and the height of the expression tree. Deeper scripts are
//! rejected with a `ParseError` before anything recurses that far.

use std::sync::LazyLock;

use pest::Parser;
use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

use crate::ast::{Assignment, BinaryOp, Expr, ExprKind, Script, UnaryOp};
use crate::error::{Position, QueryError};

/// Deepest nesting a script may use.
pub const MAX_DEPTH: usize = 128;

#[derive(Parser)]
#[grammar = "script.pest"]
struct ScriptParser;

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::prefix(Rule::not))
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::neg))
});

/// Parses script source into a [`Script`].
pub fn parse(source: &str) -> Result<Script, QueryError> {
    check_brackets(source)?;
    let mut pairs = ScriptParser::parse(Rule::script, source).map_err(syntax_error)?;
    let root = next(&mut pairs, Position::new(1, 1))?;
    script(root)
}

/// An expression and the height of its tree.
struct Node {
    expr: Expr,
    height: usize,
}

fn script(root: Pair<'_, Rule>) -> Result<Script, QueryError> {
    let end = position(&root);
    let mut assignments = Vec::new();
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::assignment => {
                let at = position(&pair);
                let mut inner = pair.into_inner();
                let name = next(&mut inner, at)?.as_str().to_string();
                let value = expression(next(&mut inner, at)?, 0)?.expr;
                assignments.push(Assignment {
                    name,
                    value,
                    position: at,
                });
            }
            Rule::return_stmt => {
                let at = position(&pair);
                let body = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::expr)
                    .ok_or_else(|| malformed(at))?;
                return Ok(Script {
                    assignments,
                    result: expression(body, 0)?.expr,
                });
            }
            _ => {}
        }
    }
    Err(QueryError::parse("script has no RETURN statement", end))
}

/// Folds one `expr` run into a tree.
///
/// `outer` is the nesting already spent by enclosing expressions.
fn expression(pair: Pair<'_, Rule>, outer: usize) -> Result<Node, QueryError> {
    let at = position(&pair);
    // Prefix operators recurse inside the Pratt parser before any node is
    // built, so they are budgeted up front.
    let prefixes = pair
        .clone()
        .into_inner()
        .filter(|p| matches!(p.as_rule(), Rule::neg | Rule::not))
        .count();
    if outer + prefixes > MAX_DEPTH {
        return Err(too_deep(at));
    }
    let outer = outer + prefixes;

    PRATT
        .map_primary(|operand| primary(operand, outer + 1))
        .map_prefix(|op, operand| {
            let operand = operand?;
            let unary = match op.as_rule() {
                Rule::neg => UnaryOp::Neg,
                _ => UnaryOp::Not,
            };
            node(
                ExprKind::Unary {
                    op: unary,
                    operand: Box::new(operand.expr),
                },
                position(&op),
                operand.height + 1,
                outer,
            )
        })
        .map_infix(|lhs, op, rhs| {
            let (lhs, rhs) = (lhs?, rhs?);
            let at = position(&op);
            let binary = binary_op(op.as_rule()).ok_or_else(|| malformed(at))?;
            node(
                ExprKind::Binary {
                    op: binary,
                    lhs: Box::new(lhs.expr),
                    rhs: Box::new(rhs.expr),
                },
                at,
                lhs.height.max(rhs.height) + 1,
                outer,
            )
        })
        .parse(pair.into_inner())
}

fn primary(pair: Pair<'_, Rule>, outer: usize) -> Result<Node, QueryError> {
    let at = position(&pair);
    match pair.as_rule() {
        Rule::expr => expression(pair, outer),
        Rule::number => {
            let n = pair
                .as_str()
                .parse::<f64>()
                .map_err(|_| QueryError::parse(format!("invalid number '{}'", pair.as_str()), at))?;
            node(ExprKind::Number(n), at, 1, outer)
        }
        Rule::string => node(ExprKind::Str(unescape(pair)?), at, 1, outer),
        Rule::boolean => node(
            ExprKind::Bool(matches!(pair.as_str(), "true" | "True")),
            at,
            1,
            outer,
        ),
        Rule::ident => node(ExprKind::Var(pair.as_str().to_string()), at, 1, outer),
        Rule::list => {
            let (items, height) = expressions(pair.into_inner(), outer)?;
            node(ExprKind::List(items), at, height + 1, outer)
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = next(&mut inner, at)?.as_str().to_string();
            let (args, height) = expressions(inner, outer)?;
            node(ExprKind::Call { name, args }, at, height + 1, outer)
        }
        Rule::object => {
            let mut fields = Vec::new();
            let mut height = 0;
            for field in pair.into_inner() {
                let field_at = position(&field);
                let mut inner = field.into_inner();
                let key = next(&mut inner, field_at)?;
                let key = match key.as_rule() {
                    Rule::string => unescape(key)?,
                    _ => key.as_str().to_string(),
                };
                let value = expression(next(&mut inner, field_at)?, outer)?;
                height = height.max(value.height);
                fields.push((key, value.expr));
            }
            node(ExprKind::Object(fields), at, height + 1, outer)
        }
        _ => Err(malformed(at)),
    }
}

/// Builds every expression in `pairs`, returning them with their tallest height.
fn expressions(pairs: Pairs<'_, Rule>, outer: usize) -> Result<(Vec<Expr>, usize), QueryError> {
    let mut exprs = Vec::new();
    let mut height = 0;
    for pair in pairs {
        let built = expression(pair, outer)?;
        height = height.max(built.height);
        exprs.push(built.expr);
    }
    Ok((exprs, height))
}

fn node(kind: ExprKind, position: Position, height: usize, outer: usize) -> Result<Node, QueryError> {
    if outer + height > MAX_DEPTH {
        return Err(too_deep(position));
    }
    Ok(Node {
        expr: Expr { kind, position },
        height,
    })
}

const fn binary_op(rule: Rule) -> Option<BinaryOp> {
    Some(match rule {
        Rule::or => BinaryOp::Or,
        Rule::and => BinaryOp::And,
        Rule::eq => BinaryOp::Eq,
        Rule::ne => BinaryOp::NotEq,
        Rule::lt => BinaryOp::Lt,
        Rule::le => BinaryOp::Le,
        Rule::gt => BinaryOp::Gt,
        Rule::ge => BinaryOp::Ge,
        Rule::add => BinaryOp::Add,
        Rule::sub => BinaryOp::Sub,
        Rule::mul => BinaryOp::Mul,
        Rule::div => BinaryOp::Div,
        Rule::rem => BinaryOp::Mod,
        _ => return None,
    })
}

/// Decodes the escapes in a string literal.
fn unescape(pair: Pair<'_, Rule>) -> Result<String, QueryError> {
    let at = position(&pair);
    let raw = pair.into_inner().next().map_or("", |chars| chars.as_str());
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().enumerate();
    while let Some((index, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.next().map(|(_, c)| c) {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some(c @ ('\\' | '"' | '\'' | '/')) => c,
            other => {
                // +1 skips the opening quote.
                let column = at
                    .column
                    .saturating_add(1)
                    .saturating_add(u32::try_from(index).unwrap_or(u32::MAX));
                return Err(QueryError::parse(
                    format!("unknown escape '\\{}'", other.unwrap_or_default()),
                    Position::new(at.line, column),
                ));
            }
        };
        out.push(escaped);
    }
    Ok(out)
}

/// Rejects bracket nesting past [`MAX_DEPTH`] before the grammar recurses
/// into it. Brackets inside strings and comments do not count.
fn check_brackets(source: &str) -> Result<(), QueryError> {
    let mut depth = 0usize;
    let (mut line, mut column) = (1u32, 0u32);
    let mut quote = None;
    let mut escaped = false;
    let mut comment = false;

    for c in source.chars() {
        if c == '\n' {
            line = line.saturating_add(1);
            column = 0;
            quote = None;
            escaped = false;
            comment = false;
            continue;
        }
        column = column.saturating_add(1);
        if comment {
            continue;
        }
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '#' => comment = true,
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(too_deep(Position::new(line, column)));
                }
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn too_deep(at: Position) -> QueryError {
    QueryError::parse(format!("script nests deeper than {MAX_DEPTH} levels"), at)
}

fn malformed(at: Position) -> QueryError {
    QueryError::parse("malformed syntax tree", at)
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>, at: Position) -> Result<Pair<'i, Rule>, QueryError> {
    pairs.next().ok_or_else(|| malformed(at))
}

fn position(pair: &Pair<'_, Rule>) -> Position {
    let (line, column) = pair.as_span().start_pos().line_col();
    line_col(line, column)
}

fn line_col(line: usize, column: usize) -> Position {
    Position::new(
        u32::try_from(line).unwrap_or(u32::MAX),
        u32::try_from(column).unwrap_or(u32::MAX),
    )
}

fn syntax_error(err: PestError<Rule>) -> QueryError {
    let (line, column) = match err.line_col {
        LineColLocation::Pos(at) | LineColLocation::Span(at, _) => at,
    };
    let err = err.renamed_rules(describe);
    QueryError::parse(err.variant.message().into_owned(), line_col(line, column))
}

/// How a grammar rule reads in error messages.
fn describe(rule: &Rule) -> String {
    let text = match rule {
        Rule::EOI => "end of input",
        Rule::assignment => "an assignment",
        Rule::return_stmt | Rule::return_kw => "RETURN",
        Rule::semicolon => "';'",
        Rule::expr => "an expression",
        Rule::ident => "an identifier",
        Rule::number => "a number",
        Rule::string => "a string",
        Rule::boolean => "a boolean",
        Rule::list => "a list",
        Rule::object => "an object",
        Rule::field => "an object field",
        Rule::call => "a function call",
        Rule::neg | Rule::sub => "'-'",
        Rule::not => "'not'",
        Rule::or => "'or'",
        Rule::and => "'and'",
        Rule::eq => "'=='",
        Rule::ne => "'!='",
        Rule::le => "'<='",
        Rule::ge => "'>='",
        Rule::lt => "'<'",
        Rule::gt => "'>'",
        Rule::add => "'+'",
        Rule::mul => "'*'",
        Rule::div => "'/'",
        Rule::rem => "'%'",
        other => return format!("{other:?}"),
    };
    text.to_string()
}
