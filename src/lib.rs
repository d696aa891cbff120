//! css_expr_oxide 库入口：面向 CSS 预处理器的表达式引擎，提供 Rust 与 Node.js 两套接口。
//! 处理分为三个阶段：解析（Parser，中缀转后缀）→ 求值（Evaluator）→ 修补（Patcher，按期望值最小化改写源码）。

pub mod color;
mod cursor;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod patcher;
mod split;
pub mod token;
mod tokenizer;
mod utils;

pub use crate::context::{Callable, Context, Diagnostic, DiagnosticKind, EmptyContext, Scope, Value};
pub use crate::error::{EvalError, EvalResult, ExprError, ExprResult, ParseError, ParseResult};
pub use crate::evaluator::{Evaluator, MAGIC_DIV};
pub use crate::parser::{ExprParser, TokenSequence};
pub use crate::patcher::{find_safe_token, replace_safe_token, PatchResult, SafeToken, Side};
pub use crate::split::split;
pub use crate::token::{Range, Token, TokenKind};

use once_cell::sync::Lazy;
use regex::Regex;

static IMPORTANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!important\s*$").expect("important 正则编译失败"));

/// 把表达式解析为带源码区间的后缀 token 序列。
pub fn parse(expression: &str) -> ParseResult<TokenSequence> {
    ExprParser::new().parse(expression)
}

/// 解析并求值表达式。
pub fn evaluate(expression: &str, context: &dyn Context) -> ExprResult<Token> {
    Evaluator::new(context).evaluate(expression)
}

/// 对已解析的序列求值，可重复使用同一份解析结果。
pub fn evaluate_tokens(tokens: &TokenSequence, context: &dyn Context) -> EvalResult<Token> {
    Evaluator::new(context).evaluate_tokens(tokens)
}

/// 求值 CSS 属性值并输出文本，末尾的 `!important` 原样保留。
///
/// ```
/// use css_expr_oxide::{evaluate_value, Scope};
///
/// let mut scope = Scope::new();
/// scope.set("@gap", "12px");
/// let css = evaluate_value("@gap * 2 !important", &scope).unwrap();
/// assert_eq!(css, "24px !important");
/// ```
pub fn evaluate_value(expression: &str, context: &dyn Context) -> ExprResult<String> {
    let (expression, important) = match IMPORTANT_RE.find(expression) {
        Some(found) => (&expression[..found.start()], " !important"),
        None => (expression, ""),
    };
    let result = evaluate(expression, context)?;
    Ok(format!("{result}{important}"))
}

/// 修改表达式，使其结果等于 `expected`（同样是一个表达式，先在上下文中求值）。
pub fn patch(expression: &str, context: &dyn Context, expected: &str) -> ExprResult<PatchResult> {
    let tokens = parse(expression)?;
    let expected = evaluate(expected, context)?;
    Ok(patch_tokens(&tokens, context, &expected, None)?)
}

/// 在已解析的序列上修补；`actual` 为空时重新求值。
pub fn patch_tokens(
    tokens: &TokenSequence,
    context: &dyn Context,
    expected: &Token,
    actual: Option<Token>,
) -> EvalResult<PatchResult> {
    patcher::patch(tokens, context, expected, actual)
}

#[cfg(feature = "node")]
use napi::{Error, Result};
#[cfg(feature = "node")]
use napi_derive::napi;
#[cfg(feature = "node")]
use std::collections::HashMap;

/// Node.js 侧的修补结果。
#[cfg(feature = "node")]
#[napi(object)]
pub struct JsPatchResult {
    /// 修补后的表达式。
    pub expression: String,
    /// 为 false 时表达式被期望值整体替换。
    pub safe: bool,
}

/// 作用域以“名字 → 表达式文本”的对象传入。
#[cfg(feature = "node")]
fn js_scope(scope: Option<HashMap<String, String>>) -> Scope {
    scope.unwrap_or_default().into_iter().collect()
}

/// 暴露给 Node.js 的求值函数。
#[cfg(feature = "node")]
#[napi]
pub fn evaluate_expression(
    expression: String,
    scope: Option<HashMap<String, String>>,
) -> Result<String> {
    let scope = js_scope(scope);
    let result =
        evaluate_value(&expression, &scope).map_err(|err| Error::from_reason(err.to_string()))?;
    Ok(result)
}

/// 暴露给 Node.js 的修补函数。
#[cfg(feature = "node")]
#[napi]
pub fn patch_expression(
    expression: String,
    expected: String,
    scope: Option<HashMap<String, String>>,
) -> Result<JsPatchResult> {
    let scope = js_scope(scope);
    let result =
        patch(&expression, &scope, &expected).map_err(|err| Error::from_reason(err.to_string()))?;
    Ok(JsPatchResult {
        expression: result.expression,
        safe: result.safe,
    })
}
