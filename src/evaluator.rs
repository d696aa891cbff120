use crate::color::Rgba;
use crate::context::{Context, Diagnostic, DiagnosticKind, Value};
use crate::error::{EvalError, EvalResult, ExprResult};
use crate::parser::{ExprParser, TokenSequence};
use crate::token::{Range, Token, TokenKind, SPACE_GLUE};
use std::cmp::Ordering;

/// 控制 `/` 是否按 CSS 简写输出为文本的作用域伪变量，取值 0/1/2。
pub const MAGIC_DIV: &str = "%magic-div";

/// 后缀序列的栈式求值器。
///
/// 变量解析的递归保护保存在求值器自身，每次顶层求值都应新建一个，
/// 上下文只读共享。
pub struct Evaluator<'a> {
    context: &'a dyn Context,
    guard: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a dyn Context) -> Self {
        Self {
            context,
            guard: Vec::new(),
        }
    }

    pub fn evaluate(&mut self, expression: &str) -> ExprResult<Token> {
        let tokens = ExprParser::new().parse(expression)?;
        Ok(self.evaluate_tokens(&tokens)?)
    }

    pub fn evaluate_tokens(&mut self, tokens: &TokenSequence) -> EvalResult<Token> {
        let mut stack: Vec<Token> = Vec::with_capacity(tokens.len());

        for item in tokens.iter() {
            match &item.kind {
                TokenKind::Op2 { op } => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    let result = self.binary(op, left, right, tokens.source())?;
                    stack.push(result);
                }
                TokenKind::Op1 { op } => {
                    let operand = pop(&mut stack)?;
                    if op != "-" {
                        return Err(EvalError::UndefinedOperator(op.clone()));
                    }
                    stack.push(operand.negated()?);
                }
                TokenKind::Variable { .. } => {
                    // 未定义的变量原样入栈，可能是关键字或函数名
                    let value = self.resolve_variable(item)?.unwrap_or_else(|| item.clone());
                    stack.push(value);
                }
                TokenKind::FunCall { name } => {
                    let argument = pop(&mut stack)?;
                    let result = self.call(name, argument)?;
                    stack.push(result);
                }
                TokenKind::Space => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(space_join(left, right));
                }
                _ => stack.push(item.clone()),
            }
        }

        match stack.len() {
            0 => Ok(Token::string("", None)),
            1 => pop(&mut stack),
            _ => Err(EvalError::Parity),
        }
    }

    /// 带递归保护的变量解析；未定义时返回 `None` 并发出诊断。
    pub fn resolve_variable(&mut self, token: &Token) -> EvalResult<Option<Token>> {
        let Some(name) = token.text() else {
            return Ok(None);
        };
        if self.guard.iter().any(|seen| seen == name) {
            return Err(EvalError::RecursiveReference(name.to_string()));
        }

        let Some(value) = self.context.variable(name) else {
            self.context.log(
                &format!("未定义的变量 \"{name}\""),
                Diagnostic {
                    kind: DiagnosticKind::Variable,
                    name,
                },
            );
            return Ok(None);
        };

        self.guard.push(name.to_string());
        let resolved = self.box_value(value);
        self.guard.pop();

        let mut resolved = resolved?;
        // 保留变量在源码中的位置，魔法除法与修补依赖它
        resolved.range = token.range;
        Ok(Some(resolved))
    }

    /// 把宿主返回的原始值转换为 token；文本会作为表达式求值，
    /// 解析或求值失败时退化为字符串（循环引用除外）。
    pub fn box_value(&mut self, value: Value) -> EvalResult<Token> {
        match value {
            Value::Token(token) => Ok(token),
            Value::Number(value) => Ok(Token::number(value, "")),
            Value::Bool(value) => Ok(Token::bool(value)),
            Value::List(items) => Ok(Token::list(items)),
            Value::Text(text) => {
                let Ok(tokens) = ExprParser::new().parse(&text) else {
                    return Ok(Token::quoted_text(&text));
                };
                match self.evaluate_tokens(&tokens) {
                    Ok(token) => Ok(token),
                    Err(err @ EvalError::RecursiveReference(_)) => Err(err),
                    Err(err) => {
                        log::trace!("`{text}` 求值失败，按字符串处理: {err}");
                        Ok(Token::quoted_text(&text))
                    }
                }
            }
        }
    }

    fn binary(&mut self, op: &str, left: Token, right: Token, source: &str) -> EvalResult<Token> {
        if let Some(custom) = self.context.function(op) {
            if let Some(value) = custom(&[left.clone(), right.clone()])? {
                let mut result = self.box_value(value)?;
                result.range = merge_ranges(left.range, right.range);
                return Ok(result);
            }
        }

        if op == "/" {
            if let Some(text) = self.magic_divide(&left, &right, source) {
                return Ok(text);
            }
        }

        binary_operation(op, &left, &right)
    }

    fn magic_mode(&self) -> u8 {
        let mode = match self.context.variable(MAGIC_DIV) {
            Some(Value::Number(value)) => value,
            Some(Value::Bool(value)) => f64::from(u8::from(value)),
            Some(Value::Text(text)) => crate::utils::coerce_number(&text),
            Some(Value::Token(token)) => token.to_primitive().as_f64(),
            Some(Value::List(_)) | None => 0.0,
        };
        if mode == 1.0 {
            1
        } else if mode == 2.0 {
            2
        } else {
            0
        }
    }

    /// `28px/35px` 形式：`/` 两侧没有空白时按模式决定是否输出为文本。
    /// 模式 1 只看空白；模式 2 还要求两侧都是源码中的字面值（不是变量）。
    fn magic_divide(&self, left: &Token, right: &Token, source: &str) -> Option<Token> {
        let mode = self.magic_mode();
        if mode == 0 {
            return None;
        }
        let (Some(lr), Some(rr)) = (left.range, right.range) else {
            return None;
        };
        let no_spaces = rr.0 == lr.1 + 1;
        let concat = match mode {
            1 => no_spaces,
            _ => no_spaces && is_plain(left, source) && is_plain(right, source),
        };
        concat.then(|| Token::string(format!("{left}/{right}"), None).with_range((lr.0, rr.1)))
    }

    fn call(&mut self, name: &str, argument: Token) -> EvalResult<Token> {
        let Some(function) = self.context.function(name) else {
            if name.starts_with(|ch: char| ch.is_alphanumeric() || ch == '_') {
                self.context.log(
                    &format!("未定义的函数 \"{name}\""),
                    Diagnostic {
                        kind: DiagnosticKind::Function,
                        name,
                    },
                );
            }
            return Ok(call_text(name, &argument));
        };

        let fallback = call_text(name, &argument);
        let mut args = match argument.kind {
            TokenKind::List { items, glue } if glue != SPACE_GLUE => items,
            kind => {
                let argument = Token { kind, ..argument };
                if matches!(argument.kind, TokenKind::List { .. }) {
                    // 空格列表作为一个整体传入
                    vec![Token::string(argument.to_string(), None)]
                } else {
                    vec![argument]
                }
            }
        };
        // 参数入栈时已解析过，剩下的变量就是未定义的名字，原样传给函数
        args.retain(|arg| !arg.is_nullary());

        match function(&args)? {
            Some(value) => {
                let mut result = self.box_value(value)?;
                result.range = None;
                Ok(result)
            }
            None => Ok(fallback),
        }
    }
}

fn pop(stack: &mut Vec<Token>) -> EvalResult<Token> {
    stack.pop().ok_or(EvalError::Parity)
}

fn merge_ranges(left: Option<Range>, right: Option<Range>) -> Option<Range> {
    match (left, right) {
        (Some(l), Some(r)) => Some((l.0.min(r.0), l.1.max(r.1))),
        (range, None) | (None, range) => range,
    }
}

fn is_plain(token: &Token, source: &str) -> bool {
    token
        .range
        .and_then(|(start, end)| source.get(start..end))
        .is_some_and(|text| text == token.to_string())
}

/// 函数不存在或不处理时，重建 `name(args)` 文本。
fn call_text(name: &str, argument: &Token) -> Token {
    let text = if argument.is_nullary() {
        format!("{name}()")
    } else {
        format!("{name}({argument})")
    };
    Token::string(text, None)
}

/// 空格运算符：两侧的列表都会展开，结果为空格连接的列表。
fn space_join(left: Token, right: Token) -> Token {
    let range = merge_ranges(left.range, right.range);
    let mut items = Vec::new();
    for token in [left, right] {
        match token.kind {
            TokenKind::List { items: inner, .. } => items.extend(inner),
            kind => items.push(Token { kind, ..token }),
        }
    }
    let mut list = Token::space_list(items);
    list.range = range;
    list
}

/// 逗号运算符：展开逗号列表，空格列表作为单个元素保留。
fn comma_join(left: &Token, right: &Token) -> Token {
    let mut items = Vec::new();
    for token in [left, right] {
        match &token.kind {
            TokenKind::List { items: inner, glue } if glue != SPACE_GLUE => {
                items.extend(inner.iter().cloned());
            }
            _ => items.push(token.clone()),
        }
    }
    Token::list(items)
}

/// 内置二元运算表，不含宿主覆盖与魔法除法。
pub fn binary_operation(op: &str, left: &Token, right: &Token) -> EvalResult<Token> {
    let mut result = match op {
        "+" | "-" | "*" | "/" => arithmetic(op, left, right)?,
        "=" | "==" => Token::bool(equals(left, right)),
        "<" | ">" | "<=" | "=<" | ">=" | "=>" | "!=" => Token::bool(compare(op, left, right)),
        "," => comma_join(left, right),
        other => return Err(EvalError::UndefinedOperator(other.to_string())),
    };
    result.range = merge_ranges(left.range, right.range);
    Ok(result)
}

fn apply(op: &str, a: f64, b: f64) -> f64 {
    match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        _ => a / b,
    }
}

fn arithmetic(op: &str, left: &Token, right: &Token) -> EvalResult<Token> {
    if left.is_color() || right.is_color() {
        let a = left.to_rgba();
        let b = right.to_rgba();
        // alpha 相同时不参与运算，否则 `#000 - #ccc` 会得到透明色
        let alpha = if a.a == b.a { a.a } else { apply(op, a.a, b.a) };
        return Ok(Token::color(Rgba::new(
            apply(op, a.r, b.r),
            apply(op, a.g, b.g),
            apply(op, a.b, b.b),
            alpha,
        )));
    }

    let a = left.to_primitive();
    let b = right.to_primitive();
    if op == "+" && (a.is_text() || b.is_text()) {
        let text = format!("{}{}", a.as_text(), b.as_text());
        let quote = match &left.kind {
            TokenKind::String { quote, .. } => *quote,
            _ => None,
        };
        return Ok(Token::string(text, quote));
    }

    let value = apply(op, a.as_f64(), b.as_f64());
    if !value.is_finite() {
        return Err(EvalError::NotANumber);
    }
    let unit = if left.unit().is_empty() {
        right.unit()
    } else {
        left.unit()
    };
    Ok(Token::number(value, unit))
}

fn equals(left: &Token, right: &Token) -> bool {
    if left.is_number() && right.is_number() && (left.unit().is_empty() || right.unit().is_empty()) {
        return left.as_number() == right.as_number();
    }
    // 两侧都带引号时忽略引号种类
    if let (
        TokenKind::String { value: a, quote: Some(_) },
        TokenKind::String { value: b, quote: Some(_) },
    ) = (&left.kind, &right.kind)
    {
        return a == b;
    }
    left.to_string() == right.to_string()
}

fn compare(op: &str, left: &Token, right: &Token) -> bool {
    let a = left.to_primitive();
    let b = right.to_primitive();
    let ordering = if a.is_text() && b.is_text() {
        a.as_text().partial_cmp(&b.as_text())
    } else {
        a.as_f64().partial_cmp(&b.as_f64())
    };
    match op {
        "<" => ordering == Some(Ordering::Less),
        ">" => ordering == Some(Ordering::Greater),
        "<=" | "=<" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        ">=" | "=>" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => ordering != Some(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EmptyContext, Scope};
    use pretty_assertions::assert_eq;

    fn eval_in(expression: &str, scope: &Scope) -> String {
        Evaluator::new(scope).evaluate(expression).unwrap().to_string()
    }

    fn eval(expression: &str) -> String {
        Evaluator::new(&EmptyContext)
            .evaluate(expression)
            .unwrap()
            .to_string()
    }

    #[test]
    fn arithmetic_with_units() {
        assert_eq!(eval("1 + 2"), "3");
        assert_eq!(eval("(1 + 2) * 3"), "9");
        assert_eq!(eval("6 / -2"), "-3");
        assert_eq!(eval("1em + 2px"), "3em");
        assert_eq!(eval("100% / 4"), "25%");
        assert_eq!(eval("2px-1px"), "1px");
        assert_eq!(eval("-(1 + 2)"), "-3");
    }

    #[test]
    fn color_algebra() {
        assert_eq!(eval("#111 + #222"), "#333333");
        assert_eq!(eval("3 * #111"), "#333333");
        assert_eq!(eval("#fff + 2"), "#ffffff");
        assert_eq!(eval("red + #00f"), "#ff00ff");
        assert_eq!(eval("#fff-#111"), "#eeeeee");
        assert_eq!(eval("#fff-1"), "#fefefe");
    }

    #[test]
    fn strings_concatenate() {
        assert_eq!(eval("'a' + 'b'"), "'ab'");
        assert_eq!(eval("1 + 'px'"), "1px");
        assert_eq!(eval("~\"calc(100% - 10px)\""), "calc(100% - 10px)");
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("10px == 10"), "true");
        assert_eq!(eval("10px == 10em"), "false");
        assert_eq!(eval("'a' == \"a\""), "true");
        assert_eq!(eval("2 > 1"), "true");
        assert_eq!(eval("2 =< 1"), "false");
        assert_eq!(eval("1 != 2"), "true");
    }

    #[test]
    fn lists_keep_space_groups() {
        assert_eq!(eval("1px solid red"), "1px solid red");
        assert_eq!(eval("a b, c d"), "a b, c d");
        let token = Evaluator::new(&EmptyContext).evaluate("a b, c").unwrap();
        let TokenKind::List { items, glue } = token.kind else {
            panic!("应为列表");
        };
        assert_eq!(glue, ", ");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn empty_expression_is_empty_string() {
        assert_eq!(eval("  "), "");
    }

    #[test]
    fn variables_resolve_recursively() {
        let scope: Scope = [("@a", "@b * 2"), ("@b", "3px")].into_iter().collect();
        assert_eq!(eval_in("@a + 1", &scope), "7px");
        assert_eq!(eval_in("@a + @a", &scope), "12px");
    }

    #[test]
    fn recursive_reference_is_an_error() {
        let scope: Scope = [("@a", "@b"), ("@b", "@a")].into_iter().collect();
        let err = Evaluator::new(&scope).evaluate("@a").unwrap_err();
        assert_eq!(
            err,
            crate::error::ExprError::Eval(EvalError::RecursiveReference("@a".into()))
        );
    }

    #[test]
    fn unknown_function_is_rebuilt_as_text() {
        let scope: Scope = [("@a", 2.0), ("@b", 4.0)].into_iter().collect();
        assert_eq!(eval_in("bar(@a, @b)", &scope), "bar(2, 4)");
        assert_eq!(eval_in("bar()", &scope), "bar()");
        assert_eq!(eval_in("saturate(3)", &scope), "saturate(3)");
    }

    #[test]
    fn unresolved_argument_is_reported_once() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let mut scope = Scope::new().with_logger(move |_, diagnostic| {
            sink.lock().unwrap().push(diagnostic.name.to_string());
        });
        scope.define("keep", |_| Ok(None));

        assert_eq!(eval_in("keep(@missing, 1)", &scope), "keep(@missing, 1)");
        assert_eq!(*seen.lock().unwrap(), vec!["@missing".to_string()]);
    }

    #[test]
    fn builtin_functions_are_called() {
        assert_eq!(eval("lighten(#336699, 20%)"), "#6699cc");
        assert_eq!(eval("rgba(0, 0, 0, .5)"), "rgba(0, 0, 0, 0.5)");
        assert_eq!(eval("percentage(0.5) + 1"), "51%");
    }

    #[test]
    fn unresolvable_text_stays_literal() {
        let scope: Scope = [("@font", "Arial, sans-serif"), ("@bad", "a - 1")].into_iter().collect();
        assert_eq!(eval_in("@font", &scope), "Arial, sans-serif");
        assert_eq!(eval_in("@bad", &scope), "a - 1");
    }

    #[test]
    fn magic_division() {
        let mut scope: Scope = [("@a", "28px"), ("@b", "35px")].into_iter().collect();
        scope.set(MAGIC_DIV, 1.0);
        assert_eq!(eval_in("@a/@b", &scope), "28px/35px");
        assert_eq!(eval_in("@a / @b", &scope), "0.8px");

        scope.set(MAGIC_DIV, 2.0);
        assert_eq!(eval_in("@a/@b", &scope), "0.8px");
        assert_eq!(eval_in("28px/35px", &scope), "28px/35px");

        scope.set(MAGIC_DIV, 0.0);
        assert_eq!(eval_in("28px/35px", &scope), "0.8px");
    }

    #[test]
    fn host_can_override_operators() {
        let mut scope = Scope::new();
        scope.define("*", |args| {
            let lucky = args[0].as_number() == Some(7.0);
            Ok(lucky.then(|| Value::Text("'lucky'".into())))
        });
        assert_eq!(eval_in("7 * 2", &scope), "'lucky'");
        assert_eq!(eval_in("3 * 2", &scope), "6");
    }

    #[test]
    fn failures() {
        let mut evaluator = Evaluator::new(&EmptyContext);
        assert!(matches!(
            evaluator.evaluate("1 / 0"),
            Err(crate::error::ExprError::Eval(EvalError::NotANumber))
        ));
        assert!(matches!(
            evaluator.evaluate("a || b"),
            Err(crate::error::ExprError::Eval(EvalError::UndefinedOperator(_)))
        ));
        assert!(matches!(
            evaluator.evaluate("a - 1"),
            Err(crate::error::ExprError::Eval(EvalError::NotANumber))
        ));
    }

    #[test]
    fn computed_values_span_their_operands() {
        let result = Evaluator::new(&EmptyContext).evaluate("1 + 2 * 3").unwrap();
        assert_eq!(result.range, Some((0, 9)));
    }
}
