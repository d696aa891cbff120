//! 表达式修补：在源码中找到一个只通过 `+`/`-` 与整体相连的字面值（安全 token），
//! 修改它让表达式得到期望结果，源码其余部分保持不变。

use crate::color::{self, Rgba};
use crate::context::Context;
use crate::error::EvalResult;
use crate::evaluator::{binary_operation, Evaluator};
use crate::parser::TokenSequence;
use crate::token::{Range, Token, TokenKind};
use crate::utils::format_number;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// 可安全修改的字面值，以及把它连接到表达式上的运算符。
#[derive(Debug, Clone, PartialEq)]
pub struct SafeToken {
    pub value: Token,
    pub op: Option<Token>,
    pub side: Option<Side>,
    /// 整个表达式只有这一个值。
    pub single: bool,
}

impl SafeToken {
    /// 参与求和的有符号数值，颜色按 24 位整数计算。
    pub fn signed_value(&self) -> f64 {
        let value = self.value.to_primitive().as_f64();
        let subtracted = self.side == Some(Side::Right)
            && self.op.as_ref().and_then(Token::text) == Some("-");
        if subtracted {
            -value
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub expression: String,
    /// `false` 表示无法局部修改，`expression` 是期望值的完整替换。
    pub safe: bool,
}

impl PatchResult {
    fn new(expression: impl Into<String>, safe: bool) -> Self {
        Self {
            expression: expression.into(),
            safe,
        }
    }
}

enum Slot {
    Leaf(Token),
    Complex,
    Candidate(usize),
}

struct Candidate {
    safe: SafeToken,
    bad: bool,
}

fn is_complex(slot: &Slot) -> bool {
    match slot {
        Slot::Leaf(token) => match &token.kind {
            TokenKind::Variable { name } => !color::is_color(name),
            _ => false,
        },
        Slot::Complex | Slot::Candidate(_) => true,
    }
}

fn mark_bad(candidates: &mut [Candidate], slot: &Slot) {
    if let Slot::Candidate(index) = slot {
        candidates[*index].bad = true;
    }
}

/// 在后缀序列上做一次影子求值，只记录各个值能否被安全修改。
///
/// 每次 `+`/`-` 连接一个简单值和一个复杂值时产生新的候选；
/// 其他运算、函数调用会让参与的候选失效。最后返回最后产生且仍有效的候选。
pub fn find_safe_token(tokens: &TokenSequence) -> Option<SafeToken> {
    let mut stack: Vec<Slot> = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for item in tokens.iter() {
        match &item.kind {
            TokenKind::Number { .. } | TokenKind::Color { .. } | TokenKind::Variable { .. } => {
                stack.push(Slot::Leaf(item.clone()));
            }
            TokenKind::Op2 { op } if op == "+" || op == "-" => {
                let right = stack.pop().unwrap_or(Slot::Complex);
                let left = stack.pop().unwrap_or(Slot::Complex);
                let picked = if !is_complex(&right) {
                    Some((right, Side::Right))
                } else if !is_complex(&left) {
                    Some((left, Side::Left))
                } else {
                    None
                };
                match picked {
                    Some((Slot::Leaf(value), side)) => {
                        candidates.push(Candidate {
                            safe: SafeToken {
                                value,
                                op: Some(item.clone()),
                                side: Some(side),
                                single: false,
                            },
                            bad: false,
                        });
                        stack.push(Slot::Candidate(candidates.len() - 1));
                    }
                    _ => stack.push(Slot::Complex),
                }
            }
            TokenKind::Op2 { .. } | TokenKind::Space => {
                let right = stack.pop().unwrap_or(Slot::Complex);
                let left = stack.pop().unwrap_or(Slot::Complex);
                mark_bad(&mut candidates, &left);
                mark_bad(&mut candidates, &right);
                stack.push(Slot::Complex);
            }
            TokenKind::Op1 { .. } => {
                let folded = match stack.pop() {
                    Some(Slot::Leaf(value)) if value.is_number() => {
                        fold_sign(item, &value, tokens.source())
                    }
                    _ => None,
                };
                stack.push(folded.map_or(Slot::Complex, Slot::Leaf));
            }
            TokenKind::FunCall { .. } => {
                if let Some(argument) = stack.pop() {
                    mark_bad(&mut candidates, &argument);
                }
                stack.push(Slot::Complex);
            }
            TokenKind::String { .. } | TokenKind::Bool { .. } | TokenKind::List { .. } => {
                stack.push(Slot::Complex);
            }
        }
    }

    if candidates.is_empty() && stack.len() == 1 {
        if let Some(Slot::Leaf(value)) = stack.pop() {
            candidates.push(Candidate {
                safe: SafeToken {
                    value,
                    op: None,
                    side: None,
                    single: true,
                },
                bad: false,
            });
        }
    }

    pick_candidate(candidates)
}

/// 负号与数字之间只隔空白时并入数字本身，区间从负号开始；`-(2)` 之类不合并。
fn fold_sign(op: &Token, value: &Token, source: &str) -> Option<Token> {
    let (op_range, value_range) = (op.range?, value.range?);
    let between = source.get(op_range.1..value_range.0)?;
    if !between.chars().all(char::is_whitespace) {
        return None;
    }
    let mut folded = value.negated().ok()?;
    folded.range = Some((op_range.0, value_range.1));
    Some(folded)
}

fn pick_candidate(candidates: Vec<Candidate>) -> Option<SafeToken> {
    candidates
        .into_iter()
        .rev()
        .filter(|candidate| !candidate.bad)
        .find_map(|candidate| {
            let mut safe = candidate.safe;
            let keyword = match &safe.value.kind {
                TokenKind::Number { .. } | TokenKind::Color { .. } => None,
                // 颜色关键字按颜色处理
                TokenKind::Variable { name } => Some(color::parse_color(name, false)?),
                _ => return None,
            };
            if let Some(value) = keyword {
                let range = safe.value.range;
                safe.value = Token::color(value);
                safe.value.range = range;
            }
            Some(safe)
        })
}

/// 用 `replacement` 替换安全 token 的源码区间。
///
/// 替换为 0（或空）时连同连接它的运算符一起删除；右侧的值需要变号时改写运算符。
/// `safe` 为空时自动查找；找不到安全 token 时返回 `None`。
pub fn replace_safe_token(
    tokens: &TokenSequence,
    replacement: &str,
    safe: Option<&SafeToken>,
) -> Option<String> {
    let found;
    let safe = match safe {
        Some(safe) => safe,
        None => {
            found = find_safe_token(tokens)?;
            &found
        }
    };

    let source = tokens.source();
    let value_range = safe.value.range?;
    let op = safe.op.as_ref();
    let op_range = op.and_then(|op| op.range);
    let on_right = safe.side == Some(Side::Right);
    let mut edits: Vec<(Range, String)> = Vec::new();

    if replacement.is_empty() || replacement == "0" {
        if on_right {
            let start = op_range.map_or(value_range.0, |range| range.0);
            edits.push(((start, value_range.1), String::new()));
        } else {
            if let (Some(range), Some("+")) = (op_range, op.and_then(Token::text)) {
                edits.push((range, String::new()));
            }
            edits.push((value_range, String::new()));
        }
        let patched = apply_edits(source, edits);
        return Some(collapse_leading_minus(patched.trim()));
    }

    let value_negative = replacement.starts_with('-');
    let mut text = replacement;
    if on_right {
        // 右侧的值由运算符表示符号，写入的数字本身不带负号
        let op_negative = op.and_then(Token::text) == Some("-");
        if value_negative {
            text = &replacement[1..];
        }
        if value_negative != op_negative {
            if let Some(range) = op_range {
                let sign = if value_negative { "-" } else { "+" };
                edits.push((range, sign.to_string()));
            }
        }
    }
    edits.push((value_range, text.to_string()));
    Some(apply_edits(source, edits))
}

/// 从后往前应用互不重叠的替换，保证前面的区间不受影响。
fn apply_edits(source: &str, mut edits: Vec<(Range, String)>) -> String {
    edits.sort_by(|a, b| b.0 .0.cmp(&a.0 .0));
    let mut out = source.to_string();
    for ((start, end), text) in edits {
        if start <= end && end <= out.len() {
            out.replace_range(start..end, &text);
        }
    }
    out
}

fn collapse_leading_minus(text: &str) -> String {
    match text.strip_prefix('-') {
        Some(rest) if rest.starts_with(char::is_whitespace) => format!("-{}", rest.trim_start()),
        _ => text.to_string(),
    }
}

/// 期望值与实际值之差；相等时为 `None`。
struct Delta {
    value: Token,
    negative: bool,
}

impl Delta {
    fn compute(actual: &Token, expected: &Token) -> EvalResult<Option<Self>> {
        let mut value = binary_operation("-", expected, actual)?;
        let mut negative = false;

        if value.is_zero() {
            if !value.is_color() {
                return Ok(None);
            }
            // 颜色相减会出现负通道，打包后为 0 不代表相等，反向再算一次
            let reverse = binary_operation("-", actual, expected)?;
            if reverse.is_zero() {
                return Ok(None);
            }
            value = reverse;
            negative = true;
        }

        if value.as_number().is_some_and(|n| n < 0.0) {
            value = value.negated()?;
            negative = true;
        }
        Ok(Some(Self { value, negative }))
    }

    fn signed_value(&self) -> f64 {
        let value = self.value.to_primitive().as_f64();
        if self.negative {
            -value
        } else {
            value
        }
    }

    fn sign(&self) -> char {
        if self.negative {
            '-'
        } else {
            '+'
        }
    }
}

/// 类型相同才能修补，数字还要求单位相同；其余只支持颜色。
fn can_patch(actual: &Token, expected: &Token) -> bool {
    if !actual.same_kind(expected) {
        return false;
    }
    if actual.is_number() {
        return actual.unit() == expected.unit();
    }
    actual.is_color()
}

/// 修改表达式，使其求值结果为 `expected`。
///
/// `actual` 为空时先对表达式求值。类型或单位不一致时返回期望值本身并标记为不安全。
pub fn patch(
    tokens: &TokenSequence,
    context: &dyn Context,
    expected: &Token,
    actual: Option<Token>,
) -> EvalResult<PatchResult> {
    let actual = match actual {
        Some(actual) => actual,
        None => Evaluator::new(context).evaluate_tokens(tokens)?,
    };

    if !can_patch(&actual, expected) {
        log::trace!("`{}` 无法修补：{actual} 与 {expected} 类型不同", tokens.source());
        return Ok(PatchResult::new(expected.to_string(), false));
    }

    let Some(delta) = Delta::compute(&actual, expected)? else {
        return Ok(PatchResult::new(tokens.source(), true));
    };

    let Some(safe) = find_safe_token(tokens) else {
        log::trace!("`{}` 没有安全 token，追加差值", tokens.source());
        return Ok(PatchResult::new(
            format!("{} {} {}", tokens.source(), delta.sign(), delta.value),
            true,
        ));
    };

    if safe.single {
        return Ok(PatchResult::new(expected.to_string(), true));
    }

    let combined = safe.signed_value() + delta.signed_value();
    let replacement = if combined == 0.0 {
        "0".to_string()
    } else if delta.value.is_color() {
        let sign = if combined < 0.0 { "-" } else { "" };
        format!("{sign}{}", Rgba::from_decimal(combined.abs() as i64).to_css())
    } else {
        format!("{}{}", format_number(combined), delta.value.unit())
    };
    log::trace!("`{}` 的安全 token 改为 {replacement}", tokens.source());

    let expression = replace_safe_token(tokens, &replacement, Some(&safe))
        .unwrap_or_else(|| tokens.source().to_string());
    Ok(PatchResult::new(expression, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ExprParser;
    use pretty_assertions::assert_eq;

    fn parse(expression: &str) -> TokenSequence {
        ExprParser::new().parse(expression).unwrap()
    }

    /// 安全 token 的文本，右侧时带上运算符。
    fn safe_text(expression: &str) -> Option<String> {
        find_safe_token(&parse(expression)).map(|safe| {
            let op = match (safe.side, &safe.op) {
                (Some(Side::Right), Some(op)) => op.to_string(),
                _ => String::new(),
            };
            format!("{op}{}", safe.value)
        })
    }

    fn safe_value(expression: &str) -> Option<f64> {
        find_safe_token(&parse(expression)).map(|safe| safe.signed_value())
    }

    fn replace(expression: &str, replacement: &str) -> Option<String> {
        replace_safe_token(&parse(expression), replacement, None)
    }

    #[test]
    fn finds_single_values() {
        assert_eq!(safe_text("1").as_deref(), Some("1"));
        assert_eq!(safe_text("-1").as_deref(), Some("-1"));
        assert_eq!(safe_text("#fc0").as_deref(), Some("#ffcc00"));
        assert_eq!(safe_text("foo"), None);
    }

    #[test]
    fn prefers_the_last_additive_term() {
        assert_eq!(safe_text("1 + 2").as_deref(), Some("+2"));
        assert_eq!(safe_text("1 + 2 - 3").as_deref(), Some("-3"));
        assert_eq!(safe_text("1 + 2 - a").as_deref(), Some("+2"));
        assert_eq!(safe_text("1 - a").as_deref(), Some("1"));
        assert_eq!(safe_text("-1 - a").as_deref(), Some("-1"));
        assert_eq!(safe_text("(1 - a) + 2").as_deref(), Some("+2"));
        assert_eq!(safe_text("(1 - a) + b").as_deref(), Some("1"));
        assert_eq!(safe_text("#fff + a").as_deref(), Some("#ffffff"));
    }

    #[test]
    fn other_operators_disqualify_terms() {
        assert_eq!(safe_text("(1 - a) / b"), None);
        assert_eq!(safe_text("c(1 - a)"), None);
        assert_eq!(safe_text("c(1 - a) + 2").as_deref(), Some("+2"));
        assert_eq!(safe_text("c(1 - a) + 2 - b(3)").as_deref(), Some("+2"));
        assert_eq!(safe_text("c(1 - a) + 2 - b(3/2)").as_deref(), Some("+2"));
    }

    #[test]
    fn spaced_unary_minus_folds_into_the_number() {
        let safe = find_safe_token(&parse("a + - 2")).unwrap();
        assert_eq!(safe.value.to_string(), "-2");
        assert_eq!(safe.value.range, Some((4, 7)));
        assert_eq!(safe.side, Some(Side::Right));
        assert_eq!(safe.signed_value(), -2.0);

        assert_eq!(safe_text("a + -(2)"), None);
        assert_eq!(replace("a + - 2", "-1").as_deref(), Some("a - 1"));
        assert_eq!(replace("a + - 2", "0").as_deref(), Some("a"));
    }

    #[test]
    fn signed_values() {
        assert_eq!(safe_value("1 + 2"), Some(2.0));
        assert_eq!(safe_value("1 + 2 - 3"), Some(-3.0));
        assert_eq!(safe_value("1 - a"), Some(1.0));
        assert_eq!(safe_value("-1 - a"), Some(-1.0));
        assert_eq!(safe_value("#000"), Some(0.0));
        assert_eq!(safe_value("#010"), Some(f64::from(0x11 << 8)));
    }

    #[test]
    fn replaces_in_place() {
        assert_eq!(replace("1px", "2px").as_deref(), Some("2px"));
        assert_eq!(replace("-1px", "2px").as_deref(), Some("2px"));
        assert_eq!(replace("#fc0", "red").as_deref(), Some("red"));
        assert_eq!(replace("foo", "red"), None);
        assert_eq!(replace("1 + 2", "3").as_deref(), Some("1 + 3"));
        assert_eq!(replace("1 + 2 - 3", "-4").as_deref(), Some("1 + 2 - 4"));
        assert_eq!(replace("1 + 2 - a", "10").as_deref(), Some("1 + 10 - a"));
        assert_eq!(replace("(1 - a)", "5").as_deref(), Some("(5 - a)"));
        assert_eq!(replace("(1 - a) + b", "200").as_deref(), Some("(200 - a) + b"));
        assert_eq!(
            replace("c(1 - a) + 2 - b(3/2, 8)", "5").as_deref(),
            Some("c(1 - a) + 5 - b(3/2, 8)")
        );
    }

    #[test]
    fn flips_signs() {
        assert_eq!(replace("1 + 2", "-2").as_deref(), Some("1 - 2"));
        assert_eq!(replace("1 - 2", "3").as_deref(), Some("1 + 3"));
        assert_eq!(replace("1 - a", "3").as_deref(), Some("3 - a"));
        assert_eq!(replace("1 - a", "-3").as_deref(), Some("-3 - a"));
        assert_eq!(replace("-1 + a", "3").as_deref(), Some("3 + a"));
        assert_eq!(replace("a + #fff", "-#bc3").as_deref(), Some("a - #bc3"));
    }

    #[test]
    fn zero_removes_the_term() {
        assert_eq!(replace("1 + 2", "0").as_deref(), Some("1"));
        assert_eq!(replace("1 - 2", "0").as_deref(), Some("1"));
        assert_eq!(replace("a + 2", "0").as_deref(), Some("a"));
        assert_eq!(replace("1 + a", "0").as_deref(), Some("a"));
        assert_eq!(replace("-1 + a", "0").as_deref(), Some("a"));
        assert_eq!(replace("-1 - a", "0").as_deref(), Some("-a"));
    }
}
