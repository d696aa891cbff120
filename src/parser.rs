use crate::error::{ParseError, ParseResult};
use crate::token::{Token, TokenKind};
use crate::tokenizer::{Tokenizer, PAREN_OFFSET, PRIORITY_ADDITIVE, PRIORITY_CALL, PRIORITY_UNARY};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

const PRIMARY: u16 = 1;
const OPERATOR: u16 = 1 << 1;
const FUNCTION: u16 = 1 << 2;
const LPAREN: u16 = 1 << 3;
const RPAREN: u16 = 1 << 4;
const COMMA: u16 = 1 << 5;
const SIGN: u16 = 1 << 6;
const CALL: u16 = 1 << 7;
const NULLARY_CALL: u16 = 1 << 8;

/// 一个值开始的位置：值、左括号、函数或正负号。
const VALUE_START: u16 = PRIMARY | LPAREN | FUNCTION | SIGN;
/// 一个值结束之后。
const VALUE_END: u16 = OPERATOR | RPAREN | COMMA;

/// 解析结果：后缀序列以及 token 区间所引用的源码（已去除首尾空白）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSequence {
    tokens: Vec<Token>,
    source: String,
}

impl TokenSequence {
    pub fn new(tokens: Vec<Token>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            source: source.into(),
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

impl Deref for TokenSequence {
    type Target = [Token];

    fn deref(&self) -> &[Token] {
        &self.tokens
    }
}

/// 中缀表达式解析器，输出后缀（逆波兰）token 序列。
pub struct ExprParser;

impl ExprParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, input: &str) -> ParseResult<TokenSequence> {
        let source = input.trim();
        let mut state = ParseState::default();
        let mut lexer = Tokenizer::new(source);
        let mut expected = VALUE_START;

        while !lexer.is_eof() {
            lexer.mark();

            if let Some(space) = lexer.space_operator()? {
                state.operands += 2;
                state.push_operator(space);
                expected = VALUE_START;
            } else if lexer.is_eof() {
                break;
            } else if let Some(color) = lexer.color()? {
                if expected & PRIMARY == 0 {
                    return Err(lexer.unexpected("颜色"));
                }
                state.output.push(color);
                expected = VALUE_END;
            } else if let Some(number) = lexer.number()? {
                if expected & PRIMARY == 0 {
                    // `1 -2` 之类已经由空格运算符处理，这里只剩 `1-2`：视为加上负数
                    if number.as_number().is_some_and(|value| value < 0.0) {
                        state.operands += 2;
                        state.push_operator(Token::op2("+").with_priority(PRIORITY_ADDITIVE));
                    } else {
                        return Err(lexer.unexpected("数字"));
                    }
                }
                state.output.push(number);
                expected = VALUE_END;
            } else if let Some(op) = lexer.operator() {
                let is_sign = matches!(op.text(), Some("+" | "-"));
                if is_sign && expected & SIGN != 0 {
                    if op.text() == Some("-") {
                        state.operands += 1;
                        let mut unary = Token::op1("-").with_priority(PRIORITY_UNARY + state.offset);
                        unary.range = op.range;
                        // 前缀运算符还没有左操作数，不能触发出栈
                        state.operators.push(unary);
                    }
                    expected = VALUE_START;
                } else {
                    if expected & OPERATOR == 0 {
                        return Err(lexer.unexpected("运算符"));
                    }
                    state.operands += 2;
                    state.push_operator(op);
                    expected = VALUE_START;
                }
            } else if let Some(string) = lexer.string()? {
                if expected & PRIMARY == 0 {
                    return Err(lexer.unexpected("字符串"));
                }
                state.output.push(string);
                expected = VALUE_END;
            } else if let Some(paren) = lexer.left_paren() {
                if expected & LPAREN == 0 {
                    return Err(lexer.unexpected("\"(\""));
                }
                state.offset += PAREN_OFFSET;
                if expected & CALL != 0 {
                    let callee = state.output.pop().ok_or_else(|| lexer.unexpected("\"(\""))?;
                    let TokenKind::Variable { name } = callee.kind else {
                        return Err(lexer.unexpected("\"(\""));
                    };
                    let begin = callee.range.map_or(paren.0, |range| range.0);
                    state.operands += 1;
                    state.push_operator(
                        Token::fun_call(name)
                            .with_range((begin, paren.1))
                            .with_priority(PRIORITY_CALL),
                    );
                }
                // 空括号 `()` 产生占位的空参数
                expected = VALUE_START | NULLARY_CALL;
            } else if let Some(paren) = lexer.right_paren() {
                if expected & NULLARY_CALL != 0 {
                    state.output.push(Token::nullary().with_range((paren.0, paren.0)));
                } else if expected & RPAREN == 0 {
                    return Err(lexer.unexpected("\")\""));
                }
                state.offset -= PAREN_OFFSET;
                if state.offset < 0 {
                    return Err(ParseError::UnmatchedParen {
                        column: lexer.column(),
                        expression: source.to_string(),
                    });
                }
                expected = VALUE_END;
            } else if let Some(comma) = lexer.comma() {
                if expected & COMMA == 0 {
                    return Err(lexer.unexpected("\",\""));
                }
                state.operands += 2;
                state.push_operator(comma);
                expected = VALUE_START;
            } else if let Some(variable) = lexer.variable() {
                if expected & PRIMARY == 0 {
                    return Err(lexer.unexpected("变量"));
                }
                state.output.push(variable);
                expected = VALUE_END | LPAREN | CALL;
            } else {
                return Err(lexer.unexpected("字符"));
            }
        }

        if state.offset != 0 {
            return Err(ParseError::UnmatchedParen {
                column: lexer.end_column(),
                expression: source.to_string(),
            });
        }

        let ParseState {
            mut output,
            mut operators,
            operands,
            ..
        } = state;
        while let Some(op) = operators.pop() {
            output.push(op);
        }

        if !output.is_empty() && operands + 1 != output.len() {
            return Err(ParseError::Parity {
                expression: source.to_string(),
            });
        }

        Ok(TokenSequence::new(output, source))
    }
}

impl Default for ExprParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct ParseState {
    output: Vec<Token>,
    operators: Vec<Token>,
    /// 括号嵌套带来的优先级偏移。
    offset: i32,
    /// 运算符消耗的操作数个数，用于最后的元数校验。
    operands: usize,
}

impl ParseState {
    /// 入栈前先弹出优先级不低于自身的运算符。
    fn push_operator(&mut self, mut op: Token) {
        op.priority += self.offset;
        while let Some(top) = self.operators.last() {
            if op.priority > top.priority {
                break;
            }
            if let Some(top) = self.operators.pop() {
                self.output.push(top);
            }
        }
        self.operators.push(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn postfix(input: &str) -> String {
        let parsed = ExprParser::new().parse(input).unwrap();
        parsed
            .iter()
            .map(|token| match &token.kind {
                TokenKind::Op1 { op } => format!("u{op}"),
                TokenKind::FunCall { name } => format!("{name}()"),
                TokenKind::Space => "_".to_string(),
                TokenKind::List { items, .. } if items.is_empty() => "[]".to_string(),
                _ => token.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(postfix("1 + 2 * 3"), "1 2 3 * +");
        assert_eq!(postfix("(1 + 2) * 3"), "1 2 + 3 *");
        assert_eq!(postfix("8 / 2 * 2"), "8 2 / 2 *");
        assert_eq!(postfix("1 - 2 - 3"), "1 2 - 3 -");
    }

    #[test]
    fn unary_minus_binds_to_operand() {
        assert_eq!(postfix("6 / -2"), "6 -2 /");
        assert_eq!(postfix("6 / -@a"), "6 @a u- /");
        assert_eq!(postfix("-(1 + 2)"), "1 2 + u-");
        assert_eq!(postfix("-@a * 2"), "@a u- 2 *");
    }

    #[test]
    fn adjacent_negative_number_is_added() {
        assert_eq!(postfix("2px-1px"), "2px -1px +");
    }

    #[test]
    fn whitespace_between_values_is_an_operator() {
        assert_eq!(postfix("1px solid red"), "1px solid _ red _");
        assert_eq!(postfix("1 -2"), "1 -2 _");
        assert_eq!(postfix("a, b c"), "a b c _ ,");
    }

    #[test]
    fn function_calls_take_their_name() {
        assert_eq!(postfix("foo(1, 2)"), "1 2 , foo()");
        assert_eq!(postfix("foo()"), "[] foo()");
        assert_eq!(postfix("foo(1) * 2"), "1 foo() 2 *");
        assert_eq!(postfix("a(b(1))"), "1 b() a()");
    }

    #[test]
    fn empty_parentheses_are_a_placeholder() {
        assert_eq!(postfix("()"), "[]");
        assert_eq!(postfix("(())"), "[]");
        assert_eq!(postfix("1 + ()"), "1 [] +");
    }

    #[test]
    fn ranges_point_into_trimmed_source() {
        let parsed = ExprParser::new().parse("  @a + 12px ").unwrap();
        assert_eq!(parsed.source(), "@a + 12px");
        assert_eq!(parsed[0].range, Some((0, 2)));
        assert_eq!(parsed[1].range, Some((5, 9)));
        assert_eq!(parsed[2].range, Some((3, 4)));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(postfix("/* lead */ 1 + /* mid */ 2"), "1 2 +");
    }

    #[test]
    fn empty_input_is_an_empty_sequence() {
        assert!(ExprParser::new().parse("   ").unwrap().is_empty());
    }

    #[test]
    fn structural_errors() {
        let parser = ExprParser::new();
        assert!(matches!(parser.parse("(1 + 2"), Err(ParseError::UnmatchedParen { .. })));
        assert!(matches!(parser.parse("1 + 2)"), Err(ParseError::UnmatchedParen { .. })));
        assert!(matches!(
            parser.parse("1 + * 2"),
            Err(ParseError::UnexpectedToken { column: 5, .. })
        ));
        assert!(matches!(parser.parse("1 +"), Err(ParseError::Parity { .. })));
        assert!(matches!(parser.parse("'abc"), Err(ParseError::UnterminatedString { .. })));
        assert!(matches!(parser.parse("1 /* x"), Err(ParseError::UnterminatedComment { .. })));
        assert!(matches!(parser.parse("(1)(2)"), Err(ParseError::UnexpectedToken { .. })));
    }
}
