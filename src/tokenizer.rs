use crate::color::{self, Rgba};
use crate::cursor::Cursor;
use crate::error::{ParseError, ParseResult};
use crate::token::{Range, Token};
use once_cell::sync::Lazy;
use regex::Regex;

/// 作为运算符起始的字符，用于判断空白是否只是格式。
const OPERATOR_CHARS: &str = "-+*/,=<>!";

pub const PRIORITY_CALL: i32 = -3;
pub const PRIORITY_COMMA: i32 = -2;
pub const PRIORITY_SPACE: i32 = -1;
pub const PRIORITY_COMPARISON: i32 = 0;
pub const PRIORITY_ADDITIVE: i32 = 1;
pub const PRIORITY_UNARY: i32 = 2;
pub const PRIORITY_MULTIPLY: i32 = 2;
pub const PRIORITY_DIVIDE: i32 = 3;
/// 每层括号叠加的优先级偏移。
pub const PAREN_OFFSET: i32 = 10;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(?:\d*\.\d+|\d+)[a-z%]*").expect("数字正则编译失败")
});
static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[a-fA-F0-9]*").expect("颜色正则编译失败"));
static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:%[\w-]*|[@$%]?[\w-][\w.-]*)").expect("变量正则编译失败")
});

/// 按需拉取的词法分析器：由解析器按固定顺序调用各个识别函数，
/// 每个识别函数在不匹配时不消耗输入。
pub struct Tokenizer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    pub fn source(&self) -> &'a str {
        self.cursor.source()
    }

    pub fn is_eof(&self) -> bool {
        self.cursor.is_eof()
    }

    pub fn mark(&mut self) {
        self.cursor.mark();
    }

    /// 当前 token 起点的列号。
    pub fn column(&self) -> usize {
        self.cursor.column(self.cursor.start())
    }

    pub fn end_column(&self) -> usize {
        self.cursor.column(self.cursor.position())
    }

    fn range(&self) -> Range {
        (self.cursor.start(), self.cursor.position())
    }

    pub fn unexpected(&self, kind: &str) -> ParseError {
        ParseError::UnexpectedToken {
            kind: kind.to_string(),
            column: self.column(),
            expression: self.source().to_string(),
        }
    }

    /// 跳过一段 `/* ... */` 注释。
    pub fn comment(&mut self) -> ParseResult<bool> {
        if !self.cursor.starts_with("/*") {
            return Ok(false);
        }
        let begin = self.cursor.position();
        self.cursor.next();
        self.cursor.next();
        if self.cursor.skip_to("*/") {
            self.cursor.next();
            self.cursor.next();
            return Ok(true);
        }
        Err(ParseError::UnterminatedComment {
            column: self.cursor.column(begin),
            expression: self.source().to_string(),
        })
    }

    /// 空白在 CSS 表达式里可能只是格式，也可能是多值分隔符。
    /// 只有空白前后都不是运算符或括号时才生成空格运算符；
    /// 紧跟数字或变量前缀的 `-` 视为新值的符号（`1 -1` 是两个值）。
    pub fn space_operator(&mut self) -> ParseResult<Option<Token>> {
        let valid_before = match self.cursor.char_before() {
            Some(ch) => !OPERATOR_CHARS.contains(ch) && ch != '(',
            None => false,
        };
        let mut valid_after = false;
        while !self.cursor.is_eof() {
            if self.comment()? || self.cursor.eat_whitespace() {
                valid_after = true;
                continue;
            }
            let Some(ch) = self.cursor.peek() else { break };
            if ch == '-' {
                let signed_value = self
                    .cursor
                    .char_at(1)
                    .is_some_and(|next| next.is_ascii_digit() || matches!(next, '.' | '@' | '$'));
                if signed_value {
                    break;
                }
            }
            if OPERATOR_CHARS.contains(ch) || ch == '(' || ch == ')' {
                valid_after = false;
            }
            break;
        }

        let begin = self.cursor.start();
        self.cursor.mark();
        if valid_before && valid_after && !self.cursor.is_eof() {
            let token = Token::space()
                .with_range((begin, self.cursor.position()))
                .with_priority(PRIORITY_SPACE);
            return Ok(Some(token));
        }
        Ok(None)
    }

    /// `#` 后只接受 3 位或 6 位十六进制。
    pub fn color(&mut self) -> ParseResult<Option<Token>> {
        if self.cursor.peek() != Some('#') {
            return Ok(None);
        }
        let literal = self.cursor.match_regex(&HEX_COLOR_RE).unwrap_or("#");
        let rest_is_word = self
            .cursor
            .peek()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_');
        if (literal.len() != 4 && literal.len() != 7) || rest_is_word {
            let mut end = self.cursor.clone();
            while end.peek().is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
                end.next();
            }
            return Err(ParseError::InvalidColorLiteral {
                literal: end.current().to_string(),
                column: self.column(),
                expression: self.source().to_string(),
            });
        }
        let value = color::parse_color(literal, false).unwrap_or_else(Rgba::black);
        Ok(Some(Token::color(value).with_range(self.range())))
    }

    pub fn number(&mut self) -> ParseResult<Option<Token>> {
        let Some(matched) = self.cursor.match_regex(&NUMBER_RE) else {
            return Ok(None);
        };
        let digits_len = matched
            .find(|ch: char| ch.is_ascii_lowercase() || ch == '%')
            .unwrap_or(matched.len());
        let (digits, unit) = matched.split_at(digits_len);
        let value: f64 = digits.parse().map_err(|_| self.unexpected("数字"))?;
        Ok(Some(Token::number(value, unit).with_range(self.range())))
    }

    /// 运算符，支持 `==`、`<=`、`>=`、`!=`、`=<`、`=>`、`||` 双字符形式。
    /// `-` 紧跟字母时不是运算符（保持 `-webkit-transform` 完整）。
    pub fn operator(&mut self) -> Option<Token> {
        let ch = self.cursor.next()?;
        let priority = match ch {
            '+' => Some(PRIORITY_ADDITIVE),
            '-' => {
                let before_ident = self.cursor.peek().is_some_and(|next| next.is_ascii_alphabetic());
                (!before_ident).then_some(PRIORITY_ADDITIVE)
            }
            '|' => {
                if self.cursor.peek() == Some('|') {
                    self.cursor.next();
                    Some(PRIORITY_ADDITIVE)
                } else {
                    None
                }
            }
            '*' => Some(PRIORITY_MULTIPLY),
            '/' => Some(PRIORITY_DIVIDE),
            '=' => {
                if matches!(self.cursor.peek(), Some('=' | '<' | '>')) {
                    self.cursor.next();
                }
                Some(PRIORITY_COMPARISON)
            }
            '!' | '<' | '>' => {
                if self.cursor.peek() == Some('=') {
                    self.cursor.next();
                }
                Some(PRIORITY_COMPARISON)
            }
            _ => None,
        };

        match priority {
            Some(priority) => Some(
                Token::op2(self.cursor.current())
                    .with_range(self.range())
                    .with_priority(priority),
            ),
            None => {
                self.cursor.back_up(1);
                None
            }
        }
    }

    /// 引号字符串，以及 LESS 的 `~"..."` 转义形式（结果不带引号）。
    pub fn string(&mut self) -> ParseResult<Option<Token>> {
        let escaper = self.cursor.peek() == Some('~')
            && matches!(self.cursor.char_at(1), Some('"' | '\''));
        let quote = match self.cursor.peek() {
            Some(ch @ ('"' | '\'')) => ch,
            _ if escaper => '~',
            _ => return Ok(None),
        };

        if !self.cursor.skip_quoted(escaper) {
            return Err(ParseError::UnterminatedString {
                column: self.column(),
                expression: self.source().to_string(),
            });
        }

        let raw = self.cursor.current();
        self.validate_escapes(raw)?;
        let token = if quote == '~' {
            Token::string(&raw[2..raw.len() - 1], None)
        } else {
            Token::quoted_text(raw)
        };
        Ok(Some(token.with_range(self.range())))
    }

    /// `\u` 之后必须是 4 位十六进制。
    fn validate_escapes(&self, raw: &str) -> ParseResult<()> {
        let mut chars = raw.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            if ch != '\\' {
                continue;
            }
            match chars.next() {
                Some((_, 'u')) => {
                    let hex = raw[idx + 2..]
                        .chars()
                        .take(4)
                        .filter(|c| c.is_ascii_hexdigit())
                        .count();
                    if hex != 4 {
                        return Err(ParseError::InvalidEscapeSequence {
                            column: self.cursor.column(self.cursor.start() + idx),
                            expression: self.source().to_string(),
                        });
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
        Ok(())
    }

    pub fn left_paren(&mut self) -> Option<Range> {
        if self.cursor.peek() != Some('(') {
            return None;
        }
        self.cursor.next();
        Some(self.range())
    }

    pub fn right_paren(&mut self) -> Option<Range> {
        if self.cursor.peek() != Some(')') {
            return None;
        }
        self.cursor.next();
        Some(self.range())
    }

    pub fn comma(&mut self) -> Option<Token> {
        if self.cursor.peek() != Some(',') {
            return None;
        }
        self.cursor.next();
        Some(
            Token::op2(",")
                .with_range(self.range())
                .with_priority(PRIORITY_COMMA),
        )
    }

    /// 变量：`@`/`$`/`%` 前缀或裸标识符，允许包含 `-`、`.`、`_`。
    pub fn variable(&mut self) -> Option<Token> {
        let name = self.cursor.match_regex(&VARIABLE_RE)?;
        Some(Token::variable(name).with_range(self.range()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_number(input: &str) -> Option<Token> {
        let mut lexer = Tokenizer::new(input);
        lexer.mark();
        lexer.number().unwrap()
    }

    #[test]
    fn numbers_carry_units_and_sign() {
        assert_eq!(lex_number("12px").unwrap().to_string(), "12px");
        assert_eq!(lex_number("-.5em").unwrap().to_string(), "-0.5em");
        assert_eq!(lex_number("100%").unwrap().unit(), "%");
        assert!(lex_number("px").is_none());
    }

    #[test]
    fn dash_before_identifier_is_not_an_operator() {
        let mut lexer = Tokenizer::new("-webkit-box");
        lexer.mark();
        assert!(lexer.operator().is_none());
        let var = lexer.variable().unwrap();
        assert_eq!(var.text(), Some("-webkit-box"));
    }

    #[test]
    fn two_character_operators() {
        for op in ["==", "<=", ">=", "!=", "=<", "=>", "||"] {
            let mut lexer = Tokenizer::new(op);
            lexer.mark();
            assert_eq!(lexer.operator().unwrap().text(), Some(op));
            assert!(lexer.is_eof());
        }
    }

    #[test]
    fn only_three_or_six_digit_hex_is_a_color() {
        let mut lexer = Tokenizer::new("#abcd");
        lexer.mark();
        assert!(matches!(
            lexer.color(),
            Err(ParseError::InvalidColorLiteral { ref literal, .. }) if literal == "#abcd"
        ));

        let mut lexer = Tokenizer::new("#abc");
        lexer.mark();
        assert_eq!(lexer.color().unwrap().unwrap().to_string(), "#aabbcc");
    }

    #[test]
    fn color_may_be_followed_by_minus() {
        let mut lexer = Tokenizer::new("#fff-#111");
        lexer.mark();
        let color = lexer.color().unwrap().unwrap();
        assert_eq!(color.range, Some((0, 4)));
        lexer.mark();
        assert_eq!(lexer.operator().unwrap().text(), Some("-"));

        let mut lexer = Tokenizer::new("#fff-1");
        lexer.mark();
        assert!(lexer.color().unwrap().is_some());
        lexer.mark();
        assert_eq!(lexer.number().unwrap().unwrap().to_string(), "-1");
    }

    #[test]
    fn escaped_string_is_unquoted() {
        let mut lexer = Tokenizer::new("~\"calc(100% - 10px)\"");
        lexer.mark();
        let token = lexer.string().unwrap().unwrap();
        assert_eq!(token.to_string(), "calc(100% - 10px)");
        assert_eq!(token.range, Some((0, 20)));
    }

    #[test]
    fn invalid_unicode_escape_is_rejected() {
        let mut lexer = Tokenizer::new(r#""\u12G4""#);
        lexer.mark();
        assert!(matches!(
            lexer.string(),
            Err(ParseError::InvalidEscapeSequence { column: 2, .. })
        ));
    }

    #[test]
    fn whitespace_next_to_operator_is_formatting() {
        let mut lexer = Tokenizer::new("1 + 2");
        lexer.mark();
        lexer.number().unwrap();
        lexer.mark();
        assert!(lexer.space_operator().unwrap().is_none());
        assert_eq!(lexer.operator().unwrap().text(), Some("+"));
    }

    #[test]
    fn whitespace_before_signed_number_separates_values() {
        let mut lexer = Tokenizer::new("1 -2");
        lexer.mark();
        lexer.number().unwrap();
        lexer.mark();
        assert!(lexer.space_operator().unwrap().is_some());
    }
}
