use crate::color::{self, Rgba};
use crate::error::{EvalError, EvalResult};
use crate::utils::format_number;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// 源码中的字节区间 `[start, end)`，基于去除首尾空白后的表达式文本。
pub type Range = (usize, usize);

/// 逗号列表的默认连接符。
pub const COMMA_GLUE: &str = ", ";
/// 空格运算符生成的列表连接符。
pub const SPACE_GLUE: &str = " ";

/// 表达式中的逻辑单元，也是求值结果的载体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(flatten)]
    pub kind: TokenKind,
    #[serde(default)]
    pub range: Option<Range>,
    /// 仅在解析阶段用于运算符优先级比较。
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TokenKind {
    Number { value: f64, unit: String },
    Op1 { op: String },
    Op2 { op: String },
    Variable { name: String },
    FunCall { name: String },
    String { value: String, quote: Option<char> },
    Bool { value: bool },
    Color { value: Rgba },
    List { items: Vec<Token>, glue: String },
    /// 空格运算符，只在后缀序列中出现，求值后不会残留。
    Space,
}

/// 用于比较与运算的原始值。
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Token {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            range: None,
            priority: 0,
        }
    }

    pub fn number<U: Into<String>>(value: f64, unit: U) -> Self {
        Self::new(TokenKind::Number {
            value,
            unit: unit.into(),
        })
    }

    pub fn op1<S: Into<String>>(op: S) -> Self {
        Self::new(TokenKind::Op1 { op: op.into() })
    }

    pub fn op2<S: Into<String>>(op: S) -> Self {
        Self::new(TokenKind::Op2 { op: op.into() })
    }

    pub fn variable<S: Into<String>>(name: S) -> Self {
        Self::new(TokenKind::Variable { name: name.into() })
    }

    pub fn fun_call<S: Into<String>>(name: S) -> Self {
        Self::new(TokenKind::FunCall { name: name.into() })
    }

    pub fn string<S: Into<String>>(value: S, quote: Option<char>) -> Self {
        Self::new(TokenKind::String {
            value: value.into(),
            quote,
        })
    }

    /// 从原始文本构造字符串：若引号包裹整个文本则剥离并记录引号。
    pub fn quoted_text(raw: &str) -> Self {
        match split_quotes(raw) {
            Some((quote, inner)) => Self::string(inner, Some(quote)),
            None => Self::string(raw, None),
        }
    }

    pub fn bool(value: bool) -> Self {
        Self::new(TokenKind::Bool { value })
    }

    pub fn color(value: Rgba) -> Self {
        Self::new(TokenKind::Color { value })
    }

    pub fn list(items: Vec<Token>) -> Self {
        Self::new(TokenKind::List {
            items,
            glue: COMMA_GLUE.to_string(),
        })
    }

    pub fn space_list(items: Vec<Token>) -> Self {
        Self::new(TokenKind::List {
            items,
            glue: SPACE_GLUE.to_string(),
        })
    }

    pub fn space() -> Self {
        Self::new(TokenKind::Space)
    }

    /// 空参数占位符，`foo()` 解析时生成，调用函数前会被剔除。
    pub fn nullary() -> Self {
        Self::list(Vec::new())
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TokenKind::Number { .. } => "number",
            TokenKind::Op1 { .. } => "op1",
            TokenKind::Op2 { .. } => "op2",
            TokenKind::Variable { .. } => "variable",
            TokenKind::FunCall { .. } => "fun-call",
            TokenKind::String { .. } => "string",
            TokenKind::Bool { .. } => "bool",
            TokenKind::Color { .. } => "color",
            TokenKind::List { .. } => "list",
            TokenKind::Space => "space",
        }
    }

    pub fn same_kind(&self, other: &Token) -> bool {
        std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.kind, TokenKind::Number { .. })
    }

    pub fn is_color(&self) -> bool {
        matches!(self.kind, TokenKind::Color { .. })
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, TokenKind::String { .. })
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.kind, TokenKind::Variable { .. })
    }

    pub fn is_nullary(&self) -> bool {
        matches!(&self.kind, TokenKind::List { items, .. } if items.is_empty())
    }

    pub fn unit(&self) -> &str {
        match &self.kind {
            TokenKind::Number { unit, .. } => unit,
            _ => "",
        }
    }

    /// 数字的数值部分；其他类型返回 `None`。
    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            TokenKind::Number { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Rgba> {
        match self.kind {
            TokenKind::Color { value } => Some(value),
            _ => None,
        }
    }

    /// 变量名、函数名、运算符或字符串内容等文本载荷。
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Op1 { op } | TokenKind::Op2 { op } => Some(op),
            TokenKind::Variable { name } | TokenKind::FunCall { name } => Some(name),
            TokenKind::String { value, .. } => Some(value),
            _ => None,
        }
    }

    /// 作为颜色解释：颜色本身、数字（灰色）或可解析为颜色的文本，失败时为黑色。
    pub fn to_rgba(&self) -> Rgba {
        match &self.kind {
            TokenKind::Color { value } => *value,
            TokenKind::Number { value, .. } => Rgba::gray(*value),
            _ => color::parse_color(&self.to_string(), true).unwrap_or_else(Rgba::black),
        }
    }

    pub fn to_primitive(&self) -> Primitive {
        match &self.kind {
            TokenKind::Number { value, .. } => Primitive::Number(*value),
            TokenKind::Color { value } => Primitive::Number(value.to_decimal() as f64),
            TokenKind::Bool { value } => Primitive::Bool(*value),
            TokenKind::String { value, .. } => Primitive::Text(value.clone()),
            _ => Primitive::Text(self.to_string()),
        }
    }

    /// 数字与颜色取反，其余类型无法取反。
    pub fn negated(&self) -> EvalResult<Token> {
        let mut out = self.clone();
        match &mut out.kind {
            TokenKind::Number { value, .. } => *value = -*value,
            TokenKind::Color { value } => {
                value.r = -value.r;
                value.g = -value.g;
                value.b = -value.b;
            }
            _ => return Err(EvalError::NotANumber),
        }
        Ok(out)
    }

    /// 是否为零值：数字 0 或打包后为 0 的颜色。
    pub fn is_zero(&self) -> bool {
        match self.to_primitive() {
            Primitive::Number(value) => value == 0.0,
            Primitive::Text(text) => text.is_empty(),
            Primitive::Bool(value) => !value,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Number { value, unit } => write!(f, "{}{unit}", format_number(*value)),
            TokenKind::String { value, quote } => match quote {
                Some(q) => write!(f, "{q}{value}{q}"),
                None => f.write_str(value),
            },
            TokenKind::Color { value } => f.write_str(&value.to_css()),
            TokenKind::List { items, glue } => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(glue)?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            TokenKind::Bool { value } => write!(f, "{value}"),
            TokenKind::Op1 { op } | TokenKind::Op2 { op } => f.write_str(op),
            TokenKind::Variable { name } | TokenKind::FunCall { name } => f.write_str(name),
            TokenKind::Space => f.write_str(SPACE_GLUE),
        }
    }
}

impl Primitive {
    /// 按宽松算术规则转为数值（布尔为 1/0，文本按数字解析）。
    pub fn as_f64(&self) -> f64 {
        match self {
            Primitive::Number(value) => *value,
            Primitive::Bool(value) => f64::from(u8::from(*value)),
            Primitive::Text(text) => crate::utils::coerce_number(text),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Primitive::Number(value) => format_number(*value),
            Primitive::Bool(value) => value.to_string(),
            Primitive::Text(text) => text.clone(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Primitive::Text(_))
    }
}

/// 若文本被同一种引号完整包裹（考虑反斜杠转义），返回引号与内部文本。
fn split_quotes(raw: &str) -> Option<(char, &str)> {
    let quote = raw.chars().next().filter(|ch| *ch == '"' || *ch == '\'')?;
    let mut escaped = false;
    for (idx, ch) in raw.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            _ if ch == quote => {
                return (idx + ch.len_utf8() == raw.len()).then(|| (quote, &raw[1..idx]));
            }
            _ => {}
        }
    }
    None
}
