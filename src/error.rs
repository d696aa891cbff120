use thiserror::Error;

/// 词法/语法分析阶段的错误，均携带出错列号（从 1 开始）与完整表达式文本。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("意外的{kind} (第 {column} 列，表达式 `{expression}`)")]
    UnexpectedToken {
        kind: String,
        column: usize,
        expression: String,
    },
    #[error("括号不匹配 (第 {column} 列，表达式 `{expression}`)")]
    UnmatchedParen { column: usize, expression: String },
    #[error("操作数与运算符数量不匹配 (表达式 `{expression}`)")]
    Parity { expression: String },
    #[error("字符串缺少结束引号 (第 {column} 列，表达式 `{expression}`)")]
    UnterminatedString { column: usize, expression: String },
    #[error("注释缺少结束标记 `*/` (第 {column} 列，表达式 `{expression}`)")]
    UnterminatedComment { column: usize, expression: String },
    #[error("非法的颜色字面量 {literal} (第 {column} 列，表达式 `{expression}`)")]
    InvalidColorLiteral {
        literal: String,
        column: usize,
        expression: String,
    },
    #[error("非法的转义序列 (第 {column} 列，表达式 `{expression}`)")]
    InvalidEscapeSequence { column: usize, expression: String },
}

impl ParseError {
    /// 出错位置的列号；`Parity` 没有具体位置。
    pub fn column(&self) -> Option<usize> {
        match self {
            ParseError::UnexpectedToken { column, .. }
            | ParseError::UnmatchedParen { column, .. }
            | ParseError::UnterminatedString { column, .. }
            | ParseError::UnterminatedComment { column, .. }
            | ParseError::InvalidColorLiteral { column, .. }
            | ParseError::InvalidEscapeSequence { column, .. } => Some(*column),
            ParseError::Parity { .. } => None,
        }
    }
}

/// 求值阶段的错误。未定义的变量与函数不属于错误，会退化为字面量。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("变量循环引用: {0}")]
    RecursiveReference(String),
    #[error("表达式结果不是有效数值")]
    NotANumber,
    #[error("未定义的运算符 {0}")]
    UndefinedOperator(String),
    #[error("表达式求值后栈中剩余值数量不为 1")]
    Parity,
    #[error("函数 {function} 参数错误: {message}")]
    InvalidArgument { function: String, message: String },
}

impl EvalError {
    pub fn argument<F: Into<String>, M: Into<String>>(function: F, message: M) -> Self {
        EvalError::InvalidArgument {
            function: function.into(),
            message: message.into(),
        }
    }
}

/// 对外入口统一使用的错误类型。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("解析失败: {0}")]
    Parse(#[from] ParseError),
    #[error("求值失败: {0}")]
    Eval(#[from] EvalError),
}

pub type ParseResult<T> = Result<T, ParseError>;
pub type EvalResult<T> = Result<T, EvalError>;
pub type ExprResult<T> = Result<T, ExprError>;
