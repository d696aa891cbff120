use crate::error::EvalResult;
use crate::functions;
use crate::token::Token;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// 可调用对象：接收参数 token，返回原始结果；`Ok(None)` 表示不处理，
/// 求值器会把调用原样拼回 `name(args)` 文本。
pub type Callable = Arc<dyn Fn(&[Token]) -> EvalResult<Option<Value>> + Send + Sync>;

type Logger = Arc<dyn Fn(&str, &Diagnostic<'_>) + Send + Sync>;

/// 与宿主交换的原始值。`Text` 会被当作表达式求值，无法解析时作为字面文本。
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Token(Token),
    Number(f64),
    Bool(bool),
    Text(String),
    List(Vec<Token>),
}

impl From<Token> for Value {
    fn from(token: Token) -> Self {
        Value::Token(token)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Token>> for Value {
    fn from(items: Vec<Token>) -> Self {
        Value::List(items)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Variable,
    Function,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Variable => f.write_str("variable"),
            DiagnosticKind::Function => f.write_str("function"),
        }
    }
}

/// 诊断信息，目前只用于报告未定义的变量和函数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic<'a> {
    pub kind: DiagnosticKind,
    pub name: &'a str,
}

/// 求值上下文：变量与函数的解析能力。
///
/// 实现必须是只读的，同一个上下文可以被多次求值共享；
/// 递归保护由求值器在每次顶层调用时单独创建。
pub trait Context {
    fn variable(&self, name: &str) -> Option<Value>;

    /// 默认只提供内置函数表。
    fn function(&self, name: &str) -> Option<Callable> {
        builtin(name)
    }

    fn log(&self, message: &str, diagnostic: Diagnostic<'_>) {
        log::debug!("{message} ({} {})", diagnostic.kind, diagnostic.name);
    }
}

/// 把内置函数包装为 `Callable`。
pub fn builtin(name: &str) -> Option<Callable> {
    functions::lookup(name).map(|f| Arc::new(f) as Callable)
}

/// 空上下文：没有变量，只有内置函数。
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContext;

impl Context for EmptyContext {
    fn variable(&self, _name: &str) -> Option<Value> {
        None
    }
}

#[derive(Clone)]
enum Binding {
    Value(Value),
    Function(Callable),
}

/// 默认上下文：按插入顺序保存的名字绑定，函数查找回退到内置函数表。
#[derive(Clone, Default)]
pub struct Scope {
    bindings: IndexMap<String, Binding>,
    logger: Option<Logger>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str, &Diagnostic<'_>) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.bindings
            .insert(name.into(), Binding::Value(value.into()));
        self
    }

    /// 注册宿主函数；名字也可以是运算符（如 `"+"`），用于覆盖内置运算。
    pub fn define<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Token]) -> EvalResult<Option<Value>> + Send + Sync + 'static,
    {
        self.bindings
            .insert(name.into(), Binding::Function(Arc::new(function)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name) {
            Some(Binding::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.bindings.shift_remove(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Scope
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut scope = Scope::new();
        for (name, value) in iter {
            scope.set(name, value);
        }
        scope
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("names", &self.bindings.keys().collect::<Vec<_>>())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

impl Context for Scope {
    fn variable(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn function(&self, name: &str) -> Option<Callable> {
        match self.bindings.get(name) {
            Some(Binding::Function(function)) => Some(Arc::clone(function)),
            _ => builtin(name),
        }
    }

    fn log(&self, message: &str, diagnostic: Diagnostic<'_>) {
        match &self.logger {
            Some(logger) => logger(message, &diagnostic),
            None => log::debug!("{message} ({} {})", diagnostic.kind, diagnostic.name),
        }
    }
}
