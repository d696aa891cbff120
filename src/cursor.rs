use regex::Regex;

/// 带位置指针的输入游标，提供字符读取、回退与成对符号跳过等功能。
/// `start` 记录当前 token 的起点，`current()` 返回起点到当前位置的文本。
#[derive(Clone)]
pub struct Cursor<'a> {
    source: &'a str,
    len: usize,
    position: usize,
    start: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            len: source.len(),
            position: 0,
            start: 0,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// 把当前位置标记为新 token 的起点。
    pub fn mark(&mut self) {
        self.start = self.position;
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.len
    }

    pub fn peek(&self) -> Option<char> {
        self.source[self.position..].chars().next()
    }

    /// 当前位置之后第 `offset` 个字符。
    pub fn char_at(&self, offset: usize) -> Option<char> {
        self.source[self.position..].chars().nth(offset)
    }

    /// 当前位置之前的一个字符。
    pub fn char_before(&self) -> Option<char> {
        self.source[..self.position].chars().next_back()
    }

    pub fn next(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    /// 回退 `n` 个字符，不会越过输入开头。
    pub fn back_up(&mut self, n: usize) {
        for _ in 0..n {
            match self.char_before() {
                Some(ch) => self.position -= ch.len_utf8(),
                None => break,
            }
        }
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.source[self.position..].starts_with(prefix)
    }

    /// 用锚定在开头的正则匹配剩余输入，成功时前进并返回匹配文本。
    pub fn match_regex(&mut self, pattern: &Regex) -> Option<&'a str> {
        let rest = &self.source[self.position..];
        let found = pattern.find(rest).filter(|m| m.start() == 0)?;
        self.position += found.end();
        Some(&rest[..found.end()])
    }

    pub fn eat_whitespace(&mut self) -> bool {
        let begin = self.position;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.next();
            } else {
                break;
            }
        }
        self.position > begin
    }

    /// 前进到 `delim` 起始处；找不到时保持原位并返回 `false`。
    pub fn skip_to(&mut self, delim: &str) -> bool {
        match self.source[self.position..].find(delim) {
            Some(offset) => {
                self.position += offset;
                true
            }
            None => false,
        }
    }

    /// 从 `open` 开始跳过成对的括号（引号内的括号不计入）。
    pub fn skip_balanced(&mut self, open: char, close: char) -> bool {
        let begin = self.position;
        if self.peek() != Some(open) {
            return false;
        }
        let mut depth = 0usize;
        while let Some(ch) = self.peek() {
            if ch == '"' || ch == '\'' {
                if !self.skip_string(ch) {
                    break;
                }
                continue;
            }
            self.next();
            if ch == open {
                depth += 1;
            } else if ch == close {
                depth -= 1;
                if depth == 0 {
                    return true;
                }
            }
        }
        self.position = begin;
        false
    }

    /// 当前位置为引号时跳过整段字符串；`allow_escaper` 允许 `~"..."` 形式。
    pub fn skip_quoted(&mut self, allow_escaper: bool) -> bool {
        let begin = self.position;
        if allow_escaper && self.peek() == Some('~') {
            self.next();
        }
        match self.peek() {
            Some(ch @ ('"' | '\'')) if self.skip_string(ch) => true,
            _ => {
                self.position = begin;
                false
            }
        }
    }

    /// 跳过以 `quote` 开头的字符串，处理反斜杠转义；未闭合时返回 `false`。
    pub fn skip_string(&mut self, quote: char) -> bool {
        let begin = self.position;
        if self.peek() == Some(quote) {
            self.next();
        }
        while let Some(ch) = self.next() {
            if ch == '\\' {
                self.next();
            } else if ch == quote {
                return true;
            }
        }
        self.position = begin;
        false
    }

    /// 当前 token 的文本（从 `start` 到当前位置）。
    pub fn current(&self) -> &'a str {
        &self.source[self.start..self.position]
    }

    /// 从 1 开始的字符列号。
    pub fn column(&self, byte_offset: usize) -> usize {
        self.source[..byte_offset.min(self.len)].chars().count() + 1
    }
}
