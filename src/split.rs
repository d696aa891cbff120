use crate::cursor::Cursor;

const OPERATOR_CHARS: &str = "-+*/,=!<>";

fn is_space(ch: char) -> bool {
    ch.is_whitespace() || ch == '\u{a0}'
}

/// 按空格拆分 CSS 多值（如 `5px 10em 40%`）。
/// 运算符两侧的空白只是表达式格式，括号与引号内部不拆分。
pub fn split(expression: &str) -> Vec<String> {
    let expression = expression.trim();
    if !expression.chars().any(is_space) {
        return if expression.is_empty() {
            Vec::new()
        } else {
            vec![expression.to_string()]
        };
    }

    let mut cursor = Cursor::new(expression);
    let mut parts = Vec::new();

    while let Some(ch) = cursor.next() {
        if is_space(ch) {
            cursor.eat_whitespace();
            if cursor.peek().is_some_and(|next| OPERATOR_CHARS.contains(next)) {
                // 运算符：只是格式，连同 `==` 之类一起跳过
                cursor.next();
                while cursor.peek() == Some('=') {
                    cursor.next();
                }
                cursor.eat_whitespace();
            } else {
                parts.push(cursor.current().trim().to_string());
                cursor.mark();
            }
        } else if ch == ',' {
            cursor.eat_whitespace();
        } else if ch == '(' {
            cursor.back_up(1);
            if !cursor.skip_balanced('(', ')') {
                cursor.next();
            }
        } else if ch == '"' || ch == '\'' {
            cursor.back_up(1);
            if !cursor.skip_quoted(false) {
                cursor.next();
            }
        }
    }

    parts.push(cursor.current().trim().to_string());
    parts.retain(|part| !part.is_empty());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_plain_values() {
        assert_eq!(split("5px 10em 40%"), vec!["5px", "10em", "40%"]);
        assert_eq!(split("  single "), vec!["single"]);
        assert!(split("   ").is_empty());
    }

    #[test]
    fn keeps_expressions_together() {
        assert_eq!(split("1px + 2px 3px"), vec!["1px + 2px", "3px"]);
        assert_eq!(split("@a == 1 b"), vec!["@a == 1", "b"]);
        assert_eq!(split("a, b c"), vec!["a, b", "c"]);
    }

    #[test]
    fn does_not_break_parens_or_quotes() {
        assert_eq!(
            split("rgba(0, 0, 0, .5) 'a b' c"),
            vec!["rgba(0, 0, 0, .5)", "'a b'", "c"]
        );
    }
}
