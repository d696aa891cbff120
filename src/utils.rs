/// 数值输出：保留 15 位小数后去掉末尾多余的 0 与小数点，`-0` 归一为 `0`。
pub fn format_number(value: f64) -> String {
    let mut formatted = format!("{value:.15}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    if formatted == "-0" || formatted.is_empty() {
        "0".to_string()
    } else {
        formatted
    }
}

/// 按 JS `Number()` 的规则把文本转为数值，空白文本为 0，无法解析为 NaN。
pub fn coerce_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_zeros() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.8), "0.8");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-2.5), "-2.5");
    }

    #[test]
    fn coerces_like_loose_arithmetic() {
        assert_eq!(coerce_number(" 12 "), 12.0);
        assert_eq!(coerce_number(""), 0.0);
        assert!(coerce_number("abc").is_nan());
    }
}
