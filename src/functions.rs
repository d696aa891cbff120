//! 内置函数表，行为与 LESS 的同名函数保持一致。
//!
//! 每个函数接收已求值的参数 token；返回 `Ok(None)` 表示不处理，
//! 求值器会把调用原样输出为 `name(args)`（例如 `filter: saturate(3)`）。

use crate::color::{self, BlendMode, Hsl, Rgba};
use crate::context::Value;
use crate::error::{EvalError, EvalResult};
use crate::split::split;
use crate::token::{Token, TokenKind};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::f64::consts::PI;

pub type Builtin = fn(&[Token]) -> EvalResult<Option<Value>>;

/// 单位换算表：每组的系数以组内默认单位为 1。
const LENGTH_UNITS: [(&str, f64); 6] = [
    ("m", 1.0),
    ("cm", 0.01),
    ("mm", 0.001),
    ("in", 0.0254),
    ("pt", 0.0254 / 72.0),
    ("pc", 0.0254 / 72.0 * 12.0),
];
const DURATION_UNITS: [(&str, f64); 2] = [("s", 1.0), ("ms", 0.001)];
const ANGLE_UNITS: [(&str, f64); 4] = [
    ("rad", 1.0 / (2.0 * PI)),
    ("deg", 1.0 / 360.0),
    ("grad", 1.0 / 400.0),
    ("turn", 1.0),
];

static BUILTINS: Lazy<IndexMap<&'static str, Builtin>> = Lazy::new(|| {
    let mut table: IndexMap<&'static str, Builtin> = IndexMap::new();

    table.insert("rgb", rgb);
    table.insert("rgba", rgba);
    table.insert("hsl", hsl);
    table.insert("hsla", hsla);
    table.insert("hsv", hsv);
    table.insert("hsva", hsva);
    table.insert("color", to_color_fn);

    table.insert("hue", hue);
    table.insert("saturation", saturation);
    table.insert("lightness", lightness);
    table.insert("hsvhue", hsv_hue);
    table.insert("hsvsaturation", hsv_saturation);
    table.insert("hsvvalue", hsv_value);
    table.insert("red", red);
    table.insert("green", green);
    table.insert("blue", blue);
    table.insert("alpha", alpha);
    table.insert("luma", luma);

    table.insert("saturate", saturate);
    table.insert("desaturate", desaturate);
    table.insert("lighten", lighten);
    table.insert("darken", darken);
    table.insert("fadein", fadein);
    table.insert("fadeout", fadeout);
    table.insert("fade", fade);
    table.insert("spin", spin);
    table.insert("mix", mix);
    table.insert("tint", tint);
    table.insert("shade", shade);
    table.insert("greyscale", greyscale);
    table.insert("contrast", contrast);
    table.insert("argb", argb);

    table.insert("multiply", |args| blend(args, BlendMode::Multiply));
    table.insert("screen", |args| blend(args, BlendMode::Screen));
    table.insert("overlay", |args| blend(args, BlendMode::Overlay));
    table.insert("softlight", |args| blend(args, BlendMode::Softlight));
    table.insert("hardlight", |args| blend(args, BlendMode::Hardlight));
    table.insert("difference", |args| blend(args, BlendMode::Difference));
    table.insert("exclusion", |args| blend(args, BlendMode::Exclusion));
    table.insert("average", |args| blend(args, BlendMode::Average));
    table.insert("negation", |args| blend(args, BlendMode::Negation));

    table.insert("percentage", percentage);
    table.insert("round", round);
    table.insert("ceil", |args| math(args, "ceil", f64::ceil, MathUnit::Keep));
    table.insert("floor", |args| math(args, "floor", f64::floor, MathUnit::Keep));
    table.insert("sqrt", |args| math(args, "sqrt", f64::sqrt, MathUnit::Keep));
    table.insert("abs", |args| math(args, "abs", f64::abs, MathUnit::Keep));
    table.insert("sin", |args| math(args, "sin", f64::sin, MathUnit::FromRadians));
    table.insert("cos", |args| math(args, "cos", f64::cos, MathUnit::FromRadians));
    table.insert("tan", |args| math(args, "tan", f64::tan, MathUnit::FromRadians));
    table.insert("asin", |args| math(args, "asin", f64::asin, MathUnit::ToRadians));
    table.insert("acos", |args| math(args, "acos", f64::acos, MathUnit::ToRadians));
    table.insert("atan", |args| math(args, "atan", f64::atan, MathUnit::ToRadians));
    table.insert("pi", |_| Ok(Some(Value::Number(PI))));
    table.insert("mod", modulo);
    table.insert("pow", pow);
    table.insert("min", |args| min_max(args, "min", true));
    table.insert("max", |args| min_max(args, "max", false));
    table.insert("unit", unit);
    table.insert("convert", convert);

    table.insert("e", escape_string);
    table.insert("escape", escape);
    table.insert("%", format);
    table.insert("quote", quote);
    table.insert("unquote", unquote);
    table.insert("str-length", str_length);
    table.insert("str-index", str_index);
    table.insert("str-insert", str_insert);
    table.insert("str-slice", str_slice);
    table.insert("to-upper-case", |args| change_case(args, "to-upper-case", true));
    table.insert("to-lower-case", |args| change_case(args, "to-lower-case", false));

    table.insert("iscolor", is_color);
    table.insert("isnumber", |args| Ok(Some(Value::Bool(args.first().is_some_and(Token::is_number)))));
    table.insert("isstring", |args| Ok(Some(Value::Bool(args.first().is_some_and(Token::is_string)))));
    table.insert("iskeyword", |args| Ok(Some(Value::Bool(args.first().is_some_and(Token::is_string)))));
    table.insert("isurl", |args| Ok(Some(Value::Bool(args.first().is_some_and(Token::is_string)))));
    table.insert("ispixel", |args| Ok(Some(Value::Bool(has_unit(args, "px")))));
    table.insert("ispercentage", |args| Ok(Some(Value::Bool(has_unit(args, "%")))));
    table.insert("isem", |args| Ok(Some(Value::Bool(has_unit(args, "em")))));
    table.insert("isunit", is_unit);

    table.insert("length", length);
    table.insert("extract", extract);
    table.insert("nth", nth);

    table
});

/// 按名字查找内置函数。
pub fn lookup(name: &str) -> Option<Builtin> {
    BUILTINS.get(name).copied()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.keys().copied()
}

// ---------------------------------------------------------------------------
// 参数辅助
// ---------------------------------------------------------------------------

fn arg<'t>(args: &'t [Token], index: usize, function: &str) -> EvalResult<&'t Token> {
    args.get(index)
        .ok_or_else(|| EvalError::argument(function, format!("缺少第 {} 个参数", index + 1)))
}

/// 颜色参数：颜色 token，或者颜色关键字形式的变量/字符串。
fn color_arg(args: &[Token], index: usize, function: &str) -> EvalResult<Rgba> {
    let token = arg(args, index, function)?;
    match &token.kind {
        TokenKind::Color { value } => Ok(*value),
        TokenKind::Variable { name } | TokenKind::String { value: name, .. } => {
            color::parse_color(name, false)
                .ok_or_else(|| EvalError::argument(function, format!("无效的颜色 {token}")))
        }
        _ => Err(EvalError::argument(function, format!("无效的颜色 {token}"))),
    }
}

/// 数值参数；百分比换算为 0..1。
fn number_arg(args: &[Token], index: usize, function: &str) -> EvalResult<f64> {
    number_of(arg(args, index, function)?, function)
}

fn number_of(token: &Token, function: &str) -> EvalResult<f64> {
    let value = match &token.kind {
        TokenKind::Number { value, unit } if unit == "%" => value / 100.0,
        TokenKind::Number { value, .. } => *value,
        _ => token.to_primitive().as_f64(),
    };
    if value.is_nan() {
        return Err(EvalError::argument(function, format!("需要数值参数，实际为 {token}")));
    }
    Ok(value)
}

/// 颜色通道参数：百分比按 `size` 缩放。
fn scaled(token: &Token, size: f64, function: &str) -> EvalResult<f64> {
    match &token.kind {
        TokenKind::Number { value, unit } if unit == "%" => Ok(value * size / 100.0),
        _ => number_of(token, function),
    }
}

fn raw_number(args: &[Token], index: usize, function: &str) -> EvalResult<(f64, String)> {
    let token = arg(args, index, function)?;
    match &token.kind {
        TokenKind::Number { value, unit } => Ok((*value, unit.clone())),
        _ => Ok((number_of(token, function)?, String::new())),
    }
}

/// 字符串参数的文本内容（去掉引号），其他 token 取其文本形式。
fn text_of(token: &Token) -> String {
    match &token.kind {
        TokenKind::String { value, .. } => value.clone(),
        TokenKind::Variable { name } => name.clone(),
        _ => token.to_string(),
    }
}

fn dimension(value: f64, unit: &str) -> Option<Value> {
    Some(Value::Token(Token::number(value, unit)))
}

fn color_value(color: Rgba) -> Option<Value> {
    Some(Value::Token(Token::color(color)))
}

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn from_hsl(hsl: Hsl) -> Option<Value> {
    color_value(color::hsl_to_rgb(
        hsl.h,
        clamp(hsl.s),
        clamp(hsl.l),
        clamp(hsl.a),
    ))
}

// ---------------------------------------------------------------------------
// 颜色构造
// ---------------------------------------------------------------------------

fn rgb(args: &[Token]) -> EvalResult<Option<Value>> {
    let r = scaled(arg(args, 0, "rgb")?, 255.0, "rgb")?;
    let g = scaled(arg(args, 1, "rgb")?, 255.0, "rgb")?;
    let b = scaled(arg(args, 2, "rgb")?, 255.0, "rgb")?;
    Ok(color_value(Rgba::rgb(r, g, b)))
}

/// `rgba(r, g, b, a)` 或 `rgba(color, alpha)`。
fn rgba(args: &[Token]) -> EvalResult<Option<Value>> {
    if args.len() < 3 {
        let mut color = color_arg(args, 0, "rgba")?;
        color.a = match args.get(1) {
            Some(alpha) => number_of(alpha, "rgba")?,
            None => 1.0,
        };
        return Ok(color_value(color));
    }
    let r = scaled(&args[0], 255.0, "rgba")?;
    let g = scaled(&args[1], 255.0, "rgba")?;
    let b = scaled(&args[2], 255.0, "rgba")?;
    let a = match args.get(3) {
        Some(alpha) => number_of(alpha, "rgba")?,
        None => 1.0,
    };
    Ok(color_value(Rgba::new(r, g, b, a)))
}

fn hsl(args: &[Token]) -> EvalResult<Option<Value>> {
    hsla_with(args, "hsl", Some(1.0))
}

fn hsla(args: &[Token]) -> EvalResult<Option<Value>> {
    hsla_with(args, "hsla", None)
}

fn hsla_with(args: &[Token], function: &str, alpha: Option<f64>) -> EvalResult<Option<Value>> {
    let h = number_arg(args, 0, function)?;
    let s = number_arg(args, 1, function)?;
    let l = number_arg(args, 2, function)?;
    let a = match alpha {
        Some(alpha) => alpha,
        None => number_arg(args, 3, function)?,
    };
    Ok(from_hsl(Hsl { h, s, l, a }))
}

fn hsv(args: &[Token]) -> EvalResult<Option<Value>> {
    hsva_with(args, "hsv", Some(1.0))
}

fn hsva(args: &[Token]) -> EvalResult<Option<Value>> {
    hsva_with(args, "hsva", None)
}

fn hsva_with(args: &[Token], function: &str, alpha: Option<f64>) -> EvalResult<Option<Value>> {
    let h = number_arg(args, 0, function)? % 360.0;
    let s = number_arg(args, 1, function)?;
    let v = number_arg(args, 2, function)?;
    let a = match alpha {
        Some(alpha) => alpha,
        None => number_arg(args, 3, function)?,
    };

    let sector = (h / 60.0).floor().rem_euclid(6.0);
    let f = h / 60.0 - sector;
    let values = [v, v * (1.0 - s), v * (1.0 - f * s), v * (1.0 - (1.0 - f) * s)];
    const PERMUTATIONS: [[usize; 3]; 6] = [
        [0, 3, 1],
        [2, 0, 1],
        [1, 0, 3],
        [1, 2, 0],
        [3, 1, 0],
        [0, 1, 2],
    ];
    let perm = PERMUTATIONS[sector as usize];
    Ok(color_value(Rgba::new(
        values[perm[0]] * 255.0,
        values[perm[1]] * 255.0,
        values[perm[2]] * 255.0,
        a,
    )))
}

fn to_color_fn(args: &[Token]) -> EvalResult<Option<Value>> {
    let token = arg(args, 0, "color")?;
    match &token.kind {
        TokenKind::Color { .. } => Ok(Some(Value::Token(token.clone()))),
        TokenKind::String { value, .. } => color::parse_color(value, false)
            .map(color_value)
            .ok_or_else(|| EvalError::argument("color", "参数必须是颜色关键字或 3/6 位十六进制颜色")),
        _ => Err(EvalError::argument("color", "参数必须是字符串")),
    }
}

// ---------------------------------------------------------------------------
// 颜色通道
// ---------------------------------------------------------------------------

fn hue(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(color_arg(args, 0, "hue")?.to_hsl().h.round(), ""))
}

fn saturation(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension((color_arg(args, 0, "saturation")?.to_hsl().s * 100.0).round(), "%"))
}

fn lightness(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension((color_arg(args, 0, "lightness")?.to_hsl().l * 100.0).round(), "%"))
}

fn hsv_hue(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(color_arg(args, 0, "hsvhue")?.to_hsv().h.round(), ""))
}

fn hsv_saturation(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension((color_arg(args, 0, "hsvsaturation")?.to_hsv().s * 100.0).round(), "%"))
}

fn hsv_value(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension((color_arg(args, 0, "hsvvalue")?.to_hsv().v * 100.0).round(), "%"))
}

fn red(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(color_arg(args, 0, "red")?.r.round(), ""))
}

fn green(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(color_arg(args, 0, "green")?.g.round(), ""))
}

fn blue(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(color_arg(args, 0, "blue")?.b.round(), ""))
}

fn alpha(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(color_arg(args, 0, "alpha")?.a, ""))
}

fn luma(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "luma")?;
    Ok(dimension((color.luma() * color.a * 100.0).round(), "%"))
}

// ---------------------------------------------------------------------------
// 颜色运算
// ---------------------------------------------------------------------------

/// 在 HSL 空间调整颜色的通用流程。
fn adjust_hsl(
    args: &[Token],
    function: &str,
    adjust: impl FnOnce(&mut Hsl, f64),
) -> EvalResult<Option<Value>> {
    let mut hsl = color_arg(args, 0, function)?.to_hsl();
    let amount = number_arg(args, 1, function)?;
    adjust(&mut hsl, amount);
    Ok(from_hsl(hsl))
}

fn saturate(args: &[Token]) -> EvalResult<Option<Value>> {
    // CSS filter 的 saturate(3) 保持原样
    if args.first().is_some_and(Token::is_number) {
        return Ok(None);
    }
    adjust_hsl(args, "saturate", |hsl, amount| hsl.s = clamp(hsl.s + amount))
}

fn desaturate(args: &[Token]) -> EvalResult<Option<Value>> {
    adjust_hsl(args, "desaturate", |hsl, amount| hsl.s = clamp(hsl.s - amount))
}

fn lighten(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "lighten")?;
    Ok(color_value(color::lighten(color, number_arg(args, 1, "lighten")?)))
}

fn darken(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "darken")?;
    Ok(color_value(color::darken(color, number_arg(args, 1, "darken")?)))
}

fn fadein(args: &[Token]) -> EvalResult<Option<Value>> {
    adjust_hsl(args, "fadein", |hsl, amount| hsl.a = clamp(hsl.a + amount))
}

fn fadeout(args: &[Token]) -> EvalResult<Option<Value>> {
    adjust_hsl(args, "fadeout", |hsl, amount| hsl.a = clamp(hsl.a - amount))
}

fn fade(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "fade")?;
    Ok(color_value(color::fade(color, number_arg(args, 1, "fade")?)))
}

fn spin(args: &[Token]) -> EvalResult<Option<Value>> {
    let mut hsl = color_arg(args, 0, "spin")?.to_hsl();
    let (amount, _) = raw_number(args, 1, "spin")?;
    let hue = (hsl.h + amount) % 360.0;
    hsl.h = if hue < 0.0 { hue + 360.0 } else { hue };
    Ok(from_hsl(hsl))
}

fn mix_colors(first: Rgba, second: Rgba, weight: f64) -> Rgba {
    let w = weight * 2.0 - 1.0;
    let a = first.a - second.a;
    let w1 = (if w * a == -1.0 { w } else { (w + a) / (1.0 + w * a) } + 1.0) / 2.0;
    let w2 = 1.0 - w1;
    Rgba::new(
        first.r * w1 + second.r * w2,
        first.g * w1 + second.g * w2,
        first.b * w1 + second.b * w2,
        first.a * weight + second.a * (1.0 - weight),
    )
}

/// 混合权重：`50%` 或 `50` 都表示一半，缺省为一半。
fn weight_arg(args: &[Token], index: usize, function: &str) -> EvalResult<f64> {
    match args.get(index) {
        Some(token) if token.unit() == "%" => number_of(token, function),
        Some(token) => Ok(number_of(token, function)? / 100.0),
        None => Ok(0.5),
    }
}

fn mix(args: &[Token]) -> EvalResult<Option<Value>> {
    let first = color_arg(args, 0, "mix")?;
    let second = color_arg(args, 1, "mix")?;
    let weight = weight_arg(args, 2, "mix")?;
    Ok(color_value(mix_colors(first, second, weight)))
}

fn tint(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "tint")?;
    let weight = weight_arg(args, 1, "tint")?;
    Ok(color_value(mix_colors(Rgba::gray(255.0), color, weight)))
}

fn shade(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "shade")?;
    let weight = weight_arg(args, 1, "shade")?;
    Ok(color_value(mix_colors(Rgba::black(), color, weight)))
}

fn greyscale(args: &[Token]) -> EvalResult<Option<Value>> {
    let mut hsl = color_arg(args, 0, "greyscale")?.to_hsl();
    hsl.s = 0.0;
    Ok(from_hsl(hsl))
}

fn contrast(args: &[Token]) -> EvalResult<Option<Value>> {
    // CSS filter 的 contrast(3) 保持原样
    if args.first().is_some_and(Token::is_number) {
        return Ok(None);
    }
    let color = color_arg(args, 0, "contrast")?;
    let mut dark = match args.get(1) {
        Some(_) => color_arg(args, 1, "contrast")?,
        None => Rgba::black(),
    };
    let mut light = match args.get(2) {
        Some(_) => color_arg(args, 2, "contrast")?,
        None => Rgba::gray(255.0),
    };
    if dark.luma() > light.luma() {
        std::mem::swap(&mut dark, &mut light);
    }
    let threshold = match args.get(3) {
        Some(token) => number_of(token, "contrast")?,
        None => 0.43,
    };
    Ok(color_value(if color.luma() < threshold { light } else { dark }))
}

fn argb(args: &[Token]) -> EvalResult<Option<Value>> {
    let color = color_arg(args, 0, "argb")?;
    Ok(Some(Value::Token(Token::string(color.to_argb(), None))))
}

fn blend(args: &[Token], mode: BlendMode) -> EvalResult<Option<Value>> {
    let backdrop = color_arg(args, 0, mode.name())?;
    let source = color_arg(args, 1, mode.name())?;
    Ok(color_value(backdrop.blend(&source, mode)))
}

// ---------------------------------------------------------------------------
// 数学
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum MathUnit {
    /// 结果沿用参数单位。
    Keep,
    /// 参数先换算为弧度，结果无单位（三角函数）。
    FromRadians,
    /// 参数先换算为弧度，结果单位为 `rad`（反三角函数）。
    ToRadians,
}

fn math(args: &[Token], function: &str, op: fn(f64) -> f64, unit: MathUnit) -> EvalResult<Option<Value>> {
    let (value, from) = raw_number(args, 0, function)?;
    match unit {
        MathUnit::Keep => Ok(dimension(op(value), &from)),
        MathUnit::FromRadians | MathUnit::ToRadians => {
            let radians = if from == "rad" {
                value
            } else {
                convert_to(value, &from, "rad").0
            };
            let out_unit = if matches!(unit, MathUnit::ToRadians) { "rad" } else { "" };
            Ok(dimension(op(radians), out_unit))
        }
    }
}

fn percentage(args: &[Token]) -> EvalResult<Option<Value>> {
    let (value, _) = raw_number(args, 0, "percentage")?;
    Ok(dimension(value * 100.0, "%"))
}

fn round(args: &[Token]) -> EvalResult<Option<Value>> {
    let (value, unit) = raw_number(args, 0, "round")?;
    let digits = match args.get(1) {
        Some(token) => number_of(token, "round")?.max(0.0),
        None => 0.0,
    };
    let factor = 10f64.powi(digits as i32);
    Ok(dimension((value * factor).round() / factor, &unit))
}

fn modulo(args: &[Token]) -> EvalResult<Option<Value>> {
    let (a, unit_a) = raw_number(args, 0, "mod")?;
    let (b, unit_b) = raw_number(args, 1, "mod")?;
    let unit = if unit_a.is_empty() { unit_b } else { unit_a };
    Ok(dimension(a % b, &unit))
}

fn pow(args: &[Token]) -> EvalResult<Option<Value>> {
    let (x, unit) = raw_number(args, 0, "pow")?;
    let (y, _) = raw_number(args, 1, "pow")?;
    Ok(dimension(x.powf(y), &unit))
}

fn unit_group(unit: &str) -> Option<(&'static str, &'static [(&'static str, f64)])> {
    let groups: [(&'static str, &'static [(&'static str, f64)]); 3] = [
        ("length", &LENGTH_UNITS),
        ("duration", &DURATION_UNITS),
        ("angle", &ANGLE_UNITS),
    ];
    groups
        .into_iter()
        .find(|(_, units)| units.iter().any(|(name, _)| *name == unit))
}

fn default_unit(group: &str) -> &'static str {
    match group {
        "length" => "m",
        "duration" => "s",
        _ => "rad",
    }
}

fn coefficient(unit: &str) -> Option<f64> {
    let (_, units) = unit_group(unit)?;
    units
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, coeff)| *coeff)
}

/// 单位换算；原值无单位时取目标单位所在组的默认单位。
fn convert_to(value: f64, from: &str, to: &str) -> (f64, String) {
    let from = if from.is_empty() {
        unit_group(to).map_or("", |(group, _)| default_unit(group))
    } else {
        from
    };
    if from.is_empty() || to.is_empty() {
        return (value, from.to_string());
    }
    match (coefficient(from), coefficient(to)) {
        (Some(source), Some(target)) => (value * source / target, to.to_string()),
        _ => (value, from.to_string()),
    }
}

fn unit(args: &[Token]) -> EvalResult<Option<Value>> {
    let (value, _) = raw_number(args, 0, "unit")?;
    let unit = args.get(1).map(text_of).unwrap_or_default();
    Ok(dimension(value, &unit))
}

fn convert(args: &[Token]) -> EvalResult<Option<Value>> {
    let (value, from) = raw_number(args, 0, "convert")?;
    let to = text_of(arg(args, 1, "convert")?);
    let (value, unit) = convert_to(value, &from, &to);
    Ok(dimension(value, &unit))
}

/// 单位组不同的值无法比较，返回不处理。
fn min_max(args: &[Token], function: &str, is_min: bool) -> EvalResult<Option<Value>> {
    match args {
        [] => return Err(EvalError::argument(function, "至少需要一个参数")),
        [single] => return Ok(Some(Value::Token(single.clone()))),
        _ => {}
    }

    let mut groups: Vec<&str> = Vec::new();
    let mut keyed = Vec::with_capacity(args.len());
    for token in args {
        let (group, key) = match &token.kind {
            TokenKind::Number { value, unit } => match unit_group(unit) {
                Some((group, _)) => (group, convert_to(*value, unit, default_unit(group)).0),
                None => ("number", *value),
            },
            TokenKind::String { .. } => ("string", f64::NAN),
            _ => (token.kind_name(), token.to_primitive().as_f64()),
        };
        if !groups.contains(&group) {
            groups.push(group);
        }
        keyed.push((key, token));
    }
    if groups.len() > 1 {
        return Ok(None);
    }

    let picked = keyed.into_iter().reduce(|best, candidate| {
        let better = if is_min {
            candidate.0 < best.0
        } else {
            candidate.0 > best.0
        };
        if better {
            candidate
        } else {
            best
        }
    });
    Ok(picked.map(|(_, token)| Value::Token(token.clone())))
}

// ---------------------------------------------------------------------------
// 字符串
// ---------------------------------------------------------------------------

fn escape_string(args: &[Token]) -> EvalResult<Option<Value>> {
    let text = text_of(arg(args, 0, "e")?);
    Ok(Some(Value::Token(Token::string(text, None))))
}

/// 类似 `encodeURI`，额外编码 `= : # ; ( )`。
fn url_encode(text: &str, component: bool) -> String {
    let keep = |ch: char| {
        ch.is_ascii_alphanumeric()
            || "-_.!~*'".contains(ch)
            || (!component && ",/?@&+$".contains(ch))
    };
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if keep(ch) {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

fn escape(args: &[Token]) -> EvalResult<Option<Value>> {
    let text = text_of(arg(args, 0, "escape")?);
    Ok(Some(Value::Token(Token::string(url_encode(&text, false), None))))
}

/// `%(format, args...)`：依次替换 `%s`/`%d`/`%a`，大写形式会做 URL 编码。
fn format(args: &[Token]) -> EvalResult<Option<Value>> {
    let template = arg(args, 0, "%")?;
    let quote = match &template.kind {
        TokenKind::String { quote, .. } => *quote,
        _ => None,
    };
    let mut out = text_of(template);
    for value in &args[1..] {
        let value = value.to_string();
        let Some(pos) = find_placeholder(&out) else { break };
        let replacement = if out[pos + 1..pos + 2].chars().all(|ch| ch.is_ascii_uppercase()) {
            url_encode(&value, true)
        } else {
            value
        };
        out.replace_range(pos..pos + 2, &replacement);
    }
    Ok(Some(Value::Token(Token::string(out.replace("%%", "%"), quote))))
}

fn find_placeholder(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len().saturating_sub(1)).find(|&idx| {
        bytes[idx] == b'%' && matches!(bytes[idx + 1].to_ascii_lowercase(), b's' | b'd' | b'a')
    })
}

fn quote(args: &[Token]) -> EvalResult<Option<Value>> {
    let text = text_of(arg(args, 0, "quote")?);
    Ok(Some(Value::Token(Token::string(text, Some('"')))))
}

fn unquote(args: &[Token]) -> EvalResult<Option<Value>> {
    let text = text_of(arg(args, 0, "unquote")?);
    Ok(Some(Value::Token(Token::string(text, None))))
}

/// 保留原字符串的引号，替换其内容。
fn with_text(token: &Token, text: String) -> Value {
    let quote = match &token.kind {
        TokenKind::String { quote, .. } => *quote,
        _ => None,
    };
    Value::Token(Token::string(text, quote))
}

fn str_length(args: &[Token]) -> EvalResult<Option<Value>> {
    let text = text_of(arg(args, 0, "str-length")?);
    Ok(dimension(text.chars().count() as f64, ""))
}

fn str_index(args: &[Token]) -> EvalResult<Option<Value>> {
    let text = text_of(arg(args, 0, "str-index")?);
    let needle = text_of(arg(args, 1, "str-index")?);
    let index = text
        .find(&needle)
        .map_or(-1.0, |byte| text[..byte].chars().count() as f64);
    Ok(dimension(index, ""))
}

fn str_insert(args: &[Token]) -> EvalResult<Option<Value>> {
    let source = arg(args, 0, "str-insert")?;
    let chars: Vec<char> = text_of(source).chars().collect();
    let insert = text_of(arg(args, 1, "str-insert")?);
    let index = number_arg(args, 2, "str-insert")?.max(0.0) as usize;
    let index = index.min(chars.len());

    let mut out: String = chars[..index].iter().collect();
    out.push_str(&insert);
    out.extend(&chars[index..]);
    Ok(Some(with_text(source, out)))
}

/// 与 JS `substring` 一致：负数按 0 处理，起止颠倒时自动交换。
fn str_slice(args: &[Token]) -> EvalResult<Option<Value>> {
    let source = arg(args, 0, "str-slice")?;
    let chars: Vec<char> = text_of(source).chars().collect();
    let bound = |value: f64| (value.max(0.0) as usize).min(chars.len());
    let start = bound(number_arg(args, 1, "str-slice")?);
    let end = match args.get(2) {
        Some(token) => bound(number_of(token, "str-slice")?),
        None => chars.len(),
    };
    let (start, end) = if start > end { (end, start) } else { (start, end) };
    Ok(Some(with_text(source, chars[start..end].iter().collect())))
}

fn change_case(args: &[Token], function: &str, upper: bool) -> EvalResult<Option<Value>> {
    let source = arg(args, 0, function)?;
    let text = text_of(source);
    let text = if upper {
        text.to_uppercase()
    } else {
        text.to_lowercase()
    };
    Ok(Some(with_text(source, text)))
}

// ---------------------------------------------------------------------------
// 类型判断
// ---------------------------------------------------------------------------

fn is_color(args: &[Token]) -> EvalResult<Option<Value>> {
    let token = arg(args, 0, "iscolor")?;
    let result = match &token.kind {
        TokenKind::Color { .. } => true,
        TokenKind::Variable { name } | TokenKind::String { value: name, .. } => color::is_color(name),
        _ => false,
    };
    Ok(Some(Value::Bool(result)))
}

fn has_unit(args: &[Token], unit: &str) -> bool {
    args.first().is_some_and(|token| token.is_number() && token.unit() == unit)
}

fn is_unit(args: &[Token]) -> EvalResult<Option<Value>> {
    let unit = text_of(arg(args, 1, "isunit")?);
    Ok(Some(Value::Bool(has_unit(args, &unit))))
}

// ---------------------------------------------------------------------------
// 列表
// ---------------------------------------------------------------------------

/// 把参数展开为列表元素：单个列表取其元素，单个字符串按空格拆分。
fn list_items(args: &[Token]) -> Vec<Value> {
    match args {
        [single] => match &single.kind {
            TokenKind::List { items, .. } => items.iter().cloned().map(Value::Token).collect(),
            TokenKind::String { value, .. } => split(value).into_iter().map(Value::Text).collect(),
            _ => vec![Value::Token(single.clone())],
        },
        _ => args.iter().cloned().map(Value::Token).collect(),
    }
}

fn length(args: &[Token]) -> EvalResult<Option<Value>> {
    Ok(dimension(list_items(args).len() as f64, ""))
}

/// `extract(list, index)`，索引从 1 开始；越界时保持原样。
fn extract(args: &[Token]) -> EvalResult<Option<Value>> {
    let Some((index, values)) = args.split_last() else {
        return Err(EvalError::argument("extract", "缺少索引参数"));
    };
    let index = number_of(index, "extract")?;
    let items = list_items(values);
    if index < 1.0 {
        return Ok(None);
    }
    Ok(items.into_iter().nth(index as usize - 1))
}

/// `nth(list, n)`，`n` 为负数时从末尾计数。
fn nth(args: &[Token]) -> EvalResult<Option<Value>> {
    let Some((index, values)) = args.split_last() else {
        return Err(EvalError::argument("nth", "缺少索引参数"));
    };
    let n = number_of(index, "nth")?;
    let items = list_items(values);
    let position = if n >= 1.0 {
        n as usize - 1
    } else if n > -1.0 {
        return Ok(None);
    } else {
        let back = (-n) as usize;
        if back == 0 || back > items.len() {
            return Ok(None);
        }
        items.len() - back
    };
    Ok(items.into_iter().nth(position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Token]) -> Option<String> {
        let f = lookup(name).unwrap();
        f(args).unwrap().map(|value| match value {
            Value::Token(token) => token.to_string(),
            Value::Number(n) => crate::utils::format_number(n),
            Value::Bool(b) => b.to_string(),
            Value::Text(text) => text,
            Value::List(items) => Token::list(items).to_string(),
        })
    }

    fn hex(value: &str) -> Token {
        Token::color(color::parse_color(value, false).unwrap())
    }

    #[test]
    fn builds_colors() {
        let channels = [
            Token::number(255.0, ""),
            Token::number(0.0, ""),
            Token::number(50.0, "%"),
        ];
        assert_eq!(call("rgb", &channels).unwrap(), "#ff0080");
        assert_eq!(
            call("rgba", &[hex("#ff0000"), Token::number(0.5, "")]).unwrap(),
            "rgba(255, 0, 0, 0.5)"
        );
        assert_eq!(
            call(
                "hsl",
                &[Token::number(120.0, ""), Token::number(100.0, "%"), Token::number(50.0, "%")]
            )
            .unwrap(),
            "#00ff00"
        );
    }

    #[test]
    fn reads_channels() {
        assert_eq!(call("red", &[hex("#336699")]).unwrap(), "51");
        assert_eq!(call("lightness", &[hex("#ffffff")]).unwrap(), "100%");
        assert_eq!(call("alpha", &[Token::variable("red")]).unwrap(), "1");
    }

    #[test]
    fn filter_forms_are_not_handled() {
        assert_eq!(call("saturate", &[Token::number(3.0, "")]), None);
        assert_eq!(call("contrast", &[Token::number(2.0, "")]), None);
    }

    #[test]
    fn mixes_by_weight() {
        assert_eq!(
            call("mix", &[hex("#ffffff"), hex("#000000"), Token::number(50.0, "%")]).unwrap(),
            "#808080"
        );
        assert_eq!(call("tint", &[hex("#000000"), Token::number(100.0, "%")]).unwrap(), "#ffffff");
    }

    #[test]
    fn math_keeps_units() {
        assert_eq!(call("floor", &[Token::number(2.7, "px")]).unwrap(), "2px");
        assert_eq!(call("percentage", &[Token::number(0.5, "")]).unwrap(), "50%");
        assert_eq!(
            call("round", &[Token::number(1.2345, "em"), Token::number(2.0, "")]).unwrap(),
            "1.23em"
        );
        assert_eq!(call("sin", &[Token::number(90.0, "deg")]).unwrap(), "1");
        assert_eq!(
            call("convert", &[Token::number(1.0, "s"), Token::string("ms", Some('"'))]).unwrap(),
            "1000ms"
        );
    }

    #[test]
    fn min_max_respect_unit_groups() {
        let lengths = [Token::number(1.0, "cm"), Token::number(5.0, "mm")];
        assert_eq!(call("min", &lengths).unwrap(), "5mm");
        assert_eq!(call("max", &lengths).unwrap(), "1cm");
        assert_eq!(call("max", &[Token::number(1.0, "s"), Token::number(1.0, "cm")]), None);
    }

    #[test]
    fn string_helpers_keep_quotes() {
        let text = Token::string("hello", Some('\''));
        assert_eq!(call("to-upper-case", &[text.clone()]).unwrap(), "'HELLO'");
        assert_eq!(
            call("str-slice", &[text.clone(), Token::number(1.0, ""), Token::number(3.0, "")]).unwrap(),
            "'el'"
        );
        assert_eq!(call("str-index", &[text.clone(), Token::string("l", None)]).unwrap(), "2");
        assert_eq!(call("e", &[text]).unwrap(), "hello");
        assert_eq!(
            call("%", &[Token::string("%d/%s", Some('"')), Token::number(1.0, ""), Token::string("a b", None)])
                .unwrap(),
            "\"1/a b\""
        );
    }

    #[test]
    fn list_access() {
        let items = [Token::variable("a"), Token::variable("b"), Token::variable("c")];
        let mut args = items.to_vec();
        args.push(Token::number(2.0, ""));
        assert_eq!(call("extract", &args).unwrap(), "b");

        let mut args = items.to_vec();
        args.push(Token::number(-1.0, ""));
        assert_eq!(call("nth", &args).unwrap(), "c");

        assert_eq!(call("length", &[Token::string("1px 2px 3px", None)]).unwrap(), "3");
    }
}
