use crate::utils::format_number;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const MAX_DECIMAL: i64 = 0xff_ff_ff;

/// RGBA 颜色。r/g/b 取值 0..=255，a 取值 0..=1；
/// 运算过程中允许越界，只有在输出时才会被截断。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

/// HSL/HSV 表示，色相单位为度。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
    pub a: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
    pub a: f64,
}

impl Rgba {
    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// 三个通道相同的灰色，用于数字与颜色混合运算。
    pub const fn gray(value: f64) -> Self {
        Self::rgb(value, value, value)
    }

    pub fn black() -> Self {
        Self::rgb(0.0, 0.0, 0.0)
    }

    /// 打包为 24 位整数，通道按 JS 位运算的方式截断取整。
    pub fn to_decimal(&self) -> i64 {
        ((self.r.trunc() as i64) << 16) + ((self.g.trunc() as i64) << 8) + self.b.trunc() as i64
    }

    pub fn from_decimal(value: i64) -> Self {
        let value = value.clamp(0, MAX_DECIMAL);
        Self::rgb(
            ((value & 0xff0000) >> 16) as f64,
            ((value & 0x00ff00) >> 8) as f64,
            (value & 0x0000ff) as f64,
        )
    }

    pub fn to_hex(&self) -> String {
        format!(
            "#{:02x}{:02x}{:02x}",
            to_channel(self.r),
            to_channel(self.g),
            to_channel(self.b)
        )
    }

    /// 带 alpha 前缀的 `#aarrggbb` 形式（IE filter 使用）。
    pub fn to_argb(&self) -> String {
        format!("#{:02x}{}", to_channel(self.a * 255.0), &self.to_hex()[1..])
    }

    /// 输出为 CSS 文本：全零为 `transparent`，半透明为 `rgba()`，否则为十六进制。
    pub fn to_css(&self) -> String {
        if self.r == 0.0 && self.g == 0.0 && self.b == 0.0 && self.a == 0.0 {
            return "transparent".to_string();
        }
        if self.a < 1.0 {
            return format!(
                "rgba({}, {}, {}, {})",
                to_channel(self.r),
                to_channel(self.g),
                to_channel(self.b),
                format_number(self.a.clamp(0.0, 1.0))
            );
        }
        self.to_hex()
    }

    pub fn to_hsl(&self) -> Hsl {
        let r = self.r / 255.0;
        let g = self.g / 255.0;
        let b = self.b / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        let d = max - min;

        if d.abs() < f64::EPSILON {
            return Hsl {
                h: 0.0,
                s: 0.0,
                l,
                a: self.a,
            };
        }

        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };

        Hsl {
            h: hue_of(r, g, b, max, d) * 360.0,
            s,
            l,
            a: self.a,
        }
    }

    pub fn to_hsv(&self) -> Hsv {
        let r = self.r / 255.0;
        let g = self.g / 255.0;
        let b = self.b / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let d = max - min;
        let s = if max == 0.0 { 0.0 } else { d / max };
        let h = if d.abs() < f64::EPSILON {
            0.0
        } else {
            hue_of(r, g, b, max, d)
        };

        Hsv {
            h: h * 360.0,
            s,
            v: max,
            a: self.a,
        }
    }

    pub fn luma(&self) -> f64 {
        0.2126 * self.r / 255.0 + 0.7152 * self.g / 255.0 + 0.0722 * self.b / 255.0
    }

    /// 以 `self` 为背景、`source` 为前景按指定模式混合。
    pub fn blend(&self, source: &Rgba, mode: BlendMode) -> Rgba {
        color_blend(|cb, cs| mode.apply(cb, cs), *self, *source)
    }
}

impl Hsl {
    pub fn to_rgba(&self) -> Rgba {
        hsl_to_rgb(self.h, self.s, self.l, self.a)
    }
}

/// 解析颜色文本：颜色关键字、`#rgb`/`#rrggbb`、`rgb()`/`rgba()`。
/// `fallback` 为真时无法识别的输入返回黑色。
pub fn parse_color(input: &str, fallback: bool) -> Option<Rgba> {
    static RGBA_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"rgba?\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*(?:,\s*([.\d]+)\s*)?\)")
            .expect("颜色函数正则编译失败")
    });
    static HEX_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^#([a-f0-9]+)").expect("十六进制颜色正则编译失败"));

    let trimmed = input.trim();
    if let Some(&value) = NAMED_COLORS.get(trimmed.to_ascii_lowercase().as_str()) {
        return Some(Rgba::from_decimal(value));
    }
    if trimmed.eq_ignore_ascii_case("transparent") {
        return Some(Rgba::new(0.0, 0.0, 0.0, 0.0));
    }
    if let Some(caps) = RGBA_RE.captures(trimmed) {
        let channel = |idx: usize| caps[idx].parse::<f64>().unwrap_or(0.0);
        let alpha = caps
            .get(4)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(1.0);
        return Some(Rgba::new(channel(1), channel(2), channel(3), alpha));
    }
    if let Some(caps) = HEX_RE.captures(trimmed) {
        return Some(Rgba::from_decimal(parse_hex(&caps[1])));
    }
    fallback.then(Rgba::black)
}

/// 判断文本能否不借助回退转换为颜色（用于识别颜色关键字）。
pub fn is_color(input: &str) -> bool {
    parse_color(input, false).is_some()
}

pub fn lighten(color: Rgba, amount: f64) -> Rgba {
    let mut hsl = color.to_hsl();
    hsl.l = (hsl.l + amount).clamp(0.0, 1.0);
    hsl.to_rgba()
}

pub fn darken(color: Rgba, amount: f64) -> Rgba {
    let mut hsl = color.to_hsl();
    hsl.l = (hsl.l - amount).clamp(0.0, 1.0);
    hsl.to_rgba()
}

pub fn fade(color: Rgba, amount: f64) -> Rgba {
    let mut hsl = color.to_hsl();
    hsl.a = amount.clamp(0.0, 1.0);
    hsl.to_rgba()
}

/// 颜色混合模式，作为纯函数表使用。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Multiply,
    Screen,
    Overlay,
    Softlight,
    Hardlight,
    Difference,
    Exclusion,
    Average,
    Negation,
}

impl BlendMode {
    pub const ALL: [BlendMode; 9] = [
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Softlight,
        BlendMode::Hardlight,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::Average,
        BlendMode::Negation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Softlight => "softlight",
            BlendMode::Hardlight => "hardlight",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Average => "average",
            BlendMode::Negation => "negation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.name() == name)
    }

    fn apply(self, cb: f64, cs: f64) -> f64 {
        match self {
            BlendMode::Multiply => blend_multiply(cb, cs),
            BlendMode::Screen => blend_screen(cb, cs),
            BlendMode::Overlay => blend_overlay(cb, cs),
            BlendMode::Softlight => blend_softlight(cb, cs),
            BlendMode::Hardlight => blend_overlay(cs, cb),
            BlendMode::Difference => (cb - cs).abs(),
            BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
            BlendMode::Average => (cb + cs) / 2.0,
            BlendMode::Negation => 1.0 - (cb + cs - 1.0).abs(),
        }
    }
}

fn color_blend<F>(mode: F, bottom: Rgba, top: Rgba) -> Rgba
where
    F: Fn(f64, f64) -> f64 + Copy,
{
    let ab = bottom.a;
    let at = top.a;
    let ar = at + ab * (1.0 - at);
    let bottom_channels = [bottom.r, bottom.g, bottom.b];
    let top_channels = [top.r, top.g, top.b];
    let mut result = [0.0; 3];
    for i in 0..3 {
        let cb = bottom_channels[i] / 255.0;
        let cs = top_channels[i] / 255.0;
        let mut cr = mode(cb, cs);
        if ar > 0.0 {
            cr = (at * cs + ab * (cb - at * (cb + cs - cr))) / ar;
        }
        result[i] = cr * 255.0;
    }
    Rgba::new(result[0], result[1], result[2], ar)
}

fn blend_multiply(a: f64, b: f64) -> f64 {
    a * b
}

fn blend_screen(a: f64, b: f64) -> f64 {
    a + b - a * b
}

fn blend_overlay(base: f64, overlay: f64) -> f64 {
    let base = base * 2.0;
    if base <= 1.0 {
        blend_multiply(base, overlay)
    } else {
        blend_screen(base - 1.0, overlay)
    }
}

fn blend_softlight(cb: f64, cs: f64) -> f64 {
    let (mut d, mut e) = (1.0, cb);
    if cs > 0.5 {
        e = 1.0;
        d = if cb > 0.25 {
            cb.sqrt()
        } else {
            ((16.0 * cb - 12.0) * cb + 4.0) * cb
        };
    }
    cb - (1.0 - 2.0 * cs) * e * (d - cb)
}

fn parse_hex(hex: &str) -> i64 {
    let normalized = if hex.len() == 3 {
        hex.chars().flat_map(|ch| [ch, ch]).collect::<String>()
    } else {
        hex.to_string()
    };
    // 超长的十六进制串视为超出范围，直接截断为白色
    i64::from_str_radix(&normalized, 16)
        .unwrap_or(MAX_DECIMAL)
        .min(MAX_DECIMAL)
}

fn hue_of(r: f64, g: f64, b: f64, max: f64, d: f64) -> f64 {
    if (max - r).abs() < f64::EPSILON {
        ((g - b) / d + if g < b { 6.0 } else { 0.0 }) / 6.0
    } else if (max - g).abs() < f64::EPSILON {
        ((b - r) / d + 2.0) / 6.0
    } else {
        ((r - g) / d + 4.0) / 6.0
    }
}

/// 色相以度为单位，饱和度/亮度/alpha 为 0..=1。
pub fn hsl_to_rgb(h: f64, s: f64, l: f64, alpha: f64) -> Rgba {
    let h = (h % 360.0) / 360.0;
    if s <= 0.0 {
        return Rgba::new(l * 255.0, l * 255.0, l * 255.0, alpha);
    }

    let q = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    Rgba::new(r * 255.0, g * 255.0, b * 255.0, alpha)
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        _ if t < 1.0 / 6.0 => p + (q - p) * 6.0 * t,
        _ if t < 1.0 / 2.0 => q,
        _ if t < 2.0 / 3.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

static NAMED_COLORS: Lazy<IndexMap<&'static str, i64>> = Lazy::new(|| {
    [
        ("aliceblue", 0xf0f8ff),
        ("antiquewhite", 0xfaebd7),
        ("aqua", 0x00ffff),
        ("aquamarine", 0x7fffd4),
        ("azure", 0xf0ffff),
        ("beige", 0xf5f5dc),
        ("bisque", 0xffe4c4),
        ("black", 0x000000),
        ("blanchedalmond", 0xffebcd),
        ("blue", 0x0000ff),
        ("blueviolet", 0x8a2be2),
        ("brown", 0xa52a2a),
        ("burlywood", 0xdeb887),
        ("cadetblue", 0x5f9ea0),
        ("chartreuse", 0x7fff00),
        ("chocolate", 0xd2691e),
        ("coral", 0xff7f50),
        ("cornflowerblue", 0x6495ed),
        ("cornsilk", 0xfff8dc),
        ("crimson", 0xdc143c),
        ("cyan", 0x00ffff),
        ("darkblue", 0x00008b),
        ("darkcyan", 0x008b8b),
        ("darkgoldenrod", 0xb8860b),
        ("darkgray", 0xa9a9a9),
        ("darkgrey", 0xa9a9a9),
        ("darkgreen", 0x006400),
        ("darkkhaki", 0xbdb76b),
        ("darkmagenta", 0x8b008b),
        ("darkolivegreen", 0x556b2f),
        ("darkorange", 0xff8c00),
        ("darkorchid", 0x9932cc),
        ("darkred", 0x8b0000),
        ("darksalmon", 0xe9967a),
        ("darkseagreen", 0x8fbc8f),
        ("darkslateblue", 0x483d8b),
        ("darkslategray", 0x2f4f4f),
        ("darkslategrey", 0x2f4f4f),
        ("darkturquoise", 0x00ced1),
        ("darkviolet", 0x9400d3),
        ("deeppink", 0xff1493),
        ("deepskyblue", 0x00bfff),
        ("dimgray", 0x696969),
        ("dimgrey", 0x696969),
        ("dodgerblue", 0x1e90ff),
        ("firebrick", 0xb22222),
        ("floralwhite", 0xfffaf0),
        ("forestgreen", 0x228b22),
        ("fuchsia", 0xff00ff),
        ("gainsboro", 0xdcdcdc),
        ("ghostwhite", 0xf8f8ff),
        ("gold", 0xffd700),
        ("goldenrod", 0xdaa520),
        ("gray", 0x808080),
        ("grey", 0x808080),
        ("green", 0x008000),
        ("greenyellow", 0xadff2f),
        ("honeydew", 0xf0fff0),
        ("hotpink", 0xff69b4),
        ("indianred", 0xcd5c5c),
        ("indigo", 0x4b0082),
        ("ivory", 0xfffff0),
        ("khaki", 0xf0e68c),
        ("lavender", 0xe6e6fa),
        ("lavenderblush", 0xfff0f5),
        ("lawngreen", 0x7cfc00),
        ("lemonchiffon", 0xfffacd),
        ("lightblue", 0xadd8e6),
        ("lightcoral", 0xf08080),
        ("lightcyan", 0xe0ffff),
        ("lightgoldenrodyellow", 0xfafad2),
        ("lightgray", 0xd3d3d3),
        ("lightgrey", 0xd3d3d3),
        ("lightgreen", 0x90ee90),
        ("lightpink", 0xffb6c1),
        ("lightsalmon", 0xffa07a),
        ("lightseagreen", 0x20b2aa),
        ("lightskyblue", 0x87cefa),
        ("lightslategray", 0x778899),
        ("lightslategrey", 0x778899),
        ("lightsteelblue", 0xb0c4de),
        ("lightyellow", 0xffffe0),
        ("lime", 0x00ff00),
        ("limegreen", 0x32cd32),
        ("linen", 0xfaf0e6),
        ("magenta", 0xff00ff),
        ("maroon", 0x800000),
        ("mediumaquamarine", 0x66cdaa),
        ("mediumblue", 0x0000cd),
        ("mediumorchid", 0xba55d3),
        ("mediumpurple", 0x9370d8),
        ("mediumseagreen", 0x3cb371),
        ("mediumslateblue", 0x7b68ee),
        ("mediumspringgreen", 0x00fa9a),
        ("mediumturquoise", 0x48d1cc),
        ("mediumvioletred", 0xc71585),
        ("midnightblue", 0x191970),
        ("mintcream", 0xf5fffa),
        ("mistyrose", 0xffe4e1),
        ("moccasin", 0xffe4b5),
        ("navajowhite", 0xffdead),
        ("navy", 0x000080),
        ("oldlace", 0xfdf5e6),
        ("olive", 0x808000),
        ("olivedrab", 0x6b8e23),
        ("orange", 0xffa500),
        ("orangered", 0xff4500),
        ("orchid", 0xda70d6),
        ("palegoldenrod", 0xeee8aa),
        ("palegreen", 0x98fb98),
        ("paleturquoise", 0xafeeee),
        ("palevioletred", 0xd87093),
        ("papayawhip", 0xffefd5),
        ("peachpuff", 0xffdab9),
        ("peru", 0xcd853f),
        ("pink", 0xffc0cb),
        ("plum", 0xdda0dd),
        ("powderblue", 0xb0e0e6),
        ("purple", 0x800080),
        ("rebeccapurple", 0x663399),
        ("red", 0xff0000),
        ("rosybrown", 0xbc8f8f),
        ("royalblue", 0x4169e1),
        ("saddlebrown", 0x8b4513),
        ("salmon", 0xfa8072),
        ("sandybrown", 0xf4a460),
        ("seagreen", 0x2e8b57),
        ("seashell", 0xfff5ee),
        ("sienna", 0xa0522d),
        ("silver", 0xc0c0c0),
        ("skyblue", 0x87ceeb),
        ("slateblue", 0x6a5acd),
        ("slategray", 0x708090),
        ("slategrey", 0x708090),
        ("snow", 0xfffafa),
        ("springgreen", 0x00ff7f),
        ("steelblue", 0x4682b4),
        ("tan", 0xd2b48c),
        ("teal", 0x008080),
        ("thistle", 0xd8bfd8),
        ("tomato", 0xff6347),
        ("turquoise", 0x40e0d0),
        ("violet", 0xee82ee),
        ("wheat", 0xf5deb3),
        ("white", 0xffffff),
        ("whitesmoke", 0xf5f5f5),
        ("yellow", 0xffff00),
        ("yellowgreen", 0x9acd32),
    ]
    .into_iter()
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_literals_expand_short_form() {
        assert_eq!(parse_color("#fc0", false), Some(Rgba::rgb(255.0, 204.0, 0.0)));
        assert_eq!(parse_color("#336699", false).unwrap().to_hex(), "#336699");
    }

    #[test]
    fn keywords_and_functional_notation() {
        assert_eq!(parse_color("red", false).unwrap().to_css(), "#ff0000");
        assert_eq!(parse_color("transparent", false).unwrap().to_css(), "transparent");
        assert_eq!(
            parse_color("rgba(1, 2, 3, 0.5)", false).unwrap().to_css(),
            "rgba(1, 2, 3, 0.5)"
        );
        assert!(parse_color("foo", false).is_none());
        assert_eq!(parse_color("foo", true), Some(Rgba::black()));
    }

    #[test]
    fn output_clamps_out_of_range_channels() {
        assert_eq!(Rgba::rgb(300.0, -20.0, 17.0).to_css(), "#ff0011");
    }

    #[test]
    fn decimal_packing_round_trips() {
        let color = Rgba::rgb(0x12 as f64, 0x34 as f64, 0x56 as f64);
        assert_eq!(color.to_decimal(), 0x123456);
        assert_eq!(Rgba::from_decimal(0x123456), color);
        assert_eq!(Rgba::from_decimal(-5), Rgba::black());
    }

    #[test]
    fn lighten_and_darken_use_hsl() {
        let brand = parse_color("#336699", false).unwrap();
        assert_eq!(lighten(brand, 0.2).to_css(), "#6699cc");
        assert_eq!(darken(Rgba::gray(255.0), 0.2).to_css(), "#cccccc");
    }

    #[test]
    fn overlay_blend_matches_reference() {
        let backdrop = Rgba::new(255.0, 255.0, 255.0, 0.05);
        let source = parse_color("#2c2c2c", false).unwrap();
        assert_eq!(backdrop.blend(&source, BlendMode::Overlay).to_css(), "#373737");
    }
}
