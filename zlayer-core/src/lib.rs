pub mod document;
pub mod layer;
pub mod overrides;

pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，用于视口中心等图纸空间坐标。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl Default for Point2 {
        fn default() -> Self {
            Self(DVec2::ZERO)
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }
}

pub mod handle {
    use std::fmt;

    use serde::{Deserialize, Serialize};

    /// DXF 对象句柄。文件中以大写十六进制书写，`0` 表示空句柄。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Handle(u64);

    impl Handle {
        pub const NULL: Handle = Handle(0);

        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }

        #[inline]
        pub fn is_null(self) -> bool {
            self.0 == 0
        }

        /// 解析十六进制句柄文本，空串或非法字符返回 None。
        pub fn parse_hex(raw: &str) -> Option<Self> {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            u64::from_str_radix(trimmed, 16).ok().map(Self)
        }
    }

    impl fmt::Display for Handle {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:X}", self.0)
        }
    }
}

pub mod color {
    use std::fmt;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};

    pub const ACI_BYBLOCK: i16 = 0;
    pub const ACI_BYLAYER: i16 = 256;

    const RAW_BYLAYER: u32 = 0xC000_0000;
    const RAW_BYBLOCK: u32 = 0xC100_0000;
    const RAW_RGB: u32 = 0xC200_0000;
    const RAW_ACI: u32 = 0xC300_0000;
    const RAW_TYPE_MASK: u32 = 0xFF00_0000;

    const TRANSPARENCY_BY_VALUE: u32 = 0x0200_0000;

    /// 判断是否为可直接使用的 ACI 颜色（1..=255）。
    #[inline]
    pub fn is_concrete_aci(aci: i16) -> bool {
        (1..=255).contains(&aci)
    }

    /// 24 位真彩色，对应 DXF 组码 420。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Rgb {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Rgb {
        #[inline]
        pub fn new(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b }
        }

        /// 从 `0xRRGGBB` 整数构造，高位字节被忽略。
        pub fn from_int(value: i32) -> Self {
            let value = value as u32;
            Self {
                r: ((value >> 16) & 0xFF) as u8,
                g: ((value >> 8) & 0xFF) as u8,
                b: (value & 0xFF) as u8,
            }
        }

        pub fn to_int(self) -> i32 {
            ((self.r as i32) << 16) | ((self.g as i32) << 8) | self.b as i32
        }
    }

    impl fmt::Display for Rgb {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParseRgbError(pub String);

    impl fmt::Display for ParseRgbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "无法解析 RGB 颜色 \"{}\"（期望 #RRGGBB 或 r,g,b）", self.0)
        }
    }

    impl std::error::Error for ParseRgbError {}

    impl FromStr for Rgb {
        type Err = ParseRgbError;

        /// 接受 `#RRGGBB` 或 `r,g,b` 两种写法。
        fn from_str(raw: &str) -> Result<Self, Self::Err> {
            let trimmed = raw.trim();
            let err = || ParseRgbError(raw.to_string());
            if let Some(hex) = trimmed.strip_prefix('#') {
                if hex.len() != 6 {
                    return Err(err());
                }
                let value = u32::from_str_radix(hex, 16).map_err(|_| err())?;
                return Ok(Self::from_int(value as i32));
            }
            let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(err());
            }
            let mut channels = [0u8; 3];
            for (slot, part) in channels.iter_mut().zip(parts) {
                *slot = part.parse::<u8>().map_err(|_| err())?;
            }
            Ok(Self::new(channels[0], channels[1], channels[2]))
        }
    }

    /// 覆盖记录中使用的 32 位原始颜色值：高字节为类型标记，低 24 位为数据。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RawColor {
        ByLayer,
        ByBlock,
        Aci(i16),
        Rgb(Rgb),
    }

    impl RawColor {
        /// 编码为 DXF 中书写的有符号 32 位整数。
        pub fn encode(self) -> i32 {
            let raw = match self {
                RawColor::ByLayer => RAW_BYLAYER,
                RawColor::ByBlock => RAW_BYBLOCK,
                RawColor::Aci(aci) => RAW_ACI | (aci as u32 & 0xFF),
                RawColor::Rgb(rgb) => RAW_RGB | (rgb.to_int() as u32),
            };
            raw as i32
        }

        pub fn decode(value: i32) -> Option<Self> {
            let raw = value as u32;
            match raw & RAW_TYPE_MASK {
                RAW_BYLAYER => Some(RawColor::ByLayer),
                RAW_BYBLOCK => Some(RawColor::ByBlock),
                RAW_RGB => Some(RawColor::Rgb(Rgb::from_int((raw & 0x00FF_FFFF) as i32))),
                RAW_ACI => Some(RawColor::Aci((raw & 0xFF) as i16)),
                _ => None,
            }
        }
    }

    #[inline]
    pub fn is_valid_transparency(value: f64) -> bool {
        value.is_finite() && (0.0..=1.0).contains(&value)
    }

    /// 透明度（0 为不透明）编码为 DXF 原始值 `0x02000000 | alpha`。
    pub fn encode_transparency(value: f64) -> i32 {
        let clamped = value.clamp(0.0, 1.0);
        let alpha = ((1.0 - clamped) * 255.0).round() as u32;
        (TRANSPARENCY_BY_VALUE | (alpha & 0xFF)) as i32
    }

    /// 未带 `0x02000000` 标记的原始值（BYLAYER/BYBLOCK）按不透明处理。
    pub fn decode_transparency(raw: i32) -> f64 {
        let raw = raw as u32;
        if raw & TRANSPARENCY_BY_VALUE == 0 {
            return 0.0;
        }
        1.0 - f64::from(raw & 0xFF) / 255.0
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn rgb_int_conversion_keeps_channels() {
            let rgb = Rgb::new(0x12, 0xAB, 0x7F);
            assert_eq!(rgb.to_int(), 0x12AB7F);
            assert_eq!(Rgb::from_int(0x12AB7F), rgb);
            assert_eq!(rgb.to_string(), "#12AB7F");
        }

        #[test]
        fn rgb_parses_hex_and_triplets() {
            assert_eq!("#FF8000".parse::<Rgb>().unwrap(), Rgb::new(255, 128, 0));
            assert_eq!("10, 20,30".parse::<Rgb>().unwrap(), Rgb::new(10, 20, 30));
            assert!("#FFF".parse::<Rgb>().is_err());
            assert!("1,2".parse::<Rgb>().is_err());
            assert!("1,2,300".parse::<Rgb>().is_err());
        }

        #[test]
        fn raw_color_distinguishes_aci_and_true_color() {
            let aci = RawColor::Aci(7).encode();
            let rgb = RawColor::Rgb(Rgb::new(1, 2, 3)).encode();
            assert_eq!(aci as u32, 0xC300_0007);
            assert_eq!(rgb as u32, 0xC201_0203);
            assert_eq!(RawColor::decode(aci), Some(RawColor::Aci(7)));
            assert_eq!(
                RawColor::decode(rgb),
                Some(RawColor::Rgb(Rgb::new(1, 2, 3)))
            );
            assert_eq!(RawColor::decode(RawColor::ByLayer.encode()), Some(RawColor::ByLayer));
            assert_eq!(RawColor::decode(0x0000_0007), None);
        }

        #[test]
        fn transparency_encoding_is_quantised_to_alpha_byte() {
            assert_eq!(encode_transparency(0.0) as u32, 0x0200_00FF);
            assert_eq!(encode_transparency(1.0) as u32, 0x0200_0000);
            // 0.3 -> 178.5，四舍五入为 179
            assert_eq!(encode_transparency(0.3) as u32, 0x0200_00B3);
            assert_eq!(encode_transparency(0.5) as u32, 0x0200_0080);
            assert!((decode_transparency(encode_transparency(0.5)) - 0.5).abs() <= 1.0 / 255.0);
            assert_eq!(decode_transparency(0), 0.0);
        }
    }
}
