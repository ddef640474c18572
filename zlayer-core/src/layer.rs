use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::{self, Rgb};
use crate::handle::Handle;

pub const LINEWEIGHT_BYBLOCK: i16 = -1;
pub const LINEWEIGHT_BYLAYER: i16 = -2;
pub const LINEWEIGHT_DEFAULT: i16 = -3;
pub const MIN_LINEWEIGHT: i16 = 13;
pub const MAX_LINEWEIGHT: i16 = 200;

pub const DEFAULT_LINETYPE: &str = "Continuous";
pub const DEFAULT_LAYER_COLOR: i16 = 7;

const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', '/', '\\', '"', ':', ';', '?', '*', '|', '=', '`'];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("属性 {attribute} 的取值 {value} 无效：{reason}")]
    InvalidAttributeValue {
        attribute: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl AttributeError {
    fn invalid(attribute: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Self::InvalidAttributeValue {
            attribute,
            value: value.to_string(),
            reason,
        }
    }
}

/// 表名称（图层、线型）的合法性检查：非空、无首尾空白、不含保留字符。
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.trim() == name && !name.contains(FORBIDDEN_NAME_CHARS)
}

pub fn validate_color(aci: i16) -> Result<i16, AttributeError> {
    if color::is_concrete_aci(aci) {
        Ok(aci)
    } else {
        Err(AttributeError::invalid("color", aci, "ACI 颜色必须位于 1..=255"))
    }
}

pub fn validate_lineweight(lineweight: i16) -> Result<i16, AttributeError> {
    if lineweight == LINEWEIGHT_DEFAULT || (MIN_LINEWEIGHT..=MAX_LINEWEIGHT).contains(&lineweight)
    {
        Ok(lineweight)
    } else {
        Err(AttributeError::invalid(
            "lineweight",
            lineweight,
            "线宽必须为 DEFAULT(-3) 或位于 13..=200",
        ))
    }
}

pub fn validate_transparency(value: f64) -> Result<f64, AttributeError> {
    if color::is_valid_transparency(value) {
        Ok(value)
    } else {
        Err(AttributeError::invalid(
            "transparency",
            value,
            "透明度必须位于 0.0..=1.0",
        ))
    }
}

/// 图层状态标记（DXF 组码 70）。每个访问器只读写一个位。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerFlags(i16);

impl LayerFlags {
    const FROZEN: i16 = 0b0000_0001;
    const FROZEN_IN_NEW_VIEWPORTS: i16 = 0b0000_0010;
    const LOCKED: i16 = 0b0000_0100;
    const XREF_DEPENDENT: i16 = 0b0001_0000;
    const XREF_RESOLVED: i16 = 0b0010_0000;
    const REFERENCED: i16 = 0b0100_0000;

    #[inline]
    pub fn from_bits(bits: i16) -> Self {
        Self(bits)
    }

    /// 原始整数，仅用于持久化。
    #[inline]
    pub fn bits(self) -> i16 {
        self.0
    }

    #[inline]
    fn get(self, mask: i16) -> bool {
        self.0 & mask != 0
    }

    #[inline]
    fn set(&mut self, mask: i16, state: bool) {
        if state {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    pub fn is_frozen(self) -> bool {
        self.get(Self::FROZEN)
    }

    pub fn set_frozen(&mut self, state: bool) {
        self.set(Self::FROZEN, state);
    }

    pub fn is_frozen_in_new_viewports(self) -> bool {
        self.get(Self::FROZEN_IN_NEW_VIEWPORTS)
    }

    pub fn set_frozen_in_new_viewports(&mut self, state: bool) {
        self.set(Self::FROZEN_IN_NEW_VIEWPORTS, state);
    }

    pub fn is_locked(self) -> bool {
        self.get(Self::LOCKED)
    }

    pub fn set_locked(&mut self, state: bool) {
        self.set(Self::LOCKED, state);
    }

    pub fn is_xref_dependent(self) -> bool {
        self.get(Self::XREF_DEPENDENT)
    }

    pub fn set_xref_dependent(&mut self, state: bool) {
        self.set(Self::XREF_DEPENDENT, state);
    }

    pub fn is_xref_resolved(self) -> bool {
        self.get(Self::XREF_RESOLVED)
    }

    pub fn set_xref_resolved(&mut self, state: bool) {
        self.set(Self::XREF_RESOLVED, state);
    }

    pub fn is_referenced(self) -> bool {
        self.get(Self::REFERENCED)
    }

    pub fn set_referenced(&mut self, state: bool) {
        self.set(Self::REFERENCED, state);
    }
}

/// 可被视口覆盖的五项图层属性快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerAttributes {
    pub color: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<Rgb>,
    pub linetype: String,
    pub lineweight: i16,
    pub transparency: f64,
}

/// 从文件读入的原始图层数据，不做取值范围检查。
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub handle: Handle,
    pub name: String,
    pub flags: i16,
    pub color: i16,
    pub true_color: Option<Rgb>,
    pub linetype: String,
    pub lineweight: i16,
    pub transparency: f64,
    pub plot: bool,
    pub extension_dict: Option<Handle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    handle: Handle,
    name: String,
    flags: LayerFlags,
    /// 有符号 ACI，负值表示图层关闭。
    color: i16,
    true_color: Option<Rgb>,
    linetype: String,
    lineweight: i16,
    transparency: f64,
    plot: bool,
    extension_dict: Option<Handle>,
}

impl Layer {
    pub(crate) fn new(handle: Handle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
            flags: LayerFlags::default(),
            color: DEFAULT_LAYER_COLOR,
            true_color: None,
            linetype: DEFAULT_LINETYPE.to_string(),
            lineweight: LINEWEIGHT_DEFAULT,
            transparency: 0.0,
            plot: true,
            extension_dict: None,
        }
    }

    /// 读取既有文档时保留原始值；名称合法性由 `Document::insert_layer` 检查。
    pub fn from_record(record: LayerRecord) -> Self {
        Self {
            handle: record.handle,
            name: record.name,
            flags: LayerFlags::from_bits(record.flags),
            color: record.color,
            true_color: record.true_color,
            linetype: record.linetype,
            lineweight: record.lineweight,
            transparency: record.transparency,
            plot: record.plot,
            extension_dict: record.extension_dict,
        }
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> LayerFlags {
        self.flags
    }

    pub fn is_frozen(&self) -> bool {
        self.flags.is_frozen()
    }

    pub fn freeze(&mut self) {
        self.flags.set_frozen(true);
    }

    pub fn thaw(&mut self) {
        self.flags.set_frozen(false);
    }

    pub fn is_frozen_in_new_viewports(&self) -> bool {
        self.flags.is_frozen_in_new_viewports()
    }

    pub fn set_frozen_in_new_viewports(&mut self, state: bool) {
        self.flags.set_frozen_in_new_viewports(state);
    }

    pub fn is_locked(&self) -> bool {
        self.flags.is_locked()
    }

    pub fn lock(&mut self) {
        self.flags.set_locked(true);
    }

    pub fn unlock(&mut self) {
        self.flags.set_locked(false);
    }

    pub fn is_xref_dependent(&self) -> bool {
        self.flags.is_xref_dependent()
    }

    pub fn is_xref_resolved(&self) -> bool {
        self.flags.is_xref_resolved()
    }

    pub fn is_referenced(&self) -> bool {
        self.flags.is_referenced()
    }

    pub fn set_referenced(&mut self, state: bool) {
        self.flags.set_referenced(state);
    }

    #[inline]
    pub fn is_on(&self) -> bool {
        self.color >= 0
    }

    pub fn on(&mut self) {
        self.color = self.color.saturating_abs();
    }

    pub fn off(&mut self) {
        self.color = -self.color.saturating_abs();
    }

    /// 不含开关状态的 ACI 颜色。
    #[inline]
    pub fn color(&self) -> i16 {
        self.color.saturating_abs()
    }

    /// 组码 62 中保存的有符号原始值。
    #[inline]
    pub fn raw_color(&self) -> i16 {
        self.color
    }

    /// 设置颜色，保持当前开关状态。
    pub fn set_color(&mut self, aci: i16) -> Result<(), AttributeError> {
        let aci = validate_color(aci)?;
        self.color = if self.is_on() { aci } else { -aci };
        Ok(())
    }

    #[inline]
    pub fn rgb(&self) -> Option<Rgb> {
        self.true_color
    }

    pub fn set_rgb(&mut self, rgb: Rgb) {
        self.true_color = Some(rgb);
    }

    pub fn clear_rgb(&mut self) {
        self.true_color = None;
    }

    #[inline]
    pub fn linetype(&self) -> &str {
        &self.linetype
    }

    /// 线型是否存在由 `Document::set_layer_linetype` 负责校验。
    pub(crate) fn set_linetype_unchecked(&mut self, name: impl Into<String>) {
        self.linetype = name.into();
    }

    #[inline]
    pub fn lineweight(&self) -> i16 {
        self.lineweight
    }

    pub fn set_lineweight(&mut self, lineweight: i16) -> Result<(), AttributeError> {
        self.lineweight = validate_lineweight(lineweight)?;
        Ok(())
    }

    #[inline]
    pub fn transparency(&self) -> f64 {
        self.transparency
    }

    pub fn set_transparency(&mut self, value: f64) -> Result<(), AttributeError> {
        self.transparency = validate_transparency(value)?;
        Ok(())
    }

    #[inline]
    pub fn plot(&self) -> bool {
        self.plot
    }

    pub fn set_plot(&mut self, plot: bool) {
        self.plot = plot;
    }

    #[inline]
    pub fn extension_dict(&self) -> Option<Handle> {
        self.extension_dict
    }

    pub(crate) fn set_extension_dict(&mut self, handle: Option<Handle>) {
        self.extension_dict = handle;
    }

    pub fn attributes(&self) -> LayerAttributes {
        LayerAttributes {
            color: self.color(),
            rgb: self.true_color,
            linetype: self.linetype.clone(),
            lineweight: self.lineweight,
            transparency: self.transparency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_setters_touch_a_single_bit() {
        let mut flags = LayerFlags::from_bits(0b0111_0111);
        flags.set_locked(false);
        assert_eq!(flags.bits(), 0b0111_0011);
        flags.set_frozen(false);
        assert_eq!(flags.bits(), 0b0111_0010);
        flags.set_referenced(false);
        assert_eq!(flags.bits(), 0b0011_0010);
        flags.set_frozen(true);
        assert_eq!(flags.bits(), 0b0011_0011);
        assert!(flags.is_frozen_in_new_viewports());
        assert!(flags.is_xref_dependent());
        assert!(flags.is_xref_resolved());
        assert!(!flags.is_locked());
        assert!(!flags.is_referenced());

        // 保留未命名的位（例如 8、128）
        let mut unknown = LayerFlags::from_bits(0b1000_1000);
        unknown.set_locked(true);
        unknown.set_frozen_in_new_viewports(true);
        assert_eq!(unknown.bits(), 0b1000_1110);
    }

    #[test]
    fn table_names_reject_reserved_characters() {
        assert!(is_valid_table_name("WALLS"));
        assert!(is_valid_table_name("A-Anno Text 1"));
        for bad in ["", " lead", "trail ", "a<b", "a>b", "a/b", "a\\b", "a\"b", "a:b", "a;b", "a?b", "a*b", "a|b", "a=b", "a`b"] {
            assert!(!is_valid_table_name(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn on_off_keeps_color_value() {
        let mut layer = Layer::new(Handle::new(0x10), "WALLS");
        layer.set_color(3).unwrap();
        layer.off();
        assert!(!layer.is_on());
        assert_eq!(layer.color(), 3);
        assert_eq!(layer.raw_color(), -3);

        layer.set_color(5).unwrap();
        assert!(!layer.is_on());
        assert_eq!(layer.raw_color(), -5);

        layer.on();
        assert!(layer.is_on());
        assert_eq!(layer.raw_color(), 5);
    }

    #[test]
    fn validated_setters_leave_layer_unchanged_on_error() {
        let mut layer = Layer::new(Handle::new(0x10), "WALLS");
        assert!(layer.set_color(0).is_err());
        assert!(layer.set_color(256).is_err());
        assert_eq!(layer.color(), DEFAULT_LAYER_COLOR);

        layer.set_lineweight(25).unwrap();
        let err = layer.set_lineweight(5).unwrap_err();
        assert!(matches!(
            err,
            AttributeError::InvalidAttributeValue {
                attribute: "lineweight",
                ..
            }
        ));
        assert!(layer.set_lineweight(201).is_err());
        assert!(layer.set_lineweight(LINEWEIGHT_BYLAYER).is_err());
        assert_eq!(layer.lineweight(), 25);
        layer.set_lineweight(LINEWEIGHT_DEFAULT).unwrap();
        assert_eq!(layer.lineweight(), LINEWEIGHT_DEFAULT);

        layer.set_transparency(0.5).unwrap();
        assert!(layer.set_transparency(1.5).is_err());
        assert!(layer.set_transparency(-0.1).is_err());
        assert!(layer.set_transparency(f64::NAN).is_err());
        assert_eq!(layer.transparency(), 0.5);
    }

    #[test]
    fn freeze_and_lock_are_independent() {
        let mut layer = Layer::new(Handle::new(0x10), "WALLS");
        layer.freeze();
        layer.lock();
        layer.thaw();
        assert!(!layer.is_frozen());
        assert!(layer.is_locked());
        assert_eq!(layer.flags().bits(), 4);
    }
}
