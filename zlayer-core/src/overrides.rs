//! 按视口覆盖图层属性。
//!
//! `LayerOverrides` 只在内存中暂存覆盖值，未覆盖的属性回落到图层自身的取值。
//! 只有 `commit` 会写回文档；未提交就丢弃的修改不会留下任何痕迹，也不会有任何提示。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::{self, RawColor, Rgb};
use crate::document::{Dictionary, Document, DxfObject, DxfVersion, Tag, XRecord};
use crate::handle::Handle;
use crate::layer::{self, AttributeError, Layer, LayerAttributes};

const COLOR_OVR: &str = "ADSK_XREC_LAYER_COLOR_OVR";
const ALPHA_OVR: &str = "ADSK_XREC_LAYER_ALPHA_OVR";
const LINETYPE_OVR: &str = "ADSK_XREC_LAYER_LINETYPE_OVR";
const LINEWEIGHT_OVR: &str = "ADSK_XREC_LAYER_LINEWT_OVR";

const VIEWPORT_CODE: i32 = 335;
const COLOR_CODE: i32 = 420;
const ALPHA_CODE: i32 = 440;
const LINETYPE_CODE: i32 = 343;
const LINEWEIGHT_CODE: i32 = 91;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OverrideError {
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error("图层 {0} 不存在")]
    LayerNotFound(String),
    #[error("句柄为 {0} 的图层不存在")]
    LayerHandleNotFound(Handle),
    #[error("视口 {0} 不存在")]
    ViewportNotFound(Handle),
    #[error("线型 {0} 未定义")]
    UnknownLinetype(String),
    #[error("{version} 不支持 XRECORD，无法保存视口覆盖")]
    UnsupportedVersion { version: DxfVersion },
    #[error("覆盖记录 {entry} 格式错误：{message}")]
    Malformed { entry: &'static str, message: String },
}

impl OverrideError {
    fn malformed(entry: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            entry,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideAttribute {
    Color,
    Rgb,
    Linetype,
    Lineweight,
    Transparency,
}

impl OverrideAttribute {
    pub const ALL: [OverrideAttribute; 5] = [
        OverrideAttribute::Color,
        OverrideAttribute::Rgb,
        OverrideAttribute::Linetype,
        OverrideAttribute::Lineweight,
        OverrideAttribute::Transparency,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OverrideAttribute::Color => "color",
            OverrideAttribute::Rgb => "rgb",
            OverrideAttribute::Linetype => "linetype",
            OverrideAttribute::Lineweight => "lineweight",
            OverrideAttribute::Transparency => "transparency",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// 单个 (图层, 视口) 的稀疏覆盖集合，`Some` 即表示该属性被覆盖。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineweight: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparency: Option<f64>,
}

impl OverrideSet {
    pub fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.rgb.is_none()
            && self.linetype.is_none()
            && self.lineweight.is_none()
            && self.transparency.is_none()
    }

    pub fn contains(&self, attribute: OverrideAttribute) -> bool {
        match attribute {
            OverrideAttribute::Color => self.color.is_some(),
            OverrideAttribute::Rgb => self.rgb.is_some(),
            OverrideAttribute::Linetype => self.linetype.is_some(),
            OverrideAttribute::Lineweight => self.lineweight.is_some(),
            OverrideAttribute::Transparency => self.transparency.is_some(),
        }
    }

    fn clear(&mut self, attribute: OverrideAttribute) {
        match attribute {
            OverrideAttribute::Color => self.color = None,
            OverrideAttribute::Rgb => self.rgb = None,
            OverrideAttribute::Linetype => self.linetype = None,
            OverrideAttribute::Lineweight => self.lineweight = None,
            OverrideAttribute::Transparency => self.transparency = None,
        }
    }

    /// 以图层基础值补全未覆盖的属性。
    pub fn resolve(&self, base: &LayerAttributes) -> LayerAttributes {
        LayerAttributes {
            color: self.color.unwrap_or(base.color),
            rgb: self.rgb.or(base.rgb),
            linetype: self
                .linetype
                .clone()
                .unwrap_or_else(|| base.linetype.clone()),
            lineweight: self.lineweight.unwrap_or(base.lineweight),
            transparency: self.transparency.unwrap_or(base.transparency),
        }
    }
}

/// 覆盖数据的持久化接口。
pub trait OverrideStorage {
    fn load_overrides(&self, layer: Handle, viewport: Handle) -> Result<OverrideSet, OverrideError>;

    fn store_overrides(
        &mut self,
        layer: Handle,
        viewport: Handle,
        overrides: &OverrideSet,
    ) -> Result<(), OverrideError>;
}

/// 一个 (图层, 视口) 对的覆盖暂存区。
///
/// 图层基础值与线型表在加载时做快照；`refresh_base` 可按当前文档重新同步。
#[derive(Debug, Clone)]
pub struct LayerOverrides {
    layer: Handle,
    viewport: Handle,
    base: LayerAttributes,
    /// 小写名称到文档中规范写法的映射。
    linetypes: BTreeMap<String, String>,
    supports_true_color: bool,
    staged: OverrideSet,
    persisted: OverrideSet,
}

impl LayerOverrides {
    fn from_document(document: &Document, layer: &Layer, viewport: Handle, persisted: OverrideSet) -> Self {
        Self {
            layer: layer.handle(),
            viewport,
            base: layer.attributes(),
            linetypes: linetype_index(document),
            supports_true_color: document.version().supports_true_color(),
            staged: persisted.clone(),
            persisted,
        }
    }

    #[inline]
    pub fn layer(&self) -> Handle {
        self.layer
    }

    #[inline]
    pub fn viewport(&self) -> Handle {
        self.viewport
    }

    /// 当前暂存的覆盖集合。
    #[inline]
    pub fn overrides(&self) -> &OverrideSet {
        &self.staged
    }

    pub fn has_overrides(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn is_overridden(&self, attribute: OverrideAttribute) -> bool {
        self.staged.contains(attribute)
    }

    /// 内存状态与最近一次加载/提交的状态不同。
    pub fn is_dirty(&self) -> bool {
        self.staged != self.persisted
    }

    pub fn get_color(&self) -> i16 {
        self.staged.color.unwrap_or(self.base.color)
    }

    pub fn get_rgb(&self) -> Option<Rgb> {
        self.staged.rgb.or(self.base.rgb)
    }

    pub fn get_linetype(&self) -> &str {
        self.staged
            .linetype
            .as_deref()
            .unwrap_or(&self.base.linetype)
    }

    pub fn get_lineweight(&self) -> i16 {
        self.staged.lineweight.unwrap_or(self.base.lineweight)
    }

    pub fn get_transparency(&self) -> f64 {
        self.staged.transparency.unwrap_or(self.base.transparency)
    }

    pub fn resolved(&self) -> LayerAttributes {
        self.staged.resolve(&self.base)
    }

    pub fn set_color(&mut self, aci: i16) -> Result<(), AttributeError> {
        self.staged.color = Some(layer::validate_color(aci)?);
        Ok(())
    }

    pub fn set_rgb(&mut self, rgb: Rgb) -> Result<(), AttributeError> {
        if !self.supports_true_color {
            return Err(AttributeError::InvalidAttributeValue {
                attribute: "rgb",
                value: rgb.to_string(),
                reason: "当前 DXF 版本不支持真彩色",
            });
        }
        self.staged.rgb = Some(rgb);
        Ok(())
    }

    /// 线型名称大小写不敏感，保存为线型表中的规范写法。
    pub fn set_linetype(&mut self, name: &str) -> Result<(), AttributeError> {
        let canonical = self
            .linetypes
            .get(&name.to_lowercase())
            .ok_or_else(|| AttributeError::InvalidAttributeValue {
                attribute: "linetype",
                value: name.to_string(),
                reason: "线型未在文档中定义",
            })?;
        self.staged.linetype = Some(canonical.clone());
        Ok(())
    }

    pub fn set_lineweight(&mut self, lineweight: i16) -> Result<(), AttributeError> {
        self.staged.lineweight = Some(layer::validate_lineweight(lineweight)?);
        Ok(())
    }

    pub fn set_transparency(&mut self, value: f64) -> Result<(), AttributeError> {
        self.staged.transparency = Some(layer::validate_transparency(value)?);
        Ok(())
    }

    pub fn discard(&mut self, attribute: OverrideAttribute) {
        self.staged.clear(attribute);
    }

    pub fn discard_all(&mut self) {
        self.staged = OverrideSet::default();
    }

    /// 以文档当前状态刷新基础值快照与线型表。
    pub fn refresh_base(&mut self, document: &Document) -> Result<(), OverrideError> {
        let layer = document
            .layer_by_handle(self.layer)
            .ok_or(OverrideError::LayerHandleNotFound(self.layer))?;
        self.base = layer.attributes();
        self.linetypes = linetype_index(document);
        self.supports_true_color = document.version().supports_true_color();
        Ok(())
    }

    /// 将暂存状态写回存储，这是唯一具有持久效果的操作。
    pub fn commit<S: OverrideStorage + ?Sized>(&mut self, storage: &mut S) -> Result<(), OverrideError> {
        storage.store_overrides(self.layer, self.viewport, &self.staged)?;
        self.persisted = self.staged.clone();
        Ok(())
    }
}

fn linetype_index(document: &Document) -> BTreeMap<String, String> {
    document
        .linetypes()
        .map(|lt| (lt.name.to_lowercase(), lt.name.clone()))
        .collect()
}

impl Document {
    /// 加载指定图层在指定视口下的覆盖暂存区。
    pub fn vp_overrides(&self, layer: &str, viewport: Handle) -> Result<LayerOverrides, OverrideError> {
        let layer = self
            .layer(layer)
            .ok_or_else(|| OverrideError::LayerNotFound(layer.to_string()))?;
        if self.viewport(viewport).is_none() {
            return Err(OverrideError::ViewportNotFound(viewport));
        }
        let persisted = self.load_overrides(layer.handle(), viewport)?;
        Ok(LayerOverrides::from_document(self, layer, viewport, persisted))
    }

    /// 列出图层上存在覆盖记录的视口句柄。
    pub fn overridden_viewports(&self, layer: &str) -> Result<Vec<Handle>, OverrideError> {
        let layer = self
            .layer(layer)
            .ok_or_else(|| OverrideError::LayerNotFound(layer.to_string()))?;
        let mut viewports = Vec::new();
        for (entry, code) in OVERRIDE_ENTRIES {
            if let Some(xrecord) = self.override_record(layer, entry) {
                for (viewport, _) in viewport_pairs(xrecord, entry, code)? {
                    if !viewports.contains(&viewport) {
                        viewports.push(viewport);
                    }
                }
            }
        }
        viewports.sort();
        Ok(viewports)
    }

    fn override_record(&self, layer: &Layer, entry: &str) -> Option<&XRecord> {
        let dict = self.dictionary(layer.extension_dict()?)?;
        self.xrecord(*dict.entries.get(entry)?)
    }

    /// 替换某一覆盖记录中指定视口的全部值，记录为空时删除。
    fn replace_viewport_values(
        &mut self,
        layer: Handle,
        entry: &'static str,
        code: i32,
        viewport: Handle,
        values: Vec<String>,
    ) -> Result<(), OverrideError> {
        let existing = self
            .layer_by_handle(layer)
            .and_then(|layer| self.override_record(layer, entry));
        let mut pairs: Vec<(Handle, String)> = match existing {
            Some(xrecord) => viewport_pairs(xrecord, entry, code)?
                .into_iter()
                .filter(|(vp, _)| *vp != viewport)
                .map(|(vp, value)| (vp, value.to_string()))
                .collect(),
            None => Vec::new(),
        };
        pairs.extend(values.into_iter().map(|value| (viewport, value)));
        pairs.sort_by_key(|(vp, _)| *vp);

        if pairs.is_empty() {
            self.remove_override_record(layer, entry);
            return Ok(());
        }

        let tags: Vec<Tag> = pairs
            .into_iter()
            .flat_map(|(vp, value)| [Tag::new(VIEWPORT_CODE, vp), Tag::new(code, value)])
            .collect();
        let dict_handle = self
            .ensure_extension_dict(layer)
            .map_err(|_| OverrideError::LayerHandleNotFound(layer))?;
        let current = self
            .dictionary(dict_handle)
            .and_then(|dict| dict.entries.get(entry).copied());
        match current.and_then(|handle| self.xrecord_mut(handle)) {
            Some(xrecord) => xrecord.tags = tags,
            None => {
                let handle = self.handle_seed();
                self.insert_object(DxfObject::XRecord(XRecord {
                    handle,
                    owner: dict_handle,
                    tags,
                }))
                .map_err(|err| OverrideError::malformed(entry, err.to_string()))?;
                if let Some(dict) = self.dictionary_mut(dict_handle) {
                    dict.entries.insert(entry.to_string(), handle);
                }
            }
        }
        Ok(())
    }

    fn remove_override_record(&mut self, layer: Handle, entry: &str) {
        let Some(dict_handle) = self.layer_by_handle(layer).and_then(Layer::extension_dict) else {
            return;
        };
        let removed = self
            .dictionary_mut(dict_handle)
            .and_then(|dict: &mut Dictionary| dict.entries.remove(entry));
        if let Some(handle) = removed {
            self.remove_object(handle);
        }
        self.prune_extension_dict(layer);
    }
}

const OVERRIDE_ENTRIES: [(&str, i32); 4] = [
    (COLOR_OVR, COLOR_CODE),
    (ALPHA_OVR, ALPHA_CODE),
    (LINETYPE_OVR, LINETYPE_CODE),
    (LINEWEIGHT_OVR, LINEWEIGHT_CODE),
];

/// 按 `335 视口 / <code> 值` 成对解析覆盖记录。一个视口后可以跟多个值。
fn viewport_pairs<'a>(
    xrecord: &'a XRecord,
    entry: &'static str,
    code: i32,
) -> Result<Vec<(Handle, &'a str)>, OverrideError> {
    let mut current: Option<Handle> = None;
    let mut pairs = Vec::new();
    for tag in &xrecord.tags {
        if tag.code == VIEWPORT_CODE {
            let handle = Handle::parse_hex(&tag.value).ok_or_else(|| {
                OverrideError::malformed(entry, format!("视口句柄 \"{}\" 无法解析", tag.value))
            })?;
            current = Some(handle);
        } else if tag.code == code {
            let viewport = current.ok_or_else(|| {
                OverrideError::malformed(entry, format!("组码 {code} 之前缺少视口句柄"))
            })?;
            pairs.push((viewport, tag.value.as_str()));
        }
    }
    Ok(pairs)
}

fn parse_int(entry: &'static str, raw: &str) -> Result<i32, OverrideError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| OverrideError::malformed(entry, format!("整数值 \"{raw}\" 无法解析")))
}

impl OverrideStorage for Document {
    fn load_overrides(&self, layer: Handle, viewport: Handle) -> Result<OverrideSet, OverrideError> {
        let layer = self
            .layer_by_handle(layer)
            .ok_or(OverrideError::LayerHandleNotFound(layer))?;
        let mut set = OverrideSet::default();

        if let Some(xrecord) = self.override_record(layer, COLOR_OVR) {
            for (vp, value) in viewport_pairs(xrecord, COLOR_OVR, COLOR_CODE)? {
                if vp != viewport {
                    continue;
                }
                match RawColor::decode(parse_int(COLOR_OVR, value)?) {
                    Some(RawColor::Aci(aci)) => set.color = Some(aci),
                    Some(RawColor::Rgb(rgb)) => set.rgb = Some(rgb),
                    Some(RawColor::ByLayer | RawColor::ByBlock) => {}
                    None => {
                        return Err(OverrideError::malformed(
                            COLOR_OVR,
                            format!("无法识别的颜色值 {value}"),
                        ));
                    }
                }
            }
        }

        if let Some(xrecord) = self.override_record(layer, ALPHA_OVR) {
            for (vp, value) in viewport_pairs(xrecord, ALPHA_OVR, ALPHA_CODE)? {
                if vp == viewport {
                    set.transparency = Some(color::decode_transparency(parse_int(ALPHA_OVR, value)?));
                }
            }
        }

        if let Some(xrecord) = self.override_record(layer, LINETYPE_OVR) {
            for (vp, value) in viewport_pairs(xrecord, LINETYPE_OVR, LINETYPE_CODE)? {
                if vp != viewport {
                    continue;
                }
                let linetype = Handle::parse_hex(value)
                    .and_then(|handle| self.linetype_by_handle(handle))
                    .ok_or_else(|| {
                        OverrideError::malformed(LINETYPE_OVR, format!("线型句柄 {value} 无效"))
                    })?;
                set.linetype = Some(linetype.name.clone());
            }
        }

        if let Some(xrecord) = self.override_record(layer, LINEWEIGHT_OVR) {
            for (vp, value) in viewport_pairs(xrecord, LINEWEIGHT_OVR, LINEWEIGHT_CODE)? {
                if vp == viewport {
                    let raw = parse_int(LINEWEIGHT_OVR, value)?;
                    let lineweight = i16::try_from(raw).map_err(|_| {
                        OverrideError::malformed(LINEWEIGHT_OVR, format!("线宽 {raw} 超出范围"))
                    })?;
                    set.lineweight = Some(lineweight);
                }
            }
        }

        Ok(set)
    }

    fn store_overrides(
        &mut self,
        layer: Handle,
        viewport: Handle,
        overrides: &OverrideSet,
    ) -> Result<(), OverrideError> {
        if !self.version().supports_xrecords() {
            return Err(OverrideError::UnsupportedVersion {
                version: self.version(),
            });
        }
        if self.layer_by_handle(layer).is_none() {
            return Err(OverrideError::LayerHandleNotFound(layer));
        }
        if self.viewport(viewport).is_none() {
            return Err(OverrideError::ViewportNotFound(viewport));
        }
        // 先完成全部校验与编码，再修改文档
        let linetype = match overrides.linetype.as_deref() {
            Some(name) => Some(
                self.linetype(name)
                    .map(|lt| lt.handle)
                    .ok_or_else(|| OverrideError::UnknownLinetype(name.to_string()))?,
            ),
            None => None,
        };

        let mut colors = Vec::new();
        if let Some(aci) = overrides.color {
            colors.push(RawColor::Aci(aci).encode().to_string());
        }
        if let Some(rgb) = overrides.rgb {
            colors.push(RawColor::Rgb(rgb).encode().to_string());
        }
        let alpha: Vec<String> = overrides
            .transparency
            .map(|value| color::encode_transparency(value).to_string())
            .into_iter()
            .collect();
        let linetypes: Vec<String> = linetype.map(|handle| handle.to_string()).into_iter().collect();
        let lineweights: Vec<String> = overrides
            .lineweight
            .map(|lw| lw.to_string())
            .into_iter()
            .collect();

        self.replace_viewport_values(layer, COLOR_OVR, COLOR_CODE, viewport, colors)?;
        self.replace_viewport_values(layer, ALPHA_OVR, ALPHA_CODE, viewport, alpha)?;
        self.replace_viewport_values(layer, LINETYPE_OVR, LINETYPE_CODE, viewport, linetypes)?;
        self.replace_viewport_values(layer, LINEWEIGHT_OVR, LINEWEIGHT_CODE, viewport, lineweights)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2;
    use crate::layer::LINEWEIGHT_DEFAULT;

    struct Fixture {
        doc: Document,
        vp: Handle,
        other_vp: Handle,
    }

    /// 图层 L：颜色 7，线宽 DEFAULT；两个视口均无覆盖。
    fn fixture() -> Fixture {
        let mut doc = Document::new(DxfVersion::R2018);
        doc.add_layer("L").unwrap();
        doc.add_linetype("DASHED", "__ __").unwrap();
        let vp = doc.add_viewport(Point2::new(0.0, 0.0), 100.0, 50.0).unwrap();
        let other_vp = doc.add_viewport(Point2::new(200.0, 0.0), 100.0, 50.0).unwrap();
        Fixture { doc, vp, other_vp }
    }

    #[test]
    fn fresh_store_resolves_to_layer_values() {
        let Fixture { doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        assert!(!ovr.has_overrides());
        assert!(!ovr.is_dirty());
        assert_eq!(ovr.get_color(), 7);
        assert_eq!(ovr.get_rgb(), None);
        assert_eq!(ovr.get_linetype(), "Continuous");
        assert_eq!(ovr.get_lineweight(), LINEWEIGHT_DEFAULT);
        assert_eq!(ovr.get_transparency(), 0.0);

        ovr.set_color(1).unwrap();
        assert!(ovr.has_overrides());
        assert_eq!(ovr.get_color(), 1);
        assert_eq!(ovr.get_lineweight(), LINEWEIGHT_DEFAULT);
        assert!(ovr.is_dirty());
    }

    #[test]
    fn every_setter_populates_its_slot() {
        let Fixture { doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_rgb(Rgb::new(10, 20, 30)).unwrap();
        ovr.set_linetype("dashed").unwrap();
        ovr.set_lineweight(13).unwrap();
        ovr.set_transparency(0.25).unwrap();

        assert_eq!(ovr.get_rgb(), Some(Rgb::new(10, 20, 30)));
        assert_eq!(ovr.get_linetype(), "DASHED");
        assert_eq!(ovr.get_lineweight(), 13);
        assert_eq!(ovr.get_transparency(), 0.25);
        assert!(!ovr.is_overridden(OverrideAttribute::Color));
        for attr in [
            OverrideAttribute::Rgb,
            OverrideAttribute::Linetype,
            OverrideAttribute::Lineweight,
            OverrideAttribute::Transparency,
        ] {
            assert!(ovr.is_overridden(attr), "{} should be overridden", attr.name());
        }
    }

    #[test]
    fn invalid_values_are_rejected_without_changes() {
        let Fixture { doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_lineweight(50).unwrap();

        let err = ovr.set_lineweight(5).unwrap_err();
        assert!(matches!(err, AttributeError::InvalidAttributeValue { attribute: "lineweight", .. }));
        assert_eq!(ovr.get_lineweight(), 50);

        assert!(ovr.set_transparency(1.5).is_err());
        assert!(!ovr.is_overridden(OverrideAttribute::Transparency));
        assert!(ovr.set_color(0).is_err());
        assert!(ovr.set_color(-3).is_err());
        assert!(ovr.set_linetype("MISSING").is_err());
        assert_eq!(ovr.get_color(), 7);
        assert_eq!(ovr.get_linetype(), "Continuous");
        assert_eq!(ovr.overrides(), &OverrideSet { lineweight: Some(50), ..OverrideSet::default() });
    }

    #[test]
    fn rgb_requires_true_color_capable_version() {
        let mut doc = Document::new(DxfVersion::R2000);
        doc.add_layer("L").unwrap();
        let vp = doc.add_viewport(Point2::new(0.0, 0.0), 1.0, 1.0).unwrap();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        assert!(ovr.set_rgb(Rgb::new(1, 2, 3)).is_err());
        assert!(!ovr.has_overrides());
    }

    #[test]
    fn discard_reverts_to_layer_value() {
        let Fixture { doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_color(3).unwrap();
        ovr.set_lineweight(30).unwrap();

        ovr.discard(OverrideAttribute::Color);
        assert_eq!(ovr.get_color(), 7);
        assert_eq!(ovr.get_lineweight(), 30);

        ovr.discard_all();
        assert!(!ovr.has_overrides());
        assert_eq!(ovr.get_lineweight(), LINEWEIGHT_DEFAULT);
    }

    #[test]
    fn uncommitted_changes_are_lost() {
        let Fixture { doc, vp, .. } = fixture();
        {
            let mut ovr = doc.vp_overrides("L", vp).unwrap();
            ovr.set_color(2).unwrap();
            // 未调用 commit 即被丢弃
        }
        let reloaded = doc.vp_overrides("L", vp).unwrap();
        assert!(!reloaded.has_overrides());
        assert!(doc.layer("L").unwrap().extension_dict().is_none());
    }

    #[test]
    fn commit_round_trips_through_document() {
        let Fixture { mut doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_color(1).unwrap();
        ovr.set_rgb(Rgb::new(255, 0, 128)).unwrap();
        ovr.set_linetype("DASHED").unwrap();
        ovr.set_lineweight(200).unwrap();
        ovr.set_transparency(0.0).unwrap();
        ovr.commit(&mut doc).unwrap();
        assert!(!ovr.is_dirty());

        let reloaded = doc.vp_overrides("L", vp).unwrap();
        assert_eq!(reloaded.overrides(), ovr.overrides());
        assert!(!reloaded.is_dirty());
        // 图层自身不受影响
        assert_eq!(doc.layer("L").unwrap().color(), 7);
        assert_eq!(doc.overridden_viewports("L").unwrap(), vec![vp]);
    }

    #[test]
    fn transparency_round_trip_is_quantised_to_alpha_byte() {
        let Fixture { mut doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_transparency(0.25).unwrap();
        assert_eq!(ovr.get_transparency(), 0.25);
        ovr.commit(&mut doc).unwrap();

        let reloaded = doc.vp_overrides("L", vp).unwrap();
        assert!((reloaded.get_transparency() - 0.25).abs() <= 0.5 / 255.0);
    }

    #[test]
    fn commit_is_idempotent() {
        let Fixture { mut doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_color(4).unwrap();
        ovr.set_lineweight(35).unwrap();
        ovr.commit(&mut doc).unwrap();
        let first: Vec<DxfObject> = doc.objects().cloned().collect();
        let seed = doc.handle_seed();

        ovr.commit(&mut doc).unwrap();
        let second: Vec<DxfObject> = doc.objects().cloned().collect();
        assert_eq!(first, second);
        assert_eq!(doc.handle_seed(), seed);
    }

    #[test]
    fn viewports_are_independent() {
        let Fixture { mut doc, vp, other_vp } = fixture();
        let mut first = doc.vp_overrides("L", vp).unwrap();
        first.set_color(1).unwrap();
        first.commit(&mut doc).unwrap();

        let mut second = doc.vp_overrides("L", other_vp).unwrap();
        assert!(!second.has_overrides());
        second.set_color(2).unwrap();
        second.set_lineweight(18).unwrap();
        second.commit(&mut doc).unwrap();

        let first = doc.vp_overrides("L", vp).unwrap();
        assert_eq!(first.get_color(), 1);
        assert_eq!(first.get_lineweight(), LINEWEIGHT_DEFAULT);
        let second = doc.vp_overrides("L", other_vp).unwrap();
        assert_eq!(second.get_color(), 2);
        assert_eq!(second.get_lineweight(), 18);
        assert_eq!(doc.overridden_viewports("L").unwrap(), vec![vp, other_vp]);
    }

    #[test]
    fn committing_empty_state_removes_records() {
        let Fixture { mut doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_color(1).unwrap();
        ovr.set_transparency(0.5).unwrap();
        ovr.commit(&mut doc).unwrap();
        assert!(doc.layer("L").unwrap().extension_dict().is_some());

        ovr.discard_all();
        assert!(ovr.is_dirty());
        ovr.commit(&mut doc).unwrap();
        assert!(doc.layer("L").unwrap().extension_dict().is_none());
        assert_eq!(doc.objects().count(), 0);
    }

    #[test]
    fn commit_fails_after_layer_removed() {
        let Fixture { mut doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_color(1).unwrap();
        let removed = doc.remove_layer("L").unwrap();
        assert_eq!(
            ovr.commit(&mut doc),
            Err(OverrideError::LayerHandleNotFound(removed.handle()))
        );
        assert!(ovr.is_dirty());
    }

    #[test]
    fn r12_documents_cannot_store_overrides() {
        let mut doc = Document::new(DxfVersion::R12);
        doc.add_layer("L").unwrap();
        let vp = doc.add_viewport(Point2::new(0.0, 0.0), 1.0, 1.0).unwrap();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        ovr.set_color(1).unwrap();
        assert_eq!(
            ovr.commit(&mut doc),
            Err(OverrideError::UnsupportedVersion {
                version: DxfVersion::R12
            })
        );
    }

    #[test]
    fn refresh_base_follows_layer_changes() {
        let Fixture { mut doc, vp, .. } = fixture();
        let mut ovr = doc.vp_overrides("L", vp).unwrap();
        doc.layer_mut("L").unwrap().set_color(5).unwrap();
        assert_eq!(ovr.get_color(), 7);
        ovr.refresh_base(&doc).unwrap();
        assert_eq!(ovr.get_color(), 5);
    }

    #[test]
    fn malformed_records_are_reported() {
        let Fixture { mut doc, vp, .. } = fixture();
        let layer = doc.layer("L").unwrap().handle();
        let dict = doc.ensure_extension_dict(layer).unwrap();
        let handle = doc.handle_seed();
        doc.insert_object(DxfObject::XRecord(XRecord {
            handle,
            owner: dict,
            tags: vec![Tag::new(LINEWEIGHT_CODE, 25)],
        }))
        .unwrap();
        doc.dictionary_mut(dict)
            .unwrap()
            .entries
            .insert(LINEWEIGHT_OVR.to_string(), handle);

        assert!(matches!(
            doc.vp_overrides("L", vp),
            Err(OverrideError::Malformed { entry: LINEWEIGHT_OVR, .. })
        ));
    }

    #[test]
    fn unknown_layer_or_viewport_is_an_error() {
        let Fixture { doc, vp, .. } = fixture();
        assert!(matches!(
            doc.vp_overrides("NOPE", vp),
            Err(OverrideError::LayerNotFound(_))
        ));
        assert!(matches!(
            doc.vp_overrides("L", Handle::new(0xFFFF)),
            Err(OverrideError::ViewportNotFound(_))
        ));
    }

    #[test]
    fn override_set_serializes_only_populated_slots() {
        let set = OverrideSet {
            color: Some(1),
            lineweight: Some(50),
            ..OverrideSet::default()
        };
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"color":1,"lineweight":50}"#);
        let back: OverrideSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
