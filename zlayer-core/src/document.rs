use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point2;
use crate::handle::Handle;
use crate::layer::{Layer, is_valid_table_name};

/// 新建文档时的首个可分配句柄，低位留给表头等保留对象。
const FIRST_HANDLE: u64 = 0x20;

const PROTECTED_LAYERS: [&str; 2] = ["0", "defpoints"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("名称 \"{0}\" 不合法")]
    InvalidName(String),
    #[error("图层 {0} 已存在")]
    DuplicateLayer(String),
    #[error("图层 {0} 不存在")]
    LayerNotFound(String),
    #[error("图层 {0} 受保护，无法删除")]
    ProtectedLayer(String),
    #[error("线型 {0} 已存在")]
    DuplicateLinetype(String),
    #[error("线型 {0} 不存在")]
    LinetypeNotFound(String),
    #[error("视口 {0} 不存在")]
    ViewportNotFound(Handle),
    #[error("句柄 {0} 已被占用")]
    DuplicateHandle(Handle),
    #[error("未知的 DXF 版本 \"{0}\"")]
    UnknownVersion(String),
    #[error("句柄 {0} 已达上限，无法继续分配")]
    HandleExhausted(Handle),
}

/// 支持的 DXF 版本，对应 `$ACADVER` 的 `AC10xx` 取值。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DxfVersion {
    R12,
    R2000,
    R2004,
    R2007,
    R2010,
    R2013,
    #[default]
    R2018,
}

impl DxfVersion {
    const ALL: [DxfVersion; 7] = [
        DxfVersion::R12,
        DxfVersion::R2000,
        DxfVersion::R2004,
        DxfVersion::R2007,
        DxfVersion::R2010,
        DxfVersion::R2013,
        DxfVersion::R2018,
    ];

    pub fn acadver(self) -> &'static str {
        match self {
            DxfVersion::R12 => "AC1009",
            DxfVersion::R2000 => "AC1015",
            DxfVersion::R2004 => "AC1018",
            DxfVersion::R2007 => "AC1021",
            DxfVersion::R2010 => "AC1024",
            DxfVersion::R2013 => "AC1027",
            DxfVersion::R2018 => "AC1032",
        }
    }

    pub fn from_acadver(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|version| version.acadver().eq_ignore_ascii_case(raw))
    }

    pub fn name(self) -> &'static str {
        match self {
            DxfVersion::R12 => "R12",
            DxfVersion::R2000 => "R2000",
            DxfVersion::R2004 => "R2004",
            DxfVersion::R2007 => "R2007",
            DxfVersion::R2010 => "R2010",
            DxfVersion::R2013 => "R2013",
            DxfVersion::R2018 => "R2018",
        }
    }

    /// 组码 420 真彩色自 R2004 起可用。
    #[inline]
    pub fn supports_true_color(self) -> bool {
        self >= DxfVersion::R2004
    }

    /// XRECORD 与扩展字典自 R2000（R13 起）可用。
    #[inline]
    pub fn supports_xrecords(self) -> bool {
        self >= DxfVersion::R2000
    }
}

impl fmt::Display for DxfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DxfVersion {
    type Err = DocumentError;

    /// 接受 `R2018` 风格或 `AC1032` 风格的写法。
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|version| version.name().eq_ignore_ascii_case(trimmed))
            .or_else(|| Self::from_acadver(trimmed))
            .ok_or_else(|| DocumentError::UnknownVersion(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linetype {
    pub handle: Handle,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 图纸空间视口。`frozen_layers` 保存在该视口中冻结的图层句柄（组码 331）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub handle: Handle,
    pub status: i16,
    pub center: Point2,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frozen_layers: Vec<Handle>,
}

impl Viewport {
    pub fn new(handle: Handle, center: Point2, width: f64, height: f64) -> Self {
        Self {
            handle,
            status: 1,
            center,
            width,
            height,
            frozen_layers: Vec::new(),
        }
    }

    pub fn is_layer_frozen(&self, layer: Handle) -> bool {
        self.frozen_layers.contains(&layer)
    }

    /// 返回是否发生了变化。
    pub fn freeze_layer(&mut self, layer: Handle) -> bool {
        if self.is_layer_frozen(layer) {
            return false;
        }
        self.frozen_layers.push(layer);
        true
    }

    pub fn thaw_layer(&mut self, layer: Handle) -> bool {
        let before = self.frozen_layers.len();
        self.frozen_layers.retain(|handle| *handle != layer);
        before != self.frozen_layers.len()
    }
}

/// 不透明的 DXF 组码/值对，值保持文件中的文本形式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub code: i32,
    pub value: String,
}

impl Tag {
    pub fn new(code: i32, value: impl ToString) -> Self {
        Self {
            code,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    pub handle: Handle,
    pub owner: Handle,
    #[serde(default)]
    pub entries: BTreeMap<String, Handle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XRecord {
    pub handle: Handle,
    pub owner: Handle,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DxfObject {
    Dictionary(Dictionary),
    XRecord(XRecord),
}

impl DxfObject {
    pub fn handle(&self) -> Handle {
        match self {
            DxfObject::Dictionary(dict) => dict.handle,
            DxfObject::XRecord(xrecord) => xrecord.handle,
        }
    }

    pub fn owner(&self) -> Handle {
        match self {
            DxfObject::Dictionary(dict) => dict.owner,
            DxfObject::XRecord(xrecord) => xrecord.owner,
        }
    }
}

/// 文档模型：图层表、线型表、视口与 OBJECTS 段对象。
///
/// 所有容器均为 `BTreeMap`，遍历顺序稳定，写出结果可逐字节比较。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    version: DxfVersion,
    /// 以小写名称为键，实现大小写不敏感的唯一性。
    layers: BTreeMap<String, Layer>,
    linetypes: BTreeMap<String, Linetype>,
    viewports: BTreeMap<Handle, Viewport>,
    objects: BTreeMap<Handle, DxfObject>,
    next_handle: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(DxfVersion::default())
    }
}

impl Document {
    pub fn new(version: DxfVersion) -> Self {
        let mut doc = Self::empty(version);
        for (name, description) in [
            ("ByBlock", ""),
            ("ByLayer", ""),
            ("Continuous", "Solid line"),
        ] {
            let handle = Handle::new(doc.next_handle);
            doc.next_handle += 1;
            doc.linetypes.insert(
                name.to_ascii_lowercase(),
                Linetype {
                    handle,
                    name: name.to_string(),
                    description: description.to_string(),
                },
            );
        }
        let handle = Handle::new(doc.next_handle);
        doc.next_handle += 1;
        doc.layers.insert("0".to_string(), Layer::new(handle, "0"));
        doc
    }

    /// 不含任何默认表项的空文档，供读取器按文件内容逐项填充。
    pub fn empty(version: DxfVersion) -> Self {
        Self {
            version,
            layers: BTreeMap::new(),
            linetypes: BTreeMap::new(),
            viewports: BTreeMap::new(),
            objects: BTreeMap::new(),
            next_handle: FIRST_HANDLE,
        }
    }

    #[inline]
    pub fn version(&self) -> DxfVersion {
        self.version
    }

    /// 下一个待分配句柄，对应 `$HANDSEED`。
    #[inline]
    pub fn handle_seed(&self) -> Handle {
        Handle::new(self.next_handle)
    }

    /// 只会向前推进，避免与已有句柄冲突。
    pub fn set_handle_seed(&mut self, seed: Handle) {
        self.next_handle = self.next_handle.max(seed.get());
    }

    fn allocate_handle(&mut self) -> Result<Handle, DocumentError> {
        let handle = Handle::new(self.next_handle);
        self.next_handle = self
            .next_handle
            .checked_add(1)
            .ok_or(DocumentError::HandleExhausted(handle))?;
        Ok(handle)
    }

    /// 登记外部给定的句柄；`FFFFFFFFFFFFFFFF` 之后再无可分配句柄，视为错误。
    fn reserve_handle(&mut self, handle: Handle) -> Result<(), DocumentError> {
        let next = handle
            .get()
            .checked_add(1)
            .ok_or(DocumentError::HandleExhausted(handle))?;
        self.next_handle = self.next_handle.max(next);
        Ok(())
    }

    fn is_handle_used(&self, handle: Handle) -> bool {
        self.layers.values().any(|layer| layer.handle() == handle)
            || self.linetypes.values().any(|lt| lt.handle == handle)
            || self.viewports.contains_key(&handle)
            || self.objects.contains_key(&handle)
    }

    pub fn add_layer(&mut self, name: impl Into<String>) -> Result<Handle, DocumentError> {
        let name = name.into();
        self.check_new_layer_name(&name)?;
        let handle = self.allocate_handle()?;
        self.layers
            .insert(name.to_lowercase(), Layer::new(handle, name));
        Ok(handle)
    }

    /// 插入已构造的图层（读取器使用），校验名称与句柄唯一性。
    pub fn insert_layer(&mut self, layer: Layer) -> Result<(), DocumentError> {
        self.check_new_layer_name(layer.name())?;
        if self.is_handle_used(layer.handle()) {
            return Err(DocumentError::DuplicateHandle(layer.handle()));
        }
        self.reserve_handle(layer.handle())?;
        self.layers.insert(layer.name().to_lowercase(), layer);
        Ok(())
    }

    fn check_new_layer_name(&self, name: &str) -> Result<(), DocumentError> {
        if !is_valid_table_name(name) {
            return Err(DocumentError::InvalidName(name.to_string()));
        }
        if self.layers.contains_key(&name.to_lowercase()) {
            return Err(DocumentError::DuplicateLayer(name.to_string()));
        }
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(&name.to_lowercase())
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.get_mut(&name.to_lowercase())
    }

    pub fn layer_by_handle(&self, handle: Handle) -> Option<&Layer> {
        self.layers.values().find(|layer| layer.handle() == handle)
    }

    pub(crate) fn layer_by_handle_mut(&mut self, handle: Handle) -> Option<&mut Layer> {
        self.layers
            .values_mut()
            .find(|layer| layer.handle() == handle)
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.contains_key(&name.to_lowercase())
    }

    /// 删除图层，同时删除其扩展字典、字典下的记录以及视口冻结引用。
    pub fn remove_layer(&mut self, name: &str) -> Result<Layer, DocumentError> {
        let key = name.to_lowercase();
        if PROTECTED_LAYERS.contains(&key.as_str()) {
            return Err(DocumentError::ProtectedLayer(name.to_string()));
        }
        let layer = self
            .layers
            .remove(&key)
            .ok_or_else(|| DocumentError::LayerNotFound(name.to_string()))?;
        if let Some(dict_handle) = layer.extension_dict() {
            if let Some(DxfObject::Dictionary(dict)) = self.objects.remove(&dict_handle) {
                for handle in dict.entries.values() {
                    self.objects.remove(handle);
                }
            }
        }
        for viewport in self.viewports.values_mut() {
            viewport.thaw_layer(layer.handle());
        }
        Ok(layer)
    }

    pub fn add_linetype(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Handle, DocumentError> {
        let name = name.into();
        self.check_new_linetype_name(&name)?;
        let handle = self.allocate_handle()?;
        self.linetypes.insert(
            name.to_lowercase(),
            Linetype {
                handle,
                name,
                description: description.into(),
            },
        );
        Ok(handle)
    }

    pub fn insert_linetype(&mut self, linetype: Linetype) -> Result<(), DocumentError> {
        self.check_new_linetype_name(&linetype.name)?;
        if self.is_handle_used(linetype.handle) {
            return Err(DocumentError::DuplicateHandle(linetype.handle));
        }
        self.reserve_handle(linetype.handle)?;
        self.linetypes
            .insert(linetype.name.to_lowercase(), linetype);
        Ok(())
    }

    fn check_new_linetype_name(&self, name: &str) -> Result<(), DocumentError> {
        if !is_valid_table_name(name) {
            return Err(DocumentError::InvalidName(name.to_string()));
        }
        if self.linetypes.contains_key(&name.to_lowercase()) {
            return Err(DocumentError::DuplicateLinetype(name.to_string()));
        }
        Ok(())
    }

    pub fn linetype(&self, name: &str) -> Option<&Linetype> {
        self.linetypes.get(&name.to_lowercase())
    }

    pub fn linetype_by_handle(&self, handle: Handle) -> Option<&Linetype> {
        self.linetypes.values().find(|lt| lt.handle == handle)
    }

    pub fn linetypes(&self) -> impl Iterator<Item = &Linetype> {
        self.linetypes.values()
    }

    /// 修改图层基础线型，线型必须已在线型表中定义。
    pub fn set_layer_linetype(&mut self, layer: &str, linetype: &str) -> Result<(), DocumentError> {
        let canonical = self
            .linetype(linetype)
            .map(|lt| lt.name.clone())
            .ok_or_else(|| DocumentError::LinetypeNotFound(linetype.to_string()))?;
        let layer = self
            .layer_mut(layer)
            .ok_or_else(|| DocumentError::LayerNotFound(layer.to_string()))?;
        layer.set_linetype_unchecked(canonical);
        Ok(())
    }

    pub fn add_viewport(
        &mut self,
        center: Point2,
        width: f64,
        height: f64,
    ) -> Result<Handle, DocumentError> {
        let handle = self.allocate_handle()?;
        let mut viewport = Viewport::new(handle, center, width, height);
        viewport.status = self.next_viewport_status();
        // 新视口继承 “在新视口中冻结” 的图层
        viewport.frozen_layers = self
            .layers
            .values()
            .filter(|layer| layer.is_frozen_in_new_viewports())
            .map(Layer::handle)
            .collect();
        self.viewports.insert(handle, viewport);
        Ok(handle)
    }

    fn next_viewport_status(&self) -> i16 {
        self.viewports
            .values()
            .map(|vp| vp.status)
            .max()
            .map_or(1, |max| max.saturating_add(1))
    }

    pub fn insert_viewport(&mut self, viewport: Viewport) -> Result<(), DocumentError> {
        if self.is_handle_used(viewport.handle) {
            return Err(DocumentError::DuplicateHandle(viewport.handle));
        }
        self.reserve_handle(viewport.handle)?;
        self.viewports.insert(viewport.handle, viewport);
        Ok(())
    }

    pub fn viewport(&self, handle: Handle) -> Option<&Viewport> {
        self.viewports.get(&handle)
    }

    pub fn viewport_mut(&mut self, handle: Handle) -> Option<&mut Viewport> {
        self.viewports.get_mut(&handle)
    }

    pub fn viewports(&self) -> impl Iterator<Item = &Viewport> {
        self.viewports.values()
    }

    pub fn freeze_layer_in_viewport(
        &mut self,
        viewport: Handle,
        layer: &str,
    ) -> Result<bool, DocumentError> {
        let layer_handle = self
            .layer(layer)
            .map(Layer::handle)
            .ok_or_else(|| DocumentError::LayerNotFound(layer.to_string()))?;
        let viewport = self
            .viewports
            .get_mut(&viewport)
            .ok_or(DocumentError::ViewportNotFound(viewport))?;
        Ok(viewport.freeze_layer(layer_handle))
    }

    pub fn thaw_layer_in_viewport(
        &mut self,
        viewport: Handle,
        layer: &str,
    ) -> Result<bool, DocumentError> {
        let layer_handle = self
            .layer(layer)
            .map(Layer::handle)
            .ok_or_else(|| DocumentError::LayerNotFound(layer.to_string()))?;
        let viewport = self
            .viewports
            .get_mut(&viewport)
            .ok_or(DocumentError::ViewportNotFound(viewport))?;
        Ok(viewport.thaw_layer(layer_handle))
    }

    pub fn object(&self, handle: Handle) -> Option<&DxfObject> {
        self.objects.get(&handle)
    }

    pub fn objects(&self) -> impl Iterator<Item = &DxfObject> {
        self.objects.values()
    }

    pub fn insert_object(&mut self, object: DxfObject) -> Result<(), DocumentError> {
        let handle = object.handle();
        if self.is_handle_used(handle) {
            return Err(DocumentError::DuplicateHandle(handle));
        }
        self.reserve_handle(handle)?;
        self.objects.insert(handle, object);
        Ok(())
    }

    pub fn remove_object(&mut self, handle: Handle) -> Option<DxfObject> {
        self.objects.remove(&handle)
    }

    pub(crate) fn dictionary(&self, handle: Handle) -> Option<&Dictionary> {
        match self.objects.get(&handle) {
            Some(DxfObject::Dictionary(dict)) => Some(dict),
            _ => None,
        }
    }

    pub(crate) fn dictionary_mut(&mut self, handle: Handle) -> Option<&mut Dictionary> {
        match self.objects.get_mut(&handle) {
            Some(DxfObject::Dictionary(dict)) => Some(dict),
            _ => None,
        }
    }

    pub(crate) fn xrecord(&self, handle: Handle) -> Option<&XRecord> {
        match self.objects.get(&handle) {
            Some(DxfObject::XRecord(xrecord)) => Some(xrecord),
            _ => None,
        }
    }

    pub(crate) fn xrecord_mut(&mut self, handle: Handle) -> Option<&mut XRecord> {
        match self.objects.get_mut(&handle) {
            Some(DxfObject::XRecord(xrecord)) => Some(xrecord),
            _ => None,
        }
    }

    /// 返回图层的扩展字典句柄，不存在时创建。
    pub fn ensure_extension_dict(&mut self, layer: Handle) -> Result<Handle, DocumentError> {
        let existing = self
            .layer_by_handle(layer)
            .ok_or_else(|| DocumentError::LayerNotFound(layer.to_string()))?
            .extension_dict();
        if let Some(handle) = existing {
            if self.dictionary(handle).is_some() {
                return Ok(handle);
            }
        }
        let handle = self.allocate_handle()?;
        self.objects.insert(
            handle,
            DxfObject::Dictionary(Dictionary {
                handle,
                owner: layer,
                entries: BTreeMap::new(),
            }),
        );
        if let Some(layer) = self.layer_by_handle_mut(layer) {
            layer.set_extension_dict(Some(handle));
        }
        Ok(handle)
    }

    /// 扩展字典为空时删除字典并解除与图层的关联。
    pub(crate) fn prune_extension_dict(&mut self, layer: Handle) {
        let Some(dict_handle) = self
            .layer_by_handle(layer)
            .and_then(Layer::extension_dict)
        else {
            return;
        };
        let is_empty = self
            .dictionary(dict_handle)
            .is_none_or(|dict| dict.entries.is_empty());
        if is_empty {
            self.objects.remove(&dict_handle);
            if let Some(layer) = self.layer_by_handle_mut(layer) {
                layer.set_extension_dict(None);
            }
        }
    }
}
