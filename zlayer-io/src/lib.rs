use std::collections::BTreeSet;
use std::fmt::{self, Display, Write as _};
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};
use zlayer_core::{
    color::{self, Rgb},
    document::{Dictionary, Document, DxfObject, DxfVersion, Linetype, Tag, Viewport, XRecord},
    geometry::Point2,
    handle::Handle,
    layer::{DEFAULT_LAYER_COLOR, DEFAULT_LINETYPE, LINEWEIGHT_DEFAULT, Layer, LayerRecord},
};

const TRANSPARENCY_APPID: &str = "AcCmTransparency";
const XDICTIONARY_GROUP: &str = "{ACAD_XDICTIONARY";
const STANDARD_LINETYPES: [(&str, &str); 3] = [
    ("ByBlock", ""),
    ("ByLayer", ""),
    (DEFAULT_LINETYPE, "Solid line"),
];

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

/// 读取时跳过的内容。写出只包含图层、线型、视口与字典/XRECORD，
/// 这里记录的部分在写回后会丢失。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkippedContent {
    pub sections: BTreeSet<String>,
    pub header_variables: BTreeSet<String>,
    pub table_entries: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub objects: BTreeSet<String>,
}

impl SkippedContent {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
            && self.header_variables.is_empty()
            && self.table_entries.is_empty()
            && self.entities.is_empty()
            && self.objects.is_empty()
    }
}

impl fmt::Display for SkippedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = [
            ("段", &self.sections),
            ("头变量", &self.header_variables),
            ("表项", &self.table_entries),
            ("实体", &self.entities),
            ("对象", &self.objects),
        ];
        let mut first = true;
        for (label, names) in groups {
            if names.is_empty() {
                continue;
            }
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            let joined: Vec<&str> = names.iter().map(String::as_str).collect();
            write!(f, "{label} {}", joined.join(", "))?;
        }
        Ok(())
    }
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

/// ASCII DXF 子集的读写入口：图层、线型、视口以及扩展字典/XRECORD。
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    pub fn read_str(&self, source: &str) -> Result<Document, IoError> {
        self.read_str_with_skipped(source).map(|(document, _)| document)
    }

    /// 同 `read_str`，并返回写出时无法保留的内容。
    pub fn read_str_with_skipped(
        &self,
        source: &str,
    ) -> Result<(Document, SkippedContent), IoError> {
        let parser = DxfParser::new(source);
        parser.parse().map_err(|err| match err {
            DxfError::Unsupported { feature } => IoError::UnsupportedFeature(feature),
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        })
    }

    pub fn load_with_skipped(&self, path: &Path) -> Result<(Document, SkippedContent), IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let (document, skipped) = self.read_str_with_skipped(&data)?;
        debug!(
            path = %path.display(),
            version = %document.version(),
            layers = document.layers().count(),
            viewports = document.viewports().count(),
            "已读取 DXF 文档"
        );
        if !skipped.is_empty() {
            warn!(path = %path.display(), skipped = %skipped, "以下内容不会被写回");
        }
        Ok((document, skipped))
    }

    /// 输出顺序完全由文档内容决定，同一文档多次写出结果逐字节一致。
    pub fn write_string(&self, document: &Document) -> String {
        DxfWriter::new(document).finish()
    }
}

impl Default for DxfFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        self.load_with_skipped(path).map(|(document, _)| document)
    }
}

impl DocumentSaver for DxfFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let data = self.write_string(document);
        fs::write(path, data).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "已写出 DXF 文档");
        Ok(())
    }
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// 读取过程中收集的原始表项，全部读完后再组装成 `Document`。
#[derive(Debug, Default)]
struct ParsedDrawing {
    version: Option<DxfVersion>,
    handle_seed: Option<Handle>,
    linetypes: Vec<(Option<Handle>, String, String)>,
    layers: Vec<ParsedLayer>,
    viewports: Vec<Viewport>,
    objects: Vec<DxfObject>,
    skipped: SkippedContent,
}

#[derive(Debug)]
struct ParsedLayer {
    handle: Option<Handle>,
    name: String,
    flags: i16,
    color: i16,
    true_color: Option<Rgb>,
    linetype: String,
    lineweight: i16,
    transparency: f64,
    plot: bool,
    extension_dict: Option<Handle>,
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<(Document, SkippedContent), DxfError> {
        let mut drawing = ParsedDrawing::default();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.as_str() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.as_str() {
                        "HEADER" => self.parse_header(&mut drawing)?,
                        "TABLES" => self.parse_tables(&mut drawing)?,
                        "ENTITIES" => self.parse_entities(&mut drawing)?,
                        "OBJECTS" => self.parse_objects(&mut drawing)?,
                        other => {
                            drawing.skipped.sections.insert(other.trim().to_string());
                            self.skip_section()?
                        }
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        let skipped = std::mem::take(&mut drawing.skipped);
        Ok((assemble(drawing)?, skipped))
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, drawing: &mut ParsedDrawing) -> Result<(), DxfError> {
        let mut variable: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some((9, name)) => {
                    let name = name.trim().to_string();
                    if name != "$ACADVER" && name != "$HANDSEED" {
                        drawing.skipped.header_variables.insert(name.clone());
                    }
                    variable = Some(name);
                }
                Some((code, value)) => match (variable.as_deref(), code) {
                    (Some("$ACADVER"), 1) => {
                        let version = DxfVersion::from_acadver(&value).ok_or_else(|| {
                            DxfError::unsupported(format!("DXF 版本 {}", value.trim()))
                        })?;
                        drawing.version = Some(version);
                    }
                    (Some("$HANDSEED"), 5) => {
                        drawing.handle_seed = Some(parse_handle(&value, "$HANDSEED")?);
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("HEADER 段提前结束")),
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self, drawing: &mut ParsedDrawing) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("TABLES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "TABLES 段遇到组码 {code}（期望 0 表示 TABLE 起始）"
                )));
            }
            match value.as_str() {
                "ENDSEC" => break,
                "TABLE" => self.parse_table(drawing)?,
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_table(&mut self, drawing: &mut ParsedDrawing) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "ENDTAB" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    "LAYER" => {
                        let layer = self.parse_layer()?;
                        drawing.layers.push(layer);
                    }
                    "LTYPE" => {
                        let linetype = self.parse_linetype()?;
                        drawing.linetypes.push(linetype);
                    }
                    other => {
                        drawing.skipped.table_entries.insert(other.to_string());
                        self.skip_entity_body()?
                    }
                },
                // 表头字段（名称、句柄、条目数）不影响结果
                Some(_) => {}
                None => return Err(DxfError::invalid("TABLE 未找到 ENDTAB 终止标记")),
            }
        }
        Ok(())
    }

    fn parse_layer(&mut self) -> Result<ParsedLayer, DxfError> {
        let mut handle = None;
        let mut name: Option<String> = None;
        let mut flags = 0i16;
        let mut color = DEFAULT_LAYER_COLOR;
        let mut true_color = None;
        let mut linetype = DEFAULT_LINETYPE.to_string();
        let mut lineweight = LINEWEIGHT_DEFAULT;
        let mut transparency = 0.0;
        let mut plot = true;
        let mut extension_dict = None;
        let mut group: Option<String> = None;
        let mut appid: Option<String> = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    102 => {
                        let trimmed = value.trim();
                        if trimmed.starts_with('{') {
                            group = Some(trimmed.to_string());
                        } else {
                            group = None;
                        }
                    }
                    360 if group.as_deref() == Some(XDICTIONARY_GROUP) => {
                        extension_dict = Some(parse_handle(&value, "LAYER 扩展字典")?);
                    }
                    1001 => appid = Some(value.trim().to_string()),
                    1071 if appid.as_deref() == Some(TRANSPARENCY_APPID) => {
                        transparency =
                            color::decode_transparency(parse_i32(&value, "LAYER 透明度")?);
                    }
                    _ if appid.is_some() || group.is_some() => {}
                    5 => handle = Some(parse_handle(&value, "LAYER 句柄")?),
                    2 => name = Some(value.trim().to_string()),
                    70 => flags = parse_i16(&value, "LAYER 标记")?,
                    62 => color = parse_i16(&value, "LAYER 颜色")?,
                    6 => linetype = value.trim().to_string(),
                    370 => lineweight = parse_i16(&value, "LAYER 线宽")?,
                    420 => true_color = Some(Rgb::from_int(parse_i32(&value, "LAYER 真彩色")?)),
                    290 => plot = parse_i16(&value, "LAYER 打印标记")? != 0,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LAYER 未正确结束")),
            }
        }

        let name = name.ok_or_else(|| DxfError::invalid("LAYER 缺少名称（组码 2）"))?;
        Ok(ParsedLayer {
            handle,
            name,
            flags,
            color,
            true_color,
            linetype,
            lineweight,
            transparency,
            plot,
            extension_dict,
        })
    }

    fn parse_linetype(&mut self) -> Result<(Option<Handle>, String, String), DxfError> {
        let mut handle = None;
        let mut name = None;
        let mut description = String::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    5 => handle = Some(parse_handle(&value, "LTYPE 句柄")?),
                    2 => name = Some(value.trim().to_string()),
                    3 => description = value,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LTYPE 未正确结束")),
            }
        }
        let name = name.ok_or_else(|| DxfError::invalid("LTYPE 缺少名称（组码 2）"))?;
        Ok((handle, name, description))
    }

    fn parse_entities(&mut self, drawing: &mut ParsedDrawing) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }
            match value.as_str() {
                "ENDSEC" => break,
                "VIEWPORT" => {
                    let viewport = self.parse_viewport()?;
                    drawing.viewports.push(viewport);
                }
                other => {
                    drawing.skipped.entities.insert(other.to_string());
                    self.skip_entity_body()?
                }
            }
        }
        Ok(())
    }

    fn parse_viewport(&mut self) -> Result<Viewport, DxfError> {
        let mut handle = None;
        let mut center_x = None;
        let mut center_y = None;
        let mut width = 0.0;
        let mut height = 0.0;
        let mut status = 1i16;
        let mut frozen_layers = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    5 => handle = Some(parse_handle(&value, "VIEWPORT 句柄")?),
                    10 => {
                        if center_x.is_some() {
                            return Err(DxfError::invalid("VIEWPORT 遇到重复的中心 X（组码 10）"));
                        }
                        center_x = Some(parse_f64(&value, "VIEWPORT 中心 X")?);
                    }
                    20 => {
                        if center_y.is_some() {
                            return Err(DxfError::invalid("VIEWPORT 遇到重复的中心 Y（组码 20）"));
                        }
                        center_y = Some(parse_f64(&value, "VIEWPORT 中心 Y")?);
                    }
                    40 => width = parse_f64(&value, "VIEWPORT 宽度")?,
                    41 => height = parse_f64(&value, "VIEWPORT 高度")?,
                    69 => status = parse_i16(&value, "VIEWPORT 编号")?,
                    331 => frozen_layers.push(parse_handle(&value, "VIEWPORT 冻结图层")?),
                    _ => {}
                },
                None => return Err(DxfError::invalid("VIEWPORT 未正确结束")),
            }
        }
        let handle = handle.ok_or_else(|| DxfError::invalid("VIEWPORT 缺少句柄（组码 5）"))?;
        let cx = center_x.ok_or_else(|| DxfError::invalid("VIEWPORT 缺少中心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("VIEWPORT 缺少中心 Y（组码 20）"))?;
        Ok(Viewport {
            handle,
            status,
            center: Point2::new(cx, cy),
            width,
            height,
            frozen_layers,
        })
    }

    fn parse_objects(&mut self, drawing: &mut ParsedDrawing) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("OBJECTS 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "OBJECTS 段遇到组码 {code}（期望 0 表示对象起始）"
                )));
            }
            match value.as_str() {
                "ENDSEC" => break,
                "DICTIONARY" => {
                    let dict = self.parse_dictionary()?;
                    drawing.objects.push(DxfObject::Dictionary(dict));
                }
                "XRECORD" => {
                    let xrecord = self.parse_xrecord()?;
                    drawing.objects.push(DxfObject::XRecord(xrecord));
                }
                other => {
                    drawing.skipped.objects.insert(other.to_string());
                    self.skip_entity_body()?
                }
            }
        }
        Ok(())
    }

    fn parse_dictionary(&mut self) -> Result<Dictionary, DxfError> {
        let mut handle: Option<Handle> = None;
        let mut owner: Option<Handle> = None;
        let mut entries = std::collections::BTreeMap::new();
        let mut pending_entry_name: Option<String> = None;
        let mut in_group = false;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    5 => handle = Some(parse_handle(&value, "DICTIONARY 句柄")?),
                    3 => {
                        let trimmed = value.trim();
                        if !trimmed.is_empty() {
                            pending_entry_name = Some(trimmed.to_string());
                        }
                    }
                    330 => {
                        if in_group {
                            continue;
                        }
                        if pending_entry_name.is_none() && owner.is_none() {
                            owner = Some(parse_handle(&value, "DICTIONARY 所有者")?);
                        }
                    }
                    350 | 360 => {
                        if let Some(name) = pending_entry_name.take() {
                            entries.insert(name, parse_handle(&value, "DICTIONARY 条目")?);
                        }
                    }
                    102 => {
                        let trimmed = value.trim();
                        if trimmed.starts_with('{') {
                            in_group = true;
                        } else if trimmed == "}" {
                            in_group = false;
                        }
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("DICTIONARY 未正确结束")),
            }
        }

        let handle = handle.ok_or_else(|| DxfError::invalid("DICTIONARY 缺少句柄（组码 5）"))?;
        Ok(Dictionary {
            handle,
            owner: owner.unwrap_or(Handle::NULL),
            entries,
        })
    }

    /// `100 AcDbXrecord` 之后的组码原样保留，紧随其后的克隆标记（280）除外。
    fn parse_xrecord(&mut self) -> Result<XRecord, DxfError> {
        let mut handle: Option<Handle> = None;
        let mut owner: Option<Handle> = None;
        let mut tags = Vec::new();
        let mut in_data = false;
        let mut expect_cloning_flag = false;
        let mut in_group = false;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if in_data {
                        if expect_cloning_flag && code == 280 {
                            expect_cloning_flag = false;
                            continue;
                        }
                        expect_cloning_flag = false;
                        tags.push(Tag::new(code, value.trim()));
                        continue;
                    }
                    match code {
                        5 => handle = Some(parse_handle(&value, "XRECORD 句柄")?),
                        102 => {
                            let trimmed = value.trim();
                            in_group = trimmed.starts_with('{');
                        }
                        330 if !in_group && owner.is_none() => {
                            owner = Some(parse_handle(&value, "XRECORD 所有者")?);
                        }
                        100 if value.trim() == "AcDbXrecord" => {
                            in_data = true;
                            expect_cloning_flag = true;
                        }
                        _ => {}
                    }
                }
                None => return Err(DxfError::invalid("XRECORD 未正确结束")),
            }
        }

        let handle = handle.ok_or_else(|| DxfError::invalid("XRECORD 缺少句柄（组码 5）"))?;
        Ok(XRecord {
            handle,
            owner: owner.unwrap_or(Handle::NULL),
            tags,
        })
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

/// 将读取到的表项组装成文档；缺失的标准线型与图层 0 会被补齐。
fn assemble(drawing: ParsedDrawing) -> Result<Document, DxfError> {
    let version = drawing.version.unwrap_or_else(|| {
        debug!("DXF 缺少 $ACADVER，按 R12 处理");
        DxfVersion::R12
    });
    let mut document = Document::empty(version);
    let to_invalid = |err: zlayer_core::document::DocumentError| DxfError::invalid(err.to_string());

    // 先登记所有显式句柄，再为缺失句柄的表项分配新句柄
    for viewport in drawing.viewports {
        document.insert_viewport(viewport).map_err(to_invalid)?;
    }
    for object in drawing.objects {
        document.insert_object(object).map_err(to_invalid)?;
    }
    let mut pending_linetypes = Vec::new();
    for (handle, name, description) in drawing.linetypes {
        match handle {
            Some(handle) => document
                .insert_linetype(Linetype {
                    handle,
                    name,
                    description,
                })
                .map_err(to_invalid)?,
            None => pending_linetypes.push((name, description)),
        }
    }
    let mut pending_layers = Vec::new();
    for layer in drawing.layers {
        match layer.handle {
            Some(handle) => document
                .insert_layer(layer_from_parsed(handle, layer))
                .map_err(to_invalid)?,
            None => pending_layers.push(layer),
        }
    }
    if let Some(seed) = drawing.handle_seed {
        document.set_handle_seed(seed);
    }

    for (name, description) in pending_linetypes {
        document.add_linetype(name, description).map_err(to_invalid)?;
    }
    for (name, description) in STANDARD_LINETYPES {
        if document.linetype(name).is_none() {
            document.add_linetype(name, description).map_err(to_invalid)?;
        }
    }
    for layer in pending_layers {
        let handle = document.handle_seed();
        document
            .insert_layer(layer_from_parsed(handle, layer))
            .map_err(to_invalid)?;
    }
    if !document.has_layer("0") {
        document.add_layer("0").map_err(to_invalid)?;
    }
    Ok(document)
}

fn layer_from_parsed(handle: Handle, layer: ParsedLayer) -> Layer {
    Layer::from_record(LayerRecord {
        handle,
        name: layer.name,
        flags: layer.flags,
        color: layer.color,
        true_color: layer.true_color,
        linetype: layer.linetype,
        lineweight: layer.lineweight,
        transparency: layer.transparency,
        plot: layer.plot,
        extension_dict: layer.extension_dict,
    })
}

struct DxfWriter<'a> {
    document: &'a Document,
    out: String,
}

impl<'a> DxfWriter<'a> {
    fn new(document: &'a Document) -> Self {
        Self {
            document,
            out: String::new(),
        }
    }

    fn pair(&mut self, code: i32, value: impl Display) {
        // 写入 String 不会失败
        let _ = write!(self.out, "{code:>3}\n{value}\n");
    }

    /// R12 不支持子类标记。
    fn subclass(&mut self, marker: &str) {
        if self.document.version().supports_xrecords() {
            self.pair(100, marker);
        }
    }

    fn finish(mut self) -> String {
        self.write_header();
        self.write_tables();
        self.write_entities();
        if self.document.version().supports_xrecords() {
            self.write_objects();
        }
        self.pair(0, "EOF");
        self.out
    }

    fn write_header(&mut self) {
        let document = self.document;
        self.pair(0, "SECTION");
        self.pair(2, "HEADER");
        self.pair(9, "$ACADVER");
        self.pair(1, document.version().acadver());
        self.pair(9, "$HANDSEED");
        self.pair(5, document.handle_seed());
        self.pair(0, "ENDSEC");
    }

    fn write_tables(&mut self) {
        let document = self.document;
        self.pair(0, "SECTION");
        self.pair(2, "TABLES");

        self.pair(0, "TABLE");
        self.pair(2, "LTYPE");
        self.pair(70, document.linetypes().count());
        for linetype in document.linetypes() {
            self.pair(0, "LTYPE");
            self.pair(5, linetype.handle);
            self.subclass("AcDbSymbolTableRecord");
            self.subclass("AcDbLinetypeTableRecord");
            self.pair(2, &linetype.name);
            self.pair(70, 0);
            self.pair(3, &linetype.description);
            self.pair(72, 65);
            self.pair(73, 0);
            self.pair(40, 0.0);
        }
        self.pair(0, "ENDTAB");

        self.pair(0, "TABLE");
        self.pair(2, "LAYER");
        self.pair(70, document.layers().count());
        for layer in document.layers() {
            self.write_layer(layer);
        }
        self.pair(0, "ENDTAB");

        self.pair(0, "ENDSEC");
    }

    fn write_layer(&mut self, layer: &Layer) {
        let version = self.document.version();
        self.pair(0, "LAYER");
        self.pair(5, layer.handle());
        if let Some(dict) = layer.extension_dict() {
            if version.supports_xrecords() {
                self.pair(102, XDICTIONARY_GROUP);
                self.pair(360, dict);
                self.pair(102, "}");
            }
        }
        self.subclass("AcDbSymbolTableRecord");
        self.subclass("AcDbLayerTableRecord");
        self.pair(2, layer.name());
        self.pair(70, layer.flags().bits());
        self.pair(62, layer.raw_color());
        self.pair(6, layer.linetype());
        if let Some(rgb) = layer.rgb() {
            if version.supports_true_color() {
                self.pair(420, rgb.to_int());
            }
        }
        if version.supports_xrecords() {
            self.pair(290, if layer.plot() { 1 } else { 0 });
            self.pair(370, layer.lineweight());
        }
        if layer.transparency() > 0.0 && version.supports_xrecords() {
            self.pair(1001, TRANSPARENCY_APPID);
            self.pair(1071, color::encode_transparency(layer.transparency()));
        }
    }

    fn write_entities(&mut self) {
        let document = self.document;
        self.pair(0, "SECTION");
        self.pair(2, "ENTITIES");
        for viewport in document.viewports() {
            self.pair(0, "VIEWPORT");
            self.pair(5, viewport.handle);
            self.subclass("AcDbEntity");
            self.pair(67, 1);
            self.pair(8, "0");
            self.subclass("AcDbViewport");
            self.pair(10, viewport.center.x());
            self.pair(20, viewport.center.y());
            self.pair(30, 0.0);
            self.pair(40, viewport.width);
            self.pair(41, viewport.height);
            self.pair(69, viewport.status);
            for layer in &viewport.frozen_layers {
                self.pair(331, layer);
            }
        }
        self.pair(0, "ENDSEC");
    }

    fn write_objects(&mut self) {
        let document = self.document;
        self.pair(0, "SECTION");
        self.pair(2, "OBJECTS");
        for object in document.objects() {
            match object {
                DxfObject::Dictionary(dict) => {
                    self.pair(0, "DICTIONARY");
                    self.pair(5, dict.handle);
                    self.pair(330, dict.owner);
                    self.pair(100, "AcDbDictionary");
                    self.pair(281, 1);
                    for (name, handle) in &dict.entries {
                        self.pair(3, name);
                        self.pair(360, handle);
                    }
                }
                DxfObject::XRecord(xrecord) => {
                    self.pair(0, "XRECORD");
                    self.pair(5, xrecord.handle);
                    self.pair(330, xrecord.owner);
                    self.pair(100, "AcDbXrecord");
                    self.pair(280, 1);
                    for tag in &xrecord.tags {
                        self.pair(tag.code, &tag.value);
                    }
                }
            }
        }
        self.pair(0, "ENDSEC");
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => return Ok(None),
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }
}

fn parse_handle(raw: &str, context: &str) -> Result<Handle, DxfError> {
    Handle::parse_hex(raw)
        .ok_or_else(|| DxfError::invalid(format!("{context} 句柄解析失败（值：\"{raw}\"）")))
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}
