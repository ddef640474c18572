use std::io::{self, Write};
use std::path::Path;

use tracing::{info, warn};
use zlayer_core::document::Document;
use zlayer_core::layer::Layer;
use zlayer_core::overrides::OverrideSet;

/// 打印文档概览：图层状态、视口与各视口的覆盖。
pub fn print_summary(path: &Path, document: &Document) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_summary(&mut out, path, document)
}

pub fn write_summary(out: &mut impl Write, path: &Path, document: &Document) -> io::Result<()> {
    let layer_count = document.layers().count();
    let viewport_count = document.viewports().count();
    info!(layer_count, viewport_count, "文档统计");

    writeln!(out, "文件: {}", path.display())?;
    writeln!(out, "版本: {} ({})", document.version(), document.version().acadver())?;

    writeln!(out, "图层 ({layer_count}):")?;
    for layer in document.layers() {
        writeln!(out, "  - {}", describe_layer(layer))?;
    }

    writeln!(out, "视口 ({viewport_count}):")?;
    for viewport in document.viewports() {
        let frozen: Vec<&str> = viewport
            .frozen_layers
            .iter()
            .filter_map(|handle| document.layer_by_handle(*handle).map(Layer::name))
            .collect();
        writeln!(
            out,
            "  - {} #{} 中心=({:.2}, {:.2}) 尺寸={:.2}x{:.2}{}",
            viewport.handle,
            viewport.status,
            viewport.center.x(),
            viewport.center.y(),
            viewport.width,
            viewport.height,
            if frozen.is_empty() {
                String::new()
            } else {
                format!(" 冻结: {}", frozen.join(", "))
            }
        )?;
    }

    writeln!(out, "视口覆盖:")?;
    let mut any = false;
    for layer in document.layers() {
        let viewports = match document.overridden_viewports(layer.name()) {
            Ok(viewports) => viewports,
            Err(err) => {
                warn!(layer = layer.name(), error = %err, "无法读取视口覆盖");
                writeln!(out, "  - {}: 覆盖记录无效 ({err})", layer.name())?;
                continue;
            }
        };
        for viewport in viewports {
            match document.vp_overrides(layer.name(), viewport) {
                Ok(store) => {
                    any = true;
                    writeln!(
                        out,
                        "  - {} @ {}: {}",
                        layer.name(),
                        viewport,
                        describe_overrides(store.overrides())
                    )?;
                }
                Err(err) => {
                    any = true;
                    warn!(layer = layer.name(), %viewport, error = %err, "无法读取视口覆盖");
                    let reason = if document.viewport(viewport).is_none() {
                        "视口不存在"
                    } else {
                        "覆盖记录无效"
                    };
                    writeln!(out, "  - {} @ {}: {reason} ({err})", layer.name(), viewport)?;
                }
            }
        }
    }
    if !any {
        writeln!(out, "  （无）")?;
    }
    Ok(())
}

fn describe_layer(layer: &Layer) -> String {
    let mut states = vec![if layer.is_on() { "on" } else { "off" }];
    if layer.is_frozen() {
        states.push("frozen");
    }
    if layer.is_locked() {
        states.push("locked");
    }
    if layer.is_xref_dependent() {
        states.push("xref");
    }
    let rgb = layer
        .rgb()
        .map(|rgb| format!(" rgb={rgb}"))
        .unwrap_or_default();
    format!(
        "{} [{}] color={}{rgb} linetype={} lineweight={} transparency={:.3}",
        layer.name(),
        states.join(","),
        layer.color(),
        layer.linetype(),
        layer.lineweight(),
        layer.transparency()
    )
}

fn describe_overrides(set: &OverrideSet) -> String {
    let mut parts = Vec::new();
    if let Some(color) = set.color {
        parts.push(format!("color={color}"));
    }
    if let Some(rgb) = set.rgb {
        parts.push(format!("rgb={rgb}"));
    }
    if let Some(linetype) = &set.linetype {
        parts.push(format!("linetype={linetype}"));
    }
    if let Some(lineweight) = set.lineweight {
        parts.push(format!("lineweight={lineweight}"));
    }
    if let Some(transparency) = set.transparency {
        parts.push(format!("transparency={transparency:.3}"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use zlayer_core::document::DxfVersion;
    use zlayer_core::geometry::Point2;
    use zlayer_io::DxfFacade;

    #[test]
    fn summary_lists_overrides_per_viewport() {
        let mut document = Document::new(DxfVersion::R2018);
        document.add_layer("WALLS").unwrap();
        let vp = document.add_viewport(Point2::new(0.0, 0.0), 10.0, 10.0).unwrap();
        let mut ovr = document.vp_overrides("WALLS", vp).unwrap();
        ovr.set_color(3).unwrap();
        ovr.set_lineweight(50).unwrap();
        ovr.commit(&mut document).unwrap();

        let mut buffer = Vec::new();
        write_summary(&mut buffer, Path::new("a.dxf"), &document).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("版本: R2018 (AC1032)"), "{text}");
        assert!(text.contains(&format!("WALLS @ {vp}: color=3 lineweight=50")), "{text}");
    }

    #[test]
    fn summary_lists_records_for_missing_viewports() {
        let mut document = Document::new(DxfVersion::R2018);
        document.add_layer("WALLS").unwrap();
        let vp = document.add_viewport(Point2::new(0.0, 0.0), 10.0, 10.0).unwrap();
        let mut ovr = document.vp_overrides("WALLS", vp).unwrap();
        ovr.set_color(3).unwrap();
        ovr.commit(&mut document).unwrap();

        let facade = DxfFacade::new();
        let text = facade
            .write_string(&document)
            .replace(&format!("335\n{vp}\n"), "335\nFFFF\n");
        let document = facade.read_str(&text).unwrap();

        let mut buffer = Vec::new();
        write_summary(&mut buffer, Path::new("c.dxf"), &document).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("WALLS @ FFFF: 视口不存在"), "{text}");
        assert!(!text.contains("（无）"), "{text}");
    }

    #[test]
    fn summary_without_overrides_says_none() {
        let document = Document::new(DxfVersion::R2000);
        let mut buffer = Vec::new();
        write_summary(&mut buffer, Path::new("b.dxf"), &document).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("（无）"));
        assert!(text.contains("0 [on] color=7"));
    }
}
