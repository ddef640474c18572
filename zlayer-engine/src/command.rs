use std::collections::HashMap;
use std::fmt::Write as _;

use zlayer_core::color::Rgb;
use zlayer_core::handle::Handle;
use zlayer_core::layer::{LINEWEIGHT_DEFAULT, LayerAttributes};
use zlayer_core::overrides::{LayerOverrides, OverrideAttribute};

use crate::errors::EngineError;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    /// 按空白切分一行命令文本，首个单词为命令名。
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?.to_string();
        Some(Self {
            name,
            args: words.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

impl From<EngineError> for CommandResponse {
    fn from(err: EngineError) -> Self {
        Self::err(err.to_string())
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub session: &'a mut Session,
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(VpSetCommand);
        bus.register(VpDiscardCommand);
        bus.register(VpCommitCommand);
        bus.register(VpShowCommand);
        bus.register(VpActiveCommand);
        bus.register(VpFreezeCommand { freeze: true });
        bus.register(VpFreezeCommand { freeze: false });
        bus.register(LayerStateCommand);
        bus.register(LayerListCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }

    pub fn usage(&self, name: &str) -> Option<&'static str> {
        self.handlers.get(name).map(|handler| handler.usage())
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

fn arg<'r>(request: &'r CommandRequest, index: usize, usage: &str) -> Result<&'r str, CommandResponse> {
    request
        .args
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| CommandResponse::err(format!("参数不足，用法: {usage}")))
}

/// 可选的视口参数，缺省时使用活动视口。
fn viewport_arg(
    request: &CommandRequest,
    index: usize,
    session: &Session,
) -> Result<Handle, CommandResponse> {
    let explicit = match request.args.get(index) {
        Some(raw) => Some(
            Handle::parse_hex(raw)
                .ok_or_else(|| CommandResponse::err(format!("无效的视口句柄: {raw}")))?,
        ),
        None => None,
    };
    session.resolve_viewport(explicit).map_err(CommandResponse::from)
}

fn attribute_arg(raw: &str) -> Result<OverrideAttribute, CommandResponse> {
    OverrideAttribute::from_name(raw)
        .ok_or_else(|| CommandResponse::err(format!("未知的覆盖属性: {raw}")))
}

fn parse_value<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, CommandResponse> {
    raw.parse::<T>()
        .map_err(|_| CommandResponse::err(format!("无法解析{what}: {raw}")))
}

fn apply_override(
    store: &mut LayerOverrides,
    attribute: OverrideAttribute,
    raw: &str,
) -> Result<(), CommandResponse> {
    let result = match attribute {
        OverrideAttribute::Color => store.set_color(parse_value(raw, "颜色")?),
        OverrideAttribute::Rgb => store.set_rgb(parse_value::<Rgb>(raw, "RGB 颜色")?),
        OverrideAttribute::Linetype => store.set_linetype(raw),
        OverrideAttribute::Lineweight => {
            let value = if raw.eq_ignore_ascii_case("default") {
                LINEWEIGHT_DEFAULT
            } else {
                parse_value(raw, "线宽")?
            };
            store.set_lineweight(value)
        }
        OverrideAttribute::Transparency => store.set_transparency(parse_value(raw, "透明度")?),
    };
    result.map_err(|err| CommandResponse::err(err.to_string()))
}

struct VpSetCommand;

impl CommandHandler for VpSetCommand {
    fn name(&self) -> &'static str {
        "vp_set"
    }

    fn usage(&self) -> &'static str {
        "vp_set <layer> <color|rgb|linetype|lineweight|transparency> <value> [viewport]"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let mut run = || -> Result<CommandResponse, CommandResponse> {
            let layer = arg(request, 0, self.usage())?;
            let attribute = attribute_arg(arg(request, 1, self.usage())?)?;
            let value = arg(request, 2, self.usage())?;
            let viewport = viewport_arg(request, 3, context.session)?;
            let store = context.session.overrides(layer, viewport)?;
            apply_override(store, attribute, value)?;
            Ok(CommandResponse::ok(format!(
                "图层 {layer} 在视口 {viewport} 的 {} 已暂存为 {value}",
                attribute.name()
            )))
        };
        run().unwrap_or_else(|response| response)
    }
}

struct VpDiscardCommand;

impl CommandHandler for VpDiscardCommand {
    fn name(&self) -> &'static str {
        "vp_discard"
    }

    fn usage(&self) -> &'static str {
        "vp_discard <layer> <attribute|all> [viewport]"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let mut run = || -> Result<CommandResponse, CommandResponse> {
            let layer = arg(request, 0, self.usage())?;
            let target = arg(request, 1, self.usage())?;
            let viewport = viewport_arg(request, 2, context.session)?;
            let attribute = if target.eq_ignore_ascii_case("all") {
                None
            } else {
                Some(attribute_arg(target)?)
            };
            let store = context.session.overrides(layer, viewport)?;
            match attribute {
                Some(attribute) => store.discard(attribute),
                None => store.discard_all(),
            }
            Ok(CommandResponse::ok(format!(
                "图层 {layer} 在视口 {viewport} 的覆盖 {target} 已清除（尚未提交）"
            )))
        };
        run().unwrap_or_else(|response| response)
    }
}

struct VpCommitCommand;

impl CommandHandler for VpCommitCommand {
    fn name(&self) -> &'static str {
        "vp_commit"
    }

    fn usage(&self) -> &'static str {
        "vp_commit [layer [viewport]]"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let mut run = || -> Result<CommandResponse, CommandResponse> {
            let Some(layer) = request.args.first() else {
                let committed = context.session.commit_all()?;
                return Ok(CommandResponse::ok(format!("已提交 {committed} 组视口覆盖")));
            };
            let viewport = viewport_arg(request, 1, context.session)?;
            if context.session.commit(layer, viewport)? {
                Ok(CommandResponse::ok(format!(
                    "图层 {layer} 在视口 {viewport} 的覆盖已提交"
                )))
            } else {
                Ok(CommandResponse::ok(format!(
                    "图层 {layer} 在视口 {viewport} 没有打开的覆盖"
                )))
            }
        };
        run().unwrap_or_else(|response| response)
    }
}

fn describe(attributes: &LayerAttributes, store: Option<&LayerOverrides>) -> String {
    let mark = |attribute: OverrideAttribute| {
        if store.is_some_and(|store| store.is_overridden(attribute)) {
            " *"
        } else {
            ""
        }
    };
    let rgb = attributes
        .rgb
        .map_or_else(|| "-".to_string(), |rgb| rgb.to_string());
    let mut out = String::new();
    let _ = writeln!(out, "color: {}{}", attributes.color, mark(OverrideAttribute::Color));
    let _ = writeln!(out, "rgb: {rgb}{}", mark(OverrideAttribute::Rgb));
    let _ = writeln!(out, "linetype: {}{}", attributes.linetype, mark(OverrideAttribute::Linetype));
    let _ = writeln!(
        out,
        "lineweight: {}{}",
        attributes.lineweight,
        mark(OverrideAttribute::Lineweight)
    );
    let _ = write!(
        out,
        "transparency: {:.3}{}",
        attributes.transparency,
        mark(OverrideAttribute::Transparency)
    );
    out
}

struct VpShowCommand;

impl CommandHandler for VpShowCommand {
    fn name(&self) -> &'static str {
        "vp_show"
    }

    fn usage(&self) -> &'static str {
        "vp_show <layer> [viewport]"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let mut run = || -> Result<CommandResponse, CommandResponse> {
            let layer = arg(request, 0, self.usage())?;
            let viewport = viewport_arg(request, 1, context.session)?;
            let store = context.session.overrides(layer, viewport)?;
            let dirty = if store.is_dirty() { "（有未提交修改）" } else { "" };
            Ok(CommandResponse::ok(format!(
                "图层 {layer} @ 视口 {viewport}{dirty}\n{}",
                describe(&store.resolved(), Some(&*store))
            )))
        };
        run().unwrap_or_else(|response| response)
    }
}

struct VpActiveCommand;

impl CommandHandler for VpActiveCommand {
    fn name(&self) -> &'static str {
        "vp_active"
    }

    fn usage(&self) -> &'static str {
        "vp_active [viewport]"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(raw) = request.args.first() else {
            return match context.session.active_viewport() {
                Some(viewport) => CommandResponse::ok(format!("活动视口: {viewport}")),
                None => CommandResponse::ok("没有活动视口"),
            };
        };
        let Some(viewport) = Handle::parse_hex(raw) else {
            return CommandResponse::err(format!("无效的视口句柄: {raw}"));
        };
        match context.session.set_active_viewport(viewport) {
            Ok(()) => CommandResponse::ok(format!("活动视口已切换为 {viewport}")),
            Err(err) => err.into(),
        }
    }
}

/// 视口内冻结/解冻图层（VIEWPORT 组码 331）。
struct VpFreezeCommand {
    freeze: bool,
}

impl CommandHandler for VpFreezeCommand {
    fn name(&self) -> &'static str {
        if self.freeze { "vp_freeze" } else { "vp_thaw" }
    }

    fn usage(&self) -> &'static str {
        if self.freeze {
            "vp_freeze <layer> [viewport]"
        } else {
            "vp_thaw <layer> [viewport]"
        }
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let mut run = || -> Result<CommandResponse, CommandResponse> {
            let layer = arg(request, 0, self.usage())?;
            let viewport = viewport_arg(request, 1, context.session)?;
            let document = context.session.document_mut();
            let changed = if self.freeze {
                document.freeze_layer_in_viewport(viewport, layer)
            } else {
                document.thaw_layer_in_viewport(viewport, layer)
            }
            .map_err(|err| CommandResponse::from(EngineError::from(err)))?;
            let state = if self.freeze { "冻结" } else { "解冻" };
            if changed {
                Ok(CommandResponse::ok(format!("图层 {layer} 已在视口 {viewport} 中{state}")))
            } else {
                Ok(CommandResponse::ok(format!("图层 {layer} 在视口 {viewport} 中已是{state}状态")))
            }
        };
        run().unwrap_or_else(|response| response)
    }
}

struct LayerStateCommand;

impl CommandHandler for LayerStateCommand {
    fn name(&self) -> &'static str {
        "layer_state"
    }

    fn usage(&self) -> &'static str {
        "layer_state <layer> <on|off|freeze|thaw|lock|unlock>"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let mut run = || -> Result<CommandResponse, CommandResponse> {
            let name = arg(request, 0, self.usage())?;
            let state = arg(request, 1, self.usage())?;
            let layer = context
                .session
                .document_mut()
                .layer_mut(name)
                .ok_or_else(|| CommandResponse::from(EngineError::LayerNotFound(name.to_string())))?;
            match state.to_ascii_lowercase().as_str() {
                "on" => layer.on(),
                "off" => layer.off(),
                "freeze" => layer.freeze(),
                "thaw" => layer.thaw(),
                "lock" => layer.lock(),
                "unlock" => layer.unlock(),
                other => {
                    return Err(CommandResponse::err(format!(
                        "未知的图层状态: {other}，用法: {}",
                        self.usage()
                    )));
                }
            }
            Ok(CommandResponse::ok(format!("图层 {name} 已设置为 {state}")))
        };
        run().unwrap_or_else(|response| response)
    }
}

struct LayerListCommand;

impl CommandHandler for LayerListCommand {
    fn name(&self) -> &'static str {
        "layer_list"
    }

    fn usage(&self) -> &'static str {
        "layer_list"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let document = context.session.document();
        let mut out = String::new();
        for layer in document.layers() {
            let viewports = document
                .overridden_viewports(layer.name())
                .map(|list| list.len())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{} [{}{}{}] color={} linetype={} overrides={}",
                layer.name(),
                if layer.is_on() { "on" } else { "off" },
                if layer.is_frozen() { ",frozen" } else { "" },
                if layer.is_locked() { ",locked" } else { "" },
                layer.color(),
                layer.linetype(),
                viewports
            );
        }
        CommandResponse::ok(out.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zlayer_core::document::{Document, DxfVersion};
    use zlayer_core::geometry::Point2;

    fn setup() -> (Session, Handle, Handle) {
        let mut document = Document::new(DxfVersion::R2018);
        document.add_layer("WALLS").unwrap();
        document.add_linetype("DASHED", "__ __").unwrap();
        let first = document.add_viewport(Point2::new(0.0, 0.0), 10.0, 10.0).unwrap();
        let second = document.add_viewport(Point2::new(20.0, 0.0), 10.0, 10.0).unwrap();
        (Session::with_document(document), first, second)
    }

    fn run(bus: &CommandBus, session: &mut Session, line: &str) -> CommandResponse {
        let request = CommandRequest::parse(line).expect("空命令");
        let mut context = CommandContext { session };
        bus.dispatch(&request, &mut context)
    }

    #[test]
    fn set_and_commit_through_commands() {
        let (mut session, first, second) = setup();
        let bus = CommandBus::new();

        assert!(run(&bus, &mut session, "vp_set WALLS color 3").success);
        assert!(run(&bus, &mut session, &format!("vp_set WALLS linetype dashed {second}")).success);
        assert_eq!(session.dirty_overrides().len(), 2);

        let response = run(&bus, &mut session, "vp_commit");
        assert!(response.success);
        assert!(session.dirty_overrides().is_empty());

        let attrs = session.effective_attributes("WALLS", first).unwrap();
        assert_eq!(attrs.color, 3);
        assert_eq!(attrs.linetype, "Continuous");
        let attrs = session.effective_attributes("WALLS", second).unwrap();
        assert_eq!(attrs.linetype, "DASHED");
    }

    #[test]
    fn invalid_values_are_reported() {
        let (mut session, _, _) = setup();
        let bus = CommandBus::new();
        assert!(!run(&bus, &mut session, "vp_set WALLS lineweight 7").success);
        assert!(!run(&bus, &mut session, "vp_set WALLS transparency abc").success);
        assert!(!run(&bus, &mut session, "vp_set WALLS width 3").success);
        assert!(!run(&bus, &mut session, "vp_set MISSING color 3").success);
        assert!(!run(&bus, &mut session, "vp_set WALLS color 3 FFFF").success);
        assert!(!run(&bus, &mut session, "vp_set WALLS").success);
        assert!(session.dirty_overrides().is_empty());
    }

    #[test]
    fn discard_and_show_reflect_staged_state() {
        let (mut session, _, _) = setup();
        let bus = CommandBus::new();
        run(&bus, &mut session, "vp_set WALLS rgb #102030");
        run(&bus, &mut session, "vp_set WALLS lineweight default");

        let shown = run(&bus, &mut session, "vp_show WALLS");
        let message = shown.message.unwrap();
        assert!(message.contains("rgb: #102030 *"), "{message}");
        assert!(message.contains("lineweight: -3 *"), "{message}");
        assert!(message.contains("color: 7\n"), "{message}");

        assert!(run(&bus, &mut session, "vp_discard WALLS rgb").success);
        assert!(run(&bus, &mut session, "vp_discard WALLS all").success);
        let shown = run(&bus, &mut session, "vp_show WALLS").message.unwrap();
        assert!(!shown.contains('*'), "{shown}");
    }

    #[test]
    fn layer_state_and_list() {
        let (mut session, _, _) = setup();
        let bus = CommandBus::new();
        assert!(run(&bus, &mut session, "layer_state WALLS off").success);
        assert!(run(&bus, &mut session, "layer_state WALLS lock").success);
        assert!(!run(&bus, &mut session, "layer_state WALLS sideways").success);

        let layer = session.document().layer("WALLS").unwrap();
        assert!(!layer.is_on());
        assert!(layer.is_locked());

        let listing = run(&bus, &mut session, "layer_list").message.unwrap();
        assert!(listing.contains("WALLS [off,locked]"), "{listing}");
    }

    #[test]
    fn viewport_freeze_and_active_switch() {
        let (mut session, first, second) = setup();
        let bus = CommandBus::new();
        assert!(run(&bus, &mut session, &format!("vp_active {second}")).success);
        assert_eq!(session.active_viewport(), Some(second));

        assert!(run(&bus, &mut session, "vp_freeze WALLS").success);
        let walls = session.document().layer("WALLS").unwrap().handle();
        assert!(session.document().viewport(second).unwrap().is_layer_frozen(walls));
        assert!(!session.document().viewport(first).unwrap().is_layer_frozen(walls));

        assert!(run(&bus, &mut session, "vp_thaw WALLS").success);
        assert!(!session.document().viewport(second).unwrap().is_layer_frozen(walls));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let (mut session, _, _) = setup();
        let bus = CommandBus::new();
        let response = run(&bus, &mut session, "explode");
        assert!(!response.success);
        assert!(bus.usage("vp_set").is_some());
    }
}
