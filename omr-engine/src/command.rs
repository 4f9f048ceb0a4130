use std::collections::HashMap;

use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
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

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
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
        bus.register(AssembleCommand);
        bus.register(NumberMeasuresCommand);
        bus.register(ReconcileDeltasCommand);
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
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

struct AssembleCommand;

impl CommandHandler for AssembleCommand {
    fn name(&self) -> &'static str {
        "assemble"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        match context.session.assemble_pending() {
            Ok(report) => CommandResponse::ok(format!(
                "已装配 {} 个实体（合并 {}，跳过 {}，未定位 {}，无和弦 {}，拒绝 {}，失败 {}）",
                report.created,
                report.merged,
                report.irrelevant,
                report.unresolved,
                report.orphaned,
                report.rejected,
                report.failed
            )),
            Err(err) => CommandResponse::err(format!("装配失败: {err}")),
        }
    }
}

struct NumberMeasuresCommand;

impl CommandHandler for NumberMeasuresCommand {
    fn name(&self) -> &'static str {
        "number_measures"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let anomalies = context.session.number_measures();
        CommandResponse::ok(format!("小节编号完成，异常 {anomalies} 处"))
    }
}

struct ReconcileDeltasCommand;

impl CommandHandler for ReconcileDeltasCommand {
    fn name(&self) -> &'static str {
        "reconcile_deltas"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let total = context.session.reconcile_deltas();
        CommandResponse::ok(format!("跨页偏移已更新，共 {total} 列小节"))
    }
}
