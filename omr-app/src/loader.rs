use std::path::PathBuf;

use anyhow::Context;
use omr_config::AppConfig;
use omr_engine::assembler::AssemblyOptions;
use omr_engine::numbering::NumberingOptions;
use omr_engine::session::{DemoScore, Session};
use omr_io::{JsonSheetFacade, SheetLoader};
use tracing::info;

/// 乐谱来源，便于摘要呈现加载信息。
#[derive(Debug, Clone)]
pub enum SheetSource {
    Json(PathBuf),
    Demo,
}

pub struct LoadedSession {
    pub session: Session,
    pub source: SheetSource,
    pub demo: Option<DemoScore>,
}

/// 按配置构造会话：指定了 JSON 描述则读取它，否则使用内置演示乐谱。
pub fn load_session(config: &AppConfig) -> anyhow::Result<LoadedSession> {
    let assembly = AssemblyOptions {
        gap_policy: config.assembly.staff_gap_policy,
        fermata_fallback: config.assembly.fermata_fallback,
    };
    let numbering = NumberingOptions {
        honor_specific_ids: config.numbering.honor_specific_ids,
        reconcile_deltas: config.numbering.reconcile_deltas,
    };
    let mut session = Session::with_options(assembly, numbering);

    if let Some(path) = &config.input.sheet {
        let sheet = JsonSheetFacade::new()
            .load(path)
            .with_context(|| format!("无法加载乐谱描述 {}", path.display()))?;
        info!(path = %path.display(), symbols = sheet.symbol_count(), "从 JSON 加载乐谱成功");
        session.load(sheet.score, sheet.symbols);
        return Ok(LoadedSession {
            session,
            source: SheetSource::Json(path.clone()),
            demo: None,
        });
    }

    let demo = session.populate_demo().context("构建演示乐谱失败")?;
    Ok(LoadedSession {
        session,
        source: SheetSource::Demo,
        demo: Some(demo),
    })
}
