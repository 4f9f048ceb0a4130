use anyhow::bail;
use omr_config::AppConfig;
use omr_core::score::{Entity, PartId, Score, SystemId};
use omr_engine::command::{CommandBus, CommandContext, CommandRequest};
use tracing::info;

use crate::loader::{SheetSource, load_session};

/// 装配、编号并打印每页摘要。
pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let loaded = load_session(config)?;
    let mut session = loaded.session;
    let pending = session.pending_symbols();

    println!("OMR 乐谱装配");
    match &loaded.source {
        SheetSource::Json(path) => println!("已从 JSON 加载乐谱：{}", path.display()),
        SheetSource::Demo => {
            if let Some(demo) = &loaded.demo {
                println!(
                    "已构建内置演示乐谱：{} 个小节，{} 个符号",
                    demo.measures.len(),
                    demo.symbols
                );
            }
        }
    }
    println!("待装配符号 {pending} 个");

    let bus = CommandBus::new();
    let mut commands: Vec<&str> = bus.available_commands().copied().collect();
    commands.sort_unstable();
    println!("支持的命令: {}", commands.join(", "));

    let mut context = CommandContext {
        session: &mut session,
    };
    for name in ["assemble", "number_measures"] {
        dispatch_cli_command(&bus, name, &mut context)?;
    }

    let score = session.score();
    info!(nodes = score.node_count(), "装配与编号完成");
    for page in score.pages() {
        let Some(data) = score.page(page) else {
            continue;
        };
        let delta = data
            .delta_measure_id
            .map(|delta| delta.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "第 {} 页：系统 {} 个，跨页偏移 {}",
            data.number,
            score.systems(page).count(),
            delta
        );
        for system in score.systems(page) {
            print_system(score, system);
        }
    }

    let anomalies = session.anomalies();
    if anomalies.is_empty() {
        println!("编号异常：无");
    } else {
        println!("编号异常 {} 处：", anomalies.len());
        for anomaly in anomalies {
            println!(
                "  - 页面节点 #{} 小节节点 #{}: {:?}",
                anomaly.page.get(),
                anomaly.measure.get(),
                anomaly.reason
            );
        }
    }
    Ok(())
}

fn print_system(score: &Score, system: SystemId) {
    let Some(data) = score.system(system) else {
        return;
    };
    println!("  系统 {}：", data.number);
    for part in score.parts(system) {
        print_part(score, part);
    }
}

fn print_part(score: &Score, part: PartId) {
    let Some(data) = score.part(part) else {
        return;
    };
    let name = data
        .name
        .as_deref()
        .map(|name| format!(" ({name})"))
        .unwrap_or_default();
    println!("    声部 {}{}：", data.number, name);

    for measure in score.measures(part) {
        let Some(data) = score.measure(measure) else {
            continue;
        };
        let id = data
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "?".to_string());
        let kinds: Vec<&str> = score
            .entities(measure)
            .map(|(_, entity)| entity.kind_name())
            .collect();
        let kinds = if kinds.is_empty() {
            "无".to_string()
        } else {
            kinds.join(", ")
        };
        println!(
            "      小节 {} [{:.1}, {:.1}) 实体: {}",
            id, data.left, data.right, kinds
        );
    }

    for (_, entity) in score.part_directions(part) {
        match entity {
            Entity::Wedge(wedge) => println!(
                "      声部指示: {:?} [{:.1}, {:.1}]",
                wedge.kind, wedge.left, wedge.right
            ),
            other => println!("      声部指示: {}", other.kind_name()),
        }
    }
}

fn dispatch_cli_command(
    bus: &CommandBus,
    name: &str,
    context: &mut CommandContext<'_>,
) -> anyhow::Result<()> {
    let response = bus.dispatch(&CommandRequest::named(name), context);
    if response.success {
        if let Some(message) = response.message {
            println!("[命令] {message}");
        }
        Ok(())
    } else {
        bail!(
            "命令 {name} 执行失败: {}",
            response.message.unwrap_or_else(|| "未知错误".to_string())
        )
    }
}
