use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use omr_core::score::{PartId, Score, SystemId};
use omr_io::LoadedSheet;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoldenSheet {
    pages: Vec<GoldenPage>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct GoldenPage {
    interline: f64,
    symbols: usize,
    systems: Vec<GoldenSystem>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct GoldenSystem {
    bounds: [f64; 4],
    parts: Vec<GoldenPart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct GoldenPart {
    name: Option<String>,
    /// 原点 x、原点 y、宽、高
    staves: Vec<[f64; 4]>,
    measures: Vec<GoldenMeasure>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct GoldenMeasure {
    local_index: usize,
    left: f64,
    right: f64,
    id: Option<u32>,
    slots: usize,
    chords: usize,
}

impl GoldenSheet {
    fn from_sheet(sheet: &LoadedSheet) -> Self {
        let score = &sheet.score;
        let pages = sheet
            .symbols
            .iter()
            .map(|(page, symbols)| GoldenPage {
                interline: score.page(*page).expect("页面存在").scale.interline(),
                symbols: symbols.len(),
                systems: score
                    .systems(*page)
                    .map(|system| golden_system(score, system))
                    .collect(),
            })
            .collect();
        Self { pages }
    }
}

fn golden_system(score: &Score, system: SystemId) -> GoldenSystem {
    let bounds = score.system(system).expect("系统存在").bounds();
    GoldenSystem {
        bounds: [
            bounds.min().x(),
            bounds.min().y(),
            bounds.width(),
            bounds.height(),
        ],
        parts: score
            .parts(system)
            .map(|part| golden_part(score, part))
            .collect(),
    }
}

fn golden_part(score: &Score, part: PartId) -> GoldenPart {
    GoldenPart {
        name: score.part(part).and_then(|data| data.name.clone()),
        staves: score
            .staves(part)
            .filter_map(|staff| score.staff(staff))
            .map(|staff| [staff.origin().x(), staff.origin().y(), staff.width, staff.height])
            .collect(),
        measures: score
            .measures(part)
            .map(|measure| {
                let data = score.measure(measure).expect("小节存在");
                GoldenMeasure {
                    local_index: data.local_index,
                    left: data.left,
                    right: data.right,
                    id: data.id,
                    slots: data.slots().len(),
                    chords: score.chords(measure).count(),
                }
            })
            .collect(),
    }
}

pub fn assert_golden(name: &str, sheet: &LoadedSheet) {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(format!("{name}.golden.json"));

    let content = fs::read_to_string(&path).expect("读取 golden 文件失败");
    let expected: GoldenSheet = serde_json::from_str(&content).expect("解析 golden 文件失败");
    let actual = GoldenSheet::from_sheet(sheet);
    if actual != expected {
        let rendered = serde_json::to_string_pretty(&actual).unwrap_or_default();
        panic!("{name} 与 golden 不一致，实际结果：\n{rendered}");
    }
}
