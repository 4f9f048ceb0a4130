//! 版面骨架与识别符号的 JSON 描述。
//!
//! 版面分析和符号识别位于本仓库之外，这里只负责把它们的输出读入乐谱树。

use std::fs;
use std::path::{Path, PathBuf};

use omr_core::errors::ScoreError;
use omr_core::geometry::{PageRect, PixelRect, Scale, SystemPoint};
use omr_core::score::{ChordId, PageId, PartId, Score, StaffId};
use omr_core::symbol::{Shape, Symbol};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse sheet description: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("invalid sheet structure: {0}")]
    InvalidSheet(String),
    #[error(transparent)]
    Score(#[from] ScoreError),
}

/// 读入后的乐谱骨架以及按页分组、尚未装配的符号。
#[derive(Debug, Clone)]
pub struct LoadedSheet {
    pub score: Score,
    pub symbols: Vec<(PageId, Vec<Symbol>)>,
}

impl LoadedSheet {
    pub fn symbol_count(&self) -> usize {
        self.symbols.iter().map(|(_, symbols)| symbols.len()).sum()
    }
}

pub trait SheetLoader {
    fn load(&self, path: &Path) -> Result<LoadedSheet, IoError>;
}

pub struct JsonSheetFacade;

impl JsonSheetFacade {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_str(&self, data: &str) -> Result<LoadedSheet, IoError> {
        let description: SheetDescription = serde_json::from_str(data)?;
        build(description)
    }
}

impl Default for JsonSheetFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetLoader for JsonSheetFacade {
    fn load(&self, path: &Path) -> Result<LoadedSheet, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let sheet = self.parse_str(&data)?;
        debug!(
            path = %path.display(),
            pages = sheet.symbols.len(),
            symbols = sheet.symbol_count(),
            "已读取乐谱描述"
        );
        Ok(sheet)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SheetDescription {
    pages: Vec<PageDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageDescription {
    /// 行间距（像素）。
    interline: f64,
    #[serde(default)]
    systems: Vec<SystemDescription>,
    #[serde(default)]
    symbols: Vec<SymbolDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SystemDescription {
    /// 页面坐标 `[x, y, width, height]`。
    bounds: [f64; 4],
    #[serde(default)]
    parts: Vec<PartDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartDescription {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    staves: Vec<StaffDescription>,
    #[serde(default)]
    measures: Vec<MeasureDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaffDescription {
    /// 系统局部坐标。
    origin: [f64; 2],
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MeasureDescription {
    left: f64,
    right: f64,
    /// 显式指定的小节编号。
    #[serde(default)]
    id: Option<u32>,
    #[serde(default)]
    chords: Vec<ChordDescription>,
    #[serde(default)]
    slots: Vec<SlotDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChordDescription {
    /// 符头位置，系统局部坐标。
    head: [f64; 2],
    /// 声部内谱表序号，从 0 开始。
    #[serde(default)]
    staff: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SlotDescription {
    x: f64,
    /// 本小节 `chords` 中的序号。
    #[serde(default)]
    chords: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SymbolDescription {
    id: u64,
    shape: Shape,
    /// 像素坐标 `[x, y, width, height]`。
    bounds: [f64; 4],
    #[serde(default = "default_well_known")]
    well_known: bool,
}

fn default_well_known() -> bool {
    true
}

fn build(description: SheetDescription) -> Result<LoadedSheet, IoError> {
    let mut score = Score::new();
    let mut symbols = Vec::with_capacity(description.pages.len());

    for (page_index, page) in description.pages.into_iter().enumerate() {
        let scale = Scale::from_interline(page.interline).ok_or_else(|| {
            IoError::InvalidSheet(format!(
                "第 {} 页的行间距 {} 无效",
                page_index + 1,
                page.interline
            ))
        })?;
        let page_id = score.add_page(scale);

        for system in page.systems {
            let [x, y, width, height] = system.bounds;
            let system_id = score.add_system(page_id, PageRect::new(x, y, width, height))?;
            for part in system.parts {
                let part_id = score.add_part(system_id, part.name)?;
                let mut staves: Vec<StaffId> = Vec::with_capacity(part.staves.len());
                for staff in part.staves {
                    let [ox, oy] = staff.origin;
                    staves.push(score.add_staff(
                        part_id,
                        SystemPoint::new(ox, oy),
                        staff.width,
                        staff.height,
                    )?);
                }
                for measure in part.measures {
                    build_measure(&mut score, part_id, &staves, measure)?;
                }
            }
        }

        let page_symbols = page
            .symbols
            .into_iter()
            .map(|symbol| {
                let [x, y, width, height] = symbol.bounds;
                Symbol {
                    id: symbol.id,
                    shape: symbol.shape,
                    bounds: PixelRect::new(x, y, width, height),
                    well_known: symbol.well_known,
                }
            })
            .collect();
        symbols.push((page_id, page_symbols));
    }

    Ok(LoadedSheet { score, symbols })
}

fn build_measure(
    score: &mut Score,
    part: PartId,
    staves: &[StaffId],
    measure: MeasureDescription,
) -> Result<(), IoError> {
    let non_empty = measure.left < measure.right;
    if !non_empty {
        return Err(IoError::InvalidSheet(format!(
            "小节区间 [{}, {}) 为空",
            measure.left, measure.right
        )));
    }
    let measure_id = score.add_measure(part, measure.left, measure.right)?;
    if let Some(id) = measure.id {
        if let Some(data) = score.measure_mut(measure_id) {
            data.set_specific_id(id);
        }
    }

    let mut chords: Vec<ChordId> = Vec::with_capacity(measure.chords.len());
    for chord in measure.chords {
        let staff = match chord.staff {
            Some(index) => Some(*staves.get(index).ok_or_else(|| {
                IoError::InvalidSheet(format!("和弦引用了不存在的谱表 {index}"))
            })?),
            None => None,
        };
        let [hx, hy] = chord.head;
        chords.push(score.add_chord(measure_id, SystemPoint::new(hx, hy), staff)?);
    }

    for slot in measure.slots {
        let members = slot
            .chords
            .iter()
            .map(|&index| {
                chords.get(index).copied().ok_or_else(|| {
                    IoError::InvalidSheet(format!("时间槽引用了不存在的和弦 {index}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        score.add_slot(measure_id, slot.x, &members)?;
    }
    Ok(())
}
