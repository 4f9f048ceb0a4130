//! 把识别层交付的符号装配进乐谱树。
//!
//! 每个符号依次经过：相关性过滤 → 计算锚点 → 空间定位 → 按形状构造实体。
//! 定位失败、找不到相邻和弦等输入缺陷只计入报告，不会中断整页装配。

use omr_core::geometry::{
    INTERLINE_UNITS, PixelPoint, StaffRect, SystemPoint, SystemRect, pixel_rect_to_page,
};
use omr_core::resolver::{Resolution, Resolver, StaffGapPolicy};
use omr_core::score::{
    Barline, ChordId, ChordMark, Clef, Entity, EntityId, KeySignature, MeasureId, PageId, Pedal,
    Score, StaffId, SymbolRef, TimeSignature, Wedge, WedgeKind,
};
use omr_core::symbol::{Shape, Symbol};
use tracing::{debug, info, warn};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyOptions {
    pub gap_policy: StaffGapPolicy,
    /// 延长号首选一侧没有和弦时改用另一侧；其他和弦记号不受影响。
    pub fermata_fallback: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            gap_policy: StaffGapPolicy::Midpoint,
            fermata_fallback: true,
        }
    }
}

/// 单次装配的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub created: usize,
    /// 并入已有实体（拍号的另一半、调号的后续升降号）。
    pub merged: usize,
    /// 不可信、兜底类别或没有对应构造规则的符号。
    pub irrelevant: usize,
    /// 未落在任何系统/谱表/小节内。
    pub unresolved: usize,
    /// 需要关联和弦却找不到。
    pub orphaned: usize,
    /// 与已有实体冲突或不满足构造条件。
    pub rejected: usize,
    /// 构造过程中遇到树结构异常。
    pub failed: usize,
}

impl AssemblyReport {
    pub fn merge(&mut self, other: &AssemblyReport) {
        self.created += other.created;
        self.merged += other.merged;
        self.irrelevant += other.irrelevant;
        self.unresolved += other.unresolved;
        self.orphaned += other.orphaned;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.created
            + self.merged
            + self.irrelevant
            + self.unresolved
            + self.orphaned
            + self.rejected
            + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translated {
    Created(EntityId),
    /// 符号并入了已有实体。
    Merged(EntityId),
    /// 没有可关联的和弦，符号被丢弃。
    NoChord,
    Rejected(&'static str),
}

/// 某一类符号的构造规则。
pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_relevant(&self, symbol: &Symbol) -> bool;

    /// 用于定位的像素锚点，默认取包围盒中心。
    fn anchor(&self, symbol: &Symbol) -> PixelPoint {
        symbol.bounds.center()
    }

    fn translate(
        &self,
        score: &mut Score,
        options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError>;
}

pub struct Assembler {
    translators: Vec<Box<dyn Translator>>,
    options: AssemblyOptions,
}

impl Assembler {
    /// 注册全部内置构造规则。
    pub fn new(options: AssemblyOptions) -> Self {
        let mut assembler = Self {
            translators: Vec::new(),
            options,
        };
        assembler.register(ClefTranslator);
        assembler.register(TimeTranslator);
        assembler.register(KeyTranslator);
        assembler.register(FermataTranslator);
        assembler.register(ArpeggiateTranslator);
        assembler.register(PedalTranslator);
        assembler.register(WedgeTranslator);
        assembler.register(BarlineTranslator);
        assembler.register(ChordMarkTranslator);
        assembler
    }

    pub fn register<T: Translator + 'static>(&mut self, translator: T) {
        self.translators.push(Box::new(translator));
    }

    #[inline]
    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    pub fn translator_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.translators.iter().map(|translator| translator.name())
    }

    pub fn assemble(
        &self,
        score: &mut Score,
        page: PageId,
        symbols: &[Symbol],
    ) -> Result<AssemblyReport, EngineError> {
        if score.page(page).is_none() {
            return Err(EngineError::PageNotFound(page.get()));
        }

        let mut report = AssemblyReport::default();
        for symbol in symbols {
            self.assemble_one(score, page, symbol, &mut report);
        }

        info!(
            page = page.get(),
            created = report.created,
            irrelevant = report.irrelevant,
            unresolved = report.unresolved,
            orphaned = report.orphaned,
            merged = report.merged,
            rejected = report.rejected,
            failed = report.failed,
            "页面装配完成"
        );
        Ok(report)
    }

    fn assemble_one(
        &self,
        score: &mut Score,
        page: PageId,
        symbol: &Symbol,
        report: &mut AssemblyReport,
    ) {
        if !symbol.is_assemblable() {
            report.irrelevant += 1;
            return;
        }
        let Some(translator) = self.translators.iter().find(|t| t.is_relevant(symbol)) else {
            report.irrelevant += 1;
            return;
        };

        let anchor = translator.anchor(symbol);
        let resolution = Resolver::new(score)
            .with_policy(self.options.gap_policy)
            .resolve(page, anchor);
        let Some(resolution) = resolution else {
            debug!(symbol = symbol.id, shape = ?symbol.shape, point = %anchor, "符号未能定位，已跳过");
            report.unresolved += 1;
            return;
        };

        match translator.translate(score, &self.options, symbol, &resolution) {
            Ok(Translated::Created(entity)) => {
                debug!(
                    symbol = symbol.id,
                    entity = entity.get(),
                    translator = translator.name(),
                    measure = resolution.measure.get(),
                    "已创建实体"
                );
                report.created += 1;
            }
            Ok(Translated::Merged(entity)) => {
                debug!(symbol = symbol.id, entity = entity.get(), "符号已并入已有实体");
                report.merged += 1;
            }
            Ok(Translated::NoChord) => {
                debug!(symbol = symbol.id, shape = ?symbol.shape, "没有相邻和弦，已丢弃");
                report.orphaned += 1;
            }
            Ok(Translated::Rejected(reason)) => {
                debug!(symbol = symbol.id, shape = ?symbol.shape, reason, "符号不满足构造条件");
                report.rejected += 1;
            }
            Err(err) => {
                warn!(symbol = symbol.id, translator = translator.name(), error = %err, "符号装配失败");
                report.failed += 1;
            }
        }
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(AssemblyOptions::default())
    }
}

/// 拍号距小节左边界的最小距离，一个行间距。
const TIME_MIN_OFFSET: f64 = INTERLINE_UNITS;
/// 拍号两半之间的最大距离，四个行间距。
const TIME_MAX_DISTANCE: f64 = 4.0 * INTERLINE_UNITS;
/// 调号符号查找邻居时的外扩距离，一个行间距。
const KEY_MARGIN: f64 = INTERLINE_UNITS;

#[inline]
fn symbol_ref(symbol: &Symbol) -> SymbolRef {
    SymbolRef {
        id: symbol.id,
        shape: symbol.shape,
    }
}

/// 符号包围盒换算到所在系统的局部空间。
fn system_bounds(
    score: &Score,
    at: &Resolution,
    symbol: &Symbol,
) -> Result<SystemRect, EngineError> {
    let scale = score
        .page(at.page)
        .map(|page| page.scale)
        .ok_or(EngineError::PageNotFound(at.page.get()))?;
    let frame = score
        .system(at.system)
        .map(|system| *system.frame())
        .ok_or_else(|| EngineError::TreeInconsistency(format!("系统 #{} 不存在", at.system.get())))?;
    Ok(frame.rect_to_inner(&pixel_rect_to_page(&symbol.bounds, scale)))
}

fn staff_bounds(
    score: &Score,
    at: &Resolution,
    symbol: &Symbol,
) -> Result<StaffRect, EngineError> {
    let bounds = system_bounds(score, at, symbol)?;
    let frame = score
        .staff(at.staff)
        .map(|staff| *staff.frame())
        .ok_or_else(|| EngineError::TreeInconsistency(format!("谱表 #{} 不存在", at.staff.get())))?;
    Ok(frame.rect_to_inner(&bounds))
}

fn prefer_side(
    above: Option<ChordId>,
    below: Option<ChordId>,
    want_above: bool,
    fallback: bool,
) -> Option<ChordId> {
    let (preferred, other) = if want_above { (above, below) } else { (below, above) };
    if fallback { preferred.or(other) } else { preferred }
}

/// 力度、踏板等事件记号共用的和弦查找：取不晚于记号的最后一个时间槽（没有则取最近者），
/// 记号位于谱表中线下方时关联上方和弦，否则关联下方和弦。该侧没有和弦即视为无和弦。
fn event_chord(
    score: &Score,
    measure: MeasureId,
    staff: StaffId,
    point: SystemPoint,
) -> Result<Option<ChordId>, EngineError> {
    let data = score
        .measure(measure)
        .ok_or_else(|| EngineError::TreeInconsistency(format!("小节 #{} 不存在", measure.get())))?;
    let middle = score
        .staff(staff)
        .map(|staff| staff.middle())
        .ok_or_else(|| EngineError::TreeInconsistency(format!("谱表 #{} 不存在", staff.get())))?;

    let Some(slot) = data
        .preceding_slot(point.x())
        .or_else(|| data.closest_slot(point.x()))
    else {
        return Ok(None);
    };
    let chord = if middle <= point.y() {
        slot.chord_above(point)
    } else {
        slot.chord_below(point)
    };
    Ok(chord)
}

struct ClefTranslator;

impl Translator for ClefTranslator {
    fn name(&self) -> &'static str {
        "clef"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.clef_kind().is_some()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let kind = symbol
            .shape
            .clef_kind()
            .ok_or_else(|| EngineError::TreeInconsistency(format!("{:?} 不是谱号", symbol.shape)))?;
        let clef = Clef {
            kind,
            staff: at.staff,
            location: at.staff_point,
            symbol: symbol_ref(symbol),
        };
        let entity = score.add_entity(at.measure, Entity::Clef(clef))?;
        Ok(Translated::Created(entity))
    }
}

struct TimeTranslator;

impl Translator for TimeTranslator {
    fn name(&self) -> &'static str {
        "time"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.is_time()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let left = score
            .measure(at.measure)
            .map(|measure| measure.left)
            .ok_or_else(|| EngineError::TreeInconsistency(format!("小节 #{} 不存在", at.measure.get())))?;
        let half_height = score
            .staff(at.staff)
            .map(|staff| staff.height * 0.5)
            .ok_or_else(|| EngineError::TreeInconsistency(format!("谱表 #{} 不存在", at.staff.get())))?;
        if at.staff_point.x() - left < TIME_MIN_OFFSET {
            return Ok(Translated::Rejected("拍号离小节起点过近"));
        }

        let existing = score
            .time_signature(at.measure, at.staff)
            .map(|(id, time)| (id, time.location));

        if let Some((numerator, denominator)) = symbol.shape.time_rational() {
            if existing.is_some() {
                return Ok(Translated::Rejected("同一小节同一谱表已有拍号"));
            }
            let time = TimeSignature {
                staff: at.staff,
                numerator: Some(numerator),
                denominator: Some(denominator),
                location: at.staff_point,
                symbol: symbol_ref(symbol),
                extra: Vec::new(),
            };
            let entity = score.add_entity(at.measure, Entity::TimeSignature(time))?;
            return Ok(Translated::Created(entity));
        }

        let number = symbol
            .shape
            .time_number()
            .ok_or_else(|| EngineError::TreeInconsistency(format!("{:?} 不是拍号", symbol.shape)))?;
        // 谱表上半部分的数字是分子，下半部分是分母
        let upper = at.staff_point.y() < half_height;

        let Some((entity, location)) = existing else {
            let (numerator, denominator) = if upper {
                (Some(number), None)
            } else {
                (None, Some(number))
            };
            let time = TimeSignature {
                staff: at.staff,
                numerator,
                denominator,
                location: at.staff_point,
                symbol: symbol_ref(symbol),
                extra: Vec::new(),
            };
            let entity = score.add_entity(at.measure, Entity::TimeSignature(time))?;
            return Ok(Translated::Created(entity));
        };

        if location.distance(at.staff_point) > TIME_MAX_DISTANCE {
            return Ok(Translated::Rejected("拍号数字离已有部分过远"));
        }
        let Some(Entity::TimeSignature(time)) = score.entity_mut(entity) else {
            return Err(EngineError::TreeInconsistency(format!(
                "实体 #{} 不是拍号",
                entity.get()
            )));
        };
        let half = if upper {
            &mut time.numerator
        } else {
            &mut time.denominator
        };
        if half.is_some() {
            return Ok(Translated::Rejected("拍号该位置已有数字"));
        }
        *half = Some(number);
        time.extra.push(symbol_ref(symbol));
        Ok(Translated::Merged(entity))
    }
}

/// 升降号：附近没有和弦时视为调号的一部分，与左侧相邻的同向调号合并。
struct KeyTranslator;

impl Translator for KeyTranslator {
    fn name(&self) -> &'static str {
        "key"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.key_step().is_some()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let step = symbol
            .shape
            .key_step()
            .ok_or_else(|| EngineError::TreeInconsistency(format!("{:?} 不是升降号", symbol.shape)))?;
        let bounds = staff_bounds(score, at, symbol)?;
        let fat = bounds.inflate(KEY_MARGIN, KEY_MARGIN);
        let frame = score
            .staff(at.staff)
            .map(|staff| *staff.frame())
            .ok_or_else(|| EngineError::TreeInconsistency(format!("谱表 #{} 不存在", at.staff.get())))?;

        // 紧挨着音符的升降号属于该音符，不是调号
        let near_note = score
            .chords(at.measure)
            .filter_map(|chord| score.chord(chord))
            .any(|chord| fat.contains(frame.to_inner(chord.head)));
        if near_note {
            return Ok(Translated::Rejected("升降号紧邻音符"));
        }

        let mut target = None;
        for (id, key) in score.key_signatures(at.measure, at.staff) {
            if key.bounds.center().x() > at.staff_point.x() {
                break;
            }
            if !fat.intersects(&key.bounds) {
                continue;
            }
            if key.key.signum() == -step {
                return Ok(Translated::Rejected("升号与降号不能混在同一调号中"));
            }
            target = Some(id);
            break;
        }

        let Some(entity) = target else {
            let key = KeySignature {
                staff: at.staff,
                key: step,
                bounds,
                symbol: symbol_ref(symbol),
                extra: Vec::new(),
            };
            let entity = score.add_entity(at.measure, Entity::KeySignature(key))?;
            return Ok(Translated::Created(entity));
        };

        let Some(Entity::KeySignature(key)) = score.entity_mut(entity) else {
            return Err(EngineError::TreeInconsistency(format!(
                "实体 #{} 不是调号",
                entity.get()
            )));
        };
        key.key += step;
        key.bounds.include_rect(&bounds);
        key.extra.push(symbol_ref(symbol));
        Ok(Translated::Merged(entity))
    }
}

struct FermataTranslator;

impl Translator for FermataTranslator {
    fn name(&self) -> &'static str {
        "fermata"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.is_fermata()
    }

    fn translate(
        &self,
        score: &mut Score,
        options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let point = at.system_point;
        let chord = score
            .closest_slot(at.measure, point.x())
            .and_then(|slot| {
                // 正置延长号写在和弦上方，关联其下方的和弦；倒置则相反
                let want_above = symbol.shape == Shape::FermataBelow;
                prefer_side(
                    slot.chord_above(point),
                    slot.chord_below(point),
                    want_above,
                    options.fermata_fallback,
                )
            });
        let Some(chord) = chord else {
            return Ok(Translated::NoChord);
        };
        let mark = ChordMark {
            chord,
            location: point,
            symbol: symbol_ref(symbol),
        };
        let entity = score.add_entity(at.measure, Entity::Fermata(mark))?;
        Ok(Translated::Created(entity))
    }
}

/// 琶音记号写在和弦左侧：取其后的第一个时间槽，关联纵向最近的和弦。
struct ArpeggiateTranslator;

impl Translator for ArpeggiateTranslator {
    fn name(&self) -> &'static str {
        "arpeggiate"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape == Shape::Arpeggiato
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let point = at.system_point;
        let chord = score.measure(at.measure).and_then(|measure| {
            measure
                .following_slot(point.x())
                .or_else(|| measure.closest_slot(point.x()))
                .and_then(|slot| slot.chord_nearest(point))
        });
        let Some(chord) = chord else {
            return Ok(Translated::NoChord);
        };
        let mark = ChordMark {
            chord,
            location: point,
            symbol: symbol_ref(symbol),
        };
        let entity = score.add_entity(at.measure, Entity::Arpeggiate(mark))?;
        Ok(Translated::Created(entity))
    }
}

struct PedalTranslator;

impl Translator for PedalTranslator {
    fn name(&self) -> &'static str {
        "pedal"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.is_pedal()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let point = at.system_point;
        let Some(chord) = event_chord(score, at.measure, at.staff, point)? else {
            return Ok(Translated::NoChord);
        };
        let pedal = Pedal {
            start: symbol.shape == Shape::PedalMark,
            mark: ChordMark {
                chord,
                location: point,
                symbol: symbol_ref(symbol),
            },
        };
        let entity = score.add_entity(at.measure, Entity::Pedal(pedal))?;
        Ok(Translated::Created(entity))
    }
}

struct WedgeTranslator;

impl Translator for WedgeTranslator {
    fn name(&self) -> &'static str {
        "wedge"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.is_wedge()
    }

    fn anchor(&self, symbol: &Symbol) -> PixelPoint {
        symbol.bounds.left_middle()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let right = system_bounds(score, at, symbol)?.max().x();

        let kind = if symbol.shape == Shape::Crescendo {
            WedgeKind::Crescendo
        } else {
            WedgeKind::Decrescendo
        };
        let wedge = Wedge {
            kind,
            staff: at.staff,
            left: at.system_point.x(),
            right,
            location: at.system_point,
            symbol: symbol_ref(symbol),
        };
        let entity = score.add_part_direction(at.part, Entity::Wedge(wedge))?;
        Ok(Translated::Created(entity))
    }
}

struct BarlineTranslator;

impl Translator for BarlineTranslator {
    fn name(&self) -> &'static str {
        "barline"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        symbol.shape.barline_style().is_some()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let style = symbol
            .shape
            .barline_style()
            .ok_or_else(|| EngineError::TreeInconsistency(format!("{:?} 不是小节线", symbol.shape)))?;
        let data = score
            .measure(at.measure)
            .ok_or_else(|| EngineError::TreeInconsistency(format!("小节 #{} 不存在", at.measure.get())))?;

        // 小节线属于它所结束的小节：靠近左边界时归前一小节
        let x = at.staff_point.x();
        let closes_previous = (x - data.left) < (data.right - x);
        let target = if closes_previous {
            score.previous_in_part(at.measure).unwrap_or(at.measure)
        } else {
            at.measure
        };

        let barline = Barline {
            style,
            staff: at.staff,
            location: at.system_point,
            symbol: symbol_ref(symbol),
        };
        let entity = score.add_entity(target, Entity::Barline(barline))?;
        Ok(Translated::Created(entity))
    }
}

/// 力度、反复记号、装饰音与奏法记号。
struct ChordMarkTranslator;

impl ChordMarkTranslator {
    fn wrap(shape: Shape, mark: ChordMark) -> Option<Entity> {
        let entity = match shape {
            Shape::Segno => Entity::Segno(mark),
            Shape::Coda => Entity::Coda(mark),
            s if s.dynamics_text().is_some() => Entity::Dynamics(mark),
            s if s.is_ornament() => Entity::Ornament(mark),
            s if s.is_articulation() => Entity::Articulation(mark),
            _ => return None,
        };
        Some(entity)
    }
}

impl Translator for ChordMarkTranslator {
    fn name(&self) -> &'static str {
        "chord_mark"
    }

    fn is_relevant(&self, symbol: &Symbol) -> bool {
        let shape = symbol.shape;
        matches!(shape, Shape::Segno | Shape::Coda)
            || shape.dynamics_text().is_some()
            || shape.is_ornament()
            || shape.is_articulation()
    }

    fn translate(
        &self,
        score: &mut Score,
        _options: &AssemblyOptions,
        symbol: &Symbol,
        at: &Resolution,
    ) -> Result<Translated, EngineError> {
        let point = at.system_point;
        let Some(chord) = event_chord(score, at.measure, at.staff, point)? else {
            return Ok(Translated::NoChord);
        };
        let mark = ChordMark {
            chord,
            location: point,
            symbol: symbol_ref(symbol),
        };
        let entity = Self::wrap(symbol.shape, mark).ok_or_else(|| {
            EngineError::TreeInconsistency(format!("{:?} 不是和弦记号", symbol.shape))
        })?;
        let entity = score.add_entity(at.measure, entity)?;
        Ok(Translated::Created(entity))
    }
}

#[cfg(test)]
mod tests {
    use omr_core::geometry::{PageRect, PixelRect, Scale};
    use omr_core::score::PartId;

    use super::*;

    struct Fixture {
        score: Score,
        page: PageId,
        parts: Vec<PartId>,
        staves: Vec<StaffId>,
        measures: Vec<MeasureId>,
    }

    /// 系统位于页面 (0, 0)，两声部各一个谱表：上谱表 [20, 84]，下谱表 [120, 184]；
    /// 每个声部三个小节 [0,100) [100,220) [220,340)。
    fn fixture() -> Fixture {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let system = score
            .add_system(page, PageRect::new(0.0, 0.0, 340.0, 220.0))
            .unwrap();
        let mut parts = Vec::new();
        let mut staves = Vec::new();
        let mut measures = Vec::new();
        for top in [20.0, 120.0] {
            let part = score.add_part(system, None).unwrap();
            staves.push(
                score
                    .add_staff(part, SystemPoint::new(0.0, top), 340.0, 64.0)
                    .unwrap(),
            );
            for (left, right) in [(0.0, 100.0), (100.0, 220.0), (220.0, 340.0)] {
                measures.push(score.add_measure(part, left, right).unwrap());
            }
            parts.push(part);
        }
        Fixture {
            score,
            page,
            parts,
            staves,
            measures,
        }
    }

    fn centered(id: u64, shape: Shape, x: f64, y: f64) -> Symbol {
        Symbol::new(id, shape, PixelRect::new(x - 6.0, y - 6.0, 12.0, 12.0))
    }

    fn chord_in_slot(f: &mut Fixture, measure: usize, x: f64, y: f64) -> ChordId {
        let staff = f.staves[measure / 3];
        let chord = f
            .score
            .add_chord(f.measures[measure], SystemPoint::new(x, y), Some(staff))
            .unwrap();
        f.score.add_slot(f.measures[measure], x, &[chord]).unwrap();
        chord
    }

    #[test]
    fn clefs_attach_to_containing_measure() {
        let mut f = fixture();
        let symbols = [
            centered(1, Shape::GClef, 50.0, 52.0),
            centered(2, Shape::GClef, 150.0, 52.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.created, 2);

        let first: Vec<_> = f.score.clefs(f.measures[0]).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].staff, f.staves[0]);
        assert_eq!(first[0].location, omr_core::geometry::StaffPoint::new(50.0, 32.0));
        assert_eq!(f.score.clefs(f.measures[1]).count(), 1);
        assert_eq!(f.score.clefs(f.measures[2]).count(), 0);
    }

    #[test]
    fn fermata_orientation_selects_chord_side() {
        let mut f = fixture();
        let chord = chord_in_slot(&mut f, 0, 40.0, 60.0);

        // 正置：位于和弦上方
        let upright = centered(1, Shape::Fermata, 42.0, 30.0);
        // 倒置：首选上方和弦，这里只有下方和弦
        let inverted = centered(2, Shape::FermataBelow, 42.0, 40.0);
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &[upright, inverted])
            .unwrap();
        assert_eq!(report.created, 2);

        let chords: Vec<_> = f
            .score
            .entities(f.measures[0])
            .map(|(_, entity)| entity.chord())
            .collect();
        assert_eq!(chords, vec![Some(chord), Some(chord)]);
    }

    #[test]
    fn fermata_without_fallback_is_dropped() {
        let mut f = fixture();
        chord_in_slot(&mut f, 0, 40.0, 60.0);
        let options = AssemblyOptions {
            fermata_fallback: false,
            ..AssemblyOptions::default()
        };
        let inverted = centered(1, Shape::FermataBelow, 42.0, 40.0);
        let report = Assembler::new(options)
            .assemble(&mut f.score, f.page, &[inverted])
            .unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(f.score.entities(f.measures[0]).count(), 0);
    }

    #[test]
    fn fermata_in_empty_measure_is_orphaned() {
        let mut f = fixture();
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &[centered(1, Shape::Fermata, 300.0, 30.0)])
            .unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.created, 0);
    }

    #[test]
    fn pedal_marks_use_event_chord_and_direction() {
        let mut f = fixture();
        let low = chord_in_slot(&mut f, 3, 40.0, 150.0);
        // 下谱表下方、系统内
        let start = centered(1, Shape::PedalMark, 45.0, 205.0);
        let stop = centered(2, Shape::PedalUpMark, 90.0, 205.0);
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &[start, stop])
            .unwrap();
        assert_eq!(report.created, 2);

        let pedals: Vec<(bool, ChordId)> = f
            .score
            .entities(f.measures[3])
            .filter_map(|(_, entity)| match entity {
                Entity::Pedal(pedal) => Some((pedal.start, pedal.mark.chord)),
                _ => None,
            })
            .collect();
        assert_eq!(pedals, vec![(true, low), (false, low)]);
    }

    #[test]
    fn event_marks_never_borrow_the_chord_on_the_other_side() {
        let mut f = fixture();
        // 上谱表中线为 52：踏板在中线下方只接受上方和弦，力度在中线上方只接受下方和弦
        chord_in_slot(&mut f, 0, 40.0, 80.0);
        chord_in_slot(&mut f, 1, 150.0, 30.0);
        let symbols = [
            centered(1, Shape::PedalMark, 45.0, 66.0),
            centered(2, Shape::DynamicsP, 152.0, 40.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.orphaned, 2);
        assert_eq!(report.created, 0);
        assert_eq!(f.score.entities(f.measures[0]).count(), 0);
        assert_eq!(f.score.entities(f.measures[1]).count(), 0);
    }

    #[test]
    fn time_signatures_are_built_whole_or_from_digits() {
        let mut f = fixture();
        let symbols = [
            centered(1, Shape::CommonTime, 30.0, 52.0),
            centered(2, Shape::TimeFourFour, 60.0, 52.0),
            centered(3, Shape::TimeTwoFour, 105.0, 52.0),
            centered(4, Shape::TimeThree, 130.0, 36.0),
            centered(5, Shape::TimeFour, 130.0, 68.0),
            centered(6, Shape::TimeTwo, 130.0, 40.0),
            centered(7, Shape::TimeEight, 200.0, 68.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.merged, 1);
        assert_eq!(report.rejected, 4);

        let (_, common) = f.score.time_signature(f.measures[0], f.staves[0]).unwrap();
        assert_eq!(common.rational(), Some((4, 4)));
        let (_, digits) = f.score.time_signature(f.measures[1], f.staves[0]).unwrap();
        assert_eq!(digits.rational(), Some((3, 4)));
        assert_eq!(digits.symbol.id, 4);
        assert_eq!(digits.extra.len(), 1);
        assert_eq!(f.score.entities(f.measures[1]).count(), 1);
    }

    #[test]
    fn key_signature_accumulates_adjacent_accidentals() {
        let mut f = fixture();
        chord_in_slot(&mut f, 0, 60.0, 60.0);
        let symbols = [
            centered(1, Shape::Sharp, 240.0, 40.0),
            centered(2, Shape::Sharp, 252.0, 52.0),
            centered(3, Shape::Flat, 264.0, 44.0),
            // 紧挨着音符，是临时记号
            centered(4, Shape::Sharp, 50.0, 60.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.merged, 1);
        assert_eq!(report.rejected, 2);

        let keys = f.score.key_signatures(f.measures[2], f.staves[0]);
        assert_eq!(keys.len(), 1);
        let (_, key) = keys[0];
        assert_eq!(key.key, 2);
        assert_eq!(key.extra.len(), 1);
        assert_eq!(key.bounds.min().x(), 234.0);
        assert_eq!(key.bounds.max().x(), 258.0);
        assert!(f.score.key_signatures(f.measures[0], f.staves[0]).is_empty());
    }

    #[test]
    fn arpeggio_binds_to_the_following_chord() {
        let mut f = fixture();
        let measure = f.measures[0];
        let staff = f.staves[0];
        let high = f
            .score
            .add_chord(measure, SystemPoint::new(40.0, 30.0), Some(staff))
            .unwrap();
        let low = f
            .score
            .add_chord(measure, SystemPoint::new(40.0, 70.0), Some(staff))
            .unwrap();
        f.score.add_slot(measure, 40.0, &[high, low]).unwrap();

        let symbols = [
            centered(1, Shape::Arpeggiato, 30.0, 64.0),
            centered(2, Shape::Arpeggiato, 300.0, 52.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.orphaned, 1);
        let (_, entity) = f.score.entities(measure).next().unwrap();
        assert!(matches!(entity, Entity::Arpeggiate(_)));
        assert_eq!(entity.chord(), Some(low));
    }

    #[test]
    fn wedge_attaches_to_part_and_spans_bar_lines() {
        let mut f = fixture();
        let wedge = Symbol::new(1, Shape::Crescendo, PixelRect::new(60.0, 90.0, 200.0, 12.0));
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &[wedge])
            .unwrap();
        assert_eq!(report.created, 1);
        assert!(f.measures.iter().all(|&m| f.score.entities(m).count() == 0));

        let directions: Vec<_> = f.score.part_directions(f.parts[0]).collect();
        assert_eq!(directions.len(), 1);
        let Entity::Wedge(wedge) = directions[0].1 else {
            panic!("expected a wedge");
        };
        assert_eq!(wedge.kind, WedgeKind::Crescendo);
        assert_eq!((wedge.left, wedge.right), (60.0, 260.0));
        assert_eq!(wedge.staff, f.staves[0]);
    }

    #[test]
    fn barline_belongs_to_the_measure_it_closes() {
        let mut f = fixture();
        let symbols = [
            centered(1, Shape::ThinBarline, 98.0, 52.0),
            centered(2, Shape::FinalBarline, 101.0, 52.0),
            centered(3, Shape::ThinBarline, 1.0, 52.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(f.score.entities(f.measures[0]).count(), 3);
        assert_eq!(f.score.entities(f.measures[1]).count(), 0);
    }

    #[test]
    fn dynamics_below_staff_attach_to_chord_above() {
        let mut f = fixture();
        let chord = chord_in_slot(&mut f, 1, 150.0, 40.0);
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &[centered(1, Shape::DynamicsMf, 152.0, 95.0)])
            .unwrap();
        assert_eq!(report.created, 1);
        let (_, entity) = f.score.entities(f.measures[1]).next().unwrap();
        assert!(matches!(entity, Entity::Dynamics(_)));
        assert_eq!(entity.chord(), Some(chord));
    }

    #[test]
    fn unrecognized_shapes_never_create_entities() {
        let mut f = fixture();
        let mut doubtful = centered(3, Shape::GClef, 50.0, 52.0);
        doubtful.well_known = false;
        let symbols = [
            centered(1, Shape::Clutter, 50.0, 52.0),
            centered(2, Shape::Noise, 150.0, 150.0),
            doubtful,
            centered(4, Shape::Natural, 50.0, 52.0),
        ];
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &symbols)
            .unwrap();
        assert_eq!(report.irrelevant, 4);
        assert_eq!(report.created, 0);
        assert!(f.measures.iter().all(|&m| f.score.entities(m).count() == 0));
    }

    #[test]
    fn symbols_outside_systems_are_skipped_silently() {
        let mut f = fixture();
        let report = Assembler::default()
            .assemble(&mut f.score, f.page, &[centered(1, Shape::GClef, 600.0, 600.0)])
            .unwrap();
        assert_eq!(
            report,
            AssemblyReport {
                unresolved: 1,
                ..AssemblyReport::default()
            }
        );
    }

    #[test]
    fn unknown_page_is_an_error() {
        let mut f = fixture();
        let mut other = Score::new();
        other.add_page(Scale::identity());
        let foreign = other.add_page(Scale::identity());
        // 本乐谱只有一页，第二页的编号指向系统节点
        let err = Assembler::default()
            .assemble(&mut f.score, foreign, &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::PageNotFound(_)));
    }
}
