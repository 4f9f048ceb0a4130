//! 小节编号与跨页偏移。

use omr_core::score::{MeasureId, PageId, Score, StaffId};
use omr_core::visitor::{ScoreView, ScoreVisitor};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberingOptions {
    /// 保留显式指定的编号，后续小节从它继续递增。
    pub honor_specific_ids: bool,
    /// 编号后运行跨页偏移计算。
    pub reconcile_deltas: bool,
}

impl Default for NumberingOptions {
    fn default() -> Self {
        Self {
            honor_specific_ids: true,
            reconcile_deltas: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyReason {
    /// 非首小节却没有前一小节链接。
    MissingPreceding,
    /// 链接指向不存在的小节或其他页面的小节。
    DanglingPreceding,
    /// 前一小节尚未编号。
    UnnumberedPreceding,
    /// 前一小节编号已是 `u32::MAX`，无法继续递增。
    IdOverflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberingAnomaly {
    pub page: PageId,
    pub measure: MeasureId,
    pub reason: AnomalyReason,
}

/// 页内顺序编号：首小节为 1，其余为前一小节编号加 1。
///
/// 单个小节的异常只会记录并回退为 1，不影响同页其他小节。
#[derive(Debug, Default)]
pub struct MeasureNumberer {
    honor_specific_ids: bool,
    current_page: Option<PageId>,
    numbered: usize,
    anomalies: Vec<NumberingAnomaly>,
}

impl MeasureNumberer {
    pub fn new(options: &NumberingOptions) -> Self {
        Self {
            honor_specific_ids: options.honor_specific_ids,
            ..Self::default()
        }
    }

    #[inline]
    pub fn numbered(&self) -> usize {
        self.numbered
    }

    #[inline]
    pub fn anomalies(&self) -> &[NumberingAnomaly] {
        &self.anomalies
    }

    pub fn into_anomalies(self) -> Vec<NumberingAnomaly> {
        self.anomalies
    }

    fn keeps_own_id(&self, score: &Score, measure: MeasureId) -> bool {
        self.honor_specific_ids
            && score
                .measure(measure)
                .is_some_and(|data| data.specific_id && data.id.is_some())
    }

    fn compute(&self, score: &Score, page: PageId, measure: MeasureId) -> Result<u32, AnomalyReason> {
        let Some(data) = score.measure(measure) else {
            return Err(AnomalyReason::DanglingPreceding);
        };
        if data.local_index == 0 {
            return Ok(1);
        }
        let preceding = data.preceding.ok_or(AnomalyReason::MissingPreceding)?;
        let on_same_page = score
            .page_of_measure(preceding)
            .is_ok_and(|owner| owner == page);
        let previous = score
            .measure(preceding)
            .filter(|_| on_same_page)
            .ok_or(AnomalyReason::DanglingPreceding)?;
        let id = previous.id.ok_or(AnomalyReason::UnnumberedPreceding)?;
        id.checked_add(1).ok_or(AnomalyReason::IdOverflow)
    }
}

impl ScoreVisitor for MeasureNumberer {
    fn visit_page(&mut self, score: &mut ScoreView<'_>, page: PageId) -> bool {
        self.current_page = Some(page);
        // 清掉上一次编号，避免错误链接读到过期编号
        let measures: Vec<MeasureId> = score.measures_in_page(page).collect();
        for measure in measures {
            if self.keeps_own_id(score, measure) {
                continue;
            }
            if let Some(data) = score.measure_mut(measure) {
                data.id = None;
            }
        }
        true
    }

    fn visit_staff(&mut self, _score: &mut ScoreView<'_>, _staff: StaffId) -> bool {
        false
    }

    fn visit_measure(&mut self, score: &mut ScoreView<'_>, measure: MeasureId) -> bool {
        let Some(page) = self.current_page else {
            return true;
        };
        if self.keeps_own_id(score, measure) {
            self.numbered += 1;
            return true;
        }

        let id = match self.compute(score, page, measure) {
            Ok(id) => id,
            Err(reason) => {
                warn!(
                    page = page.get(),
                    measure = measure.get(),
                    ?reason,
                    "小节编号异常，按首小节处理"
                );
                self.anomalies.push(NumberingAnomaly {
                    page,
                    measure,
                    reason,
                });
                1
            }
        };
        if let Some(data) = score.measure_mut(measure) {
            data.id = Some(id);
            data.specific_id = false;
            self.numbered += 1;
        }
        true
    }

    fn leave_page(&mut self, score: &mut ScoreView<'_>, page: PageId) {
        // 跨页偏移由后续遍历计算，这里只放置占位值
        if let Some(data) = score.page_mut(page) {
            data.delta_measure_id = Some(0);
        }
        debug!(page = page.get(), numbered = self.numbered, "页面小节编号完成");
        self.current_page = None;
    }
}

/// 跨页偏移：每页的偏移为之前各页小节列数之和。
#[derive(Debug, Default)]
pub struct PageDeltaReconciler {
    running: i32,
}

impl PageDeltaReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已处理页面的小节列总数。
    #[inline]
    pub fn total(&self) -> i32 {
        self.running
    }
}

impl ScoreVisitor for PageDeltaReconciler {
    fn visit_page(&mut self, score: &mut ScoreView<'_>, page: PageId) -> bool {
        let columns = score
            .measures_in_page(page)
            .filter_map(|measure| score.measure(measure).map(|data| data.local_index + 1))
            .max()
            .unwrap_or(0);
        if let Some(data) = score.page_mut(page) {
            data.delta_measure_id = Some(self.running);
        }
        self.running = self
            .running
            .saturating_add(i32::try_from(columns).unwrap_or(i32::MAX));
        false
    }
}

#[cfg(test)]
mod tests {
    use omr_core::geometry::{PageRect, Scale, SystemPoint};
    use omr_core::score::PartId;

    use super::*;

    fn add_system(score: &mut Score, page: PageId, parts: usize, measures: usize) -> Vec<PartId> {
        let top = 300.0 * score.systems(page).count() as f64;
        let system = score
            .add_system(page, PageRect::new(0.0, top, 400.0, 200.0))
            .unwrap();
        (0..parts)
            .map(|index| {
                let part = score.add_part(system, None).unwrap();
                score
                    .add_staff(part, SystemPoint::new(0.0, 20.0 + 100.0 * index as f64), 400.0, 64.0)
                    .unwrap();
                let width = 400.0 / measures as f64;
                for m in 0..measures {
                    score
                        .add_measure(part, m as f64 * width, (m + 1) as f64 * width)
                        .unwrap();
                }
                part
            })
            .collect()
    }

    fn ids(score: &Score, part: PartId) -> Vec<Option<u32>> {
        score
            .measures(part)
            .map(|m| score.measure(m).unwrap().id)
            .collect()
    }

    fn number(score: &mut Score) -> MeasureNumberer {
        let mut numberer = MeasureNumberer::new(&NumberingOptions::default());
        score.accept(&mut numberer);
        numberer
    }

    #[test]
    fn three_measures_are_numbered_from_one() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let parts = add_system(&mut score, page, 1, 3);
        assert_eq!(ids(&score, parts[0]), vec![None, None, None]);

        let numberer = number(&mut score);
        assert_eq!(ids(&score, parts[0]), vec![Some(1), Some(2), Some(3)]);
        assert!(numberer.anomalies().is_empty());
        assert_eq!(score.page(page).unwrap().delta_measure_id, Some(0));
    }

    #[test]
    fn numbering_continues_across_systems_and_parts_share_ids() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let first = add_system(&mut score, page, 2, 3);
        let second = add_system(&mut score, page, 2, 2);
        number(&mut score);

        for part in &first {
            assert_eq!(ids(&score, *part), vec![Some(1), Some(2), Some(3)]);
        }
        for part in &second {
            assert_eq!(ids(&score, *part), vec![Some(4), Some(5)]);
        }
    }

    #[test]
    fn ids_increase_by_one_in_reading_order() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        for measures in [4, 3, 5] {
            add_system(&mut score, page, 1, measures);
        }
        number(&mut score);
        let sequence: Vec<u32> = score
            .measures_in_page(page)
            .filter_map(|m| score.measure(m).unwrap().id)
            .collect();
        assert_eq!(sequence, (1..=12).collect::<Vec<u32>>());
    }

    #[test]
    fn corrupted_link_falls_back_and_numbering_continues() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let parts = add_system(&mut score, page, 1, 4);
        let second = score.measures(parts[0]).nth(1).unwrap();
        score.measure_mut(second).unwrap().preceding = None;

        let numberer = number(&mut score);
        assert_eq!(ids(&score, parts[0]), vec![Some(1), Some(1), Some(2), Some(3)]);
        assert_eq!(
            numberer.anomalies(),
            &[NumberingAnomaly {
                page,
                measure: second,
                reason: AnomalyReason::MissingPreceding,
            }]
        );
    }

    #[test]
    fn dangling_and_forward_links_are_reported() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let parts = add_system(&mut score, page, 1, 3);
        let measures: Vec<MeasureId> = score.measures(parts[0]).collect();
        // 第二小节指向自身之后的小节
        score.measure_mut(measures[1]).unwrap().preceding = Some(measures[2]);

        let other_page = score.add_page(Scale::identity());
        let other_parts = add_system(&mut score, other_page, 1, 2);
        let foreign = score.measures(other_parts[0]).nth(1).unwrap();
        score.measure_mut(foreign).unwrap().preceding = Some(measures[0]);

        let numberer = number(&mut score);
        let reasons: Vec<AnomalyReason> = numberer.anomalies().iter().map(|a| a.reason).collect();
        assert_eq!(
            reasons,
            vec![AnomalyReason::UnnumberedPreceding, AnomalyReason::DanglingPreceding]
        );
        assert_eq!(ids(&score, parts[0]), vec![Some(1), Some(1), Some(2)]);
        assert_eq!(ids(&score, other_parts[0]), vec![Some(1), Some(1)]);
    }

    #[test]
    fn specific_ids_are_kept_and_chain_continues() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let parts = add_system(&mut score, page, 1, 3);
        let second = score.measures(parts[0]).nth(1).unwrap();
        score.measure_mut(second).unwrap().set_specific_id(10);

        number(&mut score);
        assert_eq!(ids(&score, parts[0]), vec![Some(1), Some(10), Some(11)]);

        let mut ignoring = MeasureNumberer::new(&NumberingOptions {
            honor_specific_ids: false,
            ..NumberingOptions::default()
        });
        score.accept(&mut ignoring);
        assert_eq!(ids(&score, parts[0]), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn largest_specific_id_does_not_overflow_the_chain() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let parts = add_system(&mut score, page, 1, 3);
        let measures: Vec<MeasureId> = score.measures(parts[0]).collect();
        score.measure_mut(measures[0]).unwrap().set_specific_id(u32::MAX);

        let numberer = number(&mut score);
        assert_eq!(ids(&score, parts[0]), vec![Some(u32::MAX), Some(1), Some(2)]);
        assert_eq!(
            numberer.anomalies(),
            &[NumberingAnomaly {
                page,
                measure: measures[1],
                reason: AnomalyReason::IdOverflow,
            }]
        );
    }

    #[test]
    fn renumbering_is_stable() {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let parts = add_system(&mut score, page, 2, 3);
        number(&mut score);
        let before = ids(&score, parts[1]);
        number(&mut score);
        assert_eq!(ids(&score, parts[1]), before);
    }

    #[test]
    fn deltas_accumulate_measure_columns_of_previous_pages() {
        let mut score = Score::new();
        let first = score.add_page(Scale::identity());
        add_system(&mut score, first, 2, 3);
        add_system(&mut score, first, 2, 2);
        let second = score.add_page(Scale::identity());
        let parts = add_system(&mut score, second, 1, 4);
        let third = score.add_page(Scale::identity());

        number(&mut score);
        let mut reconciler = PageDeltaReconciler::new();
        score.accept(&mut reconciler);

        assert_eq!(score.page(first).unwrap().delta_measure_id, Some(0));
        assert_eq!(score.page(second).unwrap().delta_measure_id, Some(5));
        assert_eq!(score.page(third).unwrap().delta_measure_id, Some(9));
        assert_eq!(reconciler.total(), 9);

        let last = score.measures(parts[0]).last().unwrap();
        assert_eq!(score.global_measure_id(last), Some(9));
    }
}
