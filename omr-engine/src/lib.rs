pub mod assembler;
pub mod command;
pub mod numbering;

pub mod errors {
    use omr_core::errors::ScoreError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("page #{0} not found")]
        PageNotFound(u32),
        #[error(transparent)]
        Score(#[from] ScoreError),
        #[error("score tree is inconsistent: {0}")]
        TreeInconsistency(String),
    }
}

pub mod session {
    use omr_core::geometry::{PageRect, PixelRect, Scale, SystemPoint};
    use omr_core::score::{MeasureId, PageId, Score};
    use omr_core::symbol::{Shape, Symbol};
    use tracing::{debug, info};

    use crate::assembler::{Assembler, AssemblyOptions, AssemblyReport};
    use crate::errors::EngineError;
    use crate::numbering::{
        MeasureNumberer, NumberingAnomaly, NumberingOptions, PageDeltaReconciler,
    };

    /// 引擎层负责持有乐谱树、待装配符号以及各遍历的结果。
    pub struct Session {
        score: Score,
        pending: Vec<(PageId, Vec<Symbol>)>,
        assembler: Assembler,
        numbering: NumberingOptions,
        reports: Vec<(PageId, AssemblyReport)>,
        anomalies: Vec<NumberingAnomaly>,
    }

    #[derive(Debug, Clone)]
    pub struct DemoScore {
        pub page: PageId,
        pub measures: Vec<MeasureId>,
        pub symbols: usize,
    }

    impl Session {
        pub fn new() -> Self {
            Self::with_options(AssemblyOptions::default(), NumberingOptions::default())
        }

        pub fn with_options(assembly: AssemblyOptions, numbering: NumberingOptions) -> Self {
            Self {
                score: Score::new(),
                pending: Vec::new(),
                assembler: Assembler::new(assembly),
                numbering,
                reports: Vec::new(),
                anomalies: Vec::new(),
            }
        }

        /// 替换当前乐谱与待装配符号，并清空之前的结果。
        pub fn load(&mut self, score: Score, symbols: Vec<(PageId, Vec<Symbol>)>) {
            self.score = score;
            self.pending = symbols;
            self.reports.clear();
            self.anomalies.clear();
        }

        pub fn reset(&mut self) {
            self.load(Score::new(), Vec::new());
        }

        /// 追加某页待装配的符号。
        pub fn queue_symbols(&mut self, page: PageId, symbols: Vec<Symbol>) -> Result<(), EngineError> {
            if self.score.page(page).is_none() {
                return Err(EngineError::PageNotFound(page.get()));
            }
            self.pending.push((page, symbols));
            Ok(())
        }

        #[inline]
        pub fn pending_symbols(&self) -> usize {
            self.pending.iter().map(|(_, symbols)| symbols.len()).sum()
        }

        /// 装配全部待处理符号，返回合并后的统计。
        pub fn assemble_pending(&mut self) -> Result<AssemblyReport, EngineError> {
            let mut total = AssemblyReport::default();
            for (page, symbols) in std::mem::take(&mut self.pending) {
                let report = self.assembler.assemble(&mut self.score, page, &symbols)?;
                total.merge(&report);
                self.reports.push((page, report));
            }
            Ok(total)
        }

        /// 页内编号，按配置继续计算跨页偏移。返回本次新增的异常数。
        pub fn number_measures(&mut self) -> usize {
            let mut numberer = MeasureNumberer::new(&self.numbering);
            self.score.accept(&mut numberer);
            let numbered = numberer.numbered();
            let anomalies = numberer.into_anomalies();
            let found = anomalies.len();
            self.anomalies.extend(anomalies);
            info!(numbered, anomalies = found, "小节编号完成");

            if self.numbering.reconcile_deltas {
                self.reconcile_deltas();
            }
            found
        }

        /// 重新计算各页的跨页偏移，返回全部页面的小节列总数。
        pub fn reconcile_deltas(&mut self) -> i32 {
            let mut reconciler = PageDeltaReconciler::new();
            self.score.accept(&mut reconciler);
            debug!(total = reconciler.total(), "跨页偏移已更新");
            reconciler.total()
        }

        #[inline]
        pub fn score(&self) -> &Score {
            &self.score
        }

        #[inline]
        pub fn score_mut(&mut self) -> &mut Score {
            &mut self.score
        }

        #[inline]
        pub fn assembler(&self) -> &Assembler {
            &self.assembler
        }

        #[inline]
        pub fn reports(&self) -> &[(PageId, AssemblyReport)] {
            &self.reports
        }

        #[inline]
        pub fn anomalies(&self) -> &[NumberingAnomaly] {
            &self.anomalies
        }

        /// 为 CLI / 快速验证构造一页钢琴谱骨架和一组识别符号。
        ///
        /// 骨架：一个系统，上下两个声部各一个谱表、三个小节；
        /// 符号覆盖谱号、延长号、踏板、渐强、小节线、力度，以及应被跳过的三种情况。
        pub fn populate_demo(&mut self) -> Result<DemoScore, EngineError> {
            let mut score = Score::new();
            let page = score.add_page(Scale::identity());
            let system = score.add_system(page, PageRect::new(40.0, 60.0, 640.0, 280.0))?;

            let mut measures = Vec::new();
            let mut staves = Vec::new();
            for (name, top) in [("Right hand", 40.0), ("Left hand", 176.0)] {
                let part = score.add_part(system, Some(name.to_string()))?;
                staves.push(score.add_staff(part, SystemPoint::new(0.0, top), 640.0, 64.0)?);
                for (left, right) in [(0.0, 200.0), (200.0, 420.0), (420.0, 640.0)] {
                    measures.push(score.add_measure(part, left, right)?);
                }
            }

            for (measure, staff, x, y) in [
                (measures[0], staves[0], 80.0, 72.0),
                (measures[1], staves[0], 260.0, 56.0),
                (measures[3], staves[1], 80.0, 208.0),
            ] {
                let chord = score.add_chord(measure, SystemPoint::new(x, y), Some(staff))?;
                score.add_slot(measure, x, &[chord])?;
            }

            let symbols = vec![
                Symbol::new(1, Shape::GClef, PixelRect::new(52.0, 112.0, 16.0, 40.0)),
                Symbol::new(2, Shape::FClef, PixelRect::new(52.0, 256.0, 16.0, 24.0)),
                Symbol::new(3, Shape::Fermata, PixelRect::new(112.0, 78.0, 16.0, 12.0)),
                Symbol::new(4, Shape::PedalMark, PixelRect::new(112.0, 312.0, 24.0, 16.0)),
                Symbol::new(5, Shape::Crescendo, PixelRect::new(260.0, 182.0, 140.0, 16.0)),
                Symbol::new(6, Shape::ThinBarline, PixelRect::new(236.0, 100.0, 4.0, 64.0)),
                Symbol::new(7, Shape::DynamicsMf, PixelRect::new(292.0, 172.0, 20.0, 16.0)),
                Symbol::new(8, Shape::Clutter, PixelRect::new(300.0, 200.0, 10.0, 10.0)),
                Symbol::new(9, Shape::GClef, PixelRect::new(5.0, 5.0, 10.0, 20.0)),
                Symbol::new(10, Shape::Fermata, PixelRect::new(532.0, 78.0, 16.0, 12.0)),
            ];
            let demo = DemoScore {
                page,
                measures,
                symbols: symbols.len(),
            };

            self.load(score, vec![(page, symbols)]);
            debug!(
                page = demo.page.get(),
                measures = demo.measures.len(),
                symbols = demo.symbols,
                "已创建演示乐谱"
            );
            Ok(demo)
        }
    }

    impl Default for Session {
        fn default() -> Self {
            Self::new()
        }
    }

    #[cfg(test)]
    mod tests {
        use omr_core::score::Entity;

        use super::*;
        use crate::numbering::AnomalyReason;

        #[test]
        fn demo_assembles_and_numbers() {
            let mut session = Session::new();
            let demo = session.populate_demo().expect("demo score");
            assert_eq!(session.pending_symbols(), demo.symbols);

            let report = session.assemble_pending().expect("assemble demo");
            assert_eq!(report.created, 7);
            assert_eq!(report.irrelevant, 1);
            assert_eq!(report.unresolved, 1);
            assert_eq!(report.orphaned, 1);
            assert_eq!(report.total(), demo.symbols);
            assert_eq!(session.pending_symbols(), 0);

            let score = session.score();
            let first: Vec<&str> = score
                .entities(demo.measures[0])
                .map(|(_, entity)| entity.kind_name())
                .collect();
            assert_eq!(first, vec!["clef", "fermata", "barline"]);
            assert!(matches!(
                score.entities(demo.measures[1]).next(),
                Some((_, Entity::Dynamics(_)))
            ));
            assert_eq!(score.entities(demo.measures[3]).count(), 2);

            assert_eq!(session.number_measures(), 0);
            let ids: Vec<Option<u32>> = demo
                .measures
                .iter()
                .map(|&m| session.score().measure(m).and_then(|data| data.id))
                .collect();
            assert_eq!(
                ids,
                vec![Some(1), Some(2), Some(3), Some(1), Some(2), Some(3)]
            );
            assert_eq!(
                session.score().page(demo.page).unwrap().delta_measure_id,
                Some(0)
            );
        }

        #[test]
        fn anomalies_accumulate_in_session() {
            let mut session = Session::new();
            let demo = session.populate_demo().unwrap();
            session
                .score_mut()
                .measure_mut(demo.measures[2])
                .unwrap()
                .preceding = None;

            assert_eq!(session.number_measures(), 1);
            assert_eq!(session.anomalies()[0].reason, AnomalyReason::MissingPreceding);
            assert_eq!(session.anomalies()[0].measure, demo.measures[2]);
        }

        #[test]
        fn queueing_for_unknown_page_fails() {
            let mut session = Session::new();
            let mut other = Score::new();
            let page = other.add_page(Scale::identity());
            let err = session.queue_symbols(page, Vec::new()).unwrap_err();
            assert!(matches!(err, EngineError::PageNotFound(_)));
        }
    }
}
