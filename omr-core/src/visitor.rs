//! 乐谱树遍历协议。
//!
//! 遍历为确定性的先序：父节点先于子节点，子节点按存储顺序。每个 `visit_*`
//! 返回 `true` 表示继续访问子节点，返回 `false` 表示跳过子节点。
//!
//! 访问者拿到的是 [`ScoreView`]：可以读取整棵树并修改节点属性，但没有增删节点的入口，
//! 遍历期间树的拓扑保持不变。

use std::ops::Deref;

use crate::score::{
    Chord, ChordId, EntityId, Measure, MeasureId, NodeId, NodeKind, Page, PageId, Part, PartId,
    Score, Staff, StaffId, System, SystemId,
};

/// 遍历期间的乐谱视图：只读访问通过 `Deref` 转发，可变访问仅限节点属性。
pub struct ScoreView<'a> {
    score: &'a mut Score,
}

impl Deref for ScoreView<'_> {
    type Target = Score;

    fn deref(&self) -> &Score {
        self.score
    }
}

impl ScoreView<'_> {
    pub fn page_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.score.page_mut(id)
    }

    pub fn system_mut(&mut self, id: SystemId) -> Option<&mut System> {
        self.score.system_mut(id)
    }

    pub fn part_mut(&mut self, id: PartId) -> Option<&mut Part> {
        self.score.part_mut(id)
    }

    pub fn staff_mut(&mut self, id: StaffId) -> Option<&mut Staff> {
        self.score.staff_mut(id)
    }

    pub fn measure_mut(&mut self, id: MeasureId) -> Option<&mut Measure> {
        self.score.measure_mut(id)
    }

    pub fn chord_mut(&mut self, id: ChordId) -> Option<&mut Chord> {
        self.score.chord_mut(id)
    }
}

pub trait ScoreVisitor {
    fn visit_score(&mut self, _score: &mut ScoreView<'_>) -> bool {
        true
    }

    fn visit_page(&mut self, _score: &mut ScoreView<'_>, _page: PageId) -> bool {
        true
    }

    /// 页面子树处理完毕后调用，无论 `visit_page` 是否跳过了子节点。
    fn leave_page(&mut self, _score: &mut ScoreView<'_>, _page: PageId) {}

    fn visit_system(&mut self, _score: &mut ScoreView<'_>, _system: SystemId) -> bool {
        true
    }

    fn visit_part(&mut self, _score: &mut ScoreView<'_>, _part: PartId) -> bool {
        true
    }

    fn visit_staff(&mut self, _score: &mut ScoreView<'_>, _staff: StaffId) -> bool {
        true
    }

    fn visit_measure(&mut self, _score: &mut ScoreView<'_>, _measure: MeasureId) -> bool {
        true
    }

    fn visit_chord(&mut self, _score: &mut ScoreView<'_>, _chord: ChordId) -> bool {
        true
    }

    fn visit_entity(&mut self, _score: &mut ScoreView<'_>, _entity: EntityId) -> bool {
        true
    }
}

impl Score {
    /// 从根开始遍历整棵树，返回 `visit_score` 的结果。
    pub fn accept<V: ScoreVisitor + ?Sized>(&mut self, visitor: &mut V) -> bool {
        if !visitor.visit_score(&mut ScoreView { score: &mut *self }) {
            return false;
        }
        let pages: Vec<PageId> = self.pages().collect();
        for page in pages {
            self.accept_node(page.into(), visitor);
        }
        true
    }

    /// 从任意节点开始遍历其子树，返回该节点的 `visit_*` 结果。未知节点返回 `false`。
    pub fn accept_node<V: ScoreVisitor + ?Sized>(&mut self, node: NodeId, visitor: &mut V) -> bool {
        let Some(kind) = self.node_kind(node) else {
            return false;
        };
        let descend = dispatch(&mut ScoreView { score: &mut *self }, kind, node, visitor);
        if descend {
            let children = self.children(node).to_vec();
            for child in children {
                self.accept_node(child, visitor);
            }
        }
        if kind == NodeKind::Page {
            visitor.leave_page(&mut ScoreView { score: &mut *self }, PageId::from_node(node));
        }
        descend
    }
}

fn dispatch<V: ScoreVisitor + ?Sized>(
    score: &mut ScoreView<'_>,
    kind: NodeKind,
    node: NodeId,
    visitor: &mut V,
) -> bool {
    match kind {
        NodeKind::Page => visitor.visit_page(score, PageId::from_node(node)),
        NodeKind::System => visitor.visit_system(score, SystemId::from_node(node)),
        NodeKind::Part => visitor.visit_part(score, PartId::from_node(node)),
        NodeKind::Staff => visitor.visit_staff(score, StaffId::from_node(node)),
        NodeKind::Measure => visitor.visit_measure(score, MeasureId::from_node(node)),
        NodeKind::Chord => visitor.visit_chord(score, ChordId::from_node(node)),
        NodeKind::Entity => visitor.visit_entity(score, EntityId::from_node(node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PageRect, Scale, SystemPoint};

    #[derive(Default)]
    struct Recorder {
        trail: Vec<String>,
        skip_parts: bool,
    }

    impl ScoreVisitor for Recorder {
        fn visit_page(&mut self, _score: &mut ScoreView<'_>, page: PageId) -> bool {
            self.trail.push(format!("page{}", page.get()));
            true
        }

        fn leave_page(&mut self, _score: &mut ScoreView<'_>, page: PageId) {
            self.trail.push(format!("/page{}", page.get()));
        }

        fn visit_system(&mut self, _score: &mut ScoreView<'_>, system: SystemId) -> bool {
            self.trail.push(format!("system{}", system.get()));
            true
        }

        fn visit_part(&mut self, _score: &mut ScoreView<'_>, part: PartId) -> bool {
            self.trail.push(format!("part{}", part.get()));
            !self.skip_parts
        }

        fn visit_measure(&mut self, score: &mut ScoreView<'_>, measure: MeasureId) -> bool {
            let index = score.measure(measure).map(|m| m.local_index).unwrap_or(usize::MAX);
            self.trail.push(format!("m{index}"));
            true
        }
    }

    fn sample() -> Score {
        let mut score = Score::new();
        let page = score.add_page(Scale::identity());
        let system = score
            .add_system(page, PageRect::new(0.0, 0.0, 300.0, 100.0))
            .unwrap();
        let part = score.add_part(system, None).unwrap();
        score
            .add_staff(part, SystemPoint::new(0.0, 10.0), 300.0, 64.0)
            .unwrap();
        score.add_measure(part, 0.0, 150.0).unwrap();
        score.add_measure(part, 150.0, 300.0).unwrap();
        score
    }

    #[test]
    fn traversal_is_pre_order_in_storage_order() {
        let mut score = sample();
        let mut recorder = Recorder::default();
        assert!(score.accept(&mut recorder));
        assert_eq!(
            recorder.trail,
            vec!["page0", "system1", "part2", "m0", "m1", "/page0"]
        );
    }

    #[test]
    fn returning_false_skips_children_but_not_siblings() {
        let mut score = sample();
        let mut recorder = Recorder {
            skip_parts: true,
            ..Recorder::default()
        };
        score.accept(&mut recorder);
        assert_eq!(recorder.trail, vec!["page0", "system1", "part2", "/page0"]);
    }

    #[test]
    fn default_visitor_touches_every_node_once() {
        struct Counter(usize);
        impl ScoreVisitor for Counter {
            fn visit_page(&mut self, _: &mut ScoreView<'_>, _: PageId) -> bool {
                self.0 += 1;
                true
            }
            fn visit_system(&mut self, _: &mut ScoreView<'_>, _: SystemId) -> bool {
                self.0 += 1;
                true
            }
            fn visit_part(&mut self, _: &mut ScoreView<'_>, _: PartId) -> bool {
                self.0 += 1;
                true
            }
            fn visit_staff(&mut self, _: &mut ScoreView<'_>, _: StaffId) -> bool {
                self.0 += 1;
                true
            }
            fn visit_measure(&mut self, _: &mut ScoreView<'_>, _: MeasureId) -> bool {
                self.0 += 1;
                true
            }
        }

        let mut score = sample();
        let mut counter = Counter(0);
        score.accept(&mut counter);
        assert_eq!(counter.0, score.node_count());
    }

    #[test]
    fn view_edits_attributes_without_changing_topology() {
        struct Renamer;
        impl ScoreVisitor for Renamer {
            fn visit_part(&mut self, score: &mut ScoreView<'_>, part: PartId) -> bool {
                let measures = score.measures(part).count();
                if let Some(data) = score.part_mut(part) {
                    data.name = Some(format!("{measures} bars"));
                }
                false
            }
        }

        let mut score = sample();
        let before = score.node_count();
        score.accept(&mut Renamer);
        assert_eq!(score.node_count(), before);
        let part = score
            .pages()
            .flat_map(|page| score.systems(page))
            .flat_map(|system| score.parts(system))
            .next()
            .unwrap();
        assert_eq!(score.part(part).unwrap().name.as_deref(), Some("2 bars"));
    }
}
