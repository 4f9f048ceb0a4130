//! 乐谱树。所有节点存放在一张扁平表中，父子关系与谱表归属均以索引表示。
//!
//! 结构节点（页、系统、声部、谱表、小节、和弦）由版面分析与节奏阶段预先建立，
//! 装配阶段只追加叶子实体；之后的遍历只修改节点属性，不改变拓扑。

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::ScoreError;
use crate::geometry::{
    PagePoint, PageRect, Scale, StaffFrame, StaffPoint, StaffRect, SystemFrame, SystemPoint,
    system_to_page,
};
use crate::symbol::{BarlineStyle, ClefKind, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// 提供原始数值，便于日志输出。
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

macro_rules! node_handle {
    ($(#[$meta:meta])* $name:ident, $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NodeId);

        impl $name {
            #[inline]
            pub fn node(self) -> NodeId {
                self.0
            }

            #[inline]
            pub fn get(self) -> u32 {
                self.0.get()
            }

            #[inline]
            pub(crate) fn from_node(node: NodeId) -> Self {
                Self(node)
            }
        }

        impl From<$name> for NodeId {
            fn from(handle: $name) -> NodeId {
                handle.0
            }
        }

        impl TypedHandle for $name {
            const KIND: NodeKind = NodeKind::$kind;

            fn wrap(node: NodeId) -> Self {
                Self(node)
            }
        }
    };
}

/// 节点种类与句柄类型之间的对应关系，仅在本模块内部使用。
trait TypedHandle: Copy + Into<NodeId> + 'static {
    const KIND: NodeKind;
    fn wrap(node: NodeId) -> Self;
}

node_handle!(PageId, Page);
node_handle!(SystemId, System);
node_handle!(PartId, Part);
node_handle!(StaffId, Staff);
node_handle!(
    /// 小节节点句柄；小节编号见 [`Measure::id`]。
    MeasureId,
    Measure
);
node_handle!(ChordId, Chord);
node_handle!(EntityId, Entity);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Page,
    System,
    Part,
    Staff,
    Measure,
    Chord,
    Entity,
}

#[derive(Debug, Clone)]
pub enum Node {
    Page(Page),
    System(System),
    Part(Part),
    Staff(Staff),
    Measure(Measure),
    Chord(Chord),
    Entity(Entity),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Page(_) => NodeKind::Page,
            Node::System(_) => NodeKind::System,
            Node::Part(_) => NodeKind::Part,
            Node::Staff(_) => NodeKind::Staff,
            Node::Measure(_) => NodeKind::Measure,
            Node::Chord(_) => NodeKind::Chord,
            Node::Entity(_) => NodeKind::Entity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    /// 页码，从 1 开始。
    pub number: usize,
    pub scale: Scale,
    /// 页内小节编号加上该偏移即为全局编号；编号之前为空。
    pub delta_measure_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct System {
    /// 页内序号，从 1 开始。
    pub number: usize,
    bounds: PageRect,
    frame: SystemFrame,
}

impl System {
    #[inline]
    pub fn bounds(&self) -> PageRect {
        self.bounds
    }

    #[inline]
    pub fn origin(&self) -> PagePoint {
        self.frame.origin()
    }

    #[inline]
    pub fn frame(&self) -> &SystemFrame {
        &self.frame
    }
}

#[derive(Debug, Clone)]
pub struct Part {
    /// 系统内序号，从 1 开始。
    pub number: usize,
    pub name: Option<String>,
}

/// 谱表：原点与竖直范围均以系统局部坐标表示。
#[derive(Debug, Clone)]
pub struct Staff {
    /// 系统内序号（跨声部连续），从 1 开始。
    pub number: usize,
    pub width: f64,
    pub height: f64,
    frame: StaffFrame,
    page_origin: PagePoint,
}

impl Staff {
    #[inline]
    pub fn origin(&self) -> SystemPoint {
        self.frame.origin()
    }

    #[inline]
    pub fn frame(&self) -> &StaffFrame {
        &self.frame
    }

    /// 挂接时根据所属系统推导出的页面坐标原点。
    #[inline]
    pub fn page_origin(&self) -> PagePoint {
        self.page_origin
    }

    #[inline]
    pub fn top(&self) -> f64 {
        self.frame.origin().y()
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.top() + self.height
    }

    #[inline]
    pub fn middle(&self) -> f64 {
        self.top() + self.height * 0.5
    }

    #[inline]
    pub fn contains_y(&self, y: f64) -> bool {
        y >= self.top() && y <= self.bottom()
    }
}

/// 时间槽中按从上到下顺序排列的和弦。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotChord {
    pub chord: ChordId,
    pub head: SystemPoint,
}

/// 时间槽：小节内同时起音的一组和弦，横坐标为系统局部坐标。
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSlot {
    pub x: f64,
    chords: Vec<SlotChord>,
}

impl TimeSlot {
    #[inline]
    pub fn chords(&self) -> &[SlotChord] {
        &self.chords
    }

    /// 符头位于给定点上方、且最靠近该点的和弦。
    pub fn chord_above(&self, point: SystemPoint) -> Option<ChordId> {
        self.chords
            .iter()
            .take_while(|entry| entry.head.y() < point.y())
            .last()
            .map(|entry| entry.chord)
    }

    /// 符头位于给定点下方、且最靠近该点的和弦。
    pub fn chord_below(&self, point: SystemPoint) -> Option<ChordId> {
        self.chords
            .iter()
            .find(|entry| entry.head.y() > point.y())
            .map(|entry| entry.chord)
    }

    /// 符头纵坐标最接近给定点的和弦，不区分上下。
    pub fn chord_nearest(&self, point: SystemPoint) -> Option<ChordId> {
        self.chords
            .iter()
            .min_by(|a, b| {
                let da = (a.head.y() - point.y()).abs();
                let db = (b.head.y() - point.y()).abs();
                da.total_cmp(&db)
            })
            .map(|entry| entry.chord)
    }
}

#[derive(Debug, Clone)]
pub struct Measure {
    /// 页内序号（同一系统各声部共享），从 0 开始。
    pub local_index: usize,
    /// 谱表局部横坐标区间 `[left, right)`，同一声部的谱表共享横向原点。
    pub left: f64,
    pub right: f64,
    /// 小节编号，编号遍历之前为空。
    pub id: Option<u32>,
    /// 编号由外部显式指定，而非顺序推导。
    pub specific_id: bool,
    /// 页内阅读顺序上的前一小节（同一声部，可跨系统）。
    pub preceding: Option<MeasureId>,
    slots: Vec<TimeSlot>,
}

impl Measure {
    #[inline]
    pub fn contains_x(&self, x: f64) -> bool {
        x >= self.left && x < self.right
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    #[inline]
    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    /// 横坐标最接近的时间槽；距离相同时取靠左者。
    pub fn closest_slot(&self, x: f64) -> Option<&TimeSlot> {
        let mut best: Option<(&TimeSlot, f64)> = None;
        for slot in &self.slots {
            let dx = (slot.x - x).abs();
            if best.is_none_or(|(_, best_dx)| dx < best_dx) {
                best = Some((slot, dx));
            }
        }
        best.map(|(slot, _)| slot)
    }

    /// 不早于给定横坐标的第一个时间槽。
    pub fn following_slot(&self, x: f64) -> Option<&TimeSlot> {
        self.slots.iter().find(|slot| slot.x >= x)
    }

    /// 不晚于给定横坐标的最后一个时间槽。
    pub fn preceding_slot(&self, x: f64) -> Option<&TimeSlot> {
        self.slots.iter().take_while(|slot| slot.x <= x).last()
    }

    /// 显式指定编号。
    pub fn set_specific_id(&mut self, id: u32) {
        self.id = Some(id);
        self.specific_id = true;
    }
}

#[derive(Debug, Clone)]
pub struct Chord {
    pub head: SystemPoint,
    pub staff: Option<StaffId>,
}

/// 实体与产生它的识别符号之间的关联。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub id: u64,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clef {
    pub kind: ClefKind,
    pub staff: StaffId,
    pub location: StaffPoint,
    pub symbol: SymbolRef,
}

/// 附着在某个和弦上的记号（延长号、力度、装饰音等），种类由符号形状决定。
#[derive(Debug, Clone, PartialEq)]
pub struct ChordMark {
    pub chord: ChordId,
    pub location: SystemPoint,
    pub symbol: SymbolRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pedal {
    /// `true` 表示踩下，`false` 表示抬起。
    pub start: bool,
    pub mark: ChordMark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WedgeKind {
    Crescendo,
    Decrescendo,
}

/// 渐强/渐弱：挂在声部上，可跨越小节线。横向范围为系统局部坐标。
#[derive(Debug, Clone, PartialEq)]
pub struct Wedge {
    pub kind: WedgeKind,
    pub staff: StaffId,
    pub left: f64,
    pub right: f64,
    pub location: SystemPoint,
    pub symbol: SymbolRef,
}

/// 拍号。完整形状直接给出分子分母；单独的数字按其相对谱表中线的位置补入分子或分母。
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSignature {
    pub staff: StaffId,
    pub numerator: Option<u32>,
    pub denominator: Option<u32>,
    /// 首个符号的中心，谱表局部坐标。
    pub location: StaffPoint,
    pub symbol: SymbolRef,
    /// 之后并入的数字符号。
    pub extra: Vec<SymbolRef>,
}

impl TimeSignature {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.numerator.is_some() && self.denominator.is_some()
    }

    #[inline]
    pub fn rational(&self) -> Option<(u32, u32)> {
        self.numerator.zip(self.denominator)
    }
}

/// 调号：`key` 为正表示升号个数，为负表示降号个数。
#[derive(Debug, Clone, PartialEq)]
pub struct KeySignature {
    pub staff: StaffId,
    pub key: i32,
    /// 全部符号包围盒的并集，谱表局部坐标。
    pub bounds: StaffRect,
    pub symbol: SymbolRef,
    pub extra: Vec<SymbolRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Barline {
    pub style: BarlineStyle,
    pub staff: StaffId,
    pub location: SystemPoint,
    pub symbol: SymbolRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Clef(Clef),
    TimeSignature(TimeSignature),
    KeySignature(KeySignature),
    Fermata(ChordMark),
    Pedal(Pedal),
    Wedge(Wedge),
    Barline(Barline),
    Dynamics(ChordMark),
    Segno(ChordMark),
    Coda(ChordMark),
    Ornament(ChordMark),
    Articulation(ChordMark),
    Arpeggiate(ChordMark),
}

impl Entity {
    pub fn symbol(&self) -> SymbolRef {
        match self {
            Entity::Clef(clef) => clef.symbol,
            Entity::TimeSignature(time) => time.symbol,
            Entity::KeySignature(key) => key.symbol,
            Entity::Pedal(pedal) => pedal.mark.symbol,
            Entity::Wedge(wedge) => wedge.symbol,
            Entity::Barline(barline) => barline.symbol,
            Entity::Fermata(mark)
            | Entity::Dynamics(mark)
            | Entity::Segno(mark)
            | Entity::Coda(mark)
            | Entity::Ornament(mark)
            | Entity::Articulation(mark)
            | Entity::Arpeggiate(mark) => mark.symbol,
        }
    }

    /// 关联的和弦（仅和弦类记号）。
    pub fn chord(&self) -> Option<ChordId> {
        match self {
            Entity::Pedal(pedal) => Some(pedal.mark.chord),
            Entity::Fermata(mark)
            | Entity::Dynamics(mark)
            | Entity::Segno(mark)
            | Entity::Coda(mark)
            | Entity::Ornament(mark)
            | Entity::Articulation(mark)
            | Entity::Arpeggiate(mark) => Some(mark.chord),
            Entity::Clef(_)
            | Entity::TimeSignature(_)
            | Entity::KeySignature(_)
            | Entity::Wedge(_)
            | Entity::Barline(_) => None,
        }
    }

    /// 直接记录谱表归属的实体返回其谱表。
    pub fn staff(&self) -> Option<StaffId> {
        match self {
            Entity::Clef(clef) => Some(clef.staff),
            Entity::TimeSignature(time) => Some(time.staff),
            Entity::KeySignature(key) => Some(key.staff),
            Entity::Wedge(wedge) => Some(wedge.staff),
            Entity::Barline(barline) => Some(barline.staff),
            _ => None,
        }
    }

    fn set_staff(&mut self, staff: StaffId) -> bool {
        match self {
            Entity::Clef(clef) => clef.staff = staff,
            Entity::TimeSignature(time) => time.staff = staff,
            Entity::KeySignature(key) => key.staff = staff,
            Entity::Wedge(wedge) => wedge.staff = staff,
            Entity::Barline(barline) => barline.staff = staff,
            _ => return false,
        }
        true
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Entity::Clef(_) => "clef",
            Entity::TimeSignature(_) => "time_signature",
            Entity::KeySignature(_) => "key_signature",
            Entity::Fermata(_) => "fermata",
            Entity::Pedal(_) => "pedal",
            Entity::Wedge(_) => "wedge",
            Entity::Barline(_) => "barline",
            Entity::Dynamics(_) => "dynamics",
            Entity::Segno(_) => "segno",
            Entity::Coda(_) => "coda",
            Entity::Ornament(_) => "ornament",
            Entity::Articulation(_) => "articulation",
            Entity::Arpeggiate(_) => "arpeggiate",
        }
    }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node: Node,
}

/// 乐谱树的根，同时持有全部节点。
#[derive(Debug, Default, Clone)]
pub struct Score {
    nodes: Vec<NodeEntry>,
    pages: Vec<PageId>,
}

macro_rules! node_accessors {
    ($get:ident, $get_mut:ident, $handle:ty, $variant:ident, $data:ty) => {
        pub fn $get(&self, id: $handle) -> Option<&$data> {
            match self.node(id.node()) {
                Some(Node::$variant(data)) => Some(data),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, id: $handle) -> Option<&mut $data> {
            match self.nodes.get_mut(id.node().index()).map(|entry| &mut entry.node) {
                Some(Node::$variant(data)) => Some(data),
                _ => None,
            }
        }
    };
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // 构建
    // ------------------------------------------------------------------

    pub fn add_page(&mut self, scale: Scale) -> PageId {
        let number = self.pages.len() + 1;
        let id = PageId(self.push(
            None,
            Node::Page(Page {
                number,
                scale,
                delta_measure_id: None,
            }),
        ));
        self.pages.push(id);
        id
    }

    pub fn add_system(&mut self, page: PageId, bounds: PageRect) -> Result<SystemId, ScoreError> {
        self.expect_kind(page)?;
        let number = self.systems(page).count() + 1;
        let system = System {
            number,
            bounds,
            frame: SystemFrame::new(bounds.min()),
        };
        Ok(SystemId(self.push(Some(page.node()), Node::System(system))))
    }

    pub fn add_part(
        &mut self,
        system: SystemId,
        name: Option<String>,
    ) -> Result<PartId, ScoreError> {
        self.expect_kind(system)?;
        let number = self.parts(system).count() + 1;
        Ok(PartId(
            self.push(Some(system.node()), Node::Part(Part { number, name })),
        ))
    }

    /// 挂接谱表并推导其页面坐标原点。
    pub fn add_staff(
        &mut self,
        part: PartId,
        origin: SystemPoint,
        width: f64,
        height: f64,
    ) -> Result<StaffId, ScoreError> {
        let system = self.system_of(part)?;
        let frame = self
            .system(system)
            .map(|system| *system.frame())
            .ok_or(ScoreError::UnknownNode(system.get()))?;
        let number = self.staves_in_system(system).count() + 1;
        let staff = Staff {
            number,
            width,
            height,
            frame: StaffFrame::new(origin),
            page_origin: system_to_page(origin, &frame),
        };
        Ok(StaffId(self.push(Some(part.node()), Node::Staff(staff))))
    }

    /// 追加小节，同时确定其页内序号与前一小节链接。
    pub fn add_measure(
        &mut self,
        part: PartId,
        left: f64,
        right: f64,
    ) -> Result<MeasureId, ScoreError> {
        let system = self.system_of(part)?;
        let index_in_part = self.measures(part).count();
        let local_index = self.page_measure_offset(system)? + index_in_part;
        let preceding = self.structural_preceding(part, index_in_part)?;
        let measure = Measure {
            local_index,
            left,
            right,
            id: None,
            specific_id: false,
            preceding,
            slots: Vec::new(),
        };
        Ok(MeasureId(self.push(Some(part.node()), Node::Measure(measure))))
    }

    pub fn add_chord(
        &mut self,
        measure: MeasureId,
        head: SystemPoint,
        staff: Option<StaffId>,
    ) -> Result<ChordId, ScoreError> {
        self.expect_kind(measure)?;
        if let Some(staff) = staff {
            self.expect_kind(staff)?;
        }
        Ok(ChordId(self.push(
            Some(measure.node()),
            Node::Chord(Chord { head, staff }),
        )))
    }

    /// 为小节追加时间槽；槽按横坐标保持有序，槽内和弦按符头从上到下排列。
    pub fn add_slot(
        &mut self,
        measure: MeasureId,
        x: f64,
        chords: &[ChordId],
    ) -> Result<(), ScoreError> {
        let mut entries = Vec::with_capacity(chords.len());
        for &chord in chords {
            let head = self
                .chord(chord)
                .map(|chord| chord.head)
                .ok_or(ScoreError::UnknownNode(chord.get()))?;
            entries.push(SlotChord { chord, head });
        }
        entries.sort_by(|a, b| a.head.y().total_cmp(&b.head.y()));

        let data = self
            .measure_mut(measure)
            .ok_or(ScoreError::UnknownNode(measure.get()))?;
        let position = data.slots.partition_point(|slot| slot.x <= x);
        data.slots.insert(
            position,
            TimeSlot {
                x,
                chords: entries,
            },
        );
        Ok(())
    }

    /// 将实体追加到小节末尾。
    pub fn add_entity(&mut self, measure: MeasureId, entity: Entity) -> Result<EntityId, ScoreError> {
        self.expect_kind(measure)?;
        trace!(measure = measure.get(), kind = entity.kind_name(), "追加小节实体");
        Ok(EntityId(self.push(Some(measure.node()), Node::Entity(entity))))
    }

    /// 将跨小节的指示（如渐强）追加到声部。
    pub fn add_part_direction(&mut self, part: PartId, entity: Entity) -> Result<EntityId, ScoreError> {
        self.expect_kind(part)?;
        trace!(part = part.get(), kind = entity.kind_name(), "追加声部指示");
        Ok(EntityId(self.push(Some(part.node()), Node::Entity(entity))))
    }

    /// 按当前结构重新计算整页小节的页内序号与前一小节链接。
    pub fn relink_measures(&mut self, page: PageId) -> Result<(), ScoreError> {
        self.expect_kind(page)?;
        let systems: Vec<SystemId> = self.systems(page).collect();
        for system in systems {
            let offset = self.page_measure_offset(system)?;
            let parts: Vec<PartId> = self.parts(system).collect();
            for part in parts {
                let measures: Vec<MeasureId> = self.measures(part).collect();
                for (index, measure) in measures.into_iter().enumerate() {
                    let preceding = self.structural_preceding(part, index)?;
                    if let Some(data) = self.measure_mut(measure) {
                        data.local_index = offset + index;
                        data.preceding = preceding;
                    }
                }
            }
        }
        Ok(())
    }

    /// 修改节点及其全部谱表相关后代的谱表归属，返回被修改的节点数。
    pub fn reassign_staff(&mut self, node: NodeId, staff: StaffId) -> Result<usize, ScoreError> {
        self.expect_kind(staff)?;
        if self.nodes.get(node.index()).is_none() {
            return Err(ScoreError::UnknownNode(node.get()));
        }
        let mut updated = 0;
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            let entry = &mut self.nodes[current.index()];
            let changed = match &mut entry.node {
                Node::Chord(chord) => {
                    chord.staff = Some(staff);
                    true
                }
                Node::Entity(entity) => entity.set_staff(staff),
                _ => false,
            };
            if changed {
                updated += 1;
            }
            pending.extend(entry.children.iter().rev().copied());
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // 访问
    // ------------------------------------------------------------------

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).map(|entry| &entry.node)
    }

    #[inline]
    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(Node::kind)
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|entry| entry.parent)
    }

    #[inline]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    node_accessors!(page, page_mut, PageId, Page, Page);
    node_accessors!(system, system_mut, SystemId, System, System);
    node_accessors!(part, part_mut, PartId, Part, Part);
    node_accessors!(staff, staff_mut, StaffId, Staff, Staff);
    node_accessors!(measure, measure_mut, MeasureId, Measure, Measure);
    node_accessors!(chord, chord_mut, ChordId, Chord, Chord);

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        match self.node(id.node()) {
            Some(Node::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        match self.nodes.get_mut(id.node().index()).map(|entry| &mut entry.node) {
            Some(Node::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    #[inline]
    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.iter().copied()
    }

    pub fn systems(&self, page: PageId) -> impl Iterator<Item = SystemId> + '_ {
        self.children_of::<SystemId>(page.node())
    }

    pub fn parts(&self, system: SystemId) -> impl Iterator<Item = PartId> + '_ {
        self.children_of::<PartId>(system.node())
    }

    pub fn staves(&self, part: PartId) -> impl Iterator<Item = StaffId> + '_ {
        self.children_of::<StaffId>(part.node())
    }

    pub fn measures(&self, part: PartId) -> impl Iterator<Item = MeasureId> + '_ {
        self.children_of::<MeasureId>(part.node())
    }

    pub fn chords(&self, measure: MeasureId) -> impl Iterator<Item = ChordId> + '_ {
        self.children_of::<ChordId>(measure.node())
    }

    /// 小节内的实体，按追加顺序。
    pub fn entities(&self, measure: MeasureId) -> impl Iterator<Item = (EntityId, &Entity)> + '_ {
        self.entities_under(measure.node())
    }

    /// 声部级指示（渐强/渐弱）。
    pub fn part_directions(&self, part: PartId) -> impl Iterator<Item = (EntityId, &Entity)> + '_ {
        self.entities_under(part.node())
    }

    /// 小节内某谱表上的拍号（至多一个）。
    pub fn time_signature(
        &self,
        measure: MeasureId,
        staff: StaffId,
    ) -> Option<(EntityId, &TimeSignature)> {
        self.entities(measure).find_map(|(id, entity)| match entity {
            Entity::TimeSignature(time) if time.staff == staff => Some((id, time)),
            _ => None,
        })
    }

    /// 小节内某谱表上的调号，按左边界从左到右排列。
    pub fn key_signatures(
        &self,
        measure: MeasureId,
        staff: StaffId,
    ) -> Vec<(EntityId, &KeySignature)> {
        let mut keys: Vec<(EntityId, &KeySignature)> = self
            .entities(measure)
            .filter_map(|(id, entity)| match entity {
                Entity::KeySignature(key) if key.staff == staff => Some((id, key)),
                _ => None,
            })
            .collect();
        keys.sort_by(|a, b| a.1.bounds.min().x().total_cmp(&b.1.bounds.min().x()));
        keys
    }

    pub fn clefs(&self, measure: MeasureId) -> impl Iterator<Item = &Clef> + '_ {
        self.entities(measure).filter_map(|(_, entity)| match entity {
            Entity::Clef(clef) => Some(clef),
            _ => None,
        })
    }

    /// 系统内全部谱表，按声部及声部内顺序排列。
    pub fn staves_in_system(&self, system: SystemId) -> impl Iterator<Item = StaffId> + '_ {
        self.parts(system).flat_map(move |part| self.staves(part))
    }

    /// 页内全部小节，按系统 → 声部 → 小节的阅读顺序。
    pub fn measures_in_page(&self, page: PageId) -> impl Iterator<Item = MeasureId> + '_ {
        self.systems(page)
            .flat_map(move |system| self.parts(system))
            .flat_map(move |part| self.measures(part))
    }

    pub fn system_of(&self, part: PartId) -> Result<SystemId, ScoreError> {
        self.typed_parent(part.node())
    }

    pub fn page_of(&self, system: SystemId) -> Result<PageId, ScoreError> {
        self.typed_parent(system.node())
    }

    pub fn part_of_staff(&self, staff: StaffId) -> Result<PartId, ScoreError> {
        self.typed_parent(staff.node())
    }

    pub fn part_of_measure(&self, measure: MeasureId) -> Result<PartId, ScoreError> {
        self.typed_parent(measure.node())
    }

    pub fn page_of_measure(&self, measure: MeasureId) -> Result<PageId, ScoreError> {
        let part = self.part_of_measure(measure)?;
        self.page_of(self.system_of(part)?)
    }

    /// 同一声部、同一系统内的前一小节。
    pub fn previous_in_part(&self, measure: MeasureId) -> Option<MeasureId> {
        let part = self.part_of_measure(measure).ok()?;
        let mut previous = None;
        for candidate in self.measures(part) {
            if candidate == measure {
                return previous;
            }
            previous = Some(candidate);
        }
        None
    }

    pub fn closest_slot(&self, measure: MeasureId, x: f64) -> Option<&TimeSlot> {
        self.measure(measure)?.closest_slot(x)
    }

    /// 全局小节编号：页偏移 + 页内编号。
    pub fn global_measure_id(&self, measure: MeasureId) -> Option<i64> {
        let id = self.measure(measure)?.id?;
        let page = self.page_of_measure(measure).ok()?;
        let delta = self.page(page)?.delta_measure_id?;
        Some(i64::from(delta) + i64::from(id))
    }

    // ------------------------------------------------------------------
    // 空间查找
    // ------------------------------------------------------------------

    /// 区域包含该点的系统；系统自上而下且互不重叠。
    pub fn system_at(&self, page: PageId, point: PagePoint) -> Option<SystemId> {
        self.systems(page).find(|&system| {
            self.system(system)
                .is_some_and(|data| data.bounds().contains(point))
        })
    }

    /// 小节区间包含谱表局部横坐标的小节。
    pub fn measure_at(&self, staff: StaffId, point: StaffPoint) -> Option<MeasureId> {
        let part = self.part_of_staff(staff).ok()?;
        self.measures(part).find(|&measure| {
            self.measure(measure)
                .is_some_and(|data| data.contains_x(point.x()))
        })
    }

    // ------------------------------------------------------------------
    // 内部
    // ------------------------------------------------------------------

    fn push(&mut self, parent: Option<NodeId>, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeEntry {
            parent,
            children: Vec::new(),
            node,
        });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    fn expect_kind<H: TypedHandle>(&self, handle: H) -> Result<(), ScoreError> {
        let node: NodeId = handle.into();
        match self.node_kind(node) {
            Some(kind) if kind == H::KIND => Ok(()),
            Some(actual) => Err(ScoreError::KindMismatch {
                node: node.get(),
                expected: H::KIND,
                actual,
            }),
            None => Err(ScoreError::UnknownNode(node.get())),
        }
    }

    fn typed_parent<H: TypedHandle>(&self, node: NodeId) -> Result<H, ScoreError> {
        let parent = self
            .parent(node)
            .ok_or(ScoreError::UnknownNode(node.get()))?;
        let handle = H::wrap(parent);
        self.expect_kind(handle)?;
        Ok(handle)
    }

    fn children_of<H: TypedHandle>(&self, node: NodeId) -> impl Iterator<Item = H> + '_ {
        self.children(node)
            .iter()
            .copied()
            .filter(move |&child| self.node_kind(child) == Some(H::KIND))
            .map(H::wrap)
    }

    fn entities_under(&self, node: NodeId) -> impl Iterator<Item = (EntityId, &Entity)> + '_ {
        self.children(node)
            .iter()
            .filter_map(move |&child| match self.node(child) {
                Some(Node::Entity(entity)) => Some((EntityId(child), entity)),
                _ => None,
            })
    }

    /// 本系统之前各系统的小节列数之和（取各系统中小节最多的声部）。
    fn page_measure_offset(&self, system: SystemId) -> Result<usize, ScoreError> {
        let page = self.page_of(system)?;
        let offset: usize = self
            .systems(page)
            .take_while(|&candidate| candidate != system)
            .map(|previous| self.system_measure_columns(previous))
            .sum();
        Ok(offset)
    }

    fn system_measure_columns(&self, system: SystemId) -> usize {
        self.parts(system)
            .map(|part| self.measures(part).count())
            .max()
            .unwrap_or(0)
    }

    /// 声部内第 `index` 个小节在页内的前一小节：同一声部的前一个，
    /// 或上一系统中同序号声部（不足时取最后一个声部）的最后一个小节。
    fn structural_preceding(
        &self,
        part: PartId,
        index: usize,
    ) -> Result<Option<MeasureId>, ScoreError> {
        if index > 0 {
            return Ok(self.measures(part).nth(index - 1));
        }
        let system = self.system_of(part)?;
        let page = self.page_of(system)?;
        let part_position = self
            .parts(system)
            .position(|candidate| candidate == part)
            .unwrap_or(0);
        let previous_system = self
            .systems(page)
            .take_while(|&candidate| candidate != system)
            .last();
        let Some(previous_system) = previous_system else {
            return Ok(None);
        };
        let previous_parts: Vec<PartId> = self.parts(previous_system).collect();
        let previous_part = previous_parts
            .get(part_position)
            .or_else(|| previous_parts.last())
            .copied();
        Ok(previous_part.and_then(|previous| self.measures(previous).last()))
    }
}
