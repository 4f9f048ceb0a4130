//! 空间定位：像素点 → 系统 → 谱表 → 小节。

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::{
    PagePoint, PixelPoint, StaffPoint, SystemPoint, page_to_system, pixel_to_page,
    system_to_staff,
};
use crate::score::{MeasureId, PageId, PartId, Score, StaffId, SystemId};

/// 点落在两个谱表之间的空隙时的归属策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffGapPolicy {
    /// 位于空隙中线上方归上方谱表，其余（含恰在中线上）归下方谱表。
    #[default]
    Midpoint,
    /// 总是归上方谱表。
    Above,
    /// 总是归下方谱表。
    Below,
}

impl StaffGapPolicy {
    fn pick_upper(self, y: f64, upper_bottom: f64, lower_top: f64) -> bool {
        match self {
            StaffGapPolicy::Midpoint => y < (upper_bottom + lower_top) * 0.5,
            StaffGapPolicy::Above => true,
            StaffGapPolicy::Below => false,
        }
    }
}

impl Score {
    /// 系统内竖直方向包含该点的谱表。
    ///
    /// 谱表之间的空隙按 `policy` 处理；位于首个谱表上方或末个谱表下方的点
    /// 分别归入首个或末个谱表。系统内没有谱表时返回 `None`。
    pub fn staff_at(
        &self,
        system: SystemId,
        point: SystemPoint,
        policy: StaffGapPolicy,
    ) -> Option<StaffId> {
        let mut staves: Vec<(StaffId, f64, f64)> = self
            .staves_in_system(system)
            .filter_map(|id| self.staff(id).map(|staff| (id, staff.top(), staff.bottom())))
            .collect();
        staves.sort_by(|a, b| a.1.total_cmp(&b.1));

        let y = point.y();
        let (first, first_top, _) = *staves.first()?;
        if y < first_top {
            return Some(first);
        }
        for pair in staves.windows(2) {
            let (upper, _, upper_bottom) = pair[0];
            let (lower, lower_top, _) = pair[1];
            if y <= upper_bottom {
                return Some(upper);
            }
            if y < lower_top {
                let staff = if policy.pick_upper(y, upper_bottom, lower_top) {
                    upper
                } else {
                    lower
                };
                return Some(staff);
            }
        }
        staves.last().map(|&(last, _, _)| last)
    }
}

/// 一次成功定位的完整结果，同时给出各层坐标。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub page: PageId,
    pub system: SystemId,
    pub part: PartId,
    pub staff: StaffId,
    pub measure: MeasureId,
    pub page_point: PagePoint,
    pub system_point: SystemPoint,
    pub staff_point: StaffPoint,
}

/// 只读的空间定位器，借用乐谱树。
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    score: &'a Score,
    policy: StaffGapPolicy,
}

impl<'a> Resolver<'a> {
    pub fn new(score: &'a Score) -> Self {
        Self {
            score,
            policy: StaffGapPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StaffGapPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    pub fn policy(&self) -> StaffGapPolicy {
        self.policy
    }

    /// 定位像素点，任一环节失败即返回 `None`，不保留部分结果。
    pub fn resolve(&self, page: PageId, point: PixelPoint) -> Option<Resolution> {
        let scale = self.score.page(page)?.scale;
        self.resolve_page_point(page, pixel_to_page(point, scale))
    }

    pub fn resolve_page_point(&self, page: PageId, page_point: PagePoint) -> Option<Resolution> {
        let Some(system) = self.score.system_at(page, page_point) else {
            trace!(point = %page_point, "未落在任何系统内");
            return None;
        };
        let system_point = page_to_system(page_point, self.score.system(system)?.frame());

        let Some(staff) = self.score.staff_at(system, system_point, self.policy) else {
            trace!(system = system.get(), point = %system_point, "系统内没有谱表");
            return None;
        };
        let staff_point = system_to_staff(system_point, self.score.staff(staff)?.frame());

        let Some(measure) = self.score.measure_at(staff, staff_point) else {
            trace!(staff = staff.get(), point = %staff_point, "未落在任何小节内");
            return None;
        };
        let part = self.score.part_of_staff(staff).ok()?;

        Some(Resolution {
            page,
            system,
            part,
            staff,
            measure,
            page_point,
            system_point,
            staff_point,
        })
    }
}
