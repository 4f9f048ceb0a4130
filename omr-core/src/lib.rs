pub mod resolver;
pub mod score;
pub mod symbol;
pub mod visitor;

pub mod geometry {
    use std::fmt;
    use std::marker::PhantomData;

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 每个行间距折算的页面单位数。
    pub const INTERLINE_UNITS: f64 = 16.0;

    /// 坐标空间标记。空间类型均为零尺寸类型，仅用于在编译期区分坐标系。
    pub trait Space: Copy + fmt::Debug + Default + PartialEq + Eq + 'static {
        const NAME: &'static str;
    }

    macro_rules! coordinate_space {
        ($(#[$meta:meta])* $name:ident, $label:literal) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
            pub struct $name;

            impl Space for $name {
                const NAME: &'static str = $label;
            }
        };
    }

    coordinate_space!(
        /// 扫描图像的像素空间。
        PixelSpace,
        "pixel"
    );
    coordinate_space!(
        /// 页面空间，单位为 1/16 行间距。
        PageSpace,
        "page"
    );
    coordinate_space!(
        /// 以系统左上角为原点的局部空间。
        SystemSpace,
        "system"
    );
    coordinate_space!(
        /// 以谱表左上角为原点的局部空间。
        StaffSpace,
        "staff"
    );

    /// 带空间标记的二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(transparent, bound = "")]
    pub struct Point<S: Space> {
        vec: DVec2,
        #[serde(skip)]
        space: PhantomData<S>,
    }

    impl<S: Space> Point<S> {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self::from_vec(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self {
                vec,
                space: PhantomData,
            }
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.vec.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.vec.y
        }

        #[inline]
        pub fn translate(self, offset: Vector<S>) -> Self {
            Self::from_vec(self.vec + offset.vec)
        }

        #[inline]
        pub fn vector_to(self, other: Point<S>) -> Vector<S> {
            Vector::from_vec(other.vec - self.vec)
        }

        /// 同一空间内的欧氏距离；跨空间调用无法通过编译。
        #[inline]
        pub fn distance(self, other: Point<S>) -> f64 {
            self.vec.distance(other.vec)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.vec
        }
    }

    impl<S: Space> fmt::Display for Point<S> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}({:.1}, {:.1})", S::NAME, self.vec.x, self.vec.y)
        }
    }

    /// 带空间标记的二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(transparent, bound = "")]
    pub struct Vector<S: Space> {
        vec: DVec2,
        #[serde(skip)]
        space: PhantomData<S>,
    }

    impl<S: Space> Vector<S> {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self::from_vec(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self {
                vec,
                space: PhantomData,
            }
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.vec.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.vec.y
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.vec.length_squared()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.vec
        }
    }

    /// 轴对齐矩形，以最小/最大角点保存，与点共享空间标记。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(bound = "")]
    pub struct Rect<S: Space> {
        min: Point<S>,
        max: Point<S>,
    }

    impl<S: Space> Rect<S> {
        /// 以左上角和宽高构造，负的宽高按零处理。
        #[inline]
        pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
            Self {
                min: Point::new(x, y),
                max: Point::new(x + width.max(0.0), y + height.max(0.0)),
            }
        }

        #[inline]
        pub fn from_corners(min: Point<S>, max: Point<S>) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point::new(f64::INFINITY, f64::INFINITY),
                max: Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point<S> {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point<S> {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        /// 闭区间包含判断，边界上的点视为在矩形内。
        #[inline]
        pub fn contains(&self, point: Point<S>) -> bool {
            !self.is_empty()
                && point.x() >= self.min.x()
                && point.x() <= self.max.x()
                && point.y() >= self.min.y()
                && point.y() <= self.max.y()
        }

        pub fn include_point(&mut self, point: Point<S>) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point::from_vec(self.min.as_vec2().min(point.as_vec2()));
            self.max = Point::from_vec(self.max.as_vec2().max(point.as_vec2()));
        }

        pub fn include_rect(&mut self, other: &Rect<S>) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point<S> {
            debug_assert!(!self.is_empty());
            Point::from_vec((self.min.as_vec2() + self.max.as_vec2()) * 0.5)
        }

        /// 左边缘中点，渐强/渐弱记号以此定位。
        #[inline]
        pub fn left_middle(&self) -> Point<S> {
            Point::new(self.min.x(), (self.min.y() + self.max.y()) * 0.5)
        }

        #[inline]
        pub fn translate(&self, offset: Vector<S>) -> Self {
            Self {
                min: self.min.translate(offset),
                max: self.max.translate(offset),
            }
        }

        /// 四周各向外扩展 `dx`、`dy`。
        pub fn inflate(&self, dx: f64, dy: f64) -> Self {
            if self.is_empty() {
                return *self;
            }
            Self {
                min: Point::new(self.min.x() - dx, self.min.y() - dy),
                max: Point::new(self.max.x() + dx, self.max.y() + dy),
            }
        }

        /// 闭区间相交判断，仅共享边界也视为相交。
        pub fn intersects(&self, other: &Rect<S>) -> bool {
            !self.is_empty()
                && !other.is_empty()
                && self.min.x() <= other.max.x()
                && other.min.x() <= self.max.x()
                && self.min.y() <= other.max.y()
                && other.min.y() <= self.max.y()
        }
    }

    pub type PixelPoint = Point<PixelSpace>;
    pub type PagePoint = Point<PageSpace>;
    pub type SystemPoint = Point<SystemSpace>;
    pub type StaffPoint = Point<StaffSpace>;

    pub type PixelRect = Rect<PixelSpace>;
    pub type PageRect = Rect<PageSpace>;
    pub type SystemRect = Rect<SystemSpace>;
    pub type StaffRect = Rect<StaffSpace>;

    /// 页面比例尺：记录行间距（像素），决定像素与页面单位之间的换算。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Scale {
        interline: f64,
    }

    impl Scale {
        /// 行间距必须为有限正数，否则返回 `None`。
        pub fn from_interline(interline: f64) -> Option<Self> {
            if interline.is_finite() && interline > 0.0 {
                Some(Self { interline })
            } else {
                None
            }
        }

        /// 一个像素恰好对应一个页面单位的比例尺，便于测试与演示。
        #[inline]
        pub fn identity() -> Self {
            Self {
                interline: INTERLINE_UNITS,
            }
        }

        #[inline]
        pub fn interline(self) -> f64 {
            self.interline
        }

        #[inline]
        pub fn units_per_pixel(self) -> f64 {
            INTERLINE_UNITS / self.interline
        }
    }

    impl Default for Scale {
        fn default() -> Self {
            Self::identity()
        }
    }

    /// 外层空间 `O` 到内层空间 `I` 的平移，`origin` 为内层原点在外层中的坐标。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(bound = "")]
    pub struct Translation<O: Space, I: Space> {
        origin: Point<O>,
        #[serde(skip)]
        inner: PhantomData<I>,
    }

    impl<O: Space, I: Space> Translation<O, I> {
        #[inline]
        pub fn new(origin: Point<O>) -> Self {
            Self {
                origin,
                inner: PhantomData,
            }
        }

        #[inline]
        pub fn origin(&self) -> Point<O> {
            self.origin
        }

        #[inline]
        pub fn to_inner(&self, point: Point<O>) -> Point<I> {
            Point::from_vec(point.as_vec2() - self.origin.as_vec2())
        }

        #[inline]
        pub fn to_outer(&self, point: Point<I>) -> Point<O> {
            Point::from_vec(point.as_vec2() + self.origin.as_vec2())
        }

        pub fn rect_to_inner(&self, rect: &Rect<O>) -> Rect<I> {
            Rect::from_corners(self.to_inner(rect.min()), self.to_inner(rect.max()))
        }

        pub fn rect_to_outer(&self, rect: &Rect<I>) -> Rect<O> {
            Rect::from_corners(self.to_outer(rect.min()), self.to_outer(rect.max()))
        }
    }

    /// 页面 → 系统局部空间。
    pub type SystemFrame = Translation<PageSpace, SystemSpace>;
    /// 系统局部空间 → 谱表局部空间。
    pub type StaffFrame = Translation<SystemSpace, StaffSpace>;

    /// 像素点换算到页面空间，结果按“四舍六入五成双”取整。
    pub fn pixel_to_page(point: PixelPoint, scale: Scale) -> PagePoint {
        let scaled = point.as_vec2() * scale.units_per_pixel();
        PagePoint::new(scaled.x.round_ties_even(), scaled.y.round_ties_even())
    }

    pub fn page_to_pixel(point: PagePoint, scale: Scale) -> PixelPoint {
        PixelPoint::from_vec(point.as_vec2() / scale.units_per_pixel())
    }

    pub fn pixel_rect_to_page(rect: &PixelRect, scale: Scale) -> PageRect {
        PageRect::from_corners(
            pixel_to_page(rect.min(), scale),
            pixel_to_page(rect.max(), scale),
        )
    }

    #[inline]
    pub fn page_to_system(point: PagePoint, system: &SystemFrame) -> SystemPoint {
        system.to_inner(point)
    }

    #[inline]
    pub fn system_to_page(point: SystemPoint, system: &SystemFrame) -> PagePoint {
        system.to_outer(point)
    }

    #[inline]
    pub fn system_to_staff(point: SystemPoint, staff: &StaffFrame) -> StaffPoint {
        staff.to_inner(point)
    }

    #[inline]
    pub fn staff_to_system(point: StaffPoint, staff: &StaffFrame) -> SystemPoint {
        staff.to_outer(point)
    }

    /// 页面 → 谱表，必须经过所属系统的局部空间。
    pub fn page_to_staff(point: PagePoint, system: &SystemFrame, staff: &StaffFrame) -> StaffPoint {
        system_to_staff(page_to_system(point, system), staff)
    }

    pub fn staff_to_page(point: StaffPoint, system: &SystemFrame, staff: &StaffFrame) -> PagePoint {
        system_to_page(staff_to_system(point, staff), system)
    }

}

pub mod errors {
    use thiserror::Error;

    use crate::score::NodeKind;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum ScoreError {
        #[error("node #{0} does not belong to this score")]
        UnknownNode(u32),
        #[error("node #{node} is a {actual:?}, expected a {expected:?}")]
        KindMismatch {
            node: u32,
            expected: NodeKind,
            actual: NodeKind,
        },
    }
}
