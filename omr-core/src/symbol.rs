//! 识别层交付的符号：形状分类 + 像素包围盒。

use serde::{Deserialize, Serialize};

use crate::geometry::PixelRect;

/// 识别层给出的形状分类。`Clutter` 与 `Noise` 是兜底的“未识别”类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Clutter,
    Noise,

    GClef,
    GClefOttavaAlta,
    GClefOttavaBassa,
    CClef,
    FClef,
    FClefOttavaBassa,
    PercussionClef,

    CommonTime,
    CutTime,
    TimeTwoTwo,
    TimeTwoFour,
    TimeThreeFour,
    TimeFourFour,
    TimeFiveFour,
    TimeSixFour,
    TimeThreeEight,
    TimeSixEight,
    TimeTwelveEight,
    TimeZero,
    TimeOne,
    TimeTwo,
    TimeThree,
    TimeFour,
    TimeFive,
    TimeSix,
    TimeSeven,
    TimeEight,
    TimeNine,
    TimeTwelve,
    TimeSixteen,

    Sharp,
    Flat,

    Fermata,
    FermataBelow,

    Arpeggiato,

    PedalMark,
    PedalUpMark,

    Crescendo,
    Decrescendo,

    ThinBarline,
    ThickBarline,
    DoubleBarline,
    FinalBarline,
    ReverseFinalBarline,

    Segno,
    Coda,

    DynamicsPp,
    DynamicsP,
    DynamicsMp,
    DynamicsMf,
    DynamicsF,
    DynamicsFf,
    DynamicsFp,
    DynamicsSf,
    DynamicsSfz,

    Trill,
    Turn,
    Mordent,
    InvertedMordent,

    Accent,
    StrongAccent,
    Tenuto,
    Staccato,
    Staccatissimo,

    // 以下形状由其他阶段处理，装配阶段不关心
    Natural,
    NoteheadBlack,
}

impl Shape {
    #[inline]
    pub fn is_unrecognized(self) -> bool {
        matches!(self, Shape::Clutter | Shape::Noise)
    }

    pub fn clef_kind(self) -> Option<ClefKind> {
        let kind = match self {
            Shape::GClef => ClefKind::Treble,
            Shape::GClefOttavaAlta => ClefKind::TrebleOttavaAlta,
            Shape::GClefOttavaBassa => ClefKind::TrebleOttavaBassa,
            Shape::CClef => ClefKind::Alto,
            Shape::FClef => ClefKind::Bass,
            Shape::FClefOttavaBassa => ClefKind::BassOttavaBassa,
            Shape::PercussionClef => ClefKind::Percussion,
            _ => return None,
        };
        Some(kind)
    }

    pub fn barline_style(self) -> Option<BarlineStyle> {
        let style = match self {
            Shape::ThinBarline => BarlineStyle::Thin,
            Shape::ThickBarline => BarlineStyle::Thick,
            Shape::DoubleBarline => BarlineStyle::Double,
            Shape::FinalBarline => BarlineStyle::Final,
            Shape::ReverseFinalBarline => BarlineStyle::ReverseFinal,
            _ => return None,
        };
        Some(style)
    }

    /// 完整拍号形状对应的分子与分母。
    pub fn time_rational(self) -> Option<(u32, u32)> {
        let rational = match self {
            Shape::CommonTime | Shape::TimeFourFour => (4, 4),
            Shape::CutTime | Shape::TimeTwoTwo => (2, 2),
            Shape::TimeTwoFour => (2, 4),
            Shape::TimeThreeFour => (3, 4),
            Shape::TimeFiveFour => (5, 4),
            Shape::TimeSixFour => (6, 4),
            Shape::TimeThreeEight => (3, 8),
            Shape::TimeSixEight => (6, 8),
            Shape::TimeTwelveEight => (12, 8),
            _ => return None,
        };
        Some(rational)
    }

    /// 拍号中单独识别出的数字，需要与同一谱表上的另一半拼成完整拍号。
    pub fn time_number(self) -> Option<u32> {
        let number = match self {
            Shape::TimeZero => 0,
            Shape::TimeOne => 1,
            Shape::TimeTwo => 2,
            Shape::TimeThree => 3,
            Shape::TimeFour => 4,
            Shape::TimeFive => 5,
            Shape::TimeSix => 6,
            Shape::TimeSeven => 7,
            Shape::TimeEight => 8,
            Shape::TimeNine => 9,
            Shape::TimeTwelve => 12,
            Shape::TimeSixteen => 16,
            _ => return None,
        };
        Some(number)
    }

    #[inline]
    pub fn is_time(self) -> bool {
        self.time_rational().is_some() || self.time_number().is_some()
    }

    /// 调号中单个符号的贡献：升号 +1，降号 -1。
    pub fn key_step(self) -> Option<i32> {
        match self {
            Shape::Sharp => Some(1),
            Shape::Flat => Some(-1),
            _ => None,
        }
    }

    /// 力度记号的文字形式，例如 `mf`。
    pub fn dynamics_text(self) -> Option<&'static str> {
        let text = match self {
            Shape::DynamicsPp => "pp",
            Shape::DynamicsP => "p",
            Shape::DynamicsMp => "mp",
            Shape::DynamicsMf => "mf",
            Shape::DynamicsF => "f",
            Shape::DynamicsFf => "ff",
            Shape::DynamicsFp => "fp",
            Shape::DynamicsSf => "sf",
            Shape::DynamicsSfz => "sfz",
            _ => return None,
        };
        Some(text)
    }

    #[inline]
    pub fn is_fermata(self) -> bool {
        matches!(self, Shape::Fermata | Shape::FermataBelow)
    }

    #[inline]
    pub fn is_pedal(self) -> bool {
        matches!(self, Shape::PedalMark | Shape::PedalUpMark)
    }

    #[inline]
    pub fn is_wedge(self) -> bool {
        matches!(self, Shape::Crescendo | Shape::Decrescendo)
    }

    #[inline]
    pub fn is_ornament(self) -> bool {
        matches!(
            self,
            Shape::Trill | Shape::Turn | Shape::Mordent | Shape::InvertedMordent
        )
    }

    #[inline]
    pub fn is_articulation(self) -> bool {
        matches!(
            self,
            Shape::Accent
                | Shape::StrongAccent
                | Shape::Tenuto
                | Shape::Staccato
                | Shape::Staccatissimo
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClefKind {
    Treble,
    TrebleOttavaAlta,
    TrebleOttavaBassa,
    Alto,
    Bass,
    BassOttavaBassa,
    Percussion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarlineStyle {
    Thin,
    Thick,
    Double,
    Final,
    ReverseFinal,
}

/// 识别层输出的一个符号。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: u64,
    pub shape: Shape,
    pub bounds: PixelRect,
    /// 识别结果足够可信时为 `true`。
    #[serde(default = "Symbol::default_well_known")]
    pub well_known: bool,
}

impl Symbol {
    pub fn new(id: u64, shape: Shape, bounds: PixelRect) -> Self {
        Self {
            id,
            shape,
            bounds,
            well_known: true,
        }
    }

    fn default_well_known() -> bool {
        true
    }

    /// 装配阶段只关心可信且非兜底类别的符号。
    #[inline]
    pub fn is_assemblable(&self) -> bool {
        self.well_known && !self.shape.is_unrecognized()
    }
}
