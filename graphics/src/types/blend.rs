//! Blend operations and composite modes.

/// Abstract blend factor applied to the source or destination color.
///
/// All colors are premultiplied by alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Zero,
    One,
    SrcAlpha,
    DstAlpha,
    OneMinusSrcAlpha,
    OneMinusDstAlpha,
    DstColor,
    OneMinusSrcColor,
}

impl BlendOperation {
    /// Every blend operation.
    pub const ALL: [Self; 8] = [
        Self::Zero,
        Self::One,
        Self::SrcAlpha,
        Self::DstAlpha,
        Self::OneMinusSrcAlpha,
        Self::OneMinusDstAlpha,
        Self::DstColor,
        Self::OneMinusSrcColor,
    ];
}

/// How a drawn pixel combines with the destination pixel.
///
/// Each mode is a fixed (source, destination) pair of [`BlendOperation`]s,
/// applied identically to color and alpha with an additive blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositeMode {
    #[default]
    SourceOver,
    Clear,
    Copy,
    Destination,
    DestinationOver,
    SourceIn,
    DestinationIn,
    SourceOut,
    DestinationOut,
    SourceAtop,
    DestinationAtop,
    Xor,
    /// Additive: `src + dst`.
    Lighter,
    /// `src * dst + dst * (1 - src_alpha)`.
    Multiply,
    /// `src + dst * (1 - src)`.
    Screen,
}

impl CompositeMode {
    /// Every composite mode.
    pub const ALL: [Self; 15] = [
        Self::SourceOver,
        Self::Clear,
        Self::Copy,
        Self::Destination,
        Self::DestinationOver,
        Self::SourceIn,
        Self::DestinationIn,
        Self::SourceOut,
        Self::DestinationOut,
        Self::SourceAtop,
        Self::DestinationAtop,
        Self::Xor,
        Self::Lighter,
        Self::Multiply,
        Self::Screen,
    ];

    /// The (source, destination) operation pair of this mode.
    pub fn operations(self) -> (BlendOperation, BlendOperation) {
        use BlendOperation::*;
        match self {
            Self::SourceOver => (One, OneMinusSrcAlpha),
            Self::Clear => (Zero, Zero),
            Self::Copy => (One, Zero),
            Self::Destination => (Zero, One),
            Self::DestinationOver => (OneMinusDstAlpha, One),
            Self::SourceIn => (DstAlpha, Zero),
            Self::DestinationIn => (Zero, SrcAlpha),
            Self::SourceOut => (OneMinusDstAlpha, Zero),
            Self::DestinationOut => (Zero, OneMinusSrcAlpha),
            Self::SourceAtop => (DstAlpha, OneMinusSrcAlpha),
            Self::DestinationAtop => (OneMinusDstAlpha, SrcAlpha),
            Self::Xor => (OneMinusDstAlpha, OneMinusSrcAlpha),
            Self::Lighter => (One, One),
            Self::Multiply => (DstColor, OneMinusSrcAlpha),
            Self::Screen => (One, OneMinusSrcColor),
        }
    }
}
