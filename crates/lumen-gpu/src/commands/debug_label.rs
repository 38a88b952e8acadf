//! Debug label colors for command buffer regions.

/// Palette for debug label regions shown in GPU debuggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugLabelColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Magenta,
    Cyan,
    Brown,
    Pink,
    Lime,
    Turquoise,
    Beige,
    Maroon,
    Olive,
    Navy,
    Teal,
}

impl DebugLabelColor {
    /// Every palette entry, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::Red,
        Self::Blue,
        Self::Green,
        Self::Yellow,
        Self::Purple,
        Self::Orange,
        Self::Magenta,
        Self::Cyan,
        Self::Brown,
        Self::Pink,
        Self::Lime,
        Self::Turquoise,
        Self::Beige,
        Self::Maroon,
        Self::Olive,
        Self::Navy,
        Self::Teal,
    ];

    /// Palette entry for an arbitrary index, wrapping around.
    pub const fn cycle(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    /// RGBA value passed to the debug utils label.
    pub const fn rgba(self) -> [f32; 4] {
        match self {
            Self::Red => [0.98, 0.60, 0.60, 1.0],
            Self::Blue => [0.60, 0.70, 0.98, 1.0],
            Self::Green => [0.60, 0.92, 0.62, 1.0],
            Self::Yellow => [0.98, 0.95, 0.60, 1.0],
            Self::Purple => [0.75, 0.62, 0.92, 1.0],
            Self::Orange => [0.98, 0.78, 0.55, 1.0],
            Self::Magenta => [0.95, 0.60, 0.90, 1.0],
            Self::Cyan => [0.60, 0.92, 0.95, 1.0],
            Self::Brown => [0.76, 0.62, 0.52, 1.0],
            Self::Pink => [0.98, 0.75, 0.82, 1.0],
            Self::Lime => [0.80, 0.96, 0.58, 1.0],
            Self::Turquoise => [0.55, 0.88, 0.82, 1.0],
            Self::Beige => [0.94, 0.90, 0.78, 1.0],
            Self::Maroon => [0.78, 0.50, 0.55, 1.0],
            Self::Olive => [0.74, 0.76, 0.52, 1.0],
            Self::Navy => [0.53, 0.70, 0.82, 1.0],
            Self::Teal => [0.53, 0.80, 0.75, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_rgba(color: DebugLabelColor, expected: [f32; 4]) {
        for (actual, expected) in color.rgba().into_iter().zip(expected) {
            assert_relative_eq!(actual, expected);
        }
    }

    #[test]
    fn fixed_palette_entries() {
        assert_rgba(DebugLabelColor::Red, [0.98, 0.60, 0.60, 1.0]);
        assert_rgba(DebugLabelColor::Navy, [0.53, 0.70, 0.82, 1.0]);
        assert_rgba(DebugLabelColor::Teal, [0.53, 0.80, 0.75, 1.0]);
    }

    #[test]
    fn every_entry_is_opaque_and_in_range() {
        for color in DebugLabelColor::ALL {
            let [r, g, b, a] = color.rgba();
            assert_relative_eq!(a, 1.0);
            for channel in [r, g, b] {
                assert!((0.0..=1.0).contains(&channel), "{color:?}");
            }
        }
    }

    #[test]
    fn entries_are_distinct() {
        for (i, a) in DebugLabelColor::ALL.iter().enumerate() {
            for b in &DebugLabelColor::ALL[i + 1..] {
                assert_ne!(a.rgba(), b.rgba(), "{a:?} and {b:?} share a color");
            }
        }
    }

    #[test]
    fn cycling_wraps_after_seventeen() {
        assert_eq!(DebugLabelColor::cycle(0), DebugLabelColor::Red);
        assert_eq!(DebugLabelColor::cycle(16), DebugLabelColor::Teal);
        assert_eq!(DebugLabelColor::cycle(17), DebugLabelColor::Red);
    }
}
