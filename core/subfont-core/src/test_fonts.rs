//! Fixture fonts shared by unit tests.

/// Tiny TrueType font: `.notdef`, space, `a`, `b`, `c` (with a quadratic
/// curve), `d` (composite of `b`) and `e` (composite of `a` + `b`). Uses a
/// short `loca` and only five long horizontal metrics.
pub(crate) const SENTY_BRUSH: &[u8] = include_bytes!("../../../test-fonts/SentyBrush.ttf");
