//! Gesture geometry for slide-to-cancel.

/// A touch position in screen coordinates (y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Whether `current` has slid far enough from `origin` to cancel.
///
/// Sideways movement counts in both directions; vertical movement only
/// counts upward, since sliding down is where the finger rests naturally.
pub fn crosses_cancel_threshold(origin: Point, current: Point, distance: f32) -> bool {
    let horizontal = (current.x - origin.x).abs();
    let upward = origin.y - current.y;

    horizontal > distance || upward > distance
}
