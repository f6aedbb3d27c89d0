//! Interactive region selection.
//!
//! `RegionSelector::select` opens a full-screen [`SelectionOverlay`], follows
//! the pointer from press to release and turns the dragged rectangle into an
//! even-sized [`Region`] inside the display. The overlay is closed on every
//! exit path.

use crossbeam_channel::Receiver;

use super::types::{even_floor, DisplayInfo, Region};
use crate::error::SelectionCancelled;

// ============================================================================
// Geometry
// ============================================================================

/// A point in display-local pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A rectangle with integer coordinates.
///
/// Uses left/top/right/bottom format where right and bottom are exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    /// Normalize so left <= right and top <= bottom
    pub fn normalize(&self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    /// Intersect with `0..width` x `0..height`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self {
            left: self.left.clamp(0, w),
            top: self.top.clamp(0, h),
            right: self.right.clamp(0, w),
            bottom: self.bottom.clamp(0, h),
        }
    }
}

/// Press-to-release drag tracking.
#[derive(Debug, Clone, Default)]
pub struct DragState {
    /// True while the button is down
    pub is_active: bool,
    pub start: Point,
    pub current: Point,
}

impl DragState {
    pub fn begin(&mut self, at: Point) {
        self.is_active = true;
        self.start = at;
        self.current = at;
    }

    /// Normalized rectangle spanned by the drag.
    pub fn selection_rect(&self) -> Rect {
        Rect::new(self.start.x, self.start.y, self.current.x, self.current.y).normalize()
    }
}

/// Turn a dragged rectangle into an even-sized region inside `display`.
///
/// Width and height are rounded down to even values of at least 2; a region
/// pushed past the right or bottom edge by that minimum is shifted back in.
/// None when the display itself is smaller than 2x2.
pub fn region_from_rect(rect: Rect, display: &DisplayInfo) -> Option<Region> {
    if display.width < 2 || display.height < 2 {
        return None;
    }
    let r = rect.normalize().clamp_to(display.width, display.height);
    let max_w = display.width & !1;
    let max_h = display.height & !1;

    let width = even_floor(r.width()).min(max_w);
    let height = even_floor(r.height()).min(max_h);

    let x = r.left.min(display.width as i32 - width as i32).max(0);
    let y = r.top.min(display.height as i32 - height as i32).max(0);

    Some(Region::new(x, y, width, height))
}

// ============================================================================
// Selector
// ============================================================================

/// Pointer input from the selection overlay, in display-local pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    Press(Point),
    Move(Point),
    Release(Point),
    /// Escape, right click, or the overlay was dismissed.
    Cancel,
}

/// A transparent full-screen widget that reports pointer input.
pub trait SelectionOverlay {
    /// Show the overlay over `display` and return its input stream.
    fn open(&mut self, display: &DisplayInfo) -> Result<Receiver<PointerEvent>, String>;

    /// Destroy the overlay.
    fn close(&mut self);
}

/// Closes the overlay when dropped.
struct OpenOverlay<'a, O: SelectionOverlay>(&'a mut O);

impl<O: SelectionOverlay> Drop for OpenOverlay<'_, O> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// One-shot drag selection over a display.
pub struct RegionSelector<O: SelectionOverlay> {
    overlay: O,
    display: DisplayInfo,
}

impl<O: SelectionOverlay> RegionSelector<O> {
    pub fn new(overlay: O, display: DisplayInfo) -> Self {
        Self { overlay, display }
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    /// Block until the user finishes a drag or cancels.
    pub fn select(&mut self) -> Result<Region, SelectionCancelled> {
        if self.display.width < 2 || self.display.height < 2 {
            log::warn!(
                "[REGION] Display {} is too small to select from ({}x{})",
                self.display.id,
                self.display.width,
                self.display.height
            );
            return Err(SelectionCancelled);
        }

        let events = match self.overlay.open(&self.display) {
            Ok(rx) => rx,
            Err(e) => {
                log::warn!("[REGION] Could not open selection overlay: {}", e);
                self.overlay.close();
                return Err(SelectionCancelled);
            },
        };
        let _open = OpenOverlay(&mut self.overlay);

        let mut drag = DragState::default();
        loop {
            match events.recv() {
                Ok(PointerEvent::Press(at)) => drag.begin(at),
                Ok(PointerEvent::Move(at)) if drag.is_active => drag.current = at,
                Ok(PointerEvent::Move(_)) => {},
                Ok(PointerEvent::Release(at)) if drag.is_active => {
                    drag.current = at;
                    let Some(region) = region_from_rect(drag.selection_rect(), &self.display) else {
                        return Err(SelectionCancelled);
                    };
                    log::info!(
                        "[REGION] Selected {}x{} at {},{}",
                        region.width,
                        region.height,
                        region.x,
                        region.y
                    );
                    return Ok(region);
                },
                Ok(PointerEvent::Release(_)) => {},
                Ok(PointerEvent::Cancel) | Err(_) => {
                    log::info!("[REGION] Selection cancelled");
                    return Err(SelectionCancelled);
                },
            }
        }
    }
}
