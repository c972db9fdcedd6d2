//! Presentation collaborator surface.
//!
//! The transfer engine hands finished buffers downstream; it never calls
//! into the presentation layer itself. This module only pins down the
//! interface a compositor/window sink exposes so downstream crates agree
//! on the shape of that handoff.

use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle (viewport / crop description).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Downstream consumer of finished buffers.
///
/// Implemented by the presentation layer, not by this workspace.
pub trait FrameSink {
    /// The buffer type this sink consumes.
    type Buffer;

    /// Hand a finished buffer over for display.
    fn attach(&mut self, buffer: Self::Buffer);

    /// Describe which source region maps onto which target region.
    fn set_viewport(&mut self, source: Rect, target: Rect);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        attached: usize,
        viewport: Option<(Rect, Rect)>,
    }

    impl FrameSink for RecordingSink {
        type Buffer = Vec<u8>;

        fn attach(&mut self, _buffer: Vec<u8>) {
            self.attached += 1;
        }

        fn set_viewport(&mut self, source: Rect, target: Rect) {
            self.viewport = Some((source, target));
        }
    }

    #[test]
    fn sink_receives_buffers_and_viewport() {
        let mut sink = RecordingSink {
            attached: 0,
            viewport: None,
        };
        sink.attach(vec![0u8; 16]);
        sink.set_viewport(Rect::new(0, 0, 640, 480), Rect::new(10, 10, 320, 240));

        assert_eq!(sink.attached, 1);
        let (src, dst) = sink.viewport.unwrap();
        assert_eq!(src.width, 640);
        assert_eq!(dst.x, 10);
    }
}
