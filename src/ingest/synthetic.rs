//! Synthetic frame source for `stub://` locators.
//!
//! Produces a gradient background with a few bright blocks drifting across it,
//! so a demo deployment can exercise the whole pipeline without a camera.

use anyhow::Result;

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

const BLOCK_COUNT: usize = 4;
const BLOCK_SIZE: u32 = 48;

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    frame_count: u64,
    /// Per-block (x, y, dx) in pixels.
    blocks: Vec<(u32, u32, u32)>,
}

impl SyntheticSource {
    pub fn new(url: &str, width: u32, height: u32) -> Self {
        let blocks = (0..BLOCK_COUNT)
            .map(|i| {
                let x = rand::random::<u32>() % width.max(1);
                let y = (i as u32 + 1) * height / (BLOCK_COUNT as u32 + 2);
                let dx = 2 + rand::random::<u32>() % 6;
                (x, y, dx)
            })
            .collect();
        log::info!("SyntheticSource: connected to {}", url);
        Self {
            url: url.to_string(),
            width,
            height,
            frame_count: 0,
            blocks,
        }
    }

    fn render(&mut self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % w, i / w);
            let shade = ((x + y) as u64 / 8 + self.frame_count) % 64;
            px.copy_from_slice(&[40 + shade as u8, 40 + shade as u8, 60]);
        }

        for block in self.blocks.iter_mut() {
            block.0 = (block.0 + block.2) % self.width.max(1);
            let (bx, by) = (block.0 as usize, block.1 as usize);
            for y in by..(by + BLOCK_SIZE as usize).min(h) {
                for x in bx..(bx + BLOCK_SIZE as usize / 2).min(w) {
                    let idx = (y * w + x) * 3;
                    pixels[idx..idx + 3].copy_from_slice(&[220, 200, 180]);
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.frame_count += 1;
        let pixels = self.render();
        Frame::from_rgb(self.width, self.height, pixels, self.frame_count).map(Some)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}
