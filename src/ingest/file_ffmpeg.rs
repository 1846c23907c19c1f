//! FFmpeg-backed local file decoder.
//!
//! Frames are converted to RGB24 in-memory. End of file drains the decoder and
//! then reports `Ok(None)`; `rewind` seeks to the start and resets the decoder
//! so looping playback can continue.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::Path;

use super::SourceStats;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let (stream_index, decoder) = video_decoder(&input)?;
        let scaler = rgb_scaler(&decoder)?;
        log::info!(
            "FileSource: opened {} ({}x{})",
            path.display(),
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            path: path.display().to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        if self.eof_sent {
            return Ok(None);
        }

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        // Demuxer exhausted: flush whatever the decoder still holds.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("seek {} to start", self.path))?;
        self.decoder.flush();
        self.eof_sent = false;
        log::debug!("FileSource: rewound {}", self.path);
        Ok(())
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.clone(),
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = packed_rgb(&rgb_frame)?;
        self.frame_count += 1;
        Frame::from_rgb(width, height, pixels, self.frame_count)
    }
}

fn video_decoder(
    input: &ffmpeg::format::context::Input,
) -> Result<(usize, ffmpeg::codec::decoder::Video)> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .context("file has no video track")?;
    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("load video decoder parameters")?
        .decoder()
        .video()
        .context("open ffmpeg video decoder")?;
    Ok((stream.index(), decoder))
}

/// Same-size conversion to packed RGB24.
fn rgb_scaler(
    decoder: &ffmpeg::codec::decoder::Video,
) -> Result<ffmpeg::software::scaling::Context> {
    use ffmpeg::software::scaling::{flag::Flags, Context};
    Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::util::format::pixel::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        Flags::BILINEAR,
    )
    .context("create ffmpeg scaler")
}

fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
