//! Local capture device source (V4L2).
//!
//! A numeric locator `n` maps to `/dev/video{n}`. The device is asked for RGB3
//! at the configured resolution with a small buffer ring to keep latency low;
//! if the driver refuses the format the negotiated one is used instead.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub index: u32,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl DeviceConfig {
    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.index)
    }
}

pub struct DeviceSource {
    config: DeviceConfig,
    state: DeviceState,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceSource {
    pub fn open(config: DeviceConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = config.device_path();
        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("DeviceSource: failed to set format on {}: {}", path, err);
                device.format().context("read v4l2 format after set failure")?
            }
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("DeviceSource: failed to set fps on {}: {}", path, err);
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 2)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "DeviceSource: connected to {} ({}x{})",
            path,
            format.width,
            format.height
        );
        Ok(Self {
            config,
            state,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl FrameSource for DeviceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Device
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let pixels = self
            .state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;
        self.frame_count += 1;
        Frame::from_rgb(self.width, self.height, pixels, self.frame_count).map(Some)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.device_path(),
        }
    }
}
