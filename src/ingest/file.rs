//! Local video file source.
//!
//! Decoding is delegated to FFmpeg (feature: ingest-file-ffmpeg). Without that
//! feature, opening a file fails and the worker reports `SourceUnavailable`.
//! A file source reports end of stream as `Ok(None)` and can be rewound.

use anyhow::Result;
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

pub struct FileSource {
    #[cfg(feature = "ingest-file-ffmpeg")]
    inner: FfmpegFileSource,
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    _unconstructible: std::convert::Infallible,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let inner = FfmpegFileSource::open(path)?;
            Ok(Self { inner })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            let _ = path;
            anyhow::bail!("file ingestion requires the ingest-file-ffmpeg feature")
        }
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
impl FrameSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.read_frame()
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
impl FrameSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self._unconstructible {}
    }

    fn stats(&self) -> SourceStats {
        match self._unconstructible {}
    }
}

#[cfg(all(test, not(feature = "ingest-file-ffmpeg")))]
mod tests {
    use super::*;

    #[test]
    fn file_source_requires_ffmpeg_feature() {
        let err = FileSource::open(Path::new("demo.mp4")).err().expect("error");
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }
}
