//! Frame sources for the live pipeline.

pub mod discovery;

use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::LiveConfig;
use crate::error::{RecallerError, Result};

pub use discovery::discover_images;

/// Something that yields frames on demand.
pub trait FrameSource: Send {
    /// Block until the next frame is available. Errors are `SourceUnavailable`.
    fn read_frame(&mut self) -> Result<DynamicImage>;

    /// Release the underlying device. Calling it more than once is harmless.
    fn release(&mut self);
}

/// Replays the still frames of a directory in path order.
pub struct DirectoryFrameSource {
    directory: PathBuf,
    frames: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    interval: Duration,
    last_read: Option<Instant>,
    released: bool,
}

impl DirectoryFrameSource {
    pub fn open(directory: &Path, extensions: &[String]) -> Result<Self> {
        let frames = discover_images(directory, extensions).map_err(|e| {
            RecallerError::SourceUnavailable(format!("{}: {}", directory.display(), e))
        })?;

        if frames.is_empty() {
            return Err(RecallerError::SourceUnavailable(format!(
                "no frames found in {}",
                directory.display()
            )));
        }

        info!(directory = %directory.display(), frames = frames.len(), "Frame source opened");
        Ok(Self {
            directory: directory.to_path_buf(),
            frames,
            cursor: 0,
            looping: false,
            interval: Duration::ZERO,
            last_read: None,
            released: false,
        })
    }

    /// Start over from the first frame instead of failing at the end.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Hold each read until at least `interval` has passed since the previous one.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn throttle(&mut self) {
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
    }
}

impl FrameSource for DirectoryFrameSource {
    fn read_frame(&mut self) -> Result<DynamicImage> {
        if self.released {
            return Err(RecallerError::SourceUnavailable("source is released".to_string()));
        }

        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Err(RecallerError::SourceUnavailable(format!(
                    "end of frames in {}",
                    self.directory.display()
                )));
            }
            self.cursor = 0;
        }

        self.throttle();

        let path = &self.frames[self.cursor];
        self.cursor += 1;
        image::open(path).map_err(|e| {
            RecallerError::SourceUnavailable(format!("failed to read frame {}: {}", path.display(), e))
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!(directory = %self.directory.display(), "Frame source released");
        }
    }
}

/// Resolve the frame directory for a camera index.
///
/// Uses `camera`, then the configured default, then index 0.
pub fn select_camera(live: &LiveConfig, camera: Option<usize>) -> Result<PathBuf> {
    let index = camera.or(live.default_camera).unwrap_or(0);
    live.sources
        .get(index)
        .cloned()
        .ok_or_else(|| RecallerError::SourceUnavailable(format!("Failed to open camera {}", index)))
}
