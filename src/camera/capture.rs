use anyhow::Result;

use super::frame::Frame;

/// Producer of frames for the main loop.
///
/// An `Err` from [`FrameSource::next_frame`] means the device is temporarily
/// unavailable; callers back off and try again.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame>;

    /// (width, height) of produced frames
    fn resolution(&self) -> (u32, u32);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }
}

#[cfg(feature = "desktop")]
pub use self::opencv_camera::OpenCvCamera;

#[cfg(feature = "desktop")]
mod opencv_camera {
    use anyhow::{bail, Context, Result};
    use image::RgbImage;
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureAPIs},
    };
    use tracing::{info, warn};

    use super::FrameSource;
    use crate::camera::Frame;
    use crate::config::CameraConfig;

    /// Capture device opened through OpenCV
    pub struct OpenCvCamera {
        capture: VideoCapture,
        index: i32,
        width: u32,
        height: u32,
    }

    impl OpenCvCamera {
        /// Open the configured device. Failure here is fatal for the server.
        pub fn open(config: &CameraConfig) -> Result<Self> {
            let index = config.index;
            let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
                .with_context(|| format!("failed to open camera {index}"))?;

            if !capture.is_opened()? {
                bail!("camera {} is not available", index);
            }

            if let Some(w) = config.width {
                capture.set(videoio::CAP_PROP_FRAME_WIDTH, w as f64)?;
            }
            if let Some(h) = config.height {
                capture.set(videoio::CAP_PROP_FRAME_HEIGHT, h as f64)?;
            }
            if let Some(f) = config.fps {
                capture.set(videoio::CAP_PROP_FPS, f as f64)?;
            }
            // keep only the latest frame so the loop never works on stale input
            capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

            let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
            let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
            let fps = capture.get(videoio::CAP_PROP_FPS)?;
            info!(camera = index, width, height, fps, "camera opened");

            Ok(Self {
                capture,
                index,
                width,
                height,
            })
        }
    }

    /// BGR 8UC3 Mat -> RGB image
    fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
        let channels = mat.channels();
        if channels != 3 {
            bail!("unsupported channel count {}", channels);
        }
        let (cols, rows) = (mat.cols() as u32, mat.rows() as u32);
        let bytes = mat.data_bytes()?;
        let mut rgb = Vec::with_capacity(bytes.len());
        for px in bytes.chunks_exact(3) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        RgbImage::from_raw(cols, rows, rgb).context("frame buffer size mismatch")
    }

    impl FrameSource for OpenCvCamera {
        fn next_frame(&mut self) -> Result<Frame> {
            let mut mat = Mat::default();
            let grabbed = self
                .capture
                .read(&mut mat)
                .context("failed to read frame")?;
            if !grabbed || mat.empty() {
                bail!("empty frame received");
            }
            let mat = if mat.is_continuous() { mat } else { mat.try_clone()? };
            Ok(Frame::now(mat_to_rgb(&mat)?))
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    impl Drop for OpenCvCamera {
        fn drop(&mut self) {
            match self.capture.release() {
                Ok(()) => info!(camera = self.index, "camera released"),
                Err(e) => warn!(camera = self.index, error = %e, "failed to release camera"),
            }
        }
    }
}
