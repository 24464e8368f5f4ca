mod capture;
mod frame;

#[cfg(feature = "desktop")]
pub use capture::OpenCvCamera;
pub use capture::FrameSource;
pub use frame::{unix_seconds, Frame};
