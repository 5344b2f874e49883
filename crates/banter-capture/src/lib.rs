//! Audio capture for voice notes.
//!
//! A [`Recorder`] drives a [`CaptureDevice`] through a simple two-state
//! lifecycle (idle and recording) and publishes an elapsed-time display
//! over a watch channel while a clip is being captured. The only real
//! device is [`ProcessDevice`], which shells out to a recording command
//! like `sox` or `ffmpeg`.

pub mod device;
pub mod recorder;

pub use device::{CaptureDevice, CapturedFile, ProcessDevice};
pub use recorder::{format_elapsed, RecordedClip, Recorder};
