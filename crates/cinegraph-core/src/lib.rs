//! CineGraph Core - foundation types for the render engine
//!
//! This crate provides the fundamental types used throughout CineGraph:
//! - Time representation (RationalTime, TimeRange, TimeRangeList)
//! - Color spaces and color processors
//! - Video parameters, frames, audio parameters and sample buffers
//! - Cancellation, job stamps and engine configuration

pub mod audio;
pub mod cancel;
pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod range_list;
pub mod time;

pub use audio::{AudioParams, SampleBuffer, SampleFormat};
pub use cancel::{CancelAtom, CancelAtomPtr, JobTime};
pub use color::{Color, ColorManager, ColorProcessor, ColorProcessorPtr, ColorSpace, TransferFunction};
pub use config::{CoreParams, EngineConfig, RunMode};
pub use error::{CineError, Result};
pub use frame::{Frame, FramePtr, Interlacing, PixelFormat, VideoParams};
pub use range_list::{remove_range, RangeItem, TimeRangeList, TimeRangeListFrameIterator};
pub use time::{RationalTime, Rounding, TimeRange};
