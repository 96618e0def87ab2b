//! Audio data path: stream parameter types, the period-sized sample buffer
//! and the payload reader

pub mod buffer;
pub mod source;
pub mod types;

pub use buffer::SampleBuffer;
pub use source::SampleSource;
pub use types::{
    AccessMode, AvailMinMode, HardwareRequest, HardwareStreamConfig, SampleFormat,
    SoftwareStreamConfig,
};
