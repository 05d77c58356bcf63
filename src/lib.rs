pub mod axes;
pub mod chunk_key_encoding;
mod error;
pub mod frame;
pub mod index;
pub mod logging;
pub mod metadata;
pub mod reader;
pub mod rename;
pub mod storage;
pub mod tracking;
pub mod viewer;
pub mod writer;

pub use zarrs;

pub use axes::{Axis, ImageCoordinates};
pub use error::{Error, Result};
pub use frame::{Frame, PixelType};
pub use logging::{FilterLogger, LogConfig, LogConfigurator, Verbosity};
pub use reader::MicroscopeDataReader;
pub use writer::{ImageExtras, MicroscopeDataWriter, WriterOptions};
