pub mod debug;
pub mod engine;
pub mod preprocess;
pub mod setup;

pub use debug::{DebugSink, FileDebugSink, NoopSink};
pub use engine::{TesseractRecognizer, TextRecognizer};
pub use setup::ensure_language_data;
