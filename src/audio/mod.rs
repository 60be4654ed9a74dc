pub mod backend;
pub mod factory;
pub mod recorder;
pub mod stream;

pub use backend::{CpalBackend, InputBackend, SyntheticBackend};
pub use factory::BlockingCaptureFactory;
pub use recorder::{RecordingSummary, WavRecorder};
pub use stream::{BlockingCaptureStream, DEFAULT_FRAMES_PER_READ};
