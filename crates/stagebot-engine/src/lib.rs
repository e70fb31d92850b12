pub mod clock;
pub mod config;
pub mod enhance;
pub mod generation;
pub mod http;
pub mod normalize;
pub mod pipeline;
pub mod reference;
pub mod store;
pub mod watch;

pub use clock::{RecordingSleeper, Sleeper, ThreadSleeper};
pub use config::{EnvMap, PipelineConfig};
pub use enhance::Enhancer;
pub use generation::{default_generator_registry, ImageGenerator};
pub use pipeline::Pipeline;
pub use store::{DriveStore, LocalFolderStore, ObjectStore, SourceFile};
pub use watch::{PassReport, RunSummary, WatchLoop};
