#![doc = include_str!("../README.md")]

pub mod error;
pub mod gc;
pub mod loader;
pub mod store;
pub mod tailer;
pub mod timeparse;
pub mod vm;
pub mod watch;

// --- 주요 타입 re-export ---

pub use error::{RuntimeError, StoreError};
pub use gc::StoreGc;
pub use loader::{DumpOptions, LoadError, LoadSummary, Loader, LoaderConfig};
pub use store::{Store, StoreOptions};
pub use tailer::{Tailer, TailerConfig};
pub use timeparse::{TimeOptions, TimezoneSpec};
pub use vm::{ProgStats, Vm};
pub use watch::{ProgramEvent, ProgramWatcher, WatcherConfig};
