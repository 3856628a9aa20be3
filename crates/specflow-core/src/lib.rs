pub mod analytics;
pub mod backup;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod lock;
pub mod manager;
pub mod monitor;
pub mod parser;
pub mod paths;
pub mod progress;
pub mod store;
pub mod sync;
pub mod task;
pub mod types;

pub use error::{Result, SpecflowError};
pub use monitor::{Monitor, MonitorOptions};
pub use progress::ProgressData;
pub use task::{TaskHistory, TaskInfo};
pub use types::TaskState;
