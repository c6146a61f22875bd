pub mod monitor;

pub use monitor::{MonitorSettings, StreamMonitor, WorkspaceView};
