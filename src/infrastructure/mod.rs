// Infrastructure module - Core background services and utilities
pub mod clock;
pub mod heartbeat;
pub mod task_manager;
pub mod telemetry;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use heartbeat::{KeepAliveMonitor, Liveness};
pub use task_manager::{TaskManager, TaskSlot};
pub use telemetry::{HttpTelemetry, LogTelemetry, NoopTelemetry, TelemetryEvent, TelemetrySink};
pub use timer::{ReconnectPolicy, Timer};
