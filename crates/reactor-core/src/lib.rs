pub mod channel;
pub mod config;
pub mod control;
pub mod dal;
pub mod engine;
pub mod error;
pub mod interlock;
mod proptests;
pub mod scheduler;
pub mod setpoint;
#[cfg(feature = "simulation")]
pub mod sim;
pub mod snapshot;
pub mod telemetry;
pub mod timebase;

pub use channel::{Channel, ChannelCatalog, ChannelId, ChannelKind, ChannelSpec, Reading, Unit};
pub use config::{ReactorConfig, ResolvedConfig, MIN_TICK_PERIOD};
pub use control::{ControlLoop, ControllerSpec, PidController, PidGains, PidState};
pub use dal::{DalConfig, DalStats, DeviceDriver, DeviceLayer};
pub use engine::Engine;
pub use error::{CommandRejection, ConfigError, DalError, DriverError, EngineError};
pub use interlock::{
    EngineState, Interlock, InterlockRule, OperatorCommand, Predicate, SafeAction, ThresholdStatus,
};
pub use scheduler::{Admission, Command, ExecutionStats, Scheduler};
pub use setpoint::{Setpoint, SetpointRange, Unvalidated, Validated};
#[cfg(feature = "simulation")]
pub use sim::{FaultInjector, SimulatedReactor};
pub use snapshot::{ChannelSample, LoopStatus, RuleStatus, Snapshot};
pub use telemetry::{Subscription, TelemetryBuffer};
pub use timebase::TimeBase;
