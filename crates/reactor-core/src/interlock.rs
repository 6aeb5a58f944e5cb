//! Safety interlock state machine.
//!
//! Rules are evaluated in configuration order against one immutable
//! snapshot per tick. Configure the most critical physical hazard first:
//! the first rule that fires is recorded as the trip cause.

use crate::channel::{ChannelCatalog, ChannelId, ChannelKind};
use crate::error::{CommandRejection, ConfigError};
use crate::snapshot::{RuleStatus, Snapshot};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    #[default]
    Idle = 0,
    Running = 1,
    SafetyStop = 2,
    Fault = 3,
}

impl EngineState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineState::Running,
            2 => EngineState::SafetyStop,
            3 => EngineState::Fault,
            _ => EngineState::Idle,
        }
    }
}

/// Operator commands that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Start,
    Stop,
    ResetSafetyStop,
}

impl OperatorCommand {
    pub fn name(self) -> &'static str {
        match self {
            OperatorCommand::Start => "start",
            OperatorCommand::Stop => "stop",
            OperatorCommand::ResetSafetyStop => "reset",
        }
    }
}

/// Whether `command` may be issued while the engine is in `state`.
pub fn admit(command: OperatorCommand, state: EngineState) -> Result<(), CommandRejection> {
    let allowed = match command {
        OperatorCommand::Start => !matches!(state, EngineState::SafetyStop | EngineState::Fault),
        OperatorCommand::Stop => true,
        OperatorCommand::ResetSafetyStop => state == EngineState::SafetyStop,
    };
    if allowed {
        Ok(())
    } else {
        Err(CommandRejection::IllegalTransition {
            command: command.name(),
            state,
        })
    }
}

/// Per-rule threshold status, reported in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    #[default]
    Ok,
    Warning,
    OkAgain,
    Tripped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleLevel {
    Clear,
    Warning,
    Tripped,
}

/// Condition over one or more channels. `C` is a channel name in
/// configuration and a resolved [`ChannelId`] at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate<C = String> {
    Above {
        channel: C,
        limit: f64,
        #[serde(default)]
        warn: Option<f64>,
    },
    Below {
        channel: C,
        limit: f64,
        #[serde(default)]
        warn: Option<f64>,
    },
    /// Digital input that trips when set.
    Flag { channel: C },
    AnyOf { predicates: Vec<Predicate<C>> },
}

impl Predicate<String> {
    fn resolve(&self, catalog: &ChannelCatalog) -> Result<Predicate<ChannelId>, ConfigError> {
        Ok(match self {
            Predicate::Above {
                channel,
                limit,
                warn,
            } => Predicate::Above {
                channel: catalog.resolve(channel, None)?,
                limit: *limit,
                warn: *warn,
            },
            Predicate::Below {
                channel,
                limit,
                warn,
            } => Predicate::Below {
                channel: catalog.resolve(channel, None)?,
                limit: *limit,
                warn: *warn,
            },
            Predicate::Flag { channel } => Predicate::Flag {
                channel: catalog.resolve(channel, None)?,
            },
            Predicate::AnyOf { predicates } => Predicate::AnyOf {
                predicates: predicates
                    .iter()
                    .map(|p| p.resolve(catalog))
                    .collect::<Result<Vec<_>, ConfigError>>()?,
            },
        })
    }
}

impl Predicate<ChannelId> {
    /// Invalid readings never fire; sustained invalidity faults instead.
    pub fn level(&self, snapshot: &Snapshot) -> RuleLevel {
        match self {
            Predicate::Above {
                channel,
                limit,
                warn,
            } => match snapshot.valid_value(*channel) {
                Some(v) if v > *limit => RuleLevel::Tripped,
                Some(v) if warn.is_some_and(|w| v > w) => RuleLevel::Warning,
                _ => RuleLevel::Clear,
            },
            Predicate::Below {
                channel,
                limit,
                warn,
            } => match snapshot.valid_value(*channel) {
                Some(v) if v < *limit => RuleLevel::Tripped,
                Some(v) if warn.is_some_and(|w| v < w) => RuleLevel::Warning,
                _ => RuleLevel::Clear,
            },
            Predicate::Flag { channel } => match snapshot.valid_value(*channel) {
                Some(v) if v >= 0.5 => RuleLevel::Tripped,
                _ => RuleLevel::Clear,
            },
            Predicate::AnyOf { predicates } => predicates
                .iter()
                .map(|p| p.level(snapshot))
                .max()
                .unwrap_or(RuleLevel::Clear),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeAction<C = String> {
    pub channel: C,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlockRule<C = String> {
    pub name: String,
    pub predicate: Predicate<C>,
    pub actions: Vec<SafeAction<C>>,
}

impl InterlockRule<String> {
    pub fn resolve(&self, catalog: &ChannelCatalog) -> Result<InterlockRule<ChannelId>, ConfigError> {
        let actions = self
            .actions
            .iter()
            .map(|a| {
                let id = catalog.resolve(&a.channel, Some(ChannelKind::Actuator))?;
                let in_range = catalog.spec(id).is_some_and(|s| s.contains(a.value));
                if !in_range {
                    return Err(ConfigError::InvalidSafeValue {
                        name: a.channel.clone(),
                        value: a.value,
                    });
                }
                Ok(SafeAction {
                    channel: id,
                    value: a.value,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InterlockRule {
            name: self.name.clone(),
            predicate: self.predicate.resolve(catalog)?,
            actions,
        })
    }
}

/// Outcome of evaluating every rule against one snapshot. Pure function of
/// the snapshot, the current state and the start latch.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub next: EngineState,
    pub levels: Vec<RuleLevel>,
    /// Indices of rules that fired, in evaluation order.
    pub fired: Vec<usize>,
    pub fault: Option<ChannelId>,
}

/// What the scheduler must do after a verdict is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: EngineState,
    pub to: EngineState,
    /// Safe-state writes to issue this tick.
    pub actions: Vec<SafeAction<ChannelId>>,
    /// Every actuator must be driven to its safe value.
    pub drive_all_safe: bool,
}

impl Transition {
    pub fn entered_running(&self) -> bool {
        self.to == EngineState::Running && self.from != EngineState::Running
    }
}

pub struct Interlock {
    rules: Vec<InterlockRule<ChannelId>>,
    statuses: Vec<ThresholdStatus>,
    state: EngineState,
    start_requested: bool,
    latched: Vec<SafeAction<ChannelId>>,
    trip: Option<String>,
    fault: Option<ChannelId>,
}

impl Interlock {
    pub fn new(rules: Vec<InterlockRule<ChannelId>>) -> Self {
        let statuses = vec![ThresholdStatus::Ok; rules.len()];
        Self {
            rules,
            statuses,
            state: EngineState::Idle,
            start_requested: false,
            latched: Vec::new(),
            trip: None,
            fault: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn rules(&self) -> &[InterlockRule<ChannelId>] {
        &self.rules
    }

    pub fn trip_cause(&self) -> Option<&str> {
        self.trip.as_deref()
    }

    pub fn fault_channel(&self) -> Option<ChannelId> {
        self.fault
    }

    pub fn rule_statuses(&self) -> Vec<RuleStatus> {
        self.rules
            .iter()
            .zip(&self.statuses)
            .map(|(r, s)| RuleStatus {
                name: r.name.clone(),
                status: *s,
            })
            .collect()
    }

    /// Evaluate in fixed priority: rules, then device exhaustion, then the
    /// operator's start latch.
    pub fn evaluate(&self, snapshot: &Snapshot, exhausted: Option<ChannelId>) -> Verdict {
        let levels: Vec<RuleLevel> = self.rules.iter().map(|r| r.predicate.level(snapshot)).collect();
        let fired: Vec<usize> = levels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == RuleLevel::Tripped)
            .map(|(i, _)| i)
            .collect();

        let next = if self.state == EngineState::Fault {
            EngineState::Fault
        } else if !fired.is_empty() {
            EngineState::SafetyStop
        } else if exhausted.is_some() {
            EngineState::Fault
        } else if self.state == EngineState::SafetyStop {
            EngineState::SafetyStop
        } else if self.start_requested {
            EngineState::Running
        } else {
            EngineState::Idle
        };

        Verdict {
            next,
            levels,
            fired,
            fault: exhausted,
        }
    }

    pub fn apply(&mut self, verdict: Verdict) -> Transition {
        let from = self.state;
        self.update_statuses(&verdict.levels);

        let mut actions = Vec::new();
        let mut drive_all_safe = false;
        match verdict.next {
            EngineState::SafetyStop => {
                for &idx in &verdict.fired {
                    let rule = &self.rules[idx];
                    if self.trip.is_none() {
                        self.trip = Some(rule.name.clone());
                    }
                    for action in &rule.actions {
                        if !self.latched.iter().any(|a| a.channel == action.channel) {
                            self.latched.push(*action);
                        }
                    }
                }
                self.start_requested = false;
                actions = self.latched.clone();
                if from != EngineState::SafetyStop {
                    error!(
                        "interlock {} fired, entering SafetyStop from {:?}",
                        self.trip.as_deref().unwrap_or("?"),
                        from
                    );
                }
            }
            EngineState::Fault if from != EngineState::Fault => {
                self.fault = verdict.fault;
                self.start_requested = false;
                drive_all_safe = true;
                error!(
                    "channel {:?} exceeded invalid-read threshold, entering Fault",
                    verdict.fault
                );
            }
            _ => {}
        }
        self.state = verdict.next;

        Transition {
            from,
            to: self.state,
            actions,
            drive_all_safe,
        }
    }

    fn update_statuses(&mut self, levels: &[RuleLevel]) {
        for ((status, level), rule) in self.statuses.iter_mut().zip(levels).zip(&self.rules) {
            let next = match (*status, level) {
                (_, RuleLevel::Tripped) => ThresholdStatus::Tripped,
                (ThresholdStatus::Tripped, _) => ThresholdStatus::Tripped,
                (_, RuleLevel::Warning) => ThresholdStatus::Warning,
                (ThresholdStatus::Warning, RuleLevel::Clear) => ThresholdStatus::OkAgain,
                (current, RuleLevel::Clear) => current,
            };
            if next == ThresholdStatus::Warning && *status != ThresholdStatus::Warning {
                warn!("interlock {} crossed its warning threshold", rule.name);
            }
            *status = next;
        }
    }

    pub fn request_start(&mut self) -> Result<(), CommandRejection> {
        admit(OperatorCommand::Start, self.state)?;
        if !self.start_requested {
            info!("start requested");
        }
        self.start_requested = true;
        Ok(())
    }

    pub fn request_stop(&mut self) {
        if self.start_requested {
            info!("stop requested");
        }
        self.start_requested = false;
    }

    /// Shutdown: drop the start latch and leave Running. SafetyStop and
    /// Fault are kept so the final snapshot still reports them.
    pub fn halt(&mut self) {
        self.start_requested = false;
        if self.state == EngineState::Running {
            info!("Running -> Idle (shutdown)");
            self.state = EngineState::Idle;
        }
    }

    /// Leave SafetyStop for Idle. Refused in every other state.
    pub fn reset(&mut self) -> Result<(), CommandRejection> {
        admit(OperatorCommand::ResetSafetyStop, self.state)?;
        info!("safety stop reset by operator");
        self.state = EngineState::Idle;
        self.start_requested = false;
        self.latched.clear();
        self.trip = None;
        for status in &mut self.statuses {
            if *status == ThresholdStatus::Tripped {
                *status = ThresholdStatus::OkAgain;
            }
        }
        Ok(())
    }
}
