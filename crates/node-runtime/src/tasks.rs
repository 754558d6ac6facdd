//! Static task table of the three execution contexts.
//!
//! The node runs exactly three kinds of work: the foreground loop, the cycle
//! timer interrupt and one receive interrupt per bus controller. Their
//! priorities and execution budgets are fixed at configuration time and must
//! keep the ordering bus receive > cycle timer > foreground, so that a frame
//! is never held back by tick processing and the foreground never delays a
//! tick.

use crate::hal::InterruptSource;
use node_common::config::NodeConfig;
use node_common::error::{NodeError, NodeResult};
use node_common::node::BusController;
use std::fmt;
use std::time::Duration;

/// Where a piece of executive code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// Non-interrupt main loop.
    Foreground,
    /// Periodic cycle timer interrupt.
    CycleTimer,
    /// Receive interrupt of one bus controller.
    BusReceive(BusController),
}

impl ExecutionContext {
    /// Interrupt source backing this context, if any.
    #[must_use]
    pub fn interrupt(self) -> Option<InterruptSource> {
        match self {
            Self::Foreground => None,
            Self::CycleTimer => Some(InterruptSource::Timer),
            Self::BusReceive(ctrl) => Some(InterruptSource::Bus(ctrl)),
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::CycleTimer => write!(f, "cycle-timer"),
            Self::BusReceive(ctrl) => write!(f, "bus-rx-{ctrl}"),
        }
    }
}

/// Priority and budget of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Execution context.
    pub context: ExecutionContext,
    /// Interrupt priority level; 0 for the foreground.
    pub priority: u8,
    /// Worst-case time the context may occupy the CPU per activation.
    pub budget: Duration,
}

/// The node's task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTable {
    tasks: Vec<TaskSpec>,
}

impl TaskTable {
    /// Derive the task table from the node configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PriorityOrder`] when the configured priorities do
    /// not keep the required ordering.
    pub fn from_config(config: &NodeConfig) -> NodeResult<Self> {
        let mut tasks = vec![
            TaskSpec {
                context: ExecutionContext::Foreground,
                priority: 0,
                budget: config.watchdog.timeout,
            },
            TaskSpec {
                context: ExecutionContext::CycleTimer,
                priority: config.timer.priority,
                budget: config.tick_period,
            },
        ];
        tasks.extend(
            BusController::first(config.bus.controllers)
                .iter()
                .map(|&ctrl| TaskSpec {
                    context: ExecutionContext::BusReceive(ctrl),
                    priority: config.bus.priority,
                    budget: config.bus.rx_budget,
                }),
        );

        let table = Self { tasks };
        table.validate()?;
        Ok(table)
    }

    /// Check bus receive > cycle timer > foreground for every pair.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PriorityOrder`] naming the offending levels.
    pub fn validate(&self) -> NodeResult<()> {
        let timer = self.level(ExecutionContext::CycleTimer)?;
        let foreground = self.level(ExecutionContext::Foreground)?;

        if timer <= foreground {
            return Err(NodeError::Config(format!(
                "timer priority {timer} must be above the foreground"
            )));
        }
        for task in self.bus_tasks() {
            if task.priority <= timer {
                return Err(NodeError::PriorityOrder {
                    bus: task.priority,
                    timer,
                });
            }
        }
        Ok(())
    }

    /// All entries, foreground first.
    #[must_use]
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Receive interrupt entries, one per controller in use.
    pub fn bus_tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.context, ExecutionContext::BusReceive(_)))
    }

    /// Controllers in use.
    pub fn controllers(&self) -> impl Iterator<Item = BusController> + '_ {
        self.bus_tasks().filter_map(|t| match t.context {
            ExecutionContext::BusReceive(ctrl) => Some(ctrl),
            _ => None,
        })
    }

    /// Entry for `context`, if it is part of the table.
    #[must_use]
    pub fn get(&self, context: ExecutionContext) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.context == context)
    }

    /// Priority of `context`, if it is part of the table.
    #[must_use]
    pub fn priority_of(&self, context: ExecutionContext) -> Option<u8> {
        self.get(context).map(|t| t.priority)
    }

    /// Priority of `context`, which must be part of the table.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] naming the context when it has no entry.
    pub fn level(&self, context: ExecutionContext) -> NodeResult<u8> {
        self.priority_of(context)
            .ok_or_else(|| NodeError::Config(format!("no task entry for {context}")))
    }
}
