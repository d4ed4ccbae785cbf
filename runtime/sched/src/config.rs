//! Scheduler configuration
//!
//! The default class table mirrors the firmware's deferred-work classes.
//! CPU numbers are placement hints only; a class without a CPU floats.

use serde::Deserialize;

use crate::{Priority, SchedError, Result, CLASS_COUNT};

/// Default ring slots per class
pub const DEFAULT_RING_CAPACITY: usize = 16;

/// One priority class: a ring plus a dedicated worker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassConfig {
    /// Short name, used for the worker thread name and in log lines
    pub name: String,

    /// Firmware-facing numeric priority
    pub priority: Priority,

    /// Logical CPU the worker is pinned to
    #[serde(default)]
    pub cpu: Option<usize>,

    /// SCHED_FIFO priority applied when real-time placement is enabled
    #[serde(default)]
    pub rt_priority: i32,
}

impl ClassConfig {
    pub fn new(name: &str, priority: Priority, cpu: Option<usize>, rt_priority: i32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            cpu,
            rt_priority,
        }
    }
}

/// What to do when a producer submits outside its allowed range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisusePolicy {
    /// Return `InvalidPriority` to the caller
    #[default]
    Reject,

    /// Log and abort the whole process
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Slots per class ring
    pub ring_capacity: usize,

    /// Pin workers to their configured CPU
    pub affinity: bool,

    /// Switch workers to SCHED_FIFO (needs CAP_SYS_NICE)
    pub realtime: bool,

    /// Producer range violations
    pub misuse: MisusePolicy,

    /// Class table, at most one entry per priority
    pub classes: Vec<ClassConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            affinity: true,
            realtime: false,
            misuse: MisusePolicy::Reject,
            classes: vec![
                ClassConfig::new("otf", Priority::FIRST, Some(3), 98),
                ClassConfig::new("af", Priority::SECOND, Some(2), 97),
                ClassConfig::new("isp_dma", Priority::THIRD, Some(1), 96),
                ClassConfig::new("3aa_dma", Priority::FOURTH, Some(1), 95),
                ClassConfig::new("aa", Priority::FIFTH, Some(2), 94),
                ClassConfig::new("rta", Priority::SIXTH, None, 93),
            ],
        }
    }
}

impl SchedulerConfig {
    /// A one-class scheduler, used for event pumps
    pub fn single(name: &str, priority: Priority) -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            affinity: false,
            realtime: false,
            misuse: MisusePolicy::Reject,
            classes: vec![ClassConfig::new(name, priority, None, 0)],
        }
    }

    /// Check the class table before any worker is spawned
    ///
    /// # Errors
    /// `InvalidConfig` for a zero ring, an unknown priority or a duplicate class
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(SchedError::InvalidConfig("ring_capacity must be non-zero".into()));
        }

        let mut seen = [false; CLASS_COUNT];
        for class in &self.classes {
            let index = class.priority.class_index().ok_or_else(|| {
                SchedError::InvalidConfig(format!(
                    "class {} has priority {} outside {}..={}",
                    class.name,
                    class.priority.0,
                    Priority::FIRST.0,
                    Priority::SIXTH.0
                ))
            })?;

            if seen[index] {
                return Err(SchedError::InvalidConfig(format!(
                    "priority {} configured twice",
                    class.priority.0
                )));
            }
            seen[index] = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_class_table() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classes.len(), CLASS_COUNT);
        assert_eq!(config.ring_capacity, 16);
        assert_eq!(config.classes[0].cpu, Some(3));
        assert_eq!(config.classes[5].cpu, None);
        assert_eq!(config.misuse, MisusePolicy::Reject);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = SchedulerConfig::single("a", Priority::FIRST);
        config.classes.push(ClassConfig::new("b", Priority::FIRST, None, 0));
        assert!(matches!(config.validate(), Err(SchedError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_priority() {
        let config = SchedulerConfig::single("bogus", Priority(42));
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::single("zero", Priority::FIRST);
        config.ring_capacity = 0;
        assert!(config.validate().is_err());
    }
}
