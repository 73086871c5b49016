//! Callbacks run around every command the dispatcher applies.

use std::collections::BTreeMap;
use std::fmt;

use super::executor::Command;

/// When a hook runs relative to its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookPoint {
    /// Output is applied before the command.
    Before,
    /// Output is applied right after the command.
    After,
}

/// Which commands a hook watches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookTarget {
    /// Every command.
    All,
    /// Commands with this name.
    Command(String),
}

/// A hook returns the commands it wants applied in the same batch.
pub type Hook = Box<dyn Fn(&Command) -> Vec<Command>>;

/// Hooks grouped by point and target, run in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<(HookPoint, HookTarget), Vec<Hook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_map()
            .entries(self.hooks.iter().map(|(key, hooks)| (key, hooks.len())))
            .finish()
    }
}

impl HookRegistry {
    /// A registry with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `hook` at `point` for `target`.
    pub fn register(
        &mut self,
        point: HookPoint,
        target: HookTarget,
        hook: impl Fn(&Command) -> Vec<Command> + 'static,
    ) {
        self.hooks
            .entry((point, target))
            .or_default()
            .push(Box::new(hook));
    }

    /// Whether no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs the hooks at `point` that watch `command`.
    ///
    /// Catch-all hooks run first, then hooks for the command's name. The
    /// output of every hook is concatenated in that order.
    #[must_use]
    pub fn run(&self, point: HookPoint, command: &Command) -> Vec<Command> {
        let named = HookTarget::Command(command.name.clone());
        [HookTarget::All, named]
            .iter()
            .filter_map(|target| self.hooks.get(&(point, target.clone())))
            .flatten()
            .flat_map(|hook| hook(command))
            .collect()
    }
}
