//! Command execution by dispatcher tag.

use std::collections::BTreeMap;

use lockstep_netproto::messages::Command;

use crate::error::LockstepError;

/// Executes commands once their tick comes up.
pub trait CommandExecutor: Send {
    fn execute(&mut self, command: &Command) -> Result<(), LockstepError>;
}

type Handler = Box<dyn FnMut(&Command) + Send>;

/// Routes each command to the handler registered for its dispatcher tag.
/// A tag with no handler is an error.
#[derive(Default)]
pub struct DispatchTable {
    handlers: BTreeMap<u32, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `dispatcher`.
    pub fn register<F>(&mut self, dispatcher: u32, handler: F) -> &mut Self
    where
        F: FnMut(&Command) + Send + 'static,
    {
        self.handlers.insert(dispatcher, Box::new(handler));
        self
    }

    pub fn unregister(&mut self, dispatcher: u32) -> bool {
        self.handlers.remove(&dispatcher).is_some()
    }

    pub fn contains(&self, dispatcher: u32) -> bool {
        self.handlers.contains_key(&dispatcher)
    }
}

impl CommandExecutor for DispatchTable {
    fn execute(&mut self, command: &Command) -> Result<(), LockstepError> {
        let handler = self
            .handlers
            .get_mut(&command.dispatcher)
            .ok_or(LockstepError::UnknownDispatcher(command.dispatcher))?;
        handler(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Map;

    use super::*;

    fn cmd(dispatcher: u32) -> Command {
        Command {
            dispatcher,
            at_lockstep: 10,
            payload: Map::new(),
        }
    }

    #[test]
    fn routes_by_tag() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut table = DispatchTable::new();
        table.register(2, move |c| {
            assert_eq!(c.dispatcher, 2);
            h.fetch_add(1, Ordering::Relaxed);
        });

        table.execute(&cmd(2)).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let mut table = DispatchTable::new();
        table.register(1, |_| {});
        assert!(matches!(
            table.execute(&cmd(7)),
            Err(LockstepError::UnknownDispatcher(7))
        ));

        assert!(table.unregister(1));
        assert!(!table.contains(1));
        assert!(matches!(
            table.execute(&cmd(1)),
            Err(LockstepError::UnknownDispatcher(1))
        ));
    }
}
