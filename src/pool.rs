use crate::component::Component;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Fixed set of component instances shared by a stage's workers.
///
/// A worker checks an instance out for the duration of one handle call, so
/// no instance is ever used by two workers at once.
#[derive(Clone)]
pub(crate) struct ComponentPool {
    idle: Arc<ArrayQueue<Box<dyn Component>>>,
}

impl ComponentPool {
    /// Build a pool from already-created components; `components` must not be empty
    pub(crate) fn new(components: Vec<Box<dyn Component>>) -> Self {
        let idle = ArrayQueue::new(components.len().max(1));
        for component in components {
            // Capacity equals the number of components, so this cannot overflow.
            let _ = idle.push(component);
        }
        Self {
            idle: Arc::new(idle),
        }
    }

    /// Take any idle instance, waiting if all are busy
    pub(crate) fn checkout(&self) -> PooledComponent<'_> {
        let backoff = Backoff::new();
        loop {
            if let Some(component) = self.idle.pop() {
                return PooledComponent {
                    pool: self,
                    component: Some(component),
                };
            }
            backoff.snooze();
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn size(&self) -> usize {
        self.idle.capacity()
    }
}

/// A checked-out component; returned to the pool on drop.
pub(crate) struct PooledComponent<'a> {
    pool: &'a ComponentPool,
    component: Option<Box<dyn Component>>,
}

impl Deref for PooledComponent<'_> {
    type Target = dyn Component;

    fn deref(&self) -> &Self::Target {
        match &self.component {
            Some(component) => component.as_ref(),
            None => unreachable!("component is only taken on drop"),
        }
    }
}

impl DerefMut for PooledComponent<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.component {
            Some(component) => component.as_mut(),
            None => unreachable!("component is only taken on drop"),
        }
    }
}

impl Drop for PooledComponent<'_> {
    fn drop(&mut self) {
        if let Some(component) = self.component.take() {
            let _ = self.pool.idle.push(component);
        }
    }
}
