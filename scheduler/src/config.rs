// Copyright 2026 the cotask authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::ConfigError;

/// Descriptor for a specialized pool: a named class of task that gets its
/// own stack size, and (for a higher layer built on top of `cotask`) its
/// own routing rule. Specialized pool *dispatch* is out of scope for the
/// core scheduler; `cotask` only carries the descriptor so that layer can
/// consult it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpecializedPool {
    pub task_type_tag: String,
    pub stack_size: usize,
}

/// Scheduler configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub worker_stack_size: usize,
    pub worker_limit: usize,
    pub queue_limit: usize,
    pub specialized_pools: Vec<SpecializedPool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_stack_size: cotask_context::DEFAULT_STACK_SIZE,
            worker_limit: 5,
            queue_limit: 10,
            specialized_pools: Vec::new(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_limit < self.worker_limit {
            return Err(ConfigError::QueueSmallerThanWorkerLimit {
                queue_limit: self.queue_limit,
                worker_limit: self.worker_limit,
            });
        }
        if self.worker_stack_size < cotask_context::MIN_STACK_SIZE {
            return Err(ConfigError::StackTooSmall {
                requested: self.worker_stack_size,
                minimum: cotask_context::MIN_STACK_SIZE,
            });
        }
        Ok(())
    }
}

/// Builder for [`Config`]; validated once, in [`ConfigBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    config: ConfigOrDefault,
}

#[derive(Clone, Debug)]
struct ConfigOrDefault(Config);

impl Default for ConfigOrDefault {
    fn default() -> Self {
        Self(Config::default())
    }
}

impl ConfigBuilder {
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.config.0.worker_stack_size = bytes;
        self
    }

    pub fn worker_limit(mut self, limit: usize) -> Self {
        self.config.0.worker_limit = limit;
        self
    }

    pub fn queue_limit(mut self, limit: usize) -> Self {
        self.config.0.queue_limit = limit;
        self
    }

    pub fn specialized_pool(mut self, task_type_tag: impl Into<String>, stack_size: usize) -> Self {
        self.config.0.specialized_pools.push(SpecializedPool {
            task_type_tag: task_type_tag.into(),
            stack_size,
        });
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.0.validate()?;
        Ok(self.config.0)
    }
}
