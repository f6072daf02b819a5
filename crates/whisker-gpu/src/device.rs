//! Device owner: one driver, one queue, and the tag every object it creates
//! carries.

use crate::backend::headless::HeadlessDriver;
use crate::backend::vulkan::{InstanceConfig, VulkanDriver};
use crate::backend::{Command, Driver, Submission};
use crate::error::{Result, UsageError};
use std::sync::atomic::{AtomicU64, Ordering};
use whisker_core::Backend;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies the backend and context an object was created by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ObjectTag {
    backend: Backend,
    context: u64,
}

impl ObjectTag {
    fn new(backend: Backend) -> Self {
        Self {
            backend,
            context: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

enum DriverImpl {
    Vulkan(Box<VulkanDriver>),
    Headless(HeadlessDriver),
}

pub(crate) struct Device {
    inner: DriverImpl,
    tag: ObjectTag,
}

impl Device {
    pub fn vulkan(config: &InstanceConfig<'_>) -> Result<Self> {
        let driver = VulkanDriver::new(config)?;
        Ok(Self {
            inner: DriverImpl::Vulkan(Box::new(driver)),
            tag: ObjectTag::new(Backend::Vulkan),
        })
    }

    pub fn headless() -> Self {
        Self {
            inner: DriverImpl::Headless(HeadlessDriver::new()),
            tag: ObjectTag::new(Backend::Headless),
        }
    }

    #[inline]
    pub fn driver(&self) -> &dyn Driver {
        match &self.inner {
            DriverImpl::Vulkan(driver) => &**driver,
            DriverImpl::Headless(driver) => driver,
        }
    }

    pub fn headless_driver(&self) -> Option<&HeadlessDriver> {
        match &self.inner {
            DriverImpl::Headless(driver) => Some(driver),
            DriverImpl::Vulkan(_) => None,
        }
    }

    #[inline]
    pub fn tag(&self) -> ObjectTag {
        self.tag
    }

    /// Reject objects created by another backend or context.
    #[inline]
    pub fn check(
        &self,
        tag: ObjectTag,
        call: &'static str,
        object: &'static str,
    ) -> std::result::Result<(), UsageError> {
        if tag == self.tag {
            Ok(())
        } else {
            Err(UsageError::ForeignObject { call, object })
        }
    }

    /// Record `commands` into a disposable command buffer, submit it and
    /// wait for the queue to drain.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn one_shot(&self, commands: &[Command]) -> Result<()> {
        let driver = self.driver();
        let cmd = driver.allocate_command_buffer()?;

        let result = (|| {
            driver.begin_command_buffer(cmd, true)?;
            for command in commands {
                driver.record(cmd, command);
            }
            driver.end_command_buffer(cmd)?;
            driver.submit(&Submission::bare(cmd))?;
            driver.queue_wait_idle()
        })();

        driver.free_command_buffer(cmd);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_device_gets_its_own_tag() {
        let a = Device::headless();
        let b = Device::headless();
        assert_ne!(a.tag(), b.tag());
        assert!(a.check(a.tag(), "draw", "buffer").is_ok());
        assert_eq!(
            a.check(b.tag(), "use_vertex_buffer", "buffer"),
            Err(UsageError::ForeignObject {
                call: "use_vertex_buffer",
                object: "buffer"
            })
        );
    }

    #[test]
    fn one_shot_frees_its_command_buffer() {
        let device = Device::headless();
        let live = device.headless_driver().unwrap().live_objects();
        device.one_shot(&[]).unwrap();
        let headless = device.headless_driver().unwrap();
        assert_eq!(headless.live_objects(), live);
        assert_eq!(headless.submissions().len(), 1);
    }
}
