use crate::device::{Device, ObjectTag};
use crate::error::Result;
use ash::vk;
use whisker_core::SamplerDesc;

/// Texture sampling state. Max LOD 1, opaque black border.
pub struct Sampler {
    pub(crate) tag: ObjectTag,
    pub(crate) raw: vk::Sampler,
    desc: SamplerDesc,
}

impl Sampler {
    pub(crate) fn new(device: &Device, desc: SamplerDesc) -> Result<Self> {
        let raw = device.driver().create_sampler(&desc)?;
        Ok(Self {
            tag: device.tag(),
            raw,
            desc,
        })
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    pub(crate) fn destroy(self, device: &Device) {
        device.driver().destroy_sampler(self.raw);
    }
}
