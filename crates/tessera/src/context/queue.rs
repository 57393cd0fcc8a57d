use ash::vk;
use smallvec::SmallVec;

use crate::error::DeviceError;

///Capability tags of a queue family. Resolved once when the device is initialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QueueCapabilities {
    pub graphics: bool,
    pub compute: bool,
    pub transfer: bool,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueCapability {
    Graphics,
    Compute,
    Transfer,
    Present,
}

impl QueueCapability {
    pub fn name(&self) -> &'static str {
        match self {
            QueueCapability::Graphics => "graphics",
            QueueCapability::Compute => "compute",
            QueueCapability::Transfer => "transfer",
            QueueCapability::Present => "present",
        }
    }
}

impl QueueCapabilities {
    pub fn from_family(properties: &vk::QueueFamilyProperties, can_present: bool) -> Self {
        QueueCapabilities {
            graphics: properties.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            compute: properties.queue_flags.contains(vk::QueueFlags::COMPUTE),
            transfer: properties.queue_flags.contains(vk::QueueFlags::TRANSFER),
            present: can_present,
        }
    }

    pub fn has(&self, capability: QueueCapability) -> bool {
        match capability {
            QueueCapability::Graphics => self.graphics,
            QueueCapability::Compute => self.compute,
            QueueCapability::Transfer => self.transfer,
            QueueCapability::Present => self.present,
        }
    }
}

///Resolved mapping from capability to queue family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    ///Capabilities of each family, indexed by family index.
    pub families: Vec<QueueCapabilities>,
    pub graphics: u32,
    pub present: u32,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    ///Tags each family and picks the first family for each capability. `present_support[i]` is the result of the
    /// surface support query for family `i`.
    ///
    /// Fails if no family offers graphics or none offers present.
    pub fn resolve(
        properties: &[vk::QueueFamilyProperties],
        present_support: &[bool],
    ) -> Result<Self, DeviceError> {
        let families = properties
            .iter()
            .enumerate()
            .map(|(idx, props)| {
                QueueCapabilities::from_family(
                    props,
                    present_support.get(idx).copied().unwrap_or(false),
                )
            })
            .collect::<Vec<_>>();

        let first = |cap: QueueCapability| {
            families
                .iter()
                .position(|f| f.has(cap))
                .map(|idx| idx as u32)
        };

        let graphics = first(QueueCapability::Graphics)
            .ok_or(DeviceError::MissingQueueFamily(QueueCapability::Graphics.name()))?;
        //prefer presenting from the graphics family, so both can share one queue
        let present = if families[graphics as usize].present {
            graphics
        } else {
            first(QueueCapability::Present)
                .ok_or(DeviceError::MissingQueueFamily(QueueCapability::Present.name()))?
        };

        Ok(QueueFamilies {
            graphics,
            present,
            compute: first(QueueCapability::Compute),
            transfer: first(QueueCapability::Transfer),
            families,
        })
    }

    ///Same as [resolve](QueueFamilies::resolve), but without a surface. The graphics family is used as the present family.
    pub fn resolve_headless(properties: &[vk::QueueFamilyProperties]) -> Result<Self, DeviceError> {
        let all_present = vec![true; properties.len()];
        let mut resolved = Self::resolve(properties, &all_present)?;
        for f in resolved.families.iter_mut() {
            f.present = false;
        }
        Ok(resolved)
    }

    pub fn family_for(&self, capability: QueueCapability) -> Option<u32> {
        match capability {
            QueueCapability::Graphics => Some(self.graphics),
            QueueCapability::Present => Some(self.present),
            QueueCapability::Compute => self.compute,
            QueueCapability::Transfer => self.transfer,
        }
    }

    ///Family indices touched by any resolved capability, deduplicated by family.
    pub fn unique_families(&self) -> SmallVec<[u32; 4]> {
        let mut unique = SmallVec::new();
        for family in [
            Some(self.graphics),
            Some(self.present),
            self.compute,
            self.transfer,
        ]
        .into_iter()
        .flatten()
        {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}

///Abstract queue that collects a [ash::vk::Queue](ash::vk::Queue) and its family.
#[derive(Clone, Debug)]
pub struct Queue {
    pub inner: vk::Queue,
    pub family_index: u32,
    pub properties: vk::QueueFamilyProperties,
    pub capabilities: QueueCapabilities,
}

pub struct QueueBuilder {
    ///The family's index.
    pub family_index: u32,
    ///its properties
    pub properties: vk::QueueFamilyProperties,
    ///The length of this vector determins how many instances of this queue are created. The number determins the
    /// priority of each queue on the hardware.
    pub priorities: Vec<f32>,
}

impl QueueBuilder {
    ///Single queue with priority 1.0
    pub fn single(family_index: u32, properties: vk::QueueFamilyProperties) -> Self {
        QueueBuilder {
            family_index,
            properties,
            priorities: vec![1.0],
        }
    }

    pub fn as_create_info(&self) -> vk::DeviceQueueCreateInfo<'_> {
        vk::DeviceQueueCreateInfo::default()
            .queue_family_index(self.family_index)
            .queue_priorities(&self.priorities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_universal_family() {
        let props = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let resolved = QueueFamilies::resolve(&props, &[true]).unwrap();
        assert_eq!(resolved.graphics, 0);
        assert_eq!(resolved.present, 0);
        assert_eq!(resolved.compute, Some(0));
        assert_eq!(resolved.transfer, Some(0));
        assert_eq!(resolved.unique_families().as_slice(), &[0]);
    }

    #[test]
    fn separate_present_family_is_deduplicated() {
        let props = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let resolved = QueueFamilies::resolve(&props, &[false, false, true]).unwrap();
        assert_eq!(resolved.graphics, 0);
        assert_eq!(resolved.present, 2);
        assert_eq!(resolved.compute, Some(0));
        assert_eq!(resolved.transfer, Some(1));
        assert_eq!(resolved.unique_families().as_slice(), &[0, 2, 1]);
        assert!(resolved.families[2].present);
        assert!(!resolved.families[0].present);
    }

    #[test]
    fn missing_graphics_is_fatal() {
        let props = [family(vk::QueueFlags::COMPUTE)];
        let err = QueueFamilies::resolve(&props, &[true]).unwrap_err();
        assert!(matches!(err, DeviceError::MissingQueueFamily("graphics")));
    }

    #[test]
    fn missing_present_is_fatal() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        let err = QueueFamilies::resolve(&props, &[false]).unwrap_err();
        assert!(matches!(err, DeviceError::MissingQueueFamily("present")));
    }

    #[test]
    fn headless_uses_graphics_family() {
        let props = [family(vk::QueueFlags::TRANSFER), family(vk::QueueFlags::GRAPHICS)];
        let resolved = QueueFamilies::resolve_headless(&props).unwrap();
        assert_eq!(resolved.graphics, 1);
        assert_eq!(resolved.present, 1);
        assert!(resolved.families.iter().all(|f| !f.present));
    }
}
