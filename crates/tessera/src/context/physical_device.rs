use std::{ffi::CStr, sync::Arc};

use ash::vk;

use super::{CapabilityQuery, Instance, QueueCapabilities};
use crate::{
    error::{CallSite, DeviceError},
    surface::Surface,
};

///Device extensions every candidate needs to be usable for presentation.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

///Snapshot of everything the selector knows about a physical device. Captured once at selection time and
/// kept by the [Device](super::Device) afterwards.
#[derive(Clone, Debug)]
pub struct AdapterCandidate {
    pub phydev: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    ///Surface support of each queue family. All `false` if no surface was considered.
    pub present_support: Vec<bool>,
    pub extensions: CapabilityQuery,
    ///True if the surface reports at least one format and one present mode.
    pub swapchain_support: bool,
}

impl AdapterCandidate {
    ///Queries the snapshot for `phydev`. If `surface` is set, present support and swapchain support are queried
    /// against it.
    pub fn query(
        instance: &Instance,
        phydev: vk::PhysicalDevice,
        surface: Option<&Surface>,
    ) -> Result<Self, DeviceError> {
        let properties = unsafe { instance.inner.get_physical_device_properties(phydev) };
        let features = unsafe { instance.inner.get_physical_device_features(phydev) };
        let memory_properties =
            unsafe { instance.inner.get_physical_device_memory_properties(phydev) };
        let queue_families =
            unsafe { instance.inner.get_physical_device_queue_family_properties(phydev) };
        let extensions = CapabilityQuery::device(&instance.inner, phydev)?;

        let (present_support, swapchain_support) = if let Some(surface) = surface {
            let mut present = Vec::with_capacity(queue_families.len());
            for idx in 0..queue_families.len() {
                present.push(surface.supports_queue_family(phydev, idx as u32)?);
            }
            let formats = surface.get_formats(phydev)?;
            let modes = surface.get_present_modes(phydev)?;
            (present, !formats.is_empty() && !modes.is_empty())
        } else {
            (vec![false; queue_families.len()], false)
        };

        Ok(AdapterCandidate {
            phydev,
            properties,
            features,
            memory_properties,
            queue_families,
            present_support,
            extensions,
            swapchain_support,
        })
    }

    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("unnamed device"))
    }

    ///Union of all queue family capabilities.
    pub fn queue_capabilities(&self) -> QueueCapabilities {
        self.queue_families.iter().enumerate().fold(
            QueueCapabilities::default(),
            |acc, (idx, props)| {
                let fam = QueueCapabilities::from_family(
                    props,
                    self.present_support.get(idx).copied().unwrap_or(false),
                );
                QueueCapabilities {
                    graphics: acc.graphics | fam.graphics,
                    compute: acc.compute | fam.compute,
                    transfer: acc.transfer | fam.transfer,
                    present: acc.present | fam.present,
                }
            },
        )
    }

    pub fn supports_ray_tracing(&self) -> bool {
        self.extensions
            .has_extension(ash::khr::ray_tracing_pipeline::NAME)
    }
}

///Scoring function of the selector. A score of 0 marks a candidate as ineligible.
pub type Scorer = dyn Fn(&AdapterCandidate) -> u64 + Send + Sync;

///Default utility function.
///
/// Returns 0 if a required extension, swapchain support, or the graphics+compute+transfer queue triple is missing.
/// Otherwise discrete devices get 1000, integrated 500 and everything else 100, plus `maxImageDimension2D`,
/// 200 for anisotropic filtering, 500 for ray tracing and 300 for geometry shaders.
pub fn default_score(candidate: &AdapterCandidate) -> u64 {
    if candidate
        .extensions
        .first_missing_extension(REQUIRED_DEVICE_EXTENSIONS)
        .is_some()
    {
        return 0;
    }
    if !candidate.swapchain_support {
        return 0;
    }
    let caps = candidate.queue_capabilities();
    if !(caps.graphics && caps.compute && caps.transfer) {
        return 0;
    }

    let mut score = match candidate.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        _ => 100,
    };
    score += u64::from(candidate.properties.limits.max_image_dimension2_d);
    if candidate.features.sampler_anisotropy == vk::TRUE {
        score += 200;
    }
    if candidate.supports_ray_tracing() {
        score += 500;
    }
    if candidate.features.geometry_shader == vk::TRUE {
        score += 300;
    }

    score
}

///Scorer used for devices without a surface. Same as [default_score], but neither the swapchain extension
/// nor surface support is needed.
pub fn headless_score(candidate: &AdapterCandidate) -> u64 {
    if !candidate.queue_capabilities().graphics {
        return 0;
    }
    let mut score = match candidate.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        _ => 100,
    };
    score += u64::from(candidate.properties.limits.max_image_dimension2_d);
    score
}

///Picks the best physical device according to a scoring function.
pub struct DeviceSelector {
    scorer: Arc<Scorer>,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::new(default_score)
    }
}

impl DeviceSelector {
    pub fn new(scorer: impl Fn(&AdapterCandidate) -> u64 + Send + Sync + 'static) -> Self {
        DeviceSelector {
            scorer: Arc::new(scorer),
        }
    }

    pub fn headless() -> Self {
        DeviceSelector::new(headless_score)
    }

    pub fn score(&self, candidate: &AdapterCandidate) -> u64 {
        (self.scorer)(candidate)
    }

    ///Returns the index of the highest scoring candidate. Only candidates that beat the "none selected"
    /// sentinel of 0 are considered. On ties the first candidate in enumeration order wins. That tie-break
    /// is stable, but carries no meaning.
    pub fn select(&self, candidates: &[AdapterCandidate]) -> Result<usize, DeviceError> {
        if candidates.is_empty() {
            return Err(DeviceError::NoPhysicalDevice);
        }

        let mut best: Option<(usize, u64)> = None;
        let mut best_score = 0;
        for (idx, candidate) in candidates.iter().enumerate() {
            let score = self.score(candidate);
            #[cfg(feature = "logging")]
            log::info!(
                "Physical device candidate {}: {} scored {}",
                idx,
                candidate.name(),
                score
            );
            if score > best_score {
                best_score = score;
                best = Some((idx, score));
            }
        }

        best.map(|(idx, _)| idx)
            .ok_or(DeviceError::NoSuitableDevice {
                candidates: candidates.len(),
            })
    }

    ///Enumerates all physical devices of `instance`, snapshots them and returns the best candidate.
    pub fn pick(
        &self,
        instance: &Instance,
        surface: Option<&Surface>,
    ) -> Result<AdapterCandidate, DeviceError> {
        let phydevs = unsafe { instance.inner.enumerate_physical_devices() }
            .during("vkEnumeratePhysicalDevices")?;

        let mut candidates = phydevs
            .into_iter()
            .map(|phy| AdapterCandidate::query(instance, phy, surface))
            .collect::<Result<Vec<_>, _>>()?;

        let selected = self.select(&candidates)?;
        let candidate = candidates.swap_remove(selected);

        #[cfg(feature = "logging")]
        log::info!("Selected physical device: {}", candidate.name());

        Ok(candidate)
    }

    ///Same as [pick](DeviceSelector::pick), but without surface checks.
    pub fn pick_headless(&self, instance: &Instance) -> Result<AdapterCandidate, DeviceError> {
        self.pick(instance, None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn candidate(
        device_type: vk::PhysicalDeviceType,
        max_dim: u32,
    ) -> AdapterCandidate {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.device_type = device_type;
        properties.limits.max_image_dimension2_d = max_dim;
        AdapterCandidate {
            phydev: vk::PhysicalDevice::null(),
            properties,
            features: vk::PhysicalDeviceFeatures::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_support: vec![true],
            extensions: CapabilityQuery::from_names([], [ash::khr::swapchain::NAME]),
            swapchain_support: true,
        }
    }

    #[test]
    fn discrete_beats_integrated() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
        ];
        assert_eq!(default_score(&candidates[0]), 500 + 4096);
        assert_eq!(default_score(&candidates[1]), 1000 + 8192);
        assert_eq!(DeviceSelector::default().select(&candidates).unwrap(), 1);
    }

    #[test]
    fn optional_features_add_up() {
        let mut c = candidate(vk::PhysicalDeviceType::VIRTUAL_GPU, 1024);
        c.features.sampler_anisotropy = vk::TRUE;
        c.features.geometry_shader = vk::TRUE;
        c.extensions = CapabilityQuery::from_names(
            [],
            [
                ash::khr::swapchain::NAME,
                ash::khr::ray_tracing_pipeline::NAME,
            ],
        );
        assert_eq!(default_score(&c), 100 + 1024 + 200 + 500 + 300);
    }

    #[test]
    fn ineligible_candidates_score_zero() {
        let mut no_swapchain_ext = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        no_swapchain_ext.extensions = CapabilityQuery::default();
        assert_eq!(default_score(&no_swapchain_ext), 0);

        let mut no_formats = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        no_formats.swapchain_support = false;
        assert_eq!(default_score(&no_formats), 0);

        let mut no_transfer = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        no_transfer.queue_families[0].queue_flags =
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
        assert_eq!(default_score(&no_transfer), 0);
    }

    #[test]
    fn never_selects_zero_score_if_positive_exists() {
        let mut ineligible = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        ineligible.swapchain_support = false;
        let candidates = [
            ineligible,
            candidate(vk::PhysicalDeviceType::CPU, 256),
        ];
        assert_eq!(DeviceSelector::default().select(&candidates).unwrap(), 1);
    }

    #[test]
    fn first_maximum_wins() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::CPU, 1),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096),
        ];
        assert_eq!(DeviceSelector::default().select(&candidates).unwrap(), 1);
    }

    #[test]
    fn custom_scorer_is_used() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096),
        ];
        let prefer_integrated = DeviceSelector::new(|c| {
            if c.properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
                1
            } else {
                0
            }
        });
        assert_eq!(prefer_integrated.select(&candidates).unwrap(), 1);
    }

    #[test]
    fn fails_without_eligible_candidates() {
        let selector = DeviceSelector::new(|_| 0);
        assert!(matches!(
            selector.select(&[]),
            Err(DeviceError::NoPhysicalDevice)
        ));
        assert!(matches!(
            selector.select(&[candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192)]),
            Err(DeviceError::NoSuitableDevice { candidates: 1 })
        ));
    }

    #[test]
    fn headless_ignores_surface() {
        let mut c = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        c.swapchain_support = false;
        c.present_support = vec![false];
        c.extensions = CapabilityQuery::default();
        assert_eq!(headless_score(&c), 500 + 4096);
        assert_eq!(default_score(&c), 0);
    }
}
