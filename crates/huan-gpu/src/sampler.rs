//! Texture samplers.

use crate::allocator::SharedAllocator;
use crate::error::Result;
use ash::vk;

/// Builder for [`Sampler`].
///
/// Defaults to linear filtering and repeat addressing over every mip level,
/// with anisotropy and depth comparison disabled.
#[derive(Debug, Clone, Copy)]
pub struct SamplerBuilder {
    mag_filter: vk::Filter,
    min_filter: vk::Filter,
    mipmap_mode: vk::SamplerMipmapMode,
    address_modes: [vk::SamplerAddressMode; 3],
    mip_lod_bias: f32,
    max_anisotropy: Option<f32>,
    compare_op: Option<vk::CompareOp>,
    min_lod: f32,
    max_lod: f32,
    border_color: vk::BorderColor,
    unnormalized_coordinates: bool,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerBuilder {
    pub fn new() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_modes: [vk::SamplerAddressMode::REPEAT; 3],
            mip_lod_bias: 0.0,
            max_anisotropy: None,
            compare_op: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            unnormalized_coordinates: false,
        }
    }

    /// Use `filter` for both magnification and minification.
    pub fn filter(mut self, filter: vk::Filter) -> Self {
        self.mag_filter = filter;
        self.min_filter = filter;
        self
    }

    pub fn mag_filter(mut self, filter: vk::Filter) -> Self {
        self.mag_filter = filter;
        self
    }

    pub fn min_filter(mut self, filter: vk::Filter) -> Self {
        self.min_filter = filter;
        self
    }

    pub fn mipmap_mode(mut self, mode: vk::SamplerMipmapMode) -> Self {
        self.mipmap_mode = mode;
        self
    }

    /// Use `mode` for the U, V and W coordinates.
    pub fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_modes = [mode; 3];
        self
    }

    pub fn address_modes(
        mut self,
        u: vk::SamplerAddressMode,
        v: vk::SamplerAddressMode,
        w: vk::SamplerAddressMode,
    ) -> Self {
        self.address_modes = [u, v, w];
        self
    }

    pub fn mip_lod_bias(mut self, bias: f32) -> Self {
        self.mip_lod_bias = bias;
        self
    }

    /// Enable anisotropic filtering. The device feature must be enabled.
    pub fn anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.max_anisotropy = Some(max_anisotropy);
        self
    }

    /// Enable depth comparison, for shadow map lookups.
    pub fn compare_op(mut self, op: vk::CompareOp) -> Self {
        self.compare_op = Some(op);
        self
    }

    pub fn lod_range(mut self, min_lod: f32, max_lod: f32) -> Self {
        self.min_lod = min_lod;
        self.max_lod = max_lod;
        self
    }

    /// Border color for `CLAMP_TO_BORDER` addressing.
    pub fn border_color(mut self, color: vk::BorderColor) -> Self {
        self.border_color = color;
        self
    }

    pub fn unnormalized_coordinates(mut self, unnormalized: bool) -> Self {
        self.unnormalized_coordinates = unnormalized;
        self
    }

    /// Create info described by this builder.
    pub fn create_info(&self) -> vk::SamplerCreateInfo<'static> {
        let [u, v, w] = self.address_modes;
        vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(u)
            .address_mode_v(v)
            .address_mode_w(w)
            .mip_lod_bias(self.mip_lod_bias)
            .anisotropy_enable(self.max_anisotropy.is_some())
            .max_anisotropy(self.max_anisotropy.unwrap_or(1.0))
            .compare_enable(self.compare_op.is_some())
            .compare_op(self.compare_op.unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(self.min_lod)
            .max_lod(self.max_lod)
            .border_color(self.border_color)
            .unnormalized_coordinates(self.unnormalized_coordinates)
    }

    pub fn build(&self, allocator: &SharedAllocator) -> Result<Sampler> {
        Sampler::new(allocator, &self.create_info())
    }
}

/// Owned sampler, destroyed when dropped.
pub struct Sampler {
    handle: vk::Sampler,
    allocator: SharedAllocator,
}

impl Sampler {
    /// Create a sampler from a raw create info.
    pub fn new(allocator: &SharedAllocator, create_info: &vk::SamplerCreateInfo<'_>) -> Result<Self> {
        let handle = allocator.lock().create_sampler(create_info)?;
        tracing::trace!(
            mag_filter = ?create_info.mag_filter,
            address_mode = ?create_info.address_mode_u,
            "Created sampler"
        );
        Ok(Self {
            handle,
            allocator: allocator.clone(),
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.allocator.lock().destroy_sampler(self.handle);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAllocator;

    #[test]
    fn defaults_filter_linearly_and_repeat() {
        let info = SamplerBuilder::new().create_info();
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.compare_enable, vk::FALSE);
        assert_eq!(info.max_lod, vk::LOD_CLAMP_NONE);
    }

    #[test]
    fn shadow_sampler_enables_comparison() {
        let info = SamplerBuilder::new()
            .address_mode(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .anisotropy(8.0)
            .create_info();
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::CLAMP_TO_BORDER);
        assert_eq!(info.border_color, vk::BorderColor::FLOAT_OPAQUE_WHITE);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 8.0);
    }

    #[test]
    fn drop_destroys_sampler() {
        let mock = MockAllocator::new();
        let allocator = mock.shared();

        let nearest = SamplerBuilder::new()
            .filter(vk::Filter::NEAREST)
            .build(&allocator)
            .unwrap();
        let linear = Sampler::new(&allocator, &vk::SamplerCreateInfo::default()).unwrap();
        assert_ne!(nearest.handle(), linear.handle());
        assert_eq!(mock.live_samplers(), 2);

        drop(nearest);
        assert_eq!(mock.live_samplers(), 1);
        drop(linear);
        assert_eq!(mock.live_samplers(), 0);
        assert_eq!(mock.stats().samplers_destroyed, 2);
    }
}
