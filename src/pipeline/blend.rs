//! Per-pixel ULR blending: reprojection, visibility, weights and accumulation
//!
//! Each renderer variant walks its cameras differently, but all of them feed
//! the same [`BlendKernel`] samples into a [`BlendAccumulator`], so equal
//! selections give equal images.

use super::{BlendDiscipline, Coverage};
use crate::resources::{DepthConvention, SourceImage, TextureData};
use crate::scene::{CameraId, InputCamera};
use crate::selection::angle_between;
use crate::UlrConfig;
use glam::{Vec2, Vec3, Vec4};

/// Weight of the relative distance term in the penalty
pub const BETA: f32 = 0.1;
/// Penalty of an empty top-K slot
pub const INFTY_W: f32 = 1e5;
/// Lower bound of the angular penalty, keeps weights finite
pub const MIN_PENALTY: f32 = 1e-4;
/// Slots of the bounded top-K accumulator
pub const MAX_BLEND_CAMS: usize = 4;
/// Samples at or below this brightness count as black
pub const BLACK_EPS: f32 = 1e-4;

/// View-dependent penalty of seeing `point` from `camera_pos` instead of `eye_pos`.
///
/// Lower is better: the angle between the two rays, plus a term for source
/// cameras farther from the surface than the eye (they see it at lower
/// resolution).
pub fn penalty(point: Vec3, camera_pos: Vec3, eye_pos: Vec3) -> f32 {
    let to_camera = point - camera_pos;
    let to_eye = point - eye_pos;
    let angle = angle_between(to_camera, to_eye).max(MIN_PENALTY);

    let camera_dist = to_camera.length();
    let eye_dist = to_eye.length();
    let resolution = if camera_dist > 0.0 {
        ((camera_dist - eye_dist) / camera_dist).max(0.0)
    } else {
        0.0
    };
    angle + BETA * resolution
}

/// Whether a reprojected UV lands inside the source image
#[inline]
pub fn in_unit_square(uv: Vec2) -> bool {
    (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y)
}

/// Tapered weight: zero at `threshold`, growing as the penalty shrinks
#[inline]
pub fn tapered_weight(penalty: f32, threshold: f32) -> f32 {
    (1.0 - penalty / threshold).max(0.0) / penalty
}

/// Per-pixel options, resolved once per frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendParams {
    pub discipline: BlendDiscipline,
    pub max_blend_penalty: f32,
    pub occlusion_enabled: bool,
    pub epsilon_occlusion: f32,
    pub convention: DepthConvention,
    pub masks_enabled: bool,
    pub masks_are_binary: bool,
    pub invert_masks: bool,
    pub mask_threshold: f32,
    pub discard_black_pixels: bool,
    pub winner_takes_all: bool,
    pub flip_rgbs: bool,
    pub show_weights: bool,
}

impl BlendParams {
    pub fn from_config(config: &UlrConfig, convention: DepthConvention) -> Self {
        Self {
            discipline: config.discipline,
            max_blend_penalty: config.max_blend_penalty,
            occlusion_enabled: config.occlusion_enabled,
            epsilon_occlusion: config.epsilon_occlusion,
            convention,
            masks_enabled: config.masks_enabled,
            masks_are_binary: config.masks_are_binary,
            invert_masks: config.invert_masks,
            mask_threshold: config.mask_threshold,
            discard_black_pixels: config.discard_black_pixels,
            winner_takes_all: config.winner_takes_all,
            flip_rgbs: config.flip_rgbs,
            show_weights: config.show_weights,
        }
    }
}

/// A source camera's accepted contribution to one pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub camera: CameraId,
    pub color: Vec3,
    pub penalty: f32,
    /// Continuous mask value, 1 when masks are off or binary
    pub mask: f32,
}

impl Sample {
    /// Ordering used everywhere: lower penalty first, camera id breaks ties
    #[inline]
    fn better_than(&self, other: &Sample) -> bool {
        match self.penalty.total_cmp(&other.penalty) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.camera < other.camera,
            std::cmp::Ordering::Greater => false,
        }
    }

    /// Winner-takes-all ordering: larger mask-scaled inverse penalty first,
    /// then the penalty order above
    #[inline]
    fn outranks(&self, other: &Sample) -> bool {
        let strength = self.mask / self.penalty;
        match strength.total_cmp(&(other.mask / other.penalty)) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.better_than(other),
            std::cmp::Ordering::Less => false,
        }
    }
}

/// Blended colour of a pixel plus its three leading normalized weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub color: Vec3,
    pub leading: [f32; 3],
}

/// Stateless per-pixel sampling logic
#[derive(Debug, Clone, Copy)]
pub struct BlendKernel {
    params: BlendParams,
}

impl BlendKernel {
    pub fn new(params: BlendParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BlendParams {
        &self.params
    }

    /// Reproject `point` into one source camera and test it.
    ///
    /// Returns `None` when the camera cannot contribute: behind the camera,
    /// outside its image, occluded, masked out or black.
    pub fn sample(
        &self,
        camera: &InputCamera,
        image: &SourceImage,
        mask: Option<&TextureData<f32>>,
        point: Vec3,
        eye_pos: Vec3,
    ) -> Option<Sample> {
        let p = &self.params;
        let (uv, ndc_z) = camera.project(point)?;
        if !in_unit_square(uv) {
            return None;
        }

        if p.occlusion_enabled {
            let stored = image.depth.sample_nearest(uv);
            let measured = p.convention.measure(camera, point, ndc_z);
            let scale = match p.convention {
                DepthConvention::WorldDistance => measured,
                DepthConvention::ProjectiveZ => 1.0,
            };
            if stored < measured - p.epsilon_occlusion * scale {
                return None;
            }
        }

        let mut mask_value = 1.0;
        if p.masks_enabled {
            if let Some(mask) = mask {
                let mut m = mask.sample_bilinear(uv);
                if p.invert_masks {
                    m = 1.0 - m;
                }
                if p.masks_are_binary {
                    if m < 0.5 {
                        return None;
                    }
                } else {
                    if m < p.mask_threshold {
                        return None;
                    }
                    mask_value = m;
                }
            }
        }

        let color_uv = if p.flip_rgbs {
            Vec2::new(uv.x, 1.0 - uv.y)
        } else {
            uv
        };
        let color = image.color.sample_bilinear(color_uv);
        if p.discard_black_pixels && color.max_element() <= BLACK_EPS {
            return None;
        }

        Some(Sample {
            camera: camera.id(),
            color,
            penalty: penalty(point, camera.position(), eye_pos),
            mask: mask_value,
        })
    }

    /// Normalized `(camera, weight)` pairs the kernel would blend for these samples
    pub fn contributions(&self, samples: &[Sample]) -> Vec<(CameraId, f32)> {
        let weighted: Vec<(Sample, f32)> = if self.params.winner_takes_all {
            winner_of(samples.iter().copied())
                .map(|s| vec![(s, 1.0)])
                .unwrap_or_default()
        } else {
            match self.params.discipline {
                BlendDiscipline::BoundedTopK => {
                    let mut acc = TopKAccumulator::default();
                    samples.iter().for_each(|s| acc.push(*s));
                    acc.weights()
                }
                BlendDiscipline::FullAccumulate => samples
                    .iter()
                    .map(|s| (*s, s.mask * tapered_weight(s.penalty, self.params.max_blend_penalty)))
                    .filter(|(_, w)| *w > 0.0)
                    .collect(),
            }
        };

        let total: f32 = weighted.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        weighted
            .into_iter()
            .map(|(s, w)| (s.camera, w / total))
            .collect()
    }
}

fn winner_of(samples: impl Iterator<Item = Sample>) -> Option<Sample> {
    samples.fold(None, |winner: Option<Sample>, s| match winner {
        Some(w) if !s.outranks(&w) => Some(w),
        _ => Some(s),
    })
}

fn resolve_weighted(weighted: &[(Sample, f32)]) -> Option<Resolved> {
    let total: f32 = weighted.iter().map(|(_, w)| w).sum();
    if !(total > 0.0) {
        return None;
    }

    let mut color = Vec3::ZERO;
    let mut normalized: Vec<f32> = Vec::with_capacity(weighted.len());
    for (sample, weight) in weighted {
        let w = weight / total;
        color += sample.color * w;
        normalized.push(w);
    }
    normalized.sort_by(|a, b| b.total_cmp(a));

    let mut leading = [0.0; 3];
    for (slot, w) in leading.iter_mut().zip(normalized) {
        *slot = w;
    }
    Some(Resolved { color, leading })
}

/// Keeps the `MAX_BLEND_CAMS` lowest-penalty samples of a pixel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TopKAccumulator {
    /// Sorted best first; `None` slots are empty
    slots: [Option<Sample>; MAX_BLEND_CAMS],
    /// Winner-takes-all pick over every pushed sample
    winner: Option<Sample>,
}

impl TopKAccumulator {
    pub fn push(&mut self, sample: Sample) {
        if self.winner.map_or(true, |w| sample.outranks(&w)) {
            self.winner = Some(sample);
        }

        let Some(position) = self.slots.iter().position(|slot| match slot {
            Some(kept) => sample.better_than(kept),
            None => true,
        }) else {
            return;
        };
        for i in (position + 1..MAX_BLEND_CAMS).rev() {
            self.slots[i] = self.slots[i - 1];
        }
        self.slots[position] = Some(sample);
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.slots.iter().flatten()
    }

    pub fn best(&self) -> Option<Sample> {
        self.slots[0]
    }

    pub fn winner(&self) -> Option<Sample> {
        self.winner
    }

    /// Penalty at which weights reach zero: the worst kept sample, or
    /// `INFTY_W` while slots remain empty
    pub fn threshold(&self) -> f32 {
        self.slots[MAX_BLEND_CAMS - 1].map_or(INFTY_W, |s| s.penalty)
    }

    /// Unnormalized weights of the kept samples
    pub fn weights(&self) -> Vec<(Sample, f32)> {
        let threshold = self.threshold();
        let weighted: Vec<(Sample, f32)> = self
            .samples()
            .map(|s| (*s, s.mask * tapered_weight(s.penalty, threshold)))
            .collect();
        if weighted.iter().any(|(_, w)| *w > 0.0) {
            return weighted.into_iter().filter(|(_, w)| *w > 0.0).collect();
        }

        // Every kept sample ties with the threshold: blend the best ones equally
        let Some(best) = self.best() else {
            return Vec::new();
        };
        self.samples()
            .filter(|s| s.penalty == best.penalty && s.mask > 0.0)
            .map(|s| (*s, s.mask))
            .collect()
    }
}

/// Running weighted sum over every valid sample of a pixel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FullAccumulator {
    color_sum: Vec3,
    weight_sum: f32,
    /// Three largest weights, descending
    leading: [f32; 3],
    winner: Option<Sample>,
}

impl FullAccumulator {
    pub fn push(&mut self, sample: Sample, max_penalty: f32) {
        if self.winner.map_or(true, |w| sample.outranks(&w)) {
            self.winner = Some(sample);
        }

        let weight = sample.mask * tapered_weight(sample.penalty, max_penalty);
        if weight <= 0.0 {
            return;
        }
        self.color_sum += sample.color * weight;
        self.weight_sum += weight;

        if let Some(slot) = self.leading.iter().position(|&w| weight > w) {
            for i in (slot + 1..3).rev() {
                self.leading[i] = self.leading[i - 1];
            }
            self.leading[slot] = weight;
        }
    }

    pub fn weight_sum(&self) -> f32 {
        self.weight_sum
    }

    fn resolve(&self) -> Option<Resolved> {
        if !(self.weight_sum > 0.0) {
            return None;
        }
        Some(Resolved {
            color: self.color_sum / self.weight_sum,
            leading: self.leading.map(|w| w / self.weight_sum),
        })
    }
}

/// Per-pixel accumulator for either discipline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlendAccumulator {
    TopK(TopKAccumulator),
    Full(FullAccumulator),
}

impl BlendAccumulator {
    pub fn new(discipline: BlendDiscipline) -> Self {
        match discipline {
            BlendDiscipline::BoundedTopK => BlendAccumulator::TopK(TopKAccumulator::default()),
            BlendDiscipline::FullAccumulate => BlendAccumulator::Full(FullAccumulator::default()),
        }
    }

    pub fn push(&mut self, sample: Sample, params: &BlendParams) {
        match self {
            BlendAccumulator::TopK(acc) => acc.push(sample),
            BlendAccumulator::Full(acc) => acc.push(sample, params.max_blend_penalty),
        }
    }

    /// Final colour, or `None` when nothing got a positive weight
    pub fn resolve(&self, params: &BlendParams) -> Option<Resolved> {
        if params.winner_takes_all {
            let winner = match self {
                BlendAccumulator::TopK(acc) => acc.winner(),
                BlendAccumulator::Full(acc) => acc.winner,
            }?;
            return Some(Resolved {
                color: winner.color,
                leading: [1.0, 0.0, 0.0],
            });
        }
        match self {
            BlendAccumulator::TopK(acc) => resolve_weighted(&acc.weights()),
            BlendAccumulator::Full(acc) => acc.resolve(),
        }
    }
}

/// Output texel and coverage of a geometry pixel
pub fn finish_pixel(resolved: Option<Resolved>, params: &BlendParams, background: Vec4) -> (Vec4, Coverage) {
    match resolved {
        Some(r) if params.show_weights => (
            Vec4::new(r.leading[0], r.leading[1], r.leading[2], 1.0),
            Coverage::Blended,
        ),
        Some(r) => (r.color.extend(1.0), Coverage::Blended),
        None => (background, Coverage::Unblended),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;

    fn sample(camera: CameraId, penalty: f32, color: Vec3) -> Sample {
        Sample {
            camera,
            color,
            penalty,
            mask: 1.0,
        }
    }

    fn params() -> BlendParams {
        BlendParams::from_config(&UlrConfig::default(), DepthConvention::WorldDistance)
    }

    #[test]
    fn test_penalty_zero_angle_is_clamped() {
        let p = penalty(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, 2.0));
        assert!(p >= MIN_PENALTY && p < 1e-3);
    }

    #[test]
    fn test_penalty_prefers_closer_cameras() {
        let eye = Vec3::new(0.0, 0.0, 2.0);
        let near = penalty(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), eye);
        let far = penalty(Vec3::ZERO, Vec3::new(0.0, 0.0, 8.0), eye);
        assert!(far > near);
        assert!((far - near - BETA * 0.75).abs() < 1e-3);
    }

    #[test]
    fn test_in_unit_square() {
        assert!(in_unit_square(Vec2::new(0.0, 1.0)));
        assert!(!in_unit_square(Vec2::new(-0.01, 0.5)));
        assert!(!in_unit_square(Vec2::new(0.5, 1.01)));
    }

    #[test]
    fn test_topk_keeps_best_four_and_zeroes_threshold() {
        let mut acc = TopKAccumulator::default();
        for (id, p) in [(0, 0.5), (1, 0.1), (2, 0.9), (3, 0.3), (4, 0.2)] {
            acc.push(sample(id, p, Vec3::ONE));
        }
        let kept: Vec<CameraId> = acc.samples().map(|s| s.camera).collect();
        assert_eq!(kept, vec![1, 4, 3, 0]);
        assert_eq!(acc.threshold(), 0.5);

        let weights = acc.weights();
        assert_eq!(weights.len(), 3);
        assert!(weights.iter().all(|(s, _)| s.camera != 0));
    }

    #[test]
    fn test_topk_ties_fall_back_to_equal_blend() {
        let mut acc = TopKAccumulator::default();
        for id in 0..4 {
            acc.push(sample(id, 0.25, Vec3::splat(id as f32)));
        }
        let resolved = resolve_weighted(&acc.weights()).unwrap();
        assert!((resolved.color.x - 1.5).abs() < 1e-6);
        assert!((resolved.leading[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_topk_order_independent() {
        let samples = [
            sample(3, 0.4, Vec3::X),
            sample(1, 0.2, Vec3::Y),
            sample(2, 0.2, Vec3::Z),
            sample(0, 0.7, Vec3::ONE),
            sample(5, 0.1, Vec3::ZERO),
        ];
        let mut forward = TopKAccumulator::default();
        samples.iter().for_each(|s| forward.push(*s));
        let mut backward = TopKAccumulator::default();
        samples.iter().rev().for_each(|s| backward.push(*s));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_full_accumulate_weights_sum_to_one() {
        let kernel = BlendKernel::new(BlendParams {
            discipline: BlendDiscipline::FullAccumulate,
            ..params()
        });
        let samples = [
            sample(0, 0.1, Vec3::X),
            sample(1, 0.3, Vec3::Y),
            sample(2, 0.6, Vec3::Z),
        ];
        let contributions = kernel.contributions(&samples);
        assert_eq!(contributions.len(), 3);
        let total: f32 = contributions.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_full_accumulate_drops_samples_past_max_penalty() {
        let params = BlendParams {
            discipline: BlendDiscipline::FullAccumulate,
            max_blend_penalty: 0.5,
            ..params()
        };
        let mut acc = BlendAccumulator::new(params.discipline);
        acc.push(sample(0, 0.8, Vec3::ONE), &params);
        assert!(acc.resolve(&params).is_none());

        acc.push(sample(1, 0.25, Vec3::X), &params);
        let resolved = acc.resolve(&params).unwrap();
        assert_eq!(resolved.color, Vec3::X);
    }

    #[test]
    fn test_winner_takes_all_picks_lowest_penalty() {
        let params = BlendParams {
            winner_takes_all: true,
            ..params()
        };
        let mut acc = BlendAccumulator::new(params.discipline);
        acc.push(sample(0, 0.4, Vec3::X), &params);
        acc.push(sample(1, 0.2, Vec3::Y), &params);
        let resolved = acc.resolve(&params).unwrap();
        assert_eq!(resolved.color, Vec3::Y);
        assert_eq!(resolved.leading, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_winner_takes_all_weighs_continuous_masks() {
        let params = BlendParams {
            winner_takes_all: true,
            masks_are_binary: false,
            ..params()
        };
        // Closest camera, almost masked out
        let faint = Sample {
            mask: 0.05,
            ..sample(0, 0.1, Vec3::X)
        };
        let clear = sample(1, 0.3, Vec3::Y);

        for discipline in [BlendDiscipline::BoundedTopK, BlendDiscipline::FullAccumulate] {
            let params = BlendParams { discipline, ..params };
            let mut acc = BlendAccumulator::new(discipline);
            acc.push(faint, &params);
            acc.push(clear, &params);
            assert_eq!(acc.resolve(&params).unwrap().color, Vec3::Y);

            let kernel = BlendKernel::new(params);
            assert_eq!(kernel.contributions(&[faint, clear]), vec![(1, 1.0)]);
        }
    }

    #[test]
    fn test_winner_may_fall_outside_top_k() {
        let params = BlendParams {
            winner_takes_all: true,
            ..params()
        };
        let mut acc = BlendAccumulator::new(BlendDiscipline::BoundedTopK);
        for id in 0..MAX_BLEND_CAMS as u32 {
            let faint = Sample {
                mask: 0.01,
                ..sample(id, 0.1 + id as f32 * 0.01, Vec3::X)
            };
            acc.push(faint, &params);
        }
        acc.push(sample(9, 0.5, Vec3::Z), &params);
        assert_eq!(acc.resolve(&params).unwrap().color, Vec3::Z);
    }

    #[test]
    fn test_sample_rejects_occluded_and_black() {
        let pose = Camera::new(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO);
        let camera = InputCamera::new(0, &pose, 8, 8);
        let point = Vec3::ZERO;

        let visible = SourceImage::new(
            0,
            TextureData::new(8, 8, Vec3::splat(0.5), "c"),
            TextureData::new(8, 8, 4.0, "d"),
        );
        let occluded = SourceImage::new(
            0,
            TextureData::new(8, 8, Vec3::splat(0.5), "c"),
            TextureData::new(8, 8, 2.0, "d"),
        );
        let black = SourceImage::new(
            0,
            TextureData::new(8, 8, Vec3::ZERO, "c"),
            TextureData::new(8, 8, 4.0, "d"),
        );

        let kernel = BlendKernel::new(params());
        let eye = pose.position;
        assert!(kernel.sample(&camera, &visible, None, point, eye).is_some());
        assert!(kernel.sample(&camera, &occluded, None, point, eye).is_none());
        assert!(kernel.sample(&camera, &black, None, point, eye).is_none());

        let no_occlusion = BlendKernel::new(BlendParams {
            occlusion_enabled: false,
            ..params()
        });
        assert!(no_occlusion.sample(&camera, &occluded, None, point, eye).is_some());
    }

    #[test]
    fn test_sample_masks() {
        let pose = Camera::new(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO);
        let camera = InputCamera::new(0, &pose, 8, 8);
        let image = SourceImage::new(
            0,
            TextureData::new(8, 8, Vec3::ONE, "c"),
            TextureData::new(8, 8, 4.0, "d"),
        );
        let dark = TextureData::new(8, 8, 0.2, "m");
        let eye = pose.position;

        let binary = BlendKernel::new(BlendParams {
            masks_enabled: true,
            ..params()
        });
        assert!(binary.sample(&camera, &image, Some(&dark), Vec3::ZERO, eye).is_none());

        let inverted = BlendKernel::new(BlendParams {
            masks_enabled: true,
            invert_masks: true,
            ..params()
        });
        let s = inverted.sample(&camera, &image, Some(&dark), Vec3::ZERO, eye).unwrap();
        assert_eq!(s.mask, 1.0);

        let continuous = BlendKernel::new(BlendParams {
            masks_enabled: true,
            masks_are_binary: false,
            mask_threshold: 0.1,
            ..params()
        });
        let s = continuous.sample(&camera, &image, Some(&dark), Vec3::ZERO, eye).unwrap();
        assert!((s.mask - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_finish_pixel_unblended_is_background() {
        let background = Vec4::new(0.1, 0.2, 0.3, 1.0);
        let (texel, coverage) = finish_pixel(None, &params(), background);
        assert_eq!(texel, background);
        assert_eq!(coverage, Coverage::Unblended);
    }
}
