//! End-to-end blending scenarios on the CPU renderers.
//!
//! Each test builds a synthetic dataset, renders a novel view through
//! [`UlrView`] and checks a property of the composite or of the per-pixel
//! blend weights. Tests run against every renderer variant with `rstest`.

mod common;

use approx::assert_relative_eq;
use common::{dataset, eye, solid_dataset, wall, wall_with_occluder, Variant, SOURCE_SIZE};
use glam::{Vec3, Vec4};
use rstest::rstest;
use std::collections::BTreeSet;
use ulr_engine::pipeline::blend::{BlendKernel, BlendParams};
use ulr_engine::pipeline::depth_prepass::{is_background, Rasterizer};
use ulr_engine::resources::TextureData;
use ulr_engine::scene::OrbitRig;
use ulr_engine::{
    BlendDiscipline, Coverage, DepthConvention, DeviceLimits, MaskSet, RenderMode, UlrConfig,
    UlrError, UlrView,
};

fn config(variant: Variant) -> UlrConfig {
    UlrConfig {
        variant: variant.into(),
        ..Default::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// One camera identical to the novel viewpoint reproduces its photograph.
#[rstest]
#[case::sequential(Variant::Sequential)]
#[case::sampler_array(Variant::SamplerArray)]
#[case::streaming(Variant::Streaming)]
fn test_identical_camera_reproduces_source(#[case] variant: Variant) {
    let data = dataset(wall(), 1, 0.0);
    let mut view = data.view(config(variant), SOURCE_SIZE, SOURCE_SIZE);
    let eye = eye(&data.rig, 0.0, SOURCE_SIZE, SOURCE_SIZE);

    let output = view.render(&eye).expect("Render failed");
    assert_eq!(output.selection.ids(), &[0]);

    let source = &data.bank.get(0).expect("Missing source image").color;
    let mut blended = 0;
    for (i, &expected) in source.texels.iter().enumerate() {
        let actual = output.image.texels[i];
        if expected == Vec3::ZERO {
            assert_eq!(output.coverage.texels[i], Coverage::NoGeometry);
            assert_eq!(actual, Vec4::new(0.0, 0.0, 0.0, 1.0));
        } else {
            assert_eq!(output.coverage.texels[i], Coverage::Blended, "pixel {}", i);
            assert!(
                (actual.truncate() - expected).abs().max_element() < 2e-3,
                "pixel {}: {} vs {}",
                i,
                actual,
                expected
            );
            blended += 1;
        }
    }
    assert!(blended > 0);
}

/// Two cameras mirrored about the viewpoint blend with equal weights.
#[rstest]
#[case::sequential(Variant::Sequential)]
#[case::sampler_array(Variant::SamplerArray)]
#[case::streaming(Variant::Streaming)]
fn test_symmetric_cameras_blend_equally(#[case] variant: Variant) {
    let red = Vec3::new(1.0, 0.0, 0.0);
    let blue = Vec3::new(0.0, 0.0, 1.0);
    let data = solid_dataset(wall(), &[red, blue], 0.3);
    // Odd size puts the centre pixel exactly on the optical axis
    let mut view = data.view(config(variant), 63, 63);
    let eye = eye(&data.rig, 0.0, 63, 63);

    let weights = view.pixel_contributions(&eye, 31, 31).expect("Lookup failed");
    assert_eq!(weights.len(), 2);
    for (_, w) in &weights {
        assert_relative_eq!(*w, 0.5, epsilon = 1e-3);
    }

    let output = view.render(&eye).expect("Render failed");
    let centre = output.image.get(31, 31);
    assert_relative_eq!(centre.x, 0.5, epsilon = 1e-2);
    assert_relative_eq!(centre.y, 0.0, epsilon = 1e-6);
    assert_relative_eq!(centre.z, 0.5, epsilon = 1e-2);
}

/// A camera behind an all-zero binary mask contributes to no pixel.
#[rstest]
#[case::sequential(Variant::Sequential)]
#[case::sampler_array(Variant::SamplerArray)]
#[case::streaming(Variant::Streaming)]
fn test_all_zero_mask_silences_camera(#[case] variant: Variant) {
    let data = dataset(wall(), 3, 0.4);
    let mut masks = MaskSet::new(&data.registry);
    masks
        .set(
            &data.registry,
            1,
            TextureData::new(SOURCE_SIZE, SOURCE_SIZE, 0.0, "mask_1"),
        )
        .expect("Mask rejected");
    let config = UlrConfig {
        masks_enabled: true,
        ..config(variant)
    };
    let mut view = UlrView::new(
        config,
        data.registry.clone(),
        data.mesh.clone(),
        data.bank.clone(),
        Some(masks),
        DeviceLimits::default(),
        32,
        32,
    )
    .expect("Failed to create view");
    let eye = eye(&data.rig, 0.05, 32, 32);

    for y in (0..32).step_by(3) {
        for x in (0..32).step_by(3) {
            let weights = view.pixel_contributions(&eye, x, y).expect("Lookup failed");
            assert!(weights.iter().all(|(id, _)| *id != 1), "camera 1 used at ({}, {})", x, y);
        }
    }

    view.set_render_mode(RenderMode::OneCamera(1)).expect("Invalid mode");
    let output = view.render(&eye).expect("Render failed");
    assert_eq!(output.coverage.texels.iter().filter(|c| **c == Coverage::Blended).count(), 0);
    assert!(output.coverage.texels.iter().any(|c| *c == Coverage::Unblended));
}

/// Pixels without proxy geometry output the background colour exactly.
#[rstest]
#[case::sequential(Variant::Sequential, false)]
#[case::streaming(Variant::Streaming, false)]
#[case::streaming_poisson(Variant::Streaming, true)]
fn test_no_geometry_pixels_keep_background(#[case] variant: Variant, #[case] poisson: bool) {
    let data = dataset(wall(), 4, 0.5);
    let background = [0.2, 0.3, 0.4, 1.0];
    let config = UlrConfig {
        background,
        gamma_correction: true,
        poisson_blend_enabled: poisson,
        ..config(variant)
    };
    let mut view = data.view(config, 40, 30);
    // Far enough away that the wall leaves an empty border
    let eye = OrbitRig::new(data.rig.target, 7.0).camera(0.1, 40, 30);

    let output = view.render(&eye).expect("Render failed");
    let mut empty = 0;
    for (i, coverage) in output.coverage.texels.iter().enumerate() {
        if *coverage == Coverage::NoGeometry {
            assert_eq!(output.image.texels[i], Vec4::from_array(background));
            empty += 1;
        }
    }
    assert!(empty > 0);
    assert!(empty < output.coverage.texels.len());
}

// ============================================================================
// Weights
// ============================================================================

/// Blend weights are normalized, and top-K drops the fourth-best sample.
#[rstest]
#[case::top_k(BlendDiscipline::BoundedTopK)]
#[case::full(BlendDiscipline::FullAccumulate)]
fn test_weights_are_normalized(#[case] discipline: BlendDiscipline) {
    let data = dataset(wall(), 6, 0.6);
    let config = UlrConfig {
        discipline,
        ..Default::default()
    };
    let view = data.view(config, 32, 32);
    let eye = eye(&data.rig, 0.15, 32, 32);

    let mut checked = 0;
    for y in (0..32).step_by(4) {
        for x in (0..32).step_by(4) {
            let weights = view.pixel_contributions(&eye, x, y).expect("Lookup failed");
            if weights.is_empty() {
                continue;
            }
            let total: f32 = weights.iter().map(|(_, w)| w).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-5);
            assert!(weights.iter().all(|(_, w)| *w >= 0.0));
            if discipline == BlendDiscipline::BoundedTopK {
                assert!(weights.iter().filter(|(_, w)| *w > 0.0).count() <= 3);
            }
            checked += 1;
        }
    }
    assert!(checked > 0);
}

/// Winner-takes-all gives the lowest-penalty camera the whole pixel.
#[test]
fn test_winner_takes_all_uses_closest_camera() {
    let data = dataset(wall(), 5, 0.6);
    let config = UlrConfig {
        winner_takes_all: true,
        ..Default::default()
    };
    let view = data.view(config, 33, 33);
    // Right on top of camera 3
    let azimuth = data.azimuth(3, 5, 0.6);
    let eye = eye(&data.rig, azimuth, 33, 33);

    let weights = view.pixel_contributions(&eye, 16, 16).expect("Lookup failed");
    assert_eq!(weights, vec![(3, 1.0)]);
}

// ============================================================================
// Occlusion
// ============================================================================

/// Cameras whose samples pass the per-pixel tests, for every pixel
fn accepted(data: &common::Dataset, params: BlendParams, size: u32) -> Vec<BTreeSet<u32>> {
    let eye = eye(&data.rig, 0.1, size, size);
    let raster = Rasterizer::new(size, size).rasterize(
        &data.mesh,
        eye.projection.with_near(0.001).matrix() * eye.view_matrix(),
    );
    let kernel = BlendKernel::new(params);
    raster
        .positions
        .texels
        .iter()
        .map(|texel| {
            if is_background(*texel) {
                return BTreeSet::new();
            }
            data.registry
                .cameras()
                .iter()
                .filter(|camera| {
                    let image = data.bank.get(camera.id()).expect("Missing source image");
                    kernel
                        .sample(camera, image, None, texel.truncate(), eye.position)
                        .is_some()
                })
                .map(|camera| camera.id())
                .collect()
        })
        .collect()
}

fn occlusion_params(enabled: bool, epsilon: f32) -> BlendParams {
    let config = UlrConfig {
        occlusion_enabled: enabled,
        epsilon_occlusion: epsilon,
        ..Default::default()
    };
    BlendParams::from_config(&config, DepthConvention::WorldDistance)
}

/// Raising the occlusion tolerance only ever adds accepted samples.
#[rstest]
#[case::zero_to_tiny(0.0, 0.001)]
#[case::tiny_to_default(0.001, 0.01)]
#[case::default_to_loose(0.01, 0.1)]
#[case::loose_to_huge(0.1, 1.0)]
fn test_occlusion_tolerance_is_monotonic(#[case] tight: f32, #[case] loose: f32) {
    let data = dataset(wall_with_occluder(), 5, 0.6);
    let strict = accepted(&data, occlusion_params(true, tight), 40);
    let relaxed = accepted(&data, occlusion_params(true, loose), 40);
    for (i, (a, b)) in strict.iter().zip(&relaxed).enumerate() {
        assert!(a.is_subset(b), "pixel {}: {:?} not within {:?}", i, a, b);
    }
}

/// The occluder hides the wall from some cameras.
#[test]
fn test_occlusion_rejects_hidden_samples() {
    let data = dataset(wall_with_occluder(), 5, 0.6);
    let with = accepted(&data, occlusion_params(true, 0.01), 40);
    let without = accepted(&data, occlusion_params(false, 0.01), 40);

    fn count(sets: &[BTreeSet<u32>]) -> usize {
        sets.iter().map(|s| s.len()).sum()
    }
    for (a, b) in with.iter().zip(&without) {
        assert!(a.is_subset(b));
    }
    assert!(count(&with) < count(&without));
}

// ============================================================================
// Variants
// ============================================================================

/// With a budget covering every camera, all variants produce the same image.
#[rstest]
#[case::top_k(BlendDiscipline::BoundedTopK)]
#[case::full(BlendDiscipline::FullAccumulate)]
fn test_variants_agree(#[case] discipline: BlendDiscipline) {
    let data = dataset(wall_with_occluder(), 6, 0.6);
    let eye = eye(&data.rig, -0.2, 36, 28);

    let render = |variant: Variant| {
        let config = UlrConfig {
            discipline,
            ..config(variant)
        };
        data.view(config, 36, 28).render(&eye).expect("Render failed")
    };
    let reference = render(Variant::Streaming);
    for variant in [Variant::Sequential, Variant::SamplerArray] {
        let output = render(variant);
        assert_eq!(output.selection.sorted(), reference.selection.sorted());
        assert_eq!(output.coverage, reference.coverage, "{:?}", variant);
        let diff = common::max_difference(&output.image, &reference.image, |_| true);
        assert!(diff < 1e-5, "{:?} differs by {}", variant, diff);
    }
}

/// Renderers refuse selections larger than their device capacity.
#[rstest]
#[case::sampler_array(Variant::SamplerArray, DeviceLimits { max_sampled_textures_per_shader_stage: 4, ..Default::default() })]
#[case::streaming(Variant::Streaming, DeviceLimits { max_texture_array_layers: 2, ..Default::default() })]
fn test_capacity_exceeded(#[case] variant: Variant, #[case] limits: DeviceLimits) {
    let data = dataset(wall(), 3, 0.3);
    let result = UlrView::new(
        config(variant),
        data.registry.clone(),
        data.mesh.clone(),
        data.bank.clone(),
        None,
        limits,
        16,
        16,
    );
    assert!(matches!(result, Err(UlrError::CapacityExceeded { .. })));
}

/// With every camera disabled the frame is pure background.
#[test]
fn test_no_active_camera_renders_background() {
    let data = dataset(wall(), 3, 0.3);
    let mut view = data.view(UlrConfig::default(), 24, 24);
    for id in 0..3 {
        view.set_camera_active(id, false).expect("Unknown camera");
    }
    let output = view
        .render(&eye(&data.rig, 0.0, 24, 24))
        .expect("Render failed");
    assert!(output.selection.is_empty());
    assert!(output.coverage.texels.iter().all(|c| *c == Coverage::NoGeometry));
    assert!(output
        .image
        .texels
        .iter()
        .all(|c| *c == Vec4::new(0.0, 0.0, 0.0, 1.0)));
}

/// One frame graph serves every output resolution.
#[rstest]
#[case::sequential(Variant::Sequential)]
#[case::poisson(Variant::Streaming)]
fn test_resize_renders_at_new_resolution(#[case] variant: Variant) {
    let data = dataset(wall(), 3, 0.3);
    let config = UlrConfig {
        variant: variant.into(),
        poisson_blend_enabled: variant == Variant::Streaming,
        ..Default::default()
    };
    let mut view = data.view(config, 24, 24);
    view.render(&eye(&data.rig, 0.0, 24, 24)).expect("Render failed");

    view.resize(31, 17).expect("Resize failed");
    assert_eq!(view.dimensions(), (31, 17));
    assert!(view.resize(31, 0).is_err());

    let output = view
        .render(&eye(&data.rig, 0.0, 31, 17))
        .expect("Render failed");
    assert_eq!(output.image.dimensions(), (31, 17));
    assert_eq!(output.coverage.dimensions(), (31, 17));
    assert!(output.coverage.texels.iter().any(|c| *c == Coverage::Blended));
}
