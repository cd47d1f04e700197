//! Seam filling of unblended pixels.

mod common;

use common::{dataset, Variant};
use glam::{Vec3, Vec4};
use rstest::rstest;
use ulr_engine::pipeline::postprocess::{poisson_fill as fill, PoissonConfig};
use ulr_engine::resources::TextureData;
use ulr_engine::scene::OrbitRig;
use ulr_engine::{BlendOutput, Coverage, ProxyMesh, UlrConfig};

const FILL: Vec3 = Vec3::new(0.3, 0.6, 0.9);

/// A flat composite with the given pixels left unblended
fn composite(width: u32, height: u32, holes: &[(u32, u32)]) -> BlendOutput {
    let mut output = BlendOutput {
        color: TextureData::new(width, height, FILL.extend(1.0), "composite"),
        coverage: TextureData::new(width, height, Coverage::Blended, "coverage"),
    };
    for &(x, y) in holes {
        output.color.set(x, y, Vec4::new(0.0, 0.0, 0.0, 1.0));
        output.coverage.set(x, y, Coverage::Unblended);
    }
    output
}

/// Holes in a constant image are filled with that constant.
#[rstest]
#[case::single_pixel(16, 16, vec![(7, 7)])]
#[case::block(16, 16, vec![(4, 4), (5, 4), (4, 5), (5, 5)])]
#[case::odd_size(13, 9, vec![(0, 0), (12, 8), (6, 4)])]
fn test_constant_image_fills_with_constant(
    #[case] width: u32,
    #[case] height: u32,
    #[case] holes: Vec<(u32, u32)>,
) {
    let input = composite(width, height, &holes);
    let output = fill(&input, &PoissonConfig::default());
    for &(x, y) in &holes {
        let filled = output.color.get(x, y);
        assert!(
            (filled.truncate() - FILL).abs().max_element() < 1e-4,
            "({}, {}) filled with {}",
            x,
            y,
            filled
        );
        assert_eq!(filled.w, 1.0);
    }
    assert_eq!(output.coverage, input.coverage);
}

/// Blended and empty pixels pass through the solver unchanged.
#[test]
fn test_fill_only_touches_unblended() {
    let mut input = composite(20, 12, &[(3, 3), (10, 6), (11, 6)]);
    for x in 0..20 {
        input.coverage.set(x, 0, Coverage::NoGeometry);
        input.color.set(x, 0, Vec4::new(0.1, 0.1, 0.1, 0.0));
    }
    for y in 1..12 {
        input.color.set(19, y, Vec4::new(y as f32 / 12.0, 0.2, 0.4, 1.0));
    }

    let output = fill(&input, &PoissonConfig::default());
    for (i, coverage) in input.coverage.texels.iter().enumerate() {
        if *coverage != Coverage::Unblended {
            assert_eq!(output.color.texels[i], input.color.texels[i], "pixel {}", i);
        }
    }
}

/// A composite without holes comes back identical.
#[test]
fn test_nothing_to_fill() {
    let input = composite(8, 8, &[]);
    assert_eq!(fill(&input, &PoissonConfig::default()), input);
}

/// Through a view, filling changes only the pixels no camera could blend.
#[rstest]
#[case::sequential(Variant::Sequential)]
#[case::streaming(Variant::Streaming)]
fn test_view_fills_unblended_pixels(#[case] variant: Variant) {
    // A wall larger than what the source cameras see
    let wall = ProxyMesh::quad(Vec3::ZERO, Vec3::X * 3.0, Vec3::Y * 3.0);
    let data = dataset(wall, 4, 0.3);
    let eye = OrbitRig::new(data.rig.target, 7.0).camera(0.05, 48, 48);

    let render = |poisson: bool| {
        let config = UlrConfig {
            variant: variant.into(),
            poisson_blend_enabled: poisson,
            ..Default::default()
        };
        data.view(config, 48, 48).render(&eye).expect("Render failed")
    };
    let plain = render(false);
    let filled = render(true);
    assert_eq!(plain.coverage, filled.coverage);

    let background = Vec4::new(0.0, 0.0, 0.0, 1.0);
    let mut holes = 0;
    let mut changed = 0;
    for (i, coverage) in plain.coverage.texels.iter().enumerate() {
        match coverage {
            Coverage::Unblended => {
                holes += 1;
                assert_eq!(plain.image.texels[i], background);
                assert!(filled.image.texels[i].is_finite());
                if filled.image.texels[i] != background {
                    changed += 1;
                }
            }
            _ => assert_eq!(plain.image.texels[i], filled.image.texels[i], "pixel {}", i),
        }
    }
    assert!(holes > 0);
    assert!(changed > 0);
}
