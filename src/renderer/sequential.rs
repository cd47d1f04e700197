//! Sequential renderer: one accumulation pass per selected camera

use super::{BlendInputs, BlendStrategy};
use crate::error::UlrResult;
use crate::pipeline::blend::{finish_pixel, BlendAccumulator, BlendKernel};
use crate::pipeline::depth_prepass::is_background;
use crate::pipeline::BlendOutput;
use crate::scene::{Camera, CameraRegistry};
use crate::selection::{CameraSelector, SelectionPolicy, SelectionSet};
use crate::UlrConfig;

/// Blends cameras one at a time.
///
/// Per-pixel accumulators live in a two-slot arena; each camera pass reads
/// the slot selected by the parity bit and writes the other one, so the pass
/// never reads what it is writing.
#[derive(Debug, Clone)]
pub struct SequentialRenderer {
    policy: SelectionPolicy,
}

impl SequentialRenderer {
    pub fn new(config: &UlrConfig) -> Self {
        Self {
            policy: SelectionPolicy::bounded(
                config.bounded_policy,
                config.num_dist_cams,
                config.num_angle_cams,
            ),
        }
    }
}

impl BlendStrategy for SequentialRenderer {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        self.policy.select(registry, eye)
    }

    fn blend(&self, inputs: &BlendInputs) -> UlrResult<BlendOutput> {
        let params = &inputs.params;
        let kernel = BlendKernel::new(*params);
        let positions = inputs.positions;
        let (width, height) = positions.dimensions();
        let pixels = positions.texels.len();

        let mut arena = [
            vec![BlendAccumulator::new(params.discipline); pixels],
            vec![BlendAccumulator::new(params.discipline); pixels],
        ];
        let mut parity = 0usize;

        for id in inputs.selection.sorted() {
            let Some((camera, image, mask)) = inputs.source(id) else {
                continue;
            };
            let [even, odd] = &mut arena;
            let (src, dst) = if parity == 0 { (&*even, odd) } else { (&*odd, even) };

            for (i, texel) in positions.texels.iter().enumerate() {
                dst[i] = src[i];
                if is_background(*texel) {
                    continue;
                }
                if let Some(sample) =
                    kernel.sample(camera, image, mask, texel.truncate(), inputs.eye_position)
                {
                    dst[i].push(sample, params);
                }
            }
            parity ^= 1;
        }

        // Resolve pass over the last written slot
        let mut output = BlendOutput::background(width, height, inputs.background);
        for (i, texel) in positions.texels.iter().enumerate() {
            if is_background(*texel) {
                continue;
            }
            let resolved = arena[parity][i].resolve(params);
            let (color, coverage) = finish_pixel(resolved, params, inputs.background);
            output.color.texels[i] = color;
            output.coverage.texels[i] = coverage;
        }
        Ok(output)
    }

    fn capacity(&self) -> Option<usize> {
        self.policy.budget()
    }
}
