//! Post-processing of the blend composite

mod poisson;
mod resolve;

pub use poisson::{fill as poisson_fill, level_sizes, PoissonConfig, PoissonPass, Stencil, POISSON_SCALE};
pub use resolve::{gamma_encode, resolve, ResolvePass, ResolveSettings, GAMMA};

/// Common fullscreen triangle shader
pub const FULLSCREEN_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;

    // Generate fullscreen triangle
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);

    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);

    return output;
}
"#;
