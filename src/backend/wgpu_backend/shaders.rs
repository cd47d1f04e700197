//! WGSL sources of the GPU pipeline

use crate::backend::traits::{BackendError, BackendResult};
use crate::pipeline::postprocess::FULLSCREEN_VERTEX_SHADER;

/// Position pre-pass: world position in xyz, NDC depth in w
pub const PREPASS_SHADER: &str = r#"
struct PrepassUniforms {
    view_proj: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> prepass: PrepassUniforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = prepass.view_proj * vec4<f32>(position, 1.0);
    out.world_position = position;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.world_position, in.clip_position.z);
}
"#;

const BLEND_FRAGMENT: &str = r#"
const MAX_CAMERAS: u32 = {{MAX_CAMERAS}}u;
const BETA: f32 = 0.1;
const INFTY_W: f32 = 100000.0;
const MIN_PENALTY: f32 = 0.0001;
const BLACK_EPS: f32 = 0.0001;
const MIN_W: f32 = 1.1920929e-7;

const FLAG_OCCLUSION: u32 = 1u;
const FLAG_MASKS: u32 = 2u;
const FLAG_BINARY_MASK: u32 = 4u;
const FLAG_INVERT_MASK: u32 = 8u;
const FLAG_DISCARD_BLACK: u32 = 16u;
const FLAG_WTA: u32 = 32u;
const FLAG_FLIP_RGB: u32 = 64u;
const FLAG_SHOW_WEIGHTS: u32 = 128u;

const DISCIPLINE_TOP_K: u32 = 0u;
const DEPTH_WORLD_DISTANCE: u32 = 0u;

struct BlendUniforms {
    eye_pos: vec4<f32>,
    background: vec4<f32>,
    // x: epsilon_occlusion, y: mask_threshold, z: max_blend_penalty
    params: vec4<f32>,
    // x: camera count, y: flags, z: discipline, w: depth convention
    counts: vec4<u32>,
}

struct CameraInfo {
    view_proj: mat4x4<f32>,
    position: vec3<f32>,
    selected: i32,
    direction: vec3<f32>,
    pad: f32,
}

struct CameraSample {
    color: vec3<f32>,
    penalty: f32,
    mask: f32,
    camera: u32,
}

@group(0) @binding(0) var<uniform> ulr: BlendUniforms;
@group(0) @binding(1) var<uniform> cameras: array<CameraInfo, {{MAX_CAMERAS}}>;
@group(0) @binding(2) var positions: texture_2d<f32>;
@group(0) @binding(3) var colors: texture_2d_array<f32>;
@group(0) @binding(4) var depths: texture_2d_array<f32>;
@group(0) @binding(5) var masks: texture_2d_array<f32>;
@group(0) @binding(6) var linear_sampler: sampler;

fn has_flag(flag: u32) -> bool {
    return (ulr.counts.y & flag) != 0u;
}

fn angle_between(a: vec3<f32>, b: vec3<f32>) -> f32 {
    let la = length(a);
    let lb = length(b);
    var d = 0.0;
    if (la > 0.0 && lb > 0.0) {
        d = dot(a / la, b / lb);
    }
    return acos(clamp(d, -1.0, 1.0));
}

fn penalty(p: vec3<f32>, camera_pos: vec3<f32>, eye_pos: vec3<f32>) -> f32 {
    let to_camera = p - camera_pos;
    let to_eye = p - eye_pos;
    let angle = max(angle_between(to_camera, to_eye), MIN_PENALTY);
    let camera_dist = length(to_camera);
    var resolution = 0.0;
    if (camera_dist > 0.0) {
        resolution = max((camera_dist - length(to_eye)) / camera_dist, 0.0);
    }
    return angle + BETA * resolution;
}

fn tapered_weight(p: f32, threshold: f32) -> f32 {
    return max(1.0 - p / threshold, 0.0) / p;
}

fn better_than(a_penalty: f32, a_camera: u32, b_penalty: f32, b_camera: u32) -> bool {
    return a_penalty < b_penalty || (a_penalty == b_penalty && a_camera < b_camera);
}

// Winner-takes-all order: mask-scaled inverse penalty, then penalty and id
fn outranks(a: CameraSample, b: CameraSample) -> bool {
    let a_strength = a.mask / a.penalty;
    let b_strength = b.mask / b.penalty;
    if (a_strength != b_strength) {
        return a_strength > b_strength;
    }
    return better_than(a.penalty, a.camera, b.penalty, b.camera);
}

// Keeps the three largest weights in descending order
fn push_leading(leading: ptr<function, vec3<f32>>, w: f32) {
    var l = *leading;
    if (w > l.x) {
        l = vec3<f32>(w, l.x, l.y);
    } else if (w > l.y) {
        l = vec3<f32>(l.x, w, l.y);
    } else if (w > l.z) {
        l.z = w;
    }
    *leading = l;
}

fn sample_camera(index: u32, p: vec3<f32>, result: ptr<function, CameraSample>) -> bool {
    let camera = cameras[index];
    let clip = camera.view_proj * vec4<f32>(p, 1.0);
    if (clip.w <= MIN_W) {
        return false;
    }
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0) {
        return false;
    }
    let layer = i32(index);

    if (has_flag(FLAG_OCCLUSION)) {
        let dims = vec2<i32>(textureDimensions(depths));
        let texel = clamp(vec2<i32>(floor(uv * vec2<f32>(dims))), vec2<i32>(0), dims - vec2<i32>(1));
        let stored = textureLoad(depths, texel, layer, 0).r;
        var measured = ndc.z;
        var scale = 1.0;
        if (ulr.counts.w == DEPTH_WORLD_DISTANCE) {
            measured = length(p - camera.position);
            scale = measured;
        }
        if (stored < measured - ulr.params.x * scale) {
            return false;
        }
    }

    var mask_value = 1.0;
    if (has_flag(FLAG_MASKS)) {
        var m = textureSampleLevel(masks, linear_sampler, uv, layer, 0.0).r;
        if (has_flag(FLAG_INVERT_MASK)) {
            m = 1.0 - m;
        }
        if (has_flag(FLAG_BINARY_MASK)) {
            if (m < 0.5) {
                return false;
            }
        } else {
            if (m < ulr.params.y) {
                return false;
            }
            mask_value = m;
        }
    }

    var color_uv = uv;
    if (has_flag(FLAG_FLIP_RGB)) {
        color_uv.y = 1.0 - uv.y;
    }
    let color = textureSampleLevel(colors, linear_sampler, color_uv, layer, 0.0).rgb;
    if (has_flag(FLAG_DISCARD_BLACK) && max(color.r, max(color.g, color.b)) <= BLACK_EPS) {
        return false;
    }

    (*result).color = color;
    (*result).penalty = penalty(p, camera.position, ulr.eye_pos.xyz);
    (*result).mask = mask_value;
    (*result).camera = index;
    return true;
}

fn unblended() -> vec4<f32> {
    return vec4<f32>(ulr.background.rgb, 0.5);
}

fn blended(color: vec3<f32>, leading: vec3<f32>) -> vec4<f32> {
    if (has_flag(FLAG_SHOW_WEIGHTS)) {
        return vec4<f32>(leading, 1.0);
    }
    return vec4<f32>(color, 1.0);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let world = textureLoad(positions, vec2<i32>(floor(input.position.xy)), 0);
    if (world.w >= 1.0) {
        return vec4<f32>(ulr.background.rgb, 0.0);
    }
    let p = world.xyz;

    var top_penalty = array<f32, 4>(INFTY_W, INFTY_W, INFTY_W, INFTY_W);
    var top_camera = array<u32, 4>(0u, 0u, 0u, 0u);
    var top_color: array<vec3<f32>, 4>;
    var top_mask: array<f32, 4>;
    var top_count = 0u;

    var sum_color = vec3<f32>(0.0);
    var sum_weight = 0.0;
    var full_weights = vec3<f32>(0.0);

    var best: CameraSample;
    var has_best = false;

    let count = min(ulr.counts.x, MAX_CAMERAS);
    for (var i = 0u; i < count; i = i + 1u) {
        if (cameras[i].selected == 0) {
            continue;
        }
        var s: CameraSample;
        if (!sample_camera(i, p, &s)) {
            continue;
        }
        if (!has_best || outranks(s, best)) {
            best = s;
            has_best = true;
        }

        if (ulr.counts.z == DISCIPLINE_TOP_K) {
            var slot = 4u;
            for (var k = 0u; k < 4u; k = k + 1u) {
                if (k >= top_count || better_than(s.penalty, s.camera, top_penalty[k], top_camera[k])) {
                    slot = k;
                    break;
                }
            }
            if (slot < 4u) {
                for (var k = 3u; k > slot; k = k - 1u) {
                    top_penalty[k] = top_penalty[k - 1u];
                    top_camera[k] = top_camera[k - 1u];
                    top_color[k] = top_color[k - 1u];
                    top_mask[k] = top_mask[k - 1u];
                }
                top_penalty[slot] = s.penalty;
                top_camera[slot] = s.camera;
                top_color[slot] = s.color;
                top_mask[slot] = s.mask;
                top_count = min(top_count + 1u, 4u);
            }
        } else {
            let w = s.mask * tapered_weight(s.penalty, ulr.params.z);
            if (w > 0.0) {
                sum_color = sum_color + s.color * w;
                sum_weight = sum_weight + w;
                push_leading(&full_weights, w);
            }
        }
    }

    if (!has_best) {
        return unblended();
    }
    if (has_flag(FLAG_WTA)) {
        return blended(best.color, vec3<f32>(1.0, 0.0, 0.0));
    }

    if (ulr.counts.z != DISCIPLINE_TOP_K) {
        if (sum_weight <= 0.0) {
            return unblended();
        }
        return blended(sum_color / sum_weight, full_weights / sum_weight);
    }

    var threshold = INFTY_W;
    if (top_count == 4u) {
        threshold = top_penalty[3];
    }
    var weights = array<f32, 4>(0.0, 0.0, 0.0, 0.0);
    var total = 0.0;
    for (var k = 0u; k < top_count; k = k + 1u) {
        weights[k] = top_mask[k] * tapered_weight(top_penalty[k], threshold);
        total = total + weights[k];
    }
    // Every kept sample tied with the threshold: equal blend of the best
    if (total <= 0.0) {
        for (var k = 0u; k < top_count; k = k + 1u) {
            if (top_penalty[k] == top_penalty[0] && top_mask[k] > 0.0) {
                weights[k] = top_mask[k];
                total = total + weights[k];
            }
        }
    }
    if (total <= 0.0) {
        return unblended();
    }

    var color = vec3<f32>(0.0);
    var leading = vec3<f32>(0.0);
    for (var k = 0u; k < top_count; k = k + 1u) {
        let w = weights[k] / total;
        if (w > 0.0) {
            color = color + top_color[k] * w;
            push_leading(&leading, w);
        }
    }
    return blended(color, leading);
}
"#;

const RESOLVE_FRAGMENT: &str = r#"
struct ResolveUniforms {
    background: vec4<f32>,
    // x: gamma correction, y: show weights, z: filled
    flags: vec4<u32>,
}

@group(0) @binding(0) var<uniform> settings: ResolveUniforms;
@group(0) @binding(1) var composite: texture_2d<f32>;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureLoad(composite, vec2<i32>(floor(input.position.xy)), 0);
    if (texel.a < 0.25) {
        return settings.background;
    }
    if (texel.a < 0.75 && settings.flags.z == 0u) {
        return settings.background;
    }
    var color = texel.rgb;
    if (settings.flags.x != 0u && settings.flags.y == 0u) {
        color = pow(max(color, vec3<f32>(0.0)), vec3<f32>(1.0 / 2.2));
    }
    return vec4<f32>(color, 1.0);
}
"#;

/// Multigrid Poisson kernels, one entry point per step
pub const POISSON_SHADER: &str = r#"
struct PoissonUniforms {
    // x: xh, y: centre, z: edge, w: corner
    stencil: vec4<f32>,
    // xy: output size, zw: input size
    sizes: vec4<u32>,
}

@group(0) @binding(0) var<uniform> poisson: PoissonUniforms;
@group(0) @binding(1) var tex_a: texture_2d<f32>;
@group(0) @binding(2) var tex_b: texture_2d<f32>;
@group(0) @binding(3) var tex_c: texture_2d<f32>;
@group(0) @binding(4) var out_a: texture_storage_2d<rgba32float, write>;
@group(0) @binding(5) var out_b: texture_storage_2d<rgba32float, write>;

fn load_clamped(t: texture_2d<f32>, p: vec2<i32>) -> vec4<f32> {
    let dims = vec2<i32>(textureDimensions(t));
    return textureLoad(t, clamp(p, vec2<i32>(0), dims - vec2<i32>(1)), 0);
}

fn out_of_bounds(id: vec3<u32>) -> bool {
    return id.x >= poisson.sizes.x || id.y >= poisson.sizes.y;
}

fn is_blended(alpha: f32) -> bool {
    return alpha > 0.75;
}

fn is_unblended(alpha: f32) -> bool {
    return alpha > 0.25 && alpha <= 0.75;
}

// tex_a: composite -> out_a: guidance, out_b: constraint and weight
@compute @workgroup_size(8, 8, 1)
fn init_level(@builtin(global_invocation_id) id: vec3<u32>) {
    if (out_of_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let centre = load_clamped(tex_a, p);
    var b = vec3<f32>(0.0);
    var v = vec3<f32>(0.0);
    var w = 0.0;
    if (is_blended(centre.a)) {
        var offsets = array<vec2<i32>, 4>(
            vec2<i32>(1, 0),
            vec2<i32>(-1, 0),
            vec2<i32>(0, 1),
            vec2<i32>(0, -1),
        );
        let dims = vec2<i32>(poisson.sizes.xy);
        for (var k = 0u; k < 4u; k = k + 1u) {
            let q = p + offsets[k];
            if (q.x < 0 || q.y < 0 || q.x >= dims.x || q.y >= dims.y) {
                continue;
            }
            let n = textureLoad(tex_a, q, 0);
            if (is_blended(n.a)) {
                b = b + (n.rgb - centre.rgb);
            }
        }
        v = centre.rgb;
        w = 1.0;
    }
    textureStore(out_a, p, vec4<f32>(b, 0.0));
    textureStore(out_b, p, vec4<f32>(v, w));
}

// tex_a: fine guidance, tex_b: fine constraint -> coarse level
@compute @workgroup_size(8, 8, 1)
fn restrict_level(@builtin(global_invocation_id) id: vec3<u32>) {
    if (out_of_bounds(id)) {
        return;
    }
    let base = vec2<i32>(id.xy) * 2;
    let fine = vec2<i32>(poisson.sizes.zw);
    var b = vec3<f32>(0.0);
    var v = vec3<f32>(0.0);
    var w = 0.0;
    var children = 0.0;
    for (var dy = 0; dy < 2; dy = dy + 1) {
        for (var dx = 0; dx < 2; dx = dx + 1) {
            let c = base + vec2<i32>(dx, dy);
            if (c.x >= fine.x || c.y >= fine.y) {
                continue;
            }
            let cb = textureLoad(tex_a, c, 0);
            let cv = textureLoad(tex_b, c, 0);
            b = b + cb.rgb;
            v = v + cv.rgb * cv.a;
            w = w + cv.a;
            children = children + 1.0;
        }
    }
    if (w > 0.0) {
        v = v / w;
    }
    if (children > 0.0) {
        w = w / children;
    }
    textureStore(out_a, vec2<i32>(id.xy), vec4<f32>(b, 0.0));
    textureStore(out_b, vec2<i32>(id.xy), vec4<f32>(v, w));
}

// tex_a: constraint -> out_a: initial solution
@compute @workgroup_size(8, 8, 1)
fn seed_level(@builtin(global_invocation_id) id: vec3<u32>) {
    if (out_of_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    textureStore(out_a, p, vec4<f32>(textureLoad(tex_a, p, 0).rgb, 0.0));
}

// tex_a: solution, tex_b: guidance, tex_c: constraint -> out_a: relaxed solution
@compute @workgroup_size(8, 8, 1)
fn relax_level(@builtin(global_invocation_id) id: vec3<u32>) {
    if (out_of_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let edges = load_clamped(tex_a, p + vec2<i32>(1, 0)).rgb
        + load_clamped(tex_a, p + vec2<i32>(-1, 0)).rgb
        + load_clamped(tex_a, p + vec2<i32>(0, 1)).rgb
        + load_clamped(tex_a, p + vec2<i32>(0, -1)).rgb;
    let corners = load_clamped(tex_a, p + vec2<i32>(1, 1)).rgb
        + load_clamped(tex_a, p + vec2<i32>(-1, 1)).rgb
        + load_clamped(tex_a, p + vec2<i32>(1, -1)).rgb
        + load_clamped(tex_a, p + vec2<i32>(-1, -1)).rgb;
    let current = textureLoad(tex_a, p, 0).rgb;
    let xh = poisson.stencil.x;
    let solved = (textureLoad(tex_b, p, 0).rgb
        - edges * poisson.stencil.z
        - corners * poisson.stencil.w
        - current * xh) / (poisson.stencil.y - xh);
    let vw = textureLoad(tex_c, p, 0);
    textureStore(out_a, p, vec4<f32>(vw.rgb * vw.a + solved * (1.0 - vw.a), 0.0));
}

// tex_a: coarse solution -> out_a: bilinear fine solution
@compute @workgroup_size(8, 8, 1)
fn upsample_level(@builtin(global_invocation_id) id: vec3<u32>) {
    if (out_of_bounds(id)) {
        return;
    }
    let uv = (vec2<f32>(id.xy) + vec2<f32>(0.5)) / vec2<f32>(poisson.sizes.xy);
    let f = uv * vec2<f32>(poisson.sizes.zw) - vec2<f32>(0.5);
    let f0 = floor(f);
    let t = f - f0;
    let i0 = vec2<i32>(f0);
    let top = mix(load_clamped(tex_a, i0), load_clamped(tex_a, i0 + vec2<i32>(1, 0)), t.x);
    let bottom = mix(
        load_clamped(tex_a, i0 + vec2<i32>(0, 1)),
        load_clamped(tex_a, i0 + vec2<i32>(1, 1)),
        t.x,
    );
    textureStore(out_a, vec2<i32>(id.xy), mix(top, bottom, t.y));
}

// tex_a: composite, tex_b: finest solution -> out_a: filled composite
@compute @workgroup_size(8, 8, 1)
fn compose_filled(@builtin(global_invocation_id) id: vec3<u32>) {
    if (out_of_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let texel = textureLoad(tex_a, p, 0);
    var result = texel;
    if (is_unblended(texel.a)) {
        result = vec4<f32>(textureLoad(tex_b, p, 0).rgb, texel.a);
    }
    textureStore(out_a, p, result);
}
"#;

/// Poisson entry points, in dispatch order of one level
pub const POISSON_ENTRY_POINTS: [&str; 6] = [
    "init_level",
    "restrict_level",
    "seed_level",
    "relax_level",
    "upsample_level",
    "compose_filled",
];

/// Blend shader sized for `max_cameras` camera records
pub fn blend_shader(max_cameras: usize) -> String {
    let fragment = BLEND_FRAGMENT.replace("{{MAX_CAMERAS}}", &max_cameras.max(1).to_string());
    format!("{}{}", FULLSCREEN_VERTEX_SHADER, fragment)
}

pub fn resolve_shader() -> String {
    format!("{}{}", FULLSCREEN_VERTEX_SHADER, RESOLVE_FRAGMENT)
}

/// Parse and validate a WGSL module, reporting errors with source context
pub fn validate_wgsl(label: &str, source: &str) -> BackendResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        BackendError::ShaderCreationFailed(format!("{}: {}", label, e.emit_to_string(source)))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|e| {
        BackendError::ShaderCreationFailed(format!("{}: {}", label, e.emit_to_string(source)))
    })?;

    Ok(module)
}

/// User locations an entry point argument or result carries
fn locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
) -> Vec<u32> {
    match binding {
        Some(naga::Binding::Location { location, .. }) => vec![*location],
        Some(naga::Binding::BuiltIn(_)) => Vec::new(),
        None => match &module.types[ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|member| match member.binding {
                    Some(naga::Binding::Location { location, .. }) => Some(location),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

/// Check that the fragment stage consumes exactly the locations the vertex stage writes.
///
/// Modules without a vertex and a fragment entry point pass unchanged.
pub fn check_stage_interface(label: &str, module: &naga::Module) -> BackendResult<()> {
    let stage = |stage: naga::ShaderStage| module.entry_points.iter().find(|ep| ep.stage == stage);
    let (Some(vertex), Some(fragment)) = (
        stage(naga::ShaderStage::Vertex),
        stage(naga::ShaderStage::Fragment),
    ) else {
        return Ok(());
    };

    let mut outputs = vertex
        .function
        .result
        .as_ref()
        .map(|result| locations(module, result.ty, result.binding.as_ref()))
        .unwrap_or_default();
    let mut inputs: Vec<u32> = fragment
        .function
        .arguments
        .iter()
        .flat_map(|arg| locations(module, arg.ty, arg.binding.as_ref()))
        .collect();
    outputs.sort_unstable();
    inputs.sort_unstable();

    if outputs != inputs {
        return Err(BackendError::ShaderCreationFailed(format!(
            "{}: {} writes locations {:?} but {} reads {:?}",
            label, vertex.name, outputs, fragment.name, inputs
        )));
    }
    Ok(())
}
