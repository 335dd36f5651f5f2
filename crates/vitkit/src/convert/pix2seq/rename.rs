//! # `Pix2Seq` Parameter Rewriting
//!
//! Maps a training-checkpoint variable path and value onto the parameter
//! name and layout of the `Pix2Seq` vision encoder / text decoder.
//!
//! Rewriting is a pure function of ``(name, value)``, in stages:
//!
//! 1. [`normalize_variable_path`]: drop the checkpoint value suffix, use `.` separators.
//! 2. [`apply_structural_rules`]: ordered, cumulative substring replacements.
//! 3. [`layout_plan`]: reshapes and transposes chosen from the name so far.
//! 4. [`finalize_name`]: ``kernel`` / ``gamma`` / ``beta`` renames, and the module root prefix.

use crate::convert::error::ConversionError;
use crate::convert::layout::{
    collapse_trailing_axes, flatten, hwio_to_oihw, lead_with_last_axis, reverse_axes,
};
use burn::prelude::Backend;
use burn::tensor::TensorData;
use serde::Serialize;

/// Suffix of checkpoint object-graph value paths.
pub const VARIABLE_VALUE_SUFFIX: &str = "/.ATTRIBUTES/VARIABLE_VALUE";

/// Prefix of every parameter owned by the encoder-decoder module.
pub const MODULE_ROOT_PREFIX: &str = "model.";

/// Parameters of the language model head live outside the module root.
pub const LM_HEAD: &str = "lm_head";

/// The decoder output norm lives outside the module root.
pub const OUTPUT_LAYERNORM: &str = "output_layernorm";

/// The part of the network a structural rule addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleRegion {
    /// Patch embedding conv and norm.
    Stem,

    /// Encoder-to-decoder projection.
    Projection,

    /// Token / position embeddings, output bias and output norm.
    DecoderEmbeddings,

    /// Decoder self / cross attention.
    DecoderLayers,

    /// Decoder feed-forward blocks.
    DecoderFeedForward,

    /// Encoder attention and feed-forward blocks.
    EncoderLayers,

    /// Encoder output norm.
    EncoderOutput,
}

/// An ordered group of literal substring replacements.
#[derive(Debug)]
pub struct RuleGroup {
    /// The addressed region.
    pub region: RuleRegion,

    /// When set, the group only applies to names containing this substring.
    pub guard: Option<&'static str>,

    /// ``(from, to)`` replacements, applied in order to every occurrence.
    pub rules: &'static [(&'static str, &'static str)],
}

/// The structural rules, in application order.
///
/// Rules are cumulative: each sees the output of every rule before it.
/// The encoder rules rely on this, as the bare ``mha`` rule must run after
/// ``mha_ln`` and ``mha._output_dense``, and after the decoder attention rules
/// have consumed ``self_mha`` / ``cross_mha``.
pub static STRUCTURAL_RULES: &[RuleGroup] = &[
    RuleGroup {
        region: RuleRegion::Stem,
        guard: None,
        rules: &[
            (
                "model.encoder.stem_conv",
                "encoder.embeddings.patch_embeddings.projection",
            ),
            (
                "model.encoder.stem_ln",
                "encoder.embeddings.patch_embeddings.layer_norm",
            ),
        ],
    },
    RuleGroup {
        region: RuleRegion::Projection,
        guard: None,
        rules: &[
            ("model.proj_ln", "projection.layernorm"),
            (
                "model.proj_mlp.layernorms.0",
                "projection.projection_mlp.layernorm",
            ),
            ("model.proj_mlp.mlp_layers.0", "projection.projection_mlp"),
            ("model.proj", "projection.projection"),
        ],
    },
    RuleGroup {
        region: RuleRegion::DecoderEmbeddings,
        guard: None,
        rules: &[
            (
                "model.decoder.ar_decoder.Stoken_embedding",
                "decoder.embed_tokens.weight",
            ),
            (
                "model.decoder.ar_decoder.Sseq_pos_embedding",
                "decoder.embed_positions.embeddings",
            ),
            ("model.decoder.ar_decoder.Soutp_bias", "lm_head.bias"),
            ("model.decoder.output_ln", OUTPUT_LAYERNORM),
        ],
    },
    RuleGroup {
        region: RuleRegion::DecoderLayers,
        guard: None,
        rules: &[
            ("model.decoder.decoder.dec_layers", "decoder.layers"),
            ("self_ln", "self_attn_layer_norm"),
            ("cross_ln", "encoder_attn_layer_norm"),
            ("self_mha._query_dense", "self_attn.q_proj"),
            ("self_mha._key_dense", "self_attn.k_proj"),
            ("self_mha._value_dense", "self_attn.v_proj"),
            ("self_mha._output_dense", "self_attn.out_proj"),
            ("cross_mha._query_dense", "encoder_attn.q_proj"),
            ("cross_mha._key_dense", "encoder_attn.k_proj"),
            ("cross_mha._value_dense", "encoder_attn.v_proj"),
            ("cross_mha._output_dense", "encoder_attn.out_proj"),
        ],
    },
    RuleGroup {
        region: RuleRegion::DecoderFeedForward,
        guard: Some("decoder"),
        rules: &[
            ("mlp.mlp_layers.0.dense1", "fc1"),
            ("mlp.mlp_layers.0.dense2", "fc2"),
            ("mlp.layernorms.0", "layernorm"),
        ],
    },
    RuleGroup {
        region: RuleRegion::EncoderLayers,
        guard: None,
        rules: &[
            (
                "model.encoder.transformer_encoder.enc_layers",
                "encoder.layer",
            ),
            ("mha_ln", "layernorm_before"),
            ("mha._output_dense", "attention.output.dense"),
            ("mha", "attention.attention"),
            ("_query_dense", "query"),
            ("_key_dense", "key"),
            ("_value_dense", "value"),
            ("mlp.mlp_layers.0.dense1", "intermediate.dense"),
            ("mlp.mlp_layers.0.dense2", "output.dense"),
            ("mlp.layernorms.0", "layernorm_after"),
        ],
    },
    RuleGroup {
        region: RuleRegion::EncoderOutput,
        guard: None,
        rules: &[("model.encoder.output_ln", "layernorm")],
    },
];

/// Strip the value suffix and convert ``/`` separators to ``.``.
pub fn normalize_variable_path(name: &str) -> String {
    name.replace(VARIABLE_VALUE_SUFFIX, "").replace('/', ".")
}

/// Apply [`STRUCTURAL_RULES`] to a normalized name.
///
/// # Returns
///
/// The rewritten name, and the regions of every rule that fired, in order.
pub fn apply_structural_rules(name: &str) -> (String, Vec<RuleRegion>) {
    let mut name = name.to_string();
    let mut regions = Vec::new();

    for group in STRUCTURAL_RULES {
        if group.guard.is_some_and(|guard| !name.contains(guard)) {
            continue;
        }
        for (from, to) in group.rules {
            if name.contains(from) {
                name = name.replace(from, to);
                if regions.last() != Some(&group.region) {
                    regions.push(group.region);
                }
            }
        }
    }

    (name, regions)
}

/// A single layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOp {
    /// ``(..., O)`` to ``(O, numel / O)``; see [`lead_with_last_axis`].
    LeadWithLastAxis,

    /// ``(I, ...)`` to ``(I, numel / I)``; see [`collapse_trailing_axes`].
    CollapseTrailingAxes,

    /// Flatten to rank 1.
    Flatten,

    /// Conv kernel ``(H, W, Cin, Cout)`` to ``(Cout, Cin, H, W)``.
    HwioToOihw,

    /// Reverse all axes.
    ReverseAxes,
}

fn is_attention_output(name: &str) -> bool {
    name.contains("attention.output.dense") || name.contains("out_proj")
}

fn is_qkv_projection(name: &str) -> bool {
    ["query", "key", "value", "q_proj", "k_proj", "v_proj"]
        .iter()
        .any(|p| name.contains(p))
}

/// The layout changes for a structurally rewritten name, in order.
///
/// The name must still carry its ``kernel`` / ``bias`` leaf.
pub fn layout_plan(name: &str) -> Vec<LayoutOp> {
    let is_kernel = name.contains("kernel");
    let mut plan = Vec::new();

    if is_kernel && is_attention_output(name) {
        plan.push(LayoutOp::LeadWithLastAxis);
    }
    if is_qkv_projection(name) {
        if is_kernel {
            plan.push(LayoutOp::CollapseTrailingAxes);
        } else if name.contains("bias") {
            plan.push(LayoutOp::Flatten);
        }
    }
    if is_kernel {
        if name.contains("patch_embeddings") {
            plan.push(LayoutOp::HwioToOihw);
        } else {
            plan.push(LayoutOp::ReverseAxes);
        }
    }

    plan
}

/// Apply a [`layout_plan`] to a value.
pub fn apply_layout_plan<B: Backend>(
    name: &str,
    plan: &[LayoutOp],
    mut param: TensorData,
    device: &B::Device,
) -> Result<TensorData, ConversionError> {
    for op in plan {
        param = match op {
            LayoutOp::LeadWithLastAxis => lead_with_last_axis(name, param)?,
            LayoutOp::CollapseTrailingAxes => collapse_trailing_axes(name, param)?,
            LayoutOp::Flatten => flatten(name, param)?,
            LayoutOp::HwioToOihw => hwio_to_oihw::<B>(name, param, device)?,
            LayoutOp::ReverseAxes => reverse_axes::<B>(name, param, device)?,
        };
    }
    Ok(param)
}

/// Rename leaves, and root the name under [`MODULE_ROOT_PREFIX`].
pub fn finalize_name(name: &str) -> String {
    let name = name
        .replace("kernel", "weight")
        .replace("gamma", "weight")
        .replace("beta", "bias");

    if name.starts_with(LM_HEAD) || name.contains(OUTPUT_LAYERNORM) {
        name
    } else {
        format!("{MODULE_ROOT_PREFIX}{name}")
    }
}

/// The target parameter name for a checkpoint variable path.
pub fn rewrite_name(name: &str) -> String {
    let (name, _) = apply_structural_rules(&normalize_variable_path(name));
    finalize_name(&name)
}

/// A rewritten parameter.
#[derive(Debug, Clone)]
pub struct RewrittenParam {
    /// Target parameter name.
    pub name: String,

    /// Value in target layout.
    pub param: TensorData,

    /// Regions of the structural rules that fired.
    pub regions: Vec<RuleRegion>,
}

impl RewrittenParam {
    /// Did any structural rule fire?
    pub fn matched(&self) -> bool {
        !self.regions.is_empty()
    }
}

/// Rewrite a checkpoint variable to its target name and layout.
///
/// # Arguments
///
/// - `name`: the checkpoint variable path.
/// - `param`: the (squeezed) variable value.
/// - `device`: the device used for permutations.
pub fn rewrite_param<B: Backend>(
    name: &str,
    param: TensorData,
    device: &B::Device,
) -> Result<RewrittenParam, ConversionError> {
    let (structural, regions) = apply_structural_rules(&normalize_variable_path(name));

    let source_shape = param.shape.clone();
    let plan = layout_plan(&structural);
    let param = apply_layout_plan::<B>(&structural, &plan, param, device)?;

    let target = finalize_name(&structural);
    tracing::debug!(
        source = name,
        target = target.as_str(),
        ?source_shape,
        shape = ?param.shape,
        ?plan,
        "rewrote parameter"
    );

    Ok(RewrittenParam {
        name: target,
        param,
        regions,
    })
}
