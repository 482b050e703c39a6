//! Prompt composition.
//!
//! Every prompt is the user's description followed by a fixed set of style
//! descriptors. An edit appends the modification text to that base prompt.

/// Style descriptors appended to every subject description.
pub const STYLE_SUFFIX: &str = "pencil sketch style, highly detailed, black and white, realistic shading, cross-hatching, hand-drawn, artistic, portrait, face-focused, expressive";

/// Exclusion clause used when the user supplies none.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "color, colorful, painting, cartoon, anime, 3d render, blurry, low quality, distorted face, deformed features, extra limbs, watermark, text, signature";

/// Builds the base prompt: `"{subject}, {STYLE_SUFFIX}"`.
pub fn base_prompt(subject: &str) -> String {
    format!("{subject}, {STYLE_SUFFIX}")
}

/// Builds the prompt actually sent, appending `modification` when present.
pub fn final_prompt(subject: &str, modification: Option<&str>) -> String {
    let base = base_prompt(subject);
    match modification {
        Some(modification) => format!("{base}, {modification}"),
        None => base,
    }
}

/// Returns the user's exclusion text, or [`DEFAULT_NEGATIVE_PROMPT`] when it is empty.
pub fn exclusion_clause(text: &str) -> &str {
    if text.is_empty() {
        DEFAULT_NEGATIVE_PROMPT
    } else {
        text
    }
}
