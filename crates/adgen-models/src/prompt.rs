//! Render prompt construction.
//!
//! Every clip is rendered independently, so each prompt repeats the same
//! continuity context ahead of its own shot description.

use crate::script::{Scene, ScriptSnapshot};

/// Style phrase for a script tone. Unknown tones are passed through as-is.
pub fn tone_style(tone: &str) -> String {
    match tone.trim().to_ascii_lowercase().as_str() {
        "ugc" => "authentic user-generated content style, casual and relatable".to_string(),
        "premium" => "luxury commercial style, sophisticated and elegant".to_string(),
        "playful" => "fun and energetic style, vibrant and engaging".to_string(),
        _ => tone.trim().to_string(),
    }
}

/// Context shared by every shot of a script.
pub fn shared_context(script: &ScriptSnapshot) -> String {
    format!(
        "You are generating a {count}-shot viral video ad for {product}.\n\
         Master visual description: {master}\n\
         Style: {style}\n\
         Maintain consistent lighting, color grade, and product appearance throughout all shots.\n\
         Keep the same setting, characters, and visual continuity between shots.",
        count = script.scenes().len(),
        product = script.product_name(),
        master = script.master_description(),
        style = tone_style(script.tone()),
    )
}

/// Full prompt for the scene at `position` (0-based) of `total`.
pub fn shot_prompt(shared: &str, scene: &Scene, position: usize, total: usize) -> String {
    let mut prompt = format!(
        "{shared}\n\nShot {} of {total}: {}",
        position + 1,
        scene.prompt.trim()
    );
    if let Some(constraint) = scene
        .continuity_constraint
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        prompt.push_str("\nContinuity: ");
        prompt.push_str(constraint);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptData;

    fn snapshot(tone: Option<&str>) -> ScriptSnapshot {
        ScriptData {
            product_name: "Glow Serum".into(),
            master_description: "amber dropper bottle on marble".into(),
            scenes: vec![
                Scene {
                    id: None,
                    role: Some("hook".into()),
                    prompt: "close up of the bottle".into(),
                    continuity_constraint: Some("same marble counter".into()),
                    shot_type: None,
                },
                Scene {
                    id: None,
                    role: Some("cta".into()),
                    prompt: "hand holds bottle to camera".into(),
                    continuity_constraint: None,
                    shot_type: None,
                },
            ],
            tone: tone.map(String::from),
        }
        .approve()
        .unwrap()
    }

    #[test]
    fn test_shared_context_mentions_product_and_style() {
        let ctx = shared_context(&snapshot(Some("premium")));
        assert!(ctx.contains("2-shot viral video ad for Glow Serum"));
        assert!(ctx.contains("amber dropper bottle on marble"));
        assert!(ctx.contains("luxury commercial style"));
    }

    #[test]
    fn test_tone_defaults_to_ugc() {
        let ctx = shared_context(&snapshot(None));
        assert!(ctx.contains("authentic user-generated content style"));
    }

    #[test]
    fn test_shot_prompt_numbers_from_one() {
        let script = snapshot(None);
        let shared = shared_context(&script);
        let first = shot_prompt(&shared, &script.scenes()[0], 0, 2);
        assert!(first.starts_with(&shared));
        assert!(first.contains("Shot 1 of 2: close up of the bottle"));
        assert!(first.ends_with("Continuity: same marble counter"));

        let last = shot_prompt(&shared, &script.scenes()[1], 1, 2);
        assert!(last.ends_with("Shot 2 of 2: hand holds bottle to camera"));
    }
}
