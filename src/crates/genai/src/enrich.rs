//! Prompt enrichment: rewrite terse user prompts into art-directed ones.
//!
//! Enrichment is a meta-prompt through the text model: a per-type checklist
//! plus naive/expert few-shot pairs teach the model what an expert prompt
//! for that medium looks like. Node types without a profile pass through
//! unchanged, as does everything when enrichment is disabled at deployment
//! level (wire up [`NoopEnricher`](mediagraph_core::traits::NoopEnricher)
//! instead).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use mediagraph_core::error::Result;
use mediagraph_core::node::NodeType;
use mediagraph_core::traits::{GenerationBackend, PromptEnricher, TextInputs};

const IMAGE_CHECKLIST: &str = "\
Your enriched prompt MUST include ALL 7 elements as a narrative paragraph:
1. Subject & action (who/what, expression, gesture)
2. Setting & environment (specific location)
3. Composition & camera (shot type, lens, angle)
4. Lighting (direction, quality, color temperature)
5. Color palette & mood (dominant colors, emotional tone)
6. Texture & materials (surface qualities)
7. Style & quality keywords (photography style, resolution, reference)";

const VIDEO_CHECKLIST: &str = "\
Your enriched prompt MUST be a mini film script with:
1. Opening frame (scene, subject, camera position)
2. Camera movement (dolly, tracking, crane, pan)
3. Action & pacing (beat-by-beat over 4-8 seconds)
4. Dialogue/voiceover in quotes with voice direction
5. Sound design (music mood, ambient sounds, SFX)
6. Lighting & atmosphere
7. Style reference (cinematic, filmic, brand aesthetic)";

/// `(naive, expert)` few-shot pairs per enrichable node type.
fn few_shot_examples(node_type: NodeType) -> &'static [(&'static str, &'static str)] {
    match node_type {
        NodeType::GenerateImage => &[
            (
                "sunset over mountains",
                "A jagged mountain range silhouetted against a burning sunset, peaks cutting \
                 into bands of orange, magenta, and violet. Shot from an elevated ridge on a \
                 70-200mm telephoto at f/8, compressing the haze-separated layers of terrain. \
                 Low golden-hour light rakes across the rock faces from the left, leaving the \
                 valleys in deep indigo shadow. Rich, saturated palette; visible atmospheric \
                 depth between ridgelines. Ultra-realistic landscape photography, 4K, HDR.",
            ),
            (
                "product photo of watch",
                "A steel mechanical wristwatch resting on dark veined marble, sapphire crystal \
                 catching a single precise highlight. Overhead 30-degree angle on a 100mm macro \
                 at f/11, tack-sharp across the dial indices. Three-point studio lighting with a \
                 soft key from the left and a rim light separating the case from the stone. \
                 Charcoal, warm silver, and muted blue palette. Commercial product photography, \
                 4K, editorial quality.",
            ),
        ],
        NodeType::GenerateVideo => &[(
            "person walking down street",
            "A woman in a long camel coat walks a rain-slicked cobblestone street at dusk, the \
             camera tracking beside her at shoulder height on a gimbal. Warm shopfront light \
             spills across the wet stones, throwing golden bokeh in the shallow depth of field \
             of a 35mm lens at f/2.8. She glances over with a half-smile. \"Sometimes you just \
             know,\" she says softly. Quiet piano under the rhythm of her heels and distant \
             city hum. Teal-and-amber cinematic grade, 24fps filmic look.",
        )],
        NodeType::GenerateMusic => &[(
            "chill background music",
            "Ambient downtempo at 80 BPM in A minor: warm analog pad with slow filter movement, \
             soft kick and brushed hats keeping a gentle pulse, Rhodes arpeggios with light \
             chorus, reversed-reverb swells and vinyl crackle for texture, sub bass on whole \
             notes. Sparse arrangement with generous negative space; consistent dynamics suited \
             to background listening.",
        )],
        NodeType::TransformImage => &[(
            "make it warmer",
            "Shift the image to a warm golden-hour grade: amber highlights, deep ochre shadows, \
             color temperature around 6500K equivalent. Gently raise saturation of reds and \
             oranges while easing the blues. Keep the original composition, subject, and focus \
             untouched. Late-afternoon Mediterranean light, soft and inviting.",
        )],
        _ => &[],
    }
}

fn checklist(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::GenerateVideo => VIDEO_CHECKLIST,
        NodeType::GenerateImage | NodeType::TransformImage => IMAGE_CHECKLIST,
        _ => "",
    }
}

/// Enricher that rewrites prompts through the backend's text model with a
/// per-type checklist and few-shot examples.
pub struct HybridEnricher {
    backend: Arc<dyn GenerationBackend>,
}

impl HybridEnricher {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    fn meta_prompt(prompt: &str, node_type: NodeType) -> String {
        let examples = few_shot_examples(node_type);
        let examples_text = if examples.is_empty() {
            String::new()
        } else {
            let pairs: Vec<String> = examples
                .iter()
                .map(|(naive, expert)| format!("Naive: {naive}\nExpert: {expert}"))
                .collect();
            format!("Examples:\n\n{}\n\n", pairs.join("\n\n"))
        };

        format!(
            "Transform this prompt into a detailed, art-directed prompt for {kind} generation.\n\
             Write as a single rich narrative paragraph, not a keyword list.\n\n\
             {checklist}\n\n\
             {examples}Output ONLY the enriched prompt. No explanations, no labels, no prefixes.\n\n\
             Original prompt: {prompt}\n\n\
             Enriched prompt:",
            kind = node_type.as_str(),
            checklist = checklist(node_type),
            examples = examples_text,
        )
    }
}

#[async_trait]
impl PromptEnricher for HybridEnricher {
    async fn enrich(&self, prompt: &str, node_type: NodeType) -> Result<String> {
        if few_shot_examples(node_type).is_empty() {
            return Ok(prompt.to_string());
        }

        let meta = Self::meta_prompt(prompt, node_type);
        let mut params = Map::new();
        params.insert("temperature".to_string(), json!(0.4));
        let enriched = self
            .backend
            .generate_text(&meta, &params, TextInputs::default())
            .await?;
        Ok(enriched.trim().to_string())
    }
}
