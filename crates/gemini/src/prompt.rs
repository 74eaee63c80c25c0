/// Instruction sent alongside every garment photo.
pub const EXTRACTION_PROMPT: &str = "\
Task:
Given an input image of a t-shirt, extract only the printed design from the shirt. \
Remove all fabric texture, folds, shadows, or background. \
Output a clean, sharp, high-resolution version of the design itself.

Detailed Instructions:
1. Detect and isolate the printed or embroidered graphic visible on the t-shirt.
2. Remove all non-design elements, including the t-shirt fabric, wrinkles, shadows, lighting gradients, and background.
3. Preserve accurate colors, edges, and proportions of the original design.
4. Output should be a transparent-background PNG.
5. Maintain maximum sharpness and resolution, suitable for reuse in print or digital design.
6. Do not include any part of the garment, model, or scene, only the design.

Style / Output Requirements:
- Output format: Design-only image (no background or fabric).
- Resolution: Highest available, lossless quality.
- Edge clarity: Perfectly clean, no blending with the shirt.
- Color fidelity: Match the original printed design as closely as possible.
";

/// Harm categories relaxed to `BLOCK_NONE`.
pub const RELAXED_SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
