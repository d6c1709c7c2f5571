use super::goal::Goal;

pub const NO_NOTES_MESSAGE: &str = "No additional notes provided.";

const NUTRITION_V1_VERSION: &str = "nutrition-v1";

const NUTRITION_V1_TEXT: &str = "You are a certified nutrition analyst. You receive (a) a single food image and (b) optional user notes.
Your tasks:
1) Identify the food items present. If uncertain, state assumptions explicitly.
2) Estimate portion sizes (grams or common household measures) as seen; if uncertain, give a conservative range and say why.
3) Provide calories per item and a total calorie estimate.
4) Include macronutrient breakdown per item when reasonably inferable (protein, carbs, fat in grams).
5) Flag allergens or dietary considerations (e.g., nuts, dairy, gluten) if likely present; explain uncertainty.
6) Offer healthier swap suggestions or portion guidance for common goals (weight loss, maintenance, muscle gain)—keep it brief and practical.

Formatting (use exactly this structure):
- Items Detected:
  1) <Item name> — ~<portion> — ~<kcal> kcal
     • Macros (est.): P ~x g, C ~y g, F ~z g
  2) ...

- Assumptions & Uncertainty:
  • <short bullet on any visual ambiguity and its impact on estimates>

- Total Estimated Calories: ~<sum> kcal

- Notes & Tips:
  • <one-line practical advice or swap>
  • <one-line safety/allergen caveat if relevant>

Constraints & Behavior:
- If visibility is poor or items are occluded, say so and provide a best-effort range.
- Do not invent precise values when uncertain; provide ranges and label them.
- Prefer standard reference foods and typical preparation methods unless user notes say otherwise.
- Be concise but complete. Avoid long paragraphs; prefer clean bullets.";

/// Reference output in the shape the instruction template asks for.
pub const SAMPLE_ANALYSIS: &str = "**Items Detected:**
1) Grilled Chicken Breast — ~150g — ~250 kcal
   • Macros (est.): P ~45g, C ~0g, F ~5g
2) Brown Rice — ~1 cup (195g) — ~215 kcal
   • Macros (est.): P ~5g, C ~45g, F ~2g
3) Steamed Broccoli — ~100g — ~35 kcal
   • Macros (est.): P ~3g, C ~7g, F ~0g

**Assumptions & Uncertainty:**
• Chicken appears grilled with minimal oil; actual calories may vary by ±10% based on cooking method
• Rice portion estimated from plate proportion; could be 170-220g range

**Total Estimated Calories:** ~500 kcal

**Notes & Tips:**
• Well-balanced meal with good protein and fiber; consider adding healthy fats (avocado, nuts)
• No major allergens detected; broccoli and rice are gluten-free
";

/// Versioned instruction block sent ahead of the image on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionTemplate {
    version: String,
    text: String,
}

impl InstructionTemplate {
    pub fn new(version: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            text: text.into(),
        }
    }

    pub fn nutrition_v1() -> Self {
        Self::new(NUTRITION_V1_VERSION, NUTRITION_V1_TEXT)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Template text, a blank line, then the user message.
    pub fn render(&self, notes: Option<&str>) -> String {
        format!("{}\n\n{}", self.text, user_message(notes))
    }
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self::nutrition_v1()
    }
}

pub fn user_message(notes: Option<&str>) -> String {
    match notes {
        Some(notes) if !notes.is_empty() => format!("User notes: {notes}"),
        _ => NO_NOTES_MESSAGE.to_string(),
    }
}

/// Folds a non-general goal into the free-text notes.
pub fn effective_notes(notes: Option<&str>, goal: Goal) -> Option<String> {
    let notes = notes.filter(|value| !value.is_empty());
    if goal.is_general() {
        return notes.map(str::to_string);
    }
    let label = goal.label();
    Some(match notes {
        Some(notes) => format!("{notes} | Goal: {label}"),
        None => format!("Goal: {label}"),
    })
}
