//! Instruction templates for each word tool.
//!
//! Templates are compiled `askama` text templates: every placeholder is bound
//! to a struct field at compile time and substituted in a single pass, so user
//! text containing template syntax is never re-expanded. Builders only borrow
//! their inputs.

use askama::Template;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// A prompt ready for the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpec {
    pub prompt: String,
    pub schema_description: String,
    pub example_format: String,
}

/// Language the generated text should be written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(String);

impl Locale {
    pub fn new(language: impl Into<String>) -> Self {
        let language = language.into();
        let trimmed = language.trim();
        if trimmed.is_empty() {
            Self::default()
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn language(&self) -> &str {
        &self.0
    }

    pub fn is_english(&self) -> bool {
        self.0.eq_ignore_ascii_case("english") || self.0.eq_ignore_ascii_case("en")
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self("English".to_string())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Accept,
    Reject,
}

impl Tone {
    pub fn label(self) -> &'static str {
        match self {
            Tone::Accept => "acceptance",
            Tone::Reject => "rejection",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" | "acceptance" | "yes" => Some(Tone::Accept),
            "reject" | "rejection" | "no" => Some(Tone::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Accept => write!(f, "accept"),
            Tone::Reject => write!(f, "reject"),
        }
    }
}

fn history_line(label: &str, history: &[String], separator: &str) -> String {
    if history.is_empty() {
        String::new()
    } else {
        format!("{label}: {}.", history.join(separator))
    }
}

fn locale_line(locale: &Locale) -> String {
    if locale.is_english() {
        String::new()
    } else {
        format!("Write every generated word in {locale}, keeping the JSON keys in English.")
    }
}

fn pretty(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

#[derive(Template)]
#[template(
    ext = "txt",
    source = r#"The user wants to find a delightfully different word to replace "very {{ adjective }}":

"very {{ adjective }}"

{{ history }}
{{ locale_line }}

You are a wordsmith and vocabulary expert. Your mission: find a single, sophisticated word that captures the essence of "very {{ adjective }}" but with more elegance and charm.

The replacement word should:
- Be a real {{ language }} word that precisely captures the intensified meaning of the adjective
- Be distinctly different from previous suggestions
- Sound more interesting and delightful than "very {{ adjective }}"
- Be appropriate for general use
- Have a whimsical or charming quality

Return the word, its definition, and the original phrase being replaced."#
)]
struct DifferentWordsTemplate<'a> {
    adjective: &'a str,
    history: String,
    locale_line: String,
    language: &'a str,
}

pub fn different_words(
    adjective: &str,
    history: &[String],
    locale: &Locale,
) -> askama::Result<PromptSpec> {
    let adjective = adjective.trim();
    let prompt = DifferentWordsTemplate {
        adjective,
        history: history_line("Previously suggested words", history, ", "),
        locale_line: locale_line(locale),
        language: locale.language(),
    }
    .render()?;
    Ok(PromptSpec {
        prompt,
        schema_description: "A single alternative word that replaces \"very + adjective\" with brief definition and original phrase".to_string(),
        example_format: pretty(json!({
            "word": "effervescent",
            "definition": "Vivacious and enthusiastic; bubbling with excitement",
            "original": "very happy",
        })),
    })
}

#[derive(Template)]
#[template(
    ext = "txt",
    source = r#"The user wants to transform this ordinary phrase into something magnificently fancy and eloquent:

"{{ phrase }}"

{{ history }}
{{ locale_line }}

You are a distinguished wordsmith and master of eloquent expression, skilled in the art of transforming mundane phrases into sophisticated, grandiose statements. Your mission: rewrite the given phrase using delightfully pretentious and ornate language.

IMPORTANT LENGTH GUIDELINES:
- For phrases 1-3 words: Keep transformation under 8 words
- For phrases 4-6 words: Keep transformation under 12 words
- For phrases 7+ words: Can expand more freely but stay reasonable
- Focus on replacing words with fancier alternatives rather than adding many new words

Your rewritten phrase should:
- Sound incredibly sophisticated and pompous in the most amusing way
- Use elaborate vocabulary and flowery language
- Be distinctly different from previous attempts
- Maintain the original meaning while making it sound ridiculously fancy
- Be entertaining and delightfully over-the-top
- Respect the length guidelines above

CRITICAL: Return ONLY an array of word segments. Each segment should be a separate object with "word" and "reasoning" fields. Do NOT combine multiple words into a single reasoning explanation - each word segment gets its own reasoning.

You can leave the reasoning field blank ("") if a word segment doesn't need explanation or if the transformation is obvious.

Example: If the transformation is "I find myself in profound gastronomic yearning", return:
[
  {"word": "I find myself in", "reasoning": "Sets formal introspective tone"},
  {"word": "profound", "reasoning": "Elevates simple to philosophical"},
  {"word": "gastronomic yearning", "reasoning": "Transforms hunger to sophisticated desire"}
]

NOT this (which combines explanations):
[
  {"word": "I find myself in profound gastronomic yearning", "reasoning": "Sets tone, elevates hunger, transforms desire"}
]

Each reasoning should be specific to that exact word/segment only. If a segment doesn't need special explanation or is obvious, use an empty string ("") for the reasoning field."#
)]
struct EloquentTemplate<'a> {
    phrase: &'a str,
    history: String,
    locale_line: String,
}

pub fn eloquent_expression(
    phrase: &str,
    history: &[String],
    locale: &Locale,
) -> askama::Result<PromptSpec> {
    let prompt = EloquentTemplate {
        phrase: phrase.trim(),
        history: history_line("Previously crafted versions", history, "; "),
        locale_line: locale_line(locale),
    }
    .render()?;
    Ok(PromptSpec {
        prompt,
        schema_description:
            "Array of word segments with word text and reasoning for eloquent phrase transformation"
                .to_string(),
        example_format: pretty(json!([
            {"word": "I find myself in a state of", "reasoning": "Sets a formal, introspective tone"},
            {"word": "profound gastronomic yearning", "reasoning": "Elevates simple hunger to philosophical depth"},
            {"word": "that demands immediate attention", "reasoning": "Adds dramatic urgency to the request"},
        ])),
    })
}

#[derive(Template)]
#[template(
    ext = "txt",
    source = r#"The user received this request: "{{ request }}"

They want to {% if accept %}accept and agree to{% else %}decline and reject{% endif %} this request.

{{ history }}
{{ locale_line }}

You are a master of grandiose proclamations and theatrical language, skilled in transforming simple responses into magnificent dramatic declarations. Your mission: craft an {% if accept %}elaborate acceptance{% else %}ornate rejection{% endif %} that sounds incredibly sophisticated, pompous, and delightfully over-the-top.

{% if accept -%}
Your acceptance should:
- Express enthusiastic agreement with royal flourishes
- Use elaborate vocabulary that makes simple "yes" sound magnificent
- Sound like a nobleman granting a favor with great ceremony
- Be entertaining and delightfully grandiose while clearly meaning "yes"
{%- else -%}
Your rejection should:
- Express dignified refusal with theatrical flair
- Use elaborate vocabulary that makes simple "no" sound sophisticated
- Sound like a refined person declining with utmost politeness but dramatic emphasis
- Be entertaining and delightfully pompous while clearly meaning "no"
{%- endif %}

IMPORTANT LENGTH GUIDELINES:
- Keep the declaration under 25 words for maximum impact
- Focus on replacing simple words with fancier alternatives
- Make it sound ridiculously elaborate but still concise
- Be distinctly different from previous attempts

Examples of the humor style:
- Simple "yes" becomes "I shall graciously bestow my most enthusiastic acquiescence upon this endeavor"
- Simple "no" becomes "I must regretfully decline this proposition with utmost ceremonial dignity"

Return the dramatic declaration, whether it's an acceptance or rejection, and the original request."#
)]
struct DeclarationTemplate<'a> {
    request: &'a str,
    accept: bool,
    history: String,
    locale_line: String,
}

pub fn dramatic_declaration(
    request: &str,
    tone: Tone,
    history: &[String],
    locale: &Locale,
) -> askama::Result<PromptSpec> {
    let request = request.trim();
    let prompt = DeclarationTemplate {
        request,
        accept: tone == Tone::Accept,
        history: history_line("Previously created declarations", history, "; "),
        locale_line: locale_line(locale),
    }
    .render()?;
    let example = match tone {
        Tone::Accept => {
            "I shall graciously bestow my most enthusiastic acquiescence upon this endeavor"
        }
        Tone::Reject => {
            "I must regretfully decline this proposition with utmost ceremonial dignity"
        }
    };
    Ok(PromptSpec {
        prompt,
        schema_description: format!(
            "Dramatic {} with the response text, tone type, and original request",
            tone.label()
        ),
        example_format: pretty(json!({
            "response": example,
            "tone": tone.label(),
            "original": request,
        })),
    })
}

#[derive(Template)]
#[template(
    ext = "txt",
    source = r#"The user wants to create a creative acronym for the word/phrase:

"{{ input }}"

{{ history }}
{{ extra }}
{{ locale_line }}

You are an Acronym Alchemist - a master of creating meaningful, creative acronyms where each letter of the original word/phrase becomes the first letter of words in the acronym expansion.

Your mission: Create a single, creative acronym that:
- Uses the exact letters of the original word/phrase in the same order
- Creates a meaningful, clever, and memorable expansion
- Is distinctly different from previous suggestions
- Has a whimsical or insightful quality
- Can be serious, humorous, motivational, or philosophical depending on the original word
- Uses each letter exactly once in sequence

Examples of great acronyms:
- HOPE: Holding Optimistic Possibilities Endlessly
- MUSIC: Making Up Sounds Intuitively and Creatively
- CHANGE: Cultivating Higher Ambitions and New Goals for Evolution
- RISK: Reward Is Seldom Known

Return the acronym (the original word in uppercase), its creative meaning, and the original phrase."#
)]
struct AcronymTemplate<'a> {
    input: &'a str,
    history: String,
    extra: String,
    locale_line: String,
}

pub fn acronym(
    input: &str,
    extra_instructions: Option<&str>,
    history: &[String],
    locale: &Locale,
) -> askama::Result<PromptSpec> {
    let extra = extra_instructions
        .map(str::trim)
        .filter(|extra| !extra.is_empty())
        .map(|extra| format!("Additional instructions: {extra}"))
        .unwrap_or_default();
    let prompt = AcronymTemplate {
        input: input.trim(),
        history: history_line("Previously generated acronyms", history, ", "),
        extra,
        locale_line: locale_line(locale),
    }
    .render()?;
    Ok(PromptSpec {
        prompt,
        schema_description:
            "A creative acronym with its expansion meaning and the original word/phrase"
                .to_string(),
        example_format: pretty(json!({
            "acronym": "HOPE",
            "meaning": "Holding Optimistic Possibilities Endlessly",
            "original": "hope",
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn different_words_substitutes_every_placeholder() {
        let spec = different_words("  happy ", &[], &Locale::default()).unwrap();
        assert_eq!(spec.prompt.matches("very happy").count(), 4);
        assert!(!spec.prompt.contains("{{"));
        assert!(!spec.prompt.contains("Previously suggested"));
        assert!(spec.prompt.contains("Be a real English word"));
        let example: serde_json::Value = serde_json::from_str(&spec.example_format).unwrap();
        assert_eq!(example["word"], "effervescent");
    }

    #[test]
    fn history_is_listed_with_tool_specific_separator() {
        let history = vec!["effervescent".to_string(), "jubilant".to_string()];
        let spec = different_words("happy", &history, &Locale::default()).unwrap();
        assert!(spec.prompt.contains("Previously suggested words: effervescent, jubilant."));

        let spec = eloquent_expression("I am hungry", &history, &Locale::default()).unwrap();
        assert!(spec.prompt.contains("Previously crafted versions: effervescent; jubilant."));
    }

    #[test]
    fn builders_leave_inputs_untouched() {
        let history = vec!["HOPE: Holding Optimistic Possibilities Endlessly".to_string()];
        let before = history.clone();
        let _ = acronym("hope", Some("make it nautical"), &history, &Locale::default()).unwrap();
        assert_eq!(history, before);
    }

    #[test]
    fn template_syntax_in_user_text_is_not_expanded() {
        let spec = eloquent_expression("{{ phrase }} {% if x %}", &[], &Locale::default()).unwrap();
        assert!(spec.prompt.contains("\"{{ phrase }} {% if x %}\""));
    }

    #[test]
    fn declaration_follows_tone() {
        let accept =
            dramatic_declaration("Lunch on \"Friday\"?", Tone::Accept, &[], &Locale::default())
                .unwrap();
        assert!(accept.prompt.contains("They want to accept and agree to this request."));
        assert!(accept.prompt.contains("Your acceptance should:"));
        assert!(!accept.prompt.contains("Your rejection should:"));
        assert_eq!(
            accept.schema_description,
            "Dramatic acceptance with the response text, tone type, and original request"
        );
        let example: serde_json::Value = serde_json::from_str(&accept.example_format).unwrap();
        assert_eq!(example["original"], "Lunch on \"Friday\"?");
        assert_eq!(example["tone"], "acceptance");

        let reject =
            dramatic_declaration("Lunch?", Tone::Reject, &[], &Locale::default()).unwrap();
        assert!(reject.prompt.contains("Your rejection should:"));
        assert!(reject.prompt.contains("craft an ornate rejection"));
    }

    #[test]
    fn acronym_extra_instructions_only_when_present() {
        let with_extra =
            acronym("hope", Some("  keep it nautical "), &[], &Locale::default()).unwrap();
        assert!(with_extra.prompt.contains("Additional instructions: keep it nautical\n"));
        let blank = acronym("hope", Some("   "), &[], &Locale::default()).unwrap();
        assert!(!blank.prompt.contains("Additional instructions"));
    }

    #[test]
    fn non_english_locale_adds_language_line() {
        let locale = Locale::new("French");
        let spec = different_words("happy", &[], &locale).unwrap();
        assert!(spec.prompt.contains("Be a real French word"));
        assert!(spec.prompt.contains("Write every generated word in French"));
        assert_eq!(Locale::new("  "), Locale::default());
    }

    #[test]
    fn tone_parsing() {
        assert_eq!(Tone::parse("Accept"), Some(Tone::Accept));
        assert_eq!(Tone::parse("no"), Some(Tone::Reject));
        assert_eq!(Tone::parse("maybe"), None);
    }
}
