use crate::align::{Annotation, Segment, align};
use crate::prompt::{self, Locale, PromptSpec, Tone};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    DelightfullyDifferentWords,
    EloquentExpressions,
    DramaticDeclarations,
    AcronymAlchemist,
}

pub struct ToolInfo {
    pub kind: ToolKind,
    pub slug: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub placeholder: &'static str,
    pub loading_text: &'static str,
}

pub static TOOL_REGISTRY: Lazy<Vec<ToolInfo>> = Lazy::new(|| {
    vec![
        ToolInfo {
            kind: ToolKind::DelightfullyDifferentWords,
            slug: "delightfully-different-words",
            title: "Delightfully Different Words",
            description: "Trade the tired 'very + adjective' for a single, delightful word that says it better.",
            placeholder: "happy",
            loading_text: "Crafting the perfect synonym...",
        },
        ToolInfo {
            kind: ToolKind::EloquentExpressions,
            slug: "eloquent-expressions",
            title: "Eloquent Expressions",
            description: "Transform ordinary phrases into magnificently verbose declarations.",
            placeholder: "I am hungry",
            loading_text: "Composing something magnificent...",
        },
        ToolInfo {
            kind: ToolKind::DramaticDeclarations,
            slug: "dramatic-declarations",
            title: "Dramatic Declarations",
            description: "Accept or decline any request with theatrical grandeur.",
            placeholder: "Can you help me move this weekend?",
            loading_text: "Preparing a proclamation...",
        },
        ToolInfo {
            kind: ToolKind::AcronymAlchemist,
            slug: "acronym-alchemist",
            title: "Acronym Alchemist",
            description: "Turn any word into a clever acronym where every letter earns its place.",
            placeholder: "hope",
            loading_text: "Transmuting letters...",
        },
    ]
});

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::DelightfullyDifferentWords,
        ToolKind::EloquentExpressions,
        ToolKind::DramaticDeclarations,
        ToolKind::AcronymAlchemist,
    ];

    pub fn info(self) -> &'static ToolInfo {
        TOOL_REGISTRY
            .iter()
            .find(|info| info.kind == self)
            .unwrap_or_else(|| unreachable!("every tool kind is registered"))
    }

    pub fn slug(self) -> &'static str {
        self.info().slug
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        TOOL_REGISTRY
            .iter()
            .find(|info| info.slug.eq_ignore_ascii_case(slug.trim()))
            .map(|info| info.kind)
    }

    /// Builds the prompt for this tool, validating the input first.
    pub fn prompt(
        self,
        input: &ToolInput,
        history: &[String],
        locale: &Locale,
    ) -> Result<PromptSpec, ToolError> {
        let text = input.input.trim();
        if text.is_empty() {
            return Err(ToolError::EmptyInput);
        }
        let spec = match self {
            ToolKind::DelightfullyDifferentWords => prompt::different_words(text, history, locale)?,
            ToolKind::EloquentExpressions => prompt::eloquent_expression(text, history, locale)?,
            ToolKind::DramaticDeclarations => {
                let tone = input.tone.ok_or(ToolError::MissingTone)?;
                prompt::dramatic_declaration(text, tone, history, locale)?
            }
            ToolKind::AcronymAlchemist => prompt::acronym(
                text,
                input.extra_instructions.as_deref(),
                history,
                locale,
            )?,
        };
        Ok(spec)
    }

    /// Converts parsed model output into the common suggestion shape.
    pub fn interpret(self, value: Value, input: &ToolInput) -> Result<Suggestion, ToolError> {
        let original_input = input.input.trim();
        match self {
            ToolKind::DelightfullyDifferentWords => {
                let raw: DifferentWordReply = from_value(value)?;
                Ok(Suggestion {
                    text: non_blank(raw.word, "word")?,
                    original: Some(
                        raw.original
                            .unwrap_or_else(|| format!("very {original_input}")),
                    ),
                    words: None,
                    detail: Some(raw.definition),
                })
            }
            ToolKind::EloquentExpressions => {
                let words = eloquent_words(value)?;
                let text = words
                    .iter()
                    .map(|annotation| annotation.word.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(Suggestion {
                    text: non_blank(text, "word segments")?,
                    original: Some(original_input.to_string()),
                    words: Some(words),
                    detail: None,
                })
            }
            ToolKind::DramaticDeclarations => {
                let raw: DeclarationReply = from_value(value)?;
                let tone = raw
                    .tone
                    .or_else(|| input.tone.map(|tone| tone.label().to_string()));
                Ok(Suggestion {
                    text: non_blank(raw.response, "response")?,
                    original: Some(raw.original.unwrap_or_else(|| original_input.to_string())),
                    words: None,
                    detail: tone,
                })
            }
            ToolKind::AcronymAlchemist => {
                let raw: AcronymReply = from_value(value)?;
                Ok(Suggestion {
                    text: non_blank(raw.acronym, "acronym")?,
                    original: Some(raw.original.unwrap_or_else(|| original_input.to_string())),
                    words: None,
                    detail: Some(raw.meaning),
                })
            }
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().title)
    }
}

/// User-supplied fields for a tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInput {
    pub input: String,
    #[serde(default)]
    pub tone: Option<Tone>,
    #[serde(default)]
    pub extra_instructions: Option<String>,
}

impl ToolInput {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = Some(tone);
        self
    }

    pub fn with_extra_instructions(mut self, extra: impl Into<String>) -> Self {
        self.extra_instructions = Some(extra.into());
        self
    }
}

/// A generated alternative plus optional per-word explanations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Annotation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Suggestion {
    /// The string remembered so the model can avoid repeating itself.
    pub fn history_entry(&self) -> String {
        self.text.clone()
    }

    pub fn segments(&self) -> Vec<Segment> {
        match &self.words {
            Some(words) if !words.is_empty() => align(&self.text, words),
            _ if self.text.is_empty() => Vec::new(),
            _ => vec![Segment::Plain {
                content: self.text.clone(),
            }],
        }
    }
}

#[derive(Debug)]
pub enum ToolError {
    EmptyInput,
    MissingTone,
    Template(askama::Error),
    UnexpectedShape(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::EmptyInput => write!(f, "input must not be empty"),
            ToolError::MissingTone => write!(f, "choose whether to accept or reject the request"),
            ToolError::Template(err) => write!(f, "failed to render prompt: {err}"),
            ToolError::UnexpectedShape(msg) => write!(f, "unexpected model output: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<askama::Error> for ToolError {
    fn from(value: askama::Error) -> Self {
        ToolError::Template(value)
    }
}

#[derive(Debug, Deserialize)]
struct DifferentWordReply {
    word: String,
    #[serde(default)]
    definition: String,
    #[serde(default)]
    original: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeclarationReply {
    response: String,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    original: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AcronymReply {
    acronym: String,
    #[serde(default)]
    meaning: String,
    #[serde(default)]
    original: Option<String>,
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ToolError> {
    serde_json::from_value(value).map_err(|err| ToolError::UnexpectedShape(err.to_string()))
}

fn non_blank(value: String, field: &str) -> Result<String, ToolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ToolError::UnexpectedShape(format!("`{field}` is empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

fn eloquent_words(value: Value) -> Result<Vec<Annotation>, ToolError> {
    let array = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map
            .remove("words")
            .or_else(|| map.remove("segments"))
            .ok_or_else(|| ToolError::UnexpectedShape("expected an array of word segments".into()))?,
        _ => {
            return Err(ToolError::UnexpectedShape(
                "expected an array of word segments".into(),
            ));
        }
    };
    let words: Vec<Annotation> = from_value(array)?;
    Ok(words
        .into_iter()
        .filter(|annotation| !annotation.word.trim().is_empty())
        .collect())
}
