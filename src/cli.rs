use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use atty::Stream;
use clap::{Parser, Subcommand};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;
use wordsmith_rs::debug_log::FileSink;
use wordsmith_rs::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiConfig, GeminiModel};
use wordsmith_rs::{
    Annotation, ApiKey, GenerationClient, GenerationRequest, KeyStore, Locale, Segment, Suggestion,
    TOOL_REGISTRY, Tone, ToolInput, ToolKind, align,
};

#[derive(Parser, Debug)]
#[command(
    name = "wordsmith",
    about = "Whimsical word tools backed by a generative model",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// Where the API key is stored between runs.
    #[arg(long, global = true, env = "WORDSMITH_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Append every prompt/response exchange to this file.
    #[arg(long, global = true, env = "WORDSMITH_DEBUG_LOG")]
    debug_log: Option<PathBuf>,

    #[arg(long, global = true, env = "WORDSMITH_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the generateContent API.
    #[arg(long, global = true, env = "WORDSMITH_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Language for generated text.
    #[arg(long, global = true, env = "WORDSMITH_LOCALE", default_value = "English")]
    locale: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available tools.
    Tools,
    /// Run a tool once and print the suggestion.
    Run {
        /// Tool slug, e.g. acronym-alchemist.
        slug: String,
        /// Text to transform.
        #[arg(required = true, num_args = 1..)]
        input: Vec<String>,
        /// Accept or reject (dramatic-declarations only).
        #[arg(long, value_parser = parse_tone)]
        tone: Option<Tone>,
        /// Extra instructions (acronym-alchemist only).
        #[arg(long)]
        extra: Option<String>,
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Request arbitrary structured output.
    Generate {
        #[arg(long)]
        prompt: String,
        /// Description of the expected JSON shape.
        #[arg(long)]
        schema: String,
        /// Example of the expected JSON.
        #[arg(long)]
        example: String,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Align annotations against text without calling the model.
    Align {
        #[arg(long)]
        text: String,
        /// JSON array of {"word", "reasoning"} objects.
        #[arg(long)]
        annotations: String,
    },
    /// Manage the stored API key.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Start the web interface.
    #[cfg(feature = "web")]
    Serve {
        #[arg(long, env = "WORDSMITH_ADDR", default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Default theme for visitors without a theme cookie.
        #[arg(long, default_value = "dark", value_parser = parse_theme)]
        theme: wordsmith_rs::web::WebTheme,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    /// Store a key in the key file.
    Set { key: String },
    /// Show the stored key, masked.
    Show,
    /// Delete the stored key.
    Clear,
}

fn parse_tone(value: &str) -> Result<Tone, String> {
    Tone::parse(value).ok_or_else(|| format!("expected accept or reject, got {value:?}"))
}

#[cfg(feature = "web")]
fn parse_theme(value: &str) -> Result<wordsmith_rs::web::WebTheme, String> {
    wordsmith_rs::web::WebTheme::parse(value)
        .ok_or_else(|| format!("expected dark or light, got {value:?}"))
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.command);
    let key_store = key_store(cli.key_file.clone())?;

    match cli.command {
        Command::Tools => handle_tools(cli.json),
        Command::Run {
            ref slug,
            ref input,
            tone,
            ref extra,
            ref api_key,
        } => {
            let kind = ToolKind::from_slug(slug).ok_or_else(|| {
                format!("Unknown tool {slug:?}; run `wordsmith tools` to list them")
            })?;
            let mut tool_input = ToolInput::new(input.join(" "));
            tool_input.tone = tone;
            tool_input.extra_instructions = extra.clone();
            let key = resolve_key(api_key.as_deref(), &key_store)?;
            let client = generation_client(&cli)?;
            let (suggestion, segments) =
                block_on(run_tool(&client, kind, &tool_input, key, &Locale::new(&cli.locale)))??;
            if cli.json {
                let payload = json!({
                    "tool": kind,
                    "suggestion": suggestion,
                    "segments": segments,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_suggestion(kind, &suggestion, &segments);
            }
            Ok(())
        }
        Command::Generate {
            ref prompt,
            ref schema,
            ref example,
            temperature,
            ref api_key,
        } => {
            let key = resolve_key(api_key.as_deref(), &key_store)?;
            let mut request =
                GenerationRequest::new(prompt.as_str(), schema.as_str(), example.as_str())
                    .with_api_key(key);
            request.temperature = temperature;
            let client = generation_client(&cli)?;
            let value = block_on(async move { client.generate_structured(&request).await })??;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Align {
            ref text,
            ref annotations,
        } => {
            let annotations: Vec<Annotation> = serde_json::from_str(annotations)
                .map_err(|err| format!("Failed to parse annotations: {err}"))?;
            let segments = align(text, &annotations);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&segments)?);
            } else {
                print_segments(&segments);
            }
            Ok(())
        }
        Command::Key(command) => handle_key(command, &key_store, cli.json),
        #[cfg(feature = "web")]
        Command::Serve { addr, theme } => {
            let client = generation_client(&cli)?;
            let config = wordsmith_rs::web::WebConfig {
                addr,
                theme,
                locale: Locale::new(&cli.locale),
            };
            block_on(wordsmith_rs::web::serve(config, client))??;
            Ok(())
        }
    }
}

fn init_tracing(command: &Command) {
    #[cfg(feature = "web")]
    let default_level = match command {
        Command::Serve { .. } => "info",
        _ => "warn",
    };
    #[cfg(not(feature = "web"))]
    let default_level = {
        let _ = command;
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

fn key_store(path: Option<PathBuf>) -> Result<KeyStore, Box<dyn Error>> {
    let path = match path {
        Some(path) => path,
        None => dirs::config_dir()
            .map(|dir| dir.join("wordsmith").join("api_key"))
            .ok_or("Could not determine a config directory; pass --key-file")?,
    };
    Ok(KeyStore::new(path))
}

/// Flag or `GEMINI_API_KEY` first, then the key file.
fn resolve_key(explicit: Option<&str>, store: &KeyStore) -> Result<ApiKey, Box<dyn Error>> {
    if let Some(raw) = explicit {
        return Ok(ApiKey::parse(raw)?);
    }
    store.load()?.ok_or_else(|| {
        format!(
            "No API key found. Pass --api-key, set GEMINI_API_KEY, or run `wordsmith key set <key>` (key file: {})",
            store.path().display()
        )
        .into()
    })
}

fn generation_client(cli: &Cli) -> Result<GenerationClient, Box<dyn Error>> {
    let model = GeminiModel::new(GeminiConfig {
        base_url: cli.base_url.clone(),
        model: cli.model.clone(),
        ..GeminiConfig::default()
    })?;
    let client = GenerationClient::new(Arc::new(model));
    Ok(match &cli.debug_log {
        Some(path) => client.with_debug_sink(Arc::new(FileSink::new(path.clone()))),
        None => client,
    })
}

async fn run_tool(
    client: &GenerationClient,
    kind: ToolKind,
    input: &ToolInput,
    key: ApiKey,
    locale: &Locale,
) -> Result<(Suggestion, Vec<Segment>), Box<dyn Error>> {
    let spec = kind.prompt(input, &[], locale)?;
    let request = GenerationRequest::new(spec.prompt, spec.schema_description, spec.example_format)
        .with_api_key(key);
    let value = client.generate_structured(&request).await?;
    let suggestion = kind.interpret(value, input)?;
    let segments = suggestion.segments();
    Ok((suggestion, segments))
}

fn handle_tools(as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        let payload: Vec<_> = TOOL_REGISTRY
            .iter()
            .map(|info| {
                json!({
                    "slug": info.slug,
                    "title": info.title,
                    "description": info.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    let width = TOOL_REGISTRY
        .iter()
        .map(|info| info.slug.len())
        .max()
        .unwrap_or(4)
        .max("SLUG".len());
    println!("{:<width$}  {}", "SLUG", "DESCRIPTION", width = width);
    println!("{:-<width$}  {}", "", "-----------", width = width);
    for info in TOOL_REGISTRY.iter() {
        println!("{:<width$}  {}", info.slug, info.description, width = width);
    }
    Ok(())
}

fn handle_key(command: KeyCommand, store: &KeyStore, as_json: bool) -> Result<(), Box<dyn Error>> {
    match command {
        KeyCommand::Set { key } => {
            let key = ApiKey::parse(&key)?;
            store.save(&key)?;
            println!("Saved {} to {}", key.masked(), store.path().display());
        }
        KeyCommand::Show => {
            let key = store.load()?;
            if as_json {
                let payload = json!({
                    "path": store.path().display().to_string(),
                    "key": key.as_ref().map(ApiKey::masked),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                match key {
                    Some(key) => println!("{} ({})", key.masked(), store.path().display()),
                    None => println!("No key stored at {}", store.path().display()),
                }
            }
        }
        KeyCommand::Clear => {
            if store.clear()? {
                println!("Removed {}", store.path().display());
            } else {
                println!("No key stored at {}", store.path().display());
            }
        }
    }
    Ok(())
}

fn print_suggestion(kind: ToolKind, suggestion: &Suggestion, segments: &[Segment]) {
    println!("{}", kind.info().title);
    if let Some(original) = &suggestion.original {
        println!("Original: {original}");
    }
    let mut body = segments_markdown(segments);
    if let Some(detail) = &suggestion.detail {
        body.push_str(&format!("\n\n*{detail}*"));
    }
    body.push_str(&annotation_notes(segments));
    render_markdown_block(&body);
}

fn print_segments(segments: &[Segment]) {
    let mut body = segments_markdown(segments);
    body.push_str(&annotation_notes(segments));
    render_markdown_block(&body);
}

fn segments_markdown(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Plain { content } => content.clone(),
            Segment::Annotated { content, .. } => format!("**{content}**"),
        })
        .collect()
}

fn annotation_notes(segments: &[Segment]) -> String {
    let notes: Vec<String> = segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Annotated { content, reasoning } if !reasoning.trim().is_empty() => {
                Some(format!("- **{content}**: {reasoning}"))
            }
            _ => None,
        })
        .collect();
    if notes.is_empty() {
        String::new()
    } else {
        format!("\n\n{}", notes.join("\n"))
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
