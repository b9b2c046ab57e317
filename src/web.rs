use crate::align::{Annotation, Segment, align};
use crate::generation::{GenerationClient, GenerationError, GenerationRequest};
use crate::keystore::{ApiKey, KeyStoreError};
use crate::prompt::{Locale, Tone};
use crate::session::{SessionError, SessionStore};
use crate::tools::{Suggestion, TOOL_REGISTRY, ToolError, ToolInfo, ToolInput, ToolKind};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use cookie::{Cookie, SameSite};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<AppState>;

const SESSION_COOKIE: &str = "wordsmith_session";
const THEME_COOKIE: &str = "wordsmith_theme";
const SESSION_ID_LEN: usize = 32;
const API_KEY_STORAGE_KEY: &str = "google_generative_ai_api_key";
const GENERATION_FAILED: &str = "Failed to generate structured output";

pub struct AppState {
    pub generation: GenerationClient,
    pub sessions: SessionStore,
    pub theme: WebTheme,
    pub locale: Locale,
}

impl AppState {
    pub fn new(generation: GenerationClient, theme: WebTheme, locale: Locale) -> Self {
        Self {
            generation,
            sessions: SessionStore::new(),
            theme,
            locale,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    #[default]
    Dark,
    Light,
}

impl WebTheme {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dark" => Some(WebTheme::Dark),
            "light" => Some(WebTheme::Light),
            _ => None,
        }
    }

    fn toggled(self) -> Self {
        match self {
            WebTheme::Dark => WebTheme::Light,
            WebTheme::Light => WebTheme::Dark,
        }
    }
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Dark => write!(f, "dark"),
            WebTheme::Light => write!(f, "light"),
        }
    }
}

/// Theme-dependent classes handed to every page.
#[derive(Debug, Clone, Copy)]
struct Chrome {
    theme: WebTheme,
    body_class: &'static str,
    main_class: &'static str,
    card_class: &'static str,
    muted_class: &'static str,
    headline_class: &'static str,
    input_class: &'static str,
    button_class: &'static str,
    tooltip_class: &'static str,
    toggle_label: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Dark => Self {
                theme,
                body_class: "dark bg-[#1B1917] text-white",
                main_class: "min-h-screen flex items-center justify-center",
                card_class: "p-8 border-2 rounded-lg border-[#A8A29D] bg-[#A8A29D]/10 transition-all duration-500 hover:scale-105",
                muted_class: "text-[#A8A29D]",
                headline_class: "text-3xl font-serif italic font-light text-[#A8A29D]",
                input_class: "w-full bg-transparent border-b-2 border-[#A8A29D] text-4xl font-serif text-center focus:outline-none",
                button_class: "p-2 rounded-full hover:bg-gray-800 text-[#A8A29D]",
                tooltip_class: "bg-gray-900 text-white border-gray-700",
                toggle_label: "Light mode",
            },
            WebTheme::Light => Self {
                theme,
                body_class: "bg-[#FAFAF9] text-[#1B1917]",
                main_class: "min-h-screen flex items-center justify-center",
                card_class: "p-8 border-2 rounded-lg border-[#A8A29D] bg-[#A8A29D]/5 transition-all duration-500 hover:scale-105",
                muted_class: "text-[#A8A29D]",
                headline_class: "text-3xl font-serif italic font-light text-[#A8A29D]",
                input_class: "w-full bg-transparent border-b-2 border-[#A8A29D] text-4xl font-serif text-center focus:outline-none",
                button_class: "p-2 rounded-full hover:bg-gray-100 text-[#A8A29D]",
                tooltip_class: "bg-gray-900 text-white border-gray-700",
                toggle_label: "Dark mode",
            },
        }
    }

    fn toggle_href(&self, return_to: &str) -> String {
        format!(
            "/theme?set={}&return={}",
            self.theme.toggled(),
            utf8_percent_encode(return_to, NON_ALPHANUMERIC)
        )
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub theme: WebTheme,
    pub locale: Locale,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            theme: WebTheme::default(),
            locale: Locale::default(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig, generation: GenerationClient) -> Result<(), WebError> {
    let state = Arc::new(AppState::new(generation, config.theme, config.locale.clone()));
    let router = build_router(state);
    info!(
        %config.addr,
        theme = %config.theme,
        locale = %config.locale,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn generation_failed() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, GENERATION_FAILED)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::bad_request(value.body_text())
    }
}

impl From<KeyStoreError> for ApiError {
    fn from(value: KeyStoreError) -> Self {
        ApiError::unauthorized(value.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::EmptyInput => ApiError::bad_request(value.to_string()),
            SessionError::Busy => ApiError::new(StatusCode::CONFLICT, value.to_string()),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(value: GenerationError) -> Self {
        warn!(error = %value, "generation failed");
        match value {
            GenerationError::MissingApiKey | GenerationError::InvalidApiKey => {
                ApiError::unauthorized(value.to_string())
            }
            _ => ApiError::generation_failed(),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(value: ToolError) -> Self {
        match value {
            ToolError::EmptyInput | ToolError::MissingTone => {
                ApiError::bad_request(value.to_string())
            }
            ToolError::Template(_) | ToolError::UnexpectedShape(_) => {
                warn!(error = %value, "could not use model output");
                ApiError::generation_failed()
            }
        }
    }
}

fn build_router(state: SharedState) -> Router {
    let api_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let api = Router::new()
        .route("/generate", post(api_generate))
        .route("/tools/:slug", post(api_tool))
        .route("/align", post(api_align))
        .layer(api_cors);
    Router::new()
        .route("/", get(home))
        .route("/tools/:slug", get(tool_page))
        .route("/theme", get(set_theme))
        .route("/healthz", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

fn request_theme(state: &AppState, headers: &HeaderMap) -> WebTheme {
    cookie_value(headers, THEME_COOKIE)
        .and_then(|value| WebTheme::parse(&value))
        .unwrap_or(state.theme)
}

fn set_cookie_header(name: &'static str, value: String, http_only: bool) -> Option<HeaderValue> {
    let cookie = Cookie::build((name, value))
        .path("/")
        .http_only(http_only)
        .same_site(SameSite::Lax)
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

fn new_session_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

fn is_valid_session_id(value: &str) -> bool {
    value.len() == SESSION_ID_LEN && value.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "wordsmith-web" }))
}

struct ToolCard {
    href: String,
    title: &'static str,
    description: &'static str,
}

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<!DOCTYPE html>
<html lang="en" class="{% if chrome.theme == WebTheme::Dark %}dark{% endif %}">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Whimsical Wordsmith</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{{ chrome.body_class }} transition-colors duration-300">
    <header class="absolute top-0 left-0 right-0 flex justify-between items-center p-6">
      <h1 class="{{ chrome.headline_class }}">Whimsical Wordsmith</h1>
      <a href="{{ toggle_href|safe }}" class="{{ chrome.button_class }}" aria-label="Toggle theme">{{ chrome.toggle_label }}</a>
    </header>
    <main class="{{ chrome.main_class }}">
      <div class="w-full max-w-4xl px-6 space-y-12">
        <p class="text-2xl font-serif leading-relaxed text-center {{ chrome.muted_class }}">A delightful collection of word tools to enhance your writing</p>
        <div class="grid md:grid-cols-2 gap-8 max-w-3xl mx-auto">
          {% for card in cards %}
          <a href="{{ card.href|safe }}" class="group">
            <div class="{{ chrome.card_class }} h-80 flex items-center">
              <div class="text-center space-y-4 w-full">
                <h2 class="text-2xl font-serif font-medium group-hover:text-blue-400">{{ card.title }}</h2>
                <p class="text-lg font-serif leading-relaxed {{ chrome.muted_class }}">{{ card.description }}</p>
              </div>
            </div>
          </a>
          {% endfor %}
        </div>
      </div>
    </main>
  </body>
</html>"#
)]
struct HomeTemplate {
    chrome: Chrome,
    toggle_href: String,
    cards: Vec<ToolCard>,
}

async fn home(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let theme = request_theme(&state, &headers);
    let chrome = Chrome::new(theme);
    let cards = TOOL_REGISTRY
        .iter()
        .map(|info| ToolCard {
            href: format!("/tools/{}", info.slug),
            title: info.title,
            description: info.description,
        })
        .collect();
    let template = HomeTemplate {
        chrome,
        toggle_href: chrome.toggle_href("/"),
        cards,
    };
    render_page(theme, template.render())
}

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<!DOCTYPE html>
<html lang="en" class="{% if chrome.theme == WebTheme::Dark %}dark{% endif %}">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{{ info.title }} • Whimsical Wordsmith</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    <style>
      .annotated { position: relative; cursor: pointer; text-decoration: underline dotted 2px; text-underline-offset: 4px; border-radius: 0.375rem; padding: 0 0.25rem; }
      .annotated:hover { background: rgba(214, 211, 209, 0.2); }
      .annotated .tooltip { display: none; position: absolute; bottom: 100%; left: 50%; transform: translateX(-50%); margin-bottom: 0.75rem; width: 16rem; padding: 0.75rem 1rem; border-radius: 0.75rem; border-width: 1px; font-size: 1rem; line-height: 1.6; text-align: center; pointer-events: none; z-index: 50; }
      .annotated:hover .tooltip { display: block; }
      @keyframes shake { 0%, 100% { transform: translateX(0); } 25% { transform: translateX(-5px); } 75% { transform: translateX(5px); } }
      .animate-shake { animation: shake 0.5s ease-in-out; }
    </style>
  </head>
  <body class="{{ chrome.body_class }} transition-colors duration-300">
    <header class="absolute top-0 left-0 right-0 flex justify-between items-center p-6">
      <a href="/" class="{{ chrome.button_class }}" aria-label="Back">&larr; Back</a>
      <h1 class="{{ chrome.headline_class }}">{{ info.title }}</h1>
      <a href="{{ toggle_href|safe }}" class="{{ chrome.button_class }}" aria-label="Toggle theme">{{ chrome.toggle_label }}</a>
    </header>
    <main id="tool" class="{{ chrome.main_class }}" data-slug="{{ info.slug }}" data-storage-key="{{ storage_key }}" data-tooltip-class="{{ chrome.tooltip_class }}">
      <div class="w-full max-w-2xl px-6 space-y-8">
        <p class="text-xl font-serif text-center {{ chrome.muted_class }}">{{ info.description }}</p>
        <form id="tool-form" class="space-y-4" autocomplete="off">
          <input id="tool-input" name="input" class="{{ chrome.input_class }}" placeholder="{{ info.placeholder }}" required />
          {% if show_tone %}
          <div class="flex justify-center gap-6 font-serif {{ chrome.muted_class }}">
            <label><input type="radio" name="tone" value="accept" checked /> Accept</label>
            <label><input type="radio" name="tone" value="reject" /> Reject</label>
          </div>
          {% endif %}
          {% if show_extra %}
          <input id="tool-extra" name="extraInstructions" class="w-full bg-transparent border-b border-[#A8A29D] font-serif text-center focus:outline-none" placeholder="Extra instructions (optional)" />
          {% endif %}
          <div class="flex justify-center">
            <button type="submit" class="{{ chrome.button_class }} font-serif text-lg">Transform</button>
          </div>
        </form>
        <div id="tool-loading" class="text-xl font-serif text-center animate-pulse {{ chrome.muted_class }}" hidden>{{ info.loading_text }}</div>
        <div id="tool-result" class="text-3xl font-serif leading-relaxed text-center p-8 rounded-lg border-2 border-[#A8A29D] relative" hidden>
          <div class="absolute top-4 right-4 flex gap-2">
            <button id="tool-copy" type="button" class="{{ chrome.button_class }} text-sm" aria-label="Copy to clipboard">Copy</button>
            <button id="tool-refresh" type="button" class="{{ chrome.button_class }} text-sm" aria-label="Get another version">Another</button>
          </div>
          <div id="tool-output"></div>
          <div id="tool-detail" class="text-lg mt-4 {{ chrome.muted_class }}"></div>
        </div>
        <div id="tool-error" class="flex justify-center animate-shake text-2xl font-serif text-[#EF4444]" hidden>Let&apos;s try again</div>
        <div class="flex justify-center">
          <button id="forget-key" type="button" class="text-xs {{ chrome.muted_class }} underline">Forget stored API key</button>
        </div>
      </div>
    </main>
    <script>
      (() => {
        const root = document.getElementById("tool");
        const storageKey = root.dataset.storageKey;
        const tooltipClass = root.dataset.tooltipClass;
        const form = document.getElementById("tool-form");
        const input = document.getElementById("tool-input");
        const extra = document.getElementById("tool-extra");
        const loading = document.getElementById("tool-loading");
        const result = document.getElementById("tool-result");
        const output = document.getElementById("tool-output");
        const detail = document.getElementById("tool-detail");
        const failure = document.getElementById("tool-error");
        const copyButton = document.getElementById("tool-copy");
        let busy = false;
        let current = null;
        let timer = null;

        function apiKey() {
          let key = window.localStorage.getItem(storageKey);
          if (!key) {
            key = (window.prompt("Enter your Google Generative AI API key") || "").trim();
            if (key.length < 10) return null;
            window.localStorage.setItem(storageKey, key);
          }
          return key;
        }

        function selectedTone() {
          const checked = document.querySelector("input[name=tone]:checked");
          return checked ? checked.value : null;
        }

        function renderSegments(segments, visible) {
          output.replaceChildren();
          let remaining = visible;
          for (const segment of segments) {
            if (remaining <= 0) break;
            const chars = Array.from(segment.content);
            const text = chars.slice(0, remaining).join("");
            remaining -= chars.length;
            if (segment.kind === "annotated") {
              const span = document.createElement("span");
              span.className = "annotated";
              span.textContent = text;
              if (segment.reasoning) {
                const tip = document.createElement("span");
                tip.className = "tooltip " + tooltipClass;
                tip.textContent = segment.reasoning;
                span.appendChild(tip);
              }
              output.appendChild(span);
            } else {
              output.appendChild(document.createTextNode(text));
            }
          }
        }

        function typewrite(segments) {
          clearInterval(timer);
          const total = segments.reduce((count, segment) => count + Array.from(segment.content).length, 0);
          let shown = 0;
          renderSegments(segments, shown);
          timer = setInterval(() => {
            shown += 1;
            renderSegments(segments, shown);
            if (shown >= total) clearInterval(timer);
          }, 25);
        }

        async function submit(refresh) {
          if (busy || !input.value.trim()) return;
          const key = apiKey();
          if (!key) return;
          busy = true;
          failure.hidden = true;
          loading.hidden = false;
          if (!refresh) result.hidden = true;
          try {
            const response = await fetch("/api/tools/" + root.dataset.slug, {
              method: "POST",
              headers: { "Content-Type": "application/json" },
              body: JSON.stringify({
                input: input.value,
                tone: selectedTone(),
                extraInstructions: extra ? extra.value : null,
                refresh: refresh,
                apiKey: key,
              }),
            });
            if (response.status === 401) {
              window.localStorage.removeItem(storageKey);
            }
            if (!response.ok) throw new Error("request failed with " + response.status);
            const payload = await response.json();
            current = payload.suggestion;
            detail.textContent = current.detail || "";
            result.hidden = false;
            typewrite(payload.segments);
          } catch (err) {
            console.error(err);
            current = null;
            result.hidden = true;
            failure.hidden = false;
          } finally {
            busy = false;
            loading.hidden = true;
          }
        }

        form.addEventListener("submit", (event) => {
          event.preventDefault();
          submit(false);
        });
        input.addEventListener("input", () => {
          current = null;
          result.hidden = true;
          failure.hidden = true;
        });
        document.getElementById("tool-refresh").addEventListener("click", () => {
          if (current) submit(true);
        });
        copyButton.addEventListener("click", async () => {
          if (!current) return;
          try {
            await navigator.clipboard.writeText(current.text);
            copyButton.textContent = "Copied!";
            setTimeout(() => { copyButton.textContent = "Copy"; }, 2000);
          } catch (err) {
            console.error("Failed to copy:", err);
          }
        });
        document.getElementById("forget-key").addEventListener("click", () => {
          window.localStorage.removeItem(storageKey);
        });
      })();
    </script>
  </body>
</html>"#
)]
struct ToolTemplate {
    chrome: Chrome,
    info: &'static ToolInfo,
    toggle_href: String,
    storage_key: &'static str,
    show_tone: bool,
    show_extra: bool,
}

async fn tool_page(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Response {
    let theme = request_theme(&state, &headers);
    let Some(kind) = ToolKind::from_slug(&slug) else {
        return (
            StatusCode::NOT_FOUND,
            Html(render_error_page(theme, format!("No tool named {slug:?}"))),
        )
            .into_response();
    };
    let info = kind.info();
    let chrome = Chrome::new(theme);
    let template = ToolTemplate {
        chrome,
        info,
        toggle_href: chrome.toggle_href(&format!("/tools/{}", info.slug)),
        storage_key: API_KEY_STORAGE_KEY,
        show_tone: kind == ToolKind::DramaticDeclarations,
        show_extra: kind == ToolKind::AcronymAlchemist,
    };
    render_page(theme, template.render())
}

fn render_page(theme: WebTheme, rendered: askama::Result<String>) -> Response {
    Html(rendered.unwrap_or_else(|err| render_error_page(theme, err.to_string()))).into_response()
}

#[derive(Debug, Deserialize)]
struct ThemeParams {
    set: Option<String>,
    #[serde(rename = "return")]
    return_to: Option<String>,
}

async fn set_theme(Query(params): Query<ThemeParams>) -> Response {
    let theme = params
        .set
        .as_deref()
        .and_then(WebTheme::parse)
        .unwrap_or_default();
    let location = params
        .return_to
        .filter(|path| path.starts_with('/') && !path.starts_with("//"))
        .unwrap_or_else(|| "/".to_string());
    let mut response = Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location)
        .body(axum::body::Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    if let Some(cookie) = set_cookie_header(THEME_COOKIE, theme.to_string(), false) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    prompt: Option<String>,
    schema_description: Option<String>,
    example_format: Option<String>,
    temperature: Option<f32>,
    api_key: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn api_generate(
    State(state): State<SharedState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let (Some(prompt), Some(schema_description), Some(example_format)) = (
        required(body.prompt),
        required(body.schema_description),
        required(body.example_format),
    ) else {
        return Err(ApiError::bad_request(
            "Prompt, schemaDescription, and exampleFormat are required",
        ));
    };
    let api_key = ApiKey::parse(body.api_key.as_deref().unwrap_or_default())?;
    let mut request =
        GenerationRequest::new(prompt, schema_description, example_format).with_api_key(api_key);
    request.temperature = body.temperature;
    let value = state
        .generation
        .generate_structured(&request)
        .await
        .map_err(|err| {
            warn!(error = %err, "structured generation failed");
            ApiError::generation_failed()
        })?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolRequestBody {
    #[serde(default)]
    input: String,
    #[serde(default)]
    tone: Option<Tone>,
    #[serde(default)]
    extra_instructions: Option<String>,
    #[serde(default)]
    refresh: bool,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolResponsePayload {
    tool: ToolKind,
    suggestion: Suggestion,
    segments: Vec<Segment>,
    history: Vec<String>,
}

async fn api_tool(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Result<Json<ToolRequestBody>, JsonRejection>,
) -> Response {
    let existing = cookie_value(&headers, SESSION_COOKIE).filter(|id| is_valid_session_id(id));
    let issued = existing.is_none();
    let session_id = existing.unwrap_or_else(new_session_id);

    let mut response = match run_tool(&state, &slug, &session_id, body).await {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => err.into_response(),
    };
    if issued {
        if let Some(cookie) = set_cookie_header(SESSION_COOKIE, session_id, true) {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
    }
    response
}

async fn run_tool(
    state: &AppState,
    slug: &str,
    session_id: &str,
    body: Result<Json<ToolRequestBody>, JsonRejection>,
) -> Result<ToolResponsePayload, ApiError> {
    let tool = ToolKind::from_slug(slug)
        .ok_or_else(|| ApiError::not_found(format!("No tool named {slug:?}")))?;
    let Json(body) = body?;
    let api_key = ApiKey::parse(body.api_key.as_deref().unwrap_or_default())?;
    let input = ToolInput {
        input: body.input,
        tone: body.tone,
        extra_instructions: body.extra_instructions,
    };

    let ticket = state.sessions.with_session(session_id, tool, |session| {
        session.set_input(&input.input);
        session.begin()
    })?;

    let history: &[String] = if body.refresh { &ticket.history } else { &[] };
    let outcome = match tool.prompt(&input, history, &state.locale) {
        Ok(spec) => {
            let request =
                GenerationRequest::new(spec.prompt, spec.schema_description, spec.example_format)
                    .with_api_key(api_key);
            match state.generation.generate_structured(&request).await {
                Ok(value) => tool.interpret(value, &input).map_err(ApiError::from),
                Err(err) => Err(ApiError::from(err)),
            }
        }
        Err(err) => Err(ApiError::from(err)),
    };

    let (suggestion, history) = state.sessions.with_session(session_id, tool, |session| {
        let settled = session.finish(ticket, outcome);
        (settled, session.history().entries().to_vec())
    });
    let suggestion = suggestion?;
    info!(tool = %tool.slug(), history = history.len(), "generated suggestion");
    Ok(ToolResponsePayload {
        tool,
        segments: suggestion.segments(),
        suggestion,
        history,
    })
}

#[derive(Debug, Deserialize)]
struct AlignBody {
    text: String,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AlignPayload {
    segments: Vec<Segment>,
}

async fn api_align(
    body: Result<Json<AlignBody>, JsonRejection>,
) -> Result<Json<AlignPayload>, ApiError> {
    let Json(body) = body?;
    Ok(Json(AlignPayload {
        segments: align(&body.text, &body.annotations),
    }))
}

fn render_error_page(theme: WebTheme, message: impl Into<String>) -> String {
    let chrome = Chrome::new(theme);
    let message = html_escape(&message.into());
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Whimsical Wordsmith • Error</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{body_class}">
    <main class="{main_class}">
      <div class="text-center space-y-6">
        <h1 class="{headline_class}">Something went wrong</h1>
        <p class="text-xl font-serif {muted_class}">{message}</p>
        <a href="/" class="{button_class}">Back to home</a>
      </div>
    </main>
  </body>
</html>"#,
        body_class = chrome.body_class,
        main_class = chrome.main_class,
        headline_class = chrome.headline_class,
        muted_class = chrome.muted_class,
        button_class = chrome.button_class,
        message = message,
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{GeminiConfig, GeminiModel};
    use crate::generation::TextModel;
    use crate::generation::testing::ScriptedModel;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    const KEY: &str = "AIzaSyTestKey0001";

    fn test_state(responses: impl IntoIterator<Item = &'static str>) -> (SharedState, Arc<ScriptedModel>) {
        let model = Arc::new(ScriptedModel::replying(responses));
        let generation = GenerationClient::new(model.clone());
        let state = Arc::new(AppState::new(generation, WebTheme::Dark, Locale::default()));
        (state, model)
    }

    fn post_json(uri: &str, payload: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn session_cookie(response: &Response) -> String {
        let raw = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie issued")
            .to_str()
            .unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn home_lists_every_tool() {
        let (state, _) = test_state([]);
        let response = build_router(state)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let html = text_body(response).await;
        for info in TOOL_REGISTRY.iter() {
            assert!(html.contains(info.title), "missing {}", info.title);
            assert!(html.contains(&format!("/tools/{}", info.slug)));
        }
        assert!(html.contains("/theme?set=light&return=%2F\""));
    }

    #[tokio::test]
    async fn tool_pages_render_and_unknown_tools_404() {
        let (state, _) = test_state([]);
        let router = build_router(state);
        let response = router
            .clone()
            .oneshot(
                Request::get("/tools/dramatic-declarations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        let html = text_body(response).await;
        assert!(html.contains("name=\"tone\""));
        assert!(html.contains(API_KEY_STORAGE_KEY));

        let response = router
            .oneshot(Request::get("/tools/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn theme_cookie_round_trip() {
        let (state, _) = test_state([]);
        let router = build_router(state);
        let response = router
            .clone()
            .oneshot(
                Request::get("/theme?set=light&return=%2Ftools%2Facronym-alchemist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/tools/acronym-alchemist"
        );
        let cookie = session_cookie(&response);
        assert_eq!(cookie, "wordsmith_theme=light");

        let response = router
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let html = text_body(response).await;
        assert!(html.contains("bg-[#FAFAF9]"));
        assert!(html.contains("Dark mode"));
    }

    #[tokio::test]
    async fn theme_redirect_rejects_foreign_locations() {
        let (state, _) = test_state([]);
        let response = build_router(state)
            .oneshot(
                Request::get("/theme?set=dark&return=%2F%2Fevil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn generate_validates_fields_and_key() {
        let (state, model) = test_state([]);
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/generate",
                json!({"prompt": "p", "schemaDescription": "", "exampleFormat": "e", "apiKey": KEY}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Prompt, schemaDescription, and exampleFormat are required"
        );

        let response = router
            .oneshot(post_json(
                "/api/generate",
                json!({"prompt": "p", "schemaDescription": "s", "exampleFormat": "e"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(model.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn generate_returns_parsed_json_or_generic_failure() {
        let (state, _) = test_state([
            "```json\n{\"acronym\": \"HOPE\", \"meaning\": \"Holding Optimistic Possibilities Endlessly\"}\n```",
            "{\"acronym\": ",
        ]);
        let router = build_router(state);
        let body = json!({"prompt": "p", "schemaDescription": "s", "exampleFormat": "e", "apiKey": KEY});

        let response = router
            .clone()
            .oneshot(post_json("/api/generate", body.clone()))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(json_body(response).await["acronym"], "HOPE");

        let response = router
            .oneshot(post_json("/api/generate", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], GENERATION_FAILED);
    }

    #[tokio::test]
    async fn tool_endpoint_tracks_history_per_session() {
        let (state, model) = test_state([
            r#"{"word": "effervescent", "definition": "bubbly", "original": "very happy"}"#,
            r#"{"word": "jubilant", "definition": "joyful", "original": "very happy"}"#,
            r#"{"word": "crestfallen", "definition": "dejected", "original": "very sad"}"#,
        ]);
        let router = build_router(state.clone());
        let uri = "/api/tools/delightfully-different-words";

        let response = router
            .clone()
            .oneshot(post_json(uri, json!({"input": "happy", "apiKey": KEY})))
            .await
            .unwrap();
        assert!(response.status().is_success());
        let cookie = session_cookie(&response);
        let payload = json_body(response).await;
        assert_eq!(payload["suggestion"]["text"], "effervescent");
        assert_eq!(payload["history"], json!(["effervescent"]));
        assert_eq!(payload["segments"][0]["kind"], "plain");

        let mut refresh = post_json(uri, json!({"input": "happy", "refresh": true, "apiKey": KEY}));
        refresh
            .headers_mut()
            .insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        let response = router.clone().oneshot(refresh).await.unwrap();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let payload = json_body(response).await;
        assert_eq!(payload["history"], json!(["effervescent", "jubilant"]));
        assert!(model.prompts.lock()[1].0.contains("Previously suggested words: effervescent."));

        let mut changed = post_json(uri, json!({"input": "sad", "apiKey": KEY}));
        changed
            .headers_mut()
            .insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        let payload = json_body(router.oneshot(changed).await.unwrap()).await;
        assert_eq!(payload["history"], json!(["crestfallen"]));
    }

    #[tokio::test]
    async fn tool_endpoint_aligns_eloquent_segments() {
        let (state, _) = test_state([
            r#"[{"word": "I find myself in", "reasoning": "formal"}, {"word": "profound hunger", "reasoning": "deep"}]"#,
        ]);
        let response = build_router(state)
            .oneshot(post_json(
                "/api/tools/eloquent-expressions",
                json!({"input": "I am hungry", "apiKey": KEY}),
            ))
            .await
            .unwrap();
        let payload: ToolResponsePayload = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(payload.tool, ToolKind::EloquentExpressions);
        assert_eq!(payload.suggestion.text, "I find myself in profound hunger");
        assert_eq!(
            payload.segments,
            vec![
                Segment::Annotated { content: "I find myself in".into(), reasoning: "formal".into() },
                Segment::Plain { content: " ".into() },
                Segment::Annotated { content: "profound hunger".into(), reasoning: "deep".into() },
            ]
        );
    }

    #[tokio::test]
    async fn tool_endpoint_error_statuses() {
        let (state, model) = test_state(["not json"]);
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(post_json("/api/tools/unknown", json!({"input": "x", "apiKey": KEY})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(post_json("/api/tools/acronym-alchemist", json!({"input": "hope", "apiKey": "short"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(post_json("/api/tools/acronym-alchemist", json!({"input": "  ", "apiKey": KEY})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(post_json("/api/tools/dramatic-declarations", json!({"input": "Lunch?", "apiKey": KEY})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(model.prompts.lock().is_empty());

        let response = router
            .oneshot(post_json("/api/tools/acronym-alchemist", json!({"input": "hope", "apiKey": KEY})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], GENERATION_FAILED);
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let (state, model) = test_state([]);
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(post_json("/api/tools/acronym-alchemist", json!({"apiKey": KEY})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "input must not be empty");

        for uri in ["/api/generate", "/api/tools/eloquent-expressions", "/api/align"] {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"text\": "))
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert!(json_body(response).await["error"].is_string(), "{uri}");
        }

        let response = router
            .oneshot(post_json("/api/align", json!({"annotations": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(model.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn tool_endpoint_rejects_overlapping_requests() {
        let (state, _) = test_state([]);
        let session_id = "a".repeat(SESSION_ID_LEN);
        state
            .sessions
            .with_session(&session_id, ToolKind::AcronymAlchemist, |session| {
                session.set_input("hope");
                session.begin()
            })
            .unwrap();

        let mut request = post_json("/api/tools/acronym-alchemist", json!({"input": "hope", "apiKey": KEY}));
        request.headers_mut().insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={session_id}")).unwrap(),
        );
        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn align_endpoint_partitions_text() {
        let (state, _) = test_state([]);
        let response = build_router(state)
            .oneshot(post_json(
                "/api/align",
                json!({
                    "text": "the cat sat on the cat mat",
                    "annotations": [
                        {"word": "cat", "reasoning": "first"},
                        {"word": "cat", "reasoning": "second"}
                    ]
                }),
            ))
            .await
            .unwrap();
        let payload: AlignPayload = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(payload.segments.len(), 5);
        assert_eq!(payload.segments[3].reasoning(), Some("second"));
    }

    #[tokio::test]
    async fn gemini_model_talks_to_generate_content() {
        async fn fake_gemini(headers: HeaderMap, Json(body): Json<Value>) -> Response {
            if headers.get("x-goog-api-key").map(|v| v.as_bytes()) != Some(KEY.as_bytes()) {
                return (StatusCode::UNAUTHORIZED, "bad key").into_response();
            }
            let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
            Json(json!({
                "candidates": [{"content": {"parts": [{"text": format!("echo: {prompt}")}]}}]
            }))
            .into_response()
        }

        let app = Router::new().route(
            "/v1beta/models/:model",
            post(fake_gemini),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let model = GeminiModel::new(GeminiConfig {
            base_url: format!("http://{addr}"),
            ..GeminiConfig::default()
        })
        .unwrap();
        let key = ApiKey::parse(KEY).unwrap();
        let text = model.generate_text("hello", 0.3, Some(&key)).await.unwrap();
        assert_eq!(text, "echo: hello");

        let wrong = ApiKey::parse("AIzaSyWrongKey999").unwrap();
        let err = model.generate_text("hello", 0.3, Some(&wrong)).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidApiKey));
    }
}
