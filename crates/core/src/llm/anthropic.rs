use crate::config::Settings;
use crate::domain::record::RenderedHtml;
use crate::llm::error::{GenerationStage, NarrativeError};
use crate::llm::json;
use crate::llm::{NarrativeContext, NarrativeGenerator, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_TAKEAWAYS: &str = "emit_takeaways";

#[derive(Debug, Clone)]
pub struct AnthropicNarrator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicNarrator {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(
                NarrativeError::new(Provider::Anthropic, GenerationStage::Http, format!("status={status}"))
                    .with_raw(text, raw_response_json)
                    .into(),
            );
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    /// Retries once with a larger token ceiling if the model stopped on `max_tokens`.
    async fn create_message_with_retry(
        &self,
        ctx: &NarrativeContext,
        make_req: impl Fn(u32) -> CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let (raw_json, res) = self.create_message(make_req(self.max_tokens)).await?;
        if !matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            return Ok((raw_json, res));
        }

        let bumped = self.max_tokens.saturating_mul(2).max(2048);
        tracing::warn!(
            date = %ctx.date,
            slot = %ctx.slot,
            from = self.max_tokens,
            to = bumped,
            "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
        );
        self.create_message(make_req(bumped)).await
    }

    fn takeaways_tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "minItems": 3,
                    "maxItems": 5,
                    "items": {"type": "string"}
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_TAKEAWAYS,
            description: "Emit the day's key takeaways as short plain-text sentences",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_TAKEAWAYS,
        }
    }

    fn narrative_system_prompt() -> String {
        [
            "You are a market commentator writing intraday notes for the Korean stock market.",
            "Write 2-4 short paragraphs as an HTML fragment.",
            "Use only <p>, <ul>, <li>, <strong> and <em> tags. Do not use Markdown.",
            "Do not wrap the output in code fences. Do not include <html>, <head> or <body>.",
            "Never start a line with '#' and never write a line consisting only of '---'.",
            "Only use the numbers provided; do not invent prices.",
        ]
        .join("\n")
    }

    fn narrative_user_prompt(ctx: &NarrativeContext) -> String {
        let task = if ctx.slot.is_close() {
            format!("Summarize the {} session close.", ctx.slot.session())
        } else {
            format!(
                "Analyze the {} session open and its highlights.",
                ctx.slot.session()
            )
        };
        format!(
            "Task: {task}\n\nTrading day facts JSON:\n{}",
            ctx.facts_json()
        )
    }

    fn takeaways_system_prompt() -> String {
        [
            "You summarize a full Korean stock market trading day.",
            "Return 3-5 key takeaways, each a single plain-text sentence without markup.",
            "Return ONLY JSON of the form {\"items\": [\"...\", \"...\"]}.",
        ]
        .join("\n")
    }

    fn takeaways_user_prompt(ctx: &NarrativeContext) -> String {
        format!(
            "Task: list the key takeaways for {} after the afternoon close.\n\nTrading day facts JSON:\n{}",
            ctx.date,
            ctx.facts_json()
        )
    }

    fn repair_prompt(previous_output: &str) -> String {
        format!(
            "Your previous message was NOT valid JSON.\n\n\
TASK: Output ONLY a single JSON object of the form {{\"items\": [\"...\"]}} with 3 to 5 strings.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Use double quotes for all JSON strings.\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_takeaways(res: &CreateMessageResponse) -> anyhow::Result<Option<Vec<String>>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_TAKEAWAYS {
                    let parsed = serde_json::from_value::<TakeawaysInput>(input.clone())
                        .context("failed to decode tool_use.input into takeaways")?;
                    return json::validate_takeaways(parsed.items).map(Some);
                }
            }
        }
        Ok(None)
    }

    async fn repair_takeaways(
        &self,
        ctx: &NarrativeContext,
        previous_text: String,
        previous_err: anyhow::Error,
    ) -> anyhow::Result<Vec<String>> {
        tracing::warn!(
            date = %ctx.date,
            error = %previous_err,
            "takeaways output invalid; attempting one repair"
        );

        let repair_req = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(Self::takeaways_system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::repair_prompt(&previous_text),
            }],
            tools: None,
            tool_choice: None,
        };
        let (repair_raw_json, repair_res) = self.create_message(repair_req).await?;
        let repair_text = Self::response_text(&repair_res);
        json::parse_takeaways(&repair_text).map_err(|err| {
            NarrativeError::new(
                Provider::Anthropic,
                GenerationStage::TakeawaysAfterRepair,
                format!("first_error={previous_err}; final_error={err}"),
            )
            .with_raw(repair_text, Some(repair_raw_json))
            .into()
        })
    }
}

#[async_trait::async_trait]
impl NarrativeGenerator for AnthropicNarrator {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn event_narrative(&self, ctx: &NarrativeContext) -> anyhow::Result<RenderedHtml> {
        let make_req = |max_tokens: u32| CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::narrative_system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::narrative_user_prompt(ctx),
            }],
            tools: None,
            tool_choice: None,
        };

        let (raw_json, res) = self.create_message_with_retry(ctx, make_req).await?;
        let text = Self::response_text(&res);
        let html = RenderedHtml::new(json::strip_code_fences(&text));
        if html.is_empty() {
            return Err(NarrativeError::new(
                Provider::Anthropic,
                GenerationStage::EmptyNarrative,
                format!("slot={}", ctx.slot),
            )
            .with_raw(text, Some(raw_json))
            .into());
        }
        Ok(html)
    }

    async fn key_takeaways(&self, ctx: &NarrativeContext) -> anyhow::Result<Vec<String>> {
        let make_req = |max_tokens: u32| CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::takeaways_system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::takeaways_user_prompt(ctx),
            }],
            tools: Some(Self::takeaways_tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let (_raw_json, res) = self.create_message_with_retry(ctx, make_req).await?;

        // Tool output path.
        if let Some(items) = Self::response_tool_takeaways(&res)? {
            return Ok(items);
        }

        // Fallback to text (should be rare).
        let text = Self::response_text(&res);
        match json::parse_takeaways(&text) {
            Ok(items) => Ok(items),
            Err(err) => self.repair_takeaways(ctx, text, err).await,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
struct TakeawaysInput {
    items: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}
