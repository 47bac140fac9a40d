//! `{{path}}` substitution and `{{#if path}}...{{else}}...{{/if}}` blocks over
//! a structured payload.
//!
//! Rendering never fails on payload shape: a missing value renders as an
//! empty string and is reported as a warning. Output depends only on the
//! template and the payload.

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::{
        channel::Channel,
        payload::Payload,
        template::{NotificationTemplate, RenderedContent},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderWarning {
    MissingValue { path: String },
    UndeclaredVariable { path: String },
    UnbalancedBlock { detail: String },
}

impl Display for RenderWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderWarning::MissingValue { path } => write!(f, "no value for '{}'", path),
            RenderWarning::UndeclaredVariable { path } => {
                write!(f, "'{}' is not a declared template variable", path)
            }
            RenderWarning::UnbalancedBlock { detail } => write!(f, "{}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutput {
    pub content: RenderedContent,
    pub warnings: Vec<RenderWarning>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    If {
        path: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

struct Block {
    path: String,
    then: Vec<Node>,
    otherwise: Vec<Node>,
    in_else: bool,
}

impl Block {
    fn target(&mut self) -> &mut Vec<Node> {
        if self.in_else {
            &mut self.otherwise
        } else {
            &mut self.then
        }
    }

    fn into_node(self) -> Node {
        Node::If {
            path: self.path,
            then: self.then,
            otherwise: self.otherwise,
        }
    }
}

fn push_node(root: &mut Vec<Node>, stack: &mut [Block], node: Node) {
    match stack.last_mut() {
        Some(block) => block.target().push(node),
        None => root.push(node),
    }
}

fn parse(source: &str, warnings: &mut Vec<RenderWarning>) -> Vec<Node> {
    let mut root = Vec::new();
    let mut stack: Vec<Block> = Vec::new();
    let mut rest = source;

    while !rest.is_empty() {
        let Some(open) = rest.find("{{") else {
            push_node(&mut root, &mut stack, Node::Text(rest.to_string()));
            break;
        };
        if open > 0 {
            push_node(&mut root, &mut stack, Node::Text(rest[..open].to_string()));
        }

        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            // Unterminated tag is kept verbatim.
            push_node(&mut root, &mut stack, Node::Text(rest[open..].to_string()));
            break;
        };

        let tag = after_open[..close].trim();
        rest = &after_open[close + 2..];

        if let Some(path) = tag.strip_prefix("#if ") {
            stack.push(Block {
                path: path.trim().to_string(),
                then: Vec::new(),
                otherwise: Vec::new(),
                in_else: false,
            });
        } else if tag == "else" {
            match stack.last_mut() {
                Some(block) if !block.in_else => block.in_else = true,
                _ => warnings.push(RenderWarning::UnbalancedBlock {
                    detail: "{{else}} outside of an {{#if}} block".to_string(),
                }),
            }
        } else if tag == "/if" {
            match stack.pop() {
                Some(block) => push_node(&mut root, &mut stack, block.into_node()),
                None => warnings.push(RenderWarning::UnbalancedBlock {
                    detail: "{{/if}} without a matching {{#if}}".to_string(),
                }),
            }
        } else if tag.is_empty() {
            push_node(&mut root, &mut stack, Node::Text("{{}}".to_string()));
        } else {
            push_node(&mut root, &mut stack, Node::Var(tag.to_string()));
        }
    }

    while let Some(block) = stack.pop() {
        warnings.push(RenderWarning::UnbalancedBlock {
            detail: format!("{{{{#if {}}}}} is never closed", block.path),
        });
        push_node(&mut root, &mut stack, block.into_node());
    }

    root
}

struct Context<'a> {
    payload: &'a Payload,
    declared: &'a BTreeSet<String>,
    escape_html: bool,
}

fn push_warning(warnings: &mut Vec<RenderWarning>, warning: RenderWarning) {
    if !warnings.contains(&warning) {
        warnings.push(warning);
    }
}

fn evaluate(
    nodes: &[Node],
    ctx: &Context<'_>,
    out: &mut String,
    warnings: &mut Vec<RenderWarning>,
) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => {
                if !ctx.declared.is_empty() && !ctx.declared.contains(path) {
                    push_warning(
                        warnings,
                        RenderWarning::UndeclaredVariable { path: path.clone() },
                    );
                }
                match ctx.payload.get_path(path) {
                    Some(value) => {
                        let text = value.to_display_string();
                        if ctx.escape_html {
                            out.push_str(&escape_html(&text));
                        } else {
                            out.push_str(&text);
                        }
                    }
                    None => push_warning(
                        warnings,
                        RenderWarning::MissingValue { path: path.clone() },
                    ),
                }
            }
            Node::If {
                path,
                then,
                otherwise,
            } => {
                let truthy = ctx.payload.get_path(path).is_some_and(Payload::is_truthy);
                let branch = if truthy { then } else { otherwise };
                evaluate(branch, ctx, out, warnings);
            }
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Renders one template string against `payload`.
pub fn render_text(
    source: &str,
    payload: &Payload,
    declared: &BTreeSet<String>,
    escape_html: bool,
    warnings: &mut Vec<RenderWarning>,
) -> String {
    let nodes = parse(source, warnings);
    let ctx = Context {
        payload,
        declared,
        escape_html,
    };

    let mut out = String::with_capacity(source.len());
    evaluate(&nodes, &ctx, &mut out, warnings);
    out
}

/// Renders `template` for its own channel.
pub fn render(template: &NotificationTemplate, payload: &Payload) -> DispatchResult<RenderOutput> {
    render_for_channel(template, &template.channel, payload)
}

/// Renders `template` for `channel`.
///
/// The body matching the template's own channel is authoritative: it is
/// required, and it is what any other channel falls back to when the
/// template has no body of that channel's kind. Email gets the subject, the
/// HTML body with substituted values escaped, and a plain-text alternative.
/// Every other channel gets plain text.
pub fn render_for_channel(
    template: &NotificationTemplate,
    channel: &Channel,
    payload: &Payload,
) -> DispatchResult<RenderOutput> {
    if !template.is_active {
        return Err(DispatchError::TemplateInactive(template.id.clone()));
    }

    let html = template.email_body_html.as_deref();
    let text = template.sms_body.as_deref();
    let authoritative = if template.channel.is_email() { html } else { text };
    let no_body = || {
        DispatchError::Validation(format!(
            "template '{}' has no body for its {} channel",
            template.id, template.channel
        ))
    };
    if authoritative.is_none() {
        return Err(no_body());
    }

    let declared = &template.variables;
    let mut warnings = Vec::new();

    let content = if channel.is_email() {
        let subject = template
            .email_subject
            .as_deref()
            .map(|s| render_text(s, payload, declared, false, &mut warnings));

        let (body, text_body) = match (html, text) {
            (Some(html), _) => {
                let body = render_text(html, payload, declared, true, &mut warnings);
                let plain =
                    render_text(&html_to_text(html), payload, declared, false, &mut warnings);
                (body, Some(tidy_text(&plain)))
            }
            (None, Some(text)) => {
                let body = render_text(text, payload, declared, false, &mut warnings);
                (body, None)
            }
            (None, None) => return Err(no_body()),
        };

        RenderedContent {
            channel: channel.clone(),
            subject,
            body,
            text_body,
        }
    } else {
        let body = match (text, html) {
            (Some(text), _) => render_text(text, payload, declared, false, &mut warnings),
            (None, Some(html)) => tidy_text(&render_text(
                &html_to_text(html),
                payload,
                declared,
                false,
                &mut warnings,
            )),
            (None, None) => return Err(no_body()),
        };

        RenderedContent {
            channel: channel.clone(),
            subject: None,
            body,
            text_body: None,
        }
    };

    for warning in &warnings {
        warn!(template_id = %template.id, warning = %warning, "Template render warning");
    }
    debug!(
        template_id = %template.id,
        template_channel = %template.channel,
        channel = %channel,
        warnings = warnings.len(),
        "Template rendered"
    );

    Ok(RenderOutput { content, warnings })
}

const BLOCK_TAGS: &[&str] = &["p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6"];

/// Plain-text version of an HTML template source. Tags are dropped, block
/// tags start a new line and the common entities are decoded. `{{...}}`
/// markup is left alone so the result can still be rendered.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars();
    while let Some(c) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let mut tag = String::new();
        for t in chars.by_ref() {
            if t == '>' {
                break;
            }
            tag.push(t);
        }
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if BLOCK_TAGS.contains(&name.as_str()) {
            out.push('\n');
        }
    }

    out.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Collapses whitespace inside lines and drops blank lines.
fn tidy_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Template lookup plus rendering.
#[derive(Clone)]
pub struct TemplateRenderer {
    store: Arc<dyn NotificationStore>,
}

impl TemplateRenderer {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, template_id: &str) -> DispatchResult<NotificationTemplate> {
        self.store
            .get_template(template_id)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(template_id.to_string()))
    }

    pub async fn render_by_id(
        &self,
        template_id: &str,
        channel: &Channel,
        payload: &Payload,
    ) -> DispatchResult<RenderOutput> {
        let template = self.load(template_id).await?;
        render_for_channel(&template, channel, payload)
    }
}
