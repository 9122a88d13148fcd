//! Prompt construction for LLM ranking judgments.
//!
//! Domain logic for rendering system/user prompt pairs. Provider-agnostic.

use serde::{Deserialize, Serialize};

/// Hard cap on the caller-supplied custom instruction, in characters.
pub const CUSTOM_INSTRUCTION_MAX_CHARS: usize = 100;

// =============================================================================
// Items
// =============================================================================

/// What kind of text is being ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingType {
    Submission,
    Comment,
}

impl RankingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingType::Submission => "submission",
            RankingType::Comment => "comment",
        }
    }
}

/// Optional authorship context shown to the judge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub member_names: Vec<String>,
}

/// One rankable item. Immutable once submitted; identity is by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingItem {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl RankingItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: ItemMetadata::default(),
        }
    }
}

// =============================================================================
// Built-in prompts
// =============================================================================

const DEFAULT_SUBMISSION_PROMPT: &str = "You are an experienced instructor evaluating student project submissions. \
Judge each submission on correctness, depth of understanding, clarity of presentation, \
and originality. Weigh substance over length. Rank the submissions from strongest to weakest.";

const DEFAULT_COMMENT_PROMPT: &str = "You are an experienced instructor evaluating peer-review comments. \
Judge each comment on specificity, constructiveness, accuracy, and how actionable it is \
for the author. Generic praise ranks below concrete, well-argued feedback. \
Rank the comments from most to least valuable.";

/// Fixed structural contract, always appended last so configuration can
/// never silently alter it.
const JSON_SHAPE_INSTRUCTION: &str = "Respond with only a JSON object of the form \
{\"reason\": \"<your justification>\", \"ranking\": [\"<item id>\", ...]} \
where \"ranking\" lists every given item id exactly once, best first. \
Do not invent ids, drop ids, or add any other fields or text.";

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// =============================================================================
// Builders
// =============================================================================

/// Build the system prompt for one judge call.
///
/// Layering: admin override for the ranking type (blank falls back to the
/// built-in default), then the caller's custom instruction verbatim, then
/// the fixed JSON-shape instruction.
pub fn build_system_prompt(
    ranking_type: RankingType,
    submission_override: &str,
    comment_override: &str,
    custom_instruction: Option<&str>,
) -> String {
    let override_text = match ranking_type {
        RankingType::Submission => submission_override,
        RankingType::Comment => comment_override,
    };
    let base = if override_text.trim().is_empty() {
        match ranking_type {
            RankingType::Submission => DEFAULT_SUBMISSION_PROMPT,
            RankingType::Comment => DEFAULT_COMMENT_PROMPT,
        }
    } else {
        override_text
    };

    let mut parts: Vec<&str> = vec![base];
    if let Some(instruction) = custom_instruction {
        if !instruction.trim().is_empty() {
            parts.push(instruction);
        }
    }
    parts.push(JSON_SHAPE_INSTRUCTION);
    parts.join("\n\n")
}

/// Serialize items into the user prompt: a one-line count header followed
/// by one delimited block per item.
pub fn build_user_prompt(items: &[RankingItem]) -> String {
    let mut out = format!("There are {} items to rank.\n", items.len());
    for item in items {
        out.push('\n');
        out.push_str(&render_item_block(item));
    }
    out
}

fn render_item_block(item: &RankingItem) -> String {
    let mut block = String::from("<item>\n");
    block.push_str(&format!("id: {}\n", escape_xml_chars(&item.id)));
    if let Some(group) = &item.metadata.group_name {
        block.push_str(&format!("group: {}\n", escape_xml_chars(group)));
    }
    if let Some(author) = &item.metadata.author_name {
        block.push_str(&format!("author: {}\n", escape_xml_chars(author)));
    }
    if !item.metadata.member_names.is_empty() {
        let members: Vec<String> = item
            .metadata
            .member_names
            .iter()
            .map(|m| escape_xml_chars(m))
            .collect();
        block.push_str(&format!("members: {}\n", members.join(", ")));
    }
    block.push_str("content:\n");
    block.push_str(&escape_xml_chars(item.content.trim()));
    block.push_str("\n</item>\n");
    block
}

// =============================================================================
// Debate round
// =============================================================================

/// One judge's position from the previous debate round.
#[derive(Debug, Clone, Serialize)]
pub struct AgentVerdict {
    pub provider_name: String,
    pub reason: String,
    pub ranking: Vec<String>,
}

/// Round-two user prompt: the items again, plus every peer's round-one
/// verdict, asking the judge to reconsider and produce a final ranking.
pub fn build_debate_user_prompt(items: &[RankingItem], peers: &[AgentVerdict]) -> String {
    let mut out = build_user_prompt(items);
    out.push_str("\nOther expert evaluators ranked these items independently:\n");
    for peer in peers {
        out.push_str("\n<peer_verdict>\n");
        out.push_str(&format!(
            "evaluator: {}\n",
            escape_xml_chars(&peer.provider_name)
        ));
        out.push_str(&format!(
            "ranking: {}\n",
            peer.ranking
                .iter()
                .map(|id| escape_xml_chars(id))
                .collect::<Vec<_>>()
                .join(" > ")
        ));
        out.push_str(&format!("reason: {}\n", escape_xml_chars(&peer.reason)));
        out.push_str("</peer_verdict>\n");
    }
    out.push_str(
        "\nConsider their arguments, then give your final ranking. \
         Change your position only where a peer's argument is genuinely stronger.\n",
    );
    out
}
