use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};
use serde::{Deserialize, Serialize};

use crate::helper::sanitization_helpers;

/// The rich document shape staged into richtext props. Collaborators treat
/// this as opaque JSON; only the conversion entry point is contractual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichDocument {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub content: Vec<RichNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RichNode {
    Heading { level: u8, content: Vec<InlineNode> },
    Paragraph { content: Vec<InlineNode> },
    CodeBlock { language: Option<String>, text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InlineNode {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        marks: Vec<String>,
    },
    Link {
        href: String,
        text: String,
    },
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Converts markdown into a [`RichDocument`]. The input is sanitized first:
/// raw HTML is escaped outside fenced code blocks, so markup smuggled into a
/// staged text field can never surface as live HTML downstream.
pub fn text_to_rich_document(markdown: &str) -> RichDocument {
    let sanitized = sanitization_helpers::sanitize_markdown_content(markdown);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut nodes: Vec<RichNode> = Vec::new();
    let mut inline: Vec<InlineNode> = Vec::new();
    let mut marks: Vec<String> = Vec::new();
    let mut heading: Option<u8> = None;
    let mut code_language: Option<String> = None;
    let mut code_text = String::new();
    let mut in_code_block = false;
    let mut link_href: Option<String> = None;
    let mut link_text = String::new();

    let flush_inline = |inline: &mut Vec<InlineNode>, heading: &mut Option<u8>, nodes: &mut Vec<RichNode>| {
        if inline.is_empty() {
            return;
        }
        let content = std::mem::take(inline);
        match heading.take() {
            Some(level) => nodes.push(RichNode::Heading { level, content }),
            None => nodes.push(RichNode::Paragraph { content }),
        }
    };

    for event in Parser::new_ext(&sanitized, options) {
        match event {
            Event::Start(Tag::Heading(level, _, _)) => {
                flush_inline(&mut inline, &mut heading, &mut nodes);
                heading = Some(heading_level(level));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                flush_inline(&mut inline, &mut heading, &mut nodes);
                in_code_block = true;
                code_language = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
            }
            Event::End(Tag::CodeBlock(_)) => {
                in_code_block = false;
                nodes.push(RichNode::CodeBlock {
                    language: code_language.take(),
                    text: std::mem::take(&mut code_text),
                });
            }
            Event::Start(Tag::Strong) => marks.push("strong".to_string()),
            Event::Start(Tag::Emphasis) => marks.push("em".to_string()),
            Event::Start(Tag::Strikethrough) => marks.push("strike".to_string()),
            Event::End(Tag::Strong) | Event::End(Tag::Emphasis) | Event::End(Tag::Strikethrough) => {
                marks.pop();
            }
            Event::Start(Tag::Link(_, href, _)) => {
                link_href = Some(href.to_string());
                link_text.clear();
            }
            Event::End(Tag::Link(_, _, _)) => {
                if let Some(href) = link_href.take() {
                    inline.push(InlineNode::Link {
                        href,
                        text: std::mem::take(&mut link_text),
                    });
                }
            }
            Event::Text(text) => {
                if in_code_block {
                    code_text.push_str(&text);
                } else if link_href.is_some() {
                    link_text.push_str(&text);
                } else {
                    inline.push(InlineNode::Text {
                        text: text.to_string(),
                        marks: marks.clone(),
                    });
                }
            }
            Event::Code(text) => {
                inline.push(InlineNode::Text {
                    text: text.to_string(),
                    marks: vec!["code".to_string()],
                });
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_code_block {
                    code_text.push('\n');
                } else {
                    inline.push(InlineNode::Text {
                        text: " ".to_string(),
                        marks: marks.clone(),
                    });
                }
            }
            Event::End(Tag::Heading(_, _, _))
            | Event::End(Tag::Paragraph)
            | Event::End(Tag::Item) => {
                flush_inline(&mut inline, &mut heading, &mut nodes);
            }
            _ => {}
        }
    }
    flush_inline(&mut inline, &mut heading, &mut nodes);

    RichDocument {
        doc_type: "doc".to_string(),
        content: nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_headings_and_paragraphs() {
        let doc = text_to_rich_document("# Title\n\nBody with **bold** text.");
        assert_eq!(doc.doc_type, "doc");
        assert!(matches!(&doc.content[0], RichNode::Heading { level: 1, .. }));
        match &doc.content[1] {
            RichNode::Paragraph { content } => {
                assert!(content.iter().any(|node| matches!(
                    node,
                    InlineNode::Text { marks, .. } if marks.contains(&"strong".to_string())
                )));
            }
            other => panic!("expected paragraph, got {:?}", other),
        }
    }

    #[test]
    fn keeps_code_blocks_verbatim() {
        let doc = text_to_rich_document("```rust\nlet x = 1;\n```");
        match &doc.content[0] {
            RichNode::CodeBlock { language, text } => {
                assert_eq!(language.as_deref(), Some("rust"));
                assert!(text.contains("let x = 1;"));
            }
            other => panic!("expected code block, got {:?}", other),
        }
    }

    #[test]
    fn inline_html_survives_as_inert_text() {
        // Without sanitization pulldown would emit an Html event and the
        // markup would be dropped; escaping first keeps it as plain text.
        let doc = text_to_rich_document("hello <b>there</b>");
        match &doc.content[0] {
            RichNode::Paragraph { content } => {
                let joined: String = content
                    .iter()
                    .map(|node| match node {
                        InlineNode::Text { text, .. } => text.clone(),
                        InlineNode::Link { text, .. } => text.clone(),
                    })
                    .collect();
                assert!(joined.contains("there"));
                assert!(joined.contains("<b>"));
            }
            other => panic!("expected paragraph, got {:?}", other),
        }
    }
}
