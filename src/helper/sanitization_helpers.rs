use regex::Regex;

/// Sanitizes Markdown content by escaping all HTML tags outside code blocks,
/// while preserving fenced code blocks (```) untouched.
/// Prevents double-escaping by normalizing entities first.
pub fn sanitize_markdown_content(markdown_input: &str) -> String {
    let mut code_blocks: Vec<String> = Vec::new();
    let code_block_regex = Regex::new(r"(?s)```[\s\S]*?```").unwrap();

    // Step 1: Extract code blocks with placeholders
    let with_placeholders = code_block_regex.replace_all(markdown_input, |caps: &regex::Captures| {
        code_blocks.push(caps[0].to_string());
        format!("__CODE_BLOCK_PLACEHOLDER_{}__", code_blocks.len() - 1)
    });

    // Step 2: Decode existing entities (normalize), then escape HTML
    let decoded = html_escape::decode_html_entities(&with_placeholders);
    let escaped = html_escape::encode_text(&decoded).to_string();

    // Step 3: Restore original code blocks
    let mut final_output = escaped;
    for (i, block) in code_blocks.iter().enumerate() {
        let placeholder = format!("__CODE_BLOCK_PLACEHOLDER_{}__", i);
        final_output = final_output.replacen(&placeholder, block, 1);
    }

    final_output
}

/// Strips all HTML tags from input (for titles, excerpts, meta fields)
pub fn strip_all_html(input: &str) -> String {
    use std::collections::HashSet;
    ammonia::Builder::new()
        .tags(HashSet::new())
        .clean(input)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_from_plain_text_fields() {
        assert_eq!(strip_all_html("Hello <script>alert(1)</script>world"), "Hello world");
        assert_eq!(strip_all_html("<b>Bold</b> title"), "Bold title");
    }

    #[test]
    fn escapes_html_outside_code_blocks() {
        let input = "before <img src=x> ```<div>kept</div>``` after";
        let out = sanitize_markdown_content(input);
        assert!(out.contains("&lt;img src=x&gt;"));
        assert!(out.contains("```<div>kept</div>```"));
    }
}
