//! Body Renderer (C2): pure HTML-as-text -> Markdown-as-text conversion.
//!
//! The actual HTML parse/emit is delegated to `html2md`; this module's job
//! is the pure-function contract and the empty-input short-circuit, not
//! reimplementing an HTML parser.

/// Convert `html` into Markdown. Empty input yields empty output without
/// invoking the underlying converter.
pub fn render(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    html2md::parse_html(html)
}

/// Render every article's body in place. Runs inline on the calling
/// thread -- it's CPU-bound, not I/O-bound, so fanning it out across
/// worker threads wouldn't help.
pub fn render_all(articles: &mut [crate::types::Article]) {
    for article in articles.iter_mut() {
        article.body = render(&article.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(render(""), "");
    }

    #[test]
    fn preserves_heading_as_markdown() {
        let out = render("<h1>Title</h1>");
        assert!(out.contains("Title"));
        assert!(out.contains('#'));
    }

    #[test]
    fn preserves_link_as_markdown_link() {
        let out = render(r#"<a href="https://example.com">text</a>"#);
        assert!(out.contains("[text](https://example.com)"));
    }

    #[test]
    fn preserves_emphasis() {
        let out = render("<em>word</em>");
        assert!(out.contains("word"));
    }

    #[test]
    fn preserves_list_items() {
        let out = render("<ul><li>one</li><li>two</li></ul>");
        assert!(out.contains("one"));
        assert!(out.contains("two"));
    }

    #[test]
    fn preserves_blockquote() {
        let out = render("<blockquote>quoted</blockquote>");
        assert!(out.contains("quoted"));
        assert!(out.contains('>'));
    }

    #[test]
    fn preserves_code_block() {
        let out = render("<pre><code>let x = 1;</code></pre>");
        assert!(out.contains("let x = 1;"));
    }

    #[test]
    fn render_all_updates_bodies_in_place() {
        let mut articles = vec![crate::types::Article::new(1, "n", "<p>hi</p>")];
        render_all(&mut articles);
        assert!(articles[0].body.contains("hi"));
    }
}
