use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

// Elements whose full text reads as one line on the rendered page.
const LINE_TAGS: [&str; 16] = [
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "p",
    "li",
    "dt",
    "dd",
    "th",
    "td",
    "blockquote",
    "figcaption",
    "address",
    "caption",
];

// Containers whose direct text children still carry visible copy
// (e.g. <div>Mon 09:00 - 17:00</div> with no inner markup).
const CONTAINER_TAGS: [&str; 8] = [
    "div", "section", "article", "main", "header", "footer", "aside", "span",
];

static LINE_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, p, li, dt, dd, th, td, blockquote, figcaption, address, caption").unwrap()
});
static ALL_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "h1, h2, h3, h4, h5, h6, p, li, dt, dd, th, td, blockquote, figcaption, address, caption, \
         div, section, article, main, header, footer, aside, span",
    )
    .unwrap()
});
static BODY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Extract the visible text of a page as newline-separated lines, one line
/// per rendered text block, in document order. Script, style and other
/// non-rendered content never appears. The line structure matters
/// downstream: the heuristic fact extractor attributes opening hours per
/// line.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Some(body) = document.select(&BODY_SEL).next() else {
        return String::new();
    };

    let mut lines: Vec<String> = Vec::new();

    for el in body.select(&ALL_SEL) {
        let name = el.value().name();
        if LINE_TAGS.contains(&name) {
            // Only leaf blocks emit their full text, so nested structures
            // (td > p, li > ul > li) don't repeat themselves.
            if el.select(&LINE_SEL).next().is_some() {
                continue;
            }
            push_line(&mut lines, &el.text().collect::<String>());
        } else if CONTAINER_TAGS.contains(&name) {
            // A container inside a line block is already covered by the
            // block's own text.
            if has_line_ancestor(el) {
                continue;
            }
            push_line(&mut lines, &direct_text(el));
        }
    }

    lines.join("\n")
}

fn has_line_ancestor(el: ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| LINE_TAGS.contains(&a.value().name()))
}

/// Text from an element's direct text-node children only.
fn direct_text(el: ElementRef) -> String {
    let mut out = String::new();
    for child in el.children() {
        if let Some(t) = child.value().as_text() {
            out.push_str(t);
            out.push(' ');
        }
    }
    out
}

fn push_line(lines: &mut Vec<String>, raw: &str) {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        lines.push(normalized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_block_lines_in_order() {
        let html = r#"
            <html><body>
                <h1>Demo Bistro</h1>
                <p>A small neighbourhood kitchen.</p>
                <ul><li>Mon 09:00 - 17:00</li><li>Tue 09:00 - 17:00</li></ul>
            </body></html>
        "#;
        let text = visible_text(html);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Demo Bistro",
                "A small neighbourhood kitchen.",
                "Mon 09:00 - 17:00",
                "Tue 09:00 - 17:00",
            ]
        );
    }

    #[test]
    fn skips_script_and_style_content() {
        let html = r#"
            <html><head><style>p { color: red }</style></head><body>
                <script>var hidden = "do not extract";</script>
                <p>Visible copy</p>
            </body></html>
        "#;
        let text = visible_text(html);
        assert!(text.contains("Visible copy"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn bare_div_text_is_a_line() {
        let html = "<html><body><div>Wed 10:00 - 18:00</div></body></html>";
        assert_eq!(visible_text(html), "Wed 10:00 - 18:00");
    }

    #[test]
    fn span_inside_paragraph_is_not_repeated() {
        let html = "<html><body><p>Call <span>+44 1234 567890</span> today</p></body></html>";
        assert_eq!(visible_text(html), "Call +44 1234 567890 today");
    }

    #[test]
    fn nested_list_items_are_not_repeated() {
        let html = r#"<html><body><ul><li>Food<ul><li>Lunch menu</li></ul></li></ul></body></html>"#;
        let text = visible_text(html);
        assert_eq!(text.matches("Lunch menu").count(), 1);
    }

    #[test]
    fn collapses_whitespace_within_a_line() {
        let html = "<html><body><p>A  long\n   gap</p></body></html>";
        assert_eq!(visible_text(html), "A long gap");
    }
}
