use textwrap::{Options, WordSplitter};

/// Wrap page text for a terminal of `width` columns, keeping blank lines.
pub fn wrap_page(text: &str, width: usize) -> Vec<String> {
    let width = width.max(10);
    let options = Options::new(width).word_splitter(WordSplitter::NoHyphenation);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        for line in textwrap::wrap(paragraph, &options) {
            lines.push(line.trim_end().to_string());
        }
    }
    lines
}

/// A page as shown by the terminal front end: header, body, footer.
pub fn render_page(title: &str, body: &str, page: usize, total: usize, width: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("== {title} ==\n"));
    for line in wrap_page(body, width) {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!("-- page {}/{} --", page + 1, total.max(1)));
    out
}
