use comrak::{ComrakOptions, markdown_to_html};
use once_cell::sync::Lazy;

static MARKDOWN_OPTIONS: Lazy<ComrakOptions> = Lazy::new(|| {
    let mut options = ComrakOptions::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.tasklist = true;
    options.extension.autolink = true;
    // Replies are model output; raw HTML in them is never passed through.
    options.render.unsafe_ = false;
    options
});

/// Renders an assistant reply as HTML for the message bubble.
pub fn render_reply(md: &str) -> String {
    markdown_to_html(md, &MARKDOWN_OPTIONS)
}
