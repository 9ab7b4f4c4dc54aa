//! HTML rendering for the chat page.
//!
//! One page, rendered fresh on every request: header, welcome block,
//! sidebar (quick search and FAQ dropdown), transcript and the bottom chat
//! box. Markdown goes through `pulldown-cmark` with raw HTML escaped and
//! link targets limited to http, https, mailto and relative paths. Sidebar
//! notices are plain escaped text, never Markdown.

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use std::fmt::Write;

use crate::config::UiConfig;
use crate::models::{ChatMessage, MessageRole};
use crate::router::Notice;

/// Everything a single render needs.
pub struct PageView<'a> {
    pub ui: &'a UiConfig,
    pub history: &'a [ChatMessage],
    /// Sidebar echo such as "You selected: …".
    pub notice: Option<&'a Notice>,
    /// Error banner for a failed turn.
    pub error: Option<&'a str>,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail.
    let _ = pulldown_cmark_escape::escape_html(&mut out, text);
    out
}

/// Whether a link or image target may be emitted as-is.
fn is_safe_url(url: &str) -> bool {
    let url = url.trim();
    match url.find(':') {
        None => true,
        Some(colon) => {
            // A colon after the first path, query or fragment delimiter is not a scheme.
            if url[..colon].contains(['/', '?', '#']) {
                return true;
            }
            // Browsers ignore tabs and newlines inside a scheme.
            let scheme: String = url[..colon]
                .chars()
                .filter(|c| !c.is_whitespace() && !c.is_control())
                .collect::<String>()
                .to_ascii_lowercase();
            matches!(scheme.as_str(), "http" | "https" | "mailto")
        }
    }
}

fn neutralize(url: CowStr<'_>) -> CowStr<'_> {
    if is_safe_url(&url) {
        url
    } else {
        CowStr::Borrowed("#")
    }
}

/// Render Markdown to HTML. Raw HTML in the source is shown as text and
/// links or images with other schemes point at `#`.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        other => other,
    });

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; display: flex; min-height: 100vh; }
aside { width: 18rem; background: #f0f2f6; padding: 1.5rem; box-sizing: border-box; }
main { flex: 1; max-width: 46rem; margin: 0 auto; padding: 2rem 1.5rem 7rem; }
.caption { color: #6b6f76; margin-top: -0.5rem; }
.msg { padding: 0.75rem 1rem; border-radius: 0.5rem; margin: 0.75rem 0; }
.msg .role { font-size: 0.75rem; text-transform: uppercase; color: #6b6f76; }
.msg.human { background: #f7f7f9; }
.msg.assistant { background: #eef6ff; }
.info { background: #e8f0fe; color: #1c4587; padding: 0.5rem 0.75rem; border-radius: 0.4rem; }
.error { background: #fdecea; color: #8a1c12; padding: 0.75rem 1rem; border-radius: 0.4rem; }
form.chat { position: fixed; bottom: 0; left: 18rem; right: 0; padding: 1rem; background: #fff; }
form.chat input { width: 100%; max-width: 46rem; display: block; margin: 0 auto; padding: 0.75rem; }
aside input, aside select { width: 100%; padding: 0.4rem; box-sizing: border-box; }
"#;

/// Render the full chat page.
pub fn render_page(view: &PageView<'_>) -> String {
    let ui = view.ui;
    let mut page = String::new();

    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n",
        title = escape_html(&ui.title),
    );

    page.push_str(&render_sidebar(ui, view.notice));

    page.push_str("<main>\n");
    let _ = writeln!(page, "<h1>{}</h1>", escape_html(&ui.title));
    let _ = writeln!(page, "<p class=\"caption\">{}</p>", escape_html(&ui.caption));
    let _ = writeln!(
        page,
        "<section class=\"welcome\">{}</section>",
        markdown_to_html(&ui.welcome)
    );

    page.push_str("<section class=\"transcript\">\n");
    for message in view.history {
        page.push_str(&render_message(message));
    }
    page.push_str("</section>\n");

    if let Some(error) = view.error {
        let _ = writeln!(
            page,
            "<div class=\"error\" role=\"alert\">Something went wrong: {}</div>",
            escape_html(error)
        );
    }
    page.push_str("</main>\n");

    let _ = write!(
        page,
        "<form class=\"chat\" method=\"post\" action=\"/chat\">\n\
         <input type=\"text\" name=\"chat_input\" placeholder=\"{}\" autocomplete=\"off\" autofocus>\n\
         </form>\n</body>\n</html>\n",
        escape_html(&ui.chat_placeholder)
    );

    page
}

fn render_sidebar(ui: &UiConfig, notice: Option<&Notice>) -> String {
    let mut out = String::from("<aside>\n");

    out.push_str(
        "<h3>Quick Search</h3>\n<form method=\"post\" action=\"/chat\">\n\
         <input type=\"text\" name=\"search\" placeholder=\"Search\">\n</form>\n",
    );

    out.push_str(
        "<h3>Frequently Asked</h3>\n<form method=\"post\" action=\"/chat\">\n\
         <select name=\"faq\" onchange=\"this.form.submit()\">\n<option value=\"\"></option>\n",
    );
    for question in &ui.faq {
        let q = escape_html(question);
        let _ = writeln!(out, "<option value=\"{q}\">{q}</option>");
    }
    out.push_str("</select>\n<noscript><button type=\"submit\">Ask</button></noscript>\n</form>\n");

    if let Some(notice) = notice {
        let _ = writeln!(
            out,
            "<div class=\"info\"><p>{}: <em>{}</em></p></div>",
            escape_html(notice.label),
            escape_html(&notice.subject)
        );
    }

    out.push_str("</aside>\n");
    out
}

fn render_message(message: &ChatMessage) -> String {
    let label = message.role.display_label();
    let body = match message.role {
        MessageRole::Assistant => markdown_to_html(&message.content),
        _ => format!("<p>{}</p>", escape_html(&message.content)),
    };
    format!(
        "<div class=\"msg {label}\"><div class=\"role\">{label}</div>{body}</div>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>(ui: &'a UiConfig, history: &'a [ChatMessage]) -> PageView<'a> {
        PageView {
            ui,
            history,
            notice: None,
            error: None,
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn markdown_renders_but_raw_html_does_not() {
        let out = markdown_to_html("**bold** <script>alert(1)</script>");
        assert!(out.contains("<strong>bold</strong>"));
        assert!(!out.contains("<script>"));
        assert!(out.contains("&lt;script&gt;"));
    }

    #[test]
    fn page_has_header_sidebar_and_chat_box() {
        let ui = UiConfig::default();
        let page = render_page(&view(&ui, &[]));
        assert!(page.contains("<title>Cancerpedia Chat</title>"));
        assert!(page.contains("<h3>Quick Search</h3>"));
        assert!(page.contains("<h3>Frequently Asked</h3>"));
        assert!(page.contains("placeholder=\"Curious minds wanted!\""));
        assert!(page.contains("<option value=\"What is cancer?\">"));
        assert_eq!(page.matches("<option ").count(), ui.faq.len() + 1);
        assert!(page.contains("<strong>Welcome to Cancerpedia Chat!</strong>"));
    }

    #[test]
    fn transcript_labels_and_escaping() {
        let ui = UiConfig::default();
        let history = vec![
            ChatMessage::user("<i>hi</i>"),
            ChatMessage::assistant("Cancer is *uncontrolled* growth."),
        ];
        let page = render_page(&view(&ui, &history));
        assert!(page.contains("<div class=\"role\">human</div><p>&lt;i&gt;hi&lt;/i&gt;</p>"));
        assert!(page.contains("<div class=\"role\">assistant</div>"));
        assert!(page.contains("<em>uncontrolled</em>"));
    }

    #[test]
    fn notice_and_error_are_shown() {
        let ui = UiConfig::default();
        let notice = Notice::selected("What is cancer?");
        let page = render_page(&PageView {
            ui: &ui,
            history: &[],
            notice: Some(&notice),
            error: Some("LLM API error 503"),
        });
        assert!(page.contains("<p>You selected: <em>What is cancer?</em></p>"));
        assert!(page.contains("Something went wrong: LLM API error 503"));
    }

    #[test]
    fn notice_is_text_not_markdown() {
        let ui = UiConfig::default();
        let notice = Notice::searching("[click](javascript:alert(1)) <b>x</b>");
        let page = render_page(&PageView {
            ui: &ui,
            history: &[],
            notice: Some(&notice),
            error: None,
        });
        assert!(!page.contains("<a href"));
        assert!(!page.contains("<b>x</b>"));
        assert!(page.contains(
            "Searching for: <em>[click](javascript:alert(1)) &lt;b&gt;x&lt;/b&gt;</em>"
        ));
    }

    #[test]
    fn script_links_are_neutralized() {
        let out = markdown_to_html("[click](javascript:alert(1)) and ![x](JavaScript:evil())");
        assert!(!out.to_ascii_lowercase().contains("javascript:"));
        assert!(out.contains("<a href=\"#\">click</a>"));

        let out = markdown_to_html("[vbs]( vbscript:msgbox ) [data](data:text/html,hi)");
        assert!(!out.contains("vbscript:"));
        assert!(!out.contains("data:"));

        let out = markdown_to_html("[tab](<java\tscript:alert(1)>)");
        assert!(out.contains("<a href=\"#\">tab</a>"));
    }

    #[test]
    fn ordinary_links_survive() {
        let out = markdown_to_html(
            "[nci](https://www.cancer.gov) [mail](mailto:help@example.org) [faq](/faq?q=a:b) [top](#top)",
        );
        assert!(out.contains("href=\"https://www.cancer.gov\""));
        assert!(out.contains("href=\"mailto:help@example.org\""));
        assert!(out.contains("href=\"/faq?q=a:b\""));
        assert!(out.contains("href=\"#top\""));
    }
}
