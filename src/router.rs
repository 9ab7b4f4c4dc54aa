//! Input routing for one render cycle.
//!
//! The page carries three input sources: the bottom chat box, the sidebar
//! FAQ dropdown and the sidebar quick-search field. At most one of them is
//! the cycle's input. Precedence is chat box, then FAQ, then search; a
//! field counts only when it is non-empty after trimming.

use serde::Deserialize;

/// Raw form fields posted by the page.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct InputForm {
    #[serde(default)]
    pub chat_input: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub faq: Option<String>,
}

/// Which widget produced the routed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Chat,
    Faq,
    Search,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedInput {
    pub source: InputSource,
    pub text: String,
}

/// Sidebar echo of a FAQ choice or quick search. The subject is user
/// text and is rendered escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub label: &'static str,
    pub subject: String,
}

impl Notice {
    pub fn selected(subject: impl Into<String>) -> Self {
        Self {
            label: "You selected",
            subject: subject.into(),
        }
    }

    pub fn searching(subject: impl Into<String>) -> Self {
        Self {
            label: "Searching for",
            subject: subject.into(),
        }
    }
}

impl RoutedInput {
    /// Sidebar echo shown above the transcript, if any.
    pub fn notice(&self) -> Option<Notice> {
        match self.source {
            InputSource::Chat => None,
            InputSource::Faq => Some(Notice::selected(&self.text)),
            InputSource::Search => Some(Notice::searching(&self.text)),
        }
    }
}

fn present(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Pick the cycle's input, or `None` when nothing was entered.
pub fn route(form: &InputForm) -> Option<RoutedInput> {
    [
        (InputSource::Chat, &form.chat_input),
        (InputSource::Faq, &form.faq),
        (InputSource::Search, &form.search),
    ]
    .into_iter()
    .find_map(|(source, field)| present(field).map(|text| RoutedInput { source, text }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(chat: &str, faq: &str, search: &str) -> InputForm {
        let opt = |s: &str| Some(s.to_string());
        InputForm {
            chat_input: opt(chat),
            search: opt(search),
            faq: opt(faq),
        }
    }

    #[test]
    fn chat_box_wins() {
        let routed = route(&form("hello", "What is cancer?", "tumor")).unwrap();
        assert_eq!(routed.source, InputSource::Chat);
        assert_eq!(routed.text, "hello");
        assert!(routed.notice().is_none());
    }

    #[test]
    fn faq_beats_search() {
        let routed = route(&form("", "What is cancer?", "tumor")).unwrap();
        assert_eq!(routed.source, InputSource::Faq);
        assert_eq!(routed.notice().unwrap(), Notice::selected("What is cancer?"));
    }

    #[test]
    fn search_used_when_alone() {
        let routed = route(&form("", "", "  tumor markers ")).unwrap();
        assert_eq!(routed.source, InputSource::Search);
        assert_eq!(routed.text, "tumor markers");
        let notice = routed.notice().unwrap();
        assert_eq!(notice.label, "Searching for");
        assert_eq!(notice.subject, "tumor markers");
    }

    #[test]
    fn whitespace_only_counts_as_empty() {
        assert!(route(&form("   ", "\t", "\n")).is_none());
        let routed = route(&form("  ", "", "x")).unwrap();
        assert_eq!(routed.source, InputSource::Search);
    }

    #[test]
    fn missing_fields_route_nothing() {
        assert!(route(&InputForm::default()).is_none());
    }
}
