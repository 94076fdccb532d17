//! Small HTML and URL helpers shared by the site providers.

use crate::error::ProviderError;
use scraper::{ElementRef, Html, Selector};

/// Returns the text of an element with whitespace runs collapsed.
pub fn element_text(elem: ElementRef<'_>) -> String {
    elem.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the first element matching `selector`, or `ElementNotFound` naming `what`.
pub fn select_first<'a>(
    doc: &'a Html,
    selector: &Selector,
    what: &str,
) -> Result<ElementRef<'a>, ProviderError> {
    doc.select(selector)
        .next()
        .ok_or_else(|| ProviderError::ElementNotFound(what.to_string()))
}

/// Returns an attribute of an element, or `ElementNotFound` naming `what`.
pub fn required_attr<'a>(
    elem: ElementRef<'a>,
    attr: &str,
    what: &str,
) -> Result<&'a str, ProviderError> {
    elem.value()
        .attr(attr)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::ElementNotFound(format!("{what} ({attr})")))
}

/// Resolves a possibly relative or protocol-relative link against `base`.
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base_url) = url::Url::parse(base)
        && let Ok(resolved) = base_url.join(href)
    {
        return resolved.to_string();
    }

    let base = base.trim_end_matches('/');
    format!("{}/{}", base, href.trim_start_matches('/'))
}

/// Builds `base` with the given query parameters appended.
pub fn url_with_query(base: &str, params: &[(&str, &str)]) -> Result<String, ProviderError> {
    url::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| ProviderError::Unsupported(format!("{base}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_text_collapses_whitespace() {
        let doc = Html::parse_fragment("<a>  One\n   <b>Piece</b>\t </a>");
        let selector = Selector::parse("a").unwrap();
        let elem = doc.select(&selector).next().unwrap();
        assert_eq!(element_text(elem), "One Piece");
    }

    #[test]
    fn test_required_attr() {
        let doc = Html::parse_fragment(r#"<a href=" /x " title="">t</a>"#);
        let selector = Selector::parse("a").unwrap();
        let elem = doc.select(&selector).next().unwrap();
        assert_eq!(required_attr(elem, "href", "link").unwrap(), "/x");
        assert!(matches!(
            required_attr(elem, "title", "link"),
            Err(ProviderError::ElementNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://example.com/manga/a", "/chapter/1"),
            "https://example.com/chapter/1"
        );
        assert_eq!(
            resolve_url("http://www.mangahere.cc", "//www.mangahere.cc/manga/x/"),
            "http://www.mangahere.cc/manga/x/"
        );
        assert_eq!(
            resolve_url("https://example.com/", "https://cdn.example.com/1.jpg"),
            "https://cdn.example.com/1.jpg"
        );
    }

    #[test]
    fn test_url_with_query() {
        let url = url_with_query("http://en.ninemanga.com/search/", &[("wd", "one piece")]).unwrap();
        assert_eq!(url, "http://en.ninemanga.com/search/?wd=one+piece");
    }
}
