//! FetchXML rewrite rules, applied in order, deterministically.

use super::doc::Element;

#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    pub page_number: Option<u32>,
    pub paging_cookie: Option<String>,
    pub include_count: bool,
}

const MAX_TOP: u32 = 5000;

/// Apply the four rewrite rules to the root `<fetch>` element in place.
pub fn rewrite(root: &mut Element, opts: &FetchOptions) {
    let paging_requested = opts.page_number.is_some() || opts.paging_cookie.is_some();

    // Rule 1: top + paging -> count = min(top, 5000), drop top.
    if paging_requested {
        if let Some(top) = root.attr("top").and_then(|v| v.parse::<u32>().ok()) {
            root.remove_attr("top");
            root.set_attr("count", top.min(MAX_TOP).to_string());
        }
    }

    // Rule 2: paging requested -> set page, and cookie verbatim if given.
    if paging_requested {
        let page = opts.page_number.unwrap_or(1);
        root.set_attr("page", page.to_string());
        if let Some(cookie) = &opts.paging_cookie {
            root.set_attr("paging-cookie", cookie.clone());
        }
    }

    // Rule 3: includeCount -> returntotalrecordcount.
    if opts.include_count {
        root.set_attr("returntotalrecordcount", "true");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchxml::doc::parse;

    #[test]
    fn top_and_page_rewrites_to_count_and_page() {
        let mut doc = parse(r#"<fetch top="10"><entity name="account"><attribute name="name"/></entity></fetch>"#).unwrap();
        rewrite(&mut doc, &FetchOptions { page_number: Some(2), ..Default::default() });
        assert_eq!(doc.attr("count"), Some("10"));
        assert_eq!(doc.attr("page"), Some("2"));
        assert_eq!(doc.attr("top"), None);
    }

    #[test]
    fn top_capped_at_5000() {
        let mut doc = parse(r#"<fetch top="99999"><entity name="account"/></fetch>"#).unwrap();
        rewrite(&mut doc, &FetchOptions { page_number: Some(1), ..Default::default() });
        assert_eq!(doc.attr("count"), Some("5000"));
    }

    #[test]
    fn cookie_set_verbatim() {
        let mut doc = parse(r#"<fetch><entity name="account"/></fetch>"#).unwrap();
        rewrite(
            &mut doc,
            &FetchOptions {
                page_number: Some(3),
                paging_cookie: Some("abc==".into()),
                include_count: false,
            },
        );
        assert_eq!(doc.attr("paging-cookie"), Some("abc=="));
    }

    #[test]
    fn include_count_sets_returntotalrecordcount() {
        let mut doc = parse(r#"<fetch><entity name="account"/></fetch>"#).unwrap();
        rewrite(&mut doc, &FetchOptions { include_count: true, ..Default::default() });
        assert_eq!(doc.attr("returntotalrecordcount"), Some("true"));
    }

    #[test]
    fn no_paging_leaves_top_untouched() {
        let mut doc = parse(r#"<fetch top="10"><entity name="account"/></fetch>"#).unwrap();
        rewrite(&mut doc, &FetchOptions::default());
        assert_eq!(doc.attr("top"), Some("10"));
        assert_eq!(doc.attr("page"), None);
    }
}
