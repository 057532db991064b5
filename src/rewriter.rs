//! Link rewriting for mirrored pages
//!
//! For every reference attribute of a page the rewriter decides between three
//! outcomes:
//!
//! - unresolvable (`mailto:`, `javascript:`, empty, fragment-only): untouched
//! - resolvable but outside the scope: left pointing at the live site, as an
//!   absolute URL
//! - inside the scope: replaced by the relative path from the page's own
//!   local file to the target's local file
//!
//! The rewriter knows nothing about what has been fetched. It reports every
//! in-scope target and leaves deduplication to the controller.

use std::collections::HashSet;

use url::Url;

use crate::{
    Document, LocalPath, NormalizedUrl, PathError, PathMapper, UrlNormalizer,
    normalize::fragment_of,
};

/// The (tag, attribute) pairs rewritten by default
pub const DEFAULT_LINK_ATTRIBUTES: &[(&str, &str)] = &[
    ("a", "href"),
    ("link", "href"),
    ("script", "src"),
    ("img", "src"),
];

/// Output of rewriting one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRewriteResult {
    /// Serialized page with rewritten attribute values
    pub content: Vec<u8>,
    /// In-scope targets, de-duplicated, in document order
    pub discovered: Vec<NormalizedUrl>,
    /// Number of attribute values that were changed
    pub rewritten: usize,
}

enum Reference {
    Keep,
    External(String),
    Local { url: NormalizedUrl, href: String },
}

/// Resolves and rewrites page references against a [`PathMapper`]
#[derive(Debug, Clone)]
pub struct LinkRewriter {
    mapper: PathMapper,
    attributes: Vec<(String, String)>,
}

impl LinkRewriter {
    /// Create a rewriter for the [`DEFAULT_LINK_ATTRIBUTES`]
    pub fn new(mapper: PathMapper) -> Self {
        Self {
            mapper,
            attributes: DEFAULT_LINK_ATTRIBUTES
                .iter()
                .map(|(tag, attr)| (tag.to_string(), attr.to_string()))
                .collect(),
        }
    }

    /// Also rewrite `attr` on `tag` elements (e.g. `source`/`src`)
    pub fn with_attribute(mut self, tag: &str, attr: &str) -> Self {
        let pair = (tag.to_ascii_lowercase(), attr.to_ascii_lowercase());
        if !self.attributes.contains(&pair) {
            self.attributes.push(pair);
        }
        self
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Rewrite every reference of `document`, which was fetched from `page_url`
    ///
    /// Fails only when `page_url` itself is outside the scope.
    pub fn rewrite<D>(&self, page_url: &NormalizedUrl, document: &mut D) -> Result<PageRewriteResult, PathError>
    where
        D: Document + ?Sized,
    {
        self.rewrite_served(page_url, page_url.as_url(), document)
    }

    /// Rewrite the page of `page_url` that was actually served from `served_from`
    ///
    /// `page_url` decides where the page is stored; relative references
    /// resolve against `served_from`, the address that answered after
    /// redirects.
    pub fn rewrite_served<D>(
        &self,
        page_url: &NormalizedUrl,
        served_from: &Url,
        document: &mut D,
    ) -> Result<PageRewriteResult, PathError>
    where
        D: Document + ?Sized,
    {
        let page_path = self.mapper.to_local_path(page_url)?;
        let (base, mut rewritten) = self.document_base(served_from, document);

        let mut targets = Vec::new();
        for (tag, attr) in &self.attributes {
            targets.extend(document.select(tag).into_iter().map(|node| (node, attr.as_str())));
        }
        targets.sort_by_key(|(node, _)| *node);

        let mut discovered = Vec::new();
        let mut seen = HashSet::new();
        for (node, attr) in targets {
            let Some(raw) = document.attr(node, attr).map(str::to_string) else {
                continue;
            };

            match self.resolve(&raw, &base, &page_path) {
                Reference::Keep => {}
                Reference::External(absolute) => {
                    if document.set_attr(node, attr, &absolute) {
                        rewritten += 1;
                    }
                }
                Reference::Local { url, href } => {
                    if document.set_attr(node, attr, &href) {
                        rewritten += 1;
                    }
                    if seen.insert(url.clone()) {
                        discovered.push(url);
                    }
                }
            }
        }

        Ok(PageRewriteResult {
            content: document.to_bytes(),
            discovered,
            rewritten,
        })
    }

    /// Base URL for relative references, honoring `<base href>`
    ///
    /// A usable `<base href>` is pointed at `./` so that the saved copy
    /// resolves relative to its own location. References it made relative
    /// to another site are written out as absolute URLs.
    fn document_base<D>(&self, served_from: &Url, document: &mut D) -> (Url, usize)
    where
        D: Document + ?Sized,
    {
        let Some(node) = document.select("base").into_iter().find(|&node| document.attr(node, "href").is_some())
        else {
            return (served_from.clone(), 0);
        };
        let href = document.attr(node, "href").unwrap_or_default().to_string();

        match UrlNormalizer::absolute(&href, Some(served_from)) {
            Ok(base) => {
                let changed = usize::from(document.set_attr(node, "href", "./"));
                (base, changed)
            }
            Err(error) => {
                tracing::debug!(page = %served_from, %href, %error, "Ignoring unusable <base href>");
                (served_from.clone(), 0)
            }
        }
    }

    fn resolve(&self, raw: &str, base: &Url, page_path: &LocalPath) -> Reference {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Reference::Keep;
        }

        let url = match UrlNormalizer::resolve(trimmed, base) {
            Ok(url) => url,
            Err(error) => {
                tracing::debug!(reference = trimmed, %error, "Leaving unresolvable reference");
                return Reference::Keep;
            }
        };

        match self.mapper.to_local_path(&url) {
            Ok(local) => {
                let mut href = local.relative_from(page_path);
                if let Some(fragment) = fragment_of(trimmed) {
                    href.push_str(fragment);
                }
                Reference::Local { url, href }
            }
            Err(_) if Url::parse(trimmed).is_ok() => Reference::Keep,
            Err(_) => match base.join(trimmed) {
                Ok(absolute) => Reference::External(absolute.to_string()),
                Err(_) => Reference::Keep,
            },
        }
    }
}
