//! Extraction of child items and login-flow fields from portal pages.

pub mod units;

use scraper::{ElementRef, Html, Selector};
use crate::error::{FsError, Result};

/// One child item as it appears on a container page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDescriptor {
    pub name: String,
    pub href: String,
    /// Raw property texts shown under the item (type, size, dates, ...).
    pub properties: Vec<String>,
}

/// Metadata fields of a file item, still in their displayed form.
#[derive(Debug, Clone, PartialEq)]
pub struct FileProperties {
    pub extension: String,
    pub size_text: String,
    pub primary_date: String,
    pub fallback_date: Option<String>,
}

/// Identity assertion posted back to the portal at the end of a login.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub response: String,
    pub relay_state: String,
}

pub trait ContentParser: Send + Sync {
    fn parse_children(&self, page: &[u8]) -> Result<Vec<ChildDescriptor>>;
    fn parse_file_properties(&self, properties: &[String]) -> Result<FileProperties>;
    /// Action of the one-time-passcode form, if the page asks for one.
    fn find_otp_action(&self, page: &str) -> Option<String>;
    fn find_assertion(&self, page: &str) -> Option<Assertion>;
}

/// Parser for ILIAS container pages and the Shibboleth login flow.
pub struct IliasParser {
    list_item: Selector,
    title: Selector,
    property: Selector,
    login_field: Selector,
    otp_field: Selector,
    saml_response: Selector,
    relay_state: Selector,
}

impl IliasParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            list_item: selector("div.il_ContainerListItem")?,
            title: selector("a.il_ContainerItemTitle")?,
            property: selector("span.il_ItemProperty")?,
            login_field: selector(r#"input[name="j_username"]"#)?,
            otp_field: selector(r#"input[name="j_tokenNumber"]"#)?,
            saml_response: selector(r#"input[name="SAMLResponse"]"#)?,
            relay_state: selector(r#"input[name="RelayState"]"#)?,
        })
    }

    fn input_value(&self, document: &Html, input: &Selector) -> Option<String> {
        document
            .select(input)
            .next()
            .and_then(|element| element.value().attr("value"))
            .map(str::to_string)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| FsError::Parse(format!("selector {}: {:?}", css, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

impl ContentParser for IliasParser {
    fn parse_children(&self, page: &[u8]) -> Result<Vec<ChildDescriptor>> {
        let page = std::str::from_utf8(page)
            .map_err(|e| FsError::Parse(format!("page is not UTF-8: {}", e)))?;
        let document = Html::parse_document(page);

        if document.select(&self.login_field).next().is_some() {
            return Err(FsError::Parse("got a login form instead of a listing".into()));
        }

        let mut children = Vec::new();
        for item in document.select(&self.list_item) {
            let Some(anchor) = item.select(&self.title).next() else {
                continue;
            };
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            children.push(ChildDescriptor {
                name: text_of(anchor),
                href: href.to_string(),
                properties: item.select(&self.property).map(text_of).collect(),
            });
        }
        Ok(children)
    }

    fn parse_file_properties(&self, properties: &[String]) -> Result<FileProperties> {
        let field = |index: usize, what: &str| {
            properties
                .get(index)
                .cloned()
                .ok_or_else(|| FsError::Parse(format!("file item without {}", what)))
        };
        Ok(FileProperties {
            extension: field(0, "extension")?,
            size_text: field(1, "size")?,
            primary_date: field(2, "date")?,
            fallback_date: properties.get(3).cloned(),
        })
    }

    fn find_otp_action(&self, page: &str) -> Option<String> {
        let document = Html::parse_document(page);
        let input = document.select(&self.otp_field).next()?;
        input
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|element| element.value().name() == "form")
            .and_then(|form| form.value().attr("action"))
            .map(str::to_string)
    }

    fn find_assertion(&self, page: &str) -> Option<Assertion> {
        let document = Html::parse_document(page);
        Some(Assertion {
            response: self.input_value(&document, &self.saml_response)?,
            relay_state: self.input_value(&document, &self.relay_state)?,
        })
    }
}
