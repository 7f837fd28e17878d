//! Repair and parse the `mux_http` response body
//!
//! The device answers with a bare `<data>` fragment: no XML declaration and an
//! in-band `<code>ok</code>` status marker ahead of the register elements:
//!
//! ```text
//! <data><code>ok</code><D_Y_5>0</D_Y_5><D_A_1_2>1.86</D_A_1_2></data>
//! ```
//!
//! The body is turned into a well-formed document before it reaches the
//! (strict, DTD-less) XML parser, then every requested register is copied
//! into a flat table. A register that was requested but is not in the
//! response fails the whole parse.

use crate::client::request::FetchRequest;
use crate::client::RegisterTable;
use crate::error::{GruenbeckError, Result};
use tracing::trace;

/// Declaration prepended to every body
pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n";

/// In-band status token stripped before parsing
pub const STATUS_TOKEN: &str = "<code>ok</code>";

/// Prepend the declaration and strip the first status token
pub fn repair_payload(raw: &str) -> String {
    let mut xml_text = String::with_capacity(XML_HEADER.len() + raw.len());
    xml_text.push_str(XML_HEADER);
    xml_text.push_str(&raw.replacen(STATUS_TOKEN, "", 1));
    xml_text
}

/// Parse a raw device body into a table holding exactly the requested registers
pub fn parse_payload(raw: &str, request: &FetchRequest) -> Result<RegisterTable> {
    if raw.is_empty() {
        return Err(GruenbeckError::EmptyResponse);
    }

    let xml_text = repair_payload(raw);
    let document = roxmltree::Document::parse(&xml_text)
        .map_err(|e| GruenbeckError::parsing(format!("Malformed device payload: {e}")))?;
    let root = document.root_element();

    let mut table = RegisterTable::new();
    for register in request.registers() {
        let element = root
            .children()
            .find(|node| node.is_element() && node.tag_name().name() == register.as_str())
            .ok_or_else(|| GruenbeckError::missing_register(register.as_str()))?;

        let value = element.text().unwrap_or_default().to_string();
        trace!("{register} = {value:?}");
        table.insert(*register, value);
    }

    Ok(table)
}
