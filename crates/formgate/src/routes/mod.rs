pub mod admin;
pub mod analytics;
pub mod forms;
pub mod health;

use serde::Deserialize;

use formgate_core::store::Page;

/// `limit`/`offset` query pair. Unparsable values fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl PageParams {
    pub fn page(&self) -> Page {
        Page::new(parse(&self.limit), parse(&self.offset))
    }
}

fn parse(value: &Option<String>) -> Option<i64> {
    value.as_deref().and_then(|raw| raw.trim().parse().ok())
}
