//! Link resolution: rewrite every `link_to` item of a publish to carry the
//! object key of the item it points at.
//!
//! Only concrete items are consulted as targets. A link pointing at another
//! link does not resolve, whether or not that link was itself resolved
//! earlier. Rewrites are computed for every link before any is applied, so a
//! failed resolution leaves the session untouched.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::contract::{ItemFilter, Session};
use crate::error::ResolutionError;

/// Resolve all links of `publish_id`, returning how many were rewritten.
///
/// Changes are added to the session but not committed.
pub fn resolve_links<S>(session: &S, publish_id: Uuid) -> Result<usize, ResolutionError>
where
    S: Session + ?Sized,
{
    let link_items = session.items(publish_id, &ItemFilter::Links)?;
    if link_items.is_empty() {
        debug!(%publish_id, "[LINKS] No link items to resolve");
        return Ok(0);
    }

    let concrete = session.items(publish_id, &ItemFilter::All)?;
    let targets: HashMap<&str, &str> = concrete
        .iter()
        .filter(|item| !item.is_link())
        .filter_map(|item| Some((item.web_uri.as_str(), item.object_key.as_deref()?)))
        .collect();

    let mut resolved = Vec::with_capacity(link_items.len());
    for mut item in link_items {
        let link_to = item.link_to.as_deref().unwrap_or_default();
        let Some(key) = targets.get(link_to) else {
            return Err(ResolutionError::Unresolved {
                web_uri: item.web_uri,
                link_to: link_to.to_string(),
            });
        };
        debug!(web_uri = %item.web_uri, link_to, key, "[LINKS] Resolved link");
        item.object_key = Some((*key).to_string());
        resolved.push(item);
    }

    let count = resolved.len();
    for item in resolved {
        session.add_item(item)?;
    }
    info!(%publish_id, count, "[LINKS] Resolved link items");
    Ok(count)
}
