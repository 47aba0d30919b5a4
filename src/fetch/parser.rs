//! RSS/Atom/JSON-Feed bytes to [`Item`], via `feed_rs`.

use crate::model::Item;
use feed_rs::model::{Extension, ExtensionMap};

pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Item>, String> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| e.to_string())?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated);
            let description = entry.summary.map(|s| s.content);
            let content = entry.content.and_then(|c| c.body);
            let title = entry.title.map(|t| t.content);
            let categories = entry.categories.into_iter().map(|c| c.term).collect();
            let guid = if entry.id.is_empty() { None } else { Some(entry.id) };
            let extensions = extension_map_to_json(&entry.extensions);

            Item {
                title,
                link,
                description,
                content,
                categories,
                guid,
                published,
                extensions,
            }
        })
        .collect();

    Ok(items)
}

/// `feed_rs` doesn't derive `Serialize` on its extension types by default, so
/// this walks the namespace/field/value tree by hand into a `serde_json`
/// tree the rule scripts' `block_rule`/`keep_rule`/`format` can index into.
fn extension_map_to_json(extensions: &ExtensionMap) -> serde_json::Value {
    if extensions.is_empty() {
        return serde_json::Value::Null;
    }

    let namespaces = extensions
        .iter()
        .map(|(namespace, fields)| {
            let fields_json: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(name, values)| {
                    let values_json = values.iter().map(extension_to_json).collect();
                    (name.clone(), serde_json::Value::Array(values_json))
                })
                .collect();
            (namespace.clone(), serde_json::Value::Object(fields_json))
        })
        .collect();

    serde_json::Value::Object(namespaces)
}

fn extension_to_json(ext: &Extension) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    if let Some(value) = &ext.value {
        obj.insert("value".to_string(), serde_json::Value::String(value.clone()));
    }
    if !ext.attrs.is_empty() {
        let attrs = ext.attrs.iter().map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))).collect();
        obj.insert("attrs".to_string(), serde_json::Value::Object(attrs));
    }
    if !ext.children.is_empty() {
        obj.insert("children".to_string(), extension_map_to_json(&ext.children));
    }
    serde_json::Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    #[test]
    fn parses_minimal_rss_item() {
        let items = parse_feed(VALID_RSS.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].guid.as_deref(), Some("1"));
        assert_eq!(items[0].title.as_deref(), Some("Test"));
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/1"));
    }

    #[test]
    fn empty_channel_yields_no_items() {
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let items = parse_feed(rss.as_bytes()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn malformed_xml_errors() {
        assert!(parse_feed(b"<not valid xml").is_err());
    }

    #[test]
    fn namespaced_extension_elements_are_captured() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel>
    <item>
        <guid>1</guid>
        <title>Test</title>
        <link>https://example.com/1</link>
        <media:thumbnail url="https://example.com/thumb.jpg"/>
    </item>
</channel></rss>"#;
        let items = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        let extensions = &items[0].extensions;
        assert!(!extensions.is_null(), "expected a populated extension tree, got {extensions:?}");
        let thumbnail = &extensions["media"]["thumbnail"][0]["attrs"]["url"];
        assert_eq!(thumbnail.as_str(), Some("https://example.com/thumb.jpg"));
    }

    #[test]
    fn missing_guid_leaves_item_guid_none() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>No guid</title><link>https://example.com/2</link></item>
</channel></rss>"#;
        let items = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].guid, None);
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/2"));
    }
}
