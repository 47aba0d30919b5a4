//! Concrete [`RuleSet`] backed by an embedded Lua interpreter.
//!
//! The scripting language itself is explicitly out of scope (spec treats the
//! evaluator as an opaque collaborator) — Lua via `mlua` stands in for
//! whatever language actually authors `feed()`/`block_rule`/`keep_rule`/
//! `format`. A script declares feeds as:
//!
//! ```lua
//! feed{
//!   url = "https://example.com/feed.xml",
//!   title = "Example",
//!   digest = true,
//!   keep_rule = function(item) return #item.title > 0 end,
//!   format = function(items, default_title) return default_title end,
//! }
//! ```
//!
//! Each [`LuaRuleSet`] owns one `Lua` instance behind a `Mutex` so the "no
//! concurrent calls on the same function" requirement holds even if the
//! Decider is invoked from multiple fetch workers at once — calls simply
//! serialize through the lock rather than racing the interpreter.

use super::{sample_item, validate_feed_urls, validate_formatted_message, FormattedMessage, RuleError, RuleSet};
use crate::model::{Button, FeedConfig, Item};
use mlua::{Lua, MultiValue, RegistryKey, Table, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Draft {
    config: FeedConfig,
    block_key: Option<RegistryKey>,
    keep_key: Option<RegistryKey>,
    format_key: Option<RegistryKey>,
}

pub struct LuaRuleSet {
    lua: Mutex<Lua>,
    feeds: Vec<FeedConfig>,
    block_keys: HashMap<String, RegistryKey>,
    keep_keys: HashMap<String, RegistryKey>,
    format_keys: HashMap<String, RegistryKey>,
}

impl LuaRuleSet {
    pub fn load(source: &str) -> Result<Self, RuleError> {
        let lua = Lua::new();
        let drafts: Arc<Mutex<Vec<Draft>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let drafts = drafts.clone();
            let feed_fn = lua
                .create_function(move |lua, args: Table| {
                    let url: String = args.get("url")?;
                    let title: Option<String> = args.get("title")?;
                    let topic: Option<i64> = args.get("message_thread_id")?;
                    let digest: Option<bool> = args.get("digest")?;
                    let always_send_new_items: Option<bool> = args.get("always_send_new_items")?;
                    let denylist: Option<Vec<String>> = args.get("github_pr_author_denylist")?;

                    let block_rule: Option<mlua::Function> = args.get("block_rule")?;
                    let keep_rule: Option<mlua::Function> = args.get("keep_rule")?;
                    let format: Option<mlua::Function> = args.get("format")?;

                    let block_key = block_rule.map(|f| lua.create_registry_value(f)).transpose()?;
                    let keep_key = keep_rule.map(|f| lua.create_registry_value(f)).transpose()?;
                    let format_key = format.map(|f| lua.create_registry_value(f)).transpose()?;

                    drafts.lock().unwrap().push(Draft {
                        config: FeedConfig {
                            url,
                            title,
                            topic,
                            has_block_rule: block_key.is_some(),
                            has_keep_rule: keep_key.is_some(),
                            has_format: format_key.is_some(),
                            digest: digest.unwrap_or(false),
                            always_send_new_items: always_send_new_items.unwrap_or(false),
                            github_pr_author_denylist: denylist.unwrap_or_default(),
                        },
                        block_key,
                        keep_key,
                        format_key,
                    });

                    Ok(())
                })
                .map_err(|e| RuleError::Eval(e.to_string()))?;

            lua.globals()
                .set("feed", feed_fn)
                .map_err(|e| RuleError::Eval(e.to_string()))?;
        }

        lua.load(source).exec().map_err(|e| RuleError::Eval(e.to_string()))?;

        let drafts = Arc::try_unwrap(drafts)
            .unwrap_or_else(|arc| Mutex::new(arc.lock().unwrap().drain(..).collect()))
            .into_inner()
            .unwrap();

        let feeds: Vec<FeedConfig> = drafts.iter().map(|d| d.config.clone()).collect();
        validate_feed_urls(&feeds)?;

        let mut block_keys = HashMap::new();
        let mut keep_keys = HashMap::new();
        let mut format_keys = HashMap::new();

        for draft in drafts {
            if let Some(key) = draft.block_key {
                block_keys.insert(draft.config.url.clone(), key);
            }
            if let Some(key) = draft.keep_key {
                keep_keys.insert(draft.config.url.clone(), key);
            }
            if let Some(key) = draft.format_key {
                // §4.10: a dry-run call with a synthetic sample item must
                // succeed and produce output the renderer accepts.
                let default_title = "Sample item";
                dry_run_format(&lua, &key, default_title).map_err(|reason| RuleError::InvalidFormatter {
                    url: draft.config.url.clone(),
                    reason,
                })?;
                format_keys.insert(draft.config.url.clone(), key);
            }
        }

        Ok(Self {
            lua: Mutex::new(lua),
            feeds,
            block_keys,
            keep_keys,
            format_keys,
        })
    }
}

fn item_to_lua<'lua>(lua: &'lua Lua, item: &Item) -> mlua::Result<Table<'lua>> {
    let t = lua.create_table()?;
    t.set("title", item.title.clone())?;
    t.set("url", item.link.clone())?;
    t.set("description", item.description.clone())?;
    t.set("content", item.content.clone())?;
    t.set("categories", lua.create_sequence_from(item.categories.clone())?)?;
    t.set("guid", item.guid.clone())?;
    t.set("published", item.published.map(|p| p.timestamp()))?;
    t.set("extensions", item.extensions.to_string())?;
    Ok(t)
}

fn call_predicate(lua: &Lua, key: &RegistryKey, item: &Item) -> Result<bool, String> {
    let func: mlua::Function = lua.registry_value(key).map_err(|e| e.to_string())?;
    let table = item_to_lua(lua, item).map_err(|e| e.to_string())?;
    let value: Value = func.call(table).map_err(|e| e.to_string())?;
    Ok(matches!(value, Value::Boolean(true)))
}

fn decode_format_result(values: MultiValue) -> Result<FormattedMessage, String> {
    let mut iter = values.into_iter();
    let body_val = iter.next().ok_or_else(|| "format() returned nothing".to_string())?;
    let body = match body_val {
        Value::String(s) => s.to_str().map_err(|e| e.to_string())?.to_string(),
        other => return Err(format!("format() body must be a string, got {}", other.type_name())),
    };

    match iter.next() {
        None | Some(Value::Nil) => Ok(FormattedMessage::Body(body)),
        Some(Value::Table(rows)) => {
            let mut keyboard = Vec::new();
            for row_val in rows.sequence_values::<Value>() {
                let row_table = match row_val.map_err(|e| e.to_string())? {
                    Value::Table(t) => t,
                    other => return Err(format!("keyboard row must be a table, got {}", other.type_name())),
                };
                let mut row = Vec::new();
                for btn_val in row_table.sequence_values::<Value>() {
                    let btn_table = match btn_val.map_err(|e| e.to_string())? {
                        Value::Table(t) => t,
                        other => {
                            return Err(format!("keyboard button must be a table, got {}", other.type_name()))
                        }
                    };
                    let text: String = btn_table.get("text").map_err(|e| e.to_string())?;
                    let url: String = btn_table.get("url").map_err(|e| e.to_string())?;
                    row.push(Button { text, url });
                }
                keyboard.push(row);
            }
            Ok(FormattedMessage::WithKeyboard(body, keyboard))
        }
        Some(other) => Err(format!("format() keyboard must be a table, got {}", other.type_name())),
    }
}

fn call_format(
    lua: &Lua,
    key: &RegistryKey,
    items: &[Item],
    default_title: &str,
) -> Result<FormattedMessage, String> {
    let func: mlua::Function = lua.registry_value(key).map_err(|e| e.to_string())?;
    let arg = if items.len() == 1 {
        Value::Table(item_to_lua(lua, &items[0]).map_err(|e| e.to_string())?)
    } else {
        let seq = items
            .iter()
            .map(|i| item_to_lua(lua, i))
            .collect::<mlua::Result<Vec<_>>>()
            .map_err(|e| e.to_string())?;
        Value::Table(lua.create_sequence_from(seq).map_err(|e| e.to_string())?)
    };

    let ret: MultiValue = func.call((arg, default_title.to_string())).map_err(|e| e.to_string())?;
    let decoded = decode_format_result(ret)?;
    validate_formatted_message(decoded)
}

fn dry_run_format(lua: &Lua, key: &RegistryKey, default_title: &str) -> Result<(), String> {
    call_format(lua, key, std::slice::from_ref(&sample_item()), default_title).map(|_| ())
}

impl RuleSet for LuaRuleSet {
    fn feeds(&self) -> &[FeedConfig] {
        &self.feeds
    }

    fn block(&self, feed: &FeedConfig, item: &Item) -> bool {
        let Some(key) = self.block_keys.get(&feed.url) else {
            return false;
        };
        let lua = self.lua.lock().unwrap();
        match call_predicate(&lua, key, item) {
            Ok(b) => b,
            Err(error) => {
                tracing::warn!(feed = %feed.url, %error, "block_rule raised or returned non-boolean; treating as false");
                false
            }
        }
    }

    fn keep(&self, feed: &FeedConfig, item: &Item) -> bool {
        let Some(key) = self.keep_keys.get(&feed.url) else {
            return true;
        };
        let lua = self.lua.lock().unwrap();
        match call_predicate(&lua, key, item) {
            Ok(b) => b,
            Err(error) => {
                tracing::warn!(feed = %feed.url, %error, "keep_rule raised or returned non-boolean; treating as false");
                false
            }
        }
    }

    fn format(&self, feed: &FeedConfig, items: &[Item], default_title: &str) -> Option<FormattedMessage> {
        let key = self.format_keys.get(&feed.url)?;
        let lua = self.lua.lock().unwrap();
        match call_format(&lua, key, items, default_title) {
            Ok(msg) => Some(msg),
            Err(error) => {
                tracing::warn!(
                    feed = %feed.url,
                    %error,
                    title_empty = default_title.is_empty(),
                    "format() raised or returned an invalid shape; falling back to built-in rendering"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_feeds_with_defaults() {
        let rs = LuaRuleSet::load(r#"feed{url = "https://example.com/feed.xml"}"#).unwrap();
        assert_eq!(rs.feeds().len(), 1);
        assert_eq!(rs.feeds()[0].url, "https://example.com/feed.xml");
        assert!(!rs.feeds()[0].digest);
    }

    #[test]
    fn keep_rule_default_is_true_when_absent() {
        let rs = LuaRuleSet::load(r#"feed{url = "https://example.com/feed.xml"}"#).unwrap();
        let item = sample_item();
        assert!(rs.keep(&rs.feeds()[0], &item));
    }

    #[test]
    fn block_rule_default_is_false_when_absent() {
        let rs = LuaRuleSet::load(r#"feed{url = "https://example.com/feed.xml"}"#).unwrap();
        let item = sample_item();
        assert!(!rs.block(&rs.feeds()[0], &item));
    }

    #[test]
    fn block_rule_evaluates_against_item_fields() {
        let rs = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              block_rule = function(item) return item.title == "Sample item" end,
            }
            "#,
        )
        .unwrap();
        let item = sample_item();
        assert!(rs.block(&rs.feeds()[0], &item));
    }

    #[test]
    fn predicate_raising_is_treated_as_false() {
        let rs = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              keep_rule = function(item) error("boom") end,
            }
            "#,
        )
        .unwrap();
        let item = sample_item();
        assert!(!rs.keep(&rs.feeds()[0], &item));
    }

    #[test]
    fn predicate_returning_non_boolean_is_treated_as_false() {
        let rs = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              keep_rule = function(item) return "yes" end,
            }
            "#,
        )
        .unwrap();
        let item = sample_item();
        assert!(!rs.keep(&rs.feeds()[0], &item));
    }

    #[test]
    fn format_returns_body_only() {
        let rs = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              format = function(item, default_title) return default_title end,
            }
            "#,
        )
        .unwrap();
        let item = sample_item();
        let out = rs.format(&rs.feeds()[0], &[item], "hello").unwrap();
        assert_eq!(out.body(), "hello");
        assert!(out.keyboard().is_none());
    }

    #[test]
    fn format_returns_body_and_keyboard() {
        let rs = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              format = function(item, default_title)
                return "hi", {{ {text = "Open", url = "https://example.com"} }}
              end,
            }
            "#,
        )
        .unwrap();
        let item = sample_item();
        let out = rs.format(&rs.feeds()[0], &[item], "hello").unwrap();
        assert_eq!(out.body(), "hi");
        let kb = out.keyboard().unwrap();
        assert_eq!(kb[0][0].text, "Open");
    }

    #[test]
    fn digest_format_receives_all_items() {
        let rs = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              digest = true,
              format = function(items, default_title) return "count:" .. #items end,
            }
            "#,
        )
        .unwrap();
        let items = vec![sample_item(), sample_item()];
        let out = rs.format(&rs.feeds()[0], &items, "hello").unwrap();
        assert_eq!(out.body(), "count:2");
    }

    #[test]
    fn load_rejects_invalid_formatter_at_load_time() {
        let result = LuaRuleSet::load(
            r#"
            feed{
              url = "https://example.com/feed.xml",
              format = function(item, default_title) return 42 end,
            }
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_rejects_duplicate_urls() {
        let result = LuaRuleSet::load(
            r#"
            feed{url = "https://example.com/feed.xml"}
            feed{url = "https://example.com/feed.xml"}
            "#,
        );
        assert!(result.is_err());
    }
}
