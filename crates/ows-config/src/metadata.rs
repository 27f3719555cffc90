//! Human-readable metadata: titles, abstracts, keywords and attribution.
//!
//! Inline values can be overridden per entry by a gettext message catalogue,
//! keyed `"<label>.title"` and `"<label>.abstract"`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{optional_str, required_str, string_list};

/// Parsed `.po` message catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCatalogue {
    messages: BTreeMap<String, String>,
}

impl MessageCatalogue {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text)
    }

    /// Parse gettext source. Entries with an empty `msgstr` are dropped, as
    /// is the header entry (empty `msgid`).
    pub fn parse(text: &str) -> ConfigResult<Self> {
        #[derive(PartialEq)]
        enum Field {
            None,
            Id,
            Str,
        }

        let mut messages = BTreeMap::new();
        let mut field = Field::None;
        let mut msgid = String::new();
        let mut msgstr = String::new();

        let mut flush = |msgid: &mut String, msgstr: &mut String| {
            if !msgid.is_empty() && !msgstr.is_empty() {
                messages.insert(std::mem::take(msgid), std::mem::take(msgstr));
            }
            msgid.clear();
            msgstr.clear();
        };

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("msgid ") {
                flush(&mut msgid, &mut msgstr);
                msgid = unquote(rest, lineno)?;
                field = Field::Id;
            } else if let Some(rest) = line.strip_prefix("msgstr ") {
                if field != Field::Id {
                    return Err(ConfigError::config(format!(
                        "msgstr without msgid at line {} of message catalogue",
                        lineno + 1
                    )));
                }
                msgstr = unquote(rest, lineno)?;
                field = Field::Str;
            } else if line.starts_with('"') {
                let continued = unquote(line, lineno)?;
                match field {
                    Field::Id => msgid.push_str(&continued),
                    Field::Str => msgstr.push_str(&continued),
                    Field::None => {
                        return Err(ConfigError::config(format!(
                            "Unexpected string at line {} of message catalogue",
                            lineno + 1
                        )))
                    }
                }
            }
            // msgctxt and plural forms are not used for metadata.
        }
        flush(&mut msgid, &mut msgstr);
        Ok(Self { messages })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.messages.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn unquote(s: &str, lineno: usize) -> ConfigResult<String> {
    let inner = s
        .trim()
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| {
            ConfigError::config(format!(
                "Malformed string at line {} of message catalogue",
                lineno + 1
            ))
        })?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(out)
}

/// Inline metadata of one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub abstract_: String,
    pub keywords: BTreeSet<String>,
}

impl Metadata {
    /// Parse `title`, `abstract` and `keywords`. Keywords are added to the
    /// parent's.
    pub fn parse(cfg: &Value, context: &str, parent_keywords: &BTreeSet<String>) -> ConfigResult<Self> {
        let mut keywords = parent_keywords.clone();
        keywords.extend(string_list(cfg, "keywords", context)?);
        Ok(Self {
            title: required_str(cfg, "title", context)?.to_string(),
            abstract_: optional_str(cfg, "abstract", context)?
                .unwrap_or_default()
                .to_string(),
            keywords,
        })
    }
}

/// Something carrying [`Metadata`] that may be translated.
pub trait MetadataBearing {
    /// Dotted prefix of catalogue keys for this entry, e.g. `layer.ls8`.
    fn metadata_label(&self) -> String;

    fn metadata(&self) -> &Metadata;

    fn title(&self, messages: Option<&MessageCatalogue>) -> String {
        self.translated("title", messages)
            .unwrap_or_else(|| self.metadata().title.clone())
    }

    fn abstract_text(&self, messages: Option<&MessageCatalogue>) -> String {
        self.translated("abstract", messages)
            .unwrap_or_else(|| self.metadata().abstract_.clone())
    }

    fn keywords(&self) -> &BTreeSet<String> {
        &self.metadata().keywords
    }

    fn translated(&self, field: &str, messages: Option<&MessageCatalogue>) -> Option<String> {
        let key = format!("{}.{}", self.metadata_label(), field);
        messages.and_then(|m| m.get(&key)).map(str::to_string)
    }
}

/// Logo image for an attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionLogo {
    pub url: String,
    pub format: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Data attribution shown in capabilities documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub logo: Option<AttributionLogo>,
}

impl Attribution {
    pub fn parse(cfg: Option<&Value>, context: &str) -> ConfigResult<Option<Self>> {
        match cfg {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
                ConfigError::config(format!("Invalid attribution in {}: {}", context, e))
            }),
        }
    }
}
