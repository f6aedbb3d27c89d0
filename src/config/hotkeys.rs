//! Global key bindings.
//!
//! Bindings map a normalized key name to an action. Names are parsed from the
//! same vocabulary the settings UI uses ("s", "F9", "Esc", "ArrowUp", ...).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ListenerError;

/// What a bound key does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum HotkeyAction {
    /// End the current recording.
    Stop,
    /// Reserved, currently inert.
    ReservedPause,
    /// Reserved, currently inert.
    ReservedResume,
}

/// Normalized key name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Parse a key name, accepting common aliases.
    pub fn parse(name: &str) -> Result<Self, ListenerError> {
        normalize_key(name)
            .map(|k| KeyId(k.to_string()))
            .ok_or_else(|| ListenerError::InvalidBinding(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KeyId {
    type Error = ListenerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KeyId::parse(&value)
    }
}

impl From<KeyId> for String {
    fn from(key: KeyId) -> Self {
        key.0
    }
}

fn normalize_key(key: &str) -> Option<&'static str> {
    const LETTERS: [&str; 26] = [
        "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q",
        "r", "s", "t", "u", "v", "w", "x", "y", "z",
    ];
    const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];
    const FUNCTION: [&str; 12] = [
        "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
    ];

    let lower = key.trim().to_lowercase();
    if let Some(k) = LETTERS
        .iter()
        .chain(DIGITS.iter())
        .chain(FUNCTION.iter())
        .copied()
        .find(|k| *k == lower)
    {
        return Some(k);
    }

    let named = match lower.as_str() {
        "space" => "space",
        "enter" | "return" => "enter",
        "escape" | "esc" => "escape",
        "tab" => "tab",
        "backspace" => "backspace",
        "delete" => "delete",
        "insert" => "insert",
        "home" => "home",
        "end" => "end",
        "pageup" => "pageup",
        "pagedown" => "pagedown",
        "arrowup" | "up" => "arrowup",
        "arrowdown" | "down" => "arrowdown",
        "arrowleft" | "left" => "arrowleft",
        "arrowright" | "right" => "arrowright",
        _ => return None,
    };
    Some(named)
}

/// Key-to-action table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotkeyBindings(BTreeMap<KeyId, HotkeyAction>);

impl HotkeyBindings {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Bind `key`, replacing any previous binding for it.
    pub fn bind(&mut self, key: &str, action: HotkeyAction) -> Result<(), ListenerError> {
        self.0.insert(KeyId::parse(key)?, action);
        Ok(())
    }

    pub fn action_for(&self, key: &KeyId) -> Option<HotkeyAction> {
        self.0.get(key).copied()
    }

    /// First key bound to `action`.
    pub fn key_for(&self, action: HotkeyAction) -> Option<&KeyId> {
        self.0.iter().find(|(_, a)| **a == action).map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyId, &HotkeyAction)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for HotkeyBindings {
    /// `s` stops the recording; `p` and `u` are reserved.
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert(KeyId("s".into()), HotkeyAction::Stop);
        map.insert(KeyId("p".into()), HotkeyAction::ReservedPause);
        map.insert(KeyId("u".into()), HotkeyAction::ReservedResume);
        Self(map)
    }
}
